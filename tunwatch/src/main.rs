//! Creates or attaches a TUN device and logs what happens to it until Ctrl+C.

#![cfg_attr(test, allow(clippy::unwrap_used))]

use anyhow::Result;
use clap::Parser;

#[cfg(target_os = "linux")]
mod watch;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Name of the TUN interface to create.
    #[arg(long, env = "TUNWATCH_INTERFACE", default_value = "tun0")]
    name: String,

    #[arg(long, env = "TUNWATCH_MTU", default_value_t = 1420)]
    mtu: u32,

    /// Attach to this inherited TUN descriptor instead of creating the interface.
    #[arg(long, env = "TUNWATCH_FD", value_parser = clap::value_parser!(i32).range(0..))]
    fd: Option<i32>,

    /// Don't monitor the link state. The descriptor must have been opened with `IFF_NO_PI`.
    #[arg(long, requires = "fd")]
    unmonitored: bool,

    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_filter: String,

    /// `text` or `json`.
    #[arg(long, env = "TUNWATCH_LOG_FORMAT", default_value = "text")]
    log_format: logging::Format,
}

#[expect(
    clippy::print_stderr,
    reason = "No logger is active when we are printing this error."
)]
fn main() {
    match try_main() {
        Ok(()) => {}
        Err(e) => {
            // Print chain of errors manually to avoid it looking like a crash with stacktrace.
            eprintln!("{e:#}");

            std::process::exit(1);
        }
    }
}

#[cfg(target_os = "linux")]
fn try_main() -> Result<()> {
    use anyhow::Context as _;

    let cli = Cli::parse();

    logging::setup_global_subscriber(&cli.log_filter, cli.log_format)
        .context("Failed to set up logging")?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    rt.block_on(watch::run(cli))
}

#[cfg(not(target_os = "linux"))]
fn try_main() -> Result<()> {
    let _ = Cli::parse();

    anyhow::bail!("TUN devices are only supported on Linux")
}
