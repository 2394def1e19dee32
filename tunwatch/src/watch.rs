use std::os::fd::{FromRawFd as _, OwnedFd};
use std::pin::pin;

use anyhow::{Context as _, Result};
use native_tun::{Device, Event, NativeTun};

use crate::Cli;

pub(crate) async fn run(cli: Cli) -> Result<()> {
    let tun = open(&cli)?;

    tracing::info!(
        name = %tun.name().context("Failed to query interface name")?,
        mtu = %tun.mtu().context("Failed to query MTU")?,
        up = %tun.is_up().context("Failed to query interface flags")?,
        framing = ?tun.framing(),
        "TUN device ready"
    );

    let result = watch(&tun).await;
    tun.close().context("Failed to close TUN device")?;

    result
}

fn open(cli: &Cli) -> Result<NativeTun> {
    let Some(raw) = cli.fd else {
        return NativeTun::create(&cli.name, cli.mtu)
            .with_context(|| format!("Failed to create TUN device `{}`", cli.name));
    };

    // SAFETY: `--fd` only accepts non-negative values. The descriptor was handed to us by the
    // parent process and nothing else in this process refers to it.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    if cli.unmonitored {
        return NativeTun::attach_unmonitored(fd)
            .with_context(|| format!("Failed to attach to descriptor {raw}"));
    }

    NativeTun::attach(fd, cli.mtu).with_context(|| format!("Failed to attach to descriptor {raw}"))
}

/// Logs events until Ctrl+C or until the event queue closes.
async fn watch(tun: &impl Device) -> Result<()> {
    let events = tun.events();
    let mut ctrl_c = pin!(tokio::signal::ctrl_c());

    loop {
        let event = tokio::select! {
            result = &mut ctrl_c => {
                result.context("Failed to listen for Ctrl+C")?;
                tracing::info!("Caught Ctrl+C");

                return Ok(());
            }
            event = events.recv_async() => event,
        };

        let Ok(event) = event else {
            tracing::info!("Event queue closed");

            return Ok(());
        };

        match event {
            Event::Up => tracing::info!("Link is up"),
            Event::Down => tracing::info!("Link is down"),
            Event::MtuUpdate => match tun.mtu() {
                Ok(mtu) => tracing::info!(%mtu, "MTU updated"),
                Err(e) => tracing::warn!("Failed to re-query MTU: {}", logging::err_with_src(&e)),
            },
        }
    }
}
