use std::io;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to create TUN device")]
    DeviceCreate(#[source] io::Error),
    #[error("Failed to get MTU of TUN device")]
    MtuQuery(#[source] io::Error),
    #[error("Failed to set MTU of TUN device")]
    MtuSet(#[source] io::Error),
    #[error("Failed to get {what} of TUN device")]
    Query {
        what: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("Netlink socket error: {context}")]
    Socket {
        context: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("Failed to cancel pending netlink receive")]
    Cancellation(#[source] io::Error),
    #[error("Failed to spawn monitoring thread")]
    Spawn(#[source] io::Error),
    #[error("Failed to close TUN device")]
    Close(#[source] io::Error),
    #[error("Invalid packet buffer: {0}")]
    InvalidBuffer(&'static str),
    #[error("Failed to read from or write to TUN device")]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn query(what: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Query { what, source }
    }

    pub(crate) fn socket(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Socket { context, source }
    }

    /// The OS error code at the root of this error, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::DeviceCreate(e)
            | Self::MtuQuery(e)
            | Self::MtuSet(e)
            | Self::Query { source: e, .. }
            | Self::Socket { source: e, .. }
            | Self::Cancellation(e)
            | Self::Spawn(e)
            | Self::Close(e)
            | Self::Io(e) => e.raw_os_error(),
            Self::InvalidBuffer(_) => None,
        }
    }
}
