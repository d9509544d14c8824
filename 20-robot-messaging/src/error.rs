use std::{io, net::SocketAddr, time::Duration};

use crate::{codec::FrameError, message::MessageKind};

/// Failures surfaced by servers, clients and sessions.
///
/// Resolution and connection failures end a single dispatch. Protocol, I/O
/// and handler failures end a single session. Only [`MessagingError::Accept`]
/// takes a whole server down.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("failed to resolve host = {host}, port = {port}: {source}")]
    Resolution {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("failed to connect to host = {host}, port = {port}: {source}")]
    Connection {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("accept loop failed: {source}")]
    Accept {
        #[source]
        source: io::Error,
    },
    #[error("protocol error: {0}")]
    Protocol(#[source] FrameError),
    #[error("socket error: {0}")]
    Io(#[source] io::Error),
    #[error("handler failed on {kind}: {reason}")]
    Handler { kind: MessageKind, reason: String },
    #[error("exchange did not complete within {after:?}")]
    TimedOut { after: Duration },
    #[error("failed to start communication service: {0}")]
    Service(#[source] io::Error),
}

impl From<FrameError> for MessagingError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(err) => MessagingError::Io(err),
            other => MessagingError::Protocol(other),
        }
    }
}

impl MessagingError {
    pub(crate) fn handler(kind: MessageKind, err: anyhow::Error) -> Self {
        MessagingError::Handler {
            kind,
            reason: format!("{err:#}"),
        }
    }

    /// True for malformed or truncated frames, as opposed to socket failures.
    pub fn is_protocol(&self) -> bool {
        matches!(self, MessagingError::Protocol(_))
    }
}
