use std::time::Duration;

use crate::codec::DEFAULT_MAX_BODY_LEN;

/// Port a process listens on when none is given.
pub const DEFAULT_LOCAL_PORT: u16 = 12345;
/// Port of the peer process when none is given.
pub const DEFAULT_REMOTE_PORT: u16 = 12346;
pub const DEFAULT_REMOTE_HOST: &str = "localhost";
pub const DEFAULT_WORKER_THREADS: usize = 2;

/// How the shared execution context is built.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub worker_threads: usize,
    pub thread_name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            worker_threads: DEFAULT_WORKER_THREADS,
            thread_name: "messaging-worker".to_string(),
        }
    }
}

/// Per-connection limits shared by servers and clients.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeConfig {
    pub max_body_len: usize,
    /// `None` lets a stalled peer hold its session open indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            max_body_len: DEFAULT_MAX_BODY_LEN,
            timeout: None,
        }
    }
}
