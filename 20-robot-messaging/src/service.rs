//! The shared execution context every server, client and session runs on.
//!
//! A [`CommunicationService`] owns a multi-threaded tokio runtime. Its worker
//! threads process connect, accept, read and write completions and run the
//! handlers. Components never reach for the runtime themselves. They take
//! the [`Handle`] returned by [`CommunicationService::context`], so a
//! process can construct one service at start-up and pass it around.
//!
//! [`CommunicationService::global`] covers the other common shape: one
//! lazily created service for the whole process, which lives until the
//! process exits.

use std::{
    future::Future,
    sync::{Mutex, OnceLock, PoisonError},
};

use tokio::runtime::{Builder, Handle, Runtime};
use tracing::debug;

use crate::{config::ServiceConfig, error::MessagingError};

static GLOBAL: OnceLock<CommunicationService> = OnceLock::new();
// Serializes first-time construction so racing callers never build two runtimes.
static GLOBAL_INIT: Mutex<()> = Mutex::new(());

pub struct CommunicationService {
    runtime: Runtime,
}

impl CommunicationService {
    /// Builds a service with its own worker threads.
    ///
    /// Dropping the service stops its workers. It must not be dropped from
    /// inside an async context; use [`CommunicationService::shutdown_background`]
    /// there instead.
    pub fn start(config: &ServiceConfig) -> Result<Self, MessagingError> {
        let workers = config.worker_threads.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name(config.thread_name.clone())
            .enable_all()
            .build()
            .map_err(MessagingError::Service)?;

        debug!(workers, thread_name = %config.thread_name, "communication service started");
        Ok(Self { runtime })
    }

    /// The process-wide service, created with default settings on first use.
    pub fn global() -> Result<&'static CommunicationService, MessagingError> {
        Self::global_with(&ServiceConfig::default())
    }

    /// Like [`CommunicationService::global`], but `config` is used if this
    /// call is the one that creates the service. Later calls ignore it.
    pub fn global_with(
        config: &ServiceConfig,
    ) -> Result<&'static CommunicationService, MessagingError> {
        if let Some(service) = GLOBAL.get() {
            return Ok(service);
        }

        let _guard = GLOBAL_INIT.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(service) = GLOBAL.get() {
            return Ok(service);
        }

        let service = Self::start(config)?;
        Ok(GLOBAL.get_or_init(|| service))
    }

    /// Handle used to schedule work on this service's workers.
    pub fn context(&self) -> Handle {
        self.runtime.handle().clone()
    }

    /// Runs `future` to completion on the calling thread while the workers
    /// keep driving I/O.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Stops the workers without waiting for in-flight tasks.
    pub fn shutdown_background(self) {
        self.runtime.shutdown_background();
    }
}
