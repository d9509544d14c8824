use std::{
    future::Future,
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use tokio::{net::TcpListener, runtime::Handle, select, sync::oneshot, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    codec::MessageCodec,
    config::ExchangeConfig,
    error::MessagingError,
    handler::RequestHandler,
    session::{Session, ServerSession, drive},
};

/// Listens on a port and answers each connection with one [`ServerSession`].
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: Arc<dyn RequestHandler>,
    context: Handle,
    exchange: ExchangeConfig,
}

impl Server {
    /// Binds `port` on all IPv4 interfaces.
    pub fn bind(
        context: &Handle,
        port: u16,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<Self, MessagingError> {
        Self::bind_addr(
            context,
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            handler,
        )
    }

    /// Binds `addr` and registers the listener with `context`.
    ///
    /// Fails immediately if the address is unavailable.
    pub fn bind_addr(
        context: &Handle,
        addr: SocketAddr,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<Self, MessagingError> {
        let bind_error = |source: io::Error| MessagingError::Bind { addr, source };

        let std_listener = std::net::TcpListener::bind(addr).map_err(bind_error)?;
        std_listener.set_nonblocking(true).map_err(bind_error)?;
        let local_addr = std_listener.local_addr().map_err(bind_error)?;

        let listener = {
            let _entered = context.enter();
            TcpListener::from_std(std_listener).map_err(bind_error)?
        };

        Ok(Self {
            listener,
            local_addr,
            handler,
            context: context.clone(),
            exchange: ExchangeConfig::default(),
        })
    }

    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange.timeout = Some(timeout);
        self
    }

    pub fn with_max_body_len(mut self, max_body_len: usize) -> Self {
        self.exchange.max_body_len = max_body_len;
        self
    }

    pub fn with_exchange_config(mut self, exchange: ExchangeConfig) -> Self {
        self.exchange = exchange;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Spawns the accept loop on the server's execution context.
    ///
    /// Dropping the returned handle leaves the server running.
    pub fn start(self) -> ServerHandle {
        let local_addr = self.local_addr;
        let context = self.context.clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = context.spawn(self.run_until(async move {
            if shutdown_rx.await.is_err() {
                // Handle dropped without asking for shutdown: keep serving.
                std::future::pending::<()>().await;
            }
        }));

        ServerHandle {
            local_addr,
            shutdown_tx,
            task,
        }
    }

    /// Accepts connections until the listening socket fails.
    pub async fn run(self) -> Result<(), MessagingError> {
        self.run_until(std::future::pending()).await
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<(), MessagingError>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            local_addr,
            handler,
            context,
            exchange,
        } = self;
        tokio::pin!(shutdown);
        info!(addr = %local_addr, "server listening");

        loop {
            select! {
                _ = &mut shutdown => {
                    info!(addr = %local_addr, "server shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = accepted.map_err(|source| {
                        error!(addr = %local_addr, error = %source, "failed to accept connection");
                        MessagingError::Accept { source }
                    })?;
                    let codec = MessageCodec::with_max_body_len(exchange.max_body_len);
                    let session = ServerSession::new(stream, peer, Arc::clone(&handler), codec);
                    spawn_session(&context, session, exchange.timeout);
                }
            }
        }
    }

    pub async fn run_until_ctrl_c(self) -> Result<(), MessagingError> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn spawn_session(context: &Handle, session: ServerSession, timeout: Option<Duration>) {
    let peer = session.peer();
    debug!(peer = %peer, "connection accepted");
    context.spawn(async move {
        match drive(session, timeout).await {
            Ok(()) => debug!(peer = %peer, "session closed"),
            Err(err) => warn!(peer = %peer, error = %err, "session closed with error"),
        }
    });
}

/// A running accept loop.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<Result<(), MessagingError>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// True once the accept loop has stopped, whether asked to or not.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops accepting and returns the loop's result. Sessions already in
    /// flight run to completion on their own.
    pub async fn shutdown(self) -> Result<(), MessagingError> {
        let ServerHandle {
            shutdown_tx, task, ..
        } = self;
        let _ = shutdown_tx.send(());
        join(task).await
    }

    /// Waits for the accept loop to end on its own, which only happens when
    /// the listening socket fails.
    pub async fn wait(self) -> Result<(), MessagingError> {
        let ServerHandle {
            shutdown_tx, task, ..
        } = self;
        let result = join(task).await;
        drop(shutdown_tx);
        result
    }
}

async fn join(task: JoinHandle<Result<(), MessagingError>>) -> Result<(), MessagingError> {
    match task.await {
        Ok(result) => result,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        // Cancelled because the runtime is shutting down.
        Err(_) => Ok(()),
    }
}
