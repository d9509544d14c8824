use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    net::{TcpStream, lookup_host},
    runtime::Handle,
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    codec::MessageCodec,
    config::ExchangeConfig,
    error::MessagingError,
    handler::ResponseHandler,
    message::Message,
    session::{ClientSession, drive},
};

/// Sends requests to one `host:port`, a fresh connection per message.
#[derive(Clone)]
pub struct Client {
    context: Handle,
    host: String,
    port: u16,
    handler: Arc<dyn ResponseHandler>,
    exchange: ExchangeConfig,
}

impl Client {
    pub fn new(
        context: &Handle,
        host: impl Into<String>,
        port: u16,
        handler: Arc<dyn ResponseHandler>,
    ) -> Self {
        Self {
            context: context.clone(),
            host: host.into(),
            port,
            handler,
            exchange: ExchangeConfig::default(),
        }
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

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Connects, sends `message`, and waits for the reply.
    ///
    /// The reply is passed to the response handler before it is returned.
    /// Failures are not retried.
    pub async fn dispatch(&self, message: Message) -> Result<Message, MessagingError> {
        let (stream, peer) = self.connect().await?;
        let codec = MessageCodec::with_max_body_len(self.exchange.max_body_len);
        let session = ClientSession::new(stream, peer, message, Arc::clone(&self.handler), codec);
        drive(session, self.exchange.timeout).await
    }

    /// Fire-and-forget form of [`Client::dispatch`], run on the client's
    /// execution context. Failures are logged; the handle still yields them.
    pub fn dispatch_message(&self, message: Message) -> JoinHandle<Result<Message, MessagingError>> {
        let client = self.clone();
        self.context.spawn(async move {
            let result = client.dispatch(message).await;
            if let Err(err) = &result {
                warn!(host = %client.host, port = client.port, error = %err, "dispatch failed");
            }
            result
        })
    }

    async fn connect(&self) -> Result<(TcpStream, SocketAddr), MessagingError> {
        let mut addrs: Vec<SocketAddr> = lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|source| self.resolution_error(source))?
            .collect();
        if addrs.is_empty() {
            return Err(self.resolution_error(io::Error::new(
                io::ErrorKind::NotFound,
                "host resolved to no addresses",
            )));
        }
        // Servers bind IPv4 by default, so try those addresses first.
        addrs.sort_by_key(SocketAddr::is_ipv6);

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    debug!(host = %self.host, %addr, "connected");
                    return Ok((stream, addr));
                }
                Err(err) => {
                    debug!(host = %self.host, %addr, error = %err, "connect attempt failed");
                    last_error = Some(err);
                }
            }
        }

        Err(MessagingError::Connection {
            host: self.host.clone(),
            port: self.port,
            source: last_error
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no address tried")),
        })
    }

    fn resolution_error(&self, source: io::Error) -> MessagingError {
        MessagingError::Resolution {
            host: self.host.clone(),
            port: self.port,
            source,
        }
    }
}
