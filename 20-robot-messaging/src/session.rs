//! One TCP connection, one request, one response.
//!
//! A session owns its socket outright and is consumed by [`Session::run`].
//! Servers and clients hand a session to a task (or await it directly) and
//! keep no reference to it afterwards. Whatever happens during the
//! exchange, the socket is closed when `run` returns.
//!
//! - [`ServerSession`]: `Reading -> Dispatching -> Writing -> Closed`
//! - [`ClientSession`]: `Writing -> Reading -> Dispatching -> Closed`
//!
//! Any step may instead end in `Errored`.

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use tokio::{io::AsyncWriteExt, net::TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, trace};

use crate::{
    codec::{FrameError, MessageCodec},
    error::MessagingError,
    handler::{RequestHandler, ResponseHandler},
    message::Message,
};

type FramedStream = Framed<TcpStream, MessageCodec>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Reading,
    Dispatching,
    Writing,
    Closed,
    Errored,
}

pub trait Session: Send + Sized + 'static {
    type Output: Send + 'static;

    fn peer(&self) -> SocketAddr;

    /// Performs the whole exchange and closes the socket.
    fn run(self) -> impl Future<Output = Result<Self::Output, MessagingError>> + Send;
}

/// Runs `session` to completion, giving up after `timeout` if one is set.
///
/// A timed-out session is dropped mid-exchange, which closes its socket.
pub async fn drive<S: Session>(
    session: S,
    timeout: Option<Duration>,
) -> Result<S::Output, MessagingError> {
    match timeout {
        Some(after) => tokio::time::timeout(after, session.run())
            .await
            .map_err(|_| MessagingError::TimedOut { after })?,
        None => session.run().await,
    }
}

struct Lifecycle {
    peer: SocketAddr,
    role: &'static str,
    state: SessionState,
}

impl Lifecycle {
    fn new(peer: SocketAddr, role: &'static str, initial: SessionState) -> Self {
        trace!(peer = %peer, role, state = ?initial, "session started");
        Self {
            peer,
            role,
            state: initial,
        }
    }

    fn advance(&mut self, next: SessionState) {
        trace!(
            peer = %self.peer,
            role = self.role,
            from = ?self.state,
            to = ?next,
            "session state changed"
        );
        self.state = next;
    }

    fn finish<T>(&mut self, result: &Result<T, MessagingError>) {
        match result {
            Ok(_) => self.advance(SessionState::Closed),
            Err(_) => self.advance(SessionState::Errored),
        }
    }
}

async fn read_frame(framed: &mut FramedStream) -> Result<Message, MessagingError> {
    match framed.next().await {
        Some(frame) => Ok(frame?),
        None => Err(FrameError::ConnectionClosed.into()),
    }
}

async fn close(framed: FramedStream) {
    let mut stream = framed.into_inner();
    if let Err(error) = stream.shutdown().await {
        trace!(?error, "socket shutdown failed");
    }
}

pub struct ServerSession {
    framed: FramedStream,
    peer: SocketAddr,
    handler: Arc<dyn RequestHandler>,
}

impl ServerSession {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        handler: Arc<dyn RequestHandler>,
        codec: MessageCodec,
    ) -> Self {
        Self {
            framed: Framed::new(stream, codec),
            peer,
            handler,
        }
    }
}

impl Session for ServerSession {
    type Output = ();

    fn peer(&self) -> SocketAddr {
        self.peer
    }

    async fn run(self) -> Result<(), MessagingError> {
        let ServerSession {
            mut framed,
            peer,
            handler,
        } = self;
        let mut lifecycle = Lifecycle::new(peer, "server", SessionState::Reading);

        let result: Result<(), MessagingError> = async {
            let request = read_frame(&mut framed).await?;
            let kind = request.kind();
            debug!(peer = %peer, %kind, "request received");

            lifecycle.advance(SessionState::Dispatching);
            let response = handler
                .handle_request(request)
                .map_err(|err| MessagingError::handler(kind, err))?;

            lifecycle.advance(SessionState::Writing);
            framed.send(response).await?;
            Ok(())
        }
        .await;

        lifecycle.finish(&result);
        close(framed).await;
        result
    }
}

pub struct ClientSession {
    framed: FramedStream,
    peer: SocketAddr,
    request: Message,
    handler: Arc<dyn ResponseHandler>,
}

impl ClientSession {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        request: Message,
        handler: Arc<dyn ResponseHandler>,
        codec: MessageCodec,
    ) -> Self {
        Self {
            framed: Framed::new(stream, codec),
            peer,
            request,
            handler,
        }
    }
}

impl Session for ClientSession {
    type Output = Message;

    fn peer(&self) -> SocketAddr {
        self.peer
    }

    async fn run(self) -> Result<Message, MessagingError> {
        let ClientSession {
            mut framed,
            peer,
            request,
            handler,
        } = self;
        let mut lifecycle = Lifecycle::new(peer, "client", SessionState::Writing);

        let result: Result<Message, MessagingError> = async {
            framed.send(request).await?;

            lifecycle.advance(SessionState::Reading);
            let response = read_frame(&mut framed).await?;
            debug!(peer = %peer, kind = %response.kind(), "response received");

            lifecycle.advance(SessionState::Dispatching);
            handler
                .handle_response(&response)
                .map_err(|err| MessagingError::handler(response.kind(), err))?;
            Ok(response)
        }
        .await;

        lifecycle.finish(&result);
        close(framed).await;
        result
    }
}
