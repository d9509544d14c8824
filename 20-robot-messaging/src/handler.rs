//! The seam between the messaging layer and whatever owns the domain state.
//!
//! Handlers run synchronously on a shared worker thread, so they must not
//! block for long. One handler instance is shared by every session. Any
//! mutable state it holds needs its own synchronization.

use crate::message::Message;

/// Turns an inbound request into the response written back to the peer.
///
/// Returning an error closes the connection without a response.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle_request(&self, request: Message) -> anyhow::Result<Message>;
}

/// Receives the reply to a dispatched request.
pub trait ResponseHandler: Send + Sync + 'static {
    fn handle_response(&self, response: &Message) -> anyhow::Result<()>;
}

impl<F> RequestHandler for F
where
    F: Fn(Message) -> anyhow::Result<Message> + Send + Sync + 'static,
{
    fn handle_request(&self, request: Message) -> anyhow::Result<Message> {
        self(request)
    }
}

impl<F> ResponseHandler for F
where
    F: Fn(&Message) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn handle_response(&self, response: &Message) -> anyhow::Result<()> {
        self(response)
    }
}
