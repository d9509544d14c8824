use std::{borrow::Cow, fmt, str::FromStr};

use bytes::Bytes;

/// Protocol discriminant carried in every frame.
///
/// Peers agree on the numbering out of band. Values outside the known set
/// still decode, as [`MessageKind::Unknown`], so a newer peer can talk to an
/// older one without the connection being treated as corrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    EchoRequest,
    EchoResponse,
    UpdatePositionRequest,
    UpdatePositionResponse,
    UpdateFieldRequest,
    Unknown(u32),
}

impl MessageKind {
    /// The kind a handler is expected to answer with, if this is a request.
    pub fn response_kind(self) -> Option<MessageKind> {
        match self {
            MessageKind::EchoRequest => Some(MessageKind::EchoResponse),
            MessageKind::UpdatePositionRequest => Some(MessageKind::UpdatePositionResponse),
            _ => None,
        }
    }
}

impl From<u32> for MessageKind {
    fn from(raw: u32) -> Self {
        match raw {
            0 => MessageKind::EchoRequest,
            1 => MessageKind::EchoResponse,
            2 => MessageKind::UpdatePositionRequest,
            3 => MessageKind::UpdatePositionResponse,
            4 => MessageKind::UpdateFieldRequest,
            other => MessageKind::Unknown(other),
        }
    }
}

impl From<MessageKind> for u32 {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::EchoRequest => 0,
            MessageKind::EchoResponse => 1,
            MessageKind::UpdatePositionRequest => 2,
            MessageKind::UpdatePositionResponse => 3,
            MessageKind::UpdateFieldRequest => 4,
            MessageKind::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Unknown(raw) => write!(f, "Unknown({raw})"),
            known => write!(f, "{known:?}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognized message kind '{0}'")]
pub struct ParseKindError(String);

impl FromStr for MessageKind {
    type Err = ParseKindError;

    /// Accepts kebab-case names (`echo-request`) or a raw discriminant (`7`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "echo-request" => Ok(MessageKind::EchoRequest),
            "echo-response" => Ok(MessageKind::EchoResponse),
            "update-position-request" => Ok(MessageKind::UpdatePositionRequest),
            "update-position-response" => Ok(MessageKind::UpdatePositionResponse),
            "update-field-request" => Ok(MessageKind::UpdateFieldRequest),
            other => other
                .parse::<u32>()
                .map(MessageKind::from)
                .map_err(|_| ParseKindError(s.to_string())),
        }
    }
}

/// One request or response: a kind plus an opaque body.
///
/// Both parts are fixed at construction. Handlers answer a request by
/// building a new message rather than editing the one they were given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    kind: MessageKind,
    body: Bytes,
}

impl Message {
    pub fn new(kind: MessageKind, body: impl Into<Bytes>) -> Self {
        Self {
            kind,
            body: body.into(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Lossy UTF-8 view of the body for handlers and logs.
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn into_parts(self) -> (MessageKind, Bytes) {
        (self.kind, self.body)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.body_text())
    }
}
