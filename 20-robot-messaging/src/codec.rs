//! Length-prefixed framing for [`Message`].
//!
//! Every frame on the wire is laid out as:
//!
//! - 4 bytes: message kind (big-endian u32)
//! - 4 bytes: body length (big-endian u32)
//! - N bytes: body
//!
//! The decoder buffers across arbitrary read boundaries and only yields a
//! message once the declared body has fully arrived. A connection close is
//! therefore never needed to find the end of a frame.

use std::io;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::message::{Message, MessageKind};

/// Size of the fixed `[kind][length]` header.
pub const HEADER_LEN: usize = 8;

/// Largest body accepted unless the codec is configured otherwise.
pub const DEFAULT_MAX_BODY_LEN: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("declared body length {len} exceeds maximum of {max} bytes")]
    Oversized { len: usize, max: usize },
    #[error("stream ended with {buffered} bytes of an incomplete frame")]
    Truncated { buffered: usize },
    #[error("connection closed before a frame arrived")]
    ConnectionClosed,
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct MessageCodec {
    max_body_len: usize,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self::with_max_body_len(DEFAULT_MAX_BODY_LEN)
    }

    pub fn with_max_body_len(max_body_len: usize) -> Self {
        Self { max_body_len }
    }

    pub fn max_body_len(&self) -> usize {
        self.max_body_len
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, FrameError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        // Peek so that nothing is consumed until the whole frame is here.
        let mut header = &src[..HEADER_LEN];
        let raw_kind = header.get_u32();
        let len = header.get_u32() as usize;

        if len > self.max_body_len {
            return Err(FrameError::Oversized {
                len,
                max: self.max_body_len,
            });
        }

        let frame_len = HEADER_LEN + len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let body = src.split_to(len).freeze();
        Ok(Some(Message::new(MessageKind::from(raw_kind), body)))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Message>, FrameError> {
        match self.decode(buf)? {
            Some(message) => Ok(Some(message)),
            None if buf.is_empty() => Ok(None),
            None => Err(FrameError::Truncated {
                buffered: buf.len(),
            }),
        }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = FrameError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), FrameError> {
        let (kind, body) = message.into_parts();
        let oversized = FrameError::Oversized {
            len: body.len(),
            max: self.max_body_len,
        };
        if body.len() > self.max_body_len {
            return Err(oversized);
        }
        let len = u32::try_from(body.len()).map_err(|_| oversized)?;

        dst.reserve(HEADER_LEN + body.len());
        dst.put_u32(kind.into());
        dst.put_u32(len);
        dst.extend_from_slice(&body);
        Ok(())
    }
}
