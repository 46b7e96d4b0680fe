//! Wire codec module
//!
//! Message encoding and the one-message-per-direction framing used over
//! TCP connections.
//!
//! A sender writes one encoded message and then shuts down its write half.
//! The receiver reads until EOF, so the codec itself needs no length prefix.

use crate::dht::message::Message;
use crate::error::{DhtError, Result};
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Upper bound on a single encoded message
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Encoding of a [`Message`] to and from bytes
pub trait MessageCodec: Send + Sync + 'static {
    /// Encode a message
    fn encode(&self, message: &Message) -> Result<Vec<u8>>;

    /// Decode a message
    fn decode(&self, data: &[u8]) -> Result<Message>;
}

/// Default codec: one JSON document per message
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode(&self, message: &Message) -> Result<Vec<u8>> {
        serde_json::to_vec(message)
            .map_err(|e| DhtError::protocol_error_with_source("Failed to encode message", e.to_string()))
    }

    fn decode(&self, data: &[u8]) -> Result<Message> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Encode `message`, write it and close the write half
pub async fn write_message<C, W>(codec: &C, writer: &mut W, message: &Message) -> Result<()>
where
    C: MessageCodec + ?Sized,
    W: AsyncWriteExt + Unpin,
{
    let encoded = codec.encode(message)?;
    if encoded.len() > MAX_MESSAGE_SIZE {
        return Err(DhtError::protocol_error(format!(
            "Message of {} bytes exceeds limit of {}",
            encoded.len(),
            MAX_MESSAGE_SIZE
        )));
    }
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    writer.shutdown().await?;
    Ok(())
}

/// Read until EOF and decode one message
pub async fn read_message<C, R>(codec: &C, reader: &mut R) -> Result<Message>
where
    C: MessageCodec + ?Sized,
    R: AsyncReadExt + Unpin,
{
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        let n = reader.read_buf(&mut buf).await?;
        if n == 0 {
            break;
        }
        if buf.len() > MAX_MESSAGE_SIZE {
            return Err(DhtError::protocol_error(format!(
                "Message exceeds limit of {} bytes",
                MAX_MESSAGE_SIZE
            )));
        }
    }
    if buf.is_empty() {
        return Err(DhtError::protocol_error("Connection closed before a message was received"));
    }
    codec.decode(&buf)
}
