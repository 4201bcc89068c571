//! # Length Framing
//!
//! Frames are a 4-byte big-endian length followed by that many bytes of
//! UTF-8 JSON. A zero, negative, or implausibly large length is a protocol
//! violation and ends the session.
//!
//! The writer side serializes one whole frame per call; callers are expected
//! to funnel all writes for a connection through a single task so frames from
//! concurrent senders never interleave.

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

use crate::error::Result;
use crate::error::WireError;
use crate::message::Message;

/// Upper bound for ordinary frames.
pub const MAX_FRAME_LEN: u32 = 1_073_741_824;

/// Upper bound for the auth handshake frame.
pub const MAX_AUTH_FRAME_LEN: u32 = 4096;

/// Read one length-prefixed frame body. Returns `Ok(None)` on a clean EOF at
/// a frame boundary.
pub async fn read_frame<R>(reader: &mut R, max_len: u32) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = i32::from_be_bytes(len_buf);
    if len <= 0 || len as u32 > max_len {
        return Err(WireError::BadFrameLength(len as i64));
    }

    let mut body = vec![0u8; len as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => WireError::Truncated,
            _ => WireError::Io(e),
        })?;
    Ok(Some(body))
}

/// Read and decode one message.
pub async fn read_message<R>(reader: &mut R, max_len: u32) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let Some(body) = read_frame(reader, max_len).await? else {
        return Ok(None);
    };
    let message = serde_json::from_slice(&body)?;
    Ok(Some(message))
}

/// Encode and write one message as a single frame.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(message)?;
    if body.len() as u64 > MAX_FRAME_LEN as u64 {
        return Err(WireError::BadFrameLength(body.len() as i64));
    }
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}
