use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frames are limited to 64 MiB; a larger declared length is treated as wire corruption rather
/// than an attempt to allocate an unbounded buffer.
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

#[derive(Debug)]
pub enum FrameError {
    Io(std::io::Error),
    Decode(String),
    Encode(String),
    FrameTooLarge(u32),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Io(err) => write!(f, "i/o error: {err}"),
            FrameError::Decode(msg) => write!(f, "frame decode error: {msg}"),
            FrameError::Encode(msg) => write!(f, "frame encode error: {msg}"),
            FrameError::FrameTooLarge(len) => {
                write!(f, "frame length {len} exceeds maximum {MAX_FRAME_LEN}")
            }
        }
    }
}

impl std::error::Error for FrameError {}

impl From<std::io::Error> for FrameError {
    fn from(err: std::io::Error) -> Self {
        FrameError::Io(err)
    }
}

/// Reads one length-prefixed `bincode` frame: a big-endian `u32` byte count followed by the
/// payload. Returns `Ok(None)` on a clean EOF at a frame boundary (the sender closed its side),
/// which a worker's dispatch loop treats as "no more work".
pub async fn read_framed<T, R>(reader: &mut R) -> Result<Option<T>, FrameError>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len,
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(FrameError::Io(err)),
    };
    if len > MAX_FRAME_LEN {
        return Err(FrameError::FrameTooLarge(len));
    }

    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    let value = bincode::deserialize(&buf).map_err(|err| FrameError::Decode(err.to_string()))?;
    Ok(Some(value))
}

/// Writes one length-prefixed `bincode` frame and flushes it. Flushing here, rather than leaving
/// it to the caller, keeps stdio pipes from stalling when a writer batches several frames with
/// unrelated work in between.
pub async fn write_framed<T, W>(writer: &mut W, value: &T) -> Result<(), FrameError>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let payload = bincode::serialize(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    let len: u32 = payload
        .len()
        .try_into()
        .map_err(|_| FrameError::Encode("payload exceeds u32::MAX bytes".to_string()))?;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::FrameTooLarge(len));
    }

    writer.write_u32(len).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn round_trips_a_value() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), Value::from(1i64));
        let original = Value::Map(map);

        let mut buf = Vec::new();
        write_framed(&mut buf, &original).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded: Value = read_framed(&mut cursor).await.unwrap().unwrap();
        assert_eq!(decoded, original);
    }

    #[tokio::test]
    async fn clean_eof_at_frame_boundary_yields_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let decoded: Option<Value> = read_framed(&mut cursor).await.unwrap();
        assert!(decoded.is_none());
    }

    #[tokio::test]
    async fn oversized_frame_length_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_LEN + 1).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        let result: Result<Option<Value>, FrameError> = read_framed(&mut cursor).await;
        assert!(matches!(result, Err(FrameError::FrameTooLarge(_))));
    }
}
