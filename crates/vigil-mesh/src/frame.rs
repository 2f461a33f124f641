//! Async netstring framing over a TLS stream: ASCII-decimal length, colon,
//! payload, comma (§4.5). Unlike the replay log's on-disk framing
//! ([`vigil_replay`]), network frames are not compressed.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{MeshError, Result};

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let header = format!("{}:", payload.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(payload).await?;
    writer.write_all(b",").await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame, or `Ok(None)` on a clean EOF before any digit arrives.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, max_frame_bytes: usize) -> Result<Option<Vec<u8>>> {
    let mut len_digits = Vec::new();
    let mut one = [0u8; 1];
    loop {
        let n = reader.read(&mut one).await?;
        if n == 0 {
            return if len_digits.is_empty() {
                Ok(None)
            } else {
                Err(MeshError::MalformedFrame)
            };
        }
        match one[0] {
            b':' => break,
            b'0'..=b'9' => len_digits.push(one[0]),
            _ => return Err(MeshError::MalformedFrame),
        }
        if len_digits.len() > 10 {
            return Err(MeshError::MalformedFrame);
        }
    }

    let len: usize = std::str::from_utf8(&len_digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(MeshError::MalformedFrame)?;
    if len > max_frame_bytes {
        return Err(MeshError::FrameTooLarge { size: len, max: max_frame_bytes });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    let mut trailer = [0u8; 1];
    reader.read_exact(&mut trailer).await?;
    if trailer[0] != b',' {
        return Err(MeshError::MalformedFrame);
    }

    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn round_trips_a_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").await.unwrap();
        assert_eq!(buf, b"5:hello,");

        let mut cursor = Cursor::new(buf);
        let frame = read_frame(&mut cursor, 1024).await.unwrap().unwrap();
        assert_eq!(frame, b"hello");
    }

    #[tokio::test]
    async fn clean_eof_yields_none() {
        let mut cursor: Cursor<Vec<u8>> = Cursor::new(Vec::new());
        assert!(read_frame(&mut cursor, 1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_oversized_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &vec![0u8; 64]).await.unwrap();
        let mut cursor = Cursor::new(buf);
        let err = read_frame(&mut cursor, 8).await.unwrap_err();
        assert!(matches!(err, MeshError::FrameTooLarge { .. }));
    }
}
