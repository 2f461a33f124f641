//! Netstring framing: `<decimal length>:<payload>,` (djb's format). Used
//! for both the on-disk replay log and the mesh wire protocol so a frame
//! never depends on the payload itself being self-delimiting.

use std::io::{self, Read, Write};
use std::path::Path;

use crate::error::{ReplayError, Result};

pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    write!(writer, "{}:", payload.len())?;
    writer.write_all(payload)?;
    writer.write_all(b",")?;
    Ok(())
}

/// Reads one frame, or `Ok(None)` on a clean EOF before any digit is read.
/// `max_len` bounds the declared length so a corrupted length prefix can't
/// force an unbounded allocation.
pub fn read_frame<R: Read>(reader: &mut R, max_len: usize, path: &Path) -> Result<Option<Vec<u8>>> {
    let mut len_buf = Vec::new();
    let mut one = [0u8; 1];
    loop {
        let n = reader.read(&mut one).map_err(|source| ReplayError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if n == 0 {
            return if len_buf.is_empty() {
                Ok(None)
            } else {
                Err(ReplayError::MalformedFrame { path: path.to_path_buf() })
            };
        }
        match one[0] {
            b':' => break,
            b'0'..=b'9' => len_buf.push(one[0]),
            _ => return Err(ReplayError::MalformedFrame { path: path.to_path_buf() }),
        }
        if len_buf.len() > 10 {
            return Err(ReplayError::MalformedFrame { path: path.to_path_buf() });
        }
    }

    let len: usize = std::str::from_utf8(&len_buf)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ReplayError::MalformedFrame { path: path.to_path_buf() })?;
    if len > max_len {
        return Err(ReplayError::FrameTooLarge { size: len, max: max_len });
    }

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .map_err(|source| ReplayError::Io { path: path.to_path_buf(), source })?;

    let mut trailer = [0u8; 1];
    reader
        .read_exact(&mut trailer)
        .map_err(|source| ReplayError::Io { path: path.to_path_buf(), source })?;
    if trailer[0] != b',' {
        return Err(ReplayError::MalformedFrame { path: path.to_path_buf() });
    }

    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_a_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").unwrap();
        assert_eq!(buf, b"5:hello,");

        let mut cursor = Cursor::new(buf);
        let frame = read_frame(&mut cursor, 1024, Path::new("test")).unwrap().unwrap();
        assert_eq!(frame, b"hello");
    }

    #[test]
    fn reads_multiple_frames_back_to_back() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"one").unwrap();
        write_frame(&mut buf, b"two").unwrap();
        let mut cursor = Cursor::new(buf);
        assert_eq!(read_frame(&mut cursor, 1024, Path::new("t")).unwrap().unwrap(), b"one");
        assert_eq!(read_frame(&mut cursor, 1024, Path::new("t")).unwrap().unwrap(), b"two");
        assert!(read_frame(&mut cursor, 1024, Path::new("t")).unwrap().is_none());
    }

    #[test]
    fn rejects_frame_exceeding_max_len() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &vec![0u8; 100]).unwrap();
        let mut cursor = Cursor::new(buf);
        let err = read_frame(&mut cursor, 10, Path::new("t")).unwrap_err();
        assert!(matches!(err, ReplayError::FrameTooLarge { .. }));
    }

    #[test]
    fn rejects_missing_trailer() {
        let mut cursor = Cursor::new(b"5:hello!".to_vec());
        let err = read_frame(&mut cursor, 1024, Path::new("t")).unwrap_err();
        assert!(matches!(err, ReplayError::MalformedFrame { .. }));
    }
}
