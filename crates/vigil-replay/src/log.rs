//! The replay log itself (C6): a single append-only, zlib-compressed,
//! netstring-framed stream of [`LogRecord`]s, rotated by record count.
//!
//! One writer, append-only; readers replay a contiguous range on
//! reconnect. Corruption in one file stops that file's replay but never
//! aborts the process (§4.6, §7).

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tracing::warn;
use vigil_types::Timestamp;

use crate::error::{ReplayError, Result};
use crate::netstring;
use crate::record::LogRecord;

const CURRENT_FILE_NAME: &str = "current";
const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

struct Writer {
    encoder: ZlibEncoder<BufWriter<File>>,
    record_count: u64,
}

/// Manages `<dir>/current` plus any rotated `<dir>/<int_timestamp>` files.
pub struct ReplayLog {
    dir: PathBuf,
    max_records_per_file: u64,
    max_frame_bytes: usize,
    writer: Mutex<Writer>,
}

impl ReplayLog {
    pub fn open(dir: impl Into<PathBuf>, max_records_per_file: u64) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| ReplayError::Io { path: dir.clone(), source })?;
        let writer = Mutex::new(open_current(&dir)?);
        Ok(Self {
            dir,
            max_records_per_file,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            writer,
        })
    }

    #[must_use]
    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    /// Appends one record to `current`, rotating first if the file is
    /// already at capacity.
    pub fn append(&self, record: &LogRecord) -> Result<()> {
        let payload = serde_json::to_vec(record).map_err(|source| ReplayError::Io {
            path: self.current_path(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, source),
        })?;

        let mut writer = self.writer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if writer.record_count >= self.max_records_per_file {
            self.rotate_locked(&mut writer)?;
        }

        netstring::write_frame(&mut writer.encoder, &payload)
            .map_err(|source| ReplayError::Io { path: self.current_path(), source })?;
        writer
            .encoder
            .flush()
            .map_err(|source| ReplayError::Io { path: self.current_path(), source })?;
        writer.record_count += 1;
        Ok(())
    }

    /// Explicitly rotates `current` out to `<ts+1>`, even if empty — used
    /// before streaming replay to a reconnecting peer so the peer never
    /// reads a file that's still being appended to (§4.6).
    pub fn rotate(&self) -> Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.rotate_locked(&mut writer)
    }

    fn rotate_locked(&self, writer: &mut Writer) -> Result<()> {
        let current_path = self.current_path();
        let rotated_name = (Timestamp::now().as_secs() as i64 + 1).to_string();
        let rotated_path = self.dir.join(&rotated_name);

        // Rename the path out from under the old file *before* opening a
        // fresh `current` — otherwise the new file handle would reopen
        // the same inode the old encoder is still writing through.
        if current_path.exists() {
            fs::rename(&current_path, &rotated_path).map_err(|source| ReplayError::Io {
                path: rotated_path.clone(),
                source,
            })?;
        }

        let finished = std::mem::replace(writer, open_current(&self.dir)?);
        drop(finished.encoder.finish().map_err(|source| ReplayError::Io {
            path: rotated_path,
            source,
        })?);
        Ok(())
    }

    /// Replays every persistent record with `ts >= since` and
    /// `except != peer_name`, in chronological file order. A corrupted
    /// file is logged and abandoned; later files are still read (§4.6,
    /// §7 E-5).
    pub fn stream_since(&self, since: Timestamp, peer_name: &str) -> Vec<LogRecord> {
        let mut out = Vec::new();
        for path in self.files_in_order() {
            match self.read_file(&path) {
                Ok(records) => {
                    for record in records {
                        if record.ts.as_secs() >= since.as_secs()
                            && record.except.as_deref() != Some(peer_name)
                        {
                            out.push(record);
                        }
                    }
                }
                Err(err) => {
                    warn!(path = %path.display(), %err, "replay log file corrupt, skipping remainder of file");
                }
            }
        }
        out
    }

    fn read_file(&self, path: &Path) -> Result<Vec<LogRecord>> {
        let file = File::open(path).map_err(|source| ReplayError::Io { path: path.to_path_buf(), source })?;
        let mut decoder = BufReader::new(ZlibDecoder::new(file));
        let mut records = Vec::new();
        while let Some(frame) = netstring::read_frame(&mut decoder, self.max_frame_bytes, path)? {
            let record: LogRecord = serde_json::from_slice(&frame)
                .map_err(|_| ReplayError::MalformedFrame { path: path.to_path_buf() })?;
            records.push(record);
        }
        Ok(records)
    }

    /// Removes rotated files whose rotation timestamp (and therefore
    /// every record inside) is no newer than `min_local_log_position` —
    /// the minimum ack position across all peers.
    pub fn sweep(&self, min_local_log_position: Timestamp) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir).map_err(|source| ReplayError::Io { path: self.dir.clone(), source })? {
            let entry = entry.map_err(|source| ReplayError::Io { path: self.dir.clone(), source })?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name == CURRENT_FILE_NAME {
                continue;
            }
            let Ok(rotated_at) = name.parse::<i64>() else { continue };
            if (rotated_at as f64) <= min_local_log_position.as_secs() {
                fs::remove_file(entry.path())
                    .map_err(|source| ReplayError::Io { path: entry.path(), source })?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn current_path(&self) -> PathBuf {
        self.dir.join(CURRENT_FILE_NAME)
    }

    /// Rotated files sorted chronologically by filename, followed by
    /// `current` last.
    fn files_in_order(&self) -> Vec<PathBuf> {
        let mut rotated: Vec<(i64, PathBuf)> = fs::read_dir(&self.dir)
            .into_iter()
            .flatten()
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name();
                let name = name.to_str()?;
                if name == CURRENT_FILE_NAME {
                    return None;
                }
                name.parse::<i64>().ok().map(|ts| (ts, entry.path()))
            })
            .collect();
        rotated.sort_by_key(|(ts, _)| *ts);

        let mut paths: Vec<PathBuf> = rotated.into_iter().map(|(_, path)| path).collect();
        let current = self.current_path();
        if current.exists() {
            paths.push(current);
        }
        paths
    }
}

fn open_current(dir: &Path) -> Result<Writer> {
    let path = dir.join(CURRENT_FILE_NAME);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|source| ReplayError::Io { path: path.clone(), source })?;
    Ok(Writer {
        encoder: ZlibEncoder::new(BufWriter::new(file), Compression::default()),
        record_count: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_types::{Message, Method};

    fn sample_record(ts: f64, except: Option<&str>) -> LogRecord {
        LogRecord::new(
            Timestamp::from_secs(ts),
            except.map(str::to_string),
            Message::new(Method::HeartBeat),
        )
    }

    #[test]
    fn append_then_stream_since_returns_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReplayLog::open(dir.path(), 50_000).unwrap();
        log.append(&sample_record(10.0, None)).unwrap();
        log.append(&sample_record(20.0, None)).unwrap();
        log.append(&sample_record(30.0, Some("peer-a"))).unwrap();

        let records = log.stream_since(Timestamp::from_secs(0.0), "peer-b");
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].ts.as_secs(), 10.0);
        assert_eq!(records[2].ts.as_secs(), 30.0);
    }

    #[test]
    fn except_filters_out_the_originating_peer() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReplayLog::open(dir.path(), 50_000).unwrap();
        log.append(&sample_record(10.0, Some("peer-a"))).unwrap();

        assert_eq!(log.stream_since(Timestamp::from_secs(0.0), "peer-a").len(), 0);
        assert_eq!(log.stream_since(Timestamp::from_secs(0.0), "peer-b").len(), 1);
    }

    #[test]
    fn since_filters_out_older_records() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReplayLog::open(dir.path(), 50_000).unwrap();
        log.append(&sample_record(10.0, None)).unwrap();
        log.append(&sample_record(20.0, None)).unwrap();

        let records = log.stream_since(Timestamp::from_secs(15.0), "peer-b");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ts.as_secs(), 20.0);
    }

    #[test]
    fn rotation_splits_records_across_files() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReplayLog::open(dir.path(), 2).unwrap();
        for i in 0..5 {
            log.append(&sample_record(f64::from(i), None)).unwrap();
        }

        let records = log.stream_since(Timestamp::from_secs(0.0), "peer-b");
        assert_eq!(records.len(), 5);

        let file_count = fs::read_dir(dir.path()).unwrap().count();
        assert!(file_count > 1, "expected rotation to produce more than one file");
    }

    #[test]
    fn explicit_rotate_moves_current_out_even_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReplayLog::open(dir.path(), 50_000).unwrap();
        log.append(&sample_record(10.0, None)).unwrap();
        log.rotate().unwrap();

        let rotated_files: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_name() != CURRENT_FILE_NAME)
            .collect();
        assert_eq!(rotated_files.len(), 1);
    }

    #[test]
    fn sweep_removes_fully_acked_rotated_files() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReplayLog::open(dir.path(), 1).unwrap();
        log.append(&sample_record(10.0, None)).unwrap();
        log.append(&sample_record(20.0, None)).unwrap();

        let rotated_before: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_name() != CURRENT_FILE_NAME)
            .collect();
        assert!(!rotated_before.is_empty());

        let removed = log.sweep(Timestamp::from_secs(f64::MAX)).unwrap();
        assert!(removed > 0);
    }

    #[test]
    fn corrupt_file_is_skipped_but_others_still_read() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReplayLog::open(dir.path(), 1).unwrap();
        log.append(&sample_record(10.0, None)).unwrap();
        log.append(&sample_record(20.0, None)).unwrap();

        // Corrupt the oldest rotated file directly.
        let mut rotated: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_name() != CURRENT_FILE_NAME)
            .collect();
        rotated.sort_by_key(std::fs::DirEntry::file_name);
        fs::write(rotated[0].path(), b"not zlib data at all").unwrap();

        let records = log.stream_since(Timestamp::from_secs(0.0), "peer-b");
        // The corrupt file contributes nothing, but the second file's
        // record still comes through.
        assert!(records.iter().any(|r| r.ts.as_secs() == 20.0));
    }
}
