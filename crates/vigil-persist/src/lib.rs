//! State snapshot persistence (C9).
//!
//! On shutdown, every State attribute of every registered object is
//! serialized to a single newline-delimited JSON file (`state.dat`). On
//! startup, after config load but before C2/C5/C7 start, the file is
//! replayed: unknown objects are skipped (they may have been removed
//! from config) and unknown attributes are skipped (forward-compat)
//! (§4.9).

mod error;

pub use error::{Error, Result};

use std::path::Path;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use vigil_registry::Registry;

const STATE_FILE_NAME: &str = "state.dat";

/// Writes every Service/Endpoint State attribute in `registry` to
/// `state_dir/state.dat`, one JSON object per line.
pub async fn dump(registry: &Registry, state_dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(state_dir).await?;
    let path = state_dir.join(STATE_FILE_NAME);
    let tmp_path = state_dir.join(format!("{STATE_FILE_NAME}.tmp"));

    let mut file = tokio::fs::File::create(&tmp_path).await?;
    for record in registry.snapshot_state().await {
        let line = serde_json::to_string(&record)?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
    }
    file.flush().await?;
    drop(file);

    // Rename is atomic on the same filesystem; a crash mid-dump leaves
    // the previous state.dat intact rather than a half-written one.
    tokio::fs::rename(&tmp_path, &path).await?;
    Ok(())
}

/// Replays `state_dir/state.dat` into `registry`, if present. Returns
/// the number of records applied (for logging); a missing file is not an
/// error — a first run has nothing to restore.
pub async fn restore(registry: &Registry, state_dir: &Path) -> Result<u64> {
    let path = state_dir.join(STATE_FILE_NAME);
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err.into()),
    };

    let mut lines = BufReader::new(file).lines();
    let mut applied = 0u64;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => {
                registry.restore_state_record(record).await;
                applied += 1;
            }
            Err(err) => {
                tracing::warn!(%err, "skipping malformed state.dat line");
            }
        }
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_events::Bus;
    use vigil_types::{HostName, ObjectKey, Service, ServiceName, Timestamp};

    fn sample_service() -> Service {
        Service::new(
            HostName("h1".into()),
            ServiceName("ping".into()),
            vec!["/bin/true".into()],
            60.0,
            10.0,
            3,
            vec!["*".into()],
        )
    }

    #[tokio::test]
    async fn dump_then_restore_round_trips_next_check() {
        let dir = tempfile::tempdir().unwrap();

        let registry = Registry::new(Bus::new());
        registry.register_service(sample_service()).unwrap();
        let key = ObjectKey::service(HostName("h1".into()), ServiceName("ping".into()));
        registry
            .set_next_check(&key, Timestamp::from_secs(555.0), None)
            .await
            .unwrap();

        dump(&registry, dir.path()).await.unwrap();

        let restored = Registry::new(Bus::new());
        restored.register_service(sample_service()).unwrap();
        let applied = restore(&restored, dir.path()).await.unwrap();
        assert!(applied > 0);

        let handle = restored.get_service(&key).unwrap();
        assert_eq!(handle.read().await.next_check, Timestamp::from_secs(555.0));
    }

    #[tokio::test]
    async fn restore_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(Bus::new());
        let applied = restore(&registry, dir.path()).await.unwrap();
        assert_eq!(applied, 0);
    }
}
