//! Configuration snapshot files
//!
//! One plain-text file per capture, named by device id and UTC second, under
//! a fixed directory. Files are created with create-new semantics and are
//! never rewritten. When the second is taken the capture moves to the next
//! free one. Rollback replays a file through the apply primitive.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use crate::{CommandResult, Credentials, DeviceOps, DeviceTarget, Error, Result};

/// Later seconds tried after a name collision
const MAX_NAME_PROBES: u32 = 60;

/// Snapshot file store
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `device_<id>_snapshot_<YYYYMMDDTHHMMSSZ>.cfg`
    pub fn file_name(device_id: i64, taken_at: DateTime<Utc>) -> String {
        format!(
            "device_{}_snapshot_{}.cfg",
            device_id,
            taken_at.format("%Y%m%dT%H%M%SZ")
        )
    }

    /// Write a capture taken now and return its absolute path
    pub async fn save(&self, device_id: i64, content: &str) -> Result<PathBuf> {
        self.save_at(device_id, content, Utc::now()).await
    }

    /// Write a capture stamped with `taken_at` and return its absolute path
    #[instrument(skip(self, content), fields(bytes = content.len()))]
    pub async fn save_at(
        &self,
        device_id: i64,
        content: &str,
        taken_at: DateTime<Utc>,
    ) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            Error::SnapshotError(format!(
                "Failed to create snapshot directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let dir = tokio::fs::canonicalize(&self.dir).await?;
        let mut stamp = taken_at;

        for _ in 0..=MAX_NAME_PROBES {
            let path = dir.join(Self::file_name(device_id, stamp));
            let opened = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;

            let mut file = match opened {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!(path = %path.display(), "Snapshot name taken; trying next second");
                    stamp += chrono::Duration::seconds(1);
                    continue;
                }
                Err(e) => {
                    return Err(Error::SnapshotError(format!(
                        "Failed to create snapshot {}: {}",
                        path.display(),
                        e
                    )))
                }
            };

            file.write_all(content.as_bytes()).await?;
            file.sync_all().await?;

            info!(device_id, path = %path.display(), "Snapshot saved");
            return Ok(path);
        }

        Err(Error::SnapshotError(format!(
            "No free snapshot name for device {} within {}s of {}",
            device_id,
            MAX_NAME_PROBES,
            taken_at.format("%Y%m%dT%H%M%SZ")
        )))
    }

    /// Read a stored capture
    pub async fn load(&self, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::SnapshotError(format!("Failed to read snapshot {}: {}", path.display(), e))
        })
    }

    /// Re-apply a stored capture to the device
    ///
    /// Rollback is an ordinary apply with the snapshot content as payload.
    #[instrument(skip(self, ops, credentials, path), fields(device = %device.name))]
    pub async fn restore(
        &self,
        ops: &DeviceOps,
        device: &DeviceTarget,
        credentials: &Credentials,
        path: impl AsRef<Path>,
    ) -> CommandResult {
        let content = match self.load(path).await {
            Ok(content) => content,
            Err(e) => {
                warn!(error = %e, "Rollback could not read snapshot");
                return CommandResult::failed(1, format!("rollback read error: {}", e));
            }
        };

        let lines: Vec<String> = content.lines().map(str::to_string).collect();
        ops.apply_config(device, credentials, &lines).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedDevice, ScriptedSessions};
    use crate::PlatformKind;
    use chrono::TimeZone;

    #[test]
    fn test_file_name_pattern() {
        let at = Utc.with_ymd_and_hms(2026, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(
            SnapshotStore::file_name(42, at),
            "device_42_snapshot_20260309T070501Z.cfg"
        );
    }

    #[tokio::test]
    async fn test_same_second_saves_take_next_free_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshots"));
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();

        let first = store.save_at(3, "hostname r1\n", at).await.unwrap();
        assert!(first.is_absolute());
        assert!(first.ends_with("device_3_snapshot_20260102T030405Z.cfg"));

        let second = store.save_at(3, "hostname r2\n", at).await.unwrap();
        assert!(second.ends_with("device_3_snapshot_20260102T030406Z.cfg"));

        // Neither capture was rewritten
        assert_eq!(store.load(&first).await.unwrap(), "hostname r1\n");
        assert_eq!(store.load(&second).await.unwrap(), "hostname r2\n");

        // Other devices keep their own names
        let other = store.save_at(4, "hostname r3\n", at).await.unwrap();
        assert!(other.ends_with("device_4_snapshot_20260102T030405Z.cfg"));
    }

    #[tokio::test]
    async fn test_save_gives_up_when_no_name_is_free() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();

        for _ in 0..=MAX_NAME_PROBES {
            store.save_at(5, "hostname r5\n", at).await.unwrap();
        }
        let err = store.save_at(5, "hostname r5\n", at).await.unwrap_err();
        assert!(matches!(err, Error::SnapshotError(_)));
    }

    #[tokio::test]
    async fn test_restore_replays_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let path = store
            .save(9, "hostname r1\ninterface Gi0/1\n shutdown\n")
            .await
            .unwrap();

        let device_state = ScriptedDevice::new("");
        let ops = DeviceOps::new(ScriptedSessions::shared(device_state.clone()));
        let target = DeviceTarget {
            id: 9,
            name: "r1".into(),
            host: "192.0.2.1".into(),
            port: 22,
            platform: PlatformKind::CiscoIos,
        };

        let result = store
            .restore(&ops, &target, &Credentials::default(), &path)
            .await;
        assert!(result.success());
        assert_eq!(
            device_state.applied(),
            vec![vec![
                "hostname r1".to_string(),
                "interface Gi0/1".to_string(),
                " shutdown".to_string()
            ]]
        );
    }

    #[tokio::test]
    async fn test_restore_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let ops = DeviceOps::new(ScriptedSessions::shared(ScriptedDevice::new("")));
        let target = DeviceTarget {
            id: 1,
            name: "r1".into(),
            host: "192.0.2.1".into(),
            port: 22,
            platform: PlatformKind::Generic,
        };

        let result = store
            .restore(&ops, &target, &Credentials::default(), dir.path().join("gone.cfg"))
            .await;
        assert_eq!(result.exit_code, 1);
        assert!(result.output.starts_with("rollback read error"));
    }
}
