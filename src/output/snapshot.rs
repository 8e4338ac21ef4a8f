//! Per-stage output snapshots.
//!
//! Each successful stage writes `<state_dir>/<stage>.json`, replacing any
//! previous file wholesale. Later stages read it back by stage name.

use crate::error::{ConvergeError, Result};
use crate::models::StageName;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Bumped whenever a stage output changes shape.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput<T> {
    pub version: u32,
    pub stage: StageName,
    pub generated_at: DateTime<Utc>,
    pub data: T,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> SnapshotStore {
        SnapshotStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, stage: StageName) -> PathBuf {
        self.dir.join(format!("{stage}.json"))
    }

    pub fn exists(&self, stage: StageName) -> bool {
        self.path(stage).is_file()
    }

    pub fn write<T: Serialize>(&self, stage: StageName, data: &T) -> Result<PathBuf> {
        let snapshot = StageOutput {
            version: SNAPSHOT_VERSION,
            stage,
            generated_at: Utc::now(),
            data,
        };
        let text = serde_json::to_string_pretty(&snapshot).map_err(|e| ConvergeError::Snapshot {
            stage: stage.to_string(),
            reason: format!("cannot serialize: {e}"),
        })?;
        let path = self.path(stage);
        write_atomic(&path, &text)?;
        log::info!("Wrote {stage} snapshot to {}", path.display());
        Ok(path)
    }

    pub fn read<T: DeserializeOwned>(&self, stage: StageName) -> Result<StageOutput<T>> {
        let path = self.path(stage);
        let text = fs::read_to_string(&path).map_err(|e| ConvergeError::Snapshot {
            stage: stage.to_string(),
            reason: format!("cannot read {} ({e}); run the {stage} stage first", path.display()),
        })?;
        let de = &mut serde_json::Deserializer::from_str(&text);
        let snapshot: StageOutput<T> = serde_path_to_error::deserialize(de).map_err(|e| ConvergeError::Snapshot {
            stage: stage.to_string(),
            reason: format!("path={} error={}", e.path(), e.inner()),
        })?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(ConvergeError::Snapshot {
                stage: stage.to_string(),
                reason: format!("version {} is not {SNAPSHOT_VERSION}; rerun the stage", snapshot.version),
            });
        }
        if snapshot.stage != stage {
            return Err(ConvergeError::Snapshot {
                stage: stage.to_string(),
                reason: format!("{} holds the {} snapshot", path.display(), snapshot.stage),
            });
        }
        log::debug!("Read {stage} snapshot generated at {}", snapshot.generated_at);
        Ok(snapshot)
    }

    /// Write an arbitrary artifact next to the snapshots.
    pub fn write_artifact(&self, file_name: &str, text: &str) -> Result<PathBuf> {
        let path = self.dir.join(file_name);
        write_atomic(&path, text)?;
        Ok(path)
    }
}

/// Temp file in the same directory, then rename over the target.
fn write_atomic(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, text)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
