//! Checkpoints: one JSON file per saved epoch, `<model_dir>/<epoch>.ckpt`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, TrainError};
use crate::network::Network;
use crate::optim::MomentumOptimizer;
use crate::persistence::atomic_write_json;

const EXTENSION: &str = "ckpt";

/// Everything needed to continue a run exactly where it stopped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Completed epochs.
    pub epoch: usize,
    /// Best validation score reached before this checkpoint.
    #[serde(default)]
    pub best_score: f64,
    pub network: Network,
    /// Velocities plus the global step.
    pub optimizer: MomentumOptimizer,
}

impl CheckpointState {
    pub fn global_step(&self) -> u64 {
        self.optimizer.global_step()
    }
}

/// Writes checkpoints atomically and keeps at most `max_to_keep` of them.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    model_dir: PathBuf,
    max_to_keep: usize,
}

impl CheckpointManager {
    pub fn new(model_dir: impl Into<PathBuf>, max_to_keep: usize) -> Self {
        Self { model_dir: model_dir.into(), max_to_keep: max_to_keep.max(1) }
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    pub fn path_for(&self, epoch: usize) -> PathBuf {
        self.model_dir.join(format!("{}.{}", epoch, EXTENSION))
    }

    /// Persists `state` as `<epoch>.ckpt`, then evicts the oldest checkpoints
    /// beyond the retention limit. Returns the written path.
    pub fn save(&self, state: &CheckpointState) -> Result<PathBuf> {
        let path = self.path_for(state.epoch);
        atomic_write_json(&path, state)?;
        debug!(epoch = state.epoch, global_step = state.global_step(), path = %path.display(), "checkpoint written");

        // The file just written always survives; the oldest others go first.
        let others: Vec<(usize, PathBuf)> = self.list()?
            .into_iter()
            .filter(|(epoch, _)| *epoch != state.epoch)
            .collect();
        let excess = (others.len() + 1).saturating_sub(self.max_to_keep);
        for (epoch, old) in others.into_iter().take(excess) {
            match std::fs::remove_file(&old) {
                Ok(()) => info!(epoch, path = %old.display(), "evicted checkpoint"),
                Err(e) => warn!(epoch, path = %old.display(), error = %e, "could not evict checkpoint"),
            }
        }
        Ok(path)
    }

    /// Loads a checkpoint file. A directory resolves to its latest checkpoint.
    pub fn restore(path: &Path) -> Result<CheckpointState> {
        let file = if path.is_dir() {
            Self::new(path, usize::MAX)
                .latest()?
                .ok_or_else(|| TrainError::CheckpointNotFound(path.to_path_buf()))?
        } else {
            path.to_path_buf()
        };
        let bytes = match std::fs::read(&file) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TrainError::CheckpointNotFound(file));
            }
            Err(e) => return Err(e.into()),
        };
        let state: CheckpointState = serde_json::from_slice(&bytes).map_err(|e| TrainError::CheckpointCorrupt {
            path: file.clone(),
            reason: e.to_string(),
        })?;
        state.optimizer.check_compatible(&state.network).map_err(|e| TrainError::CheckpointCorrupt {
            path: file.clone(),
            reason: e.to_string(),
        })?;
        info!(epoch = state.epoch, global_step = state.global_step(), path = %file.display(), "checkpoint restored");
        Ok(state)
    }

    /// Saved checkpoints ordered by epoch, oldest first.
    pub fn list(&self) -> Result<Vec<(usize, PathBuf)>> {
        let entries = match std::fs::read_dir(&self.model_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut found = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let epoch = path.file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<usize>().ok());
            if let Some(epoch) = epoch {
                found.push((epoch, path));
            }
        }
        found.sort_by_key(|(epoch, _)| *epoch);
        Ok(found)
    }

    pub fn latest(&self) -> Result<Option<PathBuf>> {
        Ok(self.list()?.pop().map(|(_, path)| path))
    }
}
