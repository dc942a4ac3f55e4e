//! JSON model artifact files.
//!
//! Deployed artifacts are never overwritten: saving to an existing path fails.

use crate::domain::error::EventcastError;
use crate::domain::forecaster::classifier::ModelArtifact;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

pub fn load_artifact(path: &Path) -> Result<ModelArtifact, EventcastError> {
    let content = fs::read_to_string(path).map_err(|e| EventcastError::ModelLoad {
        reason: format!("failed to read {}: {}", path.display(), e),
    })?;
    serde_json::from_str(&content).map_err(|e| EventcastError::ModelLoad {
        reason: format!("invalid artifact {}: {}", path.display(), e),
    })
}

pub fn save_artifact(artifact: &ModelArtifact, path: &Path) -> Result<(), EventcastError> {
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| EventcastError::ModelLoad {
            reason: format!("cannot create {}: {}", path.display(), e),
        })?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, artifact).map_err(|e| EventcastError::ModelLoad {
        reason: format!("failed to serialize artifact: {e}"),
    })?;
    writer.flush()?;
    info!(
        path = %path.display(),
        model = %artifact.metadata.model_name,
        version = %artifact.metadata.model_version,
        "model artifact written"
    );
    Ok(())
}
