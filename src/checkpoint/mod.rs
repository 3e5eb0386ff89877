//! On-disk checkpoint store for resumable runs.
//!
//! The store maps (stage, producer, sample) to a JSON file under the run
//! directory:
//!
//! - `generate/<model>/<sample-id>.json`: a [`SampleWithOutputs`]
//! - `error/generate/<model>/<sample-id>.json`: a sample plus error text
//! - `result/<model>/<module>/<task>/<sample-id>.json`: a scored sample
//!
//! Presence of a file is the sole resume signal; absence means recompute.
//! Writes go through a temp file in the target directory followed by a
//! rename, so a crash mid-write never leaves a half-written checkpoint that
//! a later run would trust.
//!
//! Model identifiers double as directory names, so `/` and spaces are
//! replaced with `_`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during checkpoint operations.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("IO error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error at '{path}': {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Replaces filesystem-hostile characters in a model identifier.
pub fn sanitize_model_name(model: &str) -> String {
    model.replace(['/', ' '], "_")
}

/// Checkpoint store rooted at one run directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    /// Creates a store rooted at `<run_root>/<run_name>`-style path.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The run directory this store writes under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the generation checkpoint for (model, sample).
    pub fn generate_path(&self, model: &str, sample_id: Uuid) -> PathBuf {
        self.root
            .join("generate")
            .join(sanitize_model_name(model))
            .join(format!("{}.json", sample_id))
    }

    /// Path of the generation error record for (model, sample).
    pub fn generate_error_path(&self, model: &str, sample_id: Uuid) -> PathBuf {
        self.root
            .join("error")
            .join("generate")
            .join(sanitize_model_name(model))
            .join(format!("{}.json", sample_id))
    }

    /// Path of the scoring result for (model, module, task, sample).
    pub fn result_path(&self, model: &str, module: &str, task: &str, sample_id: Uuid) -> PathBuf {
        self.root
            .join("result")
            .join(sanitize_model_name(model))
            .join(module)
            .join(task)
            .join(format!("{}.json", sample_id))
    }

    /// Loads a checkpoint if it exists; `None` means recompute.
    pub fn load<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, CheckpointError> {
        if !path.is_file() {
            return Ok(None);
        }
        let text = fs::read_to_string(path).map_err(|source| CheckpointError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let value = serde_json::from_str(&text).map_err(|source| CheckpointError::Json {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Some(value))
    }

    /// Whether a checkpoint already exists at `path`.
    pub fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// Atomically writes a checkpoint: serialize to a temp file in the
    /// target directory, then rename into place.
    pub fn store<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), CheckpointError> {
        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent).map_err(|source| CheckpointError::Io {
            path: parent.display().to_string(),
            source,
        })?;

        let json = serde_json::to_string(value).map_err(|source| CheckpointError::Json {
            path: path.display().to_string(),
            source,
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|source| {
            CheckpointError::Io {
                path: parent.display().to_string(),
                source,
            }
        })?;
        tmp.write_all(json.as_bytes())
            .map_err(|source| CheckpointError::Io {
                path: path.display().to_string(),
                source,
            })?;
        tmp.persist(path).map_err(|e| CheckpointError::Io {
            path: path.display().to_string(),
            source: e.error,
        })?;
        Ok(())
    }

    /// Removes the `error/` subtree so previously failed samples are
    /// retried on the next run.
    pub fn clear_errors(&self) -> Result<(), CheckpointError> {
        let error_root = self.root.join("error");
        if error_root.is_dir() {
            fs::remove_dir_all(&error_root).map_err(|source| CheckpointError::Io {
                path: error_root.display().to_string(),
                source,
            })?;
        }
        Ok(())
    }
}
