//! Sample loading from JSONL files.
//!
//! Samples live one-per-line in `.jsonl` files anywhere under the sample
//! root. Files are visited in path order so a run sees a stable sample
//! set; a malformed line is fatal at startup rather than silently skipped.

use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::info;
use walkdir::WalkDir;

use crate::schema::Sample;

/// Errors that can occur while loading samples.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("IO error reading '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed sample at {path}:{line}: {source}")]
    Parse {
        path: String,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Loads every sample under `root`, capping each file at
/// `max_samples_per_task` lines.
pub fn load_samples(root: &Path, max_samples_per_task: usize) -> Result<Vec<Sample>, LoadError> {
    let mut samples = Vec::new();

    let mut files: Vec<_> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_type().is_file()
                && entry.path().extension().is_some_and(|ext| ext == "jsonl")
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort();

    for path in files {
        let text = fs::read_to_string(&path).map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let mut loaded = 0usize;
        for (index, line) in text.lines().enumerate() {
            if index >= max_samples_per_task {
                break;
            }
            if line.trim().is_empty() {
                continue;
            }
            let sample: Sample =
                serde_json::from_str(line).map_err(|source| LoadError::Parse {
                    path: path.display().to_string(),
                    line: index + 1,
                    source,
                })?;
            samples.push(sample);
            loaded += 1;
        }
        info!(file = %path.display(), samples = loaded, "Loaded sample file");
    }

    Ok(samples)
}
