// src/exec/outputs.rs

//! Resolve declared outputs after a job has run.
//!
//! A declared output path is relative to the job's working directory (or
//! absolute). Paths containing glob metacharacters are matched against
//! every file below their non-glob prefix.

use std::path::{Component, Path, PathBuf};

use globset::GlobBuilder;
use tracing::{debug, warn};

use crate::fs::FileSystem;
use crate::job::CollectedOutput;
use crate::types::{JobId, OutputDescriptor};

pub fn collect_outputs(
    job: &JobId,
    outputs: &[OutputDescriptor],
    working_directory: &Path,
    fs: &dyn FileSystem,
) -> Vec<CollectedOutput> {
    let mut collected = Vec::new();

    for output in outputs {
        let full = if output.path.is_absolute() {
            output.path.clone()
        } else {
            working_directory.join(&output.path)
        };

        let found = if is_pattern(&full) {
            match_pattern(&full, fs)
        } else if fs.is_file(&full) {
            vec![full.clone()]
        } else {
            Vec::new()
        };

        if found.is_empty() {
            warn!(
                job = %job,
                output = %output.name,
                path = %full.display(),
                "declared output not found"
            );
            continue;
        }

        for path in found {
            debug!(job = %job, output = %output.name, path = %path.display(), "collected output");
            collected.push(CollectedOutput {
                name: output.name.clone(),
                path,
            });
        }
    }

    collected
}

/// Whether a declared output path contains glob metacharacters.
pub(crate) fn is_pattern(path: &Path) -> bool {
    path.to_string_lossy()
        .chars()
        .any(|c| matches!(c, '*' | '?' | '[' | '{'))
}

fn match_pattern(pattern: &Path, fs: &dyn FileSystem) -> Vec<PathBuf> {
    let text = pattern.to_string_lossy();
    let matcher = match GlobBuilder::new(&text).literal_separator(true).build() {
        Ok(glob) => glob.compile_matcher(),
        Err(e) => {
            warn!(pattern = %text, error = %e, "invalid output pattern");
            return Vec::new();
        }
    };

    let root = literal_prefix(pattern);
    if !fs.is_dir(&root) {
        return Vec::new();
    }

    match fs.walk_files(&root) {
        Ok(files) => files.into_iter().filter(|f| matcher.is_match(f)).collect(),
        Err(e) => {
            warn!(root = %root.display(), error = %e, "listing output directory failed");
            Vec::new()
        }
    }
}

/// Leading components of `pattern` that contain no glob metacharacters.
fn literal_prefix(pattern: &Path) -> PathBuf {
    let mut prefix = PathBuf::new();
    for component in pattern.components() {
        if let Component::Normal(part) = component {
            if is_pattern(Path::new(part)) {
                break;
            }
        }
        prefix.push(component);
    }
    prefix
}
