// src/exec/normalize.rs

//! Command-line path normalization.
//!
//! The process runs with the job's working directory as `cwd`, so relative
//! file arguments written against the runner's own directory would stop
//! resolving. Before launch, every whitespace-separated token after the
//! first one that names an existing readable file (relative to `base`) is
//! replaced by its absolute path.
//!
//! This is a heuristic, not a shell parser: quoting, escapes and globs are
//! not understood, and a token that merely coincides with an existing file
//! name is rewritten too. Runs of whitespace collapse to single spaces.

use std::path::Path;

use tracing::trace;

use crate::fs::FileSystem;

pub fn normalize_command_line(command_line: &str, base: &Path, fs: &dyn FileSystem) -> String {
    let mut tokens = command_line.split_whitespace();
    let Some(program) = tokens.next() else {
        return String::new();
    };

    let mut out = vec![program.to_string()];
    out.extend(tokens.map(|token| normalize_token(token, base, fs)));
    out.join(" ")
}

fn normalize_token(token: &str, base: &Path, fs: &dyn FileSystem) -> String {
    let path = Path::new(token);
    if path.is_absolute() {
        return token.to_string();
    }

    let candidate = base.join(path);
    if !fs.is_readable_file(&candidate) {
        return token.to_string();
    }

    match fs.absolute(&candidate) {
        Ok(abs) => {
            trace!(token, absolute = %abs.display(), "rewrote relative file argument");
            abs.to_string_lossy().into_owned()
        }
        Err(_) => token.to_string(),
    }
}
