// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Candidate file discovery
//!
//! Only `.md` and `.txt` files are collected. Extension matching is
//! case-sensitive: `NOTES.MD` is not a candidate. Results are sorted
//! lexicographically by path so a run over an unchanged folder always
//! visits files in the same order.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name suffixes eligible for processing
pub const CANDIDATE_EXTENSIONS: [&str; 2] = [".md", ".txt"];

/// Check if a path names a candidate file
pub fn has_candidate_extension(path: &Path) -> bool {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => CANDIDATE_EXTENSIONS.iter().any(|ext| name.ends_with(ext)),
        None => false,
    }
}

/// Collect candidate files under `root`
///
/// Without `recursive` only direct children are returned. A folder that
/// does not exist or holds no candidates yields an empty list.
pub fn collect(root: &Path, recursive: bool) -> Vec<PathBuf> {
    let mut files = Vec::new();

    if !root.is_dir() {
        debug!("Files folder {:?} is not a directory", root);
        return files;
    }

    walk(root, recursive, &mut files);
    files.sort();

    debug!("Collected {} candidate files from {:?}", files.len(), root);
    files
}

fn walk(dir: &Path, recursive: bool, files: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot read directory {:?}: {}", dir, e);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let is_real_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);

        // Symlinked directories are not followed.
        if is_real_dir {
            if recursive {
                walk(&path, recursive, files);
            }
        } else if path.is_file() && has_candidate_extension(&path) {
            files.push(path);
        }
    }
}
