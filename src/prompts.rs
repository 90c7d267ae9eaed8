// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Prompt files: listing, loading and selection bookkeeping

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::collector::has_candidate_extension;
use crate::config::Settings;
use crate::{LmscribeError, Result};

/// A prompt file, resolved under the prompt folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub name: String,
    pub path: PathBuf,
}

impl Prompt {
    /// Resolve a prompt by file name
    pub fn resolve(folder: &Path, name: &str) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(LmscribeError::Setup("Please select a prompt first".to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            path: folder.join(name),
        })
    }

    /// Read the prompt body
    pub fn load_body(&self) -> Result<String> {
        std::fs::read_to_string(&self.path).map_err(|e| {
            LmscribeError::Setup(format!("Cannot read prompt {:?}: {}", self.path, e))
        })
    }
}

/// List prompt file names in `folder`, sorted
///
/// A missing or unset folder yields an empty list.
pub fn list_prompts(folder: &Path) -> Vec<String> {
    if folder.as_os_str().is_empty() {
        return Vec::new();
    }

    let entries = match std::fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Cannot list prompts in {:?}: {}", folder, e);
            return Vec::new();
        }
    };

    let mut names: Vec<String> = entries
        .flatten()
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().to_str().map(String::from))
        .filter(|name| has_candidate_extension(Path::new(name)))
        .collect();
    names.sort();
    names
}

/// Clear a saved prompt selection that no longer exists
///
/// Returns `true` when `settings` was changed and should be persisted.
pub fn reconcile_selection(settings: &mut Settings, prompts: &[String]) -> bool {
    if settings.selected_prompt.is_empty() || prompts.contains(&settings.selected_prompt) {
        return false;
    }
    info!(
        "Selected prompt '{}' not found in {:?}, clearing selection",
        settings.selected_prompt, settings.prompt_folder
    );
    settings.selected_prompt.clear();
    true
}
