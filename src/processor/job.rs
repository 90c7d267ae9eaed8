// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Batch job construction and the setup checks that gate a run

use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::collector;
use crate::config::{Settings, MIN_TIMEOUT_SECS};
use crate::prompts::Prompt;
use crate::{LmscribeError, Result};

/// One pass over a collected file list under one prompt
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub id: Uuid,
    pub files: Vec<PathBuf>,
    pub prompt: String,
    pub endpoint: String,
    pub timeout: Duration,
    pub log_prompts: bool,
}

impl BatchJob {
    pub fn new(
        files: Vec<PathBuf>,
        prompt: impl Into<String>,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            files,
            prompt: prompt.into(),
            endpoint: endpoint.into(),
            timeout,
            log_prompts: false,
        }
    }

    /// Validate settings, read the prompt and collect files
    ///
    /// Every failure here is fatal to starting the run and happens before
    /// any file is touched.
    pub fn prepare(settings: &Settings) -> Result<Self> {
        let prompt = Prompt::resolve(&settings.prompt_folder, &settings.selected_prompt)?;

        if settings.files_folder.as_os_str().is_empty() {
            return Err(LmscribeError::Setup("Please select a files folder first".to_string()));
        }
        if !settings.files_folder.is_dir() {
            return Err(LmscribeError::Setup(format!(
                "Files folder {:?} does not exist",
                settings.files_folder
            )));
        }

        check_timeout(settings.timeout_seconds)?;
        let body = prompt.load_body()?;

        let files = collector::collect(&settings.files_folder, settings.recursive_search);
        if files.is_empty() {
            warn!("No .md or .txt files found in {:?}", settings.files_folder);
        } else {
            info!(
                "Prepared {} files from {:?} (recursive: {}) with prompt '{}'",
                files.len(),
                settings.files_folder,
                settings.recursive_search,
                prompt.name
            );
        }

        Ok(Self {
            log_prompts: settings.log_prompts,
            ..Self::new(files, body, settings.endpoint(), settings.timeout())
        })
    }
}

/// Parse a user-entered timeout in seconds
pub fn parse_timeout(raw: &str) -> Result<u64> {
    let secs: u64 = raw.trim().parse().map_err(|_| {
        LmscribeError::Setup(format!("Timeout must be a whole number of seconds, got {:?}", raw))
    })?;
    check_timeout(secs)?;
    Ok(secs)
}

/// Reject timeouts below the floor
pub fn check_timeout(secs: u64) -> Result<()> {
    if secs < MIN_TIMEOUT_SECS {
        return Err(LmscribeError::Setup(format!(
            "Timeout must be at least {} seconds, got {}",
            MIN_TIMEOUT_SECS, secs
        )));
    }
    Ok(())
}
