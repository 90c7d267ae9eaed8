// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Settings persistence for lmscribe
//!
//! Settings live in a single flat JSON document. Loading never fails: a
//! missing or unreadable document falls back to defaults. Saving validates
//! the document and replaces the previous one via temp-file-then-rename.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{LmscribeError, Result};

/// Default settings document location
pub const SETTINGS_FILE: &str = "settings.json";

/// Environment variable that overrides the persisted server port
pub const SERVER_PORT_ENV: &str = "SERVER_PORT";

/// Smallest per-request timeout a run may be started with
pub const MIN_TIMEOUT_SECS: u64 = 10;

/// Keys every persisted settings document must carry
pub const REQUIRED_FIELDS: [&str; 7] = [
    "server_port",
    "log_prompts",
    "prompt_folder",
    "files_folder",
    "selected_prompt",
    "recursive_search",
    "timeout_seconds",
];

/// Persisted application settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Port of the local inference server
    #[serde(default = "default_server_port", deserialize_with = "port_from_any")]
    pub server_port: String,

    /// Log the full request text sent for each file
    #[serde(default = "default_true")]
    pub log_prompts: bool,

    /// Folder holding prompt files
    #[serde(default)]
    pub prompt_folder: PathBuf,

    /// Folder holding the files to process
    #[serde(default)]
    pub files_folder: PathBuf,

    /// Prompt file name, relative to `prompt_folder`
    #[serde(default)]
    pub selected_prompt: String,

    /// Descend into subfolders of `files_folder`
    #[serde(default)]
    pub recursive_search: bool,

    /// Per-request read timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_server_port() -> String { "1234".to_string() }
fn default_true() -> bool { true }
fn default_timeout() -> u64 { 60 }

// Hand-edited documents sometimes carry the port as a number.
fn port_from_any<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "server_port must be a string or number, got {}",
            other
        ))),
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_port: default_server_port(),
            log_prompts: true,
            prompt_folder: PathBuf::new(),
            files_folder: PathBuf::new(),
            selected_prompt: String::new(),
            recursive_search: false,
            timeout_seconds: default_timeout(),
        }
    }
}

impl Settings {
    /// Base URL of the local inference server
    pub fn endpoint(&self) -> String {
        format!("http://localhost:{}", self.server_port.trim())
    }

    /// Per-request read timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Path of the selected prompt file
    pub fn prompt_path(&self) -> PathBuf {
        self.prompt_folder.join(&self.selected_prompt)
    }

    /// Replace the port with an environment-supplied value, if any
    pub fn apply_port_override(&mut self, port: Option<String>) {
        if let Some(port) = port.filter(|p| !p.trim().is_empty()) {
            debug!("Server port overridden by {}: {}", SERVER_PORT_ENV, port);
            self.server_port = port;
        }
    }
}

/// Check that a settings document carries every required key with a usable port
pub fn validate_document(doc: &Value) -> Result<()> {
    let obj = doc
        .as_object()
        .ok_or_else(|| LmscribeError::Validation("settings must be a JSON object".to_string()))?;

    let missing: Vec<&str> = REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|field| !obj.contains_key(*field))
        .collect();
    if !missing.is_empty() {
        return Err(LmscribeError::Validation(format!(
            "missing required field(s): {}",
            missing.join(", ")
        )));
    }

    let port = match &obj["server_port"] {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    };
    if port.parse::<u16>().map(|p| p == 0).unwrap_or(true) {
        return Err(LmscribeError::Validation(format!(
            "server_port must be a port number, got {:?}",
            port
        )));
    }

    Ok(())
}

/// Owner of the persisted settings document
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(SETTINGS_FILE)
    }
}

impl SettingsStore {
    /// Create a store backed by the document at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the settings document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings, honouring the `SERVER_PORT` environment override
    pub fn load(&self) -> Settings {
        self.load_with_port_override(std::env::var(SERVER_PORT_ENV).ok())
    }

    /// Load settings with an explicit port override
    pub fn load_with_port_override(&self, port: Option<String>) -> Settings {
        let mut settings = match self.read() {
            Ok(settings) => settings,
            Err(e) => {
                match &e {
                    LmscribeError::FileSystem(io) if io.kind() == std::io::ErrorKind::NotFound => {
                        info!("Settings file not found at {:?}, using defaults", self.path);
                    }
                    _ => warn!("{}; using defaults", e),
                }
                Settings::default()
            }
        };
        settings.apply_port_override(port);
        settings
    }

    /// Read the persisted document without applying overrides or fallbacks
    pub fn read(&self) -> Result<Settings> {
        let content = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&content).map_err(|e| {
            LmscribeError::Config(format!("Failed to parse {:?}: {}", self.path, e))
        })
    }

    /// Validate and persist settings, replacing the previous document
    pub fn save(&self, settings: &Settings) -> Result<()> {
        let doc = serde_json::to_value(settings)?;
        validate_document(&doc)?;
        self.write_atomic(&doc)
    }

    /// Validate a raw document (e.g. submitted by a shell) and persist it
    pub fn save_document(&self, doc: &Value) -> Result<Settings> {
        validate_document(doc)?;
        let settings: Settings = serde_json::from_value(doc.clone())
            .map_err(|e| LmscribeError::Validation(e.to_string()))?;
        self.save(&settings)?;
        Ok(settings)
    }

    fn write_atomic(&self, doc: &Value) -> Result<()> {
        let content = serde_json::to_string_pretty(doc)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = self.temp_path();
        std::fs::write(&tmp, content)?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }

        debug!("Settings saved to {:?}", self.path);
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from(SETTINGS_FILE));
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
