// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! lmscribe: batch-annotate text files with a local LLM
//!
//! Each `.md`/`.txt` file in a folder is sent, prefixed with a chosen
//! prompt, to a local OpenAI-compatible server (LM Studio by default), and
//! the completion is written back above the original content.

pub mod collector;
pub mod config;
pub mod error;
pub mod inference;
pub mod processor;
pub mod prompts;
pub mod web;

pub use config::{Settings, SettingsStore};
pub use error::{LmscribeError, Result};
