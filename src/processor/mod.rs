// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Batch processor: the sequential control loop
//!
//! Files are handled strictly one at a time. Each file is read, sent to the
//! inference server with the prompt, and rewritten as the completion followed
//! by the original content. Failures scoped to one file are logged and the
//! loop moves on; only cancellation ends a run early.

pub mod cancel;
pub mod job;
pub mod retry;

pub use cancel::CancelToken;
pub use job::{check_timeout, parse_timeout, BatchJob};
pub use retry::{extended_timeout, RetryDecider, RetryPolicy};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::inference::{CompletionBackend, InferenceClient, InferenceError, DEFAULT_CONNECT_TIMEOUT};
use crate::{LmscribeError, Result};

/// Default pause between files
pub const DEFAULT_INTER_FILE_DELAY: Duration = Duration::from_secs(5);

/// Default interval between cancellation checks while waiting
pub const DEFAULT_CANCEL_POLL: Duration = Duration::from_secs(1);

/// Loop tunables that are not part of the persisted settings
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    /// Pause between consecutive files, to throttle the server
    pub inter_file_delay: Duration,
    /// Upper bound on stop latency while waiting
    pub cancel_poll: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            inter_file_delay: DEFAULT_INTER_FILE_DELAY,
            cancel_poll: DEFAULT_CANCEL_POLL,
        }
    }
}

/// What happened to one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    Updated,
    Failed { error: String },
}

/// Progress event emitted after every file
#[derive(Debug, Clone, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub file: PathBuf,
    #[serde(flatten)]
    pub status: FileStatus,
}

impl Progress {
    /// Percentage of files handled so far
    pub fn percent(&self) -> f64 {
        percent(self.completed, self.total)
    }
}

/// `completed / total * 100`, or 0 when there is nothing to do
pub fn percent(completed: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        completed as f64 / total as f64 * 100.0
    }
}

/// Terminal outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    /// Every file was visited; individual files may still have failed
    Completed,
    /// A cancellation checkpoint fired first
    Cancelled,
}

/// A file that was skipped
#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Summary of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub job_id: Uuid,
    pub outcome: BatchOutcome,
    pub total: usize,
    /// Files handled, successfully or not
    pub completed: usize,
    pub succeeded: usize,
    pub failures: Vec<FileFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchReport {
    fn begin(job: &BatchJob) -> Self {
        let now = Utc::now();
        Self {
            job_id: job.id,
            outcome: BatchOutcome::Completed,
            total: job.files.len(),
            completed: 0,
            succeeded: 0,
            failures: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    fn finish(mut self, outcome: BatchOutcome) -> Self {
        self.outcome = outcome;
        self.finished_at = Utc::now();
        match outcome {
            BatchOutcome::Completed => info!(
                "Batch {} complete: {} updated, {} failed, {} total",
                self.job_id,
                self.succeeded,
                self.failures.len(),
                self.total
            ),
            BatchOutcome::Cancelled => info!(
                "Batch {} cancelled after {} of {} files",
                self.job_id, self.completed, self.total
            ),
        }
        self
    }

    pub fn percent(&self) -> f64 {
        percent(self.completed, self.total)
    }
}

enum FileStep {
    Updated,
    Abandoned,
}

/// Request text sent for one file
pub fn compose_request(prompt: &str, content: &str) -> String {
    format!("{}\n\nContent:\n{}", prompt, content)
}

/// New file content: the completion followed by the original text
pub fn compose_output(completion: &str, content: &str) -> String {
    format!("{}\n\n{}", completion, content)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Drives a batch job against an inference backend
pub struct BatchProcessor {
    backend: Arc<dyn CompletionBackend>,
    retry: Arc<dyn RetryDecider>,
    options: BatchOptions,
}

impl BatchProcessor {
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self {
            backend,
            retry: Arc::new(RetryPolicy::Never),
            options: BatchOptions::default(),
        }
    }

    /// Processor talking HTTP to the job's endpoint
    pub fn for_endpoint(endpoint: &str, connect_timeout: Duration) -> Result<Self> {
        let client = InferenceClient::new(endpoint, connect_timeout)?;
        Ok(Self::new(Arc::new(client)))
    }

    pub fn with_retry(mut self, retry: Arc<dyn RetryDecider>) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_options(mut self, options: BatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn backend(&self) -> &dyn CompletionBackend {
        self.backend.as_ref()
    }

    /// Run `job` to completion or cancellation
    ///
    /// `on_progress` is called after every file, including files that failed.
    pub async fn run<F>(
        &self,
        job: &BatchJob,
        cancel: &CancelToken,
        mut on_progress: F,
    ) -> BatchReport
    where
        F: FnMut(&Progress) + Send,
    {
        let mut report = BatchReport::begin(job);
        let total = job.files.len();

        if total == 0 {
            warn!("No .md or .txt files to process");
            return report.finish(BatchOutcome::Completed);
        }

        info!("Batch {} started: {} files via {}", job.id, total, self.backend.endpoint());

        for (index, path) in job.files.iter().enumerate() {
            if cancel.is_cancelled() {
                return report.finish(BatchOutcome::Cancelled);
            }

            let name = display_name(path);
            info!("Processing {} ({}/{})...", name, index + 1, total);

            let status = match self.process_file(job, path, cancel).await {
                Ok(FileStep::Updated) => {
                    info!("Successfully processed {}", name);
                    report.succeeded += 1;
                    FileStatus::Updated
                }
                Ok(FileStep::Abandoned) => {
                    info!("Stop requested while {} was in flight; left unmodified", name);
                    return report.finish(BatchOutcome::Cancelled);
                }
                Err(e) => {
                    error!("Error processing {}: {}", name, e);
                    report.failures.push(FileFailure {
                        path: path.clone(),
                        error: e.to_string(),
                    });
                    FileStatus::Failed { error: e.to_string() }
                }
            };

            report.completed = index + 1;
            on_progress(&Progress {
                completed: report.completed,
                total,
                file: path.clone(),
                status,
            });

            if index + 1 == total {
                break;
            }
            let options = &self.options;
            if !cancel.sleep(options.inter_file_delay, options.cancel_poll).await {
                return report.finish(BatchOutcome::Cancelled);
            }
        }

        report.finish(BatchOutcome::Completed)
    }

    async fn process_file(
        &self,
        job: &BatchJob,
        path: &Path,
        cancel: &CancelToken,
    ) -> Result<FileStep> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| LmscribeError::ReadFile {
                path: path.to_path_buf(),
                source,
            })?;

        let request = compose_request(&job.prompt, &content);
        if job.log_prompts {
            info!("Prompt for {}:\n{}", display_name(path), request);
        } else {
            debug!("Sending {} bytes for {}", request.len(), display_name(path));
        }

        let completion = match self.infer(path, &request, job.timeout, cancel).await? {
            Some(text) => text,
            None => return Ok(FileStep::Abandoned),
        };

        tokio::fs::write(path, compose_output(&completion, &content))
            .await
            .map_err(|source| LmscribeError::Write {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(FileStep::Updated)
    }

    /// Request a completion, offering one retry after a read timeout
    ///
    /// Returns `Ok(None)` if cancellation arrived while a request was in flight.
    async fn infer(
        &self,
        path: &Path,
        request: &str,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Option<String>> {
        let mut timeout = timeout;
        let mut retried = false;

        loop {
            let result = tokio::select! {
                result = self.backend.complete(request, timeout) => result,
                _ = cancel.cancelled(self.options.cancel_poll) => return Ok(None),
            };

            match result {
                Ok(text) => return Ok(Some(text)),
                Err(e @ InferenceError::ReadTimeout { .. }) if !retried => {
                    warn!("{}: {}", display_name(path), e);
                    match self.retry.retry_timeout(path, timeout).await {
                        Some(longer) => {
                            info!(
                                "Retrying {} with a {}s timeout",
                                display_name(path),
                                longer.as_secs()
                            );
                            timeout = longer;
                            retried = true;
                        }
                        None => return Err(e.into()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Probe `endpoint` with a trivial prompt; touches no files
pub async fn test_connection(endpoint: &str) -> bool {
    match InferenceClient::new(endpoint, DEFAULT_CONNECT_TIMEOUT) {
        Ok(client) => client.test_connection().await,
        Err(e) => {
            error!("{}", e);
            false
        }
    }
}
