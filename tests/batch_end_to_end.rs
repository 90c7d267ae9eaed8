// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

mod common;

use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

use common::{closed_endpoint, spawn_stub, Behaviour};
use lmscribe::processor::{
    BatchJob, BatchOptions, BatchOutcome, BatchProcessor, CancelToken, FileStatus, RetryPolicy,
};
use lmscribe::Settings;

/// Request bounds stack connect on top of read; keep it small so the
/// stub's delay still exceeds the total.
const LOOPBACK_CONNECT: Duration = Duration::from_millis(300);

fn no_delay() -> BatchOptions {
    BatchOptions {
        inter_file_delay: Duration::ZERO,
        cancel_poll: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn test_folder_is_rewritten_with_completions() {
    let dir = tempdir().unwrap();
    let prompts = dir.path().join("prompts");
    let files = dir.path().join("files");
    std::fs::create_dir_all(&prompts).unwrap();
    std::fs::create_dir_all(&files).unwrap();
    std::fs::write(prompts.join("echo.md"), "Echo: ").unwrap();
    std::fs::write(files.join("a.txt"), "hello").unwrap();
    std::fs::write(files.join("b.md"), "world").unwrap();

    let stub = spawn_stub(Behaviour::Reply("OK")).await;
    let settings = Settings {
        prompt_folder: prompts,
        files_folder: files.clone(),
        selected_prompt: "echo.md".to_string(),
        ..Settings::default()
    };

    let job = BatchJob::prepare(&settings).unwrap();
    let processor = BatchProcessor::for_endpoint(&stub.url, Duration::from_secs(2))
        .unwrap()
        .with_options(no_delay());

    let mut percents = Vec::new();
    let report = processor
        .run(&job, &CancelToken::new(), |p| percents.push(p.percent()))
        .await;

    assert_eq!(report.outcome, BatchOutcome::Completed);
    assert_eq!(percents, vec![50.0, 100.0]);
    assert_eq!(std::fs::read_to_string(files.join("a.txt")).unwrap(), "OK\n\nhello");
    assert_eq!(std::fs::read_to_string(files.join("b.md")).unwrap(), "OK\n\nworld");
    assert_eq!(
        stub.prompts(),
        vec!["Echo: \n\nContent:\nhello", "Echo: \n\nContent:\nworld"]
    );
}

#[tokio::test]
async fn test_timed_out_file_is_retried_with_longer_timeout() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("slow.md");
    std::fs::write(&path, "content").unwrap();

    let stub = spawn_stub(Behaviour::SlowFirst { n: 1, delay: Duration::from_millis(1500) }).await;
    let timeout = Duration::from_millis(400);
    let job = BatchJob::new(vec![path.clone()], "Tag:", stub.url.clone(), timeout);

    let report = BatchProcessor::for_endpoint(&stub.url, LOOPBACK_CONNECT)
        .unwrap()
        .with_retry(Arc::new(RetryPolicy::Auto { multiplier: 10 }))
        .with_options(no_delay())
        .run(&job, &CancelToken::new(), |_| {})
        .await;

    assert_eq!(report.succeeded, 1);
    assert_eq!(stub.requests().len(), 2);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "OK\n\ncontent");
}

#[tokio::test]
async fn test_timed_out_file_without_retry_is_left_alone() {
    let dir = tempdir().unwrap();
    let slow = dir.path().join("a.md");
    let fine = dir.path().join("b.md");
    std::fs::write(&slow, "first").unwrap();
    std::fs::write(&fine, "second").unwrap();

    let stub = spawn_stub(Behaviour::SlowFirst { n: 1, delay: Duration::from_millis(1500) }).await;
    let files = vec![slow.clone(), fine.clone()];
    let job = BatchJob::new(files, "Tag:", stub.url.clone(), Duration::from_millis(400));

    let mut statuses = Vec::new();
    let report = BatchProcessor::for_endpoint(&stub.url, LOOPBACK_CONNECT)
        .unwrap()
        .with_options(no_delay())
        .run(&job, &CancelToken::new(), |p| statuses.push(p.status.clone()))
        .await;

    assert_eq!(report.outcome, BatchOutcome::Completed);
    assert!(matches!(&statuses[0], FileStatus::Failed { error } if error.contains("timeout")));
    assert_eq!(statuses[1], FileStatus::Updated);
    assert_eq!(std::fs::read_to_string(&slow).unwrap(), "first");
    assert_eq!(std::fs::read_to_string(&fine).unwrap(), "OK\n\nsecond");
}

#[tokio::test]
async fn test_unreachable_server_fails_each_file_but_completes() {
    let dir = tempdir().unwrap();
    let paths: Vec<_> = ["a.md", "b.txt"]
        .iter()
        .map(|name| {
            let path = dir.path().join(name);
            std::fs::write(&path, "body").unwrap();
            path
        })
        .collect();

    let endpoint = closed_endpoint();
    let job = BatchJob::new(paths.clone(), "p", endpoint.clone(), Duration::from_secs(10));
    let report = BatchProcessor::for_endpoint(&endpoint, Duration::from_secs(2))
        .unwrap()
        .with_options(no_delay())
        .run(&job, &CancelToken::new(), |_| {})
        .await;

    assert_eq!(report.outcome, BatchOutcome::Completed);
    assert_eq!(report.completed, 2);
    assert_eq!(report.failures.len(), 2);
    for path in paths {
        assert_eq!(std::fs::read_to_string(path).unwrap(), "body");
    }
}
