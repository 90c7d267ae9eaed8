// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Browser control panel for lmscribe
//!
//! Mirrors the desktop workflow: edit and save settings, refresh prompts,
//! start a batch, watch progress, stop it. One batch runs at a time.

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Local;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{Settings, SettingsStore};
use crate::inference::DEFAULT_CONNECT_TIMEOUT;
use crate::processor::{
    self, BatchJob, BatchOptions, BatchOutcome, BatchProcessor, BatchReport, CancelToken,
    FileStatus, Progress, RetryPolicy,
};
use crate::prompts::{list_prompts, reconcile_selection};
use crate::{LmscribeError, Result};

/// Log lines kept for the status view
const MAX_LOG_LINES: usize = 500;

/// Web shell settings
#[derive(Debug, Clone)]
pub struct ShellOptions {
    pub host: String,
    pub port: u16,
    pub batch: BatchOptions,
    pub retry: RetryPolicy,
    pub connect_timeout: Duration,
}

impl Default for ShellOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            batch: BatchOptions::default(),
            retry: RetryPolicy::Never,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Lifecycle of the shell's current (or last) batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShellStatus {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug)]
struct RunState {
    status: ShellStatus,
    job_id: Option<Uuid>,
    completed: usize,
    total: usize,
    cancel: Option<CancelToken>,
    report: Option<BatchReport>,
    log: VecDeque<String>,
}

impl RunState {
    fn new() -> Self {
        Self {
            status: ShellStatus::Idle,
            job_id: None,
            completed: 0,
            total: 0,
            cancel: None,
            report: None,
            log: VecDeque::new(),
        }
    }

    fn log(&mut self, line: impl AsRef<str>) {
        if self.log.len() == MAX_LOG_LINES {
            self.log.pop_front();
        }
        self.log
            .push_back(format!("[{}] {}", Local::now().format("%H:%M:%S"), line.as_ref()));
    }
}

/// Shared application state
pub struct AppState {
    pub store: SettingsStore,
    pub options: ShellOptions,
    run: Mutex<RunState>,
}

impl AppState {
    pub fn new(store: SettingsStore, options: ShellOptions) -> Self {
        Self {
            store,
            options,
            run: Mutex::new(RunState::new()),
        }
    }

    fn lock_run(&self) -> MutexGuard<'_, RunState> {
        // A panic while holding the lock leaves plain data behind; keep serving it.
        self.run.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record_progress(&self, progress: &Progress) {
        let mut run = self.lock_run();
        run.completed = progress.completed;
        run.total = progress.total;
        let name = progress.file.display();
        match &progress.status {
            FileStatus::Updated => run.log(format!("Successfully processed {}", name)),
            FileStatus::Failed { error } => {
                run.log(format!("Error processing {}: {}", name, error))
            }
        }
    }

    fn finish(&self, report: BatchReport) {
        let mut run = self.lock_run();
        run.status = match report.outcome {
            BatchOutcome::Completed => ShellStatus::Completed,
            BatchOutcome::Cancelled => ShellStatus::Cancelled,
        };
        run.completed = report.completed;
        let summary = match report.outcome {
            BatchOutcome::Completed if report.total == 0 => {
                "No .md or .txt files found in the selected folder".to_string()
            }
            BatchOutcome::Completed => format!(
                "Processing complete: {} updated, {} failed",
                report.succeeded,
                report.failures.len()
            ),
            BatchOutcome::Cancelled => format!(
                "Processing stopped after {} of {} files",
                report.completed, report.total
            ),
        };
        run.log(summary);
        run.cancel = None;
        run.report = Some(report);
    }

    fn fail(&self, err: &LmscribeError) {
        let mut run = self.lock_run();
        run.status = ShellStatus::Failed;
        run.cancel = None;
        run.log(err.to_string());
    }
}

/// Create the web application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Pages
        .route("/", get(index_page))
        // API endpoints
        .route("/api/settings", get(api_get_settings).post(api_save_settings))
        .route("/api/prompts", get(api_get_prompts))
        .route("/api/start", post(api_start))
        .route("/api/stop", post(api_stop))
        .route("/api/status", get(api_status))
        .route("/api/test-connection", post(api_test_connection))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

fn error_response(status: StatusCode, err: &LmscribeError) -> Response {
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

// === Page Handlers ===

async fn index_page() -> Html<String> {
    Html(render_index())
}

// === API Handlers ===

async fn api_get_settings(State(state): State<Arc<AppState>>) -> Json<Settings> {
    Json(state.store.load())
}

async fn api_save_settings(
    State(state): State<Arc<AppState>>,
    Json(doc): Json<Value>,
) -> Response {
    match state.store.save_document(&doc) {
        Ok(settings) => {
            state.lock_run().log("Settings saved successfully");
            Json(settings).into_response()
        }
        Err(e) => {
            warn!("Rejected settings: {}", e);
            error_response(StatusCode::BAD_REQUEST, &e)
        }
    }
}

#[derive(Serialize)]
struct PromptsResponse {
    prompts: Vec<String>,
    selected_prompt: String,
    cleared_selection: bool,
}

async fn api_get_prompts(State(state): State<Arc<AppState>>) -> Response {
    let mut settings = state.store.load();
    let prompts = list_prompts(&settings.prompt_folder);

    let cleared_selection = reconcile_selection(&mut settings, &prompts);
    if cleared_selection {
        if let Err(e) = state.store.save(&settings) {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e);
        }
    }
    if prompts.is_empty() {
        state.lock_run().log("No prompt files found in the selected folder");
    }

    Json(PromptsResponse {
        prompts,
        selected_prompt: settings.selected_prompt,
        cleared_selection,
    })
    .into_response()
}

async fn api_start(State(state): State<Arc<AppState>>) -> Response {
    if state.lock_run().status == ShellStatus::Running {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "error": "A batch is already running" })),
        )
            .into_response();
    }

    let settings = state.store.load();
    let prepared = BatchJob::prepare(&settings).and_then(|job| {
        let processor = BatchProcessor::for_endpoint(&job.endpoint, state.options.connect_timeout)?
            .with_retry(Arc::new(state.options.retry))
            .with_options(state.options.batch);
        Ok((job, processor))
    });

    let (job, processor) = match prepared {
        Ok(prepared) => prepared,
        Err(e) => {
            error!("Cannot start batch: {}", e);
            state.fail(&e);
            return error_response(StatusCode::BAD_REQUEST, &e);
        }
    };

    let cancel = CancelToken::new();
    {
        let mut run = state.lock_run();
        // Checked again under the lock: two starts may race past the first check.
        if run.status == ShellStatus::Running {
            return (
                StatusCode::CONFLICT,
                Json(json!({ "error": "A batch is already running" })),
            )
                .into_response();
        }
        run.status = ShellStatus::Running;
        run.job_id = Some(job.id);
        run.completed = 0;
        run.total = job.files.len();
        run.report = None;
        run.cancel = Some(cancel.clone());
        run.log(format!(
            "Starting batch over {} files with prompt '{}'",
            job.files.len(),
            settings.selected_prompt
        ));
    }

    let body = json!({ "job_id": job.id, "total": job.files.len() });
    info!("Web shell started batch {}", job.id);

    let task_state = Arc::clone(&state);
    tokio::spawn(async move {
        let report = processor
            .run(&job, &cancel, |progress| task_state.record_progress(progress))
            .await;
        task_state.finish(report);
    });

    (StatusCode::ACCEPTED, Json(body)).into_response()
}

async fn api_stop(State(state): State<Arc<AppState>>) -> Json<Value> {
    let mut run = state.lock_run();
    let stopping = match run.cancel.as_ref() {
        Some(cancel) => {
            cancel.cancel();
            true
        }
        None => false,
    };
    if stopping {
        run.log("Stop requested");
    }
    Json(json!({ "stopping": stopping }))
}

#[derive(Serialize)]
struct StatusResponse {
    status: ShellStatus,
    job_id: Option<Uuid>,
    completed: usize,
    total: usize,
    percent: f64,
    log: Vec<String>,
    report: Option<BatchReport>,
}

async fn api_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let run = state.lock_run();
    Json(StatusResponse {
        status: run.status,
        job_id: run.job_id,
        completed: run.completed,
        total: run.total,
        percent: processor::percent(run.completed, run.total),
        log: run.log.iter().cloned().collect(),
        report: run.report.clone(),
    })
}

async fn api_test_connection(State(state): State<Arc<AppState>>) -> Json<Value> {
    let endpoint = state.store.load().endpoint();
    let reachable = processor::test_connection(&endpoint).await;
    state.lock_run().log(if reachable {
        format!("Server at {} is reachable", endpoint)
    } else {
        format!("Server at {} is not reachable", endpoint)
    });
    Json(json!({ "endpoint": endpoint, "reachable": reachable }))
}

// === Template Rendering ===

fn base_template(title: &str, content: &str) -> String {
    format!(r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{} - lmscribe</title>
    <style>
        :root {{
            --bg-primary: #1a1a2e;
            --bg-card: #0f3460;
            --text-primary: #e8e8e8;
            --text-secondary: #a0a0a0;
            --accent: #e94560;
            --success: #00d9a5;
            --border: #2a2a4a;
        }}
        * {{ box-sizing: border-box; margin: 0; padding: 0; }}
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: var(--bg-primary);
            color: var(--text-primary);
            line-height: 1.6;
        }}
        .container {{ max-width: 900px; margin: 0 auto; padding: 20px; }}
        h1 {{ color: var(--accent); margin-bottom: 20px; }}
        .card {{
            background: var(--bg-card);
            border-radius: 12px;
            padding: 20px;
            margin-bottom: 20px;
        }}
        label {{ display: block; margin: 8px 0 4px; color: var(--text-secondary); }}
        input[type=text], input[type=number], select {{
            width: 100%;
            padding: 8px;
            background: var(--bg-primary);
            color: var(--text-primary);
            border: 1px solid var(--border);
            border-radius: 6px;
        }}
        button {{
            margin: 12px 8px 0 0;
            padding: 8px 16px;
            border: none;
            border-radius: 6px;
            background: var(--accent);
            color: white;
            cursor: pointer;
        }}
        .bar {{ height: 12px; background: var(--bg-primary); border-radius: 6px; overflow: hidden; }}
        .bar-fill {{ height: 100%; width: 0; background: var(--success); transition: width 0.3s; }}
        pre {{ max-height: 360px; overflow-y: auto; white-space: pre-wrap; font-size: 0.85em; }}
    </style>
</head>
<body>
    <main class="container">
        {}
    </main>
</body>
</html>"#, title, content)
}

fn render_index() -> String {
    let content = r#"
        <h1>LM Studio File Processor</h1>
        <div class="card">
            <label>Server Port</label><input type="text" id="server_port">
            <label><input type="checkbox" id="log_prompts"> Log Prompts</label>
            <label>Prompt Folder</label><input type="text" id="prompt_folder">
            <label>Files Folder</label><input type="text" id="files_folder">
            <label><input type="checkbox" id="recursive_search"> Search Subfolders</label>
            <label>Timeout (seconds)</label><input type="number" id="timeout_seconds" min="10">
            <label>Selected Prompt</label><select id="selected_prompt"></select>
            <button onclick="saveSettings()">Save Settings</button>
            <button onclick="refreshPrompts()">Refresh Prompts</button>
            <button onclick="testConnection()">Test Connection</button>
            <button onclick="start()">Start Processing</button>
            <button onclick="stop()">Stop</button>
        </div>
        <div class="card">
            <div class="bar"><div class="bar-fill" id="bar"></div></div>
            <p id="state">idle</p>
            <pre id="log"></pre>
        </div>
        <script>
        const fields = ["server_port", "prompt_folder", "files_folder"];
        const flags = ["log_prompts", "recursive_search"];
        function collect() {
            const doc = {};
            fields.forEach(f => doc[f] = document.getElementById(f).value);
            flags.forEach(f => doc[f] = document.getElementById(f).checked);
            doc.selected_prompt = document.getElementById("selected_prompt").value;
            doc.timeout_seconds = parseInt(document.getElementById("timeout_seconds").value, 10);
            return doc;
        }
        async function call(method, url, body) {
            const res = await fetch(url, {
                method,
                headers: {"Content-Type": "application/json"},
                body: body ? JSON.stringify(body) : undefined,
            });
            const data = await res.json();
            if (!res.ok) alert(data.error);
            return data;
        }
        async function loadSettings() {
            const s = await call("GET", "/api/settings");
            fields.forEach(f => document.getElementById(f).value = s[f]);
            flags.forEach(f => document.getElementById(f).checked = s[f]);
            document.getElementById("timeout_seconds").value = s.timeout_seconds;
            await refreshPrompts(s.selected_prompt);
        }
        async function refreshPrompts(selected) {
            const p = await call("GET", "/api/prompts");
            const select = document.getElementById("selected_prompt");
            const options = ["", ...p.prompts].map(name => {
                const option = document.createElement("option");
                option.value = name;
                option.textContent = name;
                return option;
            });
            select.replaceChildren(...options);
            select.value = p.selected_prompt || selected || "";
        }
        async function saveSettings() {
            const timeout = collect().timeout_seconds;
            if (!Number.isInteger(timeout) || timeout < 10) {
                alert("Timeout must be a whole number of at least 10 seconds");
                return;
            }
            await call("POST", "/api/settings", collect());
        }
        async function testConnection() {
            const r = await call("POST", "/api/test-connection");
            alert(r.reachable ? "Server is reachable" : "Server is not reachable");
        }
        async function start() {
            await saveSettings();
            await call("POST", "/api/start");
        }
        async function stop() { await call("POST", "/api/stop"); }
        async function poll() {
            const s = await (await fetch("/api/status")).json();
            document.getElementById("bar").style.width = s.percent + "%";
            document.getElementById("state").textContent =
                `${s.status} (${s.completed}/${s.total})`;
            document.getElementById("log").textContent = s.log.join("\n");
        }
        loadSettings();
        setInterval(poll, 1000);
        </script>
    "#;

    base_template("Control Panel", content)
}

/// Start the web server for `store`
pub async fn start_server(store: SettingsStore, options: ShellOptions) -> Result<()> {
    let addr = format!("{}:{}", options.host, options.port);
    let state = Arc::new(AppState::new(store, options));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Control panel available at http://{}", addr);

    let router = create_router(state);
    axum::serve(listener, router)
        .await
        .map_err(|e| LmscribeError::Config(format!("Server error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tempfile::{tempdir, TempDir};
    use tower::ServiceExt;

    fn shell(dir: &TempDir) -> Arc<AppState> {
        let options = ShellOptions {
            batch: BatchOptions {
                inter_file_delay: Duration::ZERO,
                cancel_poll: Duration::from_millis(5),
            },
            connect_timeout: Duration::from_secs(2),
            ..ShellOptions::default()
        };
        Arc::new(AppState::new(
            SettingsStore::new(dir.path().join("settings.json")),
            options,
        ))
    }

    async fn send(
        state: &Arc<AppState>,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(v) => Body::from(v.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = create_router(Arc::clone(state)).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_index_page_renders() {
        let dir = tempdir().unwrap();
        let response = create_router(shell(&dir))
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let page = String::from_utf8_lossy(&bytes);
        assert!(page.contains("Start Processing"));
        // Prompt names are file names; they must never be parsed as markup.
        assert!(!page.contains("innerHTML"));
        assert!(page.contains("option.textContent = name"));
    }

    #[tokio::test]
    async fn test_settings_round_trip() {
        let dir = tempdir().unwrap();
        let state = shell(&dir);

        let (status, defaults) = send(&state, "GET", "/api/settings", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(defaults["timeout_seconds"], 60);

        let mut doc = defaults.clone();
        doc["selected_prompt"] = json!("x.md");
        let (status, saved) = send(&state, "POST", "/api/settings", Some(doc)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(saved["selected_prompt"], "x.md");
        assert_eq!(state.store.read().unwrap().selected_prompt, "x.md");
    }

    #[tokio::test]
    async fn test_incomplete_settings_rejected() {
        let dir = tempdir().unwrap();
        let state = shell(&dir);
        let (status, body) =
            send(&state, "POST", "/api/settings", Some(json!({"server_port": "1234"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn test_prompts_clear_stale_selection() {
        let dir = tempdir().unwrap();
        let prompts = dir.path().join("prompts");
        std::fs::create_dir(&prompts).unwrap();
        std::fs::write(prompts.join("summary.md"), "Summarize").unwrap();

        let state = shell(&dir);
        state
            .store
            .save(&Settings {
                prompt_folder: prompts,
                selected_prompt: "removed.md".to_string(),
                ..Settings::default()
            })
            .unwrap();

        let (status, body) = send(&state, "GET", "/api/prompts", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["prompts"], json!(["summary.md"]));
        assert_eq!(body["cleared_selection"], true);
        assert_eq!(state.store.read().unwrap().selected_prompt, "");
    }

    #[tokio::test]
    async fn test_start_without_prompt_fails_setup() {
        let dir = tempdir().unwrap();
        let state = shell(&dir);

        let (status, _) = send(&state, "POST", "/api/start", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = send(&state, "GET", "/api/status", None).await;
        assert_eq!(body["status"], "failed");
    }

    #[tokio::test]
    async fn test_stop_when_idle() {
        let dir = tempdir().unwrap();
        let state = shell(&dir);
        let (_, body) = send(&state, "POST", "/api/stop", None).await;
        assert_eq!(body["stopping"], false);
        let (_, body) = send(&state, "GET", "/api/status", None).await;
        assert_eq!(body["status"], "idle");
    }

    #[tokio::test]
    async fn test_run_against_unreachable_server_completes() {
        let dir = tempdir().unwrap();
        let prompts = dir.path().join("prompts");
        let files = dir.path().join("files");
        std::fs::create_dir(&prompts).unwrap();
        std::fs::create_dir(&files).unwrap();
        std::fs::write(prompts.join("p.md"), "Summarize").unwrap();
        std::fs::write(files.join("a.md"), "alpha").unwrap();

        let state = shell(&dir);
        state
            .store
            .save(&Settings {
                server_port: closed_port().to_string(),
                prompt_folder: prompts,
                files_folder: files.clone(),
                selected_prompt: "p.md".to_string(),
                ..Settings::default()
            })
            .unwrap();

        let (status, body) = send(&state, "POST", "/api/start", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["total"], 1);

        let mut last = Value::Null;
        for _ in 0..200 {
            let (_, body) = send(&state, "GET", "/api/status", None).await;
            if body["status"] != "running" {
                last = body;
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        assert_eq!(last["status"], "completed");
        assert_eq!(last["percent"], 100.0);
        assert_eq!(last["report"]["failures"].as_array().unwrap().len(), 1);
        assert_eq!(std::fs::read_to_string(files.join("a.md")).unwrap(), "alpha");
    }
}
