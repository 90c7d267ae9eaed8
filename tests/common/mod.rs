// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! In-process stand-in for an OpenAI-compatible inference server

#![allow(dead_code)]

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How the stub answers
#[derive(Clone, Copy)]
pub enum Behaviour {
    /// Reply `completion` to every request
    Reply(&'static str),
    /// Sleep before replying to the first `n` requests
    SlowFirst { n: usize, delay: Duration },
    /// Fail with HTTP 500
    Error,
    /// Reply with JSON lacking `choices`
    Malformed,
}

#[derive(Clone)]
pub struct Stub {
    pub url: String,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl Stub {
    /// Request bodies received so far
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }

    /// User message content of every request received so far
    pub fn prompts(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|body| body["messages"][0]["content"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

#[derive(Clone)]
struct StubState {
    behaviour: Behaviour,
    requests: Arc<Mutex<Vec<Value>>>,
    seen: Arc<AtomicUsize>,
}

async fn chat_completions(
    State(state): State<StubState>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    state.requests.lock().unwrap().push(body);
    let index = state.seen.fetch_add(1, Ordering::SeqCst);

    let reply = |text: &str| {
        Json(json!({
            "id": "chatcmpl-stub",
            "object": "chat.completion",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": text}}]
        }))
    };

    match state.behaviour {
        Behaviour::Reply(text) => reply(text).into_response(),
        Behaviour::SlowFirst { n, delay } => {
            if index < n {
                tokio::time::sleep(delay).await;
            }
            reply("OK").into_response()
        }
        Behaviour::Error => {
            (StatusCode::INTERNAL_SERVER_ERROR, "model crashed").into_response()
        }
        Behaviour::Malformed => Json(json!({"result": "OK"})).into_response(),
    }
}

/// Serve the stub on an ephemeral local port
pub async fn spawn_stub(behaviour: Behaviour) -> Stub {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let state = StubState {
        behaviour,
        requests: Arc::clone(&requests),
        seen: Arc::new(AtomicUsize::new(0)),
    };
    let router = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    Stub {
        url: format!("http://{}", addr),
        requests,
    }
}

/// A local URL nothing is listening on
pub fn closed_endpoint() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}

/// A listener whose accept queue is full, so new connections never complete
pub struct Saturated {
    pub url: String,
    _listener: tokio::net::TcpListener,
    _queued: Vec<std::net::TcpStream>,
}

/// Bind with a zero backlog and fill the queue without ever accepting
pub fn saturated_endpoint() -> Saturated {
    let socket = tokio::net::TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let listener = socket.listen(0).unwrap();
    let addr = listener.local_addr().unwrap();

    let mut queued = Vec::new();
    for _ in 0..16 {
        match std::net::TcpStream::connect_timeout(&addr, Duration::from_millis(200)) {
            Ok(stream) => queued.push(stream),
            Err(_) => break,
        }
    }

    Saturated {
        url: format!("http://{}", addr),
        _listener: listener,
        _queued: queued,
    }
}
