//! Local fake backends for exercising the adapters over real HTTP.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use atelier_core::codec;
use atelier_core::registry::{ModelDescriptor, ProviderKind};
use atelier_providers::{GenerateRequest, ImageInput};
use axum::extract::{Multipart, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

/// PNG signature followed by filler; enough for content sniffing.
pub const PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake-image-payload";

// ---------------------------------------------------------------------------
// Server plumbing
// ---------------------------------------------------------------------------

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// A base URL nothing is listening on.
pub async fn dead_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

/// Everything a fake backend observed.
#[derive(Default)]
pub struct Recorder {
    pub uploads: AtomicUsize,
    pub generates: AtomicUsize,
    pub fields: Mutex<Vec<String>>,
    pub auth: Mutex<Vec<String>>,
    pub bodies: Mutex<Vec<Value>>,
}

impl Recorder {
    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn generates(&self) -> usize {
        self.generates.load(Ordering::SeqCst)
    }

    fn record_auth(&self, headers: &HeaderMap) {
        let value = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.auth.lock().unwrap().push(value);
    }
}

async fn drain_fields(mut multipart: Multipart) -> Vec<String> {
    let mut names = Vec::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        names.push(field.name().unwrap_or_default().to_string());
        let _ = field.bytes().await.unwrap();
    }
    names
}

// ---------------------------------------------------------------------------
// Managed inference fake
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
pub enum ManagedMode {
    RawImage,
    JsonBase64,
    JsonWithoutImage,
    ServerError,
}

#[derive(Clone)]
struct ManagedState {
    mode: ManagedMode,
    recorder: Arc<Recorder>,
}

async fn managed_run(State(state): State<ManagedState>, multipart: Multipart) -> Response {
    state.recorder.generates.fetch_add(1, Ordering::SeqCst);
    let names = drain_fields(multipart).await;
    state.recorder.fields.lock().unwrap().extend(names);

    match state.mode {
        ManagedMode::RawImage => ([(header::CONTENT_TYPE, "image/png")], PNG.to_vec()).into_response(),
        ManagedMode::JsonBase64 => Json(json!({ "image": codec::encode_chunked(PNG) })).into_response(),
        ManagedMode::JsonWithoutImage => Json(json!({ "image": null })).into_response(),
        ManagedMode::ServerError => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "GPU out of memory" })),
        )
            .into_response(),
    }
}

/// Start a managed inference fake serving `/models/{model}/run`.
pub async fn managed_backend(mode: ManagedMode) -> (String, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let router = Router::new()
        .route("/models/{model}/run", post(managed_run))
        .with_state(ManagedState {
            mode,
            recorder: Arc::clone(&recorder),
        });
    (serve(router).await, recorder)
}

// ---------------------------------------------------------------------------
// Remote API fake
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
pub enum RemoteResult {
    Base64,
    Url,
    Empty,
}

pub struct RemoteScript {
    /// Status returned by the upload endpoint; anything but 200 fails.
    pub upload_status: StatusCode,
    /// Number of leading generate calls answered with 503.
    pub generate_failures: usize,
    pub result: RemoteResult,
}

impl Default for RemoteScript {
    fn default() -> Self {
        Self {
            upload_status: StatusCode::OK,
            generate_failures: 0,
            result: RemoteResult::Base64,
        }
    }
}

#[derive(Clone)]
struct RemoteState {
    script: Arc<RemoteScript>,
    remaining_failures: Arc<AtomicUsize>,
    recorder: Arc<Recorder>,
}

async fn remote_upload(
    State(state): State<RemoteState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    let n = state.recorder.uploads.fetch_add(1, Ordering::SeqCst);
    state.recorder.record_auth(&headers);
    let names = drain_fields(multipart).await;
    state.recorder.fields.lock().unwrap().extend(names);

    if state.script.upload_status != StatusCode::OK {
        return (
            state.script.upload_status,
            Json(json!({ "error": { "message": "upload rejected" } })),
        )
            .into_response();
    }
    Json(json!({ "url": format!("https://cdn.test/uploads/{n}.png") })).into_response()
}

async fn remote_images(
    State(state): State<RemoteState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.recorder.generates.fetch_add(1, Ordering::SeqCst);
    state.recorder.record_auth(&headers);
    state.recorder.bodies.lock().unwrap().push(body);

    let failing = state
        .remaining_failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        return (StatusCode::SERVICE_UNAVAILABLE, "overloaded").into_response();
    }

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("127.0.0.1")
        .to_string();
    match state.script.result {
        RemoteResult::Base64 => (
            [("x-result-url", "https://remote.test/results/abc")],
            Json(json!({ "data": [{ "b64_json": codec::encode_chunked(PNG) }] })),
        )
            .into_response(),
        RemoteResult::Url => Json(json!({
            "data": [{ "url": format!("http://{host}/files/result.png") }]
        }))
        .into_response(),
        RemoteResult::Empty => Json(json!({ "data": [] })).into_response(),
    }
}

async fn remote_file(headers: HeaderMap) -> Response {
    if headers.contains_key(header::AUTHORIZATION) {
        return StatusCode::FORBIDDEN.into_response();
    }
    ([(header::CONTENT_TYPE, "image/png")], PNG.to_vec()).into_response()
}

/// Start a remote API fake serving uploads, generation and result files.
pub async fn remote_backend(script: RemoteScript) -> (String, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let state = RemoteState {
        remaining_failures: Arc::new(AtomicUsize::new(script.generate_failures)),
        script: Arc::new(script),
        recorder: Arc::clone(&recorder),
    };
    let router = Router::new()
        .route("/v1/uploads", post(remote_upload))
        .route("/v1/images", post(remote_images))
        .route("/files/result.png", get(remote_file))
        .with_state(state);
    (serve(router).await, recorder)
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

pub fn request(kind: ProviderKind, references: Vec<ImageInput>) -> GenerateRequest {
    GenerateRequest {
        model: ModelDescriptor::new("test-model", "Test Model", kind, "test-backend")
            .with_editing(4),
        prompt: "a lighthouse at dusk".to_string(),
        width: 768,
        height: 512,
        steps: 8,
        guidance: 4.0,
        negative_prompt: Some("blurry".to_string()),
        reference_images: references,
    }
}

pub fn png_input() -> ImageInput {
    ImageInput::Bytes {
        data: PNG.to_vec(),
        content_type: "image/png".to_string(),
    }
}
