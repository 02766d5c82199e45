#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use atelier_core::job::JobFailure;
use atelier_core::registry::{ModelDescriptor, ModelRegistry, ProviderKind};
use atelier_core::storage::{BinaryStore, MemoryBinaryStore, StorageError, StoredObject};
use atelier_core::types::DbId;
use atelier_db::memory::{MemoryCredentialStore, MemoryJobStore, MemorySessionStore};
use atelier_providers::{
    ComputeHandle, Dispatcher, GenerateOutcome, GenerateRequest, ImageProvider, ProviderContext,
    ProviderError,
};
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::sync::Semaphore;
use tower::ServiceExt;

use atelier_api::auth::jwt::{generate_access_token, JwtConfig};
use atelier_api::config::{GenerationConfig, ServerConfig};
use atelier_api::engine::{Orchestrator, Stores};
use atelier_api::router::build_app_router;
use atelier_api::state::AppState;

/// Smallest valid PNG (1x1, transparent).
pub const PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

pub const MANAGED_MODEL: &str = "test-managed";
pub const EDIT_MODEL: &str = "test-managed-edit";
pub const REMOTE_MODEL: &str = "test-remote";
/// In the catalog, but no provider claims it.
pub const ORPHAN_MODEL: &str = "test-orphan";

pub const OWNER: DbId = 7;
pub const STRANGER: DbId = 8;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        jwt: JwtConfig {
            secret: "test-secret-that-is-long-enough-for-hmac".to_string(),
            access_token_expiry_mins: 15,
        },
        generation: GenerationConfig {
            image_store_dir: std::env::temp_dir().join("atelier-test-images"),
            managed_inference_url: None,
            remote_api_url: None,
            remote_attempts: 2,
            job_retention_days: 30,
            stuck_job_timeout_secs: 900,
        },
    }
}

pub fn token_for(user_id: DbId) -> String {
    generate_access_token(user_id, &test_config().jwt).unwrap()
}

pub fn test_registry() -> ModelRegistry {
    ModelRegistry::new([
        ModelDescriptor::new(MANAGED_MODEL, "Managed", ProviderKind::Managed, "m-backend"),
        ModelDescriptor::new(EDIT_MODEL, "Managed edit", ProviderKind::Managed, "e-backend")
            .with_editing(2),
        ModelDescriptor::new(REMOTE_MODEL, "Remote", ProviderKind::Remote, "r-backend")
            .with_editing(4),
        ModelDescriptor::new(ORPHAN_MODEL, "Orphan", ProviderKind::Remote, "o-backend"),
    ])
}

// ---------------------------------------------------------------------------
// Scripted provider
// ---------------------------------------------------------------------------

/// Provider whose answers are queued by the test. Once the queue is empty
/// every call succeeds with [`PNG`].
pub struct ScriptedProvider {
    kind: ProviderKind,
    models: Vec<String>,
    script: Mutex<VecDeque<GenerateOutcome>>,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<GenerateRequest>>,
    contexts: Mutex<Vec<ProviderContext>>,
}

impl ScriptedProvider {
    pub fn new(kind: ProviderKind, models: &[&str]) -> Self {
        Self {
            kind,
            models: models.iter().map(|m| m.to_string()).collect(),
            script: Mutex::new(VecDeque::new()),
            gate: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            contexts: Mutex::new(Vec::new()),
        }
    }

    /// Block each call until the test adds a permit to the gate.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn push(&self, outcome: GenerateOutcome) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<GenerateRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    pub fn last_context(&self) -> Option<ProviderContext> {
        self.contexts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ImageProvider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn supports(&self, model_id: &str) -> bool {
        self.models.iter().any(|m| m == model_id)
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
        context: &ProviderContext,
    ) -> Result<GenerateOutcome, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        self.contexts.lock().unwrap().push(context.clone());

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        let next = self.script.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| GenerateOutcome::Success {
            image: PNG.to_vec(),
            external_url: None,
        }))
    }
}

// ---------------------------------------------------------------------------
// Binary store that refuses generated images
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RejectingImageStore {
    inner: MemoryBinaryStore,
}

#[async_trait]
impl BinaryStore for RejectingImageStore {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), StorageError> {
        if key.starts_with("images/") {
            return Err(StorageError::Io(std::io::Error::other("disk full")));
        }
        self.inner.put(key, bytes, content_type).await
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StorageError> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.inner.delete(key).await
    }
}

// ---------------------------------------------------------------------------
// Test application
// ---------------------------------------------------------------------------

pub struct TestApp {
    pub router: Router,
    pub orchestrator: Orchestrator,
    pub jobs: Arc<MemoryJobStore>,
    pub sessions: Arc<MemorySessionStore>,
    pub credentials: Arc<MemoryCredentialStore>,
    pub binaries: Arc<dyn BinaryStore>,
    pub managed: Arc<ScriptedProvider>,
    pub remote: Arc<ScriptedProvider>,
}

pub struct TestAppBuilder {
    managed: ScriptedProvider,
    remote: ScriptedProvider,
    binaries: Arc<dyn BinaryStore>,
}

impl TestAppBuilder {
    pub fn new() -> Self {
        Self {
            managed: ScriptedProvider::new(ProviderKind::Managed, &[MANAGED_MODEL, EDIT_MODEL]),
            remote: ScriptedProvider::new(ProviderKind::Remote, &[REMOTE_MODEL]),
            binaries: Arc::new(MemoryBinaryStore::new()),
        }
    }

    pub fn gate_managed(mut self, gate: Arc<Semaphore>) -> Self {
        self.managed = self.managed.gated(gate);
        self
    }

    pub fn binaries(mut self, binaries: Arc<dyn BinaryStore>) -> Self {
        self.binaries = binaries;
        self
    }

    pub fn build(self) -> TestApp {
        let jobs = Arc::new(MemoryJobStore::new());
        let sessions = Arc::new(MemorySessionStore::new());
        let credentials = Arc::new(MemoryCredentialStore::new());
        let managed = Arc::new(self.managed);
        let remote = Arc::new(self.remote);

        let mut dispatcher = Dispatcher::default();
        dispatcher.register(managed.clone());
        dispatcher.register(remote.clone());

        let stores = Stores {
            jobs: jobs.clone(),
            sessions: sessions.clone(),
            credentials: credentials.clone(),
            binaries: self.binaries.clone(),
        };
        let orchestrator = Orchestrator::new(test_registry(), dispatcher, stores)
            .with_compute(Some(ComputeHandle::new("http://gpu.test")));

        let config = test_config();
        let state = AppState {
            config: Arc::new(config.clone()),
            orchestrator: orchestrator.clone(),
        };

        TestApp {
            router: build_app_router(state, &config),
            orchestrator,
            jobs,
            sessions,
            credentials,
            binaries: self.binaries,
            managed,
            remote,
        }
    }
}

impl TestApp {
    pub fn new() -> Self {
        TestAppBuilder::new().build()
    }

    /// Create a session owned by `owner` and return its id.
    pub async fn session(&self, owner: DbId) -> DbId {
        self.sessions.insert_session(owner).await.id
    }

    /// Wait until every detached generation has settled.
    pub async fn settle(&self) {
        self.orchestrator.supervisor().settle().await;
    }

    pub async fn get(&self, uri: &str, user: DbId) -> (StatusCode, Value) {
        self.send(Method::GET, uri, user, None).await
    }

    pub async fn post(&self, uri: &str, user: DbId, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, user, Some(body)).await
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        user: DbId,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request(method, uri, Some(&token_for(user)), body))
            .await
            .unwrap();
        let status = response.status();
        (status, body_json(response.into_body()).await)
    }

    /// Raw response, for endpoints that do not return JSON.
    pub async fn raw(&self, req: Request<Body>) -> axum::response::Response {
        self.router.clone().oneshot(req).await.unwrap()
    }
}

pub fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn body_bytes(body: Body) -> Vec<u8> {
    body.collect().await.unwrap().to_bytes().to_vec()
}

/// Parse a body as JSON; an empty body becomes `Value::Null`.
pub async fn body_json(body: Body) -> Value {
    let bytes = body_bytes(body).await;
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    }
}

/// Wait until the scripted provider has been called `n` times.
pub async fn wait_for_calls(provider: &ScriptedProvider, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while provider.calls() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("provider was not called in time");
}

pub fn failure(failure: JobFailure) -> GenerateOutcome {
    GenerateOutcome::Failure(failure)
}
