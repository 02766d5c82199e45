//! Stuck-job watchdog and job retention against a live orchestrator.

mod common;

use std::sync::Arc;
use std::time::Duration;

use atelier_core::codec;
use atelier_core::job::JobStatus;
use atelier_core::params::GenerationParams;
use atelier_core::registry::ProviderKind;
use atelier_core::types::DbId;
use atelier_db::models::job::NewJob;
use atelier_db::{JobStore, SessionStore, StoreError};
use atelier_api::background::{job_retention, stuck_jobs};
use assert_matches::assert_matches;
use axum::http::StatusCode;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use common::*;

async fn submit(app: &TestApp, session: DbId) -> Uuid {
    let (status, body) = app
        .post(
            &format!("/api/v1/sessions/{session}/generations"),
            OWNER,
            json!({ "prompt": "a slow render", "model_id": MANAGED_MODEL }),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    body["data"]["job"]["id"].as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn test_watchdog_fails_stuck_job_and_late_result_is_discarded() {
    let gate = Arc::new(Semaphore::new(0));
    let app = TestAppBuilder::new().gate_managed(gate.clone()).build();
    let session = app.session(OWNER).await;
    let id = submit(&app, session).await;
    wait_for_calls(&app.managed, 1).await;

    app.jobs.age(id, chrono::Duration::minutes(20)).await.unwrap();
    let failed = stuck_jobs::sweep(app.jobs.as_ref(), Duration::from_secs(600))
        .await
        .unwrap();
    assert_eq!(failed, 1);

    let job = app.jobs.get(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        job.error_message.as_deref(),
        Some("Generation timed out after 600 seconds")
    );

    // The provider answers after the watchdog gave up.
    gate.add_permits(1);
    app.settle().await;

    let job = app.jobs.get(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(app.sessions.message_count().await, 0);
    assert!(app
        .binaries
        .get(&format!("images/{session}/{id}.png"))
        .await
        .unwrap()
        .is_none());

    let session = app.sessions.find_session(session).await.unwrap().unwrap();
    assert!(session.current_reference_id.is_none());
    assert!(session.title.is_none());
}

#[tokio::test]
async fn test_watchdog_leaves_recent_jobs_alone() {
    let gate = Arc::new(Semaphore::new(0));
    let app = TestAppBuilder::new().gate_managed(gate.clone()).build();
    let session = app.session(OWNER).await;
    let id = submit(&app, session).await;
    wait_for_calls(&app.managed, 1).await;

    let failed = stuck_jobs::sweep(app.jobs.as_ref(), Duration::from_secs(600))
        .await
        .unwrap();
    assert_eq!(failed, 0);

    gate.add_permits(1);
    app.settle().await;
    assert_eq!(app.jobs.get(id).await.unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn test_watchdog_fails_jobs_that_never_started() {
    let app = TestApp::new();
    let session = app.session(OWNER).await;
    // A job row whose execution task was lost before it ran.
    let orphan = app
        .jobs
        .create(NewJob {
            id: Uuid::now_v7(),
            session_id: session,
            owner_id: OWNER,
            model_id: MANAGED_MODEL.to_string(),
            provider_kind: ProviderKind::Managed,
            prompt: "never ran".to_string(),
            params: GenerationParams {
                width: 512,
                height: 512,
                steps: 4,
                guidance: 7.5,
                negative_prompt: None,
                reference_images: Vec::new(),
            },
            retry_of_job_id: None,
        })
        .await
        .unwrap();
    app.jobs.age(orphan.id, chrono::Duration::minutes(20)).await.unwrap();

    let failed = stuck_jobs::sweep(app.jobs.as_ref(), Duration::from_secs(600))
        .await
        .unwrap();
    assert_eq!(failed, 1);

    let job = app.jobs.get(orphan.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempt_count, 1);
    assert_eq!(
        job.error_message.as_deref(),
        Some("Generation timed out after 600 seconds")
    );

    let (_, body) = app
        .get(&format!("/api/v1/sessions/{session}/jobs/outstanding"), OWNER)
        .await;
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn test_retention_releases_staged_references() {
    let app = TestApp::new();
    let session = app.session(OWNER).await;
    let (status, body) = app
        .post(
            &format!("/api/v1/sessions/{session}/generations"),
            OWNER,
            json!({
                "prompt": "add a scarf",
                "model_id": EDIT_MODEL,
                "reference_images": [{ "type": "inline", "data": codec::encode_chunked(PNG) }],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id: Uuid = body["data"]["job"]["id"].as_str().unwrap().parse().unwrap();
    app.settle().await;

    let reference = format!("references/{id}/0");
    let image = format!("images/{session}/{id}.png");
    assert!(app.binaries.get(&reference).await.unwrap().is_some());

    app.jobs.age(id, chrono::Duration::days(40)).await.unwrap();
    let purged = job_retention::purge(
        app.jobs.as_ref(),
        app.binaries.as_ref(),
        chrono::Duration::days(30),
    )
    .await
    .unwrap();
    assert_eq!(purged, 1);

    assert_matches!(app.jobs.get(id).await, Err(StoreError::NotFound(_)));
    assert!(app.binaries.get(&reference).await.unwrap().is_none());
    // The artifact belongs to the session, not the job.
    assert!(app.binaries.get(&image).await.unwrap().is_some());
    assert_eq!(app.sessions.message_count().await, 1);
}

#[tokio::test]
async fn test_retention_purges_old_terminal_jobs() {
    let app = TestApp::new();
    let session = app.session(OWNER).await;
    let old = submit(&app, session).await;
    let recent = submit(&app, session).await;
    app.settle().await;

    app.jobs.age(old, chrono::Duration::days(40)).await.unwrap();

    let cancel = CancellationToken::new();
    let jobs: Arc<dyn JobStore> = app.jobs.clone();
    let handle = tokio::spawn(job_retention::run(
        jobs,
        app.binaries.clone(),
        30,
        cancel.clone(),
    ));

    tokio::time::timeout(Duration::from_secs(5), async {
        while app.jobs.len().await > 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("old job was not purged");

    cancel.cancel();
    handle.await.unwrap();

    assert_matches!(app.jobs.get(old).await, Err(StoreError::NotFound(_)));
    assert_eq!(app.jobs.get(recent).await.unwrap().status, JobStatus::Completed);
}
