//! Job control: start, pause, resume, status over a real directory of WAV
//! files with a scripted analysis service

mod helpers;

use helpers::{generate_sample_library, test_config, ScriptedAnalyzer};
use sbe_common::config::RateLimitConfig;
use sbe_common::events::{EventBus, JobState};
use sbe_engine::analyzer::AnalyzeFailure;
use sbe_engine::controller::{stored_status, JobController};
use sbe_engine::models::FailureKind;
use sbe_engine::services::CatalogError;
use sbe_engine::store::{MemoryCacheStore, MemoryCheckpointStore};
use sbe_engine::EngineError;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

struct Fixture {
    analyzer: Arc<ScriptedAnalyzer>,
    cache: Arc<MemoryCacheStore>,
    checkpoints: Arc<MemoryCheckpointStore>,
    controller: JobController,
    library: TempDir,
}

impl Fixture {
    fn new(file_count: usize) -> Self {
        let library = TempDir::new().unwrap();
        generate_sample_library(library.path(), "tone", file_count).unwrap();
        std::fs::write(library.path().join("notes.txt"), b"not audio").unwrap();

        let analyzer = Arc::new(ScriptedAnalyzer::new());
        let cache = Arc::new(MemoryCacheStore::new());
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let controller = JobController::new(
            analyzer.clone(),
            cache.clone(),
            checkpoints.clone(),
            test_config(),
            EventBus::new(1024),
        );

        Self {
            analyzer,
            cache,
            checkpoints,
            controller,
            library,
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_start_scans_and_completes() {
    let fx = Fixture::new(7);

    let job_id = fx
        .controller
        .start(fx.library.path(), Some(3), Some(RateLimitConfig::new(5, Duration::from_secs(60))))
        .await
        .unwrap();
    let summary = fx.controller.wait(job_id).await.unwrap();

    assert_eq!(summary.state, JobState::Completed);
    assert_eq!(fx.analyzer.call_sizes(), vec![3, 3, 1]);

    let status = fx.controller.status(job_id).await.unwrap();
    assert_eq!(status.state, JobState::Completed);
    assert_eq!(status.progress.total, 7);
    assert_eq!(status.progress.processed, 7);
    assert_eq!(status.progress.percentage, 100.0);
    assert!(!status.running);
    assert_eq!(status.collection_root, fx.library.path());
}

#[tokio::test(start_paused = true)]
async fn test_pause_then_resume() {
    let fx = Fixture::new(6);
    let slow = RateLimitConfig::new(1, Duration::from_secs(60));

    let job_id = fx.controller.start(fx.library.path(), Some(3), Some(slow)).await.unwrap();
    fx.analyzer.wait_for_calls(1).await;
    fx.controller.pause(job_id).await.unwrap();

    let summary = fx.controller.wait(job_id).await.unwrap();
    assert_eq!(summary.state, JobState::Paused);
    assert_eq!(summary.progress.processed, 3);

    let status = fx.controller.status(job_id).await.unwrap();
    assert_eq!(status.state, JobState::Paused);
    assert_eq!(status.last_error.as_deref(), Some("Cancelled"));
    assert!(!status.running);

    // Pausing twice is a state error
    assert!(matches!(
        fx.controller.pause(job_id).await,
        Err(EngineError::InvalidState { .. })
    ));

    fx.controller.resume(job_id).await.unwrap();
    let summary = fx.controller.wait(job_id).await.unwrap();
    assert_eq!(summary.state, JobState::Completed);
    assert_eq!(summary.calls_made, 1);
    assert_eq!(fx.analyzer.call_count(), 2);

    let status = fx.controller.status(job_id).await.unwrap();
    assert_eq!(status.progress.processed, 6);
    assert_eq!(status.state, JobState::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_pause_reaches_job_while_someone_waits() {
    let fx = Fixture::new(6);
    let slow = RateLimitConfig::new(1, Duration::from_secs(60));

    let job_id = fx.controller.start(fx.library.path(), Some(3), Some(slow)).await.unwrap();
    let waiter = {
        let controller = fx.controller.clone();
        tokio::spawn(async move { controller.wait(job_id).await })
    };
    tokio::task::yield_now().await;
    fx.analyzer.wait_for_calls(1).await;

    let status = fx.controller.status(job_id).await.unwrap();
    assert!(status.running);

    fx.controller.pause(job_id).await.unwrap();
    let summary = waiter.await.unwrap().unwrap();
    assert_eq!(summary.state, JobState::Paused);
    assert_eq!(summary.progress.processed, 3);
    assert_eq!(fx.analyzer.call_count(), 1);
    assert!(!fx.controller.status(job_id).await.unwrap().running);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_resumes_start_one_task() {
    let fx = Fixture::new(6);
    let slow = RateLimitConfig::new(1, Duration::from_secs(60));

    let job_id = fx.controller.start(fx.library.path(), Some(3), Some(slow)).await.unwrap();
    fx.analyzer.wait_for_calls(1).await;
    fx.controller.pause(job_id).await.unwrap();
    assert_eq!(fx.controller.wait(job_id).await.unwrap().state, JobState::Paused);

    let (first, second) = tokio::join!(fx.controller.resume(job_id), fx.controller.resume(job_id));
    assert!(first.is_ok() != second.is_ok());
    let rejected = if first.is_err() { first } else { second };
    assert!(matches!(
        rejected,
        Err(EngineError::InvalidState {
            state: JobState::Running,
            ..
        })
    ));

    let summary = fx.controller.wait(job_id).await.unwrap();
    assert_eq!(summary.state, JobState::Completed);
    assert_eq!(summary.calls_made, 1);
    assert_eq!(fx.analyzer.call_sizes(), vec![3, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_finished_and_unknown_jobs_are_rejected() {
    let fx = Fixture::new(2);

    let job_id = fx.controller.start(fx.library.path(), None, None).await.unwrap();
    fx.controller.wait(job_id).await.unwrap();

    assert!(matches!(
        fx.controller.resume(job_id).await,
        Err(EngineError::InvalidState {
            state: JobState::Completed,
            ..
        })
    ));

    let unknown = Uuid::new_v4();
    assert!(matches!(
        fx.controller.status(unknown).await,
        Err(EngineError::JobNotFound(id)) if id == unknown
    ));
    assert!(matches!(
        fx.controller.pause(unknown).await,
        Err(EngineError::JobNotFound(_))
    ));
    assert!(matches!(
        fx.controller.resume(unknown).await,
        Err(EngineError::JobNotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_aborted_job_reports_reason_and_stays_aborted() {
    let fx = Fixture::new(4);
    fx.analyzer
        .push_batch_failure(AnalyzeFailure::new(FailureKind::Unauthorized, "key revoked"));

    let job_id = fx.controller.start(fx.library.path(), None, None).await.unwrap();
    let result = fx.controller.wait(job_id).await;
    assert!(matches!(
        result,
        Err(EngineError::Aborted {
            kind: FailureKind::Unauthorized,
            ..
        })
    ));

    let status = fx.controller.status(job_id).await.unwrap();
    assert_eq!(status.state, JobState::Aborted);
    assert_eq!(status.progress.processed_this_run, 0);
    assert!(status.last_error.unwrap().contains("unauthorized"));

    assert!(matches!(
        fx.controller.resume(job_id).await,
        Err(EngineError::InvalidState { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_status_survives_controller_restart() {
    let fx = Fixture::new(5);
    let job_id = fx.controller.start(fx.library.path(), Some(2), None).await.unwrap();
    fx.controller.wait(job_id).await.unwrap();

    let restarted = JobController::new(
        Arc::new(ScriptedAnalyzer::new()),
        fx.cache.clone(),
        fx.checkpoints.clone(),
        test_config(),
        EventBus::new(16),
    );

    let reports = restarted.list().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].job_id, job_id);
    assert_eq!(reports[0].state, JobState::Completed);
    assert_eq!(reports[0].progress.processed, 5);
    assert_eq!(reports[0].progress.succeeded, 5);
    assert!(!reports[0].running);

    let stored = stored_status(
        fx.cache.as_ref(),
        fx.checkpoints.as_ref(),
        &test_config().storage_retry,
        job_id,
    )
    .await
    .unwrap();
    assert_eq!(stored.progress.processed, 5);
    assert_eq!(stored.progress.eta, Some(Duration::ZERO));
}

#[tokio::test(start_paused = true)]
async fn test_jobs_with_same_budget_share_one_limiter() {
    let fx = Fixture::new(2);
    let other = TempDir::new().unwrap();
    generate_sample_library(other.path(), "other", 2).unwrap();
    let budget = RateLimitConfig::new(1, Duration::from_secs(30));

    let first = fx.controller.start(fx.library.path(), Some(2), Some(budget)).await.unwrap();
    let second = fx.controller.start(other.path(), Some(2), Some(budget)).await.unwrap();
    fx.controller.wait(first).await.unwrap();
    fx.controller.wait(second).await.unwrap();

    let calls = fx.analyzer.calls();
    assert_eq!(calls.len(), 2);
    let gap = if calls[1].at > calls[0].at {
        calls[1].at.duration_since(calls[0].at)
    } else {
        calls[0].at.duration_since(calls[1].at)
    };
    assert!(gap >= Duration::from_secs(30));
}

#[tokio::test]
async fn test_start_rejects_bad_input() {
    let fx = Fixture::new(1);

    let missing = fx.library.path().join("does_not_exist");
    assert!(matches!(
        fx.controller.start(&missing, None, None).await,
        Err(EngineError::Catalog(CatalogError::PathNotFound(_)))
    ));

    assert!(matches!(
        fx.controller.start(fx.library.path(), Some(0), None).await,
        Err(EngineError::Config(_))
    ));

    let no_budget = RateLimitConfig {
        max_calls: 0,
        window_secs: 60,
    };
    assert!(matches!(
        fx.controller.start(fx.library.path(), None, Some(no_budget)).await,
        Err(EngineError::Common(_))
    ));
    assert_eq!(fx.analyzer.call_count(), 0);
}
