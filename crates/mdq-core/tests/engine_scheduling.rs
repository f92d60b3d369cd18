//! Admission and cancellation against real child processes.

#![cfg(unix)]

mod common;

use common::{count, is_cancelled, start_engine, status_of, wait_for};
use mdq_core::job::{JobConfig, JobStatus};
use mdq_core::scheduler::ConcurrencyLimits;
use mdq_core::{EngineError, SubmitRequest};
use tempfile::tempdir;

fn slow_urls(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("https://media.test/slow/{i}")).collect()
}

#[tokio::test]
async fn burst_submission_respects_slot_limit() {
    let state = tempdir().unwrap();
    let out = tempdir().unwrap();
    let engine = start_engine(state.path(), 5, 5).await;

    let resp = engine
        .handle
        .submit(SubmitRequest::new(slow_urls(25), JobConfig::new(out.path())))
        .await
        .unwrap();
    assert_eq!(resp.job_ids.len(), 25);
    assert_eq!(resp.total_found, 25);
    assert_eq!(resp.skipped_count, 0);

    let jobs = engine.handle.sync_state().await.unwrap();
    assert_eq!(count(&jobs, JobStatus::Downloading), 5);
    assert_eq!(count(&jobs, JobStatus::Pending), 20);

    // The five oldest submissions run first.
    for id in &resp.job_ids[..5] {
        assert_eq!(status_of(&jobs, *id), Some(JobStatus::Downloading));
    }

    // Cancelling a running job frees exactly one slot for the next in line.
    let mut events = engine.handle.subscribe();
    let victim = resp.job_ids[0];
    engine.handle.cancel(victim).await.unwrap();
    wait_for(&mut events, is_cancelled(victim)).await;

    let jobs = engine.handle.sync_state().await.unwrap();
    assert_eq!(status_of(&jobs, victim), Some(JobStatus::Cancelled));
    assert_eq!(count(&jobs, JobStatus::Downloading), 5);
    assert_eq!(count(&jobs, JobStatus::Pending), 19);
    assert_eq!(status_of(&jobs, resp.job_ids[5]), Some(JobStatus::Downloading));

    engine.stop().await;
}

#[tokio::test]
async fn cancelling_pending_job_frees_no_slot() {
    let state = tempdir().unwrap();
    let out = tempdir().unwrap();
    let engine = start_engine(state.path(), 1, 1).await;

    let resp = engine
        .handle
        .submit(SubmitRequest::new(slow_urls(3), JobConfig::new(out.path())))
        .await
        .unwrap();
    let (running, waiting, last) = (resp.job_ids[0], resp.job_ids[1], resp.job_ids[2]);

    let mut events = engine.handle.subscribe();
    engine.handle.cancel(waiting).await.unwrap();
    wait_for(&mut events, is_cancelled(waiting)).await;

    let jobs = engine.handle.sync_state().await.unwrap();
    assert_eq!(status_of(&jobs, running), Some(JobStatus::Downloading));
    assert_eq!(status_of(&jobs, waiting), Some(JobStatus::Cancelled));
    assert_eq!(status_of(&jobs, last), Some(JobStatus::Pending));

    // Cancelling again is a no-op, not an error.
    engine.handle.cancel(waiting).await.unwrap();
    let jobs = engine.handle.sync_state().await.unwrap();
    assert_eq!(status_of(&jobs, waiting), Some(JobStatus::Cancelled));

    engine.stop().await;
}

#[tokio::test]
async fn raising_limits_admits_waiting_jobs() {
    let state = tempdir().unwrap();
    let out = tempdir().unwrap();
    let engine = start_engine(state.path(), 1, 1).await;

    engine
        .handle
        .submit(SubmitRequest::new(slow_urls(4), JobConfig::new(out.path())))
        .await
        .unwrap();
    let jobs = engine.handle.sync_state().await.unwrap();
    assert_eq!(count(&jobs, JobStatus::Downloading), 1);

    engine
        .handle
        .set_limits(ConcurrencyLimits::new(3, 3).unwrap())
        .await
        .unwrap();
    let jobs = engine.handle.sync_state().await.unwrap();
    assert_eq!(count(&jobs, JobStatus::Downloading), 3);
    assert_eq!(count(&jobs, JobStatus::Pending), 1);

    engine.stop().await;
}

#[tokio::test]
async fn invalid_submission_creates_no_job() {
    let state = tempdir().unwrap();
    let out = tempdir().unwrap();
    let engine = start_engine(state.path(), 2, 2).await;

    for urls in [
        vec!["ftp://media.test/a".to_string()],
        vec!["not a url".to_string()],
        vec!["https://media.test/slow/ok".to_string(), "mailto:x@y.z".to_string()],
        Vec::new(),
    ] {
        let err = engine
            .handle
            .submit(SubmitRequest::new(urls, JobConfig::new(out.path())))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ValidationFailed(_)), "{err}");
    }

    let mut bad_template = JobConfig::new(out.path());
    bad_template.filename_template = "../escape/%(title)s".to_string();
    let err = engine
        .handle
        .submit(SubmitRequest::new(
            vec!["https://media.test/slow/x".to_string()],
            bad_template,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ValidationFailed(_)));

    assert!(engine.handle.sync_state().await.unwrap().is_empty());
    engine.stop().await;
}

#[tokio::test]
async fn unknown_job_commands_are_rejected() {
    let state = tempdir().unwrap();
    let engine = start_engine(state.path(), 1, 1).await;
    let ghost = mdq_core::job::JobId::new();

    assert!(matches!(
        engine.handle.cancel(ghost).await,
        Err(EngineError::UnknownJob(id)) if id == ghost
    ));
    assert!(matches!(
        engine.handle.dismiss(ghost).await,
        Err(EngineError::UnknownJob(_))
    ));
    assert!(matches!(
        engine.handle.retry(ghost).await,
        Err(EngineError::UnknownJob(_))
    ));

    engine.stop().await;
}

#[tokio::test]
async fn commands_after_shutdown_report_closed_engine() {
    let state = tempdir().unwrap();
    let engine = start_engine(state.path(), 1, 1).await;
    let handle = engine.handle.clone();
    engine.stop().await;

    assert!(matches!(
        handle.sync_state().await,
        Err(EngineError::EngineClosed)
    ));
}
