//! Process supervision edge cases: tools that ignore termination, job tasks that
//! crash.

#![cfg(unix)]

mod common;

use std::time::{Duration, Instant};

use common::{is_cancelled, start_engine, status_of, wait_for, wait_for_pid};
use mdq_core::job::{JobConfig, JobStatus};
use mdq_core::{EngineEvent, SubmitRequest};
use tempfile::tempdir;

/// Cancel grace configured by `common::settings`.
const GRACE: Duration = Duration::from_secs(1);

fn group_alive(pgid: i32) -> bool {
    unsafe { libc::kill(-pgid, 0) == 0 }
}

#[tokio::test]
async fn cancel_kills_tool_that_ignores_terminate() {
    let state = tempdir().unwrap();
    let out = tempdir().unwrap();
    let engine = start_engine(state.path(), 1, 1).await;
    let mut events = engine.handle.subscribe();

    let resp = engine
        .handle
        .submit(SubmitRequest::new(
            vec!["https://media.test/stubborn/hold".to_string()],
            JobConfig::new(out.path()),
        ))
        .await
        .unwrap();
    let id = resp.job_ids[0];
    let pgid = wait_for_pid(&out.path().join("hold.pid")).await;
    assert!(group_alive(pgid));

    let started = Instant::now();
    engine.handle.cancel(id).await.unwrap();
    wait_for(&mut events, is_cancelled(id)).await;
    let elapsed = started.elapsed();

    assert!(
        elapsed >= GRACE - Duration::from_millis(100),
        "cancelled after {elapsed:?}, before the grace period ran out"
    );
    assert!(
        elapsed < GRACE + Duration::from_secs(3),
        "cancel took {elapsed:?}"
    );
    assert!(!group_alive(pgid), "process group {pgid} still running");

    let jobs = engine.handle.sync_state().await.unwrap();
    assert_eq!(status_of(&jobs, id), Some(JobStatus::Cancelled));
    engine.stop().await;
}

#[tokio::test]
async fn crashed_job_task_fails_only_that_job() {
    let state = tempdir().unwrap();
    let out = tempdir().unwrap();
    let engine = start_engine(state.path(), 2, 2).await;
    let mut events = engine.handle.subscribe();

    let resp = engine
        .handle
        .submit(SubmitRequest::new(
            vec![
                "https://media.test/panic/boom".to_string(),
                "https://media.test/ok/fine".to_string(),
            ],
            JobConfig::new(out.path()),
        ))
        .await
        .unwrap();
    let (boom, fine) = (resp.job_ids[0], resp.job_ids[1]);

    let mut failure = None;
    let mut fine_done = false;
    while failure.is_none() || !fine_done {
        let event = wait_for(&mut events, |e| {
            matches!(e, EngineEvent::Error { .. } | EngineEvent::Completed { .. })
        })
        .await;
        match event {
            EngineEvent::Error {
                job_id, message, ..
            } if job_id == boom => failure = Some(message),
            EngineEvent::Completed { job_id, .. } if job_id == fine => fine_done = true,
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert!(failure.unwrap().contains("panicked"));
    assert!(out.path().join("fine.mp4").exists());

    // The engine keeps serving commands.
    let jobs = engine.handle.sync_state().await.unwrap();
    assert_eq!(status_of(&jobs, boom), Some(JobStatus::Error));
    assert_eq!(status_of(&jobs, fine), Some(JobStatus::Completed));
    let retried = engine.handle.retry(boom).await.unwrap();
    assert_ne!(retried, boom);

    engine.stop().await;
}
