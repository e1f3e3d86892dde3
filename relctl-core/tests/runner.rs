use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use relctl_core::runner::{run, RunError};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_peak_concurrency_never_exceeds_workers() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..40)
        .map(|i| {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            move || async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, String>(i)
            }
        })
        .collect();

    let results = run(tasks, 4, &CancellationToken::new()).await.unwrap();
    assert_eq!(results.len(), 40);
    let peak = peak.load(Ordering::SeqCst);
    assert!(peak <= 4, "peak concurrency was {peak}");
    assert!(peak >= 1);
}

#[tokio::test]
async fn test_results_follow_input_order() {
    let tasks: Vec<_> = (0..10u64)
        .map(|i| {
            move || async move {
                // Later tasks finish first.
                tokio::time::sleep(Duration::from_millis(20 - i * 2)).await;
                Ok::<_, String>(i * 10)
            }
        })
        .collect();

    let results = run(tasks, 10, &CancellationToken::new()).await.unwrap();
    assert_eq!(results, (0..10u64).map(|i| i * 10).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_first_error_is_returned() {
    let started = Arc::new(AtomicUsize::new(0));
    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let started = Arc::clone(&started);
            move || async move {
                started.fetch_add(1, Ordering::SeqCst);
                if i == 2 {
                    return Err(format!("task {i} failed"));
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(i)
            }
        })
        .collect();

    let err = run(tasks, 2, &CancellationToken::new()).await.unwrap_err();
    match err {
        RunError::Task(msg) => assert_eq!(msg, "task 2 failed"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(started.load(Ordering::SeqCst) < 20, "dispatch should stop after the error");
}

#[tokio::test]
async fn test_cancellation_returns_promptly() {
    let cancel = CancellationToken::new();
    let tasks: Vec<_> = (0..4)
        .map(|i| {
            move || async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, String>(i)
            }
        })
        .collect();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(Duration::from_secs(5), run(tasks, 2, &cancel))
        .await
        .expect("run should return soon after cancellation");
    assert!(matches!(result, Err(RunError::Cancelled)));
}

#[tokio::test]
async fn test_already_cancelled_dispatches_nothing() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let started = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&started);
    let tasks = vec![move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok::<_, String>(())
    }];
    assert!(matches!(run(tasks, 1, &cancel).await, Err(RunError::Cancelled)));
    assert_eq!(started.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_zero_workers_and_empty_batch() {
    let empty: Vec<fn() -> std::future::Ready<Result<u8, String>>> = Vec::new();
    assert!(run(empty, 3, &CancellationToken::new()).await.unwrap().is_empty());

    let tasks: Vec<_> = (0..3)
        .map(|i| move || async move { Ok::<_, String>(i) })
        .collect();
    let results = run(tasks, 0, &CancellationToken::new()).await.unwrap();
    assert_eq!(results, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_tasks_may_run_nested_batches() {
    let cancel = CancellationToken::new();
    let outer: Vec<_> = (0..3u32)
        .map(|i| {
            let cancel = cancel.clone();
            move || async move {
                let inner: Vec<_> = (0..3u32)
                    .map(|j| move || async move { Ok::<_, String>(i * 10 + j) })
                    .collect();
                let sums = run(inner, 2, &cancel).await.map_err(|e| e.to_string())?;
                Ok::<_, String>(sums.into_iter().sum::<u32>())
            }
        })
        .collect();

    let results = run(outer, 2, &cancel).await.unwrap();
    assert_eq!(results, vec![3, 33, 63]);
}
