//! Scheduling behaviour of EvalRunner: bounded concurrency, wall-clock
//! parallelism, ordering and cancellation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use casebench_core::{CaseReturn, EvalFunction, EvalResult};
use casebench_runner::{CancelToken, EvalRunner, RunHooks};
use futures::FutureExt;
use serde_json::json;

fn sleeper(name: &str, delay: Duration) -> EvalFunction {
    EvalFunction::plain(name, move |_args| {
        std::thread::sleep(delay);
        Ok(EvalResult::new(json!(null), "done").into())
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_never_exceeds_limit() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let functions = (0..8)
        .map(|i| {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            EvalFunction::plain_async(format!("case_{i}"), move |_args| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(CaseReturn::Result(EvalResult::new(i, "ok")))
                }
                .boxed()
            })
        })
        .collect();

    let records = EvalRunner::new(3, None)
        .run_all(functions, &RunHooks::default(), &CancelToken::new())
        .await;

    assert_eq!(records.len(), 8);
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(peak.load(Ordering::SeqCst) >= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_wall_time_is_batched() {
    let duration = Duration::from_millis(150);
    let functions = (0..5).map(|i| sleeper(&format!("s{i}"), duration)).collect();

    let started = Instant::now();
    let records = EvalRunner::new(2, None)
        .run_all(functions, &RunHooks::default(), &CancelToken::new())
        .await;
    let elapsed = started.elapsed();

    assert_eq!(records.len(), 5);
    // ceil(5 / 2) batches
    assert!(elapsed >= duration * 3 - Duration::from_millis(20), "{elapsed:?}");
    assert!(elapsed < duration * 5, "{elapsed:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn records_follow_dispatch_order() {
    let functions = (0..4)
        .map(|i| sleeper(&format!("case_{i}"), Duration::from_millis(80 - 20 * i)))
        .collect();
    let completion = Arc::new(Mutex::new(Vec::new()));
    let hooks = {
        let completion = Arc::clone(&completion);
        RunHooks::new().on_complete(move |idx, _f, _r| completion.lock().unwrap().push(idx))
    };

    let records = EvalRunner::new(4, None)
        .run_all(functions, &hooks, &CancelToken::new())
        .await;

    let names: Vec<_> = records.iter().map(|r| r.function_name.clone()).collect();
    assert_eq!(names, vec!["case_0", "case_1", "case_2", "case_3"]);
    assert_eq!(*completion.lock().unwrap(), vec![3, 2, 1, 0]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_stops_new_starts_and_drops_in_flight() {
    for concurrency in [0, 1] {
        let cancel = CancelToken::new();
        let starts = Arc::new(Mutex::new(Vec::new()));
        let hooks = {
            let cancel = cancel.clone();
            let starts = Arc::clone(&starts);
            RunHooks::new().on_start(move |idx, _f| {
                starts.lock().unwrap().push(idx);
                if idx == 1 {
                    cancel.cancel();
                }
            })
        };
        let functions = (0..5)
            .map(|i| sleeper(&format!("c{i}"), Duration::from_millis(30)))
            .collect();

        let records = EvalRunner::new(concurrency, None)
            .run_all(functions, &hooks, &cancel)
            .await;

        assert_eq!(*starts.lock().unwrap(), vec![0, 1], "concurrency {concurrency}");
        let names: Vec<_> = records.iter().map(|r| r.function_name.as_str()).collect();
        assert_eq!(names, vec!["c0"], "concurrency {concurrency}");
    }
}

#[tokio::test]
async fn errors_and_panics_become_records() {
    let functions = vec![
        EvalFunction::plain("fails", |_args| anyhow::bail!("upstream 503")),
        EvalFunction::plain("panics", |_args| panic!("index out of range")),
        sleeper("fine", Duration::ZERO),
    ];

    let records = EvalRunner::new(2, None)
        .run_all(functions, &RunHooks::default(), &CancelToken::new())
        .await;
    let summary = EvalRunner::summarize(records);

    assert_eq!(summary.total_evaluations, 3);
    assert_eq!(summary.total_errors, 2);
    assert_eq!(summary.results[0].result.error.as_deref(), Some("upstream 503"));
    assert!(summary.results[1]
        .result
        .error
        .as_deref()
        .unwrap()
        .contains("index out of range"));
    assert!(summary.results[2].result.has_passing_score());
}
