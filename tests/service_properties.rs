//! End-to-end behaviour of the worker service under real threads

use keyed_executor::routing::{distribute, Distribution, HashRing, VirtualNode};
use keyed_executor::{
    AHashCodeProvider, CompletionStatus, Error, HashCodeProvider, SelectorKind, TaskError, WaitPolicy, WorkerService,
    WorkerServiceConfig,
};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn service(name: &str, workers: usize, buffer: usize) -> WorkerService {
    let config = WorkerServiceConfig::builder()
        .name(name)
        .worker_count(workers)
        .replica_count(64)
        .buffer_size(buffer)
        .producer_wait_policy(WaitPolicy::Yielding)
        .build()
        .unwrap();
    WorkerService::new(config).unwrap()
}

fn thread_name() -> anyhow::Result<String> {
    Ok(std::thread::current().name().unwrap_or_default().to_string())
}

/// Blocks the worker it runs on until released
fn gate() -> (mpsc::Sender<()>, mpsc::Receiver<()>, impl FnOnce() -> anyhow::Result<()> + Send + 'static) {
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (started_tx, started_rx) = mpsc::channel::<()>();
    let task = move || {
        let _ = started_tx.send(());
        let _ = release_rx.recv();
        Ok(())
    };
    (release_tx, started_rx, task)
}

#[test]
fn same_key_always_runs_on_one_worker() {
    let service = service("prop-affinity", 4, 256);
    let futures: Vec<_> = (0..1000).map(|_| service.execute("tenant-7", thread_name).unwrap()).collect();
    let names: HashSet<String> = futures.into_iter().map(|f| f.wait().unwrap()).collect();
    assert_eq!(names.len(), 1);
    assert_eq!(names.into_iter().next().unwrap(), service.worker_for("tenant-7"));
}

#[test]
fn distinct_keys_spread_across_workers() {
    let service = service("prop-spread", 4, 256);
    let futures: Vec<_> = (0..400)
        .map(|i| service.execute(format!("key-{i}").as_str(), thread_name).unwrap())
        .collect();
    let names: HashSet<String> = futures.into_iter().map(|f| f.wait().unwrap()).collect();
    assert!(names.len() >= 3, "only {} workers used", names.len());
}

#[test]
fn per_key_increments_are_neither_lost_nor_duplicated() {
    let service = service("prop-fifo", 4, 64);
    let counter = Arc::new(Mutex::new(Vec::new()));
    let n = 5000;
    let mut last = None;
    for i in 0..n {
        let counter = Arc::clone(&counter);
        last = Some(service.run(42i64, move || counter.lock().unwrap().push(i)).unwrap());
    }
    last.unwrap().wait().unwrap();
    let seen = counter.lock().unwrap();
    assert_eq!(seen.len(), n);
    assert!(seen.iter().copied().eq(0..n), "tasks ran out of order");
}

#[test]
fn try_execute_fails_once_capacity_is_reached() {
    let capacity = 8;
    let service = service("prop-capacity", 1, capacity);
    let (release, started, blocker) = gate();
    let mut futures = vec![service.try_execute("k", blocker).unwrap()];
    started.recv_timeout(Duration::from_secs(5)).unwrap();
    for _ in 1..capacity {
        futures.push(service.try_execute("k", || Ok(())).unwrap());
    }
    assert_eq!(service.queued(), capacity);

    let err = service.try_execute("k", || Ok(())).unwrap_err();
    assert!(matches!(err, Error::InsufficientCapacity { capacity: c, .. } if c == capacity));
    assert_eq!(service.queued(), capacity);

    release.send(()).unwrap();
    for f in futures {
        assert!(f.wait().is_ok());
    }
}

#[test]
fn cancelled_task_never_runs() {
    let service = service("prop-cancel", 1, 16);
    let (release, started, blocker) = gate();
    let blocked = service.execute("k", blocker).unwrap();
    started.recv_timeout(Duration::from_secs(5)).unwrap();

    let ran = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&ran);
    let victim = service
        .execute("k", move || {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    assert!(victim.cancel());
    let after = service.execute("k", || Ok("after")).unwrap();

    release.send(()).unwrap();
    blocked.wait().unwrap();
    assert_eq!(after.wait().unwrap(), "after");
    assert_eq!(victim.status(), Some(CompletionStatus::Cancelled));
    assert!(matches!(victim.wait(), Err(TaskError::Cancelled)));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[test]
fn shutdown_is_idempotent_and_fences_new_work() {
    let service = service("prop-shutdown", 2, 16);
    service.execute("warmup", || Ok(())).unwrap().wait().unwrap();
    assert!(service.shutdown());
    assert!(!service.shutdown());

    let before = service.queued();
    let err = service.execute("k", || Ok(1)).unwrap_err();
    assert!(matches!(err, Error::Terminated(ref name) if name == "prop-shutdown"));
    assert!(service.try_execute("k", || Ok(1)).unwrap_err().is_terminated());
    assert_eq!(service.queued(), before);
}

#[test]
fn failing_task_does_not_take_down_its_worker() {
    let service = service("prop-isolation", 1, 16);
    let failed = service.execute("k", || -> anyhow::Result<()> { anyhow::bail!("boom") }).unwrap();
    let panicked = service.execute("k", || -> anyhow::Result<()> { panic!("kaboom") }).unwrap();
    let healthy = service.execute("k", || Ok(7)).unwrap();

    assert!(matches!(failed.wait(), Err(TaskError::Failed(e)) if e.to_string() == "boom"));
    assert!(matches!(panicked.wait(), Err(TaskError::Panicked(m)) if m == "kaboom"));
    assert_eq!(healthy.wait().unwrap(), 7);
}

#[test]
fn blocking_producers_from_many_threads_all_complete() {
    let service = Arc::new(service("prop-contention", 2, 8));
    let done = Arc::new(AtomicUsize::new(0));
    std::thread::scope(|s| {
        for t in 0..4 {
            let service = Arc::clone(&service);
            let done = Arc::clone(&done);
            s.spawn(move || {
                let futures: Vec<_> = (0..500)
                    .map(|i| {
                        let done = Arc::clone(&done);
                        service
                            .execute((t * 1000 + i) as i64, move || {
                                done.fetch_add(1, Ordering::Relaxed);
                                Ok(())
                            })
                            .unwrap()
                    })
                    .collect();
                for f in futures {
                    f.wait().unwrap();
                }
            });
        }
    });
    assert_eq!(done.load(Ordering::Relaxed), 2000);
}

#[test]
fn hash_ring_moves_few_keys_when_a_worker_joins() {
    let hasher = AHashCodeProvider::new();
    let workers = 10;
    let before = distribute("ring", workers, 400, Distribution::RandomReplicas);
    let mut after = before.clone();
    after.extend(VirtualNode::replicas("ring", workers, 400));
    let small = HashRing::new(before, &hasher).unwrap();
    let large = HashRing::new(after, &hasher).unwrap();

    let moved = (0..10_000)
        .map(|i| hasher.hash_str(&format!("sample-{i}")))
        .filter(|&h| small.select(h).worker() != large.select(h).worker())
        .count();
    let fraction = moved as f64 / 10_000.0;
    let expected = 1.0 / (workers as f64 + 1.0);
    assert!((fraction - expected).abs() < expected * 0.5, "moved {fraction}, expected ~{expected}");
}

#[tokio::test]
async fn awaiting_results_from_async_code() {
    let service = service("prop-async", 2, 16);
    let futures: Vec<_> = (0..20i32).map(|i| service.execute(i, move || Ok(i * 2)).unwrap()).collect();
    let mut total = 0;
    for f in futures {
        total += f.await.unwrap();
    }
    assert_eq!(total, (0..20).map(|i| i * 2).sum::<i32>());
}

#[test]
fn round_robin_service_uses_every_worker() {
    let config = WorkerServiceConfig::builder()
        .name("prop-rr")
        .worker_count(3)
        .replica_count(1)
        .buffer_size(64)
        .selector(SelectorKind::RoundRobinMultiProducer)
        .build()
        .unwrap();
    let service = WorkerService::new(config).unwrap();
    let futures: Vec<_> = (0..9).map(|_| service.execute("ignored", thread_name).unwrap()).collect();
    let names: HashSet<String> = futures.into_iter().map(|f| f.wait().unwrap()).collect();
    assert_eq!(names.len(), 3);
}

#[test]
fn future_is_ready_without_a_runtime() {
    let service = service("prop-poll", 1, 16);
    let mut future = tokio_test::task::spawn(service.execute("k", || Ok(5u8)).unwrap());
    let value = loop {
        match future.poll() {
            std::task::Poll::Ready(v) => break v,
            std::task::Poll::Pending => std::thread::sleep(Duration::from_millis(1)),
        }
    };
    assert_eq!(value.unwrap(), 5);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn any_key_routes_consistently(key in "[a-z0-9]{1,24}") {
        let service = service("prop-routing", 3, 16);
        let expected = service.worker_for(key.as_str()).to_string();
        let got = service.execute(key.as_str(), thread_name).unwrap().wait().unwrap();
        prop_assert_eq!(got, expected);
    }
}
