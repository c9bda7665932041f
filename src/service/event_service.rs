//! Keyed event publishing over a pool of workers
//!
//! [`EventWorkerService`] pre-allocates one ring of events per worker and
//! routes every publish by key: equal keys land on the same worker, so their
//! events are handled in publish order by one thread. Events are written in
//! place by a translator closure; nothing is allocated per publish.

use crate::core::config::WorkerServiceConfig;
use crate::core::error::{Error, Result};
use crate::core::types::{KeyHash, RoutingKey};
use crate::routing::hash::{AHashCodeProvider, HashCodeProvider};
use crate::routing::node::distribute;
use crate::routing::selector::NodeSelector;
use crate::runtime::handler::EventHandler;
use crate::runtime::worker::{Worker, WorkerSettings};
use crate::service::state::{ServiceState, StateCell};
use std::sync::Arc;

/// A pool of single-threaded workers fed through keyed routing
pub struct EventWorkerService<E> {
    config: WorkerServiceConfig,
    state: StateCell,
    hasher: Arc<dyn HashCodeProvider>,
    selector: NodeSelector,
    workers: Vec<Worker<E>>,
}

impl<E: Send + 'static> EventWorkerService<E> {
    /// Build and start a service hashing keys with [`AHashCodeProvider`].
    ///
    /// `factory` pre-allocates every ring slot; each worker gets its own
    /// clone of `handler`.
    pub fn new<H>(config: WorkerServiceConfig, factory: impl FnMut() -> E, handler: H) -> Result<Self>
    where
        H: EventHandler<E> + Clone,
    {
        Self::with_hash_provider(config, Arc::new(AHashCodeProvider::new()), factory, handler)
    }

    /// Build and start a service with an explicit hash provider
    pub fn with_hash_provider<H>(
        config: WorkerServiceConfig,
        hasher: Arc<dyn HashCodeProvider>,
        mut factory: impl FnMut() -> E,
        handler: H,
    ) -> Result<Self>
    where
        H: EventHandler<E> + Clone,
    {
        config.validate()?;
        let state = StateCell::new();

        let settings = WorkerSettings {
            capacity: config.buffer_size,
            producer_wait: config.producer_wait_policy,
            consumer_wait: config.consumer_wait_policy,
            batch_size_limit: config.batch_size_limit,
            shutdown_policy: config.shutdown_policy,
        };
        // A failed spawn drops the workers built so far, which stops them.
        let workers = (0..config.worker_count)
            .map(|i| {
                Worker::spawn(
                    format!("{}-worker-{}", config.name, i),
                    settings,
                    &mut factory,
                    handler.clone(),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let nodes = distribute(
            &config.name,
            config.worker_count,
            config.replica_count,
            NodeSelector::distribution(config.selector),
        );
        let selector = NodeSelector::new(config.selector, nodes, hasher.as_ref())?;

        state.transition(ServiceState::Constructing, ServiceState::Running);
        tracing::info!(
            service = %config.name,
            workers = config.worker_count,
            virtual_nodes = selector.nodes().len(),
            selector = ?config.selector,
            buffer_size = config.buffer_size,
            "worker service started"
        );

        Ok(Self { config, state, hasher, selector, workers })
    }

    /// Hash `key` with the service's provider
    #[inline]
    pub fn hash_key<'k>(&self, key: impl Into<RoutingKey<'k>>) -> KeyHash {
        self.hasher.hash_key(key.into())
    }

    /// Hash `key` only when the selector uses it
    #[inline]
    fn routing_hash(&self, key: RoutingKey<'_>) -> KeyHash {
        if self.selector.kind().is_keyed() {
            self.hasher.hash_key(key)
        } else {
            0
        }
    }

    /// Liveness check, then the worker owning `hash`
    #[inline]
    pub(crate) fn route_hash(&self, hash: KeyHash) -> Result<&Worker<E>> {
        if self.state.get() != ServiceState::Running {
            return Err(Error::Terminated(self.config.name.clone()));
        }
        let node = self.selector.select(hash);
        Ok(&self.workers[node.worker()])
    }

    /// A worker that stopped between the liveness check and the publish
    /// means the service is shutting down.
    pub(crate) fn submission_error(&self, error: Error) -> Error {
        match error {
            Error::WorkerDead(_) => Error::Terminated(self.config.name.clone()),
            other => other,
        }
    }

    /// Publish one event for `key`, waiting while the worker's ring is full.
    /// `translator` writes `arg` into the claimed slot. Returns the slot
    /// sequence.
    pub fn publish_event<'k, A, F>(&self, key: impl Into<RoutingKey<'k>>, arg: A, translator: F) -> Result<u64>
    where
        F: FnOnce(&mut E, A),
    {
        let worker = self.route_hash(self.routing_hash(key.into()))?;
        worker
            .publish_with(arg, translator)
            .map_err(|e| self.submission_error(e))
    }

    /// Publish one event without waiting; a full ring fails with
    /// [`Error::InsufficientCapacity`] and publishes nothing.
    pub fn try_publish_event<'k, A, F>(&self, key: impl Into<RoutingKey<'k>>, arg: A, translator: F) -> Result<u64>
    where
        F: FnOnce(&mut E, A),
    {
        let worker = self.route_hash(self.routing_hash(key.into()))?;
        worker
            .try_publish_with(arg, translator)
            .map_err(|e| self.submission_error(e))
    }

    /// Publish several events for one key into contiguous slots, waiting for
    /// room. Returns the sequence of the first slot.
    pub fn publish_events<'k, A, F>(&self, key: impl Into<RoutingKey<'k>>, args: Vec<A>, translator: F) -> Result<u64>
    where
        F: FnMut(&mut E, A),
    {
        let worker = self.route_hash(self.routing_hash(key.into()))?;
        worker
            .publish_batch_with(args, translator)
            .map_err(|e| self.submission_error(e))
    }

    /// All-or-nothing batch publish without waiting
    pub fn try_publish_events<'k, A, F>(&self, key: impl Into<RoutingKey<'k>>, args: Vec<A>, translator: F) -> Result<u64>
    where
        F: FnMut(&mut E, A),
    {
        let worker = self.route_hash(self.routing_hash(key.into()))?;
        worker
            .try_publish_batch_with(args, translator)
            .map_err(|e| self.submission_error(e))
    }
}

impl<E> EventWorkerService<E> {
    /// Stop accepting work and wait for every worker thread to exit.
    ///
    /// Only the first call does anything; it returns true. Queued events are
    /// drained or discarded per the configured shutdown policy.
    pub fn shutdown(&self) -> bool {
        if !self.state.transition(ServiceState::Running, ServiceState::ShuttingDown) {
            return false;
        }
        tracing::info!(service = %self.config.name, policy = ?self.config.shutdown_policy, "shutting down worker service");
        for worker in &self.workers {
            worker.shutdown();
        }
        for worker in &self.workers {
            worker.join();
        }
        self.state.transition(ServiceState::ShuttingDown, ServiceState::Terminated);
        tracing::info!(service = %self.config.name, "worker service terminated");
        true
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServiceState {
        self.state.get()
    }

    /// Whether submissions are accepted
    pub fn is_running(&self) -> bool {
        self.state.get() == ServiceState::Running
    }

    /// Number of worker threads
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Virtual nodes per worker
    pub fn worker_node_count(&self) -> usize {
        self.config.replica_count
    }

    /// Virtual nodes across all workers
    pub fn virtual_node_count(&self) -> usize {
        self.selector.nodes().len()
    }

    /// Validated configuration the service was built from
    pub fn config(&self) -> &WorkerServiceConfig {
        &self.config
    }

    /// Node selector in use
    pub fn selector(&self) -> &NodeSelector {
        &self.selector
    }

    /// Worker thread names, by worker index
    pub fn worker_names(&self) -> impl Iterator<Item = &str> {
        self.workers.iter().map(Worker::name)
    }

    /// Name of the worker `key` routes to. Advances the cursor of a
    /// round-robin selector.
    pub fn worker_for<'k>(&self, key: impl Into<RoutingKey<'k>>) -> &str {
        let key = key.into();
        let hash = if self.selector.kind().is_keyed() { self.hasher.hash_key(key) } else { 0 };
        self.workers[self.selector.select(hash).worker()].name()
    }

    /// Events queued across all workers and not yet handled
    pub fn queued(&self) -> usize {
        self.workers.iter().map(Worker::queued).sum()
    }
}

impl<E> Drop for EventWorkerService<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{SelectorKind, ShutdownPolicy, WaitPolicy};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::mpsc;
    use std::time::Duration;

    #[derive(Debug, Default, Clone)]
    struct Trade {
        account: u64,
        amount: i64,
    }

    /// Sums amounts per account and reports batches
    #[derive(Clone)]
    struct Ledger {
        balances: Arc<Mutex<HashMap<u64, (i64, String)>>>,
        done: mpsc::Sender<u64>,
        started: Arc<Mutex<Vec<String>>>,
        stopped: Arc<Mutex<Vec<String>>>,
    }

    impl EventHandler<Trade> for Ledger {
        fn on_start(&mut self, worker: &str) {
            self.started.lock().push(worker.to_string());
        }

        fn on_event(&mut self, worker: &str, event: &mut Trade, _seq: u64, _end: bool) -> anyhow::Result<()> {
            if event.amount == 0 {
                anyhow::bail!("empty trade");
            }
            let mut balances = self.balances.lock();
            let entry = balances.entry(event.account).or_insert((0, worker.to_string()));
            assert_eq!(entry.1, worker, "account moved between workers");
            entry.0 += event.amount;
            let _ = self.done.send(event.account);
            Ok(())
        }

        fn on_error(&mut self, _worker: &str, event: &mut Trade, _seq: u64, _error: anyhow::Error) {
            let _ = self.done.send(u64::MAX - event.account);
        }

        fn on_shutdown(&mut self, worker: &str) {
            self.stopped.lock().push(worker.to_string());
        }
    }

    fn ledger() -> (Ledger, mpsc::Receiver<u64>) {
        let (tx, rx) = mpsc::channel();
        let ledger = Ledger {
            balances: Arc::default(),
            done: tx,
            started: Arc::default(),
            stopped: Arc::default(),
        };
        (ledger, rx)
    }

    fn config(name: &str) -> WorkerServiceConfig {
        WorkerServiceConfig::builder()
            .name(name)
            .worker_count(3)
            .replica_count(16)
            .buffer_size(64)
            .producer_wait_policy(WaitPolicy::Yielding)
            .build()
            .unwrap()
    }

    fn write_trade(slot: &mut Trade, (account, amount): (u64, i64)) {
        slot.account = account;
        slot.amount = amount;
    }

    #[test]
    fn events_for_one_key_stay_on_one_worker() {
        let (handler, rx) = ledger();
        let service = EventWorkerService::new(config("ledger-a"), Trade::default, handler.clone()).unwrap();
        for i in 0..300u64 {
            let account = i % 10;
            service.publish_event(account as i64, (account, 1), write_trade).unwrap();
        }
        for _ in 0..300 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        let balances = handler.balances.lock();
        assert_eq!(balances.len(), 10);
        for (account, (sum, worker)) in balances.iter() {
            assert_eq!(*sum, 30);
            assert_eq!(service.worker_for(*account as i64), worker);
        }
    }

    #[test]
    fn batch_publish_and_error_callback() {
        let (handler, rx) = ledger();
        let service = EventWorkerService::new(config("ledger-b"), Trade::default, handler.clone()).unwrap();
        service
            .publish_events("acct-7", vec![(7, 5), (7, 0), (7, -2)], write_trade)
            .unwrap();
        let got: Vec<u64> = (0..3).map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap()).collect();
        assert_eq!(got, vec![7, u64::MAX - 7, 7]);
        assert_eq!(handler.balances.lock()[&7].0, 3);
        assert!(service
            .try_publish_events("acct-7", vec![(7, 1); 65], write_trade)
            .unwrap_err()
            .is_insufficient_capacity());
    }

    #[test]
    fn lifecycle_callbacks_and_shutdown() {
        let (handler, _rx) = ledger();
        let service = EventWorkerService::new(config("ledger-c"), Trade::default, handler.clone()).unwrap();
        assert_eq!(service.state(), ServiceState::Running);
        assert_eq!(service.worker_count(), 3);
        assert_eq!(service.worker_node_count(), 16);
        assert_eq!(service.virtual_node_count(), 48);
        assert!(service.shutdown());
        assert!(!service.shutdown());
        assert_eq!(service.state(), ServiceState::Terminated);

        let mut started = handler.started.lock().clone();
        started.sort();
        assert_eq!(started, vec!["ledger-c-worker-0", "ledger-c-worker-1", "ledger-c-worker-2"]);
        assert_eq!(handler.stopped.lock().len(), 3);

        let err = service.try_publish_event(1i64, (1, 1), write_trade).unwrap_err();
        assert!(matches!(err, Error::Terminated(ref name) if name == "ledger-c"));
        assert_eq!(service.queued(), 0);
    }

    #[test]
    fn round_robin_spreads_unkeyed_events() {
        let (handler, rx) = ledger();
        let mut cfg = config("ledger-d");
        cfg.selector = SelectorKind::RoundRobinMultiProducer;
        cfg.shutdown_policy = ShutdownPolicy::Drain;
        let service = EventWorkerService::new(cfg, Trade::default, handler.clone()).unwrap();
        for i in 0..30u64 {
            service.publish_event("same", (i, 1), write_trade).unwrap();
        }
        for _ in 0..30 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        let balances = handler.balances.lock();
        let workers: std::collections::HashSet<_> = balances.values().map(|(_, w)| w.clone()).collect();
        assert_eq!(workers.len(), 3);
    }

    #[test]
    fn invalid_config_fails_construction() {
        let (handler, _rx) = ledger();
        let mut cfg = config("ledger-e");
        cfg.buffer_size = 100;
        let err = EventWorkerService::new(cfg, Trade::default, handler).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }
}
