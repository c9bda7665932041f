//! Single-consumer worker: one bounded channel drained by one dedicated thread
//!
//! Producers publish into the channel from any thread; the worker thread
//! pulls batches in publish order and hands each slot to its
//! [`EventHandler`]. A worker never runs two events concurrently.

use crate::core::error::{panic_message, Error, Result};
use crate::core::types::{ShutdownPolicy, WaitPolicy};
use crate::runtime::handler::EventHandler;
use crate::runtime::wait::{ConsumerWait, Parker, ProducerWait};
use crate::structures::ring::{BoundedChannel, ChannelConsumer};
use crossbeam::utils::CachePadded;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Per-worker settings fixed at spawn time
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    /// Channel capacity (rounded up to a power of two)
    pub capacity: usize,
    /// How blocked producers wait
    pub producer_wait: WaitPolicy,
    /// How the idle consumer waits
    pub consumer_wait: WaitPolicy,
    /// Events handled per consumer iteration
    pub batch_size_limit: usize,
    /// Fate of queued events on shutdown
    pub shutdown_policy: ShutdownPolicy,
}

/// State shared between producers and the worker thread.
///
/// `alive` and `in_flight` sit on their own cache lines: `in_flight` is
/// bumped by every submission, `alive` is read by every submission.
struct WorkerShared {
    alive: CachePadded<AtomicBool>,
    in_flight: CachePadded<AtomicUsize>,
    parker: Parker,
}

/// Counts a producer between its liveness check and the end of its publish,
/// so the worker can tell when no late publish is still possible.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle to one worker thread and its channel
pub struct Worker<E> {
    name: String,
    channel: Arc<BoundedChannel<E>>,
    shared: Arc<WorkerShared>,
    producer_wait: WaitPolicy,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl<E: Send + 'static> Worker<E> {
    /// Allocate the channel and start the worker thread
    pub fn spawn<H>(
        name: impl Into<String>,
        settings: WorkerSettings,
        factory: impl FnMut() -> E,
        handler: H,
    ) -> Result<Self>
    where
        H: EventHandler<E>,
    {
        let name = name.into();
        let (channel, consumer) = BoundedChannel::with_capacity_pow2(settings.capacity, factory);
        let shared = Arc::new(WorkerShared {
            alive: CachePadded::new(AtomicBool::new(true)),
            in_flight: CachePadded::new(AtomicUsize::new(0)),
            parker: Parker::new(),
        });

        let thread = {
            let thread_name = name.clone();
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || run_consumer(thread_name, consumer, handler, shared, settings))
                .map_err(|source| Error::Spawn { name: name.clone(), source })?
        };

        Ok(Self {
            name,
            channel,
            shared,
            producer_wait: settings.producer_wait,
            thread: Mutex::new(Some(thread)),
        })
    }

    fn enter(&self) -> Result<InFlight<'_>> {
        self.shared.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlight(&self.shared.in_flight);
        if !self.shared.alive.load(Ordering::SeqCst) {
            return Err(Error::WorkerDead(self.name.clone()));
        }
        Ok(guard)
    }

    fn insufficient_capacity(&self) -> Error {
        Error::InsufficientCapacity {
            worker: self.name.clone(),
            capacity: self.channel.capacity(),
        }
    }

    /// Publish one event, waiting per the producer wait policy while the
    /// channel is full. Fails with [`Error::WorkerDead`] once shut down.
    pub fn publish_with<A, F>(&self, arg: A, translate: F) -> Result<u64>
    where
        F: FnOnce(&mut E, A),
    {
        let _in_flight = self.enter()?;
        let mut translate = Some(translate);
        let mut arg = arg;
        let mut wait = ProducerWait::new(self.producer_wait);
        loop {
            let published = self.channel.try_publish_with(arg, |slot, a| {
                if let Some(t) = translate.take() {
                    t(slot, a);
                }
            });
            match published {
                Ok(seq) => {
                    self.shared.parker.notify();
                    return Ok(seq);
                }
                Err(back) => {
                    if !self.is_alive() {
                        return Err(Error::WorkerDead(self.name.clone()));
                    }
                    arg = back;
                    wait.wait();
                }
            }
        }
    }

    /// Publish one event without waiting. A full channel fails with
    /// [`Error::InsufficientCapacity`] and leaves the channel untouched.
    pub fn try_publish_with<A, F>(&self, arg: A, translate: F) -> Result<u64>
    where
        F: FnOnce(&mut E, A),
    {
        let _in_flight = self.enter()?;
        match self.channel.try_publish_with(arg, translate) {
            Ok(seq) => {
                self.shared.parker.notify();
                Ok(seq)
            }
            Err(_) => Err(self.insufficient_capacity()),
        }
    }

    /// Publish several events into contiguous slots, waiting for room.
    pub fn publish_batch_with<A, F>(&self, args: Vec<A>, mut translate: F) -> Result<u64>
    where
        F: FnMut(&mut E, A),
    {
        if args.len() > self.channel.capacity() {
            return Err(self.insufficient_capacity());
        }
        let _in_flight = self.enter()?;
        let mut args = args;
        let mut wait = ProducerWait::new(self.producer_wait);
        loop {
            match self.channel.try_publish_batch_with(args, &mut translate) {
                Ok(seq) => {
                    self.shared.parker.notify();
                    return Ok(seq);
                }
                Err(back) => {
                    if !self.is_alive() {
                        return Err(Error::WorkerDead(self.name.clone()));
                    }
                    args = back;
                    wait.wait();
                }
            }
        }
    }

    /// All-or-nothing batch publish without waiting
    pub fn try_publish_batch_with<A, F>(&self, args: Vec<A>, translate: F) -> Result<u64>
    where
        F: FnMut(&mut E, A),
    {
        let _in_flight = self.enter()?;
        match self.channel.try_publish_batch_with(args, translate) {
            Ok(seq) => {
                self.shared.parker.notify();
                Ok(seq)
            }
            Err(_) => Err(self.insufficient_capacity()),
        }
    }
}

impl<E> Worker<E> {
    /// Worker (and thread) name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Channel capacity
    pub fn capacity(&self) -> usize {
        self.channel.capacity()
    }

    /// Events queued and not yet handled
    pub fn queued(&self) -> usize {
        self.channel.len()
    }

    /// Whether the worker still accepts events
    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::Acquire)
    }

    /// Stop accepting events and wake the thread so it can wind down.
    /// Returns true for the call that performed the transition.
    pub fn shutdown(&self) -> bool {
        let won = self
            .shared
            .alive
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if won {
            self.shared.parker.unpark();
        }
        won
    }

    /// Wait for the worker thread to exit. No-op when already joined or when
    /// called from the worker thread itself.
    pub fn join(&self) {
        let handle = {
            let mut slot = self.thread.lock();
            match slot.as_ref() {
                Some(h) if h.thread().id() == std::thread::current().id() => None,
                _ => slot.take(),
            }
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!(worker = %self.name, "worker thread panicked");
            }
        }
    }
}

impl<E> Drop for Worker<E> {
    fn drop(&mut self) {
        self.shutdown();
        self.join();
    }
}

fn dispatch<E, H: EventHandler<E>>(handler: &mut H, worker: &str, event: &mut E, sequence: u64, end_of_batch: bool) {
    let outcome = catch_unwind(AssertUnwindSafe(|| handler.on_event(worker, event, sequence, end_of_batch)));
    let error = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e,
        Err(payload) => anyhow::anyhow!("event handler panicked: {}", panic_message(payload.as_ref())),
    };
    if catch_unwind(AssertUnwindSafe(|| handler.on_error(worker, event, sequence, error))).is_err() {
        tracing::error!(worker, sequence, "error handler panicked");
    }
}

fn discard<E, H: EventHandler<E>>(handler: &mut H, worker: &str, event: &mut E, sequence: u64) {
    if catch_unwind(AssertUnwindSafe(|| handler.on_discard(worker, event, sequence))).is_err() {
        tracing::error!(worker, sequence, "on_discard panicked");
    }
}

fn run_consumer<E, H: EventHandler<E>>(
    name: String,
    mut consumer: ChannelConsumer<E>,
    mut handler: H,
    shared: Arc<WorkerShared>,
    settings: WorkerSettings,
) {
    shared.parker.register_current();
    tracing::info!(worker = %name, capacity = consumer.channel().capacity(), "worker started");
    if catch_unwind(AssertUnwindSafe(|| handler.on_start(&name))).is_err() {
        tracing::error!(worker = %name, "on_start panicked");
    }

    let wait = ConsumerWait::new(settings.consumer_wait);
    let limit = settings.batch_size_limit.max(1);
    let discard_on_stop = settings.shutdown_policy == ShutdownPolicy::Discard;
    while shared.alive.load(Ordering::Acquire) {
        // a batch can outlive the alive flag; under Discard its unstarted tail is discarded
        let handled = consumer.consume_batch(limit, |event, seq, end| {
            if discard_on_stop && !shared.alive.load(Ordering::Acquire) {
                discard(&mut handler, &name, event, seq);
            } else {
                dispatch(&mut handler, &name, event, seq, end);
            }
        });
        if handled > 0 {
            wait.reset();
        } else {
            wait.idle(&shared.parker, || {
                !consumer.is_empty() || !shared.alive.load(Ordering::Acquire)
            });
        }
    }

    // Shutdown: handle what is queued, then keep going until no producer
    // that passed the liveness check can still publish.
    let mut remaining = 0usize;
    loop {
        let in_flight = shared.in_flight.load(Ordering::SeqCst);
        let handled = match settings.shutdown_policy {
            ShutdownPolicy::Drain => consumer.consume_batch(limit, |event, seq, end| {
                dispatch(&mut handler, &name, event, seq, end)
            }),
            ShutdownPolicy::Discard => {
                consumer.consume_batch(limit, |event, seq, _| discard(&mut handler, &name, event, seq))
            }
        };
        remaining += handled;
        if handled == 0 {
            if in_flight == 0 {
                break;
            }
            std::thread::yield_now();
        }
    }

    if catch_unwind(AssertUnwindSafe(|| handler.on_shutdown(&name))).is_err() {
        tracing::error!(worker = %name, "on_shutdown panicked");
    }
    tracing::info!(worker = %name, policy = ?settings.shutdown_policy, remaining, "worker stopped");
}
