//! Wait strategies for producers (channel full) and consumers (channel empty)

use crate::constants::{PRODUCER_PARK_TIMEOUT_US, WORKER_PARK_TIMEOUT_MS};
use crate::core::types::WaitPolicy;
use crossbeam::utils::{Backoff, CachePadded};
use std::sync::atomic::{fence, AtomicBool, Ordering};
use std::sync::OnceLock;
use std::thread::Thread;
use std::time::Duration;

/// Producer-side waiting while the target channel is full.
///
/// Producers are never woken explicitly, so `Parking` parks with a short
/// timeout and re-checks.
pub(crate) struct ProducerWait {
    policy: WaitPolicy,
    backoff: Backoff,
}

impl ProducerWait {
    pub(crate) fn new(policy: WaitPolicy) -> Self {
        Self { policy, backoff: Backoff::new() }
    }

    #[inline]
    pub(crate) fn wait(&mut self) {
        match self.policy {
            WaitPolicy::Spinning => self.backoff.snooze(),
            WaitPolicy::Yielding => std::thread::yield_now(),
            WaitPolicy::Parking => {
                if self.backoff.is_completed() {
                    std::thread::park_timeout(Duration::from_micros(PRODUCER_PARK_TIMEOUT_US));
                } else {
                    self.backoff.snooze();
                }
            }
        }
    }
}

/// Wake-up handshake between producers and one consumer thread.
///
/// The consumer announces that it is about to park, re-checks its channel
/// and parks; a producer that publishes afterwards sees the announcement and
/// unparks it. Both sides fence so at least one of them observes the other.
pub struct Parker {
    sleeping: CachePadded<AtomicBool>,
    thread: OnceLock<Thread>,
}

impl Parker {
    pub(crate) fn new() -> Self {
        Self {
            sleeping: CachePadded::new(AtomicBool::new(false)),
            thread: OnceLock::new(),
        }
    }

    /// Bind the parker to the calling (consumer) thread
    pub(crate) fn register_current(&self) {
        let _ = self.thread.set(std::thread::current());
    }

    /// Producer side: wake the consumer if it announced a park
    #[inline]
    pub(crate) fn notify(&self) {
        fence(Ordering::SeqCst);
        if self.sleeping.load(Ordering::Relaxed) && self.sleeping.swap(false, Ordering::AcqRel) {
            self.unpark();
        }
    }

    /// Unconditional wake, used on shutdown
    pub(crate) fn unpark(&self) {
        if let Some(thread) = self.thread.get() {
            thread.unpark();
        }
    }

    /// Consumer side: park unless `has_work` turns true after the announcement
    pub(crate) fn park_unless(&self, has_work: impl Fn() -> bool) {
        self.sleeping.store(true, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        if !has_work() {
            std::thread::park_timeout(Duration::from_millis(WORKER_PARK_TIMEOUT_MS));
        }
        self.sleeping.store(false, Ordering::Relaxed);
    }
}

/// Consumer-side idling while the channel is empty
pub(crate) struct ConsumerWait {
    policy: WaitPolicy,
    backoff: Backoff,
}

impl ConsumerWait {
    pub(crate) fn new(policy: WaitPolicy) -> Self {
        Self { policy, backoff: Backoff::new() }
    }

    /// Work was found, start the next idle period from scratch
    #[inline]
    pub(crate) fn reset(&self) {
        self.backoff.reset();
    }

    #[inline]
    pub(crate) fn idle(&self, parker: &Parker, has_work: impl Fn() -> bool) {
        match self.policy {
            WaitPolicy::Spinning => self.backoff.snooze(),
            WaitPolicy::Yielding => std::thread::yield_now(),
            WaitPolicy::Parking => parker.park_unless(has_work),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn notify_wakes_parked_consumer() {
        let parker = Arc::new(Parker::new());
        let flag = Arc::new(AtomicBool::new(false));
        let consumer = {
            let parker = Arc::clone(&parker);
            let flag = Arc::clone(&flag);
            std::thread::spawn(move || {
                parker.register_current();
                let start = Instant::now();
                while !flag.load(Ordering::Acquire) {
                    parker.park_unless(|| flag.load(Ordering::Acquire));
                }
                start.elapsed()
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        flag.store(true, Ordering::Release);
        parker.notify();
        let waited = consumer.join().unwrap();
        assert!(waited < Duration::from_secs(5));
    }

    #[test]
    fn park_skipped_when_work_is_visible() {
        let parker = Parker::new();
        parker.register_current();
        let start = Instant::now();
        parker.park_unless(|| true);
        assert!(start.elapsed() < Duration::from_millis(WORKER_PARK_TIMEOUT_MS));
        assert!(!parker.sleeping.load(Ordering::Relaxed));
    }

    #[test]
    fn producer_wait_policies_return() {
        for policy in [WaitPolicy::Spinning, WaitPolicy::Yielding, WaitPolicy::Parking] {
            let mut wait = ProducerWait::new(policy);
            for _ in 0..16 {
                wait.wait();
            }
        }
    }
}
