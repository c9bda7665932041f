//! Consumer-side callbacks run on a worker thread

/// Processes events dequeued by one worker.
///
/// Each worker owns its own handler instance (cloned from a prototype), so
/// implementations may keep per-worker state without synchronisation. All
/// callbacks run on the worker thread.
pub trait EventHandler<E>: Send + 'static {
    /// Called once on the worker thread before the first event
    fn on_start(&mut self, _worker: &str) {}

    /// Handle one event in place.
    ///
    /// `end_of_batch` is true for the last event of the batch the consumer
    /// pulled in this iteration. Errors and panics are routed to
    /// [`on_error`](Self::on_error); they never stop the worker.
    fn on_event(&mut self, worker: &str, event: &mut E, sequence: u64, end_of_batch: bool) -> anyhow::Result<()>;

    /// Called when `on_event` failed or panicked for `event`
    fn on_error(&mut self, worker: &str, _event: &mut E, sequence: u64, error: anyhow::Error) {
        tracing::warn!(worker, sequence, error = %error, "event handler failed");
    }

    /// Called once on the worker thread after the last event
    fn on_shutdown(&mut self, _worker: &str) {}

    /// Dispose of an event that was queued but will never be handled
    /// (discard-on-shutdown). The default leaves the slot untouched.
    fn on_discard(&mut self, _worker: &str, _event: &mut E, _sequence: u64) {}
}
