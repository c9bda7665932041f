//! Service lifecycle state

use crossbeam::utils::CachePadded;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a service. Transitions only move forward:
/// `Constructing -> Running -> ShuttingDown -> Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ServiceState {
    /// Workers are being spawned
    Constructing = 0,
    /// Accepting submissions
    Running = 1,
    /// First `shutdown()` won; workers are winding down
    ShuttingDown = 2,
    /// Every worker thread has exited
    Terminated = 3,
}

impl ServiceState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ServiceState::Constructing,
            1 => ServiceState::Running,
            2 => ServiceState::ShuttingDown,
            _ => ServiceState::Terminated,
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceState::Constructing => "constructing",
            ServiceState::Running => "running",
            ServiceState::ShuttingDown => "shutting_down",
            ServiceState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Atomic state cell, on its own cache line: it is read by every submission.
pub(crate) struct StateCell(CachePadded<AtomicU8>);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(CachePadded::new(AtomicU8::new(ServiceState::Constructing as u8)))
    }

    #[inline]
    pub(crate) fn get(&self) -> ServiceState {
        ServiceState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move `from -> to`; false if the current state is not `from`
    pub(crate) fn transition(&self, from: ServiceState, to: ServiceState) -> bool {
        debug_assert!(to > from);
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_one_shot() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), ServiceState::Constructing);
        assert!(cell.transition(ServiceState::Constructing, ServiceState::Running));
        assert!(!cell.transition(ServiceState::Constructing, ServiceState::Running));
        assert!(cell.transition(ServiceState::Running, ServiceState::ShuttingDown));
        assert!(!cell.transition(ServiceState::Running, ServiceState::ShuttingDown));
        assert!(cell.transition(ServiceState::ShuttingDown, ServiceState::Terminated));
        assert_eq!(cell.get().to_string(), "terminated");
    }
}
