//! Public façades: keyed event publishing and keyed task execution

pub mod event_service;
pub mod state;
pub mod worker_service;

pub use event_service::EventWorkerService;
pub use state::ServiceState;
pub use worker_service::{WorkerService, WorkerServiceBuilder};
