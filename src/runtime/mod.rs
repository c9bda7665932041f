/// Worker threads and the wait strategies around them
pub mod handler;
pub mod wait;
pub mod worker;

pub use handler::EventHandler;
pub use wait::Parker;
pub use worker::{Worker, WorkerSettings};
