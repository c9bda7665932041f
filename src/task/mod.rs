/// Task mode: futures, envelopes and the task-executing handler
pub mod envelope;
pub mod future;

pub use envelope::{Envelope, TaskEnvelope, TaskHandler, TaskScope, TaskSlot};
pub use future::{pending, Promise, TaskFuture};
