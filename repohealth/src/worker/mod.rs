//! Off-request-path execution of pipelines.

mod handle;
mod pool;

pub use handle::{completion, Completer, JobHandle, Outcome};
pub use pool::{ShutdownMode, WorkerPool};
