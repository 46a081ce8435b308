//! Task orchestration: range resolution, batch dispatch and per-batch
//! fetch/transform/validate/persist pipelines.

mod ports;
mod request;
mod retry;
mod runner;

pub use ports::{RecordSink, RecordSource};
pub use request::{ProgressFn, TaskRequest};
pub use retry::RetryPolicy;
pub use runner::TaskOrchestrator;
