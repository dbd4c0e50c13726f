//! Out-of-process model worker.
//!
//! The parent spawns this process, waits for `MODEL_READY` on stderr and
//! then exchanges JSON lines over stdin/stdout, one response per request.

pub mod ipc_types;
pub mod request_loop;
pub mod worker_main;

pub use ipc_types::{WorkerRequest, WorkerResponse};
pub use request_loop::{LoopSummary, RequestLoop};
pub use worker_main::{run_with, run_worker, Stdio, WorkerState};
