//! Worker runtime.
//!
//! - `state` — lifecycle state machine (Created → Registering → Listening ⇄ Reconnecting)
//! - `in_flight` — step runs currently executing, keyed by step-run id
//! - `worker` — registration, the listen loop and per-assignment execution
//! - `signals` — Ctrl+C / SIGTERM mapped onto `stop()`

pub mod in_flight;
pub mod signals;
pub mod state;
pub mod worker;

pub use in_flight::{InFlightHandle, InFlightTable};
pub use signals::run_until_signal;
pub use state::WorkerState;
pub use worker::{ActionWorker, ShutdownPolicy, WorkerOptions};
