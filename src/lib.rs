//! Action worker — client-side agent for a workflow dispatch service.
//!
//! A worker declares the actions it can run, listens for assignments, runs
//! each one concurrently and reports started/completed/failed events back.

pub mod actions;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod retry;
pub mod worker;

pub use actions::{ActionRegistry, Step, StepContext, StepHandler, Workflow, step_fn};
pub use config::{ClientConfig, ClientConfigOverrides, ConfigFileSpec, ConfigResolver, EnvSnapshot};
pub use dispatch::{AssignmentStream, Dispatcher};
pub use error::{Error, Result};
pub use worker::{ActionWorker, ShutdownPolicy, WorkerOptions, WorkerState, run_until_signal};
