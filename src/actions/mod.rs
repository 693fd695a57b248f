//! Workflow declarations, the capability registry and the step context.

pub mod context;
pub mod registry;
pub mod workflow;

pub use context::{ActionPayload, StepContext};
pub use registry::{ActionRegistry, service_name};
pub use workflow::{FnHandler, Step, StepHandler, Workflow, WorkflowTrigger, step_fn};
