//! Contract with the remote dispatch service.
//!
//! The concrete transport (gRPC, websockets, an in-process loopback for
//! tests) lives outside this crate and plugs in through [`Dispatcher`].

pub mod types;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::DispatchError;

pub use types::{
    ActionEvent, ActionType, AssignedAction, RegisteredWorker, StepDeclaration, StepEventType,
    WorkerRegistration, WorkflowDeclaration,
};

/// Server-push stream of assignments for one registered worker.
pub type AssignmentStream =
    Pin<Box<dyn Stream<Item = Result<AssignedAction, DispatchError>> + Send>>;

/// Transport to the dispatch service.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Declare the worker and its runnable actions.
    async fn register(
        &self,
        registration: WorkerRegistration,
    ) -> Result<RegisteredWorker, DispatchError>;

    /// Open the listen channel for a registered worker.
    async fn listen(&self, worker_id: &str) -> Result<AssignmentStream, DispatchError>;

    /// Report a lifecycle event for a step run.
    async fn send_event(&self, event: ActionEvent) -> Result<(), DispatchError>;

    /// Close the listen channel for a worker.
    async fn unsubscribe(&self, worker_id: &str) -> Result<(), DispatchError>;
}
