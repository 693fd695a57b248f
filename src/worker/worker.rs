//! Action-execution worker: registration, the listen loop and per-assignment
//! execution.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::actions::{ActionRegistry, StepContext, StepHandler, Workflow};
use crate::config::ClientConfig;
use crate::dispatch::{
    ActionEvent, ActionType, AssignedAction, AssignmentStream, Dispatcher, StepEventType,
    WorkerRegistration,
};
use crate::error::{ActionError, DispatchError, ProtocolError, WorkerError};
use crate::retry::{RetryPolicy, retry};
use crate::worker::in_flight::{InFlightHandle, InFlightTable};
use crate::worker::state::WorkerState;

/// What `stop()` does about executions that are still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPolicy {
    /// Return as soon as the listen channel is closed.
    Immediate,
    /// Wait for in-flight executions, then cancel whatever is left.
    Drain { timeout: Duration },
}

/// Runtime knobs of a worker.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Slot hint sent with the registration.
    pub max_runs: Option<u32>,
    /// Backoff used when the listen channel drops.
    pub reconnect: RetryPolicy,
    pub shutdown: ShutdownPolicy,
    /// Exit the process once a signal-triggered stop completes.
    pub exit_on_stop: bool,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            max_runs: None,
            reconnect: RetryPolicy::default(),
            shutdown: ShutdownPolicy::Drain {
                timeout: Duration::from_secs(30),
            },
            exit_on_stop: false,
        }
    }
}

/// How a listen channel ended.
enum ChannelEnd {
    Shutdown,
    Closed,
    Error(DispatchError),
}

/// Shared dependencies for spawned executions.
#[derive(Clone)]
struct ExecutionDeps {
    dispatcher: Arc<dyn Dispatcher>,
    in_flight: Arc<InFlightTable>,
    worker_id: String,
}

/// Worker that serves the actions of its registered workflows.
///
/// Share it behind an `Arc`: `start()` runs until shutdown while `stop()` is
/// called from elsewhere.
pub struct ActionWorker {
    name: String,
    config: Arc<ClientConfig>,
    dispatcher: Arc<dyn Dispatcher>,
    options: WorkerOptions,
    registry: RwLock<Arc<ActionRegistry>>,
    in_flight: Arc<InFlightTable>,
    state: RwLock<WorkerState>,
    worker_id: RwLock<Option<String>>,
    shutting_down: AtomicBool,
    shutdown: CancellationToken,
}

impl ActionWorker {
    /// Create a worker with an empty registry.
    pub fn new(
        name: impl Into<String>,
        config: Arc<ClientConfig>,
        dispatcher: Arc<dyn Dispatcher>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            dispatcher,
            options,
            registry: RwLock::new(Arc::new(ActionRegistry::default())),
            in_flight: Arc::new(InFlightTable::new()),
            state: RwLock::new(WorkerState::Created),
            worker_id: RwLock::new(None),
            shutting_down: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    /// Replace the registry with one built from `workflows`. Takes effect at
    /// the next registration.
    pub async fn register_workflows(&self, workflows: Vec<Workflow>) -> Result<(), ActionError> {
        let registry = ActionRegistry::build(&self.config.namespace, &workflows)?;
        tracing::info!(
            worker = %self.name,
            actions = registry.len(),
            services = ?registry.services(),
            "Registered workflows"
        );
        *self.registry.write().await = Arc::new(registry);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    /// Id assigned by the dispatch service on the last registration.
    pub async fn worker_id(&self) -> Option<String> {
        self.worker_id.read().await.clone()
    }

    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.len().await
    }

    /// Token that ends the listen loop when cancelled. Cancelling it has the
    /// same effect as calling `stop()`.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Register, listen and serve assignments until shutdown.
    ///
    /// The first registration is attempted once; its failure is fatal. Later
    /// channel drops are retried with backoff and only an exhausted budget
    /// is returned as an error.
    pub async fn start(&self) -> Result<(), WorkerError> {
        {
            let mut state = self.state.write().await;
            if *state != WorkerState::Created {
                return Err(WorkerError::AlreadyStarted {
                    name: self.name.clone(),
                });
            }
            *state = WorkerState::Registering;
        }

        tracing::info!(
            worker = %self.name,
            tenant_id = %self.config.tenant_id,
            host_port = %self.config.host_port,
            "Starting worker"
        );

        // Registration may hang; shutdown must still hand control back.
        let connected = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            result = self.connect() => Some(result),
        };
        match connected {
            None => {}
            Some(Err(_)) if self.shutdown.is_cancelled() => {}
            Some(Err(e)) => {
                self.transition(WorkerState::Failed).await;
                tracing::error!(worker = %self.name, error = %e, "Worker registration failed");
                return Err(WorkerError::Registration {
                    name: self.name.clone(),
                    source: e,
                });
            }
            Some(Ok(stream)) => {
                self.transition(WorkerState::Listening).await;
                self.serve(stream).await?;
            }
        }

        // Shutdown token cancelled by the embedding application.
        if !self.shutting_down.load(Ordering::SeqCst) {
            self.stop().await;
        }
        Ok(())
    }

    /// Consume listen channels until shutdown, reconnecting whenever one
    /// drops.
    async fn serve(&self, mut stream: AssignmentStream) -> Result<(), WorkerError> {
        loop {
            match self.consume(stream).await {
                ChannelEnd::Shutdown => return Ok(()),
                ChannelEnd::Closed => {
                    tracing::info!(worker = %self.name, "Listen channel closed by server");
                }
                ChannelEnd::Error(e) => {
                    tracing::warn!(worker = %self.name, error = %e, "Listen channel failed");
                }
            }
            if self.shutdown.is_cancelled() {
                return Ok(());
            }

            self.transition(WorkerState::Reconnecting).await;
            let reconnected = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(()),
                result = retry(&self.options.reconnect, "reconnect", move || self.reconnect_attempt()) => result,
            };

            match reconnected {
                Ok(next) => {
                    self.transition(WorkerState::Listening).await;
                    tracing::info!(worker = %self.name, "Reconnected");
                    stream = next;
                }
                Err(e) => {
                    self.transition(WorkerState::Failed).await;
                    return Err(WorkerError::ReconnectExhausted {
                        name: self.name.clone(),
                        attempts: self.options.reconnect.max_attempts.max(1),
                        source: e,
                    });
                }
            }
        }
    }

    /// Stop accepting assignments, close the listen channel and apply the
    /// shutdown policy. Idempotent.
    pub async fn stop(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.transition(WorkerState::Draining).await;
        self.shutdown.cancel();

        if let Some(worker_id) = self.worker_id().await {
            if let Err(e) = self.dispatcher.unsubscribe(&worker_id).await {
                tracing::warn!(worker = %self.name, error = %e, "Failed to unsubscribe");
            }
        }

        match self.options.shutdown {
            ShutdownPolicy::Immediate => {
                let running = self.in_flight.len().await;
                if running > 0 {
                    tracing::info!(
                        worker = %self.name,
                        running,
                        "Stopping without waiting for in-flight executions"
                    );
                }
            }
            ShutdownPolicy::Drain { timeout } => {
                if !self.in_flight.wait_empty(timeout).await {
                    let cancelled = self.in_flight.cancel_all().await;
                    tracing::warn!(
                        worker = %self.name,
                        cancelled,
                        timeout_secs = timeout.as_secs_f64(),
                        "Drain timed out, cancelled remaining executions"
                    );
                }
            }
        }

        self.transition(WorkerState::Stopped).await;
        tracing::info!(worker = %self.name, "Worker stopped");
    }

    async fn transition(&self, target: WorkerState) -> bool {
        let mut state = self.state.write().await;
        if !state.can_transition_to(target) {
            tracing::debug!(from = %*state, to = %target, "Ignoring state transition");
            return false;
        }
        tracing::debug!(worker = %self.name, from = %*state, to = %target, "Worker state changed");
        *state = target;
        true
    }

    /// Register the current registry and open the listen channel.
    async fn connect(&self) -> Result<AssignmentStream, DispatchError> {
        let registry = Arc::clone(&*self.registry.read().await);
        let registration = WorkerRegistration {
            worker_name: self.name.clone(),
            actions: registry.action_ids(),
            services: registry.services(),
            max_runs: self.options.max_runs,
            workflows: registry.declarations().to_vec(),
        };

        let registered = self.dispatcher.register(registration).await?;
        tracing::info!(
            worker = %self.name,
            worker_id = %registered.worker_id,
            actions = registry.len(),
            "Worker registered"
        );
        *self.worker_id.write().await = Some(registered.worker_id.clone());

        self.dispatcher.listen(&registered.worker_id).await
    }

    async fn reconnect_attempt(&self) -> Result<AssignmentStream, DispatchError> {
        self.transition(WorkerState::Registering).await;
        let result = self.connect().await;
        if result.is_err() {
            self.transition(WorkerState::Reconnecting).await;
        }
        result
    }

    /// Drain the listen channel. Never awaits a handler.
    async fn consume(&self, mut stream: AssignmentStream) -> ChannelEnd {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return ChannelEnd::Shutdown,
                next = stream.next() => match next {
                    Some(Ok(action)) => self.handle_assignment(action).await,
                    Some(Err(e)) => return ChannelEnd::Error(e),
                    None => return ChannelEnd::Closed,
                },
            }
        }
    }

    async fn handle_assignment(&self, action: AssignedAction) {
        match action.action_type {
            ActionType::StartStepRun => self.handle_start(action).await,
            ActionType::CancelStepRun => self.handle_cancel(&action).await,
        }
    }

    async fn handle_start(&self, action: AssignedAction) {
        let handler = self.registry.read().await.lookup(&action.action_id);
        let Some(handler) = handler else {
            let err = ProtocolError::UnknownAction {
                action_id: action.action_id.clone(),
            };
            tracing::warn!(
                tenant_id = %action.tenant_id,
                job_run_id = %action.job_run_id,
                step_run_id = %action.step_run_id,
                error = %err,
                "Dropping assignment"
            );
            return;
        };

        let handle = match self
            .in_flight
            .insert(&action.step_run_id, &action.action_id)
            .await
        {
            Ok(handle) => handle,
            Err(err) => {
                tracing::warn!(
                    tenant_id = %action.tenant_id,
                    job_run_id = %action.job_run_id,
                    action_id = %action.action_id,
                    error = %err,
                    "Dropping assignment"
                );
                return;
            }
        };

        let deps = ExecutionDeps {
            dispatcher: Arc::clone(&self.dispatcher),
            in_flight: Arc::clone(&self.in_flight),
            worker_id: self.worker_id().await.unwrap_or_default(),
        };
        tokio::spawn(execute(deps, action, handler, handle));
    }

    async fn handle_cancel(&self, action: &AssignedAction) {
        if self.in_flight.cancel(&action.step_run_id).await {
            tracing::info!(
                tenant_id = %action.tenant_id,
                job_run_id = %action.job_run_id,
                step_run_id = %action.step_run_id,
                action_id = %action.action_id,
                "Cancellation requested"
            );
        } else {
            tracing::debug!(
                step_run_id = %action.step_run_id,
                "Cancel for unknown step run ignored"
            );
        }
    }
}

/// One execution: `started`, the handler, then exactly one terminal event.
async fn execute(
    deps: ExecutionDeps,
    action: AssignedAction,
    handler: Arc<dyn StepHandler>,
    handle: InFlightHandle,
) {
    emit(&deps, &action, StepEventType::Started, String::new()).await;

    let outcome = run_handler(&action, handler, handle.cancel).await;

    let (event_type, payload) = match outcome {
        Ok(output) => (StepEventType::Completed, output.to_string()),
        Err(e) => {
            tracing::warn!(
                tenant_id = %action.tenant_id,
                job_run_id = %action.job_run_id,
                step_run_id = %action.step_run_id,
                action_id = %action.action_id,
                error = %e,
                "Step run failed"
            );
            (StepEventType::Failed, e.to_string())
        }
    };
    emit(&deps, &action, event_type, payload).await;

    deps.in_flight
        .remove(&action.step_run_id, handle.generation)
        .await;
}

/// Decode the context and run the handler on its own task, racing its
/// cancellation token. Panics surface as `Panicked`.
async fn run_handler(
    action: &AssignedAction,
    handler: Arc<dyn StepHandler>,
    cancel: CancellationToken,
) -> Result<serde_json::Value, ActionError> {
    let ctx = StepContext::new(action.clone(), cancel.clone())?;
    let mut task = tokio::spawn(async move { handler.run(ctx).await });

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            task.abort();
            Err(ActionError::Cancelled)
        }
        joined = &mut task => match joined {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(ActionError::Handler(e.to_string())),
            Err(e) if e.is_panic() => Err(ActionError::Panicked(panic_message(e.into_panic()))),
            Err(e) => Err(ActionError::Handler(e.to_string())),
        },
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Send a lifecycle event. Failures are logged, never retried.
async fn emit(
    deps: &ExecutionDeps,
    action: &AssignedAction,
    event_type: StepEventType,
    payload: String,
) {
    let event = ActionEvent::for_assignment(action, &deps.worker_id, event_type, payload);
    if let Err(e) = deps.dispatcher.send_event(event).await {
        tracing::warn!(
            tenant_id = %action.tenant_id,
            job_run_id = %action.job_run_id,
            step_run_id = %action.step_run_id,
            action_id = %action.action_id,
            event = %event_type,
            error = %e,
            "Failed to emit lifecycle event"
        );
    } else {
        tracing::debug!(
            step_run_id = %action.step_run_id,
            event = %event_type,
            "Emitted lifecycle event"
        );
    }
}
