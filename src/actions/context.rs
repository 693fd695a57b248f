//! Per-invocation step context.

use std::collections::HashMap;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::dispatch::AssignedAction;
use crate::error::ActionError;

/// Decoded assignment payload.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ActionPayload {
    /// Input that triggered the workflow run.
    #[serde(default)]
    pub input: Value,
    /// Outputs of completed parent steps, keyed by step name.
    #[serde(default)]
    pub parents: Option<HashMap<String, Value>>,
    /// `event`, `cron` or `manual`.
    #[serde(default, alias = "triggeredBy")]
    pub triggered_by: Option<String>,
    #[serde(default, alias = "userData")]
    pub user_data: Option<Value>,
    #[serde(default, alias = "additionalMetadata")]
    pub additional_metadata: Option<Map<String, Value>>,
}

impl ActionPayload {
    /// Decode the raw payload string of an assignment.
    pub fn decode(raw: &str) -> Result<Self, ActionError> {
        serde_json::from_str(raw).map_err(|e| ActionError::Decode(e.to_string()))
    }
}

/// Everything a step handler can see about its invocation.
#[derive(Debug, Clone)]
pub struct StepContext {
    action: AssignedAction,
    payload: ActionPayload,
    cancel: CancellationToken,
}

impl StepContext {
    /// Build a context from an assignment. Fails when the payload is not a
    /// JSON object.
    pub fn new(action: AssignedAction, cancel: CancellationToken) -> Result<Self, ActionError> {
        let payload = ActionPayload::decode(&action.action_payload)?;
        Ok(Self {
            action,
            payload,
            cancel,
        })
    }

    /// The workflow input, decoded into `T`.
    pub fn input<T: DeserializeOwned>(&self) -> Result<T, ActionError> {
        T::deserialize(&self.payload.input).map_err(|e| ActionError::Decode(e.to_string()))
    }

    pub fn raw_input(&self) -> &Value {
        &self.payload.input
    }

    /// Output of parent step `step`, decoded into `T`.
    pub fn parent_output<T: DeserializeOwned>(&self, step: &str) -> Result<T, ActionError> {
        let output = self
            .payload
            .parents
            .as_ref()
            .and_then(|parents| parents.get(step))
            .ok_or_else(|| ActionError::NotFound {
                step: step.to_string(),
            })?;
        T::deserialize(output).map_err(|e| ActionError::Decode(e.to_string()))
    }

    pub fn triggered_by_event(&self) -> bool {
        self.payload.triggered_by.as_deref() == Some("event")
    }

    /// User data attached to the step run, decoded into `T`.
    pub fn user_data<T: DeserializeOwned>(&self) -> Result<Option<T>, ActionError> {
        self.payload
            .user_data
            .as_ref()
            .map(|data| T::deserialize(data).map_err(|e| ActionError::Decode(e.to_string())))
            .transpose()
    }

    pub fn additional_metadata(&self) -> Option<&Map<String, Value>> {
        self.payload.additional_metadata.as_ref()
    }

    pub fn tenant_id(&self) -> &str {
        &self.action.tenant_id
    }

    pub fn job_run_id(&self) -> &str {
        &self.action.job_run_id
    }

    pub fn step_id(&self) -> &str {
        &self.action.step_id
    }

    pub fn step_run_id(&self) -> &str {
        &self.action.step_run_id
    }

    pub fn action_id(&self) -> &str {
        &self.action.action_id
    }

    /// Whether the dispatch service asked this step run to stop.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}
