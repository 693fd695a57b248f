//! Wire messages exchanged with the dispatch service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRegistration {
    pub worker_name: String,
    /// Fully-qualified action ids (`service:step`).
    pub actions: Vec<String>,
    pub services: Vec<String>,
    /// Slot hint: how many step runs this worker accepts concurrently.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_runs: Option<u32>,
    /// Declarations of the workflows behind `actions`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workflows: Vec<WorkflowDeclaration>,
}

/// A workflow as declared to the dispatch service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDeclaration {
    /// Namespaced workflow name; also the service of its actions.
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub event_triggers: Vec<String>,
    #[serde(default)]
    pub cron_triggers: Vec<String>,
    pub steps: Vec<StepDeclaration>,
}

/// One step of a [`WorkflowDeclaration`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDeclaration {
    pub readable_id: String,
    /// Fully-qualified action id (`service:step`).
    pub action: String,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub retries: u32,
    /// Upstream execution timeout, in whole seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Registration acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredWorker {
    pub worker_id: String,
}

/// Kind of assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    StartStepRun,
    CancelStepRun,
}

/// An assignment pushed over the listen channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedAction {
    pub tenant_id: String,
    pub job_id: String,
    pub job_run_id: String,
    pub step_id: String,
    pub step_run_id: String,
    pub action_id: String,
    pub action_type: ActionType,
    /// Opaque JSON; decoded by the step context.
    #[serde(default)]
    pub action_payload: String,
}

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepEventType {
    #[serde(rename = "STEP_EVENT_TYPE_STARTED")]
    Started,
    #[serde(rename = "STEP_EVENT_TYPE_COMPLETED")]
    Completed,
    #[serde(rename = "STEP_EVENT_TYPE_FAILED")]
    Failed,
}

impl StepEventType {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for StepEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle event sent back upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionEvent {
    pub tenant_id: String,
    pub worker_id: String,
    pub job_id: String,
    pub job_run_id: String,
    pub step_id: String,
    pub step_run_id: String,
    pub action_id: String,
    pub event_timestamp: DateTime<Utc>,
    pub event_type: StepEventType,
    /// Result JSON for `completed`, error text for `failed`, empty for
    /// `started`.
    pub event_payload: String,
}

impl ActionEvent {
    /// Build an event for `action`, stamped now.
    pub fn for_assignment(
        action: &AssignedAction,
        worker_id: &str,
        event_type: StepEventType,
        event_payload: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: action.tenant_id.clone(),
            worker_id: worker_id.to_string(),
            job_id: action.job_id.clone(),
            job_run_id: action.job_run_id.clone(),
            step_id: action.step_id.clone(),
            step_run_id: action.step_run_id.clone(),
            action_id: action.action_id.clone(),
            event_timestamp: Utc::now(),
            event_type,
            event_payload: event_payload.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_uses_wire_names() {
        let raw = r#"{
            "tenantId": "t",
            "jobId": "j",
            "jobRunId": "jr",
            "stepId": "s",
            "stepRunId": "sr",
            "actionId": "svc:double",
            "actionType": "START_STEP_RUN",
            "actionPayload": "{\"input\":{}}"
        }"#;
        let action: AssignedAction = serde_json::from_str(raw).unwrap();
        assert_eq!(action.action_type, ActionType::StartStepRun);
        assert_eq!(action.step_run_id, "sr");

        let cancel: ActionType = serde_json::from_str("\"CANCEL_STEP_RUN\"").unwrap();
        assert_eq!(cancel, ActionType::CancelStepRun);
    }

    #[test]
    fn event_carries_assignment_identity() {
        let action = AssignedAction {
            tenant_id: "t".into(),
            job_id: "j".into(),
            job_run_id: "jr".into(),
            step_id: "s".into(),
            step_run_id: "sr".into(),
            action_id: "svc:step".into(),
            action_type: ActionType::StartStepRun,
            action_payload: String::new(),
        };
        let event = ActionEvent::for_assignment(&action, "w-1", StepEventType::Completed, "{}");
        assert_eq!(event.worker_id, "w-1");
        assert_eq!(event.step_run_id, "sr");
        assert!(event.event_type.is_terminal());

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventType"], "STEP_EVENT_TYPE_COMPLETED");
        assert_eq!(json["stepRunId"], "sr");
    }

    #[test]
    fn registration_omits_empty_optional_fields() {
        let registration = WorkerRegistration {
            worker_name: "w".into(),
            actions: vec!["svc:a".into()],
            services: vec!["svc".into()],
            max_runs: None,
            workflows: Vec::new(),
        };
        let json = serde_json::to_value(&registration).unwrap();
        assert_eq!(json["workerName"], "w");
        assert!(json.get("maxRuns").is_none());
        assert!(json.get("workflows").is_none());
    }
}
