//! Capability registry: action id → step handler.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::actions::workflow::{StepHandler, Workflow};
use crate::dispatch::{StepDeclaration, WorkflowDeclaration};
use crate::error::ActionError;

/// Immutable mapping from `service:step` to handlers. Built once per
/// registration and replaced wholesale.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
    services: BTreeSet<String>,
    declarations: Vec<WorkflowDeclaration>,
}

impl ActionRegistry {
    /// Build the registry for `workflows`, prefixing service names with
    /// `namespace`.
    pub fn build(namespace: &str, workflows: &[Workflow]) -> Result<Self, ActionError> {
        let mut handlers = HashMap::new();
        let mut services = BTreeSet::new();
        let mut declarations = Vec::with_capacity(workflows.len());

        for workflow in workflows {
            workflow.validate()?;

            let service = service_name(namespace, &workflow.name);
            if !services.insert(service.clone()) {
                return Err(ActionError::InvalidWorkflow {
                    workflow: workflow.name.clone(),
                    reason: format!("service '{service}' is declared twice"),
                });
            }

            let mut steps = Vec::with_capacity(workflow.steps.len());
            for step in &workflow.steps {
                let action_id = format!("{service}:{}", step.name);
                tracing::debug!(action_id = %action_id, "Registered action");
                handlers.insert(action_id.clone(), Arc::clone(&step.handler));
                steps.push(StepDeclaration {
                    readable_id: step.name.clone(),
                    action: action_id,
                    parents: step.parents.clone(),
                    retries: step.retries,
                    timeout_secs: step.timeout.map(|t| t.as_secs().max(1)),
                });
            }

            declarations.push(WorkflowDeclaration {
                name: service,
                description: workflow.description.clone(),
                version: workflow.version.clone(),
                event_triggers: workflow.trigger.events.clone(),
                cron_triggers: workflow.trigger.crons.clone(),
                steps,
            });
        }

        Ok(Self {
            handlers,
            services,
            declarations,
        })
    }

    /// Get the handler for an action id.
    pub fn lookup(&self, action_id: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(action_id).map(Arc::clone)
    }

    /// All action ids, sorted.
    pub fn action_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handlers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Service names, sorted.
    pub fn services(&self) -> Vec<String> {
        self.services.iter().cloned().collect()
    }

    /// Workflow declarations in registration order.
    pub fn declarations(&self) -> &[WorkflowDeclaration] {
        &self.declarations
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.action_ids())
            .field("services", &self.services)
            .finish()
    }
}

/// Service name for a workflow: namespace + lowercased workflow name.
pub fn service_name(namespace: &str, workflow: &str) -> String {
    format!("{namespace}{}", workflow.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::workflow::{Step, step_fn};
    use crate::error::BoxError;
    use std::time::Duration;

    fn handler(tag: &'static str) -> Arc<dyn StepHandler> {
        step_fn(move |_ctx| async move { Ok::<_, BoxError>(tag) })
    }

    fn workflows() -> Vec<Workflow> {
        vec![
            Workflow::new("Svc")
                .step(Step::new("double", handler("double")))
                .step(Step::new("square", handler("square")).with_parents(["double"])),
            Workflow::new("reports").step(Step::new("render", handler("render"))),
        ]
    }

    #[test]
    fn builds_composite_action_ids() {
        let registry = ActionRegistry::build("", &workflows()).unwrap();
        assert_eq!(
            registry.action_ids(),
            vec!["reports:render", "svc:double", "svc:square"]
        );
        assert_eq!(registry.services(), vec!["reports", "svc"]);
        assert_eq!(registry.len(), 3);
        assert!(registry.lookup("svc:double").is_some());
        assert!(registry.lookup("svc:missing").is_none());
    }

    #[test]
    fn namespace_prefixes_services() {
        let registry = ActionRegistry::build("staging_", &workflows()).unwrap();
        assert!(registry.lookup("staging_svc:double").is_some());
        assert!(registry.lookup("svc:double").is_none());
        assert_eq!(registry.declarations()[1].name, "staging_reports");
        assert_eq!(
            registry.declarations()[1].steps[0].action,
            "staging_reports:render"
        );
    }

    #[test]
    fn declarations_carry_step_settings() {
        let wfs = vec![
            Workflow::new("Etl")
                .with_description("nightly load")
                .with_version("v2")
                .on_event("user:created")
                .on_cron("0 3 * * *")
                .step(Step::new("extract", handler("extract")).with_retries(2))
                .step(
                    Step::new("load", handler("load"))
                        .with_parents(["extract"])
                        .with_timeout(Duration::from_secs(90)),
                ),
        ];
        let registry = ActionRegistry::build("", &wfs).unwrap();
        let decl = &registry.declarations()[0];
        assert_eq!(decl.name, "etl");
        assert_eq!(decl.description, "nightly load");
        assert_eq!(decl.version.as_deref(), Some("v2"));
        assert_eq!(decl.event_triggers, vec!["user:created"]);
        assert_eq!(decl.cron_triggers, vec!["0 3 * * *"]);

        assert_eq!(decl.steps[0].retries, 2);
        assert_eq!(decl.steps[0].timeout_secs, None);
        assert_eq!(decl.steps[1].action, "etl:load");
        assert_eq!(decl.steps[1].parents, vec!["extract"]);
        assert_eq!(decl.steps[1].timeout_secs, Some(90));
    }

    #[test]
    fn duplicate_workflows_are_rejected() {
        let wfs = vec![
            Workflow::new("svc").step(Step::new("a", handler("a"))),
            Workflow::new("SVC").step(Step::new("b", handler("b"))),
        ];
        assert!(matches!(
            ActionRegistry::build("", &wfs),
            Err(ActionError::InvalidWorkflow { .. })
        ));
    }

    #[test]
    fn empty_registry() {
        let registry = ActionRegistry::build("", &[]).unwrap();
        assert!(registry.is_empty());
        assert!(registry.services().is_empty());
    }

    #[tokio::test]
    async fn looked_up_handler_runs() {
        use crate::actions::context::StepContext;
        use crate::dispatch::{ActionType, AssignedAction};
        use tokio_util::sync::CancellationToken;

        let registry = ActionRegistry::build("", &workflows()).unwrap();
        let ctx = StepContext::new(
            AssignedAction {
                tenant_id: "t".into(),
                job_id: "j".into(),
                job_run_id: "jr".into(),
                step_id: "s".into(),
                step_run_id: "sr".into(),
                action_id: "svc:square".into(),
                action_type: ActionType::StartStepRun,
                action_payload: "{}".into(),
            },
            CancellationToken::new(),
        )
        .unwrap();
        let out = registry.lookup("svc:square").unwrap().run(ctx).await.unwrap();
        assert_eq!(out, serde_json::json!("square"));
    }
}
