//! Workflow declarations and the step handler trait.

use std::future::Future;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;

use crate::actions::context::StepContext;
use crate::error::{ActionError, BoxError};

/// Allowed characters in workflow and step names.
static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("static regex"));

/// A local handler for one step.
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Run the step. The returned value becomes the `completed` event payload.
    async fn run(&self, ctx: StepContext) -> Result<serde_json::Value, BoxError>;
}

/// Adapter turning an async closure into a [`StepHandler`].
pub struct FnHandler<F, T> {
    f: F,
    _output: PhantomData<fn() -> T>,
}

#[async_trait]
impl<F, Fut, T> StepHandler for FnHandler<F, T>
where
    F: Fn(StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    T: Serialize + Send + 'static,
{
    async fn run(&self, ctx: StepContext) -> Result<serde_json::Value, BoxError> {
        let output = (self.f)(ctx).await?;
        Ok(serde_json::to_value(output)?)
    }
}

/// Wrap an async closure returning any serializable output.
pub fn step_fn<F, Fut, T>(f: F) -> Arc<dyn StepHandler>
where
    F: Fn(StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    T: Serialize + Send + 'static,
{
    Arc::new(FnHandler {
        f,
        _output: PhantomData,
    })
}

/// What triggers a workflow run upstream. Carried for registration only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowTrigger {
    pub events: Vec<String>,
    pub crons: Vec<String>,
}

/// One step of a workflow.
#[derive(Clone)]
pub struct Step {
    pub name: String,
    /// Steps whose outputs this step reads. Must be declared earlier.
    pub parents: Vec<String>,
    pub retries: u32,
    pub timeout: Option<Duration>,
    pub handler: Arc<dyn StepHandler>,
}

impl Step {
    pub fn new(name: impl Into<String>, handler: Arc<dyn StepHandler>) -> Self {
        Self {
            name: name.into(),
            parents: Vec::new(),
            retries: 0,
            timeout: None,
            handler,
        }
    }

    pub fn with_parents<I, S>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parents = parents.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("parents", &self.parents)
            .field("retries", &self.retries)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// A workflow declaration: a DAG of steps served by this worker.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub name: String,
    pub description: String,
    pub version: Option<String>,
    pub trigger: WorkflowTrigger,
    pub steps: Vec<Step>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            version: None,
            trigger: WorkflowTrigger::default(),
            steps: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn on_event(mut self, event: impl Into<String>) -> Self {
        self.trigger.events.push(event.into());
        self
    }

    pub fn on_cron(mut self, cron: impl Into<String>) -> Self {
        self.trigger.crons.push(cron.into());
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Check names, parent references and cron expressions.
    pub fn validate(&self) -> Result<(), ActionError> {
        let invalid = |reason: String| ActionError::InvalidWorkflow {
            workflow: self.name.clone(),
            reason,
        };

        if !NAME_RE.is_match(&self.name) {
            return Err(invalid(format!("invalid workflow name '{}'", self.name)));
        }
        if self.steps.is_empty() {
            return Err(invalid("workflow has no steps".to_string()));
        }

        let mut seen: Vec<&str> = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            if !NAME_RE.is_match(&step.name) {
                return Err(invalid(format!("invalid step name '{}'", step.name)));
            }
            if seen.contains(&step.name.as_str()) {
                return Err(invalid(format!("duplicate step '{}'", step.name)));
            }
            // Parents must already be declared, which rules out cycles.
            for parent in &step.parents {
                if !seen.contains(&parent.as_str()) {
                    return Err(invalid(format!(
                        "step '{}' depends on undeclared step '{}'",
                        step.name, parent
                    )));
                }
            }
            seen.push(&step.name);
        }

        for expr in &self.trigger.crons {
            parse_cron(expr).map_err(|e| invalid(format!("invalid cron '{expr}': {e}")))?;
        }

        Ok(())
    }
}

/// Parse a cron expression, accepting the 5-field form by assuming second 0.
fn parse_cron(expr: &str) -> Result<cron::Schedule, String> {
    let fields = expr.split_whitespace().count();
    let parsed = if fields == 5 {
        cron::Schedule::from_str(&format!("0 {expr}"))
    } else {
        cron::Schedule::from_str(expr)
    };
    parsed.map_err(|e| e.to_string())
}
