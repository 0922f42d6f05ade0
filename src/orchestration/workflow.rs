//! # Workflow Definition
//!
//! Pure in-memory view of the configured workflow: the ordered step list and
//! the command-template table. Built once at startup; rendering problems
//! (missing template, unknown placeholder) are configuration errors raised
//! during construction, never mid-run.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::{ConductorConfig, ConfigurationError, StepTypeConfig};

/// What a step asks of the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Upload,
    Execute,
    Download,
}

impl StepType {
    /// Only execute steps occupy a GPU slot
    pub fn requires_gpu(&self) -> bool {
        matches!(self, Self::Execute)
    }
}

impl From<StepTypeConfig> for StepType {
    fn from(value: StepTypeConfig) -> Self {
        match value {
            StepTypeConfig::Upload => Self::Upload,
            StepTypeConfig::Execute => Self::Execute,
            StepTypeConfig::Download => Self::Download,
        }
    }
}

/// One node in the ordered workflow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDefinition {
    pub name: String,
    pub step_type: StepType,
    /// Progress percentage written when this step is dispatched
    pub progress: i64,
}

/// The ordered step list plus the execute-command template table.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    steps: Vec<StepDefinition>,
    templates: HashMap<String, String>,
}

/// Placeholders supported in command templates
const PLACEHOLDER_CASE_ID: &str = "{case_id}";
const PLACEHOLDER_GPU_ID: &str = "{gpu_id}";

impl WorkflowDefinition {
    /// Build and validate a workflow from configuration.
    ///
    /// Rejects duplicate step names, decreasing progress values, execute
    /// steps without a command template, and templates with placeholders
    /// other than `{case_id}` and `{gpu_id}`.
    pub fn from_config(config: &ConductorConfig) -> Result<Self, ConfigurationError> {
        let steps: Vec<StepDefinition> = config
            .workflow
            .steps
            .iter()
            .map(|s| StepDefinition {
                name: s.name.clone(),
                step_type: s.step_type.into(),
                progress: i64::from(s.progress),
            })
            .collect();

        let mut seen = std::collections::HashSet::new();
        let mut last_progress = 0i64;
        for step in &steps {
            if !seen.insert(step.name.as_str()) {
                return Err(ConfigurationError::workflow(format!(
                    "duplicate step name '{}'",
                    step.name
                )));
            }
            if step.progress < last_progress {
                return Err(ConfigurationError::workflow(format!(
                    "progress must be non-decreasing, step '{}' declares {} after {}",
                    step.name, step.progress, last_progress
                )));
            }
            last_progress = step.progress;
        }

        let definition = Self {
            steps,
            templates: config.commands.clone(),
        };

        for step in definition.steps() {
            if step.step_type.requires_gpu() {
                // Probe-render so bad templates fail at startup
                definition.render_command(step, "probe", 0)?;
            }
        }

        Ok(definition)
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    pub fn first_step(&self) -> Option<&StepDefinition> {
        self.steps.first()
    }

    pub fn step_by_name(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// The step after `current`, or `None` at end of workflow. An unknown
    /// `current` also returns `None`; callers that care use
    /// [`Self::step_by_name`] first.
    pub fn next_step(&self, current: &str) -> Option<&StepDefinition> {
        let index = self.steps.iter().position(|s| s.name == current)?;
        self.steps.get(index + 1)
    }

    /// Render the command line for an execute step.
    pub fn render_command(
        &self,
        step: &StepDefinition,
        case_id: &str,
        gpu_index: i64,
    ) -> Result<String, ConfigurationError> {
        let template = self.templates.get(&step.name).ok_or_else(|| {
            ConfigurationError::template(&step.name, "no command template configured")
        })?;

        let rendered = template
            .replace(PLACEHOLDER_CASE_ID, case_id)
            .replace(PLACEHOLDER_GPU_ID, &gpu_index.to_string());

        if let Some(placeholder) = find_placeholder(&rendered) {
            return Err(ConfigurationError::template(
                &step.name,
                format!("unknown placeholder '{placeholder}'"),
            ));
        }

        Ok(rendered)
    }
}

/// First remaining `{...}` placeholder in a rendered command, if any
fn find_placeholder(rendered: &str) -> Option<&str> {
    let start = rendered.find('{')?;
    let end = rendered[start..].find('}')?;
    Some(&rendered[start..=start + end])
}
