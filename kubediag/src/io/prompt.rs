//! Prompt rendering for the system task description and the opening message.
//!
//! The system prompt is where the read-only policy lives: it tells the backend
//! which verbs are acceptable and which connection flags every command needs.
//! Nothing enforces that policy at execution time; it is a contract with the
//! backend, not a security boundary.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::debug;

use crate::io::config::DiagnoserConfig;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const INITIAL_TEMPLATE: &str = include_str!("prompts/initial.md");

/// Rendered opening prompts for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPrompts {
    pub system: String,
    pub initial: String,
}

/// Inputs to the prompt templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptInputs {
    pub command_prefix: String,
    pub connection_flags: Vec<String>,
}

impl PromptInputs {
    pub fn from_config(cfg: &DiagnoserConfig) -> Self {
        Self {
            command_prefix: cfg.command_prefix.clone(),
            connection_flags: cfg.cluster.connection_flags(),
        }
    }
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("system", SYSTEM_TEMPLATE)
            .context("load system template")?;
        env.add_template("initial", INITIAL_TEMPLATE)
            .context("load initial template")?;
        Ok(Self { env })
    }

    fn render(&self, name: &str, input: &PromptInputs) -> Result<String> {
        let template = self.env.get_template(name)?;
        let rendered = template
            .render(context! {
                prefix => input.command_prefix.as_str(),
                flags => input.connection_flags.clone(),
            })
            .with_context(|| format!("render {name} prompt"))?;
        Ok(rendered.trim().to_string())
    }
}

/// Render the system and initial prompts.
pub fn render_prompts(input: &PromptInputs) -> Result<SessionPrompts> {
    let engine = PromptEngine::new()?;
    let system = engine.render("system", input)?;
    let initial = engine.render("initial", input)?;
    debug!(
        system_bytes = system.len(),
        flags = input.connection_flags.len(),
        "rendered session prompts"
    );
    Ok(SessionPrompts { system, initial })
}
