//! Runtime configuration.

use crate::error::{Result, RuntimeError};
use std::env;

/// Environment variable bounding While loop iterations.
pub const MAX_LOOP_ITERATIONS_ENV: &str = "WEAVE_MAX_LOOP_ITERATIONS";

/// Environment variable toggling graph validation at session build.
pub const VALIDATE_GRAPHS_ENV: &str = "WEAVE_VALIDATE_GRAPHS";

/// Options applied when a session is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Maximum body executions per While run. `None` loops until the
    /// condition turns false.
    pub max_loop_iterations: Option<u64>,
    /// Validate every subgraph before building executors.
    pub validate_graphs: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_loop_iterations: None,
            validate_graphs: true,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_loop_iterations(mut self, limit: u64) -> Self {
        self.max_loop_iterations = Some(limit);
        self
    }

    pub fn with_validate_graphs(mut self, validate: bool) -> Self {
        self.validate_graphs = validate;
        self
    }

    /// Defaults overridden by `WEAVE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = lookup(MAX_LOOP_ITERATIONS_ENV).filter(|v| !v.trim().is_empty()) {
            let limit = value.trim().parse::<u64>().map_err(|e| {
                RuntimeError::Config(format!(
                    "{MAX_LOOP_ITERATIONS_ENV}={value:?} is not an iteration count: {e}"
                ))
            })?;
            config.max_loop_iterations = Some(limit);
        }

        if let Some(value) = lookup(VALIDATE_GRAPHS_ENV).filter(|v| !v.trim().is_empty()) {
            config.validate_graphs = parse_bool(&value);
        }

        Ok(config)
    }
}

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}
