//! Configuration for stagepipe
//!
//! A [`PipelineOptions`] value is carried by the builder and handed on to the
//! compiled pipeline. Options can be built in code or loaded from a TOML
//! file; missing keys fall back to their defaults.
//!
//! # Example
//!
//! ```toml
//! name = "telemetry"
//! buffer_size = 64
//! thread_name_prefix = "telemetry"
//! close_outputs_on_exit = true
//! ```

use crate::error::{PipelineError, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default capacity of every link buffer
pub const DEFAULT_BUFFER_SIZE: usize = 128;

/// Default prefix for stage thread names
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "stage";

/// Options carried by a pipeline builder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Optional label used in logs and the topology dump
    pub name: Option<String>,

    /// Buffer capacity used by `Pipeline::compile_default`
    pub buffer_size: usize,

    /// Stage threads are named `<prefix>-<stage id>`
    pub thread_name_prefix: String,

    /// Close a stage's outputs once its entry point returns, so downstream
    /// stages observe end-of-stream
    pub close_outputs_on_exit: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            name: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            close_outputs_on_exit: true,
        }
    }
}

impl PipelineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_close_outputs_on_exit(mut self, close: bool) -> Self {
        self.close_outputs_on_exit = close;
        self
    }

    /// Parse options from a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let options: Self = toml::from_str(content)
            .map_err(|e| PipelineError::Config(format!("Failed to parse options: {}", e)))?;
        options.validate()?;
        Ok(options)
    }

    /// Load options from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("Failed to read options: {}", e)))
            .with_context(|| format!("Loading {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("Loading {}", path.display()))
    }

    /// Serialize options to a TOML document
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| PipelineError::Config(format!("Failed to serialize options: {}", e)))
    }

    fn validate(&self) -> Result<()> {
        if self.thread_name_prefix.trim().is_empty() {
            return Err(PipelineError::Config(
                "thread_name_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Label for logs: the configured name, or the pipeline id
    pub(crate) fn label(&self, fallback: impl std::fmt::Display) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => fallback.to_string(),
        }
    }
}
