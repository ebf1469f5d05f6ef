//! Error handling for stagepipe
//!
//! Every builder and compiler failure is reported synchronously through
//! [`PipelineError`] from the operation that detected it. Nothing in the
//! running pipeline raises errors asynchronously.

use crate::pipeline::id::{LinkId, PipelineId, StageId};
use crate::pipeline::link::Direction;
use thiserror::Error;

/// Main error type for stagepipe operations
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A link was used against its Send/Receive polarity
    #[error("link {link} is a {actual} link, expected a {expected} link")]
    Direction {
        link: LinkId,
        expected: Direction,
        actual: Direction,
    },

    /// A link whose owning stage was never added to the builder
    #[error("link {0} belongs to a stage that was not added to the pipeline")]
    UnknownLink(LinkId),

    /// Two links with different payload types were aliased
    #[error("cannot link {from} ({found}) into {to} ({expected}): payload types differ")]
    TypeMismatch {
        from: LinkId,
        to: LinkId,
        expected: &'static str,
        found: &'static str,
    },

    /// The stage graph contains a cycle
    #[error("cycle detected in pipeline graph at {stage}")]
    Cycle { stage: StageId },

    /// A declared output feeds nothing
    #[error("output {link} of {stage} is not consumed by any stage")]
    UnconsumedOutput { link: LinkId, stage: StageId },

    /// The builder was already compiled
    #[error("{0} has already been compiled")]
    Recompile(PipelineId),

    /// A link was used before its buffer was allocated by compile
    #[error("link {0} has no buffer; compile the pipeline first")]
    Unallocated(LinkId),

    /// Every writer of the link's buffer has been closed
    #[error("link {0} is closed")]
    Closed(LinkId),

    /// The cancellation token fired while blocked
    #[error("operation cancelled")]
    Cancelled,

    /// `start` was called on a pipeline that is already running
    #[error("{0} has already been started")]
    AlreadyStarted(PipelineId),

    /// A stage or drainer thread could not be spawned
    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// Errors related to options loading
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        PipelineError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for stagepipe operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
