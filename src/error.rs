//! Frame graph error types.

use std::time::Duration;

use thiserror::Error;

use crate::backend::BackendError;
use crate::render_graph::ObjectId;

/// Errors raised while building, preparing or executing a frame graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameGraphError {
    // Graph construction
    #[error("a pass named '{0}' is already registered")]
    DuplicatePassName(String),
    #[error("required input '{input}' of pass '{pass}' is not connected to any source")]
    UnresolvedSink { pass: String, input: String },
    #[error("input '{input}' of pass '{pass}' names unknown source '{source_name}'")]
    UnknownSource {
        pass: String,
        input: String,
        source_name: String,
    },
    #[error("input '{input}' of pass '{pass}' expects {expected} but its source produces {found}")]
    TypeMismatch {
        pass: String,
        input: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("shared source '{0}' is already published")]
    DuplicateSharedSource(String),
    #[error("linking ticket '{0}' to its source would create an aliasing cycle")]
    CyclicAlias(String),
    #[error("no pass named '{0}'")]
    UnknownPass(String),
    #[error("pass index {thread}:{position} is out of range")]
    InvalidPassIndex { thread: usize, position: usize },
    #[error("frame graph is already finalized")]
    AlreadyFinalized,
    #[error("frame graph must be finalized before execution")]
    NotFinalized,

    // Resource contract violations
    #[error("ticket '{0}' does not locate a resource declared this frame")]
    InvalidTicket(String),
    #[error("ticket '{0}' refers to a resource from an earlier frame")]
    StaleTicket(String),
    #[error("resource '{0}' was already declared this frame")]
    AlreadyDeclared(String),
    #[error("resource '{0}' is undefined and cannot be acquired")]
    UndefinedResource(String),
    #[error("resource '{0}' is no longer in use")]
    ResourceUnused(String),
    #[error("resource '{0}' cannot be both undefined and hold a concrete value")]
    DefinedAndUndefined(String),
    #[error("resource '{name}' holds {found}, not {expected}")]
    ResourceTypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("render object {0} is already acquired")]
    ObjectAlreadyAcquired(ObjectId),
    #[error("unknown render object {0}")]
    UnknownObject(ObjectId),

    // Scheduling
    #[error("pass '{pass}' gave up after {waited:?} waiting for input '{input}'")]
    InputTimeout {
        pass: String,
        input: String,
        waited: Duration,
    },
    #[error("pass '{pass}' failed: {message}")]
    PassFailed { pass: String, message: String },
    #[error("rendering was interrupted")]
    Interrupted,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl FrameGraphError {
    /// Convenience constructor for failures raised inside pass bodies.
    pub fn pass_failed(pass: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PassFailed {
            pass: pass.into(),
            message: message.into(),
        }
    }

    /// Whether the error was raised while building the graph, as opposed to
    /// while preparing or running a frame.
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicatePassName(_)
                | Self::UnresolvedSink { .. }
                | Self::UnknownSource { .. }
                | Self::TypeMismatch { .. }
                | Self::DuplicateSharedSource(_)
                | Self::CyclicAlias(_)
                | Self::UnknownPass(_)
                | Self::InvalidPassIndex { .. }
        )
    }
}

pub type FrameGraphResult<T> = Result<T, FrameGraphError>;
