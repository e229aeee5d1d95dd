//! Error types for the answering workflow.
//!
//! Two layers: [`CapabilityError`] is the single fault channel every
//! capability client reports through, and [`WorkflowError`] is what a run
//! surfaces to the caller. Run-level failures carry the last consistent
//! [`WorkflowState`] snapshot for diagnostics.

use thiserror::Error;

use crate::state::WorkflowState;

/// Fault raised by a retriever, judge, search, or generator call.
///
/// Capabilities surface every failure through this one channel; there are no
/// sentinel return values. The retrieve stage is the only place a fault is
/// recovered locally instead of failing the run.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// The capability call exceeded its deadline.
    #[error("request timed out")]
    Timeout,

    /// The capability endpoint could not be reached.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The endpoint answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The endpoint answered, but the payload could not be interpreted.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl CapabilityError {
    /// Create an HTTP status error.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Create a malformed-response error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }

    /// Create a catch-all error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Whether a client may reasonably retry the call.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Connection(_) => true,
            Self::Http { status, .. } => *status == 429 || (500..600).contains(status),
            Self::MalformedResponse(_) | Self::Other(_) => false,
        }
    }
}

impl From<reqwest::Error> for CapabilityError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else {
            Self::Other(err.to_string())
        }
    }
}

/// Failure of a single workflow run.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The step budget was exhausted before reaching the terminal stage.
    ///
    /// This is an expected, user-visible outcome (the question could not be
    /// satisfactorily answered within budget), not an internal bug.
    #[error("step budget of {limit} exhausted before reaching END")]
    RecursionLimitExceeded {
        limit: usize,
        state: Box<WorkflowState>,
    },

    /// A capability call inside a stage faulted and the stage has no
    /// fallback. The workflow halts with the last merged state.
    #[error("capability fault in stage `{stage}`: {source}")]
    Capability {
        stage: String,
        #[source]
        source: CapabilityError,
        state: Box<WorkflowState>,
    },

    /// The run was cancelled between stages.
    #[error("workflow cancelled")]
    Cancelled { state: Box<WorkflowState> },

    /// The graph names a stage no implementation was registered for.
    #[error("no stage registered for `{0}`")]
    UnknownStage(String),

    /// A stage without conditional edges has no direct successor.
    #[error("stage `{0}` has no outgoing edge")]
    MissingEdge(String),

    /// A stage returned a route label the edge table does not know.
    #[error("stage `{stage}` returned unknown route `{label}`")]
    UnknownRoute { stage: String, label: String },
}

impl WorkflowError {
    /// The last consistent state snapshot, where the failure carries one.
    pub fn state(&self) -> Option<&WorkflowState> {
        match self {
            Self::RecursionLimitExceeded { state, .. }
            | Self::Capability { state, .. }
            | Self::Cancelled { state } => Some(state),
            _ => None,
        }
    }
}
