//! Error types for the ductwork framework.
//!
//! Errors fall into a few families:
//! - configuration and lookup errors raised while a graph or step DAG is built,
//! - consistency errors raised by stage policies mid-run,
//! - contract violations raised on first invocation,
//! - user stage, step and job failures.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// The main error type for ductwork operations.
#[derive(Debug, Error)]
pub enum DuctworkError {
    /// A graph or step DAG failed validation.
    #[error("{0}")]
    Validation(#[from] GraphValidationError),

    /// A cycle was detected in a step DAG.
    #[error("{0}")]
    CycleDetected(#[from] CycleDetectedError),

    /// A registry lookup failed.
    #[error("{0}")]
    NotFoundInRegistry(#[from] NotFoundInRegistryError),

    /// A user stage body failed.
    #[error("Stage '{node}' failed: {source}")]
    Stage {
        /// The failing node.
        node: String,
        /// The underlying stage error.
        #[source]
        source: StageError,
    },

    /// A step body failed.
    #[error("Step '{step}' failed: {source}")]
    Step {
        /// The failing step.
        step: String,
        /// The underlying error.
        #[source]
        source: anyhow::Error,
    },

    /// An adapter could not be opened or closed.
    #[error("{0}")]
    Adapter(#[from] AdapterError),

    /// The status store failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// A job executed synchronously failed.
    #[error("Job '{name}' ({id}) failed: {message}")]
    JobFailed {
        /// The job id.
        id: Uuid,
        /// The job name.
        name: String,
        /// The captured error message.
        message: String,
    },

    /// Execution was cancelled.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DuctworkError {
    /// Wraps a stage error with the failing node's name.
    #[must_use]
    pub fn stage(node: impl Into<String>, source: StageError) -> Self {
        Self::Stage {
            node: node.into(),
            source,
        }
    }

    /// Returns true if this error only reports a cancellation.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Extracts the message carried by a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Errors returned by user stage bodies and the shared stage policies.
#[derive(Debug, Error)]
pub enum StageError {
    /// A page returned more rows than requested.
    #[error("{0}")]
    InconsistentPagination(#[from] InconsistentPaginationError),

    /// The stage was wired or invoked against its contract.
    #[error("Contract violation: {0}")]
    Contract(String),

    /// The stage's adapter failed.
    #[error("{0}")]
    Adapter(#[from] AdapterError),

    /// Any other failure raised by user code.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl StageError {
    /// Creates a contract violation error.
    #[must_use]
    pub fn contract(message: impl Into<String>) -> Self {
        Self::Contract(message.into())
    }

    /// Creates a failure from a plain message.
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Failed(anyhow::anyhow!(message.into()))
    }
}

/// Raised when a paginated source receives more rows than its page size.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("The query returned {returned} rows but the page size is {page_size} rows")]
pub struct InconsistentPaginationError {
    /// Number of rows the page returned.
    pub returned: usize,
    /// The requested page size.
    pub page_size: usize,
}

impl InconsistentPaginationError {
    /// Creates a new pagination error.
    #[must_use]
    pub const fn new(returned: usize, page_size: usize) -> Self {
        Self {
            returned,
            page_size,
        }
    }
}

/// Raised when an adapter fails to open or close.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// Opening the adapter failed.
    #[error("Failed to open adapter '{adapter}': {message}")]
    Open {
        /// The adapter name.
        adapter: String,
        /// The failure message.
        message: String,
    },

    /// Closing the adapter failed.
    #[error("Failed to close adapter '{adapter}': {message}")]
    Close {
        /// The adapter name.
        adapter: String,
        /// The failure message.
        message: String,
    },
}

impl AdapterError {
    /// Creates an open failure.
    #[must_use]
    pub fn open(adapter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Open {
            adapter: adapter.into(),
            message: message.into(),
        }
    }

    /// Creates a close failure.
    #[must_use]
    pub fn close(adapter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Close {
            adapter: adapter.into(),
            message: message.into(),
        }
    }
}

/// Raised by status store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend failed.
    #[error("Status store backend error: {0}")]
    Backend(String),

    /// A stored value had an unexpected shape.
    #[error("Status store decode error for key '{key}': {source}")]
    Decode {
        /// The key being decoded.
        key: String,
        /// The serde error.
        #[source]
        source: serde_json::Error,
    },
}

/// Raised when a registry does not know the requested type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("The {registry} of type \"{kind}\" does not exist")]
pub struct NotFoundInRegistryError {
    /// The registry name.
    pub registry: String,
    /// The requested type.
    pub kind: String,
}

impl NotFoundInRegistryError {
    /// Creates a new registry lookup error.
    #[must_use]
    pub fn new(registry: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            kind: kind.into(),
        }
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "GRAPH-003-UNKNOWN_NODE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Fills the fix hint from [`ErrorSuggestions`] when none was given.
    #[must_use]
    pub fn with_default_hint(mut self) -> Self {
        if self.fix_hint.is_none() {
            self.fix_hint = ErrorSuggestions::get(&self.code).map(str::to_string);
        }
        self
    }
}

/// Error raised when a dataflow graph or a step DAG is invalid.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct GraphValidationError {
    /// The error message.
    pub message: String,
    /// The nodes or steps involved in the error.
    pub nodes: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl GraphValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            nodes: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the nodes involved.
    #[must_use]
    pub fn with_nodes(mut self, nodes: Vec<String>) -> Self {
        self.nodes = nodes;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info.with_default_hint());
        self
    }

    /// Returns the error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Error raised when a cycle is detected in a step DAG.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in steps: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of steps forming the cycle.
    pub cycle_path: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ContractErrorInfo::new(
            "STEP-003-CYCLE",
            format!("Step DAG contains a cycle: {}", cycle_path.join(" -> ")),
        )
        .with_default_hint();

        Self {
            cycle_path,
            error_info: info,
        }
    }
}

/// Provides default suggestions for validation error codes.
pub struct ErrorSuggestions;

impl ErrorSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            "GRAPH-001-EMPTY" => Some("Declare at least one source before building the graph."),
            "GRAPH-002-DUPLICATE" => Some(
                "Stage names identify nodes in pipes. Give every stage a unique name.",
            ),
            "GRAPH-003-UNKNOWN_NODE" => Some(
                "Every pipe must reference declared stages. Check for typos in stage names.",
            ),
            "GRAPH-004-ROLE" => Some(
                "Sources only produce, destinations only consume. \
                 Bind transforms and lookups to a Transform body.",
            ),
            "GRAPH-005-ORPHAN" => Some(
                "Pipe at least one producer into every transform, lookup and destination.",
            ),
            "GRAPH-006-DUPLICATE_PIPE" => Some(
                "List all consumers of a producer in a single send_to declaration.",
            ),
            "STEP-001-DUPLICATE" => Some("Give every step a unique name."),
            "STEP-002-UNKNOWN" => Some(
                "Steps may only run after declared steps. Check the names listed in `after`.",
            ),
            "STEP-003-CYCLE" => Some(
                "Remove one of the `after` edges in the cycle. \
                 Steps in a cycle would wait forever.",
            ),
            "STEP-004-EMPTY" => Some("Declare at least one step."),
            _ => None,
        }
    }
}
