//! Error taxonomy for the control surface and the pipeline.

use std::fmt;

use recon_model::{ScanStatus, ScanTool};

/// Synchronous failures surfaced to control-surface callers.
///
/// Transport-agnostic: the HTTP layer maps each variant onto a status
/// code. `message()` is the stable, client-visible text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    JobNotFound,
    ProjectNotFound,
    /// A scan is already active for the requested project.
    ProjectBusy,
    /// Malformed start request: empty target or unknown scan type.
    InvalidInput(String),
    /// Control request incompatible with the job's current status.
    InvalidState(ScanStatus),
    Internal(String),
}

impl ControlError {
    pub fn message(&self) -> String {
        match self {
            ControlError::JobNotFound => "scan job not found".into(),
            ControlError::ProjectNotFound => "project not found".into(),
            ControlError::ProjectBusy => {
                "a scan is already active for this project".into()
            }
            ControlError::InvalidInput(reason) => reason.clone(),
            ControlError::InvalidState(status) => {
                format!("scan is {status} and cannot accept this request")
            }
            ControlError::Internal(reason) => reason.clone(),
        }
    }

    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        ControlError::Internal(msg.into())
    }
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ControlError {}

/// Failures raised by a tool runner while spawning or driving a tool.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{tool} is not installed")]
    NotInstalled { tool: ScanTool },
    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: ScanTool,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o failure while driving tool: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to signal tool process: {0}")]
    Signal(String),
}

/// Failures that end a pipeline run with status `failed`.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{tool} exited with status {code:?}")]
    ToolFailed { tool: ScanTool, code: Option<i32> },
    #[error("{tool} exceeded the stage time limit")]
    ToolTimeout { tool: ScanTool },
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("result sink rejected {tool} output: {reason}")]
    Sink { tool: ScanTool, reason: String },
}
