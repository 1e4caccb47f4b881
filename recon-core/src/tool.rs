//! The tool-runner seam: how the pipeline drives external scanning tools.
//!
//! The executor only ever sees this abstraction: a runner spawns a named
//! tool against a target and hands back a line-oriented output stream plus
//! a control handle for suspension and termination. The process-backed
//! implementation lives in [`process`]; tests substitute scripted fakes.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use recon_model::ScanTool;

use crate::error::ToolError;

pub mod process;

/// Bounded capacity of a spawned tool's output-line channel. A full
/// channel applies backpressure to the reader task, never to publishers.
pub const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// One request to run a tool against a target.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub tool: ScanTool,
    pub target: String,
    /// Line-oriented input piped to the tool, for stages that consume the
    /// output of earlier stages (httpx, nuclei).
    pub stdin: Option<String>,
}

/// Exit outcome of a finished tool process.
#[derive(Debug, Clone)]
pub struct ToolExit {
    pub success: bool,
    pub code: Option<i32>,
    /// Trailing stderr lines, surfaced into the scan log.
    pub stderr_tail: Vec<String>,
}

/// A running tool: its output stream and its control handle.
pub struct SpawnedTool {
    pub output: mpsc::Receiver<String>,
    pub process: Box<dyn ToolProcess>,
}

impl fmt::Debug for SpawnedTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnedTool")
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}

/// Spawns scanning tools. Implementations must be cheap to share.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn spawn(&self, invocation: ToolInvocation) -> Result<SpawnedTool, ToolError>;
}

/// Control handle for one spawned tool process.
#[async_trait]
pub trait ToolProcess: Send {
    /// Suspend execution; the output stream stays open.
    async fn suspend(&mut self) -> Result<(), ToolError>;
    /// Continue a suspended process.
    async fn resume(&mut self) -> Result<(), ToolError>;
    /// Forcibly terminate; used for stop and cancel.
    async fn terminate(&mut self) -> Result<(), ToolError>;
    /// Wait for natural exit and collect the outcome.
    async fn wait(&mut self) -> Result<ToolExit, ToolError>;
}
