//! Scan job lifecycle, pipeline execution, and live telemetry fan-out.
//!
//! The engine behind the recon server: [`service::ScanService`] is the
//! control surface, [`pipeline::PipelineExecutor`] drives the tool chain
//! for each job, and [`broker::EventBroker`] fans progress events out to
//! stream subscribers. External tools, result persistence, and project
//! provisioning are consumed through the seams in [`tool`], [`sink`],
//! and [`project`].
#![allow(missing_docs)]

pub mod broker;
pub mod error;
pub mod pipeline;
pub mod project;
pub mod registry;
pub mod service;
pub mod sink;
pub mod tool;

pub use broker::{EventBroker, EventFrame};
pub use error::{ControlError, PipelineError, ToolError};
pub use pipeline::PipelineExecutor;
pub use project::{MemoryProjects, Project, ProjectError, ProjectProvider};
pub use registry::{DesiredState, JobRegistry, JobRun, RunLimits};
pub use service::{ScanService, ScanServiceConfig, StartScanRequest};
pub use sink::{MemorySink, ResultSink, SinkError};
pub use tool::{
    SpawnedTool, ToolExit, ToolInvocation, ToolProcess, ToolRunner,
    process::ProcessToolRunner,
};
