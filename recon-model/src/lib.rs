//! Core data model definitions shared across the recon crates.
#![allow(missing_docs)]

pub mod events;
pub mod ids;
pub mod scan;
pub mod stats;

pub use events::ProgressEvent;
pub use ids::{ProjectId, ScanId};
pub use scan::{
    ResultSummary, ScanJob, ScanStatus, ScanTool, ScanType, StageOutcome,
};
pub use stats::{ScanStats, StageState};
