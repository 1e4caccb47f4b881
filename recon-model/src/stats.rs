//! Point-in-time stats snapshots streamed to subscribers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Status token rendered per pipeline stage in the progress view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Running,
    Completed,
}

/// Snapshot of a scan's live counters.
///
/// Each `stats` event carries a full snapshot that replaces the previous
/// one; nothing here is accumulated by the broker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub subdomains_found: u64,
    pub urls_discovered: u64,
    pub params_classified: u64,
    pub findings_count: u64,
    pub current_tool: Option<String>,
    /// Wall-clock seconds since the job entered running.
    pub elapsed_seconds: u64,
    /// Stage name to status token, used to render pipeline progress.
    pub tool_timings: BTreeMap<String, StageState>,
}
