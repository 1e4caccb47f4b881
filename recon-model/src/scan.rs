//! Scan job records and the lifecycle status machine they move through.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ProjectId, ScanId};

/// A single external reconnaissance tool run as one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanTool {
    Subfinder,
    Httpx,
    Waybackurls,
    Gau,
    Katana,
    Nuclei,
}

impl ScanTool {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanTool::Subfinder => "subfinder",
            ScanTool::Httpx => "httpx",
            ScanTool::Waybackurls => "waybackurls",
            ScanTool::Gau => "gau",
            ScanTool::Katana => "katana",
            ScanTool::Nuclei => "nuclei",
        }
    }
}

impl fmt::Display for ScanTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of scan a job runs: the fixed multi-stage chain or one tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanType {
    FullAuto,
    Subfinder,
    Httpx,
    Waybackurls,
    Gau,
    Katana,
    Nuclei,
}

/// The ordered stage chain expanded from `full_auto`.
const FULL_AUTO_CHAIN: [ScanTool; 4] = [
    ScanTool::Subfinder,
    ScanTool::Httpx,
    ScanTool::Waybackurls,
    ScanTool::Nuclei,
];

impl ScanType {
    /// Ordered pipeline stages this scan type expands to.
    pub fn stages(&self) -> &'static [ScanTool] {
        match self {
            ScanType::FullAuto => &FULL_AUTO_CHAIN,
            ScanType::Subfinder => &[ScanTool::Subfinder],
            ScanType::Httpx => &[ScanTool::Httpx],
            ScanType::Waybackurls => &[ScanTool::Waybackurls],
            ScanType::Gau => &[ScanTool::Gau],
            ScanType::Katana => &[ScanTool::Katana],
            ScanType::Nuclei => &[ScanTool::Nuclei],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanType::FullAuto => "full_auto",
            ScanType::Subfinder => "subfinder",
            ScanType::Httpx => "httpx",
            ScanType::Waybackurls => "waybackurls",
            ScanType::Gau => "gau",
            ScanType::Katana => "katana",
            ScanType::Nuclei => "nuclei",
        }
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanType {
    type Err = UnknownScanType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "full_auto" => Ok(ScanType::FullAuto),
            "subfinder" => Ok(ScanType::Subfinder),
            "httpx" => Ok(ScanType::Httpx),
            "waybackurls" => Ok(ScanType::Waybackurls),
            "gau" => Ok(ScanType::Gau),
            "katana" => Ok(ScanType::Katana),
            "nuclei" => Ok(ScanType::Nuclei),
            other => Err(UnknownScanType(other.to_string())),
        }
    }
}

/// Parse error carrying the rejected scan type string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownScanType(pub String);

impl fmt::Display for UnknownScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown scan type: {}", self.0)
    }
}

impl std::error::Error for UnknownScanType {}

/// Lifecycle status of a scan job.
///
/// Exactly one of the non-terminal states holds until the job enters a
/// terminal state; no transition ever leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
    Stopped,
}

impl ScanStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanStatus::Completed
                | ScanStatus::Failed
                | ScanStatus::Cancelled
                | ScanStatus::Stopped
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ScanStatus::Running | ScanStatus::Paused)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Running => "running",
            ScanStatus::Paused => "paused",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
            ScanStatus::Cancelled => "cancelled",
            ScanStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage ingestion outcome reported by the result sink.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub output_lines: u64,
    pub new_count: u64,
    pub duplicate_count: u64,
    #[serde(default)]
    pub param_count: u64,
}

/// Aggregate counts accumulated over a scan's completed stages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub subdomains_found: u64,
    pub urls_discovered: u64,
    pub params_classified: u64,
    pub findings_count: u64,
    /// Outcome per completed stage, keyed by tool name.
    #[serde(default)]
    pub stages: BTreeMap<String, StageOutcome>,
}

impl ResultSummary {
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// The observable record of one scan execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: ScanId,
    pub project_id: Option<ProjectId>,
    pub scan_type: ScanType,
    pub target: String,
    pub status: ScanStatus,
    pub current_step: Option<String>,
    /// Percentage in [0, 100], non-decreasing for the job's lifetime.
    pub progress: u8,
    /// Accumulated log text for jobs queried after stream disconnection.
    pub log: Option<String>,
    pub result_summary: ResultSummary,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ScanJob {
    /// A freshly created job: pending, zero progress, empty summary.
    pub fn new(
        id: ScanId,
        project_id: Option<ProjectId>,
        scan_type: ScanType,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id,
            project_id,
            scan_type,
            target: target.into(),
            status: ScanStatus::Pending,
            current_step: None,
            progress: 0,
            log: None,
            result_summary: ResultSummary::default(),
            error: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_auto_expands_to_fixed_chain() {
        assert_eq!(
            ScanType::FullAuto.stages(),
            &[
                ScanTool::Subfinder,
                ScanTool::Httpx,
                ScanTool::Waybackurls,
                ScanTool::Nuclei,
            ]
        );
        assert_eq!(ScanType::Katana.stages(), &[ScanTool::Katana]);
    }

    #[test]
    fn scan_type_round_trips_through_str() {
        for raw in [
            "full_auto",
            "subfinder",
            "httpx",
            "waybackurls",
            "gau",
            "katana",
            "nuclei",
        ] {
            let parsed: ScanType = raw.parse().expect("known scan type");
            assert_eq!(parsed.as_str(), raw);
        }
        assert!("bogus_tool".parse::<ScanType>().is_err());
    }

    #[test]
    fn terminal_statuses_are_closed() {
        for status in [
            ScanStatus::Completed,
            ScanStatus::Failed,
            ScanStatus::Cancelled,
            ScanStatus::Stopped,
        ] {
            assert!(status.is_terminal());
            assert!(!status.is_active());
        }
        assert!(!ScanStatus::Pending.is_terminal());
        assert!(ScanStatus::Paused.is_active());
    }

    #[test]
    fn new_job_starts_pending_with_zero_progress() {
        let job = ScanJob::new(ScanId::new(), None, ScanType::FullAuto, "example.com");
        assert_eq!(job.status, ScanStatus::Pending);
        assert_eq!(job.progress, 0);
        assert!(job.result_summary.is_empty());
        assert!(job.started_at.is_none());
    }
}
