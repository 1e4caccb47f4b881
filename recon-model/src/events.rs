//! The progress event protocol pushed from the pipeline to subscribers.

use serde::{Deserialize, Serialize};

use crate::scan::ScanStatus;
use crate::stats::ScanStats;

/// One unit of information on a scan's live stream.
///
/// Serialized shape matches the wire protocol consumed by clients:
/// `{"type":"log","line":..}`, `{"type":"stats","data":..}`,
/// `{"type":"status","status":..}`, `{"type":"done"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Log { line: String },
    Stats { data: ScanStats },
    Status { status: ScanStatus },
    /// Terminal marker: always the last event on a stream.
    Done,
}

impl ProgressEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::Log { .. } => "log",
            ProgressEvent::Stats { .. } => "stats",
            ProgressEvent::Status { .. } => "status",
            ProgressEvent::Done => "done",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, ProgressEvent::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, to_value};

    #[test]
    fn log_event_wire_shape() {
        let event = ProgressEvent::Log {
            line: "[*] Starting subfinder against example.com".into(),
        };
        assert_eq!(
            to_value(&event).unwrap(),
            json!({
                "type": "log",
                "line": "[*] Starting subfinder against example.com",
            })
        );
    }

    #[test]
    fn status_and_done_wire_shapes() {
        let status = ProgressEvent::Status {
            status: ScanStatus::Paused,
        };
        assert_eq!(
            to_value(&status).unwrap(),
            json!({"type": "status", "status": "paused"})
        );
        assert_eq!(
            to_value(&ProgressEvent::Done).unwrap(),
            json!({"type": "done"})
        );
    }

    #[test]
    fn stats_event_nests_snapshot_under_data() {
        let mut stats = ScanStats::default();
        stats.subdomains_found = 12;
        stats.current_tool = Some("subfinder".into());
        let value = to_value(&ProgressEvent::Stats { data: stats }).unwrap();
        assert_eq!(value["type"], "stats");
        assert_eq!(value["data"]["subdomains_found"], 12);
        assert_eq!(value["data"]["current_tool"], "subfinder");
    }
}
