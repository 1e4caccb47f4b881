//! Result-accumulation seam: where stage output lines are handed off.
//!
//! The pipeline never parses tool output itself; it forwards each stage's
//! lines to a [`ResultSink`] and records the returned counts. The real
//! application plugs its parser/persistence layer in here; [`MemorySink`]
//! is the in-process implementation used by the server default wiring and
//! the tests.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use recon_model::{ProjectId, ScanTool, StageOutcome};

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("{0}")]
    Internal(String),
}

/// Consumes stage output and accumulates recon artifacts per project.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Ingest one completed stage's output lines, returning counts.
    async fn ingest(
        &self,
        project: ProjectId,
        tool: ScanTool,
        lines: &[String],
    ) -> Result<StageOutcome, SinkError>;

    /// Subdomains accumulated so far for a project, fed as input to the
    /// probing and vulnerability stages.
    async fn subdomains(&self, project: ProjectId) -> Result<Vec<String>, SinkError>;
}

/// In-memory sink that deduplicates artifacts per project.
#[derive(Debug, Default)]
pub struct MemorySink {
    inner: RwLock<HashMap<ProjectId, ProjectRecords>>,
}

#[derive(Debug, Default)]
struct ProjectRecords {
    subdomains: BTreeSet<String>,
    probed: BTreeSet<String>,
    urls: BTreeSet<String>,
    params: BTreeSet<String>,
    findings: BTreeSet<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

fn insert_counting(set: &mut BTreeSet<String>, lines: &[String]) -> (u64, u64) {
    let mut new_count = 0;
    let mut duplicate_count = 0;
    for line in lines {
        if set.insert(line.clone()) {
            new_count += 1;
        } else {
            duplicate_count += 1;
        }
    }
    (new_count, duplicate_count)
}

/// Query parameter names in a URL line, e.g. `?q=1&page=2` -> q, page.
fn query_params(url: &str) -> impl Iterator<Item = &str> {
    url.split_once('?')
        .map(|(_, query)| query)
        .into_iter()
        .flat_map(|query| query.split('&'))
        .filter_map(|pair| pair.split('=').next())
        .filter(|name| !name.is_empty())
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn ingest(
        &self,
        project: ProjectId,
        tool: ScanTool,
        lines: &[String],
    ) -> Result<StageOutcome, SinkError> {
        let mut guard = self.inner.write().await;
        let records = guard.entry(project).or_default();

        let mut outcome = StageOutcome {
            output_lines: lines.len() as u64,
            ..StageOutcome::default()
        };
        match tool {
            ScanTool::Subfinder => {
                let (new, dup) = insert_counting(&mut records.subdomains, lines);
                outcome.new_count = new;
                outcome.duplicate_count = dup;
            }
            ScanTool::Httpx => {
                let (new, dup) = insert_counting(&mut records.probed, lines);
                outcome.new_count = new;
                outcome.duplicate_count = dup;
            }
            ScanTool::Waybackurls | ScanTool::Gau | ScanTool::Katana => {
                let (new, dup) = insert_counting(&mut records.urls, lines);
                outcome.new_count = new;
                outcome.duplicate_count = dup;
                for line in lines {
                    for name in query_params(line) {
                        if records.params.insert(name.to_string()) {
                            outcome.param_count += 1;
                        }
                    }
                }
            }
            ScanTool::Nuclei => {
                let (new, dup) = insert_counting(&mut records.findings, lines);
                outcome.new_count = new;
                outcome.duplicate_count = dup;
            }
        }
        Ok(outcome)
    }

    async fn subdomains(&self, project: ProjectId) -> Result<Vec<String>, SinkError> {
        let guard = self.inner.read().await;
        Ok(guard
            .get(&project)
            .map(|records| records.subdomains.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subfinder_lines_deduplicate_per_project() {
        let sink = MemorySink::new();
        let project = ProjectId::new();
        let lines = vec![
            "a.example.com".to_string(),
            "b.example.com".to_string(),
            "a.example.com".to_string(),
        ];
        let outcome = sink
            .ingest(project, ScanTool::Subfinder, &lines)
            .await
            .unwrap();
        assert_eq!(outcome.output_lines, 3);
        assert_eq!(outcome.new_count, 2);
        assert_eq!(outcome.duplicate_count, 1);

        let subs = sink.subdomains(project).await.unwrap();
        assert_eq!(subs, vec!["a.example.com", "b.example.com"]);
    }

    #[tokio::test]
    async fn url_stages_classify_query_params() {
        let sink = MemorySink::new();
        let project = ProjectId::new();
        let lines = vec![
            "https://example.com/search?q=1&page=2".to_string(),
            "https://example.com/item?q=9".to_string(),
        ];
        let outcome = sink
            .ingest(project, ScanTool::Waybackurls, &lines)
            .await
            .unwrap();
        assert_eq!(outcome.new_count, 2);
        // q counted once across both urls
        assert_eq!(outcome.param_count, 2);
    }
}
