//! Process-wide store of scan jobs and the per-job run state.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, RwLock, watch};

use recon_model::{ProjectId, ScanId, ScanJob, ScanStatus, ScanType};

use crate::broker::EventBroker;

/// Control intent requested for a job, observed by its executor at the
/// next checkpoint. Written only by control handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredState {
    Run,
    Pause,
    Stop,
    Cancel,
}

/// Capacities and limits applied to each job run.
#[derive(Debug, Clone, Copy)]
pub struct RunLimits {
    pub event_history_capacity: usize,
    pub broadcast_capacity: usize,
    pub max_log_lines: usize,
}

/// One registered scan: the observable record, the desired-state channel,
/// and the job's event broker, bound together for the job's lifetime.
///
/// Mutation discipline: observable fields are written only by the owning
/// executor; the desired-state channel is written only by control
/// handlers. The broker lives as long as any `Arc` to the run does, so
/// attached subscribers survive registry eviction.
#[derive(Debug)]
pub struct JobRun {
    id: ScanId,
    project_id: ProjectId,
    scan_type: ScanType,
    target: String,
    job: RwLock<ScanJob>,
    log_lines: RwLock<VecDeque<String>>,
    desired: watch::Sender<DesiredState>,
    broker: Arc<EventBroker>,
    control_gate: Mutex<()>,
    max_log_lines: usize,
}

impl JobRun {
    pub fn new(job: ScanJob, project_id: ProjectId, limits: RunLimits) -> Arc<Self> {
        let (desired, _rx) = watch::channel(DesiredState::Run);
        Arc::new(Self {
            id: job.id,
            project_id,
            scan_type: job.scan_type,
            target: job.target.clone(),
            job: RwLock::new(job),
            log_lines: RwLock::new(VecDeque::new()),
            desired,
            broker: Arc::new(EventBroker::new(
                limits.event_history_capacity,
                limits.broadcast_capacity,
            )),
            control_gate: Mutex::new(()),
            max_log_lines: limits.max_log_lines.max(1),
        })
    }

    pub fn id(&self) -> ScanId {
        self.id
    }

    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    pub fn scan_type(&self) -> ScanType {
        self.scan_type
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn broker(&self) -> &Arc<EventBroker> {
        &self.broker
    }

    /// Current observable record, with the accumulated log attached.
    pub async fn snapshot(&self) -> ScanJob {
        let mut job = self.job.read().await.clone();
        let lines = self.log_lines.read().await;
        if !lines.is_empty() {
            let mut text = String::new();
            for line in lines.iter() {
                text.push_str(line);
                text.push('\n');
            }
            job.log = Some(text);
        }
        job
    }

    pub async fn status(&self) -> ScanStatus {
        self.job.read().await.status
    }

    pub fn desired(&self) -> DesiredState {
        *self.desired.borrow()
    }

    pub fn desired_rx(&self) -> watch::Receiver<DesiredState> {
        self.desired.subscribe()
    }

    /// Serializes control transitions for this job.
    pub async fn control_gate(&self) -> MutexGuard<'_, ()> {
        self.control_gate.lock().await
    }

    pub fn set_desired(&self, state: DesiredState) {
        self.desired.send_replace(state);
    }

    /// Executor-side mutation of the observable record.
    pub async fn update<F>(&self, mutate: F)
    where
        F: FnOnce(&mut ScanJob),
    {
        let mut guard = self.job.write().await;
        mutate(&mut guard);
    }

    /// Raise progress to `pct`; progress never decreases.
    pub async fn set_progress(&self, pct: u8) {
        let mut guard = self.job.write().await;
        guard.progress = guard.progress.max(pct.min(100));
    }

    /// Append a line to the retained log, keeping only the newest lines
    /// once the cap is reached.
    pub async fn append_log(&self, line: &str) {
        let mut lines = self.log_lines.write().await;
        if lines.len() == self.max_log_lines {
            lines.pop_front();
        }
        lines.push_back(line.to_string());
    }
}

/// Process-wide index of scan jobs, keyed by id.
///
/// Supports concurrent reads and inserts; history is capped and eviction
/// only ever removes jobs that reached a terminal state.
#[derive(Debug)]
pub struct JobRegistry {
    inner: RwLock<RegistryInner>,
    history_capacity: usize,
}

#[derive(Debug)]
struct RegistryInner {
    jobs: HashMap<ScanId, Arc<JobRun>>,
    /// Insertion order, newest first.
    order: VecDeque<ScanId>,
}

impl JobRegistry {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                jobs: HashMap::new(),
                order: VecDeque::new(),
            }),
            history_capacity: history_capacity.max(1),
        }
    }

    pub async fn insert(&self, run: Arc<JobRun>) {
        let mut inner = self.inner.write().await;
        inner.order.push_front(run.id());
        inner.jobs.insert(run.id(), run);

        if inner.order.len() <= self.history_capacity {
            return;
        }
        // Walk from the oldest end; in-flight jobs are never evicted.
        let mut index = inner.order.len();
        while index > 0 && inner.order.len() > self.history_capacity {
            index -= 1;
            let Some(id) = inner.order.get(index).copied() else {
                continue;
            };
            let terminal = match inner.jobs.get(&id) {
                Some(run) => run.status().await.is_terminal(),
                None => true,
            };
            if terminal {
                inner.order.remove(index);
                inner.jobs.remove(&id);
            }
        }
    }

    pub async fn get(&self, id: &ScanId) -> Option<Arc<JobRun>> {
        self.inner.read().await.jobs.get(id).cloned()
    }

    /// Jobs newest first, optionally filtered by project.
    pub async fn list(&self, project: Option<ProjectId>) -> Vec<Arc<JobRun>> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.jobs.get(id))
            .filter(|run| project.is_none_or(|p| run.project_id() == p))
            .cloned()
            .collect()
    }

    pub async fn any_active_for_project(&self, project: ProjectId) -> bool {
        let runs = self.list(Some(project)).await;
        for run in runs {
            let status = run.status().await;
            if status == ScanStatus::Pending || status.is_active() {
                return true;
            }
        }
        false
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recon_model::ScanJob;

    fn limits() -> RunLimits {
        RunLimits {
            event_history_capacity: 16,
            broadcast_capacity: 16,
            max_log_lines: 100,
        }
    }

    fn make_run(project: ProjectId) -> Arc<JobRun> {
        let job = ScanJob::new(ScanId::new(), Some(project), ScanType::Subfinder, "example.com");
        JobRun::new(job, project, limits())
    }

    #[tokio::test]
    async fn list_is_newest_first_and_filters_by_project() {
        let registry = JobRegistry::new(10);
        let project_a = ProjectId::new();
        let project_b = ProjectId::new();

        let first = make_run(project_a);
        let second = make_run(project_b);
        let third = make_run(project_a);
        registry.insert(first.clone()).await;
        registry.insert(second.clone()).await;
        registry.insert(third.clone()).await;

        let all = registry.list(None).await;
        assert_eq!(
            all.iter().map(|r| r.id()).collect::<Vec<_>>(),
            vec![third.id(), second.id(), first.id()]
        );

        let filtered = registry.list(Some(project_a)).await;
        assert_eq!(
            filtered.iter().map(|r| r.id()).collect::<Vec<_>>(),
            vec![third.id(), first.id()]
        );
    }

    #[tokio::test]
    async fn eviction_skips_in_flight_jobs() {
        let registry = JobRegistry::new(2);
        let project = ProjectId::new();

        let oldest = make_run(project);
        oldest
            .update(|job| job.status = ScanStatus::Running)
            .await;
        let middle = make_run(project);
        middle
            .update(|job| job.status = ScanStatus::Completed)
            .await;
        registry.insert(oldest.clone()).await;
        registry.insert(middle.clone()).await;
        registry.insert(make_run(project)).await;

        // The running job survives; the completed one was evicted.
        assert!(registry.get(&oldest.id()).await.is_some());
        assert!(registry.get(&middle.id()).await.is_none());
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn progress_is_monotone() {
        let run = make_run(ProjectId::new());
        run.set_progress(50).await;
        run.set_progress(25).await;
        assert_eq!(run.snapshot().await.progress, 50);
        run.set_progress(200).await;
        assert_eq!(run.snapshot().await.progress, 100);
    }

    #[tokio::test]
    async fn log_keeps_the_newest_lines() {
        let job = ScanJob::new(ScanId::new(), None, ScanType::Httpx, "example.com");
        let run = JobRun::new(
            job,
            ProjectId::new(),
            RunLimits {
                event_history_capacity: 4,
                broadcast_capacity: 4,
                max_log_lines: 2,
            },
        );
        run.append_log("one").await;
        run.append_log("two").await;
        run.append_log("three").await;
        assert_eq!(run.snapshot().await.log.as_deref(), Some("two\nthree\n"));
    }
}
