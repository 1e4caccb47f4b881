//! Command dispatcher + read model for scan jobs.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, instrument};

use recon_model::{ProjectId, ScanId, ScanJob, ScanStats, ScanType};

use crate::broker::EventFrame;
use crate::error::ControlError;
use crate::pipeline::PipelineExecutor;
use crate::project::ProjectProvider;
use crate::registry::{DesiredState, JobRegistry, JobRun, RunLimits};
use crate::sink::ResultSink;
use crate::tool::ToolRunner;

/// Tunables for the scan service and the runs it creates.
#[derive(Debug, Clone, Copy)]
pub struct ScanServiceConfig {
    /// Upper bound on retained jobs; only terminal jobs are evicted.
    pub history_capacity: usize,
    /// Replay-ring capacity of each job's event broker.
    pub event_history_capacity: usize,
    /// Per-subscriber broadcast queue capacity.
    pub broadcast_capacity: usize,
    /// Cadence of `stats` events while a stage is running.
    pub stats_interval: Duration,
    /// Hard ceiling on a single stage's runtime.
    pub tool_timeout: Duration,
    /// Newest log lines retained on the job record.
    pub max_log_lines: usize,
}

impl Default for ScanServiceConfig {
    fn default() -> Self {
        Self {
            history_capacity: 64,
            event_history_capacity: 512,
            broadcast_capacity: 512,
            stats_interval: Duration::from_secs(1),
            tool_timeout: Duration::from_secs(600),
            max_log_lines: 5000,
        }
    }
}

/// A request to start a scan, as received from the control surface.
#[derive(Debug, Clone)]
pub struct StartScanRequest {
    pub project_id: Option<ProjectId>,
    pub project_name: Option<String>,
    pub target_domain: String,
    pub scan_type: String,
}

/// The control surface over scan jobs: start, query, pause/resume/stop/
/// cancel, and stream subscription. One instance per process, injected
/// into the transport layer.
pub struct ScanService {
    registry: JobRegistry,
    projects: Arc<dyn ProjectProvider>,
    executor: Arc<PipelineExecutor>,
    config: ScanServiceConfig,
}

impl fmt::Debug for ScanService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ScanService {
    pub fn new(
        runner: Arc<dyn ToolRunner>,
        sink: Arc<dyn ResultSink>,
        projects: Arc<dyn ProjectProvider>,
        config: ScanServiceConfig,
    ) -> Arc<Self> {
        let executor = PipelineExecutor::new(
            runner,
            sink,
            config.stats_interval,
            config.tool_timeout,
        );
        Arc::new(Self {
            registry: JobRegistry::new(config.history_capacity),
            projects,
            executor,
            config,
        })
    }

    fn run_limits(&self) -> RunLimits {
        RunLimits {
            event_history_capacity: self.config.event_history_capacity,
            broadcast_capacity: self.config.broadcast_capacity,
            max_log_lines: self.config.max_log_lines,
        }
    }

    /// Validate a start request, provision the project when needed, and
    /// hand the new job to the pipeline. Returns the job in its initial
    /// state; callers observe the transition to running via the stream
    /// or a subsequent get.
    #[instrument(skip(self, request), fields(scan_type = %request.scan_type))]
    pub async fn start_scan(&self, request: StartScanRequest) -> Result<ScanJob, ControlError> {
        let target = request.target_domain.trim().to_string();
        if target.is_empty() {
            return Err(ControlError::InvalidInput(
                "target domain must not be empty".into(),
            ));
        }
        let scan_type: ScanType = request
            .scan_type
            .parse()
            .map_err(|err: recon_model::scan::UnknownScanType| {
                ControlError::InvalidInput(err.to_string())
            })?;

        let project = match request.project_id {
            Some(id) => self
                .projects
                .get(id)
                .await
                .map_err(|err| ControlError::internal(err.to_string()))?
                .ok_or(ControlError::ProjectNotFound)?,
            None => {
                // A project is provisioned on the fly, named after the
                // target unless the caller supplied a name.
                let name = request
                    .project_name
                    .as_deref()
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .unwrap_or(&target);
                self.projects
                    .create(name, &target)
                    .await
                    .map_err(|err| ControlError::internal(err.to_string()))?
            }
        };

        if self.registry.any_active_for_project(project.id).await {
            return Err(ControlError::ProjectBusy);
        }

        let job = ScanJob::new(ScanId::new(), Some(project.id), scan_type, &target);
        let run = JobRun::new(job, project.id, self.run_limits());
        self.registry.insert(Arc::clone(&run)).await;
        self.executor.spawn(Arc::clone(&run));
        info!(scan_id = %run.id(), project_id = %project.id, "scan job created");

        Ok(run.snapshot().await)
    }

    pub async fn get(&self, id: &ScanId) -> Result<ScanJob, ControlError> {
        let run = self.lookup(id).await?;
        Ok(run.snapshot().await)
    }

    /// Jobs newest first, optionally scoped to a project.
    pub async fn list(&self, project: Option<ProjectId>) -> Vec<ScanJob> {
        let runs = self.registry.list(project).await;
        let mut jobs = Vec::with_capacity(runs.len());
        for run in runs {
            jobs.push(run.snapshot().await);
        }
        jobs
    }

    /// The job record plus the most recent live stats snapshot, if the
    /// pipeline has emitted one.
    pub async fn details(&self, id: &ScanId) -> Result<(ScanJob, Option<ScanStats>), ControlError> {
        let run = self.lookup(id).await?;
        let stats = run.broker().latest_stats();
        Ok((run.snapshot().await, stats))
    }

    /// Attach to a job's event stream: replay of the last known status/
    /// stats, then live events.
    pub async fn subscribe(
        &self,
        id: &ScanId,
    ) -> Result<(Vec<EventFrame>, broadcast::Receiver<EventFrame>), ControlError> {
        let run = self.lookup(id).await?;
        Ok(run.broker().subscribe())
    }

    /// Request a pause. Idempotent when already requested.
    #[instrument(skip(self))]
    pub async fn pause(&self, id: &ScanId) -> Result<ScanJob, ControlError> {
        let run = self.lookup(id).await?;
        let _gate = run.control_gate().await;
        let status = run.status().await;
        if status.is_terminal() {
            return Err(ControlError::InvalidState(status));
        }
        match run.desired() {
            DesiredState::Pause => {}
            DesiredState::Run => run.set_desired(DesiredState::Pause),
            DesiredState::Stop | DesiredState::Cancel => {
                return Err(ControlError::InvalidState(status));
            }
        }
        Ok(run.snapshot().await)
    }

    /// Request a resume. Idempotent when already running.
    #[instrument(skip(self))]
    pub async fn resume(&self, id: &ScanId) -> Result<ScanJob, ControlError> {
        let run = self.lookup(id).await?;
        let _gate = run.control_gate().await;
        let status = run.status().await;
        if status.is_terminal() {
            return Err(ControlError::InvalidState(status));
        }
        match run.desired() {
            DesiredState::Run => {}
            DesiredState::Pause => run.set_desired(DesiredState::Run),
            DesiredState::Stop | DesiredState::Cancel => {
                return Err(ControlError::InvalidState(status));
            }
        }
        Ok(run.snapshot().await)
    }

    /// Graceful early termination: the current tool is killed, later
    /// stages are skipped, accumulated results are kept.
    #[instrument(skip(self))]
    pub async fn stop(&self, id: &ScanId) -> Result<ScanJob, ControlError> {
        let run = self.lookup(id).await?;
        let _gate = run.control_gate().await;
        let status = run.status().await;
        if status.is_terminal() {
            return Err(ControlError::InvalidState(status));
        }
        // Cancel is stronger; a stop after a cancel changes nothing.
        if run.desired() != DesiredState::Cancel {
            run.set_desired(DesiredState::Stop);
        }
        Ok(run.snapshot().await)
    }

    /// Immediate, destructive termination.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: &ScanId) -> Result<ScanJob, ControlError> {
        let run = self.lookup(id).await?;
        let _gate = run.control_gate().await;
        let status = run.status().await;
        if status.is_terminal() {
            return Err(ControlError::InvalidState(status));
        }
        run.set_desired(DesiredState::Cancel);
        Ok(run.snapshot().await)
    }

    pub async fn job_count(&self) -> usize {
        self.registry.len().await
    }

    async fn lookup(&self, id: &ScanId) -> Result<Arc<JobRun>, ControlError> {
        self.registry
            .get(id)
            .await
            .ok_or(ControlError::JobNotFound)
    }
}
