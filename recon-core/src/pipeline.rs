//! Pipeline execution: drives the ordered tool chain for one scan job and
//! translates tool output into progress events.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use recon_model::{
    ProgressEvent, ScanStats, ScanStatus, ScanTool, ScanType, StageOutcome,
    StageState,
};

use crate::error::PipelineError;
use crate::registry::{DesiredState, JobRun};
use crate::sink::ResultSink;
use crate::tool::{ToolInvocation, ToolRunner};

/// Why a run ended before its pipeline finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    Stopped,
    Cancelled,
}

enum Checkpoint {
    Continue,
    Halt(Halt),
}

enum StageRun {
    Completed(Vec<String>),
    Halted(Halt),
}

/// Runs scan pipelines as independent tokio tasks, one per active job.
pub struct PipelineExecutor {
    runner: Arc<dyn ToolRunner>,
    sink: Arc<dyn ResultSink>,
    stats_interval: Duration,
    tool_timeout: Duration,
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("stats_interval", &self.stats_interval)
            .field("tool_timeout", &self.tool_timeout)
            .finish_non_exhaustive()
    }
}

impl PipelineExecutor {
    pub fn new(
        runner: Arc<dyn ToolRunner>,
        sink: Arc<dyn ResultSink>,
        stats_interval: Duration,
        tool_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            runner,
            sink,
            stats_interval,
            tool_timeout,
        })
    }

    /// Hand a registered job to the pipeline without blocking the caller.
    ///
    /// Faults inside the run, panics included, are contained at this
    /// boundary and converted to a `failed` terminal status; they never
    /// take down the process or other jobs.
    pub fn spawn(self: &Arc<Self>, run: Arc<JobRun>) {
        let executor = Arc::clone(self);
        tokio::spawn(async move {
            let inner_executor = Arc::clone(&executor);
            let inner_run = Arc::clone(&run);
            let outcome =
                tokio::spawn(async move { inner_executor.execute(inner_run).await }).await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(scan_id = %run.id(), "scan pipeline failed: {err}");
                    executor.fail(&run, err.to_string()).await;
                }
                Err(join_err) => {
                    let reason = if join_err.is_panic() {
                        "internal error in scan pipeline".to_string()
                    } else {
                        format!("scan pipeline aborted: {join_err}")
                    };
                    error!(scan_id = %run.id(), "{reason}");
                    executor.fail(&run, reason).await;
                }
            }
        });
    }

    async fn execute(&self, run: Arc<JobRun>) -> Result<(), PipelineError> {
        let mut control = run.desired_rx();
        let mut tracker = StatsTracker::new();
        let scan_type = run.scan_type();
        let stages = scan_type.stages();
        let chained = scan_type == ScanType::FullAuto;

        info!(scan_id = %run.id(), %scan_type, target = run.target(), "scan starting");
        run.update(|job| {
            job.status = ScanStatus::Running;
            job.started_at = Some(Utc::now());
        })
        .await;
        self.log(&run, format!("[*] Starting {scan_type} scan on {}", run.target()))
            .await;
        self.emit_status(&run, ScanStatus::Running);

        for (index, &tool) in stages.iter().enumerate() {
            match self.checkpoint(&run, &mut control).await {
                Checkpoint::Continue => {}
                Checkpoint::Halt(halt) => {
                    self.finish_halted(&run, &tracker, halt).await;
                    return Ok(());
                }
            }

            run.set_progress(((index * 100) / stages.len()) as u8).await;
            tracker.begin_stage(tool);
            run.update(|job| job.current_step = Some(tool.as_str().to_string()))
                .await;
            self.log(&run, format!("[*] Starting {tool} against {}", run.target()))
                .await;
            self.emit_stats(&run, &tracker);

            // Chained stages consume the subdomains found so far.
            let stdin = if chained {
                self.stage_stdin(&run, tool).await?
            } else {
                None
            };
            if chained && matches!(tool, ScanTool::Httpx | ScanTool::Nuclei) && stdin.is_none() {
                self.log(&run, format!("[!] No subdomains found, skipping {tool}"))
                    .await;
                tracker.finish_stage(tool);
                continue;
            }

            let lines = match self
                .run_stage(&run, &mut control, &tracker, tool, stdin)
                .await?
            {
                StageRun::Completed(lines) => lines,
                StageRun::Halted(halt) => {
                    self.finish_halted(&run, &tracker, halt).await;
                    return Ok(());
                }
            };

            self.log(
                &run,
                format!("[+] {tool} finished: {} lines of output", lines.len()),
            )
            .await;
            let outcome = self
                .sink
                .ingest(run.project_id(), tool, &lines)
                .await
                .map_err(|err| PipelineError::Sink {
                    tool,
                    reason: err.to_string(),
                })?;
            self.log(
                &run,
                format!(
                    "[+] Parsed: {} new, {} duplicates",
                    outcome.new_count, outcome.duplicate_count
                ),
            )
            .await;
            tracker.record_outcome(tool, outcome);
            tracker.finish_stage(tool);
            let summary = tracker.summary.clone();
            run.update(|job| job.result_summary = summary).await;
            run.set_progress((((index + 1) * 100) / stages.len()) as u8)
                .await;
            self.emit_stats(&run, &tracker);
        }

        run.set_progress(100).await;
        self.emit_stats(&run, &tracker);
        let summary = tracker.summary.clone();
        run.update(|job| {
            job.status = ScanStatus::Completed;
            job.current_step = None;
            job.result_summary = summary;
            job.completed_at = Some(Utc::now());
        })
        .await;
        self.log(&run, "[+] Scan completed successfully!").await;
        self.emit_status(&run, ScanStatus::Completed);
        run.broker().close();
        info!(scan_id = %run.id(), "scan completed");
        Ok(())
    }

    /// Honor the desired-state flag at a stage boundary.
    ///
    /// Pause blocks here until resumed or superseded by stop/cancel.
    async fn checkpoint(
        &self,
        run: &Arc<JobRun>,
        control: &mut watch::Receiver<DesiredState>,
    ) -> Checkpoint {
        let mut paused_here = false;
        loop {
            let desired = *control.borrow_and_update();
            match desired {
                DesiredState::Run => {
                    if paused_here {
                        self.leave_pause(run).await;
                    }
                    return Checkpoint::Continue;
                }
                DesiredState::Cancel => return Checkpoint::Halt(Halt::Cancelled),
                DesiredState::Stop => return Checkpoint::Halt(Halt::Stopped),
                DesiredState::Pause => {
                    if !paused_here {
                        self.enter_pause(run).await;
                        paused_here = true;
                    }
                    if control.changed().await.is_err() {
                        return Checkpoint::Continue;
                    }
                }
            }
        }
    }

    /// Drive one tool stage: relay output lines, tick stats, and watch
    /// the desired-state channel between reads.
    async fn run_stage(
        &self,
        run: &Arc<JobRun>,
        control: &mut watch::Receiver<DesiredState>,
        tracker: &StatsTracker,
        tool: ScanTool,
        stdin: Option<String>,
    ) -> Result<StageRun, PipelineError> {
        let spawned = self
            .runner
            .spawn(ToolInvocation {
                tool,
                target: run.target().to_string(),
                stdin,
            })
            .await?;
        let mut output = spawned.output;
        let mut process = spawned.process;

        let mut ticker = tokio::time::interval(self.stats_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        let deadline = tokio::time::sleep(self.tool_timeout);
        tokio::pin!(deadline);

        let mut lines: Vec<String> = Vec::new();
        let mut paused_here = false;
        // Time left on the stage deadline while paused; the clock stops
        // with the tool and restarts on resume.
        let mut remaining_at_pause: Option<Duration> = None;
        let halt = loop {
            tokio::select! {
                biased;
                changed = control.changed() => {
                    if changed.is_err() {
                        continue;
                    }
                    let desired = *control.borrow_and_update();
                    match desired {
                        DesiredState::Run => {
                            if paused_here {
                                if let Err(err) = process.resume().await {
                                    warn!(scan_id = %run.id(), "failed to resume {tool}: {err}");
                                }
                                if let Some(remaining) = remaining_at_pause.take() {
                                    deadline
                                        .as_mut()
                                        .reset(tokio::time::Instant::now() + remaining);
                                }
                                self.leave_pause(run).await;
                                paused_here = false;
                            }
                        }
                        DesiredState::Pause => {
                            if !paused_here {
                                if let Err(err) = process.suspend().await {
                                    warn!(scan_id = %run.id(), "failed to suspend {tool}: {err}");
                                }
                                remaining_at_pause = Some(
                                    deadline
                                        .deadline()
                                        .duration_since(tokio::time::Instant::now()),
                                );
                                self.enter_pause(run).await;
                                paused_here = true;
                            }
                        }
                        DesiredState::Stop => break Some(Halt::Stopped),
                        DesiredState::Cancel => break Some(Halt::Cancelled),
                    }
                }
                maybe_line = output.recv(), if !paused_here => {
                    match maybe_line {
                        Some(line) => {
                            run.append_log(&line).await;
                            run.broker().publish(ProgressEvent::Log { line: line.clone() });
                            lines.push(line);
                        }
                        None => break None,
                    }
                }
                _ = ticker.tick(), if !paused_here => {
                    self.emit_stats(run, tracker);
                }
                _ = &mut deadline, if !paused_here => {
                    if let Err(err) = process.terminate().await {
                        warn!(scan_id = %run.id(), "failed to terminate {tool}: {err}");
                    }
                    return Err(PipelineError::ToolTimeout { tool });
                }
            }
        };

        match halt {
            Some(halt) => {
                let word = match halt {
                    Halt::Stopped => "stopped",
                    Halt::Cancelled => "cancelled",
                };
                self.log(run, format!("[!] Scan {word} by user")).await;
                if let Err(err) = process.terminate().await {
                    warn!(scan_id = %run.id(), "failed to terminate {tool}: {err}");
                }
                Ok(StageRun::Halted(halt))
            }
            None => {
                let exit = process.wait().await?;
                for err_line in &exit.stderr_tail {
                    self.log(run, format!("[stderr] {err_line}")).await;
                }
                if !exit.success {
                    return Err(PipelineError::ToolFailed {
                        tool,
                        code: exit.code,
                    });
                }
                Ok(StageRun::Completed(lines))
            }
        }
    }

    async fn stage_stdin(
        &self,
        run: &Arc<JobRun>,
        tool: ScanTool,
    ) -> Result<Option<String>, PipelineError> {
        let subdomains = match tool {
            ScanTool::Httpx | ScanTool::Nuclei => self
                .sink
                .subdomains(run.project_id())
                .await
                .map_err(|err| PipelineError::Sink {
                    tool,
                    reason: err.to_string(),
                })?,
            _ => return Ok(None),
        };
        if subdomains.is_empty() {
            return Ok(None);
        }
        let data = match tool {
            ScanTool::Nuclei => subdomains
                .iter()
                .map(|sub| format!("https://{sub}"))
                .collect::<Vec<_>>()
                .join("\n"),
            _ => subdomains.join("\n"),
        };
        Ok(Some(data))
    }

    async fn enter_pause(&self, run: &Arc<JobRun>) {
        self.log(run, "[*] Scan paused. Waiting to resume...").await;
        // current_step retained so resume picks up where it left off
        run.update(|job| job.status = ScanStatus::Paused).await;
        self.emit_status(run, ScanStatus::Paused);
        info!(scan_id = %run.id(), "scan paused");
    }

    async fn leave_pause(&self, run: &Arc<JobRun>) {
        self.log(run, "[*] Scan resumed.").await;
        run.update(|job| job.status = ScanStatus::Running).await;
        self.emit_status(run, ScanStatus::Running);
        info!(scan_id = %run.id(), "scan resumed");
    }

    /// Terminal bookkeeping for stop and cancel.
    async fn finish_halted(&self, run: &Arc<JobRun>, tracker: &StatsTracker, halt: Halt) {
        let status = match halt {
            Halt::Stopped => ScanStatus::Stopped,
            Halt::Cancelled => ScanStatus::Cancelled,
        };
        let summary = tracker.summary.clone();
        run.update(|job| {
            job.status = status;
            job.current_step = None;
            job.result_summary = summary;
            job.completed_at = Some(Utc::now());
        })
        .await;
        match halt {
            Halt::Stopped => {
                self.log(run, "[*] Scan stopped. Partial results saved.").await;
            }
            Halt::Cancelled => {
                self.log(run, "[*] Scan cancelled.").await;
            }
        }
        self.emit_status(run, status);
        run.broker().close();
        info!(scan_id = %run.id(), %status, "scan halted");
    }

    /// Terminal bookkeeping for pipeline failure. No-op if the job
    /// already reached a terminal state.
    async fn fail(&self, run: &Arc<JobRun>, reason: String) {
        if run.status().await.is_terminal() {
            return;
        }
        run.update(|job| {
            job.status = ScanStatus::Failed;
            job.current_step = None;
            job.error = Some(reason.clone());
            job.completed_at = Some(Utc::now());
        })
        .await;
        self.log(run, format!("[!] SCAN FAILED: {reason}")).await;
        self.emit_status(run, ScanStatus::Failed);
        run.broker().close();
    }

    async fn log(&self, run: &Arc<JobRun>, line: impl Into<String>) {
        let line = line.into();
        run.append_log(&line).await;
        run.broker().publish(ProgressEvent::Log { line });
    }

    fn emit_status(&self, run: &Arc<JobRun>, status: ScanStatus) {
        run.broker().publish(ProgressEvent::Status { status });
    }

    fn emit_stats(&self, run: &Arc<JobRun>, tracker: &StatsTracker) {
        run.broker().publish(ProgressEvent::Stats {
            data: tracker.snapshot(),
        });
    }
}

/// Working copy of the live counters, owned by the executing pipeline.
struct StatsTracker {
    started: Instant,
    current_tool: Option<ScanTool>,
    timings: BTreeMap<String, StageState>,
    summary: recon_model::ResultSummary,
}

impl StatsTracker {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            current_tool: None,
            timings: BTreeMap::new(),
            summary: recon_model::ResultSummary::default(),
        }
    }

    fn begin_stage(&mut self, tool: ScanTool) {
        self.current_tool = Some(tool);
        self.timings
            .insert(tool.as_str().to_string(), StageState::Running);
    }

    fn finish_stage(&mut self, tool: ScanTool) {
        self.current_tool = None;
        self.timings
            .insert(tool.as_str().to_string(), StageState::Completed);
    }

    fn record_outcome(&mut self, tool: ScanTool, outcome: StageOutcome) {
        match tool {
            ScanTool::Subfinder => self.summary.subdomains_found += outcome.new_count,
            ScanTool::Waybackurls | ScanTool::Gau | ScanTool::Katana => {
                self.summary.urls_discovered += outcome.new_count;
                self.summary.params_classified += outcome.param_count;
            }
            ScanTool::Nuclei => self.summary.findings_count += outcome.new_count,
            ScanTool::Httpx => {}
        }
        self.summary
            .stages
            .insert(tool.as_str().to_string(), outcome);
    }

    fn snapshot(&self) -> ScanStats {
        ScanStats {
            subdomains_found: self.summary.subdomains_found,
            urls_discovered: self.summary.urls_discovered,
            params_classified: self.summary.params_classified,
            findings_count: self.summary.findings_count,
            current_tool: self.current_tool.map(|tool| tool.as_str().to_string()),
            elapsed_seconds: self.started.elapsed().as_secs(),
            tool_timings: self.timings.clone(),
        }
    }
}
