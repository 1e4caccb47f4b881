//! Scripted tool runner and helpers shared by the lifecycle tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Notify, broadcast, mpsc};
use tokio::time::{sleep, timeout};

use recon_core::{
    EventFrame, MemoryProjects, MemorySink, ProjectProvider, ResultSink, ScanService,
    ScanServiceConfig, SpawnedTool, ToolExit, ToolInvocation, ToolProcess, ToolRunner,
};
use recon_core::error::ToolError;
use recon_model::{ProgressEvent, ScanId, ScanStatus, ScanTool};

/// One scripted stage execution for a fake tool.
pub struct StageScript {
    pub lines: Vec<String>,
    pub exit_code: i32,
    /// Keep the output stream open until notified; lets tests pause,
    /// stop, or cancel mid-stage deterministically.
    pub hold_open: Option<Arc<Notify>>,
}

impl StageScript {
    pub fn lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            exit_code: 0,
            hold_open: None,
        }
    }

    pub fn empty() -> Self {
        Self::lines(Vec::<String>::new())
    }

    pub fn failing(exit_code: i32) -> Self {
        Self {
            lines: Vec::new(),
            exit_code,
            hold_open: None,
        }
    }

    pub fn held(mut self, gate: Arc<Notify>) -> Self {
        self.hold_open = Some(gate);
        self
    }
}

/// Tool runner that replays scripts instead of spawning processes.
#[derive(Default)]
pub struct FakeToolRunner {
    scripts: Mutex<HashMap<ScanTool, VecDeque<StageScript>>>,
    spawned: Mutex<Vec<ScanTool>>,
    stdin_seen: Mutex<HashMap<ScanTool, Option<String>>>,
}

impl FakeToolRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, tool: ScanTool, script: StageScript) {
        self.scripts
            .lock()
            .unwrap()
            .entry(tool)
            .or_default()
            .push_back(script);
    }

    pub fn spawned_tools(&self) -> Vec<ScanTool> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn stdin_for(&self, tool: ScanTool) -> Option<String> {
        self.stdin_seen
            .lock()
            .unwrap()
            .get(&tool)
            .cloned()
            .flatten()
    }
}

#[async_trait]
impl ToolRunner for FakeToolRunner {
    async fn spawn(&self, invocation: ToolInvocation) -> Result<SpawnedTool, ToolError> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&invocation.tool)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(StageScript::empty);

        self.spawned.lock().unwrap().push(invocation.tool);
        self.stdin_seen
            .lock()
            .unwrap()
            .insert(invocation.tool, invocation.stdin.clone());

        let (tx, rx) = mpsc::channel(64);
        let kill = Arc::new(Notify::new());
        let feeder_kill = Arc::clone(&kill);
        let hold = script.hold_open.clone();
        let lines = script.lines.clone();
        tokio::spawn(async move {
            for line in lines {
                if tx.send(line).await.is_err() {
                    return;
                }
            }
            if let Some(gate) = hold {
                tokio::select! {
                    _ = gate.notified() => {}
                    _ = feeder_kill.notified() => {}
                }
            }
            // dropping tx closes the output stream
        });

        Ok(SpawnedTool {
            output: rx,
            process: Box::new(FakeProcess {
                exit_code: script.exit_code,
                kill,
                terminated: false,
            }),
        })
    }
}

struct FakeProcess {
    exit_code: i32,
    kill: Arc<Notify>,
    terminated: bool,
}

#[async_trait]
impl ToolProcess for FakeProcess {
    async fn suspend(&mut self) -> Result<(), ToolError> {
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), ToolError> {
        Ok(())
    }

    async fn terminate(&mut self) -> Result<(), ToolError> {
        self.terminated = true;
        self.kill.notify_one();
        Ok(())
    }

    async fn wait(&mut self) -> Result<ToolExit, ToolError> {
        Ok(ToolExit {
            success: self.exit_code == 0 && !self.terminated,
            code: Some(self.exit_code),
            stderr_tail: Vec::new(),
        })
    }
}

/// Service wired with the fake runner and in-memory collaborators.
pub fn service_with(
    runner: Arc<FakeToolRunner>,
) -> (Arc<ScanService>, Arc<MemorySink>, Arc<MemoryProjects>) {
    let sink = Arc::new(MemorySink::new());
    let projects = Arc::new(MemoryProjects::new());
    let service = ScanService::new(
        runner,
        Arc::clone(&sink) as Arc<dyn ResultSink>,
        Arc::clone(&projects) as Arc<dyn ProjectProvider>,
        ScanServiceConfig::default(),
    );
    (service, sink, projects)
}

/// Poll the registry until the job reaches `status` or the deadline hits.
pub async fn wait_for_status(service: &ScanService, id: &ScanId, status: ScanStatus) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let job = service.get(id).await.expect("job lookup");
        if job.status == status {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "job never reached {status}; last seen {}",
            job.status
        );
        sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until the job's current step equals `step`.
pub async fn wait_for_step(service: &ScanService, id: &ScanId, step: &str) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let job = service.get(id).await.expect("job lookup");
        if job.current_step.as_deref() == Some(step) {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "job never entered step {step}; last seen {:?}",
            job.current_step
        );
        sleep(Duration::from_millis(10)).await;
    }
}

/// Drain replay + live events until the first `done`, deduplicating by
/// frame sequence (replay and live may overlap).
pub async fn collect_until_done(
    replay: Vec<EventFrame>,
    mut rx: broadcast::Receiver<EventFrame>,
) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    let mut last_sequence = 0;
    for frame in replay {
        if frame.sequence <= last_sequence {
            continue;
        }
        last_sequence = frame.sequence;
        let done = frame.event.is_done();
        events.push(frame.event);
        if done {
            return events;
        }
    }
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        match timeout(Duration::from_millis(500), rx.recv()).await {
            Ok(Ok(frame)) => {
                if frame.sequence <= last_sequence {
                    continue;
                }
                last_sequence = frame.sequence;
                let done = frame.event.is_done();
                events.push(frame.event);
                if done {
                    return events;
                }
            }
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) => break,
            Err(_) => {}
        }
    }
    panic!("stream never delivered a done event; saw {} events", events.len());
}
