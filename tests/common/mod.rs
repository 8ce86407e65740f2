#![allow(dead_code)]

use anyhow::anyhow;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use update_coordinator::{
    CheckOutcome, CheckRequest, Coordinator, CoordinatorState, DecisionPrompt, DownloadOutcome,
    ExecutionStatus, FetchFailure, FetchSubsystem, MonitorAction, Persistence, ProgressUpdate,
    Runner, SessionSurfaces, UpdateDefinition, UpdateDisplay, UpdateEvent, UpdateItem,
    UpdatePayload, WorkerContext,
};

const WAIT: Duration = Duration::from_secs(5);

pub enum Step<T> {
    Report(ProgressUpdate),
    Finish(anyhow::Result<T>),
    Panic,
}

/// One invocation of the fetch subsystem, driven by the test.
pub struct Call<A, T> {
    pub args: A,
    pub op_id: u64,
    tx: mpsc::UnboundedSender<Step<T>>,
}

impl<A, T> Call<A, T> {
    pub fn report(&self, update: ProgressUpdate) {
        let _ = self.tx.send(Step::Report(update));
    }

    pub fn finish(self, outcome: anyhow::Result<T>) {
        let _ = self.tx.send(Step::Finish(outcome));
    }

    pub fn panic(self) {
        let _ = self.tx.send(Step::Panic);
    }
}

pub type CheckCall = Call<CheckRequest, CheckOutcome>;
pub type DownloadCall = Call<Option<UpdateDefinition>, DownloadOutcome>;

pub struct ScriptedFetcher {
    checks: mpsc::UnboundedSender<CheckCall>,
    downloads: mpsc::UnboundedSender<DownloadCall>,
}

pub struct Script {
    checks: mpsc::UnboundedReceiver<CheckCall>,
    downloads: mpsc::UnboundedReceiver<DownloadCall>,
}

impl Script {
    pub async fn next_check(&mut self) -> CheckCall {
        tokio::time::timeout(WAIT, self.checks.recv())
            .await
            .expect("no check was started")
            .expect("fetcher dropped")
    }

    pub async fn next_download(&mut self) -> DownloadCall {
        tokio::time::timeout(WAIT, self.downloads.recv())
            .await
            .expect("no download was started")
            .expect("fetcher dropped")
    }

    pub fn no_pending_download(&mut self) -> bool {
        self.downloads.try_recv().is_err()
    }
}

pub fn scripted() -> (Arc<ScriptedFetcher>, Script) {
    let (check_tx, checks) = mpsc::unbounded_channel();
    let (download_tx, downloads) = mpsc::unbounded_channel();
    (
        Arc::new(ScriptedFetcher {
            checks: check_tx,
            downloads: download_tx,
        }),
        Script { checks, downloads },
    )
}

async fn drive<T>(mut rx: mpsc::UnboundedReceiver<Step<T>>, ctx: &WorkerContext) -> anyhow::Result<T> {
    while let Some(step) = rx.recv().await {
        match step {
            Step::Report(update) => ctx.report(update),
            Step::Finish(outcome) => {
                ctx.checkpoint()?;
                return outcome;
            }
            Step::Panic => panic!("scripted worker panic"),
        }
    }
    Err(anyhow!("call dropped without an outcome"))
}

#[async_trait]
impl FetchSubsystem for ScriptedFetcher {
    async fn check(&self, request: CheckRequest, ctx: &WorkerContext) -> anyhow::Result<CheckOutcome> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.checks.send(Call {
            args: request,
            op_id: ctx.op_id(),
            tx,
        });
        drive(rx, ctx).await
    }

    async fn download(
        &self,
        definition: Option<UpdateDefinition>,
        ctx: &WorkerContext,
    ) -> anyhow::Result<DownloadOutcome> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.downloads.send(Call {
            args: definition,
            op_id: ctx.op_id(),
            tx,
        });
        drive(rx, ctx).await
    }
}

pub struct RecordingPersistence {
    tx: mpsc::UnboundedSender<UpdatePayload>,
}

pub fn recording_persistence() -> (Arc<RecordingPersistence>, mpsc::UnboundedReceiver<UpdatePayload>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(RecordingPersistence { tx }), rx)
}

#[async_trait]
impl Persistence for RecordingPersistence {
    async fn commit(&self, payload: UpdatePayload) -> anyhow::Result<()> {
        let _ = self.tx.send(payload);
        Ok(())
    }
}

pub fn definition(version: &str) -> UpdateDefinition {
    UpdateDefinition {
        version: version.into(),
        summary: "timetable refresh".into(),
        items: vec![UpdateItem {
            name: "stops.db".into(),
            url: "stops.db".into(),
            size: Some(100),
            runner: Runner::Database,
        }],
    }
}

pub fn payload(version: &str) -> UpdatePayload {
    UpdatePayload {
        version: version.into(),
        staging_dir: None,
        items: Vec::new(),
    }
}

pub fn failure(title: &str, details: &str) -> anyhow::Error {
    anyhow::Error::new(FetchFailure::new(title, details))
}

pub async fn wait_for_state(coordinator: &Coordinator, state: CoordinatorState) {
    let mut rx = coordinator.watch_state();
    tokio::time::timeout(WAIT, rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("coordinator never reached {state}, stuck in {}", coordinator.state()))
        .expect("coordinator dropped");
    coordinator.flush().await;
}

/// Poll `cond` until it holds; worker reports travel through a channel first.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "condition never held");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[derive(Default)]
pub struct Log(Mutex<Vec<String>>);

impl Log {
    pub fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.0.lock().unwrap().iter().any(|e| e == entry)
    }
}

/// Display that records every callback as a short string.
#[derive(Default)]
pub struct RecordingDisplay {
    pub log: Log,
}

impl UpdateDisplay for RecordingDisplay {
    fn set_progress_max(&self, runner: Runner, max: u64) {
        self.log.push(format!("max {} {max}", runner.label()));
    }

    fn set_current_progress(
        &self,
        runner: Runner,
        value: u64,
        _follower: Option<&str>,
        status: Option<ExecutionStatus>,
    ) {
        self.log
            .push(format!("current {} {value} {status:?}", runner.label()));
    }

    fn set_execution_status(&self, runner: Runner, status: ExecutionStatus) {
        self.log.push(format!("status {} {status:?}", runner.label()));
    }

    fn set_progress_summary(&self, runner: Runner, text: &str) {
        self.log.push(format!("summary {} {text}", runner.label()));
    }

    fn set_indeterminate(&self, runner: Runner, on: bool) {
        self.log.push(format!("indeterminate {} {on}", runner.label()));
    }

    fn set_update_error_message(&self, _: &Coordinator, title: &str, details: &str) {
        self.log.push(format!("error {title}: {details}"));
    }

    fn set_buttons(&self, actions: &[MonitorAction]) {
        self.log.push(format!("buttons {actions:?}"));
    }

    fn on_start(&self, runner: Runner) {
        self.log.push(format!("start {}", runner.label()));
    }

    fn on_success(&self, _: &Coordinator, state: CoordinatorState) {
        self.log.push(format!("success {state}"));
    }

    fn on_failure(&self, _: &Coordinator, failure: &FetchFailure) {
        self.log.push(format!("failure {}", failure.title));
    }

    fn set_wake_mode(&self, on: bool) {
        self.log.push(format!("wake {on}"));
    }
}

/// Host surfaces that record calls. The monitor attaches a [`RecordingDisplay`] like a real
/// monitor surface would.
pub struct RecordingSurfaces {
    pub log: Log,
    coordinator: Coordinator,
    pub monitor: Mutex<Option<Arc<RecordingDisplay>>>,
}

impl RecordingSurfaces {
    pub fn new(coordinator: Coordinator) -> Arc<Self> {
        Arc::new(Self {
            log: Log::default(),
            coordinator,
            monitor: Mutex::new(None),
        })
    }

    pub fn monitor_log(&self) -> Vec<String> {
        self.monitor
            .lock()
            .unwrap()
            .as_ref()
            .map(|m| m.log.snapshot())
            .unwrap_or_default()
    }
}

impl SessionSurfaces for RecordingSurfaces {
    fn show_progress(&self) {
        self.log.push("show progress".into());
    }

    fn hide_progress(&self) {
        self.log.push("hide progress".into());
    }

    fn open_decision_prompt(&self, prompt: &DecisionPrompt) {
        let entry = match prompt {
            DecisionPrompt::Offer { version, .. } => {
                format!("open prompt offer {}", version.as_deref().unwrap_or("?"))
            }
            DecisionPrompt::Failure { title, .. } => format!("open prompt failure {title}"),
        };
        self.log.push(entry);
    }

    fn close_decision_prompt(&self) {
        self.log.push("close prompt".into());
    }

    fn open_monitor(&self) {
        self.log.push("open monitor".into());
        let monitor = Arc::new(RecordingDisplay::default());
        let display: Arc<dyn UpdateDisplay> = monitor.clone();
        self.coordinator.attach_display(&display);
        *self.monitor.lock().unwrap() = Some(monitor);
    }

    fn close_monitor(&self) {
        self.log.push("close monitor".into());
        let monitor = self.monitor.lock().unwrap().take();
        if let Some(m) = monitor {
            let display: Arc<dyn UpdateDisplay> = m;
            self.coordinator.detach_display(&display);
        }
    }

    fn indicate_background(&self, state: CoordinatorState) {
        self.log.push(format!("indicate {state}"));
    }

    fn hide_background_indicator(&self) {
        self.log.push("hide indicator".into());
    }

    fn show_status_message(&self, title: &str, _details: &str) {
        self.log.push(format!("status message {title}"));
    }

    fn open_settings(&self) {
        self.log.push("open settings".into());
    }

    fn suspend_background_services(&self) {
        self.log.push("suspend services".into());
    }

    fn resume_background_services(&self) {
        self.log.push("resume services".into());
    }
}

pub fn event_recorder(bus: &update_coordinator::EventBus) -> Arc<Mutex<Vec<UpdateEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    bus.subscribe(Arc::new(move |e: UpdateEvent| sink.lock().unwrap().push(e)));
    events
}
