//! Coordinator state machine.
//!
//! Everything here runs under the coordinator mutex and never blocks, spawns or calls a display.
//! Transitions queue display calls on the outbox and hand back the worker job to start, if any.

use super::dispatch::{Delivery, DisplayCall};
use super::worker::{Job, OpTicket, ReportKind, WorkerReport};
use crate::display::{Attachment, UpdateDisplay};
use crate::error::FetchFailure;
use crate::model::{
    CheckOutcome, CheckRequest, CoordinatorState, DownloadOutcome, ExecutionStatus,
    MonitorAction, ProgressUpdate, Runner, RunnerProgress, UpdateDefinition, UpdatePayload,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const CHECK_FAILED: &str = "Checking for updates failed";
const DOWNLOAD_FAILED: &str = "Downloading updates failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Check,
    Download,
}

struct ActiveOp {
    id: u64,
    phase: Phase,
    cancel: Arc<AtomicBool>,
}

pub(crate) struct Core {
    state: CoordinatorState,
    state_tx: watch::Sender<CoordinatorState>,
    next_op_id: u64,
    active: Option<ActiveOp>,
    failed_phase: Option<Phase>,
    full_reload: bool,
    /// Full reload waiting for data: continue into loading without a decision.
    auto_continue: bool,
    definition: Option<UpdateDefinition>,
    payload: Option<UpdatePayload>,
    last_error: Option<FetchFailure>,
    progress: BTreeMap<Runner, RunnerProgress>,
    buttons: Vec<MonitorAction>,
    wake_mode: bool,
    pub(crate) attachment: Attachment,
    pub(crate) outbox: VecDeque<Delivery>,
}

impl Core {
    pub fn new(state_tx: watch::Sender<CoordinatorState>) -> Self {
        Self {
            state: CoordinatorState::Initial,
            state_tx,
            next_op_id: 1,
            active: None,
            failed_phase: None,
            full_reload: false,
            auto_continue: false,
            definition: None,
            payload: None,
            last_error: None,
            progress: BTreeMap::new(),
            buttons: Vec::new(),
            wake_mode: false,
            attachment: Attachment::default(),
            outbox: VecDeque::new(),
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn last_error(&self) -> Option<&FetchFailure> {
        self.last_error.as_ref()
    }

    pub fn definition(&self) -> Option<&UpdateDefinition> {
        self.definition.as_ref()
    }

    pub fn progress(&self, runner: Runner) -> Option<&RunnerProgress> {
        self.progress.get(&runner)
    }

    pub fn buttons(&self) -> &[MonitorAction] {
        &self.buttons
    }

    pub fn is_full_reload(&self) -> bool {
        self.full_reload
    }

    #[cfg(test)]
    fn wake_mode(&self) -> bool {
        self.wake_mode
    }

    // ---- commands ----

    pub fn restart(&mut self, full_reload: bool) -> Option<Job> {
        if !self.state.can_restart() {
            warn!(state = %self.state, full_reload, "restart rejected");
            return None;
        }
        Some(self.begin_check(full_reload))
    }

    pub fn start_loading(&mut self) -> Option<Job> {
        match self.state {
            CoordinatorState::Ready2Start | CoordinatorState::Cancelled => {
                Some(self.begin_loading())
            }
            other => {
                warn!(state = %other, "start loading rejected");
                None
            }
        }
    }

    pub fn cancel(&mut self) -> bool {
        if !self.state.is_busy() {
            warn!(state = %self.state, "cancel rejected");
            return false;
        }
        if let Some(op) = self.active.take() {
            op.cancel.store(true, Ordering::Relaxed);
            debug!(op = op.id, phase = ?op.phase, "cancel requested");
        }
        let was_loading = self.state == CoordinatorState::Loading;
        self.auto_continue = false;
        self.set_state(CoordinatorState::Cancelled);

        let running: Vec<Runner> = self
            .progress
            .iter()
            .filter(|(_, p)| p.status == ExecutionStatus::Running)
            .map(|(r, _)| *r)
            .collect();
        for runner in running {
            self.record_progress(ProgressUpdate::Status {
                runner,
                status: ExecutionStatus::Cancelled,
            });
        }
        if was_loading {
            self.set_wake_mode(false);
        }
        self.set_buttons(Vec::new());
        true
    }

    pub fn retry(&mut self) -> Option<Job> {
        if self.state != CoordinatorState::Failure {
            warn!(state = %self.state, "retry rejected");
            return None;
        }
        match self.failed_phase {
            Some(Phase::Download) => Some(self.begin_loading()),
            Some(Phase::Check) | None => Some(self.begin_check(self.full_reload)),
        }
    }

    pub fn apply(&mut self) -> Option<Option<Job>> {
        if self.state != CoordinatorState::Finished {
            warn!(state = %self.state, "apply rejected");
            return None;
        }
        let payload = self.payload.take();
        self.set_state(CoordinatorState::Applied);
        self.set_buttons(Vec::new());
        Some(payload.map(|payload| Job::Commit { payload }))
    }

    /// Returns `false` when `display` was already attached.
    pub fn attach(&mut self, display: &Arc<dyn UpdateDisplay>) -> bool {
        let newly = self.attachment.attach(display);
        debug!(generation = self.attachment.generation, newly, state = %self.state, "display attached");
        self.resync();
        newly
    }

    pub fn detach(&mut self, display: &Arc<dyn UpdateDisplay>) -> bool {
        let detached = self.attachment.detach(display);
        if detached {
            debug!(generation = self.attachment.generation, "display detached");
        }
        detached
    }

    /// Marks the active worker cancelled without a state transition (process exit).
    pub fn abandon(&mut self) {
        if let Some(op) = self.active.take() {
            op.cancel.store(true, Ordering::Relaxed);
        }
    }

    // ---- worker reports ----

    pub fn apply_report(&mut self, report: WorkerReport) -> Option<Job> {
        match &self.active {
            Some(op) if op.id == report.op_id => {}
            _ => {
                debug!(op = report.op_id, state = %self.state, "discarding stale worker report");
                return None;
            }
        }

        match report.kind {
            ReportKind::Progress(update) => {
                self.record_progress(update);
                None
            }
            ReportKind::Checked(Ok(CheckOutcome::UpdatesAvailable(definition))) => {
                self.active = None;
                info!(version = %definition.version, items = definition.items.len(), "updates available");
                self.definition = Some(definition);
                self.finish_runner(Runner::Definition, ExecutionStatus::Succeeded);
                self.set_state(CoordinatorState::Ready2Start);

                if self.auto_continue && self.attachment.live().is_none() {
                    info!("no display attached, continuing full reload automatically");
                    return Some(self.begin_loading());
                }
                self.push(DisplayCall::Success(CoordinatorState::Ready2Start));
                None
            }
            ReportKind::Checked(Ok(CheckOutcome::NoUpdates)) => {
                self.active = None;
                self.auto_continue = false;
                self.finish_runner(Runner::Definition, ExecutionStatus::Succeeded);
                self.set_state(CoordinatorState::NoUpdates);
                self.push(DisplayCall::Success(CoordinatorState::NoUpdates));
                None
            }
            ReportKind::Checked(Err(err)) => {
                self.finish_runner(Runner::Definition, ExecutionStatus::Failed);
                self.fail(Phase::Check, FetchFailure::from_error(CHECK_FAILED, &err));
                None
            }
            ReportKind::Downloaded(Ok(DownloadOutcome::Loaded(payload))) => {
                self.active = None;
                info!(version = %payload.version, items = payload.items.len(), "updates loaded");
                self.payload = Some(payload);
                self.set_state(CoordinatorState::Finished);
                self.set_wake_mode(false);
                self.set_buttons(vec![MonitorAction::ApplyUpdate]);
                self.push(DisplayCall::Success(CoordinatorState::Finished));
                None
            }
            ReportKind::Downloaded(Ok(DownloadOutcome::NothingToLoad)) => {
                self.active = None;
                self.set_state(CoordinatorState::NoUpdates);
                self.set_wake_mode(false);
                self.set_buttons(Vec::new());
                self.push(DisplayCall::Success(CoordinatorState::NoUpdates));
                None
            }
            ReportKind::Downloaded(Err(err)) => {
                self.fail(Phase::Download, FetchFailure::from_error(DOWNLOAD_FAILED, &err));
                None
            }
        }
    }

    // ---- transitions ----

    fn begin_check(&mut self, full_reload: bool) -> Job {
        let ticket = self.new_op(Phase::Check);
        self.full_reload = full_reload;
        self.auto_continue = full_reload;
        self.failed_phase = None;
        self.last_error = None;
        self.definition = None;
        self.payload = None;
        self.progress.clear();
        self.set_state(CoordinatorState::Inquiring);
        self.set_buttons(vec![MonitorAction::CancelUpdate]);
        self.record_progress(ProgressUpdate::Indeterminate {
            runner: Runner::Definition,
            on: true,
        });
        self.record_progress(ProgressUpdate::Start(Runner::Definition));
        Job::Check {
            ticket,
            request: CheckRequest { full_reload },
        }
    }

    fn begin_loading(&mut self) -> Job {
        let ticket = self.new_op(Phase::Download);
        self.auto_continue = false;
        self.failed_phase = None;
        self.last_error = None;
        self.payload = None;
        self.progress.retain(|runner, _| *runner == Runner::Definition);
        self.set_state(CoordinatorState::Loading);
        self.set_buttons(vec![MonitorAction::GoBackground, MonitorAction::CancelUpdate]);
        self.set_wake_mode(true);
        Job::Download {
            ticket,
            definition: self.definition.clone(),
        }
    }

    fn fail(&mut self, phase: Phase, failure: FetchFailure) {
        warn!(?phase, title = %failure.title, details = %failure.details, "update failed");
        let was_loading = self.state == CoordinatorState::Loading;
        self.active = None;
        self.auto_continue = false;
        self.failed_phase = Some(phase);
        self.last_error = Some(failure.clone());
        self.set_state(CoordinatorState::Failure);
        if was_loading {
            self.set_wake_mode(false);
        }
        self.push(DisplayCall::ErrorMessage(failure.clone()));
        self.set_buttons(vec![
            MonitorAction::RetryDownload,
            MonitorAction::ChangeSettings,
            MonitorAction::CloseUpdate,
        ]);
        self.push(DisplayCall::Failure(failure));
    }

    fn new_op(&mut self, phase: Phase) -> OpTicket {
        let id = self.next_op_id;
        self.next_op_id += 1;
        let cancel = Arc::new(AtomicBool::new(false));
        self.active = Some(ActiveOp {
            id,
            phase,
            cancel: cancel.clone(),
        });
        OpTicket { id, cancel }
    }

    fn set_state(&mut self, next: CoordinatorState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "coordinator state");
        }
        self.state = next;
        self.state_tx.send_replace(next);
    }

    fn set_buttons(&mut self, buttons: Vec<MonitorAction>) {
        self.buttons = buttons.clone();
        self.push(DisplayCall::Buttons(buttons));
    }

    fn set_wake_mode(&mut self, on: bool) {
        self.wake_mode = on;
        self.push(DisplayCall::WakeMode(on));
    }

    fn finish_runner(&mut self, runner: Runner, status: ExecutionStatus) {
        self.record_progress(ProgressUpdate::Indeterminate { runner, on: false });
        self.record_progress(ProgressUpdate::Status { runner, status });
    }

    fn record_progress(&mut self, update: ProgressUpdate) {
        let p = self.progress.entry(update.runner()).or_default();
        match &update {
            ProgressUpdate::Start(_) => p.status = ExecutionStatus::Running,
            ProgressUpdate::Max { max, .. } => p.max = Some(*max),
            ProgressUpdate::Current {
                value,
                follower,
                status,
                ..
            } => {
                p.value = *value;
                if let Some(f) = follower {
                    p.follower = Some(f.clone());
                }
                if let Some(s) = status {
                    p.status = *s;
                }
            }
            ProgressUpdate::Status { status, .. } => p.status = *status,
            ProgressUpdate::Summary { text, .. } => p.summary = Some(text.clone()),
            ProgressUpdate::Indeterminate { on, .. } => p.indeterminate = *on,
        }
        self.push(DisplayCall::Progress(update));
    }

    /// Replay everything a freshly attached display needs to show the current picture.
    fn resync(&mut self) {
        self.push(DisplayCall::WakeMode(self.wake_mode));
        let snapshot: Vec<(Runner, RunnerProgress)> =
            self.progress.iter().map(|(r, p)| (*r, p.clone())).collect();
        for (runner, p) in snapshot {
            if let Some(max) = p.max {
                self.push(DisplayCall::Progress(ProgressUpdate::Max { runner, max }));
            }
            self.push(DisplayCall::Progress(ProgressUpdate::Current {
                runner,
                value: p.value,
                follower: p.follower.clone(),
                status: Some(p.status),
            }));
            if let Some(text) = p.summary {
                self.push(DisplayCall::Progress(ProgressUpdate::Summary { runner, text }));
            }
            self.push(DisplayCall::Progress(ProgressUpdate::Indeterminate {
                runner,
                on: p.indeterminate,
            }));
        }
        self.push(DisplayCall::Buttons(self.buttons.clone()));
        if self.state == CoordinatorState::Failure {
            if let Some(err) = self.last_error.clone() {
                self.push(DisplayCall::ErrorMessage(err));
            }
        }
    }

    /// Queue a call for the attached display. Nothing is queued while the slot is empty:
    /// the next attach resyncs from the recorded snapshot instead.
    fn push(&mut self, call: DisplayCall) {
        if self.attachment.live().is_none() {
            return;
        }
        self.outbox.push_back(Delivery {
            generation: self.attachment.generation,
            call,
        });
    }
}
