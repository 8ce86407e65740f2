//! Per-session controller layered on the coordinator.
//!
//! A session owns nothing but its own belief about where the workflow stands. Every
//! operation decides under the session lock, then drives host surfaces and raises events
//! with the lock released.

mod record;
mod surfaces;

pub use record::{SessionRecord, SessionStore};
pub use surfaces::{DecisionPrompt, SessionSurfaces};

use crate::coordinator::Coordinator;
use crate::display::UpdateDisplay;
use crate::error::{FetchFailure, IllegalStateError, SessionRecordError};
use crate::events::EventBus;
use crate::model::{ControlMode, CoordinatorState, MonitorAction, SessionState, UpdateEvent};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, error, info, warn};

enum Effect {
    ShowProgress,
    HideProgress,
    OpenPrompt(DecisionPrompt),
    ClosePrompt,
    OpenMonitor,
    CloseMonitor,
    Indicate(CoordinatorState),
    HideIndicator,
    StatusMessage { title: String, details: String },
    OpenSettings,
    SuspendServices,
    ResumeServices,
    Notify(UpdateEvent),
}

/// Surfaces this controller currently shows.
#[derive(Default)]
struct Shown {
    progress: bool,
    prompt: Option<DecisionPrompt>,
    monitor: bool,
    indicator: Option<CoordinatorState>,
}

struct Local {
    state: SessionState,
    mode: ControlMode,
    shown: Shown,
    illegal: Option<IllegalStateError>,
    fx: Vec<Effect>,
}

impl Local {
    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "session state");
        }
        self.state = next;
    }

    fn halted(&self) -> bool {
        self.state == SessionState::Illegal
    }

    fn show_progress(&mut self) {
        if !self.shown.progress {
            self.shown.progress = true;
            self.fx.push(Effect::ShowProgress);
        }
    }

    fn hide_progress(&mut self) {
        if self.shown.progress {
            self.shown.progress = false;
            self.fx.push(Effect::HideProgress);
        }
    }

    fn open_prompt(&mut self, prompt: DecisionPrompt) {
        match &self.shown.prompt {
            Some(open) if *open == prompt => return,
            Some(_) => self.fx.push(Effect::ClosePrompt),
            None => {}
        }
        self.shown.prompt = Some(prompt.clone());
        self.fx.push(Effect::OpenPrompt(prompt));
    }

    fn close_prompt(&mut self) {
        if self.shown.prompt.take().is_some() {
            self.fx.push(Effect::ClosePrompt);
        }
    }

    fn open_monitor(&mut self) {
        if !self.shown.monitor {
            self.shown.monitor = true;
            self.fx.push(Effect::OpenMonitor);
        }
    }

    fn close_monitor(&mut self) {
        if self.shown.monitor {
            self.shown.monitor = false;
            self.fx.push(Effect::CloseMonitor);
        }
    }

    fn indicate(&mut self, state: CoordinatorState) {
        if self.shown.indicator != Some(state) {
            self.shown.indicator = Some(state);
            self.fx.push(Effect::Indicate(state));
        }
    }

    fn hide_indicator(&mut self) {
        if self.shown.indicator.take().is_some() {
            self.fx.push(Effect::HideIndicator);
        }
    }

    fn notify(&mut self, event: UpdateEvent) {
        self.fx.push(Effect::Notify(event));
    }
}

struct SessionInner {
    coordinator: Coordinator,
    surfaces: Arc<dyn SessionSurfaces>,
    events: EventBus,
    me: Weak<SessionInner>,
    local: Mutex<Local>,
}

impl SessionInner {
    fn lock(&self) -> MutexGuard<'_, Local> {
        self.local.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide under the lock, act after it.
    fn step<R>(&self, f: impl FnOnce(&Self, &mut Local) -> R) -> R {
        let (result, fx) = {
            let mut local = self.lock();
            let result = f(self, &mut *local);
            (result, std::mem::take(&mut local.fx))
        };
        self.run(fx);
        result
    }

    fn run(&self, fx: Vec<Effect>) {
        let s = &self.surfaces;
        for effect in fx {
            match effect {
                Effect::ShowProgress => s.show_progress(),
                Effect::HideProgress => s.hide_progress(),
                Effect::OpenPrompt(p) => s.open_decision_prompt(&p),
                Effect::ClosePrompt => s.close_decision_prompt(),
                Effect::OpenMonitor => s.open_monitor(),
                Effect::CloseMonitor => s.close_monitor(),
                Effect::Indicate(state) => s.indicate_background(state),
                Effect::HideIndicator => s.hide_background_indicator(),
                Effect::StatusMessage { title, details } => s.show_status_message(&title, &details),
                Effect::OpenSettings => s.open_settings(),
                Effect::SuspendServices => s.suspend_background_services(),
                Effect::ResumeServices => s.resume_background_services(),
                Effect::Notify(event) => self.events.notify(event),
            }
        }
    }

    fn as_display(&self) -> Option<Arc<dyn UpdateDisplay>> {
        let me: Arc<dyn UpdateDisplay> = self.me.upgrade()?;
        Some(me)
    }

    /// Attach and report the coordinator state this session may have missed, if any.
    fn attach(&self) -> Option<CoordinatorState> {
        let display = self.as_display()?;
        let attached = self.coordinator.attach_display(&display);
        (!attached.was_attached).then_some(attached.state)
    }

    fn detach(&self) {
        if let Some(display) = self.as_display() {
            self.coordinator.detach_display(&display);
        }
    }

    fn offer(&self) -> DecisionPrompt {
        let definition = self.coordinator.update_definition();
        DecisionPrompt::Offer {
            version: definition.as_ref().map(|d| d.version.clone()),
            summary: definition.map(|d| d.summary),
            full_reload: self.coordinator.is_full_reload(),
        }
    }

    fn failure_prompt(&self) -> DecisionPrompt {
        let f = self.current_failure();
        DecisionPrompt::Failure {
            title: f.title,
            details: f.details,
        }
    }

    fn current_failure(&self) -> FetchFailure {
        FetchFailure::new(
            self.coordinator
                .last_error_title()
                .unwrap_or_else(|| "Update failed".to_string()),
            self.coordinator.last_error_details().unwrap_or_default(),
        )
    }

    // ---- reconciliation ----

    fn connect(&self, l: &mut Local) {
        match l.state {
            SessionState::Zero => self.connect_fresh(l, self.coordinator.state()),
            SessionState::Waiting => {
                l.show_progress();
                if let Some(missed) = self.attach() {
                    self.replay_waiting(l, missed);
                }
            }
            SessionState::Deciding => match self.coordinator.state() {
                CoordinatorState::Ready2Start | CoordinatorState::Cancelled => {
                    l.open_prompt(self.offer())
                }
                CoordinatorState::Failure => l.open_prompt(self.failure_prompt()),
                _ => self.reconcile_fresh(l),
            },
            SessionState::Foreground => {
                if self.coordinator.state() == CoordinatorState::Initial {
                    self.reconcile_fresh(l);
                } else {
                    l.open_monitor();
                }
            }
            SessionState::Background => {
                l.indicate(CoordinatorState::Loading);
                if let Some(missed) = self.attach() {
                    self.replay_background(l, missed);
                }
            }
            SessionState::Illegal
            | SessionState::Nothing2Do
            | SessionState::Postponed
            | SessionState::Interrupted
            | SessionState::Success
            | SessionState::Failure
            | SessionState::Applied => {}
        }
    }

    /// What a session with no history does given the coordinator's state.
    fn connect_fresh(&self, l: &mut Local, coordinator: CoordinatorState) {
        match coordinator {
            CoordinatorState::Initial | CoordinatorState::Applied => {}
            CoordinatorState::Finished => {
                l.open_monitor();
                l.set_state(SessionState::Foreground);
            }
            CoordinatorState::Inquiring => {
                l.show_progress();
                l.set_state(SessionState::Waiting);
                if let Some(missed) = self.attach() {
                    self.replay_waiting(l, missed);
                }
            }
            CoordinatorState::Ready2Start | CoordinatorState::Cancelled => {
                l.open_prompt(self.offer());
                l.set_state(SessionState::Deciding);
            }
            CoordinatorState::NoUpdates => l.set_state(SessionState::Nothing2Do),
            CoordinatorState::Failure => {
                l.open_prompt(self.failure_prompt());
                l.set_state(SessionState::Deciding);
            }
            CoordinatorState::Loading => {
                l.set_state(SessionState::Background);
                l.indicate(CoordinatorState::Loading);
                if let Some(missed) = self.attach() {
                    self.replay_background(l, missed);
                }
            }
        }
    }

    /// Drop whatever this session believed and reconcile from scratch.
    fn reconcile_fresh(&self, l: &mut Local) {
        debug!(state = %l.state, "reconciling as a fresh session");
        self.detach();
        l.hide_progress();
        l.close_prompt();
        l.hide_indicator();
        l.mode = ControlMode::Interactive;
        l.set_state(SessionState::Zero);
        self.connect_fresh(l, self.coordinator.state());
    }

    /// A waiting session attached after the check may already have concluded.
    fn replay_waiting(&self, l: &mut Local, coordinator: CoordinatorState) {
        match coordinator {
            CoordinatorState::Inquiring => {}
            CoordinatorState::Ready2Start | CoordinatorState::NoUpdates => {
                self.success(l, coordinator)
            }
            CoordinatorState::Failure => {
                let f = self.current_failure();
                self.failure(l, &f);
            }
            CoordinatorState::Initial
            | CoordinatorState::Cancelled
            | CoordinatorState::Loading
            | CoordinatorState::Finished
            | CoordinatorState::Applied => self.reconcile_fresh(l),
        }
    }

    fn replay_background(&self, l: &mut Local, coordinator: CoordinatorState) {
        match coordinator {
            CoordinatorState::Loading => {}
            CoordinatorState::Finished => self.success(l, coordinator),
            CoordinatorState::Failure => {
                let f = self.current_failure();
                self.failure(l, &f);
            }
            CoordinatorState::Initial
            | CoordinatorState::Inquiring
            | CoordinatorState::Ready2Start
            | CoordinatorState::NoUpdates
            | CoordinatorState::Cancelled
            | CoordinatorState::Applied => self.reconcile_fresh(l),
        }
    }

    fn illegal(&self, l: &mut Local, callback: &'static str, coordinator: CoordinatorState) {
        let err = IllegalStateError {
            session: l.state,
            coordinator,
            callback,
        };
        error!(%err, "session halted");
        l.illegal = Some(err);
        l.set_state(SessionState::Illegal);
        self.detach();
    }

    // ---- outcomes ----

    fn success(&self, l: &mut Local, reported: CoordinatorState) {
        match l.state {
            SessionState::Waiting => match reported {
                CoordinatorState::Ready2Start => {
                    l.hide_progress();
                    self.detach();
                    if l.mode == ControlMode::Automatic {
                        l.mode = ControlMode::Interactive;
                        l.fx.push(Effect::SuspendServices);
                        if self.coordinator.start_update_loading() {
                            l.open_monitor();
                            l.set_state(SessionState::Foreground);
                            l.notify(UpdateEvent::Started);
                        } else {
                            warn!("automatic load was refused");
                            l.fx.push(Effect::ResumeServices);
                            self.reconcile_fresh(l);
                        }
                    } else {
                        l.open_prompt(self.offer());
                        l.set_state(SessionState::Deciding);
                    }
                }
                CoordinatorState::NoUpdates => {
                    l.hide_progress();
                    self.detach();
                    l.set_state(SessionState::Nothing2Do);
                    l.notify(UpdateEvent::Finished);
                }
                other => self.illegal(l, "on_success", other),
            },
            SessionState::Background => {
                self.detach();
                l.set_state(SessionState::Success);
                l.indicate(CoordinatorState::Finished);
                l.notify(UpdateEvent::Finished);
            }
            SessionState::Foreground => {
                l.set_state(SessionState::Success);
                l.notify(UpdateEvent::Finished);
            }
            _ => self.illegal(l, "on_success", reported),
        }
    }

    fn failure(&self, l: &mut Local, failure: &FetchFailure) {
        match l.state {
            SessionState::Waiting => {
                l.hide_progress();
                self.detach();
                l.open_prompt(DecisionPrompt::Failure {
                    title: failure.title.clone(),
                    details: failure.details.clone(),
                });
                l.set_state(SessionState::Deciding);
            }
            SessionState::Background => {
                self.detach();
                l.set_state(SessionState::Failure);
                l.indicate(CoordinatorState::Failure);
            }
            SessionState::Foreground => {
                l.fx.push(Effect::ResumeServices);
                l.set_state(SessionState::Failure);
            }
            _ => {
                self.illegal(l, "on_failure", CoordinatorState::Failure);
                return;
            }
        }
        l.notify(UpdateEvent::Failed);
    }

    // ---- commands ----

    fn check(&self, l: &mut Local, full_reload: bool) -> bool {
        if l.halted() || self.coordinator.is_busy() {
            return false;
        }
        l.hide_indicator();
        l.close_monitor();
        l.show_progress();
        l.set_state(SessionState::Waiting);
        if full_reload {
            l.mode = ControlMode::Automatic;
            l.fx.push(Effect::SuspendServices);
        } else {
            l.mode = ControlMode::Interactive;
        }
        self.attach();

        let accepted = if full_reload {
            self.coordinator.restart_for_full_reload()
        } else {
            self.coordinator.restart_update_definition_loading()
        };
        if !accepted {
            debug!(coordinator = %self.coordinator.state(), "restart refused");
            if full_reload {
                l.mode = ControlMode::Interactive;
                l.fx.push(Effect::ResumeServices);
            }
            self.reconcile_fresh(l);
        }
        accepted
    }

    fn enter_background(&self, l: &mut Local) {
        l.set_state(SessionState::Background);
        l.indicate(CoordinatorState::Loading);
        if let Some(missed) = self.attach() {
            self.replay_background(l, missed);
        }
    }

    fn go_background(&self, l: &mut Local) {
        l.close_monitor();
        l.fx.push(Effect::ResumeServices);
        l.notify(UpdateEvent::Started);
        self.enter_background(l);
    }

    fn cancelled(&self, l: &mut Local) {
        l.close_monitor();
        l.fx.push(Effect::ResumeServices);
        l.hide_indicator();
        self.detach();
        self.coordinator.cancel_updates_loading();
        l.notify(UpdateEvent::Interrupted);
        l.set_state(SessionState::Interrupted);
    }
}

impl UpdateDisplay for SessionInner {
    fn on_success(&self, _coordinator: &Coordinator, state: CoordinatorState) {
        self.step(|s, l| {
            if !l.halted() {
                s.success(l, state);
            }
        });
    }

    fn on_failure(&self, _coordinator: &Coordinator, failure: &FetchFailure) {
        self.step(|s, l| {
            if !l.halted() {
                s.failure(l, failure);
            }
        });
    }

    fn set_update_error_message(&self, _coordinator: &Coordinator, title: &str, details: &str) {
        self.step(|_, l| {
            if !l.halted() {
                l.fx.push(Effect::StatusMessage {
                    title: title.to_string(),
                    details: details.to_string(),
                });
            }
        });
    }
}

/// One UI session's view of the update workflow. Cheap to clone.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<SessionInner>,
}

impl SessionController {
    pub fn new(
        coordinator: Coordinator,
        surfaces: Arc<dyn SessionSurfaces>,
        events: EventBus,
    ) -> Self {
        Self::with_state(
            coordinator,
            surfaces,
            events,
            SessionState::Zero,
            ControlMode::Interactive,
        )
    }

    /// Rebuild a session from its saved record. Call [`SessionController::connect`] next.
    pub fn restore(
        coordinator: Coordinator,
        surfaces: Arc<dyn SessionSurfaces>,
        events: EventBus,
        record: Option<&SessionRecord>,
    ) -> Result<Self, SessionRecordError> {
        let (state, mode) = match record {
            Some(r) => r.decode()?,
            None => (SessionState::Zero, ControlMode::Interactive),
        };
        debug!(%state, mode = mode.as_str(), "session restored");
        Ok(Self::with_state(coordinator, surfaces, events, state, mode))
    }

    fn with_state(
        coordinator: Coordinator,
        surfaces: Arc<dyn SessionSurfaces>,
        events: EventBus,
        state: SessionState,
        mode: ControlMode,
    ) -> Self {
        let inner = Arc::new_cyclic(|me| SessionInner {
            coordinator,
            surfaces,
            events,
            me: me.clone(),
            local: Mutex::new(Local {
                state,
                mode,
                shown: Shown::default(),
                illegal: None,
                fx: Vec::new(),
            }),
        });
        Self { inner }
    }

    pub fn save_record(&self) -> SessionRecord {
        let l = self.inner.lock();
        SessionRecord::new(l.state, l.mode)
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn mode(&self) -> ControlMode {
        self.inner.lock().mode
    }

    pub fn illegal_state(&self) -> Option<IllegalStateError> {
        self.inner.lock().illegal.clone()
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.inner.coordinator
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// This session as the coordinator sees it.
    pub fn display(&self) -> Arc<dyn UpdateDisplay> {
        self.inner.clone()
    }

    /// Reconcile with the coordinator after (re)creation. Safe to call repeatedly.
    pub fn connect(&self) {
        self.inner.step(|s, l| {
            if !l.halted() {
                s.connect(l);
            }
        });
    }

    pub fn check_for_updates(&self) -> bool {
        self.inner.step(|s, l| s.check(l, false))
    }

    /// Forced full reload that continues into loading without asking.
    pub fn reload_all_data(&self) -> bool {
        self.inner.step(|s, l| s.check(l, true))
    }

    // ---- decision prompt ----

    pub fn send_to_foreground(&self) -> bool {
        self.inner.step(|s, l| {
            if l.state != SessionState::Deciding {
                warn!(state = %l.state, "send to foreground ignored");
                return false;
            }
            l.close_prompt();
            if !s.coordinator.start_update_loading() {
                s.reconcile_fresh(l);
                return false;
            }
            l.set_state(SessionState::Foreground);
            l.notify(UpdateEvent::Started);
            l.fx.push(Effect::SuspendServices);
            l.hide_indicator();
            l.open_monitor();
            true
        })
    }

    pub fn send_to_background(&self) -> bool {
        self.inner.step(|s, l| {
            if l.state != SessionState::Deciding {
                warn!(state = %l.state, "send to background ignored");
                return false;
            }
            l.close_prompt();
            if !s.coordinator.start_update_loading() {
                s.reconcile_fresh(l);
                return false;
            }
            l.notify(UpdateEvent::Started);
            l.fx.push(Effect::ResumeServices);
            s.enter_background(l);
            true
        })
    }

    pub fn postpone(&self) -> bool {
        self.inner.step(|s, l| {
            if l.state != SessionState::Deciding {
                warn!(state = %l.state, "postpone ignored");
                return false;
            }
            s.detach();
            l.set_state(SessionState::Postponed);
            l.notify(UpdateEvent::Postponed);
            l.fx.push(Effect::ResumeServices);
            l.close_prompt();
            l.hide_indicator();
            true
        })
    }

    pub fn retry(&self) -> bool {
        self.inner.step(|s, l| {
            if l.halted() {
                return false;
            }
            l.notify(UpdateEvent::Started);
            l.close_prompt();
            if s.coordinator.is_busy() {
                s.reconcile_fresh(l);
                return false;
            }
            let full_reload = l.mode == ControlMode::Automatic;
            s.check(l, full_reload)
        })
    }

    pub fn open_settings(&self) {
        self.inner.step(|_, l| l.fx.push(Effect::OpenSettings));
    }

    // ---- monitor ----

    pub fn data_applied(&self) -> bool {
        self.inner.step(|s, l| {
            if l.halted() || !s.coordinator.apply_updates_loaded() {
                return false;
            }
            s.detach();
            l.close_monitor();
            l.hide_indicator();
            l.fx.push(Effect::ResumeServices);
            l.notify(UpdateEvent::Applied);
            l.set_state(SessionState::Applied);
            true
        })
    }

    pub fn go_background(&self) -> bool {
        self.inner.step(|s, l| {
            if l.halted() {
                return false;
            }
            s.go_background(l);
            true
        })
    }

    pub fn cancelled(&self) -> bool {
        self.inner.step(|s, l| {
            if l.halted() {
                return false;
            }
            s.cancelled(l);
            true
        })
    }

    /// A button the coordinator put on the monitor was pressed.
    pub fn handle_monitor_action(&self, action: MonitorAction) -> bool {
        match action {
            MonitorAction::ApplyUpdate => self.data_applied(),
            MonitorAction::GoBackground => self.go_background(),
            MonitorAction::CancelUpdate | MonitorAction::CloseUpdate => self.cancelled(),
            MonitorAction::ChangeSettings => {
                self.open_settings();
                true
            }
            MonitorAction::RetryDownload => self.inner.step(|s, l| {
                if l.halted() || !s.coordinator.retry_update_loading() {
                    return false;
                }
                l.notify(UpdateEvent::Started);
                if l.shown.monitor {
                    l.set_state(SessionState::Foreground);
                } else {
                    s.enter_background(l);
                }
                true
            }),
        }
    }

    /// The background indicator's action: show the monitor again.
    pub fn bring_to_foreground(&self) -> bool {
        self.inner.step(|s, l| match l.state {
            SessionState::Background | SessionState::Success | SessionState::Failure => {
                s.detach();
                l.hide_indicator();
                l.open_monitor();
                l.set_state(SessionState::Foreground);
                true
            }
            _ => false,
        })
    }

    /// Returns whether the back press was consumed.
    pub fn on_back_pressed(&self) -> bool {
        self.inner.step(|s, l| match l.state {
            SessionState::Waiting => {
                s.detach();
                l.hide_progress();
                if l.mode == ControlMode::Automatic {
                    // The coordinator may still continue the reload on its own.
                    l.mode = ControlMode::Interactive;
                    l.fx.push(Effect::ResumeServices);
                }
                l.set_state(SessionState::Postponed);
                true
            }
            SessionState::Deciding => {
                s.detach();
                l.close_prompt();
                l.hide_indicator();
                l.set_state(SessionState::Postponed);
                true
            }
            SessionState::Foreground => {
                s.go_background(l);
                true
            }
            _ => false,
        })
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let l = self.inner.lock();
        f.debug_struct("SessionController")
            .field("state", &l.state)
            .field("mode", &l.mode)
            .finish()
    }
}
