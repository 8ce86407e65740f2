//! Process-wide owner of the update pipeline.
//!
//! [`Coordinator`] is a cheap handle. Commands lock the core, transition and queue display
//! calls in one critical section, start the worker the transition asked for, and return. The
//! coordination loop applies worker reports and is the only place display callbacks run.

mod dispatch;
mod machine;
mod worker;

pub use worker::WorkerContext;

use self::dispatch::{DisplayCall, LoopMsg};
use self::machine::Core;
use self::worker::{Job, WorkerReport, Workers};
use crate::display::UpdateDisplay;
use crate::fetch::{FetchSubsystem, Persistence};
use crate::model::{CoordinatorState, MonitorAction, Runner, RunnerProgress, UpdateDefinition};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, trace};

pub(crate) struct Shared {
    core: Mutex<Core>,
    workers: Workers,
    state_rx: watch::Receiver<CoordinatorState>,
}

/// Result of [`Coordinator::attach_display`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attached {
    pub state: CoordinatorState,
    /// The display was attached already, so no transition was missed.
    pub was_attached: bool,
}

#[derive(Clone)]
pub struct Coordinator {
    pub(crate) shared: Arc<Shared>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("state", &self.state())
            .finish()
    }
}

impl Coordinator {
    /// Start a coordinator on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime; use [`Coordinator::start_on`] from plain threads.
    pub fn start(fetcher: Arc<dyn FetchSubsystem>, persistence: Arc<dyn Persistence>) -> Self {
        Self::start_on(Handle::current(), fetcher, persistence)
    }

    pub fn start_on(
        runtime: Handle,
        fetcher: Arc<dyn FetchSubsystem>,
        persistence: Arc<dyn Persistence>,
    ) -> Self {
        let (tx, inbox) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(CoordinatorState::Initial);
        let shared = Arc::new(Shared {
            core: Mutex::new(Core::new(state_tx)),
            workers: Workers {
                runtime: runtime.clone(),
                fetcher,
                persistence,
                tx,
            },
            state_rx,
        });
        runtime.spawn(dispatch::run_loop(Arc::downgrade(&shared), inbox));
        debug!("coordinator started");
        Self { shared }
    }

    fn core(&self) -> MutexGuard<'_, Core> {
        self.shared
            .core
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn wake(&self) {
        let _ = self.shared.workers.tx.send(LoopMsg::Wake);
    }

    fn launch(&self, job: Option<Job>) -> bool {
        let accepted = job.is_some();
        if let Some(job) = job {
            self.shared.workers.spawn(job);
        }
        self.wake();
        accepted
    }

    // ---- attachment ----

    /// Make `display` the single attached display and resync it. Last attach wins.
    ///
    /// Every transition after the attach is delivered to `display`; every earlier one is
    /// reflected in the returned state.
    pub fn attach_display(&self, display: &Arc<dyn UpdateDisplay>) -> Attached {
        let attached = {
            let mut core = self.core();
            let newly = core.attach(display);
            Attached {
                state: core.state(),
                was_attached: !newly,
            }
        };
        self.wake();
        attached
    }

    /// Clears the slot only if `display` is the attached one.
    pub fn detach_display(&self, display: &Arc<dyn UpdateDisplay>) -> bool {
        self.core().detach(display)
    }

    pub fn is_attached(&self, display: &Arc<dyn UpdateDisplay>) -> bool {
        self.core().attachment.is_attached(display)
    }

    // ---- commands ----

    pub fn restart_update_definition_loading(&self) -> bool {
        let job = self.core().restart(false);
        self.launch(job)
    }

    pub fn restart_for_full_reload(&self) -> bool {
        let job = self.core().restart(true);
        self.launch(job)
    }

    pub fn start_update_loading(&self) -> bool {
        let job = self.core().start_loading();
        self.launch(job)
    }

    pub fn cancel_updates_loading(&self) -> bool {
        let accepted = self.core().cancel();
        self.wake();
        accepted
    }

    pub fn retry_update_loading(&self) -> bool {
        let job = self.core().retry();
        self.launch(job)
    }

    pub fn apply_updates_loaded(&self) -> bool {
        let commit = self.core().apply();
        match commit {
            Some(job) => {
                self.launch(job);
                true
            }
            None => false,
        }
    }

    // ---- queries ----

    pub fn state(&self) -> CoordinatorState {
        *self.shared.state_rx.borrow()
    }

    pub fn is_busy(&self) -> bool {
        self.state().is_busy()
    }

    pub fn watch_state(&self) -> watch::Receiver<CoordinatorState> {
        self.shared.state_rx.clone()
    }

    pub fn last_error_title(&self) -> Option<String> {
        self.core().last_error().map(|f| f.title.clone())
    }

    pub fn last_error_details(&self) -> Option<String> {
        self.core().last_error().map(|f| f.details.clone())
    }

    pub fn update_definition(&self) -> Option<UpdateDefinition> {
        self.core().definition().cloned()
    }

    pub fn progress(&self, runner: Runner) -> Option<RunnerProgress> {
        self.core().progress(runner).cloned()
    }

    pub fn buttons(&self) -> Vec<MonitorAction> {
        self.core().buttons().to_vec()
    }

    pub fn is_full_reload(&self) -> bool {
        self.core().is_full_reload()
    }

    // ---- loop plumbing ----

    /// Resolves once every display call queued before this point and every worker report
    /// already sent has been delivered.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.shared.workers.tx.send(LoopMsg::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Stop the coordination loop and raise the cancel flag of any running worker.
    pub fn shutdown(&self) {
        self.core().abandon();
        let _ = self.shared.workers.tx.send(LoopMsg::Shutdown);
    }

    pub(crate) fn apply_report(&self, report: WorkerReport) {
        let job = self.core().apply_report(report);
        if let Some(job) = job {
            self.shared.workers.spawn(job);
        }
    }

    /// Deliver queued calls one at a time with the core unlocked.
    pub(crate) fn drain_outbox(&self) {
        loop {
            let next: Option<(DisplayCall, Option<Arc<dyn UpdateDisplay>>)> = {
                let mut core = self.core();
                match core.outbox.pop_front() {
                    None => None,
                    Some(delivery) if delivery.generation != core.attachment.generation => {
                        trace!(queued = delivery.generation, "dropping superseded delivery");
                        continue;
                    }
                    Some(delivery) => Some((delivery.call, core.attachment.live())),
                }
            };
            match next {
                None => break,
                Some((call, Some(display))) => dispatch::deliver(display.as_ref(), self, call),
                Some((_, None)) => {}
            }
        }
    }
}
