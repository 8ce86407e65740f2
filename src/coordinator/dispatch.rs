//! Coordination loop: applies worker reports and delivers display callbacks.

use super::worker::WorkerReport;
use super::{Coordinator, Shared};
use crate::display::UpdateDisplay;
use crate::error::FetchFailure;
use crate::model::{CoordinatorState, MonitorAction, ProgressUpdate};
use std::sync::Weak;
use tokio::sync::{mpsc::UnboundedReceiver, oneshot};
use tracing::{debug, trace};

pub(crate) enum LoopMsg {
    /// Something was queued on the outbox.
    Wake,
    Report(WorkerReport),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

#[derive(Debug, Clone)]
pub(crate) enum DisplayCall {
    Progress(ProgressUpdate),
    ErrorMessage(FetchFailure),
    Buttons(Vec<MonitorAction>),
    Success(CoordinatorState),
    Failure(FetchFailure),
    WakeMode(bool),
}

/// A display call bound to the attachment it was queued for.
#[derive(Debug)]
pub(crate) struct Delivery {
    pub generation: u64,
    pub call: DisplayCall,
}

pub(crate) async fn run_loop(shared: Weak<Shared>, mut inbox: UnboundedReceiver<LoopMsg>) {
    while let Some(msg) = inbox.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let coordinator = Coordinator { shared };
        match msg {
            LoopMsg::Wake => {}
            LoopMsg::Report(report) => coordinator.apply_report(report),
            LoopMsg::Flush(done) => {
                coordinator.drain_outbox();
                let _ = done.send(());
                continue;
            }
            LoopMsg::Shutdown => {
                debug!("coordination loop stopping");
                break;
            }
        }
        coordinator.drain_outbox();
    }
    trace!("coordination loop exited");
}

pub(crate) fn deliver(display: &dyn UpdateDisplay, coordinator: &Coordinator, call: DisplayCall) {
    match call {
        DisplayCall::Progress(update) => match update {
            ProgressUpdate::Start(runner) => display.on_start(runner),
            ProgressUpdate::Max { runner, max } => display.set_progress_max(runner, max),
            ProgressUpdate::Current {
                runner,
                value,
                follower,
                status,
            } => display.set_current_progress(runner, value, follower.as_deref(), status),
            ProgressUpdate::Status { runner, status } => {
                display.set_execution_status(runner, status)
            }
            ProgressUpdate::Summary { runner, text } => display.set_progress_summary(runner, &text),
            ProgressUpdate::Indeterminate { runner, on } => display.set_indeterminate(runner, on),
        },
        DisplayCall::ErrorMessage(f) => {
            display.set_update_error_message(coordinator, &f.title, &f.details)
        }
        DisplayCall::Buttons(actions) => display.set_buttons(&actions),
        DisplayCall::Success(state) => display.on_success(coordinator, state),
        DisplayCall::Failure(f) => display.on_failure(coordinator, &f),
        DisplayCall::WakeMode(on) => display.set_wake_mode(on),
    }
}
