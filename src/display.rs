//! Capability set the coordinator reports through.
//!
//! The coordinator only ever holds a `Weak<dyn UpdateDisplay>` for the single attached surface;
//! it never inspects what kind of surface it talks to.

use crate::coordinator::Coordinator;
use crate::error::FetchFailure;
use crate::model::{CoordinatorState, ExecutionStatus, MonitorAction, Runner};
use std::sync::{Arc, Weak};

/// Every callback runs on the coordination loop, one at a time, in transition order.
/// Implementations must not block; calling coordinator commands from a callback is fine.
pub trait UpdateDisplay: Send + Sync {
    fn set_progress_max(&self, _runner: Runner, _max: u64) {}

    fn set_current_progress(
        &self,
        _runner: Runner,
        _value: u64,
        _follower: Option<&str>,
        _status: Option<ExecutionStatus>,
    ) {
    }

    fn set_execution_status(&self, _runner: Runner, _status: ExecutionStatus) {}

    fn set_progress_summary(&self, _runner: Runner, _text: &str) {}

    fn set_indeterminate(&self, _runner: Runner, _on: bool) {}

    fn set_update_error_message(&self, _coordinator: &Coordinator, _title: &str, _details: &str) {}

    fn set_buttons(&self, _actions: &[MonitorAction]) {}

    fn on_start(&self, _runner: Runner) {}

    /// `state` is the coordinator state the success was reported in.
    fn on_success(&self, coordinator: &Coordinator, state: CoordinatorState);

    fn on_failure(&self, coordinator: &Coordinator, failure: &FetchFailure);

    /// Keep the host awake while a download runs.
    fn set_wake_mode(&self, _on: bool) {}
}

/// Identity of a display, independent of the vtable half of the fat pointer.
pub(crate) fn display_addr(display: &Arc<dyn UpdateDisplay>) -> usize {
    Arc::as_ptr(display) as *const () as usize
}

/// The coordinator's single attachment slot.
#[derive(Default)]
pub(crate) struct Attachment {
    /// Bumped on every attach/detach; deliveries queued for an older generation are dropped.
    pub generation: u64,
    display: Option<(Weak<dyn UpdateDisplay>, usize)>,
}

impl Attachment {
    /// Returns `false` when `display` was already the attached one; its queued deliveries
    /// then stay valid.
    pub fn attach(&mut self, display: &Arc<dyn UpdateDisplay>) -> bool {
        if self.is_attached(display) && self.live().is_some() {
            return false;
        }
        self.generation += 1;
        self.display = Some((Arc::downgrade(display), display_addr(display)));
        true
    }

    /// Clears the slot only when `display` is the attached one.
    pub fn detach(&mut self, display: &Arc<dyn UpdateDisplay>) -> bool {
        match &self.display {
            Some((_, addr)) if *addr == display_addr(display) => {
                self.generation += 1;
                self.display = None;
                true
            }
            _ => false,
        }
    }

    /// The attached display, if it is still alive.
    pub fn live(&self) -> Option<Arc<dyn UpdateDisplay>> {
        self.display.as_ref().and_then(|(weak, _)| weak.upgrade())
    }

    pub fn is_attached(&self, display: &Arc<dyn UpdateDisplay>) -> bool {
        matches!(&self.display, Some((_, addr)) if *addr == display_addr(display))
    }
}
