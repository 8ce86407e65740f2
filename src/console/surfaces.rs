//! Line-printing renditions of the host surfaces.

use super::OutputLine;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;
use update_coordinator::{
    Coordinator, CoordinatorState, DecisionPrompt, ExecutionStatus, FetchFailure, MonitorAction,
    Runner, SessionSurfaces, UpdateDisplay,
};

fn say(out: &UnboundedSender<OutputLine>, line: String) {
    let _ = out.send(OutputLine::Stdout(line));
}

pub(crate) struct ConsoleSurfaces {
    out: UnboundedSender<OutputLine>,
    coordinator: Coordinator,
    settings: String,
    monitor: Mutex<Option<Arc<dyn UpdateDisplay>>>,
}

impl ConsoleSurfaces {
    pub fn new(out: UnboundedSender<OutputLine>, coordinator: Coordinator, settings: String) -> Self {
        Self {
            out,
            coordinator,
            settings,
            monitor: Mutex::new(None),
        }
    }

    /// Detach the monitor display, if open. Used when the session is torn down.
    pub fn release(&self) {
        let monitor = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(m) = monitor {
            self.coordinator.detach_display(&m);
        }
    }
}

impl SessionSurfaces for ConsoleSurfaces {
    fn show_progress(&self) {
        say(&self.out, "Checking for updates...".into());
    }

    fn hide_progress(&self) {
        debug!("progress hidden");
    }

    fn open_decision_prompt(&self, prompt: &DecisionPrompt) {
        match prompt {
            DecisionPrompt::Offer {
                version,
                summary,
                full_reload,
            } => {
                let what = if *full_reload { "Full data set" } else { "Update" };
                let version = version.as_deref().unwrap_or("(unknown version)");
                say(&self.out, format!("{what} {version} is available."));
                if let Some(summary) = summary.as_deref().filter(|s| !s.is_empty()) {
                    say(&self.out, format!("  {summary}"));
                }
                say(
                    &self.out,
                    "  fg: download now | bg: download in background | later: postpone".into(),
                );
            }
            DecisionPrompt::Failure { title, details } => {
                say(&self.out, title.clone());
                if !details.is_empty() {
                    say(&self.out, format!("  {details}"));
                }
                say(&self.out, "  retry | settings | later".into());
            }
        }
    }

    fn close_decision_prompt(&self) {
        debug!("decision prompt closed");
    }

    fn open_monitor(&self) {
        let monitor: Arc<dyn UpdateDisplay> = Arc::new(ConsoleMonitor {
            out: self.out.clone(),
            maxima: Mutex::new(BTreeMap::new()),
        });
        say(&self.out, "== Update monitor ==".into());
        *self.monitor.lock().unwrap_or_else(PoisonError::into_inner) = Some(monitor.clone());
        self.coordinator.attach_display(&monitor);
    }

    fn close_monitor(&self) {
        self.release();
        debug!("monitor closed");
    }

    fn indicate_background(&self, state: CoordinatorState) {
        let line = match state {
            CoordinatorState::Loading => "[background] downloading updates (show: open monitor)",
            CoordinatorState::Finished => "[background] updates ready to apply (show: open monitor)",
            CoordinatorState::Failure => "[background] update failed (show: open monitor)",
            _ => "[background] update in progress",
        };
        say(&self.out, line.into());
    }

    fn hide_background_indicator(&self) {
        debug!("background indicator hidden");
    }

    fn show_status_message(&self, title: &str, details: &str) {
        let _ = self
            .out
            .send(OutputLine::Stderr(format!("! {title}: {details}")));
    }

    fn open_settings(&self) {
        say(&self.out, format!("Settings: {}", self.settings));
    }

    fn suspend_background_services(&self) {
        debug!("background services suspended");
    }

    fn resume_background_services(&self) {
        debug!("background services resumed");
    }
}

/// Prints coordinator progress while the monitor is open.
struct ConsoleMonitor {
    out: UnboundedSender<OutputLine>,
    /// Declared maximum and last printed percentage per runner.
    maxima: Mutex<BTreeMap<Runner, (u64, Option<u64>)>>,
}

impl UpdateDisplay for ConsoleMonitor {
    fn set_progress_max(&self, runner: Runner, max: u64) {
        self.maxima
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(runner, (max, None));
    }

    fn set_current_progress(
        &self,
        runner: Runner,
        value: u64,
        follower: Option<&str>,
        _status: Option<ExecutionStatus>,
    ) {
        let line = {
            let mut maxima = self.maxima.lock().unwrap_or_else(PoisonError::into_inner);
            match maxima.get_mut(&runner) {
                Some((max, last)) if *max > 0 => {
                    let pct = (value.min(*max) * 100) / *max;
                    // one line per 10% step
                    if last.map(|l| l / 10) == Some(pct / 10) {
                        return;
                    }
                    *last = Some(pct);
                    format!("  {:<10} {:>3}%  {value}/{max} bytes", runner.label(), pct)
                }
                _ if value == 0 => return,
                _ => format!("  {:<10} {value} bytes", runner.label()),
            }
        };
        let line = match follower {
            Some(f) => format!("{line}  {f}"),
            None => line,
        };
        say(&self.out, line);
    }

    fn set_execution_status(&self, runner: Runner, status: ExecutionStatus) {
        say(&self.out, format!("  {:<10} {status:?}", runner.label()));
    }

    fn set_progress_summary(&self, runner: Runner, text: &str) {
        say(&self.out, format!("  {:<10} {text}", runner.label()));
    }

    fn set_update_error_message(&self, _coordinator: &Coordinator, title: &str, details: &str) {
        let _ = self
            .out
            .send(OutputLine::Stderr(format!("! {title}: {details}")));
    }

    fn set_buttons(&self, actions: &[MonitorAction]) {
        if actions.is_empty() {
            return;
        }
        let labels: Vec<_> = actions.iter().map(|a| command_for(*a)).collect();
        say(&self.out, format!("  [{}]", labels.join(" | ")));
    }

    fn on_start(&self, runner: Runner) {
        say(&self.out, format!("  {:<10} started", runner.label()));
    }

    fn on_success(&self, _coordinator: &Coordinator, state: CoordinatorState) {
        let line = match state {
            CoordinatorState::Finished => "  download complete (apply: install it)".to_string(),
            other => format!("  done ({other})"),
        };
        say(&self.out, line);
    }

    fn on_failure(&self, _coordinator: &Coordinator, failure: &FetchFailure) {
        say(&self.out, format!("  failed: {}", failure.title));
    }

    fn set_wake_mode(&self, on: bool) {
        debug!(on, "wake mode");
    }
}

/// Console command that presses a monitor button.
pub(crate) fn command_for(action: MonitorAction) -> &'static str {
    match action {
        MonitorAction::ApplyUpdate => "apply",
        MonitorAction::GoBackground => "bg",
        MonitorAction::RetryDownload => "retry",
        MonitorAction::ChangeSettings => "settings",
        MonitorAction::CancelUpdate => "cancel",
        MonitorAction::CloseUpdate => "close",
    }
}
