use crate::model::CoordinatorState;

/// Content of the decision prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionPrompt {
    /// Updates are ready to be loaded; the user picks foreground, background or later.
    Offer {
        version: Option<String>,
        summary: Option<String>,
        full_reload: bool,
    },
    /// The last check or download failed; the user picks retry, settings or later.
    Failure { title: String, details: String },
}

/// Host-side modal surfaces and hooks a session drives.
///
/// Calls are made with no session lock held, so an implementation may call back into the
/// controller. The controller never opens a surface it already shows.
pub trait SessionSurfaces: Send + Sync {
    fn show_progress(&self);

    fn hide_progress(&self);

    fn open_decision_prompt(&self, prompt: &DecisionPrompt);

    fn close_decision_prompt(&self);

    /// The monitor attaches its own display to the coordinator while open.
    fn open_monitor(&self);

    fn close_monitor(&self);

    /// `Loading`, `Finished` or `Failure`.
    fn indicate_background(&self, state: CoordinatorState);

    fn hide_background_indicator(&self);

    fn show_status_message(&self, title: &str, details: &str);

    fn open_settings(&self) {}

    /// Services competing with a foreground download (location tracking and the like).
    fn suspend_background_services(&self) {}

    fn resume_background_services(&self) {}
}
