use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Canonical state of the background update pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoordinatorState {
    Initial,
    Inquiring,
    Ready2Start,
    NoUpdates,
    Cancelled,
    Failure,
    Loading,
    Finished,
    Applied,
}

impl CoordinatorState {
    /// A worker is in flight.
    pub fn is_busy(self) -> bool {
        matches!(self, CoordinatorState::Inquiring | CoordinatorState::Loading)
    }

    /// States from which a new definition check may be started.
    pub fn can_restart(self) -> bool {
        matches!(
            self,
            CoordinatorState::Initial
                | CoordinatorState::NoUpdates
                | CoordinatorState::Failure
                | CoordinatorState::Cancelled
                | CoordinatorState::Applied
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CoordinatorState::Initial => "Initial",
            CoordinatorState::Inquiring => "Inquiring",
            CoordinatorState::Ready2Start => "Ready2Start",
            CoordinatorState::NoUpdates => "NoUpdates",
            CoordinatorState::Cancelled => "Cancelled",
            CoordinatorState::Failure => "Failure",
            CoordinatorState::Loading => "Loading",
            CoordinatorState::Finished => "Finished",
            CoordinatorState::Applied => "Applied",
        }
    }
}

impl std::fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-session projection of the coordinator state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Zero,
    Illegal,
    Waiting,
    Nothing2Do,
    Deciding,
    Postponed,
    Foreground,
    Background,
    Interrupted,
    Success,
    Failure,
    Applied,
}

impl SessionState {
    pub const ALL: [SessionState; 12] = [
        SessionState::Zero,
        SessionState::Illegal,
        SessionState::Waiting,
        SessionState::Nothing2Do,
        SessionState::Deciding,
        SessionState::Postponed,
        SessionState::Foreground,
        SessionState::Background,
        SessionState::Interrupted,
        SessionState::Success,
        SessionState::Failure,
        SessionState::Applied,
    ];

    /// Name used in the persisted session record.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Zero => "Zero",
            SessionState::Illegal => "Illegal",
            SessionState::Waiting => "Waiting",
            SessionState::Nothing2Do => "Nothing2Do",
            SessionState::Deciding => "Deciding",
            SessionState::Postponed => "Postponed",
            SessionState::Foreground => "Foreground",
            SessionState::Background => "Background",
            SessionState::Interrupted => "Interrupted",
            SessionState::Success => "Success",
            SessionState::Failure => "Failure",
            SessionState::Applied => "Applied",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == name)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a `Ready2Start` outcome asks the user or proceeds on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlMode {
    #[default]
    Interactive,
    /// One-shot: reverts to `Interactive` once the load has been started.
    Automatic,
}

impl ControlMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlMode::Interactive => "Interactive",
            ControlMode::Automatic => "Automatic",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Interactive" => Some(ControlMode::Interactive),
            "Automatic" => Some(ControlMode::Automatic),
            _ => None,
        }
    }
}

/// High-level workflow events broadcast on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateEvent {
    Postponed,
    Started,
    Finished,
    Failed,
    Interrupted,
    Applied,
}

/// Progress channel a worker report belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Runner {
    /// The definition check.
    Definition,
    Database,
    Files,
}

impl Runner {
    pub fn label(self) -> &'static str {
        match self {
            Runner::Definition => "definition",
            Runner::Database => "database",
            Runner::Files => "files",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStatus {
    #[default]
    Initial,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// Buttons the coordinator asks the monitor surface to offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MonitorAction {
    ApplyUpdate,
    GoBackground,
    RetryDownload,
    ChangeSettings,
    CancelUpdate,
    CloseUpdate,
}

impl MonitorAction {
    pub fn label(self) -> &'static str {
        match self {
            MonitorAction::ApplyUpdate => "Apply",
            MonitorAction::GoBackground => "Continue in background",
            MonitorAction::RetryDownload => "Retry",
            MonitorAction::ChangeSettings => "Settings",
            MonitorAction::CancelUpdate => "Cancel",
            MonitorAction::CloseUpdate => "Close",
        }
    }
}

/// Parameters of a definition check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckRequest {
    /// Ask for the complete data set rather than what changed since the installed version.
    pub full_reload: bool,
}

/// One downloadable unit listed by an update definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateItem {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub size: Option<u64>,
    pub runner: Runner,
}

/// What a definition check found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDefinition {
    pub version: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub items: Vec<UpdateItem>,
}

impl UpdateDefinition {
    /// Declared byte total for a runner, when every item of that runner declares a size.
    pub fn declared_bytes(&self, runner: Runner) -> Option<u64> {
        self.items
            .iter()
            .filter(|i| i.runner == runner)
            .map(|i| i.size)
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    UpdatesAvailable(UpdateDefinition),
    NoUpdates,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedItem {
    pub name: String,
    pub runner: Runner,
    pub path: PathBuf,
    pub bytes: u64,
}

/// Data fetched by a download, waiting to be committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePayload {
    pub version: String,
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
    #[serde(default)]
    pub items: Vec<StagedItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Loaded(UpdatePayload),
    /// The download resolved its own definition and found nothing to fetch.
    NothingToLoad,
}

/// Last known progress of one runner, replayed to newly attached displays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerProgress {
    pub max: Option<u64>,
    pub value: u64,
    pub follower: Option<String>,
    pub status: ExecutionStatus,
    pub summary: Option<String>,
    pub indeterminate: bool,
}

/// Progress report emitted by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressUpdate {
    Start(Runner),
    Max {
        runner: Runner,
        max: u64,
    },
    Current {
        runner: Runner,
        value: u64,
        follower: Option<String>,
        status: Option<ExecutionStatus>,
    },
    Status {
        runner: Runner,
        status: ExecutionStatus,
    },
    Summary {
        runner: Runner,
        text: String,
    },
    Indeterminate {
        runner: Runner,
        on: bool,
    },
}

impl ProgressUpdate {
    pub fn runner(&self) -> Runner {
        match self {
            ProgressUpdate::Start(runner) => *runner,
            ProgressUpdate::Max { runner, .. }
            | ProgressUpdate::Current { runner, .. }
            | ProgressUpdate::Status { runner, .. }
            | ProgressUpdate::Summary { runner, .. }
            | ProgressUpdate::Indeterminate { runner, .. } => *runner,
        }
    }
}
