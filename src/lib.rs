//! Singleton background update workflow with reattachable session controllers.
//!
//! A [`Coordinator`] owns the one update pipeline of the process. [`SessionController`]s come
//! and go with the UI, and each reconstructs its view of the pipeline on [`SessionController::connect`].

pub mod coordinator;
pub mod display;
pub mod error;
pub mod events;
pub mod fetch;
pub mod model;
pub mod session;

pub use coordinator::{Attached, Coordinator, WorkerContext};
pub use display::UpdateDisplay;
pub use error::{Cancelled, FetchFailure, IllegalStateError, SessionRecordError};
pub use events::{EventBus, EventListener};
pub use fetch::{FetchSubsystem, FsStore, HttpFetcher, Persistence};
pub use model::{
    CheckOutcome, CheckRequest, ControlMode, CoordinatorState, DownloadOutcome, ExecutionStatus,
    MonitorAction, ProgressUpdate, Runner, RunnerProgress, SessionState, StagedItem,
    UpdateDefinition, UpdateEvent, UpdateItem, UpdatePayload,
};
pub use session::{DecisionPrompt, SessionController, SessionRecord, SessionStore, SessionSurfaces};
