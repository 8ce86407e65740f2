use crate::model::{CoordinatorState, SessionState};
use thiserror::Error;

/// A failed check or download, as shown to the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{title}: {details}")]
pub struct FetchFailure {
    pub title: String,
    pub details: String,
}

impl FetchFailure {
    pub fn new(title: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            details: details.into(),
        }
    }

    /// Capture any worker error. A `FetchFailure` anywhere in the chain is kept verbatim.
    pub fn from_error(fallback_title: &str, err: &anyhow::Error) -> Self {
        if let Some(f) = err.chain().find_map(|e| e.downcast_ref::<FetchFailure>()) {
            return f.clone();
        }
        Self::new(fallback_title, format!("{err:#}"))
    }
}

/// Raised by a worker checkpoint once cancellation has been requested.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("operation cancelled")]
pub struct Cancelled;

/// A display callback arrived in a combination the reconciliation protocol does not allow.
///
/// This is a broken invariant, not a runtime failure: the session that hits it halts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("illegal session state {session} on {callback} (coordinator {coordinator})")]
pub struct IllegalStateError {
    pub session: SessionState,
    pub coordinator: CoordinatorState,
    pub callback: &'static str,
}

#[derive(Error, Debug)]
pub enum SessionRecordError {
    #[error("unknown session state name: {0}")]
    UnknownState(String),

    #[error("unknown control mode name: {0}")]
    UnknownMode(String),

    #[error("invalid session name: {0:?}")]
    InvalidName(String),

    #[error("session store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session record JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no data directory available for the session store")]
    NoDataDir,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn fetch_failure_survives_context() {
        let err = anyhow::Error::new(FetchFailure::new("Server error", "HTTP 503"))
            .context("download files");
        let f = FetchFailure::from_error("Downloading updates failed", &err);
        assert_eq!(f, FetchFailure::new("Server error", "HTTP 503"));
    }

    #[test]
    fn other_errors_get_phase_title() {
        let err: anyhow::Result<()> = Err(std::io::Error::other("disk full")).context("stage item");
        let f = FetchFailure::from_error("Downloading updates failed", &err.unwrap_err());
        assert_eq!(f.title, "Downloading updates failed");
        assert_eq!(f.details, "stage item: disk full");
    }
}
