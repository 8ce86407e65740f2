//! The only state a session keeps across recreation: two names.

use crate::error::SessionRecordError;
use crate::model::{ControlMode, SessionState};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub state: String,
    pub mode: String,
}

impl SessionRecord {
    pub fn new(state: SessionState, mode: ControlMode) -> Self {
        Self {
            state: state.as_str().to_string(),
            mode: mode.as_str().to_string(),
        }
    }

    pub fn decode(&self) -> Result<(SessionState, ControlMode), SessionRecordError> {
        let state = SessionState::from_name(&self.state)
            .ok_or_else(|| SessionRecordError::UnknownState(self.state.clone()))?;
        let mode = ControlMode::from_name(&self.mode)
            .ok_or_else(|| SessionRecordError::UnknownMode(self.mode.clone()))?;
        Ok((state, mode))
    }
}

impl Default for SessionRecord {
    fn default() -> Self {
        Self::new(SessionState::Zero, ControlMode::Interactive)
    }
}

/// Session records as `<name>.json` files in one directory.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn default_dir() -> Result<PathBuf, SessionRecordError> {
        dirs::data_local_dir()
            .map(|d| d.join("update-coordinator").join("sessions"))
            .ok_or(SessionRecordError::NoDataDir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, SessionRecordError> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(SessionRecordError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(format!("{name}.json")))
    }

    pub async fn save(&self, name: &str, record: &SessionRecord) -> Result<(), SessionRecordError> {
        let path = self.path_for(name)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&path, json).await?;
        debug!(session = name, state = %record.state, mode = %record.mode, "session record saved");
        Ok(())
    }

    /// A missing record is `None`, which restores as a fresh session.
    pub async fn load(&self, name: &str) -> Result<Option<SessionRecord>, SessionRecordError> {
        let path = self.path_for(name)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: SessionRecord = serde_json::from_slice(&bytes)?;
        record.decode()?;
        Ok(Some(record))
    }

    pub async fn remove(&self, name: &str) -> Result<bool, SessionRecordError> {
        let path = self.path_for(name)?;
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_round_trips_through_store() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path().join("sessions"));
        assert_eq!(store.load("main").await.unwrap(), None);

        let record = SessionRecord::new(SessionState::Background, ControlMode::Automatic);
        store.save("main", &record).await.unwrap();
        let loaded = store.load("main").await.unwrap().unwrap();
        assert_eq!(
            loaded.decode().unwrap(),
            (SessionState::Background, ControlMode::Automatic)
        );

        assert!(store.remove("main").await.unwrap());
        assert!(!store.remove("main").await.unwrap());
    }

    #[tokio::test]
    async fn unknown_names_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("odd.json"),
            br#"{"state": "Sleeping", "mode": "Interactive"}"#,
        )
        .unwrap();
        let store = SessionStore::new(tmp.path());
        assert!(matches!(
            store.load("odd").await,
            Err(SessionRecordError::UnknownState(s)) if s == "Sleeping"
        ));

        let bad_mode = SessionRecord {
            state: "Zero".into(),
            mode: "Manual".into(),
        };
        assert!(matches!(bad_mode.decode(), Err(SessionRecordError::UnknownMode(_))));
    }

    #[tokio::test]
    async fn session_names_cannot_escape_the_directory() {
        let store = SessionStore::new("/tmp/unused");
        assert!(matches!(
            store.save("../x", &SessionRecord::default()).await,
            Err(SessionRecordError::InvalidName(_))
        ));
    }
}
