use super::Persistence;
use crate::model::UpdatePayload;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const VERSION_FILE: &str = "VERSION";

/// Installed data directory with a `VERSION` marker.
#[derive(Debug, Clone)]
pub struct FsStore {
    data_dir: PathBuf,
}

impl FsStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Installed version, `None` before the first commit.
    pub async fn installed_version(&self) -> Result<Option<String>> {
        read_version(&self.data_dir).await
    }
}

pub(crate) async fn read_version(data_dir: &Path) -> Result<Option<String>> {
    let path = data_dir.join(VERSION_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(s) => {
            let v = s.trim();
            Ok((!v.is_empty()).then(|| v.to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
    }
}

#[async_trait]
impl Persistence for FsStore {
    async fn commit(&self, payload: UpdatePayload) -> Result<()> {
        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .with_context(|| format!("create {}", self.data_dir.display()))?;

        for item in &payload.items {
            let target = self.data_dir.join(&item.name);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("create {}", parent.display()))?;
            }
            tokio::fs::rename(&item.path, &target)
                .await
                .with_context(|| format!("install {}", item.name))?;
            debug!(item = %item.name, bytes = item.bytes, "installed");
        }

        let version_path = self.data_dir.join(VERSION_FILE);
        tokio::fs::write(&version_path, format!("{}\n", payload.version))
            .await
            .with_context(|| format!("write {}", version_path.display()))?;

        if let Some(staging) = &payload.staging_dir {
            tokio::fs::remove_dir_all(staging)
                .await
                .with_context(|| format!("remove staging dir {}", staging.display()))?;
        }
        info!(version = %payload.version, items = payload.items.len(), "data committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Runner, StagedItem};

    #[tokio::test]
    async fn commit_moves_items_and_records_version() {
        let root = tempfile::tempdir().unwrap();
        let staging = root.path().join("staging");
        tokio::fs::create_dir_all(&staging).await.unwrap();
        let staged = staging.join("cities.db");
        tokio::fs::write(&staged, b"rows").await.unwrap();

        let store = FsStore::new(root.path().join("data"));
        assert_eq!(store.installed_version().await.unwrap(), None);

        store
            .commit(UpdatePayload {
                version: "2024.3".into(),
                staging_dir: Some(staging.clone()),
                items: vec![StagedItem {
                    name: "cities.db".into(),
                    runner: Runner::Database,
                    path: staged,
                    bytes: 4,
                }],
            })
            .await
            .unwrap();

        assert_eq!(
            store.installed_version().await.unwrap().as_deref(),
            Some("2024.3")
        );
        let body = tokio::fs::read(store.data_dir().join("cities.db")).await.unwrap();
        assert_eq!(body, b"rows");
        assert!(!staging.exists());
    }
}
