//! Reference fetch subsystem: a JSON manifest plus plain HTTP downloads.

use super::store::read_version;
use super::FetchSubsystem;
use crate::coordinator::WorkerContext;
use crate::error::FetchFailure;
use crate::model::{
    CheckOutcome, CheckRequest, DownloadOutcome, ExecutionStatus, Runner, StagedItem,
    UpdateDefinition, UpdatePayload,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Response, Url};
use std::cmp::Ordering;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const STAGING_DIR: &str = ".staging";
const DOWNLOAD_RUNNERS: [Runner; 2] = [Runner::Database, Runner::Files];

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: reqwest::Client,
    manifest_url: Url,
    data_dir: PathBuf,
}

impl HttpFetcher {
    pub fn new(manifest_url: &str, data_dir: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        let manifest_url = Url::parse(manifest_url)
            .with_context(|| format!("invalid manifest URL {manifest_url}"))?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("update-coordinator/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(timeout)
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            http,
            manifest_url,
            data_dir: data_dir.into(),
        })
    }

    async fn fetch_manifest(&self) -> Result<UpdateDefinition> {
        let resp = self
            .http
            .get(self.manifest_url.clone())
            .send()
            .await
            .with_context(|| format!("request {}", self.manifest_url))?;
        let resp = ensure_success(resp, "Update server error")?;
        let body = resp.bytes().await.context("read manifest body")?;
        parse_manifest(&body, &self.manifest_url)
    }

    async fn resolve(&self, full_reload: bool, ctx: &WorkerContext) -> Result<CheckOutcome> {
        ctx.set_summary(
            Runner::Definition,
            format!("Contacting {}", self.manifest_url.host_str().unwrap_or("server")),
        );
        let definition = self.fetch_manifest().await?;
        ctx.checkpoint()?;

        if definition.items.is_empty() {
            ctx.set_summary(Runner::Definition, "Nothing listed");
            return Ok(CheckOutcome::NoUpdates);
        }
        if !full_reload {
            if let Some(installed) = read_version(&self.data_dir).await? {
                if !is_newer(&definition.version, &installed) {
                    ctx.set_summary(Runner::Definition, format!("Up to date ({installed})"));
                    return Ok(CheckOutcome::NoUpdates);
                }
            }
        }
        ctx.set_summary(
            Runner::Definition,
            format!("Version {} available", definition.version),
        );
        Ok(CheckOutcome::UpdatesAvailable(definition))
    }

    async fn download_item(
        &self,
        url: Url,
        target: &Path,
        runner: Runner,
        name: &str,
        done: &mut u64,
        ctx: &WorkerContext,
    ) -> Result<u64> {
        let resp = self
            .http
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("request {url}"))?;
        let resp = ensure_success(resp, "Download failed")?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let mut file = tokio::fs::File::create(target)
            .await
            .with_context(|| format!("create {}", target.display()))?;

        let mut written = 0u64;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            ctx.checkpoint()?;
            let chunk = chunk.with_context(|| format!("read {name}"))?;
            file.write_all(&chunk)
                .await
                .with_context(|| format!("write {}", target.display()))?;
            written += chunk.len() as u64;
            *done += chunk.len() as u64;
            ctx.set_progress(runner, *done, Some(name));
        }
        file.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl FetchSubsystem for HttpFetcher {
    async fn check(&self, request: CheckRequest, ctx: &WorkerContext) -> Result<CheckOutcome> {
        ctx.checkpoint()?;
        self.resolve(request.full_reload, ctx).await
    }

    async fn download(
        &self,
        definition: Option<UpdateDefinition>,
        ctx: &WorkerContext,
    ) -> Result<DownloadOutcome> {
        let definition = match definition {
            Some(d) => d,
            None => {
                debug!("no retained definition, resolving before download");
                ctx.start(Runner::Definition);
                match self.resolve(false, ctx).await? {
                    CheckOutcome::UpdatesAvailable(d) => {
                        ctx.set_status(Runner::Definition, ExecutionStatus::Succeeded);
                        d
                    }
                    CheckOutcome::NoUpdates => {
                        ctx.set_status(Runner::Definition, ExecutionStatus::Succeeded);
                        return Ok(DownloadOutcome::NothingToLoad);
                    }
                }
            }
        };

        let staging = self.data_dir.join(STAGING_DIR).join(&definition.version);
        if tokio::fs::try_exists(&staging).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&staging)
                .await
                .with_context(|| format!("clear {}", staging.display()))?;
        }
        tokio::fs::create_dir_all(&staging)
            .await
            .with_context(|| format!("create {}", staging.display()))?;

        let mut staged = Vec::new();
        for runner in DOWNLOAD_RUNNERS {
            let items: Vec<_> = definition.items.iter().filter(|i| i.runner == runner).collect();
            if items.is_empty() {
                continue;
            }
            ctx.checkpoint()?;
            ctx.start(runner);
            match definition.declared_bytes(runner) {
                Some(total) => ctx.set_max(runner, total),
                None => ctx.set_indeterminate(runner, true),
            }

            let mut done = 0u64;
            for item in &items {
                ctx.checkpoint()?;
                let rel = safe_relative(&item.name)?;
                let url = self
                    .manifest_url
                    .join(&item.url)
                    .with_context(|| format!("invalid URL for {}", item.name))?;
                let path = staging.join(rel);
                let bytes = self
                    .download_item(url, &path, runner, &item.name, &mut done, ctx)
                    .await?;
                staged.push(StagedItem {
                    name: item.name.clone(),
                    runner,
                    path,
                    bytes,
                });
            }

            ctx.set_indeterminate(runner, false);
            ctx.set_status(runner, ExecutionStatus::Succeeded);
            ctx.set_summary(runner, format!("{} item(s), {} bytes", items.len(), done));
        }

        info!(version = %definition.version, items = staged.len(), "download staged");
        Ok(DownloadOutcome::Loaded(UpdatePayload {
            version: definition.version,
            staging_dir: Some(staging),
            items: staged,
        }))
    }
}

fn ensure_success(resp: Response, title: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    Err(FetchFailure::new(title, format!("HTTP {status} from {}", resp.url())).into())
}

/// Parse a manifest and resolve relative item URLs against `base`.
pub fn parse_manifest(body: &[u8], base: &Url) -> Result<UpdateDefinition> {
    let mut definition: UpdateDefinition =
        serde_json::from_slice(body).context("parse update manifest")?;
    for item in &mut definition.items {
        let resolved = base
            .join(&item.url)
            .with_context(|| format!("invalid URL for {}", item.name))?;
        item.url = resolved.to_string();
    }
    Ok(definition)
}

/// Dotted version comparison; numeric segments compare numerically.
pub fn is_newer(candidate: &str, installed: &str) -> bool {
    let mut a = candidate.split('.');
    let mut b = installed.split('.');
    loop {
        match (a.next(), b.next()) {
            (None, None) => return false,
            (Some(_), None) => return true,
            (None, Some(_)) => return false,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    _ => x.cmp(y),
                };
                match ord {
                    Ordering::Equal => continue,
                    Ordering::Greater => return true,
                    Ordering::Less => return false,
                }
            }
        }
    }
}

fn safe_relative(name: &str) -> Result<PathBuf> {
    let path = Path::new(name);
    if name.is_empty() || !path.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(FetchFailure::new("Invalid update manifest", format!("bad item name {name:?}")).into());
    }
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_urls_resolve_against_manifest() {
        let base = Url::parse("https://data.example.org/v1/manifest.json").unwrap();
        let body = br#"{
            "version": "12",
            "summary": "weekly",
            "items": [
                {"name": "stops.db", "url": "db/stops.db", "size": 2048, "runner": "database"},
                {"name": "tiles.bin", "url": "https://cdn.example.org/tiles.bin", "runner": "files"}
            ]
        }"#;
        let def = parse_manifest(body, &base).unwrap();
        assert_eq!(def.version, "12");
        assert_eq!(def.items[0].url, "https://data.example.org/v1/db/stops.db");
        assert_eq!(def.items[1].url, "https://cdn.example.org/tiles.bin");
        assert_eq!(def.items[1].size, None);
        assert_eq!(def.declared_bytes(Runner::Database), Some(2048));
    }

    #[test]
    fn malformed_manifest_is_an_error() {
        let base = Url::parse("https://data.example.org/manifest.json").unwrap();
        let err = parse_manifest(b"{\"items\": 3}", &base).unwrap_err();
        assert!(format!("{err:#}").starts_with("parse update manifest"));
    }

    #[test]
    fn version_ordering() {
        assert!(is_newer("1.10", "1.9"));
        assert!(is_newer("2", "1.9.9"));
        assert!(is_newer("1.2.1", "1.2"));
        assert!(!is_newer("1.2", "1.2"));
        assert!(!is_newer("1.2", "1.2.0"));
        assert!(!is_newer("0.9", "1.0"));
        assert!(is_newer("2024b", "2024a"));
    }

    #[test]
    fn item_names_stay_inside_staging() {
        assert!(safe_relative("maps/area.bin").is_ok());
        assert!(safe_relative("../etc/passwd").is_err());
        assert!(safe_relative("/abs").is_err());
        assert!(safe_relative("").is_err());
    }
}
