use crate::console;
use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use update_coordinator::SessionStore;

#[derive(Debug, Parser, Clone)]
#[command(
    name = "update-coordinator",
    version,
    about = "Check for, download and apply data updates from an interactive console"
)]
pub struct Cli {
    /// URL of the update manifest (JSON)
    #[arg(long, env = "UPDATE_MANIFEST_URL")]
    pub manifest_url: String,

    /// Directory holding the installed data and its VERSION file
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Directory for saved session records
    #[arg(long)]
    pub session_dir: Option<PathBuf>,

    /// Name of the session record to restore and save
    #[arg(long, default_value = "console")]
    pub session: String,

    /// Connect timeout for update requests
    #[arg(long, default_value = "10s")]
    pub connect_timeout: humantime::Duration,

    /// Check for updates as soon as the console starts
    #[arg(long)]
    pub check_on_launch: bool,

    /// Start with a forced full reload instead of a regular check
    #[arg(long, conflicts_with = "check_on_launch")]
    pub reload_on_launch: bool,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    pub print_config: bool,
}

/// Effective configuration of a console run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub manifest_url: String,
    pub data_dir: PathBuf,
    pub session_dir: PathBuf,
    pub session: String,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    pub launch: LaunchAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchAction {
    Connect,
    Check,
    Reload,
}

fn default_data_dir() -> Result<PathBuf> {
    dirs::data_local_dir()
        .map(|d| d.join("update-coordinator").join("data"))
        .context("no local data directory; pass --data-dir")
}

/// Build an `AppConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> Result<AppConfig> {
    let data_dir = match &args.data_dir {
        Some(d) => d.clone(),
        None => default_data_dir()?,
    };
    let session_dir = match &args.session_dir {
        Some(d) => d.clone(),
        None => SessionStore::default_dir().context("pass --session-dir")?,
    };
    let launch = if args.reload_on_launch {
        LaunchAction::Reload
    } else if args.check_on_launch {
        LaunchAction::Check
    } else {
        LaunchAction::Connect
    };
    Ok(AppConfig {
        manifest_url: args.manifest_url.clone(),
        data_dir,
        session_dir,
        session: args.session.clone(),
        connect_timeout: Duration::from(args.connect_timeout),
        launch,
    })
}

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args)?;
    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&cfg)?);
        return Ok(());
    }
    console::run(cfg).await
}
