//! Interactive console host for one session.

mod surfaces;

use crate::cli::{AppConfig, LaunchAction};
use anyhow::{Context, Result};
use std::io::Write;
use std::sync::Arc;
use surfaces::ConsoleSurfaces;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use update_coordinator::{
    Coordinator, EventBus, EventListener, FsStore, HttpFetcher, MonitorAction, Runner,
    SessionController, SessionState, SessionStore, UpdateEvent,
};

/// Output line routing for stdout/stderr writer.
pub(crate) enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr so display callbacks never block on the terminal.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

const HELP: &[(&str, &str)] = &[
    ("check", "check for updates"),
    ("reload", "force a full reload of all data"),
    ("fg", "download now, showing the monitor"),
    ("bg", "download in the background"),
    ("later", "postpone the decision"),
    ("retry", "retry after a failure"),
    ("apply", "apply downloaded updates"),
    ("cancel", "cancel the running download"),
    ("close", "dismiss a failed download"),
    ("settings", "show update settings"),
    ("back", "back press"),
    ("show", "bring a background download to the foreground"),
    ("recreate", "tear the session down and rebuild it from its record"),
    ("status", "show session and coordinator state"),
    ("help", "this list"),
    ("quit", "save the session and exit"),
];

/// One live session plus the surfaces it drives.
struct Host {
    session: SessionController,
    surfaces: Arc<ConsoleSurfaces>,
}

struct Console {
    cfg: AppConfig,
    coordinator: Coordinator,
    events: EventBus,
    store: SessionStore,
    out: mpsc::UnboundedSender<OutputLine>,
    host: Host,
}

impl Console {
    fn build_host(
        cfg: &AppConfig,
        coordinator: &Coordinator,
        events: &EventBus,
        out: &mpsc::UnboundedSender<OutputLine>,
        record: Option<&update_coordinator::SessionRecord>,
    ) -> Result<Host> {
        let settings = format!(
            "manifest {}, data in {}",
            cfg.manifest_url,
            cfg.data_dir.display()
        );
        let surfaces = Arc::new(ConsoleSurfaces::new(
            out.clone(),
            coordinator.clone(),
            settings,
        ));
        let session =
            SessionController::restore(coordinator.clone(), surfaces.clone(), events.clone(), record)
                .context("restore session record")?;
        Ok(Host { session, surfaces })
    }

    fn say(&self, line: impl Into<String>) {
        let _ = self.out.send(OutputLine::Stdout(line.into()));
    }

    async fn save(&self) -> Result<()> {
        let record = self.host.session.save_record();
        self.store
            .save(&self.cfg.session, &record)
            .await
            .with_context(|| format!("save session {}", self.cfg.session))
    }

    fn recreate(&mut self) -> Result<()> {
        let record = self.host.session.save_record();
        self.host.surfaces.release();
        let host = Self::build_host(
            &self.cfg,
            &self.coordinator,
            &self.events,
            &self.out,
            Some(&record),
        )?;
        self.host = host;
        info!(state = %record.state, mode = %record.mode, "session recreated");
        self.host.session.connect();
        Ok(())
    }

    fn status(&self) {
        let s = &self.host.session;
        let c = &self.coordinator;
        self.say(format!(
            "session {} ({}), coordinator {}",
            s.state(),
            s.mode().as_str(),
            c.state()
        ));
        for runner in [Runner::Definition, Runner::Database, Runner::Files] {
            if let Some(p) = c.progress(runner) {
                let max = p.max.map(|m| format!("/{m}")).unwrap_or_default();
                self.say(format!(
                    "  {:<10} {:?} {}{}",
                    runner.label(),
                    p.status,
                    p.value,
                    max
                ));
            }
        }
        if let (Some(title), Some(details)) = (c.last_error_title(), c.last_error_details()) {
            self.say(format!("  last error: {title}: {details}"));
        }
        if let Some(err) = s.illegal_state() {
            self.say(format!("  halted: {err}"));
        }
    }

    /// Returns `false` on quit.
    fn handle(&mut self, line: &str) -> Result<bool> {
        let s = self.host.session.clone();
        let accepted = match line {
            "" => return Ok(true),
            "check" => s.check_for_updates(),
            "reload" => s.reload_all_data(),
            "fg" => s.send_to_foreground(),
            "bg" => match s.state() {
                SessionState::Deciding => s.send_to_background(),
                _ => s.handle_monitor_action(MonitorAction::GoBackground),
            },
            "later" => s.postpone(),
            "retry" => match s.state() {
                SessionState::Deciding => s.retry(),
                _ => s.handle_monitor_action(MonitorAction::RetryDownload),
            },
            "apply" => s.handle_monitor_action(MonitorAction::ApplyUpdate),
            "cancel" => s.handle_monitor_action(MonitorAction::CancelUpdate),
            "close" => s.handle_monitor_action(MonitorAction::CloseUpdate),
            "settings" => s.handle_monitor_action(MonitorAction::ChangeSettings),
            "back" => s.on_back_pressed(),
            "show" => s.bring_to_foreground(),
            "recreate" => {
                self.recreate()?;
                true
            }
            "status" => {
                self.status();
                true
            }
            "help" => {
                for (cmd, what) in HELP {
                    self.say(format!("  {cmd:<9} {what}"));
                }
                true
            }
            "quit" | "exit" => return Ok(false),
            other => {
                self.say(format!("unknown command {other:?} (try help)"));
                true
            }
        };
        if !accepted {
            self.say(format!("({line} not available in {})", s.state()));
        }
        Ok(true)
    }
}

struct EventPrinter(mpsc::UnboundedSender<OutputLine>);

impl EventListener for EventPrinter {
    fn on_update_event(&self, event: UpdateEvent) {
        let _ = self.0.send(OutputLine::Stderr(format!("event: {event:?}")));
    }
}

pub async fn run(cfg: AppConfig) -> Result<()> {
    let (out, out_handle) = spawn_output_writer();

    let fetcher = HttpFetcher::new(&cfg.manifest_url, &cfg.data_dir, cfg.connect_timeout)?;
    let store = FsStore::new(&cfg.data_dir);
    if let Some(v) = store.installed_version().await? {
        let _ = out.send(OutputLine::Stderr(format!("Installed data version {v}")));
    }
    let coordinator = Coordinator::start(Arc::new(fetcher), Arc::new(store));

    let events = EventBus::new();
    events.subscribe(Arc::new(EventPrinter(out.clone())));

    let sessions = SessionStore::new(&cfg.session_dir);
    let record = match sessions.load(&cfg.session).await {
        Ok(r) => r,
        Err(e) => {
            warn!("ignoring session record {}: {e}", cfg.session);
            None
        }
    };
    let host = Console::build_host(&cfg, &coordinator, &events, &out, record.as_ref())?;
    let mut console = Console {
        cfg,
        coordinator: coordinator.clone(),
        events,
        store: sessions,
        out: out.clone(),
        host,
    };

    console.host.session.connect();
    match console.cfg.launch {
        LaunchAction::Connect => {}
        LaunchAction::Check => {
            console.host.session.check_for_updates();
        }
        LaunchAction::Reload => {
            console.host.session.reload_all_data();
        }
    }
    console.say("Type help for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("read stdin")? else { break };
                if !console.handle(line.trim())? {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    console.save().await?;
    console.host.surfaces.release();
    coordinator.shutdown();

    drop(console);
    drop(out);
    let _ = out_handle.await;
    Ok(())
}
