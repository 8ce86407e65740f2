//! Worker tasks and the context they report through.

use super::dispatch::LoopMsg;
use crate::error::Cancelled;
use crate::fetch::{FetchSubsystem, Persistence};
use crate::model::{
    CheckOutcome, CheckRequest, DownloadOutcome, ExecutionStatus, ProgressUpdate, Runner,
    UpdateDefinition, UpdatePayload,
};
use anyhow::anyhow;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Identity and cancel flag of one worker run.
#[derive(Debug, Clone)]
pub(crate) struct OpTicket {
    pub id: u64,
    pub cancel: Arc<AtomicBool>,
}

/// Work a transition asks to be started once the core lock is released.
pub(crate) enum Job {
    Check {
        ticket: OpTicket,
        request: CheckRequest,
    },
    Download {
        ticket: OpTicket,
        definition: Option<UpdateDefinition>,
    },
    Commit {
        payload: UpdatePayload,
    },
}

pub(crate) enum ReportKind {
    Progress(ProgressUpdate),
    Checked(anyhow::Result<CheckOutcome>),
    Downloaded(anyhow::Result<DownloadOutcome>),
}

pub(crate) struct WorkerReport {
    pub op_id: u64,
    pub kind: ReportKind,
}

/// Handed to the fetch subsystem for the duration of one check or download.
///
/// Progress sent after the run was cancelled or superseded is dropped by the coordinator.
pub struct WorkerContext {
    ticket: OpTicket,
    tx: mpsc::UnboundedSender<LoopMsg>,
}

impl WorkerContext {
    pub(crate) fn new(ticket: OpTicket, tx: mpsc::UnboundedSender<LoopMsg>) -> Self {
        Self { ticket, tx }
    }

    pub fn op_id(&self) -> u64 {
        self.ticket.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.ticket.cancel.load(Ordering::Relaxed)
    }

    /// Bail out with [`Cancelled`] once cancellation has been requested.
    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn report(&self, update: ProgressUpdate) {
        let _ = self.tx.send(LoopMsg::Report(WorkerReport {
            op_id: self.ticket.id,
            kind: ReportKind::Progress(update),
        }));
    }

    pub fn start(&self, runner: Runner) {
        self.report(ProgressUpdate::Start(runner));
    }

    pub fn set_max(&self, runner: Runner, max: u64) {
        self.report(ProgressUpdate::Max { runner, max });
    }

    pub fn set_progress(&self, runner: Runner, value: u64, follower: Option<&str>) {
        self.report(ProgressUpdate::Current {
            runner,
            value,
            follower: follower.map(str::to_owned),
            status: None,
        });
    }

    pub fn set_status(&self, runner: Runner, status: ExecutionStatus) {
        self.report(ProgressUpdate::Status { runner, status });
    }

    pub fn set_summary(&self, runner: Runner, text: impl Into<String>) {
        self.report(ProgressUpdate::Summary {
            runner,
            text: text.into(),
        });
    }

    pub fn set_indeterminate(&self, runner: Runner, on: bool) {
        self.report(ProgressUpdate::Indeterminate { runner, on });
    }

    fn finish(self, kind: ReportKind) {
        let _ = self.tx.send(LoopMsg::Report(WorkerReport {
            op_id: self.ticket.id,
            kind,
        }));
    }
}

/// Collaborators and plumbing a spawned job needs.
pub(crate) struct Workers {
    pub runtime: Handle,
    pub fetcher: Arc<dyn FetchSubsystem>,
    pub persistence: Arc<dyn Persistence>,
    pub tx: mpsc::UnboundedSender<LoopMsg>,
}

impl Workers {
    pub fn spawn(&self, job: Job) {
        match job {
            Job::Check { ticket, request } => {
                let fetcher = self.fetcher.clone();
                let ctx = WorkerContext::new(ticket.clone(), self.tx.clone());
                let report = WorkerContext::new(ticket, self.tx.clone());
                self.runtime.spawn(async move {
                    let outcome = guarded(async move { fetcher.check(request, &ctx).await }).await;
                    report.finish(ReportKind::Checked(outcome));
                });
            }
            Job::Download { ticket, definition } => {
                let fetcher = self.fetcher.clone();
                let ctx = WorkerContext::new(ticket.clone(), self.tx.clone());
                let report = WorkerContext::new(ticket, self.tx.clone());
                self.runtime.spawn(async move {
                    let outcome =
                        guarded(async move { fetcher.download(definition, &ctx).await }).await;
                    report.finish(ReportKind::Downloaded(outcome));
                });
            }
            Job::Commit { payload } => {
                let persistence = self.persistence.clone();
                self.runtime.spawn(async move {
                    let version = payload.version.clone();
                    match guarded(async move { persistence.commit(payload).await }).await {
                        Ok(()) => info!(%version, "update committed"),
                        Err(e) => warn!(%version, "update commit failed: {e:#}"),
                    }
                });
            }
        }
    }
}

/// Run `fut` as its own task so a panic comes back as an error instead of a lost report.
async fn guarded<T, F>(fut: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(result) => result,
        Err(join) => Err(anyhow!("worker task failed: {join}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn guarded_turns_panic_into_error() {
        let result: anyhow::Result<()> = guarded(async { panic!("boom") }).await;
        let msg = format!("{:#}", result.unwrap_err());
        assert!(msg.starts_with("worker task failed"), "{msg}");
    }

    #[test]
    fn checkpoint_follows_cancel_flag() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let ticket = OpTicket {
            id: 4,
            cancel: Arc::new(AtomicBool::new(false)),
        };
        let ctx = WorkerContext::new(ticket.clone(), tx);
        assert!(ctx.checkpoint().is_ok());
        ticket.cancel.store(true, Ordering::Relaxed);
        assert_eq!(ctx.checkpoint(), Err(Cancelled));
        assert_eq!(ctx.op_id(), 4);
    }
}
