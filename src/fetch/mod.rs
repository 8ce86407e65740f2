//! Collaborators the coordinator drives: the fetch subsystem and the persistence sink.

mod http;
mod store;

pub use http::{is_newer, parse_manifest, HttpFetcher};
pub use store::FsStore;

use crate::coordinator::WorkerContext;
use crate::model::{CheckOutcome, CheckRequest, DownloadOutcome, UpdateDefinition, UpdatePayload};
use async_trait::async_trait;

/// Performs the actual check and download work on a worker task.
///
/// Return a [`crate::FetchFailure`] to control the title shown to the user; any other error is
/// reported under a generic title with its context chain as details.
#[async_trait]
pub trait FetchSubsystem: Send + Sync + 'static {
    async fn check(&self, request: CheckRequest, ctx: &WorkerContext)
        -> anyhow::Result<CheckOutcome>;

    /// `definition` is `None` when the check was interrupted before it concluded; the download
    /// must then resolve the definition itself.
    async fn download(
        &self,
        definition: Option<UpdateDefinition>,
        ctx: &WorkerContext,
    ) -> anyhow::Result<DownloadOutcome>;
}

/// Makes a loaded payload effective. Irreversible.
#[async_trait]
pub trait Persistence: Send + Sync + 'static {
    async fn commit(&self, payload: UpdatePayload) -> anyhow::Result<()>;
}
