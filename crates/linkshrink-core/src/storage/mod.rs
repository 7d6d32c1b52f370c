//! Pluggable link storage.
//!
//! Every backend implements [`Repository`]. The HTTP and gRPC front ends use
//! the create/read half of the trait directly, while the deletion worker pool
//! only ever calls [`Repository::bunch_mark_deleted`].
//!
//! ## Backends
//!
//! - [`MemoryStorage`] - process-local, lost on restart.
//! - [`FileStorage`] - in-memory table persisted as a JSON snapshot.
//! - `PgStorage` - PostgreSQL via `sqlx` (cargo feature `postgres`).
//!
//! [`open`] picks a backend from configuration: a database DSN wins over a
//! file path, which wins over plain memory.

mod file;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod table;

#[cfg(test)]
mod tests;

pub use file::FileStorage;
pub use memory::MemoryStorage;
#[cfg(feature = "postgres")]
pub use postgres::PgStorage;

use crate::{
    Error, Result,
    types::{BatchItem, BatchResult, Stats, UserLink},
};
use std::{collections::HashSet, path::Path, sync::Arc};
use tokio_util::sync::CancellationToken;

/// Storage contract shared by all backends.
///
/// Implementations must be safe to call concurrently from request handlers
/// and from every deletion worker at once.
#[tonic::async_trait]
pub trait Repository: Send + Sync + 'static {
    /// Returns the origin URL stored under `short`.
    ///
    /// Fails with [`Error::LinkNotFound`] for unknown codes and
    /// [`Error::LinkGone`] for soft-deleted ones.
    async fn link_by_short(&self, short: &str) -> Result<String>;

    /// Shortens `origin` on behalf of `user_id`.
    ///
    /// If the user already holds a live link for the same origin, fails with
    /// [`Error::AlreadyShortened`] carrying the existing code.
    async fn save(&self, user_id: &str, origin: &str) -> Result<String>;

    /// Shortens every item in one all-or-nothing operation. Items whose origin
    /// the user already shortened reuse the existing code.
    ///
    /// A batch naming the same origin twice fails with
    /// [`Error::InvalidRequest`] and stores nothing, since only one of the
    /// correlation ids could be kept.
    async fn bunch_save(&self, user_id: &str, items: Vec<BatchItem>) -> Result<Vec<BatchResult>>;

    /// Returns the live links owned by `user_id`, oldest first.
    async fn links_by_user(&self, user_id: &str) -> Result<Vec<UserLink>>;

    /// Marks as deleted every link owned by `user_id` whose short code or
    /// correlation id appears in `ids`.
    ///
    /// The update is atomic: either every match is marked or none is. An empty
    /// `ids` slice is a no-op. Backends check `cancel` once, before touching
    /// any data, and return [`Error::Cancelled`] if it already fired.
    async fn bunch_mark_deleted(
        &self,
        cancel: &CancellationToken,
        ids: &[String],
        user_id: &str,
    ) -> Result<()>;

    /// Counts live links and the distinct users owning them.
    async fn stats(&self) -> Result<Stats>;

    /// Checks that the backend is reachable.
    async fn ping(&self) -> Result<()>;
}

/// Opens the backend selected by configuration.
///
/// A non-empty `database_dsn` selects PostgreSQL, a `file_path` selects the
/// JSON file backend and otherwise links live in memory only.
pub async fn open(
    database_dsn: Option<&str>,
    file_path: Option<&Path>,
) -> Result<Arc<dyn Repository>> {
    if let Some(dsn) = database_dsn.filter(|dsn| !dsn.is_empty()) {
        #[cfg(feature = "postgres")]
        {
            tracing::info!("Using PostgreSQL storage");
            return Ok(Arc::new(PgStorage::connect(dsn).await?));
        }
        #[cfg(not(feature = "postgres"))]
        {
            let _ = dsn;
            return Err(Error::storage(
                "database DSN given but linkshrink was built without the `postgres` feature",
            ));
        }
    }

    if let Some(path) = file_path {
        tracing::info!("Using file storage at {}", path.display());
        return Ok(Arc::new(FileStorage::open(path).await?));
    }

    tracing::info!("Using in-memory storage");
    Ok(Arc::new(MemoryStorage::new()))
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

fn reject_repeated_origins(items: &[BatchItem]) -> Result<()> {
    let mut seen = HashSet::with_capacity(items.len());
    match items.iter().find(|item| !seen.insert(item.origin.as_str())) {
        Some(item) => Err(Error::invalid(format!(
            "original_url `{}` appears more than once in the batch",
            item.origin
        ))),
        None => Ok(()),
    }
}
