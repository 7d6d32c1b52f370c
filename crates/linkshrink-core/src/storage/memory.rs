use super::{Repository, check_cancelled, reject_repeated_origins, table::LinkTable};
use crate::{
    Result,
    types::{BatchItem, BatchResult, Stats, UserLink},
};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

/// Process-local storage. Every operation holds the table lock for its whole
/// duration, so bulk updates are trivially atomic.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    table: RwLock<LinkTable>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[tonic::async_trait]
impl Repository for MemoryStorage {
    async fn link_by_short(&self, short: &str) -> Result<String> {
        self.table.read().lookup(short)
    }

    async fn save(&self, user_id: &str, origin: &str) -> Result<String> {
        self.table.write().insert(user_id, origin)
    }

    async fn bunch_save(&self, user_id: &str, items: Vec<BatchItem>) -> Result<Vec<BatchResult>> {
        reject_repeated_origins(&items)?;
        Ok(self.table.write().insert_batch(user_id, items))
    }

    async fn links_by_user(&self, user_id: &str) -> Result<Vec<UserLink>> {
        Ok(self.table.read().links_of(user_id))
    }

    #[tracing::instrument(level = "debug", skip_all, fields(user_id = %user_id, ids = ids.len()))]
    async fn bunch_mark_deleted(
        &self,
        cancel: &CancellationToken,
        ids: &[String],
        user_id: &str,
    ) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        check_cancelled(cancel)?;

        let marked = self.table.write().mark_deleted(ids, user_id);
        tracing::debug!("Marked {marked} links as deleted");
        Ok(())
    }

    async fn stats(&self) -> Result<Stats> {
        Ok(self.table.read().stats())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
