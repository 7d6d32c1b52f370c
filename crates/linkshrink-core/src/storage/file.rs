use super::{Repository, check_cancelled, reject_repeated_origins, table::LinkTable};
use crate::{
    Result,
    types::{BatchItem, BatchResult, Stats, StoredLink, UserLink},
};
use serde::{Deserialize, Serialize};
use std::{
    ffi::OsString,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Serialize)]
struct SnapshotRef<'a> {
    links: &'a [StoredLink],
}

#[derive(Deserialize)]
struct Snapshot {
    links: Vec<StoredLink>,
}

/// Link table persisted as a JSON snapshot.
///
/// Mutations are applied to a copy of the table, written to `<path>.tmp`,
/// renamed over `path` and only then made visible. A failed write leaves both
/// the file and the in-memory table untouched.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    table: Mutex<LinkTable>,
}

impl FileStorage {
    /// Loads `path`, treating a missing or empty file as an empty store.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let table = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => LinkTable::default(),
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
                LinkTable::from_links(snapshot.links)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => LinkTable::default(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(
            "Loaded {} links from {}",
            table.links().len(),
            path.display()
        );

        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    async fn commit<T, F>(&self, apply: F) -> Result<T>
    where
        F: FnOnce(&mut LinkTable) -> Result<T> + Send,
    {
        let mut table = self.table.lock().await;
        let mut next = table.clone();
        let out = apply(&mut next)?;
        self.persist(&next).await?;
        *table = next;
        Ok(out)
    }

    async fn persist(&self, table: &LinkTable) -> Result<()> {
        let bytes = serde_json::to_vec(&SnapshotRef {
            links: table.links(),
        })?;

        let mut tmp: OsString = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[tonic::async_trait]
impl Repository for FileStorage {
    async fn link_by_short(&self, short: &str) -> Result<String> {
        self.table.lock().await.lookup(short)
    }

    async fn save(&self, user_id: &str, origin: &str) -> Result<String> {
        self.commit(|table| table.insert(user_id, origin)).await
    }

    async fn bunch_save(&self, user_id: &str, items: Vec<BatchItem>) -> Result<Vec<BatchResult>> {
        reject_repeated_origins(&items)?;
        self.commit(|table| Ok(table.insert_batch(user_id, items)))
            .await
    }

    async fn links_by_user(&self, user_id: &str) -> Result<Vec<UserLink>> {
        Ok(self.table.lock().await.links_of(user_id))
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

        let marked = self
            .commit(|table| Ok(table.mark_deleted(ids, user_id)))
            .await?;
        tracing::debug!("Marked {marked} links as deleted");
        Ok(())
    }

    async fn stats(&self) -> Result<Stats> {
        Ok(self.table.lock().await.stats())
    }

    async fn ping(&self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        tokio::fs::metadata(dir).await?;
        Ok(())
    }
}
