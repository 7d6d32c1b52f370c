use super::{Repository, check_cancelled, reject_repeated_origins};
use crate::{
    Error, Result,
    types::{BatchItem, BatchResult, Stats, UserLink, generate_short_code},
};
use sqlx::{
    PgPool, Postgres, Transaction,
    postgres::PgPoolOptions,
};
use tokio_util::sync::CancellationToken;

const SCHEMA: &str = r#"
create schema if not exists storage;
create table if not exists storage.short_links
(
    id             bigserial    primary key,
    user_id        varchar(64)  not null,
    origin         text         not null,
    short          varchar(32)  not null unique,
    correlation_id varchar(128),
    is_deleted     boolean      not null default false
);
create unique index if not exists short_links_live_user_origin_uindex
    on storage.short_links (user_id, origin) where not is_deleted;
"#;

const SQL_INSERT: &str = r#"
insert into storage.short_links (user_id, origin, short, correlation_id)
values ($1, $2, $3, $4)
on conflict (user_id, origin) where not is_deleted do nothing
returning short
"#;

const SQL_LIVE_SHORT: &str = r#"
select short from storage.short_links
where user_id = $1 and origin = $2 and not is_deleted
"#;

const SQL_ORIGIN: &str = r#"
select origin, is_deleted from storage.short_links where short = $1
"#;

const SQL_USER_LINKS: &str = r#"
select short, origin from storage.short_links
where user_id = $1 and not is_deleted
order by id
"#;

const SQL_MARK_DELETED: &str = r#"
update storage.short_links set is_deleted = true
where user_id = $1
  and not is_deleted
  and (correlation_id = any($2) or short = any($2))
"#;

const SQL_STATS: &str = r#"
select count(*), count(distinct user_id)
from storage.short_links where not is_deleted
"#;

const MAX_CONNECTIONS: u32 = 16;

/// PostgreSQL backend. Every mutation runs in its own transaction.
#[derive(Debug, Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    /// Connects to `dsn` and creates the schema if needed.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(dsn)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    async fn insert(
        tx: &mut Transaction<'_, Postgres>,
        user_id: &str,
        origin: &str,
        correlation_id: Option<&str>,
    ) -> Result<std::result::Result<String, String>> {
        let inserted: Option<(String,)> = sqlx::query_as(SQL_INSERT)
            .bind(user_id)
            .bind(origin)
            .bind(generate_short_code())
            .bind(correlation_id)
            .fetch_optional(&mut **tx)
            .await?;
        if let Some((short,)) = inserted {
            return Ok(Ok(short));
        }

        let (existing,): (String,) = sqlx::query_as(SQL_LIVE_SHORT)
            .bind(user_id)
            .bind(origin)
            .fetch_one(&mut **tx)
            .await?;
        Ok(Err(existing))
    }
}

#[tonic::async_trait]
impl Repository for PgStorage {
    async fn link_by_short(&self, short: &str) -> Result<String> {
        let row: Option<(String, bool)> = sqlx::query_as(SQL_ORIGIN)
            .bind(short)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some((origin, false)) => Ok(origin),
            Some((_, true)) => Err(Error::LinkGone {
                short: short.to_owned(),
            }),
            None => Err(Error::LinkNotFound {
                short: short.to_owned(),
            }),
        }
    }

    async fn save(&self, user_id: &str, origin: &str) -> Result<String> {
        let mut tx = self.pool.begin().await?;
        let outcome = Self::insert(&mut tx, user_id, origin, None).await?;
        tx.commit().await?;
        outcome.map_err(|short| Error::AlreadyShortened { short })
    }

    async fn bunch_save(&self, user_id: &str, items: Vec<BatchItem>) -> Result<Vec<BatchResult>> {
        reject_repeated_origins(&items)?;
        let mut tx = self.pool.begin().await?;
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let short = match Self::insert(
                &mut tx,
                user_id,
                &item.origin,
                Some(&item.correlation_id),
            )
            .await?
            {
                Ok(short) | Err(short) => short,
            };
            results.push(BatchResult {
                correlation_id: item.correlation_id,
                short,
            });
        }
        tx.commit().await?;
        Ok(results)
    }

    async fn links_by_user(&self, user_id: &str) -> Result<Vec<UserLink>> {
        let rows: Vec<(String, String)> = sqlx::query_as(SQL_USER_LINKS)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(short, origin)| UserLink { short, origin })
            .collect())
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

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(SQL_MARK_DELETED)
            .bind(user_id)
            .bind(ids)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::debug!("Marked {} links as deleted", result.rows_affected());
        Ok(())
    }

    async fn stats(&self) -> Result<Stats> {
        let (urls, users): (i64, i64) = sqlx::query_as(SQL_STATS).fetch_one(&self.pool).await?;
        Ok(Stats {
            urls: usize::try_from(urls).unwrap_or_default(),
            users: usize::try_from(users).unwrap_or_default(),
        })
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("select 1").execute(&self.pool).await?;
        Ok(())
    }
}
