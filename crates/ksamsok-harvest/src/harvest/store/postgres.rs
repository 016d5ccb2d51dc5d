//! PostgreSQL content store
//!
//! Holds a single transaction for its whole life. `commit` commits it and
//! immediately begins the next one on the same pool, so a harvest run keeps
//! writing through one connection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ksamsok_common::{ContentRecord, RecordStatus};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use super::{ContentStore, RecordWrite};
use crate::error::{HarvestError, HarvestResult};

pub struct PgContentStore {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgContentStore {
    /// Open a store with a fresh transaction
    pub async fn begin(pool: PgPool) -> HarvestResult<Self> {
        let tx = pool.begin().await?;
        Ok(Self { pool, tx: Some(tx) })
    }

    fn tx(&mut self) -> HarvestResult<&mut Transaction<'static, Postgres>> {
        self.tx.as_mut().ok_or(HarvestError::TransactionClosed)
    }

    /// Read a row inside the current transaction
    pub async fn load_record(&mut self, uri: &str) -> HarvestResult<Option<ContentRecord>> {
        let tx = self.tx()?;
        let row = sqlx::query_as::<_, ContentRow>(
            r#"
            SELECT uri, oai_uri, service_id, xml_data, changed, added,
                   datestamp, status, deleted, native_url
            FROM content
            WHERE uri = $1
            "#,
        )
        .bind(uri)
        .fetch_optional(&mut **tx)
        .await?;

        row.map(ContentRecord::try_from).transpose()
    }
}

#[derive(sqlx::FromRow)]
struct ContentRow {
    uri: String,
    oai_uri: Option<String>,
    service_id: String,
    xml_data: Option<String>,
    changed: DateTime<Utc>,
    added: DateTime<Utc>,
    datestamp: DateTime<Utc>,
    status: String,
    deleted: Option<DateTime<Utc>>,
    native_url: Option<String>,
}

impl TryFrom<ContentRow> for ContentRecord {
    type Error = HarvestError;

    fn try_from(row: ContentRow) -> HarvestResult<Self> {
        let status: RecordStatus = row
            .status
            .parse()
            .map_err(|e| HarvestError::Database(sqlx::Error::Decode(Box::new(e))))?;
        Ok(ContentRecord {
            uri: row.uri,
            oai_uri: row.oai_uri,
            service_id: row.service_id,
            xml_data: row.xml_data,
            changed: row.changed,
            added: row.added,
            datestamp: row.datestamp,
            status,
            deleted: row.deleted,
            native_url: row.native_url,
        })
    }
}

#[async_trait]
impl ContentStore for PgContentStore {
    async fn update_record(&mut self, record: &RecordWrite<'_>) -> HarvestResult<u64> {
        let tx = self.tx()?;
        let result = sqlx::query(
            r#"
            UPDATE content
            SET deleted = NULL, oai_uri = $1, service_id = $2, changed = $3,
                datestamp = $4, xml_data = $5, status = $6, native_url = $7
            WHERE uri = $8
            "#,
        )
        .bind(record.oai_uri)
        .bind(record.service_id)
        .bind(record.changed)
        .bind(record.datestamp)
        .bind(record.xml_data)
        .bind(RecordStatus::Normal.as_str())
        .bind(record.native_url)
        .bind(record.uri)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn insert_record(&mut self, record: &RecordWrite<'_>) -> HarvestResult<()> {
        let tx = self.tx()?;
        sqlx::query(
            r#"
            INSERT INTO content
                (uri, oai_uri, service_id, xml_data, changed, added, datestamp, status, native_url)
            VALUES ($1, $2, $3, $4, $5, $5, $6, $7, $8)
            "#,
        )
        .bind(record.uri)
        .bind(record.oai_uri)
        .bind(record.service_id)
        .bind(record.xml_data)
        .bind(record.changed)
        .bind(record.datestamp)
        .bind(RecordStatus::Normal.as_str())
        .bind(record.native_url)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn tombstone_by_oai_uri(
        &mut self,
        service_id: &str,
        oai_uri: &str,
        deleted_at: DateTime<Utc>,
        changed: DateTime<Utc>,
    ) -> HarvestResult<u64> {
        let tx = self.tx()?;
        let result = sqlx::query(
            r#"
            UPDATE content
            SET status = $1, changed = $2, deleted = $3, datestamp = $3, xml_data = NULL
            WHERE service_id = $4 AND oai_uri = $5
            "#,
        )
        .bind(RecordStatus::Normal.as_str())
        .bind(changed)
        .bind(deleted_at)
        .bind(service_id)
        .bind(oai_uri)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn mark_all_pending(&mut self, service_id: &str) -> HarvestResult<u64> {
        let tx = self.tx()?;
        let result = sqlx::query("UPDATE content SET status = $1 WHERE service_id = $2")
            .bind(RecordStatus::Pending.as_str())
            .bind(service_id)
            .execute(&mut **tx)
            .await?;

        Ok(result.rows_affected())
    }

    async fn fetch_pending_page(
        &mut self,
        service_id: &str,
        limit: usize,
    ) -> HarvestResult<Vec<String>> {
        let tx = self.tx()?;
        let uris = sqlx::query_scalar::<_, String>(
            "SELECT uri FROM content WHERE service_id = $1 AND status <> $2 LIMIT $3",
        )
        .bind(service_id)
        .bind(RecordStatus::Normal.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&mut **tx)
        .await?;

        Ok(uris)
    }

    async fn tombstone_swept(&mut self, uri: &str, ts: DateTime<Utc>) -> HarvestResult<u64> {
        let tx = self.tx()?;
        let result = sqlx::query(
            r#"
            UPDATE content
            SET changed = $1, deleted = COALESCE(deleted, $1), datestamp = COALESCE(deleted, $1),
                status = $2, xml_data = NULL
            WHERE uri = $3
            "#,
        )
        .bind(ts)
        .bind(RecordStatus::Normal.as_str())
        .bind(uri)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn reset_pending(&mut self, service_id: &str) -> HarvestResult<u64> {
        let tx = self.tx()?;
        let result =
            sqlx::query("UPDATE content SET status = $1 WHERE service_id = $2 AND status <> $1")
                .bind(RecordStatus::Normal.as_str())
                .bind(service_id)
                .execute(&mut **tx)
                .await?;

        Ok(result.rows_affected())
    }

    async fn commit(&mut self) -> HarvestResult<()> {
        let tx = self.tx.take().ok_or(HarvestError::TransactionClosed)?;
        tx.commit().await?;
        self.tx = Some(self.pool.begin().await?);
        debug!("Committed content transaction");
        Ok(())
    }

    async fn rollback(&mut self) -> HarvestResult<()> {
        let tx = self.tx.take().ok_or(HarvestError::TransactionClosed)?;
        tx.rollback().await?;
        debug!("Rolled back content transaction");
        Ok(())
    }
}
