//! Content store interface
//!
//! A store wraps one open transaction on the `content` table. Every mutating
//! call runs inside that transaction; [`ContentStore::commit`] makes the work
//! durable and opens the next one. Batching policy (when to commit) lives in
//! the harvest session, not here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::HarvestResult;

pub mod memory;
pub mod postgres;

pub use memory::MemoryContentStore;
pub use postgres::PgContentStore;

/// Column values for an upserted record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordWrite<'a> {
    /// Canonical identifier (table key)
    pub uri: &'a str,
    /// Protocol identifier; absent when the header had no `identifier`
    pub oai_uri: Option<&'a str>,
    pub service_id: &'a str,
    pub xml_data: &'a str,
    pub datestamp: DateTime<Utc>,
    pub native_url: Option<&'a str>,
    /// Run timestamp; also used as `added` on insert
    pub changed: DateTime<Utc>,
}

#[async_trait]
pub trait ContentStore: Send {
    /// Overwrite the row keyed by `record.uri`, clearing any tombstone and
    /// setting status to normal. Returns the number of rows affected.
    async fn update_record(&mut self, record: &RecordWrite<'_>) -> HarvestResult<u64>;

    /// Insert a new row with `added = changed`
    async fn insert_record(&mut self, record: &RecordWrite<'_>) -> HarvestResult<()>;

    /// Tombstone the rows of `service_id` carrying `oai_uri`. Returns the
    /// number of rows affected.
    async fn tombstone_by_oai_uri(
        &mut self,
        service_id: &str,
        oai_uri: &str,
        deleted_at: DateTime<Utc>,
        changed: DateTime<Utc>,
    ) -> HarvestResult<u64>;

    /// Set status to pending on every row of `service_id`
    async fn mark_all_pending(&mut self, service_id: &str) -> HarvestResult<u64>;

    /// Up to `limit` URIs of rows of `service_id` that are not normal
    async fn fetch_pending_page(&mut self, service_id: &str, limit: usize)
        -> HarvestResult<Vec<String>>;

    /// Tombstone a swept row. An existing `deleted` value is kept; otherwise
    /// `ts` is used. `datestamp` follows `deleted`.
    async fn tombstone_swept(&mut self, uri: &str, ts: DateTime<Utc>) -> HarvestResult<u64>;

    /// Set every non-normal row of `service_id` back to normal
    async fn reset_pending(&mut self, service_id: &str) -> HarvestResult<u64>;

    async fn commit(&mut self) -> HarvestResult<()>;

    /// Discard everything since the last commit. The store cannot be used
    /// afterwards.
    async fn rollback(&mut self) -> HarvestResult<()>;
}
