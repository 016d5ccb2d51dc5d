//! In-memory content store
//!
//! Used for dry runs and tests. Changes since the last commit are journaled so
//! that a rollback restores the committed state exactly.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ksamsok_common::{ContentRecord, RecordStatus};

use super::{ContentStore, RecordWrite};
use crate::error::{HarvestError, HarvestResult};

#[derive(Debug, Default)]
pub struct MemoryContentStore {
    rows: BTreeMap<String, ContentRecord>,
    /// Previous value of every key touched since the last commit, oldest first
    journal: Vec<(String, Option<ContentRecord>)>,
    commit_count: usize,
    closed: bool,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose committed state is `records`
    pub fn with_records(records: impl IntoIterator<Item = ContentRecord>) -> Self {
        Self {
            rows: records.into_iter().map(|r| (r.uri.clone(), r)).collect(),
            ..Self::default()
        }
    }

    pub fn get(&self, uri: &str) -> Option<&ContentRecord> {
        self.rows.get(uri)
    }

    pub fn rows(&self) -> impl Iterator<Item = &ContentRecord> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of successful commits
    pub fn commit_count(&self) -> usize {
        self.commit_count
    }

    /// Whether uncommitted changes exist
    pub fn has_uncommitted(&self) -> bool {
        !self.journal.is_empty()
    }

    fn ensure_open(&self) -> HarvestResult<()> {
        if self.closed {
            return Err(HarvestError::TransactionClosed);
        }
        Ok(())
    }

    fn journal(&mut self, uri: &str) {
        let previous = self.rows.get(uri).cloned();
        self.journal.push((uri.to_string(), previous));
    }

    /// Apply `change` to every row matching `filter`, journaling each one
    fn update_where(
        &mut self,
        filter: impl Fn(&ContentRecord) -> bool,
        change: impl Fn(&mut ContentRecord),
    ) -> u64 {
        let keys: Vec<String> = self
            .rows
            .values()
            .filter(|r| filter(*r))
            .map(|r| r.uri.clone())
            .collect();
        for key in &keys {
            self.journal(key);
            if let Some(row) = self.rows.get_mut(key) {
                change(row);
            }
        }
        keys.len() as u64
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn update_record(&mut self, record: &RecordWrite<'_>) -> HarvestResult<u64> {
        self.ensure_open()?;
        Ok(self.update_where(
            |row| row.uri == record.uri,
            |row| {
                row.deleted = None;
                row.oai_uri = record.oai_uri.map(str::to_string);
                row.service_id = record.service_id.to_string();
                row.changed = record.changed;
                row.datestamp = record.datestamp;
                row.xml_data = Some(record.xml_data.to_string());
                row.status = RecordStatus::Normal;
                row.native_url = record.native_url.map(str::to_string);
            },
        ))
    }

    async fn insert_record(&mut self, record: &RecordWrite<'_>) -> HarvestResult<()> {
        self.ensure_open()?;
        if self.rows.contains_key(record.uri) {
            return Err(HarvestError::DuplicateRecord {
                uri: record.uri.to_string(),
            });
        }
        self.journal(record.uri);
        self.rows.insert(
            record.uri.to_string(),
            ContentRecord {
                uri: record.uri.to_string(),
                oai_uri: record.oai_uri.map(str::to_string),
                service_id: record.service_id.to_string(),
                xml_data: Some(record.xml_data.to_string()),
                changed: record.changed,
                added: record.changed,
                datestamp: record.datestamp,
                status: RecordStatus::Normal,
                deleted: None,
                native_url: record.native_url.map(str::to_string),
            },
        );
        Ok(())
    }

    async fn tombstone_by_oai_uri(
        &mut self,
        service_id: &str,
        oai_uri: &str,
        deleted_at: DateTime<Utc>,
        changed: DateTime<Utc>,
    ) -> HarvestResult<u64> {
        self.ensure_open()?;
        Ok(self.update_where(
            |row| row.service_id == service_id && row.oai_uri.as_deref() == Some(oai_uri),
            |row| {
                row.status = RecordStatus::Normal;
                row.changed = changed;
                row.deleted = Some(deleted_at);
                row.datestamp = deleted_at;
                row.xml_data = None;
            },
        ))
    }

    async fn mark_all_pending(&mut self, service_id: &str) -> HarvestResult<u64> {
        self.ensure_open()?;
        Ok(self.update_where(
            |row| row.service_id == service_id,
            |row| row.status = RecordStatus::Pending,
        ))
    }

    async fn fetch_pending_page(
        &mut self,
        service_id: &str,
        limit: usize,
    ) -> HarvestResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self
            .rows
            .values()
            .filter(|row| row.service_id == service_id && row.status != RecordStatus::Normal)
            .take(limit)
            .map(|row| row.uri.clone())
            .collect())
    }

    async fn tombstone_swept(&mut self, uri: &str, ts: DateTime<Utc>) -> HarvestResult<u64> {
        self.ensure_open()?;
        Ok(self.update_where(
            |row| row.uri == uri,
            |row| {
                let deleted = row.deleted.unwrap_or(ts);
                row.changed = ts;
                row.deleted = Some(deleted);
                row.datestamp = deleted;
                row.status = RecordStatus::Normal;
                row.xml_data = None;
            },
        ))
    }

    async fn reset_pending(&mut self, service_id: &str) -> HarvestResult<u64> {
        self.ensure_open()?;
        Ok(self.update_where(
            |row| row.service_id == service_id && row.status != RecordStatus::Normal,
            |row| row.status = RecordStatus::Normal,
        ))
    }

    async fn commit(&mut self) -> HarvestResult<()> {
        self.ensure_open()?;
        self.journal.clear();
        self.commit_count += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> HarvestResult<()> {
        self.ensure_open()?;
        while let Some((uri, previous)) = self.journal.pop() {
            match previous {
                Some(row) => {
                    self.rows.insert(uri, row);
                }
                None => {
                    self.rows.remove(&uri);
                }
            }
        }
        self.closed = true;
        Ok(())
    }
}
