//! Run-scoped transaction management
//!
//! A [`HarvestSession`] is created at the start of a run and owns everything
//! mutable about it: the content store (and with it the open transaction),
//! the insert/update/delete counters and the commit policy. Every store
//! operation of the run goes through it.
//!
//! Records are upserted by trying an update keyed by the canonical URI and
//! inserting when nothing was updated. The two statements are not atomic
//! together; only one run may write a given service at a time.

use std::time::Instant;

use chrono::{DateTime, Utc};
use ksamsok_common::ServiceMetadata;
use tracing::{debug, info};

use super::analyzer::ContentAnalyzer;
use super::status::StatusService;
use super::store::{ContentStore, RecordWrite};
use crate::config::HarvestSettings;
use crate::error::HarvestResult;

/// Insert/update/delete counts for a run, in total and since the last commit
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HarvestCounters {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub inserted_xact: usize,
    pub updated_xact: usize,
    pub deleted_xact: usize,
}

impl HarvestCounters {
    /// Operations in the open transaction
    pub fn uncommitted(&self) -> usize {
        self.inserted_xact + self.updated_xact + self.deleted_xact
    }

    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }

    fn roll_up(&mut self) {
        self.inserted += std::mem::take(&mut self.inserted_xact);
        self.updated += std::mem::take(&mut self.updated_xact);
        self.deleted += std::mem::take(&mut self.deleted_xact);
    }
}

pub struct HarvestSession<'a, S: ContentStore> {
    store: &'a mut S,
    service: &'a ServiceMetadata,
    analyzer: &'a dyn ContentAnalyzer,
    status: &'a dyn StatusService,
    run_started: DateTime<Utc>,
    settings: HarvestSettings,
    counters: HarvestCounters,
}

impl<'a, S: ContentStore> HarvestSession<'a, S> {
    pub fn new(
        store: &'a mut S,
        service: &'a ServiceMetadata,
        analyzer: &'a dyn ContentAnalyzer,
        status: &'a dyn StatusService,
        run_started: DateTime<Utc>,
    ) -> Self {
        Self {
            store,
            service,
            analyzer,
            status,
            run_started,
            settings: HarvestSettings::default(),
            counters: HarvestCounters::default(),
        }
    }

    pub fn with_settings(mut self, settings: HarvestSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn service(&self) -> &ServiceMetadata {
        self.service
    }

    pub fn service_id(&self) -> &str {
        &self.service.id
    }

    /// Timestamp of this run, written to `changed` and used as fallback datestamp
    pub fn run_started(&self) -> DateTime<Utc> {
        self.run_started
    }

    pub fn counters(&self) -> HarvestCounters {
        self.counters
    }

    pub fn check_interrupt(&self) -> HarvestResult<()> {
        self.status.check_interrupt(&self.service.id)
    }

    pub fn report_problem(&self, message: &str) {
        self.status.report_problem(message);
    }

    /// Store a harvested record, updating the row with the same canonical URI
    /// or inserting a new one.
    ///
    /// Payloads that cannot be analyzed or have no identifier are reported
    /// and skipped.
    pub async fn upsert_or_insert(
        &mut self,
        oai_id: Option<&str>,
        payload: &str,
        datestamp: DateTime<Utc>,
    ) -> HarvestResult<()> {
        let service = self.service;
        let record_label = oai_id.unwrap_or("<no identifier>");
        let info = match self.analyzer.extract_info(payload) {
            Ok(info) => info,
            Err(e) => {
                debug!(oai_id = record_label, error = %e, "Payload analysis failed");
                self.status.report_problem(&format!(
                    "Problem parsing rdf and/or extracting info for record {} --SKIPPING--",
                    record_label
                ));
                self.status.signal_rdf_error(&service.id);
                return Ok(());
            }
        };
        let Some(uri) = info.identifier.as_deref() else {
            self.status
                .report_problem(&format!("No uri found for {} --SKIPPING--", record_label));
            return Ok(());
        };

        let write = RecordWrite {
            uri,
            oai_uri: oai_id,
            service_id: &service.id,
            xml_data: payload,
            datestamp,
            native_url: info.native_url.as_deref(),
            changed: self.run_started,
        };

        if self.store.update_record(&write).await? > 0 {
            self.counters.updated_xact += 1;
            debug!(oai_id = record_label, uri, service_id = %service.id, "Updated record");
        } else {
            self.store.insert_record(&write).await?;
            self.counters.inserted_xact += 1;
            debug!(oai_id = record_label, uri, service_id = %service.id, "Inserted record");
        }

        self.commit_if_limit_reached(false).await
    }

    /// Tombstone the record(s) of this service carrying `oai_id`
    pub async fn tombstone(
        &mut self,
        oai_id: &str,
        deleted_at: DateTime<Utc>,
    ) -> HarvestResult<u64> {
        let affected = self
            .store
            .tombstone_by_oai_uri(&self.service.id, oai_id, deleted_at, self.run_started)
            .await?;
        self.counters.deleted_xact += affected as usize;
        debug!(oai_id, affected, service_id = %self.service.id, "Tombstoned record");

        self.commit_if_limit_reached(false).await?;
        Ok(affected)
    }

    /// Flag every row of the service as pending and commit.
    ///
    /// Rows that reappear during the run are set back to normal by the
    /// upsert; whatever is still pending at the end is swept.
    pub async fn mark_all_pending(&mut self) -> HarvestResult<u64> {
        let started = Instant::now();
        let marked = self.store.mark_all_pending(&self.service.id).await?;
        self.commit_if_limit_reached(true).await?;
        debug!(
            service_id = %self.service.id,
            marked,
            elapsed = ?started.elapsed(),
            "Marked records as pending"
        );
        Ok(marked)
    }

    /// Tombstone every row of the service still pending, one page per
    /// transaction. Returns the number of rows tombstoned.
    pub async fn sweep_pending(&mut self) -> HarvestResult<u64> {
        let service = self.service;
        let service_id = service.id.as_str();
        let page_size = self.settings.sweep_page_size;
        let started = Instant::now();
        self.status.set_status_text(
            service_id,
            "Attempting to update status and deleted column for pending records",
        );

        let mut total = 0u64;
        loop {
            self.status.check_interrupt(service_id)?;
            self.status.set_status_text(
                service_id,
                &format!("Have committed {} status and deleted column updates", total),
            );

            let page = self.store.fetch_pending_page(service_id, page_size).await?;
            let mut delta = 0u64;
            for uri in &page {
                delta += self.store.tombstone_swept(uri, self.run_started).await?;
            }
            self.store.commit().await?;
            total += delta;

            if page.len() < page_size || delta == 0 {
                break;
            }
        }

        self.status.set_status_text_and_log(
            service_id,
            &format!(
                "Committed status and deleted column updates for {} records in {:.1?}",
                total,
                started.elapsed()
            ),
        );
        Ok(total)
    }

    /// Recovery after an aborted run: set every non-normal row of the
    /// service back to normal, leaving tombstones alone, and commit.
    pub async fn reset_pending(&mut self) -> HarvestResult<u64> {
        let service = self.service;
        let service_id = service.id.as_str();
        let started = Instant::now();
        self.status.set_status_text(
            service_id,
            "Recovery: Attempting to reset status for pending records",
        );

        let reset = self.store.reset_pending(service_id).await?;
        self.commit_if_limit_reached(true).await?;

        self.status.set_status_text_and_log(
            service_id,
            &format!(
                "Recovery: The status for {} pending records was reset in {:.1?}",
                reset,
                started.elapsed()
            ),
        );
        Ok(reset)
    }

    /// Commit when `force` is set or the open transaction holds
    /// `commit_limit` operations.
    pub async fn commit_if_limit_reached(&mut self, force: bool) -> HarvestResult<()> {
        if force || self.counters.uncommitted() >= self.settings.commit_limit {
            self.commit_and_update_counters().await?;
        }
        Ok(())
    }

    /// Commit the open transaction and fold its counts into the run totals.
    ///
    /// An interrupt request is honored before committing.
    pub async fn commit_and_update_counters(&mut self) -> HarvestResult<()> {
        self.status.check_interrupt(&self.service.id)?;

        self.store.commit().await?;
        self.counters.roll_up();

        let c = self.counters;
        let message = format!(
            "Committed (i/u/d {}/{}/{}) {} database changes",
            c.inserted,
            c.updated,
            c.deleted,
            c.total()
        );
        self.status.set_status_text(&self.service.id, &message);
        info!(
            service_id = %self.service.id,
            inserted = c.inserted,
            updated = c.updated,
            deleted = c.deleted,
            "Committed harvest batch"
        );
        Ok(())
    }

    /// Discard the open transaction
    pub async fn rollback(&mut self) -> HarvestResult<()> {
        self.store.rollback().await
    }
}
