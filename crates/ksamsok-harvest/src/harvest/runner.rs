//! Harvest run driver
//!
//! Sequences one complete run against one service:
//!
//! 1. optional recovery of a previously aborted run (`reset_pending`)
//! 2. mark every existing row of the service as pending
//! 3. stream the response through the protocol state machine
//! 4. final forced commit
//! 5. sweep rows that are still pending into tombstones
//!
//! Any error rolls back the open transaction. Work committed before the
//! failure stays; the next run should be started with `resume` so the pending
//! flags it left behind are cleared first.

use chrono::{DateTime, SubsecRound, Utc};
use ksamsok_common::ServiceMetadata;
use serde::Serialize;
use tokio::io::AsyncBufRead;
use tracing::{error, info, warn};

use super::analyzer::ContentAnalyzer;
use super::handler::OaiPmhHandler;
use super::reader::OaiPmhReader;
use super::session::HarvestSession;
use super::status::StatusService;
use super::store::ContentStore;
use super::uri::UriNormalizer;
use crate::config::HarvestSettings;
use crate::error::HarvestResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Reset pending rows left by an aborted run before starting
    pub resume: bool,
}

/// Outcome of a successful run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarvestSummary {
    pub service_id: String,
    pub run_started: DateTime<Utc>,
    /// `record` elements in the response
    pub records: usize,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Rows tombstoned by the end-of-run sweep
    pub swept: u64,
    /// Rows reset by recovery (only with `resume`)
    pub reset: u64,
    /// Non-fatal problems reported during the run
    pub problems: Vec<String>,
}

pub struct HarvestRunner<'a> {
    analyzer: &'a dyn ContentAnalyzer,
    status: &'a dyn StatusService,
    settings: HarvestSettings,
    normalizer: UriNormalizer,
}

impl<'a> HarvestRunner<'a> {
    pub fn new(analyzer: &'a dyn ContentAnalyzer, status: &'a dyn StatusService) -> Self {
        Self {
            analyzer,
            status,
            settings: HarvestSettings::default(),
            normalizer: UriNormalizer::default(),
        }
    }

    pub fn with_settings(mut self, settings: HarvestSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_normalizer(mut self, normalizer: UriNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Harvest one response into `store`
    ///
    /// The problems reported by the run are drained from the status service
    /// into the summary, so a status service shared by consecutive runs only
    /// ever holds the problems of the run in progress.
    pub async fn run<S, R>(
        &self,
        store: &mut S,
        service: &ServiceMetadata,
        input: R,
        options: RunOptions,
    ) -> HarvestResult<HarvestSummary>
    where
        S: ContentStore,
        R: AsyncBufRead + Unpin,
    {
        // database timestamps keep microseconds
        let run_started = Utc::now().trunc_subsecs(6);
        info!(service_id = %service.id, resume = options.resume, "Starting harvest");

        let session = HarvestSession::new(store, service, self.analyzer, self.status, run_started)
            .with_settings(self.settings);
        let mut handler = OaiPmhHandler::with_normalizer(session, self.normalizer.clone());

        let (reset, swept) = match drive(&mut handler, input, options).await {
            Ok(counts) => counts,
            Err(e) => {
                error!(service_id = %service.id, error = %e, "Harvest failed, rolling back");
                let mut session = handler.into_session();
                if let Err(rollback_err) = session.rollback().await {
                    warn!(service_id = %service.id, error = %rollback_err, "Rollback failed");
                }
                // already logged as they were reported
                self.status.take_problems();
                return Err(e);
            }
        };

        let records = handler.records_seen();
        let counters = handler.session().counters();
        let problems = self.status.take_problems();

        info!(
            service_id = %service.id,
            records,
            inserted = counters.inserted,
            updated = counters.updated,
            deleted = counters.deleted,
            swept,
            problems = problems.len(),
            "Harvest completed"
        );

        Ok(HarvestSummary {
            service_id: service.id.clone(),
            run_started,
            records,
            inserted: counters.inserted,
            updated: counters.updated,
            deleted: counters.deleted,
            swept,
            reset,
            problems,
        })
    }

    /// Reset pending rows left behind by an aborted run, without harvesting
    pub async fn recover<S: ContentStore>(
        &self,
        store: &mut S,
        service: &ServiceMetadata,
    ) -> HarvestResult<u64> {
        let run_started = Utc::now().trunc_subsecs(6);
        let mut session = HarvestSession::new(store, service, self.analyzer, self.status, run_started)
            .with_settings(self.settings);

        match session.reset_pending().await {
            Ok(reset) => Ok(reset),
            Err(e) => {
                error!(service_id = %service.id, error = %e, "Recovery failed, rolling back");
                if let Err(rollback_err) = session.rollback().await {
                    warn!(service_id = %service.id, error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        }
    }
}

/// Steps 1-5 of a run; returns (reset, swept)
async fn drive<S, R>(
    handler: &mut OaiPmhHandler<'_, S>,
    input: R,
    options: RunOptions,
) -> HarvestResult<(u64, u64)>
where
    S: ContentStore,
    R: AsyncBufRead + Unpin,
{
    let reset = if options.resume {
        handler.session_mut().reset_pending().await?
    } else {
        0
    };

    handler.session_mut().mark_all_pending().await?;

    let mut reader = OaiPmhReader::new(input);
    while let Some(events) = reader.next_events().await? {
        handler.handle_all(events).await?;
    }
    handler.ensure_complete()?;

    let session = handler.session_mut();
    session.commit_if_limit_reached(true).await?;
    let swept = session.sweep_pending().await?;

    Ok((reset, swept))
}
