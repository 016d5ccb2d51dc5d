//! K-samsök Harvest Library
//!
//! Streaming OAI-PMH harvester that stores K-samsök RDF records in
//! PostgreSQL.
//!
//! # Overview
//!
//! - **Protocol parsing**: `ListRecords` responses are read as a stream of
//!   namespace-resolved events, never as a whole document
//! - **Payload copy**: each record's `metadata` content is re-serialized with
//!   known-bad namespace URIs corrected
//! - **Content store**: records are upserted by canonical URI inside batched
//!   transactions; rows missing from a full harvest are tombstoned
//! - **Cancellation**: runs poll for interrupt requests and roll back the open
//!   transaction
//!
//! # Example
//!
//! ```no_run
//! use ksamsok_common::ServiceMetadata;
//! use ksamsok_harvest::{config::HarvestConfig, db, harvest::*};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = HarvestConfig::load()?;
//!     let pool = db::create_pool(&config.database).await?;
//!     let mut store = PgContentStore::begin(pool.clone()).await?;
//!
//!     let service = ServiceMetadata::new("raa", true)?;
//!     let status = TracingStatusService::new();
//!     let input = tokio::io::BufReader::new(tokio::fs::File::open("response.xml").await?);
//!
//!     let summary = HarvestRunner::new(&RdfContentAnalyzer, &status)
//!         .with_settings(config.harvest)
//!         .run(&mut store, &service, input, RunOptions::default())
//!         .await?;
//!     println!("{} records", summary.records);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod harvest;

// Re-export commonly used types
pub use error::{HarvestError, HarvestResult};
