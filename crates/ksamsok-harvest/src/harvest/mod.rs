//! OAI-PMH harvest pipeline
//!
//! Data flows one way through the pipeline:
//!
//! ```text
//! bytes -> OaiPmhReader -> ProtocolEvent -> OaiPmhHandler -> HarvestSession -> ContentStore
//!                                              |
//!                                              +-> PayloadWriter (metadata copy, URI normalization)
//! ```
//!
//! [`HarvestRunner`] wires these together for one run.

pub mod analyzer;
pub mod datestamp;
pub mod events;
pub mod handler;
pub mod payload;
pub mod reader;
pub mod runner;
pub mod session;
pub mod status;
pub mod store;
pub mod uri;

pub use analyzer::{ContentAnalyzer, ExtractedInfo, RdfContentAnalyzer};
pub use events::{Attribute, ProtocolEvent, QualifiedName};
pub use handler::OaiPmhHandler;
pub use reader::OaiPmhReader;
pub use runner::{HarvestRunner, HarvestSummary, RunOptions};
pub use session::{HarvestCounters, HarvestSession};
pub use status::{StatusService, TracingStatusService};
pub use store::{ContentStore, MemoryContentStore, PgContentStore, RecordWrite};
pub use uri::UriNormalizer;
