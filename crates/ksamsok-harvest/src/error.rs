//! Harvest error types
//!
//! Everything in [`HarvestError`] is fatal for the run it occurs in: the open
//! transaction is rolled back and the last commit becomes the recovery point.
//! Per-record problems (unparseable payloads, bad datestamps) never surface
//! here; they are reported to the status service and the record is skipped or
//! stored with a fallback value.

use thiserror::Error;

/// Result type alias for harvest operations
pub type HarvestResult<T> = std::result::Result<T, HarvestError>;

#[derive(Error, Debug)]
pub enum HarvestError {
    /// The source answered with an OAI-PMH `<error>` element
    #[error("Error in request, code={code}, text: {message}")]
    SourceError { code: String, message: String },

    /// A `status="deleted"` header from a service not configured for deletes
    #[error("Service {service_id} is not supposed to handle deletes but did in fact send one")]
    UnexpectedDelete { service_id: String },

    /// Cooperative interruption requested through the status service
    #[error("Harvest of service {service_id} was interrupted")]
    Interrupted { service_id: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// XML problems reported outside of `quick_xml::Error` (encoding, unknown entities)
    #[error("Malformed XML: {0}")]
    MalformedXml(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Insert of a URI that already exists
    #[error("Record {uri} already exists")]
    DuplicateRecord { uri: String },

    /// The store was used after a rollback closed its transaction
    #[error("Content store transaction is closed")]
    TransactionClosed,
}

impl HarvestError {
    pub fn malformed(err: impl std::fmt::Display) -> Self {
        Self::MalformedXml(err.to_string())
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, HarvestError::Interrupted { .. })
    }
}
