//! Domain types shared across the harvest workspace

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Run-scoped status of a row in the content table.
///
/// `Pending` is a pessimistic "may be gone" marker set on every row of a
/// service when a harvest starts. Rows that reappear in the response are
/// flipped back to `Normal`; rows still pending when the response ends are
/// tombstoned. A successful run never leaves a `Pending` row behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    #[default]
    Normal,
    Pending,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Normal => "normal",
            RecordStatus::Pending => "pending",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, RecordStatus::Pending)
    }
}

impl std::str::FromStr for RecordStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "normal" => Ok(RecordStatus::Normal),
            "pending" => Ok(RecordStatus::Pending),
            other => Err(Error::InvalidStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row of the `content` table.
///
/// `uri` is the canonical identifier extracted from the payload and is the
/// unique key. `oai_uri` is the protocol-level identifier used to correlate
/// delete events, which carry no payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub uri: String,
    pub oai_uri: Option<String>,
    pub service_id: String,
    /// Re-serialized payload, `None` once tombstoned
    pub xml_data: Option<String>,
    /// Timestamp of the run that last touched the row
    pub changed: DateTime<Utc>,
    /// Timestamp of the run that first inserted the row
    pub added: DateTime<Utc>,
    /// Source-asserted modification time, or the deletion time for tombstones
    pub datestamp: DateTime<Utc>,
    pub status: RecordStatus,
    pub deleted: Option<DateTime<Utc>>,
    pub native_url: Option<String>,
}

impl ContentRecord {
    pub fn is_tombstoned(&self) -> bool {
        self.deleted.is_some()
    }
}

/// Harvest service (source) description relevant to storing records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMetadata {
    /// Service identifier stored in `content.service_id`
    pub id: String,

    /// Whether the source is allowed to send `status="deleted"` headers
    pub can_send_deletes: bool,
}

impl ServiceMetadata {
    pub fn new(id: impl Into<String>, can_send_deletes: bool) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::InvalidServiceId(id));
        }
        Ok(Self {
            id,
            can_send_deletes,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_record_status_from_str() {
        assert_eq!("normal".parse::<RecordStatus>().unwrap(), RecordStatus::Normal);
        assert_eq!("pending".parse::<RecordStatus>().unwrap(), RecordStatus::Pending);
        assert!("deleted".parse::<RecordStatus>().is_err());
        assert!("".parse::<RecordStatus>().is_err());
    }

    #[test]
    fn test_record_status_serde_matches_column_values() {
        let json = serde_json::to_string(&RecordStatus::Pending).unwrap();
        assert_eq!(json, "\"pending\"");
    }

    #[test]
    fn test_service_metadata_rejects_blank_id() {
        assert!(ServiceMetadata::new("  ", true).is_err());

        let service = ServiceMetadata::new("raa-fmi", false).unwrap();
        assert_eq!(service.id, "raa-fmi");
        assert!(!service.can_send_deletes);
    }

    #[test]
    fn test_tombstone_detection() {
        let now = Utc::now();
        let mut record = ContentRecord {
            uri: "http://kulturarvsdata.se/raa/fmi/1".to_string(),
            oai_uri: Some("oai:1".to_string()),
            service_id: "raa-fmi".to_string(),
            xml_data: Some("<x/>".to_string()),
            changed: now,
            added: now,
            datestamp: now,
            status: RecordStatus::Normal,
            deleted: None,
            native_url: None,
        };
        assert!(!record.is_tombstoned());

        record.deleted = Some(now);
        assert!(record.is_tombstoned());
    }
}
