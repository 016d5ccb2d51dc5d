//! OAI-PMH protocol state machine
//!
//! Consumes [`ProtocolEvent`]s and moves between three modes:
//!
//! - `Normal`: outside any `record`. Watches for `record` and for the
//!   protocol-level `error` element.
//! - `Record`: inside `record` but outside `metadata`. Collects the header
//!   fields (`identifier`, `datestamp`, the `status="deleted"` flag).
//! - `Copy`: inside `metadata`. Everything is re-serialized into the payload
//!   buffer with namespace URIs normalized.
//!
//! Elements are matched on local name only. Each completed record is written
//! to the store before the next event is accepted.
//!
//! Character data is accumulated until the next end tag and is cleared at
//! every end tag, not at start tags. In the payload this means text that
//! precedes a child element is written inside that child; K-samsök payloads
//! carry no mixed content, so this does not matter in practice.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::datestamp::parse_datestamp;
use super::events::{Attribute, ProtocolEvent, QualifiedName};
use super::payload::PayloadWriter;
use super::session::HarvestSession;
use super::store::ContentStore;
use super::uri::UriNormalizer;
use crate::error::{HarvestError, HarvestResult};

const RECORD: &str = "record";
const HEADER: &str = "header";
const IDENTIFIER: &str = "identifier";
const DATESTAMP: &str = "datestamp";
const METADATA: &str = "metadata";
const ERROR: &str = "error";

enum Mode {
    Normal,
    Record,
    Copy(PayloadWriter),
}

impl Mode {
    fn name(&self) -> &'static str {
        match self {
            Mode::Normal => "normal",
            Mode::Record => "record",
            Mode::Copy(_) => "copy",
        }
    }
}

/// Per-run parser state
struct ParserState {
    mode: Mode,
    text: String,
    /// Prefix mappings reported since the last start tag, normalized
    pending_bindings: Vec<(String, String)>,
    oai_id: Option<String>,
    datestamp: Option<DateTime<Utc>>,
    delete_record: bool,
    error_code: Option<String>,
}

impl ParserState {
    fn new() -> Self {
        Self {
            mode: Mode::Normal,
            text: String::new(),
            pending_bindings: Vec::new(),
            oai_id: None,
            datestamp: None,
            delete_record: false,
            error_code: None,
        }
    }

    fn start_record(&mut self) {
        self.mode = Mode::Record;
        self.oai_id = None;
        self.datestamp = None;
        self.delete_record = false;
    }

    fn take_text(&mut self) -> String {
        let text = self.text.trim().to_string();
        self.text.clear();
        text
    }

    fn bind(&mut self, prefix: String, uri: String) {
        self.pending_bindings.retain(|(p, _)| *p != prefix);
        self.pending_bindings.push((prefix, uri));
    }
}

pub struct OaiPmhHandler<'a, S: ContentStore> {
    session: HarvestSession<'a, S>,
    normalizer: UriNormalizer,
    state: ParserState,
    records: usize,
}

impl<'a, S: ContentStore> OaiPmhHandler<'a, S> {
    pub fn new(session: HarvestSession<'a, S>) -> Self {
        Self::with_normalizer(session, UriNormalizer::default())
    }

    pub fn with_normalizer(session: HarvestSession<'a, S>, normalizer: UriNormalizer) -> Self {
        Self {
            session,
            normalizer,
            state: ParserState::new(),
            records: 0,
        }
    }

    pub fn session(&self) -> &HarvestSession<'a, S> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut HarvestSession<'a, S> {
        &mut self.session
    }

    /// Number of `record` elements seen so far
    pub fn records_seen(&self) -> usize {
        self.records
    }

    /// Fail if the input ended inside a record
    pub fn ensure_complete(&self) -> HarvestResult<()> {
        if !matches!(self.state.mode, Mode::Normal) {
            return Err(HarvestError::MalformedXml(format!(
                "input ended in {} mode",
                self.state.mode.name()
            )));
        }
        Ok(())
    }

    pub fn into_session(self) -> HarvestSession<'a, S> {
        self.session
    }

    pub async fn handle_all(
        &mut self,
        events: impl IntoIterator<Item = ProtocolEvent>,
    ) -> HarvestResult<()> {
        for event in events {
            self.handle(event).await?;
        }
        Ok(())
    }

    pub async fn handle(&mut self, event: ProtocolEvent) -> HarvestResult<()> {
        match event {
            ProtocolEvent::StartPrefixMapping { prefix, uri } => {
                let uri = self.normalizer.normalize(&uri);
                self.state.bind(prefix, uri);
                Ok(())
            }
            ProtocolEvent::StartElement { name, attributes } => match self.state.mode {
                Mode::Normal => self.start_normal(&name, &attributes),
                Mode::Record => self.start_record(&name, &attributes),
                Mode::Copy(_) => self.start_copy(name, attributes),
            },
            ProtocolEvent::EndElement { name } => {
                let result = match self.state.mode {
                    Mode::Normal => self.end_normal(&name),
                    Mode::Record => self.end_record(&name).await,
                    Mode::Copy(_) => self.end_copy(&name).await,
                };
                self.state.text.clear();
                result
            }
            ProtocolEvent::Characters(text) => {
                self.state.text.push_str(&text);
                Ok(())
            }
        }
    }

    // ========================================================================
    // Normal mode
    // ========================================================================

    fn start_normal(&mut self, name: &QualifiedName, attributes: &[Attribute]) -> HarvestResult<()> {
        self.state.pending_bindings.clear();
        if name.is(RECORD) {
            self.state.start_record();
            self.records += 1;
        } else if name.is(ERROR) {
            self.state.error_code = unqualified_attribute(attributes, "code");
        }
        Ok(())
    }

    fn end_normal(&mut self, name: &QualifiedName) -> HarvestResult<()> {
        if name.is(ERROR) {
            return Err(HarvestError::SourceError {
                code: self.state.error_code.take().unwrap_or_default(),
                message: self.state.take_text(),
            });
        }
        Ok(())
    }

    // ========================================================================
    // Record mode
    // ========================================================================

    fn start_record(&mut self, name: &QualifiedName, attributes: &[Attribute]) -> HarvestResult<()> {
        if name.is(METADATA) {
            // bindings declared on <metadata> itself go onto the payload root
            self.state.mode = Mode::Copy(PayloadWriter::new());
            return Ok(());
        }

        self.state.pending_bindings.clear();
        if name.is(HEADER)
            && unqualified_attribute(attributes, "status").as_deref() == Some("deleted")
        {
            if !self.session.service().can_send_deletes {
                return Err(HarvestError::UnexpectedDelete {
                    service_id: self.session.service_id().to_string(),
                });
            }
            self.state.delete_record = true;
        }
        Ok(())
    }

    async fn end_record(&mut self, name: &QualifiedName) -> HarvestResult<()> {
        if name.is(IDENTIFIER) {
            self.state.oai_id = Some(self.state.take_text());
        } else if name.is(DATESTAMP) {
            let raw = self.state.take_text();
            let datestamp = match parse_datestamp(&raw) {
                Some(datestamp) => datestamp,
                None => {
                    warn!(datestamp = %raw, "Unparseable datestamp, using run timestamp");
                    self.session.report_problem(&format!(
                        "There was a problem parsing datestamp ({}) for record, using 'now' instead",
                        raw
                    ));
                    self.session.run_started()
                }
            };
            self.state.datestamp = Some(datestamp);
        } else if name.is(RECORD) {
            self.state.mode = Mode::Normal;
            if self.state.delete_record {
                self.delete_current().await?;
            }
            self.session.check_interrupt()?;
        }
        Ok(())
    }

    async fn delete_current(&mut self) -> HarvestResult<()> {
        let deleted_at = self
            .state
            .datestamp
            .unwrap_or_else(|| self.session.run_started());
        match self.state.oai_id.as_deref() {
            Some(oai_id) if !oai_id.is_empty() => {
                self.session.tombstone(oai_id, deleted_at).await?;
            }
            _ => {
                self.session
                    .report_problem("Deleted record without identifier --SKIPPING--");
            }
        }
        Ok(())
    }

    // ========================================================================
    // Copy mode
    // ========================================================================

    fn start_copy(&mut self, name: QualifiedName, attributes: Vec<Attribute>) -> HarvestResult<()> {
        let name = self.normalized(name);
        let attributes: Vec<Attribute> = attributes
            .into_iter()
            .map(|attr| Attribute {
                name: self.normalized(attr.name),
                value: attr.value,
            })
            .collect();
        let declarations = std::mem::take(&mut self.state.pending_bindings);

        match &mut self.state.mode {
            Mode::Copy(writer) => writer.start_element(&name, &attributes, declarations),
            _ => Ok(()),
        }
    }

    async fn end_copy(&mut self, name: &QualifiedName) -> HarvestResult<()> {
        let Mode::Copy(writer) = &mut self.state.mode else {
            return Ok(());
        };

        if name.is(METADATA) && writer.depth() == 0 {
            let Mode::Copy(writer) = std::mem::replace(&mut self.state.mode, Mode::Record) else {
                return Ok(());
            };
            let payload = writer.finish()?;
            let datestamp = self
                .state
                .datestamp
                .unwrap_or_else(|| self.session.run_started());
            debug!(oai_id = ?self.state.oai_id, bytes = payload.len(), "Record payload complete");
            return self
                .session
                .upsert_or_insert(self.state.oai_id.as_deref(), &payload, datestamp)
                .await;
        }

        let text = self.state.text.trim();
        writer.end_element(text)
    }

    fn normalized(&self, name: QualifiedName) -> QualifiedName {
        QualifiedName {
            namespace: name.namespace.map(|ns| self.normalizer.normalize(&ns)),
            ..name
        }
    }
}

fn unqualified_attribute(attributes: &[Attribute], local_name: &str) -> Option<String> {
    attributes
        .iter()
        .find(|a| a.name.namespace.is_none() && a.name.is(local_name))
        .map(|a| a.value.clone())
}
