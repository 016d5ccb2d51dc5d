//! Extraction of the canonical identifier from a record payload

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;
use thiserror::Error;

use super::reader::resolve_general_ref;

pub const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
pub const KSAMSOK_NS: &str = "http://kulturarvsdata.se/ksamsok#";

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("Malformed payload: {0}")]
    Malformed(String),
}

impl From<quick_xml::Error> for AnalyzeError {
    fn from(err: quick_xml::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// What a payload says about itself
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedInfo {
    /// Canonical record URI, the key of the content table
    pub identifier: Option<String>,
    /// Link to the source's own presentation of the record
    pub native_url: Option<String>,
}

pub trait ContentAnalyzer: Send + Sync {
    fn extract_info(&self, payload: &str) -> Result<ExtractedInfo, AnalyzeError>;
}

/// Reads K-samsök RDF payloads.
///
/// The identifier is the `rdf:about` of the first `ksamsok:Entity`, or of the
/// first element carrying one if there is no entity. The native URL is the
/// text of the entity's first `ksamsok:url` child.
#[derive(Debug, Default, Clone, Copy)]
pub struct RdfContentAnalyzer;

impl RdfContentAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

fn rdf_about(reader: &NsReader<&[u8]>, start: &BytesStart<'_>) -> Result<Option<String>, AnalyzeError> {
    for attr in start.attributes() {
        let attr = attr.map_err(|e| AnalyzeError::Malformed(e.to_string()))?;
        let (ns, local) = reader.resolver().resolve_attribute(attr.key);
        if matches!(ns, ResolveResult::Bound(Namespace(ns)) if ns == RDF_NS.as_bytes())
            && local.as_ref() == b"about"
        {
            let value = attr.decode_and_unescape_value(reader.decoder())?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

impl ContentAnalyzer for RdfContentAnalyzer {
    fn extract_info(&self, payload: &str) -> Result<ExtractedInfo, AnalyzeError> {
        let mut reader = NsReader::from_str(payload);
        reader.config_mut().expand_empty_elements = true;

        let mut depth = 0usize;
        let mut entity_depth: Option<usize> = None;
        let mut entity_about: Option<String> = None;
        let mut first_about: Option<String> = None;
        let mut url_depth: Option<usize> = None;
        let mut url_text = String::new();
        let mut native_url: Option<String> = None;

        loop {
            let (resolved, event) = reader.read_resolved_event()?;
            let namespace = match resolved {
                ResolveResult::Bound(Namespace(ns)) => Some(ns.to_vec()),
                _ => None,
            };
            let in_ksamsok = namespace.as_deref() == Some(KSAMSOK_NS.as_bytes());

            match event {
                Event::Start(start) => {
                    depth += 1;
                    let local = start.local_name();
                    let about = rdf_about(&reader, &start)?;
                    if first_about.is_none() {
                        first_about = about.clone();
                    }

                    if in_ksamsok && local.as_ref() == b"Entity" && entity_depth.is_none() {
                        entity_depth = Some(depth);
                        entity_about = about;
                    } else if in_ksamsok
                        && local.as_ref() == b"url"
                        && native_url.is_none()
                        && url_depth.is_none()
                        && entity_depth.is_some_and(|d| depth > d)
                    {
                        url_depth = Some(depth);
                        url_text.clear();
                    }
                }
                Event::End(_) => {
                    if url_depth == Some(depth) {
                        let url = url_text.trim();
                        if !url.is_empty() {
                            native_url = Some(url.to_string());
                        }
                        url_depth = None;
                    }
                    if entity_depth == Some(depth) {
                        entity_depth = None;
                    }
                    depth = depth.saturating_sub(1);
                }
                Event::Text(text) if url_depth.is_some() => {
                    let text = text.decode().map_err(|e| AnalyzeError::Malformed(e.to_string()))?;
                    url_text.push_str(&text);
                }
                Event::CData(data) if url_depth.is_some() => {
                    let text = data.decode().map_err(|e| AnalyzeError::Malformed(e.to_string()))?;
                    url_text.push_str(&text);
                }
                Event::GeneralRef(reference) if url_depth.is_some() => {
                    let resolved = resolve_general_ref(&reference).map_err(AnalyzeError::Malformed)?;
                    url_text.push_str(&resolved);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(ExtractedInfo {
            identifier: entity_about.or(first_about),
            native_url,
        })
    }
}
