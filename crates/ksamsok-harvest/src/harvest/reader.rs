//! Streaming OAI-PMH reader
//!
//! Pulls one raw XML event at a time from an async source and converts it into
//! owned [`ProtocolEvent`]s. A start tag yields its namespace declarations as
//! prefix-mapping events first, followed by the start element itself, which is
//! the order a SAX parser reports them in. Empty elements are expanded into a
//! start and an end, entity and character references are resolved, and CDATA
//! sections are delivered as plain characters.
//!
//! Only the current event is held in memory, so responses of any size can be
//! processed.

use quick_xml::events::{BytesRef, Event};
use quick_xml::name::{Namespace, Prefix, PrefixDeclaration, ResolveResult};
use quick_xml::{Decoder, NsReader};
use tokio::io::AsyncBufRead;

use super::events::{Attribute, ProtocolEvent, QualifiedName};
use crate::error::{HarvestError, HarvestResult};

pub struct OaiPmhReader<R> {
    reader: NsReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> OaiPmhReader<R> {
    pub fn new(source: R) -> Self {
        let mut reader = NsReader::from_reader(source);
        reader.config_mut().expand_empty_elements = true;
        Self {
            reader,
            buf: Vec::with_capacity(8 * 1024),
        }
    }

    /// Read the events produced by the next piece of markup.
    ///
    /// Returns `None` at end of input. The returned batch is empty for markup
    /// the harvest ignores (comments, processing instructions, the XML
    /// declaration).
    pub async fn next_events(&mut self) -> HarvestResult<Option<Vec<ProtocolEvent>>> {
        self.buf.clear();
        let (resolved, event) = self
            .reader
            .read_resolved_event_into_async(&mut self.buf)
            .await?;
        let namespace = bound_namespace(resolved)?;
        let decoder = self.reader.decoder();

        let events = match event {
            Event::Start(start) => {
                let mut events = Vec::new();
                let mut attributes = Vec::new();
                for attr in start.attributes() {
                    let attr = attr.map_err(quick_xml::Error::from)?;
                    let value = attr.decode_and_unescape_value(decoder)?.into_owned();
                    match attr.key.as_namespace_binding() {
                        Some(PrefixDeclaration::Default) => {
                            events.push(ProtocolEvent::prefix_mapping("", value));
                        }
                        Some(PrefixDeclaration::Named(prefix)) => {
                            let prefix = decode(decoder, prefix)?;
                            events.push(ProtocolEvent::prefix_mapping(prefix, value));
                        }
                        None => {
                            let (resolved, local) =
                                self.reader.resolver().resolve_attribute(attr.key);
                            let namespace = bound_namespace(resolved)?;
                            let prefix = match attr.key.prefix() {
                                Some(prefix) => Some(decode(decoder, prefix.as_ref())?),
                                None => None,
                            };
                            attributes.push(Attribute::new(
                                QualifiedName {
                                    namespace,
                                    prefix,
                                    local_name: decode(decoder, local.as_ref())?,
                                },
                                value,
                            ));
                        }
                    }
                }
                let name = qualified_name(
                    decoder,
                    namespace,
                    start.name().prefix(),
                    start.local_name().as_ref(),
                )?;
                events.push(ProtocolEvent::start(name, attributes));
                events
            }
            Event::End(end) => {
                let name = qualified_name(
                    decoder,
                    namespace,
                    end.name().prefix(),
                    end.local_name().as_ref(),
                )?;
                vec![ProtocolEvent::end(name)]
            }
            Event::Text(text) => {
                vec![ProtocolEvent::text(text.decode().map_err(HarvestError::malformed)?)]
            }
            Event::CData(data) => {
                vec![ProtocolEvent::text(data.decode().map_err(HarvestError::malformed)?)]
            }
            Event::GeneralRef(reference) => {
                vec![ProtocolEvent::text(
                    resolve_general_ref(&reference).map_err(HarvestError::MalformedXml)?,
                )]
            }
            Event::Eof => return Ok(None),
            _ => Vec::new(),
        };

        Ok(Some(events))
    }
}

fn decode(decoder: Decoder, bytes: &[u8]) -> HarvestResult<String> {
    decoder
        .decode(bytes)
        .map(|s| s.into_owned())
        .map_err(HarvestError::malformed)
}

fn qualified_name(
    decoder: Decoder,
    namespace: Option<String>,
    prefix: Option<Prefix<'_>>,
    local_name: &[u8],
) -> HarvestResult<QualifiedName> {
    let prefix = match prefix {
        Some(prefix) => Some(decode(decoder, prefix.as_ref())?),
        None => None,
    };
    Ok(QualifiedName {
        namespace,
        prefix,
        local_name: decode(decoder, local_name)?,
    })
}

fn bound_namespace(resolved: ResolveResult<'_>) -> HarvestResult<Option<String>> {
    match resolved {
        ResolveResult::Bound(Namespace(ns)) => Ok(Some(
            std::str::from_utf8(ns)
                .map_err(HarvestError::malformed)?
                .to_string(),
        )),
        ResolveResult::Unbound => Ok(None),
        ResolveResult::Unknown(prefix) => Err(HarvestError::MalformedXml(format!(
            "unbound namespace prefix '{}'",
            String::from_utf8_lossy(&prefix)
        ))),
    }
}

/// Resolve a character reference or one of the five predefined entities
pub(crate) fn resolve_general_ref(reference: &BytesRef<'_>) -> Result<String, String> {
    if let Some(ch) = reference.resolve_char_ref().map_err(|e| e.to_string())? {
        return Ok(ch.to_string());
    }
    let name = reference.decode().map_err(|e| e.to_string())?;
    quick_xml::escape::resolve_predefined_entity(&name)
        .map(str::to_string)
        .ok_or_else(|| format!("unknown entity &{};", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_all(xml: &str) -> HarvestResult<Vec<ProtocolEvent>> {
        let mut reader = OaiPmhReader::new(xml.as_bytes());
        let mut all = Vec::new();
        while let Some(events) = reader.next_events().await? {
            all.extend(events);
        }
        Ok(all)
    }

    #[tokio::test]
    async fn test_prefix_mappings_precede_start_element() {
        let events = read_all(r#"<a:x xmlns:a="urn:a" xmlns="urn:d" a:k="v" plain="p"/>"#)
            .await
            .unwrap();

        assert_eq!(events[0], ProtocolEvent::prefix_mapping("a", "urn:a"));
        assert_eq!(events[1], ProtocolEvent::prefix_mapping("", "urn:d"));
        assert_eq!(
            events[2],
            ProtocolEvent::start(
                QualifiedName::qualified("urn:a", Some("a"), "x"),
                vec![
                    Attribute::new(QualifiedName::qualified("urn:a", Some("a"), "k"), "v"),
                    Attribute::new(QualifiedName::local("plain"), "p"),
                ],
            )
        );
        assert_eq!(
            events[3],
            ProtocolEvent::end(QualifiedName::qualified("urn:a", Some("a"), "x"))
        );
        assert_eq!(events.len(), 4);
    }

    #[tokio::test]
    async fn test_text_references_and_cdata() {
        let events = read_all("<?xml version=\"1.0\"?><t>a &amp; b&#x20;<![CDATA[<c>]]><!-- x --></t>")
            .await
            .unwrap();
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                ProtocolEvent::Characters(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "a & b <c>");
    }

    #[tokio::test]
    async fn test_unbound_prefix_is_malformed() {
        let err = read_all("<p:x/>").await.unwrap_err();
        assert!(matches!(err, HarvestError::MalformedXml(_)));
    }

    #[tokio::test]
    async fn test_mismatched_end_tag_is_an_error() {
        assert!(read_all("<a><b></a>").await.is_err());
    }
}
