//! Re-serialization of the opaque `<metadata>` payload
//!
//! The writer sees the payload one element at a time, with namespace URIs
//! already normalized by the caller. It writes each start tag with only the
//! namespace declarations collected since the previous start tag, so
//! out-of-band bindings (prefixes declared but never used on the element)
//! survive. When an element or attribute namespace has no binding in scope,
//! because normalization changed the URI or the source relied on a binding
//! declared outside the payload, a declaration is added on the spot.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use super::events::{Attribute, QualifiedName};
use crate::error::{HarvestError, HarvestResult};

/// Bound to the `xml` prefix by definition, never declared
const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";
const XML_PREFIX: &str = "xml";

/// Namespace bindings declared on one open element
type Scope = Vec<(String, String)>;

pub struct PayloadWriter {
    writer: Writer<Vec<u8>>,
    scopes: Vec<Scope>,
    open: Vec<String>,
    generated: usize,
}

impl Default for PayloadWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self {
            writer: Writer::new(Vec::new()),
            scopes: Vec::new(),
            open: Vec::new(),
            generated: 0,
        }
    }

    /// Open an element.
    ///
    /// `declarations` are the prefix mappings reported since the last start
    /// tag, as `(prefix, uri)` with an empty prefix for the default namespace.
    pub fn start_element(
        &mut self,
        name: &QualifiedName,
        attributes: &[Attribute],
        declarations: Vec<(String, String)>,
    ) -> HarvestResult<()> {
        self.scopes.push(declarations);

        let element_prefix = self.element_prefix(name);
        let qname = match element_prefix.as_str() {
            "" => name.local_name.clone(),
            prefix => format!("{}:{}", prefix, name.local_name),
        };

        let mut written = Vec::with_capacity(attributes.len());
        for attribute in attributes {
            let attr_name = match attribute.name.namespace.as_deref() {
                None | Some("") => attribute.name.local_name.clone(),
                Some(namespace) => {
                    let prefix = self.attribute_prefix(namespace, attribute.name.prefix.as_deref());
                    format!("{}:{}", prefix, attribute.name.local_name)
                }
            };
            written.push((attr_name, attribute.value.as_str()));
        }

        let mut start = BytesStart::new(qname.as_str());
        for (prefix, uri) in self.current_scope() {
            let key = if prefix.is_empty() {
                "xmlns".to_string()
            } else {
                format!("xmlns:{}", prefix)
            };
            start.push_attribute((key.as_str(), uri.as_str()));
        }
        for (key, value) in &written {
            start.push_attribute((key.as_str(), *value));
        }

        self.writer.write_event(Event::Start(start))?;
        self.open.push(qname);
        Ok(())
    }

    /// Write `text` (already trimmed by the caller) and close the innermost element.
    pub fn end_element(&mut self, text: &str) -> HarvestResult<()> {
        let qname = self.open.pop().ok_or_else(|| {
            HarvestError::malformed("end of element without a matching start in payload")
        })?;
        self.scopes.pop();

        if !text.is_empty() {
            self.writer.write_event(Event::Text(BytesText::new(text)))?;
        }
        self.writer
            .write_event(Event::End(BytesEnd::new(qname.as_str())))?;
        Ok(())
    }

    /// Number of elements opened but not yet closed
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Finish the fragment and return it as a string.
    pub fn finish(self) -> HarvestResult<String> {
        if let Some(unclosed) = self.open.last() {
            return Err(HarvestError::malformed(format!(
                "payload ended with <{}> still open",
                unclosed
            )));
        }
        String::from_utf8(self.writer.into_inner()).map_err(HarvestError::malformed)
    }

    fn current_scope(&self) -> &[(String, String)] {
        self.scopes.last().map(Vec::as_slice).unwrap_or_default()
    }

    fn current_scope_mut(&mut self) -> &mut Scope {
        if self.scopes.is_empty() {
            self.scopes.push(Vec::new());
        }
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    /// Innermost binding of `prefix`
    fn lookup(&self, prefix: &str) -> Option<&str> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter().rev())
            .find(|(p, _)| p == prefix)
            .map(|(_, uri)| uri.as_str())
    }

    /// A prefix currently bound to `namespace`, skipping shadowed bindings
    fn prefix_for(&self, namespace: &str, allow_default: bool) -> Option<String> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter().rev())
            .filter(|(prefix, uri)| uri == namespace && (allow_default || !prefix.is_empty()))
            .map(|(prefix, _)| prefix)
            .find(|prefix| self.lookup(prefix) == Some(namespace))
            .cloned()
    }

    fn declared_here(&self, prefix: &str) -> bool {
        self.current_scope().iter().any(|(p, _)| p == prefix)
    }

    fn declare(&mut self, prefix: String, namespace: &str) -> String {
        self.current_scope_mut()
            .push((prefix.clone(), namespace.to_string()));
        prefix
    }

    fn fresh_prefix(&mut self) -> String {
        loop {
            self.generated += 1;
            let candidate = format!("ns{}", self.generated);
            if self.lookup(&candidate).is_none() {
                return candidate;
            }
        }
    }

    fn element_prefix(&mut self, name: &QualifiedName) -> String {
        let namespace = match name.namespace.as_deref() {
            None | Some("") => {
                // unqualified element under a default namespace needs it undeclared
                if self.lookup("").is_some_and(|uri| !uri.is_empty()) {
                    self.declare(String::new(), "");
                }
                return String::new();
            }
            Some(namespace) => namespace,
        };

        let source_prefix = name.prefix.clone().unwrap_or_default();
        if self.lookup(&source_prefix) == Some(namespace) {
            return source_prefix;
        }
        if let Some(prefix) = self.prefix_for(namespace, true) {
            return prefix;
        }
        if !self.declared_here(&source_prefix) {
            return self.declare(source_prefix, namespace);
        }
        let prefix = self.fresh_prefix();
        self.declare(prefix, namespace)
    }

    fn attribute_prefix(&mut self, namespace: &str, source_prefix: Option<&str>) -> String {
        if namespace == XML_NS {
            return XML_PREFIX.to_string();
        }
        if let Some(prefix) = source_prefix.filter(|p| !p.is_empty()) {
            if self.lookup(prefix) == Some(namespace) {
                return prefix.to_string();
            }
        }
        if let Some(prefix) = self.prefix_for(namespace, false) {
            return prefix;
        }
        match source_prefix.filter(|p| !p.is_empty() && !self.declared_here(p)) {
            Some(prefix) => self.declare(prefix.to_string(), namespace),
            None => {
                let prefix = self.fresh_prefix();
                self.declare(prefix, namespace)
            }
        }
    }
}
