//! Protocol events fed to the harvest state machine
//!
//! These are owned, namespace-resolved SAX-style events. The streaming reader
//! produces them from raw XML, tests build them by hand.

/// A namespace-qualified element or attribute name
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QualifiedName {
    /// Resolved namespace URI, `None` when unqualified
    pub namespace: Option<String>,
    /// Prefix as written in the source document
    pub prefix: Option<String>,
    pub local_name: String,
}

impl QualifiedName {
    pub fn local(local_name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            prefix: None,
            local_name: local_name.into(),
        }
    }

    pub fn qualified(
        namespace: impl Into<String>,
        prefix: Option<&str>,
        local_name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: Some(namespace.into()),
            prefix: prefix.map(str::to_string),
            local_name: local_name.into(),
        }
    }

    pub fn is(&self, local_name: &str) -> bool {
        self.local_name == local_name
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: QualifiedName,
    /// Unescaped value
    pub value: String,
}

impl Attribute {
    pub fn new(name: QualifiedName, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// A namespace binding that comes into scope with the next start element.
    /// An empty prefix is the default namespace.
    StartPrefixMapping { prefix: String, uri: String },
    /// Start tag; namespace declarations are not repeated in `attributes`
    StartElement {
        name: QualifiedName,
        attributes: Vec<Attribute>,
    },
    EndElement { name: QualifiedName },
    Characters(String),
}

impl ProtocolEvent {
    pub fn prefix_mapping(prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        Self::StartPrefixMapping {
            prefix: prefix.into(),
            uri: uri.into(),
        }
    }

    pub fn start(name: QualifiedName, attributes: Vec<Attribute>) -> Self {
        Self::StartElement { name, attributes }
    }

    pub fn end(name: QualifiedName) -> Self {
        Self::EndElement { name }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Characters(text.into())
    }
}
