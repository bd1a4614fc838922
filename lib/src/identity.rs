//! The identifier of a mapped resource: an IRI or a blank node.

use crate::errors::{OrmError, Result};
use oxigraph::model::{
    BlankNode, NamedNode, NamedNodeRef, NamedOrBlankNode, NamedOrBlankNodeRef, Term, TermRef,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum RdfId {
    Named(NamedNode),
    Blank(BlankNode),
}

// serialized as the IRI string, or `_:label` for blank nodes
impl Serialize for RdfId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            RdfId::Named(n) => serializer.serialize_str(n.as_str()),
            RdfId::Blank(b) => serializer.serialize_str(&format!("_:{}", b.as_str())),
        }
    }
}

impl<'de> Deserialize<'de> for RdfId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        RdfId::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl RdfId {
    /// Parses an IRI into a named identifier.
    pub fn iri(iri: impl Into<String>) -> Result<Self> {
        Ok(RdfId::Named(NamedNode::new(iri)?))
    }

    /// A blank node identifier with a fresh random label.
    pub fn fresh_blank() -> Self {
        RdfId::Blank(BlankNode::default())
    }

    /// Accepts either `_:label` or an IRI, the way identifiers are written on
    /// the command line and in query parameters.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(label) = s.strip_prefix("_:") {
            return BlankNode::new(label)
                .map(RdfId::Blank)
                .map_err(|e| OrmError::illegal_argument(format!("invalid blank node: {}", e)));
        }
        let s = s.trim_start_matches('<').trim_end_matches('>');
        RdfId::iri(s)
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, RdfId::Blank(_))
    }

    pub fn as_named(&self) -> Option<NamedNodeRef<'_>> {
        match self {
            RdfId::Named(n) => Some(n.as_ref()),
            RdfId::Blank(_) => None,
        }
    }

    pub fn as_ref(&self) -> NamedOrBlankNodeRef<'_> {
        match self {
            RdfId::Named(n) => NamedOrBlankNodeRef::NamedNode(n.as_ref()),
            RdfId::Blank(b) => NamedOrBlankNodeRef::BlankNode(b.as_ref()),
        }
    }

    pub fn to_subject(&self) -> NamedOrBlankNode {
        match self {
            RdfId::Named(n) => NamedOrBlankNode::NamedNode(n.clone()),
            RdfId::Blank(b) => NamedOrBlankNode::BlankNode(b.clone()),
        }
    }

    pub fn to_term(&self) -> Term {
        match self {
            RdfId::Named(n) => Term::NamedNode(n.clone()),
            RdfId::Blank(b) => Term::BlankNode(b.clone()),
        }
    }

    /// Returns the identifier a term denotes, if the term is a resource.
    pub fn from_term(term: TermRef<'_>) -> Option<Self> {
        match term {
            TermRef::NamedNode(n) => Some(RdfId::Named(n.into_owned())),
            TermRef::BlankNode(b) => Some(RdfId::Blank(b.into_owned())),
            _ => None,
        }
    }
}

impl fmt::Display for RdfId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RdfId::Named(n) => write!(f, "{}", n),
            RdfId::Blank(b) => write!(f, "{}", b),
        }
    }
}

impl From<NamedNode> for RdfId {
    fn from(n: NamedNode) -> Self {
        RdfId::Named(n)
    }
}

impl From<BlankNode> for RdfId {
    fn from(b: BlankNode) -> Self {
        RdfId::Blank(b)
    }
}

impl From<NamedOrBlankNode> for RdfId {
    fn from(s: NamedOrBlankNode) -> Self {
        match s {
            NamedOrBlankNode::NamedNode(n) => RdfId::Named(n),
            NamedOrBlankNode::BlankNode(b) => RdfId::Blank(b),
        }
    }
}

impl<'a> From<NamedOrBlankNodeRef<'a>> for RdfId {
    fn from(s: NamedOrBlankNodeRef<'a>) -> Self {
        match s {
            NamedOrBlankNodeRef::NamedNode(n) => RdfId::Named(n.into_owned()),
            NamedOrBlankNodeRef::BlankNode(b) => RdfId::Blank(b.into_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_uses_tag_and_value() {
        let a = RdfId::iri("http://example.org/a").unwrap();
        let b = RdfId::iri("http://example.org/a").unwrap();
        assert_eq!(a, b);
        let blank = RdfId::Blank(BlankNode::new("a").unwrap());
        assert_ne!(a, blank);
    }

    #[test]
    fn parse_accepts_blank_and_bracketed_iris() {
        assert!(RdfId::parse("_:b0").unwrap().is_blank());
        assert_eq!(
            RdfId::parse("<http://example.org/x>").unwrap(),
            RdfId::iri("http://example.org/x").unwrap()
        );
        assert!(RdfId::parse("not an iri").is_err());
    }

    #[test]
    fn serializes_as_plain_strings() {
        let id = RdfId::iri("http://example.org/a").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"http://example.org/a\"");
        let back: RdfId = serde_json::from_str("\"_:x1\"").unwrap();
        assert!(back.is_blank());
    }

    #[test]
    fn fresh_blanks_differ() {
        assert_ne!(RdfId::fresh_blank(), RdfId::fresh_blank());
    }
}
