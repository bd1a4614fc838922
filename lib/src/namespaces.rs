//! Prefix bindings: the process-wide registry and per-type maps.

use crate::consts::DEFAULT_PREFIXES;
use lazy_static::lazy_static;
use log::debug;
use std::collections::BTreeMap;
use std::sync::RwLock;

lazy_static! {
    static ref GLOBAL_PREFIXES: RwLock<Namespaces> = RwLock::new(Namespaces::with_defaults());
}

/// An ordered prefix → namespace IRI map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Namespaces {
    map: BTreeMap<String, String>,
}

impl Namespaces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut ns = Self::new();
        for (prefix, uri) in DEFAULT_PREFIXES {
            ns.insert(prefix, uri);
        }
        ns
    }

    pub fn insert(&mut self, prefix: impl Into<String>, uri: impl Into<String>) {
        self.map.insert(prefix.into(), uri.into());
    }

    pub fn get(&self, prefix: &str) -> Option<&str> {
        self.map.get(prefix).map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Adds every binding of `other` that is not already present here.
    pub fn extend_missing(&mut self, other: &Namespaces) {
        for (k, v) in other.iter() {
            self.map.entry(k.to_string()).or_insert_with(|| v.to_string());
        }
    }

    /// Expands `prefix:local` against these bindings. Strings that already
    /// look like absolute IRIs come back unchanged; an unknown prefix
    /// yields `None`.
    pub fn expand(&self, name: &str) -> Option<String> {
        let name = name.trim();
        if let Some(iri) = name.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
            return Some(iri.to_string());
        }
        if name.contains("://") || name.starts_with("urn:") {
            return Some(name.to_string());
        }
        let (prefix, local) = name.split_once(':')?;
        self.get(prefix).map(|ns| format!("{}{}", ns, local))
    }
}

/// Registers a prefix for every query built afterwards in this process.
pub fn register(prefix: &str, uri: &str) {
    debug!("Registering global prefix {} -> {}", prefix, uri);
    if let Ok(mut ns) = GLOBAL_PREFIXES.write() {
        ns.insert(prefix, uri);
    }
}

/// A snapshot of the process-wide bindings.
pub fn global() -> Namespaces {
    GLOBAL_PREFIXES
        .read()
        .map(|ns| ns.clone())
        .unwrap_or_else(|_| Namespaces::with_defaults())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_known_prefixes_only() {
        let mut ns = Namespaces::with_defaults();
        ns.insert("foaf", "http://xmlns.com/foaf/0.1/");
        assert_eq!(
            ns.expand("foaf:name").as_deref(),
            Some("http://xmlns.com/foaf/0.1/name")
        );
        assert_eq!(
            ns.expand("http://example.org/p").as_deref(),
            Some("http://example.org/p")
        );
        assert_eq!(
            ns.expand("<http://example.org/p>").as_deref(),
            Some("http://example.org/p")
        );
        assert_eq!(ns.expand("nope:thing"), None);
    }

    #[test]
    fn global_registry_keeps_defaults() {
        register("ex-ns-test", "http://example.org/ns#");
        let g = global();
        assert_eq!(g.get("rdf"), Some(crate::consts::RDF_NS));
        assert_eq!(g.get("ex-ns-test"), Some("http://example.org/ns#"));
    }
}
