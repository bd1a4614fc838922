//! Resolution of schema fragments into flattened, memoized entity metadata.
//!
//! [`MetadataIndex::resolve`] walks a type, its superclass chain and every
//! interface it implements, merges the declared members by logical property
//! name (most-derived declaration wins), pairs getters with setters and
//! expands prefixed names. The result is cached per type name.

use crate::errors::{OrmError, Result};
use crate::instance::Record;
use crate::namespaces::{self, Namespaces};
use crate::options::{Cardinality, CascadeSet, FetchType, LifecycleEvent};
use crate::schema::{Callback, Marker, Member, SchemaDocument, SchemaFragment, TypeKind};
use lazy_static::lazy_static;
use log::{debug, warn};
use oxigraph::model::NamedNode;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};

lazy_static! {
    static ref GLOBAL_INDEX: Arc<MetadataIndex> = Arc::new(MetadataIndex::new());
}

/// How a resolved property is reached on an instance.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Access {
    Field,
    Method,
}

#[derive(Debug, Clone)]
pub struct PropertyMetadata {
    pub name: String,
    pub predicate: NamedNode,
    pub cardinality: Cardinality,
    pub fetch: FetchType,
    pub cascade: CascadeSet,
    /// Target entity type for relational properties.
    pub target: Option<String>,
    pub datatype: Option<NamedNode>,
    pub access: Access,
    /// Set when a mapped getter has no matching setter.
    pub read_only: bool,
    pub declared_in: String,
}

impl PropertyMetadata {
    pub fn is_relation(&self) -> bool {
        self.target.is_some()
    }

    pub fn is_lazy_collection(&self) -> bool {
        self.is_relation() && self.cardinality.is_many() && self.fetch.is_lazy()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityMetadata {
    pub name: String,
    pub access: Access,
    pub declared_in: String,
}

/// The inheritance-flattened view of one entity type.
pub struct EntityMetadata {
    name: String,
    kind: TypeKind,
    is_abstract: bool,
    rdf_type: Option<NamedNode>,
    named_graph: Option<NamedNode>,
    namespaces: Namespaces,
    identity: Option<IdentityMetadata>,
    properties: Vec<PropertyMetadata>,
    by_name: HashMap<String, usize>,
    callbacks: HashMap<LifecycleEvent, Vec<Callback>>,
    supertypes: Vec<String>,
    markers: HashSet<Marker>,
}

impl fmt::Debug for EntityMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityMetadata")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("rdf_type", &self.rdf_type)
            .field("identity", &self.identity)
            .field("properties", &self.properties)
            .field("supertypes", &self.supertypes)
            .finish()
    }
}

impl EntityMetadata {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    pub fn rdf_type(&self) -> Option<&NamedNode> {
        self.rdf_type.as_ref()
    }

    pub fn named_graph(&self) -> Option<&NamedNode> {
        self.named_graph.as_ref()
    }

    pub fn namespaces(&self) -> &Namespaces {
        &self.namespaces
    }

    pub fn identity(&self) -> Option<&IdentityMetadata> {
        self.identity.as_ref()
    }

    pub fn properties(&self) -> &[PropertyMetadata] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&PropertyMetadata> {
        self.by_name.get(name).map(|&i| &self.properties[i])
    }

    /// Slot position of a property in generated layouts.
    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn supertypes(&self) -> &[String] {
        &self.supertypes
    }

    pub fn is_subtype_of(&self, name: &str) -> bool {
        self.supertypes.iter().any(|s| s == name)
    }

    pub fn has_marker(&self, marker: Marker) -> bool {
        self.markers.contains(&marker)
    }

    pub fn callbacks(&self, event: LifecycleEvent) -> &[Callback] {
        self.callbacks
            .get(&event)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Runs the callbacks registered for `event`, base types first.
    pub fn fire(&self, event: LifecycleEvent, record: &mut Record) -> Result<()> {
        for callback in self.callbacks(event) {
            callback(record)?;
        }
        Ok(())
    }
}

/// Memoizing resolver over registered schema fragments.
///
/// Resolution happens outside the cache lock; two threads resolving the same
/// type concurrently both compute it and the last insert wins.
#[derive(Default)]
pub struct MetadataIndex {
    fragments: RwLock<HashMap<String, Arc<SchemaFragment>>>,
    resolved: RwLock<HashMap<String, Arc<EntityMetadata>>>,
    namespaces: RwLock<Namespaces>,
}

impl fmt::Debug for MetadataIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataIndex")
            .field("types", &self.type_names())
            .finish()
    }
}

impl MetadataIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide index.
    pub fn global() -> Arc<MetadataIndex> {
        GLOBAL_INDEX.clone()
    }

    /// Registers (or replaces) a fragment. Previously resolved metadata is
    /// dropped because the hierarchy it was built from may have changed.
    pub fn register(&self, fragment: SchemaFragment) {
        debug!("Registering schema fragment {}", fragment.name);
        if let Ok(mut fragments) = self.fragments.write() {
            fragments.insert(fragment.name.clone(), Arc::new(fragment));
        }
        if let Ok(mut resolved) = self.resolved.write() {
            resolved.clear();
        }
    }

    pub fn register_all(&self, fragments: impl IntoIterator<Item = SchemaFragment>) {
        for fragment in fragments {
            self.register(fragment);
        }
    }

    pub fn register_document(&self, document: SchemaDocument) {
        if let Ok(mut ns) = self.namespaces.write() {
            for (prefix, uri) in &document.namespaces {
                ns.insert(prefix.clone(), uri.clone());
            }
        }
        self.register_all(document.types);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fragments
            .read()
            .map(|f| f.contains_key(name))
            .unwrap_or(false)
    }

    pub fn fragment(&self, name: &str) -> Option<Arc<SchemaFragment>> {
        self.fragments.read().ok()?.get(name).cloned()
    }

    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .fragments
            .read()
            .map(|f| f.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<EntityMetadata>> {
        if let Some(cached) = self.resolved.read().ok().and_then(|r| r.get(name).cloned()) {
            return Ok(cached);
        }
        let metadata = Arc::new(self.build(name)?);
        if let Ok(mut resolved) = self.resolved.write() {
            resolved.insert(name.to_string(), metadata.clone());
        }
        Ok(metadata)
    }

    fn linearize(
        &self,
        name: &str,
        out: &mut Vec<Arc<SchemaFragment>>,
        seen: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Result<()> {
        if path.iter().any(|p| p == name) {
            return Err(OrmError::metadata(
                name,
                format!("cyclic inheritance through {}", path.join(" -> ")),
            ));
        }
        if seen.contains(name) {
            return Ok(());
        }
        let fragment = self.fragment(name).ok_or_else(|| {
            let referrer = path.last().cloned().unwrap_or_else(|| name.to_string());
            OrmError::metadata(referrer, format!("unknown type `{}`", name))
        })?;
        path.push(name.to_string());
        if let Some(parent) = &fragment.extends {
            self.linearize(parent, out, seen, path)?;
        }
        for interface in &fragment.implements {
            self.linearize(interface, out, seen, path)?;
        }
        path.pop();
        seen.insert(name.to_string());
        out.push(fragment);
        Ok(())
    }

    fn build(&self, name: &str) -> Result<EntityMetadata> {
        let mut chain = vec![];
        self.linearize(name, &mut chain, &mut HashSet::new(), &mut vec![])?;
        let own = chain
            .last()
            .cloned()
            .ok_or_else(|| OrmError::metadata(name, "empty type hierarchy"))?;
        if own.kind == TypeKind::Plain {
            return Err(OrmError::metadata(name, "type is not persistent"));
        }
        debug!(
            "Resolving {} through {:?}",
            name,
            chain.iter().map(|f| f.name.as_str()).collect::<Vec<_>>()
        );

        let mut namespaces = Namespaces::new();
        let mut rdf_type = None;
        let mut named_graph = None;
        let mut markers = HashSet::new();
        let mut callbacks: HashMap<LifecycleEvent, Vec<Callback>> = HashMap::new();
        let mut identities: Vec<IdentityMetadata> = vec![];
        // (logical name, declaring member, mapping, declaring type), in first-seen order
        let mut slots: Vec<(String, Member, crate::schema::Property, String)> = vec![];
        let mut setters: HashSet<String> = HashSet::new();

        for fragment in &chain {
            markers.extend(fragment.markers.iter().copied());
            if fragment.kind == TypeKind::Plain {
                continue;
            }
            for (prefix, uri) in &fragment.namespaces {
                namespaces.insert(prefix.clone(), uri.clone());
            }
            if fragment.rdf_type.is_some() {
                rdf_type = fragment.rdf_type.clone();
            }
            if fragment.named_graph.is_some() {
                named_graph = fragment.named_graph.clone();
            }
            for (event, callback) in &fragment.callbacks.0 {
                callbacks.entry(*event).or_default().push(callback.clone());
            }
            for decl in &fragment.members {
                if let Member::Setter(s) = &decl.member {
                    setters.insert(s.clone());
                }
                let logical = decl.member.property_name();
                if decl.id {
                    let access = match decl.member {
                        Member::Field(_) => Access::Field,
                        _ => Access::Method,
                    };
                    let candidate = IdentityMetadata {
                        name: logical,
                        access,
                        declared_in: fragment.name.clone(),
                    };
                    match identities.iter_mut().find(|i| i.name == candidate.name) {
                        Some(existing) => *existing = candidate,
                        None => identities.push(candidate),
                    }
                    continue;
                }
                let Some(property) = &decl.property else {
                    continue;
                };
                let entry = (
                    logical.clone(),
                    decl.member.clone(),
                    property.clone(),
                    fragment.name.clone(),
                );
                match slots.iter_mut().find(|s| s.0 == logical) {
                    Some(existing) => *existing = entry,
                    None => slots.push(entry),
                }
            }
        }

        if identities.len() > 1 {
            let names: Vec<String> = identities
                .iter()
                .map(|i| format!("{}.{}", i.declared_in, i.name))
                .collect();
            return Err(OrmError::metadata(
                name,
                format!("more than one identity accessor: {}", names.join(", ")),
            ));
        }

        let index_ns = self
            .namespaces
            .read()
            .map(|ns| ns.clone())
            .unwrap_or_default();
        let mut lookup = namespaces.clone();
        lookup.extend_missing(&index_ns);
        lookup.extend_missing(&namespaces::global());
        let expand = |value: &str, what: &str| -> Result<NamedNode> {
            let iri = lookup.expand(value).ok_or_else(|| {
                OrmError::metadata(name, format!("unknown prefix in {} `{}`", what, value))
            })?;
            NamedNode::new(iri)
                .map_err(|e| OrmError::metadata(name, format!("invalid {} `{}`: {}", what, value, e)))
        };

        let mut properties = Vec::with_capacity(slots.len());
        let mut by_name = HashMap::new();
        for (logical, member, property, declared_in) in slots {
            if identities.iter().any(|i| i.name == logical) {
                return Err(OrmError::metadata(
                    name,
                    format!("`{}` is both the identity and a mapped property", logical),
                ));
            }
            if let Some(target) = &property.target {
                if !self.contains(target) {
                    return Err(OrmError::metadata(
                        name,
                        format!("unresolvable target type `{}` for `{}`", target, logical),
                    ));
                }
            }
            let (access, read_only) = match &member {
                Member::Field(_) => (Access::Field, false),
                Member::Setter(_) => (Access::Method, false),
                Member::Getter(_) => {
                    let paired = member.paired_setter();
                    let found = paired.as_ref().map(|s| setters.contains(s)).unwrap_or(false);
                    if !found {
                        warn!(
                            "No setter {} found for mapped getter {}.{}; property is read-only",
                            paired.unwrap_or_else(|| "<none>".to_string()),
                            declared_in,
                            member.name()
                        );
                    }
                    (Access::Method, !found)
                }
            };
            let mut fetch = property.fetch;
            if fetch.is_lazy() && !(property.target.is_some() && property.cardinality.is_many()) {
                debug!(
                    "{}.{}: lazy fetch only applies to relational collections, loading eagerly",
                    name, logical
                );
                fetch = FetchType::Eager;
            }
            let datatype = match &property.datatype {
                Some(dt) => Some(expand(dt, "datatype")?),
                None => None,
            };
            by_name.insert(logical.clone(), properties.len());
            properties.push(PropertyMetadata {
                predicate: expand(&property.predicate, "predicate")?,
                name: logical,
                cardinality: property.cardinality,
                fetch,
                cascade: CascadeSet::of(&property.cascade),
                target: property.target.clone(),
                datatype,
                access,
                read_only,
                declared_in,
            });
        }

        let rdf_type = match rdf_type {
            Some(t) => Some(expand(&t, "rdf type")?),
            None => None,
        };
        let named_graph = match named_graph {
            Some(g) => Some(expand(&g, "named graph")?),
            None => None,
        };

        Ok(EntityMetadata {
            name: name.to_string(),
            kind: own.kind,
            is_abstract: own.is_abstract(),
            rdf_type,
            named_graph,
            namespaces,
            identity: identities.pop(),
            properties,
            by_name,
            callbacks,
            supertypes: chain.iter().map(|f| f.name.clone()).collect(),
            markers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{Cascade, CollectionKind};
    use crate::schema::{Property, Schema};

    const EX: &str = "http://example.org/";

    #[test]
    fn mapped_superclass_members_appear_once() {
        let index = MetadataIndex::new();
        index.register(
            Schema::mapped_superclass("Base")
                .namespace("ex", EX)
                .field("foo", Property::new("ex:foo"))
                .build(),
        );
        index.register(
            Schema::entity("Child")
                .extends("Base")
                .field("bar", Property::new("http://example.org/bar"))
                .build(),
        );
        let meta = index.resolve("Child").unwrap();
        let names: Vec<&str> = meta.properties().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["foo", "bar"]);
        assert_eq!(meta.property("foo").unwrap().predicate.as_str(), "http://example.org/foo");
        assert_eq!(meta.property("foo").unwrap().declared_in, "Base");
    }

    #[test]
    fn derived_declaration_overrides_inherited() {
        let index = MetadataIndex::new();
        index.register(
            Schema::mapped_superclass("Base")
                .getter("getName", Property::new("http://example.org/name"))
                .setter("setName")
                .build(),
        );
        index.register(
            Schema::entity("Child")
                .extends("Base")
                .getter("getName", Property::new("http://example.org/label"))
                .build(),
        );
        let meta = index.resolve("Child").unwrap();
        assert_eq!(meta.properties().len(), 1);
        let name = meta.property("name").unwrap();
        assert_eq!(name.predicate.as_str(), "http://example.org/label");
        // the inherited setter still pairs with the overriding getter
        assert!(!name.read_only);
    }

    #[test]
    fn getter_without_setter_is_read_only() {
        let index = MetadataIndex::new();
        index.register(
            Schema::entity("Thing")
                .getter("getAge", Property::new("http://example.org/age"))
                .getter("isActive", Property::new("http://example.org/active"))
                .setter("setActive")
                .build(),
        );
        let meta = index.resolve("Thing").unwrap();
        assert!(meta.property("age").unwrap().read_only);
        assert!(!meta.property("active").unwrap().read_only);
        // resolving twice yields the same cached metadata
        let again = index.resolve("Thing").unwrap();
        assert!(Arc::ptr_eq(&meta, &again));
    }

    #[test]
    fn two_identities_are_rejected() {
        let index = MetadataIndex::new();
        index.register(Schema::mapped_superclass("Base").id_field("uri").build());
        index.register(Schema::entity("Child").extends("Base").id_getter("getKey").build());
        let err = index.resolve("Child").unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::MetadataInvalid);
    }

    #[test]
    fn same_identity_redeclared_is_one_identity() {
        let index = MetadataIndex::new();
        index.register(Schema::mapped_superclass("Base").id_field("uri").build());
        index.register(Schema::entity("Child").extends("Base").id_field("uri").build());
        let meta = index.resolve("Child").unwrap();
        assert_eq!(meta.identity().unwrap().declared_in, "Child");
    }

    #[test]
    fn diamond_interfaces_share_one_property() {
        let index = MetadataIndex::new();
        index.register(
            Schema::interface("HasFoo")
                .getter("getFoo", Property::new("http://example.org/foo"))
                .setter("setFoo")
                .build(),
        );
        index.register(Schema::interface("Left").implements("HasFoo").build());
        index.register(Schema::interface("Right").implements("HasFoo").build());
        index.register(
            Schema::entity("Both")
                .implements("Left")
                .implements("Right")
                .build(),
        );
        let meta = index.resolve("Both").unwrap();
        assert_eq!(meta.properties().len(), 1);
        assert_eq!(
            meta.supertypes(),
            &["HasFoo".to_string(), "Left".into(), "Right".into(), "Both".into()]
        );
    }

    #[test]
    fn unknown_targets_and_prefixes_fail() {
        let index = MetadataIndex::new();
        index.register(
            Schema::entity("A")
                .field(
                    "b",
                    Property::relation("http://example.org/b", "Missing").cascade(Cascade::All),
                )
                .build(),
        );
        assert!(index.resolve("A").is_err());

        index.register(Schema::entity("C").field("x", Property::new("nope:x")).build());
        let err = index.resolve("C").unwrap_err();
        assert!(err.to_string().contains("unknown prefix"));
    }

    #[test]
    fn lazy_scalars_fall_back_to_eager() {
        let index = MetadataIndex::new();
        index.register(
            Schema::entity("A")
                .field("tags", Property::new("http://example.org/tag").many(CollectionKind::Set).lazy())
                .build(),
        );
        let meta = index.resolve("A").unwrap();
        assert_eq!(meta.property("tags").unwrap().fetch, FetchType::Eager);
    }

    #[test]
    fn plain_types_cannot_be_resolved() {
        let index = MetadataIndex::new();
        index.register(Schema::plain("Helper").build());
        assert!(index.resolve("Helper").is_err());
        assert!(index.resolve("Nothing").is_err());
    }
}
