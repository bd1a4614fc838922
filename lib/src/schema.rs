//! Declared schema fragments: the per-type description of identity, persistent
//! members and lifecycle callbacks that the metadata index flattens.
//!
//! A fragment is either assembled in code with [`Schema`] or deserialized from
//! a JSON schema document ([`SchemaDocument`]). Inheritance is expressed by
//! naming other fragments in `extends` / `implements`.

use crate::errors::Result;
use crate::instance::Record;
use crate::options::{Cardinality, Cascade, CollectionKind, FetchType, LifecycleEvent};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// A lifecycle hook run against the record it fires for.
pub type Callback = Arc<dyn Fn(&mut Record) -> Result<()> + Send + Sync>;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    /// A persistent type that can be found and persisted.
    Entity,
    /// Contributes its members to subtypes but is never mapped on its own.
    MappedSuperclass,
    /// An abstract contract; always requires a generated layout.
    Interface,
    /// A type whose members are not persistent; skipped while walking.
    Plain,
}

/// Capability markers a type may carry.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Marker {
    /// The type exposes an RDF identifier slot.
    SupportsRdfId,
}

/// How a member is reached on the declaring type.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Member {
    Field(String),
    Getter(String),
    Setter(String),
}

impl Member {
    pub fn name(&self) -> &str {
        match self {
            Member::Field(n) | Member::Getter(n) | Member::Setter(n) => n,
        }
    }

    /// The logical property name: `getFooBar`/`setFooBar`/`isFooBar` and the
    /// field `fooBar` all normalize to `fooBar`.
    pub fn property_name(&self) -> String {
        match self {
            Member::Field(n) => n.clone(),
            Member::Getter(n) => {
                let stripped = n
                    .strip_prefix("get")
                    .or_else(|| n.strip_prefix("is"))
                    .filter(|rest| !rest.is_empty())
                    .unwrap_or(n);
                decapitalize(stripped)
            }
            Member::Setter(n) => {
                let stripped = n.strip_prefix("set").filter(|r| !r.is_empty()).unwrap_or(n);
                decapitalize(stripped)
            }
        }
    }

    /// The conventional setter for a getter: `getFoo`/`isFoo` → `setFoo`.
    pub fn paired_setter(&self) -> Option<String> {
        match self {
            Member::Getter(n) => {
                let rest = n
                    .strip_prefix("get")
                    .or_else(|| n.strip_prefix("is"))
                    .filter(|rest| !rest.is_empty())?;
                Some(format!("set{}", rest))
            }
            _ => None,
        }
    }
}

// `URL` stays `URL`, `Name` becomes `name`
fn decapitalize(s: &str) -> String {
    let mut chars = s.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => return String::new(),
    };
    if let Some(second) = s.chars().nth(1) {
        if first.is_uppercase() && second.is_uppercase() {
            return s.to_string();
        }
    }
    first.to_lowercase().chain(chars).collect()
}

/// The mapping carried by a persistent member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    /// Predicate IRI or `prefix:local` name.
    pub predicate: String,
    #[serde(default)]
    pub cardinality: Cardinality,
    #[serde(default)]
    pub fetch: FetchType,
    #[serde(default)]
    pub cascade: Vec<Cascade>,
    /// Target entity type of a relational property.
    #[serde(default)]
    pub target: Option<String>,
    /// Datatype written for scalar values; inferred from the value when unset.
    #[serde(default)]
    pub datatype: Option<String>,
}

impl Property {
    pub fn new(predicate: impl Into<String>) -> Self {
        Property {
            predicate: predicate.into(),
            cardinality: Cardinality::Single,
            fetch: FetchType::Eager,
            cascade: vec![],
            target: None,
            datatype: None,
        }
    }

    /// A single-valued relation to another entity type.
    pub fn relation(predicate: impl Into<String>, target: impl Into<String>) -> Self {
        Property::new(predicate).target(target)
    }

    pub fn many(mut self, kind: CollectionKind) -> Self {
        self.cardinality = Cardinality::Many(kind);
        self
    }

    pub fn lazy(mut self) -> Self {
        self.fetch = FetchType::Lazy;
        self
    }

    pub fn fetch(mut self, fetch: FetchType) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn cascade(mut self, op: Cascade) -> Self {
        if !self.cascade.contains(&op) {
            self.cascade.push(op);
        }
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn datatype(mut self, datatype: impl Into<String>) -> Self {
        self.datatype = Some(datatype.into());
        self
    }
}

/// One declared member of a fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDecl {
    #[serde(flatten)]
    pub member: Member,
    #[serde(default)]
    pub property: Option<Property>,
    /// Marks the identity accessor.
    #[serde(default)]
    pub id: bool,
}

#[derive(Clone, Default)]
pub struct Callbacks(pub Vec<(LifecycleEvent, Callback)>);

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.0.iter().map(|(event, _)| event))
            .finish()
    }
}

/// The declarations of a single type, before inheritance is applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaFragment {
    pub name: String,
    pub kind: TypeKind,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    /// RDFS class of instances, IRI or `prefix:local`.
    #[serde(default)]
    pub rdf_type: Option<String>,
    #[serde(default)]
    pub named_graph: Option<String>,
    #[serde(default)]
    pub namespaces: Vec<(String, String)>,
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub implements: Vec<String>,
    #[serde(default)]
    pub markers: Vec<Marker>,
    #[serde(default)]
    pub members: Vec<MemberDecl>,
    #[serde(skip)]
    pub callbacks: Callbacks,
}

impl SchemaFragment {
    pub fn is_abstract(&self) -> bool {
        self.is_abstract || matches!(self.kind, TypeKind::Interface)
    }
}

/// Fluent builder for [`SchemaFragment`]s.
pub struct Schema {
    fragment: SchemaFragment,
}

impl Schema {
    fn with_kind(name: &str, kind: TypeKind) -> Self {
        Schema {
            fragment: SchemaFragment {
                name: name.to_string(),
                kind,
                is_abstract: false,
                rdf_type: None,
                named_graph: None,
                namespaces: vec![],
                extends: None,
                implements: vec![],
                markers: vec![],
                members: vec![],
                callbacks: Callbacks::default(),
            },
        }
    }

    /// A concrete entity type; carries the `SupportsRdfId` marker.
    pub fn entity(name: &str) -> Self {
        Self::with_kind(name, TypeKind::Entity).marker(Marker::SupportsRdfId)
    }

    pub fn mapped_superclass(name: &str) -> Self {
        Self::with_kind(name, TypeKind::MappedSuperclass)
    }

    /// An interface; it only supports RDF ids if it, or a type it extends,
    /// says so.
    pub fn interface(name: &str) -> Self {
        Self::with_kind(name, TypeKind::Interface)
    }

    pub fn plain(name: &str) -> Self {
        Self::with_kind(name, TypeKind::Plain)
    }

    pub fn abstract_type(mut self) -> Self {
        self.fragment.is_abstract = true;
        self
    }

    pub fn marker(mut self, marker: Marker) -> Self {
        if !self.fragment.markers.contains(&marker) {
            self.fragment.markers.push(marker);
        }
        self
    }

    pub fn rdf_type(mut self, class: &str) -> Self {
        self.fragment.rdf_type = Some(class.to_string());
        self
    }

    pub fn named_graph(mut self, graph: &str) -> Self {
        self.fragment.named_graph = Some(graph.to_string());
        self
    }

    pub fn namespace(mut self, prefix: &str, uri: &str) -> Self {
        self.fragment
            .namespaces
            .push((prefix.to_string(), uri.to_string()));
        self
    }

    pub fn extends(mut self, parent: &str) -> Self {
        self.fragment.extends = Some(parent.to_string());
        self
    }

    pub fn implements(mut self, interface: &str) -> Self {
        self.fragment.implements.push(interface.to_string());
        self
    }

    fn member(mut self, member: Member, property: Option<Property>, id: bool) -> Self {
        self.fragment.members.push(MemberDecl {
            member,
            property,
            id,
        });
        self
    }

    pub fn id_field(self, name: &str) -> Self {
        self.member(Member::Field(name.to_string()), None, true)
    }

    pub fn id_getter(self, name: &str) -> Self {
        self.member(Member::Getter(name.to_string()), None, true)
    }

    pub fn field(self, name: &str, property: Property) -> Self {
        self.member(Member::Field(name.to_string()), Some(property), false)
    }

    pub fn getter(self, name: &str, property: Property) -> Self {
        self.member(Member::Getter(name.to_string()), Some(property), false)
    }

    /// A getter without a mapping; overrides do not drop inherited mappings.
    pub fn plain_getter(self, name: &str) -> Self {
        self.member(Member::Getter(name.to_string()), None, false)
    }

    pub fn setter(self, name: &str) -> Self {
        self.member(Member::Setter(name.to_string()), None, false)
    }

    pub fn mapped_setter(self, name: &str, property: Property) -> Self {
        self.member(Member::Setter(name.to_string()), Some(property), false)
    }

    pub fn on<F>(mut self, event: LifecycleEvent, callback: F) -> Self
    where
        F: Fn(&mut Record) -> Result<()> + Send + Sync + 'static,
    {
        self.fragment.callbacks.0.push((event, Arc::new(callback)));
        self
    }

    pub fn build(self) -> SchemaFragment {
        self.fragment
    }
}

/// A JSON file holding a list of fragments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDocument {
    #[serde(default)]
    pub namespaces: Vec<(String, String)>,
    pub types: Vec<SchemaFragment>,
}

impl SchemaDocument {
    pub fn from_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_str(&contents)
    }
}
