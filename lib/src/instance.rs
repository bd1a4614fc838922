//! Generated record layouts and the managed records built from them.
//!
//! [`InstanceGenerator::generate`] turns resolved [`EntityMetadata`] into a
//! [`RecordType`]: one slot per persistent property, addressed by name.
//! A [`Record`] is an instance of such a layout. Besides its values it
//! carries the provenance of the last load: every statement retrieved about
//! the resource, and the subset that populated the current values.

use crate::errors::{OrmError, Result};
use crate::identity::RdfId;
use crate::lazy::LazyCollection;
use crate::metadata::{EntityMetadata, MetadataIndex, PropertyMetadata};
use crate::options::{Cardinality, CollectionKind};
use crate::schema::Marker;
use crate::value::{Collection, Value};
use log::debug;
use oxigraph::model::Graph;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

fn next_key() -> u64 {
    NEXT_KEY.fetch_add(1, Ordering::Relaxed)
}

/// The concrete layout generated for an entity type.
#[derive(Debug)]
pub struct RecordType {
    metadata: Arc<EntityMetadata>,
}

impl RecordType {
    pub fn name(&self) -> &str {
        self.metadata.name()
    }

    pub fn metadata(&self) -> &Arc<EntityMetadata> {
        &self.metadata
    }

    pub fn slot(&self, property: &str) -> Option<usize> {
        self.metadata.slot_of(property)
    }

    pub fn slot_count(&self) -> usize {
        self.metadata.properties().len()
    }

    /// A fresh, unidentified record of this layout.
    pub fn instantiate(self: &Arc<Self>) -> Record {
        Record {
            layout: self.clone(),
            key: next_key(),
            id: None,
            values: vec![None; self.slot_count()],
            all_triples: Graph::new(),
            instance_triples: Graph::new(),
            loaded: false,
            reference_only: false,
        }
    }

    /// An identifier-only stand-in for a resource loaded elsewhere in the
    /// same object graph.
    pub(crate) fn reference(self: &Arc<Self>, id: RdfId) -> Record {
        let mut record = self.instantiate();
        record.id = Some(id);
        record.reference_only = true;
        record
    }
}

/// Builds and caches record layouts.
#[derive(Debug)]
pub struct InstanceGenerator {
    index: Arc<MetadataIndex>,
    cache: RwLock<HashMap<String, Arc<RecordType>>>,
}

impl InstanceGenerator {
    pub fn new(index: Arc<MetadataIndex>) -> Self {
        InstanceGenerator {
            index,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn index(&self) -> &Arc<MetadataIndex> {
        &self.index
    }

    pub fn generate(&self, type_name: &str) -> Result<Arc<RecordType>> {
        if let Some(layout) = self.cache.read().ok().and_then(|c| c.get(type_name).cloned()) {
            return Ok(layout);
        }
        let metadata = self.index.resolve(type_name)?;
        if !metadata.has_marker(Marker::SupportsRdfId) {
            return Err(OrmError::metadata(
                type_name,
                "type does not support RDF identifiers",
            ));
        }
        debug!(
            "Generated layout for {} with {} slots",
            type_name,
            metadata.properties().len()
        );
        let layout = Arc::new(RecordType { metadata });
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(type_name.to_string(), layout.clone());
        }
        Ok(layout)
    }

    pub fn instantiate(&self, type_name: &str) -> Result<Record> {
        Ok(self.generate(type_name)?.instantiate())
    }
}

/// The content of one record slot.
#[derive(Debug, Clone)]
pub enum PropertyValue {
    Single(Value),
    Many(Collection),
    Lazy(LazyCollection),
}

impl PropertyValue {
    /// Members of a collection without forcing a lazy one; `None` for an
    /// uninitialized lazy collection.
    pub fn loaded_values(&self) -> Option<&Collection> {
        match self {
            PropertyValue::Many(c) => Some(c),
            PropertyValue::Lazy(lazy) => lazy.materialized(),
            PropertyValue::Single(_) => None,
        }
    }
}

impl PartialEq for PropertyValue {
    fn eq(&self, other: &PropertyValue) -> bool {
        match (self, other) {
            (PropertyValue::Single(a), PropertyValue::Single(b)) => a == b,
            (PropertyValue::Lazy(a), PropertyValue::Lazy(b))
                if !a.is_materialized() && !b.is_materialized() =>
            {
                a.owner() == b.owner()
                    && a.predicate() == b.predicate()
                    && a.known_ids() == b.known_ids()
            }
            (a, b) => match (a.loaded_values(), b.loaded_values()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

/// A managed entity instance.
pub struct Record {
    layout: Arc<RecordType>,
    key: u64,
    id: Option<RdfId>,
    values: Vec<Option<PropertyValue>>,
    all_triples: Graph,
    instance_triples: Graph,
    loaded: bool,
    reference_only: bool,
}

/// Cloning produces a distinct instance with its own key.
impl Clone for Record {
    fn clone(&self) -> Self {
        Record {
            layout: self.layout.clone(),
            key: next_key(),
            id: self.id.clone(),
            values: self.values.clone(),
            all_triples: self.all_triples.clone(),
            instance_triples: self.instance_triples.clone(),
            loaded: self.loaded,
            reference_only: self.reference_only,
        }
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Record) -> bool {
        self.type_name() == other.type_name() && self.id == other.id && self.values == other.values
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct(self.type_name());
        s.field("@id", &self.id);
        for (prop, value) in self.metadata().properties().iter().zip(&self.values) {
            if let Some(value) = value {
                s.field(&prop.name, value);
            }
        }
        s.finish()
    }
}

impl Record {
    pub fn type_name(&self) -> &str {
        self.layout.name()
    }

    pub fn layout(&self) -> &Arc<RecordType> {
        &self.layout
    }

    pub fn metadata(&self) -> &Arc<EntityMetadata> {
        self.layout.metadata()
    }

    /// Process-unique instance key; identifies this instance, not the resource.
    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn id(&self) -> Option<&RdfId> {
        self.id.as_ref()
    }

    /// Binds the identifier. Rebinding the same value is a no-op; any other
    /// value fails once an identifier is set.
    pub fn set_id(&mut self, id: RdfId) -> Result<()> {
        match &self.id {
            Some(current) if *current == id => Ok(()),
            Some(current) => Err(OrmError::IdentityImmutable {
                current: current.clone(),
                attempted: id,
            }),
            None => {
                self.id = Some(id);
                Ok(())
            }
        }
    }

    /// Builder-style [`Record::set_id`].
    pub fn with_id(mut self, id: RdfId) -> Result<Self> {
        self.set_id(id)?;
        Ok(self)
    }

    /// True once the record was populated from a data source.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub(crate) fn mark_loaded(&mut self, loaded: bool) {
        self.loaded = loaded;
    }

    /// True for stand-ins of resources already loaded elsewhere in the
    /// object graph; they only contribute links when written back.
    pub fn is_reference_only(&self) -> bool {
        self.reference_only
    }

    pub fn all_triples(&self) -> &Graph {
        &self.all_triples
    }

    pub fn instance_triples(&self) -> &Graph {
        &self.instance_triples
    }

    /// Replaces both provenance sets. Instance triples missing from `all`
    /// are added to it.
    pub fn set_provenance(&mut self, mut all: Graph, instance: Graph) {
        for triple in instance.iter() {
            all.insert(triple);
        }
        self.all_triples = all;
        self.instance_triples = instance;
    }

    pub fn set_all_triples(&mut self, all: Graph) {
        let instance = std::mem::take(&mut self.instance_triples);
        self.set_provenance(all, instance);
    }

    pub fn set_instance_triples(&mut self, instance: Graph) {
        let all = std::mem::take(&mut self.all_triples);
        self.set_provenance(all, instance);
    }

    fn resolve(&self, name: &str) -> Result<(usize, &PropertyMetadata)> {
        let slot = self.layout.slot(name).ok_or_else(|| {
            OrmError::illegal_argument(format!("{} has no property `{}`", self.type_name(), name))
        })?;
        Ok((slot, &self.metadata().properties()[slot]))
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.layout.slot(name).is_some()
    }

    /// Raw slot content, without forcing lazy collections.
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        let slot = self.layout.slot(name)?;
        self.values[slot].as_ref()
    }

    pub fn property_mut(&mut self, name: &str) -> Option<&mut PropertyValue> {
        let slot = self.layout.slot(name)?;
        self.values[slot].as_mut()
    }

    /// Writes a slot directly; bypasses read-only checks.
    pub(crate) fn put(&mut self, slot: usize, value: Option<PropertyValue>) {
        self.values[slot] = value;
    }

    pub(crate) fn slot_mut(&mut self, slot: usize) -> Option<&mut PropertyValue> {
        self.values.get_mut(slot).and_then(|v| v.as_mut())
    }

    pub(crate) fn slots(&self) -> impl Iterator<Item = (&PropertyMetadata, Option<&PropertyValue>)> {
        self.metadata()
            .properties()
            .iter()
            .zip(self.values.iter().map(|v| v.as_ref()))
    }

    /// The value of a single-valued property.
    pub fn value(&self, name: &str) -> Result<Option<&Value>> {
        let (slot, prop) = self.resolve(name)?;
        if prop.cardinality.is_many() {
            return Err(OrmError::illegal_argument(format!(
                "`{}` is a collection",
                name
            )));
        }
        Ok(match &self.values[slot] {
            Some(PropertyValue::Single(v)) => Some(v),
            _ => None,
        })
    }

    fn check_value(&self, prop: &PropertyMetadata, value: &Value) -> Result<()> {
        match value {
            Value::Entity(record) => match &prop.target {
                Some(target) if record.metadata().is_subtype_of(target) => Ok(()),
                Some(target) => Err(OrmError::illegal_argument(format!(
                    "`{}` expects {}, got {}",
                    prop.name,
                    target,
                    record.type_name()
                ))),
                None => Err(OrmError::illegal_argument(format!(
                    "`{}` is not a relation",
                    prop.name
                ))),
            },
            Value::Resource(_) => Ok(()),
            _ if prop.is_relation() => Err(OrmError::illegal_argument(format!(
                "`{}` expects an entity reference",
                prop.name
            ))),
            _ => Ok(()),
        }
    }

    /// Sets a single-valued property.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let (slot, prop) = self.resolve(name)?;
        if prop.read_only {
            return Err(OrmError::illegal_argument(format!(
                "`{}` is read-only",
                name
            )));
        }
        if prop.cardinality.is_many() {
            return Err(OrmError::illegal_argument(format!(
                "`{}` is a collection",
                name
            )));
        }
        self.check_value(prop, &value)?;
        self.values[slot] = Some(PropertyValue::Single(value));
        Ok(())
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Result<Self> {
        self.set(name, value)?;
        Ok(self)
    }

    pub fn unset(&mut self, name: &str) -> Result<()> {
        let (slot, prop) = self.resolve(name)?;
        if prop.read_only {
            return Err(OrmError::illegal_argument(format!(
                "`{}` is read-only",
                name
            )));
        }
        self.values[slot] = None;
        Ok(())
    }

    /// The members of a collection property, forcing a lazy collection.
    pub fn collection(&mut self, name: &str) -> Result<&Collection> {
        Ok(&*self.collection_mut(name)?)
    }

    /// Mutable members of a collection property, forcing a lazy collection
    /// and creating an empty one when unset.
    pub fn collection_mut(&mut self, name: &str) -> Result<&mut Collection> {
        let (slot, prop) = self.resolve(name)?;
        let kind = match prop.cardinality {
            Cardinality::Many(kind) => kind,
            Cardinality::Single => {
                return Err(OrmError::illegal_argument(format!(
                    "`{}` is not a collection",
                    name
                )))
            }
        };
        let entry = self.values[slot].get_or_insert_with(|| PropertyValue::Many(Collection::new(kind)));
        match entry {
            PropertyValue::Many(c) => Ok(c),
            PropertyValue::Lazy(lazy) => lazy.force(),
            PropertyValue::Single(_) => Err(OrmError::illegal_state(format!(
                "`{}` holds a single value",
                name
            ))),
        }
    }

    /// Adds a member to a collection property.
    pub fn add(&mut self, name: &str, value: impl Into<Value>) -> Result<bool> {
        let value = value.into();
        let (_, prop) = self.resolve(name)?;
        if prop.read_only {
            return Err(OrmError::illegal_argument(format!(
                "`{}` is read-only",
                name
            )));
        }
        self.check_value(prop, &value)?;
        Ok(self.collection_mut(name)?.push(value))
    }

    /// Replaces the whole collection of a many-valued property.
    pub fn set_all(&mut self, name: &str, values: impl IntoIterator<Item = Value>) -> Result<()> {
        let (slot, prop) = self.resolve(name)?;
        let kind = match prop.cardinality {
            Cardinality::Many(kind) => kind,
            Cardinality::Single => CollectionKind::List,
        };
        if !prop.cardinality.is_many() || prop.read_only {
            return Err(OrmError::illegal_argument(format!(
                "`{}` is not a writable collection",
                name
            )));
        }
        let values: Vec<Value> = values.into_iter().collect();
        for value in &values {
            self.check_value(prop, value)?;
        }
        self.values[slot] = Some(PropertyValue::Many(Collection::from_values(kind, values)));
        Ok(())
    }

    /// Copies values, identity-free provenance and the loaded flag from a
    /// freshly loaded record of the same resource.
    pub(crate) fn replace_state(&mut self, fresh: Record) {
        self.values = fresh.values;
        self.all_triples = fresh.all_triples;
        self.instance_triples = fresh.instance_triples;
        self.loaded = fresh.loaded;
        self.reference_only = fresh.reference_only;
    }

    /// JSON rendering used by the command line tools. Uninitialized lazy
    /// collections are shown as their known member identifiers.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        if let Some(id) = &self.id {
            map.insert("@id".into(), serde_json::Value::String(id.to_string()));
        }
        map.insert(
            "@type".into(),
            serde_json::Value::String(self.type_name().to_string()),
        );
        for (prop, value) in self.slots() {
            let json = match value {
                None => continue,
                Some(PropertyValue::Single(v)) => v.to_json(),
                Some(PropertyValue::Many(c)) => c.iter().map(Value::to_json).collect(),
                Some(PropertyValue::Lazy(lazy)) => match lazy.materialized() {
                    Some(c) => c.iter().map(Value::to_json).collect(),
                    None => lazy
                        .known_ids()
                        .iter()
                        .map(|id| serde_json::json!({ "@id": id.to_string() }))
                        .collect(),
                },
            };
            map.insert(prop.name.clone(), json);
        }
        serde_json::Value::Object(map)
    }
}
