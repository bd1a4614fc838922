//! The entity manager: the session-level API for loading and storing
//! records, and the factory that hands out sessions over one data source.

use crate::config::{FactoryRegistry, PersistenceUnit};
use crate::consts::TYPE;
use crate::datasource::{DataSource, SourceStatements, SupportsTransactions};
use crate::errors::{OrmError, Result};
use crate::identity::RdfId;
use crate::instance::{InstanceGenerator, Record};
use crate::lazy::LoadContext;
use crate::materializer::{self, RecordStatements};
use crate::metadata::{EntityMetadata, MetadataIndex};
use crate::namespaces::Namespaces;
use crate::options::{Cascade, LifecycleEvent};
use crate::query::{RdfQuery, TypedQuery};
use log::{debug, info, warn};
use oxigraph::model::{Graph, NamedNode, Term};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Initializes logging for the rdfmap library.
///
/// If `RDFMAP_LOG` is set, `RUST_LOG` is set to its value, so `RDFMAP_LOG`
/// takes precedence. The logger itself (e.g. `env_logger::init()`) must be
/// installed after this call for the level to take effect.
pub fn init_logging() {
    if let Ok(log_level) = std::env::var("RDFMAP_LOG") {
        std::env::set_var("RUST_LOG", log_level);
    }
}

/// Lifecycle state of a record relative to one entity manager.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EntityState {
    New,
    Managed,
    Removed,
    Detached,
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityState::New => "new",
            EntityState::Managed => "managed",
            EntityState::Removed => "removed",
            EntityState::Detached => "detached",
        };
        f.write_str(s)
    }
}

/// Builds entity managers sharing a data source and a metadata index.
pub struct EntityManagerFactory {
    ds: Arc<dyn DataSource>,
    generator: Arc<InstanceGenerator>,
    namespaces: Namespaces,
}

impl fmt::Debug for EntityManagerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityManagerFactory")
            .field("dialect", &self.ds.dialect().name())
            .field("index", self.generator.index())
            .finish()
    }
}

impl EntityManagerFactory {
    pub fn new(ds: Arc<dyn DataSource>, index: Arc<MetadataIndex>) -> Self {
        EntityManagerFactory {
            ds,
            generator: Arc::new(InstanceGenerator::new(index)),
            namespaces: Namespaces::new(),
        }
    }

    /// Resolves a persistence unit into a data source through `registry`.
    /// Prefixes declared by the unit are added to every query.
    pub fn from_unit(
        unit: &PersistenceUnit,
        registry: &FactoryRegistry,
        index: Arc<MetadataIndex>,
    ) -> Result<Self> {
        let ds = registry.create(unit)?;
        info!(
            "Opened persistence unit '{}' with the {} factory",
            unit.name(),
            unit.factory()
        );
        let mut factory = Self::new(ds, index);
        factory.namespaces = unit.namespaces();
        Ok(factory)
    }

    pub fn data_source(&self) -> &Arc<dyn DataSource> {
        &self.ds
    }

    pub fn index(&self) -> &Arc<MetadataIndex> {
        self.generator.index()
    }

    pub fn create_entity_manager(&self) -> EntityManager {
        let source = Arc::new(SourceStatements(self.ds.clone()));
        EntityManager {
            ds: self.ds.clone(),
            generator: self.generator.clone(),
            context: LoadContext::new(source, self.generator.clone()),
            namespaces: self.namespaces.clone(),
            managed: HashMap::new(),
            open: true,
        }
    }
}

#[derive(Debug, Clone)]
struct Managed {
    key: u64,
    state: EntityState,
    type_name: String,
}

/// A session over a data source. Tracks which resources it manages and
/// translates record changes into statement deltas.
pub struct EntityManager {
    ds: Arc<dyn DataSource>,
    generator: Arc<InstanceGenerator>,
    context: LoadContext,
    namespaces: Namespaces,
    managed: HashMap<RdfId, Managed>,
    open: bool,
}

impl fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityManager")
            .field("managed", &self.managed.len())
            .field("open", &self.open)
            .finish()
    }
}

fn fire_cascaded(record: &mut Record, op: Cascade, event: LifecycleEvent) -> Result<()> {
    materializer::walk_cascaded_mut(record, op, &mut |r: &mut Record| {
        let metadata = r.metadata().clone();
        metadata.fire(event, r)
    })
}

fn difference(left: &Graph, right: &Graph) -> Graph {
    let mut out = Graph::new();
    for triple in left.iter() {
        if !right.contains(triple) {
            out.insert(triple);
        }
    }
    out
}

impl EntityManager {
    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn data_source(&self) -> &Arc<dyn DataSource> {
        &self.ds
    }

    pub fn generator(&self) -> &Arc<InstanceGenerator> {
        &self.generator
    }

    fn check_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(OrmError::illegal_state("entity manager is closed"))
        }
    }

    /// A fresh record of `type_name`, not yet managed.
    pub fn create(&self, type_name: &str) -> Result<Record> {
        self.generator.instantiate(type_name)
    }

    fn read_graph(&self, metadata: &EntityMetadata) -> Option<NamedNode> {
        metadata
            .named_graph()
            .filter(|_| self.ds.supports_named_graphs())
            .cloned()
    }

    fn write_graph(&self, graph: Option<&NamedNode>) -> Option<NamedNode> {
        match graph {
            Some(g) if self.ds.supports_named_graphs() => Some(g.clone()),
            Some(g) => {
                warn!(
                    "Data source does not support named graphs; writing {} statements to the default graph",
                    g
                );
                None
            }
            None => None,
        }
    }

    fn add_statements(&self, graph: Option<&NamedNode>, triples: &Graph) -> Result<()> {
        if triples.is_empty() {
            return Ok(());
        }
        match self.write_graph(graph) {
            Some(g) => self.ds.add_to(&g, triples),
            None => self.ds.add(triples),
        }
    }

    fn remove_statements(&self, graph: Option<&NamedNode>, triples: &Graph) -> Result<()> {
        if triples.is_empty() {
            return Ok(());
        }
        match self.write_graph(graph) {
            Some(g) => self.ds.remove_from(&g, Some(triples)),
            None => self.ds.remove(triples),
        }
    }

    fn exists(&self, id: &RdfId) -> Result<bool> {
        Ok(!self.ds.statements(Some(id), None, None, None)?.is_empty())
    }

    /// Records the written statements as the provenance of every record in
    /// the cascade and marks them managed.
    fn adopt(&mut self, record: &mut Record, op: Cascade, written: &[RecordStatements]) -> Result<()> {
        let by_id: HashMap<&RdfId, &Graph> = written.iter().map(|s| (&s.id, &s.triples)).collect();
        let mut adopted = vec![];
        materializer::walk_cascaded_mut(record, op, &mut |r: &mut Record| {
            let Some(id) = r.id().cloned() else {
                return Ok(());
            };
            if let Some(triples) = by_id.get(&id) {
                r.set_provenance((*triples).clone(), (*triples).clone());
                r.mark_loaded(true);
                adopted.push((id, r.key(), r.type_name().to_string()));
            }
            Ok(())
        })?;
        for (id, key, type_name) in adopted {
            self.managed.insert(
                id,
                Managed {
                    key,
                    state: EntityState::Managed,
                    type_name,
                },
            );
        }
        Ok(())
    }

    /// Stores a new record and every identifier-less or new record reached
    /// through persist cascades. Records without identifier get a fresh
    /// blank node.
    pub fn persist(&mut self, record: &mut Record) -> Result<()> {
        self.check_open()?;
        if let Some(id) = record.id() {
            if let Some(m) = self.managed.get(id) {
                if m.state == EntityState::Managed {
                    if m.key == record.key() {
                        debug!("{} is already managed", id);
                        return Ok(());
                    }
                    return Err(OrmError::illegal_argument(format!(
                        "{} is already bound to a different managed instance",
                        id
                    )));
                }
            }
            if self.exists(id)? {
                return Err(OrmError::EntityExists(id.clone()));
            }
        }

        fire_cascaded(record, Cascade::Persist, LifecycleEvent::PrePersist)?;

        let ds = self.ds.clone();
        let managed = &self.managed;
        materializer::ensure_ids(record, Cascade::Persist, &mut |_: &Record| -> Result<RdfId> {
            loop {
                let candidate = RdfId::fresh_blank();
                if !managed.contains_key(&candidate)
                    && ds.statements(Some(&candidate), None, None, None)?.is_empty()
                {
                    return Ok(candidate);
                }
            }
        })?;

        let statements = materializer::dematerialize(record, Cascade::Persist)?;
        let mut written = vec![];
        let mut total = 0;
        for (i, rs) in statements.into_iter().enumerate() {
            if i > 0 && (self.managed.contains_key(&rs.id) || self.exists(&rs.id)?) {
                debug!("{} is already stored; not persisting it again", rs.id);
                continue;
            }
            self.add_statements(rs.graph.as_ref(), &rs.triples)?;
            total += rs.triples.len();
            written.push(rs);
        }
        self.adopt(record, Cascade::Persist, &written)?;

        fire_cascaded(record, Cascade::Persist, LifecycleEvent::PostPersist)?;
        info!(
            "Persisted {} records ({} statements) rooted at {} {}",
            written.len(),
            total,
            record.type_name(),
            record.id().map(|id| id.to_string()).unwrap_or_default()
        );
        Ok(())
    }

    /// Loads `id` as `type_name`. A resource without statements is not
    /// found and yields `None`.
    pub fn find(&mut self, type_name: &str, id: &RdfId) -> Result<Option<Record>> {
        self.check_open()?;
        let Some(mut record) = materializer::materialize(&self.context, type_name, id)? else {
            return Ok(None);
        };
        let metadata = record.metadata().clone();
        metadata.fire(LifecycleEvent::PostLoad, &mut record)?;
        self.managed.insert(
            id.clone(),
            Managed {
                key: record.key(),
                state: EntityState::Managed,
                type_name: type_name.to_string(),
            },
        );
        Ok(Some(record))
    }

    /// Statements the store currently holds for the mapped predicates of a
    /// record that was never loaded.
    fn stored_state(&self, rs: &RecordStatements) -> Result<Graph> {
        let layout = self.generator.generate(&rs.type_name)?;
        let metadata = layout.metadata();
        let graph = self.read_graph(metadata);
        let mut out = Graph::new();
        if let Some(class) = metadata.rdf_type() {
            let typed = self.ds.statements(
                Some(&rs.id),
                Some(&TYPE.into_owned()),
                Some(&Term::from(class.clone())),
                graph.as_ref(),
            )?;
            for triple in typed.iter() {
                out.insert(triple);
            }
        }
        for prop in metadata.properties() {
            let found = self
                .ds
                .statements(Some(&rs.id), Some(&prop.predicate), None, graph.as_ref())?;
            for triple in found.iter() {
                out.insert(triple);
            }
        }
        Ok(out)
    }

    /// The statements a record is believed to have in the store.
    fn previous_state(&self, rs: &RecordStatements) -> Result<Graph> {
        let mut old = if rs.loaded {
            rs.provenance.clone()
        } else {
            self.stored_state(rs)?
        };
        if rs.refreshed_links.is_empty() {
            return Ok(old);
        }
        let layout = self.generator.generate(&rs.type_name)?;
        let graph = self.read_graph(layout.metadata());
        let stale: Vec<_> = old
            .iter()
            .filter(|t| rs.refreshed_links.iter().any(|p| p.as_ref() == t.predicate))
            .map(|t| t.into_owned())
            .collect();
        for triple in &stale {
            old.remove(triple);
        }
        for predicate in &rs.refreshed_links {
            let current = self
                .ds
                .statements(Some(&rs.id), Some(predicate), None, graph.as_ref())?;
            for triple in current.iter() {
                old.insert(triple);
            }
        }
        Ok(old)
    }

    /// Writes the changes of `record` and of every record reached through
    /// merge cascades. Only the statements that differ from the previous
    /// state are added or removed. Lazy collections that were never accessed
    /// keep their members.
    pub fn merge(&mut self, record: &mut Record) -> Result<()> {
        self.check_open()?;
        let id = record
            .id()
            .cloned()
            .ok_or_else(|| OrmError::illegal_argument("cannot merge a record without identifier"))?;
        if let Some(m) = self.managed.get(&id) {
            if m.state == EntityState::Removed {
                return Err(OrmError::illegal_argument(format!(
                    "{} has been removed",
                    id
                )));
            }
        }

        fire_cascaded(record, Cascade::Merge, LifecycleEvent::PreUpdate)?;

        let ds = self.ds.clone();
        let managed = &self.managed;
        materializer::ensure_ids(record, Cascade::Merge, &mut |_: &Record| -> Result<RdfId> {
            loop {
                let candidate = RdfId::fresh_blank();
                if !managed.contains_key(&candidate)
                    && ds.statements(Some(&candidate), None, None, None)?.is_empty()
                {
                    return Ok(candidate);
                }
            }
        })?;

        let statements = materializer::dematerialize(record, Cascade::Merge)?;
        let (mut added, mut removed) = (0, 0);
        for rs in &statements {
            let old = self.previous_state(rs)?;
            let to_remove = difference(&old, &rs.triples);
            let to_add = difference(&rs.triples, &old);
            debug!(
                "Merge delta for {}: +{} -{}",
                rs.id,
                to_add.len(),
                to_remove.len()
            );
            self.remove_statements(rs.graph.as_ref(), &to_remove)?;
            self.add_statements(rs.graph.as_ref(), &to_add)?;
            added += to_add.len();
            removed += to_remove.len();
        }
        self.adopt(record, Cascade::Merge, &statements)?;

        fire_cascaded(record, Cascade::Merge, LifecycleEvent::PostUpdate)?;
        info!(
            "Merged {} {}: {} statements added, {} removed",
            record.type_name(),
            id,
            added,
            removed
        );
        Ok(())
    }

    /// Deletes every statement about `record` and about the records reached
    /// through remove cascades.
    pub fn remove(&mut self, record: &mut Record) -> Result<()> {
        self.check_open()?;
        if record.id().is_none() {
            return Err(OrmError::illegal_argument(
                "cannot remove a record without identifier",
            ));
        }
        fire_cascaded(record, Cascade::Remove, LifecycleEvent::PreRemove)?;

        let targets = materializer::cascaded_ids(record, Cascade::Remove);
        let mut total = 0;
        for (id, type_name) in &targets {
            let layout = self.generator.generate(type_name)?;
            let graph = self.read_graph(layout.metadata());
            // read from the graph the removal applies to
            let stored = match &graph {
                Some(g) => self.ds.statements(Some(id), None, None, Some(g))?,
                None => self.ds.default_graph_statements(Some(id), None, None)?,
            };
            total += stored.len();
            match &graph {
                Some(g) => self.ds.remove_from(g, Some(&stored))?,
                None if !stored.is_empty() => self.ds.remove(&stored)?,
                None => {}
            }
            let key = self.managed.get(id).map(|m| m.key).unwrap_or_default();
            self.managed.insert(
                id.clone(),
                Managed {
                    key,
                    state: EntityState::Removed,
                    type_name: type_name.clone(),
                },
            );
        }
        if let Some(m) = record.id().and_then(|id| self.managed.get_mut(id)) {
            m.key = record.key();
        }

        fire_cascaded(record, Cascade::Remove, LifecycleEvent::PostRemove)?;
        info!(
            "Removed {} records ({} statements) rooted at {} {}",
            targets.len(),
            total,
            record.type_name(),
            record.id().map(|id| id.to_string()).unwrap_or_default()
        );
        Ok(())
    }

    /// Reloads `record` from the store, discarding unsaved changes.
    pub fn refresh(&mut self, record: &mut Record) -> Result<()> {
        self.check_open()?;
        let id = record
            .id()
            .cloned()
            .ok_or_else(|| OrmError::illegal_argument("cannot refresh a record without identifier"))?;
        let type_name = record.type_name().to_string();
        let fresh = materializer::materialize(&self.context, &type_name, &id)?.ok_or_else(|| {
            OrmError::illegal_state(format!("{} no longer exists in the data source", id))
        })?;
        record.replace_state(fresh);
        let metadata = record.metadata().clone();
        metadata.fire(LifecycleEvent::PostLoad, record)?;
        self.managed.insert(
            id,
            Managed {
                key: record.key(),
                state: EntityState::Managed,
                type_name,
            },
        );
        Ok(())
    }

    pub fn state_of(&self, record: &Record) -> EntityState {
        let Some(id) = record.id() else {
            return EntityState::New;
        };
        match self.managed.get(id) {
            Some(m) if m.key == record.key() => m.state,
            Some(_) => EntityState::Detached,
            None if record.is_loaded() => EntityState::Detached,
            None => EntityState::New,
        }
    }

    pub fn contains(&self, record: &Record) -> bool {
        self.state_of(record) == EntityState::Managed
    }

    /// Stops managing `record`; later changes are not tracked.
    pub fn detach(&mut self, record: &Record) {
        if let Some(id) = record.id() {
            if let Some(m) = self.managed.get_mut(id) {
                if m.key == record.key() {
                    m.state = EntityState::Detached;
                }
            }
        }
    }

    /// Detaches every managed record.
    pub fn clear(&mut self) {
        debug!("Detaching {} records", self.managed.len());
        self.managed.clear();
    }

    pub fn close(&mut self) {
        self.clear();
        self.open = false;
    }

    /// Identifiers and types of the records currently managed.
    pub fn managed(&self) -> Vec<(RdfId, String)> {
        self.managed
            .iter()
            .filter(|(_, m)| m.state == EntityState::Managed)
            .map(|(id, m)| (id.clone(), m.type_name.clone()))
            .collect()
    }

    /// A query over the data source. Returns raw bindings.
    pub fn create_query(&self, text: &str) -> Result<RdfQuery> {
        self.check_open()?;
        Ok(RdfQuery::new(text, self.ds.clone()).with_namespaces(&self.namespaces))
    }

    /// A query whose `?result` bindings are loaded as `type_name` records.
    /// The type's prefixes are declared in the query.
    pub fn create_typed_query(&self, type_name: &str, text: &str) -> Result<TypedQuery> {
        self.check_open()?;
        let layout = self.generator.generate(type_name)?;
        let query = RdfQuery::new(text, self.ds.clone())
            .with_namespaces(&self.namespaces)
            .with_namespaces(layout.metadata().namespaces());
        Ok(TypedQuery::new(query, type_name, self.context.clone()))
    }

    /// Transaction control, when the data source supports it.
    pub fn get_transaction(&self) -> Option<&dyn SupportsTransactions> {
        self.ds.transactions()
    }

    /// Every statement about `id`, across graphs.
    pub fn describe(&self, id: &RdfId) -> Result<Graph> {
        self.check_open()?;
        self.ds.statements(Some(id), None, None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::memory::MemoryDataSource;
    use crate::schema::{Property, Schema};

    fn factory() -> EntityManagerFactory {
        let index = Arc::new(MetadataIndex::new());
        index.register(
            Schema::entity("Person")
                .rdf_type("http://xmlns.com/foaf/0.1/Person")
                .id_field("id")
                .field("name", Property::new("http://xmlns.com/foaf/0.1/name"))
                .build(),
        );
        let ds: Arc<dyn DataSource> = Arc::new(MemoryDataSource::new().unwrap());
        EntityManagerFactory::new(ds, index)
    }

    #[test]
    fn states_follow_the_lifecycle() {
        let factory = factory();
        let mut em = factory.create_entity_manager();
        let mut person = em.create("Person").unwrap();
        person.set("name", "Ada").unwrap();
        assert_eq!(em.state_of(&person), EntityState::New);
        em.persist(&mut person).unwrap();
        assert!(em.contains(&person));
        // same instance twice is a no-op
        em.persist(&mut person).unwrap();
        em.detach(&person);
        assert_eq!(em.state_of(&person), EntityState::Detached);
        em.merge(&mut person).unwrap();
        assert_eq!(em.state_of(&person), EntityState::Managed);
        em.remove(&mut person).unwrap();
        assert_eq!(em.state_of(&person), EntityState::Removed);
        assert!(em.describe(person.id().unwrap()).unwrap().is_empty());
        em.close();
        let err = em.find("Person", person.id().unwrap()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalState);
    }

    #[test]
    fn persisting_a_stored_id_fails() {
        let factory = factory();
        let mut em = factory.create_entity_manager();
        let id = RdfId::iri("http://example.org/ada").unwrap();
        let mut first = em.create("Person").unwrap().with_id(id.clone()).unwrap();
        first.set("name", "Ada").unwrap();
        em.persist(&mut first).unwrap();

        let mut second = em.create("Person").unwrap().with_id(id.clone()).unwrap();
        let err = em.persist(&mut second).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalArgument);

        let mut other = factory.create_entity_manager();
        let mut third = other.create("Person").unwrap().with_id(id).unwrap();
        assert!(matches!(
            other.persist(&mut third),
            Err(OrmError::EntityExists(_))
        ));
    }
}
