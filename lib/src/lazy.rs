//! Deferred loading of relational collections.
//!
//! A [`LazyCollection`] starts out knowing only the identifiers of its
//! members, as seen in the owner's provenance. The first access that needs
//! the members (iteration, size, membership, mutation) queries the bound
//! source for `(owner, predicate, ?member)` and materializes every member.
//! A failed load leaves the handle uninitialized so the next access retries.

use crate::errors::{OrmError, Result};
use crate::identity::RdfId;
use crate::instance::InstanceGenerator;
use crate::materializer::{self, StatementSource};
use crate::options::CollectionKind;
use crate::value::{Collection, Value};
use log::{debug, warn};
use oxigraph::model::NamedNode;
use std::fmt;
use std::sync::Arc;

/// What a lazy collection needs to load itself.
#[derive(Clone)]
pub struct LoadContext {
    pub source: Arc<dyn StatementSource>,
    pub generator: Arc<InstanceGenerator>,
}

impl LoadContext {
    pub fn new(source: Arc<dyn StatementSource>, generator: Arc<InstanceGenerator>) -> Self {
        LoadContext { source, generator }
    }
}

impl fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LoadContext")
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LoadState {
    Uninitialized,
    Materializing,
    Materialized,
}

#[derive(Debug, Clone)]
enum Backing {
    Uninitialized,
    Materializing,
    Materialized(Collection),
}

#[derive(Debug, Clone)]
pub struct LazyCollection {
    owner: RdfId,
    predicate: NamedNode,
    target: String,
    kind: CollectionKind,
    graph: Option<NamedNode>,
    known: Vec<RdfId>,
    backing: Backing,
    context: LoadContext,
}

impl LazyCollection {
    pub fn new(
        owner: RdfId,
        predicate: NamedNode,
        target: impl Into<String>,
        kind: CollectionKind,
        known: Vec<RdfId>,
        context: LoadContext,
    ) -> Self {
        LazyCollection {
            owner,
            predicate,
            target: target.into(),
            kind,
            graph: None,
            known,
            backing: Backing::Uninitialized,
            context,
        }
    }

    /// Restricts loading to a named graph.
    pub fn in_graph(mut self, graph: Option<NamedNode>) -> Self {
        self.graph = graph;
        self
    }

    pub fn owner(&self) -> &RdfId {
        &self.owner
    }

    pub fn predicate(&self) -> &NamedNode {
        &self.predicate
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    /// Member identifiers known from provenance at creation time.
    pub fn known_ids(&self) -> &[RdfId] {
        &self.known
    }

    pub fn state(&self) -> LoadState {
        match self.backing {
            Backing::Uninitialized => LoadState::Uninitialized,
            Backing::Materializing => LoadState::Materializing,
            Backing::Materialized(_) => LoadState::Materialized,
        }
    }

    pub fn is_materialized(&self) -> bool {
        self.state() == LoadState::Materialized
    }

    /// The loaded members, if the collection has been materialized.
    pub fn materialized(&self) -> Option<&Collection> {
        match &self.backing {
            Backing::Materialized(c) => Some(c),
            _ => None,
        }
    }

    pub fn materialized_mut(&mut self) -> Option<&mut Collection> {
        match &mut self.backing {
            Backing::Materialized(c) => Some(c),
            _ => None,
        }
    }

    /// Loads the members on first call; later calls reuse them.
    pub fn force(&mut self) -> Result<&mut Collection> {
        match self.backing {
            Backing::Materializing => {
                return Err(OrmError::illegal_state(format!(
                    "collection {} of {} is already loading",
                    self.predicate, self.owner
                )))
            }
            Backing::Uninitialized => {
                self.backing = Backing::Materializing;
                match self.load() {
                    Ok(collection) => self.backing = Backing::Materialized(collection),
                    Err(e) => {
                        self.backing = Backing::Uninitialized;
                        warn!(
                            "Loading collection {} of {} failed: {}",
                            self.predicate, self.owner, e
                        );
                        return Err(e);
                    }
                }
            }
            Backing::Materialized(_) => {}
        }
        self.materialized_mut()
            .ok_or_else(|| OrmError::illegal_state("collection is not materialized"))
    }

    fn load(&self) -> Result<Collection> {
        debug!(
            "Materializing lazy collection {} of {} as {}",
            self.predicate, self.owner, self.target
        );
        let objects =
            self.context
                .source
                .objects(&self.owner, &self.predicate, self.graph.as_ref())?;
        let mut collection = Collection::new(self.kind);
        for object in objects {
            let Some(member) = RdfId::from_term(object.as_ref()) else {
                warn!(
                    "Skipping literal {} in relational collection {}",
                    object, self.predicate
                );
                continue;
            };
            let record = materializer::materialize_reference(&self.context, &self.target, &member)?;
            collection.push(Value::from(record));
        }
        Ok(collection)
    }

    pub fn values(&mut self) -> Result<&Collection> {
        Ok(&*self.force()?)
    }

    pub fn len(&mut self) -> Result<usize> {
        Ok(self.force()?.len())
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.force()?.is_empty())
    }

    pub fn contains(&mut self, value: &Value) -> Result<bool> {
        Ok(self.force()?.contains(value))
    }

    pub fn push(&mut self, value: Value) -> Result<bool> {
        Ok(self.force()?.push(value))
    }

    pub fn remove(&mut self, value: &Value) -> Result<bool> {
        Ok(self.force()?.remove(value))
    }
}
