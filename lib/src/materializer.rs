//! Conversion between statements and records.
//!
//! Reading walks the resolved properties of a type and picks the matching
//! statements about the subject, converting literals through the value table
//! and resources into nested records. Every record remembers which
//! statements it was built from (see [`Record::instance_triples`]).
//!
//! Writing emits one statement per value and follows relations that cascade
//! the operation being performed. Both directions break cycles with a
//! visited set keyed by identifier. When reading, the set holds only the
//! records on the current path, so a resource reached twice without a cycle
//! is loaded in full both times.

use crate::consts::{OWL_THING, TYPE};
use crate::errors::{OrmError, Result};
use crate::identity::RdfId;
use crate::instance::{PropertyValue, Record, RecordType};
use crate::lazy::{LazyCollection, LoadContext};
use crate::metadata::{EntityMetadata, PropertyMetadata};
use crate::options::{Cardinality, Cascade};
use crate::value::{Collection, Value};
use log::{debug, warn};
use oxigraph::model::{Graph, NamedNode, Term, TermRef, TripleRef};
use std::collections::HashSet;
use std::sync::Arc;

/// Read access to statements, as needed by the materializer and by lazy
/// collections.
pub trait StatementSource: Send + Sync {
    /// Every statement whose subject is `id`, optionally restricted to a
    /// named graph.
    fn describe(&self, id: &RdfId, graph: Option<&NamedNode>) -> Result<Graph>;

    /// Objects of `(subject, predicate, ?o)`.
    fn objects(
        &self,
        subject: &RdfId,
        predicate: &NamedNode,
        graph: Option<&NamedNode>,
    ) -> Result<Vec<Term>> {
        let statements = self.describe(subject, graph)?;
        Ok(statements
            .objects_for_subject_predicate(subject.as_ref(), predicate.as_ref())
            .map(TermRef::into_owned)
            .collect())
    }

    fn supports_named_graphs(&self) -> bool {
        false
    }
}

impl StatementSource for Graph {
    fn describe(&self, id: &RdfId, _graph: Option<&NamedNode>) -> Result<Graph> {
        let mut out = Graph::new();
        for triple in self.triples_for_subject(id.as_ref()) {
            out.insert(triple);
        }
        Ok(out)
    }
}

/// The graph statements of a type are read from, if the source can scope
/// reads to named graphs.
pub fn graph_for(source: &dyn StatementSource, metadata: &EntityMetadata) -> Option<NamedNode> {
    metadata
        .named_graph()
        .filter(|_| source.supports_named_graphs())
        .cloned()
}

/// Loads `id` as `type_name`. Returns `None` when the source holds no
/// statements about the resource.
pub fn materialize(ctx: &LoadContext, type_name: &str, id: &RdfId) -> Result<Option<Record>> {
    let layout = ctx.generator.generate(type_name)?;
    let graph = graph_for(ctx.source.as_ref(), layout.metadata());
    let statements = ctx.source.describe(id, graph.as_ref())?;
    if statements.is_empty() {
        debug!("No statements about {} in the source", id);
        return Ok(None);
    }
    let mut visited = HashSet::new();
    populate(ctx, &layout, id, statements, &mut visited).map(Some)
}

/// Loads a referenced resource. A resource without statements still yields
/// a record carrying just its identifier.
pub fn materialize_reference(ctx: &LoadContext, type_name: &str, id: &RdfId) -> Result<Record> {
    load_nested(ctx, type_name, id, &mut HashSet::new())
}

fn load_nested(
    ctx: &LoadContext,
    type_name: &str,
    id: &RdfId,
    visited: &mut HashSet<RdfId>,
) -> Result<Record> {
    let layout = ctx.generator.generate(type_name)?;
    if visited.contains(id) {
        return Ok(layout.reference(id.clone()));
    }
    let graph = graph_for(ctx.source.as_ref(), layout.metadata());
    let statements = ctx.source.describe(id, graph.as_ref())?;
    populate(ctx, &layout, id, statements, visited)
}

/// Builds a record of `layout` for `id` out of `statements`. `id` counts as
/// visited only while its own properties are being loaded.
pub fn populate(
    ctx: &LoadContext,
    layout: &Arc<RecordType>,
    id: &RdfId,
    statements: Graph,
    visited: &mut HashSet<RdfId>,
) -> Result<Record> {
    let entered = visited.insert(id.clone());
    let record = fill(ctx, layout, id, statements, visited);
    if entered {
        visited.remove(id);
    }
    record
}

fn fill(
    ctx: &LoadContext,
    layout: &Arc<RecordType>,
    id: &RdfId,
    statements: Graph,
    visited: &mut HashSet<RdfId>,
) -> Result<Record> {
    let metadata = layout.metadata().clone();
    let subject = id.as_ref();
    let mut record = layout.instantiate();
    record.set_id(id.clone())?;
    let mut instance = Graph::new();

    if let Some(class) = metadata.rdf_type() {
        let typed = TripleRef::new(subject, TYPE, class.as_ref());
        if statements.contains(typed) {
            instance.insert(typed);
        }
    }

    for (slot, prop) in metadata.properties().iter().enumerate() {
        let objects: Vec<Term> = statements
            .objects_for_subject_predicate(subject, prop.predicate.as_ref())
            .map(TermRef::into_owned)
            .collect();
        let Some(first) = objects.first() else {
            continue;
        };
        for object in &objects {
            instance.insert(TripleRef::new(subject, prop.predicate.as_ref(), object.as_ref()));
        }
        let value = match prop.cardinality {
            Cardinality::Single => {
                if objects.len() > 1 {
                    warn!(
                        "{} values for single-valued {}.{} on {}; keeping {}",
                        objects.len(),
                        metadata.name(),
                        prop.name,
                        id,
                        first
                    );
                }
                PropertyValue::Single(convert(ctx, prop, first.as_ref(), visited)?)
            }
            Cardinality::Many(kind) if prop.is_lazy_collection() => {
                let known = objects
                    .iter()
                    .filter_map(|o| RdfId::from_term(o.as_ref()))
                    .collect();
                let target = prop.target.clone().unwrap_or_default();
                let lazy = LazyCollection::new(
                    id.clone(),
                    prop.predicate.clone(),
                    target,
                    kind,
                    known,
                    ctx.clone(),
                )
                .in_graph(graph_for(ctx.source.as_ref(), &metadata));
                PropertyValue::Lazy(lazy)
            }
            Cardinality::Many(kind) => {
                let mut collection = Collection::new(kind);
                for object in &objects {
                    collection.push(convert(ctx, prop, object.as_ref(), visited)?);
                }
                PropertyValue::Many(collection)
            }
        };
        record.put(slot, Some(value));
    }

    debug!(
        "Materialized {} {} from {} statements ({} consumed)",
        metadata.name(),
        id,
        statements.len(),
        instance.len()
    );
    record.set_provenance(statements, instance);
    record.mark_loaded(true);
    Ok(record)
}

fn convert(
    ctx: &LoadContext,
    prop: &PropertyMetadata,
    term: TermRef<'_>,
    visited: &mut HashSet<RdfId>,
) -> Result<Value> {
    let resource = match term {
        TermRef::Literal(lit) if lit.datatype() == OWL_THING => RdfId::iri(lit.value()).ok(),
        other => RdfId::from_term(other),
    };
    match (&prop.target, resource) {
        (Some(target), Some(member)) => Ok(Value::from(load_nested(ctx, target, &member, visited)?)),
        (Some(target), None) => {
            warn!(
                "Expected a {} reference for {}, found literal {}",
                target, prop.name, term
            );
            Ok(Value::from_term(term))
        }
        (None, Some(member)) => Ok(Value::Resource(member)),
        (None, None) => Ok(Value::from_term(term)),
    }
}

/// The statements written for one record.
#[derive(Debug, Clone)]
pub struct RecordStatements {
    pub id: RdfId,
    pub type_name: String,
    /// The named graph declared for the record's type.
    pub graph: Option<NamedNode>,
    pub triples: Graph,
    /// Instance triples of the record as it was last loaded.
    pub provenance: Graph,
    pub loaded: bool,
    /// Predicates of materialized lazy collections; the previous links for
    /// these must be read from the store rather than from provenance.
    pub refreshed_links: Vec<NamedNode>,
}

/// Serializes `record` and every entity reached through relations that
/// cascade `op`. A related entity reached without the cascade contributes
/// only the link. Records come back in visiting order, root first.
pub fn dematerialize(record: &Record, op: Cascade) -> Result<Vec<RecordStatements>> {
    let mut out = vec![];
    emit(record, op, &mut HashSet::new(), &mut out)?;
    Ok(out)
}

/// All statements of [`dematerialize`] in one graph.
pub fn dematerialize_graph(record: &Record, op: Cascade) -> Result<Graph> {
    let mut graph = Graph::new();
    for statements in dematerialize(record, op)? {
        for triple in statements.triples.iter() {
            graph.insert(triple);
        }
    }
    Ok(graph)
}

fn emit(
    record: &Record,
    op: Cascade,
    visited: &mut HashSet<RdfId>,
    out: &mut Vec<RecordStatements>,
) -> Result<()> {
    let id = record.id().ok_or_else(|| {
        OrmError::illegal_state(format!(
            "{} has no identifier and is not reached through a cascade",
            record.type_name()
        ))
    })?;
    if record.is_reference_only() || !visited.insert(id.clone()) {
        return Ok(());
    }
    let metadata = record.metadata();
    let subject = id.as_ref();
    let mut triples = Graph::new();
    let mut nested: Vec<&Record> = vec![];
    let mut refreshed_links = vec![];

    if let Some(class) = metadata.rdf_type() {
        triples.insert(TripleRef::new(subject, TYPE, class.as_ref()));
    }

    for (prop, value) in record.slots() {
        let Some(value) = value else {
            continue;
        };
        let cascades = prop.cascade.contains(op);
        let mut write = |value: &Value| -> Result<()> {
            let datatype = prop.datatype.as_ref().map(|d| d.as_ref());
            let term = value.to_term(datatype).map_err(|e| match value {
                Value::Entity(_) => OrmError::illegal_state(format!(
                    "{}.{} references an entity without identifier and does not cascade {:?}",
                    metadata.name(),
                    prop.name,
                    op
                )),
                _ => e,
            })?;
            triples.insert(TripleRef::new(subject, prop.predicate.as_ref(), term.as_ref()));
            Ok(())
        };
        match value {
            PropertyValue::Single(v) => {
                write(v)?;
                if let (true, Value::Entity(r)) = (cascades, v) {
                    nested.push(r);
                }
            }
            PropertyValue::Many(c) => {
                for v in c {
                    write(v)?;
                    if let (true, Value::Entity(r)) = (cascades, v) {
                        nested.push(r);
                    }
                }
            }
            PropertyValue::Lazy(lazy) => match lazy.materialized() {
                Some(c) => {
                    refreshed_links.push(prop.predicate.clone());
                    for v in c {
                        write(v)?;
                        if let (true, Value::Entity(r)) = (cascades, v) {
                            nested.push(r);
                        }
                    }
                }
                None => {
                    for member in lazy.known_ids() {
                        let term = member.to_term();
                        triples.insert(TripleRef::new(
                            subject,
                            prop.predicate.as_ref(),
                            term.as_ref(),
                        ));
                    }
                }
            },
        }
    }

    debug!(
        "Dematerialized {} {} into {} statements",
        metadata.name(),
        id,
        triples.len()
    );
    out.push(RecordStatements {
        id: id.clone(),
        type_name: metadata.name().to_string(),
        graph: metadata.named_graph().cloned(),
        triples,
        provenance: record.instance_triples().clone(),
        loaded: record.is_loaded(),
        refreshed_links,
    });
    for child in nested {
        emit(child, op, visited, out)?;
    }
    Ok(())
}

/// Applies `f` to `record` and to every entity reachable through relations
/// cascading `op`, parents before children. Uninitialized lazy collections
/// are not entered.
pub fn walk_cascaded_mut(
    record: &mut Record,
    op: Cascade,
    f: &mut dyn FnMut(&mut Record) -> Result<()>,
) -> Result<()> {
    if record.is_reference_only() {
        return Ok(());
    }
    f(record)?;
    let metadata = record.metadata().clone();
    for (slot, prop) in metadata.properties().iter().enumerate() {
        if !prop.is_relation() || !prop.cascade.contains(op) {
            continue;
        }
        let collection = match record.slot_mut(slot) {
            Some(PropertyValue::Single(Value::Entity(child))) => {
                walk_cascaded_mut(child, op, f)?;
                continue;
            }
            Some(PropertyValue::Many(c)) => c,
            Some(PropertyValue::Lazy(lazy)) => match lazy.materialized_mut() {
                Some(c) => c,
                None => continue,
            },
            _ => continue,
        };
        for value in collection.items_mut() {
            if let Value::Entity(child) = value {
                walk_cascaded_mut(child, op, f)?;
            }
        }
        collection.normalize();
    }
    Ok(())
}

/// Gives every identifier-less record reached through `op` cascades an
/// identifier from `allocate`.
pub fn ensure_ids(
    record: &mut Record,
    op: Cascade,
    allocate: &mut dyn FnMut(&Record) -> Result<RdfId>,
) -> Result<()> {
    walk_cascaded_mut(record, op, &mut |r: &mut Record| {
        if r.id().is_none() {
            let id = allocate(r)?;
            debug!("Assigned {} to new {}", id, r.type_name());
            r.set_id(id)?;
        }
        Ok(())
    })
}

/// Identifiers and types of `record` and of everything reachable through
/// relations cascading `op`, root first. Uninitialized lazy collections
/// contribute their known member identifiers.
pub fn cascaded_ids(record: &Record, op: Cascade) -> Vec<(RdfId, String)> {
    let mut out = vec![];
    let mut seen = HashSet::new();
    collect_ids(record, op, &mut seen, &mut out);
    out
}

fn collect_ids(
    record: &Record,
    op: Cascade,
    seen: &mut HashSet<RdfId>,
    out: &mut Vec<(RdfId, String)>,
) {
    let Some(id) = record.id() else {
        return;
    };
    if !seen.insert(id.clone()) {
        return;
    }
    out.push((id.clone(), record.type_name().to_string()));
    for (prop, value) in record.slots() {
        let (Some(target), Some(value)) = (&prop.target, value) else {
            continue;
        };
        if !prop.cascade.contains(op) {
            continue;
        }
        let mut visit = |v: &Value| match v {
            Value::Entity(child) => collect_ids(child, op, seen, out),
            Value::Resource(member) => {
                if seen.insert(member.clone()) {
                    out.push((member.clone(), target.clone()));
                }
            }
            _ => {}
        };
        match value {
            PropertyValue::Single(v) => visit(v),
            PropertyValue::Many(c) => c.iter().for_each(&mut visit),
            PropertyValue::Lazy(lazy) => match lazy.materialized() {
                Some(c) => c.iter().for_each(&mut visit),
                None => {
                    for member in lazy.known_ids() {
                        if seen.insert(member.clone()) {
                            out.push((member.clone(), target.clone()));
                        }
                    }
                }
            },
        }
    }
}
