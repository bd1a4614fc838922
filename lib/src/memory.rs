//! An in-memory data source over an oxigraph [`Store`].

use crate::datasource::{
    ConnectionGate, DataSource, MutableDataSource, QueryExecutor, TripleSource,
};
use crate::dialect::{QueryDialect, SPARQL};
use crate::errors::{OrmError, Result};
use crate::identity::RdfId;
use crate::query::{BindingSet, ResultSet};
use crate::util;
use log::{debug, info};
use oxigraph::model::{Graph, GraphNameRef, NamedNode, Term, TripleRef};
use oxigraph::sparql::{QueryResults, SparqlEvaluator};
use oxigraph::store::Store;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub num_graphs: usize,
    pub num_quads: usize,
}

/// Evaluates SPARQL against an in-memory store. Queries see the union of
/// all graphs as their default graph.
pub struct MemoryDataSource {
    store: Store,
    gate: ConnectionGate,
}

impl MemoryDataSource {
    pub fn new() -> Result<Self> {
        Ok(Self::from_store(Store::new()?))
    }

    pub fn from_store(store: Store) -> Self {
        MemoryDataSource {
            store,
            gate: ConnectionGate::default(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Loads an RDF file, into `graph` if given or the default graph.
    pub fn load_file(&self, path: &Path, graph: Option<&NamedNode>) -> Result<usize> {
        let triples = util::read_file(path)?;
        let count = triples.len();
        match graph {
            Some(g) => self.add_to(g, &triples)?,
            None => self.add(&triples)?,
        }
        info!("Loaded {} statements from {}", count, path.display());
        Ok(count)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.gate.check()?;
        Ok(StoreStats {
            num_graphs: self.store.named_graphs().count(),
            num_quads: self.store.len()?,
        })
    }

    fn insert_into(&self, triples: &Graph, graph: GraphNameRef<'_>) -> Result<()> {
        self.gate.check()?;
        for t in triples.iter() {
            self.store.insert(t.in_graph(graph))?;
        }
        Ok(())
    }

    fn remove_in(&self, triples: &Graph, graph: GraphNameRef<'_>) -> Result<()> {
        self.gate.check()?;
        for t in triples.iter() {
            self.store.remove(t.in_graph(graph))?;
        }
        Ok(())
    }

    /// `graph` of `None` matches every graph, including the default one.
    fn matching(
        &self,
        subject: Option<&RdfId>,
        predicate: Option<&NamedNode>,
        object: Option<&Term>,
        graph: Option<GraphNameRef<'_>>,
    ) -> Result<Graph> {
        self.gate.check()?;
        let mut out = Graph::new();
        let quads = self.store.quads_for_pattern(
            subject.map(|s| s.as_ref()),
            predicate.map(|p| p.as_ref()),
            object.map(|o| o.as_ref()),
            graph,
        );
        for quad in quads {
            let quad = quad?;
            out.insert(TripleRef::new(
                quad.subject.as_ref(),
                quad.predicate.as_ref(),
                quad.object.as_ref(),
            ));
        }
        Ok(out)
    }

    fn prepare(&self, query: &str) -> Result<QueryResults> {
        self.gate.check()?;
        let mut prepared = SparqlEvaluator::new()
            .parse_query(query)
            .map_err(|e| OrmError::query(format!("{}\n{}", e, query)))?;
        prepared.dataset_mut().set_default_graph_as_union();
        prepared
            .on_store(&self.store)
            .execute()
            .map_err(|e| OrmError::query(e.to_string()))
    }

    fn collect_graph(results: QueryResults) -> Result<Graph> {
        match results {
            QueryResults::Graph(triples) => {
                let mut graph = Graph::new();
                for triple in triples {
                    let triple = triple.map_err(|e| OrmError::query(e.to_string()))?;
                    graph.insert(&triple);
                }
                Ok(graph)
            }
            _ => Err(OrmError::query("query does not produce a graph")),
        }
    }
}

impl TripleSource for MemoryDataSource {
    fn statements(
        &self,
        subject: Option<&RdfId>,
        predicate: Option<&NamedNode>,
        object: Option<&Term>,
        graph: Option<&NamedNode>,
    ) -> Result<Graph> {
        self.matching(
            subject,
            predicate,
            object,
            graph.map(|g| GraphNameRef::NamedNode(g.as_ref())),
        )
    }

    fn default_graph_statements(
        &self,
        subject: Option<&RdfId>,
        predicate: Option<&NamedNode>,
        object: Option<&Term>,
    ) -> Result<Graph> {
        self.matching(subject, predicate, object, Some(GraphNameRef::DefaultGraph))
    }
}

impl MutableDataSource for MemoryDataSource {
    fn add(&self, triples: &Graph) -> Result<()> {
        self.insert_into(triples, GraphNameRef::DefaultGraph)
    }

    fn remove(&self, triples: &Graph) -> Result<()> {
        self.remove_in(triples, GraphNameRef::DefaultGraph)
    }

    fn add_to(&self, graph: &NamedNode, triples: &Graph) -> Result<()> {
        self.insert_into(triples, GraphNameRef::NamedNode(graph.as_ref()))
    }

    fn remove_from(&self, graph: &NamedNode, triples: Option<&Graph>) -> Result<()> {
        match triples {
            Some(triples) => self.remove_in(triples, GraphNameRef::NamedNode(graph.as_ref())),
            None => {
                self.gate.check()?;
                debug!("Clearing graph {}", graph);
                self.store.clear_graph(graph.as_ref())?;
                Ok(())
            }
        }
    }
}

impl QueryExecutor for MemoryDataSource {
    fn dialect(&self) -> &'static dyn QueryDialect {
        &SPARQL
    }

    fn select(&self, query: &str) -> Result<ResultSet> {
        match self.prepare(query)? {
            QueryResults::Solutions(solutions) => {
                let mut variables: Vec<String> = vec![];
                let mut rows = vec![];
                for solution in solutions {
                    let solution = solution.map_err(|e| OrmError::query(e.to_string()))?;
                    let mut bindings = vec![];
                    for (var, term) in solution.iter() {
                        let name = var.as_str().to_string();
                        if !variables.contains(&name) {
                            variables.push(name.clone());
                        }
                        bindings.push((name, term.clone()));
                    }
                    rows.push(BindingSet::new(bindings));
                }
                Ok(ResultSet::new(variables, rows))
            }
            _ => Err(OrmError::query("not a select query")),
        }
    }

    fn graph_query(&self, query: &str) -> Result<Graph> {
        Self::collect_graph(self.prepare(query)?)
    }

    fn ask(&self, query: &str) -> Result<bool> {
        match self.prepare(query)? {
            QueryResults::Boolean(b) => Ok(b),
            _ => Err(OrmError::query("not an ask query")),
        }
    }

    fn describe(&self, query: &str) -> Result<Graph> {
        Self::collect_graph(self.prepare(query)?)
    }
}

impl DataSource for MemoryDataSource {
    fn connect(&self) -> Result<()> {
        self.gate.open();
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        self.gate.close();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.gate.is_open()
    }

    fn supports_named_graphs(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxigraph::model::{Literal, Triple};

    fn sample() -> Graph {
        let mut g = Graph::new();
        g.insert(&Triple::new(
            NamedNode::new("http://example.org/a").unwrap(),
            NamedNode::new("http://example.org/name").unwrap(),
            Literal::new_simple_literal("A"),
        ));
        g
    }

    #[test]
    fn statements_can_be_scoped_to_graphs() {
        let ds = MemoryDataSource::new().unwrap();
        let g = NamedNode::new("http://example.org/g").unwrap();
        ds.add(&sample()).unwrap();
        ds.add_to(&g, &sample()).unwrap();
        let a = RdfId::iri("http://example.org/a").unwrap();
        assert_eq!(ds.statements(Some(&a), None, None, None).unwrap().len(), 1);
        assert_eq!(ds.statements(Some(&a), None, None, Some(&g)).unwrap().len(), 1);
        assert_eq!(ds.stats().unwrap().num_quads, 2);
        ds.remove(&sample()).unwrap();
        assert_eq!(ds.statements(Some(&a), None, None, None).unwrap().len(), 1);
        assert!(ds
            .default_graph_statements(Some(&a), None, None)
            .unwrap()
            .is_empty());
        ds.add(&sample()).unwrap();
        ds.remove_from(&g, None).unwrap();
        assert_eq!(ds.stats().unwrap().num_quads, 1);
    }

    #[test]
    fn queries_run_against_the_union_graph() {
        let ds = MemoryDataSource::new().unwrap();
        let g = NamedNode::new("http://example.org/g").unwrap();
        ds.add_to(&g, &sample()).unwrap();
        let rows: Vec<BindingSet> = ds
            .select("SELECT ?s WHERE { ?s <http://example.org/name> \"A\" }")
            .unwrap()
            .collect();
        assert_eq!(rows.len(), 1);
        assert!(ds.ask("ASK { ?s ?p ?o }").unwrap());
        let constructed = ds
            .graph_query("CONSTRUCT { ?s ?p ?o } WHERE { ?s ?p ?o }")
            .unwrap();
        assert_eq!(constructed.len(), 1);
        assert!(ds.select("SELEC nonsense").is_err());
    }

    #[test]
    fn disconnected_sources_refuse_work() {
        let ds = MemoryDataSource::new().unwrap();
        ds.disconnect().unwrap();
        assert!(!ds.is_connected());
        let err = ds.add(&sample()).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::IllegalState);
        ds.connect().unwrap();
        ds.add(&sample()).unwrap();
    }
}
