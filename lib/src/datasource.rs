//! The interfaces store adapters implement.
//!
//! A data source is read at the statement level ([`TripleSource`]), written
//! through [`MutableDataSource`] and queried through [`QueryExecutor`].
//! Sources with native or emulated transactions also expose
//! [`SupportsTransactions`]. Every method takes `&self`; adapters use
//! interior mutability and a [`ConnectionGate`].

use crate::dialect::QueryDialect;
use crate::errors::{OrmError, Result};
use crate::identity::RdfId;
use crate::materializer::StatementSource;
use crate::query::ResultSet;
use oxigraph::model::{Graph, NamedNode, Term};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub trait TripleSource: Send + Sync {
    /// Statements matching the pattern; `None` is a wildcard. Without a
    /// graph every graph is searched.
    fn statements(
        &self,
        subject: Option<&RdfId>,
        predicate: Option<&NamedNode>,
        object: Option<&Term>,
        graph: Option<&NamedNode>,
    ) -> Result<Graph>;

    /// Like [`TripleSource::statements`] but restricted to the default
    /// graph, the one `add` and `remove` write to. Sources without named
    /// graphs have nothing else to search.
    fn default_graph_statements(
        &self,
        subject: Option<&RdfId>,
        predicate: Option<&NamedNode>,
        object: Option<&Term>,
    ) -> Result<Graph> {
        self.statements(subject, predicate, object, None)
    }
}

pub trait MutableDataSource: TripleSource {
    /// Adds statements to the default graph.
    fn add(&self, triples: &Graph) -> Result<()>;

    /// Removes statements from the default graph.
    fn remove(&self, triples: &Graph) -> Result<()>;

    fn add_to(&self, graph: &NamedNode, _triples: &Graph) -> Result<()> {
        Err(OrmError::data_source(format!(
            "named graph {} is not supported by this data source",
            graph
        )))
    }

    /// Removes `triples` from a named graph, or clears it when `None`.
    fn remove_from(&self, graph: &NamedNode, _triples: Option<&Graph>) -> Result<()> {
        Err(OrmError::data_source(format!(
            "named graph {} is not supported by this data source",
            graph
        )))
    }
}

pub trait QueryExecutor: Send + Sync {
    fn dialect(&self) -> &'static dyn QueryDialect;

    fn select(&self, query: &str) -> Result<ResultSet>;

    /// Evaluates a CONSTRUCT (or equivalent) query.
    fn graph_query(&self, query: &str) -> Result<Graph>;

    fn ask(&self, query: &str) -> Result<bool>;

    fn describe(&self, query: &str) -> Result<Graph>;
}

pub trait SupportsTransactions: Send + Sync {
    fn begin(&self) -> Result<()>;

    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;

    fn is_active(&self) -> bool;
}

pub trait DataSource: MutableDataSource + QueryExecutor {
    fn connect(&self) -> Result<()>;

    fn disconnect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    fn supports_named_graphs(&self) -> bool {
        false
    }

    fn transactions(&self) -> Option<&dyn SupportsTransactions> {
        None
    }
}

/// Connected/disconnected flag shared by adapters.
#[derive(Debug)]
pub struct ConnectionGate(AtomicBool);

impl Default for ConnectionGate {
    fn default() -> Self {
        ConnectionGate(AtomicBool::new(true))
    }
}

impl ConnectionGate {
    pub fn new(connected: bool) -> Self {
        ConnectionGate(AtomicBool::new(connected))
    }

    pub fn open(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fails fast when the source is disconnected.
    pub fn check(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(OrmError::illegal_state("data source is not connected"))
        }
    }
}

/// Adapts a data source to the statement-level reads the materializer uses.
#[derive(Clone)]
pub struct SourceStatements(pub Arc<dyn DataSource>);

impl StatementSource for SourceStatements {
    fn describe(&self, id: &RdfId, graph: Option<&NamedNode>) -> Result<Graph> {
        self.0.statements(Some(id), None, None, graph)
    }

    fn objects(
        &self,
        subject: &RdfId,
        predicate: &NamedNode,
        graph: Option<&NamedNode>,
    ) -> Result<Vec<Term>> {
        let statements = self.0.statements(Some(subject), Some(predicate), None, graph)?;
        Ok(statements.iter().map(|t| t.object.into_owned()).collect())
    }

    fn supports_named_graphs(&self) -> bool {
        self.0.supports_named_graphs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_gate_fails_fast() {
        let gate = ConnectionGate::default();
        assert!(gate.check().is_ok());
        gate.close();
        let err = gate.check().unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::IllegalState);
        gate.open();
        assert!(gate.is_open());
    }
}
