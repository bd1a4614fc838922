//! Compensating transactions for data sources without native ones.
//!
//! While a transaction is open every write is applied immediately and its
//! inverse is appended to an undo log. `commit` discards the log and
//! `rollback` replays it in reverse. If the replay fails partway the store
//! keeps the writes that were not undone yet; the error says how many.

use crate::datasource::{
    DataSource, MutableDataSource, QueryExecutor, SupportsTransactions, TripleSource,
};
use crate::dialect::QueryDialect;
use crate::errors::{OrmError, Result};
use crate::identity::RdfId;
use crate::query::ResultSet;
use log::{debug, error, info};
use oxigraph::model::{Graph, NamedNode, Term};
use std::sync::Mutex;

#[derive(Debug)]
enum Undo {
    /// Statements that were added and must be removed again.
    Added(Option<NamedNode>, Graph),
    /// Statements that were removed and must be put back.
    Removed(Option<NamedNode>, Graph),
}

/// Wraps any data source with an undo-log transaction.
pub struct TransactionalDataSource<D> {
    inner: D,
    log: Mutex<Option<Vec<Undo>>>,
}

impl<D: DataSource> TransactionalDataSource<D> {
    pub fn new(inner: D) -> Self {
        TransactionalDataSource {
            inner,
            log: Mutex::new(None),
        }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    fn record(&self, undo: Undo) -> Result<()> {
        let mut log = self
            .log
            .lock()
            .map_err(|_| OrmError::data_source("transaction log poisoned"))?;
        if let Some(entries) = log.as_mut() {
            entries.push(undo);
        }
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.log.lock().map(|l| l.is_some()).unwrap_or(false)
    }

    /// Splits `triples` into the ones present in `graph` (the default graph
    /// when `None`) and the ones absent.
    fn partition(&self, triples: &Graph, graph: Option<&NamedNode>) -> Result<(Graph, Graph)> {
        let mut present = Graph::new();
        let mut absent = Graph::new();
        for t in triples.iter() {
            let subject = RdfId::from(t.subject);
            let predicate = t.predicate.into_owned();
            let object = t.object.into_owned();
            let found = match graph {
                Some(g) => self.inner.statements(
                    Some(&subject),
                    Some(&predicate),
                    Some(&object),
                    Some(g),
                )?,
                None => self.inner.default_graph_statements(
                    Some(&subject),
                    Some(&predicate),
                    Some(&object),
                )?,
            };
            if found.is_empty() {
                absent.insert(t);
            } else {
                present.insert(t);
            }
        }
        Ok((present, absent))
    }

    fn apply_add(&self, graph: Option<&NamedNode>, triples: &Graph) -> Result<()> {
        match graph {
            Some(g) => self.inner.add_to(g, triples),
            None => self.inner.add(triples),
        }
    }

    fn apply_remove(&self, graph: Option<&NamedNode>, triples: &Graph) -> Result<()> {
        match graph {
            Some(g) => self.inner.remove_from(g, Some(triples)),
            None => self.inner.remove(triples),
        }
    }

    fn tracked_add(&self, graph: Option<&NamedNode>, triples: &Graph) -> Result<()> {
        if !self.in_transaction() {
            return self.apply_add(graph, triples);
        }
        let (_, fresh) = self.partition(triples, graph)?;
        self.apply_add(graph, triples)?;
        self.record(Undo::Added(graph.cloned(), fresh))
    }

    fn tracked_remove(&self, graph: Option<&NamedNode>, triples: &Graph) -> Result<()> {
        if !self.in_transaction() {
            return self.apply_remove(graph, triples);
        }
        let (existing, _) = self.partition(triples, graph)?;
        self.apply_remove(graph, triples)?;
        self.record(Undo::Removed(graph.cloned(), existing))
    }
}

impl<D: DataSource> SupportsTransactions for TransactionalDataSource<D> {
    fn begin(&self) -> Result<()> {
        let mut log = self
            .log
            .lock()
            .map_err(|_| OrmError::data_source("transaction log poisoned"))?;
        if log.is_some() {
            return Err(OrmError::data_source("transaction already active"));
        }
        debug!("Transaction started");
        *log = Some(vec![]);
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut log = self
            .log
            .lock()
            .map_err(|_| OrmError::data_source("transaction log poisoned"))?;
        match log.take() {
            Some(entries) => {
                debug!("Transaction committed ({} writes)", entries.len());
                Ok(())
            }
            None => Err(OrmError::data_source("commit without an active transaction")),
        }
    }

    fn rollback(&self) -> Result<()> {
        let entries = {
            let mut log = self
                .log
                .lock()
                .map_err(|_| OrmError::data_source("transaction log poisoned"))?;
            log.take()
                .ok_or_else(|| OrmError::data_source("rollback without an active transaction"))?
        };
        let total = entries.len();
        for (done, undo) in entries.iter().rev().enumerate() {
            let replayed = match undo {
                Undo::Added(graph, triples) => self.apply_remove(graph.as_ref(), triples),
                Undo::Removed(graph, triples) => self.apply_add(graph.as_ref(), triples),
            };
            if let Err(e) = replayed {
                error!(
                    "Rollback failed after undoing {} of {} writes: {}",
                    done, total, e
                );
                return Err(OrmError::data_source(format!(
                    "rollback incomplete, {} of {} writes were not undone: {}",
                    total - done,
                    total,
                    e
                )));
            }
        }
        info!("Rolled back {} writes", total);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.in_transaction()
    }
}

impl<D: DataSource> TripleSource for TransactionalDataSource<D> {
    fn statements(
        &self,
        subject: Option<&RdfId>,
        predicate: Option<&NamedNode>,
        object: Option<&Term>,
        graph: Option<&NamedNode>,
    ) -> Result<Graph> {
        self.inner.statements(subject, predicate, object, graph)
    }

    fn default_graph_statements(
        &self,
        subject: Option<&RdfId>,
        predicate: Option<&NamedNode>,
        object: Option<&Term>,
    ) -> Result<Graph> {
        self.inner.default_graph_statements(subject, predicate, object)
    }
}

impl<D: DataSource> MutableDataSource for TransactionalDataSource<D> {
    fn add(&self, triples: &Graph) -> Result<()> {
        self.tracked_add(None, triples)
    }

    fn remove(&self, triples: &Graph) -> Result<()> {
        self.tracked_remove(None, triples)
    }

    fn add_to(&self, graph: &NamedNode, triples: &Graph) -> Result<()> {
        self.tracked_add(Some(graph), triples)
    }

    fn remove_from(&self, graph: &NamedNode, triples: Option<&Graph>) -> Result<()> {
        match triples {
            Some(triples) => self.tracked_remove(Some(graph), triples),
            None => {
                let all = self.inner.statements(None, None, None, Some(graph))?;
                self.tracked_remove(Some(graph), &all)
            }
        }
    }
}

impl<D: DataSource> QueryExecutor for TransactionalDataSource<D> {
    fn dialect(&self) -> &'static dyn QueryDialect {
        self.inner.dialect()
    }

    fn select(&self, query: &str) -> Result<ResultSet> {
        self.inner.select(query)
    }

    fn graph_query(&self, query: &str) -> Result<Graph> {
        self.inner.graph_query(query)
    }

    fn ask(&self, query: &str) -> Result<bool> {
        self.inner.ask(query)
    }

    fn describe(&self, query: &str) -> Result<Graph> {
        self.inner.describe(query)
    }
}

impl<D: DataSource> DataSource for TransactionalDataSource<D> {
    fn connect(&self) -> Result<()> {
        self.inner.connect()
    }

    fn disconnect(&self) -> Result<()> {
        self.inner.disconnect()
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn supports_named_graphs(&self) -> bool {
        self.inner.supports_named_graphs()
    }

    fn transactions(&self) -> Option<&dyn SupportsTransactions> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::memory::MemoryDataSource;
    use oxigraph::model::{Literal, Triple};

    fn triple(s: &str, o: &str) -> Graph {
        let mut g = Graph::new();
        g.insert(&Triple::new(
            NamedNode::new(format!("http://example.org/{}", s)).unwrap(),
            NamedNode::new("http://example.org/p").unwrap(),
            Literal::new_simple_literal(o),
        ));
        g
    }

    fn count(ds: &impl TripleSource) -> usize {
        ds.statements(None, None, None, None).unwrap().len()
    }

    #[test]
    fn rollback_restores_previous_state() {
        let ds = TransactionalDataSource::new(MemoryDataSource::new().unwrap());
        ds.add(&triple("keep", "1")).unwrap();
        ds.begin().unwrap();
        ds.add(&triple("new", "2")).unwrap();
        // already present, must survive the rollback
        ds.add(&triple("keep", "1")).unwrap();
        ds.remove(&triple("keep", "1")).unwrap();
        assert_eq!(count(&ds), 1);
        ds.rollback().unwrap();
        assert_eq!(count(&ds), 1);
        assert_eq!(
            ds.statements(None, None, None, None).unwrap(),
            triple("keep", "1")
        );
        assert!(!ds.is_active());
    }

    #[test]
    fn named_graph_copies_do_not_count_as_default_graph_writes() {
        let ds = TransactionalDataSource::new(MemoryDataSource::new().unwrap());
        let g = NamedNode::new("http://example.org/g").unwrap();
        ds.inner().add_to(&g, &triple("s", "o")).unwrap();

        ds.begin().unwrap();
        ds.add(&triple("s", "o")).unwrap();
        assert_eq!(ds.inner().stats().unwrap().num_quads, 2);
        ds.rollback().unwrap();
        assert_eq!(ds.inner().stats().unwrap().num_quads, 1);

        ds.begin().unwrap();
        ds.remove(&triple("s", "o")).unwrap();
        ds.rollback().unwrap();
        assert_eq!(ds.inner().stats().unwrap().num_quads, 1);
        assert!(ds
            .default_graph_statements(None, None, None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn out_of_sequence_calls_fail() {
        let ds = TransactionalDataSource::new(MemoryDataSource::new().unwrap());
        assert_eq!(ds.commit().unwrap_err().kind(), ErrorKind::DataSourceFault);
        assert_eq!(ds.rollback().unwrap_err().kind(), ErrorKind::DataSourceFault);
        ds.begin().unwrap();
        assert_eq!(ds.begin().unwrap_err().kind(), ErrorKind::DataSourceFault);
        ds.add(&triple("a", "1")).unwrap();
        ds.commit().unwrap();
        assert_eq!(count(&ds), 1);
    }

    #[test]
    fn failed_replay_is_reported() {
        let ds = TransactionalDataSource::new(MemoryDataSource::new().unwrap());
        ds.begin().unwrap();
        ds.add(&triple("a", "1")).unwrap();
        ds.inner().disconnect().unwrap();
        let err = ds.rollback().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataSourceFault);
        assert!(err.to_string().contains("1 of 1"));
        assert!(!ds.is_active());
    }
}
