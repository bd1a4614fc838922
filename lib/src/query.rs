//! Parameterized queries and their results.
//!
//! Query text may reference parameters as `??name` or `??1`; these are kept
//! apart from ordinary `?var` variables and substituted with values encoded
//! by the data source's dialect. A text that is only a graph pattern is
//! completed into a `select distinct ?result` query.

use crate::consts::RESULT_VAR;
use crate::datasource::DataSource;
use crate::errors::{OrmError, Result};
use crate::identity::RdfId;
use crate::instance::Record;
use crate::lazy::LoadContext;
use crate::materializer;
use crate::namespaces::{self, Namespaces};
use crate::value::Value;
use lazy_static::lazy_static;
use log::debug;
use oxigraph::model::{Graph, Term};
use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

lazy_static! {
    static ref PARAMETER: Regex = Regex::new(r"\?\?([A-Za-z0-9_]+)").unwrap();
}

/// One row of a select query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingSet {
    bindings: Vec<(String, Term)>,
}

impl BindingSet {
    pub fn new(bindings: Vec<(String, Term)>) -> Self {
        BindingSet { bindings }
    }

    pub fn get(&self, name: &str) -> Option<&Term> {
        self.bindings
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    /// The binding of `name` as a resource identifier.
    pub fn id(&self, name: &str) -> Option<RdfId> {
        self.get(name).and_then(|t| RdfId::from_term(t.as_ref()))
    }

    pub fn value(&self, name: &str) -> Option<Value> {
        self.get(name).map(|t| Value::from_term(t.as_ref()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Term)> {
        self.bindings.iter().map(|(n, t)| (n.as_str(), t))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// The rows of a select query. Closing drops the rows not yet read.
#[derive(Debug, Default)]
pub struct ResultSet {
    variables: Vec<String>,
    rows: std::vec::IntoIter<BindingSet>,
    closed: bool,
}

impl ResultSet {
    pub fn new(variables: Vec<String>, rows: Vec<BindingSet>) -> Self {
        ResultSet {
            variables,
            rows: rows.into_iter(),
            closed: false,
        }
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn close(&mut self) {
        self.rows = Vec::new().into_iter();
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Iterator for ResultSet {
    type Item = BindingSet;

    fn next(&mut self) -> Option<BindingSet> {
        if self.closed {
            return None;
        }
        self.rows.next()
    }
}

/// A query bound to a data source.
pub struct RdfQuery {
    text: String,
    source: Arc<dyn DataSource>,
    namespaces: Namespaces,
    parameters: BTreeMap<String, Value>,
    limit: Option<usize>,
    offset: Option<usize>,
}

impl fmt::Debug for RdfQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RdfQuery")
            .field("text", &self.text)
            .field("dialect", &self.source.dialect().name())
            .field("parameters", &self.parameters)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .finish()
    }
}

impl RdfQuery {
    /// A query over `source` declaring the process-wide prefixes.
    pub fn new(text: impl Into<String>, source: Arc<dyn DataSource>) -> Self {
        RdfQuery {
            text: text.into(),
            source,
            namespaces: namespaces::global(),
            parameters: BTreeMap::new(),
            limit: None,
            offset: None,
        }
    }

    /// Adds prefixes on top of the process-wide ones; later bindings win.
    pub fn with_namespaces(mut self, extra: &Namespaces) -> Self {
        for (prefix, uri) in extra.iter() {
            self.namespaces.insert(prefix, uri);
        }
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Binds `??name`.
    pub fn set_parameter(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        let name = name.trim_start_matches("??");
        self.parameters.insert(name.to_string(), value.into());
        self
    }

    /// Binds the positional parameter `??position`.
    pub fn set_positional(&mut self, position: usize, value: impl Into<Value>) -> &mut Self {
        self.parameters.insert(position.to_string(), value.into());
        self
    }

    pub fn set_limit(&mut self, limit: usize) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn set_offset(&mut self, offset: usize) -> &mut Self {
        self.offset = Some(offset);
        self
    }

    /// The query as sent to the data source.
    pub fn to_query_string(&self) -> Result<String> {
        let dialect = self.source.dialect();
        let mut failure = None;
        let substituted = PARAMETER.replace_all(&self.text, |caps: &Captures<'_>| {
            let name = &caps[1];
            let encoded = match self.parameters.get(name) {
                Some(value) => dialect.as_query_string(value),
                None => Err(OrmError::query(format!("parameter ??{} is not bound", name))),
            };
            match encoded {
                Ok(s) => s,
                Err(e) => {
                    failure.get_or_insert(e);
                    String::new()
                }
            }
        });
        if let Some(e) = failure {
            return Err(e);
        }
        let mut query = if dialect.is_full_query(&substituted) {
            substituted.into_owned()
        } else {
            dialect.complete(&substituted, RESULT_VAR)
        };
        if let Some(limit) = self.limit {
            query.push_str(&format!("\nLIMIT {}", limit));
        }
        if let Some(offset) = self.offset {
            query.push_str(&format!("\nOFFSET {}", offset));
        }
        Ok(dialect.insert_namespaces(&query, &self.namespaces))
    }

    pub fn execute(&self) -> Result<ResultSet> {
        let query = self.to_query_string()?;
        debug!("Executing select:\n{}", query);
        self.source.select(&query)
    }

    /// Runs the query and collects every row.
    pub fn get_result_list(&self) -> Result<Vec<BindingSet>> {
        Ok(self.execute()?.collect())
    }

    pub fn ask(&self) -> Result<bool> {
        let query = self.to_query_string()?;
        self.source.ask(&query)
    }

    pub fn graph(&self) -> Result<Graph> {
        let query = self.to_query_string()?;
        self.source.graph_query(&query)
    }
}

/// A query whose `?result` bindings are loaded as entities of one type.
pub struct TypedQuery {
    query: RdfQuery,
    type_name: String,
    context: LoadContext,
}

impl fmt::Debug for TypedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedQuery")
            .field("type", &self.type_name)
            .field("query", &self.query)
            .finish()
    }
}

impl TypedQuery {
    pub fn new(query: RdfQuery, type_name: impl Into<String>, context: LoadContext) -> Self {
        TypedQuery {
            query,
            type_name: type_name.into(),
            context,
        }
    }

    pub fn set_parameter(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.query.set_parameter(name, value);
        self
    }

    pub fn set_positional(&mut self, position: usize, value: impl Into<Value>) -> &mut Self {
        self.query.set_positional(position, value);
        self
    }

    pub fn set_limit(&mut self, limit: usize) -> &mut Self {
        self.query.set_limit(limit);
        self
    }

    pub fn set_offset(&mut self, offset: usize) -> &mut Self {
        self.query.set_offset(offset);
        self
    }

    pub fn to_query_string(&self) -> Result<String> {
        self.query.to_query_string()
    }

    /// Loads one record per distinct `?result` resource, in result order.
    pub fn get_result_list(&self) -> Result<Vec<Record>> {
        let mut seen = HashSet::new();
        let mut records = vec![];
        for row in self.query.execute()? {
            let Some(id) = row.id(RESULT_VAR) else {
                continue;
            };
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(record) = materializer::materialize(&self.context, &self.type_name, &id)? {
                records.push(record);
            }
        }
        debug!(
            "Typed query loaded {} {} records",
            records.len(),
            self.type_name
        );
        Ok(records)
    }

    /// The first result, if any.
    pub fn get_single_result(&self) -> Result<Option<Record>> {
        Ok(self.get_result_list()?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_result_sets_are_exhausted() {
        let row = BindingSet::new(vec![(
            "x".to_string(),
            Term::from(oxigraph::model::Literal::from(1)),
        )]);
        let mut rs = ResultSet::new(vec!["x".into()], vec![row.clone(), row]);
        assert_eq!(rs.variables(), &["x".to_string()]);
        assert!(rs.next().is_some());
        rs.close();
        assert!(rs.is_closed());
        assert!(rs.next().is_none());
    }

    #[test]
    fn bindings_expose_ids_and_values() {
        let row = BindingSet::new(vec![
            (
                "s".to_string(),
                Term::from(oxigraph::model::NamedNode::new("http://example.org/s").unwrap()),
            ),
            (
                "n".to_string(),
                Term::from(oxigraph::model::Literal::new_simple_literal("x")),
            ),
        ]);
        assert_eq!(row.id("s"), Some(RdfId::iri("http://example.org/s").unwrap()));
        assert_eq!(row.value("n"), Some(Value::from("x")));
        assert_eq!(row.names().collect::<Vec<_>>(), vec!["s", "n"]);
        assert!(row.id("missing").is_none());
    }
}
