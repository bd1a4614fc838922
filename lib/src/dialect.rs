//! Query dialects: how values, variables and prefixes are written for a
//! particular query language.

use crate::errors::{OrmError, Result};
use crate::identity::RdfId;
use crate::namespaces::Namespaces;
use crate::value::Value;
use chrono::SecondsFormat;
use lazy_static::lazy_static;
use oxigraph::model::TermRef;
use regex::Regex;
use std::fmt;

lazy_static! {
    static ref SPARQL_FORM: Regex = Regex::new(
        r"(?is)^\s*(?:(?:prefix\s+[^\s:]*:\s*<[^>]*>|base\s+<[^>]*>)\s*)*(select|construct|ask|describe)\b"
    )
    .unwrap();
    static ref SERQL_FORM: Regex = Regex::new(r"(?is)^\s*(select|construct)\b").unwrap();
    static ref SPARQL_PREFIX: Regex = Regex::new(r"(?i)prefix\s+([^\s:]*):").unwrap();
    static ref SERQL_USING: Regex = Regex::new(r"(?i)using\s+namespace").unwrap();
    static ref SERQL_PREFIX: Regex = Regex::new(r"(?i)([A-Za-z][\w-]*)\s*=\s*<").unwrap();
}

/// A query language as seen by the query builder.
pub trait QueryDialect: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Whether blank node labels can be used to address resources.
    fn supports_stable_bnode_ids(&self) -> bool;

    /// Keyword introducing the graph pattern.
    fn pattern_keyword(&self) -> &'static str;

    fn as_var(&self, name: &str) -> String;

    fn as_projection_var(&self, name: &str) -> String {
        self.as_var(name)
    }

    /// Writes a resource identifier.
    fn encode_id(&self, id: &RdfId) -> Result<String> {
        match id {
            RdfId::Named(n) => Ok(format!("<{}>", n.as_str())),
            RdfId::Blank(b) if self.supports_stable_bnode_ids() => Ok(format!("_:{}", b.as_str())),
            RdfId::Blank(b) => Err(OrmError::query(format!(
                "blank node _:{} cannot be addressed in {} queries",
                b.as_str(),
                self.name()
            ))),
        }
    }

    fn encode_datetime(&self, lexical: &str) -> String;

    /// Writes a value as a query literal: numbers unquoted, strings
    /// quoted, entities and resources by identifier.
    fn as_query_string(&self, value: &Value) -> Result<String> {
        match value {
            Value::String(s) => Ok(quote(s)),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Int(_) | Value::Long(_) | Value::Short(_) | Value::Byte(_) => {
                Ok(value.to_string())
            }
            Value::Float(_) | Value::Double(_) => match value.as_f64() {
                Some(f) if f.is_finite() => Ok(value.to_string()),
                _ => Ok(value.to_term(None)?.to_string()),
            },
            Value::DateTime(dt) => {
                Ok(self.encode_datetime(&dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
            }
            Value::Resource(id) => self.encode_id(id),
            Value::Entity(record) => match record.id() {
                Some(id) => self.encode_id(id),
                None => Err(OrmError::illegal_argument(format!(
                    "cannot use an unsaved {} in a query",
                    record.type_name()
                ))),
            },
            Value::Literal(lit) => Ok(lit.to_string()),
        }
    }

    /// Writes an arbitrary term.
    fn term_string(&self, term: TermRef<'_>) -> Result<String> {
        match RdfId::from_term(term) {
            Some(id) => self.encode_id(&id),
            None => Ok(term.to_string()),
        }
    }

    /// True if the text already starts with a query form.
    fn is_full_query(&self, query: &str) -> bool;

    /// Wraps a bare graph pattern into a projection of `var`.
    fn complete(&self, fragment: &str, var: &str) -> String;

    /// Declares `namespaces` in the query, skipping prefixes it already
    /// declares.
    fn insert_namespaces(&self, query: &str, namespaces: &Namespaces) -> String;
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[derive(Debug, Default, Copy, Clone)]
pub struct SparqlDialect;

#[derive(Debug, Default, Copy, Clone)]
pub struct SerqlDialect;

pub static SPARQL: SparqlDialect = SparqlDialect;
pub static SERQL: SerqlDialect = SerqlDialect;

impl QueryDialect for SparqlDialect {
    fn name(&self) -> &'static str {
        "SPARQL"
    }

    fn supports_stable_bnode_ids(&self) -> bool {
        false
    }

    fn pattern_keyword(&self) -> &'static str {
        "where"
    }

    fn as_var(&self, name: &str) -> String {
        format!("?{}", name)
    }

    fn encode_datetime(&self, lexical: &str) -> String {
        format!("\"{}\"^^xsd:dateTime", lexical)
    }

    fn is_full_query(&self, query: &str) -> bool {
        SPARQL_FORM.is_match(query)
    }

    fn complete(&self, fragment: &str, var: &str) -> String {
        format!(
            "select distinct {} {} {{ {} }}",
            self.as_projection_var(var),
            self.pattern_keyword(),
            fragment.trim()
        )
    }

    fn insert_namespaces(&self, query: &str, namespaces: &Namespaces) -> String {
        let declared: Vec<String> = SPARQL_PREFIX
            .captures_iter(query)
            .map(|c| c[1].to_string())
            .collect();
        let mut out = String::new();
        for (prefix, uri) in namespaces.iter() {
            if !declared.iter().any(|d| d == prefix) {
                out.push_str(&format!("PREFIX {}: <{}>\n", prefix, uri));
            }
        }
        out.push_str(query);
        out
    }
}

impl QueryDialect for SerqlDialect {
    fn name(&self) -> &'static str {
        "SeRQL"
    }

    fn supports_stable_bnode_ids(&self) -> bool {
        true
    }

    fn pattern_keyword(&self) -> &'static str {
        "from"
    }

    fn as_var(&self, name: &str) -> String {
        name.to_string()
    }

    fn encode_datetime(&self, lexical: &str) -> String {
        format!(
            "\"{}\"^^<http://www.w3.org/2001/XMLSchema#dateTime>",
            lexical
        )
    }

    fn is_full_query(&self, query: &str) -> bool {
        SERQL_FORM.is_match(query)
    }

    fn complete(&self, fragment: &str, var: &str) -> String {
        format!(
            "select distinct {} {} {}",
            self.as_projection_var(var),
            self.pattern_keyword(),
            fragment.trim()
        )
    }

    fn insert_namespaces(&self, query: &str, namespaces: &Namespaces) -> String {
        let using = SERQL_USING.find(query);
        let declared: Vec<String> = match using {
            Some(m) => SERQL_PREFIX
                .captures_iter(&query[m.end()..])
                .map(|c| c[1].to_string())
                .collect(),
            None => vec![],
        };
        let missing: Vec<String> = namespaces
            .iter()
            .filter(|(prefix, _)| !declared.iter().any(|d| d == prefix))
            .map(|(prefix, uri)| format!("{} = <{}>", prefix, uri))
            .collect();
        if missing.is_empty() {
            return query.to_string();
        }
        match using {
            Some(_) => format!("{},\n  {}", query.trim_end(), missing.join(",\n  ")),
            None => format!(
                "{}\nUSING NAMESPACE\n  {}",
                query.trim_end(),
                missing.join(",\n  ")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use oxigraph::model::BlankNode;

    #[test]
    fn values_are_encoded_per_dialect() {
        assert_eq!(SPARQL.as_query_string(&Value::Int(5)).unwrap(), "5");
        assert_eq!(SPARQL.as_query_string(&Value::Double(2.5)).unwrap(), "2.5");
        assert_eq!(
            SPARQL.as_query_string(&Value::from("say \"hi\"")).unwrap(),
            "\"say \\\"hi\\\"\""
        );
        let when = Value::DateTime(Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap());
        assert_eq!(
            SPARQL.as_query_string(&when).unwrap(),
            "\"2020-01-02T03:04:05Z\"^^xsd:dateTime"
        );
        assert_eq!(
            SERQL.as_query_string(&when).unwrap(),
            "\"2020-01-02T03:04:05Z\"^^<http://www.w3.org/2001/XMLSchema#dateTime>"
        );
        let iri = Value::Resource(RdfId::iri("http://example.org/a").unwrap());
        assert_eq!(SERQL.as_query_string(&iri).unwrap(), "<http://example.org/a>");
    }

    #[test]
    fn blank_nodes_are_only_addressable_in_serql() {
        let blank = Value::Resource(RdfId::Blank(BlankNode::new("b1").unwrap()));
        let err = SPARQL.as_query_string(&blank).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::QueryFault);
        assert_eq!(SERQL.as_query_string(&blank).unwrap(), "_:b1");
    }

    #[test]
    fn fragments_are_completed() {
        assert!(!SPARQL.is_full_query("?result a <http://example.org/T>"));
        assert!(SPARQL.is_full_query("PREFIX ex: <http://example.org/>\nSELECT ?x WHERE {}"));
        assert_eq!(
            SPARQL.complete("?result ?p ?o .", "result"),
            "select distinct ?result where { ?result ?p ?o . }"
        );
        assert_eq!(
            SERQL.complete("{result} p {o}", "result"),
            "select distinct result from {result} p {o}"
        );
    }

    #[test]
    fn namespaces_are_declared_once() {
        let mut ns = Namespaces::new();
        ns.insert("ex", "http://example.org/");
        ns.insert("foaf", "http://xmlns.com/foaf/0.1/");
        let q = SPARQL.insert_namespaces("PREFIX ex: <http://example.org/>\nSELECT * {}", &ns);
        assert_eq!(q.matches("PREFIX ex:").count(), 1);
        assert!(q.starts_with("PREFIX foaf: <http://xmlns.com/foaf/0.1/>\n"));

        let q = SERQL.insert_namespaces("select x from {x} ex:p {y}", &ns);
        assert!(q.ends_with(
            "USING NAMESPACE\n  ex = <http://example.org/>,\n  foaf = <http://xmlns.com/foaf/0.1/>"
        ));
        let again = SERQL.insert_namespaces(&q, &ns);
        assert_eq!(again, q);
    }
}
