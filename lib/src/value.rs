//! Property values and their conversion to and from RDF terms.

use crate::errors::{OrmError, Result};
use crate::identity::RdfId;
use crate::instance::Record;
use crate::options::CollectionKind;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use log::warn;
use oxigraph::model::vocab::xsd;
use oxigraph::model::{Literal, NamedNodeRef, Term, TermRef};
use std::cmp::Ordering;
use std::fmt;

/// A single property value held by a [`Record`].
#[derive(Debug, Clone)]
pub enum Value {
    String(String),
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Short(i16),
    Byte(i8),
    DateTime(DateTime<Utc>),
    /// A resource with no known entity type behind it.
    Resource(RdfId),
    /// A literal outside the conversion table, kept as-is.
    Literal(Literal),
    Entity(Box<Record>),
}

impl Value {
    /// Converts a term read from the store. Resources become
    /// [`Value::Resource`]; the caller decides whether to materialize them.
    pub fn from_term(term: TermRef<'_>) -> Value {
        match term {
            TermRef::Literal(lit) => Value::from_literal(lit.into_owned()),
            other => match RdfId::from_term(other) {
                Some(id) => Value::Resource(id),
                None => Value::String(other.to_string()),
            },
        }
    }

    fn from_literal(lit: Literal) -> Value {
        let dt = lit.datatype();
        let lexical = lit.value().trim();
        let parsed = if dt == xsd::STRING || lit.language().is_some() {
            Some(Value::String(lit.value().to_string()))
        } else if dt == xsd::BOOLEAN {
            match lexical {
                "true" | "1" => Some(Value::Bool(true)),
                "false" | "0" => Some(Value::Bool(false)),
                _ => None,
            }
        } else if is_int_family(dt) {
            lexical
                .parse::<i32>()
                .map(Value::Int)
                .or_else(|_| lexical.parse::<i64>().map(Value::Long))
                .ok()
        } else if dt == xsd::LONG || dt == xsd::UNSIGNED_INT {
            lexical.parse::<i64>().ok().map(Value::Long)
        } else if dt == xsd::FLOAT {
            parse_float(lexical).map(|f| Value::Float(f as f32))
        } else if dt == xsd::DOUBLE || dt == xsd::DECIMAL {
            parse_float(lexical).map(Value::Double)
        } else if dt == xsd::SHORT || dt == xsd::UNSIGNED_BYTE {
            lexical.parse::<i16>().ok().map(Value::Short)
        } else if dt == xsd::BYTE {
            lexical.parse::<i8>().ok().map(Value::Byte)
        } else if dt == xsd::DATE_TIME || dt == xsd::DATE {
            parse_datetime(lexical).map(Value::DateTime)
        } else if dt == xsd::ANY_URI {
            RdfId::iri(lexical).ok().map(Value::Resource)
        } else {
            return Value::Literal(lit);
        };
        parsed.unwrap_or_else(|| {
            warn!("Literal {} does not match its datatype, keeping it verbatim", lit);
            Value::Literal(lit)
        })
    }

    /// Converts the value to a term. `datatype` overrides the natural
    /// datatype of scalar values.
    pub fn to_term(&self, datatype: Option<NamedNodeRef<'_>>) -> Result<Term> {
        let (lexical, natural) = match self {
            Value::Resource(id) => return Ok(id.to_term()),
            Value::Entity(record) => {
                return record.id().map(|id| id.to_term()).ok_or_else(|| {
                    OrmError::illegal_state(format!(
                        "referenced {} has no identifier",
                        record.type_name()
                    ))
                })
            }
            Value::Literal(lit) => return Ok(Term::Literal(lit.clone())),
            Value::String(s) => {
                return Ok(Term::Literal(match datatype {
                    Some(dt) => Literal::new_typed_literal(s.clone(), dt),
                    None => Literal::new_simple_literal(s.clone()),
                }))
            }
            Value::Bool(b) => (b.to_string(), xsd::BOOLEAN),
            Value::Int(i) => (i.to_string(), xsd::INT),
            Value::Long(l) => (l.to_string(), xsd::LONG),
            Value::Float(f) => (format_float(f64::from(*f)), xsd::FLOAT),
            Value::Double(d) => (format_float(*d), xsd::DOUBLE),
            Value::Short(s) => (s.to_string(), xsd::SHORT),
            Value::Byte(b) => (b.to_string(), xsd::BYTE),
            Value::DateTime(dt) => (dt.to_rfc3339_opts(SecondsFormat::AutoSi, true), xsd::DATE_TIME),
        };
        Ok(Term::Literal(Literal::new_typed_literal(
            lexical,
            datatype.unwrap_or(natural),
        )))
    }

    /// The identifier this value points at, for resources and entities.
    pub fn as_id(&self) -> Option<&RdfId> {
        match self {
            Value::Resource(id) => Some(id),
            Value::Entity(record) => record.id(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Any integral value widened to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(i64::from(*i)),
            Value::Long(l) => Some(*l),
            Value::Short(s) => Some(i64::from(*s)),
            Value::Byte(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(f64::from(*f)),
            Value::Double(d) => Some(*d),
            _ => self.as_i64().map(|i| i as f64),
        }
    }

    pub fn as_datetime(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::DateTime(dt) => Some(dt),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&Record> {
        match self {
            Value::Entity(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_entity_mut(&mut self) -> Option<&mut Record> {
        match self {
            Value::Entity(record) => Some(record),
            _ => None,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Value::Resource(_) | Value::Entity(_))
    }

    /// JSON rendering used by the command line tools.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            Value::String(s) => json!(s),
            Value::Bool(b) => json!(b),
            Value::Int(i) => json!(i),
            Value::Long(l) => json!(l),
            Value::Float(f) => json!(f),
            Value::Double(d) => json!(d),
            Value::Short(s) => json!(s),
            Value::Byte(b) => json!(b),
            Value::DateTime(dt) => json!(dt.to_rfc3339()),
            Value::Resource(id) => json!({ "@id": id.to_string() }),
            Value::Literal(lit) => json!(lit.to_string()),
            Value::Entity(record) => record.to_json(),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Bool(_) => 0,
            Value::Byte(_)
            | Value::Short(_)
            | Value::Int(_)
            | Value::Long(_)
            | Value::Float(_)
            | Value::Double(_) => 1,
            Value::DateTime(_) => 2,
            Value::String(_) => 3,
            Value::Literal(_) => 4,
            Value::Resource(_) | Value::Entity(_) => 5,
        }
    }

    /// Total order used by sorted sets: grouped by kind, numbers compared
    /// numerically, references by identifier.
    pub fn compare(&self, other: &Value) -> Ordering {
        let by_rank = self.rank().cmp(&other.rank());
        if by_rank != Ordering::Equal {
            return by_rank;
        }
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Literal(a), Value::Literal(b)) => a.to_string().cmp(&b.to_string()),
            (a, b) if a.rank() == 1 => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => a
                    .as_f64()
                    .partial_cmp(&b.as_f64())
                    .unwrap_or(Ordering::Equal),
            },
            (a, b) => {
                let a = a.as_id().map(|id| id.to_string()).unwrap_or_default();
                let b = b.as_id().map(|id| id.to_string()).unwrap_or_default();
                a.cmp(&b)
            }
        }
    }
}

/// Entities compare by type and identifier, never structurally. A resource
/// equals an entity carrying the same identifier.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Short(a), Value::Short(b)) => a == b,
            (Value::Byte(a), Value::Byte(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Resource(a), Value::Resource(b)) => a == b,
            (Value::Literal(a), Value::Literal(b)) => a == b,
            (Value::Entity(a), Value::Entity(b)) => {
                a.type_name() == b.type_name()
                    && match (a.id(), b.id()) {
                        (Some(x), Some(y)) => x == y,
                        (None, None) => a.key() == b.key(),
                        _ => false,
                    }
            }
            (Value::Resource(id), Value::Entity(record))
            | (Value::Entity(record), Value::Resource(id)) => record.id() == Some(id),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Long(l) => write!(f, "{}", l),
            Value::Float(x) => write!(f, "{}", x),
            Value::Double(x) => write!(f, "{}", x),
            Value::Short(s) => write!(f, "{}", s),
            Value::Byte(b) => write!(f, "{}", b),
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Value::Resource(id) => write!(f, "{}", id),
            Value::Literal(lit) => write!(f, "{}", lit),
            Value::Entity(record) => match record.id() {
                Some(id) => write!(f, "{}", id),
                None => write!(f, "<unsaved {}>", record.type_name()),
            },
        }
    }
}

macro_rules! value_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::$variant(v)
            }
        })*
    };
}

value_from!(
    String => String,
    bool => Bool,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    i16 => Short,
    i8 => Byte,
    DateTime<Utc> => DateTime,
    RdfId => Resource,
    Literal => Literal,
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Entity(Box::new(record))
    }
}

fn is_int_family(dt: NamedNodeRef<'_>) -> bool {
    [
        xsd::INT,
        xsd::INTEGER,
        xsd::NON_NEGATIVE_INTEGER,
        xsd::NON_POSITIVE_INTEGER,
        xsd::POSITIVE_INTEGER,
        xsd::NEGATIVE_INTEGER,
        xsd::UNSIGNED_SHORT,
    ]
    .iter()
    .any(|candidate| *candidate == dt)
}

fn parse_float(lexical: &str) -> Option<f64> {
    match lexical {
        "INF" => Some(f64::INFINITY),
        "-INF" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        other => other.parse::<f64>().ok(),
    }
}

fn format_float(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        let inf = if value > 0.0 { "INF" } else { "-INF" };
        inf.to_string()
    } else {
        value.to_string()
    }
}

fn parse_datetime(lexical: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(lexical) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(lexical, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    NaiveDate::parse_from_str(lexical, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// The backing store of a many-valued property.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    kind: CollectionKind,
    items: Vec<Value>,
}

impl Collection {
    pub fn new(kind: CollectionKind) -> Self {
        Collection {
            kind,
            items: vec![],
        }
    }

    pub fn from_values(kind: CollectionKind, values: impl IntoIterator<Item = Value>) -> Self {
        let mut collection = Collection::new(kind);
        for value in values {
            collection.push(value);
        }
        collection
    }

    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    /// Adds a value; returns false if a set already held it.
    pub fn push(&mut self, value: Value) -> bool {
        match self.kind {
            CollectionKind::List => {
                self.items.push(value);
                true
            }
            CollectionKind::Set => {
                if self.items.contains(&value) {
                    return false;
                }
                self.items.push(value);
                true
            }
            CollectionKind::SortedSet => {
                match self.items.binary_search_by(|item| item.compare(&value)) {
                    Ok(_) => false,
                    Err(pos) => {
                        self.items.insert(pos, value);
                        true
                    }
                }
            }
        }
    }

    pub fn remove(&mut self, value: &Value) -> bool {
        match self.items.iter().position(|v| v == value) {
            Some(pos) => {
                self.items.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.items.contains(value)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.items.iter()
    }

    /// Mutable access to the members. Call [`Collection::normalize`]
    /// afterwards if identities or sort keys may have changed.
    pub fn items_mut(&mut self) -> &mut Vec<Value> {
        &mut self.items
    }

    /// Re-establishes ordering and uniqueness for sets.
    pub fn normalize(&mut self) {
        if self.kind == CollectionKind::List {
            return;
        }
        let items = std::mem::take(&mut self.items);
        for value in items {
            self.push(value);
        }
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.items
    }
}

impl<'a> IntoIterator for &'a Collection {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxigraph::model::NamedNode;

    fn typed(value: &str, dt: NamedNodeRef<'_>) -> Term {
        Term::Literal(Literal::new_typed_literal(value, dt))
    }

    #[test]
    fn literals_follow_the_conversion_table() {
        assert_eq!(Value::from_term(typed("42", xsd::INT).as_ref()), Value::Int(42));
        assert_eq!(Value::from_term(typed("42", xsd::INTEGER).as_ref()), Value::Int(42));
        assert_eq!(
            Value::from_term(typed("9000000000", xsd::LONG).as_ref()),
            Value::Long(9_000_000_000)
        );
        assert_eq!(Value::from_term(typed("true", xsd::BOOLEAN).as_ref()), Value::Bool(true));
        assert_eq!(Value::from_term(typed("1.5", xsd::FLOAT).as_ref()), Value::Float(1.5));
        assert_eq!(Value::from_term(typed("2.25", xsd::DOUBLE).as_ref()), Value::Double(2.25));
        assert_eq!(Value::from_term(typed("7", xsd::SHORT).as_ref()), Value::Short(7));
        assert_eq!(Value::from_term(typed("-3", xsd::BYTE).as_ref()), Value::Byte(-3));
        assert_eq!(
            Value::from_term(typed("http://example.org/x", xsd::ANY_URI).as_ref()),
            Value::Resource(RdfId::iri("http://example.org/x").unwrap())
        );
        let date = Value::from_term(typed("2020-01-02", xsd::DATE).as_ref());
        assert_eq!(
            date.as_datetime().unwrap().to_rfc3339(),
            "2020-01-02T00:00:00+00:00"
        );
        let plain = Term::Literal(Literal::new_simple_literal("hello"));
        assert_eq!(Value::from_term(plain.as_ref()), Value::from("hello"));
    }

    #[test]
    fn malformed_and_unknown_literals_are_kept() {
        let bad = Value::from_term(typed("abc", xsd::INT).as_ref());
        assert!(matches!(bad, Value::Literal(_)));
        let other = NamedNode::new("http://example.org/dt").unwrap();
        let custom = Value::from_term(typed("x", other.as_ref()).as_ref());
        assert!(matches!(custom, Value::Literal(_)));
    }

    #[test]
    fn scalars_round_trip_through_terms() {
        let when = Utc.with_ymd_and_hms(2021, 5, 6, 7, 8, 9).unwrap();
        for value in [
            Value::from("text"),
            Value::Bool(false),
            Value::Int(-5),
            Value::Long(1 << 40),
            Value::Float(0.25),
            Value::Double(1e-3),
            Value::Short(12),
            Value::Byte(1),
            Value::DateTime(when),
        ] {
            let term = value.to_term(None).unwrap();
            assert_eq!(Value::from_term(term.as_ref()), value);
        }
    }

    #[test]
    fn declared_datatype_overrides_natural_one() {
        let term = Value::Int(3).to_term(Some(xsd::INTEGER)).unwrap();
        assert_eq!(term, typed("3", xsd::INTEGER));
    }

    #[test]
    fn collections_respect_their_kind() {
        let mut list = Collection::new(CollectionKind::List);
        assert!(list.push(Value::Int(2)));
        assert!(list.push(Value::Int(2)));
        assert_eq!(list.len(), 2);

        let mut set = Collection::new(CollectionKind::Set);
        set.push(Value::from("b"));
        set.push(Value::from("a"));
        assert!(!set.push(Value::from("b")));
        assert_eq!(set.iter().cloned().collect::<Vec<_>>(), vec![Value::from("b"), Value::from("a")]);

        let sorted = Collection::from_values(
            CollectionKind::SortedSet,
            vec![Value::Int(3), Value::Int(1), Value::Int(2), Value::Int(1)],
        );
        assert_eq!(
            sorted.into_vec(),
            vec![Value::Int(1), Value::Int(2), Value::Int(3)]
        );
    }
}
