//! Predicate builder for event queries.
//!
//! A [`Predicate`] is a composable boolean expression over event records. It can
//! be evaluated in memory ([`Predicate::matches`]) or rendered to a DuckDB `WHERE`
//! fragment against the `events e` alias. Both forms share the same semantics:
//!
//! - identifier matching is exact equality
//! - parameter matching requires a stored parameter with the same key and an
//!   equal value under the same variant
//! - free-text search is a substring test on the case and diacritic folded id

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::storage::StorageError;
use crate::storage::schema::EncodedValue;
use crate::storage::types::{EventId, EventRecord, ParameterSet, ParameterValue};

/// Fold text for case- and diacritic-insensitive search.
///
/// Lowercases, decomposes to NFD and drops combining marks, so `"Crème"`
/// and `"CREME"` both fold to `"creme"`.
pub fn fold_search_text(text: &str) -> String {
    text.to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect()
}

/// Boolean filter over event records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Matches every record.
    True,
    /// Record identifier equals the given one.
    IdEquals(EventId),
    /// Folded record identifier contains the (already folded) needle.
    IdContains(String),
    /// Record owns a parameter with this key and an equal value.
    HasParameter { key: String, value: ParameterValue },
    /// All inner predicates match.
    And(Vec<Predicate>),
}

/// SQL rendering of a predicate: a boolean expression plus its positional parameters.
pub(crate) struct SqlFilter {
    pub sql: String,
    pub params: Vec<Box<dyn duckdb::ToSql>>,
}

impl Predicate {
    /// Predicate for `exists` / `last_timestamp`: identifier equality plus one
    /// parameter clause per filter entry.
    pub fn for_event(id: &EventId, filter: Option<&ParameterSet>) -> Self {
        let mut clauses = vec![Predicate::IdEquals(id.clone())];
        if let Some(filter) = filter {
            clauses.extend(filter.iter().map(|(key, value)| Predicate::HasParameter {
                key: key.to_string(),
                value: value.clone(),
            }));
        }

        if clauses.len() == 1 {
            clauses.swap_remove(0)
        } else {
            Predicate::And(clauses)
        }
    }

    /// Free-text search predicate. Returns `None` for blank input.
    ///
    /// Surrounding whitespace is part of the needle: `"a "` does not match `abc`.
    pub fn id_contains(needle: &str) -> Option<Self> {
        if needle.trim().is_empty() {
            return None;
        }
        Some(Predicate::IdContains(fold_search_text(needle)))
    }

    /// Conjunction, flattening nested `And`s and dropping `True`.
    pub fn and(self, other: Predicate) -> Self {
        match (self, other) {
            (Predicate::True, p) | (p, Predicate::True) => p,
            (Predicate::And(mut left), Predicate::And(right)) => {
                left.extend(right);
                Predicate::And(left)
            }
            (Predicate::And(mut left), p) => {
                left.push(p);
                Predicate::And(left)
            }
            (p, Predicate::And(mut right)) => {
                right.insert(0, p);
                Predicate::And(right)
            }
            (a, b) => Predicate::And(vec![a, b]),
        }
    }

    /// Evaluate against an in-memory record.
    pub fn matches(&self, record: &EventRecord) -> bool {
        match self {
            Predicate::True => true,
            Predicate::IdEquals(id) => record.id == *id,
            Predicate::IdContains(needle) => {
                fold_search_text(record.id.as_str()).contains(needle.as_str())
            }
            Predicate::HasParameter { key, value } => record
                .parameters
                .iter()
                .any(|p| p.key == *key && p.value == *value),
            Predicate::And(clauses) => clauses.iter().all(|p| p.matches(record)),
        }
    }

    /// Render as a SQL boolean expression over `events e`.
    pub(crate) fn to_sql(&self) -> Result<SqlFilter, StorageError> {
        let mut filter = SqlFilter {
            sql: String::new(),
            params: Vec::new(),
        };
        self.render(&mut filter)?;
        Ok(filter)
    }

    fn render(&self, out: &mut SqlFilter) -> Result<(), StorageError> {
        match self {
            Predicate::True => out.sql.push_str("TRUE"),
            Predicate::IdEquals(id) => {
                out.sql.push_str("e.event_id = ?");
                out.params.push(Box::new(id.as_str().to_string()));
            }
            Predicate::IdContains(needle) => {
                out.sql.push_str("contains(e.search_key, ?)");
                out.params.push(Box::new(needle.clone()));
            }
            Predicate::HasParameter { key, value } => {
                let encoded = EncodedValue::encode(value)?;
                out.sql.push_str(&format!(
                    "EXISTS (SELECT 1 FROM parameters p WHERE p.record_id = e.record_id \
                     AND p.key = ? AND p.kind = ? AND p.{} = ?)",
                    encoded.column()
                ));
                out.params.push(Box::new(key.clone()));
                out.params.push(Box::new(encoded.kind().as_ref().to_string()));
                out.params.push(encoded.into_sql_value());
            }
            Predicate::And(clauses) if clauses.is_empty() => out.sql.push_str("TRUE"),
            Predicate::And(clauses) => {
                out.sql.push('(');
                for (i, clause) in clauses.iter().enumerate() {
                    if i > 0 {
                        out.sql.push_str(" AND ");
                    }
                    clause.render(out)?;
                }
                out.sql.push(')');
            }
        }
        Ok(())
    }
}
