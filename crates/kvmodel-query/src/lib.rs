//! Minimal opaque, unionable query representation.
//!
//! This is not a filter/query DSL. It exists because the session core's own
//! contract requires queries to be storable, unionable, and dispatchable
//! through a backend (delete-by-query, `get_or_create`'s lookup, and the
//! read-path of a split read/write `Manager`) — nothing more. A real
//! query-expression builder with joins, aggregation, or full-text search is
//! deliberately out of scope here.

use std::collections::HashMap;

use kvmodel_core::{Meta, SessionId, Value};

/// A single filter clause: `field op values`.
#[derive(Debug, Clone)]
pub struct FilterClause {
    pub field: String,
    pub op: FilterOp,
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    In,
}

/// An opaque, per-model filter expression. Queries can be filtered further,
/// unioned together, and carry the `SessionId` of the session that created
/// them so a session can reject a query built by a different one.
#[derive(Debug, Clone)]
pub struct Query {
    meta: Meta,
    session_id: Option<SessionId>,
    filters: Vec<FilterClause>,
    unioned: Vec<Query>,
}

impl Query {
    pub fn new(meta: Meta) -> Self {
        Self {
            meta,
            session_id: None,
            filters: Vec::new(),
            unioned: Vec::new(),
        }
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn filter_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(FilterClause {
            field: field.into(),
            op: FilterOp::Eq,
            values: vec![value.into()],
        });
        self
    }

    pub fn filter_in(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.filters.push(FilterClause {
            field: field.into(),
            op: FilterOp::In,
            values,
        });
        self
    }

    /// Combine `self` with `others`, producing a single query whose result
    /// set is the union of all of them. Used by `SessionModel::get_delete_query`
    /// to collapse multiple deferred deletes into one dispatchable query.
    pub fn union(mut self, others: impl IntoIterator<Item = Query>) -> Self {
        self.unioned.extend(others);
        self
    }

    pub fn filters(&self) -> &[FilterClause] {
        &self.filters
    }

    pub fn unioned(&self) -> &[Query] {
        &self.unioned
    }
}

/// The shape a backend hands back a fetched row/hash as. Stands in for the
/// field system's deserialization, which this crate does not implement.
pub type RawRecord = HashMap<String, Value>;

/// Materializes a concrete model from a backend's raw record. The thin
/// counterpart of the field system's decoding step.
pub trait FromRaw: Sized {
    fn from_raw(meta: &Meta, raw: &RawRecord) -> Result<Self, kvmodel_core::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvmodel_core::ModelType;

    fn meta() -> Meta {
        Meta::identity("widget", "id", ModelType::Object)
    }

    #[test]
    fn union_accumulates_subqueries() {
        let a = Query::new(meta()).filter_eq("name", "a");
        let b = Query::new(meta()).filter_eq("name", "b");
        let unioned = a.union(vec![b]);
        assert_eq!(unioned.unioned().len(), 1);
    }

    #[test]
    fn foreign_session_is_distinguishable() {
        let q = Query::new(meta()).with_session(SessionId::fresh());
        let other = SessionId::fresh();
        assert_ne!(q.session_id(), Some(other));
    }
}
