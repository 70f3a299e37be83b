//! An in-process, in-memory `BackendAdapter`.
//!
//! Stores every model's rows as plain `RawRecord`s in a per-`Meta` table.
//! Primary keys for non-persistent instances are assigned sequentially.
//! There is no SQL, no wire protocol, and no durability: this exists so the
//! session core can be exercised and tested without a real backend, the
//! role the teacher's sqlite backend fills for its own test suite.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use asupersync::{Cx, Outcome};
use indexmap::IndexMap;
use kvmodel_core::{Action, Error, Iid, Meta, Value};
use kvmodel_query::{FilterOp, Query, RawRecord};
use kvmodel_session::{BackendAdapter, InstanceResult, ModelResult, SessionData};

struct Table {
    rows: IndexMap<Value, RawRecord>,
    next_id: AtomicI64,
}

impl Table {
    fn new() -> Self {
        Self {
            rows: IndexMap::new(),
            next_id: AtomicI64::new(1),
        }
    }
}

/// Reference backend: every model's persisted rows, keyed by the model's
/// `Meta` (pointer identity, matching every other identity-keyed map in this
/// core).
#[derive(Default)]
pub struct MemoryBackend {
    tables: Mutex<HashMap<Meta, Table>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A row matches a query if it satisfies every filter on the query
    /// itself, or matches any of its unioned subqueries — `union` combines
    /// queries as alternatives, not as an additional conjunction.
    fn row_matches(row: &RawRecord, query: &Query) -> bool {
        let own = query.filters().iter().all(|clause| {
            let Some(actual) = row.get(&clause.field) else {
                return false;
            };
            match clause.op {
                FilterOp::Eq => clause.values.first().is_some_and(|v| v == actual),
                FilterOp::In => clause.values.contains(actual),
            }
        });
        own || query.unioned().iter().any(|q| Self::row_matches(row, q))
    }
}

impl BackendAdapter for MemoryBackend {
    fn execute_session<'a>(
        &'a self,
        _cx: &'a Cx,
        data: Vec<SessionData>,
    ) -> Pin<Box<dyn Future<Output = Outcome<Vec<ModelResult>, Error>> + Send + 'a>> {
        Box::pin(async move {
            let mut tables = self.tables.lock().expect("memory backend lock poisoned");
            let mut out = Vec::with_capacity(data.len());

            for batch in data {
                let meta = batch.meta.clone();
                let table = tables.entry(meta.clone()).or_insert_with(Table::new);
                let mut results = Vec::new();

                for handle in &batch.dirty {
                    let guard = handle.lock().expect("model lock poisoned");
                    let iid = guard.state().iid.clone().unwrap_or_else(Iid::next_local);
                    let persistent = guard.state().persistent;
                    let action = guard.state().action;

                    let pk = if persistent {
                        guard.pkvalue()
                    } else {
                        Value::Int(table.next_id.fetch_add(1, Ordering::Relaxed))
                    };

                    let mut row: RawRecord = RawRecord::new();
                    row.insert(meta.pk_name().to_string(), pk.clone());
                    if persistent && matches!(action, Action::Update) {
                        if let Some(existing) = table.rows.get(&pk) {
                            row = existing.clone();
                            row.insert(meta.pk_name().to_string(), pk.clone());
                        }
                    }
                    table.rows.insert(pk.clone(), row);

                    results.push(InstanceResult {
                        iid,
                        id: pk,
                        persistent: true,
                        deleted: false,
                        score: None,
                    });
                }

                if let Some(delete_query) = &batch.deletes {
                    let to_remove: Vec<Value> = table
                        .rows
                        .iter()
                        .filter(|(_, row)| Self::row_matches(row, delete_query))
                        .map(|(pk, _)| pk.clone())
                        .collect();
                    for pk in to_remove {
                        table.rows.shift_remove(&pk);
                        results.push(InstanceResult {
                            iid: Iid::Pk(pk.clone()),
                            id: pk,
                            persistent: false,
                            deleted: true,
                            score: None,
                        });
                    }
                }

                // No cache to warm; queries are matched against the table for
                // parity with a real read backend but rows aren't surfaced
                // here — callers that need rows call `fetch` directly.
                for query in &batch.queries {
                    let _ = table.rows.values().filter(|row| Self::row_matches(row, query)).count();
                }

                out.push(Ok((meta, results)));
            }

            Outcome::Ok(out)
        })
    }

    fn model_keys<'a>(
        &'a self,
        _cx: &'a Cx,
        meta: &'a Meta,
    ) -> Pin<Box<dyn Future<Output = Outcome<Vec<Value>, Error>> + Send + 'a>> {
        Box::pin(async move {
            let tables = self.tables.lock().expect("memory backend lock poisoned");
            let keys = tables
                .get(meta)
                .map(|t| t.rows.keys().cloned().collect())
                .unwrap_or_default();
            Outcome::Ok(keys)
        })
    }

    fn flush<'a>(
        &'a self,
        _cx: &'a Cx,
        _meta: &'a Meta,
    ) -> Pin<Box<dyn Future<Output = Outcome<(), Error>> + Send + 'a>> {
        Box::pin(async { Outcome::Ok(()) })
    }

    fn clean<'a>(
        &'a self,
        _cx: &'a Cx,
        meta: &'a Meta,
    ) -> Pin<Box<dyn Future<Output = Outcome<(), Error>> + Send + 'a>> {
        Box::pin(async move {
            let mut tables = self.tables.lock().expect("memory backend lock poisoned");
            tables.remove(meta);
            Outcome::Ok(())
        })
    }

    fn fetch<'a>(
        &'a self,
        _cx: &'a Cx,
        query: &'a Query,
    ) -> Pin<Box<dyn Future<Output = Outcome<Vec<RawRecord>, Error>> + Send + 'a>> {
        Box::pin(async move {
            let tables = self.tables.lock().expect("memory backend lock poisoned");
            let Some(table) = tables.get(query.meta()) else {
                return Outcome::Ok(Vec::new());
            };
            let rows = table
                .rows
                .values()
                .filter(|row| Self::row_matches(row, query))
                .cloned()
                .collect();
            Outcome::Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvmodel_core::ModelType;

    fn meta() -> Meta {
        Meta::identity("widget", "id", ModelType::Object)
    }

    #[test]
    fn clean_removes_a_models_table() {
        let backend = MemoryBackend::new();
        let cx = Cx::for_testing();
        let meta = meta();
        let rt = asupersync::runtime::RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        rt.block_on(async {
            match backend.model_keys(&cx, &meta).await {
                Outcome::Ok(keys) => assert!(keys.is_empty()),
                _ => panic!("expected Ok"),
            }
            match backend.clean(&cx, &meta).await {
                Outcome::Ok(()) => {}
                _ => panic!("expected Ok"),
            }
        });
    }

    #[test]
    fn fetch_against_an_unknown_model_returns_empty() {
        let backend = MemoryBackend::new();
        let cx = Cx::for_testing();
        let meta = meta();
        let query = Query::new(meta.clone());
        let rt = asupersync::runtime::RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        rt.block_on(async {
            match backend.fetch(&cx, &query).await {
                Outcome::Ok(rows) => assert!(rows.is_empty()),
                _ => panic!("expected Ok"),
            }
        });
    }
}
