//! The contract the session core consumes from backend adapters.
//!
//! Written with manually boxed futures rather than `async-trait` so that
//! `Arc<dyn BackendAdapter>` is usable — the same accommodation the
//! teacher's own async connection implementations make for trait-object
//! compatibility.
#![allow(clippy::manual_async_fn)]

use std::future::Future;
use std::pin::Pin;

use asupersync::{Cx, Outcome};
use kvmodel_core::{Error, Iid, Meta, ModelHandle, Value};
use kvmodel_query::{Query, RawRecord};

/// Per-instance result reported by a backend after a commit dispatch.
#[derive(Debug, Clone)]
pub struct InstanceResult {
    pub iid: Iid,
    pub id: Value,
    pub persistent: bool,
    pub deleted: bool,
    pub score: Option<f64>,
}

/// One model's worth of pending work, handed to a backend for dispatch.
pub struct SessionData {
    pub meta: Meta,
    pub dirty: Vec<ModelHandle>,
    pub deletes: Option<Query>,
    pub queries: Vec<Query>,
}

impl SessionData {
    pub fn is_empty(&self) -> bool {
        self.dirty.is_empty() && self.deletes.is_none() && self.queries.is_empty()
    }
}

/// A single model's worth of backend response: either its instance results
/// or a failure that should be folded into the commit's aggregated error.
pub type ModelResult = Result<(Meta, Vec<InstanceResult>), Error>;

/// Contract consumed by the session core. Production implementations speak
/// whatever wire protocol their backend requires; this crate only depends
/// on the shape below.
pub trait BackendAdapter: Send + Sync {
    fn execute_session<'a>(
        &'a self,
        cx: &'a Cx,
        data: Vec<SessionData>,
    ) -> Pin<Box<dyn Future<Output = Outcome<Vec<ModelResult>, Error>> + Send + 'a>>;

    fn model_keys<'a>(
        &'a self,
        cx: &'a Cx,
        meta: &'a Meta,
    ) -> Pin<Box<dyn Future<Output = Outcome<Vec<Value>, Error>> + Send + 'a>>;

    fn flush<'a>(
        &'a self,
        cx: &'a Cx,
        meta: &'a Meta,
    ) -> Pin<Box<dyn Future<Output = Outcome<(), Error>> + Send + 'a>>;

    fn clean<'a>(
        &'a self,
        cx: &'a Cx,
        meta: &'a Meta,
    ) -> Pin<Box<dyn Future<Output = Outcome<(), Error>> + Send + 'a>>;

    fn fetch<'a>(
        &'a self,
        cx: &'a Cx,
        query: &'a Query,
    ) -> Pin<Box<dyn Future<Output = Outcome<Vec<RawRecord>, Error>> + Send + 'a>>;
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;

    /// A `BackendAdapter` that never succeeds, used only to exercise
    /// `SessionModel`/`Manager` plumbing that never dispatches a commit.
    pub struct NullBackend;

    impl BackendAdapter for NullBackend {
        fn execute_session<'a>(
            &'a self,
            _cx: &'a Cx,
            _data: Vec<SessionData>,
        ) -> Pin<Box<dyn Future<Output = Outcome<Vec<ModelResult>, Error>> + Send + 'a>> {
            Box::pin(async { Outcome::Ok(Vec::new()) })
        }

        fn model_keys<'a>(
            &'a self,
            _cx: &'a Cx,
            _meta: &'a Meta,
        ) -> Pin<Box<dyn Future<Output = Outcome<Vec<Value>, Error>> + Send + 'a>> {
            Box::pin(async { Outcome::Ok(Vec::new()) })
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
            _meta: &'a Meta,
        ) -> Pin<Box<dyn Future<Output = Outcome<(), Error>> + Send + 'a>> {
            Box::pin(async { Outcome::Ok(()) })
        }

        fn fetch<'a>(
            &'a self,
            _cx: &'a Cx,
            _query: &'a Query,
        ) -> Pin<Box<dyn Future<Output = Outcome<Vec<RawRecord>, Error>> + Send + 'a>> {
            Box::pin(async { Outcome::Ok(Vec::new()) })
        }
    }
}
