//! `Manager`: per-model factory binding a model to its write/read backend
//! pair, plus `Router`, the model-to-manager registry and session factory.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use asupersync::{Cx, Outcome};
use kvmodel_core::{Error, Meta, Model};

use crate::backend::BackendAdapter;
use crate::n1_detection::N1Tracker;
use crate::session::Session;

/// A named, manager-resolved loader standing in for the distilled system's
/// dynamic attribute-forwarded lazy proxy. Registered once at `Manager`
/// construction rather than intercepted per attribute access.
pub type CapabilityLoader = Arc<
    dyn Fn(&Cx, Arc<dyn BackendAdapter>) -> Pin<Box<dyn Future<Output = Outcome<Box<dyn Model>, Error>> + Send>>
        + Send
        + Sync,
>;

struct ManagerInner {
    meta: Meta,
    write_backend: Arc<dyn BackendAdapter>,
    read_backend: Arc<dyn BackendAdapter>,
    router: Router,
    capabilities: HashMap<String, CapabilityLoader>,
    n1_tracker: Option<Arc<N1Tracker>>,
}

/// Stateless façade over a model and its backend pair.
#[derive(Clone)]
pub struct Manager(Arc<ManagerInner>);

impl Manager {
    pub fn new(meta: Meta, backend: Arc<dyn BackendAdapter>, router: Router) -> Self {
        Self::with_read_backend(meta, backend.clone(), backend, router)
    }

    pub fn with_read_backend(
        meta: Meta,
        write_backend: Arc<dyn BackendAdapter>,
        read_backend: Arc<dyn BackendAdapter>,
        router: Router,
    ) -> Self {
        Self(Arc::new(ManagerInner {
            meta,
            write_backend,
            read_backend,
            router,
            capabilities: HashMap::new(),
            n1_tracker: None,
        }))
    }

    /// Attach N+1 detection for this manager's capability loads. Without
    /// this, [`Manager::load_capability`] never records or warns.
    pub fn with_n1_tracking(mut self, threshold: usize) -> Self {
        let mut inner = (*self.0).clone_shallow();
        inner.n1_tracker = Some(Arc::new(N1Tracker::new(threshold)));
        self.0 = Arc::new(inner);
        self
    }

    pub fn n1_stats(&self) -> Option<crate::n1_detection::N1Stats> {
        self.0.n1_tracker.as_deref().map(N1Tracker::stats)
    }

    pub fn with_capability(mut self, name: impl Into<String>, loader: CapabilityLoader) -> Self {
        // Managers are cheaply cloned `Arc`s; registering a capability after
        // construction clones the inner table once rather than requiring a
        // separate builder type.
        let mut inner = (*self.0).clone_shallow();
        inner.capabilities.insert(name.into(), loader);
        self.0 = Arc::new(inner);
        self
    }

    pub fn meta(&self) -> &Meta {
        &self.0.meta
    }

    pub fn write_backend(&self) -> &Arc<dyn BackendAdapter> {
        &self.0.write_backend
    }

    pub fn read_backend(&self) -> &Arc<dyn BackendAdapter> {
        &self.0.read_backend
    }

    pub fn router(&self) -> &Router {
        &self.0.router
    }

    /// New session bound to this manager's router.
    pub fn session(&self) -> Session {
        self.0.router.session()
    }

    /// Look up a registered lazy-load capability by name.
    pub fn capability(&self, name: &str) -> Option<&CapabilityLoader> {
        self.0.capabilities.get(name)
    }

    /// Invoke a named capability against this manager's read backend,
    /// binding the result to a fresh session if it arrived unbound.
    pub async fn load_capability(&self, cx: &Cx, name: &str) -> Outcome<Box<dyn Model>, Error> {
        let Some(loader) = self.capability(name) else {
            return Outcome::Err(Error::ValueError(format!(
                "manager for {} has no capability named {name}",
                self.0.meta.name()
            )));
        };
        if let Some(tracker) = &self.0.n1_tracker {
            tracker.record_load(self.0.meta.name(), name);
        }
        let mut result = match loader(cx, self.0.read_backend.clone()).await {
            Outcome::Ok(v) => v,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        if result.session_id().is_none() {
            let session = self.session();
            result.set_session_id(Some(session.id()));
        }
        Outcome::Ok(result)
    }

    /// Create-all, kept for interface parity with backends that manage their
    /// own schema. No-op here: a key/value backend has nothing to create.
    pub fn create_all(&self) {}

    fn ptr(&self) -> *const ManagerInner {
        Arc::as_ptr(&self.0)
    }
}

impl PartialEq for Manager {
    fn eq(&self, other: &Self) -> bool {
        self.meta() == other.meta()
    }
}

impl Eq for Manager {}

impl std::hash::Hash for Manager {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.meta().hash(state);
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("meta", &self.0.meta)
            .field("ptr", &self.ptr())
            .finish_non_exhaustive()
    }
}

impl ManagerInner {
    fn clone_shallow(&self) -> Self {
        Self {
            meta: self.meta.clone(),
            write_backend: self.write_backend.clone(),
            read_backend: self.read_backend.clone(),
            router: self.router.clone(),
            capabilities: self.capabilities.clone(),
            n1_tracker: self.n1_tracker.clone(),
        }
    }
}

struct RouterInner {
    managers: Mutex<Vec<Manager>>,
    signals: Arc<crate::signals::SignalHub>,
}

/// Registry mapping a model's `Meta` to its `Manager`, and the `Session`
/// factory. Cheaply cloneable.
#[derive(Clone)]
pub struct Router(Arc<RouterInner>);

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self(Arc::new(RouterInner {
            managers: Mutex::new(Vec::new()),
            signals: Arc::new(crate::signals::SignalHub::new()),
        }))
    }

    /// The per-router signal bus shared by every session this router hands
    /// out.
    pub fn signals(&self) -> &Arc<crate::signals::SignalHub> {
        &self.0.signals
    }

    /// Register a manager. Replaces any existing registration for the same
    /// `Meta`.
    pub fn register(&self, manager: Manager) {
        let mut managers = self.0.managers.lock().expect("router lock poisoned");
        managers.retain(|m| m.meta() != manager.meta());
        managers.push(manager);
    }

    pub fn get(&self, meta: &Meta) -> Option<Manager> {
        let managers = self.0.managers.lock().expect("router lock poisoned");
        managers.iter().find(|m| m.meta() == meta).cloned()
    }

    /// A fresh session whose `SessionModel`s resolve managers through this
    /// router.
    pub fn session(&self) -> Session {
        Session::new(self.clone())
    }
}
