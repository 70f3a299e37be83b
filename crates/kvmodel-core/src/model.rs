//! Instance identity and the object-safe `Model` contract.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::meta::Meta;
use crate::value::Value;

/// An instance's identity within one `SessionModel`.
///
/// Persistent instances are keyed by their coerced primary key; instances
/// that have not yet been assigned one by a backend get a process-wide,
/// session-scoped local token instead, so they can still be placed in the
/// identity-preserving buckets before a round-trip has happened.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Iid {
    Pk(Value),
    Local(u64),
}

static NEXT_LOCAL_IID: AtomicU64 = AtomicU64::new(1);

impl Iid {
    /// Issue a fresh, never-reused local identity token.
    pub fn next_local() -> Self {
        Iid::Local(NEXT_LOCAL_IID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Whether a pending write should be treated as a full replace or a
/// partial update, when the backend distinguishes between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    Update,
}

/// Opaque per-`Session` token standing in for a strong instance-to-session
/// back-reference. Comparing two instances' `SessionId`s is how
/// `Session::delete` rejects a query built against a different session,
/// without instances holding anything that could form a reference cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

impl SessionId {
    pub fn fresh() -> Self {
        SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Per-instance bookkeeping tracked by the session core.
#[derive(Debug, Clone)]
pub struct InstanceState {
    pub iid: Option<Iid>,
    pub persistent: bool,
    pub deleted: bool,
    pub action: Action,
    pub score: Option<f64>,
}

impl Default for InstanceState {
    fn default() -> Self {
        Self {
            iid: None,
            persistent: false,
            deleted: false,
            action: Action::None,
            score: None,
        }
    }
}

impl InstanceState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Contract a domain struct implements to participate in a session.
///
/// Deliberately object-safe: no generic methods, no `Self`-returning
/// methods, so `Box<dyn Model>` can hold heterogeneous instances inside one
/// `SessionModel` bucket the way the identity map must.
pub trait Model: std::fmt::Debug + Send + Sync {
    /// Static descriptor for this instance's model.
    fn meta(&self) -> &Meta;

    /// Current session-core bookkeeping for this instance.
    fn state(&self) -> &InstanceState;

    /// Mutable access to session-core bookkeeping.
    fn state_mut(&mut self) -> &mut InstanceState;

    /// The instance's primary-key value. Unspecified while `!persistent`.
    fn pkvalue(&self) -> Value;

    /// Assign the instance's primary key, as reported by a backend after
    /// commit.
    fn set_pkvalue(&mut self, value: Value);

    /// Clear the instance's primary key, used when staging a non-persistent
    /// add so the backend assigns a fresh one.
    fn clear_pkvalue(&mut self);

    /// The session this instance is currently bound to, if any.
    fn session_id(&self) -> Option<SessionId>;

    /// Bind or unbind this instance's owning session.
    fn set_session_id(&mut self, session_id: Option<SessionId>);
}

/// A shared, interior-mutable handle to a model instance.
///
/// Rust has no reference semantics to lean on the way the system this is
/// modeled after does: an instance handed to `add` needs to be both stored
/// in the identity map *and* handed back to the caller as the same logical
/// object, and later mutated in place when a commit result comes back. A
/// `Box<dyn Model>` can't do that without requiring `Clone` on every model;
/// an `Arc<Mutex<dyn Model>>` can, at the cost of a lock per access — an
/// acceptable cost given the single-threaded cooperative model the session
/// core runs under.
pub type ModelHandle = Arc<Mutex<dyn Model>>;

/// Wrap a concrete model in a [`ModelHandle`].
pub fn model_handle<M: Model + 'static>(model: M) -> ModelHandle {
    Arc::new(Mutex::new(model))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_iids_are_distinct() {
        let a = Iid::next_local();
        let b = Iid::next_local();
        assert_ne!(a, b);
    }

    #[test]
    fn session_ids_are_distinct() {
        assert_ne!(SessionId::fresh(), SessionId::fresh());
    }

    #[test]
    fn default_instance_state_is_transient() {
        let s = InstanceState::new();
        assert!(s.iid.is_none());
        assert!(!s.persistent);
        assert!(!s.deleted);
    }
}
