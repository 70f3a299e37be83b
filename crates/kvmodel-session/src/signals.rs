//! `SignalHub`: pre/post commit/delete fan-out.
//!
//! Only `post_commit` dispatch is *robust*: a subscriber raising does not
//! abort the remaining subscribers or the commit itself, but the commit's
//! caller can still see what subscribers failed via
//! [`crate::transaction::CommitResult::subscriber_errors`]. `pre_commit`,
//! `pre_delete`, and `post_delete` are all non-robust: the first subscriber
//! failure aborts dispatch and propagates out of `commit()`. Subscribers may
//! return a deferred outcome; the transaction awaits every one of them
//! before declaring itself finished.
#![allow(clippy::type_complexity)]

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use asupersync::{Cx, Outcome};
use kvmodel_core::{Error, Meta, ModelHandle, SessionId, Value};

/// What a signal carries: the model it concerns, the affected instances or
/// ids, and the session that produced them.
#[derive(Clone)]
pub enum SignalPayload {
    Commit {
        meta: Meta,
        instances: Vec<ModelHandle>,
    },
    Delete {
        meta: Meta,
        ids: Vec<Value>,
    },
}

pub type Subscriber = std::sync::Arc<
    dyn Fn(&Cx, &SignalPayload, SessionId) -> Pin<Box<dyn Future<Output = Outcome<(), Error>> + Send>>
        + Send
        + Sync,
>;

#[derive(Default)]
struct Subscribers {
    pre_commit: Vec<Subscriber>,
    post_commit: Vec<Subscriber>,
    pre_delete: Vec<Subscriber>,
    post_delete: Vec<Subscriber>,
}

/// In-process signal bus. One per `Router`, shared by every `Session`
/// derived from it.
#[derive(Default)]
pub struct SignalHub {
    subscribers: Mutex<Subscribers>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    PreCommit,
    PostCommit,
    PreDelete,
    PostDelete,
}

impl SignalHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kind: SignalKind, subscriber: Subscriber) {
        let mut subs = self.subscribers.lock().expect("signal hub lock poisoned");
        match kind {
            SignalKind::PreCommit => subs.pre_commit.push(subscriber),
            SignalKind::PostCommit => subs.post_commit.push(subscriber),
            SignalKind::PreDelete => subs.pre_delete.push(subscriber),
            SignalKind::PostDelete => subs.post_delete.push(subscriber),
        }
    }

    fn snapshot(&self, kind: SignalKind) -> Vec<Subscriber> {
        let subs = self.subscribers.lock().expect("signal hub lock poisoned");
        match kind {
            SignalKind::PreCommit => subs.pre_commit.clone(),
            SignalKind::PostCommit => subs.post_commit.clone(),
            SignalKind::PreDelete => subs.pre_delete.clone(),
            SignalKind::PostDelete => subs.post_delete.clone(),
        }
    }

    /// Fire a non-robust signal (`pre_commit`/`pre_delete`/`post_delete`):
    /// the first subscriber failure aborts dispatch and propagates.
    pub async fn fire(&self, cx: &Cx, kind: SignalKind, payload: &SignalPayload, session_id: SessionId) -> Outcome<(), Error> {
        for sub in self.snapshot(kind) {
            match sub(cx, payload, session_id).await {
                Outcome::Ok(()) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }
        Outcome::Ok(())
    }

    /// Fire a robust signal (`post_commit` only): every subscriber runs
    /// regardless of earlier failures; failures are collected and returned
    /// rather than propagated.
    pub async fn fire_robust(&self, cx: &Cx, kind: SignalKind, payload: &SignalPayload, session_id: SessionId) -> Vec<Error> {
        let mut errors = Vec::new();
        for sub in self.snapshot(kind) {
            match sub(cx, payload, session_id).await {
                Outcome::Ok(()) => {}
                Outcome::Err(e) => errors.push(e),
                Outcome::Cancelled(_) | Outcome::Panicked(_) => {
                    errors.push(Error::ValueError(format!(
                        "{:?} subscriber did not complete",
                        kind
                    )));
                }
            }
        }
        errors
    }
}
