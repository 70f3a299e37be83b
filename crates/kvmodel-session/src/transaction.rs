//! The transaction state machine and its RAII guard.
//!
//! Rust ownership rules rule out the back-and-forth reference the system
//! this is modeled after uses (a `Transaction` holding its `Session`, which
//! itself held the `Transaction`). Instead `Session` tracks whether a
//! transaction is open directly, and [`Transaction`] is a short-lived,
//! borrowing guard returned by [`crate::session::Session::begin`]: it
//! proxies `add`/`delete`/`query` to the session it borrows, and its `Drop`
//! impl rolls back if neither `commit` nor `rollback` was called explicitly
//! — the RAII equivalent of "exit without having committed".

use asupersync::{Cx, Outcome};
use kvmodel_core::{Error, Meta, ModelDictionary, ModelHandle, Value};
use kvmodel_query::Query;

use crate::session::{Deletable, Session};

/// Options controlling signal emission for one transaction.
#[derive(Debug, Clone, Copy)]
pub struct TransactionOptions {
    pub signal_commit: bool,
    pub signal_delete: bool,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            signal_commit: true,
            signal_delete: true,
        }
    }
}

/// What a successful commit produced.
#[derive(Debug, Default)]
pub struct CommitResult {
    pub saved: ModelDictionary<Vec<ModelHandle>>,
    pub deleted: ModelDictionary<Vec<Value>>,
    /// `post_commit`/`post_delete` subscriber failures. These never fail
    /// the commit itself (robust dispatch) but are surfaced for callers
    /// that want to know.
    pub subscriber_errors: Vec<Error>,
}

/// A borrowing handle to an open transaction. Obtained from
/// [`Session::begin`]; proxies staging operations back to the session it
/// borrows and resolves on `commit` or `rollback`.
pub struct Transaction<'a> {
    session: &'a mut Session,
    resolved: bool,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(session: &'a mut Session) -> Self {
        Self {
            session,
            resolved: false,
        }
    }

    pub fn add(&mut self, handle: ModelHandle, modified: bool) -> Result<ModelHandle, Error> {
        self.session.stage_add(handle, modified, None, false)
    }

    pub fn delete(&mut self, target: Deletable) -> Result<Option<ModelHandle>, Error> {
        self.session.stage_delete(target)
    }

    pub fn query(&self, meta: &Meta) -> Query {
        self.session.query(meta)
    }

    pub fn executed(&self) -> bool {
        self.resolved
    }

    /// Commit the transaction this guard was created for.
    pub async fn commit(mut self, cx: &Cx) -> Outcome<CommitResult, Error> {
        self.resolved = true;
        self.session.commit(cx).await
    }

    /// Roll back explicitly, discarding all staged work.
    pub fn rollback(mut self) {
        self.resolved = true;
        self.session.rollback();
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.session.rollback();
        }
    }
}
