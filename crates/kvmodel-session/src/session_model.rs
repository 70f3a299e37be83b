//! `SessionModel`: the unit-of-work bucket for one model.

use std::sync::Arc;

use indexmap::IndexMap;

use kvmodel_core::{Action, Error, Iid, Meta, ModelHandle, ModelType, Result, Value};
use kvmodel_query::Query;

use crate::backend::{BackendAdapter, InstanceResult, SessionData};
use crate::manager::Manager;

/// Which bucket-placement rules a `SessionModel` follows: `Object` models
/// distinguish new/modified by persistence; `Structure` models (lists,
/// sets, maps addressed as a whole) always route to `_modified` and never
/// carry a `deleted` flag the way a row does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Object,
    Structure,
}

impl From<ModelType> for Kind {
    fn from(t: ModelType) -> Self {
        match t {
            ModelType::Object => Kind::Object,
            ModelType::Structure => Kind::Structure,
        }
    }
}

fn iid_of(handle: &ModelHandle) -> Option<Iid> {
    handle.lock().expect("model lock poisoned").state().iid.clone()
}

fn pkvalue_of(handle: &ModelHandle) -> Value {
    handle.lock().expect("model lock poisoned").pkvalue()
}

/// Unit-of-work bucket for one model. Exclusively owned by one `Session`.
pub struct SessionModel {
    manager: Manager,
    kind: Kind,
    new: IndexMap<Iid, ModelHandle>,
    modified: IndexMap<Iid, ModelHandle>,
    deleted: IndexMap<Iid, ModelHandle>,
    delete_query: Vec<Query>,
    queries: Vec<Query>,
}

impl SessionModel {
    pub fn new(manager: Manager) -> Self {
        let kind = Kind::from(manager.meta().model_type());
        Self {
            manager,
            kind,
            new: IndexMap::new(),
            modified: IndexMap::new(),
            deleted: IndexMap::new(),
            delete_query: Vec::new(),
            queries: Vec::new(),
        }
    }

    pub fn meta(&self) -> &Meta {
        self.manager.meta()
    }

    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    pub fn is_empty(&self) -> bool {
        self.new.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.delete_query.is_empty()
            && self.queries.is_empty()
    }

    pub fn contains(&self, iid: &Iid) -> bool {
        self.new.contains_key(iid) || self.modified.contains_key(iid) || self.deleted.contains_key(iid)
    }

    /// `_new` then `_modified`, in insertion order — everything that needs
    /// writing back on the next commit.
    pub fn iterdirty(&self) -> impl Iterator<Item = &ModelHandle> {
        self.new.values().chain(self.modified.values())
    }

    pub fn dirty_count(&self) -> usize {
        self.new.len() + self.modified.len()
    }

    /// Remove any bucket entry under the same `iid`, erroring if the same
    /// `iid` is mapped to two distinct object identities (pointer identity
    /// of the underlying `Arc` allocation).
    fn remove_existing(&mut self, iid: &Iid) -> Result<Option<ModelHandle>> {
        let from_new = self.new.shift_remove(iid);
        let from_modified = self.modified.shift_remove(iid);
        let from_deleted = self.deleted.shift_remove(iid);

        let found: Vec<ModelHandle> = [from_new, from_modified, from_deleted]
            .into_iter()
            .flatten()
            .collect();

        if found.len() > 1 {
            let first = Arc::as_ptr(&found[0]);
            if found.iter().any(|h| !std::ptr::eq(Arc::as_ptr(h), first)) {
                return Err(Error::DuplicateIdentity(format!(
                    "{} is duplicated",
                    self.manager.meta().name()
                )));
            }
        }

        Ok(found.into_iter().next())
    }

    /// Stage an instance for writing. See the commit-pipeline contract for
    /// the exact persistence/placement rules this follows. Returns the same
    /// handle that was passed in.
    pub fn add(
        &mut self,
        handle: ModelHandle,
        modified: bool,
        persistent: Option<bool>,
        force_update: bool,
    ) -> Result<ModelHandle> {
        {
            let guard = handle.lock().expect("model lock poisoned");
            if guard.state().deleted {
                return Err(Error::ValueError(format!(
                    "cannot add a deleted {} instance",
                    self.manager.meta().name()
                )));
            }
        }

        if let Some(iid) = iid_of(&handle) {
            self.remove_existing(&iid)?;
        }

        let effective_persistent = persistent.unwrap_or(handle.lock().expect("model lock poisoned").state().persistent);

        let iid = {
            let mut guard = handle.lock().expect("model lock poisoned");
            if !effective_persistent {
                guard.clear_pkvalue();
                let st = guard.state_mut();
                st.persistent = false;
                st.iid = Some(Iid::next_local());
                st.action = Action::None;
            } else if persistent == Some(true) {
                let pk = guard.pkvalue();
                guard.set_pkvalue(pk.clone());
                let st = guard.state_mut();
                st.persistent = true;
                st.iid = Some(Iid::Pk(pk));
                st.action = Action::None;
            } else {
                let existing_iid = guard.state().iid.clone();
                let pk = guard.pkvalue();
                let st = guard.state_mut();
                st.persistent = true;
                st.action = if force_update { Action::Update } else { Action::None };
                if st.iid.is_none() {
                    st.iid = Some(existing_iid.unwrap_or(Iid::Pk(pk)));
                }
            }

            if matches!(self.kind, Kind::Structure) {
                guard.state_mut().deleted = false;
            }

            guard.state().iid.clone().expect("iid always assigned above")
        };

        let persistent_now = handle.lock().expect("model lock poisoned").state().persistent;

        if matches!(self.kind, Kind::Structure) {
            self.remove_existing(&iid)?;
            self.modified.insert(iid, handle.clone());
        } else if persistent_now {
            if modified {
                self.modified.insert(iid, handle.clone());
            }
            // else: persistent, unmodified add is a no-op presence assertion.
        } else {
            self.new.insert(iid, handle.clone());
        }

        Ok(handle)
    }

    /// Remove an instance, marking it deleted if it was persistent. Mirrors
    /// `pop` followed by a deletion re-insertion, not a second lookup.
    pub fn delete(&mut self, handle: &ModelHandle) -> Result<Option<ModelHandle>> {
        let Some(iid) = iid_of(handle) else {
            return Ok(None);
        };
        let Some(removed) = self.remove_existing(&iid)? else {
            return Ok(None);
        };
        let persistent = removed.lock().expect("model lock poisoned").state().persistent;
        if persistent {
            removed.lock().expect("model lock poisoned").state_mut().deleted = true;
            self.deleted.insert(iid, removed.clone());
        } else {
            removed.lock().expect("model lock poisoned").set_session_id(None);
        }
        Ok(Some(removed))
    }

    pub fn pop(&mut self, iid: &Iid) -> Result<Option<ModelHandle>> {
        self.remove_existing(iid)
    }

    pub fn expunge(&mut self, iid: &Iid) -> Result<()> {
        if let Some(instance) = self.remove_existing(iid)? {
            instance.lock().expect("model lock poisoned").set_session_id(None);
        }
        Ok(())
    }

    pub fn expunge_all(&mut self) {
        for (_, handle) in self.new.drain(..).chain(self.modified.drain(..)).chain(self.deleted.drain(..)) {
            handle.lock().expect("model lock poisoned").set_session_id(None);
        }
    }

    /// Returns the instance currently staged as modified or deleted — never
    /// the new bucket, matching the contract's lookup semantics.
    pub fn get(&self, iid: &Iid) -> Option<ModelHandle> {
        self.modified
            .get(iid)
            .or_else(|| self.deleted.get(iid))
            .cloned()
    }

    /// Instances currently staged for deletion, for pre-delete signal
    /// dispatch. Does not consume them — [`SessionModel::take_delete_query`]
    /// does that once the backend dispatch is actually built.
    pub fn deleted_instances(&self) -> impl Iterator<Item = &ModelHandle> {
        self.deleted.values()
    }

    pub fn queue_query(&mut self, query: Query) {
        self.queries.push(query);
    }

    pub fn queue_delete_query(&mut self, query: Query) {
        self.delete_query.push(query);
    }

    pub fn pending_queries(&self) -> &[Query] {
        &self.queries
    }

    /// Consume the deferred delete buffers into a single dispatchable
    /// query, or `None` if nothing is pending.
    pub fn take_delete_query(&mut self) -> Option<Query> {
        let mut queries = std::mem::take(&mut self.delete_query);

        if !self.deleted.is_empty() {
            let pks: Vec<_> = self.deleted.values().map(pkvalue_of).collect();
            self.deleted.clear();
            match self.kind {
                Kind::Object => {
                    queries.push(
                        Query::new(self.manager.meta().clone())
                            .filter_in(self.manager.meta().pk_name(), pks),
                    );
                }
                Kind::Structure => {
                    for pk in pks {
                        queries.push(
                            Query::new(self.manager.meta().clone())
                                .filter_eq(self.manager.meta().pk_name(), pk),
                        );
                    }
                }
            }
        }

        if queries.is_empty() {
            return None;
        }

        let mut iter = queries.into_iter();
        let first = iter.next().expect("checked non-empty above");
        Some(first.union(iter))
    }

    /// Reconcile backend-reported results: pop each referenced instance,
    /// apply the backend's verdict, and collect what was saved, what was
    /// deleted, and what failed.
    pub fn post_commit(
        &mut self,
        results: Vec<std::result::Result<InstanceResult, Error>>,
    ) -> (Vec<ModelHandle>, Vec<Value>, Vec<Error>) {
        let mut saved = Vec::new();
        let mut deleted = Vec::new();
        let mut errors = Vec::new();

        for result in results {
            let result = match result {
                Ok(r) => r,
                Err(e) => {
                    errors.push(Error::ValueError(format!(
                        "exception while committing {}. {e}",
                        self.manager.meta().name()
                    )));
                    continue;
                }
            };

            let id = self.manager.meta().pk_to_python(&result.id, "backend");

            if result.deleted {
                deleted.push(id);
                continue;
            }

            let popped = match self.remove_existing(&result.iid) {
                Ok(Some(inst)) => inst,
                Ok(None) => {
                    errors.push(Error::InvalidTransaction(format!(
                        "{} session received id {:?} which is not in the session",
                        self.manager.meta().name(),
                        result.id
                    )));
                    continue;
                }
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };

            popped.lock().expect("model lock poisoned").set_pkvalue(id);

            match self.add(popped, false, Some(result.persistent), false) {
                Ok(added) => {
                    added.lock().expect("model lock poisoned").state_mut().score = result.score;
                    if result.persistent {
                        saved.push(added);
                    }
                }
                Err(e) => errors.push(e),
            }
        }

        (saved, deleted, errors)
    }

    /// Split this model's pending work across write and read backends. The
    /// caller (`Session::backends_data`) fires pre-commit/pre-delete
    /// signals before invoking this, and consumes `take_delete_query`
    /// separately so both call sites see the same emptied state.
    pub fn backends_data(&mut self) -> Vec<(Arc<dyn BackendAdapter>, SessionData)> {
        let dirty: Vec<ModelHandle> = self.iterdirty().cloned().collect();
        let deletes = self.take_delete_query();
        let queries = std::mem::take(&mut self.queries);

        if dirty.is_empty() && deletes.is_none() && queries.is_empty() {
            return Vec::new();
        }

        let write = self.manager.write_backend();
        let read = self.manager.read_backend();

        if Arc::ptr_eq(write, read) {
            vec![(
                write.clone(),
                SessionData {
                    meta: self.manager.meta().clone(),
                    dirty,
                    deletes,
                    queries,
                },
            )]
        } else {
            let mut out = Vec::new();
            if !dirty.is_empty() || deletes.is_some() {
                out.push((
                    write.clone(),
                    SessionData {
                        meta: self.manager.meta().clone(),
                        dirty,
                        deletes,
                        queries: Vec::new(),
                    },
                ));
            }
            if !queries.is_empty() {
                out.push((
                    read.clone(),
                    SessionData {
                        meta: self.manager.meta().clone(),
                        dirty: Vec::new(),
                        deletes: None,
                        queries,
                    },
                ));
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvmodel_core::{InstanceState, Model, SessionId, model_handle};
    use std::sync::Arc;

    #[derive(Debug)]
    struct Widget {
        meta: Meta,
        id: Option<i64>,
        state: InstanceState,
        session_id: Option<SessionId>,
    }

    impl Model for Widget {
        fn meta(&self) -> &Meta {
            &self.meta
        }
        fn state(&self) -> &InstanceState {
            &self.state
        }
        fn state_mut(&mut self) -> &mut InstanceState {
            &mut self.state
        }
        fn pkvalue(&self) -> Value {
            self.id.map(Value::Int).unwrap_or(Value::Null)
        }
        fn set_pkvalue(&mut self, value: Value) {
            self.id = value.as_int();
        }
        fn clear_pkvalue(&mut self) {
            self.id = None;
        }
        fn session_id(&self) -> Option<SessionId> {
            self.session_id
        }
        fn set_session_id(&mut self, session_id: Option<SessionId>) {
            self.session_id = session_id;
        }
    }

    fn meta() -> Meta {
        Meta::identity("widget", "id", ModelType::Object)
    }

    fn manager() -> Manager {
        use crate::backend::tests_support::NullBackend;
        Manager::new(meta(), Arc::new(NullBackend), crate::manager::Router::new())
    }

    fn widget(meta: &Meta) -> ModelHandle {
        model_handle(Widget {
            meta: meta.clone(),
            id: None,
            state: InstanceState::new(),
            session_id: None,
        })
    }

    #[test]
    fn new_instance_lands_in_new_bucket() {
        let mut sm = SessionModel::new(manager());
        let w = widget(sm.meta());
        sm.add(w, true, None, false).unwrap();
        assert_eq!(sm.dirty_count(), 1);
        assert_eq!(sm.new.len(), 1);
    }

    #[test]
    fn persistent_add_with_explicit_true_lands_in_modified() {
        let mgr = manager();
        let mut sm = SessionModel::new(mgr);
        let w = widget(sm.meta());
        w.lock().unwrap().set_pkvalue(Value::Int(7));
        sm.add(w, true, Some(true), false).unwrap();
        assert_eq!(sm.modified.len(), 1);
        assert!(sm.new.is_empty());
    }

    #[test]
    fn delete_of_persistent_instance_marks_deleted_bucket() {
        let mut sm = SessionModel::new(manager());
        let w = widget(sm.meta());
        w.lock().unwrap().set_pkvalue(Value::Int(3));
        let added = sm.add(w, true, Some(true), false).unwrap();
        sm.delete(&added).unwrap();
        assert_eq!(sm.deleted.len(), 1);
        assert!(sm.modified.is_empty());
    }

    #[test]
    fn backends_data_splits_dirty_and_queries_across_distinct_backends() {
        use crate::backend::tests_support::NullBackend;

        let write: Arc<dyn BackendAdapter> = Arc::new(NullBackend);
        let read: Arc<dyn BackendAdapter> = Arc::new(NullBackend);
        let mgr = Manager::with_read_backend(meta(), write.clone(), read.clone(), crate::manager::Router::new());
        let mut sm = SessionModel::new(mgr);

        let w = widget(sm.meta());
        sm.add(w, true, None, false).unwrap();
        sm.queue_query(Query::new(sm.meta().clone()).filter_eq("name", Value::Text("a".into())));
        assert_eq!(sm.pending_queries().len(), 1);

        let mut dispatch = sm.backends_data();
        assert_eq!(dispatch.len(), 2);

        let (write_target, write_data) = dispatch.remove(0);
        assert!(Arc::ptr_eq(&write_target, &write));
        assert_eq!(write_data.dirty.len(), 1);
        assert!(write_data.deletes.is_none());
        assert!(write_data.queries.is_empty());

        let (read_target, read_data) = dispatch.remove(0);
        assert!(Arc::ptr_eq(&read_target, &read));
        assert!(read_data.dirty.is_empty());
        assert!(read_data.deletes.is_none());
        assert_eq!(read_data.queries.len(), 1);

        assert!(sm.pending_queries().is_empty());
    }

    #[test]
    fn duplicate_identity_across_buckets_is_rejected() {
        let mut sm = SessionModel::new(manager());
        let w = widget(sm.meta());
        let iid = Iid::Local(999);
        w.lock().unwrap().state_mut().iid = Some(iid.clone());
        sm.new.insert(iid.clone(), w.clone());
        sm.modified.insert(iid.clone(), model_handle(Widget {
            meta: sm.meta().clone(),
            id: None,
            state: InstanceState::new(),
            session_id: None,
        }));
        let err = sm.pop(&iid).unwrap_err();
        assert!(matches!(err, Error::DuplicateIdentity(_)));
    }
}
