//! `Session`: the aggregate unit of work across every model touched in one
//! logical unit of work.

use std::sync::Arc;

use asupersync::{Cx, Outcome};
use indexmap::IndexMap;
use kvmodel_core::{Error, Iid, Meta, ModelHandle, Result, SessionId, Value};
use kvmodel_query::{FromRaw, Query, RawRecord};

use crate::backend::{BackendAdapter, ModelResult, SessionData};
use crate::manager::{Manager, Router};
use crate::session_model::SessionModel;
use crate::signals::{SignalKind, SignalPayload};
use crate::transaction::{CommitResult, Transaction, TransactionOptions};

/// What `Session::delete` can be called with: a concrete instance, or a
/// query describing a set of rows to delete once this transaction commits.
pub enum Deletable {
    Instance(ModelHandle),
    Query(Query),
}

/// The aggregate of every model's unit-of-work bucket plus at most one open
/// transaction. Owned by one logical task at a time (not `Clone`, not
/// `Sync`): mutating methods take `&mut self`.
pub struct Session {
    id: SessionId,
    router: Router,
    models: IndexMap<Manager, SessionModel>,
    transaction_open: bool,
    pending_options: TransactionOptions,
}

impl Session {
    pub fn new(router: Router) -> Self {
        Self {
            id: SessionId::fresh(),
            router,
            models: IndexMap::new(),
            transaction_open: false,
            pending_options: TransactionOptions::default(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction_open
    }

    /// Every `_new`/`_modified` instance iid across every model touched by
    /// this session, mirroring the aggregate `dirty` property.
    pub fn dirty(&self) -> Vec<Iid> {
        self.models
            .values()
            .flat_map(|sm| sm.iterdirty().filter_map(|h| h.lock().ok().and_then(|g| g.state().iid.clone())))
            .collect()
    }

    pub fn contains(&self, handle: &ModelHandle) -> bool {
        let Some(iid) = handle.lock().expect("model lock poisoned").state().iid.clone() else {
            return false;
        };
        let meta = handle.lock().expect("model lock poisoned").meta().clone();
        self.models
            .iter()
            .find(|(m, _)| *m.meta() == meta)
            .is_some_and(|(_, sm)| sm.contains(&iid))
    }

    fn manager_for(&self, meta: &Meta) -> Result<Manager> {
        self.router
            .get(meta)
            .ok_or_else(|| Error::InvalidTransaction(format!("\"{}\" not session mapper", meta.name())))
    }

    fn model_mut(&mut self, meta: &Meta, create: bool) -> Result<Option<&mut SessionModel>> {
        if let Some((_, sm)) = self.models.iter_mut().find(|(m, _)| m.meta() == meta) {
            return Ok(Some(sm));
        }
        if !create {
            return Ok(None);
        }
        let manager = self.manager_for(meta)?;
        let sm = SessionModel::new(manager.clone());
        self.models.insert(manager, sm);
        Ok(self.models.iter_mut().find(|(m, _)| m.meta() == meta).map(|(_, sm)| sm))
    }

    /// Begin an explicit transaction. Fails if one is already open.
    pub fn begin(&mut self, options: TransactionOptions) -> Result<Transaction<'_>> {
        if self.transaction_open {
            return Err(Error::InvalidTransaction(
                "a transaction is already begun".to_string(),
            ));
        }
        self.transaction_open = true;
        self.pending_options = options;
        Ok(Transaction::new(self))
    }

    /// Discard all staged work and close any open transaction. A no-op if
    /// no transaction is open (matches the source behavior of rolling back
    /// an already-finished transaction having no effect).
    pub fn rollback(&mut self) {
        if !self.transaction_open {
            return;
        }
        self.expunge(None);
        self.transaction_open = false;
    }

    /// Synchronous staging step shared by `Transaction::add` and the
    /// implicit-commit path in [`Session::add`].
    pub(crate) fn stage_add(
        &mut self,
        handle: ModelHandle,
        modified: bool,
        persistent: Option<bool>,
        force_update: bool,
    ) -> Result<ModelHandle> {
        let meta = handle.lock().expect("model lock poisoned").meta().clone();
        let sm = self
            .model_mut(&meta, true)?
            .expect("create=true always yields a bucket");
        let added = sm.add(handle, modified, persistent, force_update)?;
        added.lock().expect("model lock poisoned").set_session_id(Some(self.id));
        Ok(added)
    }

    pub(crate) fn stage_delete(&mut self, target: Deletable) -> Result<Option<ModelHandle>> {
        match target {
            Deletable::Instance(handle) => {
                let meta = handle.lock().expect("model lock poisoned").meta().clone();
                let sm = self
                    .model_mut(&meta, true)?
                    .expect("create=true always yields a bucket");
                sm.delete(&handle)
            }
            Deletable::Query(query) => {
                if query.session_id() != Some(self.id) {
                    return Err(Error::ValueError(
                        "adding a query generated by another session".to_string(),
                    ));
                }
                let meta = query.meta().clone();
                let sm = self
                    .model_mut(&meta, true)?
                    .expect("create=true always yields a bucket");
                sm.queue_delete_query(query);
                Ok(None)
            }
        }
    }

    /// Stage an instance for writing. If `modified` and no transaction is
    /// currently open, this implicitly commits and only resolves once that
    /// commit completes — matching an autocommit session.
    pub async fn add(
        &mut self,
        cx: &Cx,
        handle: ModelHandle,
        modified: bool,
        persistent: Option<bool>,
        force_update: bool,
    ) -> Outcome<ModelHandle, Error> {
        let added = match self.stage_add(handle, modified, persistent, force_update) {
            Ok(h) => h,
            Err(e) => return Outcome::Err(e),
        };

        if modified && !self.transaction_open {
            match self.commit(cx).await {
                Outcome::Ok(_) => Outcome::Ok(added),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        } else {
            Outcome::Ok(added)
        }
    }

    /// Stage a deletion (instance or query). Same implicit-commit rule as
    /// [`Session::add`].
    pub async fn delete(&mut self, cx: &Cx, target: Deletable) -> Outcome<Option<ModelHandle>, Error> {
        let result = match self.stage_delete(target) {
            Ok(r) => r,
            Err(e) => return Outcome::Err(e),
        };

        if !self.transaction_open {
            match self.commit(cx).await {
                Outcome::Ok(_) => Outcome::Ok(result),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        } else {
            Outcome::Ok(result)
        }
    }

    pub fn query(&self, meta: &Meta) -> Query {
        Query::new(meta.clone()).with_session(self.id)
    }

    /// Queue a read-only query for dispatch through the read backend on the
    /// next commit, rather than fetching it immediately. Same
    /// foreign-session rejection and implicit-commit rule as
    /// [`Session::delete`]'s `Deletable::Query` arm.
    pub async fn dispatch_query(&mut self, cx: &Cx, query: Query) -> Outcome<(), Error> {
        if query.session_id() != Some(self.id) {
            return Outcome::Err(Error::ValueError(
                "dispatching a query generated by another session".to_string(),
            ));
        }
        let meta = query.meta().clone();
        let sm = match self.model_mut(&meta, true) {
            Ok(sm) => sm.expect("create=true always yields a bucket"),
            Err(e) => return Outcome::Err(e),
        };
        sm.queue_query(query);

        if !self.transaction_open {
            match self.commit(cx).await {
                Outcome::Ok(_) => Outcome::Ok(()),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        } else {
            Outcome::Ok(())
        }
    }

    pub fn empty(&self, meta: &Meta) -> Query {
        self.query(meta)
    }

    pub fn get(&self, meta: &Meta, iid: &Iid) -> Option<ModelHandle> {
        self.models
            .iter()
            .find(|(m, _)| m.meta() == meta)
            .and_then(|(_, sm)| sm.get(iid))
    }

    pub fn expunge(&mut self, target: Option<(&Meta, &Iid)>) {
        match target {
            Some((meta, iid)) => {
                if let Ok(Some(sm)) = self.model_mut(meta, false) {
                    let _ = sm.expunge(iid);
                }
            }
            None => {
                for sm in self.models.values_mut() {
                    sm.expunge_all();
                }
            }
        }
    }

    pub async fn flush(&self, cx: &Cx, meta: &Meta) -> Outcome<(), Error> {
        let manager = match self.manager_for(meta) {
            Ok(m) => m,
            Err(e) => return Outcome::Err(e),
        };
        manager.write_backend().flush(cx, meta).await
    }

    pub async fn clean(&self, cx: &Cx, meta: &Meta) -> Outcome<(), Error> {
        let manager = match self.manager_for(meta) {
            Ok(m) => m,
            Err(e) => return Outcome::Err(e),
        };
        manager.write_backend().clean(cx, meta).await
    }

    pub async fn keys(&self, cx: &Cx, meta: &Meta) -> Outcome<Vec<Value>, Error> {
        let manager = match self.manager_for(meta) {
            Ok(m) => m,
            Err(e) => return Outcome::Err(e),
        };
        manager.read_backend().model_keys(cx, meta).await
    }

    /// Look up exactly one instance matching `fields`, creating it if none
    /// match. Mirrors the filter → unique-or-create algorithm; raises
    /// `MultipleFound` rather than silently picking one when more than one
    /// row matches.
    #[tracing::instrument(level = "debug", skip(self, cx, make))]
    pub async fn get_or_create<M>(
        &mut self,
        cx: &Cx,
        meta: &Meta,
        fields: &[(&str, Value)],
        make: impl FnOnce(&RawRecord) -> Result<M>,
    ) -> Outcome<(ModelHandle, bool), Error>
    where
        M: kvmodel_core::Model + FromRaw + 'static,
    {
        let manager = match self.manager_for(meta) {
            Ok(m) => m,
            Err(e) => return Outcome::Err(e),
        };

        let mut query = self.query(meta);
        for (field, value) in fields {
            query = query.filter_eq(*field, value.clone());
        }

        let rows = match manager.read_backend().fetch(cx, &query).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        match rows.len() {
            0 => {
                let raw: RawRecord = fields.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
                let instance = match make(&raw) {
                    Ok(m) => m,
                    Err(e) => return Outcome::Err(e),
                };
                let handle = kvmodel_core::model_handle(instance);
                match self.add(cx, handle, true, None, false).await {
                    Outcome::Ok(h) => Outcome::Ok((h, true)),
                    Outcome::Err(e) => Outcome::Err(e),
                    Outcome::Cancelled(r) => Outcome::Cancelled(r),
                    Outcome::Panicked(p) => Outcome::Panicked(p),
                }
            }
            1 => match M::from_raw(meta, &rows[0]) {
                Ok(instance) => Outcome::Ok((kvmodel_core::model_handle(instance), false)),
                Err(e) => Outcome::Err(e),
            },
            n => Outcome::Err(Error::MultipleFound(n)),
        }
    }

    /// Commit the currently-open transaction, or open and commit one
    /// implicitly if none is open.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn commit(&mut self, cx: &Cx) -> Outcome<CommitResult, Error> {
        let options = if self.transaction_open {
            self.pending_options
        } else {
            TransactionOptions::default()
        };
        // Detach before dispatch: further staging during this commit begins
        // a fresh transaction rather than joining this one.
        self.transaction_open = false;

        tracing::info!(
            signal_commit = options.signal_commit,
            signal_delete = options.signal_delete,
            "committing transaction"
        );

        let signals = self.router.signals().clone();
        let mut dispatch: Vec<(Arc<dyn BackendAdapter>, SessionData)> = Vec::new();

        for sm in self.models.values_mut() {
            let meta = sm.meta().clone();

            if options.signal_delete {
                let ids: Vec<Value> = sm.deleted_instances().map(|h| h.lock().expect("model lock poisoned").pkvalue()).collect();
                if !ids.is_empty() {
                    let payload = SignalPayload::Delete { meta: meta.clone(), ids };
                    match signals.fire(cx, SignalKind::PreDelete, &payload, self.id).await {
                        Outcome::Ok(()) => {}
                        Outcome::Err(e) => return Outcome::Err(e),
                        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                        Outcome::Panicked(p) => return Outcome::Panicked(p),
                    }
                }
            }

            if options.signal_commit {
                let instances: Vec<ModelHandle> = sm.iterdirty().cloned().collect();
                if !instances.is_empty() {
                    let payload = SignalPayload::Commit { meta: meta.clone(), instances };
                    match signals.fire(cx, SignalKind::PreCommit, &payload, self.id).await {
                        Outcome::Ok(()) => {}
                        Outcome::Err(e) => return Outcome::Err(e),
                        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                        Outcome::Panicked(p) => return Outcome::Panicked(p),
                    }
                }
            }

            dispatch.extend(sm.backends_data());
        }

        if dispatch.is_empty() {
            return Outcome::Ok(CommitResult::default());
        }

        // Group by backend identity so each backend is dispatched once with
        // all of its payloads, regardless of how many models contributed.
        let mut grouped: Vec<(Arc<dyn BackendAdapter>, Vec<SessionData>)> = Vec::new();
        for (backend, data) in dispatch {
            if let Some((_, bucket)) = grouped.iter_mut().find(|(b, _)| Arc::ptr_eq(b, &backend)) {
                bucket.push(data);
            } else {
                grouped.push((backend, vec![data]));
            }
        }

        // Collect every dispatch future before awaiting any of them, so a
        // real concurrent backend could run them in parallel without this
        // core changing shape.
        let futures: Vec<_> = grouped
            .into_iter()
            .map(|(backend, data)| async move { backend.execute_session(cx, data).await })
            .collect();

        let mut responses: Vec<ModelResult> = Vec::new();
        for fut in futures {
            match fut.await {
                Outcome::Ok(rs) => responses.extend(rs),
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        let mut result = CommitResult::default();
        let mut error_messages: Vec<String> = Vec::new();
        let mut post_delete_payloads = Vec::new();
        let mut post_commit_payloads = Vec::new();

        for response in responses {
            match response {
                Err(e) => error_messages.push(e.to_string()),
                Ok((meta, instance_results)) => {
                    let Some(sm) = self.models.values_mut().find(|sm| *sm.meta() == meta) else {
                        error_messages.push(format!(
                            "{} session received a result for an unknown model",
                            meta.name()
                        ));
                        continue;
                    };
                    let wrapped: Vec<std::result::Result<_, Error>> = instance_results.into_iter().map(Ok).collect();
                    let (saved, deleted, errors) = sm.post_commit(wrapped);
                    error_messages.extend(errors.iter().map(ToString::to_string));

                    if !deleted.is_empty() {
                        result.deleted.entry(meta.clone()).or_default().extend(deleted.clone());
                        if options.signal_delete {
                            post_delete_payloads.push(SignalPayload::Delete { meta: meta.clone(), ids: deleted });
                        }
                    }
                    if !saved.is_empty() {
                        result.saved.entry(meta.clone()).or_default().extend(saved.clone());
                        if options.signal_commit {
                            post_commit_payloads.push(SignalPayload::Commit { meta: meta.clone(), instances: saved });
                        }
                    }
                }
            }
        }

        for payload in post_delete_payloads {
            match signals.fire(cx, SignalKind::PostDelete, &payload, self.id).await {
                Outcome::Ok(()) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }
        for payload in post_commit_payloads {
            let errors = signals.fire_robust(cx, SignalKind::PostCommit, &payload, self.id).await;
            result.subscriber_errors.extend(errors);
        }

        if !error_messages.is_empty() {
            return Outcome::Err(Error::Commit(kvmodel_core::CommitException::from_messages(error_messages)));
        }

        tracing::info!(
            saved_models = result.saved.len(),
            deleted_models = result.deleted.len(),
            "commit finished"
        );

        Outcome::Ok(result)
    }
}
