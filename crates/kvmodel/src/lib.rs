//! A unit-of-work session and transaction core over pluggable key/value
//! backends.
//!
//! This crate is a thin façade: [`kvmodel_core`] supplies the vocabulary
//! types (`Value`, `Meta`, `Model`, `InstanceState`), [`kvmodel_query`]
//! the opaque filter/query representation, and [`kvmodel_session`] the
//! `Session`/`Transaction`/`Manager` unit-of-work itself. Enable the
//! `memory-backend` feature for [`kvmodel_memory::MemoryBackend`], an
//! in-process reference `BackendAdapter` used by this crate's own test
//! suite and suitable for examples.

pub use kvmodel_core::{
    Action, BackendError, BackendErrorKind, CommitException, Error, Iid, InstanceState, Meta,
    Model, ModelDictionary, ModelHandle, ModelType, Result, SessionId, Value, hash_value,
    model_handle,
};
pub use kvmodel_query::{FilterClause, FilterOp, FromRaw, Query, RawRecord};
pub use kvmodel_session::{
    BackendAdapter, CallSite, CapabilityLoader, CommitResult, Deletable, InstanceResult, Manager,
    ModelResult, N1DetectionConfig, N1Stats, N1Tracker, Router, Session, SessionConfig,
    SessionData, SignalHub, SignalKind, SignalPayload, Subscriber, Transaction, TransactionOptions,
};

#[cfg(feature = "memory-backend")]
pub use kvmodel_memory::MemoryBackend;
