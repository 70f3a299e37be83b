//! Core value, identity, and error types shared by the session and
//! transaction core.
//!
//! This crate intentionally does not know about backends, queries, or the
//! unit-of-work itself — those live in `kvmodel-query` and
//! `kvmodel-session`. What lives here is the vocabulary every other crate
//! in the workspace needs: a backend-agnostic [`Value`], the [`Model`]
//! contract a domain struct implements, per-instance [`InstanceState`], and
//! the [`Meta`] descriptor used as the canonical key throughout.

mod error;
mod meta;
mod model;
mod value;

pub use error::{BackendError, BackendErrorKind, CommitException, Error, Result};
pub use meta::{Meta, ModelType};
pub use model::{Action, InstanceState, Iid, Model, ModelHandle, SessionId, model_handle};
pub use value::{Value, hash_value};

/// An identity-preserving mapping keyed by [`Meta`] reference/hash equality
/// rather than by a Rust type parameter. Used wherever per-model results
/// are accumulated across a transaction (`saved`, `deleted`) without the
/// session core needing to be generic over every model it touches.
pub type ModelDictionary<T> = std::collections::HashMap<Meta, T>;
