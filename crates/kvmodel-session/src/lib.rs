//! Session and unit-of-work core.
//!
//! `Session` tracks every instance staged for writing or deletion since its
//! last commit, grouped per model by [`session_model::SessionModel`], and
//! dispatches them through a [`backend::BackendAdapter`] either implicitly
//! (a plain `add`/`delete` outside any transaction) or explicitly via
//! [`transaction::Transaction`]. [`manager::Manager`] binds one model's
//! `Meta` to its backend pair; [`manager::Router`] is the registry of
//! managers and the session factory, and owns the per-process
//! [`signals::SignalHub`] every session derived from it shares.

pub mod backend;
pub mod config;
pub mod manager;
pub mod n1_detection;
pub mod session;
pub mod session_model;
pub mod signals;
pub mod transaction;

pub use backend::{BackendAdapter, InstanceResult, ModelResult, SessionData};
pub use config::{N1DetectionConfig, SessionConfig};
pub use manager::{CapabilityLoader, Manager, Router};
pub use n1_detection::{CallSite, N1Stats, N1Tracker};
pub use session::{Deletable, Session};
pub use session_model::SessionModel;
pub use signals::{SignalHub, SignalKind, SignalPayload, Subscriber};
pub use transaction::{CommitResult, Transaction, TransactionOptions};
