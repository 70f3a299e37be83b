//! Opaque per-model descriptor.
//!
//! `Meta` is the canonical key used across the session core: `SessionModel`
//! buckets, signal payloads, and `Manager` registration are all keyed by
//! `Meta` identity rather than by a model's Rust type, which lets the
//! session treat `Structure` and `Object` models uniformly without a type
//! parameter everywhere.

use std::sync::Arc;

use crate::value::Value;

/// Whether a model's persistence unit is a single addressable row
/// (`Object`) or a remote data structure such as a list, set, or map
/// (`Structure`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    Object,
    Structure,
}

struct MetaInner {
    name: String,
    pk_name: String,
    model_type: ModelType,
    pk_to_python: Box<dyn Fn(&Value, &str) -> Value + Send + Sync>,
}

/// Opaque model descriptor. Cloning a `Meta` is cheap (one `Arc` bump) and
/// two clones of the same `Meta` compare equal by pointer identity, not by
/// field equality — a `Meta` built separately with identical fields is a
/// distinct key.
#[derive(Clone)]
pub struct Meta(Arc<MetaInner>);

impl Meta {
    pub fn new(
        name: impl Into<String>,
        pk_name: impl Into<String>,
        model_type: ModelType,
        pk_to_python: impl Fn(&Value, &str) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(MetaInner {
            name: name.into(),
            pk_name: pk_name.into(),
            model_type,
            pk_to_python: Box::new(pk_to_python),
        }))
    }

    /// A `Meta` whose primary key needs no coercion, the common case for
    /// backends that already hand back the right `Value` variant.
    pub fn identity(name: impl Into<String>, pk_name: impl Into<String>, model_type: ModelType) -> Self {
        Self::new(name, pk_name, model_type, |v, _backend| v.clone())
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn pk_name(&self) -> &str {
        &self.0.pk_name
    }

    pub fn model_type(&self) -> ModelType {
        self.0.model_type
    }

    /// Coerce a raw primary-key value as returned by `backend_name` into the
    /// canonical representation used for identity comparisons.
    pub fn pk_to_python(&self, raw: &Value, backend_name: &str) -> Value {
        (self.0.pk_to_python)(raw, backend_name)
    }

    fn ptr(&self) -> *const MetaInner {
        Arc::as_ptr(&self.0)
    }
}

impl PartialEq for Meta {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.ptr(), other.ptr())
    }
}

impl Eq for Meta {}

impl std::hash::Hash for Meta {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ptr().hash(state);
    }
}

impl std::fmt::Debug for Meta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Meta")
            .field("name", &self.0.name)
            .field("pk_name", &self.0.pk_name)
            .field("model_type", &self.0.model_type)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_metas_with_identical_fields_are_not_equal() {
        let a = Meta::identity("widget", "id", ModelType::Object);
        let b = Meta::identity("widget", "id", ModelType::Object);
        assert_ne!(a, b);
    }

    #[test]
    fn clone_compares_equal() {
        let a = Meta::identity("widget", "id", ModelType::Object);
        let b = a.clone();
        assert_eq!(a, b);
    }
}
