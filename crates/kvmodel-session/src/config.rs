//! Construction-time configuration for a session's default behavior.
//!
//! There is no CLI, file format, or environment variable surface here —
//! callers build a [`SessionConfig`] in code and pass it to whatever
//! constructs their [`crate::manager::Manager`]s and
//! [`crate::transaction::TransactionOptions`] defaults.

/// Defaults applied when a caller doesn't override them per-transaction.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub signal_commit: bool,
    pub signal_delete: bool,
    pub n1_detection: Option<N1DetectionConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            signal_commit: true,
            signal_delete: true,
            n1_detection: Some(N1DetectionConfig::default()),
        }
    }
}

impl SessionConfig {
    pub fn transaction_options(&self) -> crate::transaction::TransactionOptions {
        crate::transaction::TransactionOptions {
            signal_commit: self.signal_commit,
            signal_delete: self.signal_delete,
        }
    }
}

/// Threshold controlling when a repeatedly-loaded lazy capability is
/// reported as a likely N+1 pattern.
#[derive(Debug, Clone, Copy)]
pub struct N1DetectionConfig {
    pub threshold: usize,
}

impl Default for N1DetectionConfig {
    fn default() -> Self {
        Self { threshold: 10 }
    }
}

impl N1DetectionConfig {
    pub fn with_threshold(threshold: usize) -> Self {
        Self { threshold }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_enables_signals_and_detection() {
        let cfg = SessionConfig::default();
        assert!(cfg.signal_commit);
        assert!(cfg.signal_delete);
        assert!(cfg.n1_detection.is_some());
    }
}
