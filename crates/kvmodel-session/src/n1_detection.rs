//! Lazy-capability load tracking.
//!
//! Every time `Manager::load_capability` resolves a named capability against
//! an already-loaded parent instance, the call site is recorded here. Once a
//! parent type *and* capability pair crosses the configured threshold within
//! one tracker's lifetime, a single `warn!` fires at `target: "kvmodel::n1"`
//! — the same shape of signal the teacher emits for a relationship loaded
//! row-by-row instead of eagerly, generalized from "SQL relationship" to
//! "lazy capability" since this crate has no join to eagerly fetch instead.

use std::collections::HashMap;
use std::panic::Location;
use std::sync::Mutex;

/// Where a capability load was triggered from.
#[derive(Debug, Clone)]
pub struct CallSite {
    pub parent_type: String,
    pub capability: String,
    pub file: &'static str,
    pub line: u32,
}

/// Snapshot of what a tracker has observed so far.
#[derive(Debug, Clone, Copy, Default)]
pub struct N1Stats {
    pub total_loads: usize,
    pub capabilities_loaded: usize,
    pub potential_n1: usize,
}

struct TrackerState {
    counts: HashMap<(String, String), usize>,
    call_sites: Vec<CallSite>,
    warned: HashMap<(String, String), bool>,
}

/// Counts lazy-capability loads per `(parent_type, capability)` pair and
/// warns once a pair is loaded more than `threshold` times, the classic
/// signature of a loop that should have eager-loaded a capability instead of
/// resolving it once per parent instance.
pub struct N1Tracker {
    threshold: usize,
    enabled: bool,
    state: Mutex<TrackerState>,
}

impl N1Tracker {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            enabled: true,
            state: Mutex::new(TrackerState {
                counts: HashMap::new(),
                call_sites: Vec::new(),
                warned: HashMap::new(),
            }),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(usize::MAX)
        }
    }

    /// Record one capability load. No-ops when the tracker is disabled.
    #[track_caller]
    pub fn record_load(&self, parent_type: &str, capability: &str) {
        if !self.enabled {
            return;
        }
        let location = Location::caller();
        let key = (parent_type.to_string(), capability.to_string());

        let mut state = self.state.lock().expect("n1 tracker lock poisoned");
        let count = state.counts.entry(key.clone()).or_insert(0);
        *count += 1;
        let count = *count;
        state.call_sites.push(CallSite {
            parent_type: parent_type.to_string(),
            capability: capability.to_string(),
            file: location.file(),
            line: location.line(),
        });

        if count > self.threshold && !state.warned.get(&key).copied().unwrap_or(false) {
            state.warned.insert(key, true);
            tracing::warn!(
                target: "kvmodel::n1",
                parent_type,
                capability,
                count,
                threshold = self.threshold,
                "capability loaded {count} times for {parent_type}; consider eager-loading {capability}"
            );
        }
    }

    pub fn stats(&self) -> N1Stats {
        let state = self.state.lock().expect("n1 tracker lock poisoned");
        let capabilities_loaded = state.counts.len();
        let total_loads = state.counts.values().sum();
        let potential_n1 = state.counts.values().filter(|&&c| c > self.threshold).count();
        N1Stats {
            total_loads,
            capabilities_loaded,
            potential_n1,
        }
    }

    pub fn call_sites(&self) -> Vec<CallSite> {
        self.state.lock().expect("n1 tracker lock poisoned").call_sites.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warns_only_once_past_threshold() {
        let tracker = N1Tracker::new(2);
        for _ in 0..5 {
            tracker.record_load("Widget", "owner");
        }
        let stats = tracker.stats();
        assert_eq!(stats.total_loads, 5);
        assert_eq!(stats.potential_n1, 1);
    }

    #[test]
    fn disabled_tracker_records_nothing() {
        let tracker = N1Tracker::disabled();
        tracker.record_load("Widget", "owner");
        assert_eq!(tracker.stats().total_loads, 0);
    }
}
