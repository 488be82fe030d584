//! Re-enrichment Coordinator - debounced display-cache refresh
//!
//! ## Overview
//!
//! When the user changes a display preference every cached display value
//! in every instance goes stale at once. Rather than recompute on each
//! preference event (a settings slider can emit dozens per second), the
//! coordinator arms a short deadline and runs a single batch pass over
//! the registry once the preferences have been quiet for the debounce
//! window. Another change while armed pushes the deadline out; the
//! batch runs once, after the last change.
//!
//! The coordinator is poll-driven: the host's tick loop calls
//! [`ReEnrichCoordinator::poll`] with the current time. No timers, no
//! threads - time only moves when the caller says so, which also makes
//! the debounce window directly testable.
//!
//! Reads between the preference change and the batch pass are never
//! wrong, only slower: the per-field display cache is version-tagged,
//! so a stale cache entry is bypassed and the value is converted on the
//! fly.

use log::debug;

use crate::registry::SensorRegistry;
use crate::time::Timestamp;
use crate::units::UnitConverter;

/// Quiet window after the last preference change before the batch runs
pub const DEBOUNCE_MS: u64 = 100;

/// Debounced scheduler for batch display re-enrichment
#[derive(Debug)]
pub struct ReEnrichCoordinator {
    deadline: Option<Timestamp>,
    debounce_ms: u64,
}

impl ReEnrichCoordinator {
    /// Coordinator with the standard debounce window
    pub fn new() -> Self {
        Self::with_debounce(DEBOUNCE_MS)
    }

    /// Coordinator with a custom debounce window
    pub fn with_debounce(debounce_ms: u64) -> Self {
        Self {
            deadline: None,
            debounce_ms,
        }
    }

    /// Note a preference change; (re-)arms the deadline
    pub fn preferences_changed(&mut self, now: Timestamp) {
        self.deadline = Some(now + self.debounce_ms);
    }

    /// True while a batch pass is armed and waiting
    pub fn pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Run the batch pass if the debounce window has elapsed
    ///
    /// Returns true when a pass actually ran.
    pub fn poll(
        &mut self,
        now: Timestamp,
        registry: &mut SensorRegistry,
        converter: &UnitConverter,
    ) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {}
            _ => return false,
        }
        self.deadline = None;

        let mut count = 0usize;
        for instance in registry.instances_mut() {
            instance.reenrich(converter);
            count += 1;
        }
        debug!(
            "re-enriched {} instance(s) at preference version {}",
            count,
            converter.version()
        );
        true
    }
}

impl Default for ReEnrichCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
