//! Core metrics engine for Pelorus
//!
//! Turns decoded marine sensor readings into alarm-evaluated, unit-aware,
//! history-backed metrics. Everything is stored in SI units; display
//! conversion is a rendering concern applied on the way out.
//!
//! Key properties:
//! - Bounded memory: every metric's history is a fixed-capacity rolling
//!   buffer with age-aware downsampling
//! - Synchronous alarm evaluation on ingest, cached per field
//! - Explicit time: every time-sensitive call takes `now`, so staleness
//!   and debouncing are testable without wall clocks
//!
//! ```no_run
//! use std::collections::HashMap;
//! use pelorus_core::{FieldValue, SensorKind, SensorRegistry};
//!
//! # fn demo(mut registry: SensorRegistry) -> Result<(), pelorus_core::EngineError> {
//! let mut patch = HashMap::new();
//! patch.insert("depth".to_string(), Some(FieldValue::Number(12.4)));
//!
//! let outcome = registry.ingest(SensorKind::Depth, 0, &patch, 1_000)?;
//! if outcome.changed {
//!     // Re-render exactly the fields that changed
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod alarm;
pub mod enrich;
pub mod errors;
pub mod formula;
pub mod history;
pub mod instance;
pub mod registry;
pub mod sample;
pub mod schema;
pub mod threshold;
pub mod time;
pub mod units;

// Public API
pub use alarm::AlarmLevel;
pub use enrich::ReEnrichCoordinator;
pub use errors::{EngineError, EngineResult};
pub use history::{HistoryBuffer, SessionStats};
pub use instance::{EnrichedSample, FieldPatch, FieldValue, SensorInstance, UpdateOutcome};
pub use registry::{PersistedInstanceConfig, PersistedMetricConfig, SensorKey, SensorRegistry};
pub use sample::{MetricSample, SampleValue};
pub use schema::{SchemaCache, SensorCatalog, SensorKind};
pub use threshold::{AlarmDirection, ConfigSource, MetricThresholds, ThresholdSpec};
pub use time::{Clock, ManualClock, Timestamp, WallClock};
pub use units::{DisplayPreferences, UnitCategory, UnitConverter};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
