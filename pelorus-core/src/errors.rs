//! Error Types for the Metrics Engine
//!
//! ## Design Philosophy
//!
//! The engine distinguishes sharply between *bugs* and *expected absences*:
//!
//! 1. **Producer-contract violations**: the upstream decoder sent a field
//!    with the wrong primitive type, a disallowed non-finite number, or a
//!    picker value outside the declared options. These indicate a bug in the
//!    producer, not a data-quality condition, so they surface as errors from
//!    `update()` and are never coerced or swallowed.
//!
//! 2. **Configuration-completeness errors**: a unit category with no
//!    registered conversion rule. These block operation because the schema
//!    and the conversion table must cover each other completely.
//!
//! 3. **Expected absences** (unknown field on a query, no history yet, a
//!    formula threshold that cannot currently be resolved) are `Option` or
//!    logged fallbacks, never error values. A sensor that has not reported
//!    yet is normal steady state on a boat.
//!
//! Errors carry inline context and implement `Clone` so callers can stash
//! them in diagnostics without lifetime gymnastics.

use thiserror_no_std::Error;

use crate::schema::SensorKind;
use crate::units::UnitCategory;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine errors - producer-contract and configuration failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Producer sent a value of the wrong primitive type for a field
    #[error("field `{field}` expects {expected}, producer sent {actual}")]
    TypeMismatch {
        /// Field the producer tried to update
        field: String,
        /// Declared kind from the schema
        expected: &'static str,
        /// What actually arrived
        actual: &'static str,
    },

    /// Producer sent +inf or -inf; NaN is the only allowed non-finite
    /// value (it means "no valid reading")
    #[error("field `{field}` received non-finite value {value}")]
    NonFiniteValue {
        /// Field the producer tried to update
        field: String,
        /// The offending value
        value: f64,
    },

    /// Picker field received a value outside its declared options
    #[error("field `{field}` received `{value}`, not one of its declared options")]
    InvalidOption {
        /// Field the producer tried to update
        field: String,
        /// The offending value
        value: String,
    },

    /// No conversion rule registered for a unit category - a gap between
    /// the schema and the conversion table, not a runtime condition
    #[error("no conversion rule registered for category {category:?}")]
    UnregisteredCategory {
        /// The category with no rule
        category: UnitCategory,
    },

    /// The schema cache has no entry for this sensor kind
    #[error("sensor kind {kind:?} is not present in the schema cache")]
    UnknownSensor {
        /// The unknown kind
        kind: SensorKind,
    },

    /// History buffers must hold at least one sample
    #[error("history capacity must be at least 1")]
    ZeroCapacity,
}
