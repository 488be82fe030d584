//! Threshold Configuration and Resolution
//!
//! ## Overview
//!
//! Each metric of each sensor instance carries at most one
//! [`MetricThresholds`] describing when its value should alarm. Thresholds
//! use the single-value-plus-direction model: one critical cutoff, one
//! warning cutoff, a direction (`Above` or `Below`), an absolute hysteresis
//! offset, and a staleness window. Cutoffs are either direct SI numbers or
//! formulas over the sensor's own configuration fields plus a
//! user-adjustable ratio.
//!
//! Thresholds are mutated only by explicit threshold-update calls - never
//! implicitly by ingestion. Where a threshold came from matters for
//! precedence (a user's persisted override must survive a schema-default
//! re-derivation), so installs carry a [`ConfigSource`] tag.
//!
//! ## Resolution
//!
//! [`resolve`] turns a [`ThresholdSpec`] into a concrete SI cutoff. For a
//! formula spec it builds the evaluation context from a sibling-field
//! lookup, injects the ratio under [`RATIO_VAR`](crate::formula::RATIO_VAR),
//! and falls back to documented defaults for missing base parameters. An
//! unresolvable formula yields `None` - "cannot evaluate this threshold
//! right now" - which callers must not conflate with zero.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::formula::{fallback, Expr, RATIO_VAR};

/// Default staleness window in milliseconds
pub const DEFAULT_STALE_AFTER_MS: u64 = 5_000;

/// Which side of the cutoff is bad
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmDirection {
    /// Alarm when the value rises to or past the cutoff (engine overspeed)
    Above,
    /// Alarm when the value falls to or past the cutoff (depth, voltage)
    Below,
}

/// One alarm cutoff: direct value or formula plus ratio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode")]
pub enum ThresholdSpec {
    /// Fixed SI cutoff
    Direct {
        /// The cutoff value
        value: f64,
    },
    /// Formula-derived cutoff
    Formula {
        /// Formula source over sibling configuration fields
        source: String,
        /// User-adjustable ratio injected as `indirectThreshold`
        ratio: f64,
    },
}

impl ThresholdSpec {
    /// Shorthand for a direct cutoff
    pub fn direct(value: f64) -> Self {
        ThresholdSpec::Direct { value }
    }

    /// Shorthand for a formula cutoff
    pub fn formula(source: impl Into<String>, ratio: f64) -> Self {
        ThresholdSpec::Formula {
            source: source.into(),
            ratio,
        }
    }
}

/// Per-metric alarm configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricThresholds {
    /// Alarming enabled at all
    pub enabled: bool,
    /// Which side of the cutoffs is bad
    pub direction: AlarmDirection,
    /// Absolute hysteresis offset in the metric's SI unit
    pub hysteresis: f64,
    /// Maximum sample age before the reading is untrusted
    pub stale_after_ms: u64,
    /// Critical cutoff
    pub critical: ThresholdSpec,
    /// Warning cutoff
    pub warning: ThresholdSpec,
}

/// Where a piece of instance configuration came from
///
/// Precedence is `Persisted > Reported > SchemaDefault`; see
/// [`resolve_with_source`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    /// User-persisted override
    Persisted,
    /// Value the hardware itself reported
    Reported,
    /// Static schema default
    SchemaDefault,
}

/// Ordered config resolution: persisted, then reported, then schema default
///
/// Returns the winning value together with its provenance so precedence
/// stays testable away from any call site.
pub fn resolve_with_source<T>(
    persisted: Option<T>,
    reported: Option<T>,
    schema_default: Option<T>,
) -> Option<(T, ConfigSource)> {
    persisted
        .map(|v| (v, ConfigSource::Persisted))
        .or_else(|| reported.map(|v| (v, ConfigSource::Reported)))
        .or_else(|| schema_default.map(|v| (v, ConfigSource::SchemaDefault)))
}

/// Resolve a threshold spec into a concrete SI cutoff
///
/// `lookup` reads sibling configuration fields of the owning sensor
/// instance (latest numeric samples). Returns `None` when a formula
/// references a variable that is missing and has no fallback; the failure
/// is logged, not thrown, because a sensor that has not reported a base
/// parameter yet is ordinary runtime life.
pub fn resolve(spec: &ThresholdSpec, lookup: &dyn Fn(&str) -> Option<f64>) -> Option<f64> {
    match spec {
        ThresholdSpec::Direct { value } => Some(*value),
        ThresholdSpec::Formula { source, ratio } => {
            let expr = match Expr::parse(source) {
                Ok(expr) => expr,
                Err(e) => {
                    // Catalog formulas are validated at startup; this can
                    // only be a malformed persisted override.
                    warn!("unparseable threshold formula `{}`: {}", source, e);
                    return None;
                }
            };

            let result = expr.eval(&|name| {
                if name == RATIO_VAR {
                    return Some(*ratio);
                }
                lookup(name).or_else(|| fallback(name))
            });

            match result {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("cannot resolve threshold `{}`: {}", source, e);
                    None
                }
            }
        }
    }
}
