//! Alarm Evaluation - four levels, strict precedence, hysteresis
//!
//! ## Overview
//!
//! [`evaluate`] is a pure function mapping (current value, sample
//! timestamp, thresholds, previous level) to one of four ordered levels.
//! It is re-run synchronously on every accepted value change and on every
//! threshold change; the owning sensor instance caches the result.
//!
//! ## Precedence
//!
//! Each step short-circuits:
//!
//! 1. Sample older than the staleness window -> [`AlarmLevel::Stale`],
//!    regardless of value or cutoffs. Old data cannot be trusted to judge
//!    thresholds in either direction.
//! 2. Thresholds absent or disabled -> [`AlarmLevel::None`].
//! 3. Critical check against the resolved critical cutoff (inclusive
//!    comparison, sign per direction).
//! 4. Warning check with hysteresis: once in `Warning`, the value must
//!    recover *past* `warning ± hysteresis` before the level clears, so a
//!    depth sounder bobbing around the warning line does not flicker.
//! 5. Otherwise [`AlarmLevel::None`].
//!
//! All comparisons are in SI units; hysteresis is an absolute offset in
//! the metric's own SI unit, not a percentage. An unresolvable cutoff
//! (formula over a field the sensor has not reported) simply cannot trip -
//! the check is skipped, not treated as zero.

use serde::{Deserialize, Serialize};

use crate::threshold::{resolve, AlarmDirection, MetricThresholds};
use crate::time::Timestamp;

/// Alarm severity, in increasing precedence order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum AlarmLevel {
    /// Nothing wrong (or nothing evaluable)
    #[default]
    None = 0,
    /// Sample too old to trust
    Stale = 1,
    /// Past the warning cutoff
    Warning = 2,
    /// Past the critical cutoff
    Critical = 3,
}

/// Evaluate the alarm level for one metric
///
/// - `value`: latest numeric SI reading; `None` for text values and the
///   NaN "no reading" sentinel
/// - `timestamp`: when that reading was ingested
/// - `now`: evaluation time
/// - `lookup`: sibling-field lookup for formula cutoffs
/// - `previous`: last cached level, consulted only for hysteresis
pub fn evaluate(
    value: Option<f64>,
    timestamp: Timestamp,
    now: Timestamp,
    thresholds: Option<&MetricThresholds>,
    lookup: &dyn Fn(&str) -> Option<f64>,
    previous: AlarmLevel,
) -> AlarmLevel {
    let th = match thresholds {
        Some(th) => th,
        None => return AlarmLevel::None,
    };

    if now.saturating_sub(timestamp) > th.stale_after_ms {
        return AlarmLevel::Stale;
    }

    if !th.enabled {
        return AlarmLevel::None;
    }

    let v = match value {
        Some(v) => v,
        None => return AlarmLevel::None,
    };

    if let Some(critical) = resolve(&th.critical, lookup) {
        let tripped = match th.direction {
            AlarmDirection::Below => v <= critical,
            AlarmDirection::Above => v >= critical,
        };
        if tripped {
            return AlarmLevel::Critical;
        }
    }

    if let Some(warning) = resolve(&th.warning, lookup) {
        let tripped = match th.direction {
            AlarmDirection::Below => v <= warning,
            AlarmDirection::Above => v >= warning,
        };
        if tripped {
            return AlarmLevel::Warning;
        }

        if previous == AlarmLevel::Warning {
            // Release line sits hysteresis past the trip line
            let released = match th.direction {
                AlarmDirection::Below => v > warning + th.hysteresis,
                AlarmDirection::Above => v < warning - th.hysteresis,
            };
            if !released {
                return AlarmLevel::Warning;
            }
        }
    }

    AlarmLevel::None
}
