//! Metric Samples - the minimal immutable record per reading
//!
//! ## Overview
//!
//! A [`MetricSample`] is the only thing the engine stores per reading: the
//! SI-normalized value and the ingest timestamp. Everything shown to a user
//! (display unit, formatted string, mnemonic) is derived lazily from the
//! sample plus the field's unit category, so a display-preference change
//! never touches stored data.
//!
//! ## Numeric Semantics
//!
//! Values are `f64` in SI base units (meters, volts, kelvin, ...). Two
//! non-finite cases are treated differently:
//!
//! - **NaN** is the "no valid reading" sentinel. A depth sounder that loses
//!   bottom lock reports NaN; that is ordinary marine reality, not an error.
//! - **±infinity** can only come from a producer bug (a botched conversion
//!   upstream) and is rejected at the ingestion boundary.
//!
//! Because NaN is a legitimate stored value, [`SampleValue`] implements
//! equality treating NaN as equal to NaN. Without this, a sounder stuck on
//! "no reading" would look like a fresh change on every update and flood
//! the history buffer.

use serde::Serialize;

use crate::time::Timestamp;

/// SI-normalized value of one metric reading
///
/// Closed over the two value shapes the wire protocols actually produce:
/// numbers (including the NaN "no reading" sentinel) and short strings
/// (picker values such as a battery chemistry). Booleans are stored as
/// `Number(0.0 | 1.0)` by the ingestion path.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SampleValue {
    /// Numeric reading in SI base units; finite or NaN
    Number(f64),
    /// Textual reading (picker/enum fields)
    Text(String),
}

impl SampleValue {
    /// Numeric view of the value
    ///
    /// Returns `None` for text values and for the NaN sentinel, so callers
    /// computing statistics or alarms never see a non-value.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            SampleValue::Number(n) if n.is_nan() => None,
            SampleValue::Number(n) => Some(*n),
            SampleValue::Text(_) => None,
        }
    }

    /// Textual view of the value
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SampleValue::Text(s) => Some(s),
            SampleValue::Number(_) => None,
        }
    }

    /// True if this is the numeric "no valid reading" sentinel
    pub fn is_no_reading(&self) -> bool {
        matches!(self, SampleValue::Number(n) if n.is_nan())
    }
}

impl PartialEq for SampleValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            // NaN == NaN here: "no reading" repeated is not a change
            (SampleValue::Number(a), SampleValue::Number(b)) => {
                a == b || (a.is_nan() && b.is_nan())
            }
            (SampleValue::Text(a), SampleValue::Text(b)) => a == b,
            _ => false,
        }
    }
}

/// One reading of one metric: SI value plus ingest timestamp
///
/// Immutable once constructed. Construction is infallible; the producer
/// contract (finite-or-NaN) is enforced with field context at the
/// ingestion boundary in `SensorInstance::update`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSample {
    /// SI-normalized value
    pub value: SampleValue,
    /// Ingest time in milliseconds
    pub timestamp: Timestamp,
}

impl MetricSample {
    /// Create a sample
    pub fn new(value: SampleValue, timestamp: Timestamp) -> Self {
        debug_assert!(
            !matches!(value, SampleValue::Number(n) if n.is_infinite()),
            "infinite values must be rejected at the ingestion boundary"
        );
        Self { value, timestamp }
    }

    /// Convenience constructor for numeric samples
    pub fn numeric(value: f64, timestamp: Timestamp) -> Self {
        Self::new(SampleValue::Number(value), timestamp)
    }
}
