//! Sensor Instance - per-(kind, instance) state container
//!
//! ## Overview
//!
//! A [`SensorInstance`] owns everything the engine knows about one physical
//! sensor: one history buffer, one threshold configuration, and one cached
//! alarm level per metric field, plus the field metadata (unit category,
//! mnemonic) copied from the shared schema cache at construction so reads
//! never touch the catalog.
//!
//! ## Update Path
//!
//! The decoder feeds partial field updates into [`SensorInstance::update`].
//! Per field, in order:
//!
//! 1. type-check against the schema (fail fast on producer bugs - wrong
//!    primitive, ±infinity, picker value outside options; never coerce)
//! 2. drop the update if the value equals the latest stored sample, unless
//!    the field is marked always-update (live clock fields must refresh
//!    their timestamp even when the value repeats)
//! 3. append a [`MetricSample`] to the field's history
//! 4. re-run the alarm evaluator and cache the level
//!
//! A change to the sensor's context-key field (battery chemistry, engine
//! fuel type) re-derives schema-default thresholds for every field whose
//! thresholds are not a persisted user override.
//!
//! ## Query Path
//!
//! [`SensorInstance::metric`] addresses metrics three ways:
//!
//! - `"depth"` - latest sample, lazily enriched with display value,
//!   formatted string and unit via the conversion service
//! - `"depth.min"` / `.max` / `.avg` - on-the-fly statistic over the
//!   field's current history
//! - `"turnRate"` - derived heading derivative; absent rather than stale
//!   when the heading data is a second old
//!
//! Alarm levels are read from the per-field cache, never recomputed on
//! read.

use std::collections::{BTreeSet, HashMap};
use std::f64::consts::PI;
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::alarm::{self, AlarmLevel};
use crate::errors::{EngineError, EngineResult};
use crate::history::{HistoryBuffer, SessionStats};
use crate::sample::{MetricSample, SampleValue};
use crate::schema::{
    DerivedMetric, FieldDefinition, FieldKind, SchemaCache, SensorKind, SensorSchema,
    ThresholdDef, DEFAULT_CONTEXT,
};
use crate::threshold::{ConfigSource, MetricThresholds, ThresholdSpec};
use crate::time::Timestamp;
use crate::units::UnitConverter;

/// Maximum age of source data for derived metrics (rate of turn)
pub const MAX_DERIVED_AGE_MS: u64 = 1_000;

/// One typed field value from the decoder
///
/// Untagged so a decoded JSON object maps naturally: booleans, numbers and
/// strings each hit their own variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Toggle fields
    Toggle(bool),
    /// Numeric readings and numeric configuration
    Number(f64),
    /// Text and picker values
    Text(String),
}

impl FieldValue {
    fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::Toggle(_) => "boolean",
            FieldValue::Number(_) => "number",
            FieldValue::Text(_) => "text",
        }
    }
}

/// Partial field-update record from the decoder; `None` entries are
/// explicit nulls and are skipped
pub type FieldPatch = HashMap<String, Option<FieldValue>>;

/// What an update call actually changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    /// Any stored value changed
    pub changed: bool,
    /// Names of fields whose stored value changed
    pub changed_fields: BTreeSet<String>,
}

/// Latest sample of a metric, enriched for display
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedSample {
    /// SI value as stored
    pub value: SampleValue,
    /// Ingest timestamp
    pub timestamp: Timestamp,
    /// Value in the preferred display unit
    pub display_value: Option<f64>,
    /// Ready-to-render string including the unit symbol
    pub formatted: Option<String>,
    /// Display unit symbol
    pub unit: Option<&'static str>,
    /// Instrument mnemonic (DPT, SOG, ...)
    pub mnemonic: &'static str,
}

/// Display enrichment pre-warmed by the re-enrichment coordinator
#[derive(Debug, Clone)]
struct CachedDisplay {
    version: u64,
    display_value: Option<f64>,
    formatted: Option<String>,
    unit: Option<&'static str>,
}

/// Per-field state: history, thresholds, cached alarm, cached metadata
#[derive(Debug)]
struct FieldState {
    category: Option<crate::units::UnitCategory>,
    mnemonic: &'static str,
    history: HistoryBuffer,
    thresholds: Option<MetricThresholds>,
    threshold_source: Option<ConfigSource>,
    alarm: AlarmLevel,
    display: Option<CachedDisplay>,
}

/// State container for one (sensor kind, instance number) pair
#[derive(Debug)]
pub struct SensorInstance {
    kind: SensorKind,
    instance: u32,
    name: Option<String>,
    /// Persisted context override; hardware-reported context key and
    /// schema defaults rank below it
    persisted_context: Option<String>,
    sensor: Arc<SensorSchema>,
    fields: HashMap<&'static str, FieldState>,
    destroyed: bool,
}

impl SensorInstance {
    /// Create an instance for a sensor kind present in the schema cache
    ///
    /// Field metadata is copied out of the cache once, here. Schema-default
    /// thresholds for the default context are installed immediately so the
    /// very first reading already alarms correctly.
    pub fn new(kind: SensorKind, instance: u32, schema: &SchemaCache) -> EngineResult<Self> {
        let sensor = schema
            .sensor(kind)
            .ok_or(EngineError::UnknownSensor { kind })?
            .clone();

        let mut fields = HashMap::new();
        for def in &sensor.fields {
            fields.insert(
                def.name,
                FieldState {
                    category: def.unit_category,
                    mnemonic: def.mnemonic,
                    history: HistoryBuffer::with_defaults(),
                    thresholds: None,
                    threshold_source: None,
                    alarm: AlarmLevel::None,
                    display: None,
                },
            );
        }

        let mut this = Self {
            kind,
            instance,
            name: None,
            persisted_context: None,
            sensor,
            fields,
            destroyed: false,
        };
        this.install_schema_defaults();
        Ok(this)
    }

    /// Sensor kind
    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    /// Instance number
    pub fn instance_number(&self) -> u32 {
        self.instance
    }

    /// User-assigned name, if any
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Assign a user-visible name
    pub fn set_name(&mut self, name: Option<String>) {
        self.name = name;
    }

    /// Install a persisted context override and re-derive defaults
    pub fn set_persisted_context(&mut self, context: Option<String>, now: Timestamp) {
        self.persisted_context = context;
        self.install_schema_defaults();
        self.reevaluate_all(now);
    }

    /// Apply a partial field update from the decoder
    ///
    /// Returns the set of fields whose stored value actually changed (the
    /// presentation layer re-renders exactly those). Fails fast on
    /// producer-contract violations; unknown fields are skipped as
    /// expected steady state.
    pub fn update(&mut self, patch: &FieldPatch, now: Timestamp) -> EngineResult<UpdateOutcome> {
        let mut outcome = UpdateOutcome::default();
        if self.destroyed {
            return Ok(outcome);
        }

        let sensor = Arc::clone(&self.sensor);
        let mut context_changed = false;

        for (name, entry) in patch {
            let value = match entry {
                Some(value) => value,
                None => continue,
            };

            let def = match sensor.field(name) {
                Some(def) => def,
                None => {
                    debug!("{}:{}: ignoring unknown field `{}`", self.kind.name(), self.instance, name);
                    continue;
                }
            };
            if def.derived.is_some() {
                debug!("{}:{}: derived field `{}` cannot be ingested", self.kind.name(), self.instance, name);
                continue;
            }

            let sample_value = coerce(def, name, value)?;

            let state = self
                .fields
                .get_mut(def.name)
                .expect("every schema field has state");
            let changed = match state.history.latest() {
                Some(latest) => latest.value != sample_value,
                None => true,
            };
            if !changed && !def.always_update {
                continue;
            }

            state.history.push(MetricSample::new(sample_value, now));
            state.display = None;

            if changed {
                outcome.changed_fields.insert(def.name.to_string());
                if sensor.context_key == Some(def.name) {
                    context_changed = true;
                }
            }

            self.reevaluate_alarm(def.name, now);
        }

        if context_changed {
            self.install_schema_defaults();
            self.reevaluate_all(now);
        }

        outcome.changed = !outcome.changed_fields.is_empty();
        Ok(outcome)
    }

    /// Replace one field's threshold configuration (user action)
    ///
    /// Re-evaluates and re-caches the field's alarm level against the
    /// latest known sample immediately, so tightening a cutoff shows up
    /// without waiting for the next reading.
    pub fn update_thresholds(
        &mut self,
        field: &str,
        thresholds: Option<MetricThresholds>,
        now: Timestamp,
    ) {
        if self.destroyed {
            return;
        }
        let sensor = Arc::clone(&self.sensor);
        let def = match sensor.field(field) {
            Some(def) => def,
            None => return,
        };
        let state = self
            .fields
            .get_mut(def.name)
            .expect("every schema field has state");
        state.thresholds = thresholds;
        state.threshold_source = Some(ConfigSource::Persisted);
        self.reevaluate_alarm(def.name, now);
    }

    /// Re-evaluate every alarmed field against the current time
    ///
    /// Ingestion re-evaluates on its own; this exists for the host's
    /// periodic tick, so a sensor that goes quiet transitions to
    /// [`AlarmLevel::Stale`] without waiting for data that will never
    /// come.
    pub fn refresh_alarms(&mut self, now: Timestamp) {
        if self.destroyed {
            return;
        }
        self.reevaluate_all(now);
    }

    /// Cached alarm level for a field; `None` level for unknown fields
    pub fn alarm_level(&self, field: &str) -> AlarmLevel {
        self.fields
            .get(field)
            .map(|state| state.alarm)
            .unwrap_or_default()
    }

    /// Current thresholds and their provenance for a field
    pub fn thresholds(&self, field: &str) -> Option<(&MetricThresholds, ConfigSource)> {
        let state = self.fields.get(field)?;
        Some((state.thresholds.as_ref()?, state.threshold_source?))
    }

    /// Session statistics over a field's current history
    pub fn session_stats(&self, field: &str) -> Option<SessionStats> {
        self.fields.get(field)?.history.stats()
    }

    /// Stored history for a field, optionally limited to a trailing window
    pub fn history(&self, field: &str, window_ms: Option<u64>, now: Timestamp) -> Vec<MetricSample> {
        match self.fields.get(field) {
            Some(state) => match window_ms {
                Some(window) => state.history.range(window, now),
                None => state.history.iter().cloned().collect(),
            },
            None => Vec::new(),
        }
    }

    /// Latest enriched value for a metric selector
    ///
    /// Selectors: plain field name, `field.min|max|avg`, or a derived
    /// field such as `turnRate`.
    pub fn metric(
        &self,
        selector: &str,
        converter: &UnitConverter,
        now: Timestamp,
    ) -> Option<EnrichedSample> {
        if self.destroyed {
            return None;
        }

        if let Some((base, stat)) = selector.split_once('.') {
            let state = self.fields.get(base)?;
            let stats = state.history.stats()?;
            let value = match stat {
                "min" => stats.min,
                "max" => stats.max,
                "avg" => stats.avg,
                _ => return None,
            };
            let timestamp = state.history.latest()?.timestamp;
            return Some(enrich(state, SampleValue::Number(value), timestamp, converter));
        }

        let def = self.sensor.field(selector)?;
        let state = self.fields.get(def.name)?;

        if let Some(DerivedMetric::TurnRate { source }) = def.derived {
            return self.turn_rate(source, state, converter, now);
        }

        let latest = state.history.latest()?;

        // Use the coordinator-warmed display cache when it matches the
        // current preference version
        if let Some(cached) = &state.display {
            if cached.version == converter.version() {
                return Some(EnrichedSample {
                    value: latest.value.clone(),
                    timestamp: latest.timestamp,
                    display_value: cached.display_value,
                    formatted: cached.formatted.clone(),
                    unit: cached.unit,
                    mnemonic: state.mnemonic,
                });
            }
        }

        Some(enrich(state, latest.value.clone(), latest.timestamp, converter))
    }

    /// Re-derive cached display values for every field (batch pass)
    pub fn reenrich(&mut self, converter: &UnitConverter) {
        if self.destroyed {
            return;
        }
        let version = converter.version();
        for state in self.fields.values_mut() {
            let latest = match state.history.latest() {
                Some(latest) => latest,
                None => {
                    state.display = None;
                    continue;
                }
            };
            let enriched = enrich(state, latest.value.clone(), latest.timestamp, converter);
            state.display = Some(CachedDisplay {
                version,
                display_value: enriched.display_value,
                formatted: enriched.formatted,
                unit: enriched.unit,
            });
        }
    }

    /// Clear all buffers and caches; the instance becomes inert
    pub fn destroy(&mut self) {
        for state in self.fields.values_mut() {
            state.history.clear();
            state.thresholds = None;
            state.threshold_source = None;
            state.alarm = AlarmLevel::None;
            state.display = None;
        }
        self.destroyed = true;
    }

    /// True once destroyed
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Effective context value: persisted override, then the reported
    /// context-key reading, then the first declared option
    fn context_value(&self) -> String {
        let key = match self.sensor.context_key {
            Some(key) => key,
            None => return DEFAULT_CONTEXT.to_string(),
        };

        let reported = self
            .fields
            .get(key)
            .and_then(|state| state.history.latest())
            .and_then(|sample| sample.value.as_text())
            .map(str::to_string);
        let schema_default = self
            .sensor
            .field(key)
            .and_then(|def| def.options.first())
            .map(|s| s.to_string());

        crate::threshold::resolve_with_source(
            self.persisted_context.clone(),
            reported,
            schema_default,
        )
        .map(|(value, _)| value)
        .unwrap_or_else(|| DEFAULT_CONTEXT.to_string())
    }

    /// Install schema-default thresholds for the current context on every
    /// alarmed field that is not under a persisted user override
    fn install_schema_defaults(&mut self) {
        let sensor = Arc::clone(&self.sensor);
        let context = self.context_value();

        for def in &sensor.fields {
            let alarm_schema = match &def.alarm {
                Some(alarm_schema) => alarm_schema,
                None => continue,
            };
            let state = self
                .fields
                .get_mut(def.name)
                .expect("every schema field has state");
            if state.threshold_source == Some(ConfigSource::Persisted) {
                continue;
            }

            match alarm_schema.context(&context) {
                Some(defaults) => {
                    state.thresholds = Some(MetricThresholds {
                        enabled: true,
                        direction: alarm_schema.direction,
                        hysteresis: alarm_schema.hysteresis,
                        stale_after_ms: alarm_schema.stale_after_ms,
                        critical: spec_from(defaults.critical, alarm_schema.default_ratio),
                        warning: spec_from(defaults.warning, alarm_schema.default_ratio),
                    });
                    state.threshold_source = Some(ConfigSource::SchemaDefault);
                }
                None => {
                    state.thresholds = None;
                    state.threshold_source = None;
                }
            }
        }
    }

    /// Recompute and cache one field's alarm level from its latest sample
    fn reevaluate_alarm(&mut self, field: &'static str, now: Timestamp) {
        let (latest, thresholds, previous) = {
            let state = match self.fields.get(field) {
                Some(state) => state,
                None => return,
            };
            (
                state.history.latest().cloned(),
                state.thresholds.clone(),
                state.alarm,
            )
        };

        let level = match latest {
            Some(sample) => {
                let lookup = |name: &str| self.numeric_field(name);
                alarm::evaluate(
                    sample.value.as_number(),
                    sample.timestamp,
                    now,
                    thresholds.as_ref(),
                    &lookup,
                    previous,
                )
            }
            // No sample yet: nothing to judge
            None => AlarmLevel::None,
        };

        if let Some(state) = self.fields.get_mut(field) {
            state.alarm = level;
        }
    }

    /// Re-evaluate every field that has thresholds (context/config change)
    fn reevaluate_all(&mut self, now: Timestamp) {
        let names: Vec<&'static str> = self
            .fields
            .iter()
            .filter(|(_, state)| state.thresholds.is_some())
            .map(|(name, _)| *name)
            .collect();
        for name in names {
            self.reevaluate_alarm(name, now);
        }
    }

    /// Latest numeric reading of a sibling field, for formula contexts
    fn numeric_field(&self, name: &str) -> Option<f64> {
        self.fields
            .get(name)?
            .history
            .latest()?
            .value
            .as_number()
    }

    /// Compute a wrap-aware heading derivative in rad/s
    fn turn_rate(
        &self,
        source: &'static str,
        state: &FieldState,
        converter: &UnitConverter,
        now: Timestamp,
    ) -> Option<EnrichedSample> {
        let src = self.fields.get(source)?;
        let (prev, newest) = src.history.last_two()?;

        // A derivative of old data is worse than no derivative
        if now.saturating_sub(newest.timestamp) >= MAX_DERIVED_AGE_MS {
            return None;
        }

        let h0 = prev.value.as_number()?;
        let h1 = newest.value.as_number()?;
        let dt_ms = newest.timestamp.saturating_sub(prev.timestamp);
        if dt_ms == 0 {
            return None;
        }

        // Shortest way around the circle
        let mut dh = h1 - h0;
        while dh > PI {
            dh -= 2.0 * PI;
        }
        while dh < -PI {
            dh += 2.0 * PI;
        }

        let rate = dh * 1000.0 / dt_ms as f64;
        Some(enrich(state, SampleValue::Number(rate), newest.timestamp, converter))
    }
}

/// Type-check and normalize one incoming field value
fn coerce(def: &FieldDefinition, field: &str, value: &FieldValue) -> EngineResult<SampleValue> {
    match (def.kind, value) {
        (FieldKind::Number, FieldValue::Number(n)) => {
            if n.is_infinite() {
                return Err(EngineError::NonFiniteValue {
                    field: field.to_string(),
                    value: *n,
                });
            }
            Ok(SampleValue::Number(*n))
        }
        (FieldKind::Text, FieldValue::Text(s)) => Ok(SampleValue::Text(s.clone())),
        (FieldKind::Picker, FieldValue::Text(s)) => {
            if !def.options.contains(&s.as_str()) {
                return Err(EngineError::InvalidOption {
                    field: field.to_string(),
                    value: s.clone(),
                });
            }
            Ok(SampleValue::Text(s.clone()))
        }
        (FieldKind::Toggle, FieldValue::Toggle(b)) => {
            Ok(SampleValue::Number(if *b { 1.0 } else { 0.0 }))
        }
        (kind, value) => Err(EngineError::TypeMismatch {
            field: field.to_string(),
            expected: kind.name(),
            actual: value.kind_name(),
        }),
    }
}

/// Build an enriched sample from a value and the field's cached metadata
fn enrich(
    state: &FieldState,
    value: SampleValue,
    timestamp: Timestamp,
    converter: &UnitConverter,
) -> EnrichedSample {
    let (display_value, formatted, unit) = match (&value, state.category) {
        (SampleValue::Number(n), Some(category)) => (
            if n.is_nan() {
                None
            } else {
                converter.to_display(*n, category).ok()
            },
            converter.format(*n, category, true).ok(),
            converter.unit(category).ok(),
        ),
        _ => (None, None, None),
    };

    EnrichedSample {
        value,
        timestamp,
        display_value,
        formatted,
        unit,
        mnemonic: state.mnemonic,
    }
}

/// Lift a catalog threshold default into a runtime spec
fn spec_from(def: ThresholdDef, default_ratio: f64) -> ThresholdSpec {
    match def {
        ThresholdDef::Direct(value) => ThresholdSpec::direct(value),
        ThresholdDef::Formula(source) => ThresholdSpec::formula(source, default_ratio),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AlarmSchema, ContextDefaults, SensorCatalog};
    use crate::threshold::AlarmDirection;
    use crate::units::UnitCategory;

    /// Hand-built battery schema: voltage alarms by chemistry, a clock
    /// field that always updates, and a turn-rate-style derived field is
    /// exercised in the gps test below.
    fn battery_catalog() -> SensorCatalog {
        let mut voltage = FieldDefinition::number("voltage", "Voltage", "VLT");
        voltage.unit_category = Some(UnitCategory::Voltage);
        voltage.alarm = Some(AlarmSchema {
            direction: AlarmDirection::Below,
            hysteresis: 0.1,
            stale_after_ms: 5_000,
            uses_ratio: false,
            default_ratio: 1.0,
            contexts: [
                (
                    "agm",
                    ContextDefaults {
                        critical: ThresholdDef::Direct(12.0),
                        warning: ThresholdDef::Direct(12.2),
                    },
                ),
                (
                    "lifepo4",
                    ContextDefaults {
                        critical: ThresholdDef::Direct(12.8),
                        warning: ThresholdDef::Direct(13.0),
                    },
                ),
            ]
            .into_iter()
            .collect(),
        });

        let mut chemistry = FieldDefinition::number("chemistry", "Chemistry", "CHM");
        chemistry.kind = FieldKind::Picker;
        chemistry.options = &["agm", "lifepo4"];

        let mut clock = FieldDefinition::number("utcTime", "UTC time", "UTC");
        clock.always_update = true;

        let capacity = FieldDefinition::number("capacity", "Capacity", "CAP");

        SensorCatalog {
            sensors: vec![SensorSchema {
                kind: SensorKind::Battery,
                context_key: Some("chemistry"),
                fields: vec![voltage, chemistry, clock, capacity],
            }],
        }
    }

    fn gps_catalog() -> SensorCatalog {
        let mut heading = FieldDefinition::number("heading", "Heading", "HDG");
        heading.unit_category = Some(UnitCategory::Angle);

        let mut turn_rate = FieldDefinition::number("turnRate", "Rate of turn", "ROT");
        turn_rate.unit_category = Some(UnitCategory::AngularRate);
        turn_rate.derived = Some(DerivedMetric::TurnRate { source: "heading" });

        SensorCatalog {
            sensors: vec![SensorSchema {
                kind: SensorKind::Gps,
                context_key: None,
                fields: vec![heading, turn_rate],
            }],
        }
    }

    fn instance(catalog: SensorCatalog, kind: SensorKind) -> SensorInstance {
        let cache = SchemaCache::build(catalog).unwrap();
        SensorInstance::new(kind, 0, &cache).unwrap()
    }

    fn patch(entries: &[(&str, FieldValue)]) -> FieldPatch {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), Some(v.clone())))
            .collect()
    }

    #[test]
    fn identical_value_does_not_append() {
        let mut inst = instance(battery_catalog(), SensorKind::Battery);

        let out = inst
            .update(&patch(&[("voltage", FieldValue::Number(12.5))]), 1_000)
            .unwrap();
        assert!(out.changed);

        let out = inst
            .update(&patch(&[("voltage", FieldValue::Number(12.5))]), 2_000)
            .unwrap();
        assert!(!out.changed);
        assert!(out.changed_fields.is_empty());
        assert_eq!(inst.history("voltage", None, 2_000).len(), 1);
    }

    #[test]
    fn always_update_appends_without_change_flag() {
        let mut inst = instance(battery_catalog(), SensorKind::Battery);

        inst.update(&patch(&[("utcTime", FieldValue::Number(42.0))]), 1_000)
            .unwrap();
        let out = inst
            .update(&patch(&[("utcTime", FieldValue::Number(42.0))]), 2_000)
            .unwrap();

        // Sample appended (timestamp refresh) but not reported as changed
        assert!(!out.changed);
        assert_eq!(inst.history("utcTime", None, 2_000).len(), 2);
    }

    #[test]
    fn producer_contract_violations_fail_fast() {
        let mut inst = instance(battery_catalog(), SensorKind::Battery);

        let err = inst
            .update(&patch(&[("voltage", FieldValue::Text("low".into()))]), 0)
            .unwrap_err();
        assert!(matches!(err, EngineError::TypeMismatch { .. }));

        let err = inst
            .update(&patch(&[("voltage", FieldValue::Number(f64::INFINITY))]), 0)
            .unwrap_err();
        assert!(matches!(err, EngineError::NonFiniteValue { .. }));

        let err = inst
            .update(&patch(&[("chemistry", FieldValue::Text("plutonium".into()))]), 0)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidOption { .. }));
    }

    #[test]
    fn nan_sentinel_is_accepted_and_stable() {
        let mut inst = instance(battery_catalog(), SensorKind::Battery);

        let out = inst
            .update(&patch(&[("voltage", FieldValue::Number(f64::NAN))]), 1_000)
            .unwrap();
        assert!(out.changed);

        let out = inst
            .update(&patch(&[("voltage", FieldValue::Number(f64::NAN))]), 2_000)
            .unwrap();
        assert!(!out.changed);
        assert_eq!(inst.alarm_level("voltage"), AlarmLevel::None);
    }

    #[test]
    fn unknown_fields_are_skipped() {
        let mut inst = instance(battery_catalog(), SensorKind::Battery);
        let out = inst
            .update(&patch(&[("keelDepth", FieldValue::Number(1.0))]), 0)
            .unwrap();
        assert!(!out.changed);
    }

    #[test]
    fn alarm_updates_on_ingest() {
        let mut inst = instance(battery_catalog(), SensorKind::Battery);
        inst.update(&patch(&[("chemistry", FieldValue::Text("agm".into()))]), 900)
            .unwrap();

        inst.update(&patch(&[("voltage", FieldValue::Number(11.5))]), 1_000)
            .unwrap();
        assert_eq!(inst.alarm_level("voltage"), AlarmLevel::Critical);

        inst.update(&patch(&[("voltage", FieldValue::Number(12.1))]), 2_000)
            .unwrap();
        assert_eq!(inst.alarm_level("voltage"), AlarmLevel::Warning);

        inst.update(&patch(&[("voltage", FieldValue::Number(12.6))]), 3_000)
            .unwrap();
        assert_eq!(inst.alarm_level("voltage"), AlarmLevel::None);
    }

    #[test]
    fn context_change_rederives_defaults() {
        let mut inst = instance(battery_catalog(), SensorKind::Battery);

        // Default context is the first option: agm. 12.5 V is fine there.
        inst.update(&patch(&[("voltage", FieldValue::Number(12.5))]), 1_000)
            .unwrap();
        assert_eq!(inst.alarm_level("voltage"), AlarmLevel::None);

        // Chemistry flips to lifepo4: 12.5 V is now below critical
        inst.update(&patch(&[("chemistry", FieldValue::Text("lifepo4".into()))]), 2_000)
            .unwrap();
        assert_eq!(inst.alarm_level("voltage"), AlarmLevel::Critical);
    }

    #[test]
    fn persisted_thresholds_survive_context_change() {
        let mut inst = instance(battery_catalog(), SensorKind::Battery);

        inst.update_thresholds(
            "voltage",
            Some(MetricThresholds {
                enabled: true,
                direction: AlarmDirection::Below,
                hysteresis: 0.1,
                stale_after_ms: 5_000,
                critical: ThresholdSpec::direct(10.0),
                warning: ThresholdSpec::direct(10.5),
            }),
            500,
        );

        inst.update(&patch(&[("chemistry", FieldValue::Text("lifepo4".into()))]), 1_000)
            .unwrap();

        let (th, source) = inst.thresholds("voltage").unwrap();
        assert_eq!(source, ConfigSource::Persisted);
        assert_eq!(th.critical, ThresholdSpec::direct(10.0));
    }

    #[test]
    fn threshold_update_reevaluates_immediately() {
        let mut inst = instance(battery_catalog(), SensorKind::Battery);
        inst.update(&patch(&[("voltage", FieldValue::Number(12.5))]), 1_000)
            .unwrap();
        assert_eq!(inst.alarm_level("voltage"), AlarmLevel::None);

        // Tighten the cutoffs above the current reading
        inst.update_thresholds(
            "voltage",
            Some(MetricThresholds {
                enabled: true,
                direction: AlarmDirection::Below,
                hysteresis: 0.1,
                stale_after_ms: 5_000,
                critical: ThresholdSpec::direct(12.6),
                warning: ThresholdSpec::direct(12.8),
            }),
            1_100,
        );
        assert_eq!(inst.alarm_level("voltage"), AlarmLevel::Critical);
    }

    #[test]
    fn metric_stats_addressing() {
        let mut inst = instance(battery_catalog(), SensorKind::Battery);
        let conv = UnitConverter::default();

        for (i, v) in [12.0, 13.0, 14.0].iter().enumerate() {
            inst.update(&patch(&[("voltage", FieldValue::Number(*v))]), (i as u64 + 1) * 1_000)
                .unwrap();
        }

        let min = inst.metric("voltage.min", &conv, 4_000).unwrap();
        let max = inst.metric("voltage.max", &conv, 4_000).unwrap();
        let avg = inst.metric("voltage.avg", &conv, 4_000).unwrap();
        assert_eq!(min.value, SampleValue::Number(12.0));
        assert_eq!(max.value, SampleValue::Number(14.0));
        assert_eq!(avg.value, SampleValue::Number(13.0));

        assert!(inst.metric("voltage.median", &conv, 4_000).is_none());
        assert!(inst.metric("mystery.min", &conv, 4_000).is_none());
    }

    #[test]
    fn metric_enrichment() {
        let mut inst = instance(battery_catalog(), SensorKind::Battery);
        let conv = UnitConverter::default();

        inst.update(&patch(&[("voltage", FieldValue::Number(12.456))]), 1_000)
            .unwrap();

        let m = inst.metric("voltage", &conv, 1_000).unwrap();
        assert_eq!(m.display_value, Some(12.456));
        assert_eq!(m.formatted.as_deref(), Some("12.46 V"));
        assert_eq!(m.unit, Some("V"));
        assert_eq!(m.mnemonic, "VLT");
    }

    #[test]
    fn turn_rate_fresh_and_stale() {
        let mut inst = instance(gps_catalog(), SensorKind::Gps);
        let conv = UnitConverter::default();

        // 0.1 rad over 500 ms = 0.2 rad/s
        inst.update(&patch(&[("heading", FieldValue::Number(1.0))]), 1_000)
            .unwrap();
        inst.update(&patch(&[("heading", FieldValue::Number(1.1))]), 1_500)
            .unwrap();

        let rot = inst.metric("turnRate", &conv, 1_800).unwrap();
        match rot.value {
            SampleValue::Number(rate) => assert!((rate - 0.2).abs() < 1e-9),
            _ => panic!("turn rate must be numeric"),
        }

        // A second later the derivative is stale: absent, not old
        assert!(inst.metric("turnRate", &conv, 2_600).is_none());
    }

    #[test]
    fn turn_rate_wraps_shortest_way() {
        let mut inst = instance(gps_catalog(), SensorKind::Gps);
        let conv = UnitConverter::default();

        // 350° -> 10° is +20° of turn, not -340°
        let h0 = 350.0_f64.to_radians();
        let h1 = 10.0_f64.to_radians();
        inst.update(&patch(&[("heading", FieldValue::Number(h0))]), 1_000)
            .unwrap();
        inst.update(&patch(&[("heading", FieldValue::Number(h1))]), 2_000)
            .unwrap();

        let rot = inst.metric("turnRate", &conv, 2_500).unwrap();
        match rot.value {
            SampleValue::Number(rate) => {
                assert!((rate - 20.0_f64.to_radians()).abs() < 1e-9);
            }
            _ => panic!("turn rate must be numeric"),
        }
    }

    #[test]
    fn destroy_makes_instance_inert() {
        let mut inst = instance(battery_catalog(), SensorKind::Battery);
        let conv = UnitConverter::default();

        inst.update(&patch(&[("voltage", FieldValue::Number(12.5))]), 1_000)
            .unwrap();
        inst.destroy();

        assert!(inst.is_destroyed());
        assert!(inst.metric("voltage", &conv, 2_000).is_none());
        let out = inst
            .update(&patch(&[("voltage", FieldValue::Number(13.0))]), 2_000)
            .unwrap();
        assert!(!out.changed);
        assert_eq!(inst.alarm_level("voltage"), AlarmLevel::None);
    }
}
