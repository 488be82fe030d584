//! Sensor Registry - instance lifecycle and persisted configuration
//!
//! ## Overview
//!
//! The registry owns every live [`SensorInstance`], keyed by
//! `(kind, instance number)` - the same pair NMEA 2000 uses to tell two
//! batteries apart. Instances are created lazily on first ingest and
//! stay alive until an explicit destroy or a factory reset.
//!
//! ## Persisted Configuration
//!
//! At startup the host hands the registry any saved per-instance
//! configuration: user name, context override (battery chemistry picked
//! in the settings UI), and threshold overrides as plain JSON blobs. A
//! blob for an instance that has not appeared yet is stashed and applied
//! the moment the instance is created, before its first data update, so
//! the first alarm evaluation already runs against the user's cutoffs
//! rather than schema defaults.
//!
//! Threshold blobs are deliberately loose: every key optional, unknowns
//! ignored. A blob that cannot be turned into a usable configuration is
//! logged and dropped, leaving the schema defaults in place - bad saved
//! state must never take alarming down with it.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::errors::EngineResult;
use crate::instance::{FieldPatch, SensorInstance, UpdateOutcome};
use crate::schema::{AlarmSchema, SchemaCache, SensorKind};
use crate::threshold::{
    AlarmDirection, MetricThresholds, ThresholdSpec, DEFAULT_STALE_AFTER_MS,
};
use crate::time::Timestamp;

/// Registry key: sensor kind plus bus instance number
pub type SensorKey = (SensorKind, u32);

/// How a persisted threshold blob encodes its cutoffs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdMode {
    /// `critical`/`warning` are SI cutoffs
    #[default]
    Direct,
    /// `critical`/`warning` are ratios fed into `formula`
    Formula,
}

/// Saved threshold override for one metric, every key optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedMetricConfig {
    /// Alarming on or off; absent means on
    pub enabled: Option<bool>,
    /// Which side of the cutoffs is bad
    pub direction: Option<AlarmDirection>,
    /// How `critical`/`warning` are interpreted
    pub mode: ThresholdMode,
    /// Critical cutoff (SI value or ratio per `mode`)
    pub critical: Option<f64>,
    /// Warning cutoff (SI value or ratio per `mode`)
    pub warning: Option<f64>,
    /// Formula source, required in formula mode
    pub formula: Option<String>,
    /// Absolute hysteresis offset in SI units
    pub hysteresis: Option<f64>,
    /// Staleness window override in milliseconds
    pub stale_after_ms: Option<u64>,
}

impl PersistedMetricConfig {
    /// Build runtime thresholds, filling gaps from the field's alarm
    /// schema when one exists
    fn to_thresholds(&self, schema: Option<&AlarmSchema>) -> Option<MetricThresholds> {
        let (critical, warning) = match self.mode {
            ThresholdMode::Direct => (
                ThresholdSpec::direct(self.critical?),
                ThresholdSpec::direct(self.warning?),
            ),
            ThresholdMode::Formula => {
                let source = self.formula.as_deref()?;
                let default_ratio = schema.map(|s| s.default_ratio).unwrap_or(1.0);
                (
                    ThresholdSpec::formula(source, self.critical.unwrap_or(default_ratio)),
                    ThresholdSpec::formula(source, self.warning.unwrap_or(default_ratio)),
                )
            }
        };

        Some(MetricThresholds {
            enabled: self.enabled.unwrap_or(true),
            direction: self
                .direction
                .or_else(|| schema.map(|s| s.direction))?,
            hysteresis: self
                .hysteresis
                .or_else(|| schema.map(|s| s.hysteresis))
                .unwrap_or(0.0),
            stale_after_ms: self
                .stale_after_ms
                .or_else(|| schema.map(|s| s.stale_after_ms))
                .unwrap_or(DEFAULT_STALE_AFTER_MS),
            critical,
            warning,
        })
    }
}

/// Saved configuration for one sensor instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedInstanceConfig {
    /// User-assigned display name
    pub name: Option<String>,
    /// Context override (e.g. chemistry chosen in settings)
    pub context: Option<String>,
    /// Per-metric threshold overrides, keyed by field name
    pub metrics: HashMap<String, PersistedMetricConfig>,
}

/// Owner of all live sensor instances
#[derive(Debug)]
pub struct SensorRegistry {
    schema: Arc<SchemaCache>,
    instances: HashMap<SensorKey, SensorInstance>,
    /// Saved config for instances that have not appeared on the bus yet
    pending: HashMap<SensorKey, PersistedInstanceConfig>,
}

impl SensorRegistry {
    /// Create an empty registry over an initialized schema cache
    pub fn new(schema: Arc<SchemaCache>) -> Self {
        Self {
            schema,
            instances: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// Hand the registry saved configuration for one instance
    ///
    /// Applied immediately if the instance is live, otherwise stashed
    /// until its first data update.
    pub fn load_config(&mut self, key: SensorKey, config: PersistedInstanceConfig, now: Timestamp) {
        if self.instances.contains_key(&key) {
            self.apply_config(key, &config, now);
        } else {
            debug!("stashing config for not-yet-seen {}:{}", key.0.name(), key.1);
            self.pending.insert(key, config);
        }
    }

    /// Route a decoded field update to its instance, creating it on
    /// first contact
    pub fn ingest(
        &mut self,
        kind: SensorKind,
        instance_number: u32,
        patch: &FieldPatch,
        now: Timestamp,
    ) -> EngineResult<UpdateOutcome> {
        let key = (kind, instance_number);
        if !self.instances.contains_key(&key) {
            let instance = SensorInstance::new(kind, instance_number, &self.schema)?;
            info!("new sensor on bus: {}:{}", kind.name(), instance_number);
            self.instances.insert(key, instance);
            if let Some(config) = self.pending.remove(&key) {
                self.apply_config(key, &config, now);
            }
        }

        self.instances
            .get_mut(&key)
            .expect("inserted above")
            .update(patch, now)
    }

    /// Replace one metric's thresholds on a live instance (user action)
    pub fn update_thresholds(
        &mut self,
        key: SensorKey,
        field: &str,
        config: &PersistedMetricConfig,
        now: Timestamp,
    ) {
        let alarm_schema = self
            .schema
            .field(key.0, field)
            .and_then(|def| def.alarm.as_ref());
        let thresholds = config.to_thresholds(alarm_schema);
        if thresholds.is_none() {
            warn!(
                "threshold config for {}:{} `{}` is incomplete, keeping previous",
                key.0.name(),
                key.1,
                field
            );
            return;
        }
        if let Some(instance) = self.instances.get_mut(&key) {
            instance.update_thresholds(field, thresholds, now);
        }
    }

    /// Live instance lookup
    pub fn get(&self, key: SensorKey) -> Option<&SensorInstance> {
        self.instances.get(&key)
    }

    /// Mutable live instance lookup
    pub fn get_mut(&mut self, key: SensorKey) -> Option<&mut SensorInstance> {
        self.instances.get_mut(&key)
    }

    /// Re-evaluate alarms on every instance (host's periodic tick)
    ///
    /// Staleness is the one alarm transition that happens because data
    /// *stopped* arriving, so it cannot ride on the ingest path.
    pub fn refresh_alarms(&mut self, now: Timestamp) {
        for instance in self.instances.values_mut() {
            instance.refresh_alarms(now);
        }
    }

    /// Iterate every live instance mutably (batch re-enrichment)
    pub fn instances_mut(&mut self) -> impl Iterator<Item = &mut SensorInstance> {
        self.instances.values_mut()
    }

    /// Number of live instances
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// True when no instance is live
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Tear down one instance and forget its saved state
    pub fn destroy(&mut self, key: SensorKey) {
        if let Some(mut instance) = self.instances.remove(&key) {
            instance.destroy();
            info!("destroyed sensor {}:{}", key.0.name(), key.1);
        }
        self.pending.remove(&key);
    }

    /// Destroy every instance and drop all pending configuration
    pub fn factory_reset(&mut self) {
        for instance in self.instances.values_mut() {
            instance.destroy();
        }
        self.instances.clear();
        self.pending.clear();
        info!("factory reset: all sensor state cleared");
    }

    fn apply_config(&mut self, key: SensorKey, config: &PersistedInstanceConfig, now: Timestamp) {
        let schema = Arc::clone(&self.schema);
        let instance = match self.instances.get_mut(&key) {
            Some(instance) => instance,
            None => return,
        };

        if config.name.is_some() {
            instance.set_name(config.name.clone());
        }
        if config.context.is_some() {
            instance.set_persisted_context(config.context.clone(), now);
        }

        for (field, metric) in &config.metrics {
            let alarm_schema = schema
                .field(key.0, field)
                .and_then(|def| def.alarm.as_ref());
            match metric.to_thresholds(alarm_schema) {
                Some(thresholds) => instance.update_thresholds(field, Some(thresholds), now),
                None => warn!(
                    "dropping unusable saved thresholds for {}:{} `{}`",
                    key.0.name(),
                    key.1,
                    field
                ),
            }
        }
    }
}
