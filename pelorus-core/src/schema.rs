//! Schema Types and the Write-Once Schema Cache
//!
//! ## Overview
//!
//! The schema catalog is static, read-only configuration describing every
//! sensor kind the engine knows: its fields, their primitive kinds, unit
//! categories, display mnemonics, and context-dependent alarm defaults
//! (battery thresholds keyed by chemistry, engine thresholds keyed by fuel
//! type). The catalog *data* lives in the `pelorus-schemas` crate; the
//! *types* and the precomputed lookup cache live here so the engine can be
//! exercised against small hand-built catalogs in tests.
//!
//! ## The Cache
//!
//! [`SchemaCache`] is built exactly once at process start, validated, and
//! then shared read-only (behind `Arc`) by every sensor instance - the
//! "build once, share everywhere" property without hidden global state.
//! Re-initializing a cache after first use signals an ordering bug in
//! startup sequencing and fails with [`SchemaError::AlreadyInitialized`].
//!
//! ## Startup Validation
//!
//! Every formula in the catalog is checked during initialization:
//!
//! - it must parse under the restricted grammar,
//! - every referenced variable must be a declared field of the same sensor,
//!   a documented fallback parameter, or the ratio variable, and
//! - it must use the ratio variable exactly when the field declares
//!   `uses_ratio`.
//!
//! A violation is a startup-fatal configuration error. Failing here is the
//! whole point: a formula typo should stop the build of the context object,
//! not surface as a silently never-firing alarm three weeks into a cruise.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::formula::{fallback, Expr, RATIO_VAR};
use crate::threshold::AlarmDirection;
use crate::units::UnitCategory;

/// Result type for schema operations
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Schema configuration errors - all startup-fatal
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// The cache was initialized twice - a startup-ordering bug
    #[error("schema cache is already initialized")]
    AlreadyInitialized,

    /// A catalog formula failed to parse
    #[error("sensor `{sensor}` field `{field}`: formula `{formula}` does not parse: {detail}")]
    FormulaParse {
        sensor: &'static str,
        field: &'static str,
        formula: &'static str,
        detail: String,
    },

    /// A catalog formula references a field the sensor does not declare
    #[error("sensor `{sensor}` field `{field}`: formula references unknown field `{variable}`")]
    UnknownFormulaField {
        sensor: &'static str,
        field: &'static str,
        variable: String,
    },

    /// `uses_ratio` and actual ratio-variable usage disagree
    #[error("sensor `{sensor}` field `{field}`: ratio variable usage does not match `uses_ratio`")]
    RatioMismatch {
        sensor: &'static str,
        field: &'static str,
    },
}

/// Closed set of sensor kinds the engine understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum SensorKind {
    Depth,
    Battery,
    Engine,
    Wind,
    Gps,
    Environment,
    Tank,
}

impl SensorKind {
    /// Stable lowercase name, matching the wire-side sensor type strings
    pub const fn name(&self) -> &'static str {
        match self {
            SensorKind::Depth => "depth",
            SensorKind::Battery => "battery",
            SensorKind::Engine => "engine",
            SensorKind::Wind => "wind",
            SensorKind::Gps => "gps",
            SensorKind::Environment => "environment",
            SensorKind::Tank => "tank",
        }
    }
}

/// Primitive kind of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Numeric reading or numeric configuration value
    Number,
    /// Free text (instance names and the like)
    Text,
    /// One of a closed set of options; the options gate ingestion
    Picker,
    /// Boolean, stored as 0.0/1.0
    Toggle,
}

impl FieldKind {
    /// Human name for error messages
    pub const fn name(&self) -> &'static str {
        match self {
            FieldKind::Number => "number",
            FieldKind::Text => "text",
            FieldKind::Picker => "picker",
            FieldKind::Toggle => "toggle",
        }
    }
}

/// Derived metrics computed from another field's history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedMetric {
    /// Rate of turn from the heading history, rad/s, wrap-aware
    TurnRate {
        /// Field whose history is differentiated
        source: &'static str,
    },
}

/// Default alarm cutoff in the static catalog
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdDef {
    /// Fixed SI cutoff
    Direct(f64),
    /// Formula over the sensor's own fields
    Formula(&'static str),
}

/// Critical/warning defaults for one context bucket
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextDefaults {
    /// Critical cutoff default
    pub critical: ThresholdDef,
    /// Warning cutoff default
    pub warning: ThresholdDef,
}

/// Default context-bucket key for sensors without a context key field
pub const DEFAULT_CONTEXT: &str = "";

/// Alarm defaults declared by the schema for one field
#[derive(Debug, Clone)]
pub struct AlarmSchema {
    /// Which side of the cutoffs is bad
    pub direction: AlarmDirection,
    /// Absolute hysteresis offset, SI units
    pub hysteresis: f64,
    /// Staleness window in milliseconds
    pub stale_after_ms: u64,
    /// Whether cutoff formulas take the user-adjustable ratio
    pub uses_ratio: bool,
    /// Ratio installed when no persisted override exists
    pub default_ratio: f64,
    /// Cutoff defaults keyed by context value ([`DEFAULT_CONTEXT`] for
    /// context-free sensors)
    pub contexts: HashMap<&'static str, ContextDefaults>,
}

impl AlarmSchema {
    /// Defaults for a context value, falling back to the default bucket
    pub fn context(&self, value: &str) -> Option<&ContextDefaults> {
        self.contexts
            .get(value)
            .or_else(|| self.contexts.get(DEFAULT_CONTEXT))
    }
}

/// Static definition of one field of one sensor kind
#[derive(Debug, Clone)]
pub struct FieldDefinition {
    /// Field name as it appears in decoder updates
    pub name: &'static str,
    /// Primitive kind
    pub kind: FieldKind,
    /// Conversion/formatting category; `None` for raw numbers
    pub unit_category: Option<UnitCategory>,
    /// Human label
    pub label: &'static str,
    /// Short instrument mnemonic (DPT, SOG, VLT, ...)
    pub mnemonic: &'static str,
    /// User-editable configuration field (vs hardware-reported)
    pub editable: bool,
    /// Default numeric value for editable fields
    pub default: Option<f64>,
    /// Lower editor bound
    pub min: Option<f64>,
    /// Upper editor bound
    pub max: Option<f64>,
    /// Declared options for picker fields
    pub options: &'static [&'static str],
    /// Append a sample even when the value is unchanged (live clock)
    pub always_update: bool,
    /// Derived metric computed from another field, never ingested
    pub derived: Option<DerivedMetric>,
    /// Alarm defaults, if this field alarms
    pub alarm: Option<AlarmSchema>,
}

impl FieldDefinition {
    /// A plain number field with no frills
    pub fn number(name: &'static str, label: &'static str, mnemonic: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Number,
            unit_category: None,
            label,
            mnemonic,
            editable: false,
            default: None,
            min: None,
            max: None,
            options: &[],
            always_update: false,
            derived: None,
            alarm: None,
        }
    }
}

/// All fields of one sensor kind
#[derive(Debug, Clone)]
pub struct SensorSchema {
    /// Which sensor kind these fields describe
    pub kind: SensorKind,
    /// Field whose value selects the alarm context bucket
    pub context_key: Option<&'static str>,
    /// Every field the kind declares, derived metrics included
    pub fields: Vec<FieldDefinition>,
}

impl SensorSchema {
    /// Find a field by name
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// The full static catalog
#[derive(Debug, Clone, Default)]
pub struct SensorCatalog {
    /// One schema per sensor kind
    pub sensors: Vec<SensorSchema>,
}

/// Precomputed, write-once schema lookup tables
///
/// Built from the catalog exactly once, then shared read-only by every
/// sensor instance via `Arc`. Holds per-(kind, field) unit category and
/// mnemonic tables so instances never re-walk the catalog.
#[derive(Debug, Default)]
pub struct SchemaCache {
    initialized: bool,
    sensors: HashMap<SensorKind, Arc<SensorSchema>>,
    categories: HashMap<SensorKind, HashMap<&'static str, UnitCategory>>,
    mnemonics: HashMap<SensorKind, HashMap<&'static str, &'static str>>,
}

impl SchemaCache {
    /// Create an empty, uninitialized cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the lookup tables from a catalog, validating every formula
    ///
    /// Errors are startup-fatal. Calling this twice on the same cache is a
    /// startup-ordering bug and fails without touching existing tables.
    pub fn initialize(&mut self, catalog: SensorCatalog) -> SchemaResult<()> {
        if self.initialized {
            return Err(SchemaError::AlreadyInitialized);
        }

        for sensor in &catalog.sensors {
            validate_sensor(sensor)?;
        }

        for sensor in catalog.sensors {
            let kind = sensor.kind;
            let mut categories = HashMap::new();
            let mut mnemonics = HashMap::new();
            for field in &sensor.fields {
                if let Some(cat) = field.unit_category {
                    categories.insert(field.name, cat);
                }
                mnemonics.insert(field.name, field.mnemonic);
            }
            self.categories.insert(kind, categories);
            self.mnemonics.insert(kind, mnemonics);
            self.sensors.insert(kind, Arc::new(sensor));
        }

        self.initialized = true;
        Ok(())
    }

    /// Convenience: build and validate in one step, ready for sharing
    pub fn build(catalog: SensorCatalog) -> SchemaResult<Arc<Self>> {
        let mut cache = Self::new();
        cache.initialize(catalog)?;
        Ok(Arc::new(cache))
    }

    /// True once `initialize` has succeeded
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Full schema for a sensor kind
    pub fn sensor(&self, kind: SensorKind) -> Option<&Arc<SensorSchema>> {
        self.sensors.get(&kind)
    }

    /// Field definition lookup
    pub fn field(&self, kind: SensorKind, name: &str) -> Option<&FieldDefinition> {
        self.sensors.get(&kind)?.field(name)
    }

    /// Unit category lookup
    pub fn category(&self, kind: SensorKind, field: &str) -> Option<UnitCategory> {
        self.categories.get(&kind)?.get(field).copied()
    }

    /// Display mnemonic lookup
    pub fn mnemonic(&self, kind: SensorKind, field: &str) -> Option<&'static str> {
        self.mnemonics.get(&kind)?.get(field).copied()
    }
}

/// Check every formula of one sensor against its field list
fn validate_sensor(sensor: &SensorSchema) -> SchemaResult<()> {
    let sensor_name = sensor.kind.name();

    for field in &sensor.fields {
        let alarm = match &field.alarm {
            Some(alarm) => alarm,
            None => continue,
        };

        let mut ratio_used = false;

        for defaults in alarm.contexts.values() {
            for def in [&defaults.critical, &defaults.warning] {
                let source = match def {
                    ThresholdDef::Formula(source) => *source,
                    ThresholdDef::Direct(_) => continue,
                };

                let expr = Expr::parse(source).map_err(|e| SchemaError::FormulaParse {
                    sensor: sensor_name,
                    field: field.name,
                    formula: source,
                    detail: e.to_string(),
                })?;

                for variable in expr.variables() {
                    if variable == RATIO_VAR {
                        ratio_used = true;
                        continue;
                    }
                    let declared = sensor.field(variable).is_some();
                    if !declared && fallback(variable).is_none() {
                        return Err(SchemaError::UnknownFormulaField {
                            sensor: sensor_name,
                            field: field.name,
                            variable: variable.to_string(),
                        });
                    }
                }
            }
        }

        if ratio_used != alarm.uses_ratio {
            return Err(SchemaError::RatioMismatch {
                sensor: sensor_name,
                field: field.name,
            });
        }
    }

    Ok(())
}
