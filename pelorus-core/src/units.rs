//! Unit Conversion Service - SI storage, preference-driven display
//!
//! ## Overview
//!
//! Every value the engine stores is in an SI base unit (meters, m/s,
//! kelvin, volts, pascals, radians, ...). Display units are a *rendering*
//! concern: a skipper flips depth from meters to feet and every stored
//! sample is unchanged. Each metric carries a [`UnitCategory`] tag from the
//! schema that selects the conversion and formatting rule.
//!
//! ## Caching
//!
//! Building a conversion rule is cheap but happens on every read of every
//! metric, so the converter keeps a per-category rule cache tagged with the
//! preference version. Changing preferences bumps the version; the next
//! lookup notices the mismatch, drops the cache, and rebuilds lazily.
//!
//! All rules are affine (`display = si * factor + offset`), which covers
//! every marine unit in the catalog including the temperature scales.
//!
//! ## Failure Mode
//!
//! A category with no conversion rule is a configuration-completeness bug:
//! the schema declared a category the conversion table does not cover. The
//! converter returns [`EngineError::UnregisteredCategory`] rather than
//! guessing, so the gap is caught loudly in integration, not silently at
//! sea.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, EngineResult};

/// Unit category tag attached to metrics via the static schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnitCategory {
    /// Water depth, SI meters
    Depth,
    /// Horizontal distance, SI meters
    Distance,
    /// Boat/wind speed, SI meters per second
    Speed,
    /// Temperature, SI kelvin
    Temperature,
    /// DC voltage, SI volts
    Voltage,
    /// DC current, SI amperes
    Current,
    /// Atmospheric/oil pressure, SI pascals
    Pressure,
    /// Bearing/heading/wind angle, SI radians
    Angle,
    /// Rate of turn, SI radians per second
    AngularRate,
    /// Dimensionless 0-1 ratio (state of charge, tank level, humidity)
    Ratio,
    /// Engine revolutions, SI hertz
    EngineSpeed,
    /// Tank volume, SI cubic meters
    Volume,
}

/// Preferred depth display unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub enum DepthUnit {
    Meters,
    Feet,
    Fathoms,
}

/// Preferred speed display unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub enum SpeedUnit {
    Knots,
    MilesPerHour,
    KilometersPerHour,
    MetersPerSecond,
}

/// Preferred temperature display unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
    Kelvin,
}

/// Preferred pressure display unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub enum PressureUnit {
    Hectopascals,
    PoundsPerSquareInch,
    Bar,
    InchesOfMercury,
}

/// Preferred volume display unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub enum VolumeUnit {
    Liters,
    UsGallons,
}

/// Global display preferences
///
/// Serializable so the presentation layer can persist them alongside its
/// own state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct DisplayPreferences {
    pub depth: DepthUnit,
    pub speed: SpeedUnit,
    pub temperature: TemperatureUnit,
    pub pressure: PressureUnit,
    pub volume: VolumeUnit,
}

impl Default for DisplayPreferences {
    fn default() -> Self {
        Self {
            depth: DepthUnit::Meters,
            speed: SpeedUnit::Knots,
            temperature: TemperatureUnit::Celsius,
            pressure: PressureUnit::Hectopascals,
            volume: VolumeUnit::Liters,
        }
    }
}

/// Affine conversion and formatting rule for one category
#[derive(Debug, Clone, Copy)]
struct ConversionRule {
    /// display = si * factor + offset
    factor: f64,
    offset: f64,
    /// Display unit symbol
    symbol: &'static str,
    /// Fraction digits when formatting
    decimals: usize,
}

const DEG_PER_RAD: f64 = 57.295_779_513_082_32;

/// Category-keyed SI<->display conversion and formatting service
///
/// Not `Sync`: the rule cache uses interior mutability under the engine's
/// single-writer model. A multi-threaded embedding owns one converter per
/// serialized access path.
#[derive(Debug)]
pub struct UnitConverter {
    prefs: DisplayPreferences,
    version: u64,
    rules: RefCell<HashMap<UnitCategory, ConversionRule>>,
    cached_version: Cell<u64>,
}

impl UnitConverter {
    /// Create a converter with the given preferences
    pub fn new(prefs: DisplayPreferences) -> Self {
        Self {
            prefs,
            version: 1,
            rules: RefCell::new(HashMap::new()),
            cached_version: Cell::new(0),
        }
    }

    /// Replace preferences and invalidate the rule cache
    pub fn set_preferences(&mut self, prefs: DisplayPreferences) {
        self.prefs = prefs;
        self.version += 1;
    }

    /// Current preference version; bumped on every preference change
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Current preferences
    pub fn preferences(&self) -> &DisplayPreferences {
        &self.prefs
    }

    /// Convert an SI value to the preferred display unit
    pub fn to_display(&self, si_value: f64, category: UnitCategory) -> EngineResult<f64> {
        let rule = self.rule(category)?;
        Ok(si_value * rule.factor + rule.offset)
    }

    /// Convert a display-unit value back to SI
    pub fn to_si(&self, display_value: f64, category: UnitCategory) -> EngineResult<f64> {
        let rule = self.rule(category)?;
        Ok((display_value - rule.offset) / rule.factor)
    }

    /// Display unit symbol for a category
    pub fn unit(&self, category: UnitCategory) -> EngineResult<&'static str> {
        Ok(self.rule(category)?.symbol)
    }

    /// Format an SI value for display, optionally appending the unit symbol
    pub fn format(
        &self,
        si_value: f64,
        category: UnitCategory,
        include_unit: bool,
    ) -> EngineResult<String> {
        let rule = self.rule(category)?;
        let display = si_value * rule.factor + rule.offset;

        if display.is_nan() {
            // The "no reading" sentinel renders as dashes on every gauge
            return Ok(if include_unit {
                format!("-- {}", rule.symbol)
            } else {
                "--".to_string()
            });
        }

        Ok(if include_unit {
            format!("{:.*} {}", rule.decimals, display, rule.symbol)
        } else {
            format!("{:.*}", rule.decimals, display)
        })
    }

    /// Look up the rule for a category, rebuilding the cache on a
    /// preference-version mismatch
    fn rule(&self, category: UnitCategory) -> EngineResult<ConversionRule> {
        if self.cached_version.get() != self.version {
            self.rules.borrow_mut().clear();
            self.cached_version.set(self.version);
        }

        if let Some(rule) = self.rules.borrow().get(&category) {
            return Ok(*rule);
        }

        let rule = rule_for(&self.prefs, category)
            .ok_or(EngineError::UnregisteredCategory { category })?;
        self.rules.borrow_mut().insert(category, rule);
        Ok(rule)
    }
}

impl Default for UnitConverter {
    fn default() -> Self {
        Self::new(DisplayPreferences::default())
    }
}

/// Conversion table: one rule per category, selected by preference
fn rule_for(prefs: &DisplayPreferences, category: UnitCategory) -> Option<ConversionRule> {
    let rule = match category {
        UnitCategory::Depth => match prefs.depth {
            DepthUnit::Meters => ConversionRule { factor: 1.0, offset: 0.0, symbol: "m", decimals: 1 },
            DepthUnit::Feet => ConversionRule { factor: 3.280_84, offset: 0.0, symbol: "ft", decimals: 1 },
            DepthUnit::Fathoms => ConversionRule { factor: 0.546_806_6, offset: 0.0, symbol: "fm", decimals: 1 },
        },
        UnitCategory::Distance => ConversionRule {
            factor: 1.0 / 1852.0,
            offset: 0.0,
            symbol: "nm",
            decimals: 1,
        },
        UnitCategory::Speed => match prefs.speed {
            SpeedUnit::Knots => ConversionRule { factor: 1.943_844_5, offset: 0.0, symbol: "kn", decimals: 1 },
            SpeedUnit::MilesPerHour => ConversionRule { factor: 2.236_936_3, offset: 0.0, symbol: "mph", decimals: 1 },
            SpeedUnit::KilometersPerHour => ConversionRule { factor: 3.6, offset: 0.0, symbol: "km/h", decimals: 1 },
            SpeedUnit::MetersPerSecond => ConversionRule { factor: 1.0, offset: 0.0, symbol: "m/s", decimals: 1 },
        },
        UnitCategory::Temperature => match prefs.temperature {
            TemperatureUnit::Celsius => ConversionRule { factor: 1.0, offset: -273.15, symbol: "°C", decimals: 1 },
            TemperatureUnit::Fahrenheit => ConversionRule { factor: 1.8, offset: -459.67, symbol: "°F", decimals: 1 },
            TemperatureUnit::Kelvin => ConversionRule { factor: 1.0, offset: 0.0, symbol: "K", decimals: 1 },
        },
        UnitCategory::Voltage => ConversionRule { factor: 1.0, offset: 0.0, symbol: "V", decimals: 2 },
        UnitCategory::Current => ConversionRule { factor: 1.0, offset: 0.0, symbol: "A", decimals: 1 },
        UnitCategory::Pressure => match prefs.pressure {
            PressureUnit::Hectopascals => ConversionRule { factor: 0.01, offset: 0.0, symbol: "hPa", decimals: 0 },
            PressureUnit::PoundsPerSquareInch => ConversionRule { factor: 1.450_377e-4, offset: 0.0, symbol: "psi", decimals: 1 },
            PressureUnit::Bar => ConversionRule { factor: 1.0e-5, offset: 0.0, symbol: "bar", decimals: 3 },
            PressureUnit::InchesOfMercury => ConversionRule { factor: 2.952_998e-4, offset: 0.0, symbol: "inHg", decimals: 2 },
        },
        UnitCategory::Angle => ConversionRule { factor: DEG_PER_RAD, offset: 0.0, symbol: "°", decimals: 0 },
        UnitCategory::AngularRate => ConversionRule { factor: DEG_PER_RAD, offset: 0.0, symbol: "°/s", decimals: 1 },
        UnitCategory::Ratio => ConversionRule { factor: 100.0, offset: 0.0, symbol: "%", decimals: 0 },
        UnitCategory::EngineSpeed => ConversionRule { factor: 60.0, offset: 0.0, symbol: "rpm", decimals: 0 },
        UnitCategory::Volume => match prefs.volume {
            VolumeUnit::Liters => ConversionRule { factor: 1000.0, offset: 0.0, symbol: "L", decimals: 0 },
            VolumeUnit::UsGallons => ConversionRule { factor: 264.172_05, offset: 0.0, symbol: "gal", decimals: 1 },
        },
    };
    Some(rule)
}
