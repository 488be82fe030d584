//! The shipped sensor catalog
//!
//! One builder function per sensor kind, assembled by
//! [`default_catalog`]. All values are SI: depths in meters, speeds in
//! m/s, temperatures in kelvin, pressures in pascals, engine speed in
//! hertz, tank volumes in cubic meters, ratios in 0-1.
//!
//! Conventions used throughout:
//!
//! - Editable fields (`capacity`, `nominalVoltage`, `maxRpm`, ...) carry
//!   a default and editor bounds; hardware-reported fields do not.
//! - A sensor with a context key declares that key as a picker field, so
//!   ingestion rejects context values the alarm table has never heard of.
//! - Formula cutoffs reference sibling fields by name; the schema cache
//!   validates every reference at startup.

use std::collections::HashMap;

use pelorus_core::schema::{
    AlarmSchema, ContextDefaults, DerivedMetric, FieldDefinition, FieldKind, SensorCatalog,
    SensorKind, SensorSchema, ThresholdDef, DEFAULT_CONTEXT,
};
use pelorus_core::threshold::AlarmDirection;
use pelorus_core::units::UnitCategory;

/// The full catalog of shipped sensor kinds
pub fn default_catalog() -> SensorCatalog {
    SensorCatalog {
        sensors: vec![
            depth_sensor(),
            battery_sensor(),
            engine_sensor(),
            wind_sensor(),
            gps_sensor(),
            environment_sensor(),
            tank_sensor(),
        ],
    }
}

fn contexts(
    entries: &[(&'static str, ThresholdDef, ThresholdDef)],
) -> HashMap<&'static str, ContextDefaults> {
    entries
        .iter()
        .map(|(key, critical, warning)| {
            (
                *key,
                ContextDefaults {
                    critical: *critical,
                    warning: *warning,
                },
            )
        })
        .collect()
}

fn depth_sensor() -> SensorSchema {
    let mut depth = FieldDefinition::number("depth", "Depth", "DPT");
    depth.unit_category = Some(UnitCategory::Depth);
    depth.alarm = Some(AlarmSchema {
        direction: AlarmDirection::Below,
        hysteresis: 0.2,
        stale_after_ms: 5_000,
        uses_ratio: false,
        default_ratio: 1.0,
        contexts: contexts(&[(
            DEFAULT_CONTEXT,
            ThresholdDef::Direct(1.0),
            ThresholdDef::Direct(2.0),
        )]),
    });

    // Transducer offset: positive when measuring from the waterline,
    // negative from the keel
    let mut offset = FieldDefinition::number("offset", "Transducer offset", "OFS");
    offset.unit_category = Some(UnitCategory::Depth);
    offset.editable = true;
    offset.default = Some(0.0);
    offset.min = Some(-5.0);
    offset.max = Some(5.0);

    SensorSchema {
        kind: SensorKind::Depth,
        context_key: None,
        fields: vec![depth, offset],
    }
}

fn battery_sensor() -> SensorSchema {
    let mut voltage = FieldDefinition::number("voltage", "Voltage", "VLT");
    voltage.unit_category = Some(UnitCategory::Voltage);
    voltage.alarm = Some(AlarmSchema {
        direction: AlarmDirection::Below,
        hysteresis: 0.1,
        stale_after_ms: 5_000,
        uses_ratio: false,
        default_ratio: 1.0,
        contexts: contexts(&[
            // Chemistry-specific resting-voltage floors. Unknown
            // chemistries scale with the configured nominal voltage.
            (
                "agm",
                ThresholdDef::Direct(12.0),
                ThresholdDef::Direct(12.2),
            ),
            (
                "gel",
                ThresholdDef::Direct(12.0),
                ThresholdDef::Direct(12.25),
            ),
            (
                "flooded",
                ThresholdDef::Formula("nominalVoltage * 0.975"),
                ThresholdDef::Formula("nominalVoltage * 1.0"),
            ),
            (
                "lifepo4",
                ThresholdDef::Direct(12.8),
                ThresholdDef::Direct(13.0),
            ),
            (
                DEFAULT_CONTEXT,
                ThresholdDef::Formula("nominalVoltage * 0.95"),
                ThresholdDef::Formula("nominalVoltage * 1.0"),
            ),
        ]),
    });

    let mut current = FieldDefinition::number("current", "Current", "AMP");
    current.unit_category = Some(UnitCategory::Current);

    let mut soc = FieldDefinition::number("stateOfCharge", "State of charge", "SOC");
    soc.unit_category = Some(UnitCategory::Ratio);
    soc.alarm = Some(AlarmSchema {
        direction: AlarmDirection::Below,
        hysteresis: 0.05,
        stale_after_ms: 30_000,
        uses_ratio: false,
        default_ratio: 1.0,
        contexts: contexts(&[(
            DEFAULT_CONTEXT,
            ThresholdDef::Direct(0.1),
            ThresholdDef::Direct(0.2),
        )]),
    });

    // Remaining amp-hours alarm scales with the configured bank capacity
    // through the user-adjustable ratio
    let mut remaining = FieldDefinition::number("remainingCapacity", "Remaining capacity", "REM");
    remaining.alarm = Some(AlarmSchema {
        direction: AlarmDirection::Below,
        hysteresis: 2.0,
        stale_after_ms: 30_000,
        uses_ratio: true,
        default_ratio: 0.1,
        contexts: contexts(&[(
            DEFAULT_CONTEXT,
            ThresholdDef::Formula("capacity * indirectThreshold"),
            ThresholdDef::Formula("capacity * indirectThreshold * 2"),
        )]),
    });

    let mut capacity = FieldDefinition::number("capacity", "Bank capacity", "CAP");
    capacity.editable = true;
    capacity.default = Some(100.0);
    capacity.min = Some(1.0);
    capacity.max = Some(2_000.0);

    let mut nominal = FieldDefinition::number("nominalVoltage", "Nominal voltage", "NOM");
    nominal.unit_category = Some(UnitCategory::Voltage);
    nominal.editable = true;
    nominal.default = Some(12.0);
    nominal.min = Some(6.0);
    nominal.max = Some(48.0);

    let mut chemistry = FieldDefinition::number("chemistry", "Chemistry", "CHM");
    chemistry.kind = FieldKind::Picker;
    chemistry.options = &["agm", "gel", "flooded", "lifepo4"];
    chemistry.editable = true;

    SensorSchema {
        kind: SensorKind::Battery,
        context_key: Some("chemistry"),
        fields: vec![voltage, current, soc, remaining, capacity, nominal, chemistry],
    }
}

fn engine_sensor() -> SensorSchema {
    // rpm is stored in SI hertz; maxRpm is entered in rpm, hence the
    // division by 60 in the overspeed formulas
    let mut rpm = FieldDefinition::number("rpm", "Engine speed", "RPM");
    rpm.unit_category = Some(UnitCategory::EngineSpeed);
    rpm.alarm = Some(AlarmSchema {
        direction: AlarmDirection::Above,
        hysteresis: 1.0,
        stale_after_ms: 5_000,
        uses_ratio: false,
        default_ratio: 1.0,
        contexts: contexts(&[
            (
                "diesel",
                ThresholdDef::Formula("maxRpm / 60"),
                ThresholdDef::Formula("maxRpm / 60 * 0.9"),
            ),
            (
                "gasoline",
                ThresholdDef::Formula("maxRpm / 60"),
                ThresholdDef::Formula("maxRpm / 60 * 0.95"),
            ),
            (
                DEFAULT_CONTEXT,
                ThresholdDef::Formula("maxRpm / 60"),
                ThresholdDef::Formula("maxRpm / 60 * 0.9"),
            ),
        ]),
    });

    let mut coolant = FieldDefinition::number("coolantTemp", "Coolant temperature", "TMP");
    coolant.unit_category = Some(UnitCategory::Temperature);
    coolant.alarm = Some(AlarmSchema {
        direction: AlarmDirection::Above,
        hysteresis: 2.0,
        stale_after_ms: 10_000,
        uses_ratio: false,
        default_ratio: 1.0,
        contexts: contexts(&[(
            DEFAULT_CONTEXT,
            // 110 C / 100 C
            ThresholdDef::Direct(383.15),
            ThresholdDef::Direct(373.15),
        )]),
    });

    let mut oil = FieldDefinition::number("oilPressure", "Oil pressure", "OIL");
    oil.unit_category = Some(UnitCategory::Pressure);
    oil.alarm = Some(AlarmSchema {
        direction: AlarmDirection::Below,
        hysteresis: 10_000.0,
        stale_after_ms: 10_000,
        uses_ratio: false,
        default_ratio: 1.0,
        contexts: contexts(&[(
            DEFAULT_CONTEXT,
            // 1.0 bar / 1.5 bar
            ThresholdDef::Direct(100_000.0),
            ThresholdDef::Direct(150_000.0),
        )]),
    });

    let mut max_rpm = FieldDefinition::number("maxRpm", "Redline", "MAX");
    max_rpm.editable = true;
    max_rpm.default = Some(6_000.0);
    max_rpm.min = Some(1_000.0);
    max_rpm.max = Some(10_000.0);

    let mut fuel_type = FieldDefinition::number("fuelType", "Fuel type", "FUE");
    fuel_type.kind = FieldKind::Picker;
    fuel_type.options = &["diesel", "gasoline"];
    fuel_type.editable = true;

    let hours = FieldDefinition::number("engineHours", "Engine hours", "HRS");

    SensorSchema {
        kind: SensorKind::Engine,
        context_key: Some("fuelType"),
        fields: vec![rpm, coolant, oil, max_rpm, fuel_type, hours],
    }
}

fn wind_sensor() -> SensorSchema {
    let mut speed = FieldDefinition::number("speed", "Apparent wind speed", "AWS");
    speed.unit_category = Some(UnitCategory::Speed);
    speed.alarm = Some(AlarmSchema {
        direction: AlarmDirection::Above,
        hysteresis: 1.0,
        stale_after_ms: 5_000,
        uses_ratio: false,
        default_ratio: 1.0,
        contexts: contexts(&[(
            DEFAULT_CONTEXT,
            // 40 kn / 30 kn
            ThresholdDef::Direct(20.6),
            ThresholdDef::Direct(15.4),
        )]),
    });

    let mut angle = FieldDefinition::number("angle", "Apparent wind angle", "AWA");
    angle.unit_category = Some(UnitCategory::Angle);

    SensorSchema {
        kind: SensorKind::Wind,
        context_key: None,
        fields: vec![speed, angle],
    }
}

fn gps_sensor() -> SensorSchema {
    let latitude = FieldDefinition::number("latitude", "Latitude", "LAT");
    let longitude = FieldDefinition::number("longitude", "Longitude", "LON");

    let mut sog = FieldDefinition::number("speedOverGround", "Speed over ground", "SOG");
    sog.unit_category = Some(UnitCategory::Speed);

    let mut cog = FieldDefinition::number("courseOverGround", "Course over ground", "COG");
    cog.unit_category = Some(UnitCategory::Angle);

    let mut heading = FieldDefinition::number("heading", "Heading", "HDG");
    heading.unit_category = Some(UnitCategory::Angle);

    let mut turn_rate = FieldDefinition::number("turnRate", "Rate of turn", "ROT");
    turn_rate.unit_category = Some(UnitCategory::AngularRate);
    turn_rate.derived = Some(DerivedMetric::TurnRate { source: "heading" });

    // The GPS clock ticks even at anchor; the timestamp must refresh on
    // every fix or everything downstream looks stale
    let mut utc_time = FieldDefinition::number("utcTime", "UTC time", "UTC");
    utc_time.always_update = true;

    SensorSchema {
        kind: SensorKind::Gps,
        context_key: None,
        fields: vec![latitude, longitude, sog, cog, heading, turn_rate, utc_time],
    }
}

fn environment_sensor() -> SensorSchema {
    let mut air_temp = FieldDefinition::number("airTemp", "Air temperature", "ATP");
    air_temp.unit_category = Some(UnitCategory::Temperature);

    let mut water_temp = FieldDefinition::number("waterTemp", "Water temperature", "WTP");
    water_temp.unit_category = Some(UnitCategory::Temperature);

    let mut pressure = FieldDefinition::number("pressure", "Barometric pressure", "BAR");
    pressure.unit_category = Some(UnitCategory::Pressure);

    let mut humidity = FieldDefinition::number("humidity", "Relative humidity", "HUM");
    humidity.unit_category = Some(UnitCategory::Ratio);

    SensorSchema {
        kind: SensorKind::Environment,
        context_key: None,
        fields: vec![air_temp, water_temp, pressure, humidity],
    }
}

fn tank_sensor() -> SensorSchema {
    let mut level = FieldDefinition::number("level", "Tank level", "LVL");
    level.unit_category = Some(UnitCategory::Ratio);
    level.alarm = Some(AlarmSchema {
        direction: AlarmDirection::Below,
        hysteresis: 0.05,
        stale_after_ms: 60_000,
        uses_ratio: false,
        default_ratio: 1.0,
        // No default bucket on purpose: a waste tank must not inherit
        // the low-level alarm, it fills rather than empties
        contexts: contexts(&[
            (
                "fuel",
                ThresholdDef::Direct(0.1),
                ThresholdDef::Direct(0.2),
            ),
            (
                "freshWater",
                ThresholdDef::Direct(0.1),
                ThresholdDef::Direct(0.2),
            ),
        ]),
    });

    let mut capacity = FieldDefinition::number("capacity", "Tank capacity", "CAP");
    capacity.unit_category = Some(UnitCategory::Volume);
    capacity.editable = true;
    capacity.default = Some(0.1);
    capacity.min = Some(0.01);
    capacity.max = Some(10.0);

    let mut tank_type = FieldDefinition::number("tankType", "Tank type", "TNK");
    tank_type.kind = FieldKind::Picker;
    tank_type.options = &["fuel", "freshWater", "wasteWater"];
    tank_type.editable = true;

    SensorSchema {
        kind: SensorKind::Tank,
        context_key: Some("tankType"),
        fields: vec![level, capacity, tank_type],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pelorus_core::schema::SchemaCache;

    #[test]
    fn every_kind_is_present() {
        let cache = SchemaCache::build(default_catalog()).unwrap();
        for kind in [
            SensorKind::Depth,
            SensorKind::Battery,
            SensorKind::Engine,
            SensorKind::Wind,
            SensorKind::Gps,
            SensorKind::Environment,
            SensorKind::Tank,
        ] {
            assert!(cache.sensor(kind).is_some(), "missing {}", kind.name());
        }
    }

    #[test]
    fn context_keys_are_declared_pickers() {
        for sensor in default_catalog().sensors {
            if let Some(key) = sensor.context_key {
                let field = sensor.field(key).expect("context key must be a field");
                assert_eq!(field.kind, FieldKind::Picker, "{}.{}", sensor.kind.name(), key);
                assert!(!field.options.is_empty());
            }
        }
    }

    #[test]
    fn formula_fields_have_declared_or_fallback_bases() {
        // The cache build runs full formula validation; a broken
        // reference fails here, not at sea
        assert!(SchemaCache::build(default_catalog()).is_ok());
    }

    #[test]
    fn mnemonics_and_categories_resolve() {
        let cache = SchemaCache::build(default_catalog()).unwrap();
        assert_eq!(cache.mnemonic(SensorKind::Depth, "depth"), Some("DPT"));
        assert_eq!(
            cache.category(SensorKind::Gps, "turnRate"),
            Some(UnitCategory::AngularRate)
        );
        assert_eq!(cache.category(SensorKind::Gps, "latitude"), None);
    }

    #[test]
    fn waste_tank_has_no_default_alarm() {
        let catalog = default_catalog();
        let tank = catalog
            .sensors
            .iter()
            .find(|s| s.kind == SensorKind::Tank)
            .unwrap();
        let alarm = tank.field("level").unwrap().alarm.as_ref().unwrap();
        assert!(alarm.context("fuel").is_some());
        assert!(alarm.context("wasteWater").is_none());
    }
}
