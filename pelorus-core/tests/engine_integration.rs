//! End-to-end engine tests over a small hand-built catalog, plus
//! property tests for the invariants that must hold for any input:
//! bounded history memory and lossless unit round-trips.

use std::collections::HashMap;

use proptest::prelude::*;

use pelorus_core::history::HistoryBuffer;
use pelorus_core::sample::{MetricSample, SampleValue};
use pelorus_core::schema::{FieldDefinition, SchemaCache, SensorCatalog, SensorKind, SensorSchema};
use pelorus_core::units::{DisplayPreferences, UnitCategory, UnitConverter};
use pelorus_core::{AlarmLevel, FieldPatch, FieldValue, ReEnrichCoordinator, SensorRegistry};

fn mini_catalog() -> SensorCatalog {
    let mut depth = FieldDefinition::number("depth", "Depth", "DPT");
    depth.unit_category = Some(UnitCategory::Depth);

    let mut temp = FieldDefinition::number("waterTemp", "Water temperature", "WTP");
    temp.unit_category = Some(UnitCategory::Temperature);

    SensorCatalog {
        sensors: vec![SensorSchema {
            kind: SensorKind::Depth,
            context_key: None,
            fields: vec![depth, temp],
        }],
    }
}

fn patch(field: &str, value: f64) -> FieldPatch {
    let mut p = HashMap::new();
    p.insert(field.to_string(), Some(FieldValue::Number(value)));
    p
}

#[test]
fn ingest_query_enrich_cycle() {
    let cache = SchemaCache::build(mini_catalog()).unwrap();
    let mut registry = SensorRegistry::new(cache);
    let mut converter = UnitConverter::default();
    let mut coordinator = ReEnrichCoordinator::new();

    // A minute of soundings at 1 Hz
    for i in 0..60u64 {
        let depth = 10.0 + (i as f64) * 0.1;
        registry
            .ingest(SensorKind::Depth, 0, &patch("depth", depth), i * 1_000)
            .unwrap();
    }

    let instance = registry.get((SensorKind::Depth, 0)).unwrap();
    let metric = instance.metric("depth", &converter, 60_000).unwrap();
    let latest = metric.value.as_number().unwrap();
    assert!((latest - 15.9).abs() < 1e-9);
    assert_eq!(metric.formatted.as_deref(), Some("15.9 m"));
    assert_eq!(metric.mnemonic, "DPT");
    assert_eq!(instance.alarm_level("depth"), AlarmLevel::None);

    let stats = instance.session_stats("depth").unwrap();
    assert_eq!(stats.min, 10.0);
    assert!((stats.max - 15.9).abs() < 1e-9);
    assert_eq!(stats.count, 60);

    // Preference churn settles into a single batch pass; reads stay
    // correct throughout
    let mut prefs = DisplayPreferences::default();
    prefs.depth = pelorus_core::units::DepthUnit::Feet;
    converter.set_preferences(prefs);
    coordinator.preferences_changed(60_000);
    coordinator.preferences_changed(60_050);
    assert!(!coordinator.poll(60_100, &mut registry, &converter));
    assert!(coordinator.poll(60_150, &mut registry, &converter));

    let instance = registry.get((SensorKind::Depth, 0)).unwrap();
    let metric = instance.metric("depth", &converter, 60_150).unwrap();
    assert_eq!(metric.unit, Some("ft"));
    assert!((metric.display_value.unwrap() - 15.9 * 3.280_84).abs() < 1e-6);
}

#[test]
fn windowed_history_reads() {
    let cache = SchemaCache::build(mini_catalog()).unwrap();
    let mut registry = SensorRegistry::new(cache);

    for i in 0..10u64 {
        registry
            .ingest(SensorKind::Depth, 0, &patch("depth", i as f64), i * 10_000)
            .unwrap();
    }

    let instance = registry.get((SensorKind::Depth, 0)).unwrap();
    let full = instance.history("depth", None, 90_000);
    let recent = instance.history("depth", Some(25_000), 90_000);
    assert_eq!(full.len(), 10);
    assert_eq!(recent.len(), 3);
    assert!(recent.iter().all(|s| s.timestamp >= 65_000));
}

proptest! {
    /// Capacity is a hard bound no matter the push pattern or cadence.
    #[test]
    fn history_never_exceeds_capacity(
        capacity in 1usize..64,
        values in prop::collection::vec((0u64..10_000, -1_000.0f64..1_000.0), 0..400),
    ) {
        let mut buffer = HistoryBuffer::new(capacity, 60_000).unwrap();
        let mut now = 0u64;
        for (step, value) in values {
            now += step;
            buffer.push(MetricSample::new(SampleValue::Number(value), now));
            prop_assert!(buffer.len() <= capacity);
        }
    }

    /// Statistics over the surviving samples stay inside the range of
    /// everything ever pushed, whatever downsampling merged away.
    #[test]
    fn stats_stay_within_pushed_range(
        values in prop::collection::vec(-1_000.0f64..1_000.0, 1..300),
    ) {
        let mut buffer = HistoryBuffer::new(20, 10_000).unwrap();
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for (i, value) in values.iter().enumerate() {
            lo = lo.min(*value);
            hi = hi.max(*value);
            buffer.push(MetricSample::new(SampleValue::Number(*value), i as u64 * 1_000));
        }
        let stats = buffer.stats().unwrap();
        prop_assert!(stats.min >= lo && stats.max <= hi);
        prop_assert!(stats.min <= stats.max);
        prop_assert!(stats.avg >= stats.min && stats.avg <= stats.max);
        prop_assert!(stats.count >= 1 && stats.count <= buffer.len());
    }

    /// Display conversion is invertible for every category under default
    /// preferences.
    #[test]
    fn conversion_round_trips(si in -500.0f64..500.0) {
        let converter = UnitConverter::default();
        for category in [
            UnitCategory::Depth,
            UnitCategory::Distance,
            UnitCategory::Speed,
            UnitCategory::Temperature,
            UnitCategory::Voltage,
            UnitCategory::Current,
            UnitCategory::Pressure,
            UnitCategory::Angle,
            UnitCategory::AngularRate,
            UnitCategory::Ratio,
            UnitCategory::EngineSpeed,
            UnitCategory::Volume,
        ] {
            let display = converter.to_display(si, category).unwrap();
            let back = converter.to_si(display, category).unwrap();
            prop_assert!((back - si).abs() < 1e-9, "category {:?}: {} != {}", category, back, si);
        }
    }
}
