//! Static Marine Sensor Catalog for Pelorus
//!
//! ## Overview
//!
//! This crate holds the *data* half of the schema system: the full catalog
//! of sensor kinds the engine ships with - depth sounder, battery monitor,
//! engine interface, wind transducer, GPS, environment cluster and tanks -
//! with their fields, unit categories, display mnemonics and alarm
//! defaults. The *types* (and the write-once lookup cache built from this
//! catalog) live in `pelorus-core`, which keeps the engine testable
//! against small hand-built catalogs without pulling real boat data in.
//!
//! ## Catalog Design
//!
//! Everything here is `&'static` data assembled in plain Rust rather than
//! parsed from an embedded data file: the catalog changes only with a
//! release, the compiler checks field references at build time, and
//! startup validation in the cache checks the parts the compiler cannot
//! (formula grammar, formula variables, ratio declarations).
//!
//! Alarm defaults are context-bucketed where the safe values genuinely
//! depend on configuration: battery cutoffs keyed by chemistry, engine
//! cutoffs keyed by fuel type, tank cutoffs keyed by tank type. Contexts
//! the catalog does not list simply have no default alarm - a waste tank
//! does not inherit the fresh-water low-level alarm.
//!
//! ## Usage
//!
//! ```no_run
//! use pelorus_schemas::build_cache;
//!
//! let cache = build_cache().expect("shipped catalog is valid");
//! let registry = pelorus_core::SensorRegistry::new(cache);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;

pub use catalog::default_catalog;

use std::sync::Arc;

use pelorus_core::schema::{SchemaCache, SchemaResult};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build and validate the shipped catalog, ready for sharing
///
/// Fails only if the catalog itself is broken, which is a release
/// defect, not a runtime condition.
pub fn build_cache() -> SchemaResult<Arc<SchemaCache>> {
    SchemaCache::build(default_catalog())
}
