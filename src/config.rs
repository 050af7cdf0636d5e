//! Ambient configuration for a coverage store.

use serde::{Deserialize, Serialize};

use crate::db::DbConfig;

/// Top-level configuration passed to [`crate::open_storage`] / [`crate::CoverageData::open`].
///
/// This intentionally does not vendor a full configuration-management crate (see `DESIGN.md`):
/// the knob surface here is small enough that plain `serde` round-tripping is sufficient.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Low-level database geometry and location.
    pub db_config: DbConfig,
    /// Recorded in `Meta.version` on first install; identifies the producer.
    pub producer_version: String,
    /// Recorded in `Meta.sys_argv` on first install.
    pub sys_argv: String,
    /// Base filename (before any suffix); defaults to `.coverage`.
    pub basename: String,
    /// Optional per-process suffix; `None` means no suffix, `Some(Suffix::Generated)` is
    /// resolved by [`crate::lifecycle::generated_suffix`] into `<hostname>.<pid>.<random>`.
    pub suffix: Option<Suffix>,
}

/// How the on-disk filename is suffixed (§4.8).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum Suffix {
    /// Append this literal suffix.
    Literal(String),
    /// Generate a `<hostname>.<pid>.<random>` suffix, unique per process.
    Generated,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_config: DbConfig::default(),
            producer_version: env!("CARGO_PKG_VERSION").to_string(),
            sys_argv: String::new(),
            basename: ".coverage".to_string(),
            suffix: None,
        }
    }
}

impl StorageConfig {
    /// The initial `Meta` rows installed on a brand-new store (§4.2, §3).
    pub(crate) fn initial_meta(&self) -> Vec<(&'static str, String)> {
        vec![
            ("version", self.producer_version.clone()),
            ("sys_argv", self.sys_argv.clone()),
            ("when", crate::lifecycle::now_iso()),
        ]
    }
}
