//! Test helpers for building a throwaway coverage store, exposed behind the `testing` feature.

use tempfile::TempDir;

use crate::config::StorageConfig;
use crate::db::DbConfig;
use crate::{CoverageData, CoverageResult};

/// Builds a fresh, tempdir-backed [`CoverageData`]. The returned [`TempDir`] must be kept alive
/// for as long as the store is in use; dropping it removes the backing directory.
pub fn get_test_storage() -> CoverageResult<(CoverageData, TempDir)> {
    let dir = tempfile::tempdir().expect("failed to create temp dir for test storage");
    let db_config = DbConfig { path_prefix: dir.path().to_path_buf(), ..Default::default() };
    let config = StorageConfig { db_config, ..Default::default() };
    let data = CoverageData::open(config)?;
    Ok((data, dir))
}
