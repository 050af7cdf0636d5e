//! Table identifiers for the coverage data model and the version gate that guards opening an
//! existing store.

use std::sync::Arc;

use crate::db::serialization::NoVersionValueWrapper;
use crate::db::table_types::{SimpleTable, Table};
use crate::db::{DbWriter, TableIdentifier};
use crate::error::{CoverageError, CoverageResult};

/// On-disk schema version. A mismatch is a hard error (§6): this store never migrates old
/// data in place.
pub(crate) const SCHEMA_VERSION: i64 = 7;

const SCHEMA_VERSION_KEY: &str = "schema_version";

// The legacy coverage.py on-disk signature; seeing it on a version mismatch means the file was
// written by that implementation and not this one.
const LEGACY_SIGNATURE: &str = "!coverage.py: This is a private format";

pub(crate) struct Tables {
    pub(crate) schema_version: TableIdentifier<String, NoVersionValueWrapper<i64>, SimpleTable>,
    pub(crate) meta: TableIdentifier<String, NoVersionValueWrapper<String>, SimpleTable>,
    pub(crate) files: TableIdentifier<String, NoVersionValueWrapper<u32>, SimpleTable>,
    pub(crate) files_by_id: TableIdentifier<u32, NoVersionValueWrapper<String>, SimpleTable>,
    pub(crate) contexts: TableIdentifier<String, NoVersionValueWrapper<u32>, SimpleTable>,
    pub(crate) contexts_by_id: TableIdentifier<u32, NoVersionValueWrapper<String>, SimpleTable>,
    pub(crate) line_bits:
        TableIdentifier<(u32, u32), NoVersionValueWrapper<Vec<u8>>, SimpleTable>,
    pub(crate) arcs: TableIdentifier<(u32, u32, i64, i64), NoVersionValueWrapper<()>, SimpleTable>,
    pub(crate) tracers: TableIdentifier<u32, NoVersionValueWrapper<String>, SimpleTable>,
}

pub(crate) fn open_tables(db_writer: &mut DbWriter, path: &std::path::Path) -> CoverageResult<Arc<Tables>> {
    let ddb = |e| CoverageError::backend(path.to_path_buf(), e);
    Ok(Arc::new(Tables {
        schema_version: db_writer.create_simple_table("schema_version").map_err(ddb)?,
        meta: db_writer.create_simple_table("meta").map_err(ddb)?,
        files: db_writer.create_simple_table("files").map_err(ddb)?,
        files_by_id: db_writer.create_simple_table("files_by_id").map_err(ddb)?,
        contexts: db_writer.create_simple_table("contexts").map_err(ddb)?,
        contexts_by_id: db_writer.create_simple_table("contexts_by_id").map_err(ddb)?,
        line_bits: db_writer.create_simple_table("line_bits").map_err(ddb)?,
        arcs: db_writer.create_simple_table("arcs").map_err(ddb)?,
        tracers: db_writer.create_simple_table("tracers").map_err(ddb)?,
    }))
}

/// Installs the `SchemaVersion` row (and the initial `Meta` rows) on a brand-new store.
pub(crate) fn install_fresh<'env>(
    txn: &crate::StorageTxn<'env, crate::db::RW>,
    path: &std::path::Path,
    meta_rows: &[(&str, String)],
) -> CoverageResult<()> {
    let version_table = txn.txn.open_table(&txn.tables.schema_version).map_err(|e| ddb_at(path, e))?;
    version_table
        .insert(&txn.txn, &SCHEMA_VERSION_KEY.to_string(), &SCHEMA_VERSION)
        .map_err(|e| ddb_at(path, e))?;
    let meta_table = txn.txn.open_table(&txn.tables.meta).map_err(|e| ddb_at(path, e))?;
    for (key, value) in meta_rows {
        meta_table.insert(&txn.txn, &(*key).to_string(), value).map_err(|e| ddb_at(path, e))?;
    }
    Ok(())
}

/// Checks the on-disk `SchemaVersion` against [`SCHEMA_VERSION`] on an existing store.
pub(crate) fn verify_existing<'env, Mode: crate::db::TransactionKind>(
    txn: &crate::StorageTxn<'env, Mode>,
    path: &std::path::Path,
) -> CoverageResult<()> {
    let table = txn.txn.open_table(&txn.tables.schema_version).map_err(|e| ddb_at(path, e))?;
    match table.get(&txn.txn, &SCHEMA_VERSION_KEY.to_string()).map_err(|e| ddb_at(path, e))? {
        None => {
            let hint = legacy_hint(path);
            Err(CoverageError::MalformedFile {
                path: path.to_path_buf(),
                reason: format!("no schema-version row found{hint}"),
            })
        }
        Some(found) if found == SCHEMA_VERSION => Ok(()),
        Some(found) => {
            Err(CoverageError::SchemaMismatch { path: path.to_path_buf(), found, expected: SCHEMA_VERSION })
        }
    }
}

fn legacy_hint(path: &std::path::Path) -> &'static str {
    match std::fs::read(path.join("mdbx.dat")) {
        Ok(bytes) if looks_like_legacy_file(&bytes) => {
            " (looks like a pre-existing coverage.py data file written by a different, \
             incompatible version)"
        }
        _ => "",
    }
}

fn ddb_at(path: &std::path::Path, err: crate::db::DbError) -> CoverageError {
    CoverageError::backend(path.to_path_buf(), err)
}

/// Checks the legacy coverage.py signature against the start of a file's raw bytes, to produce
/// a friendlier diagnostic than a bare deserialization failure.
pub(crate) fn looks_like_legacy_file(bytes: &[u8]) -> bool {
    bytes.starts_with(LEGACY_SIGNATURE.as_bytes())
}
