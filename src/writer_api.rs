//! Writer-side operations on a [`crate::StorageTxn`] (§4.5).

use std::collections::{BTreeMap, BTreeSet};

use crate::catalog::{self, Catalog};
use crate::db::table_types::Table;
use crate::db::RW;
use crate::error::{CoverageError, CoverageResult};
use crate::numbits;
use crate::StorageTxn;

const META_HAS_ARCS: &str = "has_arcs";

fn ddb(txn: &StorageTxn<'_, RW>, err: crate::db::DbError) -> CoverageError {
    CoverageError::backend((*txn.path).clone(), err)
}

/// Persists `has_arcs` the first time it's observed; a no-op on every later call (§4.5).
pub(crate) fn record_mode(txn: &StorageTxn<'_, RW>, has_arcs: bool) -> CoverageResult<()> {
    let meta = txn.open_table(&txn.tables.meta)?;
    if meta.get(&txn.txn, &META_HAS_ARCS.to_string()).map_err(|e| ddb(txn, e))?.is_none() {
        meta.insert(&txn.txn, &META_HAS_ARCS.to_string(), &(if has_arcs { "1" } else { "0" }.to_string()))
            .map_err(|e| ddb(txn, e))?;
    }
    Ok(())
}

fn effective_context<'a>(txn: &StorageTxn<'_, RW>, name: Option<&'a str>) -> &'a str {
    let _ = txn;
    name.unwrap_or("")
}

/// Implements `add_lines` (§4.5, §8 property 3): unions each file's new line set into the
/// `LineBits` row for the current context.
pub(crate) fn add_lines(
    txn: &StorageTxn<'_, RW>,
    catalog: &Catalog,
    data: &BTreeMap<String, BTreeSet<u32>>,
    context: Option<&str>,
) -> CoverageResult<()> {
    record_mode(txn, false)?;
    let context_name = effective_context(txn, context);
    let context_id = catalog::context_id(txn, &txn.tables, context_name, true)?
        .expect("context_id(add=true) always returns Some");

    let line_bits = txn.open_table(&txn.tables.line_bits)?;
    for (path, new_lines) in data {
        let file_id = catalog
            .file_id(txn, &txn.tables, path, true)?
            .expect("file_id(add=true) always returns Some");
        let key = (file_id, context_id);
        let existing = line_bits.get(&txn.txn, &key).map_err(|e| ddb(txn, e))?;
        let new_bytes = numbits::encode(new_lines);
        let combined = match existing {
            Some(existing_bytes) => numbits::union(&existing_bytes, &new_bytes),
            None => new_bytes,
        };
        line_bits.upsert(&txn.txn, &key, &combined).map_err(|e| ddb(txn, e))?;
    }
    Ok(())
}

/// Implements `add_arcs` (§4.5, §8 property 4): insert-or-ignore each arc, making repeated
/// inserts idempotent.
pub(crate) fn add_arcs(
    txn: &StorageTxn<'_, RW>,
    catalog: &Catalog,
    data: &BTreeMap<String, BTreeSet<(i64, i64)>>,
    context: Option<&str>,
) -> CoverageResult<()> {
    record_mode(txn, true)?;
    let context_name = effective_context(txn, context);
    let context_id = catalog::context_id(txn, &txn.tables, context_name, true)?
        .expect("context_id(add=true) always returns Some");

    let arcs = txn.open_table(&txn.tables.arcs)?;
    for (path, pairs) in data {
        let file_id = catalog
            .file_id(txn, &txn.tables, path, true)?
            .expect("file_id(add=true) always returns Some");
        for &(fromno, tono) in pairs {
            match arcs.insert(&txn.txn, &(file_id, context_id, fromno, tono), &()) {
                Ok(()) => {}
                Err(crate::db::DbError::KeyAlreadyExists(_)) => {}
                Err(e) => return Err(ddb(txn, e)),
            }
        }
    }
    Ok(())
}

/// Implements `add_file_tracers` (§4.5): records, or confirms consistency of, each file's
/// tracer.
pub(crate) fn add_file_tracers(
    txn: &StorageTxn<'_, RW>,
    catalog: &Catalog,
    data: &BTreeMap<String, String>,
) -> CoverageResult<()> {
    let tracers = txn.open_table(&txn.tables.tracers)?;
    for (path, tracer_name) in data {
        let Some(file_id) = catalog.file_id(txn, &txn.tables, path, false)? else {
            return Err(CoverageError::UnknownFile { path: path.clone() });
        };
        match tracers.get(&txn.txn, &file_id).map_err(|e| ddb(txn, e))? {
            Some(existing) if &existing != tracer_name => {
                return Err(CoverageError::TracerConflict {
                    path: path.clone(),
                    existing,
                    incoming: tracer_name.clone(),
                });
            }
            Some(_) => {}
            None if !tracer_name.is_empty() => {
                tracers.insert(&txn.txn, &file_id, tracer_name).map_err(|e| ddb(txn, e))?;
            }
            None => {}
        }
    }
    Ok(())
}

/// Implements `touch_files` (§4.5): ensures every path has a `File` row, optionally tagging
/// each with `tracer_name` via [`add_file_tracers`].
pub(crate) fn touch_files(
    txn: &StorageTxn<'_, RW>,
    catalog: &Catalog,
    paths: &[String],
    tracer_name: &str,
) -> CoverageResult<()> {
    for path in paths {
        catalog
            .file_id(txn, &txn.tables, path, true)?
            .expect("file_id(add=true) always returns Some");
    }
    if !tracer_name.is_empty() {
        let data: BTreeMap<String, String> =
            paths.iter().map(|p| (p.clone(), tracer_name.to_string())).collect();
        add_file_tracers(txn, catalog, &data)?;
    }
    Ok(())
}
