//! Reader-side operations on a [`crate::StorageTxn`] (§4.6).

use std::collections::{BTreeMap, BTreeSet};

use crate::db::table_types::{DbCursorTrait, Table};
use crate::db::TransactionKind;
use crate::error::CoverageResult;
use crate::numbits;
use crate::{CoverageMode, StorageTxn};

const META_HAS_ARCS: &str = "has_arcs";

fn ddb<Mode: TransactionKind>(txn: &StorageTxn<'_, Mode>, err: crate::db::DbError) -> crate::CoverageError {
    crate::CoverageError::backend((*txn.path).clone(), err)
}

/// Reads the persisted mode, or `None` if no write has happened yet.
pub(crate) fn read_mode<Mode: TransactionKind>(
    txn: &StorageTxn<'_, Mode>,
) -> CoverageResult<Option<CoverageMode>> {
    let meta = txn.open_table(&txn.tables.meta)?;
    let raw = meta.get(&txn.txn, &META_HAS_ARCS.to_string()).map_err(|e| ddb(txn, e))?;
    Ok(match raw.as_deref() {
        Some("1") => Some(CoverageMode::Arcs),
        Some(_) => Some(CoverageMode::Lines),
        None => None,
    })
}

fn lookup_file_id<Mode: TransactionKind>(
    txn: &StorageTxn<'_, Mode>,
    path: &str,
) -> CoverageResult<Option<u32>> {
    let files = txn.open_table(&txn.tables.files)?;
    files.get(&txn.txn, &path.to_string()).map_err(|e| ddb(txn, e))
}

/// All distinct context names (§4.6).
pub(crate) fn measured_contexts<Mode: TransactionKind>(
    txn: &StorageTxn<'_, Mode>,
) -> CoverageResult<BTreeSet<String>> {
    let contexts = txn.open_table(&txn.tables.contexts)?;
    let mut cursor = contexts.cursor(&txn.txn).map_err(|e| ddb(txn, e))?;
    let mut out = BTreeSet::new();
    let mut current = cursor.lower_bound(&String::new()).map_err(|e| ddb(txn, e))?;
    while let Some((name, _)) = current {
        out.insert(name);
        current = cursor.next().map_err(|e| ddb(txn, e))?;
    }
    Ok(out)
}

/// The tracer recorded for `path`, if any (§4.6).
pub(crate) fn file_tracer<Mode: TransactionKind>(
    txn: &StorageTxn<'_, Mode>,
    path: &str,
) -> CoverageResult<Option<String>> {
    let Some(file_id) = lookup_file_id(txn, path)? else {
        return Ok(None);
    };
    let tracers = txn.open_table(&txn.tables.tracers)?;
    Ok(Some(tracers.get(&txn.txn, &file_id).map_err(|e| ddb(txn, e))?.unwrap_or_default()))
}

/// All `(context_id, numbits)` rows for `file_id`, optionally filtered to `ctx_filter`.
fn line_bit_rows<Mode: TransactionKind>(
    txn: &StorageTxn<'_, Mode>,
    file_id: u32,
    ctx_filter: Option<&[u32]>,
) -> CoverageResult<Vec<(u32, Vec<u8>)>> {
    let table = txn.open_table(&txn.tables.line_bits)?;
    let mut cursor = table.cursor(&txn.txn).map_err(|e| ddb(txn, e))?;
    let mut out = Vec::new();
    let mut current = cursor.lower_bound(&(file_id, 0)).map_err(|e| ddb(txn, e))?;
    while let Some(((row_file, ctx_id), numbits)) = current {
        if row_file != file_id {
            break;
        }
        if ctx_filter.map(|ids| ids.contains(&ctx_id)).unwrap_or(true) {
            out.push((ctx_id, numbits));
        }
        current = cursor.next().map_err(|e| ddb(txn, e))?;
    }
    Ok(out)
}

/// All `(context_id, fromno, tono)` rows for `file_id`, optionally filtered to `ctx_filter`.
fn arc_rows<Mode: TransactionKind>(
    txn: &StorageTxn<'_, Mode>,
    file_id: u32,
    ctx_filter: Option<&[u32]>,
) -> CoverageResult<Vec<(u32, i64, i64)>> {
    let table = txn.open_table(&txn.tables.arcs)?;
    let mut cursor = table.cursor(&txn.txn).map_err(|e| ddb(txn, e))?;
    let mut out = Vec::new();
    let mut current = cursor.lower_bound(&(file_id, 0, i64::MIN, i64::MIN)).map_err(|e| ddb(txn, e))?;
    while let Some(((row_file, ctx_id, fromno, tono), ())) = current {
        if row_file != file_id {
            break;
        }
        if ctx_filter.map(|ids| ids.contains(&ctx_id)).unwrap_or(true) {
            out.push((ctx_id, fromno, tono));
        }
        current = cursor.next().map_err(|e| ddb(txn, e))?;
    }
    Ok(out)
}

/// Implements `lines` (§4.6): in arc mode, derived from the union of positive from/to values;
/// in line mode, the numbits union across matching rows.
pub(crate) fn lines<Mode: TransactionKind>(
    txn: &StorageTxn<'_, Mode>,
    path: &str,
    ctx_filter: Option<&[u32]>,
) -> CoverageResult<Option<Vec<u32>>> {
    let Some(file_id) = lookup_file_id(txn, path)? else {
        return Ok(None);
    };
    match read_mode(txn)? {
        Some(CoverageMode::Arcs) => {
            let mut set = BTreeSet::new();
            for (_, fromno, tono) in arc_rows(txn, file_id, ctx_filter)? {
                for n in [fromno, tono] {
                    if n > 0 {
                        set.insert(n as u32);
                    }
                }
            }
            Ok(Some(set.into_iter().collect()))
        }
        _ => {
            let mut combined: Vec<u8> = Vec::new();
            for (_, numbits) in line_bit_rows(txn, file_id, ctx_filter)? {
                combined = numbits::union(&combined, &numbits);
            }
            Ok(Some(numbits::decode(&combined).into_iter().collect()))
        }
    }
}

/// Implements `arcs` (§4.6): distinct `(from, to)` pairs, optional context filter.
pub(crate) fn arcs<Mode: TransactionKind>(
    txn: &StorageTxn<'_, Mode>,
    path: &str,
    ctx_filter: Option<&[u32]>,
) -> CoverageResult<Option<Vec<(i64, i64)>>> {
    let Some(file_id) = lookup_file_id(txn, path)? else {
        return Ok(None);
    };
    let mut pairs: BTreeSet<(i64, i64)> = BTreeSet::new();
    for (_, fromno, tono) in arc_rows(txn, file_id, ctx_filter)? {
        pairs.insert((fromno, tono));
    }
    Ok(Some(pairs.into_iter().collect()))
}

/// Implements `contexts_by_lineno` (§4.6). Arc mode deduplicates context names per line; line
/// mode deliberately does not (§9 Open Question 2).
pub(crate) fn contexts_by_lineno<Mode: TransactionKind>(
    txn: &StorageTxn<'_, Mode>,
    path: &str,
) -> CoverageResult<BTreeMap<i64, Vec<String>>> {
    let Some(file_id) = lookup_file_id(txn, path)? else {
        return Ok(BTreeMap::new());
    };
    let contexts_by_id = txn.open_table(&txn.tables.contexts_by_id)?;
    let mut context_name = |id: u32| -> CoverageResult<String> {
        Ok(contexts_by_id.get(&txn.txn, &id).map_err(|e| ddb(txn, e))?.unwrap_or_default())
    };

    match read_mode(txn)? {
        Some(CoverageMode::Arcs) => {
            let mut by_line: BTreeMap<i64, BTreeSet<String>> = BTreeMap::new();
            for (ctx_id, fromno, tono) in arc_rows(txn, file_id, None)? {
                let name = context_name(ctx_id)?;
                for n in [fromno, tono] {
                    by_line.entry(n).or_default().insert(name.clone());
                }
            }
            Ok(by_line.into_iter().map(|(k, v)| (k, v.into_iter().collect())).collect())
        }
        _ => {
            let mut by_line: BTreeMap<i64, Vec<String>> = BTreeMap::new();
            for (ctx_id, numbits) in line_bit_rows(txn, file_id, None)? {
                let name = context_name(ctx_id)?;
                for n in numbits::decode(&numbits) {
                    by_line.entry(n as i64).or_default().push(name.clone());
                }
            }
            Ok(by_line)
        }
    }
}

/// The legacy `REGEXP` convention (§4.2, §9 Open Question 1): called as `(text, pattern)`, not
/// the more common `(pattern, text)` — preserved here rather than silently "fixed".
pub(crate) fn regexp(text: &str, pattern: &str) -> bool {
    regex::Regex::new(pattern).map(|re| re.is_match(text)).unwrap_or(false)
}

/// Resolves `patterns` against context names, returning the ids of every context that matches
/// at least one pattern (§4.6).
pub(crate) fn contexts_matching<Mode: TransactionKind>(
    txn: &StorageTxn<'_, Mode>,
    patterns: &[String],
) -> CoverageResult<Vec<u32>> {
    let contexts_by_id = txn.open_table(&txn.tables.contexts_by_id)?;
    let mut cursor = contexts_by_id.cursor(&txn.txn).map_err(|e| ddb(txn, e))?;
    let mut out = Vec::new();
    let mut current = cursor.lower_bound(&0).map_err(|e| ddb(txn, e))?;
    while let Some((id, name)) = current {
        if patterns.iter().any(|pattern| regexp(&name, pattern)) {
            out.push(id);
        }
        current = cursor.next().map_err(|e| ddb(txn, e))?;
    }
    Ok(out)
}
