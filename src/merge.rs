//! The merge ("update") engine that folds one store into another (§4.7).

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::catalog::{self, Catalog};
use crate::db::table_types::{DbCursorTrait, Table};
use crate::db::RO;
use crate::error::{CoverageError, CoverageResult};
use crate::numbits;
use crate::writer_api;
use crate::{CoverageData, CoverageMode, StorageTxn};

/// Maps a source store's file path into this store's namespace before merging (§4.7).
/// `None`/absent means identity, per the collaborator contract in §6.
pub trait PathAliases {
    /// Returns the local path that `path` (from the source store) should be recorded under.
    fn map(&self, path: &str) -> String;
}

/// An alias set that leaves every path unchanged.
pub struct IdentityAliases;

impl PathAliases for IdentityAliases {
    fn map(&self, path: &str) -> String {
        path.to_string()
    }
}

struct OtherSnapshot {
    files: Vec<String>,
    contexts: Vec<String>,
    arcs: Vec<(String, String, i64, i64)>,
    line_bits: Vec<(String, String, Vec<u8>)>,
    tracers: Vec<(String, String)>,
}

fn read_snapshot(txn: &StorageTxn<'_, RO>) -> CoverageResult<OtherSnapshot> {
    let ddb = |e| CoverageError::backend((*txn.path).clone(), e);

    let files_by_id = txn.open_table(&txn.tables.files_by_id)?;
    let mut file_names: BTreeMap<u32, String> = BTreeMap::new();
    {
        let mut cursor = files_by_id.cursor(&txn.txn).map_err(ddb)?;
        let mut current = cursor.lower_bound(&0).map_err(ddb)?;
        while let Some((id, path)) = current {
            file_names.insert(id, path);
            current = cursor.next().map_err(ddb)?;
        }
    }
    let files = file_names.values().cloned().collect();

    let contexts_by_id = txn.open_table(&txn.tables.contexts_by_id)?;
    let mut context_names: BTreeMap<u32, String> = BTreeMap::new();
    {
        let mut cursor = contexts_by_id.cursor(&txn.txn).map_err(ddb)?;
        let mut current = cursor.lower_bound(&0).map_err(ddb)?;
        while let Some((id, name)) = current {
            context_names.insert(id, name);
            current = cursor.next().map_err(ddb)?;
        }
    }
    let contexts = context_names.values().cloned().collect();

    let arcs_table = txn.open_table(&txn.tables.arcs)?;
    let mut arcs = Vec::new();
    {
        let mut cursor = arcs_table.cursor(&txn.txn).map_err(ddb)?;
        let mut current = cursor.lower_bound(&(0, 0, i64::MIN, i64::MIN)).map_err(ddb)?;
        while let Some(((file_id, ctx_id, fromno, tono), ())) = current {
            if let (Some(path), Some(ctx)) = (file_names.get(&file_id), context_names.get(&ctx_id)) {
                arcs.push((path.clone(), ctx.clone(), fromno, tono));
            }
            current = cursor.next().map_err(ddb)?;
        }
    }

    let line_bits_table = txn.open_table(&txn.tables.line_bits)?;
    let mut line_bits = Vec::new();
    {
        let mut cursor = line_bits_table.cursor(&txn.txn).map_err(ddb)?;
        let mut current = cursor.lower_bound(&(0, 0)).map_err(ddb)?;
        while let Some(((file_id, ctx_id), bits)) = current {
            if let (Some(path), Some(ctx)) = (file_names.get(&file_id), context_names.get(&ctx_id)) {
                line_bits.push((path.clone(), ctx.clone(), bits));
            }
            current = cursor.next().map_err(ddb)?;
        }
    }

    let tracers_table = txn.open_table(&txn.tables.tracers)?;
    let mut tracers = Vec::new();
    {
        let mut cursor = tracers_table.cursor(&txn.txn).map_err(ddb)?;
        let mut current = cursor.lower_bound(&0).map_err(ddb)?;
        while let Some((file_id, tracer)) = current {
            if let Some(path) = file_names.get(&file_id) {
                tracers.push((path.clone(), tracer));
            }
            current = cursor.next().map_err(ddb)?;
        }
    }

    Ok(OtherSnapshot { files, contexts, arcs, line_bits, tracers })
}

/// Implements `update` (§4.7, §8 property 7, scenarios 5 & 6).
pub(crate) fn update(
    dest: &mut CoverageData,
    other: &mut CoverageData,
    aliases: &impl PathAliases,
) -> CoverageResult<()> {
    // Step 1: mode check.
    if let (Some(dest_mode), Some(other_mode)) = (dest.mode(), other.mode()) {
        if dest_mode != other_mode {
            return Err(CoverageError::MixedMode {
                existing: dest_mode.label(),
                attempted: other_mode.label(),
            });
        }
    }

    // Step 2: force-open both and read a full snapshot of `other`.
    let snapshot = {
        let txn = other.reader().begin_ro_txn()?;
        read_snapshot(&txn)?
    };
    debug!(files = snapshot.files.len(), contexts = snapshot.contexts.len(), "merge: starting update");

    // Step 3: fold into the destination under one write transaction.
    let mut writer = dest.writer().lock().expect("writer mutex poisoned");
    let txn = writer.begin_rw_txn()?;

    if dest.mode().is_none() {
        if let Some(other_mode) = other.mode() {
            writer_api::record_mode(&txn, other_mode == CoverageMode::Arcs)?;
            dest.set_mode(other_mode);
        }
    }

    // Snapshot dest's pre-existing files (and their tracers, defaulting missing ones to "")
    // before inserting any incoming files, so a genuinely new file can be told apart from a
    // pre-existing file that simply has no tracer yet -- the former never conflicts, the
    // latter does if the incoming tracer is non-empty and different (§9 Open Question 3).
    let existing_dest_paths: BTreeSet<String> = dest.catalog().all_paths().into_iter().collect();
    let tracers_table = txn.open_table(&txn.tables.tracers)?;
    let mut this_tracers: BTreeMap<String, String> = BTreeMap::new();
    for path in &existing_dest_paths {
        let file_id = dest
            .catalog()
            .file_id(&txn, &txn.tables, path, false)?
            .expect("path came from the catalog, so its file row exists");
        let tracer = tracers_table
            .get(&txn.txn, &file_id)
            .map_err(|e| CoverageError::backend((*txn.path).clone(), e))?
            .unwrap_or_default();
        this_tracers.insert(path.clone(), tracer);
    }

    let aliased_paths: Vec<String> = snapshot.files.iter().map(|p| aliases.map(p)).collect();

    // Insert-or-ignore incoming files and contexts; refresh local ids.
    for path in &aliased_paths {
        dest.catalog().file_id(&txn, &txn.tables, path, true)?;
    }
    for name in &snapshot.contexts {
        catalog::context_id(&txn, &txn.tables, name, true)?;
    }

    let alias_of: BTreeMap<&str, &str> =
        snapshot.files.iter().map(|p| p.as_str()).zip(aliased_paths.iter().map(|p| p.as_str())).collect();

    // Tracer reconciliation: every incoming file (not just ones `other` has a tracer row for)
    // is checked, since a pre-existing destination tracer can conflict with an incoming file
    // that has no tracer row at all (incoming defaults to "").
    let other_tracer_by_path: BTreeMap<&str, &str> =
        snapshot.tracers.iter().map(|(p, t)| (p.as_str(), t.as_str())).collect();
    let mut reconciled: BTreeMap<String, String> = BTreeMap::new();
    for other_path in &snapshot.files {
        let local_path = alias_of.get(other_path.as_str()).copied().unwrap_or(other_path.as_str());
        let incoming_tracer = other_tracer_by_path.get(other_path.as_str()).copied().unwrap_or("");
        if let Some(this_tracer) = this_tracers.get(local_path) {
            if this_tracer != incoming_tracer {
                return Err(CoverageError::TracerConflict {
                    path: local_path.to_string(),
                    existing: this_tracer.clone(),
                    incoming: incoming_tracer.to_string(),
                });
            }
        }
        reconciled.insert(local_path.to_string(), incoming_tracer.to_string());
    }

    // Line union: rewrite only the destination rows touched by incoming data.
    let line_bits_table = txn.open_table(&txn.tables.line_bits)?;
    for (other_path, ctx_name, incoming_bits) in &snapshot.line_bits {
        let local_path = alias_of.get(other_path.as_str()).copied().unwrap_or(other_path.as_str());
        let file_id = dest
            .catalog()
            .file_id(&txn, &txn.tables, local_path, true)?
            .expect("file_id(add=true) always returns Some");
        let ctx_id = catalog::context_id(&txn, &txn.tables, ctx_name, true)?
            .expect("context_id(add=true) always returns Some");
        let key = (file_id, ctx_id);
        let existing = line_bits_table
            .get(&txn.txn, &key)
            .map_err(|e| CoverageError::backend((*txn.path).clone(), e))?;
        let combined = match existing {
            Some(existing_bits) => numbits::union(&existing_bits, incoming_bits),
            None => incoming_bits.clone(),
        };
        line_bits_table
            .upsert(&txn.txn, &key, &combined)
            .map_err(|e| CoverageError::backend((*txn.path).clone(), e))?;
    }

    // Arc merge: bulk insert-or-ignore.
    let arcs_table = txn.open_table(&txn.tables.arcs)?;
    for (other_path, ctx_name, fromno, tono) in &snapshot.arcs {
        let local_path = alias_of.get(other_path.as_str()).copied().unwrap_or(other_path.as_str());
        let file_id = dest
            .catalog()
            .file_id(&txn, &txn.tables, local_path, true)?
            .expect("file_id(add=true) always returns Some");
        let ctx_id = catalog::context_id(&txn, &txn.tables, ctx_name, true)?
            .expect("context_id(add=true) always returns Some");
        match arcs_table.insert(&txn.txn, &(file_id, ctx_id, *fromno, *tono), &()) {
            Ok(()) | Err(crate::db::DbError::KeyAlreadyExists(_)) => {}
            Err(e) => return Err(CoverageError::backend((*txn.path).clone(), e)),
        }
    }

    // Tracer merge: bulk insert-or-ignore the reconciled mapping.
    for (local_path, tracer) in &reconciled {
        if tracer.is_empty() {
            continue;
        }
        let file_id = dest
            .catalog()
            .file_id(&txn, &txn.tables, local_path, true)?
            .expect("file_id(add=true) always returns Some");
        tracers_table
            .upsert(&txn.txn, &file_id, tracer)
            .map_err(|e| CoverageError::backend((*txn.path).clone(), e))?;
    }

    txn.commit()?;
    drop(writer);

    // Step 4: reset in-memory caches and re-read.
    let mut new_writer = dest.writer().lock().expect("writer mutex poisoned");
    let catalog = {
        let txn = new_writer.begin_rw_txn()?;
        let catalog = Catalog::load(&txn, &txn.tables)?;
        txn.commit()?;
        catalog
    };
    drop(new_writer);
    dest.reset_after_merge(catalog);
    debug!("merge: update committed");

    Ok(())
}
