//! Process-local file-path → id cache, mirroring the `files` table.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::db::table_types::Table;
use crate::db::{DbError, RW};
use crate::error::{CoverageError, CoverageResult};
use crate::schema::Tables;
use crate::StorageTxn;

fn ddb(txn: &StorageTxn<'_, impl crate::db::TransactionKind>, err: DbError) -> CoverageError {
    CoverageError::backend(txn.path.as_ref().clone(), err)
}

/// Strict subset-equal mirror of the `files` table for the lifetime of the handle (§3
/// invariant 5): every id cached here is guaranteed to also be present on disk.
#[derive(Default)]
pub(crate) struct Catalog {
    inner: Mutex<CatalogInner>,
}

#[derive(Default)]
struct CatalogInner {
    file_map: HashMap<String, u32>,
    next_file_id: u32,
}

impl Catalog {
    /// Rebuilds the cache from the `files` table; called once on open.
    pub(crate) fn load(txn: &StorageTxn<'_, RW>, tables: &Tables) -> CoverageResult<Self> {
        let table = txn.txn.open_table(&tables.files).map_err(|e| ddb(txn, e))?;
        let mut cursor = table.cursor(&txn.txn).map_err(|e| ddb(txn, e))?;
        let mut file_map = HashMap::new();
        let mut next_file_id = 0u32;
        let mut current = cursor.lower_bound(&String::new()).map_err(|e| ddb(txn, e))?;
        while let Some((path, id)) = current {
            next_file_id = next_file_id.max(id + 1);
            file_map.insert(path, id);
            current = cursor.next().map_err(|e| ddb(txn, e))?;
        }
        Ok(Self { inner: Mutex::new(CatalogInner { file_map, next_file_id }) })
    }

    /// Looks up `path`'s id. With `add = false`, unknown paths return `None`. With
    /// `add = true`, an unknown path is assigned a fresh id and persisted before returning it.
    pub(crate) fn file_id(
        &self,
        txn: &StorageTxn<'_, RW>,
        tables: &Tables,
        path: &str,
        add: bool,
    ) -> CoverageResult<Option<u32>> {
        let mut guard = self.inner.lock().expect("catalog mutex poisoned");
        if let Some(&id) = guard.file_map.get(path) {
            return Ok(Some(id));
        }
        if !add {
            return Ok(None);
        }
        let id = guard.next_file_id;
        guard.next_file_id += 1;
        let files = txn.txn.open_table(&tables.files).map_err(|e| ddb(txn, e))?;
        let files_by_id = txn.txn.open_table(&tables.files_by_id).map_err(|e| ddb(txn, e))?;
        files.upsert(&txn.txn, &path.to_string(), &id).map_err(|e| ddb(txn, e))?;
        files_by_id.upsert(&txn.txn, &id, &path.to_string()).map_err(|e| ddb(txn, e))?;
        guard.file_map.insert(path.to_string(), id);
        Ok(Some(id))
    }

    /// All cached paths, as a snapshot (§4.6 `measured_files`).
    pub(crate) fn all_paths(&self) -> Vec<String> {
        self.inner.lock().expect("catalog mutex poisoned").file_map.keys().cloned().collect()
    }
}

/// Context ids are looked up on demand rather than cached (§4.4: contexts are typically few).
pub(crate) fn context_id(
    txn: &StorageTxn<'_, RW>,
    tables: &Tables,
    name: &str,
    add: bool,
) -> CoverageResult<Option<u32>> {
    let contexts = txn.txn.open_table(&tables.contexts).map_err(|e| ddb(txn, e))?;
    if let Some(id) = contexts.get(&txn.txn, &name.to_string()).map_err(|e| ddb(txn, e))? {
        return Ok(Some(id));
    }
    if !add {
        return Ok(None);
    }
    let contexts_by_id =
        txn.txn.open_table(&tables.contexts_by_id).map_err(|e| ddb(txn, e))?;
    let mut cursor = contexts_by_id.cursor(&txn.txn).map_err(|e| ddb(txn, e))?;
    let mut next_id = 0u32;
    let mut current = cursor.lower_bound(&0).map_err(|e| ddb(txn, e))?;
    while let Some((id, _)) = current {
        next_id = next_id.max(id + 1);
        current = cursor.next().map_err(|e| ddb(txn, e))?;
    }
    contexts.upsert(&txn.txn, &name.to_string(), &next_id).map_err(|e| ddb(txn, e))?;
    contexts_by_id.upsert(&txn.txn, &next_id, &name.to_string()).map_err(|e| ddb(txn, e))?;
    Ok(Some(next_id))
}

/// Resolves a context name to its id, which may not yet exist.
pub(crate) fn lookup_context_id(
    txn: &StorageTxn<'_, impl crate::db::TransactionKind>,
    tables: &Tables,
    name: &str,
) -> Result<Option<u32>, DbError> {
    let contexts = txn.txn.open_table(&tables.contexts)?;
    contexts.get(&txn.txn, &name.to_string())
}
