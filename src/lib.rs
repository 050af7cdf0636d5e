//! A storage implementation for code-coverage measurement data.
//!
//! This crate records, per source file and per named context, either executed line numbers or
//! executed line-to-line arcs, plus which tracer plugin produced each file's data. It exposes a
//! writer interface, a reader interface and a merge ("update") operation for combining two
//! stores. The underlying storage is implemented using the [`libmdbx`] crate.
//!
//! # Quick Start
//!
//! ```
//! use coverage_store::{CoverageData, StorageConfig};
//! # use coverage_store::db::DbConfig;
//! use std::collections::{BTreeMap, BTreeSet};
//!
//! # let dir_handle = tempfile::tempdir().unwrap();
//! # let dir = dir_handle.path().to_path_buf();
//! let db_config = DbConfig { path_prefix: dir, ..Default::default() };
//! let storage_config = StorageConfig { db_config, ..Default::default() };
//! let mut data = CoverageData::open(storage_config)?;
//!
//! let mut lines = BTreeMap::new();
//! lines.insert("a.py".to_string(), BTreeSet::from([1, 2, 5]));
//! data.add_lines(&lines)?;
//!
//! assert_eq!(data.lines("a.py")?, Some(vec![1, 2, 5]));
//! # Ok::<(), coverage_store::CoverageError>(())
//! ```
//!
//! [`libmdbx`]: https://docs.rs/libmdbx/latest/libmdbx/

pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod merge;
pub mod numbits;
pub mod reader_api;
pub mod schema;
#[cfg(any(feature = "testing", test))]
pub mod test_utils;
pub mod writer_api;

#[cfg(test)]
#[path = "lib_test.rs"]
mod lib_test;

use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use catalog::Catalog;
use db::serialization::{Key, ValueSerde};
use db::table_types::SimpleTable;
use db::{open_env, DbTransaction, DbWriter, TableHandle, TableIdentifier, TransactionKind, RO, RW};
use schema::Tables;
use tracing::debug;

pub use config::StorageConfig;
pub use error::{CoverageError, CoverageResult};

/// Opens (or creates) a coverage store and returns a [`StorageReader`] and [`StorageWriter`].
///
/// Installing the schema and verifying its version both happen here, before the handles are
/// returned to the caller, so that every subsequent transaction can assume a matching schema.
pub fn open_storage(config: StorageConfig) -> CoverageResult<(StorageReader, StorageWriter)> {
    let path = config.db_config.path();
    let existed_before = path.join("mdbx.dat").exists();
    let path = Arc::new(path);

    let (db_reader, mut db_writer) =
        open_env(&config.db_config).map_err(|e| CoverageError::backend((*path).clone(), e))?;
    let tables = schema::open_tables(&mut db_writer, &path)?;

    let reader =
        StorageReader { db_reader, tables: tables.clone(), path: path.clone() };
    let mut writer = StorageWriter { db_writer, tables, path: path.clone() };

    {
        let txn = writer.begin_rw_txn()?;
        if existed_before {
            schema::verify_existing(&txn, &path)?;
        } else {
            schema::install_fresh(&txn, &path, &config.initial_meta())?;
        }
        txn.commit()?;
    }
    debug!(path = %path.display(), existed_before, "coverage store opened");
    Ok((reader, writer))
}

/// A handle for starting read-only transactions against a coverage store.
#[derive(Clone)]
pub struct StorageReader {
    db_reader: db::DbReader,
    tables: Arc<Tables>,
    path: Arc<PathBuf>,
}

impl StorageReader {
    /// Takes a snapshot of the current state of the storage and returns a [`StorageTxn`].
    pub fn begin_ro_txn(&self) -> CoverageResult<StorageTxn<'_, RO>> {
        let txn = self
            .db_reader
            .begin_ro_txn()
            .map_err(|e| CoverageError::backend((*self.path).clone(), e))?;
        Ok(StorageTxn { txn, tables: self.tables.clone(), path: self.path.clone() })
    }
}

/// A handle for starting read-write transactions against a coverage store. Not `Clone`: there is
/// exactly one writer, so at most one write transaction can be open at a time (§5).
pub struct StorageWriter {
    db_writer: DbWriter,
    tables: Arc<Tables>,
    path: Arc<PathBuf>,
}

impl StorageWriter {
    /// Takes a snapshot of the current state of the storage and returns a [`StorageTxn`].
    pub fn begin_rw_txn(&mut self) -> CoverageResult<StorageTxn<'_, RW>> {
        let txn = self
            .db_writer
            .begin_rw_txn()
            .map_err(|e| CoverageError::backend((*self.path).clone(), e))?;
        Ok(StorageTxn { txn, tables: self.tables.clone(), path: self.path.clone() })
    }
}

/// A single transaction against the storage. The actual functionality is implemented on this
/// type by the `writer_api`, `reader_api` and `merge` modules.
pub struct StorageTxn<'env, Mode: TransactionKind> {
    pub(crate) txn: DbTransaction<'env, Mode>,
    pub(crate) tables: Arc<Tables>,
    pub(crate) path: Arc<PathBuf>,
}

impl<'env> StorageTxn<'env, RW> {
    /// Commits the changes made in this transaction to the storage.
    pub fn commit(self) -> CoverageResult<()> {
        self.txn.commit().map_err(|e| CoverageError::backend((*self.path).clone(), e))
    }
}

impl<'env, Mode: TransactionKind> StorageTxn<'env, Mode> {
    pub(crate) fn open_table<K: Key + Debug, V: ValueSerde + Debug>(
        &self,
        table_id: &TableIdentifier<K, V, SimpleTable>,
    ) -> CoverageResult<TableHandle<'_, K, V, SimpleTable>> {
        self.txn.open_table(table_id).map_err(|e| CoverageError::backend((*self.path).clone(), e))
    }
}

/// The two mutually exclusive measurement modes a store can record (§3 invariant 1).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoverageMode {
    /// Per-file, per-context sets of executed line numbers.
    Lines,
    /// Per-file, per-context sets of executed line-to-line arcs.
    Arcs,
}

impl CoverageMode {
    pub(crate) fn label(self) -> &'static str {
        match self {
            Self::Lines => "lines",
            Self::Arcs => "arcs",
        }
    }
}

/// The top-level handle applications use: a single coverage store with a process-fork-aware
/// writer mutex, the in-memory file/context catalog, and the pending-context/query-context
/// state that the reader and writer APIs consult.
pub struct CoverageData {
    config: StorageConfig,
    /// The parent directory `config.basename`/`config.suffix` are resolved against; captured
    /// once so a fork can recompute a fresh suffix without losing it (§4.8).
    data_dir: PathBuf,
    reader: StorageReader,
    writer: Mutex<StorageWriter>,
    catalog: Catalog,
    mode: Mutex<Option<CoverageMode>>,
    pending_context: Mutex<Option<String>>,
    query_context_ids: Mutex<Option<Vec<u32>>>,
    pid: AtomicU32,
}

impl CoverageData {
    /// Opens (creating if necessary) the coverage store named by `config`.
    pub fn open(config: StorageConfig) -> CoverageResult<Self> {
        let data_dir = config.db_config.path_prefix.clone();
        let resolved_path = lifecycle::resolve_path(&data_dir, &config.basename, config.suffix.as_ref());
        let mut effective = config;
        effective.db_config.path_prefix = resolved_path;

        let (reader, mut writer) = open_storage(effective.clone())?;
        let catalog = {
            let txn = writer.begin_rw_txn()?;
            let catalog = Catalog::load(&txn, &txn.tables)?;
            txn.commit()?;
            catalog
        };
        let mode = {
            let txn = reader.begin_ro_txn()?;
            reader_api::read_mode(&txn)?
        };
        Ok(Self {
            config: effective,
            data_dir,
            reader,
            writer: Mutex::new(writer),
            catalog,
            mode: Mutex::new(mode),
            pending_context: Mutex::new(None),
            query_context_ids: Mutex::new(None),
            pid: AtomicU32::new(lifecycle::current_pid()),
        })
    }

    /// Re-targets this handle at its own file after a `fork()` (§4.8, §5): recomputes the
    /// filename so the child never shares a write transaction with its parent.
    fn check_fork(&mut self) -> CoverageResult<()> {
        let current = lifecycle::current_pid();
        if self.pid.load(Ordering::SeqCst) == current {
            return Ok(());
        }
        let resolved_path = lifecycle::retarget_after_fork(
            &self.data_dir,
            &self.config.basename,
            self.config.suffix.as_ref(),
        );
        let mut new_config = self.config.clone();
        new_config.db_config.path_prefix = resolved_path;
        let (reader, writer) = open_storage(new_config.clone())?;
        let catalog = {
            let mut writer = writer;
            let txn = writer.begin_rw_txn()?;
            let catalog = Catalog::load(&txn, &txn.tables)?;
            txn.commit()?;
            self.writer = Mutex::new(writer);
            catalog
        };
        self.config = new_config;
        self.reader = reader;
        self.catalog = catalog;
        *self.mode.lock().expect("mode mutex poisoned") = None;
        self.pid.store(current, Ordering::SeqCst);
        Ok(())
    }

    fn path(&self) -> PathBuf {
        self.config.db_config.path()
    }

    /// Sets the pending context for subsequent `add_lines`/`add_arcs` calls on this thread.
    pub fn set_context(&mut self, name: Option<&str>) -> CoverageResult<()> {
        self.check_fork()?;
        *self.pending_context.lock().expect("context mutex poisoned") = name.map(str::to_owned);
        Ok(())
    }

    /// Restricts subsequent reads to the single context `name`.
    pub fn set_query_context(&mut self, name: &str) -> CoverageResult<()> {
        self.check_fork()?;
        let txn = self.reader.begin_ro_txn()?;
        let id = catalog::lookup_context_id(&txn, &txn.tables, name)
            .map_err(|e| CoverageError::backend(self.path(), e))?;
        *self.query_context_ids.lock().expect("query context mutex poisoned") =
            Some(id.into_iter().collect());
        Ok(())
    }

    /// Restricts subsequent reads to contexts whose name matches any of `patterns` (via the
    /// `REGEXP` convention documented on [`reader_api::contexts_matching`]).
    pub fn set_query_contexts(&mut self, patterns: &[String]) -> CoverageResult<()> {
        self.check_fork()?;
        let txn = self.reader.begin_ro_txn()?;
        let ids = reader_api::contexts_matching(&txn, patterns)?;
        *self.query_context_ids.lock().expect("query context mutex poisoned") = Some(ids);
        Ok(())
    }

    /// Clears any active query-context filter; subsequent reads see all contexts.
    pub fn clear_query_context(&mut self) {
        *self.query_context_ids.lock().expect("query context mutex poisoned") = None;
    }

    fn require_mode(&self, attempted: CoverageMode) -> CoverageResult<()> {
        let mut guard = self.mode.lock().expect("mode mutex poisoned");
        match *guard {
            Some(existing) if existing != attempted => {
                Err(CoverageError::MixedMode { existing: existing.label(), attempted: attempted.label() })
            }
            Some(_) => Ok(()),
            None => {
                *guard = Some(attempted);
                Ok(())
            }
        }
    }

    /// Records executed line numbers per file, unioned into any existing data for the current
    /// context (§4.5, §8 property 3).
    pub fn add_lines(
        &mut self,
        data: &std::collections::BTreeMap<String, std::collections::BTreeSet<u32>>,
    ) -> CoverageResult<()> {
        self.check_fork()?;
        self.require_mode(CoverageMode::Lines)?;
        let mut writer = self.writer.lock().expect("writer mutex poisoned");
        let txn = writer.begin_rw_txn()?;
        let context = self.pending_context.lock().expect("context mutex poisoned").clone();
        writer_api::add_lines(&txn, &self.catalog, data, context.as_deref())?;
        txn.commit()
    }

    /// Records executed arcs per file, idempotently (§4.5, §8 property 4).
    pub fn add_arcs(
        &mut self,
        data: &std::collections::BTreeMap<String, std::collections::BTreeSet<(i64, i64)>>,
    ) -> CoverageResult<()> {
        self.check_fork()?;
        self.require_mode(CoverageMode::Arcs)?;
        let mut writer = self.writer.lock().expect("writer mutex poisoned");
        let txn = writer.begin_rw_txn()?;
        let context = self.pending_context.lock().expect("context mutex poisoned").clone();
        writer_api::add_arcs(&txn, &self.catalog, data, context.as_deref())?;
        txn.commit()
    }

    /// Records (or verifies consistency of) the tracer that produced each file's data.
    pub fn add_file_tracers(
        &mut self,
        data: &std::collections::BTreeMap<String, String>,
    ) -> CoverageResult<()> {
        self.check_fork()?;
        let mut writer = self.writer.lock().expect("writer mutex poisoned");
        let txn = writer.begin_rw_txn()?;
        writer_api::add_file_tracers(&txn, &self.catalog, data)?;
        txn.commit()
    }

    /// Ensures `paths` are recorded as measured files, optionally tagging them with a tracer.
    pub fn touch_files(&mut self, paths: &[String], tracer_name: &str) -> CoverageResult<()> {
        self.check_fork()?;
        {
            let guard = self.mode.lock().expect("mode mutex poisoned");
            if guard.is_none() {
                return Err(CoverageError::EmptyMode);
            }
        }
        let mut writer = self.writer.lock().expect("writer mutex poisoned");
        let txn = writer.begin_rw_txn()?;
        writer_api::touch_files(&txn, &self.catalog, paths, tracer_name)?;
        txn.commit()
    }

    /// True once this store has recorded arcs rather than lines.
    pub fn has_arcs(&mut self) -> CoverageResult<bool> {
        self.check_fork()?;
        Ok(matches!(*self.mode.lock().expect("mode mutex poisoned"), Some(CoverageMode::Arcs)))
    }

    /// Snapshot of every measured file path.
    pub fn measured_files(&mut self) -> CoverageResult<std::collections::BTreeSet<String>> {
        self.check_fork()?;
        Ok(self.catalog.all_paths().into_iter().collect())
    }

    /// Distinct context names recorded so far.
    pub fn measured_contexts(&mut self) -> CoverageResult<std::collections::BTreeSet<String>> {
        self.check_fork()?;
        let txn = self.reader.begin_ro_txn()?;
        reader_api::measured_contexts(&txn)
    }

    /// The tracer recorded for `path`: `None` if unmeasured, `Some("")` if measured with none.
    pub fn file_tracer(&mut self, path: &str) -> CoverageResult<Option<String>> {
        self.check_fork()?;
        let txn = self.reader.begin_ro_txn()?;
        reader_api::file_tracer(&txn, path)
    }

    /// Executed line numbers for `path`, `None` if unmeasured.
    pub fn lines(&mut self, path: &str) -> CoverageResult<Option<Vec<u32>>> {
        self.check_fork()?;
        let txn = self.reader.begin_ro_txn()?;
        let ctx = self.query_context_ids.lock().expect("query context mutex poisoned").clone();
        reader_api::lines(&txn, path, ctx.as_deref())
    }

    /// Distinct executed arcs for `path`, `None` if unmeasured.
    pub fn arcs(&mut self, path: &str) -> CoverageResult<Option<Vec<(i64, i64)>>> {
        self.check_fork()?;
        let txn = self.reader.begin_ro_txn()?;
        let ctx = self.query_context_ids.lock().expect("query context mutex poisoned").clone();
        reader_api::arcs(&txn, path, ctx.as_deref())
    }

    /// Maps each executed line number in `path` to the contexts that executed it.
    pub fn contexts_by_lineno(
        &mut self,
        path: &str,
    ) -> CoverageResult<std::collections::BTreeMap<i64, Vec<String>>> {
        self.check_fork()?;
        let txn = self.reader.begin_ro_txn()?;
        reader_api::contexts_by_lineno(&txn, path)
    }

    /// Folds `other`'s measurements into this store, aliasing its paths through `aliases`
    /// (§4.7).
    pub fn update(&mut self, other: &mut Self, aliases: &impl merge::PathAliases) -> CoverageResult<()> {
        self.check_fork()?;
        other.check_fork()?;
        merge::update(self, other, aliases)
    }

    /// Serializes the full store to a portable blob (§4.8).
    pub fn dumps(&mut self) -> CoverageResult<Vec<u8>> {
        self.check_fork()?;
        lifecycle::dumps(self)
    }

    /// Replaces this store's contents with a blob produced by [`Self::dumps`].
    pub fn loads(&mut self, blob: &[u8]) -> CoverageResult<()> {
        self.check_fork()?;
        lifecycle::loads(self, blob)
    }

    /// Deletes the backing file (and, with `parallel`, its suffixed siblings).
    pub fn erase(&self, parallel: bool) -> CoverageResult<()> {
        lifecycle::erase(&self.data_dir, &self.config.basename, &self.config.db_config.path(), parallel)
    }

    pub(crate) fn reader(&self) -> &StorageReader {
        &self.reader
    }

    pub(crate) fn writer(&self) -> &Mutex<StorageWriter> {
        &self.writer
    }

    pub(crate) fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub(crate) fn reset_after_merge(&mut self, catalog: Catalog) {
        self.catalog = catalog;
    }

    pub(crate) fn mode(&self) -> Option<CoverageMode> {
        *self.mode.lock().expect("mode mutex poisoned")
    }

    pub(crate) fn set_mode(&self, mode: CoverageMode) {
        *self.mode.lock().expect("mode mutex poisoned") = Some(mode);
    }
}
