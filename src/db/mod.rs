//! Low-level database layer for interaction with libmdbx.
//!
//! The API is kept generic enough that the backing engine could be swapped for another
//! Berkeley-DB-like store. Keys and values are opaque byte strings produced by
//! [`serialization::StorageSerde`]; higher layers attach meaning to them.
//!
//! Assumption: serialization is stable across runs of the same binary version, but not
//! guaranteed stable across versions (hence the schema version gate in the crate root).

#[cfg(test)]
#[path = "db_test.rs"]
mod db_test;
pub mod serialization;
pub mod serializers;
pub mod table_types;

use std::fmt::Debug;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libmdbx::{Geometry, TableFlags, WriteMap};
use serde::{Deserialize, Serialize};

use self::serialization::{Key as KeyTrait, ValueSerde};

// Maximum number of named sub-databases the environment can host. The coverage schema
// needs a handful of tables; this leaves headroom without wasting environment slots.
const MAX_DBS: usize = 16;

type EnvironmentKind = WriteMap;
type Environment = libmdbx::Environment<EnvironmentKind>;

pub(crate) type DbKeyType<'env> = std::borrow::Cow<'env, [u8]>;
pub(crate) type DbValueType<'env> = std::borrow::Cow<'env, [u8]>;

/// Configuration for opening the backing MDBX environment.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DbConfig {
    /// Directory holding the database file(s).
    pub path_prefix: PathBuf,
    /// If true, opening fails unless the environment already exists on disk.
    pub enforce_file_exists: bool,
    /// Minimum mapped size, in bytes.
    pub min_size: usize,
    /// Maximum mapped size, in bytes.
    pub max_size: usize,
    /// Amount the mapping grows by once it fills up.
    pub growth_step: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path_prefix: PathBuf::from("."),
            enforce_file_exists: false,
            min_size: 1 << 20,    // 1MB
            max_size: 1 << 35,    // 32GB
            growth_step: 1 << 26, // 64MB
        }
    }
}

impl DbConfig {
    /// The directory the environment lives in.
    pub fn path(&self) -> PathBuf {
        self.path_prefix.clone()
    }
}

/// Errors surfaced by the low-level database layer.
#[derive(thiserror::Error, Debug)]
pub enum DbError {
    #[error(transparent)]
    Inner(#[from] libmdbx::Error),
    #[error("Deserialization failed.")]
    InnerDeserialization,
    #[error("Serialization failed.")]
    Serialization,
    #[error("{0}")]
    KeyAlreadyExists(KeyAlreadyExistsError),
    #[error("Append failed: key is not greater than the last key in the table.")]
    Append,
    #[error("Database file does not exist at {0}.")]
    FileDoesNotExist(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Raised by [`table_types::Table::insert`] when the key is already present.
#[derive(Debug)]
pub struct KeyAlreadyExistsError(String);

impl KeyAlreadyExistsError {
    pub(crate) fn new(table_name: &'static str, key: &impl Debug, value: &impl Debug) -> Self {
        Self(format!("table {table_name}: key {key:?} already exists (attempted value {value:?})"))
    }
}

impl std::fmt::Display for KeyAlreadyExistsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type DbResult<V> = std::result::Result<V, DbError>;

/// Opens (or creates) an MDBX environment and returns a reader and a writer handle to it.
///
/// There is a single, non-`Clone` [`DbWriter`], so at most one write transaction can be open
/// at any given moment -- the environment itself is the mutual-exclusion mechanism described
/// in the concurrency model.
pub(crate) fn open_env(config: &DbConfig) -> DbResult<(DbReader, DbWriter)> {
    if config.enforce_file_exists && !config.path().join("mdbx.dat").exists() {
        return Err(DbError::FileDoesNotExist(config.path()));
    }
    std::fs::create_dir_all(config.path())?;
    let env = Arc::new(
        Environment::new()
            .set_geometry(Geometry {
                size: Some(config.min_size..config.max_size),
                growth_step: Some(config.growth_step as isize),
                ..Default::default()
            })
            .set_max_dbs(MAX_DBS)
            .open(Path::new(&config.path()))?,
    );
    Ok((DbReader { env: env.clone() }, DbWriter { env }))
}

/// A cloneable handle for starting read-only transactions.
#[derive(Clone)]
pub(crate) struct DbReader {
    env: Arc<Environment>,
}

/// A non-cloneable handle for starting read-write transactions.
pub(crate) struct DbWriter {
    env: Arc<Environment>,
}

impl DbReader {
    pub(crate) fn begin_ro_txn(&self) -> DbResult<DbTransaction<'_, RO>> {
        Ok(DbTransaction { txn: self.env.begin_ro_txn()? })
    }
}

impl DbWriter {
    pub(crate) fn begin_rw_txn(&mut self) -> DbResult<DbTransaction<'_, RW>> {
        Ok(DbTransaction { txn: self.env.begin_rw_txn()? })
    }

    pub(crate) fn create_table(
        &mut self,
        name: &'static str,
        flags: TableFlags,
    ) -> DbResult<()> {
        let txn = self.env.begin_rw_txn()?;
        txn.create_table(Some(name), flags)?;
        txn.commit()?;
        Ok(())
    }
}

/// Marker types distinguishing read-only from read-write transactions at the type level.
pub trait TransactionKind {
    type Internal: libmdbx::TransactionKind;
}

/// Read-only transaction marker.
pub struct RO {}
impl TransactionKind for RO {
    type Internal = libmdbx::RO;
}

/// Read-write transaction marker.
pub struct RW {}
impl TransactionKind for RW {
    type Internal = libmdbx::RW;
}

pub(crate) struct DbTransaction<'env, Mode: TransactionKind> {
    pub(crate) txn: libmdbx::Transaction<'env, Mode::Internal, EnvironmentKind>,
}

impl<'env, Mode: TransactionKind> DbTransaction<'env, Mode> {
    pub(crate) fn open_table<'txn, K: KeyTrait + Debug, V: ValueSerde, T>(
        &'txn self,
        table_id: &TableIdentifier<K, V, T>,
    ) -> DbResult<TableHandle<'txn, K, V, T>> {
        let database = self.txn.open_db(Some(table_id.name))?;
        Ok(TableHandle {
            database,
            name: table_id.name,
            _key_type: PhantomData,
            _value_type: PhantomData,
            _table_type: PhantomData,
        })
    }
}

impl<'env> DbTransaction<'env, RW> {
    pub(crate) fn commit(self) -> DbResult<()> {
        self.txn.commit()?;
        Ok(())
    }
}

/// A typed identifier for a named table; does not itself borrow the environment.
pub struct TableIdentifier<K, V, T> {
    pub(crate) name: &'static str,
    _key_type: PhantomData<K>,
    _value_type: PhantomData<V>,
    _table_type: PhantomData<T>,
}

impl<K, V, T> TableIdentifier<K, V, T> {
    pub(crate) fn new(name: &'static str) -> Self {
        Self { name, _key_type: PhantomData, _value_type: PhantomData, _table_type: PhantomData }
    }
}

/// A table opened within the scope of one transaction.
pub struct TableHandle<'env, K, V, T> {
    pub(crate) database: libmdbx::Database<'env>,
    pub(crate) name: &'static str,
    _key_type: PhantomData<K>,
    _value_type: PhantomData<V>,
    _table_type: PhantomData<T>,
}

pub(crate) struct DbCursor<'txn, Mode: TransactionKind, K, V, T> {
    pub(crate) cursor: libmdbx::Cursor<'txn, Mode::Internal>,
    _key_type: PhantomData<K>,
    _value_type: PhantomData<V>,
    _table_type: PhantomData<T>,
}

impl<'txn, Mode: TransactionKind, K, V, T> DbCursor<'txn, Mode, K, V, T> {
    pub(crate) fn new(cursor: libmdbx::Cursor<'txn, Mode::Internal>) -> Self {
        Self { cursor, _key_type: PhantomData, _value_type: PhantomData, _table_type: PhantomData }
    }
}
