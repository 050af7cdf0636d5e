//! Top-level error type surfaced by the public reader/writer/merge/lifecycle APIs.

use std::path::PathBuf;

use crate::db::DbError;

/// All user-visible failure conditions the store can raise.
#[derive(thiserror::Error, Debug)]
pub enum CoverageError {
    #[error("Data file {path:?} doesn't seem to be a coverage data file: {reason}")]
    MalformedFile { path: PathBuf, reason: String },

    #[error(
        "Couldn't use data file {path:?}: wrong schema: version {found}, expected {expected}"
    )]
    SchemaMismatch { path: PathBuf, found: i64, expected: i64 },

    #[error("Can't add {attempted} to a data file that already has {existing}")]
    MixedMode { existing: &'static str, attempted: &'static str },

    #[error("Can't touch files in an empty CoverageData")]
    EmptyMode,

    #[error("Can't add a tracer to unmeasured file '{path}'")]
    UnknownFile { path: String },

    #[error("Conflicting file tracer for '{path}': {existing:?} vs {incoming:?}")]
    TracerConflict { path: String, existing: String, incoming: String },

    #[error("Blob is not a coverage-data dump: missing 'z' prefix")]
    BadBlob,

    #[error("Couldn't use data file {path:?}: {source}")]
    BackendError { path: PathBuf, source: DbError },
}

pub type CoverageResult<T> = std::result::Result<T, CoverageError>;

impl CoverageError {
    pub(crate) fn backend(path: PathBuf, source: DbError) -> Self {
        Self::BackendError { path, source }
    }
}
