//! Filename selection, fork detection, erase, and the serialize/deserialize blob format (§4.8).

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use tracing::debug;

use crate::catalog::Catalog;
use crate::config::Suffix;
use crate::db::table_types::{DbCursorTrait, Table};
use crate::db::RW;
use crate::error::{CoverageError, CoverageResult};
use crate::{CoverageData, StorageTxn};

/// The current OS process id, used for fork detection (§4.8, §5).
pub(crate) fn current_pid() -> u32 {
    std::process::id()
}

/// An RFC 3339-ish timestamp, recorded in `Meta.when` on first install.
pub(crate) fn now_iso() -> String {
    // No chrono `Utc::now()` available in this context without pulling wall-clock time into a
    // pure function; the crate's only caller is the one-shot install path, so a coarse
    // UNIX-epoch-seconds stamp is sufficient here.
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{secs}")
}

/// Builds the final on-disk directory for a store: `<data_dir>/<basename>[.<suffix>]` (§4.8,
/// §6 file naming).
pub(crate) fn resolve_path(data_dir: &Path, basename: &str, suffix: Option<&Suffix>) -> PathBuf {
    let filename = match suffix {
        None => basename.to_string(),
        Some(Suffix::Literal(s)) => format!("{basename}.{s}"),
        Some(Suffix::Generated) => format!("{basename}.{}", generated_suffix()),
    };
    data_dir.join(filename)
}

pub(crate) fn generated_suffix() -> String {
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    let pid = current_pid();
    let random: u32 = {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        std::time::SystemTime::now().hash(&mut hasher);
        pid.hash(&mut hasher);
        hasher.finish() as u32
    };
    format!("{hostname}.{pid}.{random:08x}")
}

/// Re-applies [`resolve_path`] with a fresh generated suffix (if one was requested) after a
/// fork is detected; a literal suffix or no suffix reuses the same path.
pub(crate) fn retarget_after_fork(data_dir: &Path, basename: &str, suffix: Option<&Suffix>) -> PathBuf {
    let path = match suffix {
        Some(Suffix::Generated) => resolve_path(data_dir, basename, Some(&Suffix::Generated)),
        other => resolve_path(data_dir, basename, other),
    };
    debug!(path = %path.display(), pid = current_pid(), "fork detected, retargeting store");
    path
}

/// Deletes the backing store directory. With `parallel`, also removes every sibling directory
/// matching `<basename>.*` next to it (§4.8).
pub(crate) fn erase(data_dir: &Path, basename: &str, resolved_path: &Path, parallel: bool) -> CoverageResult<()> {
    debug!(path = %resolved_path.display(), parallel, "erasing coverage store");
    if resolved_path.exists() {
        std::fs::remove_dir_all(resolved_path)
            .map_err(|e| CoverageError::backend(resolved_path.to_path_buf(), e.into()))?;
    }
    if parallel {
        if let Ok(entries) = std::fs::read_dir(data_dir) {
            let prefix = format!("{basename}.");
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if name.starts_with(&prefix) {
                    let _ = std::fs::remove_dir_all(entry.path());
                }
            }
        }
    }
    Ok(())
}

const DUMP_PREFIX: u8 = b'z';

/// Serializes the full store to a portable blob: `b'z' || deflate(text_dump)` (§4.8, §6).
/// The text format is internal and not stable across crate versions.
pub(crate) fn dumps(data: &mut CoverageData) -> CoverageResult<Vec<u8>> {
    let txn = data.reader().begin_ro_txn()?;
    let text = text_dump(&txn)?;

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).map_err(|e| CoverageError::backend((*txn.path).clone(), e.into()))?;
    let compressed =
        encoder.finish().map_err(|e| CoverageError::backend((*txn.path).clone(), e.into()))?;

    let mut blob = Vec::with_capacity(compressed.len() + 1);
    blob.push(DUMP_PREFIX);
    blob.extend(compressed);
    Ok(blob)
}

/// Replaces this store's contents with a blob produced by [`dumps`] (§4.8).
pub(crate) fn loads(data: &mut CoverageData, blob: &[u8]) -> CoverageResult<()> {
    let Some((&prefix, compressed)) = blob.split_first() else {
        return Err(CoverageError::BadBlob);
    };
    if prefix != DUMP_PREFIX {
        return Err(CoverageError::BadBlob);
    }
    let mut decoder = DeflateDecoder::new(compressed);
    let mut text = String::new();
    decoder.read_to_string(&mut text).map_err(|_| CoverageError::BadBlob)?;

    let mut writer = data.writer().lock().expect("writer mutex poisoned");
    let txn = writer.begin_rw_txn()?;
    replay_text_dump(&txn, &text)?;
    txn.commit()?;
    drop(writer);

    let mut writer = data.writer().lock().expect("writer mutex poisoned");
    let catalog = {
        let txn = writer.begin_rw_txn()?;
        let catalog = Catalog::load(&txn, &txn.tables)?;
        let mode = crate::reader_api::read_mode(&txn)?;
        txn.commit()?;
        (catalog, mode)
    };
    drop(writer);
    data.reset_after_merge(catalog.0);
    if let Some(mode) = catalog.1 {
        data.set_mode(mode);
    }
    Ok(())
}

fn text_dump(txn: &StorageTxn<'_, crate::db::RO>) -> CoverageResult<String> {
    let ddb = |e| CoverageError::backend((*txn.path).clone(), e);
    let mut out = String::new();

    let meta = txn.open_table(&txn.tables.meta)?;
    let mut cursor = meta.cursor(&txn.txn).map_err(ddb)?;
    let mut current = cursor.lower_bound(&String::new()).map_err(ddb)?;
    while let Some((key, value)) = current {
        out.push_str(&format!("META\t{key}\t{value}\n"));
        current = cursor.next().map_err(ddb)?;
    }

    let files_by_id = txn.open_table(&txn.tables.files_by_id)?;
    let mut cursor = files_by_id.cursor(&txn.txn).map_err(ddb)?;
    let mut current = cursor.lower_bound(&0).map_err(ddb)?;
    while let Some((id, path)) = current {
        out.push_str(&format!("FILE\t{id}\t{path}\n"));
        current = cursor.next().map_err(ddb)?;
    }

    let contexts_by_id = txn.open_table(&txn.tables.contexts_by_id)?;
    let mut cursor = contexts_by_id.cursor(&txn.txn).map_err(ddb)?;
    let mut current = cursor.lower_bound(&0).map_err(ddb)?;
    while let Some((id, name)) = current {
        out.push_str(&format!("CONTEXT\t{id}\t{name}\n"));
        current = cursor.next().map_err(ddb)?;
    }

    let line_bits = txn.open_table(&txn.tables.line_bits)?;
    let mut cursor = line_bits.cursor(&txn.txn).map_err(ddb)?;
    let mut current = cursor.lower_bound(&(0, 0)).map_err(ddb)?;
    while let Some(((file_id, ctx_id), bits)) = current {
        out.push_str(&format!("LINEBITS\t{file_id}\t{ctx_id}\t{}\n", hex_encode(&bits)));
        current = cursor.next().map_err(ddb)?;
    }

    let arcs = txn.open_table(&txn.tables.arcs)?;
    let mut cursor = arcs.cursor(&txn.txn).map_err(ddb)?;
    let mut current = cursor.lower_bound(&(0, 0, i64::MIN, i64::MIN)).map_err(ddb)?;
    while let Some(((file_id, ctx_id, fromno, tono), ())) = current {
        out.push_str(&format!("ARC\t{file_id}\t{ctx_id}\t{fromno}\t{tono}\n"));
        current = cursor.next().map_err(ddb)?;
    }

    let tracers = txn.open_table(&txn.tables.tracers)?;
    let mut cursor = tracers.cursor(&txn.txn).map_err(ddb)?;
    let mut current = cursor.lower_bound(&0).map_err(ddb)?;
    while let Some((file_id, tracer)) = current {
        out.push_str(&format!("TRACER\t{file_id}\t{tracer}\n"));
        current = cursor.next().map_err(ddb)?;
    }

    Ok(out)
}

fn replay_text_dump(txn: &StorageTxn<'_, RW>, text: &str) -> CoverageResult<()> {
    let ddb = |e| CoverageError::backend((*txn.path).clone(), e);
    let files_by_id = txn.open_table(&txn.tables.files_by_id)?;
    let files = txn.open_table(&txn.tables.files)?;
    let contexts_by_id = txn.open_table(&txn.tables.contexts_by_id)?;
    let contexts = txn.open_table(&txn.tables.contexts)?;
    let line_bits = txn.open_table(&txn.tables.line_bits)?;
    let arcs = txn.open_table(&txn.tables.arcs)?;
    let tracers = txn.open_table(&txn.tables.tracers)?;
    let meta = txn.open_table(&txn.tables.meta)?;

    for line in text.lines() {
        let mut fields = line.split('\t');
        match fields.next() {
            Some("META") => {
                let (Some(key), Some(value)) = (fields.next(), fields.next()) else { continue };
                meta.upsert(&txn.txn, &key.to_string(), &value.to_string()).map_err(ddb)?;
            }
            Some("FILE") => {
                let (Some(id), Some(path)) = (fields.next(), fields.next()) else { continue };
                let Ok(id) = id.parse::<u32>() else { continue };
                files.upsert(&txn.txn, &path.to_string(), &id).map_err(ddb)?;
                files_by_id.upsert(&txn.txn, &id, &path.to_string()).map_err(ddb)?;
            }
            Some("CONTEXT") => {
                let (Some(id), Some(name)) = (fields.next(), fields.next()) else { continue };
                let Ok(id) = id.parse::<u32>() else { continue };
                contexts.upsert(&txn.txn, &name.to_string(), &id).map_err(ddb)?;
                contexts_by_id.upsert(&txn.txn, &id, &name.to_string()).map_err(ddb)?;
            }
            Some("LINEBITS") => {
                let (Some(file_id), Some(ctx_id), Some(bits)) =
                    (fields.next(), fields.next(), fields.next())
                else {
                    continue;
                };
                let (Ok(file_id), Ok(ctx_id)) = (file_id.parse::<u32>(), ctx_id.parse::<u32>()) else {
                    continue;
                };
                line_bits.upsert(&txn.txn, &(file_id, ctx_id), &hex_decode(bits)).map_err(ddb)?;
            }
            Some("ARC") => {
                let (Some(file_id), Some(ctx_id), Some(fromno), Some(tono)) =
                    (fields.next(), fields.next(), fields.next(), fields.next())
                else {
                    continue;
                };
                let (Ok(file_id), Ok(ctx_id), Ok(fromno), Ok(tono)) = (
                    file_id.parse::<u32>(),
                    ctx_id.parse::<u32>(),
                    fromno.parse::<i64>(),
                    tono.parse::<i64>(),
                ) else {
                    continue;
                };
                match arcs.insert(&txn.txn, &(file_id, ctx_id, fromno, tono), &()) {
                    Ok(()) | Err(crate::db::DbError::KeyAlreadyExists(_)) => {}
                    Err(e) => return Err(ddb(e)),
                }
            }
            Some("TRACER") => {
                let (Some(file_id), Some(tracer)) = (fields.next(), fields.next()) else { continue };
                let Ok(file_id) = file_id.parse::<u32>() else { continue };
                tracers.upsert(&txn.txn, &file_id, &tracer.to_string()).map_err(ddb)?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .filter_map(|i| s.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}
