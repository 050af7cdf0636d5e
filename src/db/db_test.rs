use assert_matches::assert_matches;
use tempfile::TempDir;

use super::serialization::NoVersionValueWrapper;
use super::table_types::Table;
use super::{open_env, DbConfig, DbError, DbReader, DbResult, DbWriter};

pub(crate) fn get_test_env() -> ((DbReader, DbWriter), TempDir) {
    let temp_dir = tempfile::tempdir().expect("Failed to create a temporary directory.");
    let config = DbConfig { path_prefix: temp_dir.path().to_path_buf(), ..Default::default() };
    (open_env(&config).expect("Failed to open environment."), temp_dir)
}

#[test]
fn open_env_scenario() {
    get_test_env();
}

#[test]
fn open_env_with_enforce_file_exists() {
    let temp_dir = tempfile::tempdir().expect("Failed to create a temporary directory.");
    let mut config =
        DbConfig { path_prefix: temp_dir.path().to_path_buf(), ..Default::default() };
    config.enforce_file_exists = true;

    // The file does not exist yet; this is equivalent to starting a fresh store where this
    // flag must be off.
    let result = open_env(&config);
    assert_matches!(result, Err(DbError::FileDoesNotExist(_)));

    config.enforce_file_exists = false;
    {
        let result: DbResult<(DbReader, DbWriter)> = open_env(&config);
        assert_matches!(result, Ok(_));
    }

    assert!(config.path().join("mdbx.dat").exists());

    config.enforce_file_exists = true;
    let result: DbResult<(DbReader, DbWriter)> = open_env(&config);
    assert_matches!(result, Ok(_));
}

#[test]
fn txns_see_a_consistent_snapshot() {
    let ((reader, mut writer), _temp_dir) = get_test_env();
    let table_id =
        writer.create_simple_table::<String, NoVersionValueWrapper<String>>("table").unwrap();

    let txn0 = reader.begin_ro_txn().unwrap();
    let table = txn0.open_table(&table_id).unwrap();

    let wtxn = writer.begin_rw_txn().unwrap();
    let wtable = wtxn.open_table(&table_id).unwrap();
    wtable.insert(&wtxn, &"key".to_string(), &"data0".to_string()).unwrap();
    wtxn.commit().unwrap();

    let txn1 = reader.begin_ro_txn().unwrap();

    let wtxn = writer.begin_rw_txn().unwrap();
    let wtable = wtxn.open_table(&table_id).unwrap();
    wtable.upsert(&wtxn, &"key".to_string(), &"data1".to_string()).unwrap();
    wtxn.commit().unwrap();

    let txn2 = reader.begin_ro_txn().unwrap();
    let table1 = txn1.open_table(&table_id).unwrap();
    let table2 = txn2.open_table(&table_id).unwrap();

    assert_eq!(table.get(&txn0, &"key".to_string()).unwrap(), None);
    assert_eq!(table1.get(&txn1, &"key".to_string()).unwrap(), Some("data0".to_string()));
    assert_eq!(table2.get(&txn2, &"key".to_string()).unwrap(), Some("data1".to_string()));
}
