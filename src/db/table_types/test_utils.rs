use crate::db::db_test::get_test_env;
use crate::db::serialization::NoVersionValueWrapper;
use crate::db::table_types::{DbCursorTrait, Table, TableType};
use crate::db::{DbResult, DbWriter, TableIdentifier};

pub(crate) type TableKey = (u32, u32);
pub(crate) type TableValue = NoVersionValueWrapper<u32>;

/// Exercises get/insert/upsert/delete against whatever table variant `create_table` produces.
#[allow(clippy::type_complexity)]
pub(crate) fn table_test<T: TableType>(
    create_table: fn(&mut DbWriter, &'static str) -> DbResult<TableIdentifier<TableKey, TableValue, T>>,
) where
    for<'env> crate::db::TableHandle<'env, TableKey, TableValue, T>:
        Table<'env, Key = TableKey, Value = TableValue, TableVariant = T>,
{
    let ((_reader, mut writer), _temp_dir) = get_test_env();

    let table_id = create_table(&mut writer, "table").unwrap();
    let txn = writer.begin_rw_txn().unwrap();
    let table = txn.open_table(&table_id).unwrap();

    assert_eq!(table.get(&txn, &(1, 1)).unwrap(), None);

    table.insert(&txn, &(1, 1), &11).unwrap();
    assert_eq!(table.get(&txn, &(1, 1)).unwrap(), Some(11));

    let err = table.insert(&txn, &(1, 1), &0).expect_err("duplicate key should be rejected");
    assert!(matches!(err, crate::db::DbError::KeyAlreadyExists(_)));

    table.upsert(&txn, &(1, 1), &0).unwrap();
    assert_eq!(table.get(&txn, &(1, 1)).unwrap(), Some(0));

    table.delete(&txn, &(1, 1)).unwrap();
    assert_eq!(table.get(&txn, &(1, 1)).unwrap(), None);
    // Deleting an absent key is a no-op, not an error.
    table.delete(&txn, &(2, 2)).unwrap();
}

/// Exercises lower_bound/next/prev against whatever table variant `create_table` produces.
#[allow(clippy::type_complexity)]
pub(crate) fn table_cursor_test<T: TableType>(
    create_table: fn(&mut DbWriter, &'static str) -> DbResult<TableIdentifier<TableKey, TableValue, T>>,
) where
    for<'env> crate::db::TableHandle<'env, TableKey, TableValue, T>:
        Table<'env, Key = TableKey, Value = TableValue, TableVariant = T>,
    for<'txn> crate::db::DbCursor<'txn, crate::db::RW, TableKey, TableValue, T>:
        DbCursorTrait<Key = TableKey, Value = TableValue>,
{
    const VALUES: [((u32, u32), u32); 4] =
        [((2, 2), 2), ((1, 1), 7), ((3, 3), 4), ((1, 2), 9)];
    const SORTED: [((u32, u32), u32); 4] =
        [((1, 1), 7), ((1, 2), 9), ((2, 2), 2), ((3, 3), 4)];

    let ((_reader, mut writer), _temp_dir) = get_test_env();
    let table_id = create_table(&mut writer, "table").unwrap();
    let txn = writer.begin_rw_txn().unwrap();
    let table = txn.open_table(&table_id).unwrap();
    for (k, v) in &VALUES {
        table.insert(&txn, k, v).unwrap();
    }

    let mut cursor = table.cursor(&txn).unwrap();
    assert_eq!(cursor.lower_bound(&(0, 0)).unwrap(), Some(SORTED[0]));
    assert_eq!(cursor.lower_bound(&(4, 0)).unwrap(), None);

    let mut cursor = table.cursor(&txn).unwrap();
    let mut current = cursor.lower_bound(&(0, 0)).unwrap();
    for expected in SORTED {
        assert_eq!(current, Some(expected));
        current = cursor.next().unwrap();
    }
    assert_eq!(current, None);

    let mut cursor = table.cursor(&txn).unwrap();
    assert_eq!(cursor.lower_bound(&(4, 4)).unwrap(), None);
    for expected in SORTED.iter().rev() {
        current = cursor.prev().unwrap();
        assert_eq!(current, Some(*expected));
    }
}
