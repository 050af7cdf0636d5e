use std::fmt::Debug;

use super::serialization::{Key as KeyTrait, ValueSerde};
use super::{DbCursor, DbResult, DbTransaction, TransactionKind, RW};

pub(crate) mod simple_table;
#[cfg(test)]
pub(crate) mod test_utils;
#[cfg(test)]
mod simple_table_test;

/// Marker for the physical layout a table uses (plain key/value today; dup-sort tables
/// would be a second implementor if the schema ever needed one).
pub(crate) trait TableType {}

pub(crate) trait Table<'env> {
    type Key: KeyTrait + Debug;
    type Value: ValueSerde + Debug;
    type TableVariant: TableType;

    #[allow(clippy::type_complexity)]
    fn cursor<'txn, Mode: TransactionKind>(
        &'env self,
        txn: &'txn DbTransaction<'env, Mode>,
    ) -> DbResult<DbCursor<'txn, Mode, Self::Key, Self::Value, Self::TableVariant>>;

    fn get<Mode: TransactionKind>(
        &'env self,
        txn: &'env DbTransaction<'env, Mode>,
        key: &Self::Key,
    ) -> DbResult<Option<<Self::Value as ValueSerde>::Value>>;

    fn upsert(
        &'env self,
        txn: &DbTransaction<'env, RW>,
        key: &Self::Key,
        value: &<Self::Value as ValueSerde>::Value,
    ) -> DbResult<()>;

    fn insert(
        &'env self,
        txn: &DbTransaction<'env, RW>,
        key: &Self::Key,
        value: &<Self::Value as ValueSerde>::Value,
    ) -> DbResult<()>;

    fn delete(&'env self, txn: &DbTransaction<'env, RW>, key: &Self::Key) -> DbResult<()>;
}

/// Cursor operations shared by every table layout.
pub(crate) trait DbCursorTrait {
    type Key: KeyTrait + Debug;
    type Value: ValueSerde + Debug;

    fn prev(&mut self) -> DbResult<Option<(Self::Key, <Self::Value as ValueSerde>::Value)>>;

    #[allow(clippy::should_implement_trait)]
    fn next(&mut self) -> DbResult<Option<(Self::Key, <Self::Value as ValueSerde>::Value)>>;

    /// Position at first key greater than or equal to the given key.
    fn lower_bound(
        &mut self,
        key: &Self::Key,
    ) -> DbResult<Option<(Self::Key, <Self::Value as ValueSerde>::Value)>>;
}
