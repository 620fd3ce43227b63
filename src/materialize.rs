//! Lazy materialization: pulling column data out of an external host
//! representation into the block store on first access.
//!
//! This is the only place the table store touches anything outside its own
//! memory model. Reading a handful of columns out of a large, externally
//! owned host object must not force every other column to be converted,
//! which is the reason the block layout exists at all.

use crate::block::Slot;
use crate::schema::ElementType;
use crate::table::Table;
use arrow::array::{Array, ArrayRef};
use arrow::datatypes::DataType;
use std::sync::Weak;
use thiserror::Error;
use tracing::debug;

/// The external host representation a lazy table draws its columns from.
///
/// `extract_column` is called at most once per column per table instance;
/// the result is cached in the column's slot. Returning `None` signals that
/// the host holds no data for the column, which tombstones the slot. The
/// call is synchronous from the table's point of view.
pub trait ColumnHost: Send + Sync {
    fn extract_column(&self, col: usize, expected: ElementType) -> Option<ArrayRef>;
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum MaterializeError {
    /// The host returned null for a column the caller requires data for.
    #[error("column {column} is null but the caller requires data")]
    UnexpectedNull { column: usize },
    /// The host representation was dropped while unmaterialized columns
    /// remained.
    #[error("host representation dropped before column {column} was materialized")]
    HostDropped { column: usize },
}

impl Table {
    /// Pulls column `col` from the host representation unless its slot is
    /// already materialized or tombstoned.
    ///
    /// A real array from the host is installed in the slot and, if the row
    /// count has not latched yet, supplies it. A null from the host
    /// tombstones the slot and leaves the row count alone.
    ///
    /// # Errors
    ///
    /// Returns `MaterializeError::HostDropped` if the host representation
    /// is gone.
    ///
    /// # Panics
    ///
    /// Panics if `col` is out of range, if the slot is unmaterialized in a
    /// table that never had a host, or if the host returns an array of the
    /// wrong type.
    pub fn ensure_materialized(&mut self, col: usize) -> Result<(), MaterializeError> {
        let block = self.schema().block_of(col);
        let offset = self.schema().offset_in_block(col);
        if !self.get_block(block).slot(offset).is_unmaterialized() {
            return Ok(());
        }
        let ty = self.schema().type_of_block(block);
        let host = self
            .host()
            .map(Weak::upgrade)
            .expect("unmaterialized slot in a table without a host representation")
            .ok_or(MaterializeError::HostDropped { column: col })?;
        match host.extract_column(col, ty) {
            Some(array) => {
                assert_eq!(
                    array.data_type(),
                    &DataType::from(ty),
                    "host returned an array of the wrong type"
                );
                let len = array.len();
                self.install_slot(block, offset, Slot::Materialized(array));
                self.latch_rows(len);
                debug!(column = col, rows = len, "column materialized from host");
            }
            None => {
                self.install_slot(block, offset, Slot::Tombstone(ty.empty_array()));
                debug!(column = col, "host returned null; column tombstoned");
            }
        }
        Ok(())
    }

    /// Materializes every column, or only `cols` when given. Used before
    /// whole-table operations such as row filtering.
    ///
    /// With `deny_null`, a column that ends up tombstoned (now or earlier)
    /// is an error; the default tolerates nulls. After a full pass the host
    /// reference is dropped, since nothing is left to pull.
    ///
    /// # Errors
    ///
    /// Returns `MaterializeError::HostDropped` if the host representation
    /// is gone, or `MaterializeError::UnexpectedNull` under `deny_null`.
    ///
    /// # Panics
    ///
    /// Panics if a column index is out of range.
    pub fn ensure_all_materialized(
        &mut self,
        cols: Option<&[usize]>,
        deny_null: bool,
    ) -> Result<(), MaterializeError> {
        match cols {
            Some(subset) => {
                for &col in subset {
                    self.ensure_materialized(col)?;
                    if deny_null && self.is_tombstoned(col) {
                        return Err(MaterializeError::UnexpectedNull { column: col });
                    }
                }
            }
            None => {
                for col in 0..self.column_count() {
                    self.ensure_materialized(col)?;
                    if deny_null && self.is_tombstoned(col) {
                        return Err(MaterializeError::UnexpectedNull { column: col });
                    }
                }
                self.clear_host();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableSchema;
    use arrow::array::{Int64Array, StringArray};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// A host serving int and string columns, counting extraction calls and
    /// treating a configurable set of columns as null.
    struct MockHost {
        rows: usize,
        null_columns: Vec<usize>,
        calls: AtomicUsize,
    }

    impl MockHost {
        fn new(rows: usize) -> Self {
            Self {
                rows,
                null_columns: Vec::new(),
                calls: AtomicUsize::new(0),
            }
        }

        fn with_nulls(rows: usize, null_columns: Vec<usize>) -> Self {
            Self {
                rows,
                null_columns,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ColumnHost for MockHost {
        fn extract_column(&self, col: usize, expected: ElementType) -> Option<ArrayRef> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.null_columns.contains(&col) {
                return None;
            }
            let col = i64::try_from(col).expect("small column index");
            match expected {
                ElementType::Int64 => Some(Arc::new(Int64Array::from(
                    (0..self.rows).map(|r| col * 100 + i64::try_from(r).unwrap()).collect::<Vec<_>>(),
                ))),
                ElementType::Utf8 => Some(Arc::new(StringArray::from(
                    (0..self.rows).map(|r| format!("c{col}r{r}")).collect::<Vec<_>>(),
                ))),
                _ => None,
            }
        }
    }

    fn schema() -> Arc<TableSchema> {
        Arc::new(TableSchema::build(vec![
            ElementType::Int64,
            ElementType::Utf8,
            ElementType::Int64,
        ]))
    }

    #[test]
    fn materialization_is_lazy_and_idempotent() {
        let host = Arc::new(MockHost::new(4));
        let dyn_host: Arc<dyn ColumnHost> = Arc::<MockHost>::clone(&host);
        let mut table = Table::init_from_host(schema(), &dyn_host);
        assert_eq!(host.calls(), 0);

        let first = table.get_column(2).expect("host alive");
        assert_eq!(host.calls(), 1);
        let second = table.get_column(2).expect("cached");
        assert_eq!(host.calls(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        // Only the touched column was pulled.
        assert!(table.get_block(1).slot(0).is_unmaterialized());
    }

    #[test]
    fn row_count_latches_from_first_column() {
        let host = Arc::new(MockHost::new(5));
        let dyn_host: Arc<dyn ColumnHost> = Arc::<MockHost>::clone(&host);
        let mut table = Table::init_from_host(schema(), &dyn_host);
        assert_eq!(table.row_count(), 0);
        table.ensure_materialized(1).expect("host alive");
        assert_eq!(table.row_count(), 5);
        // Later columns do not re-derive it.
        table.ensure_materialized(0).expect("host alive");
        assert_eq!(table.row_count(), 5);
    }

    #[test]
    fn null_columns_become_tombstones() {
        let host = Arc::new(MockHost::with_nulls(3, vec![1]));
        let dyn_host: Arc<dyn ColumnHost> = Arc::<MockHost>::clone(&host);
        let mut table = Table::init_from_host(schema(), &dyn_host);
        table.ensure_materialized(0).expect("host alive");
        table.ensure_materialized(1).expect("host alive");
        assert!(table.is_tombstoned(1));
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.get_column(1).expect("sentinel").len(), 0);
        // Tombstoned slots are settled; no further host calls.
        assert_eq!(host.calls(), 2);
        table.ensure_materialized(1).expect("settled");
        assert_eq!(host.calls(), 2);
    }

    #[test]
    fn deny_null_reports_unexpected_null() {
        let host = Arc::new(MockHost::with_nulls(3, vec![2]));
        let dyn_host: Arc<dyn ColumnHost> = Arc::<MockHost>::clone(&host);
        let mut table = Table::init_from_host(schema(), &dyn_host);
        assert_eq!(
            table
                .ensure_all_materialized(None, true)
                .expect_err("column 2 is null"),
            MaterializeError::UnexpectedNull { column: 2 }
        );

        let mut tolerant = Table::init_from_host(schema(), &dyn_host);
        tolerant
            .ensure_all_materialized(None, false)
            .expect("nulls tombstoned");
        assert!(tolerant.is_tombstoned(2));
    }

    #[test]
    fn full_pass_drops_host_reference() {
        let host = Arc::new(MockHost::new(2));
        let dyn_host: Arc<dyn ColumnHost> = Arc::<MockHost>::clone(&host);
        let mut table = Table::init_from_host(schema(), &dyn_host);
        table
            .ensure_all_materialized(None, false)
            .expect("host alive");
        assert!(table.host().is_none());
        // A fully materialized table keeps working once the host is gone.
        drop(dyn_host);
        drop(host);
        assert_eq!(table.get_column(0).expect("materialized").len(), 2);
    }

    #[test]
    fn dropped_host_is_an_error() {
        let host: Arc<dyn ColumnHost> = Arc::new(MockHost::new(2));
        let mut table = Table::init_from_host(schema(), &host);
        drop(host);
        assert_eq!(
            table.ensure_materialized(0).expect_err("host gone"),
            MaterializeError::HostDropped { column: 0 }
        );
    }

    #[test]
    fn subset_materialization_leaves_host_in_place() {
        let host = Arc::new(MockHost::new(2));
        let dyn_host: Arc<dyn ColumnHost> = Arc::<MockHost>::clone(&host);
        let mut table = Table::init_from_host(schema(), &dyn_host);
        table
            .ensure_all_materialized(Some(&[0, 2]), false)
            .expect("host alive");
        assert_eq!(host.calls(), 2);
        assert!(table.host().is_some());
        assert!(table.get_block(1).slot(0).is_unmaterialized());
    }
}
