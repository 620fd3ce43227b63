use crate::block::{Slot, TypedBlock};
use crate::materialize::MaterializeError;
use crate::table::Table;
use arrow::array::{Array, ArrayRef, BooleanArray, UInt64Array};
use arrow::compute;
use arrow::error::ArrowError;
use itertools::Itertools;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Selects a subset of a table's rows.
#[derive(Clone, Debug)]
pub enum RowSelector {
    /// One bool per existing row; `true` keeps the row.
    Mask(BooleanArray),
    /// Row indices to pick, in order; duplicates are allowed.
    Indices(UInt64Array),
}

impl RowSelector {
    /// The number of rows the selector produces.
    #[must_use]
    pub fn selected_rows(&self) -> usize {
        match self {
            RowSelector::Mask(mask) => mask.true_count(),
            RowSelector::Indices(indices) => indices.len(),
        }
    }

    fn apply(&self, array: &ArrayRef) -> Result<ArrayRef, ArrowError> {
        match self {
            RowSelector::Mask(mask) => compute::filter(array.as_ref(), mask),
            RowSelector::Indices(indices) => compute::take(array.as_ref(), indices, None),
        }
    }
}

impl From<Vec<bool>> for RowSelector {
    fn from(mask: Vec<bool>) -> Self {
        RowSelector::Mask(BooleanArray::from(mask))
    }
}

impl From<Vec<u64>> for RowSelector {
    fn from(indices: Vec<u64>) -> Self {
        RowSelector::Indices(UInt64Array::from(indices))
    }
}

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("{0}")]
    Materialize(#[from] MaterializeError),
    #[error("arrow compute failed: {0}")]
    Arrow(#[from] ArrowError),
    #[error("selector covers {selector} rows but the table has {rows}")]
    SelectorLength { selector: usize, rows: usize },
    #[error("filtered columns disagree in length")]
    LengthMismatch,
}

impl Table {
    /// Produces a row-filtered copy of the table.
    ///
    /// Every used column is materialized first, then run through the
    /// selector into a freshly allocated block at its existing offset; the
    /// schema is reused, so filtering never changes column types or
    /// positions. Columns outside `used_columns` (and columns that were
    /// already tombstones) come out as tombstones, keeping each block's
    /// slot count intact while skipping their row data entirely; on a
    /// host-backed table they are never pulled from the host at all.
    ///
    /// # Errors
    ///
    /// Returns an error if materialization fails, if a mask's length does
    /// not match the table's row count, or if the produced columns disagree
    /// in length.
    ///
    /// # Panics
    ///
    /// Panics if a used column index is out of range.
    pub fn filter_rows(
        &mut self,
        selector: &RowSelector,
        used_columns: Option<&[usize]>,
    ) -> Result<Table, FilterError> {
        let dynamic = self.schema().is_dynamic();
        if !dynamic {
            self.ensure_all_materialized(used_columns, false)?;
        }
        // Checked after materialization: a lazy table's row count latches
        // from the first column the host supplies.
        if let RowSelector::Mask(mask) = selector {
            if mask.len() != self.row_count() {
                return Err(FilterError::SelectorLength {
                    selector: mask.len(),
                    rows: self.row_count(),
                });
            }
        }

        // Every produced array must agree with the selector on length.
        let mut lengths = vec![selector.selected_rows()];
        let mut blocks = Vec::with_capacity(self.block_count());
        for b in 0..self.block_count() {
            let src = self.get_block(b);
            let ty = src.element_type();
            let mut dst = TypedBlock::new(ty);
            for offset in 0..src.len() {
                let used = dynamic
                    || used_columns.map_or(true, |used| {
                        used.contains(&self.schema().columns_of_block(b)[offset])
                    });
                match src.slot(offset) {
                    Slot::Materialized(array) if used => {
                        let filtered = selector.apply(array)?;
                        lengths.push(filtered.len());
                        dst.push(Slot::Materialized(filtered));
                    }
                    Slot::Unmaterialized if used => {
                        unreachable!("used columns were materialized above")
                    }
                    // Unused slots, tombstoned or never pulled from the
                    // host, come out as placeholders.
                    Slot::Materialized(_) | Slot::Tombstone(_) | Slot::Unmaterialized => {
                        dst.push(Slot::Tombstone(ty.empty_array()));
                    }
                }
            }
            blocks.push(Arc::new(dst));
        }
        if !lengths.iter().all_equal() {
            return Err(FilterError::LengthMismatch);
        }
        let rows = lengths[0];
        debug!(
            rows_in = self.row_count(),
            rows_out = rows,
            "table filtered"
        );
        Ok(Table::from_parts(
            Arc::clone(self.schema()),
            blocks,
            rows,
        ))
    }
}
