use crate::block::{Slot, TypedBlock};
use crate::materialize::{ColumnHost, MaterializeError};
use crate::schema::{ElementType, TableSchema};
use arrow::array::{Array, ArrayRef};
use arrow::datatypes::DataType;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum LayoutError {
    #[error("block {block} holds {actual} slots but the schema assigns {expected} columns")]
    BlockSizeMismatch {
        block: usize,
        expected: usize,
        actual: usize,
    },
    #[error("block {block} holds {actual:?} arrays but the schema assigns {expected:?}")]
    BlockTypeMismatch {
        block: usize,
        expected: ElementType,
        actual: ElementType,
    },
}

/// A table value: one typed block per distinct element type in its schema,
/// an authoritative row count, and an optional reference to an external host
/// representation for lazy materialization.
///
/// A `Table` is treated as an immutable value once published. Every mutating
/// operation either returns a new `Table` that shares unaffected blocks by
/// reference, or installs a slot in place through copy-on-write at block
/// granularity, so no partially-mutated table is ever observable.
#[derive(Clone, Debug)]
pub struct Table {
    schema: Arc<TableSchema>,
    blocks: Vec<Arc<TypedBlock>>,
    rows: usize,
    host: Option<Weak<dyn ColumnHost>>,
}

impl Table {
    /// Creates an empty table: one block per block id, every slot a
    /// tombstone, zero rows.
    ///
    /// # Panics
    ///
    /// Panics if `schema` is dynamic; use [`Table::init_runtime`] for
    /// runtime-columns schemas.
    #[must_use]
    pub fn init(schema: Arc<TableSchema>) -> Self {
        assert!(!schema.is_dynamic(), "use init_runtime for a runtime schema");
        let blocks = (0..schema.num_blocks())
            .map(|b| {
                let len = schema.columns_of_block(b).len();
                Arc::new(TypedBlock::tombstones(schema.type_of_block(b), len))
            })
            .collect();
        Self {
            schema,
            blocks,
            rows: 0,
            host: None,
        }
    }

    /// Creates a table from caller-supplied, already-populated blocks,
    /// indexed by block id.
    ///
    /// # Errors
    ///
    /// Returns `LayoutError::BlockSizeMismatch` if a block's slot count
    /// disagrees with the schema's column count for it (static schemas
    /// only; runtime blocks have caller-determined lengths), and
    /// `LayoutError::BlockTypeMismatch` if a block's element type disagrees
    /// with the schema.
    ///
    /// # Panics
    ///
    /// Panics if the number of blocks differs from the schema's.
    pub fn init_from_blocks(
        schema: Arc<TableSchema>,
        blocks: Vec<TypedBlock>,
        rows: usize,
    ) -> Result<Self, LayoutError> {
        assert_eq!(
            blocks.len(),
            schema.num_blocks(),
            "one block per schema block id"
        );
        for (b, block) in blocks.iter().enumerate() {
            if block.element_type() != schema.type_of_block(b) {
                return Err(LayoutError::BlockTypeMismatch {
                    block: b,
                    expected: schema.type_of_block(b),
                    actual: block.element_type(),
                });
            }
            if !schema.is_dynamic() {
                let expected = schema.columns_of_block(b).len();
                if block.len() != expected {
                    return Err(LayoutError::BlockSizeMismatch {
                        block: b,
                        expected,
                        actual: block.len(),
                    });
                }
            }
        }
        Ok(Self {
            schema,
            blocks: blocks.into_iter().map(Arc::new).collect(),
            rows,
            host: None,
        })
    }

    /// Creates a table whose columns are all still held by `host` and will
    /// be pulled in on first access. The row count latches from the first
    /// column the host supplies.
    ///
    /// The table holds only a weak reference; the caller keeps the host
    /// alive for as long as unmaterialized columns remain.
    ///
    /// # Panics
    ///
    /// Panics if `schema` is dynamic.
    #[must_use]
    pub fn init_from_host(schema: Arc<TableSchema>, host: &Arc<dyn ColumnHost>) -> Self {
        assert!(!schema.is_dynamic(), "runtime tables cannot be host-backed");
        let blocks = (0..schema.num_blocks())
            .map(|b| {
                let len = schema.columns_of_block(b).len();
                Arc::new(TypedBlock::unmaterialized(schema.type_of_block(b), len))
            })
            .collect();
        Self {
            schema,
            blocks,
            rows: 0,
            host: Some(Arc::downgrade(host)),
        }
    }

    /// Creates a table with a runtime-columns schema: one empty block per
    /// block type, to be grown through [`Table::get_block`] and
    /// [`Table::set_block`].
    ///
    /// # Panics
    ///
    /// Panics if `schema` is not dynamic.
    #[must_use]
    pub fn init_runtime(schema: Arc<TableSchema>) -> Self {
        assert!(schema.is_dynamic(), "init_runtime requires a runtime schema");
        let blocks = (0..schema.num_blocks())
            .map(|b| Arc::new(TypedBlock::new(schema.type_of_block(b))))
            .collect();
        Self {
            schema,
            blocks,
            rows: 0,
            host: None,
        }
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    /// The logical row count. Set explicitly, not derived from block
    /// contents: individual slots may be tombstones while unrelated columns
    /// still report correct lengths.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows
    }

    /// The logical column count: the schema's for a static table, the sum
    /// of block lengths for a runtime table.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.total_materialized_columns()
    }

    /// For runtime schemas, sums the slot counts of all blocks; for static
    /// schemas, answers from the schema without touching blocks.
    #[must_use]
    pub fn total_materialized_columns(&self) -> usize {
        if self.schema.is_dynamic() {
            self.blocks.iter().map(|block| block.len()).sum()
        } else {
            self.schema.num_columns()
        }
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// The live block for `block` id, shared, not copied. Callers that
    /// intend to mutate clone it and hand the result to
    /// [`Table::set_block`].
    ///
    /// # Panics
    ///
    /// Panics if `block` is not a block id of this table's schema; block
    /// ids are derived exclusively from the schema, so this is caller
    /// misuse, not a data condition.
    #[must_use]
    pub fn get_block(&self, block: usize) -> &Arc<TypedBlock> {
        &self.blocks[block]
    }

    /// Returns a table with `block` replaced, sharing every other block.
    ///
    /// # Panics
    ///
    /// Panics if `block` is out of range or the new block's element type
    /// disagrees with the schema.
    #[must_use]
    pub fn set_block(&self, block: usize, new_block: TypedBlock) -> Self {
        assert_eq!(
            new_block.element_type(),
            self.schema.type_of_block(block),
            "block element type does not match the schema"
        );
        let mut blocks = self.blocks.clone();
        blocks[block] = Arc::new(new_block);
        Self {
            schema: Arc::clone(&self.schema),
            blocks,
            rows: self.rows,
            host: self.host.clone(),
        }
    }

    /// Returns a table with the row count set to `rows`.
    #[must_use]
    pub fn set_row_count(&self, rows: usize) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
            blocks: self.blocks.clone(),
            rows,
            host: self.host.clone(),
        }
    }

    /// Returns the column's array, pulling it from the host representation
    /// first if it has not been materialized yet. Tombstoned columns yield
    /// their zero-length sentinel.
    ///
    /// The returned reference shares ownership with the table, so it stays
    /// valid for as long as either is held.
    ///
    /// # Errors
    ///
    /// Returns an error if the host representation is needed but has been
    /// dropped.
    ///
    /// # Panics
    ///
    /// Panics if `col` is out of range.
    pub fn get_column(&mut self, col: usize) -> Result<ArrayRef, MaterializeError> {
        self.ensure_materialized(col)?;
        let block = self.schema.block_of(col);
        let offset = self.schema.offset_in_block(col);
        let array = self.blocks[block]
            .array(offset)
            .expect("slot was just materialized");
        Ok(Arc::clone(array))
    }

    /// Returns a table with column `col` set to `array` of type `ty`.
    ///
    /// Same-type overwrite installs the array at the existing offset in
    /// O(1). `col == column_count()` appends a trailing column, growing the
    /// type's block (or allocating a new one). A type change erases the
    /// column's old slot (closing the gap in its old block) and inserts it
    /// into the new type's block in column order. All three cases share
    /// unaffected blocks with `self`.
    ///
    /// # Panics
    ///
    /// Panics if `col > column_count()`, the schema is dynamic, or the
    /// array's type does not match `ty`.
    #[must_use]
    pub fn set_column(&self, col: usize, array: ArrayRef, ty: ElementType) -> Self {
        assert!(
            !self.schema.is_dynamic(),
            "runtime tables are grown block-wise, not column-wise"
        );
        assert_eq!(
            array.data_type(),
            &DataType::from(ty),
            "array type does not match the declared element type"
        );
        let ncols = self.schema.num_columns();
        assert!(col <= ncols, "column index out of range");

        if col == ncols {
            // Trailing append.
            let (schema, slot) = self.schema.extend_with(ty);
            let mut blocks = self.blocks.clone();
            if slot.new_block {
                let mut block = TypedBlock::new(ty);
                block.push(Slot::Materialized(array));
                blocks.push(Arc::new(block));
            } else {
                Arc::make_mut(&mut blocks[slot.block]).push(Slot::Materialized(array));
            }
            return Self {
                schema: Arc::new(schema),
                blocks,
                rows: self.rows,
                host: self.host.clone(),
            };
        }

        if self.schema.column_type(col) == ty {
            // Same-type overwrite at the existing offset.
            let block = self.schema.block_of(col);
            let offset = self.schema.offset_in_block(col);
            let mut blocks = self.blocks.clone();
            Arc::make_mut(&mut blocks[block]).set(offset, Slot::Materialized(array));
            return Self {
                schema: Arc::clone(&self.schema),
                blocks,
                rows: self.rows,
                host: self.host.clone(),
            };
        }

        // Type change: erase from the old block, insert into the new one.
        let old_block = self.schema.block_of(col);
        let old_offset = self.schema.offset_in_block(col);
        let (schema, slot) = self.schema.replace_at(col, ty);
        debug!(
            column = col,
            from_block = old_block,
            to_block = slot.block,
            "column retyped across blocks"
        );
        let mut blocks = self.blocks.clone();
        Arc::make_mut(&mut blocks[old_block]).remove(old_offset);
        if slot.new_block {
            let mut block = TypedBlock::new(ty);
            block.push(Slot::Materialized(array));
            blocks.push(Arc::new(block));
        } else {
            Arc::make_mut(&mut blocks[slot.block]).insert(slot.offset, Slot::Materialized(array));
        }
        Self {
            schema: Arc::new(schema),
            blocks,
            rows: self.rows,
            host: self.host.clone(),
        }
    }

    /// Returns a table with column `col` tombstoned.
    ///
    /// The slot is replaced, not removed: removal would renumber every
    /// later column's offset in the block. The schema, the logical column
    /// count, and every sibling offset are unchanged, and a block whose
    /// last column is deleted stays allocated.
    ///
    /// # Panics
    ///
    /// Panics if `col` is out of range or the schema is dynamic.
    #[must_use]
    pub fn delete_column(&self, col: usize) -> Self {
        assert!(
            !self.schema.is_dynamic(),
            "runtime tables are grown block-wise, not column-wise"
        );
        let block = self.schema.block_of(col);
        let offset = self.schema.offset_in_block(col);
        let mut blocks = self.blocks.clone();
        Arc::make_mut(&mut blocks[block]).tombstone(offset);
        Self {
            schema: Arc::clone(&self.schema),
            blocks,
            rows: self.rows,
            host: self.host.clone(),
        }
    }

    /// Whether column `col`'s slot is a tombstone.
    ///
    /// # Panics
    ///
    /// Panics if `col` is out of range.
    #[must_use]
    pub fn is_tombstoned(&self, col: usize) -> bool {
        let block = self.schema.block_of(col);
        let offset = self.schema.offset_in_block(col);
        self.blocks[block].slot(offset).is_tombstone()
    }

    pub(crate) fn from_parts(
        schema: Arc<TableSchema>,
        blocks: Vec<Arc<TypedBlock>>,
        rows: usize,
    ) -> Self {
        Self {
            schema,
            blocks,
            rows,
            host: None,
        }
    }

    pub(crate) fn host(&self) -> Option<&Weak<dyn ColumnHost>> {
        self.host.as_ref()
    }

    pub(crate) fn clear_host(&mut self) {
        self.host = None;
    }

    /// In-place slot install, cloning the block first if it is shared.
    pub(crate) fn install_slot(&mut self, block: usize, offset: usize, slot: Slot) {
        Arc::make_mut(&mut self.blocks[block]).set(offset, slot);
    }

    /// Latches the row count the first time a column supplies a length.
    pub(crate) fn latch_rows(&mut self, rows: usize) {
        if self.rows == 0 {
            self.rows = rows;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ElementType;
    use arrow::array::{Int64Array, StringArray};

    fn int64(values: Vec<i64>) -> ArrayRef {
        Arc::new(Int64Array::from(values))
    }

    fn utf8(values: Vec<&str>) -> ArrayRef {
        Arc::new(StringArray::from(values))
    }

    fn schema() -> Arc<TableSchema> {
        Arc::new(TableSchema::build(vec![
            ElementType::Int64,
            ElementType::Utf8,
            ElementType::Int64,
        ]))
    }

    fn sample() -> Table {
        let table = Table::init(schema()).set_row_count(3);
        let table = table.set_column(0, int64(vec![1, 2, 3]), ElementType::Int64);
        let table = table.set_column(1, utf8(vec!["a", "b", "c"]), ElementType::Utf8);
        table.set_column(2, int64(vec![7, 8, 9]), ElementType::Int64)
    }

    #[test]
    fn init_satisfies_shape_invariant() {
        let table = Table::init(schema());
        assert_eq!(table.row_count(), 0);
        assert_eq!(table.column_count(), 3);
        assert_eq!(table.block_count(), 2);
        for b in 0..table.block_count() {
            assert_eq!(
                table.get_block(b).len(),
                table.schema().columns_of_block(b).len()
            );
        }
    }

    #[test]
    fn init_from_blocks_checks_layout() {
        let blocks = vec![
            TypedBlock::from_arrays(
                ElementType::Int64,
                vec![int64(vec![1, 2]), int64(vec![3, 4])],
            ),
            TypedBlock::from_arrays(ElementType::Utf8, vec![utf8(vec!["x", "y"])]),
        ];
        let table = Table::init_from_blocks(schema(), blocks, 2).expect("layout matches");
        assert_eq!(table.row_count(), 2);

        let short = vec![
            TypedBlock::from_arrays(ElementType::Int64, vec![int64(vec![1, 2])]),
            TypedBlock::from_arrays(ElementType::Utf8, vec![utf8(vec!["x", "y"])]),
        ];
        assert_eq!(
            Table::init_from_blocks(schema(), short, 2).expect_err("one slot missing"),
            LayoutError::BlockSizeMismatch {
                block: 0,
                expected: 2,
                actual: 1,
            }
        );

        let swapped = vec![
            TypedBlock::from_arrays(ElementType::Utf8, vec![utf8(vec!["x"]), utf8(vec!["y"])]),
            TypedBlock::from_arrays(ElementType::Int64, vec![int64(vec![1])]),
        ];
        assert_eq!(
            Table::init_from_blocks(schema(), swapped, 1).expect_err("types swapped"),
            LayoutError::BlockTypeMismatch {
                block: 0,
                expected: ElementType::Int64,
                actual: ElementType::Utf8,
            }
        );
    }

    #[test]
    fn set_column_same_type_round_trip() {
        let mut table = sample().set_column(2, int64(vec![4, 5, 6]), ElementType::Int64);
        assert_eq!(
            table.get_column(2).expect("materialized").to_data(),
            int64(vec![4, 5, 6]).to_data()
        );
        // Unaffected columns are untouched.
        assert_eq!(
            table.get_column(0).expect("materialized").to_data(),
            int64(vec![1, 2, 3]).to_data()
        );
        assert_eq!(
            table.get_column(1).expect("materialized").to_data(),
            utf8(vec!["a", "b", "c"]).to_data()
        );
    }

    #[test]
    fn set_column_shares_untouched_blocks() {
        let table = sample();
        let updated = table.set_column(0, int64(vec![0, 0, 0]), ElementType::Int64);
        // Same underlying storage for the string block, not merely equal.
        assert!(Arc::ptr_eq(table.get_block(1), updated.get_block(1)));
        assert!(!Arc::ptr_eq(table.get_block(0), updated.get_block(0)));
        assert!(Arc::ptr_eq(table.schema(), updated.schema()));
    }

    #[test]
    fn set_column_append() {
        let table = sample();
        let mut appended = table.set_column(3, utf8(vec!["d", "e", "f"]), ElementType::Utf8);
        assert_eq!(appended.column_count(), 4);
        assert_eq!(appended.schema().block_of(3), 1);
        assert_eq!(appended.schema().offset_in_block(3), 1);
        assert_eq!(
            appended.get_column(3).expect("materialized").to_data(),
            utf8(vec!["d", "e", "f"]).to_data()
        );
        // The int block is untouched and shared.
        assert!(Arc::ptr_eq(table.get_block(0), appended.get_block(0)));
    }

    #[test]
    fn set_column_append_new_type() {
        let table = sample();
        let appended = table.set_column(
            3,
            Arc::new(arrow::array::Float64Array::from(vec![0.5, 1.5, 2.5])),
            ElementType::Float64,
        );
        assert_eq!(appended.block_count(), 3);
        assert_eq!(appended.schema().block_of(3), 2);
        assert_eq!(appended.get_block(2).len(), 1);
    }

    #[test]
    fn set_column_type_change_moves_between_blocks() {
        // Retyping column 1 from Utf8 to Int64 must land it between
        // columns 0 and 2 in the int block and leave the string block
        // empty but allocated.
        let table = sample();
        let mut changed = table.set_column(1, int64(vec![10, 20, 30]), ElementType::Int64);
        assert_eq!(changed.schema().columns_of_block(0), &[0, 1, 2]);
        assert!(changed.schema().columns_of_block(1).is_empty());
        assert_eq!(changed.block_count(), 2);
        assert!(changed.get_block(1).is_empty());
        assert_eq!(
            changed.get_column(1).expect("materialized").to_data(),
            int64(vec![10, 20, 30]).to_data()
        );
        // Siblings keep their data at shifted offsets.
        assert_eq!(
            changed.get_column(0).expect("materialized").to_data(),
            int64(vec![1, 2, 3]).to_data()
        );
        assert_eq!(
            changed.get_column(2).expect("materialized").to_data(),
            int64(vec![7, 8, 9]).to_data()
        );
        // The input table is untouched.
        assert_eq!(table.schema().columns_of_block(0), &[0, 2]);
        assert_eq!(table.get_block(1).len(), 1);
    }

    #[test]
    fn delete_column_leaves_tombstone() {
        let table = sample();
        let mut deleted = table.delete_column(0);
        assert_eq!(deleted.column_count(), 3);
        assert_eq!(deleted.get_block(0).len(), 2);
        assert!(deleted.is_tombstoned(0));
        assert_eq!(deleted.get_column(0).expect("sentinel").len(), 0);
        // The sibling in the same block keeps its offset and data.
        assert_eq!(deleted.schema().offset_in_block(2), 1);
        assert_eq!(
            deleted.get_column(2).expect("materialized").to_data(),
            int64(vec![7, 8, 9]).to_data()
        );
    }

    #[test]
    fn delete_last_column_of_block_keeps_block() {
        let table = sample();
        let deleted = table.delete_column(1);
        assert_eq!(deleted.block_count(), 2);
        assert_eq!(deleted.get_block(1).len(), 1);
        assert!(deleted.get_block(1).slot(0).is_tombstone());
    }

    #[test]
    fn runtime_table_counts_columns_from_blocks() {
        let schema = Arc::new(
            TableSchema::build_runtime(&[ElementType::Int64, ElementType::Utf8])
                .expect("non-empty hints"),
        );
        let table = Table::init_runtime(Arc::clone(&schema));
        assert_eq!(table.total_materialized_columns(), 0);

        let mut ints = (**table.get_block(0)).clone();
        ints.push(Slot::Materialized(int64(vec![1, 2])));
        ints.push(Slot::Materialized(int64(vec![3, 4])));
        let mut strs = (**table.get_block(1)).clone();
        strs.push(Slot::Materialized(utf8(vec!["x", "y"])));
        let table = table.set_block(0, ints).set_block(1, strs).set_row_count(2);

        assert_eq!(table.total_materialized_columns(), 3);
        assert_eq!(table.column_count(), 3);
        assert_eq!(table.row_count(), 2);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn set_column_beyond_append_panics() {
        let _ = sample().set_column(5, int64(vec![1, 2, 3]), ElementType::Int64);
    }
}
