use arrow::array::{new_empty_array, ArrayRef};
use arrow::datatypes::{DataType, TimeUnit};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum_macros::EnumString;
use thiserror::Error;

/// The element type of a table column.
#[derive(Clone, Copy, Debug, Deserialize, EnumString, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "snake_case")]
pub enum ElementType {
    Int64,
    Float64,
    Bool,
    DateTime,
    Utf8,
    Binary,
}

impl From<ElementType> for DataType {
    #[must_use]
    fn from(ty: ElementType) -> Self {
        match ty {
            ElementType::Int64 => Self::Int64,
            ElementType::Float64 => Self::Float64,
            ElementType::Bool => Self::Boolean,
            ElementType::DateTime => Self::Timestamp(TimeUnit::Second, None),
            ElementType::Utf8 => Self::Utf8,
            ElementType::Binary => Self::Binary,
        }
    }
}

impl ElementType {
    /// Returns a zero-length array of this element type, used as the
    /// tombstone sentinel for logically absent columns.
    #[must_use]
    pub fn empty_array(self) -> ArrayRef {
        new_empty_array(&DataType::from(self))
    }
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum SchemaError {
    #[error("a runtime schema requires at least one block type")]
    EmptyRuntimeSchema,
}

/// Position of a column within the block layout.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ColumnSlot {
    pub block: usize,
    pub offset: usize,
    /// Whether the column's block was newly allocated for it.
    pub new_block: bool,
}

/// Immutable description of a table's column types and their assignment to
/// type-homogeneous blocks.
///
/// Columns are scanned in order; the first occurrence of an element type
/// allocates the next sequential block id, and every later column of that
/// type joins the existing block. The assignment is a pure function of the
/// column type sequence, so two schemas built from equal sequences compare
/// equal field for field.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TableSchema {
    column_types: Vec<ElementType>,
    block_of: Vec<usize>,
    offset_in_block: Vec<usize>,
    columns_of_block: Vec<Vec<usize>>,
    type_of_block: Vec<ElementType>,
    dynamic: bool,
}

impl TableSchema {
    /// Builds a schema from an ordered column type sequence.
    #[must_use]
    pub fn build(column_types: Vec<ElementType>) -> Self {
        let mut block_of = Vec::with_capacity(column_types.len());
        let mut offset_in_block = Vec::with_capacity(column_types.len());
        let mut columns_of_block: Vec<Vec<usize>> = Vec::new();
        let mut type_of_block = Vec::new();
        let mut first_seen: HashMap<ElementType, usize> = HashMap::new();
        for (col, &ty) in column_types.iter().enumerate() {
            let block = *first_seen.entry(ty).or_insert_with(|| {
                type_of_block.push(ty);
                columns_of_block.push(Vec::new());
                type_of_block.len() - 1
            });
            block_of.push(block);
            offset_in_block.push(columns_of_block[block].len());
            columns_of_block[block].push(col);
        }
        Self {
            column_types,
            block_of,
            offset_in_block,
            columns_of_block,
            type_of_block,
            dynamic: false,
        }
    }

    /// Builds a runtime-columns schema: one block per element type, with
    /// per-block lengths determined only at execution time.
    ///
    /// Duplicate hints collapse into one block.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::EmptyRuntimeSchema` if no block type is given.
    pub fn build_runtime(block_types: &[ElementType]) -> Result<Self, SchemaError> {
        let type_of_block: Vec<_> = block_types.iter().copied().unique().collect();
        if type_of_block.is_empty() {
            return Err(SchemaError::EmptyRuntimeSchema);
        }
        let columns_of_block = vec![Vec::new(); type_of_block.len()];
        Ok(Self {
            column_types: Vec::new(),
            block_of: Vec::new(),
            offset_in_block: Vec::new(),
            columns_of_block,
            type_of_block,
            dynamic: true,
        })
    }

    /// Returns a schema extended with one trailing column of `new_type`,
    /// along with the new column's slot.
    ///
    /// # Panics
    ///
    /// Panics if the schema is dynamic.
    #[must_use]
    pub fn extend_with(&self, new_type: ElementType) -> (Self, ColumnSlot) {
        assert!(!self.dynamic, "cannot extend a runtime schema column-wise");
        let mut next = self.clone();
        let col = next.column_types.len();
        next.column_types.push(new_type);
        let (block, new_block) = next.block_for(new_type);
        let offset = next.columns_of_block[block].len();
        next.columns_of_block[block].push(col);
        next.block_of.push(block);
        next.offset_in_block.push(offset);
        (next, ColumnSlot { block, offset, new_block })
    }

    /// Returns a schema in which column `col` has element type `new_type`,
    /// along with the column's new slot.
    ///
    /// The column leaves its old block (later offsets in that block shift
    /// down by one) and joins `new_type`'s block at the position that keeps
    /// the block's columns ordered by column index (offsets at or after it
    /// shift up by one). An emptied block stays allocated; block ids are
    /// permanent for the lifetime of a schema lineage.
    ///
    /// # Panics
    ///
    /// Panics if `col` is out of range or the schema is dynamic.
    #[must_use]
    pub fn replace_at(&self, col: usize, new_type: ElementType) -> (Self, ColumnSlot) {
        assert!(!self.dynamic, "cannot retype a runtime schema column");
        assert!(col < self.column_types.len(), "column index out of range");
        let mut next = self.clone();
        let old_block = next.block_of[col];
        let old_offset = next.offset_in_block[col];
        next.columns_of_block[old_block].remove(old_offset);
        next.column_types[col] = new_type;
        let (block, new_block) = next.block_for(new_type);
        let offset = next.columns_of_block[block].partition_point(|&c| c < col);
        next.columns_of_block[block].insert(offset, col);
        for b in [old_block, block] {
            for (off, &c) in next.columns_of_block[b].iter().enumerate() {
                next.block_of[c] = b;
                next.offset_in_block[c] = off;
            }
        }
        (next, ColumnSlot { block, offset, new_block })
    }

    /// Looks up the block of an element type, allocating a trailing one if
    /// the type is unseen.
    fn block_for(&mut self, ty: ElementType) -> (usize, bool) {
        match self.type_of_block.iter().position(|&t| t == ty) {
            Some(block) => (block, false),
            None => {
                self.type_of_block.push(ty);
                self.columns_of_block.push(Vec::new());
                (self.type_of_block.len() - 1, true)
            }
        }
    }

    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    /// The number of columns. Zero for dynamic schemas, whose column count
    /// is a property of the table, not the schema.
    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.column_types.len()
    }

    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.type_of_block.len()
    }

    #[must_use]
    pub fn column_types(&self) -> &[ElementType] {
        &self.column_types
    }

    /// # Panics
    ///
    /// Panics if `col` is out of range.
    #[must_use]
    pub fn column_type(&self, col: usize) -> ElementType {
        self.column_types[col]
    }

    /// # Panics
    ///
    /// Panics if `col` is out of range.
    #[must_use]
    pub fn block_of(&self, col: usize) -> usize {
        self.block_of[col]
    }

    /// # Panics
    ///
    /// Panics if `col` is out of range.
    #[must_use]
    pub fn offset_in_block(&self, col: usize) -> usize {
        self.offset_in_block[col]
    }

    /// Column indices assigned to `block`, in column order.
    ///
    /// # Panics
    ///
    /// Panics if `block` is out of range.
    #[must_use]
    pub fn columns_of_block(&self, block: usize) -> &[usize] {
        &self.columns_of_block[block]
    }

    /// # Panics
    ///
    /// Panics if `block` is out of range.
    #[must_use]
    pub fn type_of_block(&self, block: usize) -> ElementType {
        self.type_of_block[block]
    }
}
