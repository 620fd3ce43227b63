//! Typed columnar table storage.
//!
//! A [`Table`] holds an ordered collection of columns, physically grouped
//! into type-homogeneous [`TypedBlock`]s so that compiled callers can reach
//! column data without per-column type dispatch. The [`TableSchema`] fixes
//! each column's block and offset as a pure function of the column type
//! sequence; tables built from it support schema-preserving mutation with
//! block-level structural sharing, lazy materialization of columns from an
//! external [`ColumnHost`], and row filtering.

mod block;
mod filter;
mod materialize;
mod schema;
mod table;

pub use arrow;
pub use block::{Slot, TypedBlock};
pub use filter::{FilterError, RowSelector};
pub use materialize::{ColumnHost, MaterializeError};
pub use schema::{ColumnSlot, ElementType, SchemaError, TableSchema};
pub use table::{LayoutError, Table};
