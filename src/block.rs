use crate::schema::ElementType;
use arrow::array::{Array, ArrayRef};
use arrow::datatypes::DataType;

/// The state of one column slot in a block.
///
/// A tombstone stands in for a logically absent column and carries a
/// zero-length array of the block's element type; it is distinct from
/// "not yet materialized."
#[derive(Clone, Debug)]
pub enum Slot {
    Unmaterialized,
    Materialized(ArrayRef),
    Tombstone(ArrayRef),
}

impl Slot {
    /// The slot's array, if it has one.
    #[must_use]
    pub fn array(&self) -> Option<&ArrayRef> {
        match self {
            Slot::Unmaterialized => None,
            Slot::Materialized(array) | Slot::Tombstone(array) => Some(array),
        }
    }

    #[must_use]
    pub fn is_unmaterialized(&self) -> bool {
        matches!(self, Slot::Unmaterialized)
    }

    #[must_use]
    pub fn is_materialized(&self) -> bool {
        matches!(self, Slot::Materialized(_))
    }

    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Slot::Tombstone(_))
    }
}

/// A homogeneous, growable vector of column slots, all of one element type.
///
/// Cloning is cheap: slots hold reference-counted arrays.
#[derive(Clone, Debug)]
pub struct TypedBlock {
    element_type: ElementType,
    slots: Vec<Slot>,
}

impl TypedBlock {
    /// Creates an empty block, to be grown slot by slot.
    #[must_use]
    pub fn new(element_type: ElementType) -> Self {
        Self {
            element_type,
            slots: Vec::new(),
        }
    }

    /// Creates a block of `len` unmaterialized slots.
    #[must_use]
    pub fn unmaterialized(element_type: ElementType, len: usize) -> Self {
        Self {
            element_type,
            slots: vec![Slot::Unmaterialized; len],
        }
    }

    /// Creates a block of `len` tombstone slots.
    #[must_use]
    pub fn tombstones(element_type: ElementType, len: usize) -> Self {
        let slots = (0..len)
            .map(|_| Slot::Tombstone(element_type.empty_array()))
            .collect();
        Self {
            element_type,
            slots,
        }
    }

    /// Creates a block holding the given column arrays.
    ///
    /// # Panics
    ///
    /// Panics if an array's type does not match `element_type`.
    #[must_use]
    pub fn from_arrays(element_type: ElementType, arrays: Vec<ArrayRef>) -> Self {
        let mut block = Self::new(element_type);
        for array in arrays {
            block.push(Slot::Materialized(array));
        }
        block
    }

    #[must_use]
    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    /// The number of slots, which for a static schema equals the number of
    /// columns assigned to this block.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// # Panics
    ///
    /// Panics if `offset` is out of range.
    #[must_use]
    pub fn slot(&self, offset: usize) -> &Slot {
        &self.slots[offset]
    }

    /// The array at `offset`, present unless the slot is unmaterialized.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is out of range.
    #[must_use]
    pub fn array(&self, offset: usize) -> Option<&ArrayRef> {
        self.slots[offset].array()
    }

    /// Overwrites the slot at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is out of range or the slot's array type does not
    /// match the block's element type.
    pub fn set(&mut self, offset: usize, slot: Slot) {
        self.check(&slot);
        self.slots[offset] = slot;
    }

    /// Appends a slot, growing the block by one.
    ///
    /// # Panics
    ///
    /// Panics if the slot's array type does not match the block's element
    /// type.
    pub fn push(&mut self, slot: Slot) {
        self.check(&slot);
        self.slots.push(slot);
    }

    /// Inserts a slot at `offset`, shifting slots at or after it up by one.
    ///
    /// # Panics
    ///
    /// Panics if `offset > len` or the slot's array type does not match the
    /// block's element type.
    pub fn insert(&mut self, offset: usize, slot: Slot) {
        self.check(&slot);
        self.slots.insert(offset, slot);
    }

    /// Removes the slot at `offset`, shifting later slots down by one.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is out of range.
    pub fn remove(&mut self, offset: usize) -> Slot {
        self.slots.remove(offset)
    }

    /// Replaces the slot at `offset` with a tombstone, leaving the block's
    /// slot count and every sibling offset unchanged.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is out of range.
    pub fn tombstone(&mut self, offset: usize) {
        self.slots[offset] = Slot::Tombstone(self.element_type.empty_array());
    }

    fn check(&self, slot: &Slot) {
        if let Some(array) = slot.array() {
            assert_eq!(
                array.data_type(),
                &DataType::from(self.element_type),
                "array type does not match the block's element type"
            );
        }
    }
}
