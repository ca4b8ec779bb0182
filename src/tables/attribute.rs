//! Shared vertex-attribute slot allocation.
//!
//! Every program built through the variant cache binds its vertex inputs to
//! indices handed out here, so one mesh layout works with any program.

use std::sync::{Arc, Weak};

use crate::error::{RenderError, Result};

/// Size of the attribute index pool.
pub const MAX_NUM_ATTRIBUTES: usize = 16;

/// A named vertex attribute index.
///
/// Slots are shared: querying a name that is already live returns the same
/// slot. The index returns to the pool when the last `Arc` drops.
#[derive(Debug, PartialEq, Eq)]
pub struct AttributeSlot {
    name: String,
    index: u32,
}

impl AttributeSlot {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

/// Allocates attribute indices by name.
///
/// # Example
///
/// ```
/// use phalanx::AttributeTable;
///
/// let mut table = AttributeTable::new();
/// let position = table.query_attribute("position").unwrap();
/// let again = table.query_attribute("position").unwrap();
/// assert_eq!(position.index(), again.index());
///
/// let normal = table.query_attribute("normal").unwrap();
/// assert_ne!(position.index(), normal.index());
/// ```
#[derive(Debug)]
pub struct AttributeTable {
    slots: Vec<Weak<AttributeSlot>>,
}

impl AttributeTable {
    pub fn new() -> Self {
        Self::with_capacity(MAX_NUM_ATTRIBUTES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![Weak::new(); capacity],
        }
    }

    /// Returns the live slot for `name`, or binds `name` to the lowest free
    /// index.
    ///
    /// # Errors
    ///
    /// [`RenderError::ResourceExhausted`] when every index is held by a live
    /// slot.
    pub fn query_attribute(&mut self, name: &str) -> Result<Arc<AttributeSlot>> {
        if let Some(slot) = self.get(name) {
            return Ok(slot);
        }

        let free = self
            .slots
            .iter()
            .position(|slot| slot.strong_count() == 0)
            .ok_or(RenderError::ResourceExhausted {
                resource: "vertex attribute",
                capacity: self.slots.len(),
            })?;

        let slot = Arc::new(AttributeSlot {
            name: name.to_string(),
            index: free as u32,
        });
        self.slots[free] = Arc::downgrade(&slot);
        Ok(slot)
    }

    /// The live slot for `name`, without allocating.
    pub fn get(&self, name: &str) -> Option<Arc<AttributeSlot>> {
        self.slots
            .iter()
            .filter_map(Weak::upgrade)
            .find(|slot| slot.name == name)
    }

    /// Number of live slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl Default for AttributeTable {
    fn default() -> Self {
        Self::new()
    }
}
