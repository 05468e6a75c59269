//! Strongly-typed handles that cross the guest/host boundary.
//!
//! Every value here is a plain `u32` on the wire. The newtypes exist so an
//! arena address can never be passed where a slot or a continuation index is
//! expected.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Offset of a buffer inside the shared linear memory.
///
/// Offset zero is reserved and means "no buffer".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Address(u32);

impl Address {
    /// The null address.
    pub const NULL: Self = Self(0);

    /// Create an address from a raw offset.
    #[must_use]
    pub const fn new(offset: u32) -> Self {
        Self(offset)
    }

    /// Get the raw offset.
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// Check whether this is the null address.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Address `bytes` past this one, or `None` on overflow.
    #[must_use]
    pub fn checked_add(&self, bytes: u32) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl From<u32> for Address {
    fn from(offset: u32) -> Self {
        Self(offset)
    }
}

/// Host-assigned identity of one in-flight operation.
///
/// Slots are logical counters handed out by the promise registry. They are
/// never derived from buffer addresses, so allocator reuse cannot make two
/// chains collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct SlotId(u32);

impl SlotId {
    /// The "no slot" marker carried by terminal futures.
    pub const NONE: Self = Self(0);

    /// Create a slot from a raw value.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw slot value.
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// Check whether this is the "no slot" marker.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot_{}", self.0)
    }
}

impl From<u32> for SlotId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Index into the guest's continuation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ContinuationIndex(u32);

impl ContinuationIndex {
    /// No continuation: the future is terminal.
    pub const NONE: Self = Self(0);

    /// Create an index from a raw value.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get the raw index.
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// Check whether this is the "no continuation" marker.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ContinuationIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn_{}", self.0)
    }
}

impl From<u32> for ContinuationIndex {
    fn from(index: u32) -> Self {
        Self(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_display_is_hex() {
        assert_eq!(Address::new(0x40).to_string(), "0x00000040");
        assert!(Address::NULL.is_null());
        assert!(!Address::new(8).is_null());
    }

    #[test]
    fn address_checked_add() {
        assert_eq!(Address::new(8).checked_add(16), Some(Address::new(24)));
        assert_eq!(Address::new(u32::MAX).checked_add(1), None);
    }

    #[test]
    fn slot_and_continuation_markers() {
        assert!(SlotId::NONE.is_none());
        assert!(ContinuationIndex::NONE.is_none());
        assert_eq!(SlotId::new(7).to_string(), "slot_7");
        assert_eq!(ContinuationIndex::from(3).to_string(), "fn_3");
    }
}
