use std::fmt;

use serde::{Deserialize, Serialize};

/// A container-relative byte address.
///
/// The all-ones value is reserved as "undefined": it marks entries whose
/// object has not been resolved yet (soft links) and nodes that have not
/// been placed on disk.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(u64);

impl Address {
    /// The undefined address.
    pub const UNDEF: Address = Address(u64::MAX);

    /// Wrap a raw byte address.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw byte address.
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Returns `true` unless this is [`Address::UNDEF`].
    pub const fn is_defined(&self) -> bool {
        self.0 != u64::MAX
    }

    /// The address `delta` bytes further into the container.
    pub fn offset(&self, delta: u64) -> Address {
        Address(self.0 + delta)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_defined() {
            write!(f, "Address({:#x})", self.0)
        } else {
            write!(f, "Address(UNDEF)")
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_defined() {
            write!(f, "{:#x}", self.0)
        } else {
            write!(f, "UNDEF")
        }
    }
}

impl From<u64> for Address {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Offset of a NUL-terminated string inside a local heap.
///
/// Offset 0 always holds the empty string; it is the left-most key of every
/// symbol-table B-tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HeapOffset(u64);

impl HeapOffset {
    /// The reserved offset of the empty-string sentinel.
    pub const EMPTY: HeapOffset = HeapOffset(0);

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn value(&self) -> u64 {
        self.0
    }

    /// The offset as an index into the heap's data block.
    pub fn as_index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for HeapOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undef_is_not_defined() {
        assert!(!Address::UNDEF.is_defined());
        assert!(Address::new(0).is_defined());
        assert!(Address::new(4096).is_defined());
    }

    #[test]
    fn display_formats() {
        assert_eq!(format!("{}", Address::new(0x200)), "0x200");
        assert_eq!(format!("{}", Address::UNDEF), "UNDEF");
        assert_eq!(format!("{:?}", Address::UNDEF), "Address(UNDEF)");
        assert_eq!(format!("{}", HeapOffset::new(24)), "+24");
    }

    #[test]
    fn offset_advances() {
        assert_eq!(Address::new(16).offset(8), Address::new(24));
    }

    #[test]
    fn empty_offset_is_zero() {
        assert_eq!(HeapOffset::EMPTY.value(), 0);
        assert_eq!(HeapOffset::default(), HeapOffset::EMPTY);
    }

    #[test]
    fn serde_roundtrip() {
        let addr = Address::new(0xdead);
        let json = serde_json::to_string(&addr).unwrap();
        let parsed: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(addr, parsed);
    }
}
