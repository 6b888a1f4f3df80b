//! On-disk format constants shared by every structure in a container.

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Byte order of multi-byte integers in the container.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

/// Format parameters fixed when a container is created.
///
/// These are written into the superblock and every node, heap and entry
/// codec reads its field widths from here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatParams {
    /// Width in bytes of an address field (`A`).
    pub sizeof_addr: u8,
    /// Width in bytes of a length / heap-offset field (`L`).
    pub sizeof_size: u8,
    /// Symbol-table fan-out constant `K`: nodes hold between `K` and `2K` entries.
    pub sym_leaf_k: u16,
    /// Internal B-tree nodes hold up to `2 * btree_k` children.
    pub btree_k: u16,
    /// Byte order of every multi-byte integer.
    pub byte_order: ByteOrder,
}

impl Default for FormatParams {
    fn default() -> Self {
        Self {
            sizeof_addr: 8,
            sizeof_size: 8,
            sym_leaf_k: 4,
            btree_k: 16,
            byte_order: ByteOrder::Little,
        }
    }
}

impl FormatParams {
    /// Check the widths and fan-out constants.
    pub fn validate(&self) -> Result<(), TypeError> {
        for width in [self.sizeof_addr, self.sizeof_size] {
            if !matches!(width, 2 | 4 | 8) {
                return Err(TypeError::InvalidWidth(width));
            }
        }
        if self.sym_leaf_k == 0 {
            return Err(TypeError::InvalidParams(
                "sym_leaf_k must be at least 1".into(),
            ));
        }
        // A node records its entry count in two bytes.
        if self.sym_leaf_k > u16::MAX / 2 {
            return Err(TypeError::InvalidParams(format!(
                "sym_leaf_k must be at most {}",
                u16::MAX / 2
            )));
        }
        if self.btree_k < 2 {
            return Err(TypeError::InvalidParams(
                "btree_k must be at least 2".into(),
            ));
        }
        Ok(())
    }

    /// Largest address representable with `sizeof_addr` bytes.
    ///
    /// The all-ones pattern is reserved for [`Address::UNDEF`](crate::Address::UNDEF).
    pub fn max_address(&self) -> u64 {
        max_for_width(self.sizeof_addr) - 1
    }

    /// Largest length representable with `sizeof_size` bytes.
    pub fn max_length(&self) -> u64 {
        max_for_width(self.sizeof_size)
    }

    /// Maximum number of entries in one symbol-table node.
    pub fn sym_node_capacity(&self) -> usize {
        2 * self.sym_leaf_k as usize
    }

    /// Maximum number of children in one internal B-tree node.
    pub fn btree_capacity(&self) -> usize {
        2 * self.btree_k as usize
    }
}

pub(crate) fn max_for_width(width: u8) -> u64 {
    if width >= 8 {
        u64::MAX
    } else {
        (1u64 << (8 * width as u32)) - 1
    }
}
