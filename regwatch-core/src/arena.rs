//! Linear memory arena shared by the native guest and the host.
//!
//! The arena is a single growable byte buffer addressed by `u32` offsets.
//! Offsets below the alignment are reserved so that [`Address::NULL`] is
//! never handed out.
//!
//! # Allocation strategy
//!
//! - Sizes are rounded up to the configured alignment.
//! - Released blocks go to a free list keyed by offset and coalesce with
//!   their neighbours. A free block that touches the top lowers the top.
//! - Allocation is first-fit from the free list, otherwise bumped from the
//!   top until `capacity` is reached.
//!
//! Every allocation is zero-filled. Reads and writes must fall inside one
//! live allocation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::boundary::GuestMemory;
use crate::error::{RegwatchError, Result};
use crate::types::Address;

/// Default arena capacity (4 MiB).
pub const DEFAULT_CAPACITY: u32 = 4 * 1024 * 1024;

/// Default allocation alignment.
pub const DEFAULT_ALIGNMENT: u32 = 8;

/// Arena sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Hard limit on the buffer size in bytes.
    pub capacity: u32,
    /// Allocation alignment, a power of two.
    pub alignment: u32,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            alignment: DEFAULT_ALIGNMENT,
        }
    }
}

impl ArenaConfig {
    /// Config with a custom capacity and the default alignment.
    #[must_use]
    pub fn with_capacity(capacity: u32) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }
}

/// A first-fit arena over one linear buffer.
#[derive(Debug)]
pub struct Arena {
    config: ArenaConfig,
    buffer: Vec<u8>,
    /// First offset past the highest allocation.
    top: u32,
    /// Live allocations: offset -> size.
    live: BTreeMap<u32, u32>,
    /// Free blocks below `top`: offset -> size.
    free: BTreeMap<u32, u32>,
    high_water: u32,
}

impl Arena {
    /// Create an empty arena.
    pub fn new(config: ArenaConfig) -> Self {
        let alignment = config.alignment.max(1);
        Self {
            buffer: vec![0; alignment as usize],
            top: alignment,
            high_water: alignment,
            live: BTreeMap::new(),
            free: BTreeMap::new(),
            config,
        }
    }

    /// The arena configuration.
    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    /// Number of live allocations.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Bytes held by live allocations (after alignment).
    pub fn live_bytes(&self) -> u64 {
        self.live.values().map(|&size| u64::from(size)).sum()
    }

    /// Highest top offset ever reached.
    pub fn high_water(&self) -> u32 {
        self.high_water
    }

    /// Check whether `address` is the start of a live allocation.
    pub fn is_live(&self, address: Address) -> bool {
        self.live.contains_key(&address.as_u32())
    }

    fn align(&self, size: u32) -> Option<u32> {
        let alignment = self.config.alignment.max(1);
        size.max(1)
            .checked_add(alignment - 1)
            .map(|padded| padded / alignment * alignment)
    }

    fn exhausted(&self, requested: u32) -> RegwatchError {
        RegwatchError::ArenaExhausted {
            requested: u64::from(requested),
            available: u64::from(self.config.capacity.saturating_sub(self.top)),
        }
    }

    /// Allocate `size` zeroed bytes.
    pub fn allocate(&mut self, size: u32) -> Result<Address> {
        let size = self.align(size).ok_or_else(|| self.exhausted(size))?;

        let fit = self
            .free
            .iter()
            .find(|&(_, &block)| block >= size)
            .map(|(&offset, &block)| (offset, block));

        let offset = match fit {
            Some((offset, block)) => {
                self.free.remove(&offset);
                if block > size {
                    self.free.insert(offset + size, block - size);
                }
                offset
            }
            None => {
                let offset = self.top;
                let end = offset
                    .checked_add(size)
                    .filter(|&end| end <= self.config.capacity)
                    .ok_or_else(|| self.exhausted(size))?;
                self.top = end;
                self.high_water = self.high_water.max(end);
                self.buffer.resize(end as usize, 0);
                offset
            }
        };

        self.buffer[offset as usize..(offset + size) as usize].fill(0);
        self.live.insert(offset, size);
        tracing::trace!(address = %Address::new(offset), size, "arena allocate");
        Ok(Address::new(offset))
    }

    /// Release a live allocation.
    ///
    /// Releasing [`Address::NULL`] does nothing. Releasing anything that is
    /// not the start of a live allocation, including a second release of the
    /// same address, is rejected.
    pub fn release(&mut self, address: Address) -> Result<()> {
        if address.is_null() {
            return Ok(());
        }

        let size = self.live.remove(&address.as_u32()).ok_or_else(|| {
            RegwatchError::ArenaInvalidAddress {
                address,
                cause: "not the start of a live allocation".to_string(),
            }
        })?;

        let mut start = address.as_u32();
        let mut len = size;

        if let Some(next) = self.free.remove(&(start + len)) {
            len += next;
        }
        let previous = self
            .free
            .range(..start)
            .next_back()
            .map(|(&offset, &block)| (offset, block));
        if let Some((offset, block)) = previous {
            if offset + block == start {
                self.free.remove(&offset);
                start = offset;
                len += block;
            }
        }

        if start + len == self.top {
            self.top = start;
            self.buffer.truncate(start as usize);
        } else {
            self.free.insert(start, len);
        }

        tracing::trace!(%address, size, "arena release");
        Ok(())
    }

    fn check_range(&self, address: Address, len: u32) -> Result<std::ops::Range<usize>> {
        let start = address.as_u32();
        let invalid = |cause: &str| RegwatchError::ArenaInvalidAddress {
            address,
            cause: cause.to_string(),
        };

        let (&offset, &size) = self
            .live
            .range(..=start)
            .next_back()
            .ok_or_else(|| invalid("no live allocation at or below address"))?;

        let end = start
            .checked_add(len)
            .ok_or_else(|| invalid("range overflows"))?;
        if end > offset + size {
            return Err(invalid(&format!(
                "{len} bytes exceed allocation of {size} bytes at 0x{offset:08x}"
            )));
        }
        Ok(start as usize..end as usize)
    }

    /// Borrow `len` bytes at `address`.
    pub fn slice(&self, address: Address, len: u32) -> Result<&[u8]> {
        if len == 0 {
            return Ok(&[]);
        }
        let range = self.check_range(address, len)?;
        Ok(&self.buffer[range])
    }

    /// Mutably borrow `len` bytes at `address`.
    pub fn slice_mut(&mut self, address: Address, len: u32) -> Result<&mut [u8]> {
        if len == 0 {
            return Ok(&mut []);
        }
        let range = self.check_range(address, len)?;
        Ok(&mut self.buffer[range])
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new(ArenaConfig::default())
    }
}

impl GuestMemory for Arena {
    fn allocate(&mut self, size: u32) -> Result<Address> {
        Arena::allocate(self, size)
    }

    fn release(&mut self, address: Address) -> Result<()> {
        Arena::release(self, address)
    }

    fn read(&self, address: Address, len: u32) -> Result<Vec<u8>> {
        self.slice(address, len).map(<[u8]>::to_vec)
    }

    fn write(&mut self, address: Address, bytes: &[u8]) -> Result<()> {
        let len = u32::try_from(bytes.len()).map_err(|_| RegwatchError::ArenaInvalidAddress {
            address,
            cause: format!("write of {} bytes exceeds address space", bytes.len()),
        })?;
        self.slice_mut(address, len)?.copy_from_slice(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> Arena {
        Arena::new(ArenaConfig::with_capacity(256))
    }

    #[test]
    fn never_hands_out_null() {
        let mut arena = small();
        let addr = arena.allocate(1).unwrap();
        assert!(!addr.is_null());
        assert_eq!(addr.as_u32() % DEFAULT_ALIGNMENT, 0);
    }

    #[test]
    fn allocations_are_zeroed_after_reuse() {
        let mut arena = small();
        let first = arena.allocate(16).unwrap();
        let _pin = arena.allocate(8).unwrap();
        arena.write(first, &[0xAA; 16]).unwrap();
        arena.release(first).unwrap();

        let again = arena.allocate(16).unwrap();
        assert_eq!(again, first);
        assert_eq!(arena.read(again, 16).unwrap(), vec![0; 16]);
    }

    #[test]
    fn double_release_is_rejected() {
        let mut arena = small();
        let addr = arena.allocate(8).unwrap();
        arena.release(addr).unwrap();
        let err = arena.release(addr).unwrap_err();
        assert_eq!(err.code(), "E002");
    }

    #[test]
    fn release_null_is_noop() {
        let mut arena = small();
        arena.release(Address::NULL).unwrap();
        assert_eq!(arena.live_count(), 0);
    }

    #[test]
    fn exhaustion_reports_sizes() {
        let mut arena = small();
        let err = arena.allocate(1024).unwrap_err();
        match err {
            RegwatchError::ArenaExhausted {
                requested,
                available,
            } => {
                assert_eq!(requested, 1024);
                assert_eq!(available, 256 - u64::from(DEFAULT_ALIGNMENT));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(arena.allocate(u32::MAX).unwrap_err().is_fatal());
    }

    #[test]
    fn free_blocks_coalesce_and_lower_top() {
        let mut arena = small();
        let a = arena.allocate(8).unwrap();
        let b = arena.allocate(8).unwrap();
        let c = arena.allocate(8).unwrap();
        let top = arena.high_water();

        arena.release(a).unwrap();
        arena.release(b).unwrap();
        // a and b merged into one 16-byte block
        let merged = arena.allocate(16).unwrap();
        assert_eq!(merged, a);

        arena.release(merged).unwrap();
        arena.release(c).unwrap();
        assert_eq!(arena.live_count(), 0);
        assert_eq!(arena.allocate(top - DEFAULT_ALIGNMENT).unwrap(), a);
    }

    #[test]
    fn reads_are_bounded_by_allocation() {
        let mut arena = small();
        let addr = arena.allocate(8).unwrap();
        assert!(arena.read(addr, 8).is_ok());
        assert!(arena.read(addr, 9).is_err());
        assert!(arena.read(Address::new(3), 1).is_err());
        assert!(arena.read(Address::NULL, 0).unwrap().is_empty());

        arena.release(addr).unwrap();
        assert!(arena.read(addr, 1).is_err());
    }

    #[test]
    fn interior_writes_are_allowed() {
        let mut arena = small();
        let addr = arena.allocate(24).unwrap();
        let interior = addr.checked_add(8).unwrap();
        arena.write(interior, &[1, 2, 3, 4]).unwrap();
        assert_eq!(arena.read(interior, 4).unwrap(), vec![1, 2, 3, 4]);
        assert!(arena.write(interior, &[0; 17]).is_err());
    }

    #[test]
    fn tracks_live_bytes() {
        let mut arena = small();
        let a = arena.allocate(3).unwrap();
        let _b = arena.allocate(9).unwrap();
        assert_eq!(arena.live_count(), 2);
        assert_eq!(arena.live_bytes(), 8 + 16);
        arena.release(a).unwrap();
        assert_eq!(arena.live_bytes(), 16);
        assert!(!arena.is_live(a));
    }
}
