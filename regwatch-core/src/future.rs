//! The Future descriptor: one pending or settled asynchronous step.
//!
//! A descriptor is a fixed 24-byte record in guest memory holding six
//! little-endian `u32` fields:
//!
//! | Offset | Field | Meaning |
//! |---|---|---|
//! | 0 | `data` | payload address, 0 for none |
//! | 4 | `len` | payload length |
//! | 8 | `continuation` | guest function to resume, 0 when terminal |
//! | 12 | `context` | side-channel buffer address |
//! | 16 | `context_len` | side-channel buffer length |
//! | 20 | `slot` | host-assigned operation id, 0 when terminal |

use byteorder::{ByteOrder, LittleEndian};

use crate::boundary::GuestMemory;
use crate::error::{RegwatchError, Result};
use crate::types::{Address, ContinuationIndex, SlotId};

/// Size of an encoded descriptor in bytes.
pub const FUTURE_SIZE: u32 = 24;

/// Classification of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureState {
    /// Settled: `data`/`len` hold the answer.
    Terminal,
    /// Waiting on the host to resume `continuation`.
    Pending,
    /// Continuation and slot disagree.
    Invalid,
}

/// In-memory view of a Future descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FutureDescriptor {
    /// Payload address.
    pub data: Address,
    /// Payload length.
    pub len: u32,
    /// Continuation to invoke on settlement.
    pub continuation: ContinuationIndex,
    /// Side-channel buffer address.
    pub context: Address,
    /// Side-channel buffer length.
    pub context_len: u32,
    /// Registry slot of the in-flight operation.
    pub slot: SlotId,
}

impl FutureDescriptor {
    /// A settled future carrying `len` bytes at `data`.
    #[must_use]
    pub fn terminal(data: Address, len: u32) -> Self {
        Self {
            data,
            len,
            ..Self::default()
        }
    }

    /// The pending marker the host writes from `get`.
    #[must_use]
    pub fn pending(continuation: ContinuationIndex, slot: SlotId) -> Self {
        Self {
            continuation,
            slot,
            ..Self::default()
        }
    }

    /// Attach a context buffer.
    #[must_use]
    pub fn with_context(mut self, context: Address, context_len: u32) -> Self {
        self.context = context;
        self.context_len = context_len;
        self
    }

    /// Classify this descriptor.
    pub fn state(&self) -> FutureState {
        match (self.continuation.is_none(), self.slot.is_none()) {
            (true, true) => FutureState::Terminal,
            (false, false) => FutureState::Pending,
            _ => FutureState::Invalid,
        }
    }

    /// Check whether the future is settled.
    pub fn is_terminal(&self) -> bool {
        self.state() == FutureState::Terminal
    }

    /// Check whether the future is waiting on the host.
    pub fn is_pending(&self) -> bool {
        self.state() == FutureState::Pending
    }

    /// Encode into the 24-byte wire layout.
    pub fn to_bytes(&self) -> [u8; FUTURE_SIZE as usize] {
        let mut bytes = [0u8; FUTURE_SIZE as usize];
        LittleEndian::write_u32_into(
            &[
                self.data.as_u32(),
                self.len,
                self.continuation.as_u32(),
                self.context.as_u32(),
                self.context_len,
                self.slot.as_u32(),
            ],
            &mut bytes,
        );
        bytes
    }

    /// Decode from the 24-byte wire layout.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FUTURE_SIZE as usize {
            return Err(RegwatchError::decode(format!(
                "future descriptor needs {FUTURE_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut fields = [0u32; 6];
        LittleEndian::read_u32_into(&bytes[..FUTURE_SIZE as usize], &mut fields);
        Ok(Self {
            data: Address::new(fields[0]),
            len: fields[1],
            continuation: ContinuationIndex::new(fields[2]),
            context: Address::new(fields[3]),
            context_len: fields[4],
            slot: SlotId::new(fields[5]),
        })
    }

    /// Read the descriptor stored at `address`.
    pub fn load<M: GuestMemory + ?Sized>(memory: &M, address: Address) -> Result<Self> {
        Self::from_bytes(&memory.read(address, FUTURE_SIZE)?)
    }

    /// Write this descriptor to `address`.
    pub fn store<M: GuestMemory + ?Sized>(&self, memory: &mut M, address: Address) -> Result<()> {
        memory.write(address, &self.to_bytes())
    }

    /// Copy the payload out of memory.
    pub fn payload<M: GuestMemory + ?Sized>(&self, memory: &M) -> Result<Vec<u8>> {
        memory.read(self.data, self.len)
    }

    /// Copy the context buffer out of memory.
    pub fn context_bytes<M: GuestMemory + ?Sized>(&self, memory: &M) -> Result<Vec<u8>> {
        memory.read(self.context, self.context_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{Arena, ArenaConfig};

    #[test]
    fn layout_is_little_endian_in_field_order() {
        let future = FutureDescriptor {
            data: Address::new(0x10),
            len: 2,
            continuation: ContinuationIndex::new(3),
            context: Address::new(0x20),
            context_len: 5,
            slot: SlotId::new(0x0102_0304),
        };
        let bytes = future.to_bytes();
        assert_eq!(&bytes[0..4], &[0x10, 0, 0, 0]);
        assert_eq!(&bytes[8..12], &[3, 0, 0, 0]);
        assert_eq!(&bytes[20..24], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(FutureDescriptor::from_bytes(&bytes).unwrap(), future);
    }

    #[test]
    fn states() {
        assert_eq!(FutureDescriptor::default().state(), FutureState::Terminal);
        let pending = FutureDescriptor::pending(ContinuationIndex::new(1), SlotId::new(9));
        assert!(pending.is_pending());
        assert!(!pending.is_terminal());

        let half = FutureDescriptor::pending(ContinuationIndex::new(1), SlotId::NONE);
        assert_eq!(half.state(), FutureState::Invalid);
    }

    #[test]
    fn short_buffer_is_a_decode_error() {
        let err = FutureDescriptor::from_bytes(&[0; 12]).unwrap_err();
        assert_eq!(err.code(), "E101");
    }

    #[test]
    fn load_and_store_through_memory() {
        let mut arena = Arena::new(ArenaConfig::with_capacity(1024));
        let slot = arena.allocate(FUTURE_SIZE).unwrap();
        let url = b"https://example.test";
        let context = arena.allocate(url.len() as u32).unwrap();
        arena.write(context, url).unwrap();

        let future = FutureDescriptor::terminal(Address::NULL, 0).with_context(context, url.len() as u32);
        future.store(&mut arena, slot).unwrap();

        let loaded = FutureDescriptor::load(&arena, slot).unwrap();
        assert_eq!(loaded.context_bytes(&arena).unwrap(), url);
        assert!(loaded.payload(&arena).unwrap().is_empty());
    }
}
