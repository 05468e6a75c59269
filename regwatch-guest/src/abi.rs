//! WebAssembly exports.
//!
//! Built for `wasm32`, the guest exposes `call`, `callback`, `allocate` and
//! `release`, and imports `env.get`. Addresses are offsets into the module's
//! linear memory, which the host reads and writes directly. Any error traps:
//! the host sees the trap and treats the instance as aborted.

use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::cell::RefCell;
use std::collections::HashMap;

use regwatch_core::{
    Address, ContinuationIndex, GuestMemory, HostImports, RegwatchError, Result,
};

use crate::module::GuestModule;

const ALIGN: usize = 8;

#[link(wasm_import_module = "env")]
unsafe extern "C" {
    #[link_name = "get"]
    fn host_get(output: u32, continuation: u32, input: u32);
}

/// The module's own heap, tracked so `release` knows each block's layout.
#[derive(Default)]
struct LinearMemory {
    sizes: HashMap<u32, u32>,
}

impl LinearMemory {
    fn pointer(address: Address) -> Result<*mut u8> {
        if address.is_null() {
            return Err(RegwatchError::ArenaInvalidAddress {
                address,
                cause: "null pointer".to_string(),
            });
        }
        Ok(address.as_u32() as usize as *mut u8)
    }
}

impl GuestMemory for LinearMemory {
    fn allocate(&mut self, size: u32) -> Result<Address> {
        let size = size.max(1);
        let exhausted = || RegwatchError::ArenaExhausted {
            requested: u64::from(size),
            available: 0,
        };
        let layout = Layout::from_size_align(size as usize, ALIGN).map_err(|_| exhausted())?;
        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(exhausted());
        }
        let address = ptr as usize as u32;
        self.sizes.insert(address, size);
        Ok(Address::new(address))
    }

    fn release(&mut self, address: Address) -> Result<()> {
        if address.is_null() {
            return Ok(());
        }
        let size = self.sizes.remove(&address.as_u32()).ok_or_else(|| {
            RegwatchError::ArenaInvalidAddress {
                address,
                cause: "not a live allocation".to_string(),
            }
        })?;
        // SAFETY: the block was allocated by `allocate` with this exact layout.
        unsafe {
            dealloc(
                Self::pointer(address)?,
                Layout::from_size_align_unchecked(size as usize, ALIGN),
            )
        };
        Ok(())
    }

    fn read(&self, address: Address, len: u32) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let ptr = Self::pointer(address)?;
        // SAFETY: the host and guest only exchange addresses of live blocks.
        Ok(unsafe { std::slice::from_raw_parts(ptr, len as usize) }.to_vec())
    }

    fn write(&mut self, address: Address, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let ptr = Self::pointer(address)?;
        // SAFETY: as for `read`; the destination block is at least this long.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len()) };
        Ok(())
    }
}

/// `get` forwarded to the `env` import.
struct ImportedHost;

impl HostImports for ImportedHost {
    fn get(
        &self,
        _memory: &mut dyn GuestMemory,
        output: Address,
        continuation: ContinuationIndex,
        input: Address,
    ) -> Result<()> {
        // SAFETY: plain integer arguments; the host validates every address.
        unsafe { host_get(output.as_u32(), continuation.as_u32(), input.as_u32()) };
        Ok(())
    }
}

thread_local! {
    static MODULE: RefCell<GuestModule<LinearMemory>> =
        RefCell::new(GuestModule::new(LinearMemory::default()));
}

fn trap() -> ! {
    core::arch::wasm32::unreachable()
}

#[unsafe(no_mangle)]
pub extern "C" fn allocate(size: u32) -> u32 {
    MODULE
        .with_borrow_mut(|module| module.allocate(size))
        .map(|address| address.as_u32())
        .unwrap_or_else(|_| trap())
}

#[unsafe(no_mangle)]
pub extern "C" fn release(address: u32) {
    if MODULE
        .with_borrow_mut(|module| module.release(Address::new(address)))
        .is_err()
    {
        trap();
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn call(output: u32, request: u32, len: u32) {
    let result = MODULE.with_borrow_mut(|module| {
        module.start(&ImportedHost, Address::new(output), Address::new(request), len)
    });
    if result.is_err() {
        trap();
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn callback(output: u32, continuation: u32, input: u32) {
    let result = MODULE.with_borrow_mut(|module| {
        module.resume(
            &ImportedHost,
            Address::new(output),
            ContinuationIndex::new(continuation),
            Address::new(input),
        )
    });
    if result.is_err() {
        trap();
    }
}
