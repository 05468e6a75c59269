//! Bounds-checked access to a guest's exported linear memory.

use wasmtime::{AsContext, AsContextMut, Memory};

use regwatch_core::{Address, RegwatchError, Result};

fn range(address: Address, len: usize, size: usize) -> Result<std::ops::Range<usize>> {
    let start = address.as_u32() as usize;
    let end = start
        .checked_add(len)
        .filter(|&end| end <= size)
        .ok_or_else(|| RegwatchError::ArenaInvalidAddress {
            address,
            cause: format!("{len} bytes past the end of a {size}-byte memory"),
        })?;
    if address.is_null() {
        return Err(RegwatchError::ArenaInvalidAddress {
            address,
            cause: "null pointer".to_string(),
        });
    }
    Ok(start..end)
}

/// Copy `len` bytes out of guest memory.
pub(crate) fn read(
    memory: &Memory,
    store: impl AsContext,
    address: Address,
    len: u32,
) -> Result<Vec<u8>> {
    if len == 0 {
        return Ok(Vec::new());
    }
    let data = memory.data(&store);
    let range = range(address, len as usize, data.len())?;
    Ok(data[range].to_vec())
}

/// Copy `bytes` into guest memory at `address`.
pub(crate) fn write(
    memory: &Memory,
    mut store: impl AsContextMut,
    address: Address,
    bytes: &[u8],
) -> Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    let data = memory.data_mut(&mut store);
    let range = range(address, bytes.len(), data.len())?;
    data[range].copy_from_slice(bytes);
    Ok(())
}
