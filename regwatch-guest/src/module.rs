//! The guest module and its boundary entry points.

use std::sync::Arc;

use tracing::error;

use regwatch_core::{
    Address, Arena, ArenaConfig, ContinuationIndex, FutureDescriptor, Guest, GuestMemory,
    HostImports, RegwatchError, Result,
};

use crate::continuation;
use crate::protocol::{self, Chain};

/// A guest running the registry protocol over some linear memory.
///
/// Any fatal error (allocation exhaustion above all) aborts the module: every
/// later entry fails with [`RegwatchError::GuestAborted`].
#[derive(Debug)]
pub struct GuestModule<M> {
    memory: M,
    aborted: Option<String>,
}

/// The guest running in-process over an [`Arena`].
pub type NativeGuest = GuestModule<Arena>;

impl NativeGuest {
    /// A native guest with its own arena.
    pub fn with_config(config: ArenaConfig) -> Self {
        Self::new(Arena::new(config))
    }
}

impl<M: GuestMemory> GuestModule<M> {
    /// Wrap `memory` in a fresh module.
    pub fn new(memory: M) -> Self {
        Self {
            memory,
            aborted: None,
        }
    }

    /// The module's memory.
    pub fn memory(&self) -> &M {
        &self.memory
    }

    /// Check whether the module has aborted.
    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    fn ensure_running(&self) -> Result<()> {
        match &self.aborted {
            Some(cause) => Err(RegwatchError::GuestAborted {
                cause: cause.clone(),
            }),
            None => Ok(()),
        }
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_fatal() && self.aborted.is_none() {
                error!(error = %err, "guest aborted");
                self.aborted = Some(err.to_string());
            }
        }
        result
    }

    /// `call`: start a chain for the request at `request`.
    pub fn start(
        &mut self,
        host: &dyn HostImports,
        output: Address,
        request: Address,
        len: u32,
    ) -> Result<()> {
        self.ensure_running()?;
        let result = self.memory.read(request, len).and_then(|bytes| {
            protocol::start(&mut Chain::new(&mut self.memory, host), output, &bytes)
        });
        self.track(result)
    }

    /// `callback`: resume the chain parked at `output`.
    pub fn resume(
        &mut self,
        host: &dyn HostImports,
        output: Address,
        continuation: ContinuationIndex,
        input: Address,
    ) -> Result<()> {
        self.ensure_running()?;
        let handler = continuation::lookup(continuation)?;

        let parked = FutureDescriptor::load(&self.memory, output)?;
        if !parked.is_pending() {
            return Err(RegwatchError::contract(format!(
                "callback {continuation} on a future that is not pending"
            )));
        }
        if parked.continuation != continuation {
            return Err(RegwatchError::contract(format!(
                "callback {continuation} on a future parked at {}",
                parked.continuation
            )));
        }

        let settled = FutureDescriptor::load(&self.memory, input)?;
        let result = FutureDescriptor::default()
            .store(&mut self.memory, output)
            .and_then(|()| handler(&mut Chain::new(&mut self.memory, host), output, &settled));
        self.track(result)
    }
}

impl<M: GuestMemory> GuestMemory for GuestModule<M> {
    fn allocate(&mut self, size: u32) -> Result<Address> {
        self.ensure_running()?;
        let result = self.memory.allocate(size);
        self.track(result)
    }

    fn release(&mut self, address: Address) -> Result<()> {
        self.ensure_running()?;
        self.memory.release(address)
    }

    fn read(&self, address: Address, len: u32) -> Result<Vec<u8>> {
        self.memory.read(address, len)
    }

    fn write(&mut self, address: Address, bytes: &[u8]) -> Result<()> {
        self.ensure_running()?;
        self.memory.write(address, bytes)
    }
}

impl<M: GuestMemory + Send> Guest for GuestModule<M> {
    fn call(
        &mut self,
        host: &Arc<dyn HostImports>,
        output: Address,
        request: Address,
        len: u32,
    ) -> Result<()> {
        self.start(host.as_ref(), output, request, len)
    }

    fn callback(
        &mut self,
        host: &Arc<dyn HostImports>,
        output: Address,
        continuation: ContinuationIndex,
        input: Address,
    ) -> Result<()> {
        self.resume(host.as_ref(), output, continuation, input)
    }
}
