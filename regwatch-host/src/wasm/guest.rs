//! A guest module running under wasmtime.
//!
//! The module must export `memory`, `allocate(size) -> ptr`, `release(ptr)`,
//! `call(output, request, len)` and `callback(output, fn, input)`, and may
//! import `env.get(output, fn, input)`. Any trap poisons the instance: every
//! later entry fails with `GuestAborted`.

use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;
use tracing::{error, trace};
use wasmtime::{
    Caller, Extern, Linker, Memory, Module, Store, StoreLimits, StoreLimitsBuilder, TypedFunc,
};

use regwatch_core::{
    Address, ContinuationIndex, Guest, GuestMemory, HostImports, RegwatchError, Result,
};

use super::memory;
use super::runtime::{EpochTicker, WasmRuntime};

/// Per-instance store data.
struct WasmState {
    /// The chain's host imports while a boundary step runs.
    host: Option<Arc<dyn HostImports>>,
    limits: StoreLimits,
}

/// The caller's memory as seen from inside `env.get`.
///
/// Reads and writes go straight to linear memory. Allocation would re-enter
/// the guest while it is suspended in an import, so it is refused.
struct CallerMemory<'a, 'b> {
    caller: &'a mut Caller<'b, WasmState>,
    memory: Memory,
}

impl GuestMemory for CallerMemory<'_, '_> {
    fn allocate(&mut self, size: u32) -> Result<Address> {
        Err(RegwatchError::contract(format!(
            "cannot allocate {size} bytes from inside get"
        )))
    }

    fn release(&mut self, address: Address) -> Result<()> {
        Err(RegwatchError::contract(format!(
            "cannot release {address} from inside get"
        )))
    }

    fn read(&self, address: Address, len: u32) -> Result<Vec<u8>> {
        memory::read(&self.memory, &*self.caller, address, len)
    }

    fn write(&mut self, address: Address, bytes: &[u8]) -> Result<()> {
        memory::write(&self.memory, &mut *self.caller, address, bytes)
    }
}

fn host_get(
    mut caller: Caller<'_, WasmState>,
    output: u32,
    continuation: u32,
    input: u32,
) -> wasmtime::Result<()> {
    let host = caller
        .data()
        .host
        .clone()
        .ok_or_else(|| anyhow!("get called outside a boundary step"))?;
    let memory = match caller.get_export("memory") {
        Some(Extern::Memory(memory)) => memory,
        _ => return Err(anyhow!("guest does not export memory")),
    };

    let mut view = CallerMemory {
        caller: &mut caller,
        memory,
    };
    host.get(
        &mut view,
        Address::new(output),
        ContinuationIndex::new(continuation),
        Address::new(input),
    )?;
    Ok(())
}

/// A wasmtime instance of a guest module.
pub struct WasmGuest {
    name: String,
    store: Store<WasmState>,
    memory: Memory,
    allocate: TypedFunc<u32, u32>,
    release: TypedFunc<u32, ()>,
    call: TypedFunc<(u32, u32, u32), ()>,
    callback: TypedFunc<(u32, u32, u32), ()>,
    fuel: Option<u64>,
    epoch_deadline: Option<u64>,
    /// Keeps the epoch advancing while this instance lives.
    _ticker: Option<Arc<EpochTicker>>,
    aborted: Option<String>,
}

impl WasmGuest {
    /// Instantiate `module` on `runtime`.
    pub fn new(runtime: &WasmRuntime, name: &str, module: &Module) -> Result<Self> {
        let load_error = |cause: String| RegwatchError::WasmLoad {
            module: name.to_string(),
            cause,
        };

        let config = runtime.config();
        let state = WasmState {
            host: None,
            limits: StoreLimitsBuilder::new()
                .memory_size(config.max_memory_bytes())
                .instances(1)
                .build(),
        };
        let mut store = Store::new(runtime.engine(), state);
        store.limiter(|state| &mut state.limits);
        if let Some(fuel) = config.fuel {
            store.set_fuel(fuel).map_err(|e| load_error(e.to_string()))?;
        }
        if let Some(ticks) = config.epoch_deadline {
            store.set_epoch_deadline(ticks);
        }

        let mut linker = Linker::new(runtime.engine());
        linker
            .func_wrap("env", "get", host_get)
            .map_err(|e| RegwatchError::WasmHostFunction {
                function: "get".to_string(),
                cause: e.to_string(),
            })?;

        let instance = linker
            .instantiate(&mut store, module)
            .map_err(|e| load_error(e.to_string()))?;
        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| load_error("module does not export 'memory'".to_string()))?;

        macro_rules! export {
            ($name:literal) => {
                instance
                    .get_typed_func(&mut store, $name)
                    .map_err(|e| load_error(format!("export '{}': {e}", $name)))?
            };
        }

        Ok(Self {
            name: name.to_string(),
            allocate: export!("allocate"),
            release: export!("release"),
            call: export!("call"),
            callback: export!("callback"),
            store,
            memory,
            fuel: config.fuel,
            epoch_deadline: config.epoch_deadline,
            _ticker: runtime.epoch_ticker(),
            aborted: None,
        })
    }

    /// Compile and instantiate the module at `path`.
    pub fn from_file(runtime: &WasmRuntime, path: &Path) -> Result<Self> {
        let module = runtime.compile_file(path)?;
        Self::new(runtime, &path.display().to_string(), &module)
    }

    /// Compile and instantiate `bytes` (binary or text format).
    pub fn from_bytes(runtime: &WasmRuntime, name: &str, bytes: &[u8]) -> Result<Self> {
        let module = runtime.compile(name, bytes)?;
        Self::new(runtime, name, &module)
    }

    /// The module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check whether the instance has trapped.
    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    /// Current size of linear memory in bytes.
    pub fn memory_size(&self) -> usize {
        self.memory.data_size(&self.store)
    }

    fn ensure_running(&self) -> Result<()> {
        match &self.aborted {
            Some(cause) => Err(RegwatchError::GuestAborted {
                cause: cause.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Refill per-step budgets.
    fn prepare(&mut self, function: &str) -> Result<()> {
        self.ensure_running()?;
        if let Some(fuel) = self.fuel {
            self.store
                .set_fuel(fuel)
                .map_err(|e| RegwatchError::WasmExecution {
                    function: function.to_string(),
                    cause: e.to_string(),
                })?;
        }
        if let Some(ticks) = self.epoch_deadline {
            self.store.set_epoch_deadline(ticks);
        }
        Ok(())
    }

    /// Turn a failed export call into an error, poisoning the instance.
    fn trapped(&mut self, function: &str, err: wasmtime::Error) -> RegwatchError {
        // Errors raised by our own import come back wrapped in the trap.
        let cause = match err.downcast_ref::<RegwatchError>() {
            Some(inner) => inner.to_string(),
            None => format!("{err:#}"),
        };
        error!(module = %self.name, function, %cause, "guest trapped");
        self.aborted = Some(cause.clone());
        RegwatchError::WasmExecution {
            function: function.to_string(),
            cause,
        }
    }

    fn step(
        &mut self,
        function: &'static str,
        host: &Arc<dyn HostImports>,
        args: (u32, u32, u32),
    ) -> Result<()> {
        self.prepare(function)?;
        let entry = if function == "call" {
            self.call.clone()
        } else {
            self.callback.clone()
        };

        self.store.data_mut().host = Some(Arc::clone(host));
        let result = entry.call(&mut self.store, args);
        self.store.data_mut().host = None;

        trace!(module = %self.name, function, ?args, "step returned");
        result.map_err(|err| self.trapped(function, err))
    }
}

impl GuestMemory for WasmGuest {
    fn allocate(&mut self, size: u32) -> Result<Address> {
        self.prepare("allocate")?;
        let address = self
            .allocate
            .call(&mut self.store, size)
            .map_err(|err| self.trapped("allocate", err))?;
        if address == 0 {
            return Err(RegwatchError::ArenaExhausted {
                requested: u64::from(size),
                available: 0,
            });
        }
        Ok(Address::new(address))
    }

    fn release(&mut self, address: Address) -> Result<()> {
        if address.is_null() {
            return Ok(());
        }
        self.prepare("release")?;
        self.release
            .call(&mut self.store, address.as_u32())
            .map_err(|err| self.trapped("release", err))
    }

    fn read(&self, address: Address, len: u32) -> Result<Vec<u8>> {
        memory::read(&self.memory, &self.store, address, len)
    }

    fn write(&mut self, address: Address, bytes: &[u8]) -> Result<()> {
        self.ensure_running()?;
        memory::write(&self.memory, &mut self.store, address, bytes)
    }
}

impl Guest for WasmGuest {
    fn call(
        &mut self,
        host: &Arc<dyn HostImports>,
        output: Address,
        request: Address,
        len: u32,
    ) -> Result<()> {
        self.step("call", host, (output.as_u32(), request.as_u32(), len))
    }

    fn callback(
        &mut self,
        host: &Arc<dyn HostImports>,
        output: Address,
        continuation: ContinuationIndex,
        input: Address,
    ) -> Result<()> {
        self.step(
            "callback",
            host,
            (output.as_u32(), continuation.as_u32(), input.as_u32()),
        )
    }
}
