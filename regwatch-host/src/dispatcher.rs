//! Boundary dispatcher.
//!
//! Drives one chain at a time per `call`, many chains concurrently per
//! dispatcher:
//!
//! 1. Allocate the output future and the request buffer in guest memory and
//!    enter `call`.
//! 2. While the output future is pending, await the fetch registered under
//!    its slot, then re-enter the guest through `callback` with the encoded
//!    response and the chain's context.
//! 3. Once the output is terminal, copy the payload out and release it
//!    together with the output future.
//!
//! The guest sits behind a mutex that is held only for synchronous boundary
//! steps, never across an await.
//!
//! A chain whose `call` future is dropped mid-fetch (a caller timeout, a
//! controller shutting down) is torn down by `Abandon`: the fetch is
//! aborted, its slot dropped and the chain's buffers released.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, instrument, warn};

use regwatch_core::codec::{
    CallRequest, RegistryStatus, Request, Response, WireDecode, encode_to_vec, pack, unpack,
    wire_len,
};
use regwatch_core::{
    Address, ContinuationIndex, FUTURE_SIZE, FutureDescriptor, FutureState, Guest, GuestMemory,
    HostImports, RegwatchError, Result,
};

use crate::fetch::FetchProvider;
use crate::registry::{PendingStep, PromiseRegistry};
use crate::types::ChainId;

/// The host side of `get` for one chain.
pub struct ChainHost {
    chain: ChainId,
    registry: Arc<PromiseRegistry>,
    fetch: Arc<dyn FetchProvider>,
}

impl ChainHost {
    /// Host imports bound to `chain`.
    pub fn new(
        chain: ChainId,
        registry: Arc<PromiseRegistry>,
        fetch: Arc<dyn FetchProvider>,
    ) -> Self {
        Self {
            chain,
            registry,
            fetch,
        }
    }
}

impl HostImports for ChainHost {
    fn get(
        &self,
        memory: &mut dyn GuestMemory,
        output: Address,
        continuation: ContinuationIndex,
        input: Address,
    ) -> Result<()> {
        let runtime = Handle::try_current().map_err(|e| RegwatchError::RuntimeUnavailable {
            cause: e.to_string(),
        })?;
        if continuation.is_none() {
            return Err(RegwatchError::contract("get without a continuation"));
        }
        if self.registry.in_flight(self.chain) > 0 {
            return Err(RegwatchError::contract(format!(
                "{} already has a get in flight",
                self.chain
            )));
        }

        let future = FutureDescriptor::load(&*memory, input)?;
        let request: Request = unpack(&*memory, future.data, future.len)?;

        let slot = self.registry.next_slot();
        let step = PendingStep {
            chain: self.chain,
            continuation,
            output,
            context: future.context,
            context_len: future.context_len,
            url: request.url.clone(),
        };
        let fetch = Arc::clone(&self.fetch);
        let task = runtime.spawn(async move { fetch.fetch(request).await });
        self.registry.insert(slot, step, task)?;

        if let Err(err) = FutureDescriptor::pending(continuation, slot).store(memory, output) {
            self.registry.remove(slot)?;
            return Err(err);
        }
        debug!(chain = %self.chain, %slot, %continuation, "get registered");
        Ok(())
    }
}

/// Runs chains against one guest.
pub struct Dispatcher<G> {
    guest: Arc<Mutex<G>>,
    registry: Arc<PromiseRegistry>,
    fetch: Arc<dyn FetchProvider>,
}

impl<G> Clone for Dispatcher<G> {
    fn clone(&self) -> Self {
        Self {
            guest: Arc::clone(&self.guest),
            registry: Arc::clone(&self.registry),
            fetch: Arc::clone(&self.fetch),
        }
    }
}

impl<G: Guest> Dispatcher<G> {
    /// A dispatcher with its own registry.
    pub fn new(guest: G, fetch: Arc<dyn FetchProvider>) -> Self {
        Self::with_registry(guest, fetch, Arc::new(PromiseRegistry::new()))
    }

    /// A dispatcher sharing `registry`.
    pub fn with_registry(
        guest: G,
        fetch: Arc<dyn FetchProvider>,
        registry: Arc<PromiseRegistry>,
    ) -> Self {
        Self {
            guest: Arc::new(Mutex::new(guest)),
            registry,
            fetch,
        }
    }

    /// The guest, for inspection.
    pub fn guest(&self) -> &Arc<Mutex<G>> {
        &self.guest
    }

    /// The promise registry.
    pub fn registry(&self) -> &Arc<PromiseRegistry> {
        &self.registry
    }

    /// Resolve `image` to its current digest.
    pub async fn check_image(&self, image: &str) -> Result<RegistryStatus> {
        let request = encode_to_vec(&CallRequest::image(image))?;
        RegistryStatus::from_slice(&self.call(&request).await?)
    }

    /// Perform a bare GET through the guest.
    pub async fn get(&self, url: &str) -> Result<Response> {
        let request = encode_to_vec(&CallRequest::url(url))?;
        Response::from_slice(&self.call(&request).await?)
    }

    /// Run one chain for the encoded `request` and return the encoded answer.
    #[instrument(skip_all, fields(chain = tracing::field::Empty))]
    pub async fn call(&self, request: &[u8]) -> Result<Vec<u8>> {
        let chain = ChainId::new();
        tracing::Span::current().record("chain", tracing::field::display(chain));

        let host: Arc<dyn HostImports> = Arc::new(ChainHost::new(
            chain,
            Arc::clone(&self.registry),
            Arc::clone(&self.fetch),
        ));

        let output = {
            let mut guest = self.guest.lock();
            start(&mut *guest, &host, request)?
        };

        match self.drive(chain, &host, output).await {
            Ok(answer) => Ok(answer),
            Err(err) => {
                let dropped = self.registry.abort_chain(chain);
                warn!(%chain, error = %err, dropped, "chain failed");
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        chain: ChainId,
        host: &Arc<dyn HostImports>,
        output: Address,
    ) -> Result<Vec<u8>> {
        loop {
            let future = {
                let guest = self.guest.lock();
                FutureDescriptor::load(&*guest, output)
            }?;

            match future.state() {
                FutureState::Terminal => {
                    let mut guest = self.guest.lock();
                    return finish(&mut *guest, output, &future);
                }
                FutureState::Invalid => {
                    let mut guest = self.guest.lock();
                    release_quietly(&mut *guest, output);
                    return Err(RegwatchError::contract(format!(
                        "output at {output} is neither pending nor terminal"
                    )));
                }
                FutureState::Pending => {}
            }

            let slot = future.slot;
            let (step, task) = match self.registry.begin_delivery(slot, chain) {
                Ok(delivery) => delivery,
                Err(err) => {
                    let mut guest = self.guest.lock();
                    release_quietly(&mut *guest, output);
                    return Err(err);
                }
            };
            if step.output != output || step.continuation != future.continuation {
                let mut guest = self.guest.lock();
                release_quietly(&mut *guest, step.context);
                release_quietly(&mut *guest, output);
                return Err(RegwatchError::contract(format!(
                    "{slot} does not belong to the output at {output}"
                )));
            }

            let abandon = Abandon {
                dispatcher: self,
                step: &step,
                fetch: task.abort_handle(),
                armed: true,
            };
            let joined = task.await;
            abandon.disarm();

            let settled = match joined {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(err)) => Err(err.to_string()),
                Err(join) => Err(join.to_string()),
            };

            let response = match settled {
                Ok(response) => response,
                Err(cause) => {
                    self.registry.remove(slot)?;
                    let mut guest = self.guest.lock();
                    release_quietly(&mut *guest, step.context);
                    release_quietly(&mut *guest, output);
                    return Err(RegwatchError::Fetch {
                        url: step.url,
                        cause,
                    });
                }
            };
            debug!(%slot, url = %step.url, status = response.status, "fetch settled");

            let delivered = {
                let mut guest = self.guest.lock();
                let delivered = deliver(&mut *guest, host, &step, &response);
                if delivered.is_err() {
                    release_quietly(&mut *guest, output);
                }
                delivered
            };
            self.registry.remove(slot)?;
            delivered?;
        }
    }
}

/// Tears a chain down if its `call` future is dropped while a fetch is
/// awaited.
struct Abandon<'a, G: Guest> {
    dispatcher: &'a Dispatcher<G>,
    step: &'a PendingStep,
    fetch: AbortHandle,
    armed: bool,
}

impl<G: Guest> Abandon<'_, G> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<G: Guest> Drop for Abandon<'_, G> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.fetch.abort();
        let chain = self.step.chain;
        let dropped = self.dispatcher.registry.abort_chain(chain);

        let mut guest = self.dispatcher.guest.lock();
        release_quietly(&mut *guest, self.step.context);
        release_quietly(&mut *guest, self.step.output);
        warn!(%chain, url = %self.step.url, dropped, "chain abandoned mid-fetch");
    }
}

/// Allocate the output future and request buffer, then enter `call`.
fn start<G: Guest>(guest: &mut G, host: &Arc<dyn HostImports>, request: &[u8]) -> Result<Address> {
    let len = wire_len(request.len())?;

    let output = guest.allocate(FUTURE_SIZE)?;
    let buffer = match guest.allocate(len) {
        Ok(buffer) => buffer,
        Err(err) => {
            release_quietly(guest, output);
            return Err(err);
        }
    };

    let outcome = guest
        .write(buffer, request)
        .and_then(|()| guest.call(host, output, buffer, len));
    release_quietly(guest, buffer);

    match outcome {
        Ok(()) => Ok(output),
        Err(err) => {
            release_quietly(guest, output);
            Err(err)
        }
    }
}

/// Hand a settled response to the guest.
fn deliver<G: Guest>(
    guest: &mut G,
    host: &Arc<dyn HostImports>,
    step: &PendingStep,
    response: &Response,
) -> Result<()> {
    let (data, len) = pack(guest, response)?;
    let input = match guest.allocate(FUTURE_SIZE) {
        Ok(input) => input,
        Err(err) => {
            release_quietly(guest, data);
            return Err(err);
        }
    };

    let outcome = FutureDescriptor::terminal(data, len)
        .with_context(step.context, step.context_len)
        .store(guest, input)
        .and_then(|()| guest.callback(host, step.output, step.continuation, input));

    release_quietly(guest, input);
    release_quietly(guest, data);
    outcome
}

/// Copy the terminal payload out and release it with the output future.
fn finish<G: Guest>(guest: &mut G, output: Address, future: &FutureDescriptor) -> Result<Vec<u8>> {
    let answer = future.payload(&*guest);
    release_quietly(guest, future.data);
    release_quietly(guest, output);
    answer
}

fn release_quietly<G: GuestMemory + ?Sized>(guest: &mut G, address: Address) {
    if let Err(err) = guest.release(address) {
        debug!(%address, error = %err, "release skipped");
    }
}
