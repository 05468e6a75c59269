//! Registry protocol state machine.
//!
//! ```text
//! call ──► Status ──200──────────────────────────────────► Done
//!            │
//!           401 ──► Token ──ok──► AuthorizedStatus ──200──► Done
//!                     │
//!                    401 ──► Rechallenge ──ok──┘
//! ```
//!
//! Every step either issues exactly one `get` and returns, or writes a
//! terminal future. Recoverable problems (undecodable payloads, unusable
//! challenges, missing tokens, a second 401) finish the chain with
//! `{complete: false}`. Errors returned from here are boundary failures:
//! memory faults, exhaustion, or a host that refused the `get`.
//!
//! The manifest URL rides along in the future's context buffer so the
//! authorized retry targets the same resource. The buffer is released by
//! whichever step finishes the chain.

use serde::Deserialize;
use tracing::{debug, warn};

use regwatch_core::codec::{
    CallRequest, RegistryStatus, Request, Response, WireDecode, pack, wire_len,
};
use regwatch_core::{
    Address, FUTURE_SIZE, FutureDescriptor, GuestMemory, HostImports, RegwatchError, Result,
};

use crate::challenge::Challenge;
use crate::continuation::Continuation;
use crate::reference::ImageReference;

/// Media types accepted for manifest requests.
pub const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
    application/vnd.docker.distribution.manifest.list.v2+json, \
    application/vnd.oci.image.manifest.v1+json, \
    application/vnd.oci.image.index.v1+json";

const DIGEST_HEADER: &str = "docker-content-digest";
const CHALLENGE_HEADER: &str = "www-authenticate";
const UNAUTHORIZED: i32 = 401;

/// What a running step can touch: guest memory and the host's `get`.
pub(crate) struct Chain<'a> {
    memory: &'a mut dyn GuestMemory,
    host: &'a dyn HostImports,
}

impl<'a> Chain<'a> {
    pub(crate) fn new(memory: &'a mut dyn GuestMemory, host: &'a dyn HostImports) -> Self {
        Self { memory, host }
    }
}

/// The context buffer carried from step to step.
#[derive(Debug, Clone, Copy)]
struct ChainContext {
    address: Address,
    len: u32,
}

impl ChainContext {
    const NONE: Self = Self {
        address: Address::NULL,
        len: 0,
    };

    fn of(future: &FutureDescriptor) -> Self {
        Self {
            address: future.context,
            len: future.context_len,
        }
    }

    fn store(memory: &mut dyn GuestMemory, url: &str) -> Result<Self> {
        let bytes = url.as_bytes();
        let len = wire_len(bytes.len())?;
        let address = memory.allocate(len)?;
        memory.write(address, bytes)?;
        Ok(Self { address, len })
    }

    fn read_url(&self, memory: &dyn GuestMemory) -> Result<Option<String>> {
        if self.address.is_null() || self.len == 0 {
            return Ok(None);
        }
        Ok(String::from_utf8(memory.read(self.address, self.len)?).ok())
    }

    fn release(self, memory: &mut dyn GuestMemory) -> Result<()> {
        memory.release(self.address)
    }
}

#[derive(Deserialize)]
struct TokenBody {
    token: Option<String>,
    access_token: Option<String>,
}

/// Pull the bearer token out of a token endpoint response body.
pub fn extract_token(body: &[u8]) -> Option<String> {
    let body: TokenBody = serde_json::from_slice(body).ok()?;
    body.token
        .or(body.access_token)
        .filter(|token| !token.is_empty())
}

/// The GET for a manifest, with the accepted media types.
pub fn manifest_request(url: &str) -> Request {
    Request::new(url).with_header("accept", MANIFEST_ACCEPT)
}

/// Entry point for `call`: decode the request and take the first step.
pub(crate) fn start(chain: &mut Chain<'_>, output: Address, request: &[u8]) -> Result<()> {
    let request = match CallRequest::from_slice(request) {
        Ok(request) => request,
        Err(err) => {
            warn!(error = %err, "undecodable call request");
            return finish(chain, output, &RegistryStatus::incomplete(), ChainContext::NONE);
        }
    };

    if let Some(image) = request.image.as_deref() {
        let reference = match ImageReference::parse(image) {
            Ok(reference) => reference,
            Err(err) => {
                debug!(error = %err, "no usable image reference");
                return finish(chain, output, &RegistryStatus::incomplete(), ChainContext::NONE);
            }
        };
        let url = reference.manifest_url();
        debug!(image, %url, "checking image");
        let context = ChainContext::store(&mut *chain.memory, &url)?;
        return issue_get(chain, output, Continuation::Status, &manifest_request(&url), context);
    }

    if let Some(url) = request.url {
        return issue_get(
            chain,
            output,
            Continuation::Reflect,
            &Request::new(url),
            ChainContext::NONE,
        );
    }

    debug!("request carries no image reference");
    finish(chain, output, &RegistryStatus::incomplete(), ChainContext::NONE)
}

/// Encode `request` into an input future and hand it to the host.
///
/// The input descriptor and its payload are released before returning; the
/// context travels on with the chain.
fn issue_get(
    chain: &mut Chain<'_>,
    output: Address,
    next: Continuation,
    request: &Request,
    context: ChainContext,
) -> Result<()> {
    let (data, len) = pack(&mut *chain.memory, request)?;
    let input = match chain.memory.allocate(FUTURE_SIZE) {
        Ok(input) => input,
        Err(err) => {
            chain.memory.release(data)?;
            return Err(err);
        }
    };

    debug!(continuation = next.name(), url = %request.url, "issuing get");
    let outcome = FutureDescriptor::terminal(data, len)
        .with_context(context.address, context.len)
        .store(&mut *chain.memory, input)
        .and_then(|()| chain.host.get(&mut *chain.memory, output, next.index(), input));

    chain.memory.release(input)?;
    chain.memory.release(data)?;
    if outcome.is_err() {
        context.release(&mut *chain.memory)?;
    }
    outcome
}

/// Write the terminal answer into `output` and drop the context.
fn finish(
    chain: &mut Chain<'_>,
    output: Address,
    status: &RegistryStatus,
    context: ChainContext,
) -> Result<()> {
    context.release(&mut *chain.memory)?;
    let (data, len) = pack(&mut *chain.memory, status)?;
    debug!(complete = status.complete, "chain finished");
    FutureDescriptor::terminal(data, len).store(&mut *chain.memory, output)
}

fn incomplete(chain: &mut Chain<'_>, output: Address, context: ChainContext) -> Result<()> {
    finish(chain, output, &RegistryStatus::incomplete(), context)
}

/// Decode the settled response. `None` means the payload was malformed.
fn read_response(chain: &Chain<'_>, input: &FutureDescriptor) -> Result<Option<Response>> {
    let bytes = input.payload(&*chain.memory)?;
    match Response::from_slice(&bytes) {
        Ok(response) => Ok(Some(response)),
        Err(err) => {
            warn!(error = %err, "undecodable response");
            Ok(None)
        }
    }
}

/// Answer a 401 by fetching a token from the challenge's realm.
fn authenticate(
    chain: &mut Chain<'_>,
    output: Address,
    response: &Response,
    next: Continuation,
    context: ChainContext,
) -> Result<()> {
    let challenge = match response.header(CHALLENGE_HEADER) {
        Some(header) => Challenge::parse(header),
        None => Err(RegwatchError::Challenge {
            cause: "401 without a www-authenticate header".to_string(),
        }),
    };

    match challenge {
        Ok(challenge) => issue_get(
            chain,
            output,
            next,
            &Request::new(challenge.token_url()),
            context,
        ),
        Err(err) => {
            debug!(error = %err, "challenge not usable");
            incomplete(chain, output, context)
        }
    }
}

/// Shared by both manifest steps. `on_challenge` is where a 401 leads, or
/// `None` when the chain has already presented a token.
fn manifest_step(
    chain: &mut Chain<'_>,
    output: Address,
    input: &FutureDescriptor,
    on_challenge: Option<Continuation>,
) -> Result<()> {
    let context = ChainContext::of(input);
    let Some(response) = read_response(chain, input)? else {
        return incomplete(chain, output, context);
    };

    if response.status == UNAUTHORIZED {
        return match on_challenge {
            Some(next) => authenticate(chain, output, &response, next, context),
            None => {
                warn!("registry rejected the bearer token");
                incomplete(chain, output, context)
            }
        };
    }

    let status = match response.header(DIGEST_HEADER) {
        Some(digest) => RegistryStatus::found(digest),
        None => {
            debug!(status = response.status, "response carries no digest");
            RegistryStatus::incomplete()
        }
    };
    finish(chain, output, &status, context)
}

/// Shared by both token steps. `on_challenge` is where a 401 leads, or
/// `None` once the chain has used its single re-challenge.
fn token_step(
    chain: &mut Chain<'_>,
    output: Address,
    input: &FutureDescriptor,
    on_challenge: Option<Continuation>,
) -> Result<()> {
    let context = ChainContext::of(input);
    let Some(response) = read_response(chain, input)? else {
        return incomplete(chain, output, context);
    };

    if response.status == UNAUTHORIZED {
        return match on_challenge {
            Some(next) => authenticate(chain, output, &response, next, context),
            None => {
                warn!("token endpoint challenged twice");
                incomplete(chain, output, context)
            }
        };
    }

    let Some(token) = extract_token(response.body_bytes()) else {
        debug!(status = response.status, "token response carries no token");
        return incomplete(chain, output, context);
    };

    let Some(url) = context.read_url(&*chain.memory)? else {
        warn!("chain lost its manifest url");
        return incomplete(chain, output, context);
    };

    let request = manifest_request(&url).with_header("authorization", format!("Bearer {token}"));
    issue_get(chain, output, Continuation::AuthorizedStatus, &request, context)
}

pub(crate) fn on_status(chain: &mut Chain<'_>, output: Address, input: &FutureDescriptor) -> Result<()> {
    manifest_step(chain, output, input, Some(Continuation::Token))
}

pub(crate) fn on_authorized_status(
    chain: &mut Chain<'_>,
    output: Address,
    input: &FutureDescriptor,
) -> Result<()> {
    manifest_step(chain, output, input, None)
}

pub(crate) fn on_token(chain: &mut Chain<'_>, output: Address, input: &FutureDescriptor) -> Result<()> {
    token_step(chain, output, input, Some(Continuation::Rechallenge))
}

pub(crate) fn on_rechallenge(
    chain: &mut Chain<'_>,
    output: Address,
    input: &FutureDescriptor,
) -> Result<()> {
    token_step(chain, output, input, None)
}

/// Bare GET: copy the encoded response into a buffer the caller owns.
pub(crate) fn on_reflect(chain: &mut Chain<'_>, output: Address, input: &FutureDescriptor) -> Result<()> {
    let payload = input.payload(&*chain.memory)?;
    let data = chain.memory.allocate(input.len)?;
    chain.memory.write(data, &payload)?;
    ChainContext::of(input).release(&mut *chain.memory)?;
    FutureDescriptor::terminal(data, input.len).store(&mut *chain.memory, output)
}
