//! The compiled `regwatch-guest` module under wasmtime.
//!
//! Builds the guest for `wasm32-unknown-unknown` into a scratch target
//! directory once per run. Every test is skipped when that target is not
//! installed.

use std::path::PathBuf;
use std::process::Command;
use std::sync::{Arc, OnceLock};

use regwatch_core::codec::{RegistryStatus, Response, WireDecode};
use regwatch_core::{ContinuationIndex, FUTURE_SIZE, Guest, GuestMemory};
use regwatch_host::fetch::{FetchProvider, MockFetch};
use regwatch_host::{Dispatcher, WasmGuest, WasmRuntime, WasmRuntimeConfig};

const TARGET: &str = "wasm32-unknown-unknown";
const PROFILE: &str = "release-guest";

fn target_installed() -> bool {
    let rustc = std::env::var("RUSTC").unwrap_or_else(|_| "rustc".to_string());
    let Ok(output) = Command::new(rustc)
        .args(["--print", "target-libdir", "--target", TARGET])
        .output()
    else {
        return false;
    };
    output.status.success() && PathBuf::from(String::from_utf8_lossy(&output.stdout).trim()).exists()
}

fn build_guest() -> Option<Vec<u8>> {
    if !target_installed() {
        return None;
    }

    let target_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("guest-abi");
    let status = Command::new(env!("CARGO"))
        .args(["build", "--package", "regwatch-guest", "--lib"])
        .args(["--target", TARGET, "--profile", PROFILE])
        .arg("--manifest-path")
        .arg(PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../Cargo.toml"))
        .arg("--target-dir")
        .arg(&target_dir)
        .status()
        .unwrap();
    assert!(status.success(), "building the guest for {TARGET} failed");

    let artifact = target_dir.join(TARGET).join(PROFILE).join("regwatch_guest.wasm");
    Some(std::fs::read(artifact).unwrap())
}

fn guest_module() -> Option<&'static [u8]> {
    static MODULE: OnceLock<Option<Vec<u8>>> = OnceLock::new();
    MODULE.get_or_init(build_guest).as_deref()
}

fn instantiate(bytes: &[u8]) -> WasmGuest {
    let runtime = WasmRuntime::new(WasmRuntimeConfig::default()).unwrap();
    WasmGuest::from_bytes(&runtime, "regwatch-guest", bytes).unwrap()
}

fn dispatcher(bytes: &[u8], mock: &Arc<MockFetch>) -> Dispatcher<WasmGuest> {
    let fetch: Arc<dyn FetchProvider> = mock.clone();
    Dispatcher::new(instantiate(bytes), fetch)
}

macro_rules! guest_or_skip {
    () => {
        match guest_module() {
            Some(bytes) => bytes,
            None => {
                eprintln!("skipping: {TARGET} is not installed");
                return;
            }
        }
    };
}

#[tokio::test]
async fn compiled_guest_resolves_a_local_image() {
    let bytes = guest_or_skip!();
    let mock = Arc::new(
        MockFetch::new()
            .on_get(r"^http://localhost:5000/v2/apps/demo/manifests/latest$")
            .respond_digest("sha256:wasm"),
    );
    let dispatcher = dispatcher(bytes, &mock);

    let status = dispatcher.check_image("localhost:5000/apps/demo").await.unwrap();

    assert_eq!(status, RegistryStatus::found("sha256:wasm"));
    assert_eq!(mock.request_count(), 1);
    assert!(dispatcher.registry().is_empty());
}

#[tokio::test]
async fn compiled_guest_follows_the_token_flow() {
    let bytes = guest_or_skip!();
    let manifest = r"^https://index\.docker\.io/v2/library/nginx/manifests/latest$";
    let mock = Arc::new(
        MockFetch::new()
            .on_get(manifest)
            .with_header("authorization", "Bearer T")
            .respond_digest("sha256:abc")
            .on_get(manifest)
            .respond(Response::new(401).with_header(
                "www-authenticate",
                r#"Bearer realm="https://auth.example/token",service="registry",scope="repository:library/nginx:pull""#,
            ))
            .on_get(r"^https://auth\.example/token\?")
            .respond_json(200, r#"{"token":"T"}"#),
    );
    let dispatcher = dispatcher(bytes, &mock);

    let status = dispatcher.check_image("nginx").await.unwrap();

    assert_eq!(status, RegistryStatus::found("sha256:abc"));
    assert_eq!(mock.request_count(), 3);
    assert!(dispatcher.registry().is_empty());
    assert!(!dispatcher.guest().lock().is_aborted());
}

#[tokio::test]
async fn compiled_guest_answers_an_empty_request() {
    let bytes = guest_or_skip!();
    let mock = Arc::new(MockFetch::new());
    let dispatcher = dispatcher(bytes, &mock);

    let answer = dispatcher.call(&[0x80]).await.unwrap();

    assert_eq!(
        RegistryStatus::from_slice(&answer).unwrap(),
        RegistryStatus::incomplete()
    );
    assert_eq!(mock.request_count(), 0);
}

#[test]
fn compiled_guest_heap_is_zeroed_and_tracked() {
    let bytes = guest_or_skip!();
    let mut guest = instantiate(bytes);

    let address = guest.allocate(32).unwrap();
    assert_eq!(guest.read(address, 32).unwrap(), vec![0; 32]);
    guest.write(address, b"digest").unwrap();
    assert_eq!(guest.read(address, 6).unwrap(), b"digest");
    guest.release(address).unwrap();

    // a second release is not a live block: the guest traps
    let err = guest.release(address).unwrap_err();
    assert_eq!(err.code(), "E702");
    assert!(guest.is_aborted());
}

#[test]
fn compiled_guest_traps_on_unknown_continuations() {
    let bytes = guest_or_skip!();
    let mut guest = instantiate(bytes);
    let mock = Arc::new(MockFetch::new());
    let fetch: Arc<dyn FetchProvider> = mock;
    let host: Arc<dyn regwatch_core::HostImports> = Arc::new(regwatch_host::ChainHost::new(
        regwatch_host::ChainId::new(),
        Arc::new(regwatch_host::PromiseRegistry::new()),
        fetch,
    ));

    let output = guest.allocate(FUTURE_SIZE).unwrap();
    let input = guest.allocate(FUTURE_SIZE).unwrap();
    let err = guest
        .callback(&host, output, ContinuationIndex::new(9), input)
        .unwrap_err();

    assert_eq!(err.code(), "E702");
    assert!(guest.is_aborted());
}
