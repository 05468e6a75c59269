//! WebAssembly guests driven through the dispatcher.
//!
//! The modules here are hand-written WAT: a bump allocator and just enough
//! logic to exercise the boundary.

use std::sync::Arc;
use std::time::Duration;

use regwatch_core::codec::Response;
use regwatch_core::{Address, ContinuationIndex, FUTURE_SIZE, Guest, GuestMemory, HostImports};
use regwatch_host::fetch::{FetchProvider, MockFetch};
use regwatch_host::{ChainHost, ChainId, Dispatcher, PromiseRegistry, WasmGuest, WasmRuntime, WasmRuntimeConfig};

/// `call` issues one `get` for the request baked in at offset 64; the
/// continuation copies the response into a fresh buffer and returns it.
const REFLECT_GUEST: &str = r#"
(module
  (import "env" "get" (func $get (param i32 i32 i32)))
  (type $step (func (param i32 i32)))
  (memory (export "memory") 1)
  (global $top (mut i32) (i32.const 1024))
  (table 2 funcref)
  (elem (i32.const 1) $reflect)
  (data (i32.const 64) "\81\a3url\b9http://registry.test/ping")

  (func $allocate (export "allocate") (param $size i32) (result i32)
    (local $ptr i32)
    (local.set $ptr (global.get $top))
    (global.set $top
      (i32.and
        (i32.add (i32.add (global.get $top) (local.get $size)) (i32.const 7))
        (i32.const -8)))
    (local.get $ptr))

  (func (export "release") (param i32))

  (func $settle (param $at i32) (param $data i32) (param $len i32)
    (i32.store offset=0 (local.get $at) (local.get $data))
    (i32.store offset=4 (local.get $at) (local.get $len))
    (i32.store offset=8 (local.get $at) (i32.const 0))
    (i32.store offset=12 (local.get $at) (i32.const 0))
    (i32.store offset=16 (local.get $at) (i32.const 0))
    (i32.store offset=20 (local.get $at) (i32.const 0)))

  (func (export "call") (param $output i32) (param $request i32) (param $len i32)
    (local $input i32)
    (local.set $input (call $allocate (i32.const 24)))
    (call $settle (local.get $input) (i32.const 64) (i32.const 31))
    (call $get (local.get $output) (i32.const 1) (local.get $input)))

  (func (export "callback") (param $output i32) (param $fn i32) (param $input i32)
    (call_indirect (type $step) (local.get $output) (local.get $input) (local.get $fn)))

  (func $reflect (type $step) (param $output i32) (param $input i32)
    (local $len i32)
    (local $copy i32)
    (local.set $len (i32.load offset=4 (local.get $input)))
    (local.set $copy (call $allocate (local.get $len)))
    (memory.copy (local.get $copy) (i32.load (local.get $input)) (local.get $len))
    (call $settle (local.get $output) (local.get $copy) (local.get $len)))
)
"#;

/// `call` hands the host a `get` without a continuation.
const BAD_GET_GUEST: &str = r#"
(module
  (import "env" "get" (func $get (param i32 i32 i32)))
  (memory (export "memory") 1)
  (func (export "allocate") (param i32) (result i32) (i32.const 1024))
  (func (export "release") (param i32))
  (func (export "call") (param $output i32) (param i32 i32)
    (call $get (local.get $output) (i32.const 0) (i32.const 512)))
  (func (export "callback") (param i32 i32 i32))
)
"#;

const TRAPPING_GUEST: &str = r#"
(module
  (memory (export "memory") 1)
  (global $top (mut i32) (i32.const 1024))
  (func (export "allocate") (param $size i32) (result i32)
    (local $ptr i32)
    (local.set $ptr (global.get $top))
    (global.set $top (i32.add (global.get $top) (i32.const 64)))
    (local.get $ptr))
  (func (export "release") (param i32))
  (func (export "call") (param i32 i32 i32) unreachable)
  (func (export "callback") (param i32 i32 i32) unreachable)
)
"#;

const SPINNING_GUEST: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "allocate") (param i32) (result i32) (i32.const 1024))
  (func (export "release") (param i32))
  (func (export "call") (param i32 i32 i32)
    (loop $forever (br $forever)))
  (func (export "callback") (param i32 i32 i32))
)
"#;

fn instantiate(config: WasmRuntimeConfig, name: &str, wat: &str) -> WasmGuest {
    let runtime = WasmRuntime::new(config).unwrap();
    let bytes = wat::parse_str(wat).unwrap();
    WasmGuest::from_bytes(&runtime, name, &bytes).unwrap()
}

fn ping_mock() -> Arc<MockFetch> {
    Arc::new(
        MockFetch::new()
            .on_get(r"^http://registry\.test/ping$")
            .respond(Response::new(200).with_body("pong")),
    )
}

fn host_for(mock: &Arc<MockFetch>) -> Arc<dyn HostImports> {
    let fetch: Arc<dyn FetchProvider> = mock.clone();
    Arc::new(ChainHost::new(
        ChainId::new(),
        Arc::new(PromiseRegistry::new()),
        fetch,
    ))
}

#[tokio::test]
async fn reflect_guest_round_trips_a_get() {
    let mock = ping_mock();
    let guest = instantiate(WasmRuntimeConfig::testing(), "reflect", REFLECT_GUEST);
    let fetch: Arc<dyn FetchProvider> = mock.clone();
    let dispatcher = Dispatcher::new(guest, fetch);

    let response = dispatcher.get("http://ignored.test/").await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body_bytes(), b"pong");
    assert_eq!(mock.request_count(), 1);
    assert!(dispatcher.registry().is_empty());
    assert!(!dispatcher.guest().lock().is_aborted());

    // the instance survives for further chains
    let again = dispatcher.get("http://ignored.test/").await.unwrap();
    assert_eq!(again, response);
    assert_eq!(mock.request_count(), 2);
}

#[tokio::test]
async fn host_errors_surface_through_the_trap() {
    let mock = ping_mock();
    let guest = instantiate(WasmRuntimeConfig::default(), "bad-get", BAD_GET_GUEST);
    let fetch: Arc<dyn FetchProvider> = mock.clone();
    let dispatcher = Dispatcher::new(guest, fetch);

    let err = dispatcher.get("http://registry.test/ping").await.unwrap_err();

    assert_eq!(err.code(), "E702");
    assert!(err.to_string().contains("continuation"), "{err}");
    assert_eq!(mock.request_count(), 0);
    assert!(dispatcher.guest().lock().is_aborted());
}

#[tokio::test]
async fn a_trap_poisons_the_instance() {
    let mock = ping_mock();
    let guest = instantiate(WasmRuntimeConfig::default(), "trapping", TRAPPING_GUEST);
    let fetch: Arc<dyn FetchProvider> = mock.clone();
    let dispatcher = Dispatcher::new(guest, fetch);

    let err = dispatcher.get("http://registry.test/ping").await.unwrap_err();
    assert_eq!(err.code(), "E702");
    assert!(err.is_fatal());

    let err = dispatcher.get("http://registry.test/ping").await.unwrap_err();
    assert_eq!(err.code(), "E204");
    assert!(err.is_fatal());
}

#[test]
fn fuel_bounds_each_step() {
    let mock = ping_mock();
    let config = WasmRuntimeConfig::default().with_fuel(Some(10_000));
    let mut guest = instantiate(config, "spinning", SPINNING_GUEST);

    let output = guest.allocate(FUTURE_SIZE).unwrap();
    let err = guest
        .call(&host_for(&mock), output, Address::new(1024), 0)
        .unwrap_err();

    assert_eq!(err.code(), "E702");
    assert!(guest.is_aborted());
}

#[test]
fn epoch_deadline_interrupts_a_spinning_step() {
    let mock = ping_mock();
    let config = WasmRuntimeConfig::default()
        .with_epoch_deadline(Some(5))
        .with_epoch_tick(Duration::from_millis(2));
    let mut guest = instantiate(config, "spinning", SPINNING_GUEST);

    let output = guest.allocate(FUTURE_SIZE).unwrap();
    let err = guest
        .call(&host_for(&mock), output, Address::new(1024), 0)
        .unwrap_err();

    assert_eq!(err.code(), "E702");
    assert!(guest.is_aborted());
}

#[test]
fn unknown_continuation_traps() {
    let mock = ping_mock();
    let mut guest = instantiate(WasmRuntimeConfig::testing(), "reflect", REFLECT_GUEST);

    let output = guest.allocate(FUTURE_SIZE).unwrap();
    let input = guest.allocate(FUTURE_SIZE).unwrap();
    let err = guest
        .callback(&host_for(&mock), output, ContinuationIndex::new(7), input)
        .unwrap_err();

    assert_eq!(err.code(), "E702");
    assert_eq!(guest.allocate(8).unwrap_err().code(), "E204");
}

#[test]
fn host_memory_access_is_bounds_checked() {
    let mut guest = instantiate(WasmRuntimeConfig::testing(), "reflect", REFLECT_GUEST);

    let address = guest.allocate(5).unwrap();
    guest.write(address, b"hello").unwrap();
    assert_eq!(guest.read(address, 5).unwrap(), b"hello");
    assert_eq!(guest.read(Address::new(64), 4).unwrap(), b"\x81\xa3ur");

    let end = Address::new(guest.memory_size() as u32 - 2);
    assert_eq!(guest.write(end, b"hello").unwrap_err().code(), "E002");
    assert_eq!(guest.read(Address::NULL, 4).unwrap_err().code(), "E002");
    assert!(!guest.is_aborted());
}

#[test]
fn missing_exports_fail_to_load() {
    let runtime = WasmRuntime::new(WasmRuntimeConfig::testing()).unwrap();
    let err = WasmGuest::from_bytes(
        &runtime,
        "empty",
        br#"(module (memory (export "memory") 1))"#,
    )
    .err()
    .unwrap();

    assert_eq!(err.code(), "E701");
    assert!(err.to_string().contains("allocate"));
}
