//! Loading host configuration from disk and building a dispatcher from it.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use regwatch_core::codec::Response;
use regwatch_host::fetch::{FetchProvider, MockFetch};
use regwatch_host::{AnyGuest, HostConfig, build_dispatcher, build_dispatcher_with};
use tempfile::NamedTempFile;

const MINIMAL_GUEST: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "allocate") (param i32) (result i32) (i32.const 1024))
  (func (export "release") (param i32))
  (func (export "call") (param i32 i32 i32))
  (func (export "callback") (param i32 i32 i32))
)
"#;

fn write_temp(contents: &str, suffix: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn file_settings_are_loaded_and_validated() {
    let file = write_temp(
        "arena:\n  capacity: 65536\nfetch:\n  timeout_secs: 7\n  user_agent: regwatch-test\n",
        ".yaml",
    );

    let config = HostConfig::load(Some(file.path())).unwrap();

    assert_eq!(config.arena.capacity, 65536);
    assert_eq!(config.fetch.timeout_secs, 7);
    assert_eq!(config.fetch.user_agent, "regwatch-test");
}

#[test]
fn invalid_values_fail_to_load() {
    let file = write_temp("arena:\n  capacity: 16\n", ".yaml");

    let err = HostConfig::load(Some(file.path())).unwrap_err();

    assert_eq!(err.code(), "E802");
    assert!(err.is_config_error());
}

#[test]
fn unknown_types_name_the_file() {
    let file = write_temp("fetch:\n  timeout_secs: soon\n", ".yaml");

    let err = HostConfig::load(Some(file.path())).unwrap_err();

    assert_eq!(err.code(), "E801");
    assert!(err.to_string().contains(&file.path().display().to_string()));
}

#[test]
fn missing_file_is_an_io_error() {
    let err = HostConfig::load(Some(Path::new("/nonexistent/regwatch.yaml"))).unwrap_err();
    assert_eq!(err.code(), "E901");
}

#[test]
fn configured_module_selects_the_wasm_guest() {
    let module = write_temp(MINIMAL_GUEST, ".wat");
    let yaml = format!("guest:\n  module: {}\n", module.path().display());
    let file = write_temp(&yaml, ".yaml");

    let config = HostConfig::load(Some(file.path())).unwrap();
    let guest = AnyGuest::from_config(&config).unwrap();

    assert_eq!(guest.kind(), "wasm");
}

#[tokio::test]
async fn dispatcher_from_defaults_runs_the_native_guest() {
    let mock = Arc::new(
        MockFetch::new()
            .on_get(r"^http://localhost:5000/v2/apps/demo/manifests/latest$")
            .respond(Response::new(200).with_header("docker-content-digest", "sha256:cfg")),
    );
    let fetch: Arc<dyn FetchProvider> = mock.clone();

    let dispatcher = build_dispatcher_with(&HostConfig::default(), fetch).unwrap();
    assert_eq!(dispatcher.guest().lock().kind(), "native");

    let status = dispatcher.check_image("localhost:5000/apps/demo").await.unwrap();
    assert_eq!(status.latest_image.as_deref(), Some("sha256:cfg"));
}

#[test]
fn real_dispatcher_builds_from_defaults() {
    let dispatcher = build_dispatcher(&HostConfig::default()).unwrap();
    assert!(dispatcher.registry().is_empty());
}
