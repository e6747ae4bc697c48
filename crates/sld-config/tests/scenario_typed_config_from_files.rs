//! Typed config built from layered files on disk.

use std::io::Write;

use sld_config::{load_layered_yaml, AppConfig};

fn write_layer(dir: &tempfile::TempDir, name: &str, body: &str) -> String {
    let path = dir.path().join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(body.as_bytes()).unwrap();
    path.to_string_lossy().into_owned()
}

#[test]
fn layers_on_disk_build_typed_config_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let base = write_layer(
        &dir,
        "base.yaml",
        "price_stream:\n  url: \"ws://feed/prices\"\nexecution:\n  max_attempts: 7\n",
    );
    let local = write_layer(&dir, "local.yaml", "daemon:\n  addr: \"127.0.0.1:18080\"\n");

    let loaded = load_layered_yaml(&[base.as_str(), local.as_str()]).unwrap();
    let cfg = AppConfig::from_loaded(&loaded).unwrap();
    cfg.validate().unwrap();

    assert_eq!(cfg.price_stream.require_url().unwrap(), "ws://feed/prices");
    assert_eq!(cfg.execution.max_attempts, 7);
    // Untouched keys keep their defaults.
    assert_eq!(cfg.execution.initial_interval_ms, 5_000);
    assert_eq!(cfg.price_stream.queue_capacity, 1024);
    assert_eq!(cfg.daemon.addr, "127.0.0.1:18080");
}

#[test]
fn missing_layer_file_is_an_error() {
    let err = load_layered_yaml(&["/definitely/not/here.yaml"]).unwrap_err();
    assert!(err.to_string().contains("failed to read yaml path"));
}

#[test]
fn wrong_type_fails_schema() {
    let dir = tempfile::tempdir().unwrap();
    let bad = write_layer(&dir, "bad.yaml", "execution:\n  max_attempts: \"many\"\n");
    let loaded = load_layered_yaml(&[bad.as_str()]).unwrap();
    assert!(AppConfig::from_loaded(&loaded).is_err());
}
