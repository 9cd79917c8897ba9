//! EngineConfig persistence

mod common;

use lazyslot::{EngineConfig, EngineError, Graph, RoiRequestBatch};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_save_and_load_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("engine.toml");
    let config = EngineConfig {
        worker_threads: 3,
        default_batch_size: 7,
        log_filter: "warn".to_string(),
    };

    config.save(&path).unwrap();
    assert!(path.exists());
    assert_eq!(EngineConfig::load(&path).unwrap(), config);
}

#[test]
fn test_invalid_toml_is_reported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("engine.toml");
    fs::write(&path, "worker_threads = \"many\"").unwrap();

    assert!(matches!(EngineConfig::load(&path), Err(EngineError::Toml(_))));
}

#[test]
fn test_zero_values_are_rejected_on_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("engine.toml");
    fs::write(&path, "worker_threads = 2\ndefault_batch_size = 0\n").unwrap();

    assert!(matches!(EngineConfig::load(&path), Err(EngineError::Config(_))));
}

#[test]
fn test_missing_file_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    let err = EngineConfig::load(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}

#[test]
fn test_graph_uses_configured_batch_size() {
    let config = EngineConfig {
        worker_threads: 1,
        default_batch_size: 3,
        ..Default::default()
    };
    let graph = Graph::with_config(&config);
    let source = common::builders::SourceBuilder::new(&[6]).build(&graph).unwrap();
    let output = source.output("Output").unwrap();

    let delivered = Arc::new(AtomicUsize::new(0));
    let batch = RoiRequestBatch::new(output, lazyslot::roi::tile(&[6], &[1]), 6);
    let counter = delivered.clone();
    batch.result_signal().subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    batch.execute().unwrap();
    assert_eq!(delivered.load(Ordering::SeqCst), 6);
    assert_eq!(graph.config().default_batch_size, 3);
}
