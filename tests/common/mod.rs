//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use lazyslot::{EngineConfig, Graph};
use ndarray::{ArrayD, IxDyn};
use std::time::Duration;

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Graph with a small worker pool, cheap enough to build per test case
pub fn test_graph() -> Graph {
    Graph::with_config(&EngineConfig {
        worker_threads: 2,
        ..Default::default()
    })
}

/// Array whose elements are their row-major index
pub fn ramp(shape: &[usize]) -> ArrayD<f64> {
    let len: usize = shape.iter().product();
    ArrayD::from_shape_vec(IxDyn(shape), (0..len).map(|v| v as f64).collect())
        .expect("shape matches element count")
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}
