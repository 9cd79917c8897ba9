//! lazyslot demo
//!
//! Builds a small graph (a pass-through operator feeding a wrapped
//! pass-through with two lanes), then pulls a synthetic 100x100 array through
//! lane 0 in 10x10 blocks with a RoiRequestBatch and checks the result.

use anyhow::{bail, Context};
use lazyslot::{
    config::EngineConfig, operators::OpArrayPiper, roi, Graph, OperatorWrapper,
    RoiRequestBatch, WrapperConfig,
};
use ndarray::{ArrayD, IxDyn};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SHAPE: [usize; 2] = [100, 100];
const BLOCK: [usize; 2] = [10, 10];

fn main() -> anyhow::Result<()> {
    let config = EngineConfig::load_or_default();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting lazyslot demo");

    let graph = Graph::with_config(&config);
    let source = graph.instantiate(OpArrayPiper::new())?;
    let wrapped = graph.instantiate(OperatorWrapper::new(
        OpArrayPiper::new,
        WrapperConfig::default(),
    )?)?;

    let data = ArrayD::from_shape_fn(IxDyn(&SHAPE), |ix| (ix[0] * SHAPE[1] + ix[1]) as f64);
    source.input("Input")?.set_value(data.clone())?;

    let lanes = wrapped.input("Input")?;
    lanes.resize(2)?;
    lanes.at(0)?.connect(&source.output("Output")?)?;
    lanes.at(1)?.set_value(ArrayD::<f64>::zeros(IxDyn(&SHAPE)))?;

    let output = wrapped.output("Output")?.at(0)?;
    let rois = roi::tile(&SHAPE, &BLOCK);
    let blocks = rois.len();
    let total: usize = SHAPE.iter().product();

    let result = Arc::new(Mutex::new(ArrayD::<f64>::zeros(IxDyn(&SHAPE))));
    let batch = RoiRequestBatch::new(output, rois, total).batch_size(config.default_batch_size);

    let target = result.clone();
    batch.result_signal().subscribe(move |block| {
        block.roi.assign(&mut target.lock(), &block.data)?;
        Ok(())
    });
    batch.progress_signal().subscribe(|percent| {
        tracing::info!("Progress: {}%", percent);
        Ok(())
    });

    batch.execute().context("Batch over lane 0 failed")?;

    if *result.lock() != data {
        bail!("Reassembled array does not match the source");
    }
    tracing::info!(
        "Reassembled {}x{} array from {} blocks",
        SHAPE[0],
        SHAPE[1],
        blocks
    );

    wrapped.cleanup()?;
    source.cleanup()?;
    tracing::info!("Shutting down...");
    Ok(())
}
