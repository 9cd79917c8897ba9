//! Bounded-concurrency execution of many roi requests against one slot.
//!
//! [`RoiRequestBatch`] keeps at most `batch_size` requests in flight, drawn
//! lazily from an iterator of rois. Each finished block is handed to the
//! result signal, progress is reported as an integer percentage, and the
//! first failure of any kind stops the batch:
//!
//! - no further rois are admitted,
//! - no further result callbacks run,
//! - requests already in flight finish and their data is discarded.
//!
//! `execute` then returns a single [`EngineError::Batch`] whose source chain
//! ends at the original error.
//!
//! # Example
//!
//! ```ignore
//! let batch = RoiRequestBatch::new(output.clone(), tile(&shape, &[64, 64]), volume)
//!     .batch_size(8);
//! batch.result_signal().subscribe(move |result| {
//!     result.roi.assign(&mut target.lock(), &result.data)?;
//!     Ok(())
//! });
//! batch.execute()?;
//! ```

use crate::error::{EngineError, Result};
use crate::request::Request;
use crate::roi::Roi;
use crate::signal::OrderedSignal;
use crate::slot::Slot;
use crossbeam_channel::{unbounded, Sender, TryRecvError};
use ndarray::ArrayD;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One finished block.
#[derive(Debug, Clone)]
pub struct RoiResult {
    pub roi: Roi,
    pub data: ArrayD<f64>,
}

pub struct RoiRequestBatch<I> {
    target: Slot,
    rois: I,
    total_volume: usize,
    batch_size: usize,
    allow_parallel_results: bool,
    result_signal: Arc<OrderedSignal<RoiResult>>,
    progress_signal: Arc<OrderedSignal<u32>>,
}

#[derive(Default)]
struct Progress {
    processed: usize,
    last: u32,
}

/// State shared between the driving thread and the request jobs.
struct Delivery {
    result_signal: Arc<OrderedSignal<RoiResult>>,
    progress_signal: Arc<OrderedSignal<u32>>,
    allow_parallel_results: bool,
    delivery_lock: Mutex<()>,
    progress: Mutex<Progress>,
    total_volume: usize,
    failed: AtomicBool,
    error: Mutex<Option<EngineError>>,
}

impl Delivery {
    fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Stop admitting rois; the error itself is recorded later.
    fn halt(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }

    /// Record `err` unless an earlier failure already won.
    fn fail(&self, err: EngineError) {
        self.failed.store(true, Ordering::SeqCst);
        let mut slot = self.error.lock();
        if slot.is_none() {
            warn!("RoiRequestBatch failed: {}", err);
            *slot = Some(err);
        }
    }

    /// Hand a finished block to the result signal. A callback or progress
    /// error is recorded before the delivery lock is released, so no later
    /// block reaches the callbacks.
    fn deliver(&self, roi: Roi, data: ArrayD<f64>) {
        if self.has_failed() {
            return;
        }
        let _serialized = (!self.allow_parallel_results).then(|| self.delivery_lock.lock());
        if self.has_failed() {
            return;
        }

        let volume = roi.volume();
        let outcome = self
            .result_signal
            .emit(&RoiResult { roi, data })
            .and_then(|()| self.advance(volume));
        if let Err(err) = outcome {
            self.fail(err);
        }
    }

    /// Add `volume` to the processed total and report the new percentage.
    fn advance(&self, volume: usize) -> Result<()> {
        let mut progress = self.progress.lock();
        progress.processed += volume;
        let percent = if self.total_volume == 0 {
            100
        } else {
            (progress.processed.saturating_mul(100) / self.total_volume).min(100) as u32
        };
        progress.last = progress.last.max(percent);
        self.progress_signal.emit(&progress.last)
    }

    fn report(&self, percent: u32) -> Result<()> {
        let mut progress = self.progress.lock();
        progress.last = percent;
        self.progress_signal.emit(&percent)
    }

    fn last_progress(&self) -> u32 {
        self.progress.lock().last
    }
}

impl<I> RoiRequestBatch<I>
where
    I: Iterator<Item = Roi>,
{
    /// Batch over `rois` of `target`; `total_volume` is the summed volume of
    /// all rois and drives the progress percentage.
    pub fn new(target: Slot, rois: impl IntoIterator<IntoIter = I>, total_volume: usize) -> Self {
        let batch_size = target.graph().config().default_batch_size;
        Self {
            target,
            rois: rois.into_iter(),
            total_volume,
            batch_size,
            allow_parallel_results: false,
            result_signal: Arc::new(OrderedSignal::new()),
            progress_signal: Arc::new(OrderedSignal::new()),
        }
    }

    /// Maximum number of requests in flight. Zero is raised to one.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        if batch_size == 0 {
            warn!("RoiRequestBatch batch_size 0 raised to 1");
        }
        self.batch_size = batch_size.max(1);
        self
    }

    /// Let result callbacks run concurrently instead of one at a time.
    pub fn allow_parallel_results(mut self, allow: bool) -> Self {
        self.allow_parallel_results = allow;
        self
    }

    /// Called once per finished roi with its data.
    pub fn result_signal(&self) -> &OrderedSignal<RoiResult> {
        &self.result_signal
    }

    /// Called with the completion percentage: 0 first, 100 last.
    pub fn progress_signal(&self) -> &OrderedSignal<u32> {
        &self.progress_signal
    }

    /// Run the batch to completion, blocking the calling thread.
    pub fn execute(self) -> Result<()> {
        info!(
            "Starting RoiRequestBatch on {} (batch size {}, total volume {})",
            self.target.display_name(),
            self.batch_size,
            self.total_volume
        );

        let delivery = Arc::new(Delivery {
            result_signal: self.result_signal.clone(),
            progress_signal: self.progress_signal.clone(),
            allow_parallel_results: self.allow_parallel_results,
            delivery_lock: Mutex::new(()),
            progress: Mutex::new(Progress::default()),
            total_volume: self.total_volume,
            failed: AtomicBool::new(false),
            error: Mutex::new(None),
        });

        delivery.report(0).map_err(|e| batch_error(0, e))?;

        let (done_tx, done_rx) = unbounded::<()>();
        let mut rois = self.rois;
        let mut in_flight: Vec<Request<()>> = Vec::with_capacity(self.batch_size);
        let mut outstanding = 0usize;
        let mut completed = 0usize;

        while outstanding < self.batch_size {
            let Some(roi) = rois.next() else { break };
            in_flight.push(issue(&self.target, roi, &delivery, &done_tx));
            outstanding += 1;
        }

        while outstanding > 0 {
            match done_rx.try_recv() {
                Ok(()) => {}
                Err(TryRecvError::Empty) => {
                    // Run a queued request here instead of blocking, so a batch
                    // driven from a pool worker cannot starve the pool.
                    if let Some(pos) = in_flight.iter().position(Request::is_pending) {
                        reap(in_flight.remove(pos), &delivery);
                        continue;
                    }
                    if done_rx.recv().is_err() {
                        delivery.fail(EngineError::WorkerPool(
                            "request completion channel closed".to_string(),
                        ));
                        break;
                    }
                }
                Err(TryRecvError::Disconnected) => {
                    delivery.fail(EngineError::WorkerPool(
                        "request completion channel closed".to_string(),
                    ));
                    break;
                }
            }
            outstanding -= 1;
            completed += 1;

            let (finished, running): (Vec<_>, Vec<_>) =
                in_flight.drain(..).partition(Request::is_finished);
            in_flight = running;
            for request in finished {
                reap(request, &delivery);
            }

            if delivery.has_failed() {
                continue;
            }
            if let Some(roi) = rois.next() {
                in_flight.push(issue(&self.target, roi, &delivery, &done_tx));
                outstanding += 1;
            }
        }

        // Requests whose completion was already counted may still be
        // publishing their result.
        for request in in_flight {
            reap(request, &delivery);
        }

        if let Some(err) = delivery.error.lock().take() {
            return Err(batch_error(completed, err));
        }
        if delivery.has_failed() {
            return Err(batch_error(
                completed,
                EngineError::WorkerPool("request failed without an error".to_string()),
            ));
        }

        if delivery.last_progress() != 100 {
            delivery.report(100).map_err(|e| batch_error(completed, e))?;
        }
        info!("RoiRequestBatch finished {} requests", completed);
        Ok(())
    }
}

/// Submit the request for `roi`; its completion is signalled on `done`.
///
/// Errors from computing or delivering the block are recorded on `delivery`
/// inside the job, so the request itself only fails when the job panics.
/// That failure is picked up by [`reap`].
fn issue(target: &Slot, roi: Roi, delivery: &Arc<Delivery>, done: &Sender<()>) -> Request<()> {
    debug!("Issuing request for {:?}", roi);
    let slot = target.clone();
    let d = delivery.clone();
    let on_panic = delivery.clone();
    let finished = done.clone();
    let failed = done.clone();

    Request::new(move || {
        if d.has_failed() {
            return Ok(());
        }
        match slot.get(&roi) {
            Ok(data) => d.deliver(roi, data),
            Err(err) => d.fail(err),
        }
        Ok(())
    })
    .notify_finished(move |_| {
        let _ = finished.send(());
    })
    .notify_failed(move |_| {
        on_panic.halt();
        let _ = failed.send(());
    })
    .submit(target.graph().pool())
}

/// Wait for `request`, running it here if no worker picked it up, and move
/// its error into `delivery`.
fn reap(request: Request<()>, delivery: &Delivery) {
    if let Err(err) = request.wait() {
        delivery.fail(err);
    }
}

fn batch_error(completed: usize, source: EngineError) -> EngineError {
    EngineError::Batch {
        completed,
        source: Box::new(source),
    }
}
