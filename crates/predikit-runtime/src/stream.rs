//! Streamed prediction delivery.
//!
//! A [`PredictionStream`] runs the producing side on a worker thread and
//! hands predictions over a rendezvous channel, so the producer never runs
//! ahead of the consumer. Dropping the stream cancels the producer and
//! joins the worker before returning.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{bounded, Receiver, Sender};

use predikit_core::schemas::Prediction;

/// Producer-side handle used by dispatch workers.
pub(crate) struct StreamEmitter {
    sender: Sender<Prediction>,
    cancelled: Arc<AtomicBool>,
}

impl StreamEmitter {
    /// Deliver one prediction. Returns `false` once the consumer is gone
    /// or the stream is cancelled; producers must stop then.
    pub(crate) fn emit(&self, prediction: Prediction) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return false;
        }
        self.sender.send(prediction).is_ok()
    }

    pub(crate) fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Blocking iterator over the predictions of one streamed dispatch.
pub struct PredictionStream {
    receiver: Option<Receiver<Prediction>>,
    cancelled: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl PredictionStream {
    /// Start a producer on a worker thread.
    pub(crate) fn spawn(produce: impl FnOnce(&StreamEmitter) + Send + 'static) -> Self {
        let (sender, receiver) = bounded(0);
        let cancelled = Arc::new(AtomicBool::new(false));
        let emitter = StreamEmitter {
            sender,
            cancelled: Arc::clone(&cancelled),
        };
        let worker = std::thread::spawn(move || produce(&emitter));
        Self {
            receiver: Some(receiver),
            cancelled,
            worker: Some(worker),
        }
    }

}

impl Iterator for PredictionStream {
    type Item = Prediction;

    fn next(&mut self) -> Option<Prediction> {
        self.receiver.as_ref()?.recv().ok()
    }
}

impl Drop for PredictionStream {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::Release);
        // Disconnect first so a blocked producer wakes up, then join it.
        self.receiver.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn prediction(id: &str) -> Prediction {
        Prediction {
            id: id.into(),
            tag: "@fxn/greeting".into(),
            results: Some(vec![]),
            latency_ms: None,
            error: None,
            logs: None,
        }
    }

    #[test]
    fn yields_predictions_in_order() {
        let stream = PredictionStream::spawn(|emitter| {
            for id in ["p1", "p2", "p3"] {
                if !emitter.emit(prediction(id)) {
                    break;
                }
            }
        });
        let ids: Vec<String> = stream.map(|p| p.id).collect();
        assert_eq!(ids, ["p1", "p2", "p3"]);
    }

    #[test]
    fn dropping_the_stream_stops_the_producer() {
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);
        let mut stream = PredictionStream::spawn(move |emitter| {
            for i in 0..1000 {
                if !emitter.emit(prediction(&format!("p{i}"))) {
                    break;
                }
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        stream.next();
        drop(stream);
        // Drop joins the worker, so the count is final here.
        assert!(delivered.load(Ordering::SeqCst) < 1000);
    }
}
