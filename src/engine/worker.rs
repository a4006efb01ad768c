use super::arbiter::DecodeArbiter;
use crate::metrics::Metrics;
use crate::models::{DecodedImage, Request, RequestId};
use crate::services::DecodeError;
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

/// Outcome of one decode, as published by the worker
#[derive(Debug)]
pub(crate) struct Published {
    pub id: RequestId,
    pub outcome: Result<DecodedImage, DecodeError>,
    pub elapsed: Duration,
}

/// State shared between an engine and its worker, behind one mutex
#[derive(Debug, Default)]
pub(crate) struct SharedCell {
    /// Set by the worker, taken by the engine
    pub finished: Option<Published>,
    pub progress: Option<(RequestId, f32)>,
}

pub(crate) type Shared = Arc<Mutex<SharedCell>>;

/// Lock the cell. A panic while holding it cannot leave it half-written,
/// so poisoning is ignored.
pub(crate) fn lock(shared: &Mutex<SharedCell>) -> MutexGuard<'_, SharedCell> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owning handle to an engine's worker thread
pub(crate) struct WorkerHandle {
    tx: mpsc::Sender<Request>,
    exit: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn spawn(
        name: String,
        stack_size: usize,
        arbiter: DecodeArbiter,
        shared: Shared,
        completion: watch::Sender<u64>,
        metrics: Arc<Metrics>,
    ) -> io::Result<Self> {
        // Depth 1: the engine never submits while a request is in flight
        let (tx, rx) = mpsc::channel(1);
        let exit = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            rx,
            exit: Arc::clone(&exit),
            arbiter,
            shared,
            completion,
            metrics,
        };

        let thread = thread::Builder::new()
            .name(name)
            .stack_size(stack_size)
            .spawn(move || worker.run())?;

        Ok(Self { tx, exit, thread })
    }

    /// Hand a request to the worker. Gives the request back if the worker
    /// is gone or still holds an earlier one.
    pub fn submit(&self, request: Request) -> Result<(), Request> {
        self.tx.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(request) => request,
            mpsc::error::TrySendError::Closed(request) => request,
        })
    }

    /// Stop the worker and wait for it. A decode in progress runs to completion first.
    pub fn shutdown(self) -> Result<(), String> {
        let WorkerHandle { tx, exit, thread } = self;
        exit.store(true, Ordering::Release);
        drop(tx);
        thread.join().map_err(panic_message)
    }
}

struct Worker {
    rx: mpsc::Receiver<Request>,
    exit: Arc<AtomicBool>,
    arbiter: DecodeArbiter,
    shared: Shared,
    completion: watch::Sender<u64>,
    metrics: Arc<Metrics>,
}

impl Worker {
    fn run(mut self) {
        tracing::debug!("Decode worker started");

        while let Some(request) = self.rx.blocking_recv() {
            if self.exit.load(Ordering::Acquire) {
                break;
            }
            self.process(request);
        }

        tracing::debug!("Decode worker exiting");
    }

    fn process(&self, request: Request) {
        let id = request.id;
        let as_animation = request.as_animation;
        let progress_cell = Arc::clone(&self.shared);
        let mut report = move |fraction: f32| {
            lock(&progress_cell).progress = Some((id, fraction.clamp(0.0, 1.0)));
        };

        tracing::debug!("Decoding {} ({}) with {}", id, request.path, request.decoder.name());

        let ((result, elapsed), waited) = self.arbiter.run(|| {
            let started = Instant::now();
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                request.decoder.decode(&request, &mut report)
            }));
            (result, started.elapsed())
        });

        let outcome = match result {
            Ok(decoded) => {
                decoded.and_then(|image| image.normalize(as_animation).ok_or(DecodeError::Empty))
            }
            Err(payload) => {
                let message = panic_message(payload);
                tracing::error!("Decoder panicked on {}: {}", id, message);
                Err(DecodeError::Panicked(message))
            }
        };

        self.metrics.record_arbiter_wait(waited);
        self.metrics.record_decode_time(elapsed);
        match &outcome {
            Ok(_) => self.metrics.record_decode_succeeded(),
            Err(e) => {
                tracing::debug!("Decode of {} failed: {}", id, e);
                self.metrics.record_decode_failed();
            }
        }

        lock(&self.shared).finished = Some(Published {
            id,
            outcome,
            elapsed,
        });
        self.completion.send_modify(|generation| *generation += 1);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DecodeOptions, SourceRef};
    use crate::services::Decoder;
    use camino::Utf8PathBuf;
    use image::{Rgba, RgbaImage};

    fn request(id: u64, decoder: Arc<dyn Decoder>) -> Request {
        Request {
            id: RequestId(id),
            source: SourceRef::from("test.png"),
            path: Utf8PathBuf::from("test.png"),
            size: 0,
            options: DecodeOptions::default(),
            as_animation: false,
            decoder,
        }
    }

    fn spawn_worker() -> (WorkerHandle, Shared, watch::Receiver<u64>, Arc<Metrics>) {
        let shared = Shared::default();
        let (completion, completion_rx) = watch::channel(0);
        let metrics = Arc::new(Metrics::new());
        let handle = WorkerHandle::spawn(
            "imgload-worker-test".to_string(),
            512 * 1024,
            DecodeArbiter::new(),
            Arc::clone(&shared),
            completion,
            Arc::clone(&metrics),
        )
        .unwrap();
        (handle, shared, completion_rx, metrics)
    }

    fn wait_for_publish(shared: &Shared) -> Published {
        for _ in 0..500 {
            if let Some(published) = lock(shared).finished.take() {
                return published;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("worker never published");
    }

    #[test]
    fn test_worker_publishes_result() {
        let (handle, shared, completion_rx, metrics) = spawn_worker();
        let decoder: Arc<dyn Decoder> = Arc::new(|_: &Request| -> Result<DecodedImage, DecodeError> {
            Ok(DecodedImage::from_rgba(RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255]))))
        });

        assert!(handle.submit(request(1, decoder)).is_ok());
        let published = wait_for_publish(&shared);

        assert_eq!(published.id, RequestId(1));
        assert!(published.outcome.is_ok());
        assert_eq!(*completion_rx.borrow(), 1);
        assert_eq!(metrics.decodes_succeeded.load(Ordering::Relaxed), 1);
        assert!(handle.shutdown().is_ok());
    }

    #[test]
    fn test_decoder_panic_is_trapped() {
        let (handle, shared, _completion_rx, _metrics) = spawn_worker();
        let decoder: Arc<dyn Decoder> = Arc::new(|_: &Request| -> Result<DecodedImage, DecodeError> {
            panic!("corrupt stream")
        });

        assert!(handle.submit(request(7, decoder)).is_ok());
        let published = wait_for_publish(&shared);

        match published.outcome {
            Err(DecodeError::Panicked(message)) => assert!(message.contains("corrupt stream")),
            other => panic!("Expected Panicked, got: {:?}", other),
        }
        // The worker survives and shuts down cleanly
        assert!(handle.shutdown().is_ok());
    }

    #[test]
    fn test_shutdown_of_idle_worker() {
        let (handle, _shared, _completion_rx, _metrics) = spawn_worker();
        assert!(handle.shutdown().is_ok());
    }

    #[test]
    fn test_panic_message_payloads() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(42)), "unknown panic payload");
    }
}
