//! Engine module - Per-source loader driving a background decode worker.
//!
//! An [`Engine`] owns one worker thread and a small state machine. The owner
//! calls [`Engine::start`] and [`Engine::stop`] from its own context; the
//! worker decodes in the background under the shared [`DecodeArbiter`]; and
//! [`Engine::poll`] (or [`Engine::settle`]) observes completions and turns
//! them into state changes and [`LoaderEvent`]s. Events and stop callbacks
//! are only ever produced from the owner's calls, never from the worker.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──start──▶ Starting ──poll: resolved──▶ Loading ──poll: decoded──▶ Done | Failed
//!                    │                           │
//!                    └─poll: unresolvable─▶ Failed
//!                                                └─stop / start──▶ Interrupting ──poll──▶ Idle | Failed | Starting
//! ```
//!
//! A request that is stopped or superseded while the worker holds it keeps
//! decoding; its result is discarded when it comes back.

pub mod arbiter;
pub mod events;
pub mod state;
mod worker;

pub use arbiter::DecodeArbiter;
pub use events::{LoadError, LoaderEvent};
pub use state::{DoneCallback, EngineStatus, Tick};

use crate::metrics::Metrics;
use crate::models::{
    Animation, DecodeOptions, DecodedImage, EngineConfig, Frame, Request, RequestId, SourceRef,
};
use crate::services::{Decoder, LocalResolver, SourceResolver, StillImageDecoder};
use state::{AfterInterrupt, InFlight, Interruption, LoadTimer, PendingRequest, Phase};
use std::fmt;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use worker::{Published, Shared, WorkerHandle, lock};

static NEXT_ENGINE: AtomicU64 = AtomicU64::new(1);

/// Errors returned by engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("No source set")]
    NoSource,

    #[error("A request is in flight")]
    Busy,

    #[error("Failed to spawn decode worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    #[error("Decode worker panicked: {0}")]
    WorkerPanicked(String),
}

/// Runtime form of [`EngineConfig`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub poll_interval: Duration,
    pub worker_stack_size: usize,
    pub event_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            worker_stack_size: config.worker_stack_size.max(64 * 1024),
            event_capacity: config.event_capacity.max(1),
        }
    }
}

/// A successfully loaded image and where it came from
#[derive(Debug, Clone)]
pub struct LoadResult {
    pub request: RequestId,
    pub source: SourceRef,
    pub image: DecodedImage,
    /// Time spent inside the decode function; zero for adopted images
    pub decode_time: Duration,
}

/// Builder for [`Engine`]
pub struct EngineBuilder {
    arbiter: DecodeArbiter,
    settings: EngineSettings,
    decoder: Option<Arc<dyn Decoder>>,
    resolver: Option<Arc<dyn SourceResolver>>,
    metrics: Option<Arc<Metrics>>,
    source: Option<SourceRef>,
    options: DecodeOptions,
    as_animation: bool,
}

impl EngineBuilder {
    pub fn config(mut self, config: &EngineConfig) -> Self {
        self.settings = EngineSettings::from(config);
        self
    }

    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn decoder(mut self, decoder: Arc<dyn Decoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn SourceResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn source(mut self, source: impl Into<SourceRef>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn options(mut self, options: DecodeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn as_animation(mut self, as_animation: bool) -> Self {
        self.as_animation = as_animation;
        self
    }

    /// Spawn the worker and return the idle engine
    pub fn build(self) -> Result<Engine, EngineError> {
        let serial = NEXT_ENGINE.fetch_add(1, Ordering::Relaxed);
        let name = format!("engine-{}", serial);
        let metrics = self.metrics.unwrap_or_default();
        let shared = Shared::default();
        let (completion_tx, completion_rx) = watch::channel(0);
        let (events, _) = broadcast::channel(self.settings.event_capacity);

        let worker = WorkerHandle::spawn(
            format!("imgload-worker-{}", serial),
            self.settings.worker_stack_size,
            self.arbiter,
            Arc::clone(&shared),
            completion_tx,
            Arc::clone(&metrics),
        )
        .map_err(EngineError::WorkerSpawn)?;

        tracing::debug!("Created {} with worker imgload-worker-{}", name, serial);

        Ok(Engine {
            name,
            source: self.source,
            options: self.options,
            as_animation: self.as_animation,
            decoder: self
                .decoder
                .unwrap_or_else(|| Arc::new(StillImageDecoder::new())),
            resolver: self.resolver.unwrap_or_else(|| Arc::new(LocalResolver::new())),
            phase: Phase::Idle,
            armed: false,
            result: None,
            next_request: 1,
            timer: LoadTimer::default(),
            progress: 0.0,
            events,
            shared,
            completion_rx,
            worker: Some(worker),
            poll_interval: self.settings.poll_interval,
            metrics,
        })
    }
}

/// Asynchronous loader for one image source at a time.
///
/// Every method is non-blocking except [`Engine::shutdown`] and dropping the
/// engine, which wait for a decode in progress. Stop callbacks are not
/// `Send`, so an engine stays on the thread that created it.
pub struct Engine {
    name: String,
    source: Option<SourceRef>,
    options: DecodeOptions,
    as_animation: bool,
    decoder: Arc<dyn Decoder>,
    resolver: Arc<dyn SourceResolver>,
    phase: Phase,
    /// Whether `poll` has anything to observe
    armed: bool,
    result: Option<LoadResult>,
    next_request: u64,
    timer: LoadTimer,
    progress: f32,
    events: broadcast::Sender<LoaderEvent>,
    shared: Shared,
    completion_rx: watch::Receiver<u64>,
    worker: Option<WorkerHandle>,
    poll_interval: Duration,
    metrics: Arc<Metrics>,
}

impl Engine {
    /// Engine with default settings, decoding still images from local files
    pub fn new(arbiter: DecodeArbiter) -> Result<Self, EngineError> {
        Self::builder(arbiter).build()
    }

    pub fn builder(arbiter: DecodeArbiter) -> EngineBuilder {
        EngineBuilder {
            arbiter,
            settings: EngineSettings::default(),
            decoder: None,
            resolver: None,
            metrics: None,
            source: None,
            options: DecodeOptions::default(),
            as_animation: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // Configuration. Changes apply to the next `start`, never to a request in flight.

    pub fn set_source(&mut self, source: impl Into<SourceRef>) {
        self.source = Some(source.into());
    }

    pub fn source(&self) -> Option<&SourceRef> {
        self.source.as_ref()
    }

    pub fn set_decode_function(&mut self, decoder: Arc<dyn Decoder>) {
        tracing::debug!("{}: decode function set to {}", self.name, decoder.name());
        self.decoder = decoder;
    }

    pub fn set_decoder(&mut self, decoder: Arc<dyn Decoder>) {
        self.set_decode_function(decoder);
    }

    pub fn decoder(&self) -> &Arc<dyn Decoder> {
        &self.decoder
    }

    pub fn set_resolver(&mut self, resolver: Arc<dyn SourceResolver>) {
        self.resolver = resolver;
    }

    pub fn set_options(&mut self, options: DecodeOptions) {
        self.options = options;
    }

    pub fn options(&self) -> DecodeOptions {
        self.options
    }

    pub fn set_as_animation(&mut self, as_animation: bool) {
        self.as_animation = as_animation;
    }

    pub fn is_animation_requested(&self) -> bool {
        self.as_animation
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LoaderEvent> {
        self.events.subscribe()
    }

    // Operations

    /// Begin loading the current source.
    ///
    /// Returns at once. A request still pending is replaced; a request the
    /// worker holds is interrupted and this one follows it. The source is
    /// resolved on the next [`poll`](Self::poll).
    pub fn start(&mut self) -> Result<RequestId, EngineError> {
        let source = self.source.clone().ok_or(EngineError::NoSource)?;
        let id = self.allocate_id();

        let pending = PendingRequest {
            id,
            source,
            options: self.options,
            as_animation: self.as_animation,
            decoder: Arc::clone(&self.decoder),
        };

        self.metrics.record_request_started();
        self.timer.restart();
        self.progress = 0.0;

        self.phase = match mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Loading(in_flight) => {
                tracing::debug!("{}: {} supersedes in-flight {}", self.name, id, in_flight.id);
                Phase::Interrupting(Interruption {
                    in_flight,
                    callbacks: Vec::new(),
                    then: AfterInterrupt::Restart(pending),
                })
            }
            Phase::Interrupting(mut interruption) => {
                tracing::debug!(
                    "{}: {} queued behind interrupted {}",
                    self.name,
                    id,
                    interruption.in_flight.id
                );
                interruption.then = AfterInterrupt::Restart(pending);
                Phase::Interrupting(interruption)
            }
            Phase::Starting(replaced) => {
                tracing::debug!("{}: {} replaces pending {}", self.name, id, replaced.id);
                Phase::Starting(pending)
            }
            Phase::Idle | Phase::Done | Phase::Failed(_) => Phase::Starting(pending),
        };
        self.armed = true;

        tracing::debug!("{}: start {} -> {:?}", self.name, id, self.phase);
        Ok(id)
    }

    /// Stop loading and call `done` once the engine has settled.
    ///
    /// With nothing in flight `done` runs before this returns. Otherwise it
    /// runs from the `poll` that observes the interrupted decode, and any
    /// queued restart is cancelled.
    pub fn stop(&mut self, done: impl FnOnce() + 'static) {
        self.stop_common(Box::new(done), false);
    }

    /// Like [`stop`](Self::stop), but the engine ends in
    /// `Failed(LoadError::Stopped)` and emits one error event.
    pub fn stop_with_error(&mut self, done: impl FnOnce() + 'static) {
        self.stop_common(Box::new(done), true);
    }

    fn stop_common(&mut self, done: DoneCallback, force_error: bool) {
        match mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Loading(in_flight) => {
                tracing::debug!("{}: interrupting {}", self.name, in_flight.id);
                self.phase = Phase::Interrupting(Interruption {
                    in_flight,
                    callbacks: vec![done],
                    then: if force_error {
                        AfterInterrupt::Fail
                    } else {
                        AfterInterrupt::Settle
                    },
                });
            }
            Phase::Interrupting(mut interruption) => {
                interruption.callbacks.push(done);
                interruption.then = match interruption.then {
                    AfterInterrupt::Fail => AfterInterrupt::Fail,
                    _ if force_error => AfterInterrupt::Fail,
                    _ => AfterInterrupt::Settle,
                };
                self.phase = Phase::Interrupting(interruption);
            }
            Phase::Starting(pending) => {
                tracing::debug!("{}: dropping unsubmitted {}", self.name, pending.id);
                self.armed = false;
                self.timer.stop();
                if force_error {
                    self.enter_failed(LoadError::Stopped);
                }
                done();
                if force_error {
                    self.emit_error(Some(pending.id), Some(pending.source), LoadError::Stopped);
                }
            }
            settled => {
                self.phase = settled;
                self.timer.stop();
                if force_error {
                    self.enter_failed(LoadError::Stopped);
                }
                done();
                if force_error {
                    self.emit_error(None, self.source.clone(), LoadError::Stopped);
                }
            }
        }
    }

    /// One completion-poller tick. Never blocks.
    ///
    /// Resolves and submits a pending request, observes a finished decode,
    /// runs stop callbacks and emits events. Returns [`Tick::Settled`] once
    /// there is nothing left to observe, and keeps returning it until the
    /// next `start`.
    pub fn poll(&mut self) -> Tick {
        if !self.armed {
            return Tick::Settled;
        }

        self.collect_completion();
        self.submit_pending();
        self.report_progress();

        if self.phase.status().is_active() {
            Tick::Pending
        } else {
            self.armed = false;
            Tick::Settled
        }
    }

    /// Drive [`poll`](Self::poll) until the engine settles.
    ///
    /// Ticks on the configured poll interval and wakes early when the worker
    /// publishes a result.
    pub async fn settle(&mut self) -> EngineStatus {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.poll() == Tick::Pending {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = self.completion_rx.changed() => {
                    if changed.is_err() {
                        // Worker gone; fall back to the timer
                        ticker.tick().await;
                    }
                }
            }
        }

        self.status()
    }

    /// Adopt the result of another engine without decoding again.
    ///
    /// Emits `Done`, or an `Error` with [`LoadError::Empty`] when the other
    /// engine has no image. A pending, unsubmitted request is dropped.
    pub fn load_from_engine(&mut self, other: &Engine) -> Result<(), EngineError> {
        self.prepare_adoption()?;
        let id = self.allocate_id();

        match &other.result {
            Some(result) => {
                self.source = Some(result.source.clone());
                self.adopt(LoadResult {
                    request: id,
                    source: result.source.clone(),
                    image: result.image.clone(),
                    decode_time: result.decode_time,
                });
            }
            None => {
                tracing::warn!("{}: {} has no image to share", self.name, other.name);
                self.source = other.source.clone();
                self.fail(Some(id), other.source.clone(), LoadError::Empty);
            }
        }
        Ok(())
    }

    /// Adopt an image decoded elsewhere and emit `Done`
    pub fn load_from_decoded(
        &mut self,
        source: impl Into<SourceRef>,
        image: DecodedImage,
    ) -> Result<RequestId, EngineError> {
        self.prepare_adoption()?;
        let id = self.allocate_id();
        let source = source.into();
        self.source = Some(source.clone());
        self.adopt(LoadResult {
            request: id,
            source,
            image,
            decode_time: Duration::ZERO,
        });
        Ok(id)
    }

    /// Stop the worker, run any stop callbacks still waiting and report a
    /// worker that died by panicking.
    pub fn shutdown(mut self) -> Result<(), EngineError> {
        self.teardown()
    }

    // Queries

    pub fn status(&self) -> EngineStatus {
        self.phase.status()
    }

    pub fn is_done(&self) -> bool {
        matches!(self.phase, Phase::Done)
    }

    pub fn is_loading(&self) -> bool {
        self.phase.status().is_active()
    }

    /// The request the engine is working on
    pub fn request_id(&self) -> Option<RequestId> {
        self.phase.request_id()
    }

    pub fn result(&self) -> Option<&LoadResult> {
        self.result.as_ref()
    }

    pub fn get_result(&self) -> Option<&DecodedImage> {
        self.result.as_ref().map(|r| &r.image)
    }

    /// The loaded still image, or the first frame of a loaded animation
    pub fn image(&self) -> Option<&Frame> {
        self.get_result().and_then(DecodedImage::static_image)
    }

    pub fn animation(&self) -> Option<&Animation> {
        self.get_result().and_then(DecodedImage::animation)
    }

    /// Size of the loaded image before it was scaled to `max_size` or to a
    /// thumbnail
    pub fn original_size(&self) -> Option<(u32, u32)> {
        self.get_result().and_then(DecodedImage::original_size)
    }

    pub fn last_error(&self) -> Option<&LoadError> {
        match &self.phase {
            Phase::Failed(error) => Some(error),
            _ => None,
        }
    }

    /// Progress of the current load, `0.0..=1.0`
    pub fn percent(&self) -> f32 {
        self.progress
    }

    /// Time since the last `start`, frozen when the load settled
    pub fn elapsed(&self) -> Duration {
        self.timer.elapsed()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    // Poller internals

    fn allocate_id(&mut self) -> RequestId {
        let id = RequestId(self.next_request);
        self.next_request += 1;
        id
    }

    fn collect_completion(&mut self) {
        let Some(expected) = self.phase.in_flight_id() else {
            return;
        };

        let published = {
            let mut cell = lock(&self.shared);
            match cell.finished.take() {
                Some(published) if published.id == expected => published,
                Some(stale) => {
                    tracing::warn!(
                        "{}: dropping stale result for {} (expected {})",
                        self.name,
                        stale.id,
                        expected
                    );
                    return;
                }
                None => return,
            }
        };

        match mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Loading(in_flight) => self.deliver(in_flight, published),
            Phase::Interrupting(interruption) => self.finish_interruption(interruption, published),
            other => self.phase = other,
        }
    }

    fn deliver(&mut self, in_flight: InFlight, published: Published) {
        self.timer.stop();
        match published.outcome {
            Ok(image) => {
                tracing::info!(
                    "{}: loaded {} ({}) in {:?}",
                    self.name,
                    in_flight.source,
                    in_flight.id,
                    published.elapsed
                );
                self.phase = Phase::Done;
                self.progress = 1.0;
                self.result = Some(LoadResult {
                    request: in_flight.id,
                    source: in_flight.source.clone(),
                    image,
                    decode_time: published.elapsed,
                });
                self.emit(LoaderEvent::Done {
                    request: in_flight.id,
                    source: in_flight.source,
                });
            }
            Err(e) => {
                let error = LoadError::DecodeFailed(Arc::new(e));
                self.fail(Some(in_flight.id), Some(in_flight.source), error);
            }
        }
    }

    fn finish_interruption(&mut self, interruption: Interruption, published: Published) {
        let Interruption {
            in_flight,
            callbacks,
            then,
        } = interruption;

        tracing::debug!(
            "{}: discarding {} result of interrupted {}",
            self.name,
            if published.outcome.is_ok() { "decoded" } else { "failed" },
            in_flight.id
        );
        self.metrics.record_result_discarded();
        drop(published);

        let failed = match then {
            AfterInterrupt::Settle => {
                self.timer.stop();
                self.phase = Phase::Idle;
                false
            }
            AfterInterrupt::Fail => {
                self.timer.stop();
                self.enter_failed(LoadError::Stopped);
                true
            }
            AfterInterrupt::Restart(pending) => {
                self.phase = Phase::Starting(pending);
                false
            }
        };

        for callback in callbacks {
            callback();
        }

        if failed {
            self.emit_error(Some(in_flight.id), Some(in_flight.source), LoadError::Stopped);
        }
    }

    fn submit_pending(&mut self) {
        let pending = match mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Starting(pending) => pending,
            other => {
                self.phase = other;
                return;
            }
        };

        let resolved = match self.resolver.resolve(&pending.source) {
            Ok(resolved) => resolved,
            Err(e) => {
                self.metrics.record_source_unavailable();
                let error = LoadError::SourceUnavailable {
                    uri: pending.source.to_string(),
                    reason: Arc::new(e),
                };
                self.fail(Some(pending.id), Some(pending.source), error);
                return;
            }
        };

        let request = Request {
            id: pending.id,
            source: pending.source.clone(),
            path: resolved.path,
            size: resolved.size,
            options: pending.options,
            as_animation: pending.as_animation,
            decoder: pending.decoder,
        };

        self.result = None;
        lock(&self.shared).progress = None;

        let submitted = match &self.worker {
            Some(worker) => worker.submit(request).is_ok(),
            None => false,
        };

        if submitted {
            tracing::debug!("{}: submitted {} ({})", self.name, pending.id, pending.source);
            self.phase = Phase::Loading(InFlight {
                id: pending.id,
                source: pending.source,
            });
        } else {
            tracing::error!("{}: worker refused {}", self.name, pending.id);
            self.fail(Some(pending.id), Some(pending.source), LoadError::WorkerGone);
        }
    }

    fn report_progress(&mut self) {
        let Phase::Loading(in_flight) = &self.phase else {
            return;
        };
        let id = in_flight.id;

        let fraction = match lock(&self.shared).progress {
            Some((reported, fraction)) if reported == id => fraction,
            _ => return,
        };

        if fraction > self.progress {
            self.progress = fraction;
            self.emit(LoaderEvent::Progress {
                request: id,
                fraction,
            });
        }
    }

    fn prepare_adoption(&mut self) -> Result<(), EngineError> {
        if self.phase.in_flight_id().is_some() {
            return Err(EngineError::Busy);
        }
        if let Phase::Starting(pending) = &self.phase {
            tracing::debug!("{}: dropping unsubmitted {}", self.name, pending.id);
        }
        self.phase = Phase::Idle;
        self.armed = false;
        self.timer.reset();
        Ok(())
    }

    fn adopt(&mut self, result: LoadResult) {
        let event = LoaderEvent::Done {
            request: result.request,
            source: result.source.clone(),
        };
        self.phase = Phase::Done;
        self.progress = 1.0;
        self.result = Some(result);
        self.emit(event);
    }

    fn enter_failed(&mut self, error: LoadError) {
        self.result = None;
        self.phase = Phase::Failed(error);
    }

    fn fail(&mut self, request: Option<RequestId>, source: Option<SourceRef>, error: LoadError) {
        self.timer.stop();
        tracing::warn!(
            "{}: load of {} failed: {}",
            self.name,
            source.as_ref().map(SourceRef::as_str).unwrap_or("<none>"),
            error
        );
        self.enter_failed(error.clone());
        self.emit_error(request, source, error);
    }

    fn emit_error(&self, request: Option<RequestId>, source: Option<SourceRef>, error: LoadError) {
        self.emit(LoaderEvent::Error {
            request,
            source,
            error,
        });
    }

    fn emit(&self, event: LoaderEvent) {
        match self.events.send(event) {
            Ok(_) => self.metrics.record_event_emitted(),
            Err(_) => self.metrics.record_event_unobserved(),
        }
    }

    fn teardown(&mut self) -> Result<(), EngineError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        tracing::debug!("{}: shutting down in {}", self.name, self.phase.status());
        let joined = worker.shutdown();
        self.armed = false;

        // The interrupted decode has finished with the worker; settle its callbacks
        if let Phase::Interrupting(interruption) = mem::replace(&mut self.phase, Phase::Idle) {
            for callback in interruption.callbacks {
                callback();
            }
        }

        joined.map_err(EngineError::WorkerPanicked)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            tracing::error!("{}: {}", self.name, e);
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("phase", &self.phase)
            .field("decoder", &self.decoder.name())
            .field("armed", &self.armed)
            .finish()
    }
}
