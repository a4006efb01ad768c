use super::events::LoadError;
use crate::models::{DecodeOptions, RequestId, SourceRef};
use crate::services::Decoder;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Callback passed to `stop`, run exactly once when the engine has settled
pub type DoneCallback = Box<dyn FnOnce() + 'static>;

/// Lifecycle of an engine as seen by its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// Nothing requested yet, or the last request was stopped
    Idle,
    /// A request is waiting for the next poll tick to be resolved and submitted
    Starting,
    /// The worker holds a request
    Loading,
    /// The in-flight request was stopped or superseded; its result will be discarded
    Interrupting,
    Done,
    Failed,
}

impl EngineStatus {
    pub fn is_active(self) -> bool {
        matches!(
            self,
            EngineStatus::Starting | EngineStatus::Loading | EngineStatus::Interrupting
        )
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineStatus::Idle => "idle",
            EngineStatus::Starting => "starting",
            EngineStatus::Loading => "loading",
            EngineStatus::Interrupting => "interrupting",
            EngineStatus::Done => "done",
            EngineStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of one poller tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Keep polling
    Pending,
    /// Nothing left to observe until the next `start`
    Settled,
}

/// A request snapshot that has not been resolved or submitted yet
pub(crate) struct PendingRequest {
    pub id: RequestId,
    pub source: SourceRef,
    pub options: DecodeOptions,
    pub as_animation: bool,
    pub decoder: Arc<dyn Decoder>,
}

/// The request the worker currently holds
#[derive(Debug, Clone)]
pub(crate) struct InFlight {
    pub id: RequestId,
    pub source: SourceRef,
}

/// What to do once an interrupted decode has come back
pub(crate) enum AfterInterrupt {
    Settle,
    Fail,
    Restart(PendingRequest),
}

pub(crate) struct Interruption {
    pub in_flight: InFlight,
    pub callbacks: Vec<DoneCallback>,
    pub then: AfterInterrupt,
}

pub(crate) enum Phase {
    Idle,
    Starting(PendingRequest),
    Loading(InFlight),
    Interrupting(Interruption),
    Done,
    Failed(LoadError),
}

impl Phase {
    pub fn status(&self) -> EngineStatus {
        match self {
            Phase::Idle => EngineStatus::Idle,
            Phase::Starting(_) => EngineStatus::Starting,
            Phase::Loading(_) => EngineStatus::Loading,
            Phase::Interrupting(_) => EngineStatus::Interrupting,
            Phase::Done => EngineStatus::Done,
            Phase::Failed(_) => EngineStatus::Failed,
        }
    }

    /// Id of the request the engine is working on, submitted or not
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Phase::Starting(pending) => Some(pending.id),
            Phase::Loading(in_flight) => Some(in_flight.id),
            Phase::Interrupting(interruption) => match &interruption.then {
                AfterInterrupt::Restart(pending) => Some(pending.id),
                _ => Some(interruption.in_flight.id),
            },
            _ => None,
        }
    }

    /// Id of the request the worker holds
    pub fn in_flight_id(&self) -> Option<RequestId> {
        match self {
            Phase::Loading(in_flight) => Some(in_flight.id),
            Phase::Interrupting(interruption) => Some(interruption.in_flight.id),
            _ => None,
        }
    }
}

impl fmt::Debug for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Interrupting(interruption) => f
                .debug_struct("Interrupting")
                .field("in_flight", &interruption.in_flight.id)
                .field("callbacks", &interruption.callbacks.len())
                .field(
                    "restart",
                    &matches!(interruption.then, AfterInterrupt::Restart(_)),
                )
                .finish(),
            Phase::Failed(error) => f.debug_tuple("Failed").field(error).finish(),
            other => write!(f, "{:?}({:?})", other.status(), other.request_id()),
        }
    }
}

/// Wall-clock time of the current load, frozen once it settles
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct LoadTimer {
    started: Option<Instant>,
    frozen: Option<Duration>,
}

impl LoadTimer {
    pub fn restart(&mut self) {
        self.started = Some(Instant::now());
        self.frozen = None;
    }

    pub fn stop(&mut self) {
        if self.frozen.is_none() {
            self.frozen = Some(self.started.map(|s| s.elapsed()).unwrap_or_default());
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn elapsed(&self) -> Duration {
        self.frozen
            .or_else(|| self.started.map(|s| s.elapsed()))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_active_statuses() {
        assert!(EngineStatus::Starting.is_active());
        assert!(EngineStatus::Loading.is_active());
        assert!(EngineStatus::Interrupting.is_active());
        assert!(!EngineStatus::Idle.is_active());
        assert!(!EngineStatus::Done.is_active());
        assert!(!EngineStatus::Failed.is_active());
    }

    #[test]
    fn test_timer_freezes_on_stop() {
        let mut timer = LoadTimer::default();
        assert_eq!(timer.elapsed(), Duration::ZERO);

        timer.restart();
        thread::sleep(Duration::from_millis(5));
        timer.stop();
        let frozen = timer.elapsed();
        assert!(frozen >= Duration::from_millis(5));

        thread::sleep(Duration::from_millis(5));
        assert_eq!(timer.elapsed(), frozen);

        timer.restart();
        assert!(timer.elapsed() < frozen);
    }

    #[test]
    fn test_interrupting_reports_restart_id() {
        let decoder: Arc<dyn Decoder> = Arc::new(crate::services::StillImageDecoder::new());
        let phase = Phase::Interrupting(Interruption {
            in_flight: InFlight {
                id: RequestId(1),
                source: SourceRef::from("a.png"),
            },
            callbacks: Vec::new(),
            then: AfterInterrupt::Restart(PendingRequest {
                id: RequestId(2),
                source: SourceRef::from("b.png"),
                options: DecodeOptions::default(),
                as_animation: false,
                decoder,
            }),
        });

        assert_eq!(phase.status(), EngineStatus::Interrupting);
        assert_eq!(phase.request_id(), Some(RequestId(2)));
        assert_eq!(phase.in_flight_id(), Some(RequestId(1)));
    }
}
