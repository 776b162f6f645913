//! Session notifications.
//!
//! Everything a caller can observe about a session flows through one channel of
//! [`SessionEvent`]s: state transitions, every hardware event in emission order, advisory
//! warnings and failures tagged with their [`ErrorKind`]. The current state is also kept in
//! a `watch` channel so it can be read without locking the session.

use crate::error::{ErrorKind, SessionError};
use crate::hardware::{Dimensions, EventSource, HardwareEvent};
use crate::session::SessionState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};
use tracing::info;

/// Completion code and description reported with an acquisition result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionStatus {
    /// Update code of the completion event.
    pub code: i32,
    /// Description of the completion event.
    pub description: String,
}

/// Samples extracted from an acquisition-complete event.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionResult {
    /// Raw samples in row-major order.
    pub raw_samples: Vec<f64>,
    /// Frame geometry.
    pub dimensions: Dimensions,
    /// How the hardware reported completion.
    pub completion: CompletionStatus,
}

/// Printable statistics of an [`AcquisitionResult`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcquisitionSummary {
    /// Number of samples.
    pub samples: usize,
    /// Frame width.
    pub width: usize,
    /// Frame height.
    pub height: usize,
    /// Smallest sample.
    pub min: f64,
    /// Largest sample.
    pub max: f64,
    /// Mean sample value.
    pub mean: f64,
    /// Completion code.
    pub completion_code: i32,
}

impl AcquisitionResult {
    /// Number of samples.
    pub fn len(&self) -> usize {
        self.raw_samples.len()
    }

    /// True if the result holds no samples.
    pub fn is_empty(&self) -> bool {
        self.raw_samples.is_empty()
    }

    /// Min/max/mean over the samples. All zero when empty.
    pub fn summary(&self) -> AcquisitionSummary {
        let (min, max, sum) = self.raw_samples.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY, 0.0),
            |(min, max, sum), &v| (min.min(v), max.max(v), sum + v),
        );
        let n = self.raw_samples.len();
        let (min, max, mean) = if n == 0 {
            (0.0, 0.0, 0.0)
        } else {
            (min, max, sum / n as f64)
        };
        AcquisitionSummary {
            samples: n,
            width: self.dimensions.width,
            height: self.dimensions.height,
            min,
            max,
            mean,
            completion_code: self.completion.code,
        }
    }
}

/// One hardware event as seen by subscribers.
#[derive(Debug, Clone)]
pub struct HardwareNotice {
    /// Event stream.
    pub source: EventSource,
    /// Raw event code.
    pub code: i32,
    /// Hardware description.
    pub description: String,
    /// When the controller processed the event.
    pub received_at: DateTime<Utc>,
    /// Extracted result, on a successful acquisition completion.
    pub result: Option<Arc<AcquisitionResult>>,
}

impl HardwareNotice {
    pub(crate) fn from_event(event: &HardwareEvent) -> Self {
        Self {
            source: event.source,
            code: event.code,
            description: event.description.clone(),
            received_at: Utc::now(),
            result: None,
        }
    }
}

/// Notification published on the session event channel.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session moved between states.
    StateChanged {
        /// Previous state.
        from: SessionState,
        /// New state.
        to: SessionState,
    },
    /// A hardware event, forwarded unmodified and in order.
    Hardware(HardwareNotice),
    /// Advisory condition that does not block the session.
    Warning {
        /// What was observed.
        message: String,
    },
    /// An operation failed.
    Failure {
        /// Error kind.
        kind: ErrorKind,
        /// Error message.
        message: String,
    },
}

type StateCallback = Arc<dyn Fn(SessionState, SessionState) + Send + Sync>;
type AcquisitionCallback = Arc<dyn Fn(&HardwareNotice) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Fan-out of session notifications to channels and registered callbacks.
pub(crate) struct NotificationHub {
    state_tx: watch::Sender<SessionState>,
    events_tx: broadcast::Sender<SessionEvent>,
    state_callbacks: Mutex<Vec<StateCallback>>,
    acquisition_callbacks: Mutex<Vec<AcquisitionCallback>>,
}

impl NotificationHub {
    pub(crate) fn new(capacity: usize) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Unconnected);
        let (events_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            state_tx,
            events_tx,
            state_callbacks: Mutex::new(Vec::new()),
            acquisition_callbacks: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    pub(crate) fn on_state_changed(&self, callback: StateCallback) {
        lock(&self.state_callbacks).push(callback);
    }

    pub(crate) fn on_acquisition_event(&self, callback: AcquisitionCallback) {
        lock(&self.acquisition_callbacks).push(callback);
    }

    /// Record a transition. Callers hold the session lock.
    pub(crate) fn transition(&self, to: SessionState) {
        let from = self.state_tx.send_replace(to);
        if from == to {
            return;
        }
        info!(%from, %to, "Session state changed");
        // Snapshot so callbacks may register further callbacks.
        let callbacks = lock(&self.state_callbacks).clone();
        for callback in callbacks {
            callback(from, to);
        }
        self.publish(SessionEvent::StateChanged { from, to });
    }

    pub(crate) fn hardware(&self, notice: HardwareNotice) {
        let callbacks = lock(&self.acquisition_callbacks).clone();
        for callback in callbacks {
            callback(&notice);
        }
        self.publish(SessionEvent::Hardware(notice));
    }

    pub(crate) fn warning(&self, message: impl Into<String>) {
        self.publish(SessionEvent::Warning {
            message: message.into(),
        });
    }

    pub(crate) fn failure(&self, error: &SessionError) {
        self.publish(SessionEvent::Failure {
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is not an error.
        let _ = self.events_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn summary_of_samples() {
        let result = AcquisitionResult {
            raw_samples: vec![1.0, 5.0, 3.0],
            dimensions: Dimensions {
                width: 3,
                height: 1,
            },
            completion: CompletionStatus {
                code: 100,
                description: "done".into(),
            },
        };
        let summary = result.summary();
        assert_eq!(summary.samples, 3);
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.max, 5.0);
        assert_eq!(summary.mean, 3.0);
    }

    #[test]
    fn transition_notifies_watch_broadcast_and_callbacks() {
        let hub = NotificationHub::new(8);
        let mut events = hub.subscribe();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        hub.on_state_changed(Arc::new(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        hub.transition(SessionState::Connected);
        hub.transition(SessionState::Connected);

        assert_eq!(hub.state(), SessionState::Connected);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match events.try_recv().unwrap() {
            SessionEvent::StateChanged { from, to } => {
                assert_eq!(from, SessionState::Unconnected);
                assert_eq!(to, SessionState::Connected);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn callback_may_register_another_callback() {
        let hub = Arc::new(NotificationHub::new(8));
        let calls = Arc::new(AtomicUsize::new(0));
        let (inner_hub, inner_calls) = (Arc::clone(&hub), Arc::clone(&calls));
        hub.on_state_changed(Arc::new(move |_, _| {
            let counter = Arc::clone(&inner_calls);
            inner_hub.on_state_changed(Arc::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }));

        hub.transition(SessionState::Connected);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        hub.transition(SessionState::Initializing);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failure_is_tagged_with_kind() {
        let hub = NotificationHub::new(8);
        let mut events = hub.subscribe();
        hub.failure(&SessionError::ResultExtraction("no data object".into()));
        match events.try_recv().unwrap() {
            SessionEvent::Failure { kind, message } => {
                assert_eq!(kind, ErrorKind::ResultExtraction);
                assert!(message.contains("no data object"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
