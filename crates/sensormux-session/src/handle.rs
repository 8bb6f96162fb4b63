//! Logical sensor handles.
//!
//! A [`SensorHandle`] is what an application holds. It never touches the
//! backend connection; the owning session writes its snapshot and pushes
//! events into its queue. Each activation gets a new generation number so
//! that nothing from an earlier activation leaks into a later one.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;
use uuid::Uuid;

use sensormux_core::{Reading, ReferenceFrame, SensorError, SensorKind};

use crate::session::types::{Registration, SessionCommand};

/// Stable identifier for a sensor handle.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct HandleId(Uuid);

impl HandleId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sensor-{}", self.0)
    }
}

/// Handle lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Idle,
    Activating,
    Activated,
    /// Activated but paused by the lifecycle monitor.
    Suspended,
    Errored,
    Stopped,
}

impl HandleState {
    /// Registered with the multiplexer (or on its way).
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Activating | Self::Activated | Self::Suspended)
    }
}

/// Options for constructing a handle.
#[derive(Debug, Clone, Default)]
pub struct SensorOptions {
    /// Requested sampling frequency in Hz. `None` uses the backend default.
    pub frequency: Option<f64>,
    /// Coordinate system for delivered readings.
    pub reference_frame: ReferenceFrame,
    /// Origin of the creating context. `None` is the top-level document.
    pub origin: Option<String>,
}

impl SensorOptions {
    pub fn with_frequency(frequency: f64) -> Self {
        Self {
            frequency: Some(frequency),
            ..Default::default()
        }
    }

    #[must_use]
    pub const fn reference_frame(mut self, frame: ReferenceFrame) -> Self {
        self.reference_frame = frame;
        self
    }

    #[must_use]
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

/// Event delivered to a handle's queue.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorEvent {
    Reading(Reading),
    Error(SensorError),
}

/// Observable state of a handle, written by the owning session.
#[derive(Debug, Clone)]
pub(crate) struct HandleSnapshot {
    pub state: HandleState,
    pub reading: Option<Reading>,
    pub generation: u64,
    pub ever_activated: bool,
    pub error: Option<SensorError>,
}

impl HandleSnapshot {
    const fn idle() -> Self {
        Self {
            state: HandleState::Idle,
            reading: None,
            generation: 0,
            ever_activated: false,
            error: None,
        }
    }
}

type TaggedEvent = (u64, SensorEvent);

/// Write side of a handle, held by the session.
///
/// Every mutation checks the generation so that a session still holding a
/// stale registration cannot touch a restarted handle. Events are queued
/// while the snapshot lock is held, which orders them against `stop()`.
#[derive(Debug, Clone)]
pub(crate) struct HandleSink {
    snapshot: Arc<watch::Sender<HandleSnapshot>>,
    events: mpsc::UnboundedSender<TaggedEvent>,
}

impl HandleSink {
    /// Mark the handle activated (or suspended if the connection is paused).
    pub fn activate(&self, generation: u64, suspended: bool) -> bool {
        self.snapshot.send_if_modified(|s| {
            if s.generation != generation || s.state != HandleState::Activating {
                return false;
            }
            s.state = if suspended {
                HandleState::Suspended
            } else {
                HandleState::Activated
            };
            s.ever_activated = true;
            true
        })
    }

    /// Store and queue a reading. Only activated handles accept readings.
    pub fn deliver(&self, generation: u64, reading: Reading) -> bool {
        self.snapshot.send_if_modified(|s| {
            if s.generation != generation || s.state != HandleState::Activated {
                return false;
            }
            s.reading = Some(reading);
            let _ = self.events.send((generation, SensorEvent::Reading(reading)));
            true
        })
    }

    /// Move to `Errored`. `notify` also queues an error event.
    pub fn fail(&self, generation: u64, error: &SensorError, notify: bool) {
        self.snapshot.send_if_modified(|s| {
            if s.generation != generation || !s.state.is_live() {
                return false;
            }
            s.state = HandleState::Errored;
            s.error = Some(error.clone());
            if notify {
                let _ = self.events.send((generation, SensorEvent::Error(error.clone())));
            }
            true
        });
    }

    pub fn suspend(&self, generation: u64, clear_reading: bool) {
        self.snapshot.send_if_modified(|s| {
            if s.generation != generation || s.state != HandleState::Activated {
                return false;
            }
            s.state = HandleState::Suspended;
            if clear_reading {
                s.reading = None;
            }
            true
        });
    }

    pub fn resume(&self, generation: u64) {
        self.snapshot.send_if_modified(|s| {
            if s.generation != generation || s.state != HandleState::Suspended {
                return false;
            }
            s.state = HandleState::Activated;
            true
        });
    }
}

/// A logical sensor.
///
/// Created by [`SensorMultiplexer::create_sensor`](crate::SensorMultiplexer::create_sensor).
/// Dropping a handle stops it.
pub struct SensorHandle {
    id: HandleId,
    kind: SensorKind,
    frequency: Option<f64>,
    reference_frame: ReferenceFrame,
    snapshot: Arc<watch::Sender<HandleSnapshot>>,
    events_tx: mpsc::UnboundedSender<TaggedEvent>,
    events_rx: mpsc::UnboundedReceiver<TaggedEvent>,
    session: mpsc::UnboundedSender<SessionCommand>,
}

impl fmt::Debug for SensorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("frequency", &self.frequency)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SensorHandle {
    pub(crate) fn new(
        kind: SensorKind,
        options: &SensorOptions,
        session: mpsc::UnboundedSender<SessionCommand>,
    ) -> Self {
        let (snapshot, _) = watch::channel(HandleSnapshot::idle());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            id: HandleId::new(),
            kind,
            frequency: options.frequency,
            reference_frame: options.reference_frame,
            snapshot: Arc::new(snapshot),
            events_tx,
            events_rx,
            session,
        }
    }

    pub const fn id(&self) -> HandleId {
        self.id
    }

    pub const fn kind(&self) -> SensorKind {
        self.kind
    }

    /// Requested frequency as given at construction.
    pub const fn requested_frequency(&self) -> Option<f64> {
        self.frequency
    }

    pub const fn reference_frame(&self) -> ReferenceFrame {
        self.reference_frame
    }

    pub fn state(&self) -> HandleState {
        self.snapshot.borrow().state
    }

    /// True while activated, including while suspended.
    pub fn activated(&self) -> bool {
        matches!(
            self.state(),
            HandleState::Activated | HandleState::Suspended
        )
    }

    pub fn has_reading(&self) -> bool {
        self.snapshot.borrow().reading.is_some()
    }

    /// Latest reading delivered to this handle.
    ///
    /// Returns [`SensorError::NeverActivated`] if the handle has never been
    /// activated; asking for a reading at that point is a caller bug.
    pub fn latest_reading(&self) -> Result<Option<Reading>, SensorError> {
        let snapshot = self.snapshot.borrow();
        if snapshot.ever_activated {
            Ok(snapshot.reading)
        } else {
            Err(SensorError::NeverActivated)
        }
    }

    /// Timestamp of the latest reading, if any.
    pub fn timestamp(&self) -> Option<Duration> {
        self.snapshot.borrow().reading.map(|r| r.timestamp)
    }

    /// The error that moved this handle to `Errored`, if any.
    pub fn last_error(&self) -> Option<SensorError> {
        self.snapshot.borrow().error.clone()
    }

    /// Start the sensor.
    ///
    /// Completes once the backend acknowledged the negotiated configuration.
    /// A no-op if the handle is already activating or activated. Dropping the
    /// returned future before it completes withdraws the registration.
    pub async fn start(&mut self) -> Result<(), SensorError> {
        if self.state().is_live() {
            return Ok(());
        }

        let mut generation = 0;
        self.snapshot.send_modify(|s| {
            s.generation += 1;
            s.state = HandleState::Activating;
            s.reading = None;
            s.error = None;
            generation = s.generation;
        });
        self.drain_events();

        let (reply_tx, reply_rx) = oneshot::channel();
        let registration = Registration::new(
            self.id,
            generation,
            self.frequency,
            self.reference_frame,
            HandleSink {
                snapshot: Arc::clone(&self.snapshot),
                events: self.events_tx.clone(),
            },
            reply_tx,
        );

        debug!(handle_id = %self.id, kind = %self.kind, generation, "Starting sensor");

        if self
            .session
            .send(SessionCommand::Register(registration))
            .is_err()
        {
            self.mark_errored(generation, SensorError::MultiplexerShutdown);
            return Err(SensorError::MultiplexerShutdown);
        }

        let mut guard = StartGuard {
            id: self.id,
            generation,
            snapshot: &self.snapshot,
            session: &self.session,
            armed: true,
        };
        let result = reply_rx
            .await
            .unwrap_or(Err(SensorError::MultiplexerShutdown));
        guard.armed = false;
        drop(guard);

        if let Err(ref e) = result {
            // The session normally marks us already; covers a dropped reply.
            self.mark_errored(generation, e.clone());
        }
        result
    }

    /// Stop the sensor. Idempotent and infallible.
    ///
    /// On return the handle is deregistered from the caller's point of view:
    /// its reading is cleared and no further events are observable. Backend
    /// teardown continues in the background.
    pub fn stop(&mut self) {
        let mut deregister = None;
        self.snapshot.send_if_modified(|s| {
            if s.state == HandleState::Stopped {
                return false;
            }
            if s.state.is_live() {
                deregister = Some(s.generation);
            }
            s.state = HandleState::Stopped;
            s.reading = None;
            true
        });
        if let Some(generation) = deregister {
            debug!(handle_id = %self.id, kind = %self.kind, generation, "Stopping sensor");
            let _ = self.session.send(SessionCommand::Deregister {
                id: self.id,
                generation,
            });
        }
        self.drain_events();
    }

    /// Wait for the next event of the current activation.
    ///
    /// Events queued by an earlier activation are skipped. Pending forever if
    /// nothing else is delivered; pair with a timeout where that matters.
    pub async fn next_event(&mut self) -> Option<SensorEvent> {
        loop {
            let (generation, event) = self.events_rx.recv().await?;
            if generation == self.snapshot.borrow().generation {
                return Some(event);
            }
        }
    }

    /// Non-blocking variant of [`next_event`](Self::next_event).
    pub fn try_next_event(&mut self) -> Option<SensorEvent> {
        while let Ok((generation, event)) = self.events_rx.try_recv() {
            if generation == self.snapshot.borrow().generation {
                return Some(event);
            }
        }
        None
    }

    fn drain_events(&mut self) {
        while self.events_rx.try_recv().is_ok() {}
    }

    fn mark_errored(&self, generation: u64, error: SensorError) {
        self.snapshot.send_if_modified(|s| {
            if s.generation != generation || s.state != HandleState::Activating {
                return false;
            }
            s.state = HandleState::Errored;
            s.error = Some(error);
            true
        });
    }
}

impl Drop for SensorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Withdraws a registration if `start()` is cancelled mid-flight.
struct StartGuard<'a> {
    id: HandleId,
    generation: u64,
    snapshot: &'a watch::Sender<HandleSnapshot>,
    session: &'a mpsc::UnboundedSender<SessionCommand>,
    armed: bool,
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let generation = self.generation;
        self.snapshot.send_if_modified(|s| {
            if s.generation != generation || !s.state.is_live() {
                return false;
            }
            s.state = HandleState::Stopped;
            s.reading = None;
            true
        });
        debug!(handle_id = %self.id, generation, "Start cancelled, withdrawing registration");
        let _ = self.session.send(SessionCommand::Deregister {
            id: self.id,
            generation,
        });
    }
}
