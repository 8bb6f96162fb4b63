//! Per-kind session state.
//!
//! Every sensor kind in use gets one [`TypeSession`] task. All commands for
//! the kind go through its FIFO queue, so configure, reconfigure and remove
//! calls to the backend are never interleaved for one kind. While a backend
//! call is in flight the session keeps applying commands to its bookkeeping
//! and keeps fanning out readings; the backend is brought in line with the
//! bookkeeping once the call returns.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use sensormux_core::config::MultiplexerSettings;
use sensormux_core::frequency::notification_interval;
use sensormux_core::{
    FrequencyError, FrequencyPolicy, Reading, ReportingMode, ScreenAngle, SensorError, SensorKind,
    negotiate,
};

use super::types::{ConnectionInfo, Registration, SessionCommand};
use crate::backend::{BackendEvent, OpenFailure, SensorBackend, SensorConfiguration};
use crate::connection::{BackendConnection, ConnectionState};

/// State owned by one sensor kind's session task.
pub(crate) struct TypeSession {
    kind: SensorKind,
    backend: Arc<dyn SensorBackend>,
    settings: MultiplexerSettings,
    policy: FrequencyPolicy,
    connection: BackendConnection,
    events: Option<mpsc::Receiver<BackendEvent>>,
    registrations: Vec<Registration>,
    suspended: bool,
    screen_angle: ScreenAngle,
    /// Failure waiting to be delivered to every registered handle.
    pending_failure: Option<SensorError>,
    inspectors: Vec<oneshot::Sender<ConnectionInfo>>,
    /// Bookkeeping changed since the backend was last reconciled.
    dirty: bool,
    /// Every command sender is gone.
    closed: bool,
}

impl TypeSession {
    pub fn new(
        kind: SensorKind,
        backend: Arc<dyn SensorBackend>,
        settings: MultiplexerSettings,
        suspended: bool,
        screen_angle: ScreenAngle,
    ) -> Self {
        let policy = settings.frequency_policy();
        Self {
            kind,
            backend,
            settings,
            policy,
            connection: BackendConnection::new(kind),
            events: None,
            registrations: Vec::new(),
            suspended,
            screen_angle,
            pending_failure: None,
            inspectors: Vec::new(),
            dirty: false,
            closed: false,
        }
    }

    /// Drive the session until every command sender has been dropped.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        debug!(kind = %self.kind, "Sensor session started");
        loop {
            self.settle(&mut commands).await;
            if self.closed {
                break;
            }
            tokio::select! {
                biased;
                event = recv_backend(&mut self.events) => self.on_backend_event(event),
                command = commands.recv() => match command {
                    Some(command) => self.apply(command),
                    None => self.close(),
                },
            }
        }
        self.shutdown().await;
    }

    /// Reconcile until the backend matches the bookkeeping, then answer
    /// queued inspections.
    async fn settle(&mut self, commands: &mut mpsc::UnboundedReceiver<SessionCommand>) {
        while self.dirty {
            self.dirty = false;
            self.reconcile(commands).await;
        }
        if !self.inspectors.is_empty() {
            let info = self.info();
            for inspector in self.inspectors.drain(..) {
                let _ = inspector.send(info.clone());
            }
        }
    }

    fn close(&mut self) {
        self.closed = true;
        self.dirty = true;
    }

    /// Apply a command to the bookkeeping. Never touches the backend.
    fn apply(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Register(registration) => {
                debug!(
                    kind = %self.kind,
                    handle_id = %registration.id,
                    generation = registration.generation,
                    frequency = ?registration.frequency,
                    "Handle registered"
                );
                self.registrations.retain(|r| r.id != registration.id);
                self.registrations.push(registration);
                self.dirty = true;
            }
            SessionCommand::Deregister { id, generation } => {
                let before = self.registrations.len();
                self.registrations
                    .retain(|r| r.id != id || r.generation != generation);
                if self.registrations.len() != before {
                    debug!(kind = %self.kind, handle_id = %id, generation, "Handle deregistered");
                    self.dirty = true;
                }
            }
            SessionCommand::Suspend => {
                self.suspended = true;
                self.dirty = true;
            }
            SessionCommand::Resume => {
                self.suspended = false;
                self.dirty = true;
            }
            SessionCommand::ScreenOrientation(angle) => {
                debug!(kind = %self.kind, degrees = angle.degrees(), "Screen orientation changed");
                self.screen_angle = angle;
            }
            SessionCommand::Inspect(reply) => self.inspectors.push(reply),
        }
    }

    /// One reconciliation pass. Returns early whenever the bookkeeping
    /// changed during a backend call; `settle` runs another pass.
    async fn reconcile(&mut self, commands: &mut mpsc::UnboundedReceiver<SessionCommand>) {
        if let Some(error) = self.pending_failure.take() {
            self.fail_all(&error);
            self.teardown(commands).await;
            return;
        }

        if self.registrations.is_empty() || self.closed {
            if self.connection.is_open() || self.connection.state().has_configuration() {
                self.teardown(commands).await;
            }
            return;
        }

        let backend = Arc::clone(&self.backend);

        if !self.connection.is_open() {
            let kind = self.kind;
            let opened = self
                .round_trip(commands, backend.open(kind))
                .await
                .map_err(|failure| match failure {
                    OpenFailure::Unavailable => SensorError::SensorUnavailable { kind },
                    OpenFailure::Denied => SensorError::PermissionDenied { kind },
                })
                .and_then(|channel| {
                    if channel.bounds.is_valid() {
                        Ok(channel)
                    } else {
                        warn!(%kind, bounds = ?channel.bounds, "Backend reported unusable frequency bounds");
                        Err(SensorError::SensorUnavailable { kind })
                    }
                });
            match opened {
                Ok(channel) => {
                    let bounds = self.policy.effective_bounds(channel.bounds);
                    self.connection.opened(bounds, channel.mode);
                    self.events = Some(channel.events);
                }
                Err(error) => {
                    warn!(kind = %self.kind, %error, "Failed to open sensor");
                    self.fail_all(&error);
                    return;
                }
            }
            if self.interrupted() {
                return;
            }
        }

        let Some(bounds) = self.connection.bounds() else {
            return;
        };
        let target = match negotiate(
            self.registrations.iter().map(|r| r.frequency),
            &bounds,
            &self.policy,
        ) {
            Ok(frequency) => frequency,
            Err(FrequencyError::Invalid(value)) => {
                self.fail_all(&SensorError::InvalidFrequency { value });
                self.dirty = true;
                return;
            }
            Err(FrequencyError::NoRequests) => return,
        };

        let needs_configure = !self.connection.is_configured()
            || self
                .connection
                .frequency()
                .is_none_or(|current| !same_frequency(current, target));
        if needs_configure {
            if self.connection.state().has_configuration() {
                // The old configuration is retired before a new one is issued
                info!(kind = %self.kind, frequency = target, "Reconfiguring sensor");
                self.round_trip(commands, backend.remove_configuration(self.kind))
                    .await;
                self.connection.removed();
                // Handles that came or went during the removal change the target
                if self.interrupted() {
                    return;
                }
            } else {
                info!(kind = %self.kind, frequency = target, "Configuring sensor");
            }
            self.connection.begin_configure(target);
            let config = SensorConfiguration {
                frequency: target,
                mode: self.connection.mode(),
            };
            match self
                .round_trip(commands, backend.add_configuration(self.kind, config))
                .await
            {
                Ok(()) => {
                    if self.connection.state() == ConnectionState::Configuring {
                        self.connection.configured();
                    }
                }
                Err(failure) => {
                    warn!(kind = %self.kind, reason = %failure, "Backend rejected configuration");
                    if self.connection.state() == ConnectionState::Configuring {
                        self.connection.fail();
                    }
                    self.pending_failure = Some(SensorError::BackendStartFailure {
                        kind: self.kind,
                        reason: failure.reason,
                    });
                    self.dirty = true;
                    return;
                }
            }
            if self.interrupted() {
                return;
            }
        }

        match (self.suspended, self.connection.state()) {
            (true, ConnectionState::Configured) => {
                self.connection.suspend();
                for registration in &self.registrations {
                    registration.sink.suspend(
                        registration.generation,
                        self.settings.clear_reading_on_suspend,
                    );
                }
                info!(kind = %self.kind, "Sensor suspended");
                self.round_trip(commands, backend.suspend(self.kind)).await;
            }
            (false, ConnectionState::Suspended) => {
                self.round_trip(commands, backend.resume(self.kind)).await;
                self.connection.resume();
                for registration in &self.registrations {
                    registration.sink.resume(registration.generation);
                }
                info!(kind = %self.kind, "Sensor resumed");
            }
            _ => {}
        }
        if self.interrupted() {
            return;
        }

        self.activate_pending();
    }

    /// Whether a backend call let in changes that need another pass.
    const fn interrupted(&self) -> bool {
        self.dirty || self.pending_failure.is_some()
    }

    /// Answer every pending start now that the configuration is acknowledged.
    fn activate_pending(&mut self) {
        let suspended = self.connection.state() == ConnectionState::Suspended;
        let cached = self.connection.last_reading();
        let shape = self.kind.reading_shape();
        for registration in &mut self.registrations {
            let Some(reply) = registration.reply.take() else {
                continue;
            };
            if registration.sink.activate(registration.generation, suspended) {
                debug!(
                    kind = %self.kind,
                    handle_id = %registration.id,
                    suspended,
                    "Handle activated"
                );
                // A handle joining a running connection sees its latest reading
                if !suspended && let Some(reading) = cached {
                    let remapped = reading.remapped(shape, registration.frame, self.screen_angle);
                    if registration.sink.deliver(registration.generation, remapped) {
                        registration.last_delivered = Some(reading.timestamp);
                    }
                }
            }
            let _ = reply.send(Ok(()));
        }
    }

    /// Deliver `error` to every registered handle and forget them all.
    fn fail_all(&mut self, error: &SensorError) {
        warn!(
            kind = %self.kind,
            %error,
            handles = self.registrations.len(),
            "Failing all handles"
        );
        for mut registration in self.registrations.drain(..) {
            let pending = registration.is_pending();
            registration
                .sink
                .fail(registration.generation, error, !pending);
            if let Some(reply) = registration.reply.take() {
                let _ = reply.send(Err(error.clone()));
            }
        }
    }

    /// Remove the backend configuration (if any) and reset the connection.
    async fn teardown(&mut self, commands: &mut mpsc::UnboundedReceiver<SessionCommand>) {
        self.events = None;
        if self.connection.state().has_configuration() {
            info!(kind = %self.kind, "Removing sensor configuration");
            let backend = Arc::clone(&self.backend);
            self.round_trip(commands, backend.remove_configuration(self.kind))
                .await;
        }
        self.connection.reset();
    }

    /// Await a backend call while still applying commands and fanning out
    /// readings.
    ///
    /// Backend events are observed before commands. Once a failure is
    /// pending, commands stay queued until every current handle has been
    /// failed, so a later registration never shares that failure.
    async fn round_trip<F>(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
        call: F,
    ) -> F::Output
    where
        F: Future,
    {
        tokio::pin!(call);
        loop {
            tokio::select! {
                biased;
                output = &mut call => return output,
                event = recv_backend(&mut self.events) => self.on_backend_event(event),
                command = commands.recv(), if !self.closed && self.pending_failure.is_none() => match command {
                    Some(command) => self.apply(command),
                    None => self.close(),
                },
            }
        }
    }

    fn on_backend_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::Reading(reading) => {
                if self.connection.accept_reading(reading) {
                    self.fan_out(reading);
                }
            }
            BackendEvent::Error(reason) => {
                warn!(kind = %self.kind, %reason, "Sensor reported an error");
                self.events = None;
                if self.connection.state().has_configuration() {
                    self.connection.fail();
                }
                self.pending_failure = Some(SensorError::BackendStartFailure {
                    kind: self.kind,
                    reason,
                });
                self.dirty = true;
            }
        }
    }

    /// Copy a raw reading into every activated handle, remapped per handle.
    fn fan_out(&mut self, reading: Reading) {
        let shape = self.kind.reading_shape();
        let throttled = self.settings.throttle_continuous
            && self.connection.mode() == ReportingMode::Continuous;
        let bounds = self.connection.bounds();
        let mut delivered = 0usize;

        for registration in &mut self.registrations {
            if registration.is_pending() {
                continue;
            }
            if let Some(last) = registration.last_delivered {
                if reading.timestamp < last {
                    continue;
                }
                if throttled && let Some(bounds) = bounds {
                    let frequency = self
                        .policy
                        .clamp(registration.frequency, &bounds)
                        .unwrap_or(bounds.max);
                    if reading.timestamp.saturating_sub(last) < notification_interval(frequency) {
                        continue;
                    }
                }
            }
            let remapped = reading.remapped(shape, registration.frame, self.screen_angle);
            if registration.sink.deliver(registration.generation, remapped) {
                registration.last_delivered = Some(reading.timestamp);
                delivered += 1;
            }
        }

        debug!(kind = %self.kind, timestamp = ?reading.timestamp, delivered, "Reading fanned out");
    }

    fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            kind: self.kind,
            state: self.connection.state(),
            frequency: self.connection.frequency(),
            mode: self.connection.mode(),
            bounds: self.connection.bounds(),
            handle_count: self.registrations.len(),
        }
    }

    async fn shutdown(mut self) {
        self.registrations.clear();
        self.events = None;
        if self.connection.state().has_configuration() {
            info!(kind = %self.kind, "Removing sensor configuration on shutdown");
            self.backend.remove_configuration(self.kind).await;
        }
        self.connection.reset();
        debug!(kind = %self.kind, "Sensor session stopped");
    }
}

/// Next event from the backend channel; pending forever while closed.
async fn recv_backend(events: &mut Option<mpsc::Receiver<BackendEvent>>) -> BackendEvent {
    match events {
        Some(rx) => rx
            .recv()
            .await
            .unwrap_or_else(|| BackendEvent::Error("sensor stream closed".to_string())),
        None => std::future::pending().await,
    }
}

fn same_frequency(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}
