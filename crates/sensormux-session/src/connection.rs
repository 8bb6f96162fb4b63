//! Backend connection state machine.
//!
//! One connection exists per sensor kind. It records what the backend has
//! been told (configuration, suspension) and the last raw reading. It performs
//! no I/O; the owning session drives the backend and then records the outcome
//! here.

use tracing::{debug, warn};

use sensormux_core::{FrequencyBounds, Reading, ReportingMode, SensorKind};

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No configuration installed.
    Unconfigured,
    /// A configuration request is in flight.
    Configuring,
    /// Configuration acknowledged, readings flow.
    Configured,
    /// Configured but paused by the lifecycle monitor.
    Suspended,
    /// The backend reported a failure; teardown pending.
    Failed,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub const fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{Configured, Configuring, Failed, Suspended, Unconfigured};
        matches!(
            (self, next),
            (Unconfigured | Configured | Suspended, Configuring)
                | (Configuring | Suspended, Configured)
                | (Configured, Suspended)
                | (Configuring | Configured | Suspended, Failed)
                | (Configuring | Configured | Suspended | Failed, Unconfigured)
        )
    }

    /// Whether the backend currently holds a configuration for this kind.
    pub const fn has_configuration(self) -> bool {
        matches!(
            self,
            Self::Configuring | Self::Configured | Self::Suspended | Self::Failed
        )
    }
}

/// Shared connection to the backend for one sensor kind.
#[derive(Debug)]
pub struct BackendConnection {
    kind: SensorKind,
    state: ConnectionState,
    bounds: Option<FrequencyBounds>,
    mode: ReportingMode,
    frequency: Option<f64>,
    last_reading: Option<Reading>,
}

impl BackendConnection {
    pub const fn new(kind: SensorKind) -> Self {
        Self {
            kind,
            state: ConnectionState::Unconfigured,
            bounds: None,
            mode: ReportingMode::OnChange,
            frequency: None,
            last_reading: None,
        }
    }

    pub const fn kind(&self) -> SensorKind {
        self.kind
    }

    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    pub const fn bounds(&self) -> Option<FrequencyBounds> {
        self.bounds
    }

    pub const fn mode(&self) -> ReportingMode {
        self.mode
    }

    /// Effective frequency of the installed configuration.
    pub const fn frequency(&self) -> Option<f64> {
        match self.state {
            ConnectionState::Configured | ConnectionState::Suspended => self.frequency,
            _ => None,
        }
    }

    pub const fn last_reading(&self) -> Option<Reading> {
        self.last_reading
    }

    /// Whether the backend channel has been opened.
    pub const fn is_open(&self) -> bool {
        self.bounds.is_some()
    }

    /// Configured or suspended.
    pub const fn is_configured(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Configured | ConnectionState::Suspended
        )
    }

    /// Record the capabilities of a freshly opened channel.
    pub fn opened(&mut self, bounds: FrequencyBounds, mode: ReportingMode) {
        debug!(kind = %self.kind, ?bounds, ?mode, "Backend channel opened");
        self.bounds = Some(bounds);
        self.mode = mode;
    }

    pub fn begin_configure(&mut self, frequency: f64) -> bool {
        if self.transition(ConnectionState::Configuring) {
            self.frequency = Some(frequency);
            true
        } else {
            false
        }
    }

    pub fn configured(&mut self) -> bool {
        self.transition(ConnectionState::Configured)
    }

    pub fn suspend(&mut self) -> bool {
        self.transition(ConnectionState::Suspended)
    }

    pub fn resume(&mut self) -> bool {
        self.state == ConnectionState::Suspended && self.transition(ConnectionState::Configured)
    }

    pub fn fail(&mut self) -> bool {
        self.transition(ConnectionState::Failed)
    }

    /// The backend dropped its configuration; the channel stays open.
    pub fn removed(&mut self) {
        if self.state != ConnectionState::Unconfigured {
            self.transition(ConnectionState::Unconfigured);
        }
        self.frequency = None;
    }

    /// Forget everything; the next use starts from a fresh open.
    pub fn reset(&mut self) {
        if self.state != ConnectionState::Unconfigured {
            self.transition(ConnectionState::Unconfigured);
        }
        self.bounds = None;
        self.frequency = None;
        self.last_reading = None;
    }

    /// Record a raw reading if it should be fanned out.
    ///
    /// Readings are dropped while suspended, while no configuration has been
    /// acknowledged, and when they would move the timestamp backwards.
    pub fn accept_reading(&mut self, reading: Reading) -> bool {
        let delivering = match self.state {
            ConnectionState::Configured => true,
            // A reconfigure keeps the previous configuration's stream alive
            ConnectionState::Configuring => self.last_reading.is_some(),
            _ => false,
        };
        if !delivering {
            return false;
        }
        if let Some(last) = self.last_reading
            && reading.timestamp < last.timestamp
        {
            warn!(
                kind = %self.kind,
                last = ?last.timestamp,
                got = ?reading.timestamp,
                "Dropping out-of-order reading"
            );
            return false;
        }
        self.last_reading = Some(reading);
        true
    }

    fn transition(&mut self, next: ConnectionState) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(kind = %self.kind, from = ?self.state, to = ?next, "Illegal connection transition");
            return false;
        }
        debug!(kind = %self.kind, from = ?self.state, to = ?next, "Connection transition");
        self.state = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn reading(ms: u64) -> Reading {
        Reading::new([1.0, 2.0, 3.0, 0.0], Duration::from_millis(ms))
    }

    fn configured() -> BackendConnection {
        let mut conn = BackendConnection::new(SensorKind::Accelerometer);
        conn.opened(FrequencyBounds::default(), ReportingMode::Continuous);
        assert!(conn.begin_configure(30.0));
        assert!(conn.configured());
        conn
    }

    #[test]
    fn happy_path_transitions() {
        let mut conn = configured();
        assert_eq!(conn.state(), ConnectionState::Configured);
        assert_eq!(conn.frequency(), Some(30.0));
        assert!(conn.suspend());
        assert_eq!(conn.frequency(), Some(30.0));
        assert!(conn.resume());
        assert_eq!(conn.state(), ConnectionState::Configured);
        conn.reset();
        assert_eq!(conn.state(), ConnectionState::Unconfigured);
        assert!(!conn.is_open());
        assert_eq!(conn.frequency(), None);
    }

    #[test]
    fn cannot_suspend_unconfigured() {
        let mut conn = BackendConnection::new(SensorKind::Gyroscope);
        assert!(!conn.suspend());
        assert!(!conn.resume());
        assert_eq!(conn.state(), ConnectionState::Unconfigured);
    }

    #[test]
    fn failure_leaves_configuration_to_remove() {
        let mut conn = BackendConnection::new(SensorKind::Magnetometer);
        conn.opened(FrequencyBounds::default(), ReportingMode::OnChange);
        conn.begin_configure(10.0);
        assert!(conn.fail());
        assert!(conn.state().has_configuration());
        conn.reset();
        assert!(!conn.state().has_configuration());
    }

    #[test]
    fn readings_need_configuration_and_order() {
        let mut conn = BackendConnection::new(SensorKind::Accelerometer);
        assert!(!conn.accept_reading(reading(1)));

        let mut conn = configured();
        assert!(conn.accept_reading(reading(10)));
        assert!(conn.accept_reading(reading(10)));
        assert!(!conn.accept_reading(reading(5)));
        assert_eq!(conn.last_reading().map(|r| r.timestamp), Some(Duration::from_millis(10)));
    }

    #[test]
    fn suspended_connection_drops_readings() {
        let mut conn = configured();
        conn.suspend();
        assert!(!conn.accept_reading(reading(1)));
        conn.resume();
        assert!(conn.accept_reading(reading(2)));
    }

    #[test]
    fn reconfigure_keeps_stream_flowing() {
        let mut conn = configured();
        assert!(conn.accept_reading(reading(1)));
        assert!(conn.begin_configure(60.0));
        assert!(conn.accept_reading(reading(2)));
        assert_eq!(conn.frequency(), None);
        conn.configured();
        assert_eq!(conn.frequency(), Some(60.0));
    }

    #[test]
    fn removal_keeps_channel_and_reading() {
        let mut conn = configured();
        assert!(conn.accept_reading(reading(1)));
        conn.removed();
        assert_eq!(conn.state(), ConnectionState::Unconfigured);
        assert!(conn.is_open());
        assert_eq!(conn.frequency(), None);
        assert!(!conn.accept_reading(reading(2)));
        assert!(conn.begin_configure(20.0));
        assert!(conn.accept_reading(reading(3)));
    }
}
