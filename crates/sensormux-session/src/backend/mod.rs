//! Sensor backend contract.
//!
//! The backend is the platform side of a sensor: it reports capabilities,
//! accepts one configuration per sensor kind and streams readings while
//! configured. The multiplexer is its only caller and serialises every call
//! for a given kind.

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

use async_trait::async_trait;
use tokio::sync::mpsc;

use sensormux_core::{FrequencyBounds, Reading, ReportingMode, SensorKind};

/// Configuration requested from the backend for one sensor kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorConfiguration {
    /// Negotiated sampling frequency in Hz.
    pub frequency: f64,
    /// Connection-wide reporting mode.
    pub mode: ReportingMode,
}

/// Event produced by an open sensor channel.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// New raw reading.
    Reading(Reading),
    /// The sensor stopped producing readings.
    Error(String),
}

/// An opened sensor: capabilities plus its event stream.
#[derive(Debug)]
pub struct SensorChannel {
    /// Supported sampling frequencies.
    pub bounds: FrequencyBounds,
    /// Reporting mode of the underlying sensor.
    pub mode: ReportingMode,
    /// Readings and runtime errors. Closing the sender is treated as an error.
    pub events: mpsc::Receiver<BackendEvent>,
}

/// Reasons a sensor cannot be opened at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OpenFailure {
    #[error("Sensor is not available")]
    Unavailable,

    #[error("Access to sensor was denied")]
    Denied,
}

/// Backend rejected a configuration or failed after accepting it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct BackendFailure {
    pub reason: String,
}

impl BackendFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Platform sensor backend.
///
/// `remove_configuration`, `suspend` and `resume` are acknowledged when the
/// returned future completes and must be idempotent.
#[async_trait]
pub trait SensorBackend: Send + Sync {
    /// Open a sensor, returning its capabilities and event stream.
    async fn open(&self, kind: SensorKind) -> Result<SensorChannel, OpenFailure>;

    /// Install the configuration for `kind` and start the sensor.
    async fn add_configuration(
        &self,
        kind: SensorKind,
        config: SensorConfiguration,
    ) -> Result<(), BackendFailure>;

    /// Remove the configuration for `kind`.
    async fn remove_configuration(&self, kind: SensorKind);

    /// Pause reading delivery for `kind`.
    async fn suspend(&self, kind: SensorKind);

    /// Resume reading delivery for `kind`.
    async fn resume(&self, kind: SensorKind);
}
