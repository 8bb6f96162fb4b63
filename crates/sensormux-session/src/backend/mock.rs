//! In-process sensor backend for tests.
//!
//! Records every call, lets tests inject readings and failures per sensor
//! kind, and can hold configuration and removal requests until released.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify, mpsc, watch};

use sensormux_core::{FrequencyBounds, Reading, ReportingMode, SensorKind};

use super::{
    BackendEvent, BackendFailure, OpenFailure, SensorBackend, SensorChannel, SensorConfiguration,
};

const EVENT_CAPACITY: usize = 256;
const WAIT_TIMEOUT: Duration = Duration::from_secs(2);

/// A call received by the mock.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Open(SensorKind),
    AddConfiguration { kind: SensorKind, frequency: f64 },
    RemoveConfiguration(SensorKind),
    Suspend(SensorKind),
    Resume(SensorKind),
}

/// Per-kind behaviour of the mock.
#[derive(Debug, Clone)]
pub struct MockSensorSettings {
    /// `open` fails with [`OpenFailure::Unavailable`].
    pub unavailable: bool,
    /// `open` fails with [`OpenFailure::Denied`].
    pub denied: bool,
    /// `add_configuration` fails.
    pub start_should_fail: bool,
    /// `add_configuration` waits for [`MockBackend::release_configuration`].
    pub hold_configuration: bool,
    /// `remove_configuration` waits for [`MockBackend::release_removal`].
    pub hold_removal: bool,
    pub bounds: FrequencyBounds,
    pub mode: ReportingMode,
}

impl Default for MockSensorSettings {
    fn default() -> Self {
        Self {
            unavailable: false,
            denied: false,
            start_should_fail: false,
            hold_configuration: false,
            hold_removal: false,
            bounds: FrequencyBounds::new(5.0, 1.0, 100.0),
            mode: ReportingMode::OnChange,
        }
    }
}

#[derive(Debug)]
struct MockSensor {
    events: mpsc::Sender<BackendEvent>,
    configuration: Option<SensorConfiguration>,
    suspended: bool,
}

#[derive(Debug, Default)]
struct MockState {
    settings: HashMap<SensorKind, MockSensorSettings>,
    sensors: HashMap<SensorKind, MockSensor>,
}

/// Mock sensor backend.
#[derive(Debug)]
pub struct MockBackend {
    state: Mutex<MockState>,
    calls: watch::Sender<Vec<BackendCall>>,
    release: Notify,
    release_removal: Notify,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            calls: watch::Sender::new(Vec::new()),
            release: Notify::new(),
            release_removal: Notify::new(),
        }
    }

    /// Change the settings for `kind`. Applies from the next call.
    pub async fn update(&self, kind: SensorKind, change: impl FnOnce(&mut MockSensorSettings)) {
        let mut state = self.state.lock().await;
        change(state.settings.entry(kind).or_default());
    }

    /// All calls so far, in order.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.borrow().clone()
    }

    /// Number of calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&BackendCall) -> bool) -> usize {
        self.calls.borrow().iter().filter(|&c| predicate(c)).count()
    }

    /// Wait until `predicate` matches at least `n` calls. Gives up after a
    /// couple of seconds and returns `false`.
    pub async fn wait_for_count(&self, n: usize, predicate: impl Fn(&BackendCall) -> bool) -> bool {
        let mut rx = self.calls.subscribe();
        tokio::time::timeout(
            WAIT_TIMEOUT,
            rx.wait_for(|calls| calls.iter().filter(|&c| predicate(c)).count() >= n),
        )
        .await
        .is_ok_and(|r| r.is_ok())
    }

    /// Let one held `add_configuration` call complete.
    pub fn release_configuration(&self) {
        self.release.notify_one();
    }

    /// Let one held `remove_configuration` call complete.
    pub fn release_removal(&self) {
        self.release_removal.notify_one();
    }

    /// Emit a reading. Returns `false` unless the sensor is configured and
    /// not suspended.
    pub async fn push_reading(&self, kind: SensorKind, values: &[f64], timestamp_ms: u64) -> bool {
        let state = self.state.lock().await;
        let Some(sensor) = state.sensors.get(&kind) else {
            return false;
        };
        if sensor.configuration.is_none() || sensor.suspended {
            return false;
        }
        let reading = Reading::from_slice(values, Duration::from_millis(timestamp_ms));
        sensor.events.try_send(BackendEvent::Reading(reading)).is_ok()
    }

    /// Report a runtime failure on an open sensor.
    pub async fn fail_stream(&self, kind: SensorKind, reason: &str) -> bool {
        let state = self.state.lock().await;
        state.sensors.get(&kind).is_some_and(|sensor| {
            sensor
                .events
                .try_send(BackendEvent::Error(reason.to_string()))
                .is_ok()
        })
    }

    /// Frequency of the installed configuration, if any.
    pub async fn sampling_frequency(&self, kind: SensorKind) -> Option<f64> {
        let state = self.state.lock().await;
        state
            .sensors
            .get(&kind)
            .and_then(|s| s.configuration)
            .map(|c| c.frequency)
    }

    pub async fn is_suspended(&self, kind: SensorKind) -> bool {
        let state = self.state.lock().await;
        state.sensors.get(&kind).is_some_and(|s| s.suspended)
    }

    fn record(&self, call: BackendCall) {
        self.calls.send_modify(|calls| calls.push(call));
    }

    async fn settings(&self, kind: SensorKind) -> MockSensorSettings {
        let state = self.state.lock().await;
        state.settings.get(&kind).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl SensorBackend for MockBackend {
    async fn open(&self, kind: SensorKind) -> Result<SensorChannel, OpenFailure> {
        self.record(BackendCall::Open(kind));
        let settings = self.settings(kind).await;
        if settings.unavailable {
            return Err(OpenFailure::Unavailable);
        }
        if settings.denied {
            return Err(OpenFailure::Denied);
        }

        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        self.state.lock().await.sensors.insert(
            kind,
            MockSensor {
                events: tx,
                configuration: None,
                suspended: false,
            },
        );
        Ok(SensorChannel {
            bounds: settings.bounds,
            mode: settings.mode,
            events: rx,
        })
    }

    async fn add_configuration(
        &self,
        kind: SensorKind,
        config: SensorConfiguration,
    ) -> Result<(), BackendFailure> {
        self.record(BackendCall::AddConfiguration {
            kind,
            frequency: config.frequency,
        });
        let settings = self.settings(kind).await;
        if settings.hold_configuration {
            self.release.notified().await;
        }
        if settings.start_should_fail {
            return Err(BackendFailure::new("sensor failed to start"));
        }

        let mut state = self.state.lock().await;
        let sensor = state
            .sensors
            .get_mut(&kind)
            .ok_or_else(|| BackendFailure::new("sensor is not open"))?;
        sensor.configuration = Some(config);
        sensor.suspended = false;
        Ok(())
    }

    async fn remove_configuration(&self, kind: SensorKind) {
        self.record(BackendCall::RemoveConfiguration(kind));
        if self.settings(kind).await.hold_removal {
            self.release_removal.notified().await;
        }
        if let Some(sensor) = self.state.lock().await.sensors.get_mut(&kind) {
            sensor.configuration = None;
            sensor.suspended = false;
        }
    }

    async fn suspend(&self, kind: SensorKind) {
        self.record(BackendCall::Suspend(kind));
        if let Some(sensor) = self.state.lock().await.sensors.get_mut(&kind) {
            sensor.suspended = true;
        }
    }

    async fn resume(&self, kind: SensorKind) {
        self.record(BackendCall::Resume(kind));
        if let Some(sensor) = self.state.lock().await.sensors.get_mut(&kind) {
            sensor.suspended = false;
        }
    }
}
