//! Session multiplexer for shared sensor connections.
//!
//! Handles of the same sensor kind share one backend connection, owned by
//! that kind's session task. The multiplexer is the registry of those tasks
//! and the entry point for lifecycle and orientation signals.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{debug, info};

use sensormux_core::{Config, FrequencyPolicy, ReferenceFrame, ScreenAngle, SensorError, SensorKind};

use super::state::TypeSession;
use super::types::{ConnectionInfo, MultiplexerConfig, MultiplexerStats, SessionCommand};
use crate::backend::SensorBackend;
use crate::handle::{SensorHandle, SensorOptions};
use crate::lifecycle::{LifecycleHooks, LifecycleState, LifecycleTransition};

type SessionSender = mpsc::UnboundedSender<SessionCommand>;

#[derive(Default)]
struct Registry {
    sessions: HashMap<SensorKind, SessionSender>,
    lifecycle: LifecycleState,
    screen_angle: ScreenAngle,
}

/// Session multiplexer: one shared backend connection per sensor kind.
pub struct SensorMultiplexer {
    backend: Arc<dyn SensorBackend>,
    config: MultiplexerConfig,
    frequency_policy: FrequencyPolicy,
    registry: Arc<RwLock<Registry>>,
}

impl SensorMultiplexer {
    /// Create a new multiplexer on top of `backend`.
    pub fn new(backend: Arc<dyn SensorBackend>, config: MultiplexerConfig) -> Self {
        let frequency_policy = config.settings.frequency_policy();
        Self {
            backend,
            config,
            frequency_policy,
            registry: Arc::new(RwLock::new(Registry::default())),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults(backend: Arc<dyn SensorBackend>) -> Self {
        Self::new(backend, MultiplexerConfig::default())
    }

    /// Create from a resolved configuration.
    pub fn from_config(backend: Arc<dyn SensorBackend>, config: &Config) -> Self {
        Self::new(backend, MultiplexerConfig::from_config(config))
    }

    pub const fn config(&self) -> &MultiplexerConfig {
        &self.config
    }

    /// Create a handle for `kind`.
    ///
    /// Capability policy, frequency and reference frame are checked here;
    /// a rejected handle never reaches the kind's session.
    pub async fn create_sensor(
        &self,
        kind: SensorKind,
        options: SensorOptions,
    ) -> Result<SensorHandle, SensorError> {
        self.config.policy.check(kind, options.origin.as_deref())?;

        if let Some(frequency) = options.frequency {
            self.frequency_policy
                .validate(frequency)
                .map_err(|_| SensorError::InvalidFrequency { value: frequency })?;
        }

        if options.reference_frame == ReferenceFrame::Screen && !kind.supports_remap() {
            return Err(SensorError::InvalidReferenceFrame { kind });
        }

        let session = self.session(kind).await;
        let handle = SensorHandle::new(kind, &options, session);
        debug!(handle_id = %handle.id(), %kind, frequency = ?options.frequency, "Created sensor handle");
        Ok(handle)
    }

    /// Get or spawn the session task for `kind`.
    #[allow(clippy::significant_drop_tightening)]
    async fn session(&self, kind: SensorKind) -> SessionSender {
        let mut registry = self.registry.write().await;

        if let Some(tx) = registry.sessions.get(&kind) {
            return tx.clone();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let session = TypeSession::new(
            kind,
            Arc::clone(&self.backend),
            self.config.settings.clone(),
            registry.lifecycle.is_suspended(),
            registry.screen_angle,
        );
        tokio::spawn(session.run(rx));
        registry.sessions.insert(kind, tx.clone());
        drop(registry);

        info!(%kind, "Created sensor session");
        tx
    }

    /// Connection details for `kind`, once its backend work has settled.
    ///
    /// `None` if no handle of this kind was ever created.
    pub async fn connection_info(&self, kind: SensorKind) -> Option<ConnectionInfo> {
        let tx = self.registry.read().await.sessions.get(&kind).cloned()?;
        inspect(&tx).await
    }

    /// Get multiplexer statistics.
    ///
    /// Sessions are inspected one after another and each answers only once
    /// its backend work has settled, so a kind whose backend call never
    /// returns holds up the result for every kind.
    pub async fn stats(&self) -> MultiplexerStats {
        let senders: Vec<SessionSender> =
            self.registry.read().await.sessions.values().cloned().collect();

        let mut connection_count = 0;
        let mut total_handles = 0;
        for tx in &senders {
            if let Some(info) = inspect(tx).await {
                if info.state.has_configuration() {
                    connection_count += 1;
                }
                total_handles += info.handle_count;
            }
        }

        MultiplexerStats {
            connection_count,
            total_handles,
        }
    }

    /// Update the screen orientation used for screen-frame remapping.
    pub async fn set_screen_orientation(&self, angle: ScreenAngle) {
        let mut registry = self.registry.write().await;
        if registry.screen_angle == angle {
            return;
        }
        registry.screen_angle = angle;
        for tx in registry.sessions.values() {
            let _ = tx.send(SessionCommand::ScreenOrientation(angle));
        }
        drop(registry);
        debug!(degrees = angle.degrees(), "Screen orientation updated");
    }

    /// Whether sensors are currently suspended by a lifecycle signal.
    pub async fn is_suspended(&self) -> bool {
        self.registry.read().await.lifecycle.is_suspended()
    }

    /// Apply a lifecycle change and broadcast the resulting transition.
    ///
    /// The registry lock is held while sending so transitions reach every
    /// session in the order they were decided.
    async fn apply_lifecycle(
        &self,
        change: impl FnOnce(&mut LifecycleState) -> Option<LifecycleTransition> + Send,
    ) {
        let mut registry = self.registry.write().await;
        let Some(transition) = change(&mut registry.lifecycle) else {
            return;
        };
        for tx in registry.sessions.values() {
            let command = match transition {
                LifecycleTransition::Suspend => SessionCommand::Suspend,
                LifecycleTransition::Resume => SessionCommand::Resume,
            };
            let _ = tx.send(command);
        }
        let sessions = registry.sessions.len();
        drop(registry);
        info!(?transition, sessions, "Lifecycle transition");
    }
}

#[async_trait]
impl LifecycleHooks for SensorMultiplexer {
    async fn on_visibility_change(&self, hidden: bool) {
        self.apply_lifecycle(|state| state.set_hidden(hidden)).await;
    }

    async fn on_focus_stolen(&self, stolen: bool) {
        self.apply_lifecycle(|state| state.set_focus_stolen(stolen))
            .await;
    }
}

async fn inspect(tx: &SessionSender) -> Option<ConnectionInfo> {
    let (reply_tx, reply_rx) = oneshot::channel();
    tx.send(SessionCommand::Inspect(reply_tx)).ok()?;
    reply_rx.await.ok()
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::connection::ConnectionState;
    use sensormux_core::{CapabilityAction, CapabilityPolicy, CapabilityRule};

    fn mux() -> (Arc<MockBackend>, SensorMultiplexer) {
        let mock = Arc::new(MockBackend::new());
        let mux = SensorMultiplexer::with_defaults(mock.clone());
        (mock, mux)
    }

    #[tokio::test]
    async fn create_multiplexer() {
        let (_, mux) = mux();
        let stats = mux.stats().await;
        assert_eq!(stats.connection_count, 0);
        assert_eq!(stats.total_handles, 0);
        assert!(mux.connection_info(SensorKind::Gyroscope).await.is_none());
    }

    #[tokio::test]
    async fn start_and_stop() {
        let (mock, mux) = mux();
        let mut handle = mux
            .create_sensor(SensorKind::Gyroscope, SensorOptions::with_frequency(30.0))
            .await
            .unwrap();
        handle.start().await.unwrap();
        assert!(handle.activated());

        let stats = mux.stats().await;
        assert_eq!(stats.connection_count, 1);
        assert_eq!(stats.total_handles, 1);
        assert_eq!(mock.sampling_frequency(SensorKind::Gyroscope).await, Some(30.0));

        handle.stop();
        let info = mux.connection_info(SensorKind::Gyroscope).await.unwrap();
        assert_eq!(info.state, ConnectionState::Unconfigured);
        assert_eq!(info.handle_count, 0);
        assert_eq!(mock.sampling_frequency(SensorKind::Gyroscope).await, None);
    }

    #[tokio::test]
    async fn invalid_options_never_reach_backend() {
        let (mock, mux) = mux();

        let err = mux
            .create_sensor(SensorKind::Accelerometer, SensorOptions::with_frequency(0.0))
            .await
            .unwrap_err();
        assert_eq!(err, SensorError::InvalidFrequency { value: 0.0 });

        let err = mux
            .create_sensor(
                SensorKind::AmbientLight,
                SensorOptions::default().reference_frame(ReferenceFrame::Screen),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SensorError::InvalidReferenceFrame {
                kind: SensorKind::AmbientLight
            }
        );

        assert!(mock.calls().is_empty());
        assert_eq!(mux.stats().await.total_handles, 0);
    }

    #[tokio::test]
    async fn cross_origin_needs_an_allow_rule() {
        let policy = CapabilityPolicy::with_rules(vec![CapabilityRule {
            id: "trusted-motion".to_string(),
            feature_pattern: "accelerometer".to_string(),
            origin_pattern: "https://trusted.example".to_string(),
            action: CapabilityAction::Allow,
            priority: 10,
            description: None,
        }]);
        let config = MultiplexerConfig {
            policy,
            ..Default::default()
        };
        let mux = SensorMultiplexer::new(Arc::new(MockBackend::new()), config);

        let options = SensorOptions::default().origin("https://trusted.example");
        assert!(mux.create_sensor(SensorKind::Accelerometer, options).await.is_ok());

        let options = SensorOptions::default().origin("https://evil.example");
        let err = mux
            .create_sensor(SensorKind::Accelerometer, options)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SensorError::PermissionPolicyViolation {
                feature: "accelerometer".to_string()
            }
        );
    }

    #[tokio::test]
    async fn lifecycle_state_is_tracked() {
        let (_, mux) = mux();
        assert!(!mux.is_suspended().await);
        mux.on_visibility_change(true).await;
        mux.on_focus_stolen(true).await;
        assert!(mux.is_suspended().await);
        mux.on_visibility_change(false).await;
        assert!(mux.is_suspended().await);
        mux.on_focus_stolen(false).await;
        assert!(!mux.is_suspended().await);
    }

    #[tokio::test]
    async fn new_session_starts_suspended_while_hidden() {
        let (mock, mux) = mux();
        mux.on_visibility_change(true).await;

        let mut handle = mux
            .create_sensor(SensorKind::Magnetometer, SensorOptions::default())
            .await
            .unwrap();
        handle.start().await.unwrap();
        assert_eq!(handle.state(), crate::HandleState::Suspended);
        assert!(mock.is_suspended(SensorKind::Magnetometer).await);

        mux.on_visibility_change(false).await;
        let info = mux.connection_info(SensorKind::Magnetometer).await.unwrap();
        assert_eq!(info.state, ConnectionState::Configured);
        assert_eq!(handle.state(), crate::HandleState::Activated);
    }
}
