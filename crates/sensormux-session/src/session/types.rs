//! Session multiplexer types.

use std::time::Duration;

use tokio::sync::oneshot;

use sensormux_core::config::MultiplexerSettings;
use sensormux_core::{
    CapabilityPolicy, Config, FrequencyBounds, ReferenceFrame, ReportingMode, ScreenAngle,
    SensorError, SensorKind,
};

use crate::connection::ConnectionState;
use crate::handle::{HandleId, HandleSink};

/// Configuration for the session multiplexer.
#[derive(Debug, Clone, Default)]
pub struct MultiplexerConfig {
    /// Frequency cap, non-positive handling, throttling, suspend policy.
    pub settings: MultiplexerSettings,
    /// Capability policy consulted when handles are created.
    pub policy: CapabilityPolicy,
}

impl MultiplexerConfig {
    /// Build from a resolved [`Config`].
    pub fn from_config(config: &Config) -> Self {
        Self {
            settings: config.multiplexer.clone(),
            policy: config.policy.build(),
        }
    }
}

/// Snapshot of one sensor kind's backend connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    pub kind: SensorKind,
    pub state: ConnectionState,
    /// Effective frequency, when a configuration is installed.
    pub frequency: Option<f64>,
    pub mode: ReportingMode,
    /// Backend bounds after the policy cap, when the channel is open.
    pub bounds: Option<FrequencyBounds>,
    /// Registered handles, pending ones included.
    pub handle_count: usize,
}

/// Multiplexer statistics.
#[derive(Debug)]
pub struct MultiplexerStats {
    /// Sensor kinds with an installed backend configuration.
    pub connection_count: usize,
    /// Registered handles across all kinds.
    pub total_handles: usize,
}

/// Reply sent back to a starting handle.
pub(crate) type StartReply = oneshot::Sender<Result<(), SensorError>>;

/// A handle's registration with its kind's session.
#[derive(Debug)]
pub(crate) struct Registration {
    pub id: HandleId,
    pub generation: u64,
    pub frequency: Option<f64>,
    pub frame: ReferenceFrame,
    pub sink: HandleSink,
    /// Present until the start has been answered.
    pub reply: Option<StartReply>,
    /// Timestamp of the last reading this handle was notified of.
    pub last_delivered: Option<Duration>,
}

impl Registration {
    pub fn new(
        id: HandleId,
        generation: u64,
        frequency: Option<f64>,
        frame: ReferenceFrame,
        sink: HandleSink,
        reply: StartReply,
    ) -> Self {
        Self {
            id,
            generation,
            frequency,
            frame,
            sink,
            reply: Some(reply),
            last_delivered: None,
        }
    }

    pub const fn is_pending(&self) -> bool {
        self.reply.is_some()
    }
}

/// Commands processed by a sensor kind's session, in FIFO order.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    Register(Registration),
    Deregister { id: HandleId, generation: u64 },
    Suspend,
    Resume,
    ScreenOrientation(ScreenAngle),
    Inspect(oneshot::Sender<ConnectionInfo>),
}
