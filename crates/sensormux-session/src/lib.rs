//! `SensorMux` session multiplexer.
//!
//! Lets many logical sensor handles of the same kind share one backend
//! connection:
//! - frequency negotiation across live handles
//! - per-handle fan-out with reference-frame remapping and throttling
//! - suspend/resume driven by visibility and focus signals
//! - uniform failure delivery to every handle of a kind

pub mod backend;
pub mod connection;
pub mod handle;
pub mod lifecycle;
pub mod session;

pub use backend::{
    BackendEvent, BackendFailure, OpenFailure, SensorBackend, SensorChannel, SensorConfiguration,
};
pub use connection::ConnectionState;
pub use handle::{HandleId, HandleState, SensorEvent, SensorHandle, SensorOptions};
pub use lifecycle::{LifecycleHooks, LifecycleState, LifecycleTransition};
pub use session::{ConnectionInfo, MultiplexerConfig, MultiplexerStats, SensorMultiplexer};
