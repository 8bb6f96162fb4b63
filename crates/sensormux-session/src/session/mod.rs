//! Session management and multiplexing.
//!
//! One session task per sensor kind owns the backend connection and fans
//! readings out to every registered handle.

mod multiplexer;
mod state;
pub(crate) mod types;

pub use multiplexer::SensorMultiplexer;
pub use types::{ConnectionInfo, MultiplexerConfig, MultiplexerStats};
