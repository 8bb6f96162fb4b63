//! `SensorMux` Core Library
//!
//! Shared functionality for `SensorMux` components:
//! - Sensor kind descriptors and reading model
//! - Reference-frame remapping
//! - Frequency negotiation
//! - Capability (feature) policy engine
//! - Configuration resolution and hierarchy
//! - Common error types

pub mod config;
pub mod error;
pub mod frequency;
pub mod policy;
pub mod reading;
pub mod sensor;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, ErrorClass, Result, SensorError};
pub use frequency::{FrequencyError, FrequencyPolicy, NonPositiveFrequency, negotiate};
pub use policy::{CapabilityAction, CapabilityPolicy, CapabilityRule};
pub use reading::{Reading, ReferenceFrame, ScreenAngle};
pub use sensor::{FrequencyBounds, ReadingShape, ReportingMode, SensorKind};
