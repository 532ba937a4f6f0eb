//! Telemetry bridge between a SunSpec-style solar inverter (Modbus TCP) and
//! an MQTT broker.
//!
//! The bridge polls four register batches (inverter, MPPT strings, storage
//! and grid meter), decodes and derives the published quantities, and
//! delivers them as JSON payloads on three cadence tiers (quick, medium,
//! slow). Windowed energy-flow sums ride along with the medium tier.
//!
//! Module map:
//!
//! - [`registry`]: static register map, tiers and status-text tables
//! - [`reader`] / [`publisher`]: the Modbus and MQTT transport seams
//! - [`processor`]: decode, scale, derive and queue per tier
//! - [`eflow`]: directional energy accumulation
//! - [`runner`]: the tick scheduler that stretches reads over the quick
//!   period and flushes the tiers
//! - [`config`] / [`error`]: ambient plumbing

pub mod config;
pub mod eflow;
pub mod error;
pub mod processor;
pub mod publisher;
pub mod reader;
pub mod registry;
pub mod runner;

pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use processor::Processor;
pub use publisher::{MqttPublisher, Publisher};
pub use reader::{ModbusReader, RegisterReader};
pub use runner::Runner;
