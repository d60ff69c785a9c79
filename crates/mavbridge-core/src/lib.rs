//! # MavBridge Core Library
//!
//! Codec and synchronization core for a MAVLink 1.0 vehicle link.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Message dialect loading (MAVLink XML) into a schema registry
//! - Schema-driven packet decoding and encoding with the X.25 checksum
//! - Per-message-kind link health watchdogs
//! - A priority command queue with acknowledgement tracking and retries
//! - Parameter table synchronization
//! - A vehicle engine tying it all together behind a snapshot and command API
//!
//! ## Example
//!
//! ```rust,ignore
//! use mavbridge_core::prelude::*;
//! use std::sync::Arc;
//!
//! let registry = SchemaRegistry::builtin()?;
//! let codec = Arc::new(Codec::new(Arc::new(registry)));
//! let (engine, mut outbound) = VehicleEngine::start(codec, EngineConfig::default());
//!
//! // Feed inbound datagrams
//! engine.process_datagram(&datagram);
//!
//! // Read the aggregate state
//! let state = engine.snapshot();
//! println!("phase: {:?}, armed: {}", state.phase, state.armed);
//! ```

pub mod command;
pub mod config;
pub mod health;
pub mod params;
pub mod protocol;
pub mod schema;
pub mod vehicle;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::command::{AckStatus, CommandError, CommandHandle, CommandQueue};
    pub use crate::config::EngineConfig;
    pub use crate::health::{Health, HealthEvent, HealthMonitor};
    pub use crate::params::{ParamError, ParamSync};
    pub use crate::protocol::{Codec, FrameCodec, Packet, ProtocolError, TypedMessage, Value};
    pub use crate::schema::{MessageSchema, SchemaError, SchemaRegistry};
    pub use crate::vehicle::{FlightMode, Phase, Subsystem, VehicleEngine, VehicleState};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
