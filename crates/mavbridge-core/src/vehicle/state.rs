//! Vehicle aggregate state

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use super::mode::FlightMode;
use crate::health::Health;
use crate::protocol::{Packet, TypedMessage};

/// Initialization phase of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Phase {
    /// No heartbeat
    #[default]
    Offline,
    /// Heartbeat seen, waiting for AUTOPILOT_VERSION
    AwaitingCapabilities,
    /// Capabilities known, fetching the parameter table
    SyncingParameters,
    /// Fully initialized; commands are dispatched
    Ready,
}

/// Vehicle subsystems whose health is derived from telemetry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Subsystem {
    /// GPS receiver
    Gps,
    /// Attitude and position estimator
    Estimator,
    /// Attitude and position controller
    Controller,
    /// RC receiver
    RadioControl,
    /// Motor outputs
    Motors,
    /// Optical flow sensor
    OpticalFlow,
    /// Distance sensor
    RangeFinder,
    /// Inertial sensors
    Imu,
}

impl Subsystem {
    /// Every subsystem
    pub const ALL: [Subsystem; 8] = [
        Subsystem::Gps,
        Subsystem::Estimator,
        Subsystem::Controller,
        Subsystem::RadioControl,
        Subsystem::Motors,
        Subsystem::OpticalFlow,
        Subsystem::RangeFinder,
        Subsystem::Imu,
    ];

    /// Messages that keep this subsystem alive
    pub fn messages(self) -> &'static [&'static str] {
        match self {
            Subsystem::Gps => &["GPS_RAW_INT"],
            Subsystem::Estimator => &["ATTITUDE", "LOCAL_POSITION_NED", "GLOBAL_POSITION_INT"],
            Subsystem::Controller => &[
                "ATTITUDE_TARGET",
                "POSITION_TARGET_LOCAL_NED",
                "POSITION_TARGET_GLOBAL_INT",
            ],
            Subsystem::RadioControl => &["RC_CHANNELS"],
            Subsystem::Motors => &["SERVO_OUTPUT_RAW"],
            Subsystem::OpticalFlow => &["OPTICAL_FLOW_RAD"],
            Subsystem::RangeFinder => &["DISTANCE_SENSOR"],
            Subsystem::Imu => &["HIGHRES_IMU"],
        }
    }
}

/// Combine the health of a subsystem's message kinds
pub fn aggregate_health(members: impl IntoIterator<Item = Health>) -> Health {
    let mut result = Health::Unknown;
    for health in members {
        match health {
            Health::Up => return Health::Up,
            Health::Down => result = Health::Down,
            Health::Unknown => {}
        }
    }
    result
}

/// A STATUSTEXT line from the vehicle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEntry {
    /// Receive time
    pub time: DateTime<Utc>,
    /// MAV_SEVERITY level (0 emergency .. 7 debug)
    pub severity: u8,
    /// Message text
    pub text: String,
}

/// Everything the engine knows about the vehicle
#[derive(Debug, Clone, Default, Serialize)]
pub struct VehicleState {
    /// Initialization phase
    pub phase: Phase,
    /// Vehicle system id, learned from the first packet
    pub system_id: Option<u8>,
    /// Vehicle component id, learned from the first packet
    pub component_id: Option<u8>,
    /// Heartbeat liveness
    pub link: Health,
    /// Per-subsystem liveness
    pub subsystems: BTreeMap<Subsystem, Health>,
    /// Motors armed
    pub armed: bool,
    /// Current flight mode, if recognized
    pub mode: Option<FlightMode>,
    /// AUTOPILOT_VERSION capability bits, once received
    pub capabilities: Option<u64>,
    /// Most recent message of every decoded kind, by name
    pub messages: BTreeMap<String, TypedMessage>,
    /// Most recent packet of every kind the schema does not describe
    pub unknown: BTreeMap<u8, Packet>,
}

impl VehicleState {
    pub(crate) fn new() -> Self {
        Self {
            subsystems: Subsystem::ALL
                .into_iter()
                .map(|s| (s, Health::Unknown))
                .collect(),
            ..Default::default()
        }
    }

    /// Latest message of a kind, by name
    pub fn message(&self, name: &str) -> Option<&TypedMessage> {
        self.messages.get(name)
    }

    /// Forget link-specific data. Telemetry is kept so the last live state
    /// stays visible.
    pub(crate) fn scrub(&mut self) {
        self.phase = Phase::Offline;
        self.link = Health::Down;
        self.capabilities = None;
    }
}
