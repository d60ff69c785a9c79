//! PX4 flight modes
//!
//! PX4 packs its mode into HEARTBEAT `custom_mode`: main mode in bits
//! 16..24, sub mode (for the auto family) in bits 24..32.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Base mode flags carried in HEARTBEAT and DO_SET_MODE
pub mod flags {
    /// Custom mode fields are valid
    pub const CUSTOM_MODE_ENABLED: u8 = 1;
    /// Autonomous mode
    pub const AUTO_ENABLED: u8 = 4;
    /// Guided mode
    pub const GUIDED_ENABLED: u8 = 8;
    /// Attitude stabilization
    pub const STABILIZE_ENABLED: u8 = 16;
    /// Pilot input accepted
    pub const MANUAL_INPUT_ENABLED: u8 = 64;
    /// Motors armed
    pub const SAFETY_ARMED: u8 = 128;
}

const MAIN_MANUAL: u8 = 1;
const MAIN_ALTCTL: u8 = 2;
const MAIN_POSCTL: u8 = 3;
const MAIN_AUTO: u8 = 4;
const MAIN_ACRO: u8 = 5;
const MAIN_STABILIZED: u8 = 7;
const MAIN_RATTITUDE: u8 = 8;

const AUTO_READY: u8 = 1;
const AUTO_TAKEOFF: u8 = 2;
const AUTO_LOITER: u8 = 3;
const AUTO_MISSION: u8 = 4;
const AUTO_RTL: u8 = 5;
const AUTO_LAND: u8 = 6;
const AUTO_FOLLOW: u8 = 8;

/// Named flight mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlightMode {
    /// Direct pilot control
    Manual,
    /// Self-levelling, pilot controls attitude
    Stabilized,
    /// Rate control
    Acro,
    /// Rate control with attitude assist near centre stick
    RAttitude,
    /// Altitude hold
    Altitude,
    /// Position hold
    Position,
    /// Loiter at the current position
    Hold,
    /// Follow a target
    Follow,
    /// Return to launch
    #[serde(rename = "RTL")]
    Rtl,
    /// Auto, ready
    Auto,
    /// Fly the uploaded mission
    Mission,
    /// Automatic takeoff
    Takeoff,
    /// Automatic landing
    Land,
}

impl FlightMode {
    /// Every mode that can be requested
    pub const ALL: [FlightMode; 13] = [
        FlightMode::Manual,
        FlightMode::Stabilized,
        FlightMode::Acro,
        FlightMode::RAttitude,
        FlightMode::Altitude,
        FlightMode::Position,
        FlightMode::Hold,
        FlightMode::Follow,
        FlightMode::Rtl,
        FlightMode::Auto,
        FlightMode::Mission,
        FlightMode::Takeoff,
        FlightMode::Land,
    ];

    /// PX4 (main, sub) custom mode pair
    pub fn custom_modes(self) -> (u8, u8) {
        match self {
            FlightMode::Manual => (MAIN_MANUAL, 0),
            FlightMode::Stabilized => (MAIN_STABILIZED, 0),
            FlightMode::Acro => (MAIN_ACRO, 0),
            FlightMode::RAttitude => (MAIN_RATTITUDE, 0),
            FlightMode::Altitude => (MAIN_ALTCTL, 0),
            FlightMode::Position => (MAIN_POSCTL, 0),
            FlightMode::Hold => (MAIN_AUTO, AUTO_LOITER),
            FlightMode::Follow => (MAIN_AUTO, AUTO_FOLLOW),
            FlightMode::Rtl => (MAIN_AUTO, AUTO_RTL),
            FlightMode::Auto => (MAIN_AUTO, AUTO_READY),
            FlightMode::Mission => (MAIN_AUTO, AUTO_MISSION),
            FlightMode::Takeoff => (MAIN_AUTO, AUTO_TAKEOFF),
            FlightMode::Land => (MAIN_AUTO, AUTO_LAND),
        }
    }

    /// Base mode flags implied by the mode, excluding the armed bit
    pub fn base_flags(self) -> u8 {
        use flags::*;
        match self {
            FlightMode::Manual | FlightMode::Stabilized | FlightMode::RAttitude => {
                MANUAL_INPUT_ENABLED | STABILIZE_ENABLED
            }
            FlightMode::Acro => MANUAL_INPUT_ENABLED,
            FlightMode::Altitude | FlightMode::Position => {
                MANUAL_INPUT_ENABLED | STABILIZE_ENABLED | GUIDED_ENABLED
            }
            _ => AUTO_ENABLED | GUIDED_ENABLED | STABILIZE_ENABLED,
        }
    }

    /// Decode a HEARTBEAT `custom_mode`
    pub fn from_custom_mode(custom_mode: u32) -> Option<Self> {
        let main = ((custom_mode >> 16) & 0xff) as u8;
        let sub = ((custom_mode >> 24) & 0xff) as u8;
        match main {
            MAIN_MANUAL => Some(FlightMode::Manual),
            MAIN_ALTCTL => Some(FlightMode::Altitude),
            MAIN_POSCTL => Some(FlightMode::Position),
            MAIN_ACRO => Some(FlightMode::Acro),
            MAIN_STABILIZED => Some(FlightMode::Stabilized),
            MAIN_RATTITUDE => Some(FlightMode::RAttitude),
            MAIN_AUTO => match sub {
                AUTO_READY => Some(FlightMode::Auto),
                AUTO_TAKEOFF => Some(FlightMode::Takeoff),
                AUTO_LOITER => Some(FlightMode::Hold),
                AUTO_MISSION => Some(FlightMode::Mission),
                AUTO_RTL => Some(FlightMode::Rtl),
                AUTO_LAND => Some(FlightMode::Land),
                AUTO_FOLLOW => Some(FlightMode::Follow),
                _ => None,
            },
            _ => None,
        }
    }

    /// Display name
    pub fn name(self) -> &'static str {
        match self {
            FlightMode::Manual => "Manual",
            FlightMode::Stabilized => "Stabilized",
            FlightMode::Acro => "Acro",
            FlightMode::RAttitude => "RAttitude",
            FlightMode::Altitude => "Altitude",
            FlightMode::Position => "Position",
            FlightMode::Hold => "Hold",
            FlightMode::Follow => "Follow",
            FlightMode::Rtl => "RTL",
            FlightMode::Auto => "Auto",
            FlightMode::Mission => "Mission",
            FlightMode::Takeoff => "Takeoff",
            FlightMode::Land => "Land",
        }
    }
}

impl fmt::Display for FlightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FlightMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FlightMode::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown flight mode: {}", s))
    }
}

/// Custom mode word for a (main, sub) pair, as PX4 reports it
pub fn custom_mode_word(main: u8, sub: u8) -> u32 {
    ((sub as u32) << 24) | ((main as u32) << 16)
}
