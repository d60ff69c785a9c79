//! Engine configuration
//!
//! Timing and identity settings for the [`crate::vehicle::VehicleEngine`].
//! Every field has a default, so a partial JSON object is a valid config.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine tuning knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// State handler period in milliseconds
    pub tick_ms: u64,
    /// Parameter synchronization gives up on missing entries after this
    pub param_timeout_ms: u64,
    /// Command resends after the first attempt
    pub command_retries: u32,
    /// Pause between individual parameter requests
    pub param_request_spacing_ms: u64,
    /// Wait after PARAM_SET before reading the value back
    pub param_settle_ms: u64,
    /// Polling attempts when fetching a parameter by index
    pub param_read_attempts: u32,
    /// Delay between those polling attempts
    pub param_read_delay_ms: u64,
    /// Our system id on the link
    pub system_id: u8,
    /// Our component id on the link
    pub component_id: u8,
    /// Expected HEARTBEAT period before the link is considered down
    pub heartbeat_timeout_ms: u64,
    /// Expected period for telemetry kinds feeding subsystem health
    pub telemetry_timeout_ms: u64,
    /// Resend period of an active RC override
    pub rc_resend_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_ms: 500,
            param_timeout_ms: 10_000,
            command_retries: crate::command::DEFAULT_MAX_RETRIES,
            param_request_spacing_ms: 5,
            param_settle_ms: 250,
            param_read_attempts: 10,
            param_read_delay_ms: 30,
            system_id: 255,
            component_id: 190,
            heartbeat_timeout_ms: 3_000,
            telemetry_timeout_ms: 2_000,
            rc_resend_ms: 200,
        }
    }
}

impl EngineConfig {
    /// State handler period
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Parameter synchronization timeout
    pub fn param_timeout(&self) -> Duration {
        Duration::from_millis(self.param_timeout_ms)
    }

    /// Pause between parameter requests
    pub fn param_request_spacing(&self) -> Duration {
        Duration::from_millis(self.param_request_spacing_ms)
    }

    /// Settle delay after a parameter set
    pub fn param_settle(&self) -> Duration {
        Duration::from_millis(self.param_settle_ms)
    }

    /// Delay between parameter read polls
    pub fn param_read_delay(&self) -> Duration {
        Duration::from_millis(self.param_read_delay_ms)
    }

    /// Heartbeat watchdog interval
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Telemetry watchdog interval
    pub fn telemetry_timeout(&self) -> Duration {
        Duration::from_millis(self.telemetry_timeout_ms)
    }

    /// RC override resend period
    pub fn rc_resend(&self) -> Duration {
        Duration::from_millis(self.rc_resend_ms)
    }
}
