//! Field maps for the messages the engine sends, and readers for the ones
//! it interprets.

use std::collections::HashMap;

use super::mode::{flags, FlightMode};
use crate::command::AckStatus;
use crate::protocol::{TypedMessage, Value};

/// MAV_CMD_DO_SET_MODE
pub const CMD_DO_SET_MODE: u16 = 176;
/// MAV_CMD_DO_SET_HOME
pub const CMD_DO_SET_HOME: u16 = 179;
/// MAV_CMD_REQUEST_AUTOPILOT_CAPABILITIES
pub const CMD_REQUEST_AUTOPILOT_CAPABILITIES: u16 = 520;

/// MAV_PARAM_TYPE_REAL32
pub const PARAM_TYPE_REAL32: u8 = 9;

/// Parameter names are at most 16 bytes on the wire
pub const PARAM_ID_LEN: usize = 16;

/// Addressee of an outgoing message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    /// Vehicle system id
    pub system: u8,
    /// Vehicle component id
    pub component: u8,
}

type Fields = HashMap<String, Value>;

fn fields<const N: usize>(entries: [(&str, Value); N]) -> Fields {
    entries
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

/// COMMAND_LONG
pub fn command_long(target: Target, opcode: u16, params: [f32; 7], confirmation: u8) -> Fields {
    let mut out = fields([
        ("target_system", Value::U8(target.system)),
        ("target_component", Value::U8(target.component)),
        ("command", Value::U16(opcode)),
        ("confirmation", Value::U8(confirmation)),
    ]);
    for (i, p) in params.iter().enumerate() {
        out.insert(format!("param{}", i + 1), Value::F32(*p));
    }
    out
}

/// PARAM_REQUEST_LIST
pub fn param_request_list(target: Target) -> Fields {
    fields([
        ("target_system", Value::U8(target.system)),
        ("target_component", Value::U8(target.component)),
    ])
}

/// PARAM_REQUEST_READ by index
pub fn param_request_read(target: Target, index: u16) -> Fields {
    fields([
        ("target_system", Value::U8(target.system)),
        ("target_component", Value::U8(target.component)),
        ("param_id", Value::Text(Vec::new())),
        // int16 on the wire; same bits
        ("param_index", Value::I16(index as i16)),
    ])
}

/// PARAM_SET
pub fn param_set(target: Target, name: &str, value: f32) -> Fields {
    fields([
        ("target_system", Value::U8(target.system)),
        ("target_component", Value::U8(target.component)),
        ("param_id", Value::text(name)),
        ("param_value", Value::F32(value)),
        ("param_type", Value::U8(PARAM_TYPE_REAL32)),
    ])
}

/// RC_CHANNELS_OVERRIDE
pub fn rc_channels_override(target: Target, channels: &[u16; 8]) -> Fields {
    let mut out = fields([
        ("target_system", Value::U8(target.system)),
        ("target_component", Value::U8(target.component)),
    ]);
    for (i, raw) in channels.iter().enumerate() {
        out.insert(format!("chan{}_raw", i + 1), Value::U16(*raw));
    }
    out
}

/// DO_SET_MODE parameters for the requested mode and arm state
pub fn set_mode_params(mode: Option<FlightMode>, armed: bool) -> [f32; 7] {
    let mut base = flags::CUSTOM_MODE_ENABLED;
    if armed {
        base |= flags::SAFETY_ARMED;
    }
    let (main, sub) = match mode {
        Some(mode) => {
            base |= mode.base_flags();
            mode.custom_modes()
        }
        None => (0, 0),
    };
    [base as f32, main as f32, sub as f32, 0.0, 0.0, 0.0, 0.0]
}

/// DO_SET_HOME parameters
pub fn set_home_params(lat: f32, lon: f32, alt: f32, relative: bool) -> [f32; 7] {
    let rel = if relative { 1.0 } else { 0.0 };
    [rel, 0.0, 0.0, 0.0, lat, lon, alt]
}

/// HEARTBEAT: armed flag and flight mode
pub fn read_heartbeat(msg: &TypedMessage) -> (bool, Option<FlightMode>) {
    let base = msg.get_u64("base_mode").unwrap_or(0) as u8;
    let custom = msg.get_u64("custom_mode").unwrap_or(0) as u32;
    (
        base & flags::SAFETY_ARMED != 0,
        FlightMode::from_custom_mode(custom),
    )
}

/// COMMAND_ACK: opcode and status
pub fn read_command_ack(msg: &TypedMessage) -> Option<(u16, AckStatus)> {
    let opcode = u16::try_from(msg.get_u64("command")?).ok()?;
    let result = u8::try_from(msg.get_u64("result")?).ok()?;
    Some((opcode, AckStatus::from_result_code(result)))
}

/// A PARAM_VALUE entry
#[derive(Debug, Clone, PartialEq)]
pub struct ParamValue {
    /// Parameter name
    pub name: String,
    /// Value
    pub value: f32,
    /// Total parameters on the vehicle
    pub count: u16,
    /// Index of this parameter
    pub index: u16,
}

/// PARAM_VALUE
pub fn read_param_value(msg: &TypedMessage) -> Option<ParamValue> {
    Some(ParamValue {
        name: msg.get_str("param_id")?,
        value: msg.get_f64("param_value")? as f32,
        count: u16::try_from(msg.get_u64("param_count")?).ok()?,
        index: u16::try_from(msg.get_u64("param_index")?).ok()?,
    })
}

/// STATUSTEXT: severity and text
pub fn read_statustext(msg: &TypedMessage) -> Option<(u8, String)> {
    let severity = u8::try_from(msg.get_u64("severity")?).ok()?;
    Some((severity, msg.get_str("text")?))
}
