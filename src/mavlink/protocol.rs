//! # MAVLink Protocol Constants and Types
//!
//! Core protocol definitions for the subset of MAVLink the monitor consumes.

use crate::error::{MonitorError, Result};

/// MAVLink v1 frame magic byte
pub const MAVLINK_V1_MAGIC: u8 = 0xFE;

/// MAVLink v2 frame magic byte
pub const MAVLINK_V2_MAGIC: u8 = 0xFD;

/// v1 header: magic(1) + len(1) + seq(1) + sysid(1) + compid(1) + msgid(1)
pub const MAVLINK_V1_HEADER_LEN: usize = 6;

/// v2 header: magic(1) + len(1) + incompat(1) + compat(1) + seq(1) + sysid(1) + compid(1) + msgid(3)
pub const MAVLINK_V2_HEADER_LEN: usize = 10;

/// Checksum length (both versions)
pub const MAVLINK_CHECKSUM_LEN: usize = 2;

/// Signature block appended to signed v2 frames
pub const MAVLINK_SIGNATURE_LEN: usize = 13;

/// v2 incompatibility flag: frame is signed
pub const MAVLINK_IFLAG_SIGNED: u8 = 0x01;

/// Maximum payload size (both versions)
pub const MAVLINK_MAX_PAYLOAD_LEN: usize = 255;

// Message ids
pub const MSG_ID_HEARTBEAT: u32 = 0;
pub const MSG_ID_SYS_STATUS: u32 = 1;
pub const MSG_ID_GPS_RAW_INT: u32 = 24;
pub const MSG_ID_ATTITUDE: u32 = 30;
pub const MSG_ID_GLOBAL_POSITION_INT: u32 = 33;
pub const MSG_ID_VFR_HUD: u32 = 74;
pub const MSG_ID_RADIO_STATUS: u32 = 109;
pub const MSG_ID_DISTANCE_SENSOR: u32 = 132;
pub const MSG_ID_RANGEFINDER: u32 = 173;

// Base (non-extension) payload lengths
pub const HEARTBEAT_LEN: usize = 9;
pub const SYS_STATUS_LEN: usize = 31;
pub const GPS_RAW_INT_LEN: usize = 30;
pub const ATTITUDE_LEN: usize = 28;
pub const GLOBAL_POSITION_INT_LEN: usize = 28;
pub const VFR_HUD_LEN: usize = 20;
pub const RADIO_STATUS_LEN: usize = 9;
pub const DISTANCE_SENSOR_LEN: usize = 14;
pub const RANGEFINDER_LEN: usize = 8;

/// MAV_TYPE_GCS
pub const MAV_TYPE_GCS: u8 = 6;

/// MAV_AUTOPILOT_INVALID
pub const MAV_AUTOPILOT_INVALID: u8 = 8;

/// MAV_STATE_ACTIVE
pub const MAV_STATE_ACTIVE: u8 = 4;

/// Look up CRC_EXTRA and base payload length for a message id
///
/// Returns `None` for messages outside the supported subset; such frames
/// cannot be checksum-verified and are treated as unrecognized.
pub fn message_info(msg_id: u32) -> Option<(u8, usize)> {
    match msg_id {
        MSG_ID_HEARTBEAT => Some((50, HEARTBEAT_LEN)),
        MSG_ID_SYS_STATUS => Some((124, SYS_STATUS_LEN)),
        MSG_ID_GPS_RAW_INT => Some((24, GPS_RAW_INT_LEN)),
        MSG_ID_ATTITUDE => Some((39, ATTITUDE_LEN)),
        MSG_ID_GLOBAL_POSITION_INT => Some((104, GLOBAL_POSITION_INT_LEN)),
        MSG_ID_VFR_HUD => Some((20, VFR_HUD_LEN)),
        MSG_ID_RADIO_STATUS => Some((185, RADIO_STATUS_LEN)),
        MSG_ID_DISTANCE_SENSOR => Some((85, DISTANCE_SENSOR_LEN)),
        MSG_ID_RANGEFINDER => Some((83, RANGEFINDER_LEN)),
        _ => None,
    }
}

/// Wire version of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MavlinkVersion {
    V1,
    V2,
}

/// A checksum-verified MAVLink frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MavFrame {
    pub version: MavlinkVersion,
    pub sequence: u8,
    pub system_id: u8,
    pub component_id: u8,
    pub msg_id: u32,
    /// Payload as received (v2 payloads may be zero-truncated)
    pub payload: Vec<u8>,
}

impl MavFrame {
    /// Create a new frame
    ///
    /// # Errors
    ///
    /// Returns error if payload exceeds MAVLINK_MAX_PAYLOAD_LEN (255 bytes)
    pub fn new(msg_id: u32, payload: Vec<u8>) -> Result<Self> {
        if payload.len() > MAVLINK_MAX_PAYLOAD_LEN {
            return Err(MonitorError::Protocol(
                format!("Payload size {} exceeds maximum {}", payload.len(), MAVLINK_MAX_PAYLOAD_LEN)
            ));
        }

        Ok(Self {
            version: MavlinkVersion::V2,
            sequence: 0,
            system_id: 1,
            component_id: 1,
            msg_id,
            payload,
        })
    }
}

/// HEARTBEAT (#0)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub custom_mode: u32,
    pub mav_type: u8,
    pub autopilot: u8,
    pub base_mode: u8,
    pub system_status: u8,
    pub mavlink_version: u8,
}

/// SYS_STATUS (#1), battery-related fields only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SysStatus {
    /// Battery voltage in millivolts (u16::MAX = unknown)
    pub voltage_battery: u16,
    /// Battery current in centi-amperes (-1 = unknown)
    pub current_battery: i16,
    /// Communication drop rate in centi-percent
    pub drop_rate_comm: u16,
    /// Remaining battery energy in percent (-1 = unknown)
    pub battery_remaining: i8,
}

/// GPS_RAW_INT (#24)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpsRawInt {
    pub lat: i32,
    pub lon: i32,
    /// Altitude MSL in millimetres
    pub alt: i32,
    pub fix_type: u8,
    /// 255 = unknown
    pub satellites_visible: u8,
}

/// ATTITUDE (#30), radians
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attitude {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

/// GLOBAL_POSITION_INT (#33)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalPositionInt {
    /// Degrees × 10^7
    pub lat: i32,
    /// Degrees × 10^7
    pub lon: i32,
    /// Altitude MSL in millimetres
    pub alt: i32,
    /// Altitude above home in millimetres
    pub relative_alt: i32,
    /// Centi-degrees, u16::MAX = unknown
    pub hdg: u16,
}

/// VFR_HUD (#74)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VfrHud {
    pub airspeed: f32,
    pub groundspeed: f32,
    pub alt: f32,
    pub climb: f32,
    /// Compass heading in degrees (0..360)
    pub heading: i16,
    pub throttle: u16,
}

/// RADIO_STATUS (#109)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioStatus {
    pub rxerrors: u16,
    pub fixed: u16,
    pub rssi: u8,
    pub remrssi: u8,
    pub txbuf: u8,
    pub noise: u8,
    pub remnoise: u8,
}

/// Decoded telemetry message
#[derive(Debug, Clone, PartialEq)]
pub enum MavMessage {
    Heartbeat(Heartbeat),
    SysStatus(SysStatus),
    GpsRawInt(GpsRawInt),
    Attitude(Attitude),
    GlobalPositionInt(GlobalPositionInt),
    VfrHud(VfrHud),
    RadioStatus(RadioStatus),
    /// DISTANCE_SENSOR (#132) current distance in centimetres
    DistanceSensor { current_distance_cm: u16 },
    /// RANGEFINDER (#173) distance in metres
    Rangefinder { distance_m: f32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_constants() {
        assert_eq!(MAVLINK_V1_MAGIC, 0xFE);
        assert_eq!(MAVLINK_V2_MAGIC, 0xFD);
        assert_eq!(MAVLINK_V1_HEADER_LEN, 6);
        assert_eq!(MAVLINK_V2_HEADER_LEN, 10);
    }

    #[test]
    fn test_message_info_known_ids() {
        assert_eq!(message_info(MSG_ID_HEARTBEAT), Some((50, 9)));
        assert_eq!(message_info(MSG_ID_RADIO_STATUS), Some((185, 9)));
        assert_eq!(message_info(MSG_ID_GPS_RAW_INT), Some((24, 30)));
    }

    #[test]
    fn test_message_info_unknown_id() {
        // PARAM_VALUE is outside the supported subset
        assert_eq!(message_info(22), None);
    }

    #[test]
    fn test_mav_frame_payload_too_large() {
        let result = MavFrame::new(MSG_ID_HEARTBEAT, vec![0u8; 256]);
        assert!(result.is_err());
    }

    #[test]
    fn test_mav_frame_max_payload() {
        let frame = MavFrame::new(MSG_ID_HEARTBEAT, vec![0u8; 255]).unwrap();
        assert_eq!(frame.payload.len(), 255);
        assert_eq!(frame.version, MavlinkVersion::V2);
    }
}
