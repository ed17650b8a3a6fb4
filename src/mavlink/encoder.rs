//! # MAVLink Frame Encoder
//!
//! Serializes frames and message payloads to MAVLink wire format.
//!
//! The monitor only transmits a GCS heartbeat; the payload encoders for the
//! remaining telemetry messages mirror the decoder and are used to script
//! vehicle traffic.

use super::crc::frame_checksum;
use super::protocol::*;
use crate::error::{MonitorError, Result};

/// Encode a frame using the CRC_EXTRA of its message id
///
/// # Errors
///
/// Returns error if the message id is outside the supported subset
///
/// # Examples
///
/// ```
/// use uav_monitor::mavlink::encoder::{encode_frame, gcs_heartbeat_frame};
///
/// let bytes = encode_frame(&gcs_heartbeat_frame(255, 0)).unwrap();
/// assert_eq!(bytes[0], 0xFD);
/// ```
pub fn encode_frame(frame: &MavFrame) -> Result<Vec<u8>> {
    let (crc_extra, _) = message_info(frame.msg_id).ok_or_else(|| {
        MonitorError::Protocol(format!("No CRC_EXTRA known for message id {}", frame.msg_id))
    })?;
    Ok(encode_frame_with_extra(frame, crc_extra))
}

/// Encode a frame with an explicit CRC_EXTRA
///
/// v2 payloads are truncated of trailing zero bytes (keeping at least one),
/// as the protocol requires of senders.
pub fn encode_frame_with_extra(frame: &MavFrame, crc_extra: u8) -> Vec<u8> {
    match frame.version {
        MavlinkVersion::V1 => {
            let mut out = Vec::with_capacity(MAVLINK_V1_HEADER_LEN + frame.payload.len() + MAVLINK_CHECKSUM_LEN);
            out.push(MAVLINK_V1_MAGIC);
            out.push(frame.payload.len() as u8);
            out.push(frame.sequence);
            out.push(frame.system_id);
            out.push(frame.component_id);
            out.push(frame.msg_id as u8);
            out.extend_from_slice(&frame.payload);

            let crc = frame_checksum(&out[1..], crc_extra);
            out.extend_from_slice(&crc.to_le_bytes());
            out
        }
        MavlinkVersion::V2 => {
            let payload = truncate_payload(&frame.payload);
            let mut out = Vec::with_capacity(MAVLINK_V2_HEADER_LEN + payload.len() + MAVLINK_CHECKSUM_LEN);
            out.push(MAVLINK_V2_MAGIC);
            out.push(payload.len() as u8);
            out.push(0); // incompat flags
            out.push(0); // compat flags
            out.push(frame.sequence);
            out.push(frame.system_id);
            out.push(frame.component_id);
            out.extend_from_slice(&frame.msg_id.to_le_bytes()[..3]);
            out.extend_from_slice(payload);

            let crc = frame_checksum(&out[1..], crc_extra);
            out.extend_from_slice(&crc.to_le_bytes());
            out
        }
    }
}

fn truncate_payload(payload: &[u8]) -> &[u8] {
    let end = payload.iter().rposition(|&b| b != 0).map_or(1, |i| i + 1);
    &payload[..end.min(payload.len())]
}

/// Heartbeat frame the monitor sends to announce itself as a ground station
pub fn gcs_heartbeat_frame(system_id: u8, sequence: u8) -> MavFrame {
    let payload = encode_heartbeat(&Heartbeat {
        custom_mode: 0,
        mav_type: MAV_TYPE_GCS,
        autopilot: MAV_AUTOPILOT_INVALID,
        base_mode: 0,
        system_status: MAV_STATE_ACTIVE,
        mavlink_version: 3,
    });

    MavFrame {
        version: MavlinkVersion::V2,
        sequence,
        system_id,
        component_id: 0,
        msg_id: MSG_ID_HEARTBEAT,
        payload,
    }
}

pub fn encode_heartbeat(msg: &Heartbeat) -> Vec<u8> {
    let mut p = Vec::with_capacity(HEARTBEAT_LEN);
    p.extend_from_slice(&msg.custom_mode.to_le_bytes());
    p.push(msg.mav_type);
    p.push(msg.autopilot);
    p.push(msg.base_mode);
    p.push(msg.system_status);
    p.push(msg.mavlink_version);
    p
}

pub fn encode_sys_status(msg: &SysStatus) -> Vec<u8> {
    let mut p = vec![0u8; SYS_STATUS_LEN];
    p[14..16].copy_from_slice(&msg.voltage_battery.to_le_bytes());
    p[16..18].copy_from_slice(&msg.current_battery.to_le_bytes());
    p[18..20].copy_from_slice(&msg.drop_rate_comm.to_le_bytes());
    p[30] = msg.battery_remaining as u8;
    p
}

pub fn encode_gps_raw_int(msg: &GpsRawInt) -> Vec<u8> {
    let mut p = vec![0u8; GPS_RAW_INT_LEN];
    p[8..12].copy_from_slice(&msg.lat.to_le_bytes());
    p[12..16].copy_from_slice(&msg.lon.to_le_bytes());
    p[16..20].copy_from_slice(&msg.alt.to_le_bytes());
    p[28] = msg.fix_type;
    p[29] = msg.satellites_visible;
    p
}

pub fn encode_attitude(msg: &Attitude) -> Vec<u8> {
    let mut p = vec![0u8; ATTITUDE_LEN];
    p[4..8].copy_from_slice(&msg.roll.to_le_bytes());
    p[8..12].copy_from_slice(&msg.pitch.to_le_bytes());
    p[12..16].copy_from_slice(&msg.yaw.to_le_bytes());
    p
}

pub fn encode_global_position_int(msg: &GlobalPositionInt) -> Vec<u8> {
    let mut p = vec![0u8; GLOBAL_POSITION_INT_LEN];
    p[4..8].copy_from_slice(&msg.lat.to_le_bytes());
    p[8..12].copy_from_slice(&msg.lon.to_le_bytes());
    p[12..16].copy_from_slice(&msg.alt.to_le_bytes());
    p[16..20].copy_from_slice(&msg.relative_alt.to_le_bytes());
    p[26..28].copy_from_slice(&msg.hdg.to_le_bytes());
    p
}

pub fn encode_vfr_hud(msg: &VfrHud) -> Vec<u8> {
    let mut p = Vec::with_capacity(VFR_HUD_LEN);
    p.extend_from_slice(&msg.airspeed.to_le_bytes());
    p.extend_from_slice(&msg.groundspeed.to_le_bytes());
    p.extend_from_slice(&msg.alt.to_le_bytes());
    p.extend_from_slice(&msg.climb.to_le_bytes());
    p.extend_from_slice(&msg.heading.to_le_bytes());
    p.extend_from_slice(&msg.throttle.to_le_bytes());
    p
}

pub fn encode_radio_status(msg: &RadioStatus) -> Vec<u8> {
    let mut p = Vec::with_capacity(RADIO_STATUS_LEN);
    p.extend_from_slice(&msg.rxerrors.to_le_bytes());
    p.extend_from_slice(&msg.fixed.to_le_bytes());
    p.push(msg.rssi);
    p.push(msg.remrssi);
    p.push(msg.txbuf);
    p.push(msg.noise);
    p.push(msg.remnoise);
    p
}

pub fn encode_rangefinder(distance_m: f32) -> Vec<u8> {
    let mut p = vec![0u8; RANGEFINDER_LEN];
    p[0..4].copy_from_slice(&distance_m.to_le_bytes());
    p
}

pub fn encode_distance_sensor(current_distance_cm: u16) -> Vec<u8> {
    let mut p = vec![0u8; DISTANCE_SENSOR_LEN];
    p[8..10].copy_from_slice(&current_distance_cm.to_le_bytes());
    p
}
