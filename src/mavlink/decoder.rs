//! # MAVLink Frame Decoder
//!
//! Frame synchronization over a byte stream and typed decoding of the
//! telemetry messages the monitor consumes.

use bytes::{Buf, BytesMut};
use tracing::trace;

use super::crc::frame_checksum;
use super::protocol::*;
use crate::error::{MonitorError, Result};

/// Default cap on buffered, not-yet-framed bytes
pub const DEFAULT_FRAME_BUFFER_CAPACITY: usize = 64 * 1024;

/// One item pulled out of the byte stream
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    /// Checksum-verified frame of a supported message
    Frame(MavFrame),
    /// Complete frame whose message id is outside the supported subset
    Unrecognized { msg_id: u32 },
    /// Checksum mismatch; the decoder resynchronizes one byte further on
    Malformed(String),
}

/// Accumulates transport bytes and splits them into MAVLink frames
///
/// Works for datagram and stream transports alike: partial frames stay
/// buffered until the rest arrives.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    capacity: usize,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_FRAME_BUFFER_CAPACITY)
    }
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity.min(DEFAULT_FRAME_BUFFER_CAPACITY)),
            capacity,
        }
    }

    /// Append received bytes
    ///
    /// # Returns
    ///
    /// * `bool` - `false` if the buffer overflowed and previously buffered
    ///   bytes were discarded
    pub fn extend(&mut self, data: &[u8]) -> bool {
        let mut kept = true;
        if self.buf.len() + data.len() > self.capacity {
            trace!("Frame buffer overflow, discarding {} bytes", self.buf.len());
            self.buf.clear();
            kept = false;
        }
        let take = data.len().min(self.capacity);
        self.buf.extend_from_slice(&data[data.len() - take..]);
        kept
    }

    /// Number of buffered bytes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Pull the next complete frame out of the buffer
    ///
    /// Returns `None` when no complete frame is buffered yet.
    pub fn next_frame(&mut self) -> Option<FrameEvent> {
        let start = match self
            .buf
            .iter()
            .position(|&b| b == MAVLINK_V2_MAGIC || b == MAVLINK_V1_MAGIC)
        {
            Some(start) => start,
            None => {
                self.buf.clear();
                return None;
            }
        };
        if start > 0 {
            trace!("Skipping {} bytes of noise before frame start", start);
            self.buf.advance(start);
        }

        let (header_len, version) = match self.buf[0] {
            MAVLINK_V2_MAGIC => (MAVLINK_V2_HEADER_LEN, MavlinkVersion::V2),
            _ => (MAVLINK_V1_HEADER_LEN, MavlinkVersion::V1),
        };

        if self.buf.len() < header_len {
            return None;
        }

        let payload_len = self.buf[1] as usize;
        let signature_len = match version {
            MavlinkVersion::V2 if self.buf[2] & MAVLINK_IFLAG_SIGNED != 0 => MAVLINK_SIGNATURE_LEN,
            _ => 0,
        };
        let total = header_len + payload_len + MAVLINK_CHECKSUM_LEN + signature_len;
        if self.buf.len() < total {
            return None;
        }

        let (sequence, system_id, component_id, msg_id) = match version {
            MavlinkVersion::V2 => (
                self.buf[4],
                self.buf[5],
                self.buf[6],
                u32::from_le_bytes([self.buf[7], self.buf[8], self.buf[9], 0]),
            ),
            MavlinkVersion::V1 => (self.buf[2], self.buf[3], self.buf[4], self.buf[5] as u32),
        };

        let payload_end = header_len + payload_len;
        let received_crc = u16::from_le_bytes([self.buf[payload_end], self.buf[payload_end + 1]]);

        let crc_extra = match message_info(msg_id) {
            Some((crc_extra, _)) => crc_extra,
            None => {
                self.buf.advance(total);
                return Some(FrameEvent::Unrecognized { msg_id });
            }
        };

        let calculated_crc = frame_checksum(&self.buf[1..payload_end], crc_extra);
        if calculated_crc != received_crc {
            self.buf.advance(1);
            return Some(FrameEvent::Malformed(format!(
                "CRC mismatch for message {}: expected 0x{:04X}, got 0x{:04X}",
                msg_id, calculated_crc, received_crc
            )));
        }

        let payload = self.buf[header_len..payload_end].to_vec();
        self.buf.advance(total);

        Some(FrameEvent::Frame(MavFrame {
            version,
            sequence,
            system_id,
            component_id,
            msg_id,
            payload,
        }))
    }
}

/// Decode a verified frame into a typed message
///
/// Zero-truncated v2 payloads are extended back to their base length first.
///
/// # Errors
///
/// Returns error if the message id is outside the supported subset
pub fn decode_message(frame: &MavFrame) -> Result<MavMessage> {
    let (_, base_len) = message_info(frame.msg_id).ok_or_else(|| {
        MonitorError::Protocol(format!("Unsupported message id {}", frame.msg_id))
    })?;

    let mut p = frame.payload.clone();
    if p.len() < base_len {
        p.resize(base_len, 0);
    }

    let msg = match frame.msg_id {
        MSG_ID_HEARTBEAT => MavMessage::Heartbeat(Heartbeat {
            custom_mode: u32_at(&p, 0),
            mav_type: p[4],
            autopilot: p[5],
            base_mode: p[6],
            system_status: p[7],
            mavlink_version: p[8],
        }),
        MSG_ID_SYS_STATUS => MavMessage::SysStatus(SysStatus {
            voltage_battery: u16_at(&p, 14),
            current_battery: u16_at(&p, 16) as i16,
            drop_rate_comm: u16_at(&p, 18),
            battery_remaining: p[30] as i8,
        }),
        MSG_ID_GPS_RAW_INT => MavMessage::GpsRawInt(GpsRawInt {
            lat: i32_at(&p, 8),
            lon: i32_at(&p, 12),
            alt: i32_at(&p, 16),
            fix_type: p[28],
            satellites_visible: p[29],
        }),
        MSG_ID_ATTITUDE => MavMessage::Attitude(Attitude {
            roll: f32_at(&p, 4),
            pitch: f32_at(&p, 8),
            yaw: f32_at(&p, 12),
        }),
        MSG_ID_GLOBAL_POSITION_INT => MavMessage::GlobalPositionInt(GlobalPositionInt {
            lat: i32_at(&p, 4),
            lon: i32_at(&p, 8),
            alt: i32_at(&p, 12),
            relative_alt: i32_at(&p, 16),
            hdg: u16_at(&p, 26),
        }),
        MSG_ID_VFR_HUD => MavMessage::VfrHud(VfrHud {
            airspeed: f32_at(&p, 0),
            groundspeed: f32_at(&p, 4),
            alt: f32_at(&p, 8),
            climb: f32_at(&p, 12),
            heading: u16_at(&p, 16) as i16,
            throttle: u16_at(&p, 18),
        }),
        MSG_ID_RADIO_STATUS => MavMessage::RadioStatus(RadioStatus {
            rxerrors: u16_at(&p, 0),
            fixed: u16_at(&p, 2),
            rssi: p[4],
            remrssi: p[5],
            txbuf: p[6],
            noise: p[7],
            remnoise: p[8],
        }),
        MSG_ID_DISTANCE_SENSOR => MavMessage::DistanceSensor {
            current_distance_cm: u16_at(&p, 8),
        },
        MSG_ID_RANGEFINDER => MavMessage::Rangefinder {
            distance_m: f32_at(&p, 0),
        },
        other => {
            return Err(MonitorError::Protocol(format!("Unsupported message id {}", other)));
        }
    };

    Ok(msg)
}

fn u16_at(p: &[u8], i: usize) -> u16 {
    u16::from_le_bytes([p[i], p[i + 1]])
}

fn u32_at(p: &[u8], i: usize) -> u32 {
    u32::from_le_bytes([p[i], p[i + 1], p[i + 2], p[i + 3]])
}

fn i32_at(p: &[u8], i: usize) -> i32 {
    i32::from_le_bytes([p[i], p[i + 1], p[i + 2], p[i + 3]])
}

fn f32_at(p: &[u8], i: usize) -> f32 {
    f32::from_le_bytes([p[i], p[i + 1], p[i + 2], p[i + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mavlink::encoder::*;

    fn frame_bytes(msg_id: u32, payload: Vec<u8>) -> Vec<u8> {
        encode_frame(&MavFrame::new(msg_id, payload).unwrap()).unwrap()
    }

    fn radio(rxerrors: u16, rssi: u8) -> Vec<u8> {
        encode_radio_status(&RadioStatus {
            rxerrors,
            fixed: 0,
            rssi,
            remrssi: rssi,
            txbuf: 100,
            noise: 10,
            remnoise: 12,
        })
    }

    #[test]
    fn test_next_frame_on_empty_buffer() {
        let mut buffer = FrameBuffer::new();
        assert_eq!(buffer.next_frame(), None);
    }

    #[test]
    fn test_decode_heartbeat_frame() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(&encode_frame(&gcs_heartbeat_frame(255, 3)).unwrap());

        let event = buffer.next_frame().unwrap();
        let frame = match event {
            FrameEvent::Frame(frame) => frame,
            other => panic!("Expected frame, got: {:?}", other),
        };
        assert_eq!(frame.sequence, 3);
        assert_eq!(frame.system_id, 255);

        match decode_message(&frame).unwrap() {
            MavMessage::Heartbeat(hb) => {
                assert_eq!(hb.mav_type, MAV_TYPE_GCS);
                assert_eq!(hb.mavlink_version, 3);
            }
            other => panic!("Expected heartbeat, got: {:?}", other),
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_partial_frame_waits_for_rest() {
        let bytes = frame_bytes(MSG_ID_RADIO_STATUS, radio(4, 180));
        let mut buffer = FrameBuffer::new();

        buffer.extend(&bytes[..7]);
        assert_eq!(buffer.next_frame(), None);
        assert_eq!(buffer.len(), 7, "partial frame must stay buffered");

        buffer.extend(&bytes[7..]);
        assert!(matches!(buffer.next_frame(), Some(FrameEvent::Frame(_))));
    }

    #[test]
    fn test_noise_before_frame_is_skipped() {
        let mut data = vec![0x00, 0x13, 0x37];
        data.extend(frame_bytes(MSG_ID_RADIO_STATUS, radio(4, 180)));

        let mut buffer = FrameBuffer::new();
        buffer.extend(&data);
        assert!(matches!(buffer.next_frame(), Some(FrameEvent::Frame(_))));
    }

    #[test]
    fn test_noise_without_magic_is_dropped() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(&[0x01, 0x02, 0x03]);
        assert_eq!(buffer.next_frame(), None);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_crc_error_is_malformed_and_resyncs() {
        let mut corrupt = frame_bytes(MSG_ID_RADIO_STATUS, radio(4, 180));
        let last = corrupt.len() - 1;
        corrupt[last - 1] = 0x00;
        corrupt[last] = 0x00;
        let good = frame_bytes(MSG_ID_RADIO_STATUS, radio(5, 181));

        let mut buffer = FrameBuffer::new();
        buffer.extend(&corrupt);
        buffer.extend(&good);

        assert!(matches!(buffer.next_frame(), Some(FrameEvent::Malformed(_))));
        // Resync finds the next good frame
        let mut found = false;
        while let Some(event) = buffer.next_frame() {
            if let FrameEvent::Frame(frame) = event {
                assert_eq!(decode_message(&frame).unwrap(), MavMessage::RadioStatus(RadioStatus {
                    rxerrors: 5, fixed: 0, rssi: 181, remrssi: 181, txbuf: 100, noise: 10, remnoise: 12,
                }));
                found = true;
            }
        }
        assert!(found);
    }

    #[test]
    fn test_unknown_message_is_unrecognized() {
        let bytes = encode_frame_with_extra(&MavFrame::new(22, vec![1, 2, 3, 4]).unwrap(), 220);
        let mut buffer = FrameBuffer::new();
        buffer.extend(&bytes);

        assert_eq!(buffer.next_frame(), Some(FrameEvent::Unrecognized { msg_id: 22 }));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_signed_v2_frame_consumes_signature() {
        let mut bytes = frame_bytes(MSG_ID_RADIO_STATUS, radio(1, 100));
        bytes[2] |= MAVLINK_IFLAG_SIGNED;
        // Incompat flags are covered by the checksum, so re-sign the body
        let payload_end = bytes.len() - MAVLINK_CHECKSUM_LEN;
        let crc = frame_checksum(&bytes[1..payload_end], 185);
        bytes[payload_end..].copy_from_slice(&crc.to_le_bytes());
        bytes.extend_from_slice(&[0xAA; MAVLINK_SIGNATURE_LEN]);

        let mut buffer = FrameBuffer::new();
        buffer.extend(&bytes);
        assert!(matches!(buffer.next_frame(), Some(FrameEvent::Frame(_))));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_v1_frame_decodes() {
        let mut frame = MavFrame::new(MSG_ID_GPS_RAW_INT, encode_gps_raw_int(&GpsRawInt {
            lat: -63_000_000,
            lon: 1_068_000_000,
            alt: 35_500,
            fix_type: 3,
            satellites_visible: 11,
        })).unwrap();
        frame.version = MavlinkVersion::V1;

        let mut buffer = FrameBuffer::new();
        buffer.extend(&encode_frame(&frame).unwrap());

        match buffer.next_frame() {
            Some(FrameEvent::Frame(decoded)) => {
                assert_eq!(decoded.version, MavlinkVersion::V1);
                match decode_message(&decoded).unwrap() {
                    MavMessage::GpsRawInt(gps) => {
                        assert_eq!(gps.lat, -63_000_000);
                        assert_eq!(gps.fix_type, 3);
                        assert_eq!(gps.satellites_visible, 11);
                    }
                    other => panic!("Expected GPS_RAW_INT, got: {:?}", other),
                }
            }
            other => panic!("Expected frame, got: {:?}", other),
        }
    }

    #[test]
    fn test_truncated_payload_is_zero_extended() {
        let bytes = frame_bytes(MSG_ID_RANGEFINDER, encode_rangefinder(2.25));
        let mut buffer = FrameBuffer::new();
        buffer.extend(&bytes);

        let frame = match buffer.next_frame() {
            Some(FrameEvent::Frame(frame)) => frame,
            other => panic!("Expected frame, got: {:?}", other),
        };
        assert!(frame.payload.len() < RANGEFINDER_LEN);
        assert_eq!(decode_message(&frame).unwrap(), MavMessage::Rangefinder { distance_m: 2.25 });
    }

    #[test]
    fn test_decode_vfr_hud_and_attitude() {
        let hud = frame_bytes(MSG_ID_VFR_HUD, encode_vfr_hud(&VfrHud {
            airspeed: 12.5,
            groundspeed: 11.0,
            alt: 40.0,
            climb: 0.5,
            heading: 270,
            throttle: 55,
        }));
        let att = frame_bytes(MSG_ID_ATTITUDE, encode_attitude(&Attitude { roll: 0.1, pitch: -0.2, yaw: 1.5 }));

        let mut buffer = FrameBuffer::new();
        buffer.extend(&hud);
        buffer.extend(&att);

        let mut messages = Vec::new();
        while let Some(FrameEvent::Frame(frame)) = buffer.next_frame() {
            messages.push(decode_message(&frame).unwrap());
        }

        assert_eq!(messages.len(), 2);
        match messages[0] {
            MavMessage::VfrHud(hud) => {
                assert_eq!(hud.heading, 270);
                assert!((hud.airspeed - 12.5).abs() < f32::EPSILON);
            }
            ref other => panic!("Expected VFR_HUD, got: {:?}", other),
        }
        match messages[1] {
            MavMessage::Attitude(att) => assert!((att.pitch + 0.2).abs() < 1e-6),
            ref other => panic!("Expected ATTITUDE, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_sys_status_negative_battery() {
        let bytes = frame_bytes(MSG_ID_SYS_STATUS, encode_sys_status(&SysStatus {
            voltage_battery: 12_600,
            current_battery: -1,
            drop_rate_comm: 0,
            battery_remaining: -1,
        }));
        let mut buffer = FrameBuffer::new();
        buffer.extend(&bytes);

        match buffer.next_frame() {
            Some(FrameEvent::Frame(frame)) => match decode_message(&frame).unwrap() {
                MavMessage::SysStatus(status) => {
                    assert_eq!(status.battery_remaining, -1);
                    assert_eq!(status.voltage_battery, 12_600);
                }
                other => panic!("Expected SYS_STATUS, got: {:?}", other),
            },
            other => panic!("Expected frame, got: {:?}", other),
        }
    }

    #[test]
    fn test_buffer_overflow_discards() {
        let mut buffer = FrameBuffer::with_capacity(16);
        assert!(buffer.extend(&[0u8; 10]));
        assert!(!buffer.extend(&[0u8; 10]));
        assert_eq!(buffer.len(), 10);
    }
}
