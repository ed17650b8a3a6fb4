//! # CRC-16/MCRF4XX (X.25) Implementation
//!
//! Checksum used by every MAVLink frame.
//!
//! **Polynomial**: 0x1021, reflected (0x8408)
//! **Initial Value**: 0xFFFF
//!
//! The checksum covers everything after the magic byte up to the payload end,
//! followed by the message's CRC_EXTRA seed byte.

/// Reflected CCITT polynomial
const CRC16_POLY_REFLECTED: u16 = 0x8408;

/// Initial accumulator value
pub const CRC16_INIT: u16 = 0xFFFF;

/// Precomputed CRC16 lookup table for fast calculation
const CRC16_TABLE: [u16; 256] = generate_crc16_table();

/// Generate CRC16 lookup table at compile time
const fn generate_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = i as u16;
        let mut j = 0;

        while j < 8 {
            if (crc & 0x0001) != 0 {
                crc = (crc >> 1) ^ CRC16_POLY_REFLECTED;
            } else {
                crc >>= 1;
            }
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

/// Fold one byte into a running checksum
#[inline]
pub fn crc16_accumulate(crc: u16, byte: u8) -> u16 {
    (crc >> 8) ^ CRC16_TABLE[((crc ^ byte as u16) & 0x00FF) as usize]
}

/// Calculate the X.25 checksum of a byte slice
///
/// # Examples
///
/// ```
/// use uav_monitor::mavlink::crc::crc16_x25;
///
/// assert_eq!(crc16_x25(b"123456789"), 0x6F91);
/// ```
pub fn crc16_x25(data: &[u8]) -> u16 {
    data.iter().fold(CRC16_INIT, |crc, &byte| crc16_accumulate(crc, byte))
}

/// Calculate the checksum of a MAVLink frame body
///
/// # Arguments
///
/// * `body` - Frame bytes between the magic byte and the checksum
/// * `crc_extra` - Per-message seed byte
///
/// # Returns
///
/// * `u16` - Checksum as transmitted (little-endian on the wire)
pub fn frame_checksum(body: &[u8], crc_extra: u8) -> u16 {
    crc16_accumulate(crc16_x25(body), crc_extra)
}

/// Bitwise X.25 accumulation as written in the MAVLink reference (slow)
///
/// Used for verifying the lookup table implementation.
#[allow(dead_code)]
fn crc16_x25_slow(data: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;

    for &byte in data {
        let mut tmp = byte ^ (crc & 0x00FF) as u8;
        tmp ^= tmp << 4;
        let tmp = tmp as u16;
        crc = (crc >> 8) ^ (tmp << 8) ^ (tmp << 3) ^ (tmp >> 4);
    }

    crc
}
