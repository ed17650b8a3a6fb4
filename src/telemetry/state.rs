//! Vehicle state mirror fed by decoded link messages.

use crate::mavlink::protocol::MavMessage;

/// Latest known value of every field the snapshot reads
///
/// Fields stay `None` until the vehicle reports them, or when the vehicle
/// reports a sentinel meaning "unknown".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VehicleState {
    /// Remaining battery in percent
    pub battery_remaining: Option<f64>,
    /// Degrees
    pub latitude: Option<f64>,
    /// Degrees
    pub longitude: Option<f64>,
    /// Metres above mean sea level
    pub altitude_msl: Option<f64>,
    /// Metres above home
    pub relative_altitude: Option<f64>,
    /// Degrees (0..360)
    pub heading: Option<f64>,
    /// m/s
    pub airspeed: Option<f64>,
    /// m/s
    pub groundspeed: Option<f64>,
    /// Radians
    pub roll: Option<f64>,
    pub pitch: Option<f64>,
    pub yaw: Option<f64>,
    pub gps_fix_type: Option<u8>,
    pub satellites_visible: Option<u8>,
    /// Downward rangefinder distance in metres
    pub rangefinder_distance: Option<f64>,
}

impl VehicleState {
    /// Fold one decoded message into the mirror
    pub fn apply(&mut self, msg: &MavMessage) {
        match msg {
            MavMessage::SysStatus(status) => {
                self.battery_remaining = match status.battery_remaining {
                    remaining if remaining < 0 => None,
                    remaining => Some(remaining as f64),
                };
            }
            MavMessage::GlobalPositionInt(pos) => {
                // 0/0 is what autopilots report before the first fix
                if pos.lat == 0 && pos.lon == 0 {
                    self.latitude = None;
                    self.longitude = None;
                } else {
                    self.latitude = Some(pos.lat as f64 / 1e7);
                    self.longitude = Some(pos.lon as f64 / 1e7);
                }
                self.altitude_msl = Some(pos.alt as f64 / 1000.0);
                self.relative_altitude = Some(pos.relative_alt as f64 / 1000.0);
                if pos.hdg != u16::MAX {
                    self.heading = Some(pos.hdg as f64 / 100.0);
                }
            }
            MavMessage::GpsRawInt(gps) => {
                self.gps_fix_type = Some(gps.fix_type);
                self.satellites_visible = match gps.satellites_visible {
                    u8::MAX => None,
                    sats => Some(sats),
                };
            }
            MavMessage::Attitude(att) => {
                self.roll = Some(att.roll as f64);
                self.pitch = Some(att.pitch as f64);
                self.yaw = Some(att.yaw as f64);
            }
            MavMessage::VfrHud(hud) => {
                self.airspeed = Some(hud.airspeed as f64);
                self.groundspeed = Some(hud.groundspeed as f64);
                self.heading = Some(hud.heading as f64);
            }
            MavMessage::Rangefinder { distance_m } => {
                self.rangefinder_distance = Some(*distance_m as f64);
            }
            MavMessage::DistanceSensor { current_distance_cm } => {
                self.rangefinder_distance = Some(*current_distance_cm as f64 / 100.0);
            }
            MavMessage::Heartbeat(_) | MavMessage::RadioStatus(_) => {}
        }
    }

    /// Altitude to report: rangefinder when available, else height above home
    pub fn effective_altitude(&self) -> Option<f64> {
        self.rangefinder_distance.or(self.relative_altitude)
    }
}
