//! # Message Drain
//!
//! Consumes every inbound message already queued on the link without
//! waiting for more. Bounded by queue depth and a per-cycle message cap,
//! never by a sleep.

use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::session::{LinkSession, RECV_CHUNK_SIZE};
use crate::error::{MonitorError, Result};
use crate::mavlink::decoder::FrameEvent;
use crate::mavlink::protocol::{MavMessage, MAV_TYPE_GCS};

/// Last radio status fields reported by the telemetry radio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioStatusSample {
    pub rssi: u8,
    pub remote_rssi: u8,
    /// Cumulative receive error counter
    pub rx_errors: u16,
}

/// Outcome of one drain cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainResult {
    /// Every frame pulled off the link, malformed and unrecognized included
    pub count: u64,
    pub malformed: u64,
    pub unrecognized: u64,
    pub last_radio_status: Option<RadioStatusSample>,
    pub last_heartbeat_seen: Option<Instant>,
}

/// Drain all currently queued messages from the session
///
/// # Arguments
///
/// * `session` - Connected session to read from
/// * `max_messages` - Upper bound on frames consumed in this cycle
///
/// # Returns
///
/// * `Result<DrainResult>` - Counters for this cycle
///
/// # Errors
///
/// Returns `MonitorError::Read` if the transport fails. The session is
/// marked closed so the resolver reconnects on a later cycle.
pub async fn drain(session: &LinkSession, max_messages: usize) -> Result<DrainResult> {
    let mut result = DrainResult::default();
    let mut io = session.lock_io().await;
    let mut buf = vec![0u8; RECV_CHUNK_SIZE];
    let max_messages = max_messages as u64;
    let mut reads: u64 = 0;

    'cycle: loop {
        while result.count < max_messages {
            let event = match io.frames.next_frame() {
                Some(event) => event,
                None => break,
            };
            result.count += 1;

            match event {
                FrameEvent::Frame(frame) => match io.absorb(&frame) {
                    Ok(MavMessage::RadioStatus(status)) => {
                        result.last_radio_status = Some(RadioStatusSample {
                            rssi: status.rssi,
                            remote_rssi: status.remrssi,
                            rx_errors: status.rxerrors,
                        });
                    }
                    Ok(MavMessage::Heartbeat(hb)) if hb.mav_type != MAV_TYPE_GCS => {
                        result.last_heartbeat_seen = io.last_heartbeat;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        result.malformed += 1;
                        debug!("Undecodable frame: {}", e);
                    }
                },
                FrameEvent::Unrecognized { msg_id } => {
                    result.unrecognized += 1;
                    trace!("Unrecognized message id {}", msg_id);
                }
                FrameEvent::Malformed(reason) => {
                    result.malformed += 1;
                    debug!("Malformed frame: {}", reason);
                }
            }
        }

        // Noise-only floods produce no frames; the read budget keeps the
        // cycle bounded anyway.
        if result.count >= max_messages || reads >= max_messages.max(1) {
            break 'cycle;
        }

        match io.transport.try_recv(&mut buf).await {
            Ok(Some(n)) => {
                reads += 1;
                if !io.frames.extend(&buf[..n]) {
                    warn!("Frame buffer overflow on {}, buffered bytes dropped", session.endpoint());
                }
            }
            Ok(None) => break 'cycle,
            Err(e) => {
                drop(io);
                session.mark_closed();
                return Err(MonitorError::Read(format!("Link read failed on {}: {}", session.endpoint(), e)));
            }
        }
    }

    trace!(
        count = result.count,
        malformed = result.malformed,
        unrecognized = result.unrecognized,
        "Drain cycle complete"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::endpoint::LinkEndpoint;
    use crate::link::transport::mocks::*;
    use crate::link::LinkState;
    use crate::mavlink::encoder::*;
    use crate::mavlink::protocol::*;
    use std::time::Duration;

    async fn connected(transport: &MockTransport) -> LinkSession {
        transport.push(vehicle_heartbeat());
        LinkSession::establish(
            1,
            LinkEndpoint::new("udp:127.0.0.1:14551", 57600),
            Box::new(transport.clone()),
            Duration::from_millis(200),
            64 * 1024,
        )
        .await
        .unwrap()
    }

    fn radio(rxerrors: u16, rssi: u8, remrssi: u8) -> Vec<u8> {
        vehicle_frame(MSG_ID_RADIO_STATUS, encode_radio_status(&RadioStatus {
            rxerrors,
            fixed: 0,
            rssi,
            remrssi,
            txbuf: 100,
            noise: 20,
            remnoise: 22,
        }))
    }

    fn battery(remaining: i8) -> Vec<u8> {
        vehicle_frame(MSG_ID_SYS_STATUS, encode_sys_status(&SysStatus {
            voltage_battery: 12_400,
            current_battery: 300,
            drop_rate_comm: 0,
            battery_remaining: remaining,
        }))
    }

    #[tokio::test]
    async fn test_drain_empty_queue() {
        let transport = MockTransport::new();
        let session = connected(&transport).await;

        let result = drain(&session, 100).await.unwrap();
        assert_eq!(result, DrainResult::default());
    }

    #[tokio::test]
    async fn test_drain_consumes_everything_queued() {
        let transport = MockTransport::new();
        let session = connected(&transport).await;

        transport.push(battery(76));
        transport.push(radio(4, 180, 170));
        transport.push(radio(5, 190, 175));
        transport.push(vehicle_heartbeat());

        let result = drain(&session, 100).await.unwrap();

        assert_eq!(result.count, 4);
        assert_eq!(result.malformed, 0);
        assert_eq!(transport.queued(), 0);
        assert_eq!(
            result.last_radio_status,
            Some(RadioStatusSample { rssi: 190, remote_rssi: 175, rx_errors: 5 })
        );
        assert!(result.last_heartbeat_seen.is_some());
        assert_eq!(session.vehicle_state().await.battery_remaining, Some(76.0));
    }

    #[tokio::test]
    async fn test_drain_counts_malformed_and_unrecognized() {
        let transport = MockTransport::new();
        let session = connected(&transport).await;

        let mut corrupted = battery(50);
        let len = corrupted.len();
        corrupted[len - 2] = 0x00;
        corrupted[len - 1] = 0x00;
        transport.push(corrupted);

        // PARAM_VALUE (#22) is not part of the decoded subset
        let unknown = encode_frame_with_extra(&MavFrame::new(22, vec![1u8; 25]).unwrap(), 220);
        transport.push(unknown);
        transport.push(radio(0, 200, 200));

        let result = drain(&session, 100).await.unwrap();

        assert!(result.malformed >= 1);
        assert_eq!(result.unrecognized, 1);
        assert!(result.last_radio_status.is_some());
        assert_eq!(result.count, result.malformed + result.unrecognized + 1);
    }

    #[tokio::test]
    async fn test_drain_respects_message_cap() {
        let transport = MockTransport::new();
        let session = connected(&transport).await;

        let mut burst = Vec::new();
        for i in 0..10 {
            burst.extend(radio(i, 200, 200));
        }
        transport.push(burst);

        let first = drain(&session, 4).await.unwrap();
        assert_eq!(first.count, 4);

        let second = drain(&session, 100).await.unwrap();
        assert_eq!(second.count, 6);
        assert_eq!(second.last_radio_status.unwrap().rx_errors, 9);
    }

    #[tokio::test]
    async fn test_drain_handles_split_frames() {
        let transport = MockTransport::new();
        let session = connected(&transport).await;

        let frame = radio(3, 120, 110);
        let (head, tail) = frame.split_at(5);

        transport.push(head.to_vec());
        let first = drain(&session, 100).await.unwrap();
        assert_eq!(first.count, 0);

        transport.push(tail.to_vec());
        let second = drain(&session, 100).await.unwrap();
        assert_eq!(second.count, 1);
        assert_eq!(second.last_radio_status.unwrap().rssi, 120);
    }

    #[tokio::test]
    async fn test_gcs_heartbeat_is_not_liveness() {
        let transport = MockTransport::new();
        let session = connected(&transport).await;

        transport.push(encode_frame(&gcs_heartbeat_frame(255, 0)).unwrap());
        let result = drain(&session, 100).await.unwrap();

        assert_eq!(result.count, 1);
        assert_eq!(result.last_heartbeat_seen, None);
    }

    #[tokio::test]
    async fn test_drain_read_error_closes_session() {
        let transport = MockTransport::new();
        let session = connected(&transport).await;

        transport.set_fail_reads(true);
        let result = drain(&session, 100).await;

        assert!(matches!(result, Err(MonitorError::Read(_))));
        assert_eq!(session.state(), LinkState::Closed);
    }
}
