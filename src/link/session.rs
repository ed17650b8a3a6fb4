//! # Link Session
//!
//! One live, handshaken connection to the vehicle.
//!
//! The session owns the transport, the frame buffer and the vehicle state
//! mirror. All I/O goes through one async mutex so the drain and shutdown
//! never interleave.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, info, trace};

use super::endpoint::LinkEndpoint;
use super::transport::LinkTransport;
use super::LinkState;
use crate::error::{MonitorError, Result};
use crate::mavlink::decoder::{decode_message, FrameBuffer, FrameEvent};
use crate::mavlink::encoder::{encode_frame, gcs_heartbeat_frame};
use crate::mavlink::protocol::{MavFrame, MavMessage, MAV_TYPE_GCS};
use crate::telemetry::state::VehicleState;

/// Read buffer size for one transport receive
pub(crate) const RECV_CHUNK_SIZE: usize = 2048;

/// Mutable I/O side of a session, guarded by the session lock
pub(crate) struct SessionIo {
    pub(crate) transport: Box<dyn LinkTransport>,
    pub(crate) frames: FrameBuffer,
    pub(crate) vehicle: VehicleState,
    pub(crate) last_heartbeat: Option<Instant>,
    tx_sequence: u8,
}

impl SessionIo {
    /// Decode a frame and fold it into the vehicle mirror
    ///
    /// # Returns
    ///
    /// * `Result<MavMessage>` - the decoded message; heartbeats from other
    ///   ground stations are decoded but do not refresh liveness
    pub(crate) fn absorb(&mut self, frame: &MavFrame) -> Result<MavMessage> {
        let msg = decode_message(frame)?;
        if let MavMessage::Heartbeat(hb) = &msg {
            if hb.mav_type != MAV_TYPE_GCS {
                self.last_heartbeat = Some(Instant::now());
            }
        }
        self.vehicle.apply(&msg);
        Ok(msg)
    }
}

/// A connected link to the vehicle
pub struct LinkSession {
    id: u64,
    endpoint: LinkEndpoint,
    connected_at: DateTime<Utc>,
    state: AtomicU8,
    io: Mutex<SessionIo>,
}

impl LinkSession {
    /// Handshake over an opened transport
    ///
    /// Reads until a vehicle heartbeat is decoded or `timeout` elapses.
    ///
    /// # Arguments
    ///
    /// * `id` - Process-unique session id
    /// * `endpoint` - Endpoint the transport was opened on
    /// * `transport` - Freshly opened transport
    /// * `timeout` - Handshake deadline
    /// * `frame_buffer_capacity` - Cap on buffered unframed bytes
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Link` if no vehicle heartbeat arrives in time
    /// or the transport fails. The transport is shut down in both cases.
    pub async fn establish(
        id: u64,
        endpoint: LinkEndpoint,
        transport: Box<dyn LinkTransport>,
        timeout: Duration,
        frame_buffer_capacity: usize,
    ) -> Result<Self> {
        let mut io = SessionIo {
            transport,
            frames: FrameBuffer::with_capacity(frame_buffer_capacity),
            vehicle: VehicleState::default(),
            last_heartbeat: None,
            tx_sequence: 0,
        };

        match tokio::time::timeout(timeout, Self::await_heartbeat(&mut io)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = io.transport.shutdown().await;
                return Err(e);
            }
            Err(_) => {
                let _ = io.transport.shutdown().await;
                return Err(MonitorError::Link(format!(
                    "No heartbeat from {} within {} ms",
                    endpoint,
                    timeout.as_millis()
                )));
            }
        }

        info!(session = id, "Heartbeat received on {}", endpoint);

        Ok(Self {
            id,
            endpoint,
            connected_at: Utc::now(),
            state: AtomicU8::new(LinkState::Connected.as_u8()),
            io: Mutex::new(io),
        })
    }

    async fn await_heartbeat(io: &mut SessionIo) -> Result<()> {
        let mut buf = vec![0u8; RECV_CHUNK_SIZE];
        loop {
            while let Some(event) = io.frames.next_frame() {
                match event {
                    FrameEvent::Frame(frame) => match io.absorb(&frame) {
                        Ok(MavMessage::Heartbeat(hb)) if hb.mav_type != MAV_TYPE_GCS => return Ok(()),
                        Ok(_) => {}
                        Err(e) => trace!("Ignoring frame during handshake: {}", e),
                    },
                    FrameEvent::Unrecognized { msg_id } => trace!("Ignoring message {} during handshake", msg_id),
                    FrameEvent::Malformed(reason) => trace!("Malformed frame during handshake: {}", reason),
                }
            }

            let n = io
                .transport
                .recv(&mut buf)
                .await
                .map_err(|e| MonitorError::Link(format!("Receive failed during handshake: {}", e)))?;
            io.frames.extend(&buf[..n]);
        }
    }

    /// Send one GCS heartbeat so the vehicle (or router) starts streaming to us
    ///
    /// Best effort: failures are logged, never returned.
    pub async fn announce(&self, gcs_system_id: u8) {
        let mut io = self.io.lock().await;
        let frame = gcs_heartbeat_frame(gcs_system_id, io.tx_sequence);
        io.tx_sequence = io.tx_sequence.wrapping_add(1);

        match encode_frame(&frame) {
            Ok(bytes) => {
                if let Err(e) = io.transport.send(&bytes).await {
                    debug!("Failed to send GCS heartbeat: {}", e);
                }
            }
            Err(e) => debug!("Failed to encode GCS heartbeat: {}", e),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn endpoint(&self) -> &LinkEndpoint {
        &self.endpoint
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn state(&self) -> LinkState {
        LinkState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Copy of the vehicle mirror as of the last drain
    pub async fn vehicle_state(&self) -> VehicleState {
        self.io.lock().await.vehicle.clone()
    }

    /// When the last vehicle heartbeat was decoded
    pub async fn last_heartbeat(&self) -> Option<Instant> {
        self.io.lock().await.last_heartbeat
    }

    pub(crate) async fn lock_io(&self) -> MutexGuard<'_, SessionIo> {
        self.io.lock().await
    }

    /// Flag the session dead after a transport failure
    pub(crate) fn mark_closed(&self) {
        self.state.store(LinkState::Closed.as_u8(), Ordering::SeqCst);
    }

    /// Shut the transport down
    pub async fn close(&self) {
        self.mark_closed();
        let mut io = self.io.lock().await;
        if let Err(e) = io.transport.shutdown().await {
            debug!("Transport shutdown failed: {}", e);
        }
        io.frames.clear();
        info!(session = self.id, "Link to {} closed", self.endpoint);
    }
}

impl std::fmt::Debug for LinkSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkSession")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}
