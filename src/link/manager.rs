//! # Link Endpoint Resolver
//!
//! `LinkManager` tries the configured endpoints in order and memoizes the
//! first session that completes a handshake. It is constructed once at
//! startup and shared by handle with every task that needs the link.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::endpoint::LinkEndpoint;
use super::session::LinkSession;
use super::transport::Connector;
use super::LinkState;
use crate::error::Result;
use crate::mavlink::decoder::DEFAULT_FRAME_BUFFER_CAPACITY;

/// Connection parameters shared by all candidates
#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub handshake_timeout: Duration,
    /// Minimum wait after a failed pass before candidates are retried
    pub reconnect_interval: Duration,
    pub gcs_system_id: u8,
    /// Send a GCS heartbeat after each handshake
    pub announce: bool,
    pub frame_buffer_capacity: usize,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_millis(3000),
            reconnect_interval: Duration::from_millis(5000),
            gcs_system_id: 255,
            announce: true,
            frame_buffer_capacity: DEFAULT_FRAME_BUFFER_CAPACITY,
        }
    }
}

#[derive(Default)]
struct LinkSlot {
    session: Option<Arc<LinkSession>>,
    last_failure: Option<Instant>,
}

/// Owner of the single live link session
pub struct LinkManager {
    candidates: Vec<LinkEndpoint>,
    settings: LinkSettings,
    connector: Arc<dyn Connector>,
    slot: Mutex<LinkSlot>,
    /// Mirror of the slot's session for readers that must not wait on a
    /// connect pass; only written with the slot lock held
    published: watch::Sender<Option<Arc<LinkSession>>>,
    state: AtomicU8,
    next_id: AtomicU64,
}

impl LinkManager {
    pub fn new(candidates: Vec<LinkEndpoint>, settings: LinkSettings, connector: Arc<dyn Connector>) -> Self {
        Self {
            candidates,
            settings,
            connector,
            slot: Mutex::new(LinkSlot::default()),
            published: watch::channel(None).0,
            state: AtomicU8::new(LinkState::Unconnected.as_u8()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn candidates(&self) -> &[LinkEndpoint] {
        &self.candidates
    }

    /// Return the live session, connecting if there is none
    ///
    /// Concurrent callers serialize on the slot lock, so two tasks can never
    /// open two sessions.
    ///
    /// # Returns
    ///
    /// * `Some(session)` - The memoized session, or a freshly handshaken one
    /// * `None` - No candidate answered, or the reconnect interval since the
    ///   last failed pass has not elapsed yet
    pub async fn acquire(&self) -> Option<Arc<LinkSession>> {
        let mut slot = self.slot.lock().await;

        if let Some(session) = &slot.session {
            if session.is_connected() {
                return Some(Arc::clone(session));
            }
            debug!("Dropping dead session {}", session.id());
            session.close().await;
            slot.session = None;
            self.published.send_replace(None);
            self.set_state(LinkState::Unconnected);
        }

        if let Some(failed_at) = slot.last_failure {
            if failed_at.elapsed() < self.settings.reconnect_interval {
                return None;
            }
        }

        self.set_state(LinkState::Connecting);

        for endpoint in &self.candidates {
            match self.connect(endpoint).await {
                Ok(session) => {
                    let session = Arc::new(session);
                    if self.settings.announce {
                        session.announce(self.settings.gcs_system_id).await;
                    }
                    info!(session = session.id(), "Vehicle link established via {}", endpoint);
                    slot.session = Some(Arc::clone(&session));
                    self.published.send_replace(Some(Arc::clone(&session)));
                    slot.last_failure = None;
                    self.set_state(LinkState::Connected);
                    return Some(session);
                }
                Err(e) => warn!("Link endpoint {} unavailable: {}", endpoint, e),
            }
        }

        warn!("No vehicle link on any of {} endpoint(s)", self.candidates.len());
        slot.last_failure = Some(Instant::now());
        self.set_state(LinkState::Unconnected);
        None
    }

    async fn connect(&self, endpoint: &LinkEndpoint) -> Result<LinkSession> {
        debug!("Trying link endpoint {}", endpoint);
        let transport = self.connector.open(endpoint).await?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        LinkSession::establish(
            id,
            endpoint.clone(),
            transport,
            self.settings.handshake_timeout,
            self.settings.frame_buffer_capacity,
        )
        .await
    }

    /// The memoized session, without attempting to connect
    ///
    /// Never waits, even while `acquire` is in the middle of a handshake.
    pub fn current(&self) -> Option<Arc<LinkSession>> {
        self.published.borrow().as_ref().filter(|s| s.is_connected()).cloned()
    }

    /// Whether a live session is held right now
    pub fn is_connected(&self) -> bool {
        self.current().is_some()
    }

    /// Tear the session down; a later `acquire` reconnects immediately
    pub async fn release(&self) {
        let mut slot = self.slot.lock().await;
        slot.last_failure = None;
        if let Some(session) = slot.session.take() {
            self.published.send_replace(None);
            session.close().await;
            self.set_state(LinkState::Closed);
        }
    }

    pub fn state(&self) -> LinkState {
        LinkState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: LinkState) {
        let previous = LinkState::from_u8(self.state.swap(state.as_u8(), Ordering::SeqCst));
        if previous != state {
            debug!("Link state {} -> {}", previous, state);
        }
    }
}
