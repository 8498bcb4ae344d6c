//! Presence tracking for remote cursor visibility.
//!
//! Presence is ephemeral per-user state (cursor position, identity) synced
//! separately from the replicated document: it is high-frequency,
//! best-effort, never persisted, and never part of history. A lost update
//! self-heals on the next pointer move.

use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Staleness threshold - remote records not refreshed within this window
/// are pruned even without a graceful leave
const STALE_THRESHOLD: Duration = Duration::from_secs(5);

/// Default throttle window for outbound cursor updates (20 Hz)
pub const DEFAULT_BROADCAST_INTERVAL: Duration = Duration::from_millis(50);

/// Color palette for remote cursors (8 distinct colors)
pub const PEER_COLORS: &[&str] = &[
    "#e4572e", "#29a19c", "#4361ee", "#b5179e", "#f0a202", "#52b788", "#7209b7", "#ef476f",
];

/// Unique peer identifier (derived from the transport's public key)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() >= 32 {
            let mut arr = [0u8; 32];
            arr.copy_from_slice(&bytes[..32]);
            Some(Self(arr))
        } else {
            None
        }
    }
}

/// Cursor position in world coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorPos {
    pub x: f64,
    pub y: f64,
}

/// A connected user's ephemeral state. `cursor` is absent until the peer
/// first moves their pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub peer_id: PeerId,
    pub name: String,
    pub color_index: u8,
    pub cursor: Option<CursorPos>,
    pub timestamp_ms: u64,
}

impl PresenceRecord {
    pub fn new(peer_id: PeerId, name: impl Into<String>, cursor: Option<CursorPos>) -> Self {
        let color_index = peer_id.0[0] % (PEER_COLORS.len() as u8);
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        Self {
            peer_id,
            name: name.into(),
            color_index,
            cursor,
            timestamp_ms,
        }
    }

    /// Cursor color as a CSS hex string
    pub fn color(&self) -> &'static str {
        PEER_COLORS[self.color_index as usize % PEER_COLORS.len()]
    }
}

/// Presence message types for the wire protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PresenceMessage {
    /// Full presence update
    Update(PresenceRecord),
    /// Peer leaving gracefully
    Leave { peer_id: PeerId },
    /// Request all peers to send their presence (on connect)
    RequestAll,
}

/// Manages remote peers' presence records
#[derive(Debug)]
pub struct PresenceManager {
    /// Our own peer ID - never stored among the remotes
    local_peer_id: PeerId,
    peers: HashMap<PeerId, (PresenceRecord, Instant)>,
}

impl PresenceManager {
    pub fn new(local_peer_id: PeerId) -> Self {
        Self {
            local_peer_id,
            peers: HashMap::new(),
        }
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    /// Update or add a peer's presence
    pub fn update_peer(&mut self, record: PresenceRecord) {
        if record.peer_id != self.local_peer_id {
            self.peers.insert(record.peer_id, (record, Instant::now()));
        }
    }

    /// Remove a peer (graceful disconnect)
    pub fn remove_peer(&mut self, peer_id: &PeerId) {
        self.peers.remove(peer_id);
    }

    /// Remove peers not refreshed within the staleness window
    pub fn prune_stale(&mut self) {
        let now = Instant::now();
        self.peers
            .retain(|_, (_, seen)| now.duration_since(*seen) < STALE_THRESHOLD);
    }

    /// All remote presences, local user excluded
    pub fn remote_presences(&self) -> impl Iterator<Item = &PresenceRecord> {
        self.peers.values().map(|(record, _)| record)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

/// Throttles outbound cursor updates to one per broadcast window.
///
/// `update_cursor` is called on every local pointer-move; it returns a
/// record only when the window has elapsed, so the adapter transmits at
/// most one cursor update per interval no matter the input rate.
#[derive(Debug)]
pub struct PresenceBroadcaster {
    peer_id: PeerId,
    name: String,
    interval: Duration,
    last_sent: Option<Instant>,
}

impl PresenceBroadcaster {
    pub fn new(peer_id: PeerId, name: impl Into<String>, interval: Duration) -> Self {
        Self {
            peer_id,
            name: name.into(),
            interval,
            last_sent: None,
        }
    }

    /// Record a pointer move at `now`. Returns the presence record to
    /// broadcast, or None while still inside the throttle window.
    pub fn update_cursor(&mut self, x: f64, y: f64, now: Instant) -> Option<PresenceRecord> {
        if let Some(last) = self.last_sent {
            if now.duration_since(last) < self.interval {
                return None;
            }
        }
        self.last_sent = Some(now);
        Some(PresenceRecord::new(
            self.peer_id,
            self.name.clone(),
            Some(CursorPos { x, y }),
        ))
    }

    /// The record announcing this user before any pointer movement
    pub fn hello(&self) -> PresenceRecord {
        PresenceRecord::new(self.peer_id, self.name.clone(), None)
    }
}
