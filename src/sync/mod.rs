//! Replicated-document adapter: P2P synchronization over iroh + automerge.
//!
//! One editor session owns exactly one adapter instance. The adapter runs
//! on a dedicated thread with a current-thread tokio runtime; the client
//! core stays single-threaded and exchanges commands/events over mpsc
//! channels, polled without blocking.
//!
//! The replicated document IS the source of truth - this module only syncs
//! it. Merge conflicts are resolved by automerge's native algorithm and are
//! never surfaced as errors. Transport failures surface as connection-state
//! events, also never as errors to callers: local edits stay valid in the
//! local document and the full merged state is retransmitted after
//! reconnection.

pub mod presence_protocol;
pub mod protocol;

use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;
use automerge::Automerge;
use iroh::Endpoint;
use iroh::endpoint::presets;
use iroh_base::EndpointAddr;
use tokio::sync::mpsc as tokio_mpsc;

use crate::document::DocumentId;
use crate::presence::{PeerId, PresenceMessage, PresenceRecord};
use presence_protocol::PresenceProtocol;
use protocol::DocSyncProtocol;

/// Prefix for shareable session tickets
const TICKET_PREFIX: &str = "slatesync1";

/// Configuration for one adapter instance
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Document identity; namespaces both protocol ALPNs
    pub document_id: DocumentId,
    /// Ticket of a peer to join, None to host a fresh session
    pub join_ticket: Option<String>,
    /// Coalescing window for outbound broadcasts
    pub broadcast_interval: Duration,
    /// How long `connect` waits for the endpoint before giving up
    pub connect_timeout: Duration,
}

impl SyncConfig {
    pub fn new(document_id: DocumentId) -> Self {
        Self {
            document_id,
            join_ticket: None,
            broadcast_interval: crate::presence::DEFAULT_BROADCAST_INTERVAL,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Connection lifecycle of the replication channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Events from the sync thread to the session
#[derive(Debug)]
pub enum SyncEvent {
    /// Endpoint bound; here's our shareable ticket and peer id
    Ready {
        ticket: String,
        local_peer_id: PeerId,
    },
    /// The replication channel changed state
    ConnectionChange(ConnectionState),
    /// Remote changes received and merged into the network-side document
    RemoteChanges { doc: Automerge },
    /// Presence update from a remote peer
    PresenceUpdate(PresenceRecord),
    /// Peer presence removed (graceful leave)
    PresenceRemoved { peer_id: PeerId },
    /// Transport-level error; recoverable via Reconnect
    Error(String),
}

/// Commands from the session to the sync thread
#[derive(Debug)]
pub enum SyncCommand {
    /// Broadcast local document state (coalesced per tick)
    SyncDoc { doc: Automerge },
    /// Broadcast local presence (coalesced per tick)
    BroadcastPresence(PresenceRecord),
    /// Re-dial the join ticket after a transport loss
    Reconnect,
    /// Shut down the adapter
    Shutdown,
}

/// Handle for communicating with the sync thread
pub struct SyncHandle {
    command_tx: std_mpsc::Sender<SyncCommand>,
    event_rx: std_mpsc::Receiver<SyncEvent>,
    /// Our shareable session ticket, if the endpoint came up in time
    ticket: Option<String>,
    _thread: JoinHandle<()>,
}

impl SyncHandle {
    /// Non-blocking check for sync events
    pub fn poll_event(&self) -> Option<SyncEvent> {
        self.event_rx.try_recv().ok()
    }

    pub fn send_command(&self, cmd: SyncCommand) -> Result<()> {
        self.command_tx.send(cmd)?;
        Ok(())
    }

    pub fn ticket(&self) -> Option<&str> {
        self.ticket.as_deref()
    }
}

/// Start the sync thread for one document
pub fn connect(config: SyncConfig) -> Result<SyncHandle> {
    let (event_tx, event_rx) = std_mpsc::channel();
    let (command_tx, command_rx) = std_mpsc::channel();
    let (ticket_tx, ticket_rx) = std_mpsc::channel();

    let connect_timeout = config.connect_timeout;
    let thread = thread::spawn(move || {
        let rt = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                let _ = event_tx.send(SyncEvent::Error(e.to_string()));
                return;
            }
        };

        rt.block_on(async move {
            if let Err(e) = run_sync(config, event_tx.clone(), command_rx, ticket_tx).await {
                let _ = event_tx.send(SyncEvent::Error(e.to_string()));
                let _ = event_tx.send(SyncEvent::ConnectionChange(ConnectionState::Disconnected));
            }
        });
    });

    // Wait for the endpoint to come up, bounded by the connect timeout. A
    // miss is not fatal: the thread keeps connecting and the session shows
    // its reconnecting indicator until a ConnectionChange arrives.
    let ticket = ticket_rx.recv_timeout(connect_timeout).ok();

    Ok(SyncHandle {
        command_tx,
        event_rx,
        ticket,
        _thread: thread,
    })
}

/// Encode an endpoint address as a shareable ticket string
pub fn encode_ticket(addr: &EndpointAddr) -> String {
    let bytes = postcard::to_stdvec(addr).expect("EndpointAddr serialization should not fail");
    format!(
        "{}{}",
        TICKET_PREFIX,
        data_encoding::BASE32_NOPAD.encode(&bytes)
    )
}

/// Decode a ticket string back to an endpoint address
pub fn decode_ticket(ticket: &str) -> Result<EndpointAddr> {
    let Some(data) = ticket.strip_prefix(TICKET_PREFIX) else {
        return Err(anyhow::anyhow!("not a slatesync ticket"));
    };
    let bytes = data_encoding::BASE32_NOPAD
        .decode(data.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid ticket encoding: {}", e))?;
    let addr: EndpointAddr =
        postcard::from_bytes(&bytes).map_err(|e| anyhow::anyhow!("invalid ticket data: {}", e))?;
    Ok(addr)
}

/// Dial a peer for both protocols, returning the spawned loop tasks
async fn dial_peer(
    endpoint: &Endpoint,
    ticket: &str,
    doc_alpn: &[u8],
    presence_alpn: &[u8],
    doc_protocol: &DocSyncProtocol,
    presence: &PresenceProtocol,
) -> Result<(tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>)> {
    let addr = decode_ticket(ticket)?;

    let conn = endpoint.connect(addr.clone(), doc_alpn).await?;
    let doc_clone = doc_protocol.clone();
    let doc_task = tokio::spawn(async move {
        if let Err(e) = doc_clone.run_sync_loop(conn).await {
            tracing::debug!("document sync loop ended: {}", e);
        }
    });

    let conn = endpoint.connect(addr, presence_alpn).await?;
    let presence_clone = presence.clone();
    let presence_task = tokio::spawn(async move {
        if let Err(e) = presence_clone.run_presence_loop(conn).await {
            tracing::debug!("presence loop ended: {}", e);
        }
    });

    Ok((doc_task, presence_task))
}

/// Main async sync loop
async fn run_sync(
    config: SyncConfig,
    event_tx: std_mpsc::Sender<SyncEvent>,
    command_rx: std_mpsc::Receiver<SyncCommand>,
    ticket_tx: std_mpsc::Sender<String>,
) -> Result<()> {
    let _ = event_tx.send(SyncEvent::ConnectionChange(ConnectionState::Connecting));

    let endpoint = Endpoint::builder(presets::N0)
        .bind()
        .await?;

    let ticket_string = encode_ticket(&endpoint.addr());
    let local_peer_id = PeerId::from_bytes(endpoint.id().as_bytes())
        .expect("endpoint public key should be 32 bytes");

    let _ = ticket_tx.send(ticket_string.clone());

    let doc_alpn = protocol::doc_alpn(&config.document_id);
    let presence_alpn = presence_protocol::presence_alpn(&config.document_id);

    let (remote_tx, mut remote_rx) = tokio_mpsc::channel(10);
    let doc_protocol = DocSyncProtocol::new(Automerge::new(), remote_tx);

    let (presence_tx, mut presence_rx) = tokio_mpsc::channel(64);
    let presence = PresenceProtocol::new(local_peer_id, presence_tx);

    let router = iroh::protocol::Router::builder(endpoint.clone())
        .accept(doc_alpn.clone(), doc_protocol.clone())
        .accept(presence_alpn.clone(), presence.clone())
        .spawn();

    let _ = event_tx.send(SyncEvent::Ready {
        ticket: ticket_string,
        local_peer_id,
    });

    // Dial the join ticket, if any. A hosting session is authoritative the
    // moment its endpoint accepts connections.
    let mut peer_tasks = None;
    match &config.join_ticket {
        Some(ticket) => {
            match dial_peer(
                &endpoint,
                ticket,
                &doc_alpn,
                &presence_alpn,
                &doc_protocol,
                &presence,
            )
            .await
            {
                Ok(tasks) => {
                    peer_tasks = Some(tasks);
                    let _ =
                        event_tx.send(SyncEvent::ConnectionChange(ConnectionState::Connected));
                }
                Err(e) => {
                    let _ = event_tx.send(SyncEvent::Error(e.to_string()));
                    let _ = event_tx
                        .send(SyncEvent::ConnectionChange(ConnectionState::Disconnected));
                }
            }
        }
        None => {
            let _ = event_tx.send(SyncEvent::ConnectionChange(ConnectionState::Connected));
        }
    }

    let mut tick = tokio::time::interval(config.broadcast_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    'main: loop {
        tokio::select! {
            Some(doc) = remote_rx.recv() => {
                let _ = event_tx.send(SyncEvent::RemoteChanges { doc });
            }
            Some(msg) = presence_rx.recv() => {
                match msg {
                    PresenceMessage::Update(record) => {
                        let _ = event_tx.send(SyncEvent::PresenceUpdate(record));
                    }
                    PresenceMessage::Leave { peer_id } => {
                        let _ = event_tx.send(SyncEvent::PresenceRemoved { peer_id });
                    }
                    PresenceMessage::RequestAll => {
                        // Answered inside the presence protocol.
                    }
                }
            }
            _ = tick.tick() => {
                // Watch the dialed connection; report loss once.
                if let Some((doc_task, _)) = &peer_tasks {
                    if doc_task.is_finished() {
                        peer_tasks = None;
                        let _ = event_tx
                            .send(SyncEvent::ConnectionChange(ConnectionState::Disconnected));
                    }
                }

                // Drain and coalesce: within one tick only the newest
                // document state and the newest presence record go out.
                // This bounds network chatter during rapid local edits.
                let mut latest_doc = None;
                let mut latest_presence = None;
                loop {
                    match command_rx.try_recv() {
                        Ok(SyncCommand::SyncDoc { doc }) => latest_doc = Some(doc),
                        Ok(SyncCommand::BroadcastPresence(record)) => {
                            latest_presence = Some(record);
                        }
                        Ok(SyncCommand::Reconnect) => {
                            if let Some(ticket) = &config.join_ticket {
                                let _ = event_tx.send(SyncEvent::ConnectionChange(
                                    ConnectionState::Connecting,
                                ));
                                match dial_peer(
                                    &endpoint,
                                    ticket,
                                    &doc_alpn,
                                    &presence_alpn,
                                    &doc_protocol,
                                    &presence,
                                )
                                .await
                                {
                                    Ok(tasks) => {
                                        peer_tasks = Some(tasks);
                                        let _ = event_tx.send(SyncEvent::ConnectionChange(
                                            ConnectionState::Connected,
                                        ));
                                    }
                                    Err(e) => {
                                        let _ = event_tx.send(SyncEvent::Error(e.to_string()));
                                        let _ = event_tx.send(SyncEvent::ConnectionChange(
                                            ConnectionState::Disconnected,
                                        ));
                                    }
                                }
                            }
                        }
                        Ok(SyncCommand::Shutdown) => {
                            presence.broadcast_leave();
                            if let Some((doc_task, presence_task)) = &peer_tasks {
                                doc_task.abort();
                                presence_task.abort();
                            }
                            break 'main;
                        }
                        Err(std_mpsc::TryRecvError::Empty) => break,
                        Err(std_mpsc::TryRecvError::Disconnected) => {
                            if let Some((doc_task, presence_task)) = &peer_tasks {
                                doc_task.abort();
                                presence_task.abort();
                            }
                            break 'main;
                        }
                    }
                }

                if let Some(doc) = latest_doc {
                    if let Err(e) = doc_protocol.merge_and_notify(&doc).await {
                        let _ = event_tx.send(SyncEvent::Error(e.to_string()));
                    }
                }
                if let Some(record) = latest_presence {
                    presence.broadcast(record);
                }
            }
        }
    }

    router.shutdown().await?;
    let _ = event_tx.send(SyncEvent::ConnectionChange(ConnectionState::Disconnected));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = SyncConfig::new(DocumentId::from_room("room"));
        assert_eq!(config.broadcast_interval, Duration::from_millis(50));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.join_ticket.is_none());
    }

    #[test]
    fn decode_rejects_foreign_ticket() {
        assert!(decode_ticket("otherapp1AAAA").is_err());
        assert!(decode_ticket("slatesync1!!!not-base32!!!").is_err());
    }

    #[test]
    fn connection_state_defaults_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }
}
