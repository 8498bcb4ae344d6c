//! Lightweight presence protocol for cursor sync.
//!
//! Separate from document sync: presence is ephemeral and high-frequency,
//! so it rides its own ALPN (also namespaced by document id) and is never
//! merged into the replicated document. Messages are length-prefixed
//! msgpack.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use iroh::endpoint::Connection;
use iroh::protocol::{AcceptError, ProtocolHandler};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{RwLock, broadcast, mpsc};

use crate::document::DocumentId;
use crate::presence::{PeerId, PresenceMessage, PresenceRecord};

/// ALPN for the presence channel of one document id
pub fn presence_alpn(id: &DocumentId) -> Vec<u8> {
    format!("slatesync/presence/{}/1", id).into_bytes()
}

/// Presence fan-out over iroh connections
#[derive(Clone)]
pub struct PresenceProtocol {
    inner: Arc<PresenceInner>,
}

impl std::fmt::Debug for PresenceProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceProtocol").finish()
    }
}

struct PresenceInner {
    local_peer_id: PeerId,
    /// Latest local record, replayed to peers that ask or that lag
    local_record: RwLock<Option<PresenceRecord>>,
    /// Fan-out to every live peer connection
    outgoing_tx: broadcast::Sender<PresenceMessage>,
    /// Channel to hand incoming records to the session thread
    incoming_tx: mpsc::Sender<PresenceMessage>,
}

impl PresenceProtocol {
    pub fn new(local_peer_id: PeerId, incoming_tx: mpsc::Sender<PresenceMessage>) -> Self {
        let (outgoing_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(PresenceInner {
                local_peer_id,
                local_record: RwLock::new(None),
                outgoing_tx,
                incoming_tx,
            }),
        }
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.inner.local_peer_id
    }

    /// Broadcast our presence to all connected peers
    pub fn broadcast(&self, record: PresenceRecord) {
        if let Ok(mut guard) = self.inner.local_record.try_write() {
            *guard = Some(record.clone());
        }
        let _ = self.inner.outgoing_tx.send(PresenceMessage::Update(record));
    }

    /// Notify peers we're leaving
    pub fn broadcast_leave(&self) {
        let _ = self.inner.outgoing_tx.send(PresenceMessage::Leave {
            peer_id: self.inner.local_peer_id,
        });
    }

    async fn handle_peer(&self, conn: Connection) -> Result<()> {
        let (mut send, mut recv) = conn.accept_bi().await?;
        self.run_presence_sync(&mut send, &mut recv).await
    }

    /// Run the presence loop as the dialing side
    pub async fn run_presence_loop(&self, conn: Connection) -> Result<()> {
        let (mut send, mut recv) = conn.open_bi().await?;
        self.run_presence_sync(&mut send, &mut recv).await
    }

    async fn run_presence_sync<S, R>(&self, send: &mut S, recv: &mut R) -> Result<()>
    where
        S: AsyncWriteExt + Unpin,
        R: AsyncReadExt + Unpin,
    {
        let mut outgoing_rx = self.inner.outgoing_tx.subscribe();

        // Ask the peer for their presence on connect.
        send_presence_msg(send, &PresenceMessage::RequestAll).await?;

        loop {
            tokio::select! {
                result = outgoing_rx.recv() => {
                    match result {
                        Ok(msg) => send_presence_msg(send, &msg).await?,
                        Err(broadcast::error::RecvError::Closed) => break,
                        Err(broadcast::error::RecvError::Lagged(_)) => {
                            // Lost some fan-out messages; presence is
                            // self-healing, so just resend current state.
                            if let Some(record) = self.inner.local_record.read().await.as_ref() {
                                send_presence_msg(send, &PresenceMessage::Update(record.clone())).await?;
                            }
                        }
                    }
                }
                result = recv_presence_msg(recv) => {
                    match result {
                        Ok(msg) => {
                            if matches!(msg, PresenceMessage::RequestAll) {
                                if let Some(record) = self.inner.local_record.read().await.as_ref() {
                                    send_presence_msg(send, &PresenceMessage::Update(record.clone())).await?;
                                }
                            }
                            let _ = self.inner.incoming_tx.send(msg).await;
                        }
                        Err(_) => break,
                    }
                }
            }
        }
        Ok(())
    }
}

impl ProtocolHandler for PresenceProtocol {
    fn accept(&self, conn: Connection) -> impl Future<Output = Result<(), AcceptError>> + Send {
        let this = self.clone();
        async move {
            this.handle_peer(conn)
                .await
                .map_err(|e| AcceptError::from_err(std::io::Error::other(e.to_string())))
        }
    }
}

/// Send a presence message (length-prefixed msgpack)
async fn send_presence_msg<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg: &PresenceMessage,
) -> Result<()> {
    let data = rmp_serde::to_vec(msg)?;
    let len = data.len() as u32;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}

/// Receive a presence message
async fn recv_presence_msg<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<PresenceMessage> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;

    Ok(rmp_serde::from_slice(&data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_alpn_distinct_from_doc_alpn() {
        let id = DocumentId::from_room("alpha");
        assert_ne!(presence_alpn(&id), crate::sync::protocol::doc_alpn(&id));
    }

    #[test]
    fn presence_message_msgpack_roundtrip() {
        let record = PresenceRecord::new(
            PeerId([5; 32]),
            "grace",
            Some(crate::presence::CursorPos { x: 12.0, y: 34.0 }),
        );
        let bytes = rmp_serde::to_vec(&PresenceMessage::Update(record.clone())).unwrap();
        match rmp_serde::from_slice::<PresenceMessage>(&bytes).unwrap() {
            PresenceMessage::Update(back) => assert_eq!(back, record),
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
