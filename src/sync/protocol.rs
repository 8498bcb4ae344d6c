//! Iroh protocol handler for replicated-document synchronization.
//!
//! Runs automerge's sync protocol over persistent bidirectional streams.
//! The ALPN is namespaced by document id, so peers editing different
//! documents never exchange state even through the same endpoint.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use automerge::{Automerge, sync::State as SyncState, sync::SyncDoc};
use iroh::endpoint::Connection;
use iroh::protocol::{AcceptError, ProtocolHandler};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc, watch};

use crate::document::DocumentId;

/// ALPN for the document channel of one document id
pub fn doc_alpn(id: &DocumentId) -> Vec<u8> {
    format!("slatesync/doc/{}/1", id).into_bytes()
}

/// Automerge sync protocol over iroh connections
#[derive(Clone)]
pub struct DocSyncProtocol {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DocSyncProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocSyncProtocol").finish()
    }
}

struct Inner {
    /// The replicated document as the network sees it
    doc: Mutex<Automerge>,
    /// Channel to hand merged remote state to the session thread
    remote_tx: mpsc::Sender<Automerge>,
    /// Watch counter signalling local changes (never loses notifications)
    change_tx: watch::Sender<u64>,
    change_rx: watch::Receiver<u64>,
}

impl DocSyncProtocol {
    pub fn new(doc: Automerge, remote_tx: mpsc::Sender<Automerge>) -> Self {
        let (change_tx, change_rx) = watch::channel(0u64);
        Self {
            inner: Arc::new(Inner {
                doc: Mutex::new(doc),
                remote_tx,
                change_tx,
                change_rx,
            }),
        }
    }

    /// Merge a newer local state and wake every peer loop
    pub async fn merge_and_notify(&self, other: &Automerge) -> Result<()> {
        {
            let mut doc = self.inner.doc.lock().await;
            let mut other_clone = other.clone();
            doc.merge(&mut other_clone)?;
        }
        self.inner.change_tx.send_modify(|v| *v += 1);
        Ok(())
    }

    /// Run a persistent sync connection as the dialing side
    pub async fn run_sync_loop(&self, conn: Connection) -> Result<()> {
        let (mut send, mut recv) = conn.open_bi().await?;
        self.run_bidirectional_sync(&mut send, &mut recv).await
    }

    /// Handle an incoming connection as the accepting side
    async fn handle_peer(&self, conn: Connection) -> Result<()> {
        let (mut send, mut recv) = conn.accept_bi().await?;
        self.run_bidirectional_sync(&mut send, &mut recv).await
    }

    /// Bidirectional sync loop - identical for dialer and acceptor
    async fn run_bidirectional_sync<S, R>(&self, send: &mut S, recv: &mut R) -> Result<()>
    where
        S: AsyncWriteExt + Unpin,
        R: AsyncReadExt + Unpin,
    {
        let mut sync_state = SyncState::new();
        let mut change_rx = self.inner.change_rx.clone();

        self.send_pending(send, &mut sync_state).await?;

        loop {
            tokio::select! {
                result = change_rx.changed() => {
                    if result.is_err() {
                        break;
                    }
                    self.send_pending(send, &mut sync_state).await?;
                }
                result = recv_frame(recv) => {
                    match result {
                        Ok(frame) if frame.is_empty() => {
                            // Peer is drained for now; connection stays open.
                        }
                        Ok(frame) => {
                            let msg = automerge::sync::Message::decode(&frame)?;
                            {
                                let mut doc = self.inner.doc.lock().await;
                                doc.receive_sync_message(&mut sync_state, msg)?;
                            }
                            self.send_pending(send, &mut sync_state).await?;
                            let doc = self.inner.doc.lock().await;
                            let _ = self.inner.remote_tx.send(doc.clone()).await;
                        }
                        Err(_) => break,
                    }
                }
            }
        }

        Ok(())
    }

    /// Drain generate_sync_message; an empty frame marks "done for now"
    async fn send_pending<W: AsyncWriteExt + Unpin>(
        &self,
        writer: &mut W,
        sync_state: &mut SyncState,
    ) -> Result<()> {
        loop {
            let msg = {
                let doc = self.inner.doc.lock().await;
                doc.generate_sync_message(sync_state)
            };
            match msg {
                Some(msg) => send_frame(writer, &msg.encode()).await?,
                None => {
                    send_frame(writer, &[]).await?;
                    break;
                }
            }
        }
        Ok(())
    }
}

impl ProtocolHandler for DocSyncProtocol {
    fn accept(&self, conn: Connection) -> impl Future<Output = Result<(), AcceptError>> + Send {
        let this = self.clone();
        async move {
            this.handle_peer(conn)
                .await
                .map_err(|e| AcceptError::from_err(std::io::Error::other(e.to_string())))
        }
    }
}

/// Write a length-prefixed frame
async fn send_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, data: &[u8]) -> Result<()> {
    let len = data.len() as u64;
    writer.write_all(&len.to_le_bytes()).await?;
    if !data.is_empty() {
        writer.write_all(data).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Read a length-prefixed frame
async fn recv_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_bytes = [0u8; 8];
    reader.read_exact(&mut len_bytes).await?;
    let len = u64::from_le_bytes(len_bytes) as usize;

    if len == 0 {
        return Ok(Vec::new());
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    Ok(data)
}
