//! Editor session - the single owner of one document's editing state.
//!
//! A session wires the replicated document, scene model, history, selection,
//! and presence together, and is the only place mutations enter the system:
//!
//! user action -> policy gate -> history commit -> document write ->
//! throttled broadcast -> remote peers merge -> their scenes rebuild
//!
//! Presence flows through a parallel, higher-frequency channel that never
//! touches history. The session is single-threaded; the network runs on the
//! adapter's sync thread and is drained by `pump`.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use automerge::Automerge;

use crate::document::{CanvasDocument, DocumentId};
use crate::geometry::{Point, Viewport};
use crate::history::History;
use crate::layers::{Layer, LayerId};
use crate::policy;
use crate::presence::{PresenceBroadcaster, PresenceManager, PresenceRecord};
use crate::scene::SceneModel;
use crate::selection::Selection;
use crate::shapes::{Shape, ShapeId, ShapeKind};
use crate::sync::{self, ConnectionState, SyncCommand, SyncConfig, SyncEvent, SyncHandle};

/// Configuration for opening an editor session
#[derive(Debug, Clone)]
pub struct EditorConfig {
    /// Room/document name; namespaces the replication channel
    pub room: String,
    /// Display name shown to other participants
    pub user_name: String,
    /// Ticket of a session to join; None hosts a fresh one
    pub join_ticket: Option<String>,
    /// Host viewport, the upper bound for shape dimensions
    pub viewport: Viewport,
    /// Coalescing window for outbound broadcasts
    pub broadcast_interval: Duration,
    /// Initial connection timeout
    pub connect_timeout: Duration,
    /// Optional cap on undo depth
    pub history_limit: Option<usize>,
    /// Skip the network entirely (standalone editing)
    pub offline: bool,
    /// Local-first persistence path for the automerge document
    pub storage_path: Option<PathBuf>,
}

impl EditorConfig {
    pub fn new(room: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            user_name: user_name.into(),
            join_ticket: None,
            viewport: Viewport::default(),
            broadcast_interval: crate::presence::DEFAULT_BROADCAST_INTERVAL,
            connect_timeout: Duration::from_secs(10),
            history_limit: None,
            offline: false,
            storage_path: None,
        }
    }
}

/// In-flight drag; the history commit happens once, on release
struct DragState {
    shape_id: ShapeId,
}

/// One editing session over one document
pub struct EditorSession {
    doc: CanvasDocument,
    scene: SceneModel,
    history: History,
    selection: Selection,
    viewport: Viewport,
    presence: Option<PresenceManager>,
    broadcaster: Option<PresenceBroadcaster>,
    sync: Option<SyncHandle>,
    connection: ConnectionState,
    loading: bool,
    dragging: Option<DragState>,
    active_layer: Option<LayerId>,
    user_name: String,
    broadcast_interval: Duration,
    last_error: Option<String>,
}

impl EditorSession {
    /// Open a session: load or create the document, seed it when hosting,
    /// and bring up the replication channel.
    pub fn open(config: EditorConfig) -> Result<Self> {
        let document_id = DocumentId::from_room(&config.room);

        let mut doc = match &config.storage_path {
            Some(path) if path.exists() => CanvasDocument::load(path)?,
            Some(path) => {
                let mut doc = CanvasDocument::new(document_id.clone());
                doc.set_storage_path(path.clone());
                doc
            }
            None => CanvasDocument::new(document_id.clone()),
        };

        // Hosts seed the empty document; joiners stay empty and wait for
        // the initial sync so the first writer wins the empty case.
        if config.join_ticket.is_none() {
            doc.seed_if_empty(&[Layer::default()], &[])?;
        }

        let sync = if config.offline {
            None
        } else {
            let mut sync_config = SyncConfig::new(document_id);
            sync_config.join_ticket = config.join_ticket.clone();
            sync_config.broadcast_interval = config.broadcast_interval;
            sync_config.connect_timeout = config.connect_timeout;
            Some(sync::connect(sync_config)?)
        };

        let mut scene = SceneModel::new();
        scene.rebuild(&doc)?;

        let initial: Vec<Shape> = scene.shapes().iter().map(Shape::committed).collect();
        let history = match config.history_limit {
            Some(limit) => History::with_limit(initial, limit),
            None => History::new(initial),
        };

        let loading = sync.is_some();
        let active_layer = scene.layers().last().map(|l| l.id);

        Ok(Self {
            doc,
            scene,
            history,
            selection: Selection::new(),
            viewport: config.viewport,
            presence: None,
            broadcaster: None,
            sync,
            connection: ConnectionState::Disconnected,
            loading,
            dragging: None,
            active_layer,
            user_name: config.user_name,
            broadcast_interval: config.broadcast_interval,
            last_error: None,
        })
    }

    /// Drain pending sync events. Call once per host frame/tick.
    pub fn pump(&mut self) -> Result<()> {
        // Collect first: handling an event may need &mut self.
        let mut events = Vec::new();
        if let Some(handle) = &self.sync {
            while let Some(event) = handle.poll_event() {
                events.push(event);
            }
        }

        for event in events {
            match event {
                SyncEvent::Ready {
                    local_peer_id, ..
                } => {
                    self.presence = Some(PresenceManager::new(local_peer_id));
                    let broadcaster = PresenceBroadcaster::new(
                        local_peer_id,
                        self.user_name.clone(),
                        self.broadcast_interval,
                    );
                    // Announce ourselves (no cursor yet) and publish our
                    // current document state for late joiners.
                    self.send_sync(SyncCommand::BroadcastPresence(broadcaster.hello()));
                    self.broadcaster = Some(broadcaster);
                    self.queue_doc_broadcast();
                }
                SyncEvent::ConnectionChange(state) => {
                    let was = self.connection;
                    self.connection = state;
                    if state == ConnectionState::Connected {
                        self.loading = false;
                        if was == ConnectionState::Disconnected {
                            // Rebroadcast after reconnection: the local
                            // document kept every edit made while offline.
                            self.queue_doc_broadcast();
                        }
                    }
                }
                SyncEvent::RemoteChanges { doc } => {
                    self.apply_remote(doc)?;
                }
                SyncEvent::PresenceUpdate(record) => {
                    if let Some(presence) = &mut self.presence {
                        presence.update_peer(record);
                    }
                }
                SyncEvent::PresenceRemoved { peer_id } => {
                    if let Some(presence) = &mut self.presence {
                        presence.remove_peer(&peer_id);
                    }
                }
                SyncEvent::Error(message) => {
                    tracing::debug!(error = %message, "sync error");
                    self.last_error = Some(message);
                }
            }
        }

        if let Some(presence) = &mut self.presence {
            presence.prune_stale();
        }
        Ok(())
    }

    /// Merge a remote document state into the local one and rebuild the
    /// scene. Exposed for hosts that bridge their own transport.
    pub fn apply_remote(&mut self, mut doc: Automerge) -> Result<()> {
        self.doc.merge(&mut doc)?;
        self.doc.prune_orphans()?;
        self.refresh()?;

        // A joiner whose initial sync produced an empty document becomes
        // the first writer and seeds it.
        if self.scene.layers().is_empty() {
            self.doc.seed_if_empty(&[Layer::default()], &[])?;
            self.queue_doc_broadcast();
            self.refresh()?;
        }
        Ok(())
    }

    // --- Shape mutations ---

    /// Create a shape on the active layer. Silently refuses when the layer
    /// is locked (expected user misstep, not a fault).
    pub fn add_shape(
        &mut self,
        kind: ShapeKind,
        fill_color: impl Into<String>,
    ) -> Result<Option<ShapeId>> {
        let Some(layer_id) = self.active_layer() else {
            return Ok(None);
        };
        let locked = self
            .scene
            .layer(layer_id)
            .is_none_or(|layer| layer.locked);
        if locked {
            tracing::debug!(layer = %layer_id, "ignoring add on locked layer");
            return Ok(None);
        }

        let shape = Shape::new(kind, fill_color, layer_id);
        let id = shape.id;
        let mut snapshot: Vec<Shape> = self.scene.shapes().to_vec();
        snapshot.push(shape);
        self.commit(snapshot)?;
        Ok(Some(id))
    }

    /// Select a shape. Single-select replaces the set, multi toggles.
    /// Locked-layer shapes are not selectable; the call is a no-op.
    pub fn select(&mut self, id: ShapeId, multi: bool) {
        let allowed = self
            .scene
            .shape(id)
            .is_some_and(|shape| policy::can_select(shape, self.scene.layers()));
        if !allowed {
            return;
        }
        self.selection.select(id, multi);
        self.stamp_transient();
    }

    pub fn deselect_all(&mut self) {
        self.selection.deselect_all();
        self.stamp_transient();
    }

    /// Begin dragging a shape. Returns false (and does nothing) when the
    /// policy gate refuses.
    pub fn begin_drag(&mut self, id: ShapeId) -> bool {
        let allowed = self
            .scene
            .shape(id)
            .is_some_and(|shape| policy::can_mutate(shape, self.scene.layers()));
        if !allowed {
            return false;
        }
        self.dragging = Some(DragState { shape_id: id });
        self.stamp_transient();
        true
    }

    /// Move the dragged shape. Live positions go straight to the document
    /// (and out over the throttled channel) without touching history.
    pub fn drag_to(&mut self, x: f64, y: f64) -> Result<()> {
        let Some(drag) = &self.dragging else {
            return Ok(());
        };
        let Some(shape) = self.scene.shape(drag.shape_id) else {
            return Ok(());
        };

        let mut moved = shape.clone();
        moved.kind = moved.kind.moved_to(Point::new(x, y));
        self.doc.put_shape(&moved.committed())?;
        self.queue_doc_broadcast();
        self.refresh()
    }

    /// Release the drag and commit the final position as one history entry,
    /// so undo returns to where the drag started.
    pub fn end_drag(&mut self) -> Result<()> {
        if self.dragging.take().is_none() {
            return Ok(());
        }
        let snapshot = self.scene.shapes().to_vec();
        self.commit(snapshot)
    }

    /// Apply a validated geometry change. Rejects (keeping the prior
    /// geometry, committing nothing) when the result violates the size
    /// bounds or the policy gate. Returns whether the transform applied.
    pub fn apply_transform(&mut self, id: ShapeId, new_kind: ShapeKind) -> Result<bool> {
        let allowed = self
            .scene
            .shape(id)
            .is_some_and(|shape| policy::can_mutate(shape, self.scene.layers()));
        if !allowed || !policy::transform_in_bounds(&new_kind, &self.viewport) {
            return Ok(false);
        }

        let snapshot: Vec<Shape> = self
            .scene
            .shapes()
            .iter()
            .map(|shape| {
                if shape.id == id {
                    let mut updated = shape.clone();
                    updated.kind = new_kind.clone();
                    updated
                } else {
                    shape.clone()
                }
            })
            .collect();
        self.commit(snapshot)?;
        Ok(true)
    }

    /// Delete one shape, subject to the policy gate
    pub fn delete_shape(&mut self, id: ShapeId) -> Result<bool> {
        let allowed = self
            .scene
            .shape(id)
            .is_some_and(|shape| policy::can_mutate(shape, self.scene.layers()));
        if !allowed {
            return Ok(false);
        }
        let snapshot: Vec<Shape> = self
            .scene
            .shapes()
            .iter()
            .filter(|shape| shape.id != id)
            .cloned()
            .collect();
        self.selection.remove(id);
        self.commit(snapshot)?;
        Ok(true)
    }

    /// Delete every selected shape that the policy allows, in one commit.
    /// Returns how many were removed.
    pub fn delete_selected(&mut self) -> Result<usize> {
        let doomed: HashSet<ShapeId> = self
            .selection
            .ids()
            .iter()
            .copied()
            .filter(|id| {
                self.scene
                    .shape(*id)
                    .is_some_and(|shape| policy::can_mutate(shape, self.scene.layers()))
            })
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }

        let snapshot: Vec<Shape> = self
            .scene
            .shapes()
            .iter()
            .filter(|shape| !doomed.contains(&shape.id))
            .cloned()
            .collect();
        for id in &doomed {
            self.selection.remove(*id);
        }
        self.commit(snapshot)?;
        Ok(doomed.len())
    }

    // --- Layer mutations ---

    /// Add a layer on top of the stack and make it active
    pub fn add_layer(&mut self, name: impl Into<String>) -> Result<LayerId> {
        let layer = Layer::new(name);
        let id = layer.id;
        self.doc.push_layer(&layer)?;
        self.queue_doc_broadcast();
        self.refresh()?;
        self.active_layer = Some(id);
        Ok(id)
    }

    /// Delete a layer, cascading removal of every shape it owns in the
    /// same history commit. Deleting the last remaining layer is rejected.
    pub fn delete_layer(&mut self, id: LayerId) -> Result<bool> {
        if self.scene.layer(id).is_none() {
            return Ok(false);
        }
        if !policy::can_delete_layer(self.scene.layers()) {
            tracing::debug!(layer = %id, "refusing to delete the last layer");
            return Ok(false);
        }

        // Shapes and layer go in one document transaction; the surviving
        // shape set is one history entry.
        let snapshot: Vec<Shape> = self
            .scene
            .shapes()
            .iter()
            .filter(|shape| shape.layer_id != id)
            .map(|shape| shape.committed())
            .collect();
        self.history.commit(snapshot);
        self.doc.remove_layer(id)?;
        self.queue_doc_broadcast();
        self.refresh()?;

        if self.active_layer == Some(id) {
            self.active_layer = self.scene.layers().last().map(|l| l.id);
        }
        Ok(true)
    }

    pub fn rename_layer(&mut self, id: LayerId, name: impl Into<String>) -> Result<()> {
        self.update_layer(id, |layer| layer.name = name.into())
    }

    pub fn set_layer_visible(&mut self, id: LayerId, visible: bool) -> Result<()> {
        self.update_layer(id, |layer| layer.visible = visible)
    }

    pub fn set_layer_locked(&mut self, id: LayerId, locked: bool) -> Result<()> {
        self.update_layer(id, |layer| layer.locked = locked)
    }

    pub fn set_layer_opacity(&mut self, id: LayerId, opacity: i64) -> Result<()> {
        self.update_layer(id, |layer| layer.opacity = Layer::clamp_opacity(opacity))
    }

    fn update_layer(&mut self, id: LayerId, mutate: impl FnOnce(&mut Layer)) -> Result<()> {
        let Some(layer) = self.scene.layer(id) else {
            return Ok(());
        };
        let mut updated = layer.clone();
        mutate(&mut updated);
        self.doc.put_layer(&updated)?;
        self.queue_doc_broadcast();
        self.refresh()
    }

    // --- History ---

    /// Undo one step and broadcast the entire restored snapshot, so remote
    /// peers converge on the exact pre-undo state. No-op at the end.
    pub fn undo(&mut self) -> Result<bool> {
        let Some(snapshot) = self.history.undo() else {
            return Ok(false);
        };
        let restored = snapshot.clone();
        self.doc.replace_shapes(&restored)?;
        self.queue_doc_broadcast();
        self.refresh()?;
        Ok(true)
    }

    /// Symmetric with `undo`
    pub fn redo(&mut self) -> Result<bool> {
        let Some(snapshot) = self.history.redo() else {
            return Ok(false);
        };
        let restored = snapshot.clone();
        self.doc.replace_shapes(&restored)?;
        self.queue_doc_broadcast();
        self.refresh()?;
        Ok(true)
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    // --- Presence ---

    /// Report a local pointer move. Throttled internally; at most one
    /// cursor update per broadcast window reaches the wire.
    pub fn update_cursor(&mut self, x: f64, y: f64) {
        let Some(broadcaster) = &mut self.broadcaster else {
            return;
        };
        if let Some(record) = broadcaster.update_cursor(x, y, Instant::now()) {
            if let Some(handle) = &self.sync {
                let _ = handle.send_command(SyncCommand::BroadcastPresence(record));
            }
        }
    }

    /// Remote participants' presence, local user excluded
    pub fn remote_presences(&self) -> Vec<&PresenceRecord> {
        match &self.presence {
            Some(manager) => manager.remote_presences().collect(),
            None => Vec::new(),
        }
    }

    // --- Accessors ---

    pub fn shapes(&self) -> &[Shape] {
        self.scene.shapes()
    }

    pub fn layers(&self) -> &[Layer] {
        self.scene.layers()
    }

    pub fn visible_shapes(&self) -> Vec<&Shape> {
        self.scene.visible_shapes().collect()
    }

    pub fn scene(&self) -> &SceneModel {
        &self.scene
    }

    pub fn document(&self) -> &CanvasDocument {
        &self.doc
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    /// True until the first successful connection; gates rendering
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Shareable ticket for inviting peers, once the endpoint is up
    pub fn ticket(&self) -> Option<&str> {
        self.sync.as_ref().and_then(|handle| handle.ticket())
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Ask the adapter to re-dial after a transport loss
    pub fn reconnect(&mut self) {
        self.last_error = None;
        self.send_sync(SyncCommand::Reconnect);
    }

    pub fn active_layer(&self) -> Option<LayerId> {
        self.active_layer
            .filter(|id| self.scene.layer(*id).is_some())
            .or_else(|| self.scene.layers().last().map(|l| l.id))
    }

    pub fn set_active_layer(&mut self, id: LayerId) {
        if self.scene.layer(id).is_some() {
            self.active_layer = Some(id);
        }
    }

    /// Tear the session down: leave the presence channel and persist the
    /// document if a storage path is configured.
    pub fn close(mut self) -> Result<()> {
        self.send_sync(SyncCommand::Shutdown);
        self.doc.save()
    }

    // --- Internals ---

    /// Commit a snapshot: history push, document rewrite, broadcast.
    fn commit(&mut self, snapshot: Vec<Shape>) -> Result<()> {
        let committed: Vec<Shape> = snapshot.iter().map(Shape::committed).collect();
        self.history.commit(committed);
        self.doc.replace_shapes(self.history.present())?;
        self.queue_doc_broadcast();
        self.refresh()
    }

    /// Rebuild the scene from the document and re-stamp local state
    fn refresh(&mut self) -> Result<()> {
        self.scene.rebuild(&self.doc)?;
        let known: HashSet<ShapeId> = self.scene.shapes().iter().map(|s| s.id).collect();
        self.selection.retain_known(&known);
        if let Some(drag) = &self.dragging {
            if !known.contains(&drag.shape_id) {
                self.dragging = None;
            }
        }
        self.stamp_transient();
        Ok(())
    }

    fn stamp_transient(&mut self) {
        let dragging = self.dragging.as_ref().map(|d| d.shape_id);
        self.scene.apply_transient(self.selection.ids(), dragging);
    }

    fn queue_doc_broadcast(&self) {
        self.send_sync(SyncCommand::SyncDoc {
            doc: self.doc.clone_automerge(),
        });
    }

    fn send_sync(&self, cmd: SyncCommand) {
        if let Some(handle) = &self.sync {
            let _ = handle.send_command(cmd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::MIN_SHAPE_SIZE;
    use crate::shapes::DEFAULT_FILL;

    fn offline_session(room: &str) -> EditorSession {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("slatesync=debug")
            .try_init();
        let mut config = EditorConfig::new(room, "tester");
        config.offline = true;
        EditorSession::open(config).unwrap()
    }

    fn rect_kind(x: f64, y: f64) -> ShapeKind {
        ShapeKind::Rectangle {
            x,
            y,
            width: 120.0,
            height: 90.0,
        }
    }

    #[test]
    fn open_seeds_a_default_layer() {
        let session = offline_session("seeded");
        assert_eq!(session.layers().len(), 1);
        assert!(session.shapes().is_empty());
        assert!(!session.is_loading());
        assert!(session.active_layer().is_some());
    }

    #[test]
    fn add_shape_commits_history() {
        let mut session = offline_session("add");
        let id = session
            .add_shape(rect_kind(10.0, 10.0), DEFAULT_FILL)
            .unwrap()
            .unwrap();
        assert_eq!(session.shapes().len(), 1);
        assert!(session.can_undo());

        assert!(session.undo().unwrap());
        assert!(session.shapes().is_empty());
        assert!(session.redo().unwrap());
        assert_eq!(session.shapes()[0].id, id);
    }

    #[test]
    fn add_shape_on_locked_layer_is_silent_noop() {
        let mut session = offline_session("locked-add");
        let layer = session.active_layer().unwrap();
        session.set_layer_locked(layer, true).unwrap();

        let result = session.add_shape(rect_kind(0.0, 0.0), DEFAULT_FILL).unwrap();
        assert!(result.is_none());
        assert!(session.shapes().is_empty());
        assert!(!session.can_undo());
    }

    #[test]
    fn select_respects_lock_policy() {
        let mut session = offline_session("locked-select");
        let id = session
            .add_shape(rect_kind(0.0, 0.0), DEFAULT_FILL)
            .unwrap()
            .unwrap();
        let layer = session.active_layer().unwrap();

        session.select(id, false);
        assert!(session.selection().is_selected(id));

        session.deselect_all();
        session.set_layer_locked(layer, true).unwrap();
        session.select(id, false);
        assert!(session.selection().is_empty());
    }

    #[test]
    fn selection_does_not_consume_undo_slots() {
        let mut session = offline_session("select-history");
        let id = session
            .add_shape(rect_kind(0.0, 0.0), DEFAULT_FILL)
            .unwrap()
            .unwrap();
        let undo_depth = session.history.undo_count();

        session.select(id, false);
        session.deselect_all();
        session.select(id, false);
        assert_eq!(session.history.undo_count(), undo_depth);
        assert!(session.shapes()[0].is_selected);
    }

    #[test]
    fn transform_below_minimum_keeps_prior_geometry() {
        let mut session = offline_session("bounds");
        let id = session
            .add_shape(rect_kind(10.0, 10.0), DEFAULT_FILL)
            .unwrap()
            .unwrap();
        let undo_depth = session.history.undo_count();

        let applied = session
            .apply_transform(
                id,
                ShapeKind::Rectangle {
                    x: 10.0,
                    y: 10.0,
                    width: 5.0,
                    height: 90.0,
                },
            )
            .unwrap();
        assert!(!applied);
        assert_eq!(session.history.undo_count(), undo_depth);
        match &session.shapes()[0].kind {
            ShapeKind::Rectangle { width, .. } => assert_eq!(*width, 120.0),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn transform_at_minimum_applies_and_commits() {
        let mut session = offline_session("bounds-ok");
        let id = session
            .add_shape(rect_kind(10.0, 10.0), DEFAULT_FILL)
            .unwrap()
            .unwrap();

        let applied = session
            .apply_transform(
                id,
                ShapeKind::Rectangle {
                    x: 10.0,
                    y: 10.0,
                    width: MIN_SHAPE_SIZE,
                    height: MIN_SHAPE_SIZE,
                },
            )
            .unwrap();
        assert!(applied);

        session.undo().unwrap();
        match &session.shapes()[0].kind {
            ShapeKind::Rectangle { width, .. } => assert_eq!(*width, 120.0),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn transform_on_locked_layer_rejected() {
        let mut session = offline_session("locked-transform");
        let id = session
            .add_shape(rect_kind(0.0, 0.0), DEFAULT_FILL)
            .unwrap()
            .unwrap();
        let layer = session.active_layer().unwrap();
        session.set_layer_locked(layer, true).unwrap();

        let applied = session
            .apply_transform(id, rect_kind(200.0, 200.0))
            .unwrap();
        assert!(!applied);
    }

    #[test]
    fn drag_commits_once_and_undo_restores_origin() {
        let mut session = offline_session("drag");
        let id = session
            .add_shape(rect_kind(50.0, 50.0), DEFAULT_FILL)
            .unwrap()
            .unwrap();

        assert!(session.begin_drag(id));
        session.drag_to(70.0, 60.0).unwrap();
        session.drag_to(100.0, 100.0).unwrap();
        session.end_drag().unwrap();

        let pos = session.shapes()[0].kind.position();
        assert_eq!((pos.x, pos.y), (100.0, 100.0));

        // One gesture, one undo step, straight back to the origin.
        session.undo().unwrap();
        let pos = session.shapes()[0].kind.position();
        assert_eq!((pos.x, pos.y), (50.0, 50.0));
    }

    #[test]
    fn begin_drag_refused_on_locked_layer() {
        let mut session = offline_session("locked-drag");
        let id = session
            .add_shape(rect_kind(0.0, 0.0), DEFAULT_FILL)
            .unwrap()
            .unwrap();
        let layer = session.active_layer().unwrap();
        session.set_layer_locked(layer, true).unwrap();

        assert!(!session.begin_drag(id));
    }

    #[test]
    fn delete_selected_skips_locked_shapes() {
        let mut session = offline_session("delete");
        let movable = session
            .add_shape(rect_kind(0.0, 0.0), DEFAULT_FILL)
            .unwrap()
            .unwrap();
        let locked_layer = session.add_layer("Locked").unwrap();
        let stuck = session
            .add_shape(rect_kind(10.0, 10.0), DEFAULT_FILL)
            .unwrap()
            .unwrap();

        session.select(movable, false);
        session.select(stuck, true);
        session.set_layer_locked(locked_layer, true).unwrap();

        let removed = session.delete_selected().unwrap();
        assert_eq!(removed, 1);
        assert!(session.scene().shape(stuck).is_some());
        assert!(session.scene().shape(movable).is_none());
    }

    #[test]
    fn delete_layer_cascades_in_one_commit() {
        let mut session = offline_session("cascade");
        let base_layer = session.active_layer().unwrap();
        session.add_shape(rect_kind(0.0, 0.0), DEFAULT_FILL).unwrap();

        let doomed = session.add_layer("Doomed").unwrap();
        session.add_shape(rect_kind(10.0, 10.0), DEFAULT_FILL).unwrap();
        session.add_shape(rect_kind(20.0, 20.0), DEFAULT_FILL).unwrap();
        assert_eq!(session.shapes().len(), 3);

        assert!(session.delete_layer(doomed).unwrap());
        assert_eq!(session.layers().len(), 1);
        assert_eq!(session.layers()[0].id, base_layer);
        assert_eq!(session.shapes().len(), 1);

        // The cascade was one history entry.
        session.undo().unwrap();
        // The layer itself is gone from the document, so restored shapes
        // are orphans and the self-heal drops them again.
        assert_eq!(session.layers().len(), 1);
    }

    #[test]
    fn last_layer_cannot_be_deleted() {
        let mut session = offline_session("last-layer");
        let only = session.active_layer().unwrap();
        assert!(!session.delete_layer(only).unwrap());
        assert_eq!(session.layers().len(), 1);
    }

    #[test]
    fn layer_opacity_clamped() {
        let mut session = offline_session("opacity");
        let layer = session.active_layer().unwrap();
        session.set_layer_opacity(layer, 250).unwrap();
        assert_eq!(session.layers()[0].opacity, 100);
        session.set_layer_opacity(layer, -3).unwrap();
        assert_eq!(session.layers()[0].opacity, 0);
    }

    #[test]
    fn hidden_layer_excluded_from_visible_shapes() {
        let mut session = offline_session("hide");
        session.add_shape(rect_kind(0.0, 0.0), DEFAULT_FILL).unwrap();
        let layer = session.active_layer().unwrap();

        assert_eq!(session.visible_shapes().len(), 1);
        session.set_layer_visible(layer, false).unwrap();
        assert_eq!(session.visible_shapes().len(), 0);
        assert_eq!(session.shapes().len(), 1);
    }

    #[test]
    fn fresh_edit_clears_redo() {
        let mut session = offline_session("redo-clear");
        session.add_shape(rect_kind(0.0, 0.0), DEFAULT_FILL).unwrap();
        session.add_shape(rect_kind(10.0, 10.0), DEFAULT_FILL).unwrap();
        session.undo().unwrap();
        assert!(session.can_redo());

        session.add_shape(rect_kind(20.0, 20.0), DEFAULT_FILL).unwrap();
        assert!(!session.can_redo());
    }

    #[test]
    fn remote_peer_observes_created_rectangle() {
        let mut a = offline_session("pair");
        let mut b = offline_session("pair");

        a.add_shape(rect_kind(50.0, 50.0), DEFAULT_FILL).unwrap();
        b.apply_remote(a.document().clone_automerge()).unwrap();

        // Peer B sees exactly one rectangle at (50, 50).
        let shapes: Vec<_> = b
            .shapes()
            .iter()
            .filter(|s| s.kind.kind_name() == "rectangle")
            .collect();
        assert_eq!(shapes.len(), 1);
        let pos = shapes[0].kind.position();
        assert_eq!((pos.x, pos.y), (50.0, 50.0));
    }

    #[test]
    fn remote_peer_observes_undo_of_drag() {
        let mut a = offline_session("pair-undo");
        let mut b = offline_session("pair-undo");

        let id = a
            .add_shape(rect_kind(50.0, 50.0), DEFAULT_FILL)
            .unwrap()
            .unwrap();
        a.begin_drag(id);
        a.drag_to(100.0, 100.0).unwrap();
        a.end_drag().unwrap();

        b.apply_remote(a.document().clone_automerge()).unwrap();
        let pos = b.scene().shape(id).unwrap().kind.position();
        assert_eq!((pos.x, pos.y), (100.0, 100.0));

        a.undo().unwrap();
        b.apply_remote(a.document().clone_automerge()).unwrap();
        let pos = b.scene().shape(id).unwrap().kind.position();
        assert_eq!((pos.x, pos.y), (50.0, 50.0));
    }

    #[test]
    fn remote_merge_does_not_touch_local_history() {
        let mut a = offline_session("history-isolated");
        let mut b = offline_session("history-isolated");

        a.add_shape(rect_kind(0.0, 0.0), DEFAULT_FILL).unwrap();
        assert!(!b.can_undo());
        b.apply_remote(a.document().clone_automerge()).unwrap();
        assert!(!b.can_undo());
        assert_eq!(b.shapes().len(), 1);
    }

    #[test]
    fn close_persists_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.automerge");

        let mut config = EditorConfig::new("persist", "tester");
        config.offline = true;
        config.storage_path = Some(path.clone());
        let mut session = EditorSession::open(config).unwrap();
        session.add_shape(rect_kind(1.0, 2.0), DEFAULT_FILL).unwrap();
        session.close().unwrap();
        assert!(path.exists());

        let mut config = EditorConfig::new("persist", "tester");
        config.offline = true;
        config.storage_path = Some(path);
        let reopened = EditorSession::open(config).unwrap();
        assert_eq!(reopened.shapes().len(), 1);
    }
}
