//! Local-first automerge document - THE source of truth for replicated state.
//!
//! The document holds three named collections:
//! - `shapes`: map of shape id to shape record
//! - `layers`: map of layer id to layer record
//! - `layer_order`: list of layer ids, bottom to top
//!
//! Every committed edit goes through this document. Remote peers converge by
//! merging automerge state; this module only marshals structured entities
//! to/from the document's native representation and never implements merge
//! logic of its own.

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use automerge::{
    ActorId, Automerge, ObjId, ObjType, ROOT, ReadDoc, ScalarValue,
    transaction::{CommitOptions, Transactable},
};
use uuid::Uuid;

use crate::layers::{Layer, LayerId};
use crate::shapes::{Shape, ShapeId, ShapeKind};

/// Document identity, derived by namespacing a caller-supplied room name.
/// Two editors that open the same room converge on the same document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentId(String);

impl DocumentId {
    /// Fresh random identity for a new document
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Identity derived from a caller-supplied room/document name
    pub fn from_room(room: &str) -> Self {
        Self(room.trim().replace(char::is_whitespace, "-"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Get the default storage path for a document
pub fn default_storage_path(id: &DocumentId) -> PathBuf {
    let data_dir = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".local/share")
        });
    data_dir
        .join("slatesync")
        .join(format!("{}.automerge", id))
}

/// The automerge-backed canvas document
pub struct CanvasDocument {
    doc: Automerge,
    id: DocumentId,
    storage_path: Option<PathBuf>,
    dirty: bool,
}

impl CanvasDocument {
    /// Create a new empty document with initialized collections.
    ///
    /// The schema transaction runs under an actor id derived from the
    /// document id, so two replicas that open the same room produce an
    /// identical init change and merging them deduplicates the collection
    /// containers instead of conflicting on them. Actual edits use a
    /// per-replica random actor.
    pub fn new(id: DocumentId) -> Self {
        let init_actor = ActorId::from(format!("slatesync-init:{}", id).as_bytes());
        let mut doc = Automerge::new().with_actor(init_actor);
        {
            let mut tx = doc.transaction();
            tx.put(ROOT, "id", id.as_str()).unwrap();
            tx.put_object(ROOT, "shapes", ObjType::Map).unwrap();
            tx.put_object(ROOT, "layers", ObjType::Map).unwrap();
            tx.put_object(ROOT, "layer_order", ObjType::List).unwrap();
            // Pinned timestamp keeps the init change byte-identical across
            // replicas, which is what makes it dedupe on merge.
            tx.commit_with(CommitOptions::default().with_time(0));
        }
        doc.set_actor(ActorId::from(Uuid::new_v4().as_bytes().as_slice()));

        Self {
            doc,
            id,
            storage_path: None,
            dirty: false,
        }
    }

    /// Wrap an existing automerge document (e.g. received from a peer)
    pub fn from_automerge(doc: Automerge, id: DocumentId) -> Self {
        Self {
            doc,
            id,
            storage_path: None,
            dirty: false,
        }
    }

    /// Load from disk
    pub fn load(path: &PathBuf) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let doc = Automerge::load(&bytes)?;

        let id_str = match doc.get(ROOT, "id")? {
            Some((automerge::Value::Scalar(s), _)) => scalar_string(s.as_ref()),
            _ => None,
        };
        let id = id_str
            .map(|s| DocumentId::from_room(&s))
            .unwrap_or_else(DocumentId::new);

        Ok(Self {
            doc,
            id,
            storage_path: Some(path.clone()),
            dirty: false,
        })
    }

    /// Save to the configured storage path, if any
    pub fn save(&mut self) -> Result<()> {
        if let Some(path) = &self.storage_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let bytes = self.doc.save();
            std::fs::write(path, bytes)?;
            self.dirty = false;
        }
        Ok(())
    }

    /// Save to a specific path and remember it
    pub fn save_to(&mut self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = self.doc.save();
        std::fs::write(path, bytes)?;
        self.storage_path = Some(path.clone());
        self.dirty = false;
        Ok(())
    }

    /// Get the underlying automerge document (for sync)
    pub fn automerge(&self) -> &Automerge {
        &self.doc
    }

    /// Clone the automerge document (for sync)
    pub fn clone_automerge(&self) -> Automerge {
        self.doc.clone()
    }

    /// Merge remote changes using automerge's native conflict resolution
    pub fn merge(&mut self, other: &mut Automerge) -> Result<()> {
        self.doc.merge(other)?;
        self.dirty = true;
        Ok(())
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn storage_path(&self) -> Option<&PathBuf> {
        self.storage_path.as_ref()
    }

    pub fn set_storage_path(&mut self, path: PathBuf) {
        self.storage_path = Some(path);
    }

    /// True when both named collections are empty
    pub fn is_empty(&self) -> Result<bool> {
        let shapes = self.collection(COLLECTION_SHAPES)?;
        let layers = self.collection(COLLECTION_LAYERS)?;
        Ok(self.doc.keys(&shapes).next().is_none() && self.doc.keys(&layers).next().is_none())
    }

    /// Seed the document from initial data if the remote collections are
    /// empty. First writer wins the empty case - nothing pre-existed, so no
    /// merge conflict is possible. Returns true if seeding happened.
    pub fn seed_if_empty(&mut self, layers: &[Layer], shapes: &[Shape]) -> Result<bool> {
        if !self.is_empty()? {
            return Ok(false);
        }
        for layer in layers {
            self.put_layer(layer)?;
        }
        self.set_layer_order(&layers.iter().map(|l| l.id).collect::<Vec<_>>())?;
        for shape in shapes {
            self.put_shape(shape)?;
        }
        Ok(true)
    }

    // --- Shape operations ---

    /// Insert or overwrite a shape record
    pub fn put_shape(&mut self, shape: &Shape) -> Result<()> {
        let mut tx = self.doc.transaction();
        let shapes_obj = ensure_object(&mut tx, COLLECTION_SHAPES, ObjType::Map)?;
        // Overwrite wholesale: delete then rewrite keeps stale per-kind
        // fields from leaking across kind changes.
        if tx.get(&shapes_obj, &shape.id.to_string())?.is_some() {
            tx.delete(&shapes_obj, &shape.id.to_string())?;
        }
        let shape_obj = tx.put_object(&shapes_obj, &shape.id.to_string(), ObjType::Map)?;
        write_shape(&mut tx, &shape_obj, shape)?;
        tx.commit();
        self.dirty = true;
        Ok(())
    }

    /// Delete a shape (explicit tombstone; merge propagates the removal)
    pub fn remove_shape(&mut self, id: ShapeId) -> Result<()> {
        let shapes_obj = self.collection(COLLECTION_SHAPES)?;
        let mut tx = self.doc.transaction();
        tx.delete(&shapes_obj, &id.to_string())?;
        tx.commit();
        self.dirty = true;
        Ok(())
    }

    /// Read a single shape
    pub fn read_shape(&self, id: ShapeId) -> Result<Option<Shape>> {
        let shapes_obj = self.collection(COLLECTION_SHAPES)?;
        match self.doc.get(&shapes_obj, &id.to_string())? {
            Some((_, shape_obj)) => read_shape(&self.doc, id, &shape_obj),
            None => Ok(None),
        }
    }

    /// Read all shapes (unordered; the scene model orders them)
    pub fn read_all_shapes(&self) -> Result<Vec<Shape>> {
        let shapes_obj = match self.doc.get(ROOT, COLLECTION_SHAPES)? {
            Some((_, obj_id)) => obj_id,
            None => return Ok(Vec::new()),
        };

        let mut shapes = Vec::new();
        for key in self.doc.keys(&shapes_obj) {
            let id = ShapeId(Uuid::parse_str(&key)?);
            if let Some((_, shape_obj)) = self.doc.get(&shapes_obj, &key)? {
                if let Some(shape) = read_shape(&self.doc, id, &shape_obj)? {
                    shapes.push(shape);
                }
            }
        }
        Ok(shapes)
    }

    /// Replace the entire shapes collection in one transaction.
    ///
    /// This is the broadcast primitive for history commits and undo/redo:
    /// transmitting the whole restored snapshot guarantees remote peers
    /// converge to the exact pre/post-undo state even if they modified
    /// shapes in the interim.
    pub fn replace_shapes(&mut self, shapes: &[Shape]) -> Result<()> {
        let shapes_obj = self.collection(COLLECTION_SHAPES)?;
        let existing: Vec<String> = self.doc.keys(&shapes_obj).collect();

        let mut tx = self.doc.transaction();
        for key in existing {
            tx.delete(&shapes_obj, &key)?;
        }
        for shape in shapes {
            let shape_obj = tx.put_object(&shapes_obj, &shape.id.to_string(), ObjType::Map)?;
            write_shape(&mut tx, &shape_obj, shape)?;
        }
        tx.commit();
        self.dirty = true;
        Ok(())
    }

    // --- Layer operations ---

    /// Insert or overwrite a layer record
    pub fn put_layer(&mut self, layer: &Layer) -> Result<()> {
        let mut tx = self.doc.transaction();
        let layers_obj = ensure_object(&mut tx, COLLECTION_LAYERS, ObjType::Map)?;
        let layer_obj = tx.put_object(&layers_obj, &layer.id.to_string(), ObjType::Map)?;
        write_layer(&mut tx, &layer_obj, layer)?;
        tx.commit();
        self.dirty = true;
        Ok(())
    }

    /// Append a layer and register it at the top of the z-order
    pub fn push_layer(&mut self, layer: &Layer) -> Result<()> {
        self.put_layer(layer)?;
        let order_obj = self.collection(COLLECTION_LAYER_ORDER)?;
        let mut tx = self.doc.transaction();
        let len = tx.length(&order_obj);
        tx.insert(&order_obj, len, layer.id.to_string())?;
        tx.commit();
        self.dirty = true;
        Ok(())
    }

    /// Delete a layer and cascade-delete every shape it owns, atomically.
    /// The layer entry, its z-order slot, and the owned shapes all get
    /// explicit tombstones in a single transaction.
    pub fn remove_layer(&mut self, id: LayerId) -> Result<()> {
        let layers_obj = self.collection(COLLECTION_LAYERS)?;
        let order_obj = self.collection(COLLECTION_LAYER_ORDER)?;
        let shapes_obj = self.collection(COLLECTION_SHAPES)?;

        let owned: Vec<String> = self
            .read_all_shapes()?
            .into_iter()
            .filter(|s| s.layer_id == id)
            .map(|s| s.id.to_string())
            .collect();
        let order_idx = self.layer_order()?.iter().position(|l| *l == id);

        let mut tx = self.doc.transaction();
        for key in owned {
            tx.delete(&shapes_obj, &key)?;
        }
        if let Some(idx) = order_idx {
            tx.delete(&order_obj, idx)?;
        }
        tx.delete(&layers_obj, &id.to_string())?;
        tx.commit();
        self.dirty = true;
        Ok(())
    }

    /// The z-order list as stored, bottom to top
    pub fn layer_order(&self) -> Result<Vec<LayerId>> {
        let order_obj = match self.doc.get(ROOT, COLLECTION_LAYER_ORDER)? {
            Some((_, obj_id)) => obj_id,
            None => return Ok(Vec::new()),
        };
        let len = self.doc.length(&order_obj);
        let mut order = Vec::with_capacity(len);
        for i in 0..len {
            if let Some((automerge::Value::Scalar(s), _)) = self.doc.get(&order_obj, i)? {
                if let Some(text) = scalar_string(s.as_ref()) {
                    if let Ok(uuid) = Uuid::parse_str(&text) {
                        order.push(LayerId(uuid));
                    }
                }
            }
        }
        Ok(order)
    }

    /// Rewrite the z-order list
    pub fn set_layer_order(&mut self, order: &[LayerId]) -> Result<()> {
        let order_obj = self.collection(COLLECTION_LAYER_ORDER)?;
        let mut tx = self.doc.transaction();
        let len = tx.length(&order_obj);
        for i in (0..len).rev() {
            tx.delete(&order_obj, i)?;
        }
        for (i, id) in order.iter().enumerate() {
            tx.insert(&order_obj, i, id.to_string())?;
        }
        tx.commit();
        self.dirty = true;
        Ok(())
    }

    /// Read all layers in z-order. Layers that a concurrent peer added
    /// without an order slot are appended deterministically (sorted by id);
    /// order entries whose layer was deleted are skipped.
    pub fn read_layers(&self) -> Result<Vec<Layer>> {
        let layers_obj = match self.doc.get(ROOT, COLLECTION_LAYERS)? {
            Some((_, obj_id)) => obj_id,
            None => return Ok(Vec::new()),
        };

        let mut by_id = std::collections::HashMap::new();
        for key in self.doc.keys(&layers_obj) {
            let id = LayerId(Uuid::parse_str(&key)?);
            if let Some((_, layer_obj)) = self.doc.get(&layers_obj, &key)? {
                if let Some(layer) = read_layer(&self.doc, id, &layer_obj)? {
                    by_id.insert(id, layer);
                }
            }
        }

        let mut ordered = Vec::with_capacity(by_id.len());
        for id in self.layer_order()? {
            if let Some(layer) = by_id.remove(&id) {
                ordered.push(layer);
            }
        }
        let mut stragglers: Vec<Layer> = by_id.into_values().collect();
        stragglers.sort_by_key(|l| l.id);
        ordered.extend(stragglers);
        Ok(ordered)
    }

    /// Drop shapes whose owning layer no longer exists. Such records are
    /// local state corruption (or a mid-merge artifact); they are removed
    /// rather than left dangling. Returns how many were dropped.
    pub fn prune_orphans(&mut self) -> Result<usize> {
        let layer_ids: std::collections::HashSet<LayerId> =
            self.read_layers()?.iter().map(|l| l.id).collect();
        let orphans: Vec<ShapeId> = self
            .read_all_shapes()?
            .into_iter()
            .filter(|s| !layer_ids.contains(&s.layer_id))
            .map(|s| s.id)
            .collect();

        if orphans.is_empty() {
            return Ok(0);
        }

        let shapes_obj = self.collection(COLLECTION_SHAPES)?;
        let mut tx = self.doc.transaction();
        for id in &orphans {
            tracing::warn!(shape = %id, "dropping shape with missing layer");
            tx.delete(&shapes_obj, &id.to_string())?;
        }
        tx.commit();
        self.dirty = true;
        Ok(orphans.len())
    }

    fn collection(&self, name: &str) -> Result<ObjId> {
        match self.doc.get(ROOT, name)? {
            Some((_, obj_id)) => Ok(obj_id),
            None => Err(anyhow!("no {} collection in document", name)),
        }
    }
}

impl Default for CanvasDocument {
    fn default() -> Self {
        Self::new(DocumentId::new())
    }
}

const COLLECTION_SHAPES: &str = "shapes";
const COLLECTION_LAYERS: &str = "layers";
const COLLECTION_LAYER_ORDER: &str = "layer_order";

fn ensure_object<T: Transactable>(tx: &mut T, name: &str, ty: ObjType) -> Result<ObjId> {
    match tx.get(ROOT, name)? {
        Some((_, obj_id)) => Ok(obj_id),
        None => Ok(tx.put_object(ROOT, name, ty)?),
    }
}

// --- Marshaling helpers ---

fn write_shape<T: Transactable>(tx: &mut T, obj: &ObjId, shape: &Shape) -> Result<()> {
    tx.put(obj, "kind", shape.kind.kind_name())?;
    tx.put(obj, "fill", shape.fill_color.as_str())?;
    tx.put(obj, "layer", shape.layer_id.to_string())?;
    match &shape.kind {
        ShapeKind::Rectangle {
            x,
            y,
            width,
            height,
        } => {
            tx.put(obj, "x", *x)?;
            tx.put(obj, "y", *y)?;
            tx.put(obj, "width", *width)?;
            tx.put(obj, "height", *height)?;
        }
        ShapeKind::Ellipse {
            x,
            y,
            radius_x,
            radius_y,
        } => {
            tx.put(obj, "x", *x)?;
            tx.put(obj, "y", *y)?;
            tx.put(obj, "radius_x", *radius_x)?;
            tx.put(obj, "radius_y", *radius_y)?;
        }
        ShapeKind::Text {
            x,
            y,
            content,
            font_size,
        } => {
            tx.put(obj, "x", *x)?;
            tx.put(obj, "y", *y)?;
            tx.put(obj, "content", content.as_str())?;
            tx.put(obj, "font_size", *font_size)?;
        }
    }
    Ok(())
}

fn read_shape(doc: &Automerge, id: ShapeId, obj: &ObjId) -> Result<Option<Shape>> {
    let Some(kind_str) = get_opt_string(doc, obj, "kind")? else {
        return Ok(None);
    };

    let kind = match kind_str.as_str() {
        "rectangle" => ShapeKind::Rectangle {
            x: get_f64(doc, obj, "x")?,
            y: get_f64(doc, obj, "y")?,
            width: get_f64(doc, obj, "width")?,
            height: get_f64(doc, obj, "height")?,
        },
        "ellipse" => ShapeKind::Ellipse {
            x: get_f64(doc, obj, "x")?,
            y: get_f64(doc, obj, "y")?,
            radius_x: get_f64(doc, obj, "radius_x")?,
            radius_y: get_f64(doc, obj, "radius_y")?,
        },
        "text" => ShapeKind::Text {
            x: get_f64(doc, obj, "x")?,
            y: get_f64(doc, obj, "y")?,
            content: get_string(doc, obj, "content")?,
            font_size: get_f64(doc, obj, "font_size")?,
        },
        // Closed union: records with an unknown kind are ignored.
        other => {
            tracing::warn!(kind = other, shape = %id, "ignoring shape with unknown kind");
            return Ok(None);
        }
    };

    let fill = get_opt_string(doc, obj, "fill")?.unwrap_or_else(|| crate::shapes::DEFAULT_FILL.into());
    let layer_str = get_string(doc, obj, "layer")?;
    let layer_id = LayerId(Uuid::parse_str(&layer_str)?);

    Ok(Some(Shape {
        id,
        kind,
        fill_color: fill,
        layer_id,
        is_selected: false,
        is_dragging: false,
    }))
}

fn write_layer<T: Transactable>(tx: &mut T, obj: &ObjId, layer: &Layer) -> Result<()> {
    tx.put(obj, "name", layer.name.as_str())?;
    tx.put(obj, "visible", layer.visible)?;
    tx.put(obj, "locked", layer.locked)?;
    tx.put(obj, "opacity", layer.opacity as i64)?;
    Ok(())
}

fn read_layer(doc: &Automerge, id: LayerId, obj: &ObjId) -> Result<Option<Layer>> {
    let Some(name) = get_opt_string(doc, obj, "name")? else {
        return Ok(None);
    };
    Ok(Some(Layer {
        id,
        name,
        visible: get_opt_bool(doc, obj, "visible")?.unwrap_or(true),
        locked: get_opt_bool(doc, obj, "locked")?.unwrap_or(false),
        opacity: Layer::clamp_opacity(get_opt_i64(doc, obj, "opacity")?.unwrap_or(100)),
    }))
}

fn scalar_string(s: &ScalarValue) -> Option<String> {
    match s {
        ScalarValue::Str(text) => Some(text.to_string()),
        _ => None,
    }
}

fn scalar_f64(s: &ScalarValue) -> Option<f64> {
    match s {
        ScalarValue::F64(f) => Some(*f),
        ScalarValue::Int(i) => Some(*i as f64),
        ScalarValue::Uint(u) => Some(*u as f64),
        _ => None,
    }
}

fn get_f64(doc: &Automerge, obj: &ObjId, key: &str) -> Result<f64> {
    match doc.get(obj, key)? {
        Some((automerge::Value::Scalar(s), _)) => {
            scalar_f64(s.as_ref()).ok_or_else(|| anyhow!("expected number for key {}", key))
        }
        _ => Err(anyhow!("missing key {}", key)),
    }
}

fn get_string(doc: &Automerge, obj: &ObjId, key: &str) -> Result<String> {
    get_opt_string(doc, obj, key)?.ok_or_else(|| anyhow!("missing key {}", key))
}

fn get_opt_string(doc: &Automerge, obj: &ObjId, key: &str) -> Result<Option<String>> {
    match doc.get(obj, key)? {
        Some((automerge::Value::Scalar(s), _)) => Ok(scalar_string(s.as_ref())),
        _ => Ok(None),
    }
}

fn get_opt_bool(doc: &Automerge, obj: &ObjId, key: &str) -> Result<Option<bool>> {
    match doc.get(obj, key)? {
        Some((automerge::Value::Scalar(s), _)) => match s.as_ref() {
            ScalarValue::Boolean(b) => Ok(Some(*b)),
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

fn get_opt_i64(doc: &Automerge, obj: &ObjId, key: &str) -> Result<Option<i64>> {
    match doc.get(obj, key)? {
        Some((automerge::Value::Scalar(s), _)) => match s.as_ref() {
            ScalarValue::Int(i) => Ok(Some(*i)),
            ScalarValue::Uint(u) => Ok(Some(*u as i64)),
            ScalarValue::F64(f) => Ok(Some(*f as i64)),
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::DEFAULT_FILL;

    fn rect(x: f64, y: f64, layer: LayerId) -> Shape {
        Shape::new(
            ShapeKind::Rectangle {
                x,
                y,
                width: 100.0,
                height: 80.0,
            },
            DEFAULT_FILL,
            layer,
        )
    }

    #[test]
    fn new_document_is_empty() {
        let doc = CanvasDocument::new(DocumentId::from_room("test"));
        assert!(doc.is_empty().unwrap());
        assert!(doc.read_all_shapes().unwrap().is_empty());
        assert!(doc.read_layers().unwrap().is_empty());
    }

    #[test]
    fn put_and_read_shape_roundtrip() {
        let mut doc = CanvasDocument::new(DocumentId::new());
        let layer = Layer::new("Layer 1");
        doc.push_layer(&layer).unwrap();

        let shape = Shape::new(
            ShapeKind::Ellipse {
                x: 10.0,
                y: 20.0,
                radius_x: 30.0,
                radius_y: 40.0,
            },
            "#112233",
            layer.id,
        );
        doc.put_shape(&shape).unwrap();

        let back = doc.read_shape(shape.id).unwrap().unwrap();
        assert_eq!(back.kind, shape.kind);
        assert_eq!(back.fill_color, "#112233");
        assert_eq!(back.layer_id, layer.id);
        assert!(!back.is_selected);
    }

    #[test]
    fn text_shape_roundtrip() {
        let mut doc = CanvasDocument::new(DocumentId::new());
        let layer = Layer::new("Layer 1");
        doc.push_layer(&layer).unwrap();

        let shape = Shape::new(
            ShapeKind::Text {
                x: 5.0,
                y: 6.0,
                content: "hello world".into(),
                font_size: 18.0,
            },
            "#000000",
            layer.id,
        );
        doc.put_shape(&shape).unwrap();

        let back = doc.read_shape(shape.id).unwrap().unwrap();
        assert_eq!(back.kind, shape.kind);
    }

    #[test]
    fn transient_flags_never_replicated() {
        let mut doc = CanvasDocument::new(DocumentId::new());
        let layer = Layer::new("Layer 1");
        doc.push_layer(&layer).unwrap();

        let mut shape = rect(0.0, 0.0, layer.id);
        shape.is_selected = true;
        shape.is_dragging = true;
        doc.put_shape(&shape).unwrap();

        let back = doc.read_shape(shape.id).unwrap().unwrap();
        assert!(!back.is_selected);
        assert!(!back.is_dragging);
    }

    #[test]
    fn remove_shape_tombstones() {
        let mut doc = CanvasDocument::new(DocumentId::new());
        let layer = Layer::new("Layer 1");
        doc.push_layer(&layer).unwrap();
        let shape = rect(0.0, 0.0, layer.id);
        doc.put_shape(&shape).unwrap();

        doc.remove_shape(shape.id).unwrap();
        assert!(doc.read_shape(shape.id).unwrap().is_none());
        assert!(doc.read_all_shapes().unwrap().is_empty());
    }

    #[test]
    fn replace_shapes_rewrites_collection() {
        let mut doc = CanvasDocument::new(DocumentId::new());
        let layer = Layer::new("Layer 1");
        doc.push_layer(&layer).unwrap();

        let a = rect(0.0, 0.0, layer.id);
        let b = rect(10.0, 10.0, layer.id);
        doc.put_shape(&a).unwrap();
        doc.put_shape(&b).unwrap();

        let c = rect(99.0, 99.0, layer.id);
        doc.replace_shapes(std::slice::from_ref(&c)).unwrap();

        let all = doc.read_all_shapes().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, c.id);
    }

    #[test]
    fn layers_read_back_in_order() {
        let mut doc = CanvasDocument::new(DocumentId::new());
        let bottom = Layer::new("Background");
        let top = Layer::new("Foreground");
        doc.push_layer(&bottom).unwrap();
        doc.push_layer(&top).unwrap();

        let layers = doc.read_layers().unwrap();
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0].id, bottom.id);
        assert_eq!(layers[1].id, top.id);
    }

    #[test]
    fn remove_layer_cascades_owned_shapes() {
        let mut doc = CanvasDocument::new(DocumentId::new());
        let keep = Layer::new("Keep");
        let doomed = Layer::new("Doomed");
        doc.push_layer(&keep).unwrap();
        doc.push_layer(&doomed).unwrap();

        let survivor = rect(0.0, 0.0, keep.id);
        let casualty = rect(5.0, 5.0, doomed.id);
        doc.put_shape(&survivor).unwrap();
        doc.put_shape(&casualty).unwrap();

        doc.remove_layer(doomed.id).unwrap();

        let layers = doc.read_layers().unwrap();
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].id, keep.id);

        let shapes = doc.read_all_shapes().unwrap();
        assert_eq!(shapes.len(), 1);
        assert_eq!(shapes[0].id, survivor.id);
    }

    #[test]
    fn seed_if_empty_first_writer_wins() {
        let mut doc = CanvasDocument::new(DocumentId::new());
        let layer = Layer::new("Layer 1");
        let shape = rect(1.0, 2.0, layer.id);

        assert!(doc.seed_if_empty(std::slice::from_ref(&layer), std::slice::from_ref(&shape)).unwrap());
        // Second seed is a no-op: the collections are no longer empty.
        let other_layer = Layer::new("Other");
        assert!(!doc.seed_if_empty(std::slice::from_ref(&other_layer), &[]).unwrap());

        assert_eq!(doc.read_layers().unwrap().len(), 1);
        assert_eq!(doc.read_all_shapes().unwrap().len(), 1);
    }

    #[test]
    fn prune_orphans_drops_shapes_with_missing_layer() {
        let mut doc = CanvasDocument::new(DocumentId::new());
        let layer = Layer::new("Layer 1");
        doc.push_layer(&layer).unwrap();
        doc.put_shape(&rect(0.0, 0.0, layer.id)).unwrap();
        // A shape pointing at a layer that never existed.
        doc.put_shape(&rect(1.0, 1.0, LayerId::new())).unwrap();

        assert_eq!(doc.prune_orphans().unwrap(), 1);
        assert_eq!(doc.read_all_shapes().unwrap().len(), 1);
        assert_eq!(doc.prune_orphans().unwrap(), 0);
    }

    #[test]
    fn merge_converges_two_replicas() {
        let room = DocumentId::from_room("shared-room");
        let mut a = CanvasDocument::new(room.clone());
        let layer = Layer::new("Layer 1");
        a.seed_if_empty(std::slice::from_ref(&layer), &[]).unwrap();

        // Peer B starts from A's replicated state, as it would after the
        // initial sync exchange.
        let mut b = CanvasDocument::from_automerge(a.clone_automerge(), room.clone());

        let shape = rect(50.0, 50.0, layer.id);
        a.put_shape(&shape).unwrap();

        b.merge(&mut a.clone_automerge()).unwrap();

        let shapes = b.read_all_shapes().unwrap();
        assert_eq!(shapes.len(), 1);
        assert_eq!(shapes[0].kind.kind_name(), "rectangle");
        let pos = shapes[0].kind.position();
        assert_eq!(pos.x, 50.0);
        assert_eq!(pos.y, 50.0);
    }

    #[test]
    fn independently_created_replicas_of_same_room_converge() {
        // Both peers open the same room before ever talking to each other.
        let mut a = CanvasDocument::new(DocumentId::from_room("late-join"));
        let mut b = CanvasDocument::new(DocumentId::from_room("late-join"));

        let layer = Layer::new("Layer 1");
        a.seed_if_empty(std::slice::from_ref(&layer), &[]).unwrap();
        a.put_shape(&rect(50.0, 50.0, layer.id)).unwrap();

        b.merge(&mut a.clone_automerge()).unwrap();

        assert_eq!(b.read_layers().unwrap().len(), 1);
        let shapes = b.read_all_shapes().unwrap();
        assert_eq!(shapes.len(), 1);
        assert_eq!(shapes[0].kind.position().x, 50.0);
    }

    #[test]
    fn merge_propagates_layer_tombstone() {
        let room = DocumentId::from_room("tombstones");
        let mut a = CanvasDocument::new(room.clone());
        let keep = Layer::new("Keep");
        let doomed = Layer::new("Doomed");
        a.seed_if_empty(&[keep.clone(), doomed.clone()], &[]).unwrap();

        let mut b = CanvasDocument::from_automerge(a.clone_automerge(), room);

        a.remove_layer(doomed.id).unwrap();
        b.merge(&mut a.clone_automerge()).unwrap();

        let layers = b.read_layers().unwrap();
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].id, keep.id);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.automerge");

        let mut doc = CanvasDocument::new(DocumentId::from_room("persisted"));
        let layer = Layer::new("Layer 1");
        doc.push_layer(&layer).unwrap();
        doc.put_shape(&rect(3.0, 4.0, layer.id)).unwrap();
        doc.save_to(&path).unwrap();
        assert!(!doc.is_dirty());

        let loaded = CanvasDocument::load(&path).unwrap();
        assert_eq!(loaded.id().as_str(), "persisted");
        assert_eq!(loaded.read_all_shapes().unwrap().len(), 1);
        assert_eq!(loaded.read_layers().unwrap().len(), 1);
    }
}
