//! Per-client scene model - the ordered view of shapes and layers.
//!
//! The scene is a read cache derived entirely from the replicated document.
//! On every remote update it is rebuilt wholesale rather than patched
//! incrementally; for canvases of tens to low hundreds of shapes the extra
//! CPU is noise and the model can never diverge from the source of truth.

use std::collections::{HashMap, HashSet};

use anyhow::Result;

use crate::document::CanvasDocument;
use crate::layers::{Layer, LayerId};
use crate::shapes::{Shape, ShapeId};

/// Ordered, render-ready view of the document
#[derive(Default)]
pub struct SceneModel {
    shapes: Vec<Shape>,
    layers: Vec<Layer>,
}

impl SceneModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-derive the entire scene from the document's collections.
    ///
    /// Shapes whose owning layer does not exist are dropped here (and
    /// logged); `CanvasDocument::prune_orphans` removes them from the
    /// replicated state as well. Transient flags come back cleared - the
    /// editor reapplies its selection afterwards.
    pub fn rebuild(&mut self, doc: &CanvasDocument) -> Result<()> {
        let layers = doc.read_layers()?;
        let mut shapes = doc.read_all_shapes()?;

        let layer_index: HashMap<LayerId, usize> = layers
            .iter()
            .enumerate()
            .map(|(i, layer)| (layer.id, i))
            .collect();

        let before = shapes.len();
        shapes.retain(|s| layer_index.contains_key(&s.layer_id));
        if shapes.len() < before {
            tracing::warn!(
                dropped = before - shapes.len(),
                "scene rebuild dropped orphaned shapes"
            );
        }

        // Stable draw order: layer z-order first, then id as a
        // deterministic tie-break within a layer.
        shapes.sort_by(|a, b| {
            layer_index[&a.layer_id]
                .cmp(&layer_index[&b.layer_id])
                .then_with(|| a.id.cmp(&b.id))
        });

        self.layers = layers;
        self.shapes = shapes;
        Ok(())
    }

    /// All shapes in draw order
    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    /// All layers, bottom to top
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn shape(&self, id: ShapeId) -> Option<&Shape> {
        self.shapes.iter().find(|s| s.id == id)
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    /// Owning layer of a shape
    pub fn layer_of(&self, shape: &Shape) -> Option<&Layer> {
        self.layer(shape.layer_id)
    }

    /// Shapes whose owning layer is visible, in draw order. Derived on the
    /// fly - never stored.
    pub fn visible_shapes(&self) -> impl Iterator<Item = &Shape> {
        self.shapes.iter().filter(|s| {
            self.layer(s.layer_id)
                .is_some_and(|layer| layer.visible)
        })
    }

    /// Stamp local transient flags onto the rebuilt shapes
    pub fn apply_transient(&mut self, selected: &HashSet<ShapeId>, dragging: Option<ShapeId>) {
        for shape in &mut self.shapes {
            shape.is_selected = selected.contains(&shape.id);
            shape.is_dragging = dragging == Some(shape.id);
        }
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentId;
    use crate::shapes::{DEFAULT_FILL, ShapeKind};

    fn doc_with_layers(names: &[&str]) -> (CanvasDocument, Vec<Layer>) {
        let mut doc = CanvasDocument::new(DocumentId::new());
        let layers: Vec<Layer> = names.iter().map(|n| Layer::new(*n)).collect();
        for layer in &layers {
            doc.push_layer(layer).unwrap();
        }
        (doc, layers)
    }

    fn rect_on(layer: LayerId, x: f64) -> Shape {
        Shape::new(
            ShapeKind::Rectangle {
                x,
                y: 0.0,
                width: 40.0,
                height: 40.0,
            },
            DEFAULT_FILL,
            layer,
        )
    }

    #[test]
    fn rebuild_orders_shapes_by_layer() {
        let (mut doc, layers) = doc_with_layers(&["Bottom", "Top"]);
        let on_top = rect_on(layers[1].id, 1.0);
        let on_bottom = rect_on(layers[0].id, 2.0);
        doc.put_shape(&on_top).unwrap();
        doc.put_shape(&on_bottom).unwrap();

        let mut scene = SceneModel::new();
        scene.rebuild(&doc).unwrap();

        assert_eq!(scene.shapes()[0].id, on_bottom.id);
        assert_eq!(scene.shapes()[1].id, on_top.id);
    }

    #[test]
    fn rebuild_drops_orphans() {
        let (mut doc, layers) = doc_with_layers(&["Only"]);
        doc.put_shape(&rect_on(layers[0].id, 0.0)).unwrap();
        doc.put_shape(&rect_on(LayerId::new(), 1.0)).unwrap();

        let mut scene = SceneModel::new();
        scene.rebuild(&doc).unwrap();
        assert_eq!(scene.len(), 1);
    }

    #[test]
    fn visible_shapes_excludes_hidden_layers() {
        let (mut doc, layers) = doc_with_layers(&["Shown", "Hidden"]);
        let mut hidden = layers[1].clone();
        hidden.visible = false;
        doc.put_layer(&hidden).unwrap();

        let shown_shape = rect_on(layers[0].id, 0.0);
        doc.put_shape(&shown_shape).unwrap();
        doc.put_shape(&rect_on(hidden.id, 1.0)).unwrap();

        let mut scene = SceneModel::new();
        scene.rebuild(&doc).unwrap();

        assert_eq!(scene.len(), 2);
        let visible: Vec<_> = scene.visible_shapes().collect();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, shown_shape.id);
    }

    #[test]
    fn visibility_is_rederived_after_layer_toggle() {
        let (mut doc, layers) = doc_with_layers(&["Only"]);
        doc.put_shape(&rect_on(layers[0].id, 0.0)).unwrap();

        let mut scene = SceneModel::new();
        scene.rebuild(&doc).unwrap();
        assert_eq!(scene.visible_shapes().count(), 1);

        let mut toggled = layers[0].clone();
        toggled.visible = false;
        doc.put_layer(&toggled).unwrap();
        scene.rebuild(&doc).unwrap();
        assert_eq!(scene.visible_shapes().count(), 0);
    }

    #[test]
    fn apply_transient_marks_selection_and_drag() {
        let (mut doc, layers) = doc_with_layers(&["Only"]);
        let a = rect_on(layers[0].id, 0.0);
        let b = rect_on(layers[0].id, 1.0);
        doc.put_shape(&a).unwrap();
        doc.put_shape(&b).unwrap();

        let mut scene = SceneModel::new();
        scene.rebuild(&doc).unwrap();

        let selected: HashSet<ShapeId> = [a.id].into_iter().collect();
        scene.apply_transient(&selected, Some(a.id));

        assert!(scene.shape(a.id).unwrap().is_selected);
        assert!(scene.shape(a.id).unwrap().is_dragging);
        assert!(!scene.shape(b.id).unwrap().is_selected);
    }
}
