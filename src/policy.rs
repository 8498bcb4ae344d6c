//! Layer & lock policy - which shapes may be seen, selected, or mutated.
//!
//! Every mutation entry point consults this gate before acting. Violations
//! are deliberate no-ops, not errors: clicking a locked shape is an expected
//! user misstep, not a system fault.

use crate::geometry::Viewport;
use crate::layers::Layer;
use crate::shapes::{Shape, ShapeKind};

/// Minimum size, in world units, of any resized dimension
pub const MIN_SHAPE_SIZE: f64 = 20.0;

/// A shape may be mutated when its owning layer exists and is not locked
pub fn can_mutate(shape: &Shape, layers: &[Layer]) -> bool {
    layers
        .iter()
        .find(|l| l.id == shape.layer_id)
        .is_some_and(|layer| !layer.locked)
}

/// Selection follows the same rule as mutation
pub fn can_select(shape: &Shape, layers: &[Layer]) -> bool {
    can_mutate(shape, layers)
}

/// The last remaining layer can never be deleted
pub fn can_delete_layer(layers: &[Layer]) -> bool {
    layers.len() > 1
}

/// Validate a transform result against per-kind size bounds: at least
/// `MIN_SHAPE_SIZE` on any resized dimension, at most the viewport on
/// either axis. Shapes without resizable dimensions (text) always pass.
pub fn transform_in_bounds(kind: &ShapeKind, viewport: &Viewport) -> bool {
    match kind.dimensions() {
        Some((width, height)) => {
            width >= MIN_SHAPE_SIZE
                && height >= MIN_SHAPE_SIZE
                && width <= viewport.width
                && height <= viewport.height
        }
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::LayerId;
    use crate::shapes::DEFAULT_FILL;

    fn shape_on(layer: LayerId) -> Shape {
        Shape::new(
            ShapeKind::Rectangle {
                x: 0.0,
                y: 0.0,
                width: 100.0,
                height: 100.0,
            },
            DEFAULT_FILL,
            layer,
        )
    }

    #[test]
    fn locked_layer_blocks_mutation_and_selection() {
        let mut layer = Layer::new("Locked");
        layer.locked = true;
        let shape = shape_on(layer.id);
        let layers = vec![layer];

        assert!(!can_mutate(&shape, &layers));
        assert!(!can_select(&shape, &layers));
    }

    #[test]
    fn unlocked_layer_allows_mutation() {
        let layer = Layer::new("Open");
        let shape = shape_on(layer.id);
        assert!(can_mutate(&shape, std::slice::from_ref(&layer)));
    }

    #[test]
    fn missing_layer_blocks_mutation() {
        let shape = shape_on(LayerId::new());
        assert!(!can_mutate(&shape, &[Layer::new("Unrelated")]));
    }

    #[test]
    fn hidden_but_unlocked_layer_still_mutable() {
        // Visibility gates rendering; only the lock gates mutation.
        let mut layer = Layer::new("Hidden");
        layer.visible = false;
        let shape = shape_on(layer.id);
        assert!(can_mutate(&shape, std::slice::from_ref(&layer)));
    }

    #[test]
    fn sole_layer_cannot_be_deleted() {
        assert!(!can_delete_layer(&[Layer::new("Only")]));
        assert!(can_delete_layer(&[Layer::new("A"), Layer::new("B")]));
    }

    #[test]
    fn transform_below_minimum_rejected() {
        let viewport = Viewport::new(800.0, 600.0);
        let tiny = ShapeKind::Rectangle {
            x: 0.0,
            y: 0.0,
            width: 5.0,
            height: 50.0,
        };
        assert!(!transform_in_bounds(&tiny, &viewport));

        let at_minimum = ShapeKind::Rectangle {
            x: 0.0,
            y: 0.0,
            width: MIN_SHAPE_SIZE,
            height: MIN_SHAPE_SIZE,
        };
        assert!(transform_in_bounds(&at_minimum, &viewport));
    }

    #[test]
    fn transform_beyond_viewport_rejected() {
        let viewport = Viewport::new(800.0, 600.0);
        let too_wide = ShapeKind::Rectangle {
            x: 0.0,
            y: 0.0,
            width: 801.0,
            height: 100.0,
        };
        assert!(!transform_in_bounds(&too_wide, &viewport));

        let too_tall = ShapeKind::Ellipse {
            x: 0.0,
            y: 0.0,
            radius_x: 100.0,
            radius_y: 301.0,
        };
        assert!(!transform_in_bounds(&too_tall, &viewport));
    }

    #[test]
    fn ellipse_minimum_applies_to_diameter() {
        let viewport = Viewport::new(800.0, 600.0);
        // Radius 10 = diameter 20 = exactly the minimum.
        let ok = ShapeKind::Ellipse {
            x: 0.0,
            y: 0.0,
            radius_x: 10.0,
            radius_y: 10.0,
        };
        assert!(transform_in_bounds(&ok, &viewport));

        let too_small = ShapeKind::Ellipse {
            x: 0.0,
            y: 0.0,
            radius_x: 9.0,
            radius_y: 10.0,
        };
        assert!(!transform_in_bounds(&too_small, &viewport));
    }

    #[test]
    fn text_transform_always_in_bounds() {
        let viewport = Viewport::new(800.0, 600.0);
        let text = ShapeKind::Text {
            x: 10_000.0,
            y: -50.0,
            content: "anywhere".into(),
            font_size: 12.0,
        };
        assert!(transform_in_bounds(&text, &viewport));
    }
}
