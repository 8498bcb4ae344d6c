//! Shape types for the collaborative canvas.
//!
//! `ShapeKind` is a closed tagged union - entity payloads read from the
//! replicated document are decoded into exactly these variants, and records
//! with an unrecognized kind are dropped rather than carried as open
//! dynamic data.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::{Bounds, Point};
use crate::layers::LayerId;

/// Default fill for newly created shapes
pub const DEFAULT_FILL: &str = "#4f8fba";

/// Shape identifier - UUID for global uniqueness (CRDT-friendly)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShapeId(pub Uuid);

impl ShapeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ShapeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ShapeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-kind geometry for the shapes the canvas supports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ShapeKind {
    /// Axis-aligned rectangle anchored at its top-left corner
    Rectangle {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    /// Ellipse defined by center and radii
    Ellipse {
        x: f64,
        y: f64,
        radius_x: f64,
        radius_y: f64,
    },
    /// Text anchored at its top-left corner
    Text {
        x: f64,
        y: f64,
        content: String,
        font_size: f64,
    },
}

impl ShapeKind {
    /// Wire/document tag for this variant
    pub fn kind_name(&self) -> &'static str {
        match self {
            ShapeKind::Rectangle { .. } => "rectangle",
            ShapeKind::Ellipse { .. } => "ellipse",
            ShapeKind::Text { .. } => "text",
        }
    }

    /// Anchor position (top-left corner, or center for ellipses)
    pub fn position(&self) -> Point {
        match self {
            ShapeKind::Rectangle { x, y, .. }
            | ShapeKind::Ellipse { x, y, .. }
            | ShapeKind::Text { x, y, .. } => Point::new(*x, *y),
        }
    }

    /// Same geometry translated by a delta
    pub fn translated(&self, dx: f64, dy: f64) -> Self {
        let mut moved = self.clone();
        match &mut moved {
            ShapeKind::Rectangle { x, y, .. }
            | ShapeKind::Ellipse { x, y, .. }
            | ShapeKind::Text { x, y, .. } => {
                *x += dx;
                *y += dy;
            }
        }
        moved
    }

    /// Same geometry moved so its anchor sits at the given point
    pub fn moved_to(&self, pos: Point) -> Self {
        let current = self.position();
        self.translated(pos.x - current.x, pos.y - current.y)
    }

    /// Resizable dimensions of this shape, if any. Text has none - it is
    /// sized by its font, not by a bounding box.
    pub fn dimensions(&self) -> Option<(f64, f64)> {
        match self {
            ShapeKind::Rectangle { width, height, .. } => Some((*width, *height)),
            ShapeKind::Ellipse {
                radius_x, radius_y, ..
            } => Some((radius_x * 2.0, radius_y * 2.0)),
            ShapeKind::Text { .. } => None,
        }
    }

    /// Axis-aligned bounding box
    pub fn bounds(&self) -> Bounds {
        match self {
            ShapeKind::Rectangle {
                x,
                y,
                width,
                height,
            } => Bounds::new(Point::new(*x, *y), Point::new(x + width, y + height)),
            ShapeKind::Ellipse {
                x,
                y,
                radius_x,
                radius_y,
            } => Bounds::new(
                Point::new(x - radius_x, y - radius_y),
                Point::new(x + radius_x, y + radius_y),
            ),
            ShapeKind::Text {
                x, y, font_size, ..
            } => {
                // Approximation good enough for export framing; precise text
                // metrics belong to the rendering collaborator.
                let line_height = font_size * 1.2;
                Bounds::new(Point::new(*x, *y), Point::new(*x, *y + line_height))
            }
        }
    }
}

/// A drawable entity on the canvas.
///
/// `is_selected` and `is_dragging` are transient UI state carried for the
/// host renderer's convenience. They never enter the replicated document or
/// history snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    pub id: ShapeId,
    pub kind: ShapeKind,
    /// Fill color as a #rrggbb CSS string
    pub fill_color: String,
    /// Owning layer; must reference an existing layer
    pub layer_id: LayerId,
    #[serde(skip)]
    pub is_selected: bool,
    #[serde(skip)]
    pub is_dragging: bool,
}

impl Shape {
    pub fn new(kind: ShapeKind, fill_color: impl Into<String>, layer_id: LayerId) -> Self {
        Self {
            id: ShapeId::new(),
            kind,
            fill_color: fill_color.into(),
            layer_id,
            is_selected: false,
            is_dragging: false,
        }
    }

    /// Copy with transient flags stripped, as stored in history snapshots
    pub fn committed(&self) -> Shape {
        Shape {
            is_selected: false,
            is_dragging: false,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translated_moves_all_kinds() {
        let rect = ShapeKind::Rectangle {
            x: 10.0,
            y: 20.0,
            width: 100.0,
            height: 50.0,
        };
        assert_eq!(rect.translated(5.0, -5.0).position(), Point::new(15.0, 15.0));

        let ellipse = ShapeKind::Ellipse {
            x: 0.0,
            y: 0.0,
            radius_x: 30.0,
            radius_y: 40.0,
        };
        assert_eq!(ellipse.translated(1.0, 2.0).position(), Point::new(1.0, 2.0));

        let text = ShapeKind::Text {
            x: 7.0,
            y: 8.0,
            content: "hi".into(),
            font_size: 16.0,
        };
        assert_eq!(text.translated(-7.0, -8.0).position(), Point::new(0.0, 0.0));
    }

    #[test]
    fn moved_to_is_absolute() {
        let rect = ShapeKind::Rectangle {
            x: 50.0,
            y: 50.0,
            width: 80.0,
            height: 60.0,
        };
        let moved = rect.moved_to(Point::new(100.0, 100.0));
        assert_eq!(moved.position(), Point::new(100.0, 100.0));
        assert_eq!(moved.dimensions(), Some((80.0, 60.0)));
    }

    #[test]
    fn ellipse_dimensions_are_diameters() {
        let ellipse = ShapeKind::Ellipse {
            x: 0.0,
            y: 0.0,
            radius_x: 15.0,
            radius_y: 25.0,
        };
        assert_eq!(ellipse.dimensions(), Some((30.0, 50.0)));
    }

    #[test]
    fn text_has_no_resizable_dimensions() {
        let text = ShapeKind::Text {
            x: 0.0,
            y: 0.0,
            content: "label".into(),
            font_size: 14.0,
        };
        assert_eq!(text.dimensions(), None);
    }

    #[test]
    fn committed_strips_transient_flags() {
        let mut shape = Shape::new(
            ShapeKind::Rectangle {
                x: 0.0,
                y: 0.0,
                width: 40.0,
                height: 40.0,
            },
            DEFAULT_FILL,
            LayerId::new(),
        );
        shape.is_selected = true;
        shape.is_dragging = true;

        let committed = shape.committed();
        assert!(!committed.is_selected);
        assert!(!committed.is_dragging);
        assert_eq!(committed.id, shape.id);
        assert_eq!(committed.kind, shape.kind);
    }

    #[test]
    fn rectangle_bounds() {
        let rect = ShapeKind::Rectangle {
            x: 10.0,
            y: 20.0,
            width: 30.0,
            height: 40.0,
        };
        let b = rect.bounds();
        assert_eq!(b.min, Point::new(10.0, 20.0));
        assert_eq!(b.max, Point::new(40.0, 60.0));
    }
}
