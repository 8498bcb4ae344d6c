//! SVG export of the visible scene.
//!
//! A host convenience for "download a snapshot": renders `visible_shapes()`
//! in draw order with layer opacity applied. Fidelity beyond that (text
//! metrics, anti-aliasing) is the rendering collaborator's business.

use std::fmt::Write;
use std::path::Path;

use anyhow::Result;

use crate::geometry::{Bounds, Point};
use crate::scene::SceneModel;
use crate::shapes::{Shape, ShapeKind};

/// Padding around the content bounding box, in world units
const MARGIN: f64 = 16.0;

/// Render the visible shapes to an SVG string
pub fn export_svg(scene: &SceneModel) -> String {
    let mut output = String::new();

    let bounds = content_bounds(scene);
    let width = bounds.width() + MARGIN * 2.0;
    let height = bounds.height() + MARGIN * 2.0;
    let offset_x = -bounds.min.x + MARGIN;
    let offset_y = -bounds.min.y + MARGIN;

    writeln!(
        &mut output,
        r#"<?xml version="1.0" encoding="UTF-8"?>
<svg xmlns="http://www.w3.org/2000/svg"
     width="{width:.0}" height="{height:.0}"
     viewBox="0 0 {width:.0} {height:.0}"
     style="background-color: white;">"#
    )
    .unwrap();

    for shape in scene.visible_shapes() {
        let opacity = scene
            .layer_of(shape)
            .map(|layer| layer.opacity as f64 / 100.0)
            .unwrap_or(1.0);
        render_shape(&mut output, shape, offset_x, offset_y, opacity);
    }

    writeln!(&mut output, "</svg>").unwrap();
    output
}

/// Save the visible shapes as an SVG file
pub fn save_svg(scene: &SceneModel, path: &Path) -> Result<()> {
    let svg = export_svg(scene);
    std::fs::write(path, svg)?;
    Ok(())
}

fn content_bounds(scene: &SceneModel) -> Bounds {
    let mut shapes = scene.visible_shapes();
    let Some(first) = shapes.next() else {
        return Bounds::new(Point::new(0.0, 0.0), Point::new(64.0, 64.0));
    };
    shapes.fold(first.kind.bounds(), |acc, shape| {
        acc.union(&shape.kind.bounds())
    })
}

fn render_shape(output: &mut String, shape: &Shape, dx: f64, dy: f64, opacity: f64) {
    let fill = &shape.fill_color;
    match &shape.kind {
        ShapeKind::Rectangle {
            x,
            y,
            width,
            height,
        } => {
            writeln!(
                output,
                r#"  <rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{}" fill-opacity="{:.2}" />"#,
                x + dx,
                y + dy,
                width,
                height,
                fill,
                opacity
            )
            .unwrap();
        }
        ShapeKind::Ellipse {
            x,
            y,
            radius_x,
            radius_y,
        } => {
            writeln!(
                output,
                r#"  <ellipse cx="{:.1}" cy="{:.1}" rx="{:.1}" ry="{:.1}" fill="{}" fill-opacity="{:.2}" />"#,
                x + dx,
                y + dy,
                radius_x,
                radius_y,
                fill,
                opacity
            )
            .unwrap();
        }
        ShapeKind::Text {
            x,
            y,
            content,
            font_size,
        } => {
            writeln!(
                output,
                r#"  <text x="{:.1}" y="{:.1}" font-size="{:.1}" font-family="sans-serif" fill="{}" fill-opacity="{:.2}">{}</text>"#,
                x + dx,
                y + dy + font_size,
                font_size,
                fill,
                opacity,
                escape_xml(content)
            )
            .unwrap();
        }
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{CanvasDocument, DocumentId};
    use crate::layers::Layer;
    use crate::shapes::DEFAULT_FILL;

    fn scene_with(shapes: &[Shape], layers: &[Layer]) -> SceneModel {
        let mut doc = CanvasDocument::new(DocumentId::new());
        for layer in layers {
            doc.push_layer(layer).unwrap();
        }
        for shape in shapes {
            doc.put_shape(shape).unwrap();
        }
        let mut scene = SceneModel::new();
        scene.rebuild(&doc).unwrap();
        scene
    }

    #[test]
    fn empty_scene_still_produces_valid_svg() {
        let scene = scene_with(&[], &[Layer::new("Only")]);
        let svg = export_svg(&scene);
        assert!(svg.starts_with("<?xml"));
        assert!(svg.contains("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
    }

    #[test]
    fn hidden_layer_shapes_are_not_exported() {
        let shown = Layer::new("Shown");
        let mut hidden = Layer::new("Hidden");
        hidden.visible = false;

        let visible_shape = Shape::new(
            ShapeKind::Rectangle {
                x: 0.0,
                y: 0.0,
                width: 50.0,
                height: 50.0,
            },
            "#aabbcc",
            shown.id,
        );
        let invisible_shape = Shape::new(
            ShapeKind::Rectangle {
                x: 100.0,
                y: 100.0,
                width: 50.0,
                height: 50.0,
            },
            "#ddeeff",
            hidden.id,
        );

        let scene = scene_with(
            &[visible_shape, invisible_shape],
            &[shown, hidden.clone()],
        );
        let svg = export_svg(&scene);
        assert!(svg.contains("#aabbcc"));
        assert!(!svg.contains("#ddeeff"));
    }

    #[test]
    fn layer_opacity_applies_to_fill() {
        let mut layer = Layer::new("Half");
        layer.opacity = 50;
        let shape = Shape::new(
            ShapeKind::Ellipse {
                x: 10.0,
                y: 10.0,
                radius_x: 30.0,
                radius_y: 30.0,
            },
            DEFAULT_FILL,
            layer.id,
        );
        let svg = export_svg(&scene_with(&[shape], &[layer]));
        assert!(svg.contains(r#"fill-opacity="0.50""#));
    }

    #[test]
    fn text_content_is_escaped() {
        let layer = Layer::new("Only");
        let shape = Shape::new(
            ShapeKind::Text {
                x: 0.0,
                y: 0.0,
                content: "a < b & c".into(),
                font_size: 14.0,
            },
            "#000000",
            layer.id,
        );
        let svg = export_svg(&scene_with(&[shape], &[layer]));
        assert!(svg.contains("a &lt; b &amp; c"));
    }
}
