//! Layer types for organizing shapes in the document.
//!
//! Layers provide visibility, lock, and opacity controls. Z-order is the
//! layer's position in the replicated order list (higher index on top).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Layer identifier - UUID for global uniqueness (CRDT-friendly)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerId(pub Uuid);

impl LayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Layer data structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub visible: bool,
    pub locked: bool,
    /// Opacity in percent, 0-100
    pub opacity: u8,
}

impl Layer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: LayerId::new(),
            name: name.into(),
            visible: true,
            locked: false,
            opacity: 100,
        }
    }

    pub fn with_id(id: LayerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            visible: true,
            locked: false,
            opacity: 100,
        }
    }

    /// Clamp an arbitrary opacity request into the 0-100 range
    pub fn clamp_opacity(value: i64) -> u8 {
        value.clamp(0, 100) as u8
    }
}

impl Default for Layer {
    fn default() -> Self {
        Self::new("Layer 1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_layer_is_visible_unlocked_opaque() {
        let layer = Layer::new("Background");
        assert!(layer.visible);
        assert!(!layer.locked);
        assert_eq!(layer.opacity, 100);
        assert_eq!(layer.name, "Background");
    }

    #[test]
    fn clamp_opacity_bounds() {
        assert_eq!(Layer::clamp_opacity(-5), 0);
        assert_eq!(Layer::clamp_opacity(0), 0);
        assert_eq!(Layer::clamp_opacity(55), 55);
        assert_eq!(Layer::clamp_opacity(100), 100);
        assert_eq!(Layer::clamp_opacity(250), 100);
    }

    #[test]
    fn layer_ids_are_unique() {
        assert_ne!(Layer::new("a").id, Layer::new("a").id);
    }
}
