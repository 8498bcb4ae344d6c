//! slatesync - real-time collaborative canvas synchronization engine.
//!
//! Keeps a per-document scene graph (shapes + layers) consistent across
//! concurrent editors. The replicated automerge document is the source of
//! truth; a linear undo/redo history sits on top of it, and lightweight
//! presence (cursors, identity) flows through a separate high-frequency
//! channel that never touches the durable state.
//!
//! The host UI opens one [`editor::EditorSession`] per document, feeds it
//! input events, calls [`editor::EditorSession::pump`] every frame, and
//! renders from the session's scene accessors.

pub mod document;
pub mod editor;
pub mod export;
pub mod geometry;
pub mod history;
pub mod layers;
pub mod policy;
pub mod presence;
pub mod scene;
pub mod selection;
pub mod shapes;
pub mod sync;

pub use document::{CanvasDocument, DocumentId};
pub use editor::{EditorConfig, EditorSession};
pub use geometry::{Point, Viewport};
pub use history::{History, Snapshot};
pub use layers::{Layer, LayerId};
pub use presence::{PresenceBroadcaster, PresenceManager, PresenceRecord};
pub use scene::SceneModel;
pub use selection::Selection;
pub use shapes::{Shape, ShapeId, ShapeKind};
pub use sync::{ConnectionState, SyncConfig, SyncEvent, SyncHandle};
