//! The live object graph: scene arena, typed field values, field traversal,
//! and snapshot persistence.

pub mod scene;
pub mod snapshot;
pub mod value;
pub mod walker;

pub use scene::{Component, ComponentId, Duplicate, Node, NodeId, ObjectRef, PersistedId, Scene};
pub use snapshot::{JsonSceneStore, SceneStore};
pub use value::{plain_name, Bounds, Curve, Field, FieldKind, Keyframe, Rect, Value};
pub use walker::{
    iterate, read_field, write_field, FieldCursor, FieldEntry, FieldLocation, FieldPath,
};
