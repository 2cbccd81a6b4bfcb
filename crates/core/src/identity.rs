//! Stable object identity.
//!
//! A [`StableId`] identifies "the same" object across independent loads of a
//! scene. It is derived only from the identity persisted with the object, so
//! two snapshots of one file agree on it while handles in the live arena do
//! not.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::graph::{ObjectRef, PersistedId, Scene};

/// Cross-load identifier of a node or component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StableId {
    /// Identity of an absent object. Never equal to a live object's id.
    Null,
    Persisted {
        /// Local identifier inside the originating file.
        target_id: u64,
        /// Identifier of the containing prefab instance, 0 for loose objects.
        container_id: u64,
    },
}

impl StableId {
    /// Identity of an object that was never persisted.
    pub const LOOSE: StableId = StableId::Persisted {
        target_id: 0,
        container_id: 0,
    };

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Loose ids are shared by every unpersisted object and identify none
    /// of them.
    pub fn is_loose(&self) -> bool {
        *self == Self::LOOSE
    }
}

impl From<Option<PersistedId>> for StableId {
    fn from(persisted: Option<PersistedId>) -> Self {
        match persisted {
            Some(p) => Self::Persisted {
                target_id: p.file_id,
                container_id: p.prefab_id,
            },
            None => Self::LOOSE,
        }
    }
}

impl fmt::Display for StableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Persisted {
                target_id,
                container_id,
            } => write!(f, "{}:{}", target_id, container_id),
        }
    }
}

/// Identity of `object` in `scene`.
///
/// Live objects without persisted metadata share [`StableId::LOOSE`]; objects
/// that are not live (destroyed, detached, or never existed) map to
/// [`StableId::Null`].
pub fn identity(scene: &Scene, object: ObjectRef) -> StableId {
    match scene.persisted(object) {
        Some(persisted) => persisted.into(),
        None => StableId::Null,
    }
}

/// Identity of an optional object; `None` is the null identity.
pub fn identity_of(scene: &Scene, object: Option<ObjectRef>) -> StableId {
    object.map_or(StableId::Null, |o| identity(scene, o))
}
