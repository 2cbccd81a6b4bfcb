//! Resolvable merge actions.
//!
//! A [`MergeAction`] is one unit of disagreement between the two graphs. Its
//! [`ActionKind`] carries exactly the data needed to apply either side; the
//! effects themselves run inside [`crate::engine::MergeEngine`], which owns
//! the scene and registry they act on.

pub mod filter;
pub mod group;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ActionError;
use crate::graph::{ComponentId, FieldLocation, NodeId, ObjectRef, Value};

pub use filter::{FilterMode, FilterSettings, MergeFilter, StateMask};
pub use group::NodeMergeActions;

/// Index of an action within its engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(pub usize);

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One of the two input graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Ours,
    Theirs,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ours => write!(f, "ours"),
            Self::Theirs => write!(f, "theirs"),
        }
    }
}

/// How an action has been resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    #[default]
    Unresolved,
    UsingOurs,
    UsingTheirs,
    UsingNew,
}

impl Resolution {
    pub fn is_resolved(self) -> bool {
        self != Self::Unresolved
    }
}

impl From<Side> for Resolution {
    fn from(side: Side) -> Self {
        match side {
            Side::Ours => Self::UsingOurs,
            Side::Theirs => Self::UsingTheirs,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unresolved => write!(f, "unresolved"),
            Self::UsingOurs => write!(f, "ours"),
            Self::UsingTheirs => write!(f, "theirs"),
            Self::UsingNew => write!(f, "new"),
        }
    }
}

// ---------------------------------------------------------------------------
// Confirmation protocol
// ---------------------------------------------------------------------------

/// The caller's answer to a question the resolution may need to ask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confirmation {
    /// No answer yet: return [`ResolveOutcome::NeedsConfirmation`] if a
    /// question comes up.
    #[default]
    Ask,
    Granted,
    Denied,
}

/// A question the caller must answer before resolution can continue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub action: ActionId,
    pub title: String,
    pub message: String,
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.title, self.message)
    }
}

/// Result of a resolve call.
#[derive(Debug)]
pub enum ResolveOutcome {
    /// The effect was applied and the action now holds this resolution.
    Resolved(Resolution),
    /// Nothing changed; ask the user and call again with an answer.
    NeedsConfirmation(Prompt),
    /// The user declined; nothing changed.
    Declined(ActionError),
    /// The effect failed; the action keeps its previous state.
    Failed(ActionError),
}

impl ResolveOutcome {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// Kind-specific data of an action.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionKind {
    /// Their graph has a node ours lacks.
    AddNode {
        their_node: NodeId,
        /// Our materialized copy, once one exists.
        copy: Option<NodeId>,
    },
    /// Our graph has a node theirs lacks.
    RemoveNode { our_node: NodeId, was_active: bool },
    /// Their node has a component our matching node lacks.
    AddComponent {
        our_node: NodeId,
        their_component: ComponentId,
        copy: Option<ComponentId>,
    },
    /// Our node has a component their matching node lacks.
    RemoveComponent { our_component: ComponentId },
    /// Same identity, but a different type or field layout.
    ReplaceComponent {
        our_component: ComponentId,
        their_component: ComponentId,
        copy: Option<ComponentId>,
    },
    /// One field differs. Both values are captured when the diff runs.
    ChangeValue {
        location: FieldLocation,
        ours_initial: Value,
        theirs_initial: Value,
    },
    /// The node's parent differs. `their_parent` is a handle on their side.
    Parenting {
        node: NodeId,
        our_parent: Option<NodeId>,
        their_parent: Option<NodeId>,
    },
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddNode { .. } => "add node",
            Self::RemoveNode { .. } => "remove node",
            Self::AddComponent { .. } => "add component",
            Self::RemoveComponent { .. } => "remove component",
            Self::ReplaceComponent { .. } => "replace component",
            Self::ChangeValue { .. } => "change value",
            Self::Parenting { .. } => "parenting",
        }
    }

    /// For existence actions, the side that keeps the governed object alive.
    pub fn existence_side(&self) -> Option<Side> {
        match self {
            Self::AddNode { .. } | Self::AddComponent { .. } => Some(Side::Theirs),
            Self::RemoveNode { .. } => Some(Side::Ours),
            _ => None,
        }
    }

    /// The object whose existence this action governs.
    pub fn governed_object(&self) -> Option<ObjectRef> {
        match self {
            Self::AddNode { their_node, .. } => Some((*their_node).into()),
            Self::RemoveNode { our_node, .. } => Some((*our_node).into()),
            Self::AddComponent {
                their_component, ..
            } => Some((*their_component).into()),
            _ => None,
        }
    }

    /// The side the action takes when it is created with automerge on.
    pub fn automerge_side(&self) -> Option<Side> {
        match self {
            Self::AddNode { .. } => Some(Side::Theirs),
            Self::RemoveNode { .. } | Self::AddComponent { .. } | Self::RemoveComponent { .. } => {
                Some(Side::Ours)
            }
            _ => None,
        }
    }
}

/// One resolvable conflict.
#[derive(Debug, Clone)]
pub struct MergeAction {
    pub id: ActionId,
    /// Our node this action concerns, if any.
    pub ours: Option<NodeId>,
    /// Their node this action concerns, if any.
    pub theirs: Option<NodeId>,
    pub kind: ActionKind,
    resolution: Resolution,
    automatic: bool,
    label: String,
    ours_display: String,
    theirs_display: String,
}

impl MergeAction {
    pub fn new(
        id: ActionId,
        ours: Option<NodeId>,
        theirs: Option<NodeId>,
        kind: ActionKind,
        label: impl Into<String>,
    ) -> Self {
        Self {
            id,
            ours,
            theirs,
            kind,
            resolution: Resolution::Unresolved,
            automatic: false,
            label: label.into(),
            ours_display: String::new(),
            theirs_display: String::new(),
        }
    }

    /// Attach printable forms of both sides.
    pub fn with_display(mut self, ours: impl Into<String>, theirs: impl Into<String>) -> Self {
        self.ours_display = ours.into();
        self.theirs_display = theirs.into();
        self
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Whether some side (or a new value) has been applied at some point.
    pub fn merged(&self) -> bool {
        self.resolution.is_resolved()
    }

    /// Whether the last resolution happened outside an interactive session.
    pub fn automatic(&self) -> bool {
        self.automatic
    }

    /// Human-readable description, e.g. `Rigidbody.mass`.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn ours_display(&self) -> &str {
        &self.ours_display
    }

    pub fn theirs_display(&self) -> &str {
        &self.theirs_display
    }

    pub(crate) fn mark(&mut self, resolution: Resolution, automatic: bool) {
        self.resolution = resolution;
        self.automatic = automatic;
    }

    /// The object this action's current resolution leaves unused, destroyed
    /// when the merge completes.
    pub fn discarded(&self) -> Option<ObjectRef> {
        match (&self.kind, self.resolution) {
            (ActionKind::AddNode { copy: Some(c), .. }, Resolution::UsingOurs) => Some((*c).into()),
            (ActionKind::RemoveNode { our_node, .. }, Resolution::UsingTheirs) => {
                Some((*our_node).into())
            }
            (ActionKind::AddComponent { copy: Some(c), .. }, Resolution::UsingOurs) => {
                Some((*c).into())
            }
            (ActionKind::RemoveComponent { our_component }, Resolution::UsingTheirs) => {
                Some((*our_component).into())
            }
            (ActionKind::ReplaceComponent { copy: Some(c), .. }, Resolution::UsingOurs) => {
                Some((*c).into())
            }
            (ActionKind::ReplaceComponent { our_component, .. }, Resolution::UsingTheirs) => {
                Some((*our_component).into())
            }
            _ => None,
        }
    }
}

impl fmt::Display for MergeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} [{}]", self.id, self.label, self.resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_from_side() {
        assert_eq!(Resolution::from(Side::Ours), Resolution::UsingOurs);
        assert_eq!(Resolution::from(Side::Theirs), Resolution::UsingTheirs);
        assert!(!Resolution::Unresolved.is_resolved());
        assert!(Resolution::UsingNew.is_resolved());
    }

    #[test]
    fn test_existence_sides() {
        let add = ActionKind::AddNode {
            their_node: NodeId(1),
            copy: None,
        };
        let remove = ActionKind::RemoveNode {
            our_node: NodeId(2),
            was_active: true,
        };
        assert_eq!(add.existence_side(), Some(Side::Theirs));
        assert_eq!(remove.existence_side(), Some(Side::Ours));
        assert_eq!(add.automerge_side(), Some(Side::Theirs));
        assert_eq!(remove.governed_object(), Some(ObjectRef::Node(NodeId(2))));
    }

    #[test]
    fn test_discarded_follows_resolution() {
        let mut action = MergeAction::new(
            ActionId(0),
            None,
            Some(NodeId(5)),
            ActionKind::AddNode {
                their_node: NodeId(5),
                copy: Some(NodeId(9)),
            },
            "GameObject 'Spawn'",
        );
        assert_eq!(action.discarded(), None);
        action.mark(Resolution::UsingOurs, false);
        assert_eq!(action.discarded(), Some(ObjectRef::Node(NodeId(9))));
        action.mark(Resolution::UsingTheirs, false);
        assert_eq!(action.discarded(), None);
        assert!(action.merged());
        assert_eq!(action.to_string(), "#0 GameObject 'Spawn' [theirs]");
    }
}
