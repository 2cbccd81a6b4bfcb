//! Per-node grouping of actions.

use serde::Serialize;

use super::{ActionId, MergeAction};
use crate::graph::{NodeId, Scene};

/// All actions concerning one node pair. The group counts as merged once
/// every action in it is.
#[derive(Debug, Clone, Serialize)]
pub struct NodeMergeActions {
    /// Display name, e.g. `Your[Level/Orc] vs. Their[Level/Orc]`.
    pub name: String,
    pub ours: Option<NodeId>,
    pub theirs: Option<NodeId>,
    pub actions: Vec<ActionId>,
}

impl NodeMergeActions {
    pub fn new(scene: &Scene, ours: Option<NodeId>, theirs: Option<NodeId>) -> Self {
        Self {
            name: group_name(scene, ours, theirs),
            ours,
            theirs,
            actions: Vec::new(),
        }
    }

    pub fn has_actions(&self) -> bool {
        !self.actions.is_empty()
    }

    pub fn merged(&self, actions: &[MergeAction]) -> bool {
        self.actions
            .iter()
            .all(|id| actions.get(id.0).is_some_and(MergeAction::merged))
    }

    pub fn unresolved(&self, actions: &[MergeAction]) -> usize {
        self.actions
            .iter()
            .filter(|id| actions.get(id.0).is_some_and(|a| !a.merged()))
            .count()
    }
}

fn group_name(scene: &Scene, ours: Option<NodeId>, theirs: Option<NodeId>) -> String {
    let mut name = String::new();
    if let Some(o) = ours {
        name.push_str(&format!("Your[{}]", scene.path(o)));
    }
    if let Some(t) = theirs {
        if ours.is_some() {
            name.push_str(" vs. ");
        }
        name.push_str(&format!("Their[{}]", scene.path(t)));
    }
    name
}
