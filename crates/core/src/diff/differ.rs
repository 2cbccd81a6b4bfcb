//! Graph differencing.
//!
//! Given our nodes and their nodes, all living in one [`Scene`], the
//! [`GraphDiffer`] pairs nodes and components by stable identity and emits a
//! [`MergeAction`] for every disagreement, grouped per node pair.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, info};

use super::detector::{fields_differ, layouts_match};
use super::MergeMode;
use crate::action::{ActionId, ActionKind, MergeAction, NodeMergeActions};
use crate::graph::{
    iterate, plain_name, ComponentId, Field, FieldLocation, FieldPath, NodeId, ObjectRef, Scene,
    Value,
};
use crate::identity::{identity, StableId};

/// Type label used for node-level fields.
const NODE_TYPE: &str = "GameObject";

/// Everything the differ produced.
#[derive(Debug, Default)]
pub struct DiffOutput {
    /// Flat action list; `actions[i].id == ActionId(i)`.
    pub actions: Vec<MergeAction>,
    /// Non-empty groups in emission order.
    pub groups: Vec<NodeMergeActions>,
    /// Every (theirs, ours) pair the matching produced, nodes and components.
    pub matches: Vec<(ObjectRef, ObjectRef)>,
}

impl DiffOutput {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Pair `ours` with `theirs` by identity.
///
/// Several objects may share an identity (e.g. loose objects that were never
/// persisted). Those are matched positionally: the k-th of ours with the k-th
/// of theirs. Returns the pairs in `ours` order (with `None` for unmatched)
/// and the leftover theirs in `theirs` order.
fn match_by_identity<T: Copy + Eq + std::hash::Hash>(
    ours: &[T],
    theirs: &[T],
    id_of: impl Fn(T) -> StableId,
) -> (Vec<(T, Option<T>)>, Vec<T>) {
    let mut by_id: HashMap<StableId, VecDeque<T>> = HashMap::new();
    for &t in theirs {
        by_id.entry(id_of(t)).or_default().push_back(t);
    }

    let mut matched = HashSet::new();
    let pairs = ours
        .iter()
        .map(|&o| {
            let t = by_id.get_mut(&id_of(o)).and_then(VecDeque::pop_front);
            if let Some(t) = t {
                matched.insert(t);
            }
            (o, t)
        })
        .collect();

    let leftovers = theirs
        .iter()
        .copied()
        .filter(|t| !matched.contains(t))
        .collect();
    (pairs, leftovers)
}

// ---------------------------------------------------------------------------
// Display helpers
// ---------------------------------------------------------------------------

/// Printable form of a value, resolving references to scene paths.
pub fn describe_value(scene: &Scene, value: &Value) -> String {
    match value {
        Value::ObjectReference(Some(ObjectRef::Node(n))) if scene.node(*n).is_some() => {
            scene.path(*n)
        }
        Value::ObjectReference(Some(ObjectRef::Component(c))) => match scene.component(*c) {
            Some(component) => format!("{} ({})", scene.path(component.owner()), component.type_name),
            None => value.to_string(),
        },
        other => other.to_string(),
    }
}

fn describe_parent(scene: &Scene, parent: Option<NodeId>) -> String {
    parent.map_or_else(|| "None".to_string(), |p| scene.path(p))
}

fn node_label(scene: &Scene, node: NodeId) -> String {
    format!("{} '{}'", NODE_TYPE, scene.path(node))
}

fn component_label(scene: &Scene, component: ComponentId) -> String {
    let type_name = scene
        .component(component)
        .map_or("?", |c| c.type_name.as_str());
    format!("Component '{}'", type_name)
}

// ---------------------------------------------------------------------------
// Differ
// ---------------------------------------------------------------------------

pub struct GraphDiffer<'a> {
    scene: &'a Scene,
    mode: MergeMode,
    /// Their node -> our node it was paired with.
    node_matches: HashMap<NodeId, NodeId>,
    output: DiffOutput,
}

impl<'a> GraphDiffer<'a> {
    pub fn new(scene: &'a Scene, mode: MergeMode) -> Self {
        Self {
            scene,
            mode,
            node_matches: HashMap::new(),
            output: DiffOutput::default(),
        }
    }

    /// Diff `ours` against `theirs`. Both lists are node handles in
    /// traversal order.
    pub fn diff(mut self, ours: &[NodeId], theirs: &[NodeId]) -> DiffOutput {
        info!(
            ours = ours.len(),
            theirs = theirs.len(),
            mode = %self.mode,
            "diffing object graphs"
        );

        let scene = self.scene;
        let (pairs, leftovers) =
            match_by_identity(ours, theirs, |n| identity(scene, n.into()));
        for &(our_node, their_node) in &pairs {
            if let Some(their_node) = their_node {
                self.node_matches.insert(their_node, our_node);
                self.output.matches.push((their_node.into(), our_node.into()));
            }
        }

        for (our_node, their_node) in pairs {
            let mut group = NodeMergeActions::new(scene, Some(our_node), their_node);
            match their_node {
                Some(their_node) => self.diff_pair(&mut group, our_node, their_node),
                None => {
                    let was_active = scene.node(our_node).is_some_and(|n| n.active);
                    self.push(
                        &mut group,
                        ActionKind::RemoveNode {
                            our_node,
                            was_active,
                        },
                        node_label(scene, our_node),
                        (scene.path(our_node), "[none]".to_string()),
                    );
                }
            }
            self.finish_group(group);
        }

        for their_node in leftovers {
            let mut group = NodeMergeActions::new(scene, None, Some(their_node));
            self.push(
                &mut group,
                ActionKind::AddNode {
                    their_node,
                    copy: None,
                },
                node_label(scene, their_node),
                ("[none]".to_string(), scene.path(their_node)),
            );
            self.finish_group(group);
        }

        info!(
            actions = self.output.actions.len(),
            groups = self.output.groups.len(),
            "graph diff complete"
        );
        self.output
    }

    fn finish_group(&mut self, group: NodeMergeActions) {
        if group.has_actions() {
            self.output.groups.push(group);
        }
    }

    fn push(
        &mut self,
        group: &mut NodeMergeActions,
        kind: ActionKind,
        label: String,
        display: (String, String),
    ) {
        let id = ActionId(self.output.actions.len());
        debug!(id = %id, kind = kind.name(), label = %label, "conflict detected");
        let action = MergeAction::new(id, group.ours, group.theirs, kind, label)
            .with_display(display.0, display.1);
        self.output.actions.push(action);
        group.actions.push(id);
    }

    // ----- Matched node pair -----

    fn diff_pair(&mut self, group: &mut NodeMergeActions, ours: NodeId, theirs: NodeId) {
        let scene = self.scene;
        let (Some(our_node), Some(their_node)) = (scene.node(ours), scene.node(theirs)) else {
            return;
        };

        let our_parent = our_node.parent;
        let their_parent = their_node.parent;
        if !self.same_parent(our_parent, their_parent) {
            self.push(
                group,
                ActionKind::Parenting {
                    node: ours,
                    our_parent,
                    their_parent,
                },
                "Parent".to_string(),
                (
                    describe_parent(scene, our_parent),
                    describe_parent(scene, their_parent),
                ),
            );
        }

        let skip_name = self.mode == MergeMode::Prefab;
        self.diff_fields(
            group,
            NODE_TYPE,
            ours.into(),
            &our_node.fields,
            &their_node.fields,
            skip_name,
        );
        self.diff_components(group, ours, theirs);
    }

    /// Whether their parent stands for our parent. Parents paired by the
    /// matching decide; parents outside the diffed lists fall back to equal
    /// persisted identity.
    fn same_parent(&self, ours: Option<NodeId>, theirs: Option<NodeId>) -> bool {
        match (ours, theirs) {
            (None, None) => true,
            (Some(ours), Some(theirs)) => match self.node_matches.get(&theirs) {
                Some(&matched) => matched == ours,
                None => {
                    let id = identity(self.scene, theirs.into());
                    !id.is_null() && !id.is_loose() && id == identity(self.scene, ours.into())
                }
            },
            _ => false,
        }
    }

    /// Emit a change action for every differing field. Layout-compatible
    /// lists are walked in lockstep; otherwise fields are paired by name and
    /// only same-kind pairs are compared.
    fn diff_fields(
        &mut self,
        group: &mut NodeMergeActions,
        type_name: &str,
        owner: ObjectRef,
        ours: &[Field],
        theirs: &[Field],
        skip_name: bool,
    ) {
        let pairs: Vec<(usize, &Field, &Field)> = if layouts_match(ours, theirs) {
            iterate(ours)
                .into_iter()
                .zip(iterate(theirs))
                .filter_map(|(a, b)| Some((a.path.field, ours.get(a.path.field)?, theirs.get(b.path.field)?)))
                .collect()
        } else {
            ours.iter()
                .enumerate()
                .filter_map(|(i, a)| {
                    theirs
                        .iter()
                        .find(|b| b.name == a.name && b.kind == a.kind)
                        .map(|b| (i, a, b))
                })
                .collect()
        };

        for (index, a, b) in pairs {
            if skip_name && a.plain_name() == "Name" {
                continue;
            }
            if !fields_differ(self.scene, a, b) {
                continue;
            }
            let kind = ActionKind::ChangeValue {
                location: FieldLocation::new(owner, FieldPath::top(index)),
                ours_initial: a.value.clone(),
                theirs_initial: b.value.clone(),
            };
            let label = format!("{}.{}", type_name, plain_name(&a.name));
            let display = (
                describe_value(self.scene, &a.value),
                describe_value(self.scene, &b.value),
            );
            self.push(group, kind, label, display);
        }
    }

    fn diff_components(&mut self, group: &mut NodeMergeActions, ours: NodeId, theirs: NodeId) {
        let scene = self.scene;
        let (pairs, leftovers) = match_by_identity(
            scene.components_of(ours),
            scene.components_of(theirs),
            |c| identity(scene, c.into()),
        );

        for (our_component, their_component) in pairs {
            if let Some(their_component) = their_component {
                self.output
                    .matches
                    .push((their_component.into(), our_component.into()));
            }
            let Some(their_component) = their_component else {
                self.push(
                    group,
                    ActionKind::RemoveComponent { our_component },
                    component_label(scene, our_component),
                    ("present".to_string(), "[none]".to_string()),
                );
                continue;
            };
            let (Some(a), Some(b)) = (scene.component(our_component), scene.component(their_component))
            else {
                continue;
            };

            if a.type_name != b.type_name || !layouts_match(&a.fields, &b.fields) {
                self.push(
                    group,
                    ActionKind::ReplaceComponent {
                        our_component,
                        their_component,
                        copy: None,
                    },
                    component_label(scene, our_component),
                    (a.type_name.clone(), b.type_name.clone()),
                );
                continue;
            }
            self.diff_fields(
                group,
                &a.type_name,
                our_component.into(),
                &a.fields,
                &b.fields,
                false,
            );
        }

        for their_component in leftovers {
            self.push(
                group,
                ActionKind::AddComponent {
                    our_node: ours,
                    their_component,
                    copy: None,
                },
                component_label(scene, their_component),
                ("[none]".to_string(), "present".to_string()),
            );
        }
    }
}
