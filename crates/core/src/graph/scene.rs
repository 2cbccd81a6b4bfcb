//! The live object graph.
//!
//! A [`Scene`] is an arena of nodes and components addressed by copyable
//! handles. During a merge both sides live in the same scene: "their" nodes
//! are absorbed into it and kept inactive and hidden until a resolution
//! needs them.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::value::{Field, Value};
use crate::action::ActionId;
use crate::errors::GraphError;

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Handle of a node in a [`Scene`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub(crate) u32);

/// Handle of a component in a [`Scene`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(pub(crate) u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl ComponentId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A reference to any object in the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectRef {
    Node(NodeId),
    Component(ComponentId),
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(id) => write!(f, "node #{}", id.0),
            Self::Component(id) => write!(f, "component #{}", id.0),
        }
    }
}

impl From<NodeId> for ObjectRef {
    fn from(id: NodeId) -> Self {
        Self::Node(id)
    }
}

impl From<ComponentId> for ObjectRef {
    fn from(id: ComponentId) -> Self {
        Self::Component(id)
    }
}

/// Identity metadata persisted with an object in its originating file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PersistedId {
    /// Local identifier of the object inside its file.
    pub file_id: u64,
    /// Identifier of the containing prefab instance, or 0 for loose objects.
    #[serde(default)]
    pub prefab_id: u64,
}

// ---------------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------------

/// A hierarchy entry with attached components.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub persisted: Option<PersistedId>,
    pub parent: Option<NodeId>,
    pub active: bool,
    /// Hidden nodes are inert placeholders that are never saved.
    pub hidden: bool,
    pub fields: Vec<Field>,
    pub(crate) components: Vec<ComponentId>,
    pub(crate) governed_by: Option<ActionId>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            persisted: None,
            parent: None,
            active: true,
            hidden: false,
            fields: Vec::new(),
            components: Vec::new(),
            governed_by: None,
        }
    }

    pub fn components(&self) -> &[ComponentId] {
        &self.components
    }
}

/// A typed data block owned by exactly one node.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub type_name: String,
    pub persisted: Option<PersistedId>,
    pub fields: Vec<Field>,
    pub(crate) owner: NodeId,
    pub(crate) governed_by: Option<ActionId>,
    /// Position in the owner's component list while detached.
    pub(crate) detached_at: Option<usize>,
}

impl Component {
    pub fn owner(&self) -> NodeId {
        self.owner
    }
}

/// Result of [`Scene::duplicate_node`].
#[derive(Debug, Clone)]
pub struct Duplicate {
    pub node: NodeId,
    /// `(source, copy)` pairs in component order.
    pub components: Vec<(ComponentId, ComponentId)>,
}

// ---------------------------------------------------------------------------
// Scene
// ---------------------------------------------------------------------------

/// Arena holding every node and component of the live graph.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    nodes: Vec<Option<Node>>,
    components: Vec<Option<Component>>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    // -- construction -------------------------------------------------------

    /// Insert a node under `parent` and return its handle.
    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        parent: Option<NodeId>,
    ) -> Result<NodeId, GraphError> {
        let mut node = Node::new(name);
        if let Some(p) = parent {
            self.require_node(p)?;
            node.parent = Some(p);
        }
        Ok(self.insert_node(node))
    }

    pub(crate) fn insert_node(&mut self, mut node: Node) -> NodeId {
        node.components.clear();
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Some(node));
        id
    }

    /// Attach a new, empty component of `type_name` to `owner`.
    pub fn add_component(
        &mut self,
        owner: NodeId,
        type_name: impl Into<String>,
    ) -> Result<ComponentId, GraphError> {
        self.require_node(owner)?;
        let component = Component {
            type_name: type_name.into(),
            persisted: None,
            fields: Vec::new(),
            owner,
            governed_by: None,
            detached_at: None,
        };
        Ok(self.insert_component(component))
    }

    fn insert_component(&mut self, component: Component) -> ComponentId {
        let owner = component.owner;
        let id = ComponentId(self.components.len() as u32);
        self.components.push(Some(component));
        if let Some(node) = self.node_mut(owner) {
            node.components.push(id);
        }
        id
    }

    pub fn set_persisted(&mut self, object: ObjectRef, persisted: PersistedId) -> Result<(), GraphError> {
        match object {
            ObjectRef::Node(id) => self.require_node_mut(id)?.persisted = Some(persisted),
            ObjectRef::Component(id) => self.require_component_mut(id)?.persisted = Some(persisted),
        }
        Ok(())
    }

    pub fn push_field(&mut self, object: ObjectRef, field: Field) -> Result<(), GraphError> {
        self.fields_mut(object)
            .ok_or(GraphError::MissingObject(object))?
            .push(field);
        Ok(())
    }

    // -- lookup -------------------------------------------------------------

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// An attached component. Detached components are not visible here.
    pub fn component(&self, id: ComponentId) -> Option<&Component> {
        self.component_slot(id).filter(|c| c.detached_at.is_none())
    }

    pub fn component_mut(&mut self, id: ComponentId) -> Option<&mut Component> {
        self.components
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .filter(|c| c.detached_at.is_none())
    }

    fn component_slot(&self, id: ComponentId) -> Option<&Component> {
        self.components.get(id.index()).and_then(Option::as_ref)
    }

    pub(crate) fn require_node(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.node(id).ok_or(GraphError::MissingObject(ObjectRef::Node(id)))
    }

    pub(crate) fn require_node_mut(&mut self, id: NodeId) -> Result<&mut Node, GraphError> {
        self.node_mut(id)
            .ok_or(GraphError::MissingObject(ObjectRef::Node(id)))
    }

    pub(crate) fn require_component(&self, id: ComponentId) -> Result<&Component, GraphError> {
        self.component(id)
            .ok_or(GraphError::MissingObject(ObjectRef::Component(id)))
    }

    pub(crate) fn require_component_mut(
        &mut self,
        id: ComponentId,
    ) -> Result<&mut Component, GraphError> {
        self.component_mut(id)
            .ok_or(GraphError::MissingObject(ObjectRef::Component(id)))
    }

    /// Whether `object` is a live, attached object of this scene.
    pub fn contains(&self, object: ObjectRef) -> bool {
        match object {
            ObjectRef::Node(id) => self.node(id).is_some(),
            ObjectRef::Component(id) => self.component(id).is_some(),
        }
    }

    pub fn is_detached(&self, id: ComponentId) -> bool {
        self.component_slot(id)
            .is_some_and(|c| c.detached_at.is_some())
    }

    pub fn fields(&self, object: ObjectRef) -> Option<&[Field]> {
        match object {
            ObjectRef::Node(id) => self.node(id).map(|n| n.fields.as_slice()),
            ObjectRef::Component(id) => self.component(id).map(|c| c.fields.as_slice()),
        }
    }

    pub fn fields_mut(&mut self, object: ObjectRef) -> Option<&mut Vec<Field>> {
        match object {
            ObjectRef::Node(id) => self.node_mut(id).map(|n| &mut n.fields),
            ObjectRef::Component(id) => self.component_mut(id).map(|c| &mut c.fields),
        }
    }

    /// Persisted metadata of an object, if it is live.
    pub fn persisted(&self, object: ObjectRef) -> Option<Option<PersistedId>> {
        match object {
            ObjectRef::Node(id) => self.node(id).map(|n| n.persisted),
            ObjectRef::Component(id) => self.component(id).map(|c| c.persisted),
        }
    }

    /// The node an object belongs to: itself for nodes, the owner for
    /// components (attached or not).
    pub fn owner_of(&self, object: ObjectRef) -> Option<NodeId> {
        match object {
            ObjectRef::Node(id) => self.node(id).map(|_| id),
            ObjectRef::Component(id) => self.component_slot(id).map(|c| c.owner),
        }
    }

    /// Live node handles in creation order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_some())
            .map(|(i, _)| NodeId(i as u32))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn components_of(&self, node: NodeId) -> &[ComponentId] {
        self.node(node).map(|n| n.components.as_slice()).unwrap_or(&[])
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.node_ids()
            .filter(|&id| self.node(id).is_some_and(|n| n.parent == Some(node)))
            .collect()
    }

    pub fn roots(&self) -> Vec<NodeId> {
        self.node_ids()
            .filter(|&id| self.node(id).is_some_and(|n| n.parent.is_none()))
            .collect()
    }

    /// `node` followed by all of its descendants, depth first.
    pub fn subtree(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            if self.node(id).is_none() {
                continue;
            }
            out.push(id);
            let mut children = self.children(id);
            children.reverse();
            stack.extend(children);
        }
        out
    }

    /// Slash-separated hierarchy path, e.g. `Level/Enemies/Orc`.
    pub fn path(&self, node: NodeId) -> String {
        let mut parts = Vec::new();
        let mut current = self.node(node).map(|n| (node, n));
        while let Some((_, n)) = current {
            parts.push(n.name.as_str());
            current = n.parent.and_then(|p| self.node(p).map(|pn| (p, pn)));
        }
        parts.reverse();
        parts.join("/")
    }

    pub fn governor(&self, object: ObjectRef) -> Option<ActionId> {
        match object {
            ObjectRef::Node(id) => self.node(id).and_then(|n| n.governed_by),
            ObjectRef::Component(id) => self.component_slot(id).and_then(|c| c.governed_by),
        }
    }

    // -- mutation -----------------------------------------------------------

    pub(crate) fn set_governor(&mut self, object: ObjectRef, action: Option<ActionId>) {
        match object {
            ObjectRef::Node(id) => {
                if let Some(n) = self.node_mut(id) {
                    n.governed_by = action;
                }
            }
            ObjectRef::Component(id) => {
                if let Some(c) = self.components.get_mut(id.index()).and_then(Option::as_mut) {
                    c.governed_by = action;
                }
            }
        }
    }

    pub(crate) fn clear_governors(&mut self) {
        for node in self.nodes.iter_mut().flatten() {
            node.governed_by = None;
        }
        for component in self.components.iter_mut().flatten() {
            component.governed_by = None;
        }
    }

    /// Re-parent `node`. `None` makes it a root.
    pub fn set_parent(&mut self, node: NodeId, parent: Option<NodeId>) -> Result<(), GraphError> {
        self.require_node(node)?;
        if let Some(p) = parent {
            self.require_node(p)?;
            let mut cursor = Some(p);
            while let Some(c) = cursor {
                if c == node {
                    return Err(GraphError::CyclicParent {
                        child: node.into(),
                        parent: p.into(),
                    });
                }
                cursor = self.node(c).and_then(|n| n.parent);
            }
        }
        self.require_node_mut(node)?.parent = parent;
        Ok(())
    }

    pub fn set_active(&mut self, node: NodeId, active: bool) -> Result<(), GraphError> {
        self.require_node_mut(node)?.active = active;
        Ok(())
    }

    pub fn set_hidden(&mut self, node: NodeId, hidden: bool) -> Result<(), GraphError> {
        self.require_node_mut(node)?.hidden = hidden;
        Ok(())
    }

    /// Destroy `node`, its components, and all of its descendants.
    /// Returns the number of nodes destroyed.
    pub fn destroy_node(&mut self, node: NodeId) -> usize {
        let doomed = self.subtree(node);
        for &id in &doomed {
            if let Some(n) = self.nodes.get_mut(id.index()).and_then(Option::take) {
                for c in n.components {
                    if let Some(slot) = self.components.get_mut(c.index()) {
                        *slot = None;
                    }
                }
            }
        }
        // Detached components are no longer listed on their owner.
        for slot in self.components.iter_mut() {
            if slot.as_ref().is_some_and(|c| doomed.contains(&c.owner)) {
                *slot = None;
            }
        }
        doomed.len()
    }

    /// Destroy a single component, attached or detached.
    pub fn destroy_component(&mut self, id: ComponentId) -> bool {
        let Some(component) = self.components.get_mut(id.index()).and_then(Option::take) else {
            return false;
        };
        if let Some(node) = self.node_mut(component.owner) {
            node.components.retain(|&c| c != id);
        }
        true
    }

    /// Remove a component from its owner while keeping its handle, so it
    /// can be re-attached later. Idempotent.
    pub fn detach_component(&mut self, id: ComponentId) -> Result<(), GraphError> {
        if self.is_detached(id) {
            return Ok(());
        }
        let owner = self.require_component(id)?.owner;
        let node = self.require_node_mut(owner)?;
        let position = node
            .components
            .iter()
            .position(|&c| c == id)
            .unwrap_or(node.components.len());
        node.components.retain(|&c| c != id);
        if let Some(c) = self.components.get_mut(id.index()).and_then(Option::as_mut) {
            c.detached_at = Some(position);
        }
        Ok(())
    }

    /// Re-attach a detached component at its previous position. Idempotent.
    pub fn reattach_component(&mut self, id: ComponentId) -> Result<(), GraphError> {
        let Some((owner, position)) = self
            .component_slot(id)
            .map(|c| (c.owner, c.detached_at))
        else {
            return Err(GraphError::MissingObject(ObjectRef::Component(id)));
        };
        let Some(position) = position else {
            return Ok(());
        };
        let node = self.require_node_mut(owner)?;
        let at = position.min(node.components.len());
        node.components.insert(at, id);
        if let Some(c) = self.components.get_mut(id.index()).and_then(Option::as_mut) {
            c.detached_at = None;
        }
        Ok(())
    }

    /// Copy `node` and its components, without children. The copy keeps the
    /// source's parent, activation, and visibility, but has no persisted
    /// identity. References inside the copy that point at the source node
    /// or its components are rewritten to point at the copy.
    pub fn duplicate_node(&mut self, source: NodeId) -> Result<Duplicate, GraphError> {
        let src = self.require_node(source)?.clone();
        let mut copy = src.clone();
        copy.persisted = None;
        copy.governed_by = None;
        let copy_id = self.insert_node(copy);

        let mut pairs = Vec::with_capacity(src.components.len());
        for &component in &src.components {
            let copied = self.copy_component_onto(copy_id, component)?;
            pairs.push((component, copied));
        }

        let mut remap = |r: ObjectRef| -> Option<ObjectRef> {
            match r {
                ObjectRef::Node(id) if id == source => Some(ObjectRef::Node(copy_id)),
                ObjectRef::Component(id) => Some(
                    pairs
                        .iter()
                        .find(|(s, _)| *s == id)
                        .map(|(_, c)| ObjectRef::Component(*c))
                        .unwrap_or(r),
                ),
                other => Some(other),
            }
        };
        let targets: Vec<ObjectRef> = std::iter::once(ObjectRef::Node(copy_id))
            .chain(pairs.iter().map(|(_, c)| ObjectRef::Component(*c)))
            .collect();
        for target in targets {
            if let Some(fields) = self.fields_mut(target) {
                for field in fields.iter_mut() {
                    field.value.map_references(&mut remap);
                }
            }
        }

        Ok(Duplicate {
            node: copy_id,
            components: pairs,
        })
    }

    /// Attach a copy of `source` (type and field values) to `target`.
    pub fn copy_component_onto(
        &mut self,
        target: NodeId,
        source: ComponentId,
    ) -> Result<ComponentId, GraphError> {
        self.require_node(target)?;
        let src = self
            .component_slot(source)
            .ok_or(GraphError::MissingObject(ObjectRef::Component(source)))?;
        let component = Component {
            type_name: src.type_name.clone(),
            persisted: None,
            fields: src.fields.clone(),
            owner: target,
            governed_by: None,
            detached_at: None,
        };
        Ok(self.insert_component(component))
    }

    /// Move every live object of `other` into this scene. Handles inside
    /// `other` are rewritten to the new handles. Returns the absorbed nodes
    /// in `other`'s order.
    pub fn absorb(&mut self, other: Scene) -> Vec<NodeId> {
        let node_base = self.nodes.len() as u32;
        let component_base = self.components.len() as u32;

        let node_map: HashMap<NodeId, NodeId> = other
            .node_ids()
            .map(|id| (id, NodeId(node_base + id.0)))
            .collect();
        let component_map: HashMap<ComponentId, ComponentId> = other
            .components
            .iter()
            .enumerate()
            .filter(|(_, c)| c.as_ref().is_some_and(|c| c.detached_at.is_none()))
            .map(|(i, _)| (ComponentId(i as u32), ComponentId(component_base + i as u32)))
            .collect();

        let mut remap = |r: ObjectRef| -> Option<ObjectRef> {
            match r {
                ObjectRef::Node(id) => node_map.get(&id).copied().map(ObjectRef::Node),
                ObjectRef::Component(id) => {
                    component_map.get(&id).copied().map(ObjectRef::Component)
                }
            }
        };

        let absorbed: Vec<NodeId> = other.node_ids().map(|id| node_map[&id]).collect();

        for slot in other.nodes {
            let node = slot.map(|mut n| {
                n.parent = n.parent.and_then(|p| node_map.get(&p).copied());
                n.components = n
                    .components
                    .iter()
                    .filter_map(|c| component_map.get(c).copied())
                    .collect();
                n.governed_by = None;
                for field in &mut n.fields {
                    field.value.map_references(&mut remap);
                }
                n
            });
            self.nodes.push(node);
        }
        for slot in other.components {
            let component = slot.filter(|c| c.detached_at.is_none()).map(|mut c| {
                c.owner = node_map.get(&c.owner).copied().unwrap_or(c.owner);
                c.governed_by = None;
                for field in &mut c.fields {
                    field.value.map_references(&mut remap);
                }
                c
            });
            self.components.push(component);
        }
        absorbed
    }

    /// Read a top-level field value by name, for display and tests.
    pub fn field_value(&self, object: ObjectRef, name: &str) -> Option<&Value> {
        self.fields(object)?
            .iter()
            .find(|f| f.name == name)
            .map(|f| &f.value)
    }
}
