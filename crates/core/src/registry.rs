//! Session-scoped bookkeeping of which objects belong to which side.
//!
//! The registry answers one question for the resolution code: given an
//! object from either graph, which live object on "our" side stands for it?
//! It is owned by the merge engine and cleared at the start and end of every
//! session.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::errors::GraphError;
use crate::graph::{ComponentId, NodeId, ObjectRef, Scene};
use crate::identity::{identity, StableId};

#[derive(Debug, Clone, Default)]
pub struct ObjectRegistry {
    /// Persisted objects on our side, by identity. The first registration
    /// wins. Loose objects are never entered.
    ours: HashMap<StableId, ObjectRef>,
    /// Their object -> the our object the differ paired it with.
    matched: HashMap<ObjectRef, ObjectRef>,
    /// Their nodes, with the activation state they had when marked.
    theirs: BTreeMap<NodeId, bool>,
    /// Their object -> the copy materialized from it on our side.
    copies: HashMap<ObjectRef, ObjectRef>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ----- Our side -----

    /// Register `node` and all of its components as ours. Absent nodes are
    /// ignored.
    pub fn register_ours_node(&mut self, scene: &Scene, node: NodeId) {
        if scene.node(node).is_none() {
            return;
        }
        self.insert_ours(scene, node.into());
        for &component in scene.components_of(node) {
            self.insert_ours(scene, component.into());
        }
    }

    pub fn register_ours_component(&mut self, scene: &Scene, component: ComponentId) {
        if scene.component(component).is_some() {
            self.insert_ours(scene, component.into());
        }
    }

    fn insert_ours(&mut self, scene: &Scene, object: ObjectRef) {
        let id = identity(scene, object);
        if !id.is_null() && !id.is_loose() {
            self.ours.entry(id).or_insert(object);
        }
    }

    /// Forget `object`. No-op if it was never registered.
    pub fn unregister_ours(&mut self, object: ObjectRef) {
        self.ours.retain(|_, registered| *registered != object);
    }

    pub fn lookup_ours(&self, id: StableId) -> Option<ObjectRef> {
        self.ours.get(&id).copied()
    }

    pub fn ours_len(&self) -> usize {
        self.ours.len()
    }

    // ----- Their side -----

    /// Record `node` as theirs and make it inert: inactive and hidden.
    /// The activation state it had the first time it was marked is kept.
    pub fn mark_theirs(&mut self, scene: &mut Scene, node: NodeId) -> Result<(), GraphError> {
        let active = scene.require_node(node)?.active;
        self.theirs.entry(node).or_insert(active);
        scene.set_active(node, false)?;
        scene.set_hidden(node, true)?;
        Ok(())
    }

    /// Whether `object` is a their node or a component of one.
    pub fn is_theirs(&self, scene: &Scene, object: ObjectRef) -> bool {
        scene
            .owner_of(object)
            .is_some_and(|node| self.theirs.contains_key(&node))
    }

    pub fn originally_active(&self, node: NodeId) -> Option<bool> {
        self.theirs.get(&node).copied()
    }

    pub fn theirs_len(&self) -> usize {
        self.theirs.len()
    }

    // ----- Counterparts -----

    /// Record that the differ paired their `theirs` with our `ours`.
    pub fn record_match(&mut self, theirs: ObjectRef, ours: ObjectRef) {
        self.matched.insert(theirs, ours);
    }

    pub fn matched_with(&self, theirs: ObjectRef) -> Option<ObjectRef> {
        self.matched.get(&theirs).copied()
    }

    /// Our stand-in for `object`.
    ///
    /// Their objects resolve to the our object they were paired with, to our
    /// object with the same persisted identity, or else to the copy
    /// materialized from them; `None` means none of these exists yet. A loose
    /// identity never resolves through the ours map. Anything that is not
    /// theirs stands for itself.
    pub fn counterpart_for(&self, scene: &Scene, object: ObjectRef) -> Option<ObjectRef> {
        if !self.is_theirs(scene, object) {
            return Some(object);
        }
        if let Some(ours) = self.matched_with(object) {
            return Some(ours);
        }
        let id = identity(scene, object);
        let by_identity = if id.is_loose() {
            None
        } else {
            self.lookup_ours(id)
        };
        by_identity.or_else(|| self.copy_of(object))
    }

    pub fn copy_of(&self, their: ObjectRef) -> Option<ObjectRef> {
        self.copies.get(&their).copied()
    }

    pub fn set_as_copy(&mut self, their: ObjectRef, copy: ObjectRef) {
        self.copies.insert(their, copy);
    }

    /// Every materialized copy.
    pub fn copies(&self) -> impl Iterator<Item = ObjectRef> + '_ {
        self.copies.values().copied()
    }

    /// Instantiate `their` node on our side.
    ///
    /// The copy has no children, the activation state the original had before
    /// it was marked, and is parented under our counterpart of the original's
    /// parent (a root when there is none). References inside the copy are
    /// rewritten to our counterparts where those exist. Returns the existing
    /// copy if one is already live.
    pub fn materialize_copy_of(
        &mut self,
        scene: &mut Scene,
        their: NodeId,
    ) -> Result<NodeId, GraphError> {
        if let Some(ObjectRef::Node(copy)) = self.copy_of(their.into()) {
            if scene.node(copy).is_some() {
                return Ok(copy);
            }
        }

        let parent = scene.require_node(their)?.parent;
        let duplicate = scene.duplicate_node(their)?;
        let active = self.originally_active(their).unwrap_or(true);
        scene.set_active(duplicate.node, active)?;
        scene.set_hidden(duplicate.node, false)?;

        let our_parent = parent
            .and_then(|p| self.counterpart_for(scene, p.into()))
            .and_then(|p| match p {
                ObjectRef::Node(n) => Some(n),
                ObjectRef::Component(_) => None,
            });
        scene.set_parent(duplicate.node, our_parent)?;

        self.set_as_copy(their.into(), duplicate.node.into());
        for &(source, copy) in &duplicate.components {
            self.set_as_copy(source.into(), copy.into());
        }

        self.rewrite_references(scene, duplicate.node.into());
        for &(_, copy) in &duplicate.components {
            self.rewrite_references(scene, copy.into());
        }

        debug!(
            their = %ObjectRef::from(their),
            copy = %ObjectRef::from(duplicate.node),
            parent = ?our_parent,
            "materialized copy"
        );
        Ok(duplicate.node)
    }

    /// Point every reference held by `object` at our counterpart of its
    /// referent, where one exists.
    pub fn rewrite_references(&self, scene: &mut Scene, object: ObjectRef) {
        let Some(fields) = scene.fields(object) else {
            return;
        };
        let mut fields = fields.to_vec();
        for field in &mut fields {
            field
                .value
                .map_references(&mut |r| Some(self.counterpart_for(scene, r).unwrap_or(r)));
        }
        if let Some(slot) = scene.fields_mut(object) {
            *slot = fields;
        }
    }

    // ----- Teardown -----

    /// Destroy every their root still alive (children go with their
    /// parents), then forget the their side. Returns the number of nodes
    /// destroyed.
    pub fn destroy_theirs(&mut self, scene: &mut Scene) -> usize {
        let roots: Vec<NodeId> = self
            .theirs
            .keys()
            .copied()
            .filter(|&n| scene.node(n).is_some_and(|node| node.parent.is_none()))
            .collect();
        let destroyed = roots.into_iter().map(|n| scene.destroy_node(n)).sum();
        self.theirs.clear();
        destroyed
    }

    pub fn clear(&mut self) {
        self.ours.clear();
        self.matched.clear();
        self.theirs.clear();
        self.copies.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.ours.is_empty()
            && self.matched.is_empty()
            && self.theirs.is_empty()
            && self.copies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Field, PersistedId, Value};

    fn persist(scene: &mut Scene, object: impl Into<ObjectRef>, file_id: u64) {
        scene
            .set_persisted(
                object.into(),
                PersistedId {
                    file_id,
                    prefab_id: 0,
                },
            )
            .unwrap();
    }

    /// Our `Root` (1) plus their `Root` (1) with a new child `Spawn` (7).
    fn two_sided() -> (Scene, ObjectRegistry, NodeId, NodeId, NodeId) {
        let mut scene = Scene::new();
        let our_root = scene.add_node("Root", None).unwrap();
        persist(&mut scene, our_root, 1);

        let their_root = scene.add_node("Root", None).unwrap();
        persist(&mut scene, their_root, 1);
        let spawn = scene.add_node("Spawn", Some(their_root)).unwrap();
        persist(&mut scene, spawn, 7);

        let mut registry = ObjectRegistry::new();
        registry.register_ours_node(&scene, our_root);
        registry.mark_theirs(&mut scene, their_root).unwrap();
        registry.mark_theirs(&mut scene, spawn).unwrap();
        (scene, registry, our_root, their_root, spawn)
    }

    #[test]
    fn test_counterparts() {
        let (scene, registry, our_root, their_root, spawn) = two_sided();
        assert_eq!(
            registry.counterpart_for(&scene, their_root.into()),
            Some(our_root.into())
        );
        assert_eq!(registry.counterpart_for(&scene, spawn.into()), None);
        assert_eq!(
            registry.counterpart_for(&scene, our_root.into()),
            Some(our_root.into())
        );
    }

    #[test]
    fn test_mark_theirs_hides_and_remembers_activation() {
        let (mut scene, mut registry, _, their_root, _) = two_sided();
        let node = scene.node(their_root).unwrap();
        assert!(!node.active && node.hidden);
        assert_eq!(registry.originally_active(their_root), Some(true));

        registry.mark_theirs(&mut scene, their_root).unwrap();
        assert_eq!(registry.originally_active(their_root), Some(true));
    }

    #[test]
    fn test_materialize_copy_reparents_to_our_side() {
        let (mut scene, mut registry, our_root, _, spawn) = two_sided();
        scene
            .push_field(spawn.into(), Field::new("m_Owner", Value::ObjectReference(None)))
            .unwrap();
        let light = scene.add_component(spawn, "Light").unwrap();

        let copy = registry.materialize_copy_of(&mut scene, spawn).unwrap();
        let node = scene.node(copy).unwrap();
        assert!(node.active && !node.hidden);
        assert_eq!(node.parent, Some(our_root));
        assert!(node.persisted.is_none());
        assert_eq!(registry.counterpart_for(&scene, spawn.into()), Some(copy.into()));

        let copied_light = scene.components_of(copy)[0];
        assert_eq!(
            registry.counterpart_for(&scene, light.into()),
            Some(copied_light.into())
        );

        let again = registry.materialize_copy_of(&mut scene, spawn).unwrap();
        assert_eq!(again, copy);
    }

    #[test]
    fn test_materialize_rewrites_references_to_ours() {
        let (mut scene, mut registry, our_root, their_root, spawn) = two_sided();
        scene
            .push_field(
                spawn.into(),
                Field::new("m_Anchor", Value::ObjectReference(Some(their_root.into()))),
            )
            .unwrap();
        let copy = registry.materialize_copy_of(&mut scene, spawn).unwrap();
        assert_eq!(
            scene.field_value(copy.into(), "m_Anchor"),
            Some(&Value::ObjectReference(Some(our_root.into())))
        );
    }

    #[test]
    fn test_destroy_theirs_and_clear() {
        let (mut scene, mut registry, our_root, their_root, spawn) = two_sided();
        assert_eq!(registry.destroy_theirs(&mut scene), 2);
        assert!(scene.node(their_root).is_none());
        assert!(scene.node(spawn).is_none());
        assert!(scene.node(our_root).is_some());
        assert_eq!(registry.theirs_len(), 0);

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_is_first_wins_and_unregister() {
        let mut scene = Scene::new();
        let a = scene.add_node("A", None).unwrap();
        let b = scene.add_node("B", None).unwrap();
        persist(&mut scene, a, 3);
        persist(&mut scene, b, 3);

        let mut registry = ObjectRegistry::new();
        registry.register_ours_node(&scene, a);
        registry.register_ours_node(&scene, b);
        registry.register_ours_node(&scene, NodeId(99));
        let id = identity(&scene, a.into());
        assert_eq!(registry.lookup_ours(id), Some(a.into()));

        registry.unregister_ours(a.into());
        registry.unregister_ours(a.into());
        assert_eq!(registry.lookup_ours(id), None);
    }

    #[test]
    fn test_register_ours_component() {
        let mut scene = Scene::new();
        let node = scene.add_node("Lamp", None).unwrap();
        let light = scene.add_component(node, "Light").unwrap();
        persist(&mut scene, light, 5);
        let loose = scene.add_component(node, "Script").unwrap();

        let mut registry = ObjectRegistry::new();
        registry.register_ours_component(&scene, light);
        registry.register_ours_component(&scene, light);
        registry.register_ours_component(&scene, loose);
        registry.register_ours_component(&scene, ComponentId(99));

        assert_eq!(registry.ours_len(), 1);
        assert_eq!(
            registry.lookup_ours(identity(&scene, light.into())),
            Some(light.into())
        );
        assert_eq!(registry.lookup_ours(StableId::LOOSE), None);
    }

    #[test]
    fn test_loose_objects_resolve_only_through_matches() {
        let mut scene = Scene::new();
        let our_x = scene.add_node("X", None).unwrap();
        let their_x = scene.add_node("X", None).unwrap();
        let their_n = scene.add_node("N", None).unwrap();

        let mut registry = ObjectRegistry::new();
        registry.register_ours_node(&scene, our_x);
        registry.mark_theirs(&mut scene, their_x).unwrap();
        registry.mark_theirs(&mut scene, their_n).unwrap();
        assert_eq!(registry.counterpart_for(&scene, their_x.into()), None);
        assert_eq!(registry.counterpart_for(&scene, their_n.into()), None);

        registry.record_match(their_x.into(), our_x.into());
        assert_eq!(
            registry.counterpart_for(&scene, their_x.into()),
            Some(our_x.into())
        );
        assert_eq!(registry.counterpart_for(&scene, their_n.into()), None);

        registry.clear();
        assert!(registry.is_empty());
    }
}
