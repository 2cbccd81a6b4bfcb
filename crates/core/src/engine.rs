//! The merge engine: the session-scoped context that owns the live scene,
//! the object registry, and every action, and applies resolutions.
//!
//! Resolution never fails loudly. An effect that errors leaves its action in
//! the state it had before the call and is reported through
//! [`ResolveOutcome`]; the rest of the session carries on.

use std::collections::HashMap;

use tracing::{debug, info, instrument, warn};

use crate::action::{
    ActionId, ActionKind, Confirmation, MergeAction, NodeMergeActions, Prompt, Resolution,
    ResolveOutcome, Side,
};
use crate::diff::{GraphDiffer, MergeMode};
use crate::errors::{ActionError, GraphError};
use crate::graph::{write_field, ComponentId, NodeId, ObjectRef, Scene, Value};
use crate::registry::ObjectRegistry;

/// What an effect did.
enum Applied {
    Done,
    NeedsConfirmation(Prompt),
}

/// Counts reported when a merge is finalized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cleanup {
    pub discarded: usize,
    pub theirs_destroyed: usize,
    pub copies_destroyed: usize,
}

#[derive(Clone)]
pub struct MergeEngine {
    scene: Scene,
    registry: ObjectRegistry,
    actions: Vec<MergeAction>,
    groups: Vec<NodeMergeActions>,
    mode: MergeMode,
    /// False while actions are resolved by policy rather than by a user.
    interactive: bool,
    our_nodes: Vec<NodeId>,
    their_nodes: Vec<NodeId>,
}

impl MergeEngine {
    /// Start from our scene. Every node and component in it is registered
    /// as ours.
    pub fn new(ours: Scene, mode: MergeMode) -> Self {
        let mut registry = ObjectRegistry::new();
        registry.clear();
        let our_nodes: Vec<NodeId> = ours.node_ids().collect();
        for &node in &our_nodes {
            registry.register_ours_node(&ours, node);
        }
        debug!(nodes = our_nodes.len(), registered = registry.ours_len(), "registered our objects");
        Self {
            scene: ours,
            registry,
            actions: Vec::new(),
            groups: Vec::new(),
            mode,
            interactive: false,
            our_nodes,
            their_nodes: Vec::new(),
        }
    }

    /// Move their scene into the live scene and mark all of it theirs.
    pub fn absorb_theirs(&mut self, theirs: Scene) -> Result<(), GraphError> {
        let absorbed = self.scene.absorb(theirs);
        for &node in &absorbed {
            self.registry.mark_theirs(&mut self.scene, node)?;
        }
        debug!(nodes = absorbed.len(), "absorbed their objects");
        self.their_nodes.extend(absorbed);
        Ok(())
    }

    /// Diff both sides and build the action set. With `automerge`,
    /// existence actions are resolved to their default side right away and
    /// flagged automatic. Returns the number of actions.
    #[instrument(skip(self), fields(mode = %self.mode))]
    pub fn detect(&mut self, automerge: bool) -> usize {
        let output = GraphDiffer::new(&self.scene, self.mode).diff(&self.our_nodes, &self.their_nodes);
        for &(theirs, ours) in &output.matches {
            self.registry.record_match(theirs, ours);
        }
        self.actions = output.actions;
        self.groups = output.groups;

        for action in &self.actions {
            if let Some(object) = action.kind.governed_object() {
                self.scene.set_governor(object, Some(action.id));
            }
        }

        if automerge {
            self.interactive = false;
            let defaults: Vec<(ActionId, Side)> = self
                .actions
                .iter()
                .filter_map(|a| a.kind.automerge_side().map(|s| (a.id, s)))
                .collect();
            for (id, side) in defaults {
                if self.actions[id.0].merged() {
                    continue;
                }
                self.resolve(id, side, Confirmation::Denied);
            }
        }
        self.interactive = true;

        info!(
            actions = self.actions.len(),
            unresolved = self.unresolved_count(),
            "merge actions ready"
        );
        self.actions.len()
    }

    // ----- Accessors -----

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    pub fn actions(&self) -> &[MergeAction] {
        &self.actions
    }

    pub fn action(&self, id: ActionId) -> Option<&MergeAction> {
        self.actions.get(id.0)
    }

    pub fn groups(&self) -> &[NodeMergeActions] {
        &self.groups
    }

    pub fn mode(&self) -> MergeMode {
        self.mode
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// Resolutions made while not interactive are flagged automatic.
    pub fn set_interactive(&mut self, interactive: bool) {
        self.interactive = interactive;
    }

    pub fn unresolved_count(&self) -> usize {
        self.actions.iter().filter(|a| !a.merged()).count()
    }

    /// Whether every action has been resolved.
    pub fn is_complete(&self) -> bool {
        self.actions.iter().all(MergeAction::merged)
    }

    // ----- Resolution -----

    pub fn resolve_ours(&mut self, id: ActionId) -> ResolveOutcome {
        self.resolve(id, Side::Ours, Confirmation::Ask)
    }

    pub fn resolve_theirs(&mut self, id: ActionId) -> ResolveOutcome {
        self.resolve(id, Side::Theirs, Confirmation::Ask)
    }

    /// Apply one side of an action.
    ///
    /// `confirmation` answers the question a resolution may raise (currently
    /// only "materialize a missing parent?"). With [`Confirmation::Ask`] the
    /// question is returned as [`ResolveOutcome::NeedsConfirmation`] and
    /// nothing changes.
    pub fn resolve(&mut self, id: ActionId, side: Side, confirmation: Confirmation) -> ResolveOutcome {
        if id.0 >= self.actions.len() {
            return ResolveOutcome::Failed(ActionError::UnknownAction(id.0));
        }
        match self.apply(id, side, confirmation) {
            Ok(Applied::Done) => {
                let resolution = Resolution::from(side);
                self.finish(id, resolution);
                ResolveOutcome::Resolved(resolution)
            }
            Ok(Applied::NeedsConfirmation(prompt)) => {
                debug!(id = %id, "resolution needs confirmation");
                ResolveOutcome::NeedsConfirmation(prompt)
            }
            Err(e @ ActionError::UserAbort(_)) => {
                info!(id = %id, %side, "resolution declined");
                ResolveOutcome::Declined(e)
            }
            Err(e) => {
                warn!(id = %id, %side, error = %e, "failed to apply merge action");
                ResolveOutcome::Failed(e)
            }
        }
    }

    /// Write a user-supplied value. Only field changes accept one.
    pub fn resolve_new(&mut self, id: ActionId, value: Value) -> ResolveOutcome {
        let Some(action) = self.actions.get(id.0) else {
            return ResolveOutcome::Failed(ActionError::UnknownAction(id.0));
        };
        let ActionKind::ChangeValue { location, .. } = &action.kind else {
            return ResolveOutcome::Failed(ActionError::NotApplicable {
                id: id.0,
                operation: "resolve_new",
            });
        };
        let location = location.clone();
        match write_field(&mut self.scene, &location, value) {
            Ok(()) => {
                self.finish(id, Resolution::UsingNew);
                ResolveOutcome::Resolved(Resolution::UsingNew)
            }
            Err(e) => {
                let e = ActionError::from(e);
                warn!(id = %id, error = %e, "failed to apply new value");
                ResolveOutcome::Failed(e)
            }
        }
    }

    /// Resolve every action of one group.
    pub fn resolve_group(
        &mut self,
        group: usize,
        side: Side,
        confirmation: Confirmation,
    ) -> Vec<(ActionId, ResolveOutcome)> {
        let ids = self
            .groups
            .get(group)
            .map(|g| g.actions.clone())
            .unwrap_or_default();
        ids.into_iter()
            .map(|id| (id, self.resolve(id, side, confirmation)))
            .collect()
    }

    /// Resolve every action still unresolved.
    pub fn resolve_remaining(
        &mut self,
        side: Side,
        confirmation: Confirmation,
    ) -> Vec<(ActionId, ResolveOutcome)> {
        let ids: Vec<ActionId> = self
            .actions
            .iter()
            .filter(|a| !a.merged())
            .map(|a| a.id)
            .collect();
        ids.into_iter()
            .map(|id| (id, self.resolve(id, side, confirmation)))
            .collect()
    }

    fn finish(&mut self, id: ActionId, resolution: Resolution) {
        let automatic = !self.interactive;
        let action = &mut self.actions[id.0];
        action.mark(resolution, automatic);
        info!(
            id = %id,
            label = %action.label(),
            %resolution,
            automatic,
            "merge action resolved"
        );
    }

    // ----- Effects -----

    fn apply(&mut self, id: ActionId, side: Side, confirmation: Confirmation) -> Result<Applied, ActionError> {
        let kind = self.actions[id.0].kind.clone();
        match (kind, side) {
            (ActionKind::AddNode { copy, .. }, Side::Ours) => {
                if let Some(copy) = copy.filter(|&c| self.scene.node(c).is_some()) {
                    self.scene.set_active(copy, false)?;
                    self.scene.set_hidden(copy, true)?;
                }
            }
            (ActionKind::AddNode { their_node, copy }, Side::Theirs) => {
                let copy = match copy.filter(|&c| self.scene.node(c).is_some()) {
                    Some(copy) => {
                        let active = self.registry.originally_active(their_node).unwrap_or(true);
                        self.scene.set_active(copy, active)?;
                        self.scene.set_hidden(copy, false)?;
                        copy
                    }
                    None => self.materialize(their_node)?,
                };
                if let ActionKind::AddNode { copy: slot, .. } = &mut self.actions[id.0].kind {
                    *slot = Some(copy);
                }
            }

            (ActionKind::RemoveNode { our_node, was_active }, Side::Ours) => {
                self.scene.set_active(our_node, was_active)?;
                self.scene.set_hidden(our_node, false)?;
            }
            (ActionKind::RemoveNode { our_node, .. }, Side::Theirs) => {
                self.scene.set_active(our_node, false)?;
            }

            (ActionKind::AddComponent { copy, .. }, Side::Ours) => {
                if let Some(copy) = copy {
                    self.scene.detach_component(copy)?;
                }
            }
            (
                ActionKind::AddComponent {
                    our_node,
                    their_component,
                    copy,
                },
                Side::Theirs,
            ) => {
                let copy = self.attach_copy(our_node, their_component, copy)?;
                if let ActionKind::AddComponent { copy: slot, .. } = &mut self.actions[id.0].kind {
                    *slot = Some(copy);
                }
            }

            (ActionKind::RemoveComponent { our_component }, Side::Ours) => {
                self.scene.reattach_component(our_component)?;
            }
            (ActionKind::RemoveComponent { our_component }, Side::Theirs) => {
                self.scene.detach_component(our_component)?;
            }

            (
                ActionKind::ReplaceComponent {
                    our_component,
                    copy,
                    ..
                },
                Side::Ours,
            ) => {
                self.scene.reattach_component(our_component)?;
                if let Some(copy) = copy {
                    self.scene.detach_component(copy)?;
                }
            }
            (
                ActionKind::ReplaceComponent {
                    our_component,
                    their_component,
                    copy,
                },
                Side::Theirs,
            ) => {
                let owner = self
                    .scene
                    .owner_of(our_component.into())
                    .ok_or(GraphError::MissingObject(our_component.into()))?;
                let copy = self.attach_copy(owner, their_component, copy)?;
                self.scene.detach_component(our_component)?;
                if let ActionKind::ReplaceComponent { copy: slot, .. } = &mut self.actions[id.0].kind {
                    *slot = Some(copy);
                }
            }

            (
                ActionKind::ChangeValue {
                    location,
                    ours_initial,
                    ..
                },
                Side::Ours,
            ) => {
                write_field(&mut self.scene, &location, ours_initial)?;
            }
            (
                ActionKind::ChangeValue {
                    location,
                    theirs_initial,
                    ..
                },
                Side::Theirs,
            ) => {
                let value = self.remap_value(theirs_initial)?;
                write_field(&mut self.scene, &location, value)?;
            }

            (ActionKind::Parenting { node, our_parent, .. }, Side::Ours) => {
                self.scene.set_parent(node, our_parent)?;
            }
            (
                ActionKind::Parenting {
                    node,
                    their_parent: None,
                    ..
                },
                Side::Theirs,
            ) => {
                self.scene.set_parent(node, None)?;
            }
            (
                ActionKind::Parenting {
                    node,
                    their_parent: Some(their_parent),
                    ..
                },
                Side::Theirs,
            ) => {
                let parent = match self.live_node_counterpart(their_parent) {
                    Some(parent) => parent,
                    None => match confirmation {
                        Confirmation::Ask => {
                            return Ok(Applied::NeedsConfirmation(Prompt {
                                action: id,
                                title: "The chosen parent currently does not exist.".into(),
                                message: format!(
                                    "Do you want to add '{}'?",
                                    self.scene.path(their_parent)
                                ),
                            }));
                        }
                        Confirmation::Denied => {
                            return Err(ActionError::UserAbort(format!(
                                "parent '{}' was not added",
                                self.scene.path(their_parent)
                            )));
                        }
                        Confirmation::Granted => {
                            self.ensure_existence(their_parent.into())?;
                            match self.live_node_counterpart(their_parent) {
                                Some(parent) => parent,
                                None => self.materialize(their_parent)?,
                            }
                        }
                    },
                };
                self.scene.set_parent(node, Some(parent))?;
            }
        }
        Ok(Applied::Done)
    }

    // ----- Existence -----

    /// Our counterpart of a their node, if it exists and is not hidden.
    fn live_node_counterpart(&self, their: NodeId) -> Option<NodeId> {
        match self.registry.counterpart_for(&self.scene, their.into())? {
            ObjectRef::Node(n) if self.scene.node(n).is_some_and(|node| !node.hidden) => Some(n),
            _ => None,
        }
    }

    /// Our counterpart of any object, if it and its owner are live and
    /// visible.
    fn live_counterpart(&self, object: ObjectRef) -> Option<ObjectRef> {
        let counterpart = self.registry.counterpart_for(&self.scene, object)?;
        let owner = self.scene.owner_of(counterpart)?;
        let visible = self.scene.node(owner).is_some_and(|n| !n.hidden);
        (visible && self.scene.contains(counterpart)).then_some(counterpart)
    }

    /// Make sure `object` (or its owning node) exists on our side, by
    /// resolving the action that governs it toward existence, or by
    /// materializing it when nothing governs it.
    fn ensure_existence(&mut self, object: ObjectRef) -> Result<(), ActionError> {
        let owner = self.scene.owner_of(object);
        let governor = self
            .scene
            .governor(object)
            .or_else(|| owner.and_then(|n| self.scene.governor(n.into())));

        if let Some(governor) = governor {
            let Some(side) = self.actions.get(governor.0).and_then(|a| a.kind.existence_side()) else {
                return Ok(());
            };
            debug!(governor = %governor, %side, object = %object, "ensuring existence");
            match self.apply(governor, side, Confirmation::Granted)? {
                Applied::Done => self.finish(governor, side.into()),
                Applied::NeedsConfirmation(prompt) => {
                    return Err(ActionError::UserAbort(prompt.to_string()));
                }
            }
            return Ok(());
        }

        if let Some(owner) = owner.filter(|&n| self.registry.is_theirs(&self.scene, n.into())) {
            self.materialize(owner)?;
        }
        Ok(())
    }

    /// Materialize a copy of their node, first making sure its parent exists
    /// on our side so the copy lands in the right place.
    fn materialize(&mut self, their: NodeId) -> Result<NodeId, ActionError> {
        let parent = self.scene.require_node(their)?.parent;
        if let Some(parent) = parent {
            if self.registry.is_theirs(&self.scene, parent.into())
                && self.live_node_counterpart(parent).is_none()
            {
                self.ensure_existence(parent.into())?;
            }
        }
        Ok(self.registry.materialize_copy_of(&mut self.scene, their)?)
    }

    /// Attach a copy of their component to `target`, or re-attach the
    /// existing copy.
    fn attach_copy(
        &mut self,
        target: NodeId,
        their_component: ComponentId,
        existing: Option<ComponentId>,
    ) -> Result<ComponentId, ActionError> {
        if let Some(copy) = existing {
            if self.scene.reattach_component(copy).is_ok() {
                return Ok(copy);
            }
        }
        let copy = self.scene.copy_component_onto(target, their_component)?;
        self.registry
            .set_as_copy(their_component.into(), copy.into());
        self.registry.rewrite_references(&mut self.scene, copy.into());
        Ok(copy)
    }

    /// Rewrite every reference in `value` to our side, materializing
    /// referents that do not exist yet.
    fn remap_value(&mut self, mut value: Value) -> Result<Value, ActionError> {
        if !value.holds_references() {
            return Ok(value);
        }
        let mut referents = Vec::new();
        value.map_references(&mut |r| {
            referents.push(r);
            Some(r)
        });

        let mut mapping: HashMap<ObjectRef, Option<ObjectRef>> = HashMap::new();
        for r in referents {
            if mapping.contains_key(&r) {
                continue;
            }
            let mapped = self.remap_reference(r)?;
            mapping.insert(r, mapped);
        }
        value.map_references(&mut |r| mapping.get(&r).copied().flatten());
        Ok(value)
    }

    fn remap_reference(&mut self, r: ObjectRef) -> Result<Option<ObjectRef>, ActionError> {
        if !self.registry.is_theirs(&self.scene, r) {
            return Ok(Some(r));
        }
        if let Some(mapped) = self.live_counterpart(r) {
            return Ok(Some(mapped));
        }
        self.ensure_existence(r)?;
        if let Some(mapped) = self.live_counterpart(r) {
            return Ok(Some(mapped));
        }
        if let Some(owner) = self.scene.owner_of(r) {
            self.materialize(owner)?;
        }
        Ok(self.registry.counterpart_for(&self.scene, r))
    }

    // ----- Teardown -----

    /// Finalize a completed merge: destroy what the resolutions discarded
    /// and everything still on their side, and clear the registry. The
    /// scene is left holding the merged result.
    pub fn finalize(&mut self) -> Cleanup {
        let mut cleanup = Cleanup::default();
        let discarded: Vec<ObjectRef> = self.actions.iter().filter_map(MergeAction::discarded).collect();
        for object in discarded {
            let destroyed = match object {
                ObjectRef::Node(n) => self.scene.destroy_node(n) > 0,
                ObjectRef::Component(c) => self.scene.destroy_component(c),
            };
            if destroyed {
                cleanup.discarded += 1;
            }
        }
        cleanup.theirs_destroyed = self.registry.destroy_theirs(&mut self.scene);
        self.teardown();
        info!(
            discarded = cleanup.discarded,
            theirs = cleanup.theirs_destroyed,
            "merge finalized"
        );
        cleanup
    }

    /// Undo the merge: apply ours everywhere, then destroy every copy and
    /// everything on their side. The scene is left as it was before the
    /// merge started.
    pub fn abort(&mut self) -> Cleanup {
        self.interactive = false;
        for index in 0..self.actions.len() {
            let id = ActionId(index);
            match self.apply(id, Side::Ours, Confirmation::Denied) {
                Ok(_) => self.actions[index].mark(Resolution::UsingOurs, true),
                Err(e) => warn!(id = %id, error = %e, "failed to restore our side during abort"),
            }
        }

        let mut cleanup = Cleanup::default();
        let copies: Vec<ObjectRef> = self.registry.copies().collect();
        for copy in copies {
            let destroyed = match copy {
                ObjectRef::Node(n) => self.scene.destroy_node(n) > 0,
                ObjectRef::Component(c) => self.scene.destroy_component(c),
            };
            if destroyed {
                cleanup.copies_destroyed += 1;
            }
        }
        cleanup.theirs_destroyed = self.registry.destroy_theirs(&mut self.scene);
        self.teardown();
        info!(
            copies = cleanup.copies_destroyed,
            theirs = cleanup.theirs_destroyed,
            "merge aborted"
        );
        cleanup
    }

    fn teardown(&mut self) {
        self.scene.clear_governors();
        self.registry.clear();
        self.actions.clear();
        self.groups.clear();
        self.our_nodes.clear();
        self.their_nodes.clear();
        self.interactive = false;
    }

    /// Give up the engine and keep the scene.
    pub fn into_scene(self) -> Scene {
        self.scene
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Field, FieldKind, PersistedId};

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

    fn engine(ours: Scene, theirs: Scene, automerge: bool) -> MergeEngine {
        let mut engine = MergeEngine::new(ours, MergeMode::Scene);
        engine.absorb_theirs(theirs).unwrap();
        engine.detect(automerge);
        engine
    }

    fn find(engine: &MergeEngine, kind: &str) -> ActionId {
        engine
            .actions()
            .iter()
            .find(|a| a.kind.name() == kind)
            .map(|a| a.id)
            .unwrap()
    }

    #[test]
    fn test_change_value_round_trip() {
        let build = |speed: f32| {
            let mut scene = Scene::new();
            let n = scene.add_node("Player", None).unwrap();
            persist(&mut scene, n, 1);
            let c = scene.add_component(n, "Mover").unwrap();
            persist(&mut scene, c, 2);
            scene
                .push_field(c.into(), Field::new("m_Speed", Value::Float(speed)))
                .unwrap();
            (scene, c)
        };
        let (ours, our_mover) = build(5.0);
        let (theirs, _) = build(9.0);
        let mut engine = engine(ours, theirs, true);

        assert_eq!(engine.actions().len(), 1);
        let id = ActionId(0);
        assert!(engine.resolve_theirs(id).is_resolved());
        assert_eq!(
            engine.scene().field_value(our_mover.into(), "m_Speed"),
            Some(&Value::Float(9.0))
        );
        assert_eq!(engine.action(id).unwrap().resolution(), Resolution::UsingTheirs);
        assert!(!engine.action(id).unwrap().automatic());

        assert!(engine.resolve_new(id, Value::Float(7.0)).is_resolved());
        assert_eq!(
            engine.scene().field_value(our_mover.into(), "m_Speed"),
            Some(&Value::Float(7.0))
        );

        engine.resolve_ours(id);
        engine.resolve_ours(id);
        assert_eq!(
            engine.scene().field_value(our_mover.into(), "m_Speed"),
            Some(&Value::Float(5.0))
        );
        assert_eq!(engine.action(id).unwrap().resolution(), Resolution::UsingOurs);
        assert!(engine.is_complete());
    }

    #[test]
    fn test_resolve_new_rejected_for_existence() {
        let ours = Scene::new();
        let mut theirs = Scene::new();
        let n = theirs.add_node("Spawn", None).unwrap();
        persist(&mut theirs, n, 7);
        let mut engine = engine(ours, theirs, false);

        let outcome = engine.resolve_new(ActionId(0), Value::Integer(1));
        assert!(matches!(
            outcome,
            ResolveOutcome::Failed(ActionError::NotApplicable { .. })
        ));
        assert!(matches!(
            engine.resolve_ours(ActionId(9)),
            ResolveOutcome::Failed(ActionError::UnknownAction(9))
        ));
    }

    #[test]
    fn test_automerge_flags_existence_actions() {
        let mut ours = Scene::new();
        let gone = ours.add_node("Gone", None).unwrap();
        persist(&mut ours, gone, 3);
        let mut theirs = Scene::new();
        let added = theirs.add_node("Added", None).unwrap();
        persist(&mut theirs, added, 4);

        let engine = engine(ours, theirs, true);
        assert!(engine.is_complete());
        let add = engine.action(find(&engine, "add node")).unwrap();
        assert_eq!(add.resolution(), Resolution::UsingTheirs);
        assert!(add.automatic());
        let remove = engine.action(find(&engine, "remove node")).unwrap();
        assert_eq!(remove.resolution(), Resolution::UsingOurs);
        assert!(engine.scene().node(gone).unwrap().active);
    }

    #[test]
    fn test_add_component_copy_and_detach() {
        let build = |with_light: bool| {
            let mut scene = Scene::new();
            let n = scene.add_node("Lamp", None).unwrap();
            persist(&mut scene, n, 1);
            if with_light {
                let c = scene.add_component(n, "Light").unwrap();
                persist(&mut scene, c, 2);
                scene
                    .push_field(c.into(), Field::new("m_Intensity", Value::Float(3.0)))
                    .unwrap();
            }
            (scene, n)
        };
        let (ours, lamp) = build(false);
        let (theirs, _) = build(true);
        let mut engine = engine(ours, theirs, false);
        let id = find(&engine, "add component");

        assert!(engine.resolve_theirs(id).is_resolved());
        let attached = engine.scene().components_of(lamp).to_vec();
        assert_eq!(attached.len(), 1);
        assert_eq!(
            engine.scene().field_value(attached[0].into(), "m_Intensity"),
            Some(&Value::Float(3.0))
        );

        assert!(engine.resolve_ours(id).is_resolved());
        assert!(engine.scene().components_of(lamp).is_empty());

        assert!(engine.resolve_theirs(id).is_resolved());
        assert_eq!(engine.scene().components_of(lamp), attached.as_slice());
    }

    #[test]
    fn test_reference_to_new_node_materializes_it() {
        let mut ours = Scene::new();
        let holder = ours.add_node("Holder", None).unwrap();
        persist(&mut ours, holder, 1);
        ours.push_field(holder.into(), Field::new("m_Target", Value::ObjectReference(None)))
            .unwrap();

        let mut theirs = Scene::new();
        let their_holder = theirs.add_node("Holder", None).unwrap();
        persist(&mut theirs, their_holder, 1);
        let target = theirs.add_node("Target", None).unwrap();
        persist(&mut theirs, target, 2);
        theirs
            .push_field(
                their_holder.into(),
                Field::new("m_Target", Value::ObjectReference(Some(target.into()))),
            )
            .unwrap();

        let mut engine = engine(ours, theirs, false);
        let change = find(&engine, "change value");
        let add = find(&engine, "add node");
        assert!(engine.resolve_theirs(change).is_resolved());

        let ActionKind::AddNode { copy: Some(copy), .. } = engine.action(add).unwrap().kind else {
            panic!("add node was not forced");
        };
        assert_eq!(engine.action(add).unwrap().resolution(), Resolution::UsingTheirs);
        assert_eq!(
            engine.scene().field_value(holder.into(), "m_Target"),
            Some(&Value::ObjectReference(Some(copy.into())))
        );
    }

    #[test]
    fn test_reference_to_loose_node_is_not_captured_by_unrelated_loose_node() {
        let mut ours = Scene::new();
        let holder = ours.add_node("Holder", None).unwrap();
        persist(&mut ours, holder, 1);
        ours.push_field(holder.into(), Field::new("m_Target", Value::ObjectReference(None)))
            .unwrap();
        let our_x = ours.add_node("X", None).unwrap();

        let mut theirs = Scene::new();
        let their_holder = theirs.add_node("Holder", None).unwrap();
        persist(&mut theirs, their_holder, 1);
        theirs.add_node("X", None).unwrap();
        let target = theirs.add_node("N", None).unwrap();
        theirs
            .push_field(
                their_holder.into(),
                Field::new("m_Target", Value::ObjectReference(Some(target.into()))),
            )
            .unwrap();

        let mut engine = engine(ours, theirs, false);
        let change = find(&engine, "change value");
        let add = find(&engine, "add node");
        assert!(engine
            .resolve(change, Side::Theirs, Confirmation::Granted)
            .is_resolved());

        let ActionKind::AddNode { copy: Some(copy), .. } = engine.action(add).unwrap().kind else {
            panic!("the referenced node was not materialized");
        };
        assert_ne!(copy, our_x);
        assert_eq!(engine.action(add).unwrap().resolution(), Resolution::UsingTheirs);
        assert_eq!(
            engine.scene().field_value(holder.into(), "m_Target"),
            Some(&Value::ObjectReference(Some(copy.into())))
        );
    }

    #[test]
    fn test_loose_parent_is_materialized_not_aliased() {
        let mut ours = Scene::new();
        let our_x = ours.add_node("X", None).unwrap();
        let q = ours.add_node("Q", None).unwrap();
        persist(&mut ours, q, 2);

        let mut theirs = Scene::new();
        theirs.add_node("X", None).unwrap();
        let p = theirs.add_node("P", None).unwrap();
        let their_q = theirs.add_node("Q", Some(p)).unwrap();
        persist(&mut theirs, their_q, 2);

        let mut engine = engine(ours, theirs, false);
        let parenting = find(&engine, "parenting");
        let add = find(&engine, "add node");
        assert!(matches!(
            engine.resolve(parenting, Side::Theirs, Confirmation::Ask),
            ResolveOutcome::NeedsConfirmation(_)
        ));
        assert_eq!(engine.scene().node(q).unwrap().parent, None);

        assert!(engine
            .resolve(parenting, Side::Theirs, Confirmation::Granted)
            .is_resolved());
        let ActionKind::AddNode { copy: Some(copy), .. } = engine.action(add).unwrap().kind else {
            panic!("the parent was not materialized");
        };
        assert_ne!(copy, our_x);
        assert_eq!(engine.scene().node(q).unwrap().parent, Some(copy));
    }

    #[test]
    fn test_array_of_references_is_remapped() {
        let build = |refs: bool| {
            let mut scene = Scene::new();
            let a = scene.add_node("A", None).unwrap();
            persist(&mut scene, a, 1);
            let b = scene.add_node("B", None).unwrap();
            persist(&mut scene, b, 2);
            let items = if refs {
                vec![Value::ObjectReference(Some(b.into()))]
            } else {
                vec![]
            };
            scene
                .push_field(
                    a.into(),
                    Field::new("m_Links", Value::array(FieldKind::ObjectReference, items)),
                )
                .unwrap();
            (scene, a, b)
        };
        let (ours, our_a, our_b) = build(false);
        let (theirs, _, _) = build(true);
        let mut engine = engine(ours, theirs, false);

        assert!(engine.resolve_theirs(ActionId(0)).is_resolved());
        assert_eq!(
            engine.scene().field_value(our_a.into(), "m_Links"),
            Some(&Value::array(
                FieldKind::ObjectReference,
                vec![Value::ObjectReference(Some(our_b.into()))]
            ))
        );
    }

    #[test]
    fn test_finalize_destroys_discarded_and_theirs() {
        let mut ours = Scene::new();
        let gone = ours.add_node("Gone", None).unwrap();
        persist(&mut ours, gone, 3);
        let mut theirs = Scene::new();
        let added = theirs.add_node("Added", None).unwrap();
        persist(&mut theirs, added, 4);

        let mut engine = engine(ours, theirs, true);
        let remove = find(&engine, "remove node");
        engine.resolve_theirs(remove);
        let add = find(&engine, "add node");
        engine.resolve_ours(add);

        let cleanup = engine.finalize();
        assert_eq!(cleanup.discarded, 2);
        assert_eq!(cleanup.theirs_destroyed, 1);
        assert_eq!(engine.scene().node_count(), 0);
        assert!(engine.registry().is_empty());
        assert!(engine.actions().is_empty());
    }
}
