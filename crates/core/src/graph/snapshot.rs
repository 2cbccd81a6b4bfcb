//! Scene snapshot persistence.
//!
//! The merge engine never parses scene files itself; it asks a
//! [`SceneStore`] for a fully materialized [`Scene`]. The bundled
//! [`JsonSceneStore`] reads and writes a JSON snapshot in which nodes and
//! components refer to each other by position:
//!
//! ```json
//! {
//!   "nodes": [
//!     { "name": "Root", "persisted": { "file_id": 1 } },
//!     { "name": "Enemy", "persisted": { "file_id": 2 }, "parent": 0 }
//!   ],
//!   "components": [
//!     { "type_name": "Rigidbody", "owner": 1, "persisted": { "file_id": 3 },
//!       "fields": [ { "name": "m_Mass", "kind": "float", "value": { "float": 2.5 } } ] }
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::scene::{ComponentId, NodeId, ObjectRef, PersistedId, Scene};
use super::value::Field;
use crate::errors::GraphError;

/// Loads and saves scenes. Implemented by whatever owns the file format.
pub trait SceneStore {
    fn load(&self, path: &Path) -> Result<Scene, GraphError>;

    fn save(&self, scene: &Scene, path: &Path) -> Result<(), GraphError>;
}

// ---------------------------------------------------------------------------
// On-disk records
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn is_true(v: &bool) -> bool {
    *v
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persisted: Option<PersistedId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<usize>,
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub type_name: String,
    pub owner: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persisted: Option<PersistedId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<Field>,
}

/// Serialized form of a whole scene.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneSnapshot {
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub components: Vec<ComponentRecord>,
}

impl SceneSnapshot {
    /// Build a live scene. Handles equal snapshot positions.
    pub fn into_scene(self) -> Result<Scene, GraphError> {
        let node_count = self.nodes.len();
        let component_count = self.components.len();

        let check = |r: ObjectRef| -> Result<(), GraphError> {
            match r {
                ObjectRef::Node(id) if id.index() >= node_count => Err(GraphError::DanglingIndex {
                    entity: "node",
                    index: id.index(),
                }),
                ObjectRef::Component(id) if id.index() >= component_count => {
                    Err(GraphError::DanglingIndex {
                        entity: "component",
                        index: id.index(),
                    })
                }
                _ => Ok(()),
            }
        };
        let check_fields = |fields: &mut Vec<Field>| -> Result<(), GraphError> {
            let mut failure = None;
            for field in fields.iter_mut() {
                field.value.map_references(&mut |r| {
                    if let Err(e) = check(r) {
                        failure.get_or_insert(e);
                    }
                    Some(r)
                });
            }
            failure.map_or(Ok(()), Err)
        };

        let mut scene = Scene::new();
        let mut parents = Vec::with_capacity(node_count);
        for mut record in self.nodes {
            check_fields(&mut record.fields)?;
            if let Some(p) = record.parent {
                if p >= node_count {
                    return Err(GraphError::DanglingIndex {
                        entity: "node",
                        index: p,
                    });
                }
            }
            let id = scene.add_node(record.name, None)?;
            let node = scene.require_node_mut(id)?;
            node.persisted = record.persisted;
            node.active = record.active;
            node.fields = record.fields;
            parents.push((id, record.parent));
        }
        for (id, parent) in parents {
            scene.set_parent(id, parent.map(|p| NodeId(p as u32)))?;
        }

        for mut record in self.components {
            check_fields(&mut record.fields)?;
            if record.owner >= node_count {
                return Err(GraphError::DanglingIndex {
                    entity: "node",
                    index: record.owner,
                });
            }
            let id = scene.add_component(NodeId(record.owner as u32), record.type_name)?;
            let component = scene.require_component_mut(id)?;
            component.persisted = record.persisted;
            component.fields = record.fields;
        }
        Ok(scene)
    }

    /// Capture the saveable part of `scene`: live, visible nodes whose
    /// ancestors are all visible, and their attached components.
    /// References to anything left out become null.
    pub fn from_scene(scene: &Scene) -> Self {
        let mut node_index: HashMap<NodeId, usize> = HashMap::new();
        let mut kept_nodes = Vec::new();
        for id in scene.node_ids() {
            if is_saveable(scene, id) {
                node_index.insert(id, kept_nodes.len());
                kept_nodes.push(id);
            }
        }

        let mut component_index: HashMap<ComponentId, usize> = HashMap::new();
        let mut kept_components = Vec::new();
        for &node in &kept_nodes {
            for &c in scene.components_of(node) {
                component_index.insert(c, kept_components.len());
                kept_components.push(c);
            }
        }

        let mut remap = |r: ObjectRef| -> Option<ObjectRef> {
            match r {
                ObjectRef::Node(id) => node_index
                    .get(&id)
                    .map(|&i| ObjectRef::Node(NodeId(i as u32))),
                ObjectRef::Component(id) => component_index
                    .get(&id)
                    .map(|&i| ObjectRef::Component(ComponentId(i as u32))),
            }
        };
        let mut compact = |fields: &[Field]| -> Vec<Field> {
            let mut fields = fields.to_vec();
            for field in &mut fields {
                field.value.map_references(&mut remap);
            }
            fields
        };

        let mut nodes = Vec::with_capacity(kept_nodes.len());
        for &id in &kept_nodes {
            let Some(node) = scene.node(id) else { continue };
            nodes.push(NodeRecord {
                name: node.name.clone(),
                persisted: node.persisted,
                parent: node.parent.and_then(|p| node_index.get(&p).copied()),
                active: node.active,
                fields: compact(&node.fields),
            });
        }

        let mut components = Vec::with_capacity(kept_components.len());
        for &id in &kept_components {
            let Some(component) = scene.component(id) else { continue };
            let Some(&owner) = node_index.get(&component.owner()) else { continue };
            components.push(ComponentRecord {
                type_name: component.type_name.clone(),
                owner,
                persisted: component.persisted,
                fields: compact(&component.fields),
            });
        }

        Self { nodes, components }
    }
}

fn is_saveable(scene: &Scene, node: NodeId) -> bool {
    let mut current = Some(node);
    while let Some(id) = current {
        match scene.node(id) {
            Some(n) if !n.hidden => current = n.parent,
            _ => return false,
        }
    }
    true
}

// ---------------------------------------------------------------------------
// JSON store
// ---------------------------------------------------------------------------

/// [`SceneStore`] backed by pretty-printed JSON snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSceneStore;

impl SceneStore for JsonSceneStore {
    fn load(&self, path: &Path) -> Result<Scene, GraphError> {
        if !path.exists() {
            return Err(GraphError::FileNotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path)?;
        let snapshot: SceneSnapshot =
            serde_json::from_str(&contents).map_err(|e| GraphError::ParseError {
                path: path.display().to_string(),
                detail: e.to_string(),
            })?;
        debug!(
            path = %path.display(),
            nodes = snapshot.nodes.len(),
            components = snapshot.components.len(),
            "loaded scene snapshot"
        );
        snapshot.into_scene()
    }

    fn save(&self, scene: &Scene, path: &Path) -> Result<(), GraphError> {
        let snapshot = SceneSnapshot::from_scene(scene);
        let contents = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| GraphError::SerializeError(e.to_string()))?;
        std::fs::write(path, contents)?;
        info!(
            path = %path.display(),
            nodes = snapshot.nodes.len(),
            components = snapshot.components.len(),
            "saved scene snapshot"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{FieldKind, Value};

    fn sample_json() -> &'static str {
        r#"{
            "nodes": [
                { "name": "Root", "persisted": { "file_id": 1 } },
                { "name": "Enemy", "persisted": { "file_id": 2 }, "parent": 0, "active": false }
            ],
            "components": [
                { "type_name": "Rigidbody", "owner": 1, "persisted": { "file_id": 3 },
                  "fields": [
                    { "name": "m_Mass", "kind": "float", "value": { "float": 2.5 } },
                    { "name": "m_Target", "kind": "object_reference",
                      "value": { "object_reference": { "node": 0 } } }
                  ] }
            ]
        }"#
    }

    #[test]
    fn test_load_json_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("level.json");
        std::fs::write(&path, sample_json()).unwrap();

        let scene = JsonSceneStore.load(&path).unwrap();
        let enemy = NodeId(1);
        assert_eq!(scene.path(enemy), "Root/Enemy");
        assert!(!scene.node(enemy).unwrap().active);

        let body = scene.components_of(enemy)[0];
        assert_eq!(scene.component(body).unwrap().type_name, "Rigidbody");
        assert_eq!(
            scene.field_value(body.into(), "m_Target"),
            Some(&Value::ObjectReference(Some(ObjectRef::Node(NodeId(0)))))
        );
    }

    #[test]
    fn test_dangling_reference_is_rejected() {
        let snapshot: SceneSnapshot = serde_json::from_str(
            r#"{ "nodes": [ { "name": "A", "fields": [
                { "name": "m_Ref", "kind": "object_reference",
                  "value": { "object_reference": { "component": 4 } } } ] } ] }"#,
        )
        .unwrap();
        let err = snapshot.into_scene().unwrap_err();
        assert!(matches!(
            err,
            GraphError::DanglingIndex {
                entity: "component",
                index: 4
            }
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = JsonSceneStore.load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, GraphError::FileNotFound(_)));
    }

    #[test]
    fn test_save_compacts_hidden_and_detached() {
        let mut scene = Scene::new();
        let root = scene.add_node("Root", None).unwrap();
        let ghost = scene.add_node("Ghost", None).unwrap();
        let _ghost_child = scene.add_node("GhostChild", Some(ghost)).unwrap();
        let keep = scene.add_node("Keep", Some(root)).unwrap();
        scene.set_hidden(ghost, true).unwrap();

        let dropped = scene.add_component(keep, "Old").unwrap();
        let script = scene.add_component(keep, "Script").unwrap();
        scene
            .push_field(
                script.into(),
                Field::new("m_Ghost", Value::ObjectReference(Some(ghost.into()))),
            )
            .unwrap();
        scene
            .push_field(
                script.into(),
                Field::new(
                    "m_Refs",
                    Value::array(
                        FieldKind::ObjectReference,
                        vec![Value::ObjectReference(Some(keep.into()))],
                    ),
                ),
            )
            .unwrap();
        scene.detach_component(dropped).unwrap();

        let snapshot = SceneSnapshot::from_scene(&scene);
        let names: Vec<_> = snapshot.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["Root", "Keep"]);
        assert_eq!(snapshot.nodes[1].parent, Some(0));
        assert_eq!(snapshot.components.len(), 1);

        let fields = &snapshot.components[0].fields;
        assert_eq!(fields[0].value, Value::ObjectReference(None));
        assert_eq!(
            fields[1].value,
            Value::array(
                FieldKind::ObjectReference,
                vec![Value::ObjectReference(Some(ObjectRef::Node(NodeId(1))))]
            )
        );
    }

    #[test]
    fn test_save_then_load_preserves_graph() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.json");
        let target = dir.path().join("out.json");
        std::fs::write(&source, sample_json()).unwrap();

        let scene = JsonSceneStore.load(&source).unwrap();
        JsonSceneStore.save(&scene, &target).unwrap();
        let reloaded = JsonSceneStore.load(&target).unwrap();

        assert_eq!(reloaded.node_count(), 2);
        assert_eq!(reloaded.path(NodeId(1)), "Root/Enemy");
        let body = reloaded.components_of(NodeId(1))[0];
        assert_eq!(
            reloaded.field_value(body.into(), "m_Mass"),
            Some(&Value::Float(2.5))
        );
    }
}
