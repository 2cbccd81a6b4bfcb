//! Deterministic traversal of an object's serialized fields.
//!
//! Fields are visited in declaration order, so two objects with the same
//! layout can be walked side by side without looking fields up by name.
//! Arrays are entered only on request: [`FieldCursor::next`] with
//! `enter_children = false` skips an array and all of its elements in one
//! step.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::scene::{ObjectRef, Scene};
use super::value::{Field, FieldKind, Value};
use crate::errors::{FieldError, GraphError};

/// Address of a field, or of an array element nested inside a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldPath {
    /// Index of the top-level field.
    pub field: usize,
    /// Element indices, outermost first. Empty for the field itself.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub elements: Vec<usize>,
}

impl FieldPath {
    pub fn top(field: usize) -> Self {
        Self {
            field,
            elements: Vec::new(),
        }
    }

    pub fn element(&self, index: usize) -> Self {
        let mut elements = self.elements.clone();
        elements.push(index);
        Self {
            field: self.field,
            elements,
        }
    }

    /// Human-readable form, e.g. `m_Waypoints[2]`, given the field list the
    /// path points into.
    pub fn display(&self, fields: &[Field]) -> String {
        let base = fields
            .get(self.field)
            .map(|f| f.name.clone())
            .unwrap_or_else(|| format!("#{}", self.field));
        self.elements
            .iter()
            .fold(base, |acc, i| format!("{}[{}]", acc, i))
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.field)?;
        for i in &self.elements {
            write!(f, "[{}]", i)?;
        }
        Ok(())
    }
}

/// A field path anchored on a live object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldLocation {
    pub owner: ObjectRef,
    pub path: FieldPath,
}

impl FieldLocation {
    pub fn new(owner: ObjectRef, path: FieldPath) -> Self {
        Self { owner, path }
    }
}

/// One step of a [`FieldCursor`].
#[derive(Debug, Clone, PartialEq)]
pub struct FieldEntry<'a> {
    pub path: FieldPath,
    pub kind: &'a FieldKind,
    pub value: &'a Value,
}

// ---------------------------------------------------------------------------
// Path resolution
// ---------------------------------------------------------------------------

/// Resolve `path` against `fields`, returning the declared kind and value.
pub fn resolve<'a>(fields: &'a [Field], path: &FieldPath) -> Option<(&'a FieldKind, &'a Value)> {
    let field = fields.get(path.field)?;
    let mut kind = &field.kind;
    let mut value = &field.value;
    for &i in &path.elements {
        let FieldKind::Array(element) = kind else {
            return None;
        };
        let Value::Array { items, .. } = value else {
            return None;
        };
        kind = element.as_ref();
        value = items.get(i)?;
    }
    Some((kind, value))
}

fn resolve_mut<'a>(
    fields: &'a mut [Field],
    path: &FieldPath,
) -> Option<(&'a FieldKind, &'a mut Value)> {
    let field = fields.get_mut(path.field)?;
    let mut kind = &field.kind;
    let mut value = &mut field.value;
    for &i in &path.elements {
        let FieldKind::Array(element) = kind else {
            return None;
        };
        let Value::Array { items, .. } = value else {
            return None;
        };
        kind = element.as_ref();
        value = items.get_mut(i)?;
    }
    Some((kind, value))
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// Pre-order cursor over a field list.
#[derive(Debug, Clone)]
pub struct FieldCursor<'a> {
    fields: &'a [Field],
    current: Option<FieldPath>,
    started: bool,
}

impl<'a> FieldCursor<'a> {
    pub fn new(fields: &'a [Field]) -> Self {
        Self {
            fields,
            current: None,
            started: false,
        }
    }

    /// Advance to the next field.
    ///
    /// With `enter_children`, a non-empty array at the current position is
    /// entered and its first element returned; otherwise the cursor moves to
    /// the next sibling, climbing out of finished arrays as needed.
    pub fn next(&mut self, enter_children: bool) -> Option<FieldEntry<'a>> {
        let next = if !self.started {
            self.started = true;
            (!self.fields.is_empty()).then(|| FieldPath::top(0))
        } else {
            let current = self.current.take()?;
            self.advance(current, enter_children)
        };
        self.current = next;
        self.entry()
    }

    /// The entry the cursor currently points at.
    pub fn entry(&self) -> Option<FieldEntry<'a>> {
        let path = self.current.as_ref()?;
        let (kind, value) = resolve(self.fields, path)?;
        Some(FieldEntry {
            path: path.clone(),
            kind,
            value,
        })
    }

    fn advance(&self, current: FieldPath, enter_children: bool) -> Option<FieldPath> {
        if enter_children {
            if let Some((_, Value::Array { items, .. })) = resolve(self.fields, &current) {
                if !items.is_empty() {
                    return Some(current.element(0));
                }
            }
        }

        let mut path = current;
        loop {
            match path.elements.pop() {
                None => {
                    let field = path.field + 1;
                    return (field < self.fields.len()).then(|| FieldPath::top(field));
                }
                Some(last) => {
                    let len = resolve(self.fields, &path)
                        .and_then(|(_, v)| v.array_len())
                        .unwrap_or(0);
                    if last + 1 < len {
                        return Some(path.element(last + 1));
                    }
                }
            }
        }
    }
}

/// Top-level fields of `fields`, in declaration order.
pub fn iterate(fields: &[Field]) -> Vec<FieldEntry<'_>> {
    let mut cursor = FieldCursor::new(fields);
    let mut out = Vec::with_capacity(fields.len());
    while let Some(entry) = cursor.next(false) {
        out.push(entry);
    }
    out
}

// ---------------------------------------------------------------------------
// Read / write
// ---------------------------------------------------------------------------

/// Read the value at `location`.
///
/// Unsupported fields read as [`Value::Unsupported`] rather than failing.
pub fn read_field(scene: &Scene, location: &FieldLocation) -> Result<Value, FieldError> {
    let fields = scene
        .fields(location.owner)
        .ok_or(GraphError::MissingObject(location.owner))?;
    let (kind, value) = resolve(fields, &location.path).ok_or_else(|| FieldError::NoSuchField {
        owner: location.owner,
        path: location.path.display(fields),
    })?;
    if !kind.is_supported() {
        return Ok(Value::Unsupported);
    }
    Ok(value.clone())
}

/// Write `value` at `location`.
///
/// The value must conform to the declared kind of the slot. Writes to
/// unsupported fields are ignored. References are stored as given; callers
/// remap them beforehand when needed.
pub fn write_field(scene: &mut Scene, location: &FieldLocation, value: Value) -> Result<(), FieldError> {
    let fields = scene
        .fields_mut(location.owner)
        .ok_or(GraphError::MissingObject(location.owner))?;
    let display = location.path.display(fields);
    let renames = location.path.elements.is_empty()
        && fields
            .get(location.path.field)
            .is_some_and(|f| f.plain_name() == "Name");
    let (kind, slot) = resolve_mut(fields, &location.path).ok_or_else(|| FieldError::NoSuchField {
        owner: location.owner,
        path: display.clone(),
    })?;
    if !kind.is_supported() {
        return Ok(());
    }
    if !value.conforms_to(kind) {
        return Err(FieldError::KindMismatch {
            path: display,
            expected: kind.clone(),
            actual: value.kind(),
        });
    }
    let new_name = match &value {
        Value::String(name) if renames => Some(name.clone()),
        _ => None,
    };
    *slot = value;

    // A node's serialized name field doubles as its hierarchy name.
    if let (ObjectRef::Node(node), Some(name)) = (location.owner, new_name) {
        if let Some(n) = scene.node_mut(node) {
            n.name = name;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_fields() -> Vec<Field> {
        vec![
            Field::new("m_Speed", Value::Float(5.0)),
            Field::new(
                "m_Waypoints",
                Value::array(
                    FieldKind::Vector3,
                    vec![Value::Vector3([0.0; 3]), Value::Vector3([1.0; 3])],
                ),
            ),
            Field::new("m_Empty", Value::array(FieldKind::Integer, vec![])),
            Field::unsupported("m_Blob", "ExposedReference"),
        ]
    }

    fn walk(fields: &[Field], enter_children: bool) -> Vec<String> {
        let mut cursor = FieldCursor::new(fields);
        let mut out = Vec::new();
        while let Some(entry) = cursor.next(enter_children) {
            out.push(entry.path.display(fields));
        }
        out
    }

    #[test]
    fn test_skip_children() {
        let fields = sample_fields();
        assert_eq!(
            walk(&fields, false),
            vec!["m_Speed", "m_Waypoints", "m_Empty", "m_Blob"]
        );
    }

    #[test]
    fn test_enter_children() {
        let fields = sample_fields();
        assert_eq!(
            walk(&fields, true),
            vec![
                "m_Speed",
                "m_Waypoints",
                "m_Waypoints[0]",
                "m_Waypoints[1]",
                "m_Empty",
                "m_Blob"
            ]
        );
    }

    #[test]
    fn test_nested_arrays_climb_out() {
        let inner = |n: i64| Value::array(FieldKind::Integer, vec![Value::Integer(n)]);
        let fields = vec![
            Field::new(
                "m_Grid",
                Value::array(
                    FieldKind::Array(Box::new(FieldKind::Integer)),
                    vec![inner(1), inner(2)],
                ),
            ),
            Field::new("m_After", Value::Boolean(true)),
        ];
        assert_eq!(
            walk(&fields, true),
            vec![
                "m_Grid",
                "m_Grid[0]",
                "m_Grid[0][0]",
                "m_Grid[1]",
                "m_Grid[1][0]",
                "m_After"
            ]
        );
    }

    #[test]
    fn test_empty_field_list() {
        let mut cursor = FieldCursor::new(&[]);
        assert!(cursor.next(true).is_none());
        assert!(cursor.next(true).is_none());
    }

    #[test]
    fn test_read_write_roundtrip_and_errors() {
        let mut scene = Scene::new();
        let node = scene.add_node("N", None).unwrap();
        let comp = scene.add_component(node, "Mover").unwrap();
        for field in sample_fields() {
            scene.push_field(comp.into(), field).unwrap();
        }

        let speed = FieldLocation::new(comp.into(), FieldPath::top(0));
        write_field(&mut scene, &speed, Value::Float(9.0)).unwrap();
        assert_eq!(read_field(&scene, &speed).unwrap(), Value::Float(9.0));

        let element = FieldLocation::new(comp.into(), FieldPath::top(1).element(1));
        write_field(&mut scene, &element, Value::Vector3([4.0, 5.0, 6.0])).unwrap();
        assert_eq!(
            read_field(&scene, &element).unwrap(),
            Value::Vector3([4.0, 5.0, 6.0])
        );

        let mismatch = write_field(&mut scene, &speed, Value::String("fast".into()));
        assert!(matches!(mismatch, Err(FieldError::KindMismatch { .. })));

        let missing = FieldLocation::new(comp.into(), FieldPath::top(1).element(7));
        assert!(matches!(
            read_field(&scene, &missing),
            Err(FieldError::NoSuchField { .. })
        ));
    }

    #[test]
    fn test_writing_name_field_renames_node() {
        let mut scene = Scene::new();
        let node = scene.add_node("Old", None).unwrap();
        scene
            .push_field(node.into(), Field::new("m_Name", Value::String("Old".into())))
            .unwrap();
        let location = FieldLocation::new(node.into(), FieldPath::top(0));
        write_field(&mut scene, &location, Value::String("New".into())).unwrap();
        assert_eq!(scene.node(node).unwrap().name, "New");
    }

    #[test]
    fn test_unsupported_field_is_inert() {
        let mut scene = Scene::new();
        let node = scene.add_node("N", None).unwrap();
        scene
            .push_field(node.into(), Field::unsupported("m_Blob", "ExposedReference"))
            .unwrap();
        let location = FieldLocation::new(node.into(), FieldPath::top(0));

        assert_eq!(read_field(&scene, &location).unwrap(), Value::Unsupported);
        write_field(&mut scene, &location, Value::Integer(3)).unwrap();
        assert_eq!(read_field(&scene, &location).unwrap(), Value::Unsupported);
    }
}
