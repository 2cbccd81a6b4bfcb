//! Field-level difference detection.
//!
//! Values are compared by their kind's natural equality, with two twists:
//! references compare by the stable identity of their referents, and arrays
//! differ when either their length or any element differs.

use crate::graph::{Field, FieldCursor, Scene, Value};
use crate::identity::identity;

fn floats_differ(a: f32, b: f32) -> bool {
    // NaN is treated as equal to itself so a NaN field does not produce a
    // conflict that can never be resolved.
    !(a == b || (a.is_nan() && b.is_nan()))
}

fn float_slices_differ(a: &[f32], b: &[f32]) -> bool {
    a.len() != b.len() || a.iter().zip(b).any(|(x, y)| floats_differ(*x, *y))
}

/// Whether two values differ.
///
/// Both values must live in `scene`; references are resolved through it to
/// compare their referents' identities.
pub fn values_differ(scene: &Scene, ours: &Value, theirs: &Value) -> bool {
    match (ours, theirs) {
        (Value::Float(a), Value::Float(b)) => floats_differ(*a, *b),
        (Value::Vector2(a), Value::Vector2(b)) => float_slices_differ(a, b),
        (Value::Vector3(a), Value::Vector3(b)) => float_slices_differ(a, b),
        (Value::Vector4(a), Value::Vector4(b))
        | (Value::Quaternion(a), Value::Quaternion(b))
        | (Value::Color(a), Value::Color(b)) => float_slices_differ(a, b),
        (Value::Rect(a), Value::Rect(b)) => float_slices_differ(
            &[a.x, a.y, a.width, a.height],
            &[b.x, b.y, b.width, b.height],
        ),
        (Value::Bounds(a), Value::Bounds(b)) => {
            float_slices_differ(&a.center, &b.center) || float_slices_differ(&a.extents, &b.extents)
        }
        (Value::Curve(a), Value::Curve(b)) => {
            a.pre_wrap_mode != b.pre_wrap_mode
                || a.post_wrap_mode != b.post_wrap_mode
                || a.keys.len() != b.keys.len()
                || a.keys.iter().zip(&b.keys).any(|(x, y)| {
                    float_slices_differ(
                        &[x.time, x.value, x.in_tangent, x.out_tangent],
                        &[y.time, y.value, y.in_tangent, y.out_tangent],
                    )
                })
        }
        (Value::ObjectReference(a), Value::ObjectReference(b)) => match (a, b) {
            (Some(a), Some(b)) => identity(scene, *a) != identity(scene, *b),
            (None, None) => false,
            _ => true,
        },
        (Value::Array { items: a, .. }, Value::Array { items: b, .. }) => {
            a.len() != b.len() || a.iter().zip(b).any(|(x, y)| values_differ(scene, x, y))
        }
        (Value::Unsupported, Value::Unsupported) => false,
        (a, b) => a != b,
    }
}

/// Whether two corresponding fields differ.
///
/// Fields of different kinds always differ. Arrays are stepped element by
/// element with a [`FieldCursor`], stopping at the first difference.
pub fn fields_differ(scene: &Scene, ours: &Field, theirs: &Field) -> bool {
    if ours.kind != theirs.kind {
        return true;
    }
    if !ours.kind.is_array() {
        return values_differ(scene, &ours.value, &theirs.value);
    }
    if ours.value.array_len() != theirs.value.array_len() {
        return true;
    }

    let ours_slice = std::slice::from_ref(ours);
    let theirs_slice = std::slice::from_ref(theirs);
    let mut a = FieldCursor::new(ours_slice);
    let mut b = FieldCursor::new(theirs_slice);
    // Position both cursors on the array itself.
    a.next(false);
    b.next(false);
    let len = ours.value.array_len().unwrap_or(0);
    for i in 0..len {
        let enter = i == 0;
        let (Some(x), Some(y)) = (a.next(enter), b.next(enter)) else {
            return true;
        };
        // Nested arrays are compared whole; the cursors only step siblings.
        if values_differ(scene, x.value, y.value) {
            return true;
        }
    }
    false
}

/// Whether two field lists share the same layout: the same names with the
/// same kinds in the same order. Pairwise comparison is only meaningful
/// between objects whose layouts match.
pub fn layouts_match(ours: &[Field], theirs: &[Field]) -> bool {
    ours.len() == theirs.len()
        && ours
            .iter()
            .zip(theirs)
            .all(|(a, b)| a.name == b.name && a.kind == b.kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{FieldKind, PersistedId};

    fn ints(values: &[i64]) -> Field {
        Field::new(
            "m_Values",
            Value::array(
                FieldKind::Integer,
                values.iter().map(|v| Value::Integer(*v)).collect(),
            ),
        )
    }

    #[test]
    fn test_scalars() {
        let scene = Scene::new();
        assert!(!values_differ(&scene, &Value::Float(5.0), &Value::Float(5.0)));
        assert!(values_differ(&scene, &Value::Float(5.0), &Value::Float(9.0)));
        assert!(!values_differ(&scene, &Value::Float(f32::NAN), &Value::Float(f32::NAN)));
        assert!(!values_differ(&scene, &Value::Float(0.0), &Value::Float(-0.0)));
        assert!(values_differ(
            &scene,
            &Value::String("a".into()),
            &Value::String("b".into())
        ));
        assert!(values_differ(&scene, &Value::Integer(1), &Value::Float(1.0)));
    }

    #[test]
    fn test_arrays() {
        let scene = Scene::new();
        assert!(!fields_differ(&scene, &ints(&[1, 2, 3]), &ints(&[1, 2, 3])));
        assert!(fields_differ(&scene, &ints(&[1, 2, 3]), &ints(&[1, 9, 3])));
        assert!(fields_differ(&scene, &ints(&[1, 2, 3]), &ints(&[1, 2])));
        assert!(!fields_differ(&scene, &ints(&[]), &ints(&[])));
    }

    #[test]
    fn test_nested_arrays() {
        let scene = Scene::new();
        let grid = |last: i64| {
            Field::new(
                "m_Grid",
                Value::array(
                    FieldKind::Array(Box::new(FieldKind::Integer)),
                    vec![
                        Value::array(FieldKind::Integer, vec![Value::Integer(1), Value::Integer(2)]),
                        Value::array(FieldKind::Integer, vec![Value::Integer(last)]),
                    ],
                ),
            )
        };
        assert!(!fields_differ(&scene, &grid(3), &grid(3)));
        assert!(fields_differ(&scene, &grid(3), &grid(4)));
    }

    #[test]
    fn test_references_compare_by_identity() {
        let mut scene = Scene::new();
        let ours = scene.add_node("Target", None).unwrap();
        let theirs = scene.add_node("Target", None).unwrap();
        let other = scene.add_node("Other", None).unwrap();
        let id = PersistedId {
            file_id: 11,
            prefab_id: 0,
        };
        scene.set_persisted(ours.into(), id).unwrap();
        scene.set_persisted(theirs.into(), id).unwrap();
        scene
            .set_persisted(
                other.into(),
                PersistedId {
                    file_id: 12,
                    prefab_id: 0,
                },
            )
            .unwrap();

        let r = |n: crate::graph::NodeId| Value::ObjectReference(Some(n.into()));
        assert!(!values_differ(&scene, &r(ours), &r(theirs)));
        assert!(values_differ(&scene, &r(ours), &r(other)));
        assert!(values_differ(&scene, &r(ours), &Value::ObjectReference(None)));
        assert!(!values_differ(
            &scene,
            &Value::ObjectReference(None),
            &Value::ObjectReference(None)
        ));
    }

    #[test]
    fn test_layouts() {
        let a = vec![Field::new("m_A", Value::Integer(1)), Field::new("m_B", Value::Boolean(true))];
        let b = vec![Field::new("m_A", Value::Integer(7)), Field::new("m_B", Value::Boolean(false))];
        let c = vec![Field::new("m_A", Value::Float(1.0)), Field::new("m_B", Value::Boolean(true))];
        assert!(layouts_match(&a, &b));
        assert!(!layouts_match(&a, &c));
        assert!(!layouts_match(&a, &a[..1]));
    }
}
