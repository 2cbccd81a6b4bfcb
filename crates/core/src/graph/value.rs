//! Typed field values.
//!
//! A [`Field`] is one named slot in a node or component. Its declared
//! [`FieldKind`] never changes; its [`Value`] must always conform to it.
//! Kinds the engine does not understand are carried as
//! [`FieldKind::Unsupported`]: they read as [`Value::Unsupported`] and
//! ignore writes.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::scene::ObjectRef;

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// Declared kind of a serialized field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Integer,
    Float,
    Boolean,
    String,
    Vector2,
    Vector3,
    Vector4,
    Quaternion,
    Color,
    Rect,
    Bounds,
    Curve,
    Enum,
    LayerMask,
    ObjectReference,
    /// Ordered sequence of elements that all share one kind.
    Array(Box<FieldKind>),
    /// A kind the engine cannot read or write; carries the original type name.
    Unsupported(String),
}

impl FieldKind {
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported(_))
    }

    /// The zero value of this kind, used for new array elements and for
    /// degenerate reads.
    pub fn default_value(&self) -> Value {
        match self {
            Self::Integer => Value::Integer(0),
            Self::Float => Value::Float(0.0),
            Self::Boolean => Value::Boolean(false),
            Self::String => Value::String(String::new()),
            Self::Vector2 => Value::Vector2([0.0; 2]),
            Self::Vector3 => Value::Vector3([0.0; 3]),
            Self::Vector4 => Value::Vector4([0.0; 4]),
            Self::Quaternion => Value::Quaternion([0.0, 0.0, 0.0, 1.0]),
            Self::Color => Value::Color([0.0; 4]),
            Self::Rect => Value::Rect(Rect::default()),
            Self::Bounds => Value::Bounds(Bounds::default()),
            Self::Curve => Value::Curve(Curve::default()),
            Self::Enum => Value::Enum(0),
            Self::LayerMask => Value::LayerMask(0),
            Self::ObjectReference => Value::ObjectReference(None),
            Self::Array(element) => Value::Array {
                element: (**element).clone(),
                items: Vec::new(),
            },
            Self::Unsupported(_) => Value::Unsupported,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => write!(f, "integer"),
            Self::Float => write!(f, "float"),
            Self::Boolean => write!(f, "boolean"),
            Self::String => write!(f, "string"),
            Self::Vector2 => write!(f, "vector2"),
            Self::Vector3 => write!(f, "vector3"),
            Self::Vector4 => write!(f, "vector4"),
            Self::Quaternion => write!(f, "quaternion"),
            Self::Color => write!(f, "color"),
            Self::Rect => write!(f, "rect"),
            Self::Bounds => write!(f, "bounds"),
            Self::Curve => write!(f, "curve"),
            Self::Enum => write!(f, "enum"),
            Self::LayerMask => write!(f, "layer_mask"),
            Self::ObjectReference => write!(f, "object_reference"),
            Self::Array(element) => write!(f, "array<{}>", element),
            Self::Unsupported(name) => write!(f, "unsupported({})", name),
        }
    }
}

// ---------------------------------------------------------------------------
// Composite value types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub center: [f32; 3],
    pub extents: [f32; 3],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    pub time: f32,
    pub value: f32,
    #[serde(default)]
    pub in_tangent: f32,
    #[serde(default)]
    pub out_tangent: f32,
}

/// Animation curve: keyframes plus wrap modes before/after the key range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Curve {
    pub keys: Vec<Keyframe>,
    #[serde(default)]
    pub pre_wrap_mode: i32,
    #[serde(default)]
    pub post_wrap_mode: i32,
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// The current value of a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Integer(i64),
    Float(f32),
    Boolean(bool),
    String(String),
    Vector2([f32; 2]),
    Vector3([f32; 3]),
    Vector4([f32; 4]),
    /// `[x, y, z, w]`.
    Quaternion([f32; 4]),
    /// `[r, g, b, a]`.
    Color([f32; 4]),
    Rect(Rect),
    Bounds(Bounds),
    Curve(Curve),
    /// Index into the enum's declared names.
    Enum(i32),
    LayerMask(u32),
    /// Cross-object reference; `None` is a null reference.
    ObjectReference(Option<ObjectRef>),
    Array {
        element: FieldKind,
        items: Vec<Value>,
    },
    Unsupported,
}

impl Value {
    /// Build an array value of the given element kind.
    pub fn array(element: FieldKind, items: Vec<Value>) -> Self {
        Self::Array { element, items }
    }

    /// The kind this value inhabits.
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Integer(_) => FieldKind::Integer,
            Self::Float(_) => FieldKind::Float,
            Self::Boolean(_) => FieldKind::Boolean,
            Self::String(_) => FieldKind::String,
            Self::Vector2(_) => FieldKind::Vector2,
            Self::Vector3(_) => FieldKind::Vector3,
            Self::Vector4(_) => FieldKind::Vector4,
            Self::Quaternion(_) => FieldKind::Quaternion,
            Self::Color(_) => FieldKind::Color,
            Self::Rect(_) => FieldKind::Rect,
            Self::Bounds(_) => FieldKind::Bounds,
            Self::Curve(_) => FieldKind::Curve,
            Self::Enum(_) => FieldKind::Enum,
            Self::LayerMask(_) => FieldKind::LayerMask,
            Self::ObjectReference(_) => FieldKind::ObjectReference,
            Self::Array { element, .. } => FieldKind::Array(Box::new(element.clone())),
            Self::Unsupported => FieldKind::Unsupported(String::new()),
        }
    }

    /// Whether this value may be stored in a field of `kind`.
    pub fn conforms_to(&self, kind: &FieldKind) -> bool {
        match (self, kind) {
            (Self::Array { element, items }, FieldKind::Array(expected)) => {
                element == expected.as_ref() && items.iter().all(|v| v.conforms_to(expected))
            }
            (Self::Array { .. }, _) | (_, FieldKind::Array(_)) => false,
            (Self::Unsupported, FieldKind::Unsupported(_)) => true,
            (value, kind) => value.kind() == *kind,
        }
    }

    pub fn array_len(&self) -> Option<usize> {
        match self {
            Self::Array { items, .. } => Some(items.len()),
            _ => None,
        }
    }

    /// Whether this value is, or contains, an object reference.
    pub fn holds_references(&self) -> bool {
        match self {
            Self::ObjectReference(_) => true,
            Self::Array { items, .. } => items.iter().any(Value::holds_references),
            _ => false,
        }
    }

    /// Rewrite every reference inside this value through `remap`.
    pub fn map_references<F>(&mut self, remap: &mut F)
    where
        F: FnMut(ObjectRef) -> Option<ObjectRef>,
    {
        match self {
            Self::ObjectReference(Some(r)) => {
                *self = Self::ObjectReference(remap(*r));
            }
            Self::Array { items, .. } => {
                for item in items {
                    item.map_references(remap);
                }
            }
            _ => {}
        }
    }
}

fn write_floats(f: &mut fmt::Formatter<'_>, values: &[f32]) -> fmt::Result {
    write!(f, "(")?;
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", v)?;
    }
    write!(f, ")")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Boolean(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{}", v),
            Self::Vector2(v) => write_floats(f, v),
            Self::Vector3(v) => write_floats(f, v),
            Self::Vector4(v) | Self::Quaternion(v) => write_floats(f, v),
            Self::Color(v) => {
                write!(f, "RGBA")?;
                write_floats(f, v)
            }
            Self::Rect(r) => write!(
                f,
                "(x:{}, y:{}, width:{}, height:{})",
                r.x, r.y, r.width, r.height
            ),
            Self::Bounds(b) => {
                write!(f, "Center: ")?;
                write_floats(f, &b.center)?;
                write!(f, ", Extents: ")?;
                write_floats(f, &b.extents)
            }
            Self::Curve(c) => write!(f, "Curve[{} keys]", c.keys.len()),
            Self::Enum(v) => write!(f, "{}", v),
            Self::LayerMask(v) => write!(f, "{}", v),
            Self::ObjectReference(None) => write!(f, "[none]"),
            Self::ObjectReference(Some(r)) => write!(f, "{}", r),
            Self::Array { items, .. } => write!(f, "Array[{}]", items.len()),
            Self::Unsupported => write!(f, "[unsupported]"),
        }
    }
}

// ---------------------------------------------------------------------------
// Fields
// ---------------------------------------------------------------------------

/// One named, typed value slot on a node or component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Serialized name, e.g. `m_Speed`.
    pub name: String,
    pub kind: FieldKind,
    pub value: Value,
}

impl Field {
    /// A field whose declared kind is taken from its initial value.
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            kind: value.kind(),
            value,
        }
    }

    /// A field of a kind the engine does not understand.
    pub fn unsupported(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Unsupported(type_name.into()),
            value: Value::Unsupported,
        }
    }

    /// The display name with any `m_`-style prefix removed.
    pub fn plain_name(&self) -> &str {
        plain_name(&self.name)
    }
}

/// Strip everything up to and including the first underscore.
pub fn plain_name(name: &str) -> &str {
    match name.find('_') {
        Some(i) => &name[i + 1..],
        None => name,
    }
}
