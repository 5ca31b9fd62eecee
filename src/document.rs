/*! Decoding and encoding of specification trees.

The document layer consumes a neutral tree of scalars, sequences, and
mappings — [serde_yaml::Value] — and dispatches on single-key mapping tags
(`{axis-angle: [...]}`) to build the typed specs of [crate::spec]. Plain
numbers decode as constants, plain strings as references. Every spec also
encodes back to a document such that re-decoding yields a structurally equal
spec.

Surface syntax is not this crate's concern; anything that can produce a
[Value] tree can feed a controller. */

use crate::errors::{Error, ValueKind};
use crate::spec::{
    AnySpec, ControllableConstraint, ControllerSpec, FrameSpec, HardConstraint, RotationSpec,
    ScalarSpec, ScopeEntry, ScopeSpec, SoftConstraint, VectorSpec,
};
use serde_yaml::{Mapping, Value};

const SCALAR_TAGS: &[&str] = &[
    "input-var", "double-neg", "double-add", "double-sub", "double-mul", "double-div", "x-of",
    "y-of", "z-of", "norm-of", "dot", "min", "max", "abs", "sin", "cos", "tan", "asin", "acos",
    "atan2", "fmod",
];
const VECTOR_TAGS: &[&str] = &[
    "vector3", "vector-add", "vector-sub", "scale-vector", "cross", "rot-vector", "origin-of",
    "rotate-vector",
];
const ROTATION_TAGS: &[&str] = &[
    "axis-angle", "quaternion", "rotation-mul", "inverse-rotation", "orientation-of",
];
const FRAME_TAGS: &[&str] = &["frame", "frame-mul", "inverse-frame"];

/// Which kind a tag belongs to, if it is an expression tag at all.
fn tag_kind(tag: &str) -> Option<ValueKind> {
    if SCALAR_TAGS.contains(&tag) {
        Some(ValueKind::Scalar)
    } else if VECTOR_TAGS.contains(&tag) {
        Some(ValueKind::Vector)
    } else if ROTATION_TAGS.contains(&tag) {
        Some(ValueKind::Rotation)
    } else if FRAME_TAGS.contains(&tag) {
        Some(ValueKind::Frame)
    } else {
        None
    }
}

/// Single-key mappings are tag dispatch points.
fn tagged(doc: &Value) -> Option<(&str, &Value)> {
    let map = doc.as_mapping()?;
    if map.len() != 1 {
        return None;
    }
    let (key, value) = map.iter().next()?;
    Some((key.as_str()?, value))
}

/// Compact description of a document node for error messages.
fn describe(doc: &Value) -> String {
    match doc {
        Value::Null => "null".into(),
        Value::Bool(b) => format!("bool {b}"),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) => format!("string '{s}'"),
        Value::Sequence(s) => format!("sequence of {}", s.len()),
        Value::Mapping(m) => match tagged(doc) {
            Some((tag, _)) => format!("mapping tagged '{tag}'"),
            None => format!("mapping of {}", m.len()),
        },
        Value::Tagged(t) => format!("yaml-tagged {}", t.tag),
    }
}

fn syntax(expected: &'static str, doc: &Value) -> Error {
    Error::Syntax {
        expected,
        found: describe(doc),
    }
}

/// A tag that belongs to a different kind decodes to a kind mismatch, an
/// unknown tag to a syntax error.
fn reject(expected: ValueKind, what: &'static str, doc: &Value) -> Error {
    if let Some((tag, _)) = tagged(doc) {
        if let Some(found) = tag_kind(tag) {
            if found != expected {
                return Error::KindMismatch { expected, found };
            }
        }
    } else if matches!(doc, Value::Number(_)) && expected != ValueKind::Scalar {
        return Error::KindMismatch {
            expected,
            found: ValueKind::Scalar,
        };
    }
    syntax(what, doc)
}

fn number(doc: &Value, what: &'static str) -> Result<f64, Error> {
    doc.as_f64().ok_or_else(|| syntax(what, doc))
}

fn sequence<'a>(doc: &'a Value, what: &'static str) -> Result<&'a [Value], Error> {
    doc.as_sequence()
        .map(Vec::as_slice)
        .ok_or_else(|| syntax(what, doc))
}

fn fixed<'a, const N: usize>(doc: &'a Value, what: &'static str) -> Result<&'a [Value; N], Error> {
    sequence(doc, what)?
        .try_into()
        .map_err(|_| syntax(what, doc))
}

fn tag(name: &str, inner: Value) -> Value {
    let mut map = Mapping::new();
    map.insert(Value::String(name.to_owned()), inner);
    Value::Mapping(map)
}

fn tag_seq(name: &str, inner: impl IntoIterator<Item = Value>) -> Value {
    tag(name, Value::Sequence(inner.into_iter().collect()))
}

impl ScalarSpec {
    pub fn from_doc(doc: &Value) -> Result<Self, Error> {
        if let Some(v) = doc.as_f64() {
            return Ok(ScalarSpec::Const(v));
        }
        if let Some(name) = doc.as_str() {
            return Ok(ScalarSpec::Reference(name.to_owned()));
        }
        let Some((tag, inner)) = tagged(doc) else {
            return Err(reject(ValueKind::Scalar, "a scalar expression", doc));
        };
        let spec = match tag {
            "input-var" => {
                let index = inner
                    .as_u64()
                    .ok_or_else(|| syntax("a non-negative input index", inner))?;
                ScalarSpec::Input(index as usize)
            }
            "double-neg" => ScalarSpec::Neg(Box::new(Self::from_doc(inner)?)),
            "double-add" => ScalarSpec::Add(Self::list_from_doc(inner, 0)?),
            "double-sub" => ScalarSpec::Sub(Self::list_from_doc(inner, 1)?),
            "double-mul" => ScalarSpec::Mul(Self::list_from_doc(inner, 0)?),
            "double-div" => {
                let [a, b] = fixed(inner, "two division operands")?;
                ScalarSpec::Div(Box::new(Self::from_doc(a)?), Box::new(Self::from_doc(b)?))
            }
            "x-of" => ScalarSpec::XOf(Box::new(VectorSpec::from_doc(inner)?)),
            "y-of" => ScalarSpec::YOf(Box::new(VectorSpec::from_doc(inner)?)),
            "z-of" => ScalarSpec::ZOf(Box::new(VectorSpec::from_doc(inner)?)),
            "norm-of" => ScalarSpec::Norm(Box::new(VectorSpec::from_doc(inner)?)),
            "dot" => {
                let [a, b] = fixed(inner, "two dot-product operands")?;
                ScalarSpec::Dot(
                    Box::new(VectorSpec::from_doc(a)?),
                    Box::new(VectorSpec::from_doc(b)?),
                )
            }
            "min" | "max" | "atan2" | "fmod" => {
                let [a, b] = fixed(inner, "two scalar operands")?;
                let a = Box::new(Self::from_doc(a)?);
                let b = Box::new(Self::from_doc(b)?);
                match tag {
                    "min" => ScalarSpec::Min(a, b),
                    "max" => ScalarSpec::Max(a, b),
                    "atan2" => ScalarSpec::Atan2(a, b),
                    _ => ScalarSpec::Fmod(a, b),
                }
            }
            "abs" => ScalarSpec::Abs(Box::new(Self::from_doc(inner)?)),
            "sin" => ScalarSpec::Sin(Box::new(Self::from_doc(inner)?)),
            "cos" => ScalarSpec::Cos(Box::new(Self::from_doc(inner)?)),
            "tan" => ScalarSpec::Tan(Box::new(Self::from_doc(inner)?)),
            "asin" => ScalarSpec::Asin(Box::new(Self::from_doc(inner)?)),
            "acos" => ScalarSpec::Acos(Box::new(Self::from_doc(inner)?)),
            _ => return Err(reject(ValueKind::Scalar, "a scalar expression", doc)),
        };
        Ok(spec)
    }

    fn list_from_doc(doc: &Value, min: usize) -> Result<Vec<Self>, Error> {
        let items = sequence(doc, "a sequence of scalar operands")?;
        if items.len() < min {
            return Err(syntax("at least one scalar operand", doc));
        }
        items.iter().map(Self::from_doc).collect()
    }

    pub fn to_doc(&self) -> Value {
        match self {
            ScalarSpec::Const(v) => Value::from(*v),
            ScalarSpec::Input(i) => tag("input-var", Value::from(*i as u64)),
            ScalarSpec::Reference(name) => Value::String(name.clone()),
            ScalarSpec::Neg(a) => tag("double-neg", a.to_doc()),
            ScalarSpec::Add(args) => tag_seq("double-add", args.iter().map(Self::to_doc)),
            ScalarSpec::Sub(args) => tag_seq("double-sub", args.iter().map(Self::to_doc)),
            ScalarSpec::Mul(args) => tag_seq("double-mul", args.iter().map(Self::to_doc)),
            ScalarSpec::Div(a, b) => tag_seq("double-div", [a.to_doc(), b.to_doc()]),
            ScalarSpec::XOf(v) => tag("x-of", v.to_doc()),
            ScalarSpec::YOf(v) => tag("y-of", v.to_doc()),
            ScalarSpec::ZOf(v) => tag("z-of", v.to_doc()),
            ScalarSpec::Norm(v) => tag("norm-of", v.to_doc()),
            ScalarSpec::Dot(a, b) => tag_seq("dot", [a.to_doc(), b.to_doc()]),
            ScalarSpec::Min(a, b) => tag_seq("min", [a.to_doc(), b.to_doc()]),
            ScalarSpec::Max(a, b) => tag_seq("max", [a.to_doc(), b.to_doc()]),
            ScalarSpec::Abs(a) => tag("abs", a.to_doc()),
            ScalarSpec::Sin(a) => tag("sin", a.to_doc()),
            ScalarSpec::Cos(a) => tag("cos", a.to_doc()),
            ScalarSpec::Tan(a) => tag("tan", a.to_doc()),
            ScalarSpec::Asin(a) => tag("asin", a.to_doc()),
            ScalarSpec::Acos(a) => tag("acos", a.to_doc()),
            ScalarSpec::Atan2(a, b) => tag_seq("atan2", [a.to_doc(), b.to_doc()]),
            ScalarSpec::Fmod(a, b) => tag_seq("fmod", [a.to_doc(), b.to_doc()]),
        }
    }
}

impl VectorSpec {
    pub fn from_doc(doc: &Value) -> Result<Self, Error> {
        if let Some(name) = doc.as_str() {
            return Ok(VectorSpec::Reference(name.to_owned()));
        }
        let Some((tag, inner)) = tagged(doc) else {
            return Err(reject(ValueKind::Vector, "a vector expression", doc));
        };
        let spec = match tag {
            "vector3" => {
                let [x, y, z] = fixed(inner, "three vector components")?;
                VectorSpec::Construct(
                    Box::new(ScalarSpec::from_doc(x)?),
                    Box::new(ScalarSpec::from_doc(y)?),
                    Box::new(ScalarSpec::from_doc(z)?),
                )
            }
            "vector-add" => VectorSpec::Add(Self::list_from_doc(inner, 0)?),
            "vector-sub" => VectorSpec::Sub(Self::list_from_doc(inner, 1)?),
            "scale-vector" => {
                let [s, v] = fixed(inner, "a scalar and a vector operand")?;
                VectorSpec::Scale(
                    Box::new(ScalarSpec::from_doc(s)?),
                    Box::new(Self::from_doc(v)?),
                )
            }
            "cross" => {
                let [a, b] = fixed(inner, "two cross-product operands")?;
                VectorSpec::Cross(Box::new(Self::from_doc(a)?), Box::new(Self::from_doc(b)?))
            }
            "rot-vector" => VectorSpec::RotationVector(Box::new(RotationSpec::from_doc(inner)?)),
            "origin-of" => VectorSpec::OriginOf(Box::new(FrameSpec::from_doc(inner)?)),
            "rotate-vector" => {
                let [r, v] = fixed(inner, "a rotation and a vector operand")?;
                VectorSpec::Rotate(
                    Box::new(RotationSpec::from_doc(r)?),
                    Box::new(Self::from_doc(v)?),
                )
            }
            _ => return Err(reject(ValueKind::Vector, "a vector expression", doc)),
        };
        Ok(spec)
    }

    fn list_from_doc(doc: &Value, min: usize) -> Result<Vec<Self>, Error> {
        let items = sequence(doc, "a sequence of vector operands")?;
        if items.len() < min {
            return Err(syntax("at least one vector operand", doc));
        }
        items.iter().map(Self::from_doc).collect()
    }

    pub fn to_doc(&self) -> Value {
        match self {
            VectorSpec::Construct(x, y, z) => {
                tag_seq("vector3", [x.to_doc(), y.to_doc(), z.to_doc()])
            }
            VectorSpec::Reference(name) => Value::String(name.clone()),
            VectorSpec::Add(args) => tag_seq("vector-add", args.iter().map(Self::to_doc)),
            VectorSpec::Sub(args) => tag_seq("vector-sub", args.iter().map(Self::to_doc)),
            VectorSpec::Scale(s, v) => tag_seq("scale-vector", [s.to_doc(), v.to_doc()]),
            VectorSpec::Cross(a, b) => tag_seq("cross", [a.to_doc(), b.to_doc()]),
            VectorSpec::RotationVector(r) => tag("rot-vector", r.to_doc()),
            VectorSpec::OriginOf(f) => tag("origin-of", f.to_doc()),
            VectorSpec::Rotate(r, v) => tag_seq("rotate-vector", [r.to_doc(), v.to_doc()]),
        }
    }
}

impl RotationSpec {
    pub fn from_doc(doc: &Value) -> Result<Self, Error> {
        if let Some(name) = doc.as_str() {
            return Ok(RotationSpec::Reference(name.to_owned()));
        }
        let Some((tag, inner)) = tagged(doc) else {
            return Err(reject(ValueKind::Rotation, "a rotation expression", doc));
        };
        let spec = match tag {
            "axis-angle" => {
                let [axis, angle] = fixed(inner, "an axis vector and an angle scalar")?;
                RotationSpec::AxisAngle(
                    Box::new(VectorSpec::from_doc(axis)?),
                    Box::new(ScalarSpec::from_doc(angle)?),
                )
            }
            "quaternion" => {
                let [x, y, z, w] = fixed(inner, "four quaternion components")?;
                RotationSpec::Quaternion(
                    number(x, "a quaternion component")?,
                    number(y, "a quaternion component")?,
                    number(z, "a quaternion component")?,
                    number(w, "a quaternion component")?,
                )
            }
            "rotation-mul" => {
                let items = sequence(inner, "a sequence of rotation operands")?;
                RotationSpec::Mul(items.iter().map(Self::from_doc).collect::<Result<_, _>>()?)
            }
            "inverse-rotation" => RotationSpec::Inverse(Box::new(Self::from_doc(inner)?)),
            "orientation-of" => RotationSpec::OrientationOf(Box::new(FrameSpec::from_doc(inner)?)),
            _ => return Err(reject(ValueKind::Rotation, "a rotation expression", doc)),
        };
        Ok(spec)
    }

    pub fn to_doc(&self) -> Value {
        match self {
            RotationSpec::AxisAngle(axis, angle) => {
                tag_seq("axis-angle", [axis.to_doc(), angle.to_doc()])
            }
            RotationSpec::Quaternion(x, y, z, w) => tag_seq(
                "quaternion",
                [*x, *y, *z, *w].into_iter().map(Value::from),
            ),
            RotationSpec::Reference(name) => Value::String(name.clone()),
            RotationSpec::Mul(args) => tag_seq("rotation-mul", args.iter().map(Self::to_doc)),
            RotationSpec::Inverse(r) => tag("inverse-rotation", r.to_doc()),
            RotationSpec::OrientationOf(f) => tag("orientation-of", f.to_doc()),
        }
    }
}

impl FrameSpec {
    pub fn from_doc(doc: &Value) -> Result<Self, Error> {
        if let Some(name) = doc.as_str() {
            return Ok(FrameSpec::Reference(name.to_owned()));
        }
        let Some((tag, inner)) = tagged(doc) else {
            return Err(reject(ValueKind::Frame, "a frame expression", doc));
        };
        let spec = match tag {
            "frame" => {
                let [rot, trans] = fixed(inner, "a rotation and a translation vector")?;
                FrameSpec::Construct(
                    Box::new(RotationSpec::from_doc(rot)?),
                    Box::new(VectorSpec::from_doc(trans)?),
                )
            }
            "frame-mul" => {
                let items = sequence(inner, "a sequence of frame operands")?;
                FrameSpec::Mul(items.iter().map(Self::from_doc).collect::<Result<_, _>>()?)
            }
            "inverse-frame" => FrameSpec::Inverse(Box::new(Self::from_doc(inner)?)),
            _ => return Err(reject(ValueKind::Frame, "a frame expression", doc)),
        };
        Ok(spec)
    }

    pub fn to_doc(&self) -> Value {
        match self {
            FrameSpec::Construct(rot, trans) => tag_seq("frame", [rot.to_doc(), trans.to_doc()]),
            FrameSpec::Reference(name) => Value::String(name.clone()),
            FrameSpec::Mul(args) => tag_seq("frame-mul", args.iter().map(Self::to_doc)),
            FrameSpec::Inverse(f) => tag("inverse-frame", f.to_doc()),
        }
    }
}

impl AnySpec {
    /// Decode a spec of whichever kind the document declares. Bare numbers
    /// are scalar constants and bare strings scalar references; aliases of
    /// other kinds need a tagged position to be decodable.
    pub fn from_doc(doc: &Value) -> Result<Self, Error> {
        if doc.as_f64().is_some() || doc.as_str().is_some() {
            return Ok(AnySpec::Scalar(ScalarSpec::from_doc(doc)?));
        }
        let Some((tag, _)) = tagged(doc) else {
            return Err(syntax("an expression of any kind", doc));
        };
        match tag_kind(tag) {
            Some(ValueKind::Scalar) => Ok(AnySpec::Scalar(ScalarSpec::from_doc(doc)?)),
            Some(ValueKind::Vector) => Ok(AnySpec::Vector(VectorSpec::from_doc(doc)?)),
            Some(ValueKind::Rotation) => Ok(AnySpec::Rotation(RotationSpec::from_doc(doc)?)),
            Some(ValueKind::Frame) => Ok(AnySpec::Frame(FrameSpec::from_doc(doc)?)),
            None => Err(syntax("an expression of any kind", doc)),
        }
    }

    pub fn to_doc(&self) -> Value {
        match self {
            AnySpec::Scalar(s) => s.to_doc(),
            AnySpec::Vector(v) => v.to_doc(),
            AnySpec::Rotation(r) => r.to_doc(),
            AnySpec::Frame(f) => f.to_doc(),
        }
    }
}

impl ControllableConstraint {
    /// Decodes `{controllable-constraint: [lower, upper, weight, index, name]}`.
    pub fn from_doc(doc: &Value) -> Result<Self, Error> {
        let Some(("controllable-constraint", inner)) = tagged(doc) else {
            return Err(syntax("a controllable constraint", doc));
        };
        let [lower, upper, weight, index, name] =
            fixed(inner, "five controllable-constraint fields")?;
        Ok(ControllableConstraint {
            lower: ScalarSpec::from_doc(lower)?,
            upper: ScalarSpec::from_doc(upper)?,
            weight: ScalarSpec::from_doc(weight)?,
            input_index: index
                .as_u64()
                .ok_or_else(|| syntax("a non-negative input index", index))?
                as usize,
            name: name
                .as_str()
                .ok_or_else(|| syntax("a constraint name", name))?
                .to_owned(),
        })
    }

    pub fn to_doc(&self) -> Value {
        tag_seq(
            "controllable-constraint",
            [
                self.lower.to_doc(),
                self.upper.to_doc(),
                self.weight.to_doc(),
                Value::from(self.input_index as u64),
                Value::String(self.name.clone()),
            ],
        )
    }
}

impl SoftConstraint {
    /// Decodes `{soft-constraint: [lower, upper, weight, expression, name]}`.
    pub fn from_doc(doc: &Value) -> Result<Self, Error> {
        let Some(("soft-constraint", inner)) = tagged(doc) else {
            return Err(syntax("a soft constraint", doc));
        };
        let [lower, upper, weight, expression, name] =
            fixed(inner, "five soft-constraint fields")?;
        Ok(SoftConstraint {
            lower: ScalarSpec::from_doc(lower)?,
            upper: ScalarSpec::from_doc(upper)?,
            weight: ScalarSpec::from_doc(weight)?,
            expression: ScalarSpec::from_doc(expression)?,
            name: name
                .as_str()
                .ok_or_else(|| syntax("a constraint name", name))?
                .to_owned(),
        })
    }

    pub fn to_doc(&self) -> Value {
        tag_seq(
            "soft-constraint",
            [
                self.lower.to_doc(),
                self.upper.to_doc(),
                self.weight.to_doc(),
                self.expression.to_doc(),
                Value::String(self.name.clone()),
            ],
        )
    }
}

impl HardConstraint {
    /// Decodes `{hard-constraint: [lower, upper, expression]}`.
    pub fn from_doc(doc: &Value) -> Result<Self, Error> {
        let Some(("hard-constraint", inner)) = tagged(doc) else {
            return Err(syntax("a hard constraint", doc));
        };
        let [lower, upper, expression] = fixed(inner, "three hard-constraint fields")?;
        Ok(HardConstraint {
            lower: ScalarSpec::from_doc(lower)?,
            upper: ScalarSpec::from_doc(upper)?,
            expression: ScalarSpec::from_doc(expression)?,
        })
    }

    pub fn to_doc(&self) -> Value {
        tag_seq(
            "hard-constraint",
            [
                self.lower.to_doc(),
                self.upper.to_doc(),
                self.expression.to_doc(),
            ],
        )
    }
}

/// Decode a scope document: a sequence of single-entry `{name: spec}`
/// mappings, in binding order.
pub fn scope_from_doc(doc: &Value) -> Result<ScopeSpec, Error> {
    let entries = sequence(doc, "a sequence of scope bindings")?;
    entries
        .iter()
        .map(|entry| {
            let map = entry
                .as_mapping()
                .filter(|m| m.len() == 1)
                .ok_or_else(|| syntax("a single-entry binding mapping", entry))?;
            let (name, spec) = map.iter().next().expect("len checked");
            let name = name
                .as_str()
                .ok_or_else(|| syntax("a binding name", name))?
                .to_owned();
            Ok(ScopeEntry {
                name,
                spec: AnySpec::from_doc(spec)?,
            })
        })
        .collect()
}

pub fn scope_to_doc(scope: &ScopeSpec) -> Value {
    Value::Sequence(
        scope
            .iter()
            .map(|entry| tag(&entry.name, entry.spec.to_doc()))
            .collect(),
    )
}

impl ControllerSpec {
    /// Decode a controller document: a mapping with the four keys `scope`,
    /// `controllable-constraints`, `soft-constraints`, `hard-constraints`.
    pub fn from_doc(doc: &Value) -> Result<Self, Error> {
        let map = doc
            .as_mapping()
            .ok_or_else(|| syntax("a controller mapping", doc))?;
        let field = |key: &str, what: &'static str| -> Result<&Value, Error> {
            map.get(key).ok_or_else(|| syntax(what, doc))
        };
        let scope = scope_from_doc(field("scope", "a 'scope' key")?)?;
        let controllables = sequence(
            field("controllable-constraints", "a 'controllable-constraints' key")?,
            "a sequence of controllable constraints",
        )?
        .iter()
        .map(ControllableConstraint::from_doc)
        .collect::<Result<_, _>>()?;
        let softs = sequence(
            field("soft-constraints", "a 'soft-constraints' key")?,
            "a sequence of soft constraints",
        )?
        .iter()
        .map(SoftConstraint::from_doc)
        .collect::<Result<_, _>>()?;
        let hards = sequence(
            field("hard-constraints", "a 'hard-constraints' key")?,
            "a sequence of hard constraints",
        )?
        .iter()
        .map(HardConstraint::from_doc)
        .collect::<Result<_, _>>()?;
        Ok(ControllerSpec {
            scope,
            controllable_constraints: controllables,
            soft_constraints: softs,
            hard_constraints: hards,
        })
    }

    pub fn to_doc(&self) -> Value {
        let mut map = Mapping::new();
        map.insert("scope".into(), scope_to_doc(&self.scope));
        map.insert(
            "controllable-constraints".into(),
            Value::Sequence(
                self.controllable_constraints
                    .iter()
                    .map(ControllableConstraint::to_doc)
                    .collect(),
            ),
        );
        map.insert(
            "soft-constraints".into(),
            Value::Sequence(self.soft_constraints.iter().map(SoftConstraint::to_doc).collect()),
        );
        map.insert(
            "hard-constraints".into(),
            Value::Sequence(self.hard_constraints.iter().map(HardConstraint::to_doc).collect()),
        );
        Value::Mapping(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;

    fn load(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn bare_number_is_a_constant() {
        let spec = ScalarSpec::from_doc(&load("1.1")).unwrap();
        assert_eq!(spec, ScalarSpec::Const(1.1));
    }

    #[test]
    fn bare_string_is_a_reference() {
        let spec = ScalarSpec::from_doc(&load("trans_error")).unwrap();
        assert_eq!(spec, ScalarSpec::Reference("trans_error".into()));
    }

    #[test]
    fn input_var_decodes_its_slot() {
        let spec = ScalarSpec::from_doc(&load("{input-var: 2}")).unwrap();
        assert_eq!(spec, ScalarSpec::Input(2));
        assert!(ScalarSpec::from_doc(&load("{input-var: -1}")).is_err());
    }

    #[test]
    fn vector_tag_in_scalar_position_is_a_kind_mismatch() {
        let err = ScalarSpec::from_doc(&load("{double-mul: [-1, {vector3: [1, 2, 3]}]}"))
            .unwrap_err();
        assert!(matches!(err, Error::KindMismatch { .. }));
    }

    #[test]
    fn unknown_tag_is_a_syntax_error() {
        let err = ScalarSpec::from_doc(&load("{double-cube: 2.0}")).unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
    }

    #[test]
    fn division_requires_two_operands() {
        assert!(ScalarSpec::from_doc(&load("{double-div: [1.0]}")).is_err());
        assert!(ScalarSpec::from_doc(&load("{double-div: [1.0, 2.0, 3.0]}")).is_err());
    }

    #[test]
    fn quaternion_components_must_be_numbers() {
        let spec =
            RotationSpec::from_doc(&load("{quaternion: [0.70710678118, 0.0, -0.70710678118, 0.0]}"))
                .unwrap();
        assert_eq!(spec, RotationSpec::Quaternion(0.70710678118, 0.0, -0.70710678118, 0.0));
        assert!(RotationSpec::from_doc(&load("{quaternion: [a, 0, 0, 1]}")).is_err());
    }

    #[test]
    fn nested_specs_round_trip() {
        let doc = load("{axis-angle: [{vector3: [1.0, 0.0, 0.0]}, {input-var: 3}]}");
        let spec = RotationSpec::from_doc(&doc).unwrap();
        let reparsed = RotationSpec::from_doc(&spec.to_doc()).unwrap();
        assert_eq!(spec, reparsed);
    }

    #[test]
    fn every_scalar_variant_round_trips() {
        let text = "{double-add: [1.5, {double-sub: [x, {double-neg: y}]}, \
                     {double-mul: []}, {double-div: [{min: [1, 2]}, {max: [3, 4]}]}, \
                     {abs: {sin: {cos: {tan: {asin: {acos: 0.5}}}}}}, \
                     {atan2: [{input-var: 0}, {fmod: [5.0, 3.0]}]}, \
                     {x-of: v}, {y-of: v}, {z-of: v}, {norm-of: v}, \
                     {dot: [v, {cross: [v, w]}]}]}";
        let spec = ScalarSpec::from_doc(&load(text)).unwrap();
        assert_eq!(ScalarSpec::from_doc(&spec.to_doc()).unwrap(), spec);
    }

    #[test]
    fn every_vector_variant_round_trips() {
        let text = "{vector-add: [{vector3: [1, 2, 3]}, {vector-sub: [v, w]}, \
                     {scale-vector: [2.0, v]}, {rot-vector: r}, \
                     {origin-of: f}, {rotate-vector: [r, v]}]}";
        let spec = VectorSpec::from_doc(&load(text)).unwrap();
        assert_eq!(VectorSpec::from_doc(&spec.to_doc()).unwrap(), spec);
    }

    #[test]
    fn every_frame_variant_round_trips() {
        let text = "{frame-mul: [{frame: [{rotation-mul: [r, {inverse-rotation: \
                     {orientation-of: f}}]}, {vector3: [0, 0, 1]}]}, {inverse-frame: f}, g]}";
        let spec = FrameSpec::from_doc(&load(text)).unwrap();
        assert_eq!(FrameSpec::from_doc(&spec.to_doc()).unwrap(), spec);
    }

    #[test]
    fn controllable_constraint_decodes_exactly() {
        let doc = load("controllable-constraint: [-0.1, 0.2, 5.0, 2, my name]");
        let spec = ControllableConstraint::from_doc(&doc).unwrap();
        assert_eq!(spec.lower, ScalarSpec::Const(-0.1));
        assert_eq!(spec.upper, ScalarSpec::Const(0.2));
        assert_eq!(spec.weight, ScalarSpec::Const(5.0));
        assert_eq!(spec.input_index, 2);
        assert_eq!(spec.name, "my name");
        assert_eq!(ControllableConstraint::from_doc(&spec.to_doc()).unwrap(), spec);
    }

    #[test]
    fn soft_and_hard_constraints_decode() {
        let soft = SoftConstraint::from_doc(&load(
            "{soft-constraint: [-10.1, 120.2, 5.0, 1.1, some name]}",
        ))
        .unwrap();
        assert_eq!(soft.expression, ScalarSpec::Const(1.1));
        assert_eq!(soft.name, "some name");
        assert_eq!(SoftConstraint::from_doc(&soft.to_doc()).unwrap(), soft);

        let hard = HardConstraint::from_doc(&load("{hard-constraint: [-10.1, 120.2, 1.1]}")).unwrap();
        assert_eq!(hard.lower, ScalarSpec::Const(-10.1));
        assert_eq!(HardConstraint::from_doc(&hard.to_doc()).unwrap(), hard);
    }

    #[test]
    fn controller_document_round_trips() {
        let text = "scope: [{v: {vector3: [0, 0, 1]}}]\n\
                    controllable-constraints: [{controllable-constraint: [-0.1, 0.2, 5.0, 2, controllable1]}]\n\
                    soft-constraints: [{soft-constraint: [-10.1, 120.2, 5.0, 1.1, goal1]}]\n\
                    hard-constraints: [{hard-constraint: [-33.1, 110.3, 17.1]}]";
        let spec = ControllerSpec::from_doc(&load(text)).unwrap();
        assert_eq!(spec.scope.len(), 1);
        assert_eq!(spec.controllable_constraints.len(), 1);
        assert_eq!(spec.soft_constraints.len(), 1);
        assert_eq!(spec.hard_constraints.len(), 1);
        assert_eq!(ControllerSpec::from_doc(&spec.to_doc()).unwrap(), spec);
    }

    #[test]
    fn controller_document_requires_all_sections() {
        let text = "scope: []\ncontrollable-constraints: []\nsoft-constraints: []";
        assert!(ControllerSpec::from_doc(&load(text)).is_err());
    }

    #[test]
    fn scope_binding_order_is_preserved() {
        let doc = load("[{a: 1.0}, {b: {double-add: [a, 2.0]}}, {v: {vector3: [a, b, 0]}}]");
        let scope = scope_from_doc(&doc).unwrap();
        let names: Vec<_> = scope.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "v"]);
        let reparsed = scope_from_doc(&scope_to_doc(&scope)).unwrap();
        assert_eq!(reparsed, scope);
    }
}
