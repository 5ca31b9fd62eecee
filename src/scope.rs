/*! Named bindings and the generator that lowers specification trees into
expression graphs.

A scope specification is an ordered list of `(name, spec)` bindings; each
binding may reference the names bound before it. Generation folds the list
into a [Scope]: the spec of every binding is lowered into the shared
[ExprGraph] and its handle is stored under the binding's name. Because a
reference resolves to the handle already in the scope, referenced
sub-expressions are shared, never copied — that is what turns the lowered
trees into a DAG. */

use crate::errors::{Error, EvalError, ValueKind};
use crate::expression::{
    ExprGraph, FrameId, FrameOp, RotationId, RotationOp, ScalarId, ScalarOp, VectorId, VectorOp,
};
use crate::spec::{AnySpec, FrameSpec, RotationSpec, ScalarSpec, ScopeEntry, VectorSpec};
use indexmap::IndexMap;
use nalgebra::{Quaternion, UnitQuaternion};
use tracing::debug;

/// Name → handle tables, one per value kind, plus the insertion order.
#[derive(Debug, Default)]
struct Bindings {
    scalars: IndexMap<String, ScalarId>,
    vectors: IndexMap<String, VectorId>,
    rotations: IndexMap<String, RotationId>,
    frames: IndexMap<String, FrameId>,
    order: Vec<String>,
}

impl Bindings {
    fn kind_of(&self, name: &str) -> Option<ValueKind> {
        if self.scalars.contains_key(name) {
            Some(ValueKind::Scalar)
        } else if self.vectors.contains_key(name) {
            Some(ValueKind::Vector)
        } else if self.rotations.contains_key(name) {
            Some(ValueKind::Rotation)
        } else if self.frames.contains_key(name) {
            Some(ValueKind::Frame)
        } else {
            None
        }
    }

    /// Resolution failure: bound under another kind, or not bound at all.
    fn unresolved(&self, expected: ValueKind, name: &str) -> Error {
        match self.kind_of(name) {
            Some(found) => Error::KindMismatch { expected, found },
            None => Error::UnresolvedReference(name.to_owned()),
        }
    }
}

/// An ordered, name-indexed collection of lowered expressions sharing one
/// graph.
#[derive(Debug, Default)]
pub struct Scope {
    graph: ExprGraph,
    bindings: Bindings,
}

impl Scope {
    /// Generate a scope from its specification, resolving every binding in
    /// order.
    pub fn from_spec(entries: &[ScopeEntry]) -> Result<Self, Error> {
        let mut scope = Scope::build(entries)?;
        scope.graph.finish(0);
        Ok(scope)
    }

    /// Like [Scope::from_spec] but leaves the graph open so a controller can
    /// keep lowering constraint expressions into it.
    pub(crate) fn build(entries: &[ScopeEntry]) -> Result<Self, Error> {
        let mut scope = Scope::default();
        for entry in entries {
            if scope.bindings.kind_of(&entry.name).is_some() {
                return Err(Error::DuplicateBinding(entry.name.clone()));
            }
            let (graph, bindings) = (&mut scope.graph, &scope.bindings);
            match &entry.spec {
                AnySpec::Scalar(s) => {
                    let id = lower_scalar(graph, bindings, s)?;
                    scope.bindings.scalars.insert(entry.name.clone(), id);
                }
                AnySpec::Vector(v) => {
                    let id = lower_vector(graph, bindings, v)?;
                    scope.bindings.vectors.insert(entry.name.clone(), id);
                }
                AnySpec::Rotation(r) => {
                    let id = lower_rotation(graph, bindings, r)?;
                    scope.bindings.rotations.insert(entry.name.clone(), id);
                }
                AnySpec::Frame(f) => {
                    let id = lower_frame(graph, bindings, f)?;
                    scope.bindings.frames.insert(entry.name.clone(), id);
                }
            }
            scope.bindings.order.push(entry.name.clone());
        }
        debug!(bindings = scope.bindings.order.len(), "generated scope");
        Ok(scope)
    }

    pub(crate) fn lower_scalar_spec(&mut self, spec: &ScalarSpec) -> Result<ScalarId, Error> {
        lower_scalar(&mut self.graph, &self.bindings, spec)
    }

    pub(crate) fn finish_graph(&mut self, min_arity: usize) {
        self.graph.finish(min_arity);
    }

    pub fn has_scalar_expression(&self, name: &str) -> bool {
        self.bindings.scalars.contains_key(name)
    }

    pub fn find_scalar_expression(&self, name: &str) -> Option<ScalarId> {
        self.bindings.scalars.get(name).copied()
    }

    pub fn has_vector_expression(&self, name: &str) -> bool {
        self.bindings.vectors.contains_key(name)
    }

    pub fn find_vector_expression(&self, name: &str) -> Option<VectorId> {
        self.bindings.vectors.get(name).copied()
    }

    pub fn has_rotation_expression(&self, name: &str) -> bool {
        self.bindings.rotations.contains_key(name)
    }

    pub fn find_rotation_expression(&self, name: &str) -> Option<RotationId> {
        self.bindings.rotations.get(name).copied()
    }

    pub fn has_frame_expression(&self, name: &str) -> bool {
        self.bindings.frames.contains_key(name)
    }

    pub fn find_frame_expression(&self, name: &str) -> Option<FrameId> {
        self.bindings.frames.get(name).copied()
    }

    /// Binding names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.order.iter().map(String::as_str)
    }

    pub fn graph(&self) -> &ExprGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut ExprGraph {
        &mut self.graph
    }
}

fn lower_list<T, I>(
    graph: &mut ExprGraph,
    bindings: &Bindings,
    items: &[T],
    min: usize,
    mut lower: impl FnMut(&mut ExprGraph, &Bindings, &T) -> Result<I, Error>,
) -> Result<Vec<I>, Error> {
    if items.len() < min {
        return Err(Error::Syntax {
            expected: "at least one operand",
            found: "an empty operand list".into(),
        });
    }
    items.iter().map(|item| lower(graph, bindings, item)).collect()
}

fn lower_scalar(
    graph: &mut ExprGraph,
    bindings: &Bindings,
    spec: &ScalarSpec,
) -> Result<ScalarId, Error> {
    let op = match spec {
        ScalarSpec::Const(v) => ScalarOp::Const(*v),
        ScalarSpec::Input(i) => ScalarOp::Input(*i),
        ScalarSpec::Reference(name) => {
            return bindings
                .scalars
                .get(name)
                .copied()
                .ok_or_else(|| bindings.unresolved(ValueKind::Scalar, name));
        }
        ScalarSpec::Neg(a) => ScalarOp::Neg(lower_scalar(graph, bindings, a)?),
        ScalarSpec::Add(args) => ScalarOp::Add(lower_list(graph, bindings, args, 0, lower_scalar)?),
        ScalarSpec::Sub(args) => ScalarOp::Sub(lower_list(graph, bindings, args, 1, lower_scalar)?),
        ScalarSpec::Mul(args) => ScalarOp::Mul(lower_list(graph, bindings, args, 0, lower_scalar)?),
        ScalarSpec::Div(a, b) => ScalarOp::Div(
            lower_scalar(graph, bindings, a)?,
            lower_scalar(graph, bindings, b)?,
        ),
        ScalarSpec::XOf(v) => ScalarOp::XOf(lower_vector(graph, bindings, v)?),
        ScalarSpec::YOf(v) => ScalarOp::YOf(lower_vector(graph, bindings, v)?),
        ScalarSpec::ZOf(v) => ScalarOp::ZOf(lower_vector(graph, bindings, v)?),
        ScalarSpec::Norm(v) => ScalarOp::Norm(lower_vector(graph, bindings, v)?),
        ScalarSpec::Dot(a, b) => ScalarOp::Dot(
            lower_vector(graph, bindings, a)?,
            lower_vector(graph, bindings, b)?,
        ),
        ScalarSpec::Min(a, b) => ScalarOp::Min(
            lower_scalar(graph, bindings, a)?,
            lower_scalar(graph, bindings, b)?,
        ),
        ScalarSpec::Max(a, b) => ScalarOp::Max(
            lower_scalar(graph, bindings, a)?,
            lower_scalar(graph, bindings, b)?,
        ),
        ScalarSpec::Abs(a) => ScalarOp::Abs(lower_scalar(graph, bindings, a)?),
        ScalarSpec::Sin(a) => ScalarOp::Sin(lower_scalar(graph, bindings, a)?),
        ScalarSpec::Cos(a) => ScalarOp::Cos(lower_scalar(graph, bindings, a)?),
        ScalarSpec::Tan(a) => ScalarOp::Tan(lower_scalar(graph, bindings, a)?),
        ScalarSpec::Asin(a) => ScalarOp::Asin(lower_scalar(graph, bindings, a)?),
        ScalarSpec::Acos(a) => ScalarOp::Acos(lower_scalar(graph, bindings, a)?),
        ScalarSpec::Atan2(a, b) => ScalarOp::Atan2(
            lower_scalar(graph, bindings, a)?,
            lower_scalar(graph, bindings, b)?,
        ),
        ScalarSpec::Fmod(a, b) => ScalarOp::Fmod(
            lower_scalar(graph, bindings, a)?,
            lower_scalar(graph, bindings, b)?,
        ),
    };
    Ok(graph.add_scalar(op))
}

fn lower_vector(
    graph: &mut ExprGraph,
    bindings: &Bindings,
    spec: &VectorSpec,
) -> Result<VectorId, Error> {
    let op = match spec {
        VectorSpec::Construct(x, y, z) => VectorOp::Construct(
            lower_scalar(graph, bindings, x)?,
            lower_scalar(graph, bindings, y)?,
            lower_scalar(graph, bindings, z)?,
        ),
        VectorSpec::Reference(name) => {
            return bindings
                .vectors
                .get(name)
                .copied()
                .ok_or_else(|| bindings.unresolved(ValueKind::Vector, name));
        }
        VectorSpec::Add(args) => VectorOp::Add(lower_list(graph, bindings, args, 0, lower_vector)?),
        VectorSpec::Sub(args) => VectorOp::Sub(lower_list(graph, bindings, args, 1, lower_vector)?),
        VectorSpec::Scale(s, v) => VectorOp::Scale(
            lower_scalar(graph, bindings, s)?,
            lower_vector(graph, bindings, v)?,
        ),
        VectorSpec::Cross(a, b) => VectorOp::Cross(
            lower_vector(graph, bindings, a)?,
            lower_vector(graph, bindings, b)?,
        ),
        VectorSpec::RotationVector(r) => {
            VectorOp::RotationVector(lower_rotation(graph, bindings, r)?)
        }
        VectorSpec::OriginOf(f) => VectorOp::OriginOf(lower_frame(graph, bindings, f)?),
        VectorSpec::Rotate(r, v) => VectorOp::Rotate(
            lower_rotation(graph, bindings, r)?,
            lower_vector(graph, bindings, v)?,
        ),
    };
    Ok(graph.add_vector(op))
}

fn lower_rotation(
    graph: &mut ExprGraph,
    bindings: &Bindings,
    spec: &RotationSpec,
) -> Result<RotationId, Error> {
    let op = match spec {
        RotationSpec::AxisAngle(axis, angle) => RotationOp::AxisAngle(
            lower_vector(graph, bindings, axis)?,
            lower_scalar(graph, bindings, angle)?,
        ),
        RotationSpec::Quaternion(x, y, z, w) => {
            // Components are literals, so a zero norm is always caught here.
            if x * x + y * y + z * z + w * w == 0.0 {
                return Err(EvalError::ZeroQuaternion.into());
            }
            let q = UnitQuaternion::from_quaternion(Quaternion::new(*w, *x, *y, *z));
            RotationOp::Quaternion(q.to_rotation_matrix())
        }
        RotationSpec::Reference(name) => {
            return bindings
                .rotations
                .get(name)
                .copied()
                .ok_or_else(|| bindings.unresolved(ValueKind::Rotation, name));
        }
        RotationSpec::Mul(args) => {
            RotationOp::Mul(lower_list(graph, bindings, args, 0, lower_rotation)?)
        }
        RotationSpec::Inverse(r) => RotationOp::Inverse(lower_rotation(graph, bindings, r)?),
        RotationSpec::OrientationOf(f) => {
            RotationOp::OrientationOf(lower_frame(graph, bindings, f)?)
        }
    };
    Ok(graph.add_rotation(op))
}

fn lower_frame(
    graph: &mut ExprGraph,
    bindings: &Bindings,
    spec: &FrameSpec,
) -> Result<FrameId, Error> {
    let op = match spec {
        FrameSpec::Construct(rot, trans) => FrameOp::Construct(
            lower_rotation(graph, bindings, rot)?,
            lower_vector(graph, bindings, trans)?,
        ),
        FrameSpec::Reference(name) => {
            return bindings
                .frames
                .get(name)
                .copied()
                .ok_or_else(|| bindings.unresolved(ValueKind::Frame, name));
        }
        FrameSpec::Mul(args) => FrameOp::Mul(lower_list(graph, bindings, args, 0, lower_frame)?),
        FrameSpec::Inverse(f) => FrameOp::Inverse(lower_frame(graph, bindings, f)?),
    };
    Ok(graph.add_frame(op))
}
