/*! Differentiable expression graphs over scalars, vectors, rotations, and
frames.

The graph is [arena allocated](https://en.wikipedia.org/wiki/Region-based_memory_management):
one node pool per value kind, with lightweight copyable ids as handles. Nodes
are appended children-first, so pool order doubles as a topological order and
a single linear sweep evaluates the whole DAG — every shared node exactly once
per input assignment.

Derivatives are propagated forward alongside values. Each node carries one
derivative slot per input: scalars differentiate to scalars, vectors to
vectors, rotations to angular velocities (`Ṙ = ω̂ R`), and frames to
[Twist]s. All caches are flat `Vec`s sized when generation finishes, so the
steady state allocates nothing. */

use crate::errors::{Error, EvalError};
use crate::rigid::{left_jacobian, left_jacobian_inv, rotation_vector, Frame, Twist};
use nalgebra::{Rotation3, Vector3};

/// Handle of a scalar-valued node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalarId(pub(crate) usize);

/// Handle of a vector-valued node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorId(pub(crate) usize);

/// Handle of a rotation-valued node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationId(pub(crate) usize);

/// Handle of a frame-valued node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameId(pub(crate) usize);

#[derive(Debug, Clone)]
pub(crate) enum ScalarOp {
    Const(f64),
    Input(usize),
    Neg(ScalarId),
    Add(Vec<ScalarId>),
    Sub(Vec<ScalarId>),
    Mul(Vec<ScalarId>),
    Div(ScalarId, ScalarId),
    XOf(VectorId),
    YOf(VectorId),
    ZOf(VectorId),
    Norm(VectorId),
    Dot(VectorId, VectorId),
    Min(ScalarId, ScalarId),
    Max(ScalarId, ScalarId),
    Abs(ScalarId),
    Sin(ScalarId),
    Cos(ScalarId),
    Tan(ScalarId),
    Asin(ScalarId),
    Acos(ScalarId),
    Atan2(ScalarId, ScalarId),
    Fmod(ScalarId, ScalarId),
}

#[derive(Debug, Clone)]
pub(crate) enum VectorOp {
    Construct(ScalarId, ScalarId, ScalarId),
    Add(Vec<VectorId>),
    Sub(Vec<VectorId>),
    Scale(ScalarId, VectorId),
    Cross(VectorId, VectorId),
    RotationVector(RotationId),
    OriginOf(FrameId),
    Rotate(RotationId, VectorId),
}

#[derive(Debug, Clone)]
pub(crate) enum RotationOp {
    AxisAngle(VectorId, ScalarId),
    /// Normalized at generation time; a zero quaternion never gets this far.
    Quaternion(Rotation3<f64>),
    Mul(Vec<RotationId>),
    Inverse(RotationId),
    OrientationOf(FrameId),
}

#[derive(Debug, Clone)]
pub(crate) enum FrameOp {
    Construct(RotationId, VectorId),
    Mul(Vec<FrameId>),
    Inverse(FrameId),
}

#[derive(Debug, Clone, Copy)]
enum NodeRef {
    Scalar(usize),
    Vector(usize),
    Rotation(usize),
    Frame(usize),
}

/// Node pools plus the interleaved evaluation order.
#[derive(Debug, Default)]
struct Nodes {
    scalars: Vec<ScalarOp>,
    vectors: Vec<VectorOp>,
    rotations: Vec<RotationOp>,
    frames: Vec<FrameOp>,
    order: Vec<NodeRef>,
}

/// Flat value and derivative storage, one derivative row of length `n` per
/// node (the same layout the column-major Jacobian of a kinematic tree uses).
#[derive(Debug, Default)]
struct Caches {
    n: usize,
    inputs: Vec<f64>,
    sval: Vec<f64>,
    sder: Vec<f64>,
    vval: Vec<Vector3<f64>>,
    vder: Vec<Vector3<f64>>,
    rval: Vec<Rotation3<f64>>,
    rder: Vec<Vector3<f64>>,
    fval: Vec<Frame>,
    fder: Vec<Twist>,
}

/// A differentiable expression DAG with shared sub-expressions.
///
/// Built by the generator (see [crate::scope]), evaluated with
/// [ExprGraph::set_inputs], and read back through the typed accessors. A graph
/// is owned by exactly one [crate::Scope] or controller; between
/// `set_inputs` and the dependent reads nothing else may touch it.
#[derive(Debug, Default)]
pub struct ExprGraph {
    nodes: Nodes,
    caches: Caches,
    max_input: Option<usize>,
    finished: bool,
}

impl ExprGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_scalar(&mut self, op: ScalarOp) -> ScalarId {
        debug_assert!(!self.finished);
        if let ScalarOp::Input(i) = op {
            self.max_input = Some(self.max_input.map_or(i, |m| m.max(i)));
        }
        let id = ScalarId(self.nodes.scalars.len());
        self.nodes.scalars.push(op);
        self.nodes.order.push(NodeRef::Scalar(id.0));
        id
    }

    pub(crate) fn add_vector(&mut self, op: VectorOp) -> VectorId {
        debug_assert!(!self.finished);
        let id = VectorId(self.nodes.vectors.len());
        self.nodes.vectors.push(op);
        self.nodes.order.push(NodeRef::Vector(id.0));
        id
    }

    pub(crate) fn add_rotation(&mut self, op: RotationOp) -> RotationId {
        debug_assert!(!self.finished);
        let id = RotationId(self.nodes.rotations.len());
        self.nodes.rotations.push(op);
        self.nodes.order.push(NodeRef::Rotation(id.0));
        id
    }

    pub(crate) fn add_frame(&mut self, op: FrameOp) -> FrameId {
        debug_assert!(!self.finished);
        let id = FrameId(self.nodes.frames.len());
        self.nodes.frames.push(op);
        self.nodes.order.push(NodeRef::Frame(id.0));
        id
    }

    /// Freeze the graph and size all caches. `min_arity` lets the controller
    /// widen the input vector beyond what the expressions reference, so that
    /// every controllable owns a derivative slot.
    pub(crate) fn finish(&mut self, min_arity: usize) {
        let n = self.max_input.map_or(0, |m| m + 1).max(min_arity);
        let c = &mut self.caches;
        c.n = n;
        c.inputs = vec![0.0; n];
        c.sval = vec![0.0; self.nodes.scalars.len()];
        c.sder = vec![0.0; self.nodes.scalars.len() * n];
        c.vval = vec![Vector3::zeros(); self.nodes.vectors.len()];
        c.vder = vec![Vector3::zeros(); self.nodes.vectors.len() * n];
        c.rval = vec![Rotation3::identity(); self.nodes.rotations.len()];
        c.rder = vec![Vector3::zeros(); self.nodes.rotations.len() * n];
        c.fval = vec![Frame::identity(); self.nodes.frames.len()];
        c.fder = vec![Twist::zero(); self.nodes.frames.len() * n];
        self.finished = true;
    }

    /// Number of derivative slots, uniform across the graph.
    pub fn arity(&self) -> usize {
        self.caches.n
    }

    /// Install the current input vector and evaluate every node's value and
    /// derivative row. `v` may be longer than [ExprGraph::arity]; the excess
    /// entries are ignored.
    pub fn set_inputs(&mut self, v: &[f64]) -> Result<(), Error> {
        debug_assert!(self.finished);
        let c = &mut self.caches;
        if v.len() < c.n {
            return Err(Error::Dimension {
                expected: c.n,
                found: v.len(),
            });
        }
        c.inputs.copy_from_slice(&v[..c.n]);
        for nref in &self.nodes.order {
            match *nref {
                NodeRef::Scalar(k) => c.step_scalar(&self.nodes.scalars[k], k)?,
                NodeRef::Vector(k) => c.step_vector(&self.nodes.vectors[k], k),
                NodeRef::Rotation(k) => c.step_rotation(&self.nodes.rotations[k], k),
                NodeRef::Frame(k) => c.step_frame(&self.nodes.frames[k], k),
            }
        }
        Ok(())
    }

    pub fn scalar_value(&self, id: ScalarId) -> f64 {
        self.caches.sval[id.0]
    }

    /// ∂value/∂input[i] under the inputs installed last. Slots beyond the
    /// arity are zero by definition.
    pub fn scalar_partial(&self, id: ScalarId, i: usize) -> f64 {
        if i < self.caches.n {
            self.caches.sder[id.0 * self.caches.n + i]
        } else {
            0.0
        }
    }

    pub fn vector_value(&self, id: VectorId) -> Vector3<f64> {
        self.caches.vval[id.0]
    }

    pub fn vector_partial(&self, id: VectorId, i: usize) -> Vector3<f64> {
        if i < self.caches.n {
            self.caches.vder[id.0 * self.caches.n + i]
        } else {
            Vector3::zeros()
        }
    }

    pub fn rotation_value(&self, id: RotationId) -> Rotation3<f64> {
        self.caches.rval[id.0]
    }

    /// Angular-velocity derivative: `∂R/∂input[i] = ω̂ R` for the returned ω.
    pub fn rotation_partial(&self, id: RotationId, i: usize) -> Vector3<f64> {
        if i < self.caches.n {
            self.caches.rder[id.0 * self.caches.n + i]
        } else {
            Vector3::zeros()
        }
    }

    pub fn frame_value(&self, id: FrameId) -> Frame {
        self.caches.fval[id.0]
    }

    pub fn frame_partial(&self, id: FrameId, i: usize) -> Twist {
        if i < self.caches.n {
            self.caches.fder[id.0 * self.caches.n + i]
        } else {
            Twist::zero()
        }
    }
}

impl Caches {
    fn step_scalar(&mut self, op: &ScalarOp, k: usize) -> Result<(), EvalError> {
        let n = self.n;
        let dst = k * n;
        match op {
            ScalarOp::Const(c) => {
                self.sval[k] = *c;
                self.sder[dst..dst + n].fill(0.0);
            }
            ScalarOp::Input(idx) => {
                self.sval[k] = self.inputs[*idx];
                self.sder[dst..dst + n].fill(0.0);
                self.sder[dst + *idx] = 1.0;
            }
            ScalarOp::Neg(a) => {
                self.sval[k] = -self.sval[a.0];
                for i in 0..n {
                    self.sder[dst + i] = -self.sder[a.0 * n + i];
                }
            }
            ScalarOp::Add(args) => {
                self.sval[k] = args.iter().map(|a| self.sval[a.0]).sum();
                for i in 0..n {
                    self.sder[dst + i] = args.iter().map(|a| self.sder[a.0 * n + i]).sum();
                }
            }
            ScalarOp::Sub(args) => {
                // A single operand negates, like the original operator set.
                let (first, rest) = args.split_first().expect("checked at generation");
                if rest.is_empty() {
                    self.sval[k] = -self.sval[first.0];
                    for i in 0..n {
                        self.sder[dst + i] = -self.sder[first.0 * n + i];
                    }
                } else {
                    self.sval[k] = self.sval[first.0]
                        - rest.iter().map(|a| self.sval[a.0]).sum::<f64>();
                    for i in 0..n {
                        self.sder[dst + i] = self.sder[first.0 * n + i]
                            - rest.iter().map(|a| self.sder[a.0 * n + i]).sum::<f64>();
                    }
                }
            }
            ScalarOp::Mul(args) => {
                self.sval[k] = 1.0;
                self.sder[dst..dst + n].fill(0.0);
                for a in args {
                    for i in 0..n {
                        self.sder[dst + i] = self.sder[dst + i] * self.sval[a.0]
                            + self.sval[k] * self.sder[a.0 * n + i];
                    }
                    self.sval[k] *= self.sval[a.0];
                }
            }
            ScalarOp::Div(a, b) => {
                let den = self.sval[b.0];
                if den == 0.0 {
                    return Err(EvalError::DivisionByZero);
                }
                let num = self.sval[a.0];
                self.sval[k] = num / den;
                for i in 0..n {
                    self.sder[dst + i] =
                        self.sder[a.0 * n + i] / den - num / (den * den) * self.sder[b.0 * n + i];
                }
            }
            ScalarOp::XOf(v) => {
                self.sval[k] = self.vval[v.0].x;
                for i in 0..n {
                    self.sder[dst + i] = self.vder[v.0 * n + i].x;
                }
            }
            ScalarOp::YOf(v) => {
                self.sval[k] = self.vval[v.0].y;
                for i in 0..n {
                    self.sder[dst + i] = self.vder[v.0 * n + i].y;
                }
            }
            ScalarOp::ZOf(v) => {
                self.sval[k] = self.vval[v.0].z;
                for i in 0..n {
                    self.sder[dst + i] = self.vder[v.0 * n + i].z;
                }
            }
            ScalarOp::Norm(v) => {
                let val = self.vval[v.0];
                let norm = val.norm();
                self.sval[k] = norm;
                for i in 0..n {
                    // Subgradient 0 at the crease.
                    self.sder[dst + i] = if norm == 0.0 {
                        0.0
                    } else {
                        val.dot(&self.vder[v.0 * n + i]) / norm
                    };
                }
            }
            ScalarOp::Dot(a, b) => {
                let (va, vb) = (self.vval[a.0], self.vval[b.0]);
                self.sval[k] = va.dot(&vb);
                for i in 0..n {
                    self.sder[dst + i] =
                        self.vder[a.0 * n + i].dot(&vb) + va.dot(&self.vder[b.0 * n + i]);
                }
            }
            ScalarOp::Min(a, b) => {
                // Ties pick the earlier argument's derivative.
                let pick = if self.sval[a.0] <= self.sval[b.0] { a } else { b };
                self.sval[k] = self.sval[pick.0];
                for i in 0..n {
                    self.sder[dst + i] = self.sder[pick.0 * n + i];
                }
            }
            ScalarOp::Max(a, b) => {
                let pick = if self.sval[a.0] >= self.sval[b.0] { a } else { b };
                self.sval[k] = self.sval[pick.0];
                for i in 0..n {
                    self.sder[dst + i] = self.sder[pick.0 * n + i];
                }
            }
            ScalarOp::Abs(a) => {
                let v = self.sval[a.0];
                self.sval[k] = v.abs();
                let sign = if v > 0.0 {
                    1.0
                } else if v < 0.0 {
                    -1.0
                } else {
                    0.0
                };
                for i in 0..n {
                    self.sder[dst + i] = sign * self.sder[a.0 * n + i];
                }
            }
            ScalarOp::Sin(a) => {
                let v = self.sval[a.0];
                self.sval[k] = v.sin();
                let g = v.cos();
                for i in 0..n {
                    self.sder[dst + i] = g * self.sder[a.0 * n + i];
                }
            }
            ScalarOp::Cos(a) => {
                let v = self.sval[a.0];
                self.sval[k] = v.cos();
                let g = -v.sin();
                for i in 0..n {
                    self.sder[dst + i] = g * self.sder[a.0 * n + i];
                }
            }
            ScalarOp::Tan(a) => {
                let v = self.sval[a.0];
                self.sval[k] = v.tan();
                let c = v.cos();
                let g = 1.0 / (c * c);
                for i in 0..n {
                    self.sder[dst + i] = g * self.sder[a.0 * n + i];
                }
            }
            ScalarOp::Asin(a) => {
                let v = self.sval[a.0];
                if v.abs() > 1.0 {
                    return Err(EvalError::AsinDomain(v));
                }
                self.sval[k] = v.asin();
                let g = 1.0 / (1.0 - v * v).sqrt();
                for i in 0..n {
                    self.sder[dst + i] = g * self.sder[a.0 * n + i];
                }
            }
            ScalarOp::Acos(a) => {
                let v = self.sval[a.0];
                if v.abs() > 1.0 {
                    return Err(EvalError::AcosDomain(v));
                }
                self.sval[k] = v.acos();
                let g = -1.0 / (1.0 - v * v).sqrt();
                for i in 0..n {
                    self.sder[dst + i] = g * self.sder[a.0 * n + i];
                }
            }
            ScalarOp::Atan2(y, x) => {
                let (vy, vx) = (self.sval[y.0], self.sval[x.0]);
                self.sval[k] = vy.atan2(vx);
                let den = vx * vx + vy * vy;
                for i in 0..n {
                    self.sder[dst + i] = if den == 0.0 {
                        0.0
                    } else {
                        (vx * self.sder[y.0 * n + i] - vy * self.sder[x.0 * n + i]) / den
                    };
                }
            }
            ScalarOp::Fmod(a, b) => {
                let (va, vb) = (self.sval[a.0], self.sval[b.0]);
                if vb == 0.0 {
                    return Err(EvalError::FmodZeroDivisor);
                }
                let q = (va / vb).floor();
                self.sval[k] = va - vb * q;
                for i in 0..n {
                    self.sder[dst + i] = self.sder[a.0 * n + i] - q * self.sder[b.0 * n + i];
                }
            }
        }
        Ok(())
    }

    fn step_vector(&mut self, op: &VectorOp, k: usize) {
        let n = self.n;
        let dst = k * n;
        match op {
            VectorOp::Construct(x, y, z) => {
                self.vval[k] = Vector3::new(self.sval[x.0], self.sval[y.0], self.sval[z.0]);
                for i in 0..n {
                    self.vder[dst + i] = Vector3::new(
                        self.sder[x.0 * n + i],
                        self.sder[y.0 * n + i],
                        self.sder[z.0 * n + i],
                    );
                }
            }
            VectorOp::Add(args) => {
                self.vval[k] = args.iter().fold(Vector3::zeros(), |acc, a| acc + self.vval[a.0]);
                for i in 0..n {
                    self.vder[dst + i] = args
                        .iter()
                        .fold(Vector3::zeros(), |acc, a| acc + self.vder[a.0 * n + i]);
                }
            }
            VectorOp::Sub(args) => {
                let (first, rest) = args.split_first().expect("checked at generation");
                if rest.is_empty() {
                    self.vval[k] = -self.vval[first.0];
                    for i in 0..n {
                        self.vder[dst + i] = -self.vder[first.0 * n + i];
                    }
                } else {
                    self.vval[k] = rest
                        .iter()
                        .fold(self.vval[first.0], |acc, a| acc - self.vval[a.0]);
                    for i in 0..n {
                        self.vder[dst + i] = rest
                            .iter()
                            .fold(self.vder[first.0 * n + i], |acc, a| acc - self.vder[a.0 * n + i]);
                    }
                }
            }
            VectorOp::Scale(s, v) => {
                let (sv, vv) = (self.sval[s.0], self.vval[v.0]);
                self.vval[k] = sv * vv;
                for i in 0..n {
                    self.vder[dst + i] = self.sder[s.0 * n + i] * vv + sv * self.vder[v.0 * n + i];
                }
            }
            VectorOp::Cross(a, b) => {
                let (va, vb) = (self.vval[a.0], self.vval[b.0]);
                self.vval[k] = va.cross(&vb);
                for i in 0..n {
                    self.vder[dst + i] =
                        self.vder[a.0 * n + i].cross(&vb) + va.cross(&self.vder[b.0 * n + i]);
                }
            }
            VectorOp::RotationVector(r) => {
                let rv = rotation_vector(&self.rval[r.0]);
                self.vval[k] = rv;
                let jinv = left_jacobian_inv(&rv);
                for i in 0..n {
                    self.vder[dst + i] = jinv * self.rder[r.0 * n + i];
                }
            }
            VectorOp::OriginOf(f) => {
                self.vval[k] = self.fval[f.0].trans;
                for i in 0..n {
                    self.vder[dst + i] = self.fder[f.0 * n + i].linear;
                }
            }
            VectorOp::Rotate(r, v) => {
                let rot = self.rval[r.0];
                let rotated = rot * self.vval[v.0];
                self.vval[k] = rotated;
                for i in 0..n {
                    self.vder[dst + i] =
                        self.rder[r.0 * n + i].cross(&rotated) + rot * self.vder[v.0 * n + i];
                }
            }
        }
    }

    fn step_rotation(&mut self, op: &RotationOp, k: usize) {
        let n = self.n;
        let dst = k * n;
        match op {
            RotationOp::AxisAngle(axis, angle) => {
                let a = self.vval[axis.0];
                let theta = self.sval[angle.0];
                let norm = a.norm();
                if norm == 0.0 {
                    self.rval[k] = Rotation3::identity();
                    self.rder[dst..dst + n].fill(Vector3::zeros());
                    return;
                }
                let u = a / norm;
                let r = theta * u;
                self.rval[k] = Rotation3::new(r);
                let jac = left_jacobian(&r);
                for i in 0..n {
                    let da = self.vder[axis.0 * n + i];
                    let du = (da - u * u.dot(&da)) / norm;
                    let dr = self.sder[angle.0 * n + i] * u + theta * du;
                    self.rder[dst + i] = jac * dr;
                }
            }
            RotationOp::Quaternion(rot) => {
                self.rval[k] = *rot;
                self.rder[dst..dst + n].fill(Vector3::zeros());
            }
            RotationOp::Mul(args) => {
                self.rval[k] = Rotation3::identity();
                self.rder[dst..dst + n].fill(Vector3::zeros());
                for a in args {
                    let acc = self.rval[k];
                    for i in 0..n {
                        self.rder[dst + i] = self.rder[dst + i] + acc * self.rder[a.0 * n + i];
                    }
                    self.rval[k] = acc * self.rval[a.0];
                }
            }
            RotationOp::Inverse(r) => {
                let inv = self.rval[r.0].inverse();
                self.rval[k] = inv;
                for i in 0..n {
                    self.rder[dst + i] = -(inv * self.rder[r.0 * n + i]);
                }
            }
            RotationOp::OrientationOf(f) => {
                self.rval[k] = self.fval[f.0].rot;
                for i in 0..n {
                    self.rder[dst + i] = self.fder[f.0 * n + i].angular;
                }
            }
        }
    }

    fn step_frame(&mut self, op: &FrameOp, k: usize) {
        let n = self.n;
        let dst = k * n;
        match op {
            FrameOp::Construct(r, t) => {
                self.fval[k] = Frame::new(self.rval[r.0], self.vval[t.0]);
                for i in 0..n {
                    self.fder[dst + i] = Twist {
                        linear: self.vder[t.0 * n + i],
                        angular: self.rder[r.0 * n + i],
                    };
                }
            }
            FrameOp::Mul(args) => {
                self.fval[k] = Frame::identity();
                self.fder[dst..dst + n].fill(Twist::zero());
                for a in args {
                    let acc = self.fval[k];
                    let child = self.fval[a.0];
                    for i in 0..n {
                        let d_acc = self.fder[dst + i];
                        let d_child = self.fder[a.0 * n + i];
                        self.fder[dst + i] = Twist {
                            linear: d_acc.linear
                                + d_acc.angular.cross(&(acc.rot * child.trans))
                                + acc.rot * d_child.linear,
                            angular: d_acc.angular + acc.rot * d_child.angular,
                        };
                    }
                    self.fval[k] = acc.compose(&child);
                }
            }
            FrameOp::Inverse(f) => {
                let frame = self.fval[f.0];
                self.fval[k] = frame.inverse();
                let inv_rot = frame.rot.inverse();
                for i in 0..n {
                    let d = self.fder[f.0 * n + i];
                    self.fder[dst + i] = Twist {
                        linear: inv_rot * (d.angular.cross(&frame.trans) - d.linear),
                        angular: -(inv_rot * d.angular),
                    };
                }
            }
        }
    }
}
