/*! Typed specification trees.

A specification is a plain algebraic description of how to compute a value:
constants, input slots, named references, constructors, and operators, one
enum per value kind. Specifications are immutable data — lowering them into a
differentiable graph is the generator's job (see [crate::scope]) and decoding
them from document trees is the document layer's job (see [crate::document]).

Structural equality is the derived one: same variant, recursively equal
children, references equal by name. */

use crate::errors::ValueKind;

/// Scalar-valued specification.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarSpec {
    Const(f64),
    /// Slot `i` of the input vector.
    Input(usize),
    Reference(String),
    Neg(Box<ScalarSpec>),
    Add(Vec<ScalarSpec>),
    /// Fold-left subtraction; a single operand negates.
    Sub(Vec<ScalarSpec>),
    Mul(Vec<ScalarSpec>),
    Div(Box<ScalarSpec>, Box<ScalarSpec>),
    XOf(Box<VectorSpec>),
    YOf(Box<VectorSpec>),
    ZOf(Box<VectorSpec>),
    Norm(Box<VectorSpec>),
    Dot(Box<VectorSpec>, Box<VectorSpec>),
    Min(Box<ScalarSpec>, Box<ScalarSpec>),
    Max(Box<ScalarSpec>, Box<ScalarSpec>),
    Abs(Box<ScalarSpec>),
    Sin(Box<ScalarSpec>),
    Cos(Box<ScalarSpec>),
    Tan(Box<ScalarSpec>),
    Asin(Box<ScalarSpec>),
    Acos(Box<ScalarSpec>),
    Atan2(Box<ScalarSpec>, Box<ScalarSpec>),
    Fmod(Box<ScalarSpec>, Box<ScalarSpec>),
}

/// Vector-valued specification.
#[derive(Debug, Clone, PartialEq)]
pub enum VectorSpec {
    Construct(Box<ScalarSpec>, Box<ScalarSpec>, Box<ScalarSpec>),
    Reference(String),
    Add(Vec<VectorSpec>),
    Sub(Vec<VectorSpec>),
    Scale(Box<ScalarSpec>, Box<VectorSpec>),
    Cross(Box<VectorSpec>, Box<VectorSpec>),
    /// Canonical log map of a rotation: axis times angle.
    RotationVector(Box<RotationSpec>),
    OriginOf(Box<FrameSpec>),
    Rotate(Box<RotationSpec>, Box<VectorSpec>),
}

/// Rotation-valued specification.
#[derive(Debug, Clone, PartialEq)]
pub enum RotationSpec {
    AxisAngle(Box<VectorSpec>, Box<ScalarSpec>),
    /// `(x, y, z, w)`, normalized when lowered.
    Quaternion(f64, f64, f64, f64),
    Reference(String),
    /// Left-to-right composition; empty means identity.
    Mul(Vec<RotationSpec>),
    Inverse(Box<RotationSpec>),
    OrientationOf(Box<FrameSpec>),
}

/// Frame-valued specification.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameSpec {
    Construct(Box<RotationSpec>, Box<VectorSpec>),
    Reference(String),
    /// Left-to-right rigid composition; empty means identity.
    Mul(Vec<FrameSpec>),
    Inverse(Box<FrameSpec>),
}

/// A specification of any of the four kinds, as bound in a scope.
#[derive(Debug, Clone, PartialEq)]
pub enum AnySpec {
    Scalar(ScalarSpec),
    Vector(VectorSpec),
    Rotation(RotationSpec),
    Frame(FrameSpec),
}

impl AnySpec {
    pub fn kind(&self) -> ValueKind {
        match self {
            AnySpec::Scalar(_) => ValueKind::Scalar,
            AnySpec::Vector(_) => ValueKind::Vector,
            AnySpec::Rotation(_) => ValueKind::Rotation,
            AnySpec::Frame(_) => ValueKind::Frame,
        }
    }
}

/// One named binding of an ordered scope specification. A binding may
/// reference earlier names, never later ones.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeEntry {
    pub name: String,
    pub spec: AnySpec,
}

/// An ordered scope specification.
pub type ScopeSpec = Vec<ScopeEntry>;

/// Declares input slot `input_index` as a decision variable, box-bounded by
/// `[lower, upper]` per step and penalized by `weight`.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllableConstraint {
    pub lower: ScalarSpec,
    pub upper: ScalarSpec,
    pub weight: ScalarSpec,
    pub input_index: usize,
    /// Diagnostic label only.
    pub name: String,
}

/// Keeps the tracked quantity `expression` inside `[lower, upper]`, with
/// violations penalized by `weight` through a slack variable.
#[derive(Debug, Clone, PartialEq)]
pub struct SoftConstraint {
    pub lower: ScalarSpec,
    pub upper: ScalarSpec,
    pub weight: ScalarSpec,
    pub expression: ScalarSpec,
    pub name: String,
}

/// Keeps the tracked quantity `expression` inside `[lower, upper]` with no
/// slack at all.
#[derive(Debug, Clone, PartialEq)]
pub struct HardConstraint {
    pub lower: ScalarSpec,
    pub upper: ScalarSpec,
    pub expression: ScalarSpec,
}

/// Everything needed to compile a controller: a scope plus the three
/// constraint families.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ControllerSpec {
    pub scope: ScopeSpec,
    pub controllable_constraints: Vec<ControllableConstraint>,
    pub soft_constraints: Vec<SoftConstraint>,
    pub hard_constraints: Vec<HardConstraint>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis_angle_sample() -> RotationSpec {
        RotationSpec::AxisAngle(
            Box::new(VectorSpec::Construct(
                Box::new(ScalarSpec::Const(1.0)),
                Box::new(ScalarSpec::Const(0.0)),
                Box::new(ScalarSpec::Const(0.0)),
            )),
            Box::new(ScalarSpec::Input(3)),
        )
    }

    #[test]
    fn structural_equality_is_recursive() {
        assert_eq!(axis_angle_sample(), axis_angle_sample());
        let other = RotationSpec::AxisAngle(
            Box::new(VectorSpec::Construct(
                Box::new(ScalarSpec::Const(1.0)),
                Box::new(ScalarSpec::Const(0.0)),
                Box::new(ScalarSpec::Const(0.0)),
            )),
            Box::new(ScalarSpec::Input(4)),
        );
        assert_ne!(axis_angle_sample(), other);
    }

    #[test]
    fn references_compare_by_name() {
        assert_eq!(
            ScalarSpec::Reference("goal".into()),
            ScalarSpec::Reference("goal".into())
        );
        assert_ne!(
            ScalarSpec::Reference("goal".into()),
            ScalarSpec::Reference("other".into())
        );
    }

    #[test]
    fn any_spec_reports_its_kind() {
        assert_eq!(AnySpec::Scalar(ScalarSpec::Const(1.0)).kind(), ValueKind::Scalar);
        assert_eq!(AnySpec::Rotation(axis_angle_sample()).kind(), ValueKind::Rotation);
    }
}
