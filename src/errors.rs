//! Provides the error types used throughout this crate.

use std::fmt;
use thiserror::Error;

/// The four value kinds that flow through expression graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Scalar,
    Vector,
    Rotation,
    Frame,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Scalar => write!(f, "scalar"),
            ValueKind::Vector => write!(f, "vector"),
            ValueKind::Rotation => write!(f, "rotation"),
            ValueKind::Frame => write!(f, "frame"),
        }
    }
}

/// Numeric failure raised while evaluating an expression graph.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("fmod with zero divisor")]
    FmodZeroDivisor,
    #[error("asin argument {0} outside [-1, 1]")]
    AsinDomain(f64),
    #[error("acos argument {0} outside [-1, 1]")]
    AcosDomain(f64),
    #[error("quaternion with zero norm")]
    ZeroQuaternion,
}

/// The error type used throughout this crate.
#[derive(Error, Debug)]
pub enum Error {
    // Document decoding
    #[error("cannot decode document node as {expected}: {found}")]
    Syntax { expected: &'static str, found: String },
    #[error("expected a {expected} expression, found a {found} expression")]
    KindMismatch { expected: ValueKind, found: ValueKind },
    // Scope resolution
    #[error("unresolved reference: {0}")]
    UnresolvedReference(String),
    #[error("duplicate binding: {0}")]
    DuplicateBinding(String),
    // Controller compilation
    #[error("controllable '{name}' has invalid input index {index}: {reason}")]
    InputIndex {
        name: String,
        index: usize,
        reason: &'static str,
    },
    #[error("input vector has length {found}, expected at least {expected}")]
    Dimension { expected: usize, found: usize },
    // Runtime
    #[error(transparent)]
    Evaluation(#[from] EvalError),
    #[error("constraints are infeasible (crossed bounds in row {0})")]
    Infeasible(usize),
    #[error("solver exhausted its working-set budget of {0}")]
    SolverBudget(usize),
    #[error("objective is not positive definite")]
    NotConvex,
    #[error("{op} called while the controller was {stage}")]
    Stage { op: &'static str, stage: &'static str },
}
