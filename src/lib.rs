//! ## About
//!
//! This crate is a declarative robot-motion controller. An operator describes,
//! in a document of scalars, maps, and sequences, how Cartesian frames and
//! scalar quantities derive from the joint state, and which constraints those
//! quantities must satisfy. The crate compiles that description into
//!
//! * a differentiable [expression graph](expression::ExprGraph) over scalars,
//!   3-vectors, rotations, and rigid frames, evaluating values and partial
//!   derivatives with respect to the joint inputs in a single forward sweep,
//! * and a [QP controller](controller::QpController) that, each control step,
//!   assembles a box-and-rows quadratic program from the evaluated quantities
//!   and turns its solution into a joint-velocity command.
//!
//! See [controller::QpController] to get started, or [scope::Scope] for
//! evaluating named expressions without a controller.
//!
//! ## Naming conventions
//! * Specs – plain data describing *what* to compute ([spec])
//! * Lowering – turning specs into graph nodes ([scope])
//! * Handles – copyable ids into the graph's node pools ([expression])
//! * Getters omit a `get_` prefix like the standard library, with the
//!   exception of [controller::QpController::get_command], which keeps the
//!   name the control-loop protocol is known by.

pub mod controller;
pub mod document;
pub mod errors;
pub mod expression;
pub mod rigid;
pub mod scope;
pub mod solver;
pub mod spec;

pub use controller::QpController;
pub use errors::{Error, EvalError, ValueKind};
pub use expression::{ExprGraph, FrameId, RotationId, ScalarId, VectorId};
pub use rigid::{Frame, Twist};
pub use scope::Scope;
pub use solver::{AdmmSolver, QpProblem, QpSolver};
pub use spec::{
    AnySpec, ControllableConstraint, ControllerSpec, FrameSpec, HardConstraint, RotationSpec,
    ScalarSpec, ScopeEntry, ScopeSpec, SoftConstraint, VectorSpec,
};
