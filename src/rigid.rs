/*! Rigid-body values carried through expression graphs: frames, twists, and
the SO(3) helpers their derivatives go through. */

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};

/// A rigid transform: rotation plus translation.
///
/// Kept as an explicit pair so that the derivative folds in the expression
/// kernel can work on the rotation and the origin separately.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub rot: Rotation3<f64>,
    pub trans: Vector3<f64>,
}

impl Frame {
    pub fn new(rot: Rotation3<f64>, trans: Vector3<f64>) -> Self {
        Frame { rot, trans }
    }

    /// The neutral element of rigid composition.
    pub fn identity() -> Self {
        Frame {
            rot: Rotation3::identity(),
            trans: Vector3::zeros(),
        }
    }

    /// Rigid composition: `self` first, then `other` in `self`'s coordinates.
    pub fn compose(&self, other: &Frame) -> Frame {
        Frame {
            rot: self.rot * other.rot,
            trans: self.trans + self.rot * other.trans,
        }
    }

    pub fn inverse(&self) -> Frame {
        let inv = self.rot.inverse();
        Frame {
            rot: inv,
            trans: -(inv * self.trans),
        }
    }

    /// Transform a point into the parent coordinate system.
    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.trans + self.rot * p
    }
}

impl Default for Frame {
    fn default() -> Self {
        Frame::identity()
    }
}

/// Tangent of a frame-valued expression: velocity of the origin plus the
/// angular velocity of the orientation (`Ṙ = ω̂ R`).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Twist {
    pub linear: Vector3<f64>,
    pub angular: Vector3<f64>,
}

impl Twist {
    pub fn zero() -> Self {
        Twist::default()
    }
}

/// Skew-symmetric matrix `r̂` with `r̂ v = r × v`.
pub fn hat(r: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -r.z, r.y, r.z, 0.0, -r.x, -r.y, r.x, 0.0)
}

// Below the angle threshold the closed forms switch to their series
// expansions; both branches stay accurate to f64 roundoff.
const SMALL_ANGLE: f64 = 1e-8;

/// Left Jacobian of SO(3) at the rotation vector `r`, mapping rotation-vector
/// rates to angular velocities: `ω = J_l(r) ṙ`.
pub fn left_jacobian(r: &Vector3<f64>) -> Matrix3<f64> {
    let theta = r.norm();
    let rx = hat(r);
    if theta < SMALL_ANGLE {
        return Matrix3::identity() + rx * 0.5 + rx * rx / 6.0;
    }
    let t2 = theta * theta;
    Matrix3::identity()
        + rx * ((1.0 - theta.cos()) / t2)
        + rx * rx * ((theta - theta.sin()) / (t2 * theta))
}

/// Inverse of [left_jacobian], mapping angular velocities to rotation-vector
/// rates: `ṙ = J_l⁻¹(r) ω`.
///
/// Well defined for `‖r‖ < 2π`; the expression kernel only queries it for
/// canonical rotation vectors with `‖r‖ ≤ π`.
pub fn left_jacobian_inv(r: &Vector3<f64>) -> Matrix3<f64> {
    let theta = r.norm();
    let rx = hat(r);
    let coeff = if theta < SMALL_ANGLE {
        1.0 / 12.0
    } else {
        let t2 = theta * theta;
        (1.0 - theta * theta.sin() / (2.0 * (1.0 - theta.cos()))) / t2
    };
    Matrix3::identity() - rx * 0.5 + rx * rx * coeff
}

/// Canonical log map of a rotation: axis times angle, angle in `[0, π]`.
///
/// The conversion goes through a unit quaternion, whose construction branches
/// on the dominant diagonal of `R + Rᵀ`, which keeps the axis choice at
/// `θ = π` deterministic.
pub fn rotation_vector(rot: &Rotation3<f64>) -> Vector3<f64> {
    UnitQuaternion::from_rotation_matrix(rot).scaled_axis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn compose_with_identity() {
        let f = Frame::new(
            Rotation3::from_axis_angle(&Vector3::y_axis(), 0.4),
            Vector3::new(1.0, -2.0, 0.5),
        );
        let g = f.compose(&Frame::identity());
        assert_abs_diff_eq!(g.trans, f.trans, epsilon = 1e-12);
        assert_abs_diff_eq!(g.rot.matrix(), f.rot.matrix(), epsilon = 1e-12);
    }

    #[test]
    fn inverse_undoes_composition() {
        let f = Frame::new(
            Rotation3::from_axis_angle(&Vector3::x_axis(), -1.2),
            Vector3::new(0.3, 0.1, -0.7),
        );
        let id = f.compose(&f.inverse());
        assert_abs_diff_eq!(id.trans, Vector3::zeros(), epsilon = 1e-12);
        assert_abs_diff_eq!(id.rot.matrix(), &Matrix3::identity(), epsilon = 1e-12);
    }

    #[test]
    fn jacobian_inverse_is_inverse() {
        for r in [
            Vector3::new(0.3, -0.2, 0.9),
            Vector3::new(1e-10, 0.0, 0.0),
            Vector3::new(0.0, FRAC_PI_2, 0.0),
            Vector3::new(2.0, 1.0, -0.5),
        ] {
            let prod = left_jacobian(&r) * left_jacobian_inv(&r);
            assert_abs_diff_eq!(prod, Matrix3::identity(), epsilon = 1e-9);
        }
    }

    #[test]
    fn log_of_exp_recovers_rotation_vector() {
        let r = Vector3::new(0.4, -0.1, 0.2);
        let rot = Rotation3::new(r);
        assert_abs_diff_eq!(rotation_vector(&rot), r, epsilon = 1e-12);
    }

    #[test]
    fn log_at_pi_has_canonical_angle() {
        let rot = Rotation3::from_axis_angle(&Vector3::z_axis(), PI);
        let r = rotation_vector(&rot);
        assert_abs_diff_eq!(r.norm(), PI, epsilon = 1e-9);
    }
}
