/*! The quadratic-programming seam of the controller, plus a built-in dense
solver.

A controller needs one capability from its solver: "given a strictly convex
QP with box-bounded variables and linear constraint rows, produce the
minimizer, warm-starting from the previous solve". [QpSolver] is that seam;
[AdmmSolver] is the bundled implementation, a dense operator-splitting
(ADMM) method of the OSQP family. It stacks the box `[I]` on top of the
constraint rows `[A]`, regularizes the KKT system with `σ`, boosts the
per-row penalty on equality rows, and over-relaxes the iterates. The
working-set budget `nwsr` bounds the number of penalty-retuning rounds; each
round refactors the KKT matrix once and runs a fixed block of sweeps.

All workspace is sized by [QpSolver::resize]; solving allocates nothing. */

use crate::errors::Error;
use nalgebra::{DMatrix, DVector};
use tracing::trace;

/// One step's quadratic program, borrowed from the controller's workspace.
///
/// Minimize `½ xᵀ diag(h_diag) x + gᵀ x` subject to `lb ≤ x ≤ ub` and
/// `lb_a ≤ A x ≤ ub_a`.
#[derive(Debug)]
pub struct QpProblem<'a> {
    pub h_diag: &'a DVector<f64>,
    pub g: &'a DVector<f64>,
    pub a: &'a DMatrix<f64>,
    pub lb: &'a DVector<f64>,
    pub ub: &'a DVector<f64>,
    pub lb_a: &'a DVector<f64>,
    pub ub_a: &'a DVector<f64>,
}

impl QpProblem<'_> {
    pub fn num_vars(&self) -> usize {
        self.h_diag.len()
    }

    pub fn num_rows(&self) -> usize {
        self.lb_a.len()
    }
}

/// What a controller requires from a QP backend.
pub trait QpSolver {
    /// Size the internal workspace for `vars` decision variables and `rows`
    /// general constraint rows. Called once at controller generation.
    fn resize(&mut self, vars: usize, rows: usize);

    /// Solve from scratch, discarding any previous iterates.
    fn cold_solve(&mut self, qp: &QpProblem<'_>, nwsr: usize) -> Result<&DVector<f64>, Error>;

    /// Solve starting from the iterates of the previous call.
    fn warm_solve(&mut self, qp: &QpProblem<'_>, nwsr: usize) -> Result<&DVector<f64>, Error>;
}

const SIGMA: f64 = 1e-6;
const ALPHA: f64 = 1.6;
const RHO_INIT: f64 = 0.1;
const RHO_MIN: f64 = 1e-6;
const RHO_MAX: f64 = 1e6;
const RHO_EQ_SCALE: f64 = 1e3;
const EPS_ABS: f64 = 1e-6;
const EPS_REL: f64 = 1e-6;
const SWEEPS_PER_ROUND: usize = 100;
const CHECK_EVERY: usize = 10;
const EQ_TOL: f64 = 1e-12;

/// Dense ADMM solver with preallocated workspace.
#[derive(Debug)]
pub struct AdmmSolver {
    nv: usize,
    nc: usize,
    rho_bar: f64,
    // iterates (persist across warm solves)
    x: DVector<f64>,
    z: DVector<f64>,
    y: DVector<f64>,
    // per-sweep scratch
    rho: DVector<f64>,
    xt: DVector<f64>,
    zt: DVector<f64>,
    wrow: DVector<f64>,
    rhs: DVector<f64>,
    ax: DVector<f64>,
    dres: DVector<f64>,
    kkt: DMatrix<f64>,
    lfac: DMatrix<f64>,
    ascaled: DMatrix<f64>,
}

impl Default for AdmmSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmmSolver {
    pub fn new() -> Self {
        Self {
            nv: 0,
            nc: 0,
            rho_bar: RHO_INIT,
            x: DVector::zeros(0),
            z: DVector::zeros(0),
            y: DVector::zeros(0),
            rho: DVector::zeros(0),
            xt: DVector::zeros(0),
            zt: DVector::zeros(0),
            wrow: DVector::zeros(0),
            rhs: DVector::zeros(0),
            ax: DVector::zeros(0),
            dres: DVector::zeros(0),
            kkt: DMatrix::zeros(0, 0),
            lfac: DMatrix::zeros(0, 0),
            ascaled: DMatrix::zeros(0, 0),
        }
    }

    fn solve(
        &mut self,
        qp: &QpProblem<'_>,
        nwsr: usize,
        warm: bool,
    ) -> Result<&DVector<f64>, Error> {
        let (nv, nc) = (qp.num_vars(), qp.num_rows());
        if nv != self.nv || nc != self.nc {
            self.resize(nv, nc);
        }
        if nv == 0 {
            return Ok(&self.x);
        }
        let stacked = nv + nc;

        // Crossed bounds can never be satisfied; report before iterating.
        for j in 0..nv {
            if qp.lb[j] > qp.ub[j] {
                return Err(Error::Infeasible(j));
            }
        }
        for r in 0..nc {
            if qp.lb_a[r] > qp.ub_a[r] {
                return Err(Error::Infeasible(r));
            }
        }

        if !warm {
            self.x.fill(0.0);
            self.z.fill(0.0);
            self.y.fill(0.0);
            self.rho_bar = RHO_INIT;
        }

        let bound = |r: usize| -> (f64, f64) {
            if r < nv {
                (qp.lb[r], qp.ub[r])
            } else {
                (qp.lb_a[r - nv], qp.ub_a[r - nv])
            }
        };

        for round in 0..nwsr.max(1) {
            // Per-row penalties, boosted where the row is an equality.
            for r in 0..stacked {
                let (l, u) = bound(r);
                let rho = if u - l <= EQ_TOL {
                    self.rho_bar * RHO_EQ_SCALE
                } else {
                    self.rho_bar
                };
                self.rho[r] = rho.clamp(RHO_MIN, RHO_MAX);
            }

            // KKT = diag(h + σ + ρ_box) + Aᵀ diag(ρ_rows) A, factored in place.
            self.ascaled.copy_from(qp.a);
            for r in 0..nc {
                self.ascaled.row_mut(r).scale_mut(self.rho[nv + r]);
            }
            self.kkt.gemm_tr(1.0, qp.a, &self.ascaled, 0.0);
            for j in 0..nv {
                self.kkt[(j, j)] += qp.h_diag[j] + SIGMA + self.rho[j];
            }
            self.lfac.copy_from(&self.kkt);
            cholesky_in_place(&mut self.lfac)?;

            for sweep in 0..SWEEPS_PER_ROUND {
                // x̃ = KKT⁻¹ (σx − g + Ãᵀ(ρ∘z − y))
                for j in 0..nv {
                    self.rhs[j] =
                        SIGMA * self.x[j] - qp.g[j] + self.rho[j] * self.z[j] - self.y[j];
                }
                for r in 0..nc {
                    self.wrow[r] = self.rho[nv + r] * self.z[nv + r] - self.y[nv + r];
                }
                self.rhs.gemv_tr(1.0, qp.a, &self.wrow, 1.0);
                self.xt.copy_from(&self.rhs);
                cholesky_solve(&self.lfac, &mut self.xt);

                // z̃ = Ã x̃
                self.zt.rows_mut(0, nv).copy_from(&self.xt);
                self.zt.rows_mut(nv, nc).gemv(1.0, qp.a, &self.xt, 0.0);

                for j in 0..nv {
                    self.x[j] = ALPHA * self.xt[j] + (1.0 - ALPHA) * self.x[j];
                }
                for r in 0..stacked {
                    let (l, u) = bound(r);
                    let relaxed = ALPHA * self.zt[r] + (1.0 - ALPHA) * self.z[r];
                    let znew = (relaxed + self.y[r] / self.rho[r]).clamp(l, u);
                    self.y[r] += self.rho[r] * (relaxed - znew);
                    self.z[r] = znew;
                }

                if (sweep + 1) % CHECK_EVERY != 0 {
                    continue;
                }
                let (rp, rd, sp, sd) = self.residuals(qp);
                if rp <= EPS_ABS + EPS_REL * sp && rd <= EPS_ABS + EPS_REL * sd {
                    trace!(round, sweep, rp, rd, "qp converged");
                    return Ok(&self.x);
                }
            }

            // Retune the penalty towards balanced residuals and refactor.
            let (rp, rd, sp, sd) = self.residuals(qp);
            let rp_rel = rp / sp.max(EPS_ABS);
            let rd_rel = rd / sd.max(EPS_ABS);
            if rd_rel > 0.0 {
                self.rho_bar =
                    (self.rho_bar * (rp_rel / rd_rel).sqrt()).clamp(RHO_MIN, RHO_MAX);
            }
            trace!(round, rp, rd, rho = self.rho_bar, "qp penalty retuned");
        }
        Err(Error::SolverBudget(nwsr))
    }

    /// Primal/dual residual ∞-norms and their scale factors.
    fn residuals(&mut self, qp: &QpProblem<'_>) -> (f64, f64, f64, f64) {
        let (nv, nc) = (self.nv, self.nc);
        self.ax.rows_mut(0, nv).copy_from(&self.x);
        self.ax.rows_mut(nv, nc).gemv(1.0, qp.a, &self.x, 0.0);
        let mut rp: f64 = 0.0;
        let mut sp: f64 = 0.0;
        for r in 0..nv + nc {
            rp = rp.max((self.ax[r] - self.z[r]).abs());
            sp = sp.max(self.ax[r].abs()).max(self.z[r].abs());
        }
        for j in 0..nv {
            self.dres[j] = qp.h_diag[j] * self.x[j] + qp.g[j] + self.y[j];
        }
        let sd = self.dres.amax();
        self.dres.gemv_tr(1.0, qp.a, &self.y.rows(nv, nc), 1.0);
        let rd = self.dres.amax();
        (rp, rd, sp, sd.max(rd))
    }
}

impl QpSolver for AdmmSolver {
    fn resize(&mut self, vars: usize, rows: usize) {
        self.nv = vars;
        self.nc = rows;
        let stacked = vars + rows;
        self.rho_bar = RHO_INIT;
        self.x = DVector::zeros(vars);
        self.z = DVector::zeros(stacked);
        self.y = DVector::zeros(stacked);
        self.rho = DVector::zeros(stacked);
        self.xt = DVector::zeros(vars);
        self.zt = DVector::zeros(stacked);
        self.wrow = DVector::zeros(rows);
        self.rhs = DVector::zeros(vars);
        self.ax = DVector::zeros(stacked);
        self.dres = DVector::zeros(vars);
        self.kkt = DMatrix::zeros(vars, vars);
        self.lfac = DMatrix::zeros(vars, vars);
        self.ascaled = DMatrix::zeros(rows, vars);
    }

    fn cold_solve(&mut self, qp: &QpProblem<'_>, nwsr: usize) -> Result<&DVector<f64>, Error> {
        self.solve(qp, nwsr, false)
    }

    fn warm_solve(&mut self, qp: &QpProblem<'_>, nwsr: usize) -> Result<&DVector<f64>, Error> {
        self.solve(qp, nwsr, true)
    }
}

/// In-place dense Cholesky of the lower triangle; the strict upper triangle
/// is left untouched and ignored by [cholesky_solve].
fn cholesky_in_place(m: &mut DMatrix<f64>) -> Result<(), Error> {
    let n = m.nrows();
    for j in 0..n {
        let mut diag = m[(j, j)];
        for k in 0..j {
            diag -= m[(j, k)] * m[(j, k)];
        }
        if diag <= 0.0 {
            return Err(Error::NotConvex);
        }
        let diag = diag.sqrt();
        m[(j, j)] = diag;
        for i in j + 1..n {
            let mut v = m[(i, j)];
            for k in 0..j {
                v -= m[(i, k)] * m[(j, k)];
            }
            m[(i, j)] = v / diag;
        }
    }
    Ok(())
}

/// Solve `L Lᵀ x = b` in place, with `L` from [cholesky_in_place].
fn cholesky_solve(l: &DMatrix<f64>, b: &mut DVector<f64>) {
    let n = l.nrows();
    for i in 0..n {
        let mut v = b[i];
        for k in 0..i {
            v -= l[(i, k)] * b[k];
        }
        b[i] = v / l[(i, i)];
    }
    for i in (0..n).rev() {
        let mut v = b[i];
        for k in i + 1..n {
            v -= l[(k, i)] * b[k];
        }
        b[i] = v / l[(i, i)];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const INF: f64 = f64::INFINITY;

    struct Case {
        h: DVector<f64>,
        g: DVector<f64>,
        a: DMatrix<f64>,
        lb: DVector<f64>,
        ub: DVector<f64>,
        lba: DVector<f64>,
        uba: DVector<f64>,
    }

    impl Case {
        fn qp(&self) -> QpProblem<'_> {
            QpProblem {
                h_diag: &self.h,
                g: &self.g,
                a: &self.a,
                lb: &self.lb,
                ub: &self.ub,
                lb_a: &self.lba,
                ub_a: &self.uba,
            }
        }
    }

    #[test]
    fn unconstrained_minimum() {
        let case = Case {
            h: DVector::from_vec(vec![1.0, 2.0]),
            g: DVector::from_vec(vec![-1.0, -4.0]),
            a: DMatrix::zeros(0, 2),
            lb: DVector::from_vec(vec![-INF, -INF]),
            ub: DVector::from_vec(vec![INF, INF]),
            lba: DVector::zeros(0),
            uba: DVector::zeros(0),
        };
        let mut solver = AdmmSolver::new();
        solver.resize(2, 0);
        let x = solver.cold_solve(&case.qp(), 10).unwrap();
        assert_abs_diff_eq!(x[0], 1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(x[1], 2.0, epsilon = 1e-4);
    }

    #[test]
    fn active_box_bound() {
        let case = Case {
            h: DVector::from_vec(vec![1.0]),
            g: DVector::from_vec(vec![-3.0]),
            a: DMatrix::zeros(0, 1),
            lb: DVector::from_vec(vec![0.0]),
            ub: DVector::from_vec(vec![1.0]),
            lba: DVector::zeros(0),
            uba: DVector::zeros(0),
        };
        let mut solver = AdmmSolver::new();
        solver.resize(1, 0);
        let x = solver.cold_solve(&case.qp(), 10).unwrap();
        assert_abs_diff_eq!(x[0], 1.0, epsilon = 1e-4);
    }

    #[test]
    fn equality_row_projects() {
        // min ½(x² + y²) s.t. x + y = 1 → (0.5, 0.5)
        let case = Case {
            h: DVector::from_vec(vec![1.0, 1.0]),
            g: DVector::zeros(2),
            a: DMatrix::from_row_slice(1, 2, &[1.0, 1.0]),
            lb: DVector::from_vec(vec![-INF, -INF]),
            ub: DVector::from_vec(vec![INF, INF]),
            lba: DVector::from_vec(vec![1.0]),
            uba: DVector::from_vec(vec![1.0]),
        };
        let mut solver = AdmmSolver::new();
        solver.resize(2, 1);
        let x = solver.cold_solve(&case.qp(), 10).unwrap();
        assert_abs_diff_eq!(x[0], 0.5, epsilon = 1e-4);
        assert_abs_diff_eq!(x[1], 0.5, epsilon = 1e-4);
    }

    #[test]
    fn slack_row_splits_the_tracking_error() {
        // Controller-shaped: variable v, slack s, row v − s = 1, both unit
        // weights. KKT gives v = 0.5, s = −0.5.
        let case = Case {
            h: DVector::from_vec(vec![1.0, 1.0]),
            g: DVector::zeros(2),
            a: DMatrix::from_row_slice(1, 2, &[1.0, -1.0]),
            lb: DVector::from_vec(vec![-INF, -INF]),
            ub: DVector::from_vec(vec![INF, INF]),
            lba: DVector::from_vec(vec![1.0]),
            uba: DVector::from_vec(vec![1.0]),
        };
        let mut solver = AdmmSolver::new();
        solver.resize(2, 1);
        let x = solver.cold_solve(&case.qp(), 10).unwrap();
        assert_abs_diff_eq!(x[0], 0.5, epsilon = 1e-4);
        assert_abs_diff_eq!(x[1], -0.5, epsilon = 1e-4);
    }

    #[test]
    fn warm_solve_tracks_a_moving_target() {
        let mut case = Case {
            h: DVector::from_vec(vec![1.0]),
            g: DVector::from_vec(vec![-1.0]),
            a: DMatrix::zeros(0, 1),
            lb: DVector::from_vec(vec![-INF]),
            ub: DVector::from_vec(vec![INF]),
            lba: DVector::zeros(0),
            uba: DVector::zeros(0),
        };
        let mut solver = AdmmSolver::new();
        solver.resize(1, 0);
        let x = solver.cold_solve(&case.qp(), 10).unwrap();
        assert_abs_diff_eq!(x[0], 1.0, epsilon = 1e-4);
        case.g[0] = -1.1;
        let x = solver.warm_solve(&case.qp(), 10).unwrap();
        assert_abs_diff_eq!(x[0], 1.1, epsilon = 1e-4);
    }

    #[test]
    fn crossed_bounds_are_infeasible() {
        let case = Case {
            h: DVector::from_vec(vec![1.0]),
            g: DVector::zeros(1),
            a: DMatrix::zeros(0, 1),
            lb: DVector::from_vec(vec![1.0]),
            ub: DVector::from_vec(vec![0.0]),
            lba: DVector::zeros(0),
            uba: DVector::zeros(0),
        };
        let mut solver = AdmmSolver::new();
        solver.resize(1, 0);
        assert!(matches!(
            solver.cold_solve(&case.qp(), 10),
            Err(Error::Infeasible(0))
        ));
    }

    #[test]
    fn indefinite_objective_is_rejected() {
        let mut m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        assert!(matches!(cholesky_in_place(&mut m), Err(Error::NotConvex)));
    }

    #[test]
    fn cholesky_agrees_with_nalgebra() {
        let spd = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.5, 1.0, 3.0, 0.2, 0.5, 0.2, 2.0]);
        let mut l = spd.clone();
        cholesky_in_place(&mut l).unwrap();
        let mut b = DVector::from_vec(vec![1.0, -2.0, 0.3]);
        let expected = spd.clone().cholesky().unwrap().solve(&b);
        cholesky_solve(&l, &mut b);
        assert_abs_diff_eq!(b, expected, epsilon = 1e-10);
    }
}
