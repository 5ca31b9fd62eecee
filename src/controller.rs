/*! Compiles controller specifications into per-step quadratic programs and
drives the solver.

A compiled [QpController] owns the scope it generated, the lowered handles of
every constraint bound, weight, and tracked expression, and a preallocated QP
workspace. Each control step installs the joint state, re-evaluates all
expressions and their partials in one sweep, fills the QP matrices, and asks
the solver for the decision vector: joint-velocity slots first, one slack
slot per soft constraint after them. Input slots not owned by any
controllable are observables; their Jacobian columns are dropped and their
command components stay zero.

The controller is a two-state machine: `start` performs the cold solve from
`Fresh`, `update` warm-starts from `Started`, and any failing step falls back
to `Fresh`. */

use crate::errors::Error;
use crate::expression::ScalarId;
use crate::scope::Scope;
use crate::solver::{AdmmSolver, QpProblem, QpSolver};
use crate::spec::ControllerSpec;
use itertools::Itertools;
use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

struct Controllable {
    lower: ScalarId,
    upper: ScalarId,
    weight: ScalarId,
    input_index: usize,
    name: String,
}

struct Soft {
    lower: ScalarId,
    upper: ScalarId,
    weight: ScalarId,
    expression: ScalarId,
}

struct Hard {
    lower: ScalarId,
    upper: ScalarId,
    expression: ScalarId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Fresh,
    Started,
}

impl Stage {
    fn name(self) -> &'static str {
        match self {
            Stage::Fresh => "fresh",
            Stage::Started => "started",
        }
    }
}

/// A velocity-resolved controller compiled from a [ControllerSpec].
pub struct QpController<S = AdmmSolver> {
    scope: Scope,
    controllables: Vec<Controllable>,
    softs: Vec<Soft>,
    hards: Vec<Hard>,
    solver: S,
    stage: Stage,
    last_error: Option<Error>,
    // QP workspace, sized at generation
    h_diag: DVector<f64>,
    g: DVector<f64>,
    a: DMatrix<f64>,
    lb: DVector<f64>,
    ub: DVector<f64>,
    lba: DVector<f64>,
    uba: DVector<f64>,
    command: DVector<f64>,
}

impl QpController<AdmmSolver> {
    /// Generate a controller with the bundled solver.
    pub fn from_spec(spec: &ControllerSpec) -> Result<Self, Error> {
        Self::with_solver(spec, AdmmSolver::new())
    }
}

impl<S: QpSolver> QpController<S> {
    /// Generate a controller around a caller-provided solver backend.
    pub fn with_solver(spec: &ControllerSpec, mut solver: S) -> Result<Self, Error> {
        let mut scope = Scope::build(&spec.scope)?;

        let controllables = spec
            .controllable_constraints
            .iter()
            .map(|c| {
                Ok(Controllable {
                    lower: scope.lower_scalar_spec(&c.lower)?,
                    upper: scope.lower_scalar_spec(&c.upper)?,
                    weight: scope.lower_scalar_spec(&c.weight)?,
                    input_index: c.input_index,
                    name: c.name.clone(),
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;
        let softs = spec
            .soft_constraints
            .iter()
            .map(|c| {
                Ok(Soft {
                    lower: scope.lower_scalar_spec(&c.lower)?,
                    upper: scope.lower_scalar_spec(&c.upper)?,
                    weight: scope.lower_scalar_spec(&c.weight)?,
                    expression: scope.lower_scalar_spec(&c.expression)?,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;
        let hards = spec
            .hard_constraints
            .iter()
            .map(|c| {
                Ok(Hard {
                    lower: scope.lower_scalar_spec(&c.lower)?,
                    upper: scope.lower_scalar_spec(&c.upper)?,
                    expression: scope.lower_scalar_spec(&c.expression)?,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        if let Some(index) = controllables
            .iter()
            .map(|c| c.input_index)
            .duplicates()
            .next()
        {
            let name = controllables
                .iter()
                .find(|c| c.input_index == index)
                .map(|c| c.name.clone())
                .unwrap_or_default();
            return Err(Error::InputIndex {
                name,
                index,
                reason: "already owned by another controllable",
            });
        }

        // The input universe covers everything the expressions reference and
        // every decision slot, even ones no expression reads.
        let min_arity = controllables
            .iter()
            .map(|c| c.input_index + 1)
            .max()
            .unwrap_or(0);
        scope.finish_graph(min_arity);
        let n = scope.graph().arity();

        let (m, s, h) = (controllables.len(), softs.len(), hards.len());
        let vars = m + s;
        let rows = s + h;
        solver.resize(vars, rows);

        let mut lb = DVector::from_element(vars, f64::NEG_INFINITY);
        let mut ub = DVector::from_element(vars, f64::INFINITY);
        // Slack slots stay unbounded; controllable slots are refreshed per
        // step, as are all entries of the first m Jacobian columns.
        lb.rows_mut(0, m).fill(0.0);
        ub.rows_mut(0, m).fill(0.0);
        let mut a = DMatrix::zeros(rows, vars);
        for k in 0..s {
            a[(k, m + k)] = -1.0;
        }

        debug!(n, m, s, h, "compiled qp controller");
        Ok(QpController {
            scope,
            controllables,
            softs,
            hards,
            solver,
            stage: Stage::Fresh,
            last_error: None,
            h_diag: DVector::zeros(vars),
            g: DVector::zeros(vars),
            a,
            lb,
            ub,
            lba: DVector::zeros(rows),
            uba: DVector::zeros(rows),
            command: DVector::zeros(n),
        })
    }

    /// Cold-start the controller. Valid from the fresh state only; returns
    /// whether the step succeeded.
    pub fn start(&mut self, state: &[f64], nwsr: usize) -> bool {
        if self.stage != Stage::Fresh {
            self.reject("start");
            return false;
        }
        self.run_step(state, nwsr, true)
    }

    /// Advance one control step, warm-starting the solver. Valid from the
    /// started state only; a failed step drops back to fresh.
    pub fn update(&mut self, state: &[f64], nwsr: usize) -> bool {
        if self.stage != Stage::Started {
            self.reject("update");
            return false;
        }
        self.run_step(state, nwsr, false)
    }

    /// The command of the last successful step: one velocity per input slot,
    /// zero for slots no controllable owns.
    pub fn get_command(&self) -> &DVector<f64> {
        &self.command
    }

    /// The scope generated from the specification, for monitoring named
    /// quantities.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn scope_mut(&mut self) -> &mut Scope {
        &mut self.scope
    }

    /// Why the most recent `start`/`update` returned `false`.
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    pub fn num_inputs(&self) -> usize {
        self.command.len()
    }

    pub fn num_controllables(&self) -> usize {
        self.controllables.len()
    }

    fn reject(&mut self, op: &'static str) {
        let err = Error::Stage {
            op,
            stage: self.stage.name(),
        };
        warn!(%err, "controller protocol violation");
        self.last_error = Some(err);
    }

    fn run_step(&mut self, state: &[f64], nwsr: usize, cold: bool) -> bool {
        match self.step(state, nwsr, cold) {
            Ok(()) => {
                self.stage = Stage::Started;
                self.last_error = None;
                true
            }
            Err(err) => {
                warn!(%err, cold, "control step failed");
                self.stage = Stage::Fresh;
                self.last_error = Some(err);
                false
            }
        }
    }

    fn step(&mut self, state: &[f64], nwsr: usize, cold: bool) -> Result<(), Error> {
        self.scope.graph_mut().set_inputs(state)?;
        let graph = self.scope.graph();
        let m = self.controllables.len();

        for (col, c) in self.controllables.iter().enumerate() {
            self.h_diag[col] = graph.scalar_value(c.weight);
            self.lb[col] = graph.scalar_value(c.lower);
            self.ub[col] = graph.scalar_value(c.upper);
        }
        for (k, soft) in self.softs.iter().enumerate() {
            self.h_diag[m + k] = graph.scalar_value(soft.weight);
            let value = graph.scalar_value(soft.expression);
            for (col, c) in self.controllables.iter().enumerate() {
                self.a[(k, col)] = graph.scalar_partial(soft.expression, c.input_index);
            }
            self.lba[k] = graph.scalar_value(soft.lower) - value;
            self.uba[k] = graph.scalar_value(soft.upper) - value;
        }
        for (k, hard) in self.hards.iter().enumerate() {
            let row = self.softs.len() + k;
            let value = graph.scalar_value(hard.expression);
            for (col, c) in self.controllables.iter().enumerate() {
                self.a[(row, col)] = graph.scalar_partial(hard.expression, c.input_index);
            }
            self.lba[row] = graph.scalar_value(hard.lower) - value;
            self.uba[row] = graph.scalar_value(hard.upper) - value;
        }

        let qp = QpProblem {
            h_diag: &self.h_diag,
            g: &self.g,
            a: &self.a,
            lb: &self.lb,
            ub: &self.ub,
            lb_a: &self.lba,
            ub_a: &self.uba,
        };
        let solution = if cold {
            self.solver.cold_solve(&qp, nwsr)?
        } else {
            self.solver.warm_solve(&qp, nwsr)?
        };

        self.command.fill(0.0);
        for (col, c) in self.controllables.iter().enumerate() {
            self.command[c.input_index] = solution[col];
        }
        Ok(())
    }
}
