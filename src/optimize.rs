use tracing::{debug, info};

use crate::error::{Result, ScfgError};
use crate::parameters::ParamId;

/// Something with a scalar objective to maximize over bounded parameters.
pub trait Optimizable {
    fn objective(&mut self) -> Result<f64>;
    fn parameter_bounds(&self) -> Vec<(ParamId, f64, f64)>;
    fn current_values(&self) -> Vec<f64>;
    /// Applies a full value vector, in `parameter_bounds` order, atomically.
    fn update_values(&mut self, values: &[f64]) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationReport {
    pub initial_objective: f64,
    pub final_objective: f64,
    pub sweeps: usize,
    pub evaluations: usize,
    pub values: Vec<f64>,
}

/// Cyclic coordinate ascent with a golden-section line search per
/// parameter.
#[derive(Debug, Clone)]
pub struct CoordinateAscent {
    pub max_sweeps: usize,
    pub tolerance: f64,
    pub line_search_steps: usize,
}

impl Default for CoordinateAscent {
    fn default() -> Self {
        Self {
            max_sweeps: 50,
            tolerance: 1e-6,
            line_search_steps: 40,
        }
    }
}

const INV_PHI: f64 = 0.618_033_988_749_894_9;

impl CoordinateAscent {
    pub fn optimize<O: Optimizable>(&self, target: &mut O) -> Result<OptimizationReport> {
        let bounds = target.parameter_bounds();
        let mut point = target.current_values();
        let mut evaluations = 0usize;

        let mut best = evaluate(target, &point, &mut evaluations)?;
        let initial_objective = best;
        let mut sweeps = 0;

        while sweeps < self.max_sweeps {
            sweeps += 1;
            let sweep_start = best;

            for (coordinate, &(_, lower, upper)) in bounds.iter().enumerate() {
                let (value, objective) =
                    self.line_search(target, &mut point, coordinate, lower, upper, &mut evaluations)?;
                if objective > best {
                    point[coordinate] = value;
                    best = objective;
                }
            }

            info!(sweep = sweeps, objective = best, "optimizer sweep finished");
            let gained = best - sweep_start;
            if !(gained > self.tolerance) && sweep_start.is_finite() {
                break;
            }
        }

        // Leave the target at the best point found.
        target.update_values(&point)?;
        Ok(OptimizationReport {
            initial_objective,
            final_objective: best,
            sweeps,
            evaluations,
            values: point,
        })
    }

    /// Maximizes along one coordinate; `point` is restored before returning.
    fn line_search<O: Optimizable>(
        &self,
        target: &mut O,
        point: &mut [f64],
        coordinate: usize,
        lower: f64,
        upper: f64,
        evaluations: &mut usize,
    ) -> Result<(f64, f64)> {
        let original = point[coordinate];
        let mut score_at = |value: f64, evaluations: &mut usize| -> Result<f64> {
            point[coordinate] = value;
            evaluate(target, point, evaluations)
        };

        let (mut a, mut b) = (lower, upper);
        let mut c = b - (b - a) * INV_PHI;
        let mut d = a + (b - a) * INV_PHI;
        let mut fc = score_at(c, evaluations)?;
        let mut fd = score_at(d, evaluations)?;

        for _ in 0..self.line_search_steps {
            if fc > fd {
                b = d;
                d = c;
                fd = fc;
                c = b - (b - a) * INV_PHI;
                fc = score_at(c, evaluations)?;
            } else {
                a = c;
                c = d;
                fc = fd;
                d = a + (b - a) * INV_PHI;
                fd = score_at(d, evaluations)?;
            }
        }

        let result = if fc > fd { (c, fc) } else { (d, fd) };
        point[coordinate] = original;
        debug!(coordinate, value = result.0, objective = result.1, "line search done");
        Ok(result)
    }
}

/// Objective at `point`; invalid probability assignments score `-inf`.
fn evaluate<O: Optimizable>(target: &mut O, point: &[f64], evaluations: &mut usize) -> Result<f64> {
    *evaluations += 1;
    target.update_values(point)?;
    match target.objective() {
        Ok(value) => Ok(value),
        Err(ScfgError::ProbabilityConsistency { subject, reason }) => {
            debug!(%subject, %reason, "rejected parameter point");
            Ok(f64::NEG_INFINITY)
        }
        Err(e) => Err(e),
    }
}
