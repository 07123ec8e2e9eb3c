use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, warn};

use crate::engine::Scfg;
use crate::error::{Result, ScfgError};
use crate::grammar::Grammar;
use crate::optimize::Optimizable;
use crate::parameters::ParamId;

/// Allowed deviation of a per-non-terminal probability sum from 1.
pub const PROBABILITY_TOLERANCE: f64 = 1e-6;

/// One parameter sample that did not define a valid set of probabilities.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleFailure {
    pub sample: usize,
    pub values: Vec<(String, f64)>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SampleVerification {
    pub samples: usize,
    pub failures: Vec<SampleFailure>,
}

impl SampleVerification {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Checks that each rule probability lies in [0, 1] and that the rules of
/// every non-terminal sum to 1.
pub(crate) fn check_probabilities(grammar: &Grammar, values: &[f64]) -> Result<()> {
    for (rule, &p) in values.iter().enumerate() {
        if !(p >= -PROBABILITY_TOLERANCE && p <= 1.0 + PROBABILITY_TOLERANCE) {
            return Err(ScfgError::probability(
                format!("rule {} ({})", rule, grammar.rule_string(rule)),
                format!("probability {} is outside [0, 1]", p),
            ));
        }
    }
    for nt in 0..grammar.nt_count() {
        let sum: f64 = grammar.rules_by_lhs(nt).iter().map(|&rule| values[rule]).sum();
        if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
            return Err(ScfgError::probability(
                format!("non-terminal {}", nt),
                format!("rule probabilities sum to {}", sum),
            ));
        }
    }
    Ok(())
}

impl Grammar {
    /// Validates rule probabilities at the current parameter values.
    pub fn verify_values(&self) -> Result<()> {
        check_probabilities(self, self.probabilities().values())
    }

    /// Draws `samples` Latin-hypercube points over the bounds of every
    /// parameter used by a rule formula and checks the probabilities each
    /// point defines. Violations are collected, not raised.
    pub fn random_sample_verify<R: Rng>(
        &self,
        samples: usize,
        rng: &mut R,
    ) -> Result<SampleVerification> {
        let mut report = SampleVerification {
            samples,
            failures: Vec::new(),
        };
        let used = self.used_parameters();
        if samples == 0 {
            return Ok(report);
        }

        let strata: Vec<Vec<usize>> = used
            .iter()
            .map(|_| {
                let mut order: Vec<usize> = (0..samples).collect();
                order.shuffle(rng);
                order
            })
            .collect();

        for sample in 0..samples {
            let mut updates: Vec<(ParamId, f64)> = Vec::with_capacity(used.len());
            for (k, &id) in used.iter().enumerate() {
                let Some(param) = self.parameters().get(id) else {
                    continue;
                };
                let offset: f64 = rng.gen();
                let fraction = (strata[k][sample] as f64 + offset) / samples as f64;
                let value = (param.lower + (param.upper - param.lower) * fraction)
                    .clamp(param.lower, param.upper);
                updates.push((id, value));
            }

            let mut point = self.parameters().clone();
            point.set_values(&updates)?;
            let outcome = self
                .probabilities()
                .evaluate_with(&point)
                .and_then(|values| check_probabilities(self, &values));

            match outcome {
                Ok(()) => {}
                Err(ScfgError::ProbabilityConsistency { subject, reason }) => {
                    let values: Vec<(String, f64)> = updates
                        .iter()
                        .filter_map(|&(id, v)| point.get(id).map(|p| (p.name.clone(), v)))
                        .collect();
                    warn!(sample, %subject, %reason, "sampled parameters give invalid probabilities");
                    report.failures.push(SampleFailure {
                        sample,
                        values,
                        reason: format!("{}: {}", subject, reason),
                    });
                }
                Err(other) => return Err(other),
            }
        }

        debug!(
            samples,
            failures = report.failures.len(),
            "random sample verification finished"
        );
        Ok(report)
    }
}

impl Scfg {
    /// Corpus objective: verifies rule probabilities, then returns the
    /// corpus log-likelihood.
    pub fn compute(&mut self) -> Result<f64> {
        self.grammar().verify_values()?;
        self.log_likelihood()
    }
}

impl Optimizable for Scfg {
    fn objective(&mut self) -> Result<f64> {
        self.compute()
    }

    fn parameter_bounds(&self) -> Vec<(ParamId, f64, f64)> {
        let grammar = self.grammar();
        grammar
            .used_parameters()
            .iter()
            .filter_map(|&id| grammar.parameters().get(id).map(|p| (id, p.lower, p.upper)))
            .collect()
    }

    fn current_values(&self) -> Vec<f64> {
        let grammar = self.grammar();
        grammar
            .used_parameters()
            .iter()
            .filter_map(|&id| grammar.parameters().get(id).map(|p| p.value))
            .collect()
    }

    fn update_values(&mut self, values: &[f64]) -> Result<()> {
        let ids = self.grammar().used_parameters().to_vec();
        if ids.len() != values.len() {
            return Err(ScfgError::ParameterUpdate(format!(
                "expected {} values, got {}",
                ids.len(),
                values.len()
            )));
        }
        let updates: Vec<(ParamId, f64)> = ids.into_iter().zip(values.iter().copied()).collect();
        self.set_parameter_values(&updates)
    }
}
