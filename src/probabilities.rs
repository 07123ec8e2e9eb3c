use crate::error::{Result, ScfgError};
use crate::formula::Formula;
use crate::parameters::{ParamId, Parameters};

/// How a rule's production probability is obtained.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleProbability {
    /// Structurally fixed at 1.
    Deterministic,
    Formula(Formula),
}

/// Current production probability of every rule, evaluated from the
/// parameter registry once per parameter epoch.
#[derive(Debug, Clone)]
pub struct ProbabilityStore {
    parameters: Parameters,
    sources: Vec<RuleProbability>,
    values: Vec<f64>,
}

impl ProbabilityStore {
    pub fn new(parameters: Parameters, sources: Vec<RuleProbability>) -> Result<Self> {
        let values = evaluate_all(&sources, &parameters)?;
        Ok(Self {
            parameters,
            sources,
            values,
        })
    }

    #[inline]
    pub(crate) fn probability(&self, rule: usize) -> f64 {
        self.values[rule]
    }

    #[inline]
    pub(crate) fn is_deterministic(&self, rule: usize) -> bool {
        matches!(self.sources[rule], RuleProbability::Deterministic)
    }

    pub(crate) fn source(&self, rule: usize) -> &RuleProbability {
        &self.sources[rule]
    }

    pub fn sources(&self) -> &[RuleProbability] {
        &self.sources
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn epoch(&self) -> u64 {
        self.parameters.epoch()
    }

    /// Applies a batch of parameter values and re-evaluates every rule.
    /// On error neither the parameters nor the cached values change.
    pub fn set_parameter_values(&mut self, updates: &[(ParamId, f64)]) -> Result<()> {
        let mut next = self.parameters.clone();
        next.set_values(updates)?;
        let values = evaluate_all(&self.sources, &next)?;
        self.parameters = next;
        self.values = values;
        Ok(())
    }

    /// Evaluates every rule against `parameters` without touching the store.
    pub fn evaluate_with(&self, parameters: &Parameters) -> Result<Vec<f64>> {
        evaluate_all(&self.sources, parameters)
    }
}

fn evaluate_all(sources: &[RuleProbability], parameters: &Parameters) -> Result<Vec<f64>> {
    sources
        .iter()
        .enumerate()
        .map(|(rule, source)| match source {
            RuleProbability::Deterministic => Ok(1.0),
            RuleProbability::Formula(formula) => formula.evaluate(parameters).map_err(|e| {
                ScfgError::probability(format!("rule {}", rule), e.to_string())
            }),
        })
        .collect()
}
