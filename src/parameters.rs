use serde::Serialize;
use std::collections::HashMap;

use crate::error::{Result, ScfgError};

/// Dense index of a parameter inside a [`Parameters`] registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ParamId(pub usize);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    pub name: String,
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Named, bounded floating-point parameters that rule probabilities are
/// expressed over.
///
/// Every successful update advances `epoch`; anything caching values derived
/// from the parameters compares epochs to detect staleness.
#[derive(Debug, Clone, Default)]
pub struct Parameters {
    params: Vec<Parameter>,
    by_name: HashMap<String, ParamId>,
    epoch: u64,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str, value: f64, lower: f64, upper: f64) -> Result<ParamId> {
        if self.by_name.contains_key(name) {
            return Err(ScfgError::ParameterUpdate(format!(
                "parameter '{}' declared twice",
                name
            )));
        }
        if !(lower <= upper) || !lower.is_finite() || !upper.is_finite() {
            return Err(ScfgError::ParameterUpdate(format!(
                "parameter '{}' has invalid bounds [{}, {}]",
                name, lower, upper
            )));
        }
        check_in_bounds(name, value, lower, upper)?;

        let id = ParamId(self.params.len());
        self.params.push(Parameter {
            name: name.to_string(),
            value,
            lower,
            upper,
        });
        self.by_name.insert(name.to_string(), id);
        self.epoch += 1;
        Ok(id)
    }

    pub fn id(&self, name: &str) -> Option<ParamId> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, id: ParamId) -> Option<&Parameter> {
        self.params.get(id.0)
    }

    pub fn value_of(&self, name: &str) -> Option<f64> {
        self.id(name).map(|id| self.params[id.0].value)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParamId, &Parameter)> {
        self.params.iter().enumerate().map(|(i, p)| (ParamId(i), p))
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Assigns several parameters at once. Either every assignment is
    /// applied or none is.
    pub fn set_values(&mut self, updates: &[(ParamId, f64)]) -> Result<()> {
        for &(id, value) in updates {
            let param = self.params.get(id.0).ok_or_else(|| {
                ScfgError::ParameterUpdate(format!("unknown parameter index {}", id.0))
            })?;
            check_in_bounds(&param.name, value, param.lower, param.upper)?;
        }
        for &(id, value) in updates {
            self.params[id.0].value = value;
        }
        self.epoch += 1;
        Ok(())
    }

    pub fn set_value(&mut self, name: &str, value: f64) -> Result<()> {
        let id = self
            .id(name)
            .ok_or_else(|| ScfgError::ParameterUpdate(format!("unknown parameter '{}'", name)))?;
        self.set_values(&[(id, value)])
    }
}

fn check_in_bounds(name: &str, value: f64, lower: f64, upper: f64) -> Result<()> {
    if value.is_finite() && value >= lower && value <= upper {
        Ok(())
    } else {
        Err(ScfgError::ParameterUpdate(format!(
            "value {} for '{}' lies outside [{}, {}]",
            value, name, lower, upper
        )))
    }
}
