use std::fmt::Display;

use anyhow::bail;

use crate::{DomainError, Result};

/// Domain of a model or distribution parameter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Constraint {
    /// x > 0
    Positive,
    /// x >= 0
    NonNegative,
    /// 0 <= x <= 1
    Probability,
    /// x > bound
    Above(f64),
    /// lower <= x <= upper
    Closed(f64, f64),
}

impl Constraint {
    pub fn contains(&self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        match *self {
            Constraint::Positive => value > 0.0,
            Constraint::NonNegative => value >= 0.0,
            Constraint::Probability => (0.0..=1.0).contains(&value),
            Constraint::Above(bound) => value > bound,
            Constraint::Closed(lower, upper) => (lower..=upper).contains(&value),
        }
    }

    /// Closed search interval inside the constraint, `None` for an unbounded upper end.
    pub fn search_bounds(&self) -> (f64, Option<f64>) {
        match *self {
            Constraint::Positive => (f64::EPSILON, None),
            Constraint::NonNegative => (0.0, None),
            Constraint::Probability => (0.0, Some(1.0)),
            Constraint::Above(bound) => (bound + f64::EPSILON.max(bound.abs() * 1e-12), None),
            Constraint::Closed(lower, upper) => (lower, Some(upper)),
        }
    }
}

impl Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constraint::Positive => write!(f, "]0, +inf["),
            Constraint::NonNegative => write!(f, "[0, +inf["),
            Constraint::Probability => write!(f, "[0, 1]"),
            Constraint::Above(bound) => write!(f, "]{}, +inf[", bound),
            Constraint::Closed(lower, upper) => write!(f, "[{}, {}]", lower, upper),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Parameter {
    name: String,
    value: f64,
    constraint: Option<Constraint>,
}

impl Parameter {
    pub fn new(name: &str, value: f64, constraint: Option<Constraint>) -> Result<Self> {
        check_value(name, value, constraint.as_ref())?;
        Ok(Parameter {
            name: name.to_string(),
            value,
            constraint,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn constraint(&self) -> Option<&Constraint> {
        self.constraint.as_ref()
    }

    pub fn set_value(&mut self, value: f64) -> Result<()> {
        check_value(&self.name, value, self.constraint.as_ref())?;
        self.value = value;
        Ok(())
    }

    /// Same value and constraint under a different name.
    pub fn renamed(&self, name: &str) -> Parameter {
        Parameter {
            name: name.to_string(),
            value: self.value,
            constraint: self.constraint,
        }
    }
}

fn check_value(name: &str, value: f64, constraint: Option<&Constraint>) -> Result<()> {
    match constraint {
        Some(constraint) if !constraint.contains(value) => bail!(DomainError {
            message: format!(
                "Value {} for parameter {} is outside of {}.",
                value, name, constraint
            ),
        }),
        None if value.is_nan() => bail!(DomainError {
            message: format!("Value for parameter {} is not a number.", name),
        }),
        _ => Ok(()),
    }
}

/// Ordered list of named parameters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParameterList {
    params: Vec<Parameter>,
}

impl ParameterList {
    pub fn new() -> Self {
        ParameterList { params: Vec::new() }
    }

    pub fn push(&mut self, param: Parameter) {
        match self.params.iter_mut().find(|p| p.name == param.name) {
            Some(existing) => *existing = param,
            None => self.params.push(param),
        }
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.params.iter().map(|p| p.name.clone()).collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.params.iter().map(|p| p.value).collect()
    }

    pub fn value(&self, name: &str) -> Result<f64> {
        match self.get(name) {
            Some(param) => Ok(param.value),
            None => bail!(unknown_parameter(name)),
        }
    }

    pub fn set_value(&mut self, name: &str, value: f64) -> Result<()> {
        match self.params.iter_mut().find(|p| p.name == name) {
            Some(param) => param.set_value(value),
            None => bail!(unknown_parameter(name)),
        }
    }

    /// Sets every parameter of `values` that is part of this list, returns the number of
    /// parameters that were matched. Nothing is changed if any value is invalid.
    pub fn match_values(&mut self, values: &ParameterList) -> Result<usize> {
        let mut updated = self.clone();
        let mut matched = 0;
        for param in values.iter() {
            if updated.contains(&param.name) {
                updated.set_value(&param.name, param.value)?;
                matched += 1;
            }
        }
        *self = updated;
        Ok(matched)
    }
}

impl FromIterator<Parameter> for ParameterList {
    fn from_iter<T: IntoIterator<Item = Parameter>>(iter: T) -> Self {
        let mut list = ParameterList::new();
        for param in iter {
            list.push(param);
        }
        list
    }
}

impl Display for ParameterList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}]",
            self.params
                .iter()
                .map(|p| format!("{} = {:.5}", p.name, p.value))
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

pub(crate) fn unknown_parameter(name: &str) -> DomainError {
    DomainError {
        message: format!("Unknown parameter {}.", name),
    }
}
