use std::fmt::Display;

use anyhow::bail;
use log::info;

use crate::parameters::{unknown_parameter, Constraint, Parameter, ParameterList};
use crate::substitution_models::{FreqVector, SubstMatrix, SubstitutionModel};
use crate::{ConfigError, DomainError, Result};

/// Function of named parameters to be minimised, with analytic first and second order
/// derivatives along every parameter.
pub trait DerivableObjective {
    fn parameters(&self) -> &ParameterList;
    /// Sets the given values, all or none. Names that are not part of the objective are
    /// rejected.
    fn set_parameters(&mut self, values: &ParameterList) -> Result<()>;
    fn value(&self) -> f64;
    fn first_derivative(&self, name: &str) -> Result<f64>;
    fn second_derivative(&self, name: &str) -> Result<f64>;
    fn enable_second_order_derivatives(&mut self, enable: bool);

    fn f(&mut self, values: &ParameterList) -> Result<f64> {
        self.set_parameters(values)?;
        Ok(self.value())
    }
}

/// Cost that depends on the parameters of a substitution model.
pub trait ModelCost {
    fn cost(&self) -> f64;
    fn model_parameters(&self) -> &ParameterList;
    fn set_model_parameter(&mut self, name: &str, value: f64) -> Result<()>;
}

pub const BRANCH_LENGTH: &str = "BrLen";

/// Negative log-likelihood of two aligned sequences separated by a single branch.
#[derive(Clone, Debug)]
pub struct BranchLengthCost<M: SubstitutionModel> {
    model: M,
    left: Vec<FreqVector>,
    right: Vec<FreqVector>,
    parameters: ParameterList,
    second_order: bool,
}

impl<M: SubstitutionModel> BranchLengthCost<M> {
    pub fn new(model: M, seq1: &[usize], seq2: &[usize], length: f64) -> Result<Self> {
        if seq1.len() != seq2.len() {
            bail!(DomainError {
                message: format!(
                    "Sequences have different lengths: {} and {}.",
                    seq1.len(),
                    seq2.len()
                ),
            });
        }
        let left = seq1
            .iter()
            .map(|&code| init_vector(&model, code))
            .collect::<Result<Vec<_>>>()?;
        let right = seq2
            .iter()
            .map(|&code| init_vector(&model, code))
            .collect::<Result<Vec<_>>>()?;
        let parameters = [Parameter::new(
            BRANCH_LENGTH,
            length,
            Some(Constraint::NonNegative),
        )?]
        .into_iter()
        .collect();
        info!(
            "Set up branch length cost for {} sites under {}.",
            left.len(),
            model.name()
        );
        Ok(BranchLengthCost {
            model,
            left,
            right,
            parameters,
            second_order: false,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn branch_length(&self) -> f64 {
        // BrLen is always present
        self.parameters.values()[0]
    }

    pub fn n_sites(&self) -> usize {
        self.left.len()
    }

    fn site_terms(&self, matrix: &SubstMatrix) -> Vec<f64> {
        let freqs = self.model.freqs();
        self.left
            .iter()
            .zip(&self.right)
            .map(|(a, b)| a.component_mul(freqs).dot(&(matrix * b)))
            .collect()
    }

    fn check_name(&self, name: &str) -> Result<()> {
        if name != BRANCH_LENGTH {
            bail!(unknown_parameter(name));
        }
        Ok(())
    }
}

fn init_vector<M: SubstitutionModel>(model: &M, code: usize) -> Result<FreqVector> {
    let values = (0..model.n())
        .map(|i| model.init_value(i, code))
        .collect::<Result<Vec<_>>>()?;
    Ok(FreqVector::from_vec(values))
}

impl<M: SubstitutionModel> DerivableObjective for BranchLengthCost<M> {
    fn parameters(&self) -> &ParameterList {
        &self.parameters
    }

    fn set_parameters(&mut self, values: &ParameterList) -> Result<()> {
        if let Some(param) = values.iter().find(|p| !self.parameters.contains(p.name())) {
            bail!(unknown_parameter(param.name()));
        }
        self.parameters.match_values(values)?;
        Ok(())
    }

    fn value(&self) -> f64 {
        -self
            .site_terms(&self.model.p(self.branch_length()))
            .iter()
            .map(|l| l.ln())
            .sum::<f64>()
    }

    fn first_derivative(&self, name: &str) -> Result<f64> {
        self.check_name(name)?;
        let t = self.branch_length();
        let l = self.site_terms(&self.model.p(t));
        let dl = self.site_terms(&self.model.dp(t));
        Ok(-l.iter().zip(&dl).map(|(l, dl)| dl / l).sum::<f64>())
    }

    fn second_derivative(&self, name: &str) -> Result<f64> {
        self.check_name(name)?;
        if !self.second_order {
            bail!(ConfigError {
                message: "Second order derivatives are not enabled.".to_string(),
            });
        }
        let t = self.branch_length();
        let l = self.site_terms(&self.model.p(t));
        let dl = self.site_terms(&self.model.dp(t));
        let d2l = self.site_terms(&self.model.d2p(t));
        Ok(-l
            .iter()
            .zip(dl.iter().zip(&d2l))
            .map(|(l, (dl, d2l))| d2l / l - (dl / l).powi(2))
            .sum::<f64>())
    }

    fn enable_second_order_derivatives(&mut self, enable: bool) {
        self.second_order = enable;
    }
}

impl<M: SubstitutionModel> ModelCost for BranchLengthCost<M> {
    fn cost(&self) -> f64 {
        self.value()
    }

    fn model_parameters(&self) -> &ParameterList {
        self.model.parameters()
    }

    fn set_model_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        self.model.set_parameter(name, value)
    }
}

impl<M: SubstitutionModel> Display for BranchLengthCost<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} with {} = {:.5}",
            self.model.name(),
            self.model.parameters(),
            BRANCH_LENGTH,
            self.branch_length()
        )
    }
}
