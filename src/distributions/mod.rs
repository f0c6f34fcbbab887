use std::fmt::Debug;

use anyhow::{bail, Context};
use dyn_clone::DynClone;
use log::{debug, info};
use statrs::distribution::{Beta, Continuous, ContinuousCDF, Gamma};
use statrs::function::beta::inv_beta_reg;

use crate::parameters::{unknown_parameter, Constraint, Parameter, ParameterList};
use crate::{ConfigError, DomainError, Result};

/// Finite distribution over real category values, used to spread a model parameter over
/// several substitution model components.
pub trait DiscreteDistribution: Debug + DynClone + Send {
    fn name(&self) -> &str;
    fn categories(&self) -> &[f64];
    fn probabilities(&self) -> &[f64];
    fn parameters(&self) -> &ParameterList;
    /// Sets one parameter and re-discretises the distribution.
    fn set_parameter(&mut self, name: &str, value: f64) -> Result<()>;

    fn n_categories(&self) -> usize {
        self.categories().len()
    }

    fn category(&self, k: usize) -> f64 {
        self.categories()[k]
    }

    fn probability(&self, k: usize) -> f64 {
        self.probabilities()[k]
    }

    fn mean(&self) -> f64 {
        self.categories()
            .iter()
            .zip(self.probabilities())
            .map(|(c, p)| c * p)
            .sum()
    }

    /// Sets every matching parameter of `values`, returns how many were set.
    fn set_parameters(&mut self, values: &ParameterList) -> Result<usize> {
        let mut matched = 0;
        for param in values.iter() {
            if self.parameters().contains(param.name()) {
                self.set_parameter(param.name(), param.value())?;
                matched += 1;
            }
        }
        Ok(matched)
    }
}

dyn_clone::clone_trait_object!(DiscreteDistribution);

fn uniform_probabilities(n: usize) -> Vec<f64> {
    vec![1.0 / n as f64; n]
}

fn check_categories(name: &str, n: usize) -> Result<()> {
    if n == 0 {
        bail!(ConfigError {
            message: format!("{} distribution needs at least one category.", name),
        });
    }
    Ok(())
}

/// Gamma quantile: the bisection of `inverse_cdf` is coarse, so it is polished with Newton
/// steps on the CDF.
fn gamma_quantile(dist: &Gamma, p: f64) -> f64 {
    let mut x = dist.inverse_cdf(p);
    for _ in 0..50 {
        let density = dist.pdf(x);
        if density <= 0.0 || !density.is_finite() {
            break;
        }
        let step = (dist.cdf(x) - p) / density;
        let next = if x - step > 0.0 { x - step } else { x / 2.0 };
        if (next - x).abs() <= 1e-15 * x {
            x = next;
            break;
        }
        x = next;
    }
    x
}

/// Equal probability classes with the conditional mean of each class as category value.
/// `partial` is the CDF of the size-biased distribution, `mean` the mean of the original one.
fn conditional_means(
    n: usize,
    bounds: impl Fn(f64) -> f64,
    partial: impl Fn(f64) -> f64,
    mean: f64,
) -> Vec<f64> {
    let mut values = Vec::with_capacity(n);
    let mut lower = 0.0;
    for k in 1..=n {
        let upper = if k == n {
            1.0
        } else {
            partial(bounds(k as f64 / n as f64))
        };
        values.push(n as f64 * mean * (upper - lower));
        lower = upper;
    }
    values
}

#[derive(Clone, Debug)]
pub struct ConstantDistribution {
    parameters: ParameterList,
    categories: Vec<f64>,
    probabilities: Vec<f64>,
}

impl ConstantDistribution {
    pub fn new(value: f64) -> Result<Self> {
        Ok(ConstantDistribution {
            parameters: [Parameter::new("value", value, None)?].into_iter().collect(),
            categories: vec![value],
            probabilities: vec![1.0],
        })
    }
}

impl DiscreteDistribution for ConstantDistribution {
    fn name(&self) -> &str {
        "Constant"
    }

    fn categories(&self) -> &[f64] {
        &self.categories
    }

    fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    fn parameters(&self) -> &ParameterList {
        &self.parameters
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        self.parameters.set_value(name, value)?;
        self.categories[0] = value;
        Ok(())
    }
}

/// Explicit category values `V1..Vn` with fixed probabilities.
#[derive(Clone, Debug)]
pub struct SimpleDiscreteDistribution {
    parameters: ParameterList,
    categories: Vec<f64>,
    probabilities: Vec<f64>,
}

impl SimpleDiscreteDistribution {
    pub fn new(values: &[f64], probabilities: &[f64]) -> Result<Self> {
        Self::with_constraint(values, probabilities, None)
    }

    /// Every value must satisfy `constraint`, also after later updates.
    pub fn with_constraint(
        values: &[f64],
        probabilities: &[f64],
        constraint: Option<Constraint>,
    ) -> Result<Self> {
        check_categories("Simple", values.len())?;
        if values.len() != probabilities.len() {
            bail!(ConfigError {
                message: format!(
                    "Got {} values but {} probabilities.",
                    values.len(),
                    probabilities.len()
                ),
            });
        }
        if (probabilities.iter().sum::<f64>() - 1.0).abs() > 1e-6
            || probabilities.iter().any(|&p| !(0.0..=1.0).contains(&p))
        {
            bail!(ConfigError {
                message: format!(
                    "Category probabilities must sum to 1, got {}.",
                    probabilities.iter().sum::<f64>()
                ),
            });
        }
        let parameters = values
            .iter()
            .enumerate()
            .map(|(i, &v)| Parameter::new(&format!("V{}", i + 1), v, constraint))
            .collect::<Result<ParameterList>>()?;
        Ok(SimpleDiscreteDistribution {
            parameters,
            categories: values.to_vec(),
            probabilities: probabilities.to_vec(),
        })
    }
}

impl DiscreteDistribution for SimpleDiscreteDistribution {
    fn name(&self) -> &str {
        "Simple"
    }

    fn categories(&self) -> &[f64] {
        &self.categories
    }

    fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    fn parameters(&self) -> &ParameterList {
        &self.parameters
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        self.parameters.set_value(name, value)?;
        self.categories = self.parameters.values();
        Ok(())
    }
}

/// Beta(alpha, beta) cut into `n` equal probability classes.
#[derive(Clone, Debug)]
pub struct BetaDiscreteDistribution {
    parameters: ParameterList,
    categories: Vec<f64>,
    probabilities: Vec<f64>,
}

impl BetaDiscreteDistribution {
    pub fn new(n: usize, alpha: f64, beta: f64) -> Result<Self> {
        check_categories("Beta", n)?;
        let mut dist = BetaDiscreteDistribution {
            parameters: [
                Parameter::new("alpha", alpha, Some(Constraint::Positive))?,
                Parameter::new("beta", beta, Some(Constraint::Positive))?,
            ]
            .into_iter()
            .collect(),
            categories: Vec::new(),
            probabilities: uniform_probabilities(n),
        };
        dist.discretise()?;
        Ok(dist)
    }

    fn discretise(&mut self) -> Result<()> {
        let n = self.probabilities.len();
        let alpha = self.parameters.value("alpha")?;
        let beta = self.parameters.value("beta")?;
        Beta::new(alpha, beta).map_err(|e| DomainError {
            message: format!("Invalid beta distribution: {}.", e),
        })?;
        let biased = Beta::new(alpha + 1.0, beta).map_err(|e| DomainError {
            message: format!("Invalid beta distribution: {}.", e),
        })?;
        self.categories = conditional_means(
            n,
            |p| inv_beta_reg(alpha, beta, p),
            |x| biased.cdf(x),
            alpha / (alpha + beta),
        );
        debug!("Beta({}, {}) categories: {:?}", alpha, beta, self.categories);
        Ok(())
    }
}

impl DiscreteDistribution for BetaDiscreteDistribution {
    fn name(&self) -> &str {
        "Beta"
    }

    fn categories(&self) -> &[f64] {
        &self.categories
    }

    fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    fn parameters(&self) -> &ParameterList {
        &self.parameters
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        self.parameters.set_value(name, value)?;
        self.discretise()
    }
}

/// Gamma with shape `alpha` and rate `beta` cut into `n` equal probability classes, every
/// category shifted by `offset`.
#[derive(Clone, Debug)]
pub struct GammaDiscreteDistribution {
    parameters: ParameterList,
    offset: f64,
    categories: Vec<f64>,
    probabilities: Vec<f64>,
}

impl GammaDiscreteDistribution {
    pub fn new(n: usize, alpha: f64, beta: f64) -> Result<Self> {
        Self::with_offset(n, alpha, beta, 0.0)
    }

    pub fn with_offset(n: usize, alpha: f64, beta: f64, offset: f64) -> Result<Self> {
        check_categories("Gamma", n)?;
        let mut dist = GammaDiscreteDistribution {
            parameters: [
                Parameter::new("alpha", alpha, Some(Constraint::Positive))?,
                Parameter::new("beta", beta, Some(Constraint::Positive))?,
            ]
            .into_iter()
            .collect(),
            offset,
            categories: Vec::new(),
            probabilities: uniform_probabilities(n),
        };
        dist.discretise()?;
        Ok(dist)
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    fn discretise(&mut self) -> Result<()> {
        let n = self.probabilities.len();
        let alpha = self.parameters.value("alpha")?;
        let beta = self.parameters.value("beta")?;
        let dist = Gamma::new(alpha, beta).map_err(|e| DomainError {
            message: format!("Invalid gamma distribution: {}.", e),
        })?;
        let biased = Gamma::new(alpha + 1.0, beta).map_err(|e| DomainError {
            message: format!("Invalid gamma distribution: {}.", e),
        })?;
        self.categories = conditional_means(
            n,
            |p| gamma_quantile(&dist, p),
            |x| biased.cdf(x),
            alpha / beta,
        )
        .into_iter()
        .map(|c| c + self.offset)
        .collect();
        debug!("Gamma({}, {}) categories: {:?}", alpha, beta, self.categories);
        Ok(())
    }
}

impl DiscreteDistribution for GammaDiscreteDistribution {
    fn name(&self) -> &str {
        "Gamma"
    }

    fn categories(&self) -> &[f64] {
        &self.categories
    }

    fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    fn parameters(&self) -> &ParameterList {
        &self.parameters
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        self.parameters.set_value(name, value)?;
        self.discretise()
    }
}

/// Weighted mixture of discrete distributions. The weights are parametrised by stick breaking
/// with `theta1..theta(k-1)`, sub-distribution parameters are exposed as
/// `{i}_{Name}.{param}` with `i` starting at 1. Categories are concatenated, not merged.
#[derive(Clone, Debug)]
pub struct MixtureOfDiscreteDistributions {
    distributions: Vec<Box<dyn DiscreteDistribution>>,
    parameters: ParameterList,
    categories: Vec<f64>,
    probabilities: Vec<f64>,
}

impl MixtureOfDiscreteDistributions {
    pub fn new(distributions: Vec<Box<dyn DiscreteDistribution>>, weights: &[f64]) -> Result<Self> {
        if distributions.is_empty() {
            bail!(ConfigError {
                message: "Mixture needs at least one distribution.".to_string(),
            });
        }
        if distributions.len() != weights.len() {
            bail!(ConfigError {
                message: format!(
                    "Got {} distributions but {} weights.",
                    distributions.len(),
                    weights.len()
                ),
            });
        }
        if (weights.iter().sum::<f64>() - 1.0).abs() > 1e-6 {
            bail!(ConfigError {
                message: format!(
                    "Mixture weights must sum to 1, got {}.",
                    weights.iter().sum::<f64>()
                ),
            });
        }
        let mut parameters = ParameterList::new();
        let mut remaining = 1.0;
        for (i, &w) in weights.iter().enumerate().take(weights.len() - 1) {
            let theta = if remaining > 0.0 { w / remaining } else { 0.5 };
            parameters.push(
                Parameter::new(
                    &format!("theta{}", i + 1),
                    theta,
                    Some(Constraint::Probability),
                )
                .with_context(|| format!("Invalid weight {} in mixture.", w))?,
            );
            remaining -= w;
        }
        for (i, dist) in distributions.iter().enumerate() {
            for param in dist.parameters().iter() {
                parameters.push(param.renamed(&format!(
                    "{}_{}.{}",
                    i + 1,
                    dist.name(),
                    param.name()
                )));
            }
        }
        let mut mixture = MixtureOfDiscreteDistributions {
            distributions,
            parameters,
            categories: Vec::new(),
            probabilities: Vec::new(),
        };
        mixture.collect_categories()?;
        info!(
            "Set up mixture of {} distributions with {} categories.",
            mixture.distributions.len(),
            mixture.categories.len()
        );
        Ok(mixture)
    }

    pub fn distributions(&self) -> &[Box<dyn DiscreteDistribution>] {
        &self.distributions
    }

    pub fn weights(&self) -> Result<Vec<f64>> {
        let mut weights = Vec::with_capacity(self.distributions.len());
        let mut remaining = 1.0;
        for i in 1..self.distributions.len() {
            let theta = self.parameters.value(&format!("theta{}", i))?;
            weights.push(remaining * theta);
            remaining *= 1.0 - theta;
        }
        weights.push(remaining);
        Ok(weights)
    }

    fn collect_categories(&mut self) -> Result<()> {
        let weights = self.weights()?;
        self.categories = self
            .distributions
            .iter()
            .flat_map(|d| d.categories().to_vec())
            .collect();
        self.probabilities = self
            .distributions
            .iter()
            .zip(weights)
            .flat_map(|(d, w)| d.probabilities().iter().map(move |p| p * w).collect::<Vec<_>>())
            .collect();
        Ok(())
    }

    /// Splits `{i}_{Name}.{param}` into the sub-distribution index and its own parameter name.
    fn sub_parameter(&self, name: &str) -> Option<(usize, String)> {
        let (index, rest) = name.split_once('_')?;
        let index = index.parse::<usize>().ok()?.checked_sub(1)?;
        let dist = self.distributions.get(index)?;
        let param = rest.strip_prefix(dist.name())?.strip_prefix('.')?;
        Some((index, param.to_string()))
    }
}

impl DiscreteDistribution for MixtureOfDiscreteDistributions {
    fn name(&self) -> &str {
        "Mixture"
    }

    fn categories(&self) -> &[f64] {
        &self.categories
    }

    fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    fn parameters(&self) -> &ParameterList {
        &self.parameters
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        if !self.parameters.contains(name) {
            bail!(unknown_parameter(name));
        }
        if let Some((index, param)) = self.sub_parameter(name) {
            self.distributions[index].set_parameter(&param, value)?;
        }
        self.parameters.set_value(name, value)?;
        self.collect_categories()
    }
}
