use std::collections::{BTreeMap, HashMap};

use anyhow::{bail, Context};
use itertools::Itertools;
use log::{error, info};

use crate::alphabets::Alphabet;
use crate::distributions::DiscreteDistribution;
use crate::parameters::{unknown_parameter, ParameterList};
use crate::substitution_models::{check_rate, FreqVector, SubstMatrix, SubstitutionModel};
use crate::{ConfigError, DomainError, Result};

/// Mixture of copies of one template model. Every distributed parameter of the template is
/// spread over the categories of its discrete distribution, and one component is built for
/// every combination of categories.
#[derive(Clone, Debug)]
pub struct MixtureModel {
    name: String,
    distributions: BTreeMap<String, Box<dyn DiscreteDistribution>>,
    components: Vec<Box<dyn SubstitutionModel>>,
    categories: Vec<Vec<usize>>,
    probabilities: Vec<f64>,
    vrates: Vec<f64>,
    rate: f64,
    parameters: ParameterList,
}

impl MixtureModel {
    pub fn new(
        template: Box<dyn SubstitutionModel>,
        distributions: BTreeMap<String, Box<dyn DiscreteDistribution>>,
    ) -> Result<Self> {
        for (name, dist) in distributions.iter() {
            if !template.parameters().contains(name) {
                bail!(ConfigError {
                    message: format!(
                        "Parameter {} is not part of model {}.",
                        name,
                        template.name()
                    ),
                });
            }
            if dist.n_categories() == 0 {
                bail!(ConfigError {
                    message: format!("Distribution for {} has no categories.", name),
                });
            }
        }
        let categories: Vec<Vec<usize>> = if distributions.is_empty() {
            vec![Vec::new()]
        } else {
            distributions
                .values()
                .map(|d| 0..d.n_categories())
                .multi_cartesian_product()
                .collect()
        };

        let mut parameters: ParameterList = template
            .parameters()
            .iter()
            .filter(|p| !distributions.contains_key(p.name()))
            .cloned()
            .collect();
        for (name, dist) in distributions.iter() {
            for param in dist.parameters().iter() {
                parameters.push(param.renamed(&qualified_name(name, dist.as_ref(), param.name())));
            }
        }

        let mut mixture = MixtureModel {
            name: format!("MixtureOf{}", template.name()),
            components: vec![template.clone(); categories.len()],
            vrates: vec![1.0; categories.len()],
            probabilities: Vec::new(),
            rate: template.rate(),
            categories,
            distributions,
            parameters,
        };
        mixture.components = mixture.apply_categories(&mixture.distributions)?;
        mixture.probabilities = mixture.component_probabilities(&mixture.distributions);
        mixture.apply_rates()?;
        info!(
            "Set up {} with {} components.",
            mixture.name,
            mixture.components.len()
        );
        Ok(mixture)
    }

    pub fn n_models(&self) -> usize {
        self.components.len()
    }

    pub fn component_count(&self) -> usize {
        self.n_models()
    }

    pub fn n_model(&self, i: usize) -> Option<&dyn SubstitutionModel> {
        self.components.get(i).map(|c| c.as_ref())
    }

    pub fn component(&self, i: usize) -> Option<&dyn SubstitutionModel> {
        self.n_model(i)
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    /// Relative rates of the components, normalised to `Σ p_k r_k = 1`.
    pub fn component_rates(&self) -> &[f64] {
        &self.vrates
    }

    pub fn distributions(&self) -> &BTreeMap<String, Box<dyn DiscreteDistribution>> {
        &self.distributions
    }

    /// Category value of every distributed parameter for component `i`.
    pub fn component_values(&self, i: usize) -> Vec<(String, f64)> {
        self.distributions
            .iter()
            .zip(&self.categories[i])
            .map(|((name, dist), &k)| (name.clone(), dist.category(k)))
            .collect()
    }

    pub fn set_component_rates(&mut self, vrates: &[f64]) -> Result<()> {
        if vrates.len() != self.components.len() {
            bail!(DomainError {
                message: format!(
                    "Expected {} component rates, got {}.",
                    self.components.len(),
                    vrates.len()
                ),
            });
        }
        if vrates.iter().any(|&r| !(r.is_finite() && r > 0.0)) {
            bail!(DomainError {
                message: format!("Component rates must be positive, got {:?}.", vrates),
            });
        }
        self.vrates = vrates.to_vec();
        self.normalise_rates()
    }

    /// Rescales the relative rates so that their mean over the component probabilities is 1.
    fn normalise_rates(&mut self) -> Result<()> {
        let total: f64 = self
            .vrates
            .iter()
            .zip(&self.probabilities)
            .map(|(r, p)| r * p)
            .sum();
        self.vrates.iter_mut().for_each(|r| *r /= total);
        self.apply_rates()
    }

    fn apply_rates(&mut self) -> Result<()> {
        for (component, vrate) in self.components.iter_mut().zip(&self.vrates) {
            component.set_rate(self.rate * vrate)?;
        }
        Ok(())
    }

    fn component_probabilities(
        &self,
        distributions: &BTreeMap<String, Box<dyn DiscreteDistribution>>,
    ) -> Vec<f64> {
        self.categories
            .iter()
            .map(|combination| {
                distributions
                    .values()
                    .zip(combination)
                    .map(|(dist, &k)| dist.probability(k))
                    .product()
            })
            .collect()
    }

    /// Components with the category values of `distributions` applied, `self` is not touched.
    fn apply_categories(
        &self,
        distributions: &BTreeMap<String, Box<dyn DiscreteDistribution>>,
    ) -> Result<Vec<Box<dyn SubstitutionModel>>> {
        let mut components = self.components.clone();
        for (component, combination) in components.iter_mut().zip(&self.categories) {
            for ((name, dist), &k) in distributions.iter().zip(combination) {
                component
                    .set_parameter(name, dist.category(k))
                    .with_context(|| {
                        format!("Category {} of {} is not a valid value.", k + 1, name)
                    })?;
            }
        }
        Ok(components)
    }

    fn distribution_parameter(&self, name: &str) -> Option<(String, String)> {
        self.distributions.iter().find_map(|(param, dist)| {
            name.strip_prefix(&format!("{}_{}.", param, dist.name()))
                .map(|rest| (param.clone(), rest.to_string()))
        })
    }
}

fn qualified_name(param: &str, dist: &dyn DiscreteDistribution, dist_param: &str) -> String {
    format!("{}_{}.{}", param, dist.name(), dist_param)
}

impl SubstitutionModel for MixtureModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn alphabet(&self) -> &'static Alphabet {
        self.components[0].alphabet()
    }

    fn alphabet_states(&self) -> &[usize] {
        self.components[0].alphabet_states()
    }

    fn freqs(&self) -> &FreqVector {
        self.components[0].freqs()
    }

    fn set_freqs(&mut self, _freqs: &HashMap<usize, f64>) -> Result<()> {
        error!("Frequencies of a mixture are set through its components' model.");
        bail!(ConfigError {
            message: "Frequencies of a mixture model cannot be set directly.".to_string(),
        })
    }

    fn rate(&self) -> f64 {
        self.rate
    }

    fn set_rate(&mut self, rate: f64) -> Result<()> {
        check_rate(rate)?;
        self.rate = rate;
        self.apply_rates()
    }

    fn q(&self) -> SubstMatrix {
        let n = self.n();
        self.components
            .iter()
            .zip(&self.probabilities)
            .zip(&self.vrates)
            .fold(SubstMatrix::zeros(n, n), |acc, ((c, p), r)| acc + c.q() * (p * r))
    }

    fn qij(&self, i: usize, j: usize) -> f64 {
        self.components
            .iter()
            .zip(&self.probabilities)
            .zip(&self.vrates)
            .map(|((c, p), r)| c.qij(i, j) * p * r)
            .sum()
    }

    fn p(&self, time: f64) -> SubstMatrix {
        let n = self.n();
        if time == 0.0 {
            return SubstMatrix::identity(n, n);
        }
        self.components
            .iter()
            .zip(&self.probabilities)
            .fold(SubstMatrix::zeros(n, n), |acc, (c, p)| acc + c.p(time) * *p)
    }

    fn dp(&self, time: f64) -> SubstMatrix {
        let n = self.n();
        self.components
            .iter()
            .zip(&self.probabilities)
            .fold(SubstMatrix::zeros(n, n), |acc, (c, p)| acc + c.dp(time) * *p)
    }

    fn d2p(&self, time: f64) -> SubstMatrix {
        let n = self.n();
        self.components
            .iter()
            .zip(&self.probabilities)
            .fold(SubstMatrix::zeros(n, n), |acc, (c, p)| acc + c.d2p(time) * *p)
    }

    fn transition_probability(&self, i: usize, j: usize, time: f64) -> f64 {
        if time == 0.0 {
            return if i == j { 1.0 } else { 0.0 };
        }
        self.components
            .iter()
            .zip(&self.probabilities)
            .map(|(c, p)| c.transition_probability(i, j, time) * p)
            .sum()
    }

    fn first_derivative(&self, i: usize, j: usize, time: f64) -> f64 {
        self.components
            .iter()
            .zip(&self.probabilities)
            .map(|(c, p)| c.first_derivative(i, j, time) * p)
            .sum()
    }

    fn second_derivative(&self, i: usize, j: usize, time: f64) -> f64 {
        self.components
            .iter()
            .zip(&self.probabilities)
            .map(|(c, p)| c.second_derivative(i, j, time) * p)
            .sum()
    }

    fn init_value(&self, i: usize, code: usize) -> Result<f64> {
        self.components[0].init_value(i, code)
    }

    fn parameters(&self) -> &ParameterList {
        &self.parameters
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        if !self.parameters.contains(name) {
            bail!(unknown_parameter(name));
        }
        let mut parameters = self.parameters.clone();
        parameters.set_value(name, value)?;
        if let Some((param, dist_param)) = self.distribution_parameter(name) {
            let mut distributions = self.distributions.clone();
            if let Some(dist) = distributions.get_mut(&param) {
                let n_categories = dist.n_categories();
                dist.set_parameter(&dist_param, value)?;
                if dist.n_categories() != n_categories {
                    bail!(ConfigError {
                        message: format!(
                            "Distribution for {} changed its number of categories.",
                            param
                        ),
                    });
                }
            }
            self.components = self.apply_categories(&distributions)?;
            self.probabilities = self.component_probabilities(&distributions);
            self.distributions = distributions;
            self.normalise_rates()?;
        } else {
            let mut components = self.components.clone();
            for component in components.iter_mut() {
                component.set_parameter(name, value)?;
            }
            self.components = components;
        }
        self.parameters = parameters;
        Ok(())
    }

    fn update_matrices(&mut self) -> Result<()> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "par-mixture")] {
                use rayon::prelude::*;
                self.components
                    .par_iter_mut()
                    .try_for_each(|component| component.update_matrices())
            } else {
                self.components
                    .iter_mut()
                    .try_for_each(|component| component.update_matrices())
            }
        }
    }
}
