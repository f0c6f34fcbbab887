use std::collections::{BTreeMap, HashMap};

use anyhow::bail;
use log::{debug, info};

use crate::alphabets::{
    codon_alphabet, codon_nucleotides, is_transition, Alphabet, GeneticCode,
};
use crate::distributions::{
    BetaDiscreteDistribution, DiscreteDistribution, GammaDiscreteDistribution,
    MixtureOfDiscreteDistributions, SimpleDiscreteDistribution,
};
use crate::parameters::{unknown_parameter, Constraint, Parameter, ParameterList};
use crate::substitution_models::{
    ExchangeabilityMaker, FreqVector, MixtureModel, ReversibleModel, SubstMatrix,
    SubstitutionModel,
};
use crate::{ConfigError, Result};

pub type YN98Model = ReversibleModel<YN98>;

/// Yang and Nielsen (1998) codon model over the sense codons of a genetic code. Codons that
/// differ at more than one position do not exchange, single changes are scaled by `kappa`
/// for transitions and by `omega` for non-synonymous changes.
#[derive(Clone, Copy, Debug)]
pub struct YN98 {
    code: &'static GeneticCode,
}

impl YN98 {
    pub fn new(code: &'static GeneticCode) -> Self {
        YN98 { code }
    }

    pub fn genetic_code(&self) -> &'static GeneticCode {
        self.code
    }
}

impl ExchangeabilityMaker for YN98 {
    fn name(&self) -> &str {
        "YN98"
    }

    fn alphabet(&self) -> &'static Alphabet {
        codon_alphabet()
    }

    fn states(&self) -> Vec<usize> {
        self.code.sense_codons()
    }

    fn default_parameters(&self) -> Result<ParameterList> {
        Ok([
            Parameter::new("kappa", 1.0, Some(Constraint::Positive))?,
            Parameter::new("omega", 1.0, Some(Constraint::Positive))?,
        ]
        .into_iter()
        .collect())
    }

    fn exchangeability(&self, params: &ParameterList) -> Result<SubstMatrix> {
        let kappa = params.value("kappa")?;
        let omega = params.value("omega")?;
        let states = self.states();
        let n = states.len();
        let mut s = SubstMatrix::zeros(n, n);
        for (i, &from) in states.iter().enumerate() {
            for (j, &to) in states.iter().enumerate().take(i) {
                let (a, b) = (codon_nucleotides(from), codon_nucleotides(to));
                let changes: Vec<usize> = (0..3).filter(|&k| a[k] != b[k]).collect();
                if changes.len() != 1 {
                    continue;
                }
                let k = changes[0];
                let mut value = 1.0;
                if is_transition(a[k], b[k]) {
                    value *= kappa;
                }
                if !self.code.are_synonymous(from, to) {
                    value *= omega;
                }
                s[(i, j)] = value;
                s[(j, i)] = value;
            }
        }
        Ok(s)
    }
}

/// Mixture model from the literature, exposed through a reduced set of parameters with short
/// names in the model namespace. The components share the synonymous substitution rate.
#[derive(Clone, Debug)]
pub struct BiblioMixtureModel {
    name: String,
    mixture: MixtureModel,
    names: Vec<(String, String)>,
    parameters: ParameterList,
    synonymous_pair: (usize, usize),
    n_beta: usize,
    n_gamma: usize,
}

impl BiblioMixtureModel {
    fn new(
        name: &str,
        code: &'static GeneticCode,
        mixture: MixtureModel,
        names: &[(&str, &str)],
        n_beta: usize,
        n_gamma: usize,
    ) -> Result<Self> {
        let namespace = format!("{}.", name);
        let mut parameters = ParameterList::new();
        for (internal, external) in names {
            match mixture.parameters().get(internal) {
                Some(param) => parameters.push(param.renamed(&format!("{}{}", namespace, external))),
                None => bail!(ConfigError {
                    message: format!("Model {} has no parameter {}.", mixture.name(), internal),
                }),
            }
        }
        let synonymous_pair = find_synonymous_pair(&mixture, code)?;
        debug!(
            "{} normalises on the synonymous pair {:?}.",
            name, synonymous_pair
        );
        let mut model = BiblioMixtureModel {
            name: name.to_string(),
            mixture,
            names: names
                .iter()
                .map(|(i, e)| (i.to_string(), format!("{}{}", namespace, e)))
                .collect(),
            parameters,
            synonymous_pair,
            n_beta,
            n_gamma,
        };
        normalise_synonymous_rates(&mut model.mixture, synonymous_pair)?;
        info!("Set up {} with parameters {}", name, model.parameters);
        Ok(model)
    }

    pub fn namespace(&self) -> String {
        format!("{}.", self.name)
    }

    pub fn mixture(&self) -> &MixtureModel {
        &self.mixture
    }

    pub fn component_count(&self) -> usize {
        self.mixture.component_count()
    }

    pub fn component(&self, k: usize) -> Option<&dyn SubstitutionModel> {
        self.mixture.component(k)
    }

    pub fn synonymous_pair(&self) -> (usize, usize) {
        self.synonymous_pair
    }

    pub fn n_beta(&self) -> usize {
        self.n_beta
    }

    pub fn n_gamma(&self) -> usize {
        self.n_gamma
    }

    /// Mixture parameter behind an external name, which may omit the namespace.
    pub fn internal_name(&self, name: &str) -> Option<&str> {
        self.lookup(name).map(|(internal, _)| internal.as_str())
    }

    fn lookup(&self, name: &str) -> Option<&(String, String)> {
        let namespace = self.namespace();
        let full = if name.starts_with(&namespace) {
            name.to_string()
        } else {
            format!("{}{}", namespace, name)
        };
        self.names.iter().find(|(_, external)| *external == full)
    }
}

fn find_synonymous_pair(mixture: &MixtureModel, code: &GeneticCode) -> Result<(usize, usize)> {
    let states = mixture.alphabet_states();
    for from in 1..states.len() {
        for to in 0..from {
            if code.are_synonymous(states[from], states[to])
                && (0..mixture.component_count()).all(|k| {
                    mixture
                        .component(k)
                        .is_some_and(|c| c.qij(from, to) != 0.0)
                })
            {
                return Ok((from, to));
            }
        }
    }
    bail!(ConfigError {
        message: "No synonymous codon pair with a nonzero rate in every component.".to_string(),
    })
}

/// Gives every component the same synonymous substitution rate.
fn normalise_synonymous_rates(mixture: &mut MixtureModel, (from, to): (usize, usize)) -> Result<()> {
    let vrates: Vec<f64> = (0..mixture.component_count())
        .filter_map(|k| mixture.component(k))
        .map(|c| 1.0 / c.qij(from, to))
        .collect();
    mixture.set_component_rates(&vrates)
}

impl SubstitutionModel for BiblioMixtureModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn alphabet(&self) -> &'static Alphabet {
        self.mixture.alphabet()
    }

    fn alphabet_states(&self) -> &[usize] {
        self.mixture.alphabet_states()
    }

    fn freqs(&self) -> &FreqVector {
        self.mixture.freqs()
    }

    fn set_freqs(&mut self, freqs: &HashMap<usize, f64>) -> Result<()> {
        self.mixture.set_freqs(freqs)
    }

    fn rate(&self) -> f64 {
        self.mixture.rate()
    }

    fn set_rate(&mut self, rate: f64) -> Result<()> {
        self.mixture.set_rate(rate)
    }

    fn q(&self) -> SubstMatrix {
        self.mixture.q()
    }

    fn qij(&self, i: usize, j: usize) -> f64 {
        self.mixture.qij(i, j)
    }

    fn p(&self, time: f64) -> SubstMatrix {
        self.mixture.p(time)
    }

    fn dp(&self, time: f64) -> SubstMatrix {
        self.mixture.dp(time)
    }

    fn d2p(&self, time: f64) -> SubstMatrix {
        self.mixture.d2p(time)
    }

    fn transition_probability(&self, i: usize, j: usize, time: f64) -> f64 {
        self.mixture.transition_probability(i, j, time)
    }

    fn first_derivative(&self, i: usize, j: usize, time: f64) -> f64 {
        self.mixture.first_derivative(i, j, time)
    }

    fn second_derivative(&self, i: usize, j: usize, time: f64) -> f64 {
        self.mixture.second_derivative(i, j, time)
    }

    fn init_value(&self, i: usize, code: usize) -> Result<f64> {
        self.mixture.init_value(i, code)
    }

    fn parameters(&self) -> &ParameterList {
        &self.parameters
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        let Some((internal, external)) = self.lookup(name).cloned() else {
            bail!(unknown_parameter(name));
        };
        let mut parameters = self.parameters.clone();
        parameters.set_value(&external, value)?;
        let mut mixture = self.mixture.clone();
        mixture.set_parameter(&internal, value)?;
        normalise_synonymous_rates(&mut mixture, self.synonymous_pair)?;
        self.mixture = mixture;
        self.parameters = parameters;
        Ok(())
    }

    fn update_matrices(&mut self) -> Result<()> {
        self.mixture.update_matrices()?;
        normalise_synonymous_rates(&mut self.mixture, self.synonymous_pair)
    }
}

fn yn98_template(code: &'static GeneticCode, freqs: &[f64]) -> Result<Box<dyn SubstitutionModel>> {
    Ok(Box::new(YN98Model::new(YN98::new(code), freqs, &[])?))
}

fn check_classes(model: &str, distribution: &str, n: usize) -> Result<()> {
    if n == 0 {
        bail!(ConfigError {
            message: format!(
                "Bad number of classes for the {} distribution of model {}: {}.",
                distribution, model, n
            ),
        });
    }
    Ok(())
}

fn omega_mixture(
    template: Box<dyn SubstitutionModel>,
    distribution: Box<dyn DiscreteDistribution>,
) -> Result<MixtureModel> {
    MixtureModel::new(
        template,
        BTreeMap::from([("omega".to_string(), distribution)]),
    )
}

/// YNGKP M7: omega follows a Beta(p, q) distribution discretised in `n_beta` classes.
pub fn yngkp_m7(
    code: &'static GeneticCode,
    freqs: &[f64],
    n_beta: usize,
) -> Result<BiblioMixtureModel> {
    check_classes("YNGKP_M7", "beta", n_beta)?;
    let mixture = omega_mixture(
        yn98_template(code, freqs)?,
        Box::new(BetaDiscreteDistribution::new(n_beta, 2.0, 2.0)?),
    )?;
    BiblioMixtureModel::new(
        "YNGKP_M7",
        code,
        mixture,
        &[
            ("kappa", "kappa"),
            ("omega_Beta.alpha", "p"),
            ("omega_Beta.beta", "q"),
        ],
        n_beta,
        0,
    )
}

/// YNGKP M8: a Beta(p, q) class set with weight `p0` and one positive selection class
/// `omegas > 1`.
pub fn yngkp_m8(
    code: &'static GeneticCode,
    freqs: &[f64],
    n_beta: usize,
) -> Result<BiblioMixtureModel> {
    check_classes("YNGKP_M8", "beta", n_beta)?;
    let omega = MixtureOfDiscreteDistributions::new(
        vec![
            Box::new(BetaDiscreteDistribution::new(n_beta, 2.0, 2.0)?),
            Box::new(SimpleDiscreteDistribution::with_constraint(
                &[2.0],
                &[1.0],
                Some(Constraint::Above(1.0)),
            )?),
        ],
        &[0.5, 0.5],
    )?;
    let mixture = omega_mixture(yn98_template(code, freqs)?, Box::new(omega))?;
    BiblioMixtureModel::new(
        "YNGKP_M8",
        code,
        mixture,
        &[
            ("kappa", "kappa"),
            ("omega_Mixture.theta1", "p0"),
            ("omega_Mixture.1_Beta.alpha", "p"),
            ("omega_Mixture.1_Beta.beta", "q"),
            ("omega_Mixture.2_Simple.V1", "omegas"),
        ],
        n_beta,
        0,
    )
}

fn beta_gamma_model(
    name: &str,
    code: &'static GeneticCode,
    freqs: &[f64],
    n_beta: usize,
    n_gamma: usize,
    gamma_offset: f64,
) -> Result<BiblioMixtureModel> {
    check_classes(name, "beta", n_beta)?;
    check_classes(name, "gamma", n_gamma)?;
    let omega = MixtureOfDiscreteDistributions::new(
        vec![
            Box::new(BetaDiscreteDistribution::new(n_beta, 2.0, 2.0)?),
            Box::new(GammaDiscreteDistribution::with_offset(
                n_gamma,
                1.0,
                1.0,
                gamma_offset,
            )?),
        ],
        &[0.5, 0.5],
    )?;
    let mixture = omega_mixture(yn98_template(code, freqs)?, Box::new(omega))?;
    BiblioMixtureModel::new(
        name,
        code,
        mixture,
        &[
            ("kappa", "kappa"),
            ("omega_Mixture.theta1", "p0"),
            ("omega_Mixture.1_Beta.alpha", "p"),
            ("omega_Mixture.1_Beta.beta", "q"),
            ("omega_Mixture.2_Gamma.alpha", "alpha"),
            ("omega_Mixture.2_Gamma.beta", "beta"),
        ],
        n_beta,
        n_gamma,
    )
}

/// YNGKP M9: omega follows a mixture of Beta(p, q) and Gamma(alpha, beta) with weight `p0`
/// on the Beta part.
pub fn yngkp_m9(
    code: &'static GeneticCode,
    freqs: &[f64],
    n_beta: usize,
    n_gamma: usize,
) -> Result<BiblioMixtureModel> {
    beta_gamma_model("YNGKP_M9", code, freqs, n_beta, n_gamma, 0.0)
}

/// YNGKP M10: as M9 with the Gamma part shifted to `1 + Gamma(alpha, beta)`.
pub fn yngkp_m10(
    code: &'static GeneticCode,
    freqs: &[f64],
    n_beta: usize,
    n_gamma: usize,
) -> Result<BiblioMixtureModel> {
    beta_gamma_model("YNGKP_M10", code, freqs, n_beta, n_gamma, 1.0)
}
