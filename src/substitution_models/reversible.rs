use std::collections::HashMap;
use std::fmt::Debug;

use anyhow::bail;
use log::{info, warn};

use crate::alphabets::Alphabet;
use crate::parameters::ParameterList;
use crate::substitution_models::{
    check_freqs, freqs_from_map, FreqVector, RateMatrix, SubstMatrix, SubstitutionModel,
};
use crate::{frequencies, ConfigError, DomainError, Result};

/// Family of time-reversible models, defined by a symmetric exchangeability matrix over a
/// fixed set of alphabet states.
pub trait ExchangeabilityMaker: Clone + Debug + Send + 'static {
    fn name(&self) -> &str;
    fn alphabet(&self) -> &'static Alphabet;
    fn states(&self) -> Vec<usize>;
    fn default_parameters(&self) -> Result<ParameterList>;
    fn exchangeability(&self, params: &ParameterList) -> Result<SubstMatrix>;

    fn default_freqs(&self) -> FreqVector {
        let n = self.states().len();
        FreqVector::from_element(n, 1.0 / n as f64)
    }

    /// Stationary frequencies are part of the model definition and cannot be set.
    fn freqs_fixed(&self) -> bool {
        false
    }
}

/// Generator `Q_ij = S_ij π_j`, normalised to one expected substitution per time unit.
/// Returns the generator and the exchangeabilities rescaled by the same factor, with
/// `S_ii = Q_ii / π_i`.
pub fn reversible_generator(
    exchangeability: &SubstMatrix,
    freqs: &FreqVector,
) -> Result<(SubstMatrix, SubstMatrix)> {
    let n = freqs.len();
    let mut q = SubstMatrix::zeros(n, n);
    for i in 0..n {
        for j in 0..n {
            if i != j {
                q[(i, j)] = exchangeability[(i, j)] * freqs[j];
            }
        }
        q[(i, i)] = -q.row(i).sum();
    }
    let scale = -(0..n).map(|i| freqs[i] * q[(i, i)]).sum::<f64>();
    if !(scale.is_finite() && scale > 0.0) {
        bail!(ConfigError {
            message: format!("Cannot normalise a generator with scale {}.", scale),
        });
    }
    q /= scale;
    let mut s = exchangeability.clone() / scale;
    for i in 0..n {
        s[(i, i)] = if freqs[i] > 0.0 {
            q[(i, i)] / freqs[i]
        } else {
            0.0
        };
    }
    Ok((q, s))
}

/// Time-reversible model of one family. Parameters are kept in a named list, the
/// exchangeabilities and the generator are rebuilt from it on every change.
#[derive(Clone, Debug)]
pub struct ReversibleModel<R: ExchangeabilityMaker> {
    maker: R,
    parameters: ParameterList,
    exchangeability: SubstMatrix,
    core: RateMatrix,
}

impl<R: ExchangeabilityMaker> ReversibleModel<R> {
    /// Positional set up: empty `freqs` or `params` mean the family defaults, values beyond
    /// the family parameters are ignored with a warning.
    pub fn new(maker: R, freqs: &[f64], params: &[f64]) -> Result<Self> {
        let states = maker.states();
        let n = states.len();
        let freqs = if freqs.is_empty() {
            maker.default_freqs()
        } else if maker.freqs_fixed() {
            warn!(
                "{} has fixed frequencies, ignoring the provided ones.",
                maker.name()
            );
            maker.default_freqs()
        } else if freqs.len() != n {
            bail!(DomainError {
                message: format!("Expected {} frequencies, got {}.", n, freqs.len()),
            });
        } else {
            frequencies!(freqs)
        };
        check_freqs(&freqs)?;

        let mut parameters = maker.default_parameters()?;
        if params.len() > parameters.len() {
            warn!(
                "Too many values provided for {}, using the first {}.",
                maker.name(),
                parameters.len()
            );
        }
        for (name, &value) in parameters.names().iter().zip(params) {
            parameters.set_value(name, value)?;
        }
        if params.len() < parameters.len() && !params.is_empty() {
            warn!(
                "Not enough values provided for {}, using defaults for the rest.",
                maker.name()
            );
        }

        let exchangeability = maker.exchangeability(&parameters)?;
        let (q, s) = reversible_generator(&exchangeability, &freqs)?;
        info!("Setting up {} with parameters {}", maker.name(), parameters);
        Ok(ReversibleModel {
            core: RateMatrix::new(maker.alphabet(), states, freqs, q),
            maker,
            parameters,
            exchangeability: s,
        })
    }

    pub fn maker(&self) -> &R {
        &self.maker
    }

    /// Normalised exchangeabilities.
    pub fn exchangeability(&self) -> &SubstMatrix {
        &self.exchangeability
    }

    fn rebuild(&mut self, parameters: ParameterList, freqs: FreqVector) -> Result<()> {
        let exchangeability = self.maker.exchangeability(&parameters)?;
        let (q, s) = reversible_generator(&exchangeability, &freqs)?;
        self.parameters = parameters;
        self.exchangeability = s;
        self.core.update(q, freqs);
        Ok(())
    }
}

impl<R: ExchangeabilityMaker> SubstitutionModel for ReversibleModel<R> {
    fn name(&self) -> &str {
        self.maker.name()
    }

    fn alphabet(&self) -> &'static Alphabet {
        self.core.alphabet()
    }

    fn alphabet_states(&self) -> &[usize] {
        self.core.states()
    }

    fn freqs(&self) -> &FreqVector {
        self.core.freqs()
    }

    fn set_freqs(&mut self, freqs: &HashMap<usize, f64>) -> Result<()> {
        if self.maker.freqs_fixed() {
            info!(
                "{} has fixed frequencies, they are left unchanged.",
                self.maker.name()
            );
            return Ok(());
        }
        let freqs = freqs_from_map(self.core.n(), freqs)?;
        self.rebuild(self.parameters.clone(), freqs)
    }

    fn rate(&self) -> f64 {
        self.core.rate()
    }

    fn set_rate(&mut self, rate: f64) -> Result<()> {
        self.core.set_rate(rate)
    }

    fn q(&self) -> SubstMatrix {
        self.core.generator().clone()
    }

    fn qij(&self, i: usize, j: usize) -> f64 {
        self.core.generator()[(i, j)]
    }

    fn scale(&self) -> f64 {
        self.core.scale()
    }

    fn p(&self, time: f64) -> SubstMatrix {
        self.core.p(time)
    }

    fn dp(&self, time: f64) -> SubstMatrix {
        self.core.dp(time)
    }

    fn d2p(&self, time: f64) -> SubstMatrix {
        self.core.d2p(time)
    }

    fn transition_probability(&self, i: usize, j: usize, time: f64) -> f64 {
        self.core.pij(i, j, time)
    }

    fn first_derivative(&self, i: usize, j: usize, time: f64) -> f64 {
        self.core.dpij(i, j, time)
    }

    fn second_derivative(&self, i: usize, j: usize, time: f64) -> f64 {
        self.core.d2pij(i, j, time)
    }

    fn init_value(&self, i: usize, code: usize) -> Result<f64> {
        self.core.init_value(i, code)
    }

    fn parameters(&self) -> &ParameterList {
        &self.parameters
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        let mut parameters = self.parameters.clone();
        parameters.set_value(name, value)?;
        self.rebuild(parameters, self.core.freqs().clone())
    }

    fn set_parameters(&mut self, values: &ParameterList) -> Result<usize> {
        let mut parameters = self.parameters.clone();
        let matched = parameters.match_values(values)?;
        if matched > 0 {
            self.rebuild(parameters, self.core.freqs().clone())?;
        }
        Ok(matched)
    }

    fn update_matrices(&mut self) -> Result<()> {
        self.rebuild(self.parameters.clone(), self.core.freqs().clone())
    }
}
