use std::collections::HashMap;
use std::fmt::Debug;

use anyhow::bail;
use dyn_clone::DynClone;
use log::info;
use nalgebra::{DMatrix, DVector};

use crate::alphabets::Alphabet;
use crate::parameters::{unknown_parameter, ParameterList};
use crate::{DomainError, Result};

pub mod codon_models;
pub mod dna_models;
pub mod mixture;
mod rate_matrix;
pub mod reversible;

pub use codon_models::*;
pub use dna_models::*;
pub use mixture::*;
pub(crate) use rate_matrix::*;
pub use reversible::*;

pub type SubstMatrix = DMatrix<f64>;
pub type FreqVector = DVector<f64>;

#[macro_export]
macro_rules! frequencies {
    ($slice:expr) => {
        FreqVector::from_column_slice($slice)
    };
}

/// Continuous-time Markov model of character substitution over a finite set of states.
///
/// Every mutation (`set_parameter`, `set_parameters`, `set_freqs`, `set_rate`) rebuilds the
/// generator and its eigensystem before returning, so the transition matrices read afterwards
/// always reflect the current parameter values.
pub trait SubstitutionModel: Debug + DynClone + Send {
    fn name(&self) -> &str;
    fn alphabet(&self) -> &'static Alphabet;
    /// Alphabet codes of the model states, in state order.
    fn alphabet_states(&self) -> &[usize];
    fn freqs(&self) -> &FreqVector;
    /// Replaces the stationary frequencies, states missing from the map get 0.
    fn set_freqs(&mut self, freqs: &HashMap<usize, f64>) -> Result<()>;
    fn rate(&self) -> f64;
    fn set_rate(&mut self, rate: f64) -> Result<()>;
    /// Generator without the global rate.
    fn q(&self) -> SubstMatrix;
    fn p(&self, time: f64) -> SubstMatrix;
    fn dp(&self, time: f64) -> SubstMatrix;
    fn d2p(&self, time: f64) -> SubstMatrix;
    fn transition_probability(&self, i: usize, j: usize, time: f64) -> f64;
    fn first_derivative(&self, i: usize, j: usize, time: f64) -> f64;
    fn second_derivative(&self, i: usize, j: usize, time: f64) -> f64;
    fn init_value(&self, i: usize, code: usize) -> Result<f64>;
    fn parameters(&self) -> &ParameterList;
    fn set_parameter(&mut self, name: &str, value: f64) -> Result<()>;
    fn update_matrices(&mut self) -> Result<()>;

    fn n(&self) -> usize {
        self.alphabet_states().len()
    }

    fn freq(&self, i: usize) -> f64 {
        self.freqs()[i]
    }

    fn qij(&self, i: usize, j: usize) -> f64 {
        self.q()[(i, j)]
    }

    /// Expected number of substitutions per time unit at rate 1, `-Σ π_i Q_ii`.
    fn scale(&self) -> f64 {
        let q = self.q();
        -self
            .freqs()
            .iter()
            .enumerate()
            .map(|(i, f)| f * q[(i, i)])
            .sum::<f64>()
    }

    fn parameter_value(&self, name: &str) -> Result<f64> {
        self.parameters().value(name)
    }

    /// Sets every parameter of `values` that belongs to the model, returns the number of
    /// parameters that were set. Unknown names are ignored.
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

dyn_clone::clone_trait_object!(SubstitutionModel);

/// Simple model over an explicit generator matrix. It has no free parameters, setting the
/// frequencies replaces the stationary vector but keeps the generator as given.
#[derive(Clone, Debug)]
pub struct RateMatrixModel {
    name: String,
    core: RateMatrix,
    parameters: ParameterList,
}

impl RateMatrixModel {
    pub fn new(
        name: &str,
        alphabet: &'static Alphabet,
        states: &[usize],
        freqs: &[f64],
        generator: SubstMatrix,
    ) -> Result<Self> {
        let n = states.len();
        if let Some(&state) = states.iter().find(|&&s| !alphabet.is_resolved(s)) {
            bail!(DomainError {
                message: format!("State {} is not a resolved {} character.", state, alphabet.name()),
            });
        }
        if generator.nrows() != n || generator.ncols() != n {
            bail!(DomainError {
                message: format!(
                    "Generator is {}x{}, expected {}x{}.",
                    generator.nrows(),
                    generator.ncols(),
                    n,
                    n
                ),
            });
        }
        for (i, row) in generator.row_iter().enumerate() {
            if row.sum().abs() > 1e-8 {
                bail!(DomainError {
                    message: format!("Row {} of the generator sums to {}.", i, row.sum()),
                });
            }
            if row.iter().enumerate().any(|(j, &q)| i != j && q < 0.0) {
                bail!(DomainError {
                    message: format!("Row {} of the generator has negative rates.", i),
                });
            }
        }
        if freqs.len() != n {
            bail!(DomainError {
                message: format!("Expected {} frequencies, got {}.", n, freqs.len()),
            });
        }
        let freqs = frequencies!(freqs);
        check_freqs(&freqs)?;
        info!("Setting up {} over {} states.", name, n);
        Ok(RateMatrixModel {
            name: name.to_string(),
            core: RateMatrix::new(alphabet, states.to_vec(), freqs, generator),
            parameters: ParameterList::new(),
        })
    }

    pub fn is_reversible(&self) -> bool {
        self.core.is_reversible()
    }
}

impl SubstitutionModel for RateMatrixModel {
    fn name(&self) -> &str {
        &self.name
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
        let freqs = freqs_from_map(self.core.n(), freqs)?;
        let generator = self.core.generator().clone();
        self.core.update(generator, freqs);
        Ok(())
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

    fn set_parameter(&mut self, name: &str, _value: f64) -> Result<()> {
        bail!(unknown_parameter(name))
    }

    fn update_matrices(&mut self) -> Result<()> {
        let generator = self.core.generator().clone();
        let freqs = self.core.freqs().clone();
        self.core.update(generator, freqs);
        Ok(())
    }
}

#[cfg(test)]
mod tests;
