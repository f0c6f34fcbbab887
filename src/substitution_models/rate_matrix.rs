use std::cell::RefCell;
use std::collections::HashMap;

use anyhow::bail;
use log::{debug, warn};
use nalgebra::{DVector, SymmetricEigen};

use crate::alphabets::Alphabet;
use crate::substitution_models::{FreqVector, SubstMatrix};
use crate::{DomainError, Result};

const REVERSIBILITY_TOLERANCE: f64 = 1e-10;
const FREQUENCY_TOLERANCE: f64 = 1e-6;

#[derive(Clone, Copy, Debug, PartialEq)]
enum Derivative {
    Zero,
    First,
    Second,
}

/// Spectral form of a generator. A generator that satisfies detailed balance with strictly
/// positive frequencies is symmetrised and decomposed with a symmetric eigen solver, so the
/// spectrum is guaranteed to be real. Any other generator is exponentiated directly.
#[derive(Clone, Debug)]
enum Spectrum {
    Reversible {
        values: DVector<f64>,
        right: SubstMatrix,
        left: SubstMatrix,
    },
    Dense,
}

impl Spectrum {
    fn decompose(generator: &SubstMatrix, freqs: &FreqVector) -> Spectrum {
        if !freqs.iter().all(|&f| f > 0.0) || !satisfies_detailed_balance(generator, freqs) {
            debug!("Generator is not reversible, falling back to the dense matrix exponential.");
            return Spectrum::Dense;
        }
        let sqrt_freqs = freqs.map(f64::sqrt);
        let n = generator.nrows();
        let mut symmetric = SubstMatrix::zeros(n, n);
        for i in 0..n {
            for j in 0..n {
                symmetric[(i, j)] = generator[(i, j)] * sqrt_freqs[i] / sqrt_freqs[j];
            }
        }
        let symmetric = (&symmetric + symmetric.transpose()) * 0.5;
        let eigen = SymmetricEigen::new(symmetric);
        let mut right = eigen.eigenvectors.clone();
        for (i, mut row) in right.row_iter_mut().enumerate() {
            row /= sqrt_freqs[i];
        }
        let mut left = eigen.eigenvectors.transpose();
        for (j, mut col) in left.column_iter_mut().enumerate() {
            col *= sqrt_freqs[j];
        }
        Spectrum::Reversible {
            values: eigen.eigenvalues,
            right,
            left,
        }
    }
}

fn satisfies_detailed_balance(generator: &SubstMatrix, freqs: &FreqVector) -> bool {
    let n = generator.nrows();
    (0..n).all(|i| {
        (0..i).all(|j| {
            let forward = freqs[i] * generator[(i, j)];
            let backward = freqs[j] * generator[(j, i)];
            (forward - backward).abs()
                <= REVERSIBILITY_TOLERANCE * forward.abs().max(backward.abs()).max(1.0)
        })
    })
}

/// Matrices for the most recently requested branch length.
#[derive(Clone, Debug, Default)]
struct TransitionCache {
    time: Option<f64>,
    p: Option<SubstMatrix>,
    dp: Option<SubstMatrix>,
    d2p: Option<SubstMatrix>,
}

impl TransitionCache {
    fn slot(&mut self, time: f64, derivative: Derivative) -> &mut Option<SubstMatrix> {
        if self.time != Some(time) {
            *self = TransitionCache {
                time: Some(time),
                ..Default::default()
            };
        }
        match derivative {
            Derivative::Zero => &mut self.p,
            Derivative::First => &mut self.dp,
            Derivative::Second => &mut self.d2p,
        }
    }
}

/// Generator, stationary frequencies, global rate and eigensystem shared by every simple
/// substitution model. The eigensystem and the transition cache are rebuilt whenever the
/// generator, the frequencies or the rate change.
#[derive(Clone, Debug)]
pub(crate) struct RateMatrix {
    alphabet: &'static Alphabet,
    states: Vec<usize>,
    freqs: FreqVector,
    generator: SubstMatrix,
    rate: f64,
    spectrum: Spectrum,
    cache: RefCell<TransitionCache>,
}

impl RateMatrix {
    pub(crate) fn new(
        alphabet: &'static Alphabet,
        states: Vec<usize>,
        freqs: FreqVector,
        generator: SubstMatrix,
    ) -> Self {
        let spectrum = Spectrum::decompose(&generator, &freqs);
        RateMatrix {
            alphabet,
            states,
            freqs,
            generator,
            rate: 1.0,
            spectrum,
            cache: RefCell::new(TransitionCache::default()),
        }
    }

    pub(crate) fn alphabet(&self) -> &'static Alphabet {
        self.alphabet
    }

    pub(crate) fn states(&self) -> &[usize] {
        &self.states
    }

    pub(crate) fn n(&self) -> usize {
        self.states.len()
    }

    pub(crate) fn freqs(&self) -> &FreqVector {
        &self.freqs
    }

    pub(crate) fn generator(&self) -> &SubstMatrix {
        &self.generator
    }

    pub(crate) fn rate(&self) -> f64 {
        self.rate
    }

    /// Replaces generator and frequencies together and rebuilds the eigensystem.
    pub(crate) fn update(&mut self, generator: SubstMatrix, freqs: FreqVector) {
        self.spectrum = Spectrum::decompose(&generator, &freqs);
        self.generator = generator;
        self.freqs = freqs;
        *self.cache.get_mut() = TransitionCache::default();
    }

    pub(crate) fn set_rate(&mut self, rate: f64) -> Result<()> {
        check_rate(rate)?;
        self.rate = rate;
        *self.cache.get_mut() = TransitionCache::default();
        Ok(())
    }

    pub(crate) fn is_reversible(&self) -> bool {
        matches!(self.spectrum, Spectrum::Reversible { .. })
    }

    pub(crate) fn scale(&self) -> f64 {
        -self
            .freqs
            .iter()
            .zip(self.generator.diagonal().iter())
            .map(|(f, q)| f * q)
            .sum::<f64>()
    }

    pub(crate) fn p(&self, time: f64) -> SubstMatrix {
        self.cached(time, Derivative::Zero, |m| m.clone())
    }

    pub(crate) fn dp(&self, time: f64) -> SubstMatrix {
        self.cached(time, Derivative::First, |m| m.clone())
    }

    pub(crate) fn d2p(&self, time: f64) -> SubstMatrix {
        self.cached(time, Derivative::Second, |m| m.clone())
    }

    pub(crate) fn pij(&self, i: usize, j: usize, time: f64) -> f64 {
        self.cached(time, Derivative::Zero, |m| m[(i, j)])
    }

    pub(crate) fn dpij(&self, i: usize, j: usize, time: f64) -> f64 {
        self.cached(time, Derivative::First, |m| m[(i, j)])
    }

    pub(crate) fn d2pij(&self, i: usize, j: usize, time: f64) -> f64 {
        self.cached(time, Derivative::Second, |m| m[(i, j)])
    }

    fn cached<T>(&self, time: f64, derivative: Derivative, read: impl Fn(&SubstMatrix) -> T) -> T {
        let mut cache = self.cache.borrow_mut();
        let matrix = cache
            .slot(time, derivative)
            .get_or_insert_with(|| self.compute(time, derivative));
        read(matrix)
    }

    fn compute(&self, time: f64, derivative: Derivative) -> SubstMatrix {
        let n = self.n();
        if time == 0.0 && derivative == Derivative::Zero {
            return SubstMatrix::identity(n, n);
        }
        match &self.spectrum {
            Spectrum::Reversible {
                values,
                right,
                left,
            } => {
                let mut scaled = right.clone();
                for (j, mut col) in scaled.column_iter_mut().enumerate() {
                    let value = self.rate * values[j];
                    let factor = match derivative {
                        Derivative::Zero => 1.0,
                        Derivative::First => value,
                        Derivative::Second => value * value,
                    };
                    col *= factor * (value * time).exp();
                }
                scaled * left
            }
            Spectrum::Dense => {
                let scaled_q = self.generator.clone() * self.rate;
                let p = (scaled_q.clone() * time).exp();
                match derivative {
                    Derivative::Zero => p,
                    Derivative::First => &scaled_q * p,
                    Derivative::Second => &scaled_q * &scaled_q * p,
                }
            }
        }
    }

    /// 1 if model state `i` is one of the resolved states behind alphabet `code`, else 0.
    pub(crate) fn init_value(&self, i: usize, code: usize) -> Result<f64> {
        if i >= self.n() {
            bail!(DomainError {
                message: format!("State index {} is out of range for {} states.", i, self.n()),
            });
        }
        let alias = self.alphabet.alias(code)?;
        Ok(if alias.contains(&self.states[i]) {
            1.0
        } else {
            0.0
        })
    }
}

pub(crate) fn check_rate(rate: f64) -> Result<()> {
    if !(rate.is_finite() && rate > 0.0) {
        bail!(DomainError {
            message: format!("Rate must be positive, got {}.", rate),
        });
    }
    Ok(())
}

/// Frequency vector from a sparse state-index map, missing states get 0 and indices past the
/// last state are ignored.
pub(crate) fn freqs_from_map(n: usize, freqs: &HashMap<usize, f64>) -> Result<FreqVector> {
    let mut vector = FreqVector::zeros(n);
    for (&i, &f) in freqs {
        if i >= n {
            warn!("Ignoring frequency {} of state {}, the model has {} states.", f, i, n);
            continue;
        }
        vector[i] = f;
    }
    check_freqs(&vector)?;
    Ok(vector)
}

pub(crate) fn check_freqs(freqs: &FreqVector) -> Result<()> {
    if freqs.iter().any(|&f| !(0.0..=1.0).contains(&f)) {
        bail!(DomainError {
            message: format!("Frequencies must lie in [0, 1], got {:?}.", freqs.as_slice()),
        });
    }
    if (freqs.sum() - 1.0).abs() > FREQUENCY_TOLERANCE {
        bail!(DomainError {
            message: format!("Frequencies must sum to 1, got {}.", freqs.sum()),
        });
    }
    Ok(())
}
