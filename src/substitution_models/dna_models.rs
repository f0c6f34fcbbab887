use anyhow::bail;

use crate::alphabets::{dna_alphabet, is_transition, Alphabet};
use crate::parameters::{Constraint, Parameter, ParameterList};
use crate::substitution_models::{ExchangeabilityMaker, ReversibleModel, SubstMatrix};
use crate::{DomainError, Result};

pub type JC69Model = ReversibleModel<JC69>;
pub type K80Model = ReversibleModel<K80>;
pub type HKYModel = ReversibleModel<HKY>;
pub type TN93Model = ReversibleModel<TN93>;
pub type GTRModel = ReversibleModel<GTR>;

/// Exchangeabilities in TCAG order from the six pairwise rates.
fn nucleotide_exchangeability(rtc: f64, rta: f64, rtg: f64, rca: f64, rcg: f64, rag: f64) -> SubstMatrix {
    SubstMatrix::from_row_slice(
        4,
        4,
        &[
            0.0, rtc, rta, rtg, //
            rtc, 0.0, rca, rcg, //
            rta, rca, 0.0, rag, //
            rtg, rcg, rag, 0.0,
        ],
    )
}

fn positive(name: &str, value: f64) -> Result<Parameter> {
    Parameter::new(name, value, Some(Constraint::Positive))
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JC69;

impl ExchangeabilityMaker for JC69 {
    fn name(&self) -> &str {
        "JC69"
    }

    fn alphabet(&self) -> &'static Alphabet {
        dna_alphabet()
    }

    fn states(&self) -> Vec<usize> {
        (0..4).collect()
    }

    fn default_parameters(&self) -> Result<ParameterList> {
        Ok(ParameterList::new())
    }

    fn exchangeability(&self, _params: &ParameterList) -> Result<SubstMatrix> {
        Ok(nucleotide_exchangeability(1.0, 1.0, 1.0, 1.0, 1.0, 1.0))
    }

    fn freqs_fixed(&self) -> bool {
        true
    }
}

fn transition_exchangeability(kappa1: f64, kappa2: f64) -> SubstMatrix {
    let mut s = SubstMatrix::from_element(4, 4, 1.0);
    for i in 0..4 {
        for j in 0..4 {
            if i == j {
                s[(i, j)] = 0.0;
            } else if is_transition(i, j) {
                s[(i, j)] = if i < 2 { kappa1 } else { kappa2 };
            }
        }
    }
    s
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct K80;

impl ExchangeabilityMaker for K80 {
    fn name(&self) -> &str {
        "K80"
    }

    fn alphabet(&self) -> &'static Alphabet {
        dna_alphabet()
    }

    fn states(&self) -> Vec<usize> {
        (0..4).collect()
    }

    fn default_parameters(&self) -> Result<ParameterList> {
        Ok([positive("kappa", 1.0)?].into_iter().collect())
    }

    fn exchangeability(&self, params: &ParameterList) -> Result<SubstMatrix> {
        let kappa = params.value("kappa")?;
        Ok(transition_exchangeability(kappa, kappa))
    }

    fn freqs_fixed(&self) -> bool {
        true
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HKY;

impl ExchangeabilityMaker for HKY {
    fn name(&self) -> &str {
        "HKY"
    }

    fn alphabet(&self) -> &'static Alphabet {
        dna_alphabet()
    }

    fn states(&self) -> Vec<usize> {
        (0..4).collect()
    }

    fn default_parameters(&self) -> Result<ParameterList> {
        Ok([positive("kappa", 1.0)?].into_iter().collect())
    }

    fn exchangeability(&self, params: &ParameterList) -> Result<SubstMatrix> {
        let kappa = params.value("kappa")?;
        Ok(transition_exchangeability(kappa, kappa))
    }
}

/// `kappa1` for T <-> C, `kappa2` for A <-> G, transversions at 1.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TN93;

impl ExchangeabilityMaker for TN93 {
    fn name(&self) -> &str {
        "TN93"
    }

    fn alphabet(&self) -> &'static Alphabet {
        dna_alphabet()
    }

    fn states(&self) -> Vec<usize> {
        (0..4).collect()
    }

    fn default_parameters(&self) -> Result<ParameterList> {
        Ok([positive("kappa1", 1.0)?, positive("kappa2", 1.0)?]
            .into_iter()
            .collect())
    }

    fn exchangeability(&self, params: &ParameterList) -> Result<SubstMatrix> {
        Ok(transition_exchangeability(
            params.value("kappa1")?,
            params.value("kappa2")?,
        ))
    }
}

/// General time-reversible model, the A <-> G rate is fixed at 1.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GTR;

impl ExchangeabilityMaker for GTR {
    fn name(&self) -> &str {
        "GTR"
    }

    fn alphabet(&self) -> &'static Alphabet {
        dna_alphabet()
    }

    fn states(&self) -> Vec<usize> {
        (0..4).collect()
    }

    fn default_parameters(&self) -> Result<ParameterList> {
        ["rtc", "rta", "rtg", "rca", "rcg"]
            .iter()
            .map(|name| positive(name, 1.0))
            .collect()
    }

    fn exchangeability(&self, params: &ParameterList) -> Result<SubstMatrix> {
        let values = params.values();
        if values.len() != 5 {
            bail!(DomainError {
                message: format!("GTR needs 5 rates, got {}.", values.len()),
            });
        }
        Ok(nucleotide_exchangeability(
            values[0], values[1], values[2], values[3], values[4], 1.0,
        ))
    }
}
