#![allow(dead_code)]
/// this file is essentially a workaround for #[cfg(test)] like behaviour for the benchmarks
/// The dev-depencies are only available in benchmarks or tests
use std::collections::BTreeMap;
use std::time::Duration;

use criterion::Criterion;

use phylo_subst::alphabets::standard_genetic_code;
use phylo_subst::distributions::{DiscreteDistribution, GammaDiscreteDistribution};
use phylo_subst::substitution_models::{
    yngkp_m9, BiblioMixtureModel, MixtureModel, TN93Model, TN93,
};

pub const BRANCH_LENGTHS: [f64; 4] = [0.01, 0.1, 0.5, 2.0];

pub fn setup_suite() -> Criterion {
    Criterion::default().measurement_time(Duration::from_secs(60))
}

pub fn tn93_gamma_mixture(n_categories: usize) -> MixtureModel {
    let template = TN93Model::new(TN93, &[0.1, 0.3, 0.4, 0.2], &[2.0, 3.0]).unwrap();
    let distributions: BTreeMap<String, Box<dyn DiscreteDistribution>> = BTreeMap::from([(
        "kappa1".to_string(),
        Box::new(GammaDiscreteDistribution::new(n_categories, 2.0, 1.0).unwrap())
            as Box<dyn DiscreteDistribution>,
    )]);
    MixtureModel::new(Box::new(template), distributions).unwrap()
}

pub fn m9(n_beta: usize, n_gamma: usize) -> BiblioMixtureModel {
    yngkp_m9(standard_genetic_code(), &[], n_beta, n_gamma).unwrap()
}

/// empty on purpose, there are no benches here but the crate still needs
/// to be runnable otherwise criterion crashes
fn main() {}
