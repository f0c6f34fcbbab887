pub mod model_optimiser;
pub mod pseudo_newton;

pub use model_optimiser::*;
pub use pseudo_newton::*;

pub struct ModelOptimisationResult {
    pub initial_cost: f64,
    pub final_cost: f64,
    pub iterations: usize,
}

pub(crate) struct SingleValOptResult {
    pub(crate) value: f64,
    pub(crate) final_cost: f64,
}

#[cfg(test)]
mod pseudo_newton_tests;
