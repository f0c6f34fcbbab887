use std::cell::RefCell;
use std::fmt::Display;

use argmin::core::{CostFunction, Executor, IterState, State};
use argmin::solver::brent::BrentOpt;
use log::{debug, info, warn};

use crate::likelihood::ModelCost;
use crate::optimisers::{ModelOptimisationResult, SingleValOptResult};
use crate::Result;

/// Coordinate-wise Brent search over the model parameters of a cost, repeated until a full
/// round improves the cost by less than `epsilon`.
pub struct ModelOptimiser<'a, C: ModelCost + Display> {
    pub epsilon: f64,
    pub(crate) c: &'a mut C,
}

impl<'a, C: ModelCost + Display> ModelOptimiser<'a, C> {
    pub fn new(cost: &'a mut C) -> ModelOptimiser<'a, C> {
        Self {
            epsilon: 1e-3,
            c: cost,
        }
    }

    pub fn run(mut self) -> Result<ModelOptimisationResult> {
        info!("Optimising the evolutionary model: {}.", self.c);

        let init_cost = self.c.cost();
        info!("Initial cost: {}.", init_cost);
        let mut curr_cost = init_cost;
        let mut prev_cost = f64::INFINITY;
        let mut iterations = 0;

        while (prev_cost - curr_cost) > self.epsilon {
            iterations += 1;
            debug!("Iteration: {}", iterations);
            let parameters = self.c.model_parameters().clone();
            prev_cost = curr_cost;

            for param in parameters.iter() {
                let start_value = self.c.model_parameters().value(param.name())?;
                debug!(
                    "Optimising parameter {} from value {} with cost {}",
                    param.name(),
                    start_value,
                    curr_cost
                );
                let (min, max) = match param.constraint() {
                    Some(constraint) => constraint.search_bounds(),
                    None => (-(start_value.abs() * 100.0).max(10.0), None),
                };
                let max = max.unwrap_or((start_value * 100.0).max(10.0));
                let param_opt = match self.opt_parameter(param.name(), start_value, min, max) {
                    Ok(opt) => opt,
                    Err(err) => {
                        warn!("Could not optimise parameter {}: {}", param.name(), err);
                        self.c.set_model_parameter(param.name(), start_value)?;
                        continue;
                    }
                };
                if param_opt.final_cost >= curr_cost {
                    // Parameter will have been moved by the optimiser, set it back to start value
                    self.c.set_model_parameter(param.name(), start_value)?;
                    continue;
                }
                self.c.set_model_parameter(param.name(), param_opt.value)?;
                curr_cost = param_opt.final_cost;
                debug!(
                    "Optimised parameter {} to value {} with cost {}",
                    param.name(),
                    param_opt.value,
                    curr_cost
                );
            }
            debug!("New parameters: {}\n", self.c);
        }

        info!("Done optimising model parameters.");
        info!(
            "Final cost: {}, achieved in {} iteration(s).",
            curr_cost, iterations
        );
        Ok(ModelOptimisationResult {
            initial_cost: init_cost,
            final_cost: curr_cost,
            iterations,
        })
    }

    fn opt_parameter(
        &mut self,
        name: &str,
        start_value: f64,
        min: f64,
        max: f64,
    ) -> Result<SingleValOptResult> {
        let optimiser = ParamOptimiser {
            cost: RefCell::new(&mut *self.c),
            name,
        };
        let gss = BrentOpt::new(min, max);
        let res = Executor::new(optimiser, gss)
            .configure(|_| IterState::new().param(start_value).max_iters(500))
            .run()?;
        Ok(SingleValOptResult {
            value: res.state().best_param.unwrap_or(start_value),
            final_cost: res.state().best_cost,
        })
    }
}

pub(crate) struct ParamOptimiser<'a, 'n, C: ModelCost> {
    pub(crate) cost: RefCell<&'a mut C>,
    pub(crate) name: &'n str,
}

impl<C: ModelCost> CostFunction for ParamOptimiser<'_, '_, C> {
    type Param = f64;
    type Output = f64;

    fn cost(&self, value: &f64) -> Result<f64> {
        self.cost
            .borrow_mut()
            .set_model_parameter(self.name, *value)?;
        Ok(self.cost.borrow().cost())
    }
}
