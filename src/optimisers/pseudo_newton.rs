use std::fmt::Debug;

use anyhow::bail;
use dyn_clone::DynClone;
use log::{debug, info, warn};

use crate::likelihood::DerivableObjective;
use crate::parameters::ParameterList;
use crate::{ConfigError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptimiserState {
    Uninitialised,
    Initialised,
    Stepping,
    Converged,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// The stop condition was reached.
    StopCondition,
    /// No improving step was found within the correction budget.
    CorrectionBudget,
    MaxIterations,
}

/// Snapshot of the optimiser handed to stop conditions after every step.
#[derive(Clone, Debug, PartialEq)]
pub struct OptimiserProgress {
    pub iterations: usize,
    pub corrections: usize,
    pub current_value: f64,
    pub previous_value: Option<f64>,
    pub current_point: Vec<f64>,
    pub previous_point: Option<Vec<f64>>,
}

pub trait StopCondition: Debug + DynClone + Send {
    fn is_reached(&self, progress: &OptimiserProgress) -> bool;
    fn tolerance(&self) -> f64;
    fn set_tolerance(&mut self, tolerance: f64);
}

dyn_clone::clone_trait_object!(StopCondition);

/// Reached when the last step changed the function value by less than the tolerance.
#[derive(Clone, Debug)]
pub struct FunctionStopCondition {
    tolerance: f64,
}

impl FunctionStopCondition {
    pub fn new(tolerance: f64) -> Self {
        FunctionStopCondition { tolerance }
    }
}

impl StopCondition for FunctionStopCondition {
    fn is_reached(&self, progress: &OptimiserProgress) -> bool {
        progress
            .previous_value
            .is_some_and(|previous| (progress.current_value - previous).abs() < self.tolerance)
    }

    fn tolerance(&self) -> f64 {
        self.tolerance
    }

    fn set_tolerance(&mut self, tolerance: f64) {
        self.tolerance = tolerance;
    }
}

#[derive(Clone, Debug)]
pub struct PseudoNewtonResult {
    pub initial_value: f64,
    pub final_value: f64,
    pub iterations: usize,
    pub parameters: ParameterList,
    pub termination: Termination,
}

/// Newton steps along every parameter separately, using the diagonal of the Hessian only.
/// A step that raises the function value is halved until it does not, within a budget of
/// corrections; when the budget runs out the optimiser stops at the current point.
#[derive(Debug)]
pub struct PseudoNewtonOptimiser<'a, O: DerivableObjective> {
    objective: &'a mut O,
    stop_condition: Box<dyn StopCondition>,
    max_corrections: usize,
    max_iterations: usize,
    state: OptimiserState,
    current: ParameterList,
    current_value: f64,
    previous: Option<ParameterList>,
    previous_value: Option<f64>,
    initial_value: f64,
    iterations: usize,
    corrections: usize,
    tolerance_reached: bool,
}

impl<'a, O: DerivableObjective> PseudoNewtonOptimiser<'a, O> {
    pub fn new(objective: &'a mut O) -> Self {
        PseudoNewtonOptimiser {
            objective,
            stop_condition: Box::new(FunctionStopCondition::new(1e-6)),
            max_corrections: 10,
            max_iterations: 1000,
            state: OptimiserState::Uninitialised,
            current: ParameterList::new(),
            current_value: f64::NAN,
            previous: None,
            previous_value: None,
            initial_value: f64::NAN,
            iterations: 0,
            corrections: 0,
            tolerance_reached: false,
        }
    }

    pub fn with_max_corrections(mut self, max_corrections: usize) -> Self {
        self.max_corrections = max_corrections.max(1);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.stop_condition.set_tolerance(tolerance);
        self
    }

    pub fn with_stop_condition(mut self, stop_condition: Box<dyn StopCondition>) -> Self {
        self.stop_condition = stop_condition;
        self
    }

    pub fn state(&self) -> OptimiserState {
        self.state
    }

    pub fn objective(&self) -> &O {
        &*self.objective
    }

    pub fn parameters(&self) -> &ParameterList {
        &self.current
    }

    pub fn current_value(&self) -> f64 {
        self.current_value
    }

    pub fn is_tolerance_reached(&self) -> bool {
        self.tolerance_reached
    }

    pub fn progress(&self) -> OptimiserProgress {
        OptimiserProgress {
            iterations: self.iterations,
            corrections: self.corrections,
            current_value: self.current_value,
            previous_value: self.previous_value,
            current_point: self.current.values(),
            previous_point: self.previous.as_ref().map(|p| p.values()),
        }
    }

    /// Starts from `params`, a subset of the objective parameters, and optimises those only.
    pub fn init(&mut self, params: &ParameterList) -> Result<()> {
        self.objective.enable_second_order_derivatives(true);
        if let Err(err) = self.objective.set_parameters(params) {
            self.state = OptimiserState::Failed;
            return Err(err);
        }
        self.current = self
            .objective
            .parameters()
            .iter()
            .filter(|p| params.contains(p.name()))
            .cloned()
            .collect();
        self.current_value = self.objective.value();
        self.initial_value = self.current_value;
        self.previous = None;
        self.previous_value = None;
        self.iterations = 0;
        self.corrections = 0;
        self.tolerance_reached = false;
        self.state = OptimiserState::Initialised;
        info!(
            "Starting pseudo-Newton optimisation from {} with value {}.",
            self.current, self.current_value
        );
        Ok(())
    }

    pub fn step(&mut self) -> Result<f64> {
        if self.state == OptimiserState::Uninitialised {
            bail!(ConfigError {
                message: "Optimiser must be initialised before stepping.".to_string(),
            });
        }
        self.state = OptimiserState::Stepping;
        self.iterations += 1;
        self.corrections = 0;

        let mut movements = Vec::with_capacity(self.current.len());
        for param in self.current.iter() {
            let g = self.objective.first_derivative(param.name())?;
            let h = self.objective.second_derivative(param.name())?;
            let movement = if h == 0.0 {
                0.0
            } else if h < 0.0 {
                warn!(
                    "Negative second order derivative for {}: {}.",
                    param.name(),
                    h
                );
                -g / h
            } else {
                g / h
            };
            if movement.is_finite() {
                movements.push(movement);
            } else {
                warn!("Non-finite movement for {}, not moving it.", param.name());
                movements.push(0.0);
            }
        }

        let (mut proposal, mut new_value) = self.propose(&movements)?;
        // equal values are accepted
        while new_value > self.current_value || new_value.is_nan() {
            self.objective.set_parameters(&self.current)?;
            self.corrections += 1;
            if self.corrections >= self.max_corrections {
                warn!(
                    "Convergence probably not reached, no improvement after {} corrections.",
                    self.corrections
                );
                self.tolerance_reached = true;
                return Ok(self.current_value);
            }
            movements.iter_mut().for_each(|m| *m /= 2.0);
            (proposal, new_value) = self.propose(&movements)?;
        }

        debug!(
            "Step {}: value {} -> {} after {} correction(s).",
            self.iterations, self.current_value, new_value, self.corrections
        );
        self.previous = Some(std::mem::replace(&mut self.current, proposal));
        self.previous_value = Some(self.current_value);
        self.current_value = new_value;
        Ok(new_value)
    }

    /// Moves the objective to `x - movement`. A point outside of a parameter constraint is
    /// not evaluated and counts as infinitely bad.
    fn propose(&mut self, movements: &[f64]) -> Result<(ParameterList, f64)> {
        let mut proposal = self.current.clone();
        for (param, movement) in self.current.iter().zip(movements) {
            if proposal
                .set_value(param.name(), param.value() - movement)
                .is_err()
            {
                debug!("Proposed value for {} is out of bounds.", param.name());
                return Ok((proposal, f64::INFINITY));
            }
        }
        let value = self.objective.f(&proposal)?;
        Ok((proposal, value))
    }

    pub fn run(&mut self) -> Result<PseudoNewtonResult> {
        if self.state == OptimiserState::Uninitialised {
            let params = self.objective.parameters().clone();
            self.init(&params)?;
        }
        let termination = loop {
            if self.iterations >= self.max_iterations {
                warn!(
                    "Reached the maximum of {} iterations without converging.",
                    self.max_iterations
                );
                break Termination::MaxIterations;
            }
            if let Err(err) = self.step() {
                self.state = OptimiserState::Failed;
                return Err(err);
            }
            if self.tolerance_reached {
                break Termination::CorrectionBudget;
            }
            if self.stop_condition.is_reached(&self.progress()) {
                break Termination::StopCondition;
            }
        };
        self.state = match termination {
            Termination::MaxIterations => OptimiserState::Failed,
            _ => OptimiserState::Converged,
        };
        info!(
            "Pseudo-Newton optimisation finished after {} iteration(s) with value {}.",
            self.iterations, self.current_value
        );
        Ok(PseudoNewtonResult {
            initial_value: self.initial_value,
            final_value: self.current_value,
            iterations: self.iterations,
            parameters: self.current.clone(),
            termination,
        })
    }
}
