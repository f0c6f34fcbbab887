use approx::assert_relative_eq;
use assert_matches::assert_matches;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::likelihood::{BranchLengthCost, DerivableObjective, BRANCH_LENGTH};
use crate::optimisers::{
    FunctionStopCondition, OptimiserProgress, OptimiserState, PseudoNewtonOptimiser,
    StopCondition, Termination,
};
use crate::parameters::{unknown_parameter, Constraint, Parameter, ParameterList};
use crate::substitution_models::{dna_models::*, SubstitutionModel};
use crate::{downcast_error, ConfigError, Result};

/// Pair of sequences, the second evolved from the first along a branch of `length`.
#[cfg(test)]
pub(super) fn simulate_pair(
    model: &dyn SubstitutionModel,
    length: f64,
    n_sites: usize,
    seed: u64,
) -> (Vec<usize>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let p = model.p(length);
    let states = model.alphabet_states();
    let mut draw = |weights: Vec<f64>| {
        let u: f64 = rng.gen();
        let mut total = 0.0;
        for (i, w) in weights.iter().enumerate() {
            total += w;
            if u < total {
                return i;
            }
        }
        weights.len() - 1
    };
    let (mut seq1, mut seq2) = (Vec::new(), Vec::new());
    for _ in 0..n_sites {
        let x = draw(model.freqs().iter().copied().collect());
        let y = draw(p.row(x).iter().copied().collect());
        seq1.push(states[x]);
        seq2.push(states[y]);
    }
    (seq1, seq2)
}

#[derive(Clone, Debug)]
struct OneDimensional {
    parameters: ParameterList,
    f: fn(f64) -> f64,
    df: fn(f64) -> f64,
    d2f: fn(f64) -> f64,
    second_order: bool,
}

impl OneDimensional {
    fn new(
        x: f64,
        constraint: Option<Constraint>,
        f: fn(f64) -> f64,
        df: fn(f64) -> f64,
        d2f: fn(f64) -> f64,
    ) -> Self {
        OneDimensional {
            parameters: [Parameter::new("x", x, constraint).unwrap()]
                .into_iter()
                .collect(),
            f,
            df,
            d2f,
            second_order: false,
        }
    }

    fn x(&self) -> f64 {
        self.parameters.value("x").unwrap()
    }
}

impl DerivableObjective for OneDimensional {
    fn parameters(&self) -> &ParameterList {
        &self.parameters
    }

    fn set_parameters(&mut self, values: &ParameterList) -> Result<()> {
        if let Some(param) = values.iter().find(|p| !self.parameters.contains(p.name())) {
            return Err(unknown_parameter(param.name()).into());
        }
        self.parameters.match_values(values)?;
        Ok(())
    }

    fn value(&self) -> f64 {
        (self.f)(self.x())
    }

    fn first_derivative(&self, _name: &str) -> Result<f64> {
        Ok((self.df)(self.x()))
    }

    fn second_derivative(&self, _name: &str) -> Result<f64> {
        assert!(self.second_order);
        Ok((self.d2f)(self.x()))
    }

    fn enable_second_order_derivatives(&mut self, enable: bool) {
        self.second_order = enable;
    }
}

#[cfg(test)]
fn quadratic(x: f64) -> OneDimensional {
    OneDimensional::new(x, None, |x| (x - 3.0).powi(2), |x| 2.0 * (x - 3.0), |_| 2.0)
}

#[test]
fn quadratic_in_one_step() {
    let mut objective = quadratic(0.0);
    let mut optimiser = PseudoNewtonOptimiser::new(&mut objective);
    assert_eq!(optimiser.state(), OptimiserState::Uninitialised);
    let params = optimiser.objective().parameters().clone();
    optimiser.init(&params).unwrap();
    assert_eq!(optimiser.state(), OptimiserState::Initialised);
    assert_eq!(optimiser.current_value(), 9.0);
    assert_eq!(optimiser.step().unwrap(), 0.0);
    assert_eq!(optimiser.state(), OptimiserState::Stepping);
    assert_eq!(optimiser.parameters().value("x").unwrap(), 3.0);
    assert_eq!(optimiser.objective().x(), 3.0);
    assert_eq!(optimiser.progress().corrections, 0);
}

#[test]
fn quadratic_run() {
    let mut objective = quadratic(0.0);
    let result = PseudoNewtonOptimiser::new(&mut objective).run().unwrap();
    assert_eq!(result.termination, Termination::StopCondition);
    assert_eq!(result.initial_value, 9.0);
    assert_eq!(result.final_value, 0.0);
    assert_eq!(result.iterations, 2);
    assert_eq!(result.parameters.value("x").unwrap(), 3.0);
    assert_eq!(objective.x(), 3.0);
}

#[test]
fn step_before_init() {
    let mut objective = quadratic(0.0);
    let mut optimiser = PseudoNewtonOptimiser::new(&mut objective);
    let res = optimiser.step();
    assert_matches!(
        downcast_error::<ConfigError, _>(&res).to_string().as_str(),
        "Optimiser must be initialised before stepping."
    );
}

#[test]
fn overshooting_step_is_halved() {
    // Newton overshoots on a function that flattens out away from the minimum
    let mut objective = OneDimensional::new(
        2.0,
        None,
        |x| (1.0 + x * x).sqrt(),
        |x| x / (1.0 + x * x).sqrt(),
        |x| (1.0 + x * x).powf(-1.5),
    );
    let mut optimiser = PseudoNewtonOptimiser::new(&mut objective);
    let params = optimiser.objective().parameters().clone();
    optimiser.init(&params).unwrap();
    let value = optimiser.step().unwrap();
    // movement of 10 is halved twice
    assert_eq!(optimiser.progress().corrections, 2);
    assert_relative_eq!(
        optimiser.parameters().value("x").unwrap(),
        -0.5,
        epsilon = 1e-12
    );
    assert_relative_eq!(value, 1.25f64.sqrt(), epsilon = 1e-12);
    assert!(!optimiser.is_tolerance_reached());
}

#[test]
fn soft_stop_after_correction_budget() {
    // derivative of the wrong sign, every step goes uphill
    let mut objective = OneDimensional::new(1.0, None, |x| x * x, |x| -2.0 * x, |_| 2.0);
    let mut optimiser = PseudoNewtonOptimiser::new(&mut objective).with_max_corrections(4);
    let result = optimiser.run().unwrap();
    assert_eq!(result.termination, Termination::CorrectionBudget);
    assert_eq!(result.iterations, 1);
    assert_eq!(result.final_value, result.initial_value);
    assert_eq!(result.parameters.value("x").unwrap(), 1.0);
    assert_eq!(optimiser.progress().corrections, 4);
    assert!(optimiser.is_tolerance_reached());
    assert_eq!(optimiser.state(), OptimiserState::Converged);
    assert_eq!(optimiser.objective().x(), 1.0);
}

#[test]
fn negative_curvature_moves_downhill() {
    let mut objective = OneDimensional::new(1.0, None, |x| -x * x, |x| -2.0 * x, |_| -2.0);
    let mut optimiser = PseudoNewtonOptimiser::new(&mut objective);
    let params = optimiser.objective().parameters().clone();
    optimiser.init(&params).unwrap();
    assert_eq!(optimiser.step().unwrap(), -4.0);
    assert_eq!(optimiser.parameters().value("x").unwrap(), 2.0);
}

#[test]
fn flat_curvature_does_not_move() {
    let mut objective = OneDimensional::new(1.0, None, |x| x, |_| 1.0, |_| 0.0);
    let result = PseudoNewtonOptimiser::new(&mut objective).run().unwrap();
    assert_eq!(result.termination, Termination::StopCondition);
    assert_eq!(result.iterations, 1);
    assert_eq!(result.parameters.value("x").unwrap(), 1.0);
}

#[test]
fn proposal_outside_constraint() {
    let mut objective = OneDimensional::new(
        1.0,
        Some(Constraint::NonNegative),
        |x| (x + 1.0).powi(2),
        |x| 2.0 * (x + 1.0),
        |_| 2.0,
    );
    let mut optimiser = PseudoNewtonOptimiser::new(&mut objective);
    let params = optimiser.objective().parameters().clone();
    optimiser.init(&params).unwrap();
    assert_eq!(optimiser.step().unwrap(), 1.0);
    assert_eq!(optimiser.progress().corrections, 1);
    assert_eq!(optimiser.parameters().value("x").unwrap(), 0.0);
}

#[test]
fn iteration_limit() {
    let mut objective = OneDimensional::new(
        2.0,
        None,
        |x| (1.0 + x * x).sqrt(),
        |x| x / (1.0 + x * x).sqrt(),
        |x| (1.0 + x * x).powf(-1.5),
    );
    let mut optimiser = PseudoNewtonOptimiser::new(&mut objective).with_max_iterations(1);
    let result = optimiser.run().unwrap();
    assert_eq!(result.termination, Termination::MaxIterations);
    assert_eq!(result.iterations, 1);
    assert_eq!(optimiser.state(), OptimiserState::Failed);
}

#[derive(Clone, Debug)]
struct PointStopCondition {
    tolerance: f64,
}

impl StopCondition for PointStopCondition {
    fn is_reached(&self, progress: &OptimiserProgress) -> bool {
        progress.previous_point.as_ref().is_some_and(|previous| {
            previous
                .iter()
                .zip(&progress.current_point)
                .all(|(a, b)| (a - b).abs() < self.tolerance)
        })
    }

    fn tolerance(&self) -> f64 {
        self.tolerance
    }

    fn set_tolerance(&mut self, tolerance: f64) {
        self.tolerance = tolerance;
    }
}

#[test]
fn custom_stop_condition() {
    let mut objective = quadratic(-5.0);
    let result = PseudoNewtonOptimiser::new(&mut objective)
        .with_stop_condition(Box::new(PointStopCondition { tolerance: 1.0 }))
        .with_tolerance(1e-8)
        .run()
        .unwrap();
    assert_eq!(result.termination, Termination::StopCondition);
    assert_eq!(result.iterations, 2);
    assert_eq!(result.parameters.value("x").unwrap(), 3.0);
}

#[test]
fn function_stop_condition() {
    let condition = FunctionStopCondition::new(1e-3);
    let mut progress = OptimiserProgress {
        iterations: 1,
        corrections: 0,
        current_value: 1.0,
        previous_value: None,
        current_point: vec![0.0],
        previous_point: None,
    };
    assert!(!condition.is_reached(&progress));
    progress.previous_value = Some(1.1);
    assert!(!condition.is_reached(&progress));
    progress.previous_value = Some(1.0005);
    assert!(condition.is_reached(&progress));
    assert_eq!(condition.tolerance(), 1e-3);
}

#[test]
fn recovers_jc69_branch_length() {
    let model = JC69Model::new(JC69, &[], &[]).unwrap();
    let (seq1, seq2) = simulate_pair(&model, 0.3, 5000, 7);
    let diffs = seq1.iter().zip(&seq2).filter(|(a, b)| a != b).count();
    let p = diffs as f64 / seq1.len() as f64;
    let expected = -0.75 * (1.0 - 4.0 * p / 3.0).ln();

    let mut cost = BranchLengthCost::new(model, &seq1, &seq2, 0.1).unwrap();
    let initial = cost.value();
    let result = PseudoNewtonOptimiser::new(&mut cost).run().unwrap();
    assert!(result.final_value < initial);
    assert_eq!(result.initial_value, initial);
    let length = result.parameters.value(BRANCH_LENGTH).unwrap();
    assert_relative_eq!(length, expected, epsilon = 1e-4);
    assert_relative_eq!(cost.branch_length(), length);
    assert!((length - 0.3).abs() < 0.05);
}

#[test]
fn recovers_hky_branch_length() {
    let model = HKYModel::new(HKY, &[0.1, 0.2, 0.3, 0.4], &[4.0]).unwrap();
    let (seq1, seq2) = simulate_pair(&model, 0.5, 5000, 11);
    let mut cost = BranchLengthCost::new(model, &seq1, &seq2, 1.5).unwrap();
    let result = PseudoNewtonOptimiser::new(&mut cost)
        .with_tolerance(1e-8)
        .run()
        .unwrap();
    let length = result.parameters.value(BRANCH_LENGTH).unwrap();
    assert!((length - 0.5).abs() < 0.1);
    cost.enable_second_order_derivatives(true);
    assert!(cost.first_derivative(BRANCH_LENGTH).unwrap().abs() < 1.0);
    assert!(cost.second_derivative(BRANCH_LENGTH).unwrap() > 0.0);
}
