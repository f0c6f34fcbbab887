use std::collections::HashMap;

use approx::assert_relative_eq;
use assert_matches::assert_matches;
use rand::Rng;

use crate::alphabets::dna_alphabet;
use crate::substitution_models::{
    dna_models::*, reversible_generator, ExchangeabilityMaker, FreqVector, RateMatrixModel,
    ReversibleModel, SubstMatrix, SubstitutionModel,
};
use crate::{downcast_error, frequencies, ConfigError, DomainError};

#[cfg(test)]
fn check_freq_convergence(substmat: SubstMatrix, pi: &FreqVector, epsilon: f64) {
    assert_eq!(substmat.nrows(), pi.len());
    assert_eq!(substmat.ncols(), pi.len());
    for row in substmat.row_iter() {
        assert_relative_eq!(row.sum(), 1.0, epsilon = epsilon);
        assert_relative_eq!(row, pi.transpose().as_view(), epsilon = epsilon);
    }
}

#[cfg(test)]
fn all_dna_models() -> Vec<Box<dyn SubstitutionModel>> {
    let freqs = [0.1, 0.2, 0.3, 0.4];
    vec![
        Box::new(JC69Model::new(JC69, &[], &[]).unwrap()),
        Box::new(K80Model::new(K80, &[], &[3.0]).unwrap()),
        Box::new(HKYModel::new(HKY, &freqs, &[2.5]).unwrap()),
        Box::new(TN93Model::new(TN93, &freqs, &[2.0, 4.0]).unwrap()),
        Box::new(GTRModel::new(GTR, &freqs, &[0.5, 1.5, 2.0, 0.7, 1.2]).unwrap()),
    ]
}

#[test]
fn p_at_zero_is_identity() {
    for model in all_dna_models() {
        assert_eq!(model.p(0.0), SubstMatrix::identity(4, 4), "{}", model.name());
        assert_eq!(model.transition_probability(1, 1, 0.0), 1.0);
        assert_eq!(model.transition_probability(1, 2, 0.0), 0.0);
    }
}

#[test]
fn p_rows_sum_to_one() {
    let mut rng = rand::thread_rng();
    for model in all_dna_models() {
        for _ in 0..10 {
            let time = rng.gen_range(0.001..5.0);
            for row in model.p(time).row_iter() {
                assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-10);
                assert!(row.iter().all(|&p| p >= -1e-12));
            }
        }
    }
}

#[test]
fn p_converges_to_freqs() {
    for model in all_dna_models() {
        check_freq_convergence(model.p(1000.0), model.freqs(), 1e-5);
    }
}

#[cfg(test)]
fn reversible_template<R: ExchangeabilityMaker>(maker: R, freqs: &[f64], params: &[f64]) {
    let model = ReversibleModel::new(maker, freqs, params).unwrap();
    let q = model.q();
    let pi = model.freqs();
    for i in 0..4 {
        assert_relative_eq!(q.row(i).sum(), 0.0, epsilon = 1e-12);
        for j in 0..4 {
            assert_relative_eq!(pi[i] * q[(i, j)], pi[j] * q[(j, i)], epsilon = 1e-12);
            assert_relative_eq!(model.exchangeability()[(i, j)], model.exchangeability()[(j, i)]);
        }
    }
    assert_relative_eq!(model.scale(), 1.0, epsilon = 1e-12);
}

#[test]
fn dna_models_reversible_and_normalised() {
    reversible_template(JC69, &[], &[]);
    reversible_template(K80, &[], &[2.0]);
    reversible_template(HKY, &[0.2, 0.1, 0.5, 0.2], &[2.0]);
    reversible_template(TN93, &[0.1, 0.1, 0.44, 0.36], &[2.0, 3.0]);
    reversible_template(GTR, &[0.7, 0.1, 0.1, 0.1], &[2.0, 0.5, 1.0, 4.0, 0.2]);
}

#[test]
fn jc69_closed_form() {
    let jc69 = JC69Model::new(JC69, &[], &[]).unwrap();
    assert_relative_eq!(jc69.qij(0, 0), -1.0, epsilon = 1e-12);
    assert_relative_eq!(jc69.qij(2, 1), 1.0 / 3.0, epsilon = 1e-12);
    for time in [0.01, 0.1, 0.5, 1.0, 2.0] {
        let e = (-4.0 * time / 3.0f64).exp();
        let p = jc69.p(time);
        for i in 0..4 {
            for j in 0..4 {
                let expected = if i == j {
                    0.25 + 0.75 * e
                } else {
                    0.25 - 0.25 * e
                };
                assert_relative_eq!(p[(i, j)], expected, epsilon = 1e-12);
            }
        }
        assert_relative_eq!(
            jc69.first_derivative(0, 0, time),
            -e,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            jc69.second_derivative(0, 1, time),
            -4.0 / 9.0 * e,
            epsilon = 1e-12
        );
    }
}

#[test]
fn k80_rates() {
    let k80 = K80Model::new(K80, &[], &[2.0]).unwrap();
    // transitions T<->C and A<->G twice as fast as transversions
    assert_relative_eq!(k80.qij(0, 1), 2.0 * k80.qij(0, 2), epsilon = 1e-12);
    assert_relative_eq!(k80.qij(2, 3), 2.0 * k80.qij(1, 3), epsilon = 1e-12);
    assert_relative_eq!(k80.qij(0, 0), -1.0, epsilon = 1e-12);
}

#[test]
fn tn93_separate_transitions() {
    let tn93 = TN93Model::new(TN93, &[], &[2.0, 5.0]).unwrap();
    assert_relative_eq!(tn93.qij(0, 1) / tn93.qij(0, 2), 2.0, epsilon = 1e-12);
    assert_relative_eq!(tn93.qij(2, 3) / tn93.qij(2, 0), 5.0, epsilon = 1e-12);
}

#[test]
fn derivatives_match_finite_differences() {
    let h = 1e-5;
    for model in all_dna_models() {
        for time in [0.05, 0.3, 1.2] {
            let numeric = (model.p(time + h) - model.p(time - h)) / (2.0 * h);
            assert_relative_eq!(model.dp(time), numeric, epsilon = 1e-7);
            let numeric = (model.dp(time + h) - model.dp(time - h)) / (2.0 * h);
            assert_relative_eq!(model.d2p(time), numeric, epsilon = 1e-7);
        }
    }
}

#[test]
fn positional_parameters() {
    let hky = HKYModel::new(HKY, &[0.1, 0.2, 0.3, 0.4], &[3.0, 7.0, 9.0]).unwrap();
    assert_eq!(hky.parameters().values(), vec![3.0]);
    let gtr = GTRModel::new(GTR, &[], &[2.0]).unwrap();
    assert_eq!(gtr.parameters().values(), vec![2.0, 1.0, 1.0, 1.0, 1.0]);
    assert_eq!(
        gtr.parameters().names(),
        vec!["rtc", "rta", "rtg", "rca", "rcg"]
    );
    let k80 = K80Model::new(K80, &[0.1, 0.2, 0.3, 0.4], &[]).unwrap();
    assert_eq!(k80.freqs(), &frequencies!(&[0.25; 4]));
}

#[test]
fn invalid_construction() {
    let res = HKYModel::new(HKY, &[0.1, 0.2, 0.3], &[]);
    assert_matches!(
        downcast_error::<DomainError, _>(&res).to_string().as_str(),
        "Expected 4 frequencies, got 3."
    );
    let res = HKYModel::new(HKY, &[0.1, 0.2, 0.3, 0.3], &[]);
    assert!(downcast_error::<DomainError, _>(&res)
        .to_string()
        .contains("must sum to 1"));
    let res = HKYModel::new(HKY, &[], &[-2.0]);
    assert!(downcast_error::<DomainError, _>(&res)
        .to_string()
        .contains("parameter kappa"));
}

#[test]
fn set_parameter_rebuilds() {
    let mut hky = HKYModel::new(HKY, &[0.2, 0.3, 0.1, 0.4], &[1.0]).unwrap();
    let p_before = hky.p(0.5);
    let pij_before = hky.transition_probability(0, 1, 0.5);
    hky.set_parameter("kappa", 4.0).unwrap();
    assert_eq!(hky.parameter_value("kappa").unwrap(), 4.0);
    assert_ne!(hky.p(0.5), p_before);
    assert_ne!(hky.transition_probability(0, 1, 0.5), pij_before);
    assert_eq!(hky.transition_probability(0, 1, 0.5), hky.p(0.5)[(0, 1)]);
    assert_relative_eq!(hky.scale(), 1.0, epsilon = 1e-12);

    let res = hky.set_parameter("kappa", 0.0);
    assert!(downcast_error::<DomainError, _>(&res)
        .to_string()
        .contains("outside of"));
    assert_eq!(hky.parameter_value("kappa").unwrap(), 4.0);
    let res = hky.set_parameter("omega", 2.0);
    assert_matches!(
        downcast_error::<DomainError, _>(&res).to_string().as_str(),
        "Unknown parameter omega."
    );
}

#[test]
fn set_parameters_by_list() {
    let mut tn93 = TN93Model::new(TN93, &[], &[]).unwrap();
    let mut values = tn93.parameters().clone();
    values.set_value("kappa2", 3.0).unwrap();
    assert_eq!(tn93.set_parameters(&values).unwrap(), 2);
    assert_eq!(tn93.parameters().values(), vec![1.0, 3.0]);
}

#[test]
fn rate_scales_time() {
    let mut model = GTRModel::new(GTR, &[0.3, 0.2, 0.2, 0.3], &[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
    let reference = model.p(0.8);
    model.set_rate(2.0).unwrap();
    assert_eq!(model.rate(), 2.0);
    assert_relative_eq!(model.p(0.4), reference, epsilon = 1e-12);
    // the generator itself is not scaled by the rate
    assert_relative_eq!(model.scale(), 1.0, epsilon = 1e-12);

    let res = model.set_rate(0.0);
    assert_matches!(
        downcast_error::<DomainError, _>(&res).to_string().as_str(),
        "Rate must be positive, got 0."
    );
    assert!(model.set_rate(f64::NAN).is_err());
    assert_eq!(model.rate(), 2.0);
}

#[test]
fn set_freqs_from_map() {
    let mut hky = HKYModel::new(HKY, &[], &[2.0]).unwrap();
    hky.set_freqs(&HashMap::from([(0, 0.5), (2, 0.5)])).unwrap();
    assert_eq!(hky.freqs(), &frequencies!(&[0.5, 0.0, 0.5, 0.0]));
    assert_eq!(hky.freq(2), 0.5);
    assert_relative_eq!(hky.scale(), 1.0, epsilon = 1e-12);
    for row in hky.p(0.7).row_iter() {
        assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-10);
    }

    let res = hky.set_freqs(&HashMap::from([(0, 0.5), (1, 0.2)]));
    assert!(downcast_error::<DomainError, _>(&res)
        .to_string()
        .contains("must sum to 1"));
    let res = hky.set_freqs(&HashMap::from([(4, 1.0)]));
    assert!(downcast_error::<DomainError, _>(&res)
        .to_string()
        .contains("must sum to 1"));
    assert_eq!(hky.freqs(), &frequencies!(&[0.5, 0.0, 0.5, 0.0]));
}

#[test]
fn freqs_past_last_state_are_ignored() {
    let mut hky = HKYModel::new(HKY, &[], &[2.0]).unwrap();
    let freqs = HashMap::from([(0, 0.1), (1, 0.2), (2, 0.3), (3, 0.4), (7, 0.0), (12, 0.5)]);
    hky.set_freqs(&freqs).unwrap();
    assert_eq!(hky.freqs(), &frequencies!(&[0.1, 0.2, 0.3, 0.4]));
    assert_relative_eq!(hky.scale(), 1.0, epsilon = 1e-12);
}

#[test]
fn fixed_freqs_are_ignored() {
    for mut model in [
        Box::new(JC69Model::new(JC69, &[], &[]).unwrap()) as Box<dyn SubstitutionModel>,
        Box::new(K80Model::new(K80, &[], &[2.0]).unwrap()),
    ] {
        let freqs = HashMap::from([(0, 0.1), (1, 0.2), (2, 0.3), (3, 0.4)]);
        model.set_freqs(&freqs).unwrap();
        assert_eq!(model.freqs(), &frequencies!(&[0.25; 4]));
    }
}

#[test]
fn init_values() {
    let hky = HKYModel::new(HKY, &[], &[]).unwrap();
    let r = dna_alphabet().code("R").unwrap();
    assert_eq!(hky.init_value(0, r).unwrap(), 0.0);
    assert_eq!(hky.init_value(2, r).unwrap(), 1.0);
    assert_eq!(hky.init_value(3, 3).unwrap(), 1.0);
    assert_eq!(hky.init_value(3, 1).unwrap(), 0.0);
    let res = hky.init_value(4, 0);
    assert!(downcast_error::<DomainError, _>(&res)
        .to_string()
        .contains("out of range"));
    assert!(hky.init_value(0, 1000).is_err());
}

#[test]
fn clones_are_independent() {
    let model: Box<dyn SubstitutionModel> =
        Box::new(HKYModel::new(HKY, &[0.1, 0.2, 0.3, 0.4], &[2.0]).unwrap());
    let mut copy = model.clone();
    for time in [0.1, 0.5, 1.0, 3.0] {
        assert_eq!(model.p(time), copy.p(time));
    }
    copy.set_parameter("kappa", 10.0).unwrap();
    assert_eq!(model.parameter_value("kappa").unwrap(), 2.0);
    assert_ne!(model.p(0.5), copy.p(0.5));
}

#[test]
fn zero_scale_generator() {
    let res = reversible_generator(&SubstMatrix::zeros(4, 4), &frequencies!(&[0.25; 4]));
    assert!(downcast_error::<ConfigError, _>(&res)
        .to_string()
        .contains("Cannot normalise"));
}

#[cfg(test)]
fn circular_generator() -> SubstMatrix {
    // T -> C -> A -> G -> T, violates detailed balance
    SubstMatrix::from_row_slice(
        4,
        4,
        &[
            -1.0, 1.0, 0.0, 0.0, //
            0.0, -1.0, 1.0, 0.0, //
            0.0, 0.0, -1.0, 1.0, //
            1.0, 0.0, 0.0, -1.0,
        ],
    )
}

#[test]
fn rate_matrix_model_dense_fallback() {
    let model = RateMatrixModel::new(
        "Circular",
        dna_alphabet(),
        &[0, 1, 2, 3],
        &[0.25; 4],
        circular_generator(),
    )
    .unwrap();
    assert!(!model.is_reversible());
    assert!(model.parameters().is_empty());
    assert_eq!(model.p(0.0), SubstMatrix::identity(4, 4));
    let p = model.p(0.6);
    assert_relative_eq!(p, (circular_generator() * 0.6).exp(), epsilon = 1e-12);
    for row in p.row_iter() {
        assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-10);
    }
    assert_relative_eq!(model.dp(0.6), circular_generator() * p.clone(), epsilon = 1e-12);
    assert_relative_eq!(model.scale(), 1.0, epsilon = 1e-12);
}

#[test]
fn rate_matrix_model_reversible_generator() {
    let jc69 = JC69Model::new(JC69, &[], &[]).unwrap();
    let mut model =
        RateMatrixModel::new("Explicit", dna_alphabet(), &[0, 1, 2, 3], &[0.25; 4], jc69.q())
            .unwrap();
    assert!(model.is_reversible());
    assert_relative_eq!(model.p(0.3), jc69.p(0.3), epsilon = 1e-12);
    assert!(model.set_parameter("kappa", 1.0).is_err());

    let generator = model.q();
    model
        .set_freqs(&HashMap::from([(0, 0.4), (1, 0.1), (2, 0.1), (3, 0.4)]))
        .unwrap();
    assert_eq!(model.q(), generator);
    assert_eq!(model.freq(0), 0.4);
}

#[test]
fn rate_matrix_model_validation() {
    let alphabet = dna_alphabet();
    let res = RateMatrixModel::new("Bad", alphabet, &[0, 1, 2], &[0.25; 4], circular_generator());
    assert!(downcast_error::<DomainError, _>(&res)
        .to_string()
        .starts_with("Generator is 4x4"));
    let mut generator = circular_generator();
    generator[(0, 0)] = -2.0;
    let res = RateMatrixModel::new("Bad", alphabet, &[0, 1, 2, 3], &[0.25; 4], generator);
    assert_matches!(
        downcast_error::<DomainError, _>(&res).to_string().as_str(),
        "Row 0 of the generator sums to -1."
    );
    let mut generator = circular_generator();
    generator[(0, 2)] = -1.0;
    generator[(0, 0)] = 0.0;
    let res = RateMatrixModel::new("Bad", alphabet, &[0, 1, 2, 3], &[0.25; 4], generator);
    assert!(res.is_err());
    let res = RateMatrixModel::new("Bad", alphabet, &[0, 1, 2, 3], &[0.5; 4], circular_generator());
    assert!(res.is_err());
    let res = RateMatrixModel::new("Bad", alphabet, &[0, 1, 2, 14], &[0.25; 4], circular_generator());
    assert!(res.is_err());
}
