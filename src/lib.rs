use std::error::Error as StdError;
use std::fmt;

use anyhow::Error;

pub mod alphabets;
pub mod distributions;
pub mod likelihood;
pub mod optimisers;
pub mod parameters;
pub mod substitution_models;

pub type Result<T> = std::result::Result<T, Error>;

/// Raised when a model, mixture or distribution is put together incorrectly, e.g. a
/// distribution without categories or a codon mixture without a usable synonymous pair.
pub struct ConfigError {
    pub(crate) message: String,
}
impl fmt::Debug for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}
impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}
impl StdError for ConfigError {}

/// Raised by the call that introduced an out of range value: a state index, an alphabet
/// code, a rate or a parameter value outside of its constraint.
pub struct DomainError {
    pub(crate) message: String,
}
impl fmt::Debug for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}
impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}
impl StdError for DomainError {}

pub fn assert_float_relative_slice_eq(actual: &[f64], expected: &[f64], epsilon: f64) {
    use approx::relative_eq;
    assert_eq!(
        actual.len(),
        expected.len(),
        "Must have the same number of entries."
    );
    for (i, (&act, &exp)) in actual.iter().zip(expected.iter()).enumerate() {
        assert!(
            relative_eq!(act, exp, epsilon = epsilon),
            "Entries at position {} do not match, actual: {}, expected: {}",
            i,
            act,
            exp,
        );
    }
}

#[cfg(test)]
pub(crate) fn downcast_error<T: fmt::Display + fmt::Debug + Send + Sync + 'static, V>(
    result: &Result<V>,
) -> &T {
    result.as_ref().err().unwrap().downcast_ref::<T>().unwrap()
}
