//! Allocation sanitization.
//!
//! Agents are untrusted: whatever they return goes through [`validate`] before it can touch the
//! game state. Three rules are checked in order, and the first failure replaces the whole reply
//! with an all-zero allocation:
//!
//! 1. the reply is a sequence of exactly `num_fields` numbers,
//! 2. every number is a non-negative integer (floats are accepted when their fractional part is
//!    zero),
//! 3. the numbers sum to at most the agent's balance.
//!
//! Nothing in this module panics, whatever the input.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single value of an agent reply, before sanitization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// An exact integer.
    Integer(i128),
    /// A floating point number. Only accepted if it is finite and integral.
    Float(f64),
    /// Anything that is not a number.
    NonNumeric(String),
}

macro_rules! raw_integer_from {
    ($($t:ty),*) => {
        $(impl From<$t> for RawValue {
            fn from(value: $t) -> Self {
                RawValue::Integer(value as i128)
            }
        })*
    };
}

raw_integer_from!(u8, u16, u32, u64, usize, i8, i16, i32, i64);

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Float(value)
    }
}

impl From<f32> for RawValue {
    fn from(value: f32) -> Self {
        RawValue::Float(value as f64)
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::NonNumeric(value.to_string())
    }
}

/// Whatever an agent handed back, before sanitization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutput {
    /// An ordered collection of values.
    Sequence(Vec<RawValue>),
    /// The agent produced nothing (timeout or crash).
    Nothing,
    /// The reply could not be read as a collection at all.
    Unreadable(String),
}

impl<T: Into<RawValue>> From<Vec<T>> for RawOutput {
    fn from(values: Vec<T>) -> Self {
        values.into_iter().collect()
    }
}

impl<T: Into<RawValue>> FromIterator<T> for RawOutput {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        RawOutput::Sequence(iter.into_iter().map(Into::into).collect())
    }
}

impl From<Allocation> for RawOutput {
    fn from(allocation: Allocation) -> Self {
        allocation.0.into()
    }
}

/// Resources committed by one agent to each field during one round.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Allocation(Vec<u64>);

impl Allocation {
    /// The allocation of an agent that did not (validly) play.
    pub fn zeros(num_fields: usize) -> Allocation {
        Allocation(vec![0; num_fields])
    }

    /// Total resources spent.
    ///
    /// Sanitized allocations never exceed a `u64` balance, so this cannot overflow for them.
    pub fn total(&self) -> u64 {
        self.0.iter().fold(0u64, |acc, v| acc.saturating_add(*v))
    }

    /// Resources put on `field`, zero if out of range.
    pub fn get(&self, field: usize) -> u64 {
        self.0.get(field).copied().unwrap_or(0)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for an allocation over no field.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Amount committed to each field.
    pub fn as_slice(&self) -> &[u64] {
        &self.0
    }
}

impl From<Vec<u64>> for Allocation {
    fn from(values: Vec<u64>) -> Self {
        Allocation(values)
    }
}

impl fmt::Display for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = self
            .0
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "[{values}]")
    }
}

/// Why a reply was replaced with zeros.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// The reply is not a collection (or the agent produced nothing).
    #[error("reply is not a sequence of numbers")]
    NotASequence,
    /// The reply has the wrong number of values.
    #[error("expected {expected} values, got {found}")]
    WrongLength {
        /// Number of fields.
        expected: usize,
        /// Number of values in the reply.
        found: usize,
    },
    /// A value is not a number.
    #[error("value at index {index} is not a number")]
    NonNumeric {
        /// Position of the value.
        index: usize,
    },
    /// A value is negative, fractional or not finite.
    #[error("value at index {index} is not a non-negative integer")]
    NotNonNegativeInteger {
        /// Position of the value.
        index: usize,
    },
    /// The reply spends more than the agent owns.
    #[error("total allocation ({sum}) exceeds balance ({balance})")]
    OverBudget {
        /// Sum of the reply.
        sum: u128,
        /// Balance at the start of the round.
        balance: u64,
    },
}

/// Checks `raw` against the three rules and reports the first one that fails.
pub fn check(raw: &RawOutput, num_fields: usize, balance: u64) -> Result<Allocation, Rejection> {
    let values = match raw {
        RawOutput::Sequence(values) => values,
        RawOutput::Nothing | RawOutput::Unreadable(_) => return Err(Rejection::NotASequence),
    };

    // rule 1: shape
    if values.len() != num_fields {
        return Err(Rejection::WrongLength {
            expected: num_fields,
            found: values.len(),
        });
    }
    if let Some(index) = values
        .iter()
        .position(|v| matches!(v, RawValue::NonNumeric(_)))
    {
        return Err(Rejection::NonNumeric { index });
    }

    // rule 2: non-negative integers
    let mut integers = Vec::with_capacity(num_fields);
    for (index, value) in values.iter().enumerate() {
        match as_non_negative_integer(value) {
            Some(v) => integers.push(v),
            None => return Err(Rejection::NotNonNegativeInteger { index }),
        }
    }

    // rule 3: budget
    let sum = integers.iter().fold(0u128, |acc, v| acc.saturating_add(*v));
    if sum > balance as u128 {
        return Err(Rejection::OverBudget { sum, balance });
    }

    // every value is <= sum <= balance, so it fits in a u64
    Ok(Allocation(integers.into_iter().map(|v| v as u64).collect()))
}

/// Sanitizes an agent reply: the checked allocation, or all zeros if any rule fails.
pub fn validate(raw: &RawOutput, num_fields: usize, balance: u64) -> Allocation {
    check(raw, num_fields, balance).unwrap_or_else(|_| Allocation::zeros(num_fields))
}

fn as_non_negative_integer(value: &RawValue) -> Option<u128> {
    match *value {
        RawValue::Integer(i) if i >= 0 => Some(i as u128),
        RawValue::Float(f) if f.is_finite() && f.fract() == 0.0 && f >= 0.0 => Some(f as u128),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_allocation_is_a_fixed_point() {
        let raw = RawOutput::from(vec![3u64, 3, 4]);
        let first = validate(&raw, 3, 10);
        assert_eq!(first.as_slice(), &[3, 3, 4]);
        let second = validate(&RawOutput::from(first.clone()), 3, 10);
        assert_eq!(first, second);
    }

    #[test]
    fn spending_the_whole_balance_is_allowed() {
        let raw = RawOutput::from(vec![5u64, 0, 5]);
        assert_eq!(check(&raw, 3, 10).unwrap().total(), 10);
    }

    #[test]
    fn over_budget_is_zeroed() {
        let raw = RawOutput::from(vec![3u64, 3]);
        assert_eq!(
            check(&raw, 2, 5),
            Err(Rejection::OverBudget { sum: 6, balance: 5 })
        );
        assert_eq!(validate(&raw, 2, 5), Allocation::zeros(2));
    }

    #[test]
    fn wrong_length_is_zeroed() {
        let raw = RawOutput::from(vec![1u64, 1]);
        assert_eq!(
            check(&raw, 3, 10),
            Err(Rejection::WrongLength {
                expected: 3,
                found: 2
            })
        );
        assert_eq!(validate(&raw, 3, 10), Allocation::zeros(3));
    }

    #[test]
    fn negative_and_fractional_values_are_rejected() {
        let negative = RawOutput::from(vec![1i64, -1, 2]);
        assert_eq!(
            check(&negative, 3, 10),
            Err(Rejection::NotNonNegativeInteger { index: 1 })
        );

        let fractional = RawOutput::from(vec![1.0f64, 2.5, 0.0]);
        assert_eq!(
            check(&fractional, 3, 10),
            Err(Rejection::NotNonNegativeInteger { index: 1 })
        );

        let not_finite = RawOutput::from(vec![f64::NAN, 1.0]);
        assert_eq!(
            check(&not_finite, 2, 10),
            Err(Rejection::NotNonNegativeInteger { index: 0 })
        );
    }

    #[test]
    fn integral_floats_are_accepted() {
        let raw = RawOutput::from(vec![2.0f64, 0.0, 3.0]);
        assert_eq!(validate(&raw, 3, 5).as_slice(), &[2, 0, 3]);
    }

    #[test]
    fn shape_is_checked_before_values() {
        // a negative value and a wrong length: the length failure wins
        let raw = RawOutput::from(vec![-1i64]);
        assert!(matches!(
            check(&raw, 2, 10),
            Err(Rejection::WrongLength { .. })
        ));

        let raw = RawOutput::Sequence(vec![RawValue::Integer(-4), "seven".into()]);
        assert_eq!(check(&raw, 2, 10), Err(Rejection::NonNumeric { index: 1 }));
    }

    #[test]
    fn nothing_and_unreadable_are_zeroed() {
        assert_eq!(validate(&RawOutput::Nothing, 4, 10), Allocation::zeros(4));
        assert_eq!(
            check(&RawOutput::Unreadable("{}".into()), 4, 10),
            Err(Rejection::NotASequence)
        );
    }

    #[test]
    fn huge_values_do_not_overflow() {
        let raw = RawOutput::from(vec![u64::MAX, u64::MAX]);
        assert!(matches!(
            check(&raw, 2, u64::MAX),
            Err(Rejection::OverBudget { .. })
        ));
        let raw = RawOutput::from(vec![1e300f64]);
        assert!(matches!(
            check(&raw, 1, 10),
            Err(Rejection::OverBudget { .. })
        ));
    }
}
