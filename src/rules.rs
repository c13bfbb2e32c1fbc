//! Game rules fixed for the whole tournament.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Shape of the contest: the contested fields, how long it lasts and how much each agent starts
/// with.
///
/// Rules are validated once, in [`Rules::new`]. A `Rules` value is always valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rules {
    num_fields: usize,
    field_values: Vec<u64>,
    total_rounds: u32,
    starting_balance: u64,
}

impl Rules {
    /// Creates validated rules.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if there are no fields, no rounds, if `field_values` does not
    /// hold exactly `num_fields` values, or if a field value is zero.
    pub fn new(
        field_values: Vec<u64>,
        num_fields: usize,
        total_rounds: u32,
        starting_balance: u64,
    ) -> Result<Rules, ConfigError> {
        if num_fields == 0 {
            return Err(ConfigError::NoFields);
        }
        if total_rounds == 0 {
            return Err(ConfigError::NoRounds);
        }
        if field_values.len() != num_fields {
            return Err(ConfigError::FieldCountMismatch {
                expected: num_fields,
                found: field_values.len(),
            });
        }
        if let Some(index) = field_values.iter().position(|&v| v == 0) {
            return Err(ConfigError::NonPositiveFieldValue { index });
        }
        Ok(Rules {
            num_fields,
            field_values,
            total_rounds,
            starting_balance,
        })
    }

    /// Number of contested fields.
    pub fn num_fields(&self) -> usize {
        self.num_fields
    }

    /// Value credited to the winner of each field.
    pub fn field_values(&self) -> &[u64] {
        &self.field_values
    }

    /// Number of rounds played before the tournament completes.
    pub fn total_rounds(&self) -> u32 {
        self.total_rounds
    }

    /// Resources every agent starts with.
    pub fn starting_balance(&self) -> u64 {
        self.starting_balance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_rules() {
        let rules = Rules::new(vec![5, 2, 8], 3, 10, 100).unwrap();
        assert_eq!(rules.num_fields(), 3);
        assert_eq!(rules.field_values(), &[5, 2, 8]);
        assert_eq!(rules.total_rounds(), 10);
        assert_eq!(rules.starting_balance(), 100);
    }

    #[test]
    fn zero_starting_balance_is_allowed() {
        assert!(Rules::new(vec![1], 1, 1, 0).is_ok());
    }

    #[test]
    fn rejects_invalid_shapes() {
        assert_eq!(Rules::new(vec![], 0, 5, 10), Err(ConfigError::NoFields));
        assert_eq!(Rules::new(vec![1], 1, 0, 10), Err(ConfigError::NoRounds));
        assert_eq!(
            Rules::new(vec![1, 2], 3, 5, 10),
            Err(ConfigError::FieldCountMismatch {
                expected: 3,
                found: 2
            })
        );
        assert_eq!(
            Rules::new(vec![4, 0, 1], 3, 5, 10),
            Err(ConfigError::NonPositiveFieldValue { index: 1 })
        );
    }
}
