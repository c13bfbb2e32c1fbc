//! Fatal configuration errors.
//!
//! Misbehaving agents never produce errors: their timeouts, crashes and malformed replies are
//! recovered inside the round (see [`ExecutionOutcome`](crate::sandbox::ExecutionOutcome) and
//! [`Rejection`](crate::allocation::Rejection)). A [`ConfigError`] is the only way a tournament
//! can fail, and it can only happen before the first round.

/// Invalid tournament configuration. The tournament never starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `num_fields` must be strictly positive.
    #[error("number of fields must be greater than zero")]
    NoFields,
    /// `total_rounds` must be strictly positive.
    #[error("number of rounds must be greater than zero")]
    NoRounds,
    /// One value per field is required.
    #[error("expected {expected} field values, got {found}")]
    FieldCountMismatch {
        /// Configured number of fields.
        expected: usize,
        /// Number of field values provided.
        found: usize,
    },
    /// Every field must be worth something.
    #[error("field {index} has a non-positive value")]
    NonPositiveFieldValue {
        /// Index of the offending field.
        index: usize,
    },
    /// A tournament needs at least one agent.
    #[error("no agent registered")]
    NoParticipants,
    /// Agent identities must be unique.
    #[error("agent '{0}' is registered more than once")]
    DuplicateAgent(String),
    /// A zero timeout would time out every call.
    #[error("action timeout must be greater than zero")]
    ZeroActionTimeout,
    /// Per-agent RAM ceiling exceeds the total.
    #[error("agent RAM size ({agent_mb}MB) is greater than total RAM ({total_mb}MB)")]
    ImpossibleMemoryLimit {
        /// Requested per-agent ceiling, in MB.
        agent_mb: usize,
        /// Total RAM available, in MB.
        total_mb: usize,
    },
    /// The CPU list could not be parsed.
    #[error("invalid cpu list: {0}")]
    InvalidCpuList(String),
}
