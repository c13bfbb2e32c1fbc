//! # Blotto Tournament
//!
//! A Rust engine running multi-round Colonel Blotto tournaments between untrusted agents.
//!
//! Each round, every agent splits part of its remaining balance over a set of valued fields.
//! Allocations are revealed simultaneously; each field goes to the single agent that committed
//! the most to it, and its value is added to that agent's score. Balances never refill, so
//! agents must budget over the whole tournament.
//!
//! It provides:
//! - The tournament lifecycle ([`Tournament`](crate::tournament::Tournament)) and the resolution
//!   of a round ([`RoundReferee`](crate::referee::RoundReferee))
//! - Sanitization of whatever an agent returns ([`allocation::validate`])
//! - Isolated, time-bounded execution of agents ([`sandbox`]): untrusted agents run as child
//!   processes contained by Linux cgroups v2; trusted Rust
//!   [`Strategy`](crate::strategy::Strategy) implementations may run on a worker thread of the
//!   host instead
//! - A pre-admission [`audit`](crate::audit::audit) of candidate agents
//!
//! A misbehaving agent (timeout, crash, malformed or over-budget allocation) is penalized for the
//! current round only: it is treated as if it had allocated nothing. The only fatal errors are
//! configuration errors ([`ConfigError`](crate::error::ConfigError)), reported before the
//! tournament starts.
//!
//! # Documentation Overview
//!
//! - For the tournament state machine and final results, see the [`tournament`] module.
//! - For the scoring rules, see the [`referee`] module.
//! - For configuring resource limits and engine behavior, see [`constraints`] and
//!   [`Configuration`](crate::configuration::Configuration).
//! - For writing agents, see the [`Strategy`](crate::strategy::Strategy) trait and, for agents
//!   running in their own process, the [`client`] module.
//!
//! # Usage Example
//!
//! ```no_run
//! use std::time::Duration;
//! use blotto_tournament::prelude::*;
//! use blotto_tournament::strategies::{Reserve, Uniform};
//!
//! fn main() -> anyhow::Result<()> {
//!     // Five fields of unequal value, ten rounds, 100 units per agent
//!     let rules = Rules::new(vec![5, 2, 8, 4, 3], 5, 10, 100)?;
//!
//!     // Per-agent constraints
//!     let constraints = ConstraintsBuilder::new()
//!         .with_ram_per_agent(500) // in MB
//!         .with_action_timeout(Duration::from_millis(100))
//!         .build()?;
//!
//!     // Run external agents even if cgroups v2 is not available
//!     let config = Configuration::new().with_allow_uncontained(true);
//!
//!     let mut registry = AgentRegistry::new();
//!     // Untrusted agents run in their own contained process
//!     registry.register_executable("external", "path/to/agent", vec![])?;
//!     // Built-in strategies are trusted and may share the host
//!     registry.register_trusted_strategy("uniform", || Uniform)?;
//!     registry.register_trusted_strategy("reserve", || Reserve)?;
//!
//!     let mut tournament = Tournament::new(rules, registry, config, constraints)?;
//!     let outcome = tournament.run();
//!
//!     for (agent, score) in &outcome.scores {
//!         println!("{agent}: {score}");
//!     }
//!     println!("{:?}", outcome.verdict);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Example Agent
//!
//! An agent implements [`Strategy`](crate::strategy::Strategy). It receives a read-only copy of
//! the game state and returns one non-negative integer per field:
//!
//! ```
//! use blotto_tournament::prelude::*;
//!
//! /// Puts everything it can afford this round on the most valuable field.
//! struct Greedy;
//!
//! impl Strategy for Greedy {
//!     fn allocate(&mut self, view: &GameView) -> anyhow::Result<RawOutput> {
//!         let best = (0..view.num_fields)
//!             .max_by_key(|&f| view.field_values[f])
//!             .unwrap_or(0);
//!         let mut allocation = vec![0u64; view.num_fields];
//!         allocation[best] = view.balance / u64::from(view.rounds_remaining());
//!         Ok(allocation.into())
//!     }
//! }
//! ```
//!
//! ## Agent Requirements
//!
//! - Return exactly `num_fields` non-negative integers whose sum does not exceed the balance
//! - Answer within the configured action timeout
//! - Agents that are not trusted must be external executables: a thread cannot contain a stack
//!   overflow or an allocation bomb
//! - External agents talk to the engine over TCP, one JSON document per line:
//!  * Engine -> Agent : a [`GameView`](crate::game_state::GameView)
//!  * Agent -> Engine : an array of numbers, or `{"fault": "..."}`
#![warn(missing_docs)]

pub use anyhow;

mod agent;
pub mod allocation;
pub mod audit;
mod cgroup_manager;
pub mod client;
pub mod configuration;
pub mod constraints;
pub mod error;
pub mod game_state;
mod logger;
mod protocol;
pub mod referee;
pub mod registry;
pub mod rules;
pub mod sandbox;
pub mod strategies;
pub mod strategy;
pub mod tournament;

/// Commonly used types and traits for quick access.
///
/// Import this prelude to get started easily:
/// ```rust
/// use blotto_tournament::prelude::*;
/// ```
///
/// Includes:
/// - [`Tournament`](crate::tournament::Tournament) and its results
/// - [`Rules`](crate::rules::Rules), [`Configuration`](crate::configuration::Configuration) and
///   [`ConstraintsBuilder`](crate::constraints::ConstraintsBuilder)
/// - [`AgentRegistry`](crate::registry::AgentRegistry)
/// - the [`Strategy`](crate::strategy::Strategy) trait and what it exchanges
pub mod prelude {
    pub use crate::allocation::{Allocation, RawOutput, RawValue};
    pub use crate::configuration::Configuration;
    pub use crate::constraints::ConstraintsBuilder;
    pub use crate::error::ConfigError;
    pub use crate::game_state::{GameView, RoundResult};
    pub use crate::registry::AgentRegistry;
    pub use crate::rules::Rules;
    pub use crate::sandbox::{ExecutionOutcome, Sandbox};
    pub use crate::strategy::{Strategy, StrategyFactory};
    pub use crate::tournament::{FinalOutcome, Phase, Tournament, Verdict};
}
