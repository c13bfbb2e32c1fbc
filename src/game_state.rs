//! Tournament state and the snapshots handed to agents.
//!
//! [`GameState`] has a single writer, the [`RoundReferee`](crate::referee::RoundReferee). Agents
//! only ever see a [`GameView`], an owned copy built before the round starts, so they can neither
//! mutate the state nor observe the moves of the round being played.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::allocation::Allocation;
use crate::rules::Rules;

/// Sanitized allocations of one round, in agent registration order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoundRecord {
    entries: Vec<(String, Allocation)>,
}

impl RoundRecord {
    /// An empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an agent's allocation, keeping insertion order.
    pub fn insert(&mut self, agent: impl Into<String>, allocation: Allocation) {
        self.entries.push((agent.into(), allocation));
    }

    /// Allocation committed by `agent`, if it took part in the round.
    pub fn get(&self, agent: &str) -> Option<&Allocation> {
        self.entries
            .iter()
            .find_map(|(name, allocation)| (name == agent).then_some(allocation))
    }

    /// Agents and their allocations, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Allocation)> {
        self.entries.iter().map(|(name, a)| (name.as_str(), a))
    }

    /// Number of agents recorded.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True before any allocation is recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of a single field in a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldOutcome {
    /// A single agent committed strictly more than everyone else.
    Won {
        /// Identity of the winner.
        agent: String,
    },
    /// Several agents share the maximum, or nobody committed anything.
    Tie,
}

impl FieldOutcome {
    /// Winner of the field, if any.
    pub fn winner(&self) -> Option<&str> {
        match self {
            FieldOutcome::Won { agent } => Some(agent),
            FieldOutcome::Tie => None,
        }
    }
}

/// Everything that happened in one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundResult {
    /// Round number, starting at 1.
    pub round: u32,
    /// One outcome per field.
    pub fields: Vec<FieldOutcome>,
    /// Sanitized allocations applied this round.
    pub allocations: RoundRecord,
}

/// Read-only snapshot given to an agent when it is asked to allocate.
///
/// Every field is an owned copy of the host state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameView {
    /// Balance of the agent being asked.
    pub balance: u64,
    /// Value of each field, in field order.
    pub field_values: Vec<u64>,
    /// Number of fields; every allocation has this length.
    pub num_fields: usize,
    /// Allocations of every previous round.
    pub history: Vec<RoundRecord>,
    /// Balances of every agent, including the one being asked.
    pub balances: BTreeMap<String, u64>,
    /// Rounds in the tournament.
    pub total_rounds: u32,
    /// Round being played, starting at 1.
    pub current_round: u32,
}

impl GameView {
    /// Number of rounds left, including the current one.
    pub fn rounds_remaining(&self) -> u32 {
        self.total_rounds
            .saturating_sub(self.current_round)
            .saturating_add(1)
    }
}

/// Balances, scores and history of a tournament.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameState {
    agents: Vec<String>,
    starting_balance: u64,
    balances: BTreeMap<String, u64>,
    scores: BTreeMap<String, u64>,
    history: Vec<RoundRecord>,
    current_round: u32,
}

impl GameState {
    /// Fresh state: everyone at `starting_balance`, no history, zero scores.
    pub fn new(agents: Vec<String>, starting_balance: u64) -> GameState {
        let mut state = GameState {
            agents,
            starting_balance,
            balances: BTreeMap::new(),
            scores: BTreeMap::new(),
            history: vec![],
            current_round: 0,
        };
        state.reset();
        state
    }

    /// Puts the state back to its initial values.
    pub fn reset(&mut self) {
        self.balances = self
            .agents
            .iter()
            .map(|a| (a.clone(), self.starting_balance))
            .collect();
        self.scores = self.agents.iter().map(|a| (a.clone(), 0)).collect();
        self.history.clear();
        self.current_round = 0;
    }

    /// Agents in registration order.
    pub fn agents(&self) -> &[String] {
        &self.agents
    }

    pub fn balance(&self, agent: &str) -> Option<u64> {
        self.balances.get(agent).copied()
    }

    pub fn score(&self, agent: &str) -> Option<u64> {
        self.scores.get(agent).copied()
    }

    pub fn balances(&self) -> &BTreeMap<String, u64> {
        &self.balances
    }

    pub fn scores(&self) -> &BTreeMap<String, u64> {
        &self.scores
    }

    pub fn history(&self) -> &[RoundRecord] {
        &self.history
    }

    /// Number of completed rounds.
    pub fn current_round(&self) -> u32 {
        self.current_round
    }

    /// Snapshot of the state as seen by `agent` for the upcoming round.
    pub fn view_for(&self, agent: &str, rules: &Rules) -> GameView {
        GameView {
            balance: self.balance(agent).unwrap_or(0),
            field_values: rules.field_values().to_vec(),
            num_fields: rules.num_fields(),
            history: self.history.clone(),
            balances: self.balances.clone(),
            total_rounds: rules.total_rounds(),
            current_round: self.current_round + 1,
        }
    }

    /// Deducts `amount` from `agent`'s balance. Callers only spend sanitized allocations, which
    /// never exceed the balance.
    pub(crate) fn spend(&mut self, agent: &str, amount: u64) {
        if let Some(balance) = self.balances.get_mut(agent) {
            debug_assert!(amount <= *balance, "allocation exceeds balance");
            *balance = balance.saturating_sub(amount);
        }
    }

    pub(crate) fn credit(&mut self, agent: &str, value: u64) {
        if let Some(score) = self.scores.get_mut(agent) {
            *score = score.saturating_add(value);
        }
    }

    /// Closes the round: appends its allocations and increments the round counter.
    pub(crate) fn record_round(&mut self, record: RoundRecord) {
        self.history.push(record);
        self.current_round += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        vec!["alpha".to_string(), "beta".to_string()]
    }

    #[test]
    fn starts_with_full_balances_and_no_score() {
        let state = GameState::new(names(), 50);
        assert_eq!(state.balance("alpha"), Some(50));
        assert_eq!(state.balance("beta"), Some(50));
        assert_eq!(state.score("alpha"), Some(0));
        assert_eq!(state.current_round(), 0);
        assert!(state.history().is_empty());
        assert_eq!(state.balance("gamma"), None);
    }

    #[test]
    fn view_is_a_detached_copy() {
        let rules = Rules::new(vec![1, 2], 2, 4, 50).unwrap();
        let mut state = GameState::new(names(), 50);
        let mut view = state.view_for("alpha", &rules);
        assert_eq!(view.current_round, 1);
        assert_eq!(view.rounds_remaining(), 4);

        view.balances.insert("alpha".to_string(), 0);
        view.history.push(RoundRecord::new());
        assert_eq!(state.balance("alpha"), Some(50));
        assert!(state.history().is_empty());

        state.spend("alpha", 20);
        assert_eq!(view.balance, 50);
    }

    #[test]
    fn record_round_keeps_history_in_step_with_counter() {
        let mut state = GameState::new(names(), 10);
        let mut record = RoundRecord::new();
        record.insert("alpha", Allocation::from(vec![1, 2]));
        record.insert("beta", Allocation::zeros(2));
        state.spend("alpha", 3);
        state.credit("alpha", 7);
        state.record_round(record.clone());

        assert_eq!(state.current_round(), 1);
        assert_eq!(state.history().len(), 1);
        assert_eq!(state.history()[0], record);
        assert_eq!(state.balance("alpha"), Some(7));
        assert_eq!(state.score("alpha"), Some(7));

        state.reset();
        assert_eq!(state, GameState::new(names(), 10));
    }

    #[test]
    fn record_preserves_insertion_order() {
        let mut record = RoundRecord::new();
        record.insert("zulu", Allocation::zeros(1));
        record.insert("alpha", Allocation::from(vec![4]));
        let order = record.iter().map(|(name, _)| name).collect::<Vec<_>>();
        assert_eq!(order, vec!["zulu", "alpha"]);
        assert_eq!(record.get("alpha"), Some(&Allocation::from(vec![4])));
    }
}
