//! Tournament lifecycle.
//!
//! A [`Tournament`] owns the rules, the [`GameState`] and one [`Sandbox`] per agent, and drives
//! rounds strictly one after the other:
//!
//! ```text
//! NotStarted -> RoundInProgress(1) -> ... -> RoundInProgress(total_rounds) -> Completed
//! ```
//!
//! Every agent of round `r + 1` sees the state as left by round `r`. Configuration is checked
//! once, when the tournament is built; afterwards nothing an agent does can stop it from reaching
//! [`Phase::Completed`].
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use blotto_tournament::prelude::*;
//! use blotto_tournament::strategies::{RandomSpread, Uniform};
//!
//! fn main() -> anyhow::Result<()> {
//!     let rules = Rules::new(vec![5, 2, 8], 3, 10, 100)?;
//!     let constraints = ConstraintsBuilder::new()
//!         .with_action_timeout(Duration::from_millis(100))
//!         .build()?;
//!
//!     let mut registry = AgentRegistry::new();
//!     registry.register_trusted_strategy("uniform", || Uniform)?;
//!     registry.register_trusted_strategy("random", || RandomSpread)?;
//!
//!     let mut tournament = Tournament::new(rules, registry, Configuration::new(), constraints)?;
//!     let outcome = tournament.run();
//!     println!("{:?}: {:?}", outcome.verdict, outcome.scores);
//!     Ok(())
//! }
//! ```

use std::{collections::BTreeMap, time::Duration};

use tracing::{info, instrument, trace};

use crate::configuration::Configuration;
use crate::constraints::Constraints;
use crate::error::ConfigError;
use crate::game_state::{GameState, RoundResult};
use crate::logger::init_logger;
use crate::referee::RoundReferee;
use crate::registry::AgentRegistry;
use crate::rules::Rules;
use crate::sandbox::{self, Budgeted, Sandbox};

/// Where a tournament stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No round has been played yet.
    NotStarted,
    /// Round `r` is the next one to be resolved.
    RoundInProgress(u32),
    /// Every round has been played; final scores are available.
    Completed,
}

/// How the tournament ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// A single agent has the best score.
    Winner(String),
    /// Several agents share the best score, in registration order.
    Tie(Vec<String>),
}

/// Results of a completed tournament.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalOutcome {
    /// Final score of every agent.
    pub scores: BTreeMap<String, u64>,
    /// Balances left unspent.
    pub balances: BTreeMap<String, u64>,
    /// Every round, in order.
    pub rounds: Vec<RoundResult>,
    /// Who won.
    pub verdict: Verdict,
}

/// A Colonel Blotto tournament between registered agents.
pub struct Tournament {
    referee: RoundReferee,
    state: GameState,
    participants: Vec<Box<dyn Sandbox>>,
    phase: Phase,
    rounds: Vec<RoundResult>,
}

impl Tournament {
    /// Creates a tournament between every agent of `registry`.
    ///
    /// Trusted strategies get a worker thread each, executables a contained child process. Processes
    /// are launched lazily, on the first round. When `constraints` carry a time budget, every
    /// agent gets its own.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NoParticipants`] if the registry is empty.
    #[instrument(skip_all)]
    pub fn new(
        rules: Rules,
        registry: AgentRegistry,
        config: Configuration,
        constraints: Constraints,
    ) -> Result<Tournament, ConfigError> {
        if config.log {
            if let Err(e) = init_logger() {
                eprintln!("could not initialise logger: {e:#}");
            }
        }
        trace!(?config, ?constraints, ?rules);

        let participants = registry
            .into_agents()
            .iter()
            .enumerate()
            .map(|(slot, agent)| {
                let unit = sandbox::launch(agent, slot, &constraints, config);
                match constraints.time_budget() {
                    Some(budget) => Box::new(Budgeted::new(unit, budget)) as Box<dyn Sandbox>,
                    None => unit,
                }
            })
            .collect::<Vec<_>>();

        Self::from_parts(rules, participants, config, constraints.action_timeout())
    }

    /// Creates a tournament between already built sandboxes, asked in the given order.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NoParticipants`] without participants, [`ConfigError::DuplicateAgent`] if
    /// two sandboxes share an identity and [`ConfigError::ZeroActionTimeout`] if
    /// `action_timeout` is zero.
    pub fn from_parts(
        rules: Rules,
        participants: Vec<Box<dyn Sandbox>>,
        config: Configuration,
        action_timeout: Duration,
    ) -> Result<Tournament, ConfigError> {
        if participants.is_empty() {
            return Err(ConfigError::NoParticipants);
        }
        if action_timeout.is_zero() {
            return Err(ConfigError::ZeroActionTimeout);
        }
        let mut agents: Vec<String> = Vec::with_capacity(participants.len());
        for participant in &participants {
            let name = participant.agent();
            if agents.iter().any(|a| a == name) {
                return Err(ConfigError::DuplicateAgent(name.to_string()));
            }
            agents.push(name.to_string());
        }
        info!(?agents, rounds = rules.total_rounds(), "tournament created");

        let state = GameState::new(agents, rules.starting_balance());
        let referee = RoundReferee::new(rules, action_timeout)
            .with_concurrent_dispatch(config.concurrent_dispatch);
        Ok(Tournament {
            referee,
            state,
            participants,
            phase: Phase::NotStarted,
            rounds: vec![],
        })
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Read-only access to balances, scores and history.
    pub fn state(&self) -> &GameState {
        &self.state
    }

    /// Rules of the game being played.
    pub fn rules(&self) -> &Rules {
        self.referee.rules()
    }

    /// Results of the rounds played so far.
    pub fn rounds(&self) -> &[RoundResult] {
        &self.rounds
    }

    /// Plays the next round. Returns `None` once the tournament is completed.
    pub fn play_round(&mut self) -> Option<&RoundResult> {
        let round = match self.phase {
            Phase::NotStarted => 1,
            Phase::RoundInProgress(round) => round,
            Phase::Completed => return None,
        };
        self.phase = Phase::RoundInProgress(round);

        let result = self
            .referee
            .run_round(&mut self.state, &mut self.participants);
        self.phase = if round >= self.referee.rules().total_rounds() {
            Phase::Completed
        } else {
            Phase::RoundInProgress(round + 1)
        };

        self.rounds.push(result);
        self.rounds.last()
    }

    /// Plays every remaining round and returns the final outcome.
    #[instrument(skip_all)]
    pub fn run(&mut self) -> FinalOutcome {
        while self.play_round().is_some() {}
        let outcome = self.final_outcome();
        info!(verdict = ?outcome.verdict, scores = ?outcome.scores, "tournament completed");
        outcome
    }

    /// The final outcome, once the tournament is completed.
    pub fn outcome(&self) -> Option<FinalOutcome> {
        (self.phase == Phase::Completed).then(|| self.final_outcome())
    }

    fn final_outcome(&self) -> FinalOutcome {
        let scores = self.state.scores().clone();
        FinalOutcome {
            verdict: verdict(self.state.agents(), &scores),
            balances: self.state.balances().clone(),
            rounds: self.rounds.clone(),
            scores,
        }
    }
}

/// Best scorer, or every agent sharing the best score in `agents` order.
fn verdict(agents: &[String], scores: &BTreeMap<String, u64>) -> Verdict {
    let score = |agent: &String| scores.get(agent).copied().unwrap_or(0);
    let best = agents.iter().map(score).max().unwrap_or(0);
    let mut leaders = agents
        .iter()
        .filter(|a| score(a) == best)
        .cloned()
        .collect::<Vec<_>>();
    if leaders.len() == 1 {
        Verdict::Winner(leaders.remove(0))
    } else {
        Verdict::Tie(leaders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::RawOutput;
    use crate::game_state::GameView;
    use crate::sandbox::ExecutionOutcome;

    struct Fixed {
        name: &'static str,
        allocation: Vec<u64>,
    }

    impl Sandbox for Fixed {
        fn agent(&self) -> &str {
            self.name
        }

        fn execute(&mut self, _view: &GameView, _timeout: Duration) -> ExecutionOutcome {
            ExecutionOutcome::Returned(RawOutput::from(self.allocation.clone()))
        }
    }

    fn fixed(name: &'static str, allocation: Vec<u64>) -> Box<dyn Sandbox> {
        Box::new(Fixed { name, allocation })
    }

    fn tournament(participants: Vec<Box<dyn Sandbox>>) -> Tournament {
        let rules = Rules::new(vec![5, 2, 8], 3, 3, 10).unwrap();
        Tournament::from_parts(
            rules,
            participants,
            Configuration::new(),
            Duration::from_millis(50),
        )
        .unwrap()
    }

    #[test]
    fn phases_advance_one_round_at_a_time() {
        let mut t = tournament(vec![fixed("a", vec![1, 1, 1]), fixed("b", vec![0, 0, 0])]);
        assert_eq!(t.phase(), Phase::NotStarted);
        assert_eq!(t.outcome(), None);

        assert_eq!(t.play_round().map(|r| r.round), Some(1));
        assert_eq!(t.phase(), Phase::RoundInProgress(2));
        assert_eq!(t.play_round().map(|r| r.round), Some(2));
        assert_eq!(t.phase(), Phase::RoundInProgress(3));
        assert_eq!(t.play_round().map(|r| r.round), Some(3));
        assert_eq!(t.phase(), Phase::Completed);

        assert!(t.play_round().is_none());
        assert_eq!(t.rounds().len(), 3);
        assert_eq!(t.state().current_round(), 3);
    }

    #[test]
    fn run_reports_the_winner() {
        let mut t = tournament(vec![fixed("a", vec![1, 1, 1]), fixed("b", vec![0, 0, 0])]);
        let outcome = t.run();
        assert_eq!(outcome.verdict, Verdict::Winner("a".to_string()));
        assert_eq!(outcome.scores.get("a"), Some(&45));
        assert_eq!(outcome.balances.get("a"), Some(&1));
        assert_eq!(outcome.rounds.len(), 3);
        assert_eq!(t.outcome(), Some(outcome));
    }

    #[test]
    fn shared_best_score_is_a_tie_in_registration_order() {
        let mut t = tournament(vec![
            fixed("zed", vec![1, 0, 0]),
            fixed("low", vec![0, 0, 0]),
            fixed("amy", vec![0, 0, 1]),
            fixed("bob", vec![0, 0, 1]),
        ]);
        // "zed" wins the 5-value field every round, "amy" and "bob" tie on the 8-value one
        assert_eq!(t.run().verdict, Verdict::Winner("zed".to_string()));

        let mut t = tournament(vec![fixed("zed", vec![1, 1, 1]), fixed("amy", vec![1, 1, 1])]);
        assert_eq!(
            t.run().verdict,
            Verdict::Tie(vec!["zed".to_string(), "amy".to_string()])
        );
    }

    #[test]
    fn invalid_participants_are_rejected() {
        let rules = Rules::new(vec![1], 1, 1, 1).unwrap();
        let timeout = Duration::from_millis(10);
        let none = Tournament::from_parts(rules.clone(), vec![], Configuration::new(), timeout);
        assert_eq!(none.err(), Some(ConfigError::NoParticipants));

        let twice = vec![fixed("a", vec![0]), fixed("a", vec![1])];
        let dup = Tournament::from_parts(rules.clone(), twice, Configuration::new(), timeout);
        assert_eq!(dup.err(), Some(ConfigError::DuplicateAgent("a".to_string())));

        let zero = Tournament::from_parts(
            rules,
            vec![fixed("a", vec![0])],
            Configuration::new(),
            Duration::ZERO,
        );
        assert_eq!(zero.err(), Some(ConfigError::ZeroActionTimeout));
    }

    #[test]
    fn verdict_with_no_points_is_a_tie_of_everyone() {
        let agents = vec!["b".to_string(), "a".to_string()];
        let scores = agents.iter().map(|a| (a.clone(), 0)).collect();
        assert_eq!(verdict(&agents, &scores), Verdict::Tie(agents.clone()));
    }
}
