//! Resolution of a single round.
//!
//! The [`RoundReferee`] is the only writer of the [`GameState`]. For each round it:
//!
//! 1. builds one [`GameView`] per agent from the state as it was before the round,
//! 2. asks every agent for an allocation through its [`Sandbox`],
//! 3. sanitizes every reply with [`allocation::validate`] (timeouts and crashes count as no reply),
//! 4. deducts the sanitized allocations from the balances,
//! 5. credits the value of each field to its unique, strictly positive, highest bidder,
//! 6. appends the sanitized allocations to the history and closes the round.
//!
//! A failing agent only loses its own contribution to the round; resolution always completes.

use std::{thread, time::Duration};

use tracing::{debug, info, instrument, warn};

use crate::allocation::{self, Allocation};
use crate::game_state::{FieldOutcome, GameState, GameView, RoundRecord, RoundResult};
use crate::rules::Rules;
use crate::sandbox::{ExecutionOutcome, Sandbox};

/// Plays rounds of a tournament.
#[derive(Debug, Clone)]
pub struct RoundReferee {
    rules: Rules,
    timeout: Duration,
    concurrent: bool,
}

impl RoundReferee {
    /// A referee asking agents concurrently, each with `timeout` to answer.
    pub fn new(rules: Rules, timeout: Duration) -> Self {
        RoundReferee {
            rules,
            timeout,
            concurrent: true,
        }
    }

    /// Ask agents at the same time (default) or one after the other. Results are identical
    /// either way.
    pub fn with_concurrent_dispatch(mut self, value: bool) -> Self {
        self.concurrent = value;
        self
    }

    /// Rules the referee enforces.
    pub fn rules(&self) -> &Rules {
        &self.rules
    }

    /// Deadline of each decision call.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Plays one round between `participants` and applies it to `state`.
    ///
    /// Participants are asked, recorded and resolved in slice order.
    #[instrument(skip_all, fields(round = state.current_round() + 1))]
    pub fn run_round<S: Sandbox>(&self, state: &mut GameState, participants: &mut [S]) -> RoundResult {
        let round = state.current_round() + 1;
        let views = participants
            .iter()
            .map(|p| state.view_for(p.agent(), &self.rules))
            .collect::<Vec<_>>();

        let outcomes = if self.concurrent {
            self.dispatch_concurrently(participants, views)
        } else {
            self.dispatch_sequentially(participants, &views)
        };

        let mut record = RoundRecord::new();
        for (participant, outcome) in participants.iter().zip(outcomes) {
            let agent = participant.agent();
            let balance = state.balance(agent).unwrap_or(0);
            let allocation = self.sanitize(agent, outcome, balance);
            debug!(agent, %allocation, balance, "allocation committed");
            state.spend(agent, allocation.total());
            record.insert(agent, allocation);
        }

        let fields = resolve_fields(&record, self.rules.num_fields());
        for (outcome, value) in fields.iter().zip(self.rules.field_values()) {
            if let Some(winner) = outcome.winner() {
                state.credit(winner, *value);
            }
        }
        state.record_round(record.clone());

        info!(
            won = fields.iter().filter(|f| f.winner().is_some()).count(),
            tied = fields.iter().filter(|f| f.winner().is_none()).count(),
            "round resolved"
        );
        RoundResult {
            round,
            fields,
            allocations: record,
        }
    }

    fn dispatch_sequentially<S: Sandbox>(
        &self,
        participants: &mut [S],
        views: &[GameView],
    ) -> Vec<ExecutionOutcome> {
        participants
            .iter_mut()
            .zip(views)
            .map(|(participant, view)| participant.execute(view, self.timeout))
            .collect()
    }

    /// Asks every participant on its own scoped thread and waits for all of them: a straggler
    /// delays the resolution of the round, never the other agents.
    fn dispatch_concurrently<S: Sandbox>(
        &self,
        participants: &mut [S],
        views: Vec<GameView>,
    ) -> Vec<ExecutionOutcome> {
        let timeout = self.timeout;
        thread::scope(|scope| {
            let handles = participants
                .iter_mut()
                .zip(views)
                .map(|(participant, view)| {
                    let agent = participant.agent().to_string();
                    let handle = scope.spawn(move || participant.execute(&view, timeout));
                    (agent, handle)
                })
                .collect::<Vec<_>>();

            handles
                .into_iter()
                .map(|(agent, handle)| {
                    handle.join().unwrap_or_else(|_| ExecutionOutcome::Crashed {
                        agent,
                        cause: "sandbox panicked".to_string(),
                    })
                })
                .collect()
        })
    }

    fn sanitize(&self, agent: &str, outcome: ExecutionOutcome, balance: u64) -> Allocation {
        let num_fields = self.rules.num_fields();
        match outcome {
            ExecutionOutcome::Returned(raw) => {
                allocation::check(&raw, num_fields, balance).unwrap_or_else(|rejection| {
                    warn!(agent, %rejection, "malformed allocation, replaced by zeros");
                    Allocation::zeros(num_fields)
                })
            }
            // already logged by the sandbox
            failure => allocation::validate(&failure.into_raw(), num_fields, balance),
        }
    }
}

/// Outcome of every field given the allocations of a round.
///
/// A field is won by the only agent committing the strictly greatest, positive amount to it.
/// Shared maxima and fields nobody committed anything to are ties.
pub fn resolve_fields(record: &RoundRecord, num_fields: usize) -> Vec<FieldOutcome> {
    (0..num_fields)
        .map(|field| {
            let max = record.iter().map(|(_, a)| a.get(field)).max().unwrap_or(0);
            if max == 0 {
                return FieldOutcome::Tie;
            }
            let mut leaders = record.iter().filter(|(_, a)| a.get(field) == max);
            match (leaders.next(), leaders.next()) {
                (Some((agent, _)), None) => FieldOutcome::Won {
                    agent: agent.to_string(),
                },
                _ => FieldOutcome::Tie,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::allocation::RawOutput;
    use crate::sandbox::ThreadSandbox;
    use crate::strategy::Strategy;

    /// Replays a fixed outcome every round and remembers what it was shown.
    struct Scripted {
        name: String,
        outcome: ExecutionOutcome,
        seen: Arc<Mutex<Vec<GameView>>>,
    }

    impl Scripted {
        fn new(name: &str, outcome: ExecutionOutcome) -> Self {
            Scripted {
                name: name.to_string(),
                outcome,
                seen: Arc::default(),
            }
        }

        fn playing(name: &str, allocation: Vec<u64>) -> Self {
            Self::new(name, ExecutionOutcome::Returned(allocation.into()))
        }
    }

    impl Sandbox for Scripted {
        fn agent(&self) -> &str {
            &self.name
        }

        fn execute(&mut self, view: &GameView, _timeout: Duration) -> ExecutionOutcome {
            self.seen.lock().unwrap().push(view.clone());
            self.outcome.clone()
        }
    }

    fn setup(field_values: Vec<u64>, balance: u64, agents: &[&str]) -> (RoundReferee, GameState) {
        let n = field_values.len();
        let rules = Rules::new(field_values, n, 3, balance).unwrap();
        let state = GameState::new(agents.iter().map(|a| a.to_string()).collect(), balance);
        (RoundReferee::new(rules, Duration::from_millis(200)), state)
    }

    #[test]
    fn strongest_agent_takes_every_field() {
        let (referee, mut state) = setup(vec![5, 2, 8], 10, &["a1", "a2"]);
        let mut participants = vec![
            Scripted::playing("a1", vec![3, 3, 4]),
            Scripted::playing("a2", vec![1, 1, 1]),
        ];
        let result = referee.run_round(&mut state, &mut participants);

        assert_eq!(result.round, 1);
        assert!(result.fields.iter().all(|f| f.winner() == Some("a1")));
        assert_eq!(state.score("a1"), Some(15));
        assert_eq!(state.score("a2"), Some(0));
        assert_eq!(state.balance("a1"), Some(7));
        assert_eq!(state.balance("a2"), Some(9));
    }

    #[test]
    fn equal_bids_tie() {
        let (referee, mut state) = setup(vec![5, 1, 1], 10, &["a1", "a2"]);
        let mut participants = vec![
            Scripted::playing("a1", vec![2, 2, 2]),
            Scripted::playing("a2", vec![2, 2, 2]),
        ];
        let result = referee.run_round(&mut state, &mut participants);

        assert_eq!(result.fields, vec![FieldOutcome::Tie; 3]);
        assert_eq!(state.score("a1"), Some(0));
        assert_eq!(state.score("a2"), Some(0));
        assert_eq!(state.balance("a1"), Some(4));
    }

    #[test]
    fn over_budget_allocation_spends_nothing() {
        let (referee, mut state) = setup(vec![3, 4], 5, &["greedy", "calm"]);
        let mut participants = vec![
            Scripted::playing("greedy", vec![3, 3]),
            Scripted::playing("calm", vec![0, 1]),
        ];
        let result = referee.run_round(&mut state, &mut participants);

        assert_eq!(result.allocations.get("greedy"), Some(&Allocation::zeros(2)));
        assert_eq!(state.balance("greedy"), Some(5));
        assert_eq!(state.score("greedy"), Some(0));
        assert_eq!(result.fields[0], FieldOutcome::Tie);
        assert_eq!(result.fields[1].winner(), Some("calm"));
        assert_eq!(state.score("calm"), Some(4));
    }

    #[test]
    fn failures_count_as_zero_allocations() {
        let (referee, mut state) = setup(vec![1, 1], 4, &["late", "broken", "idle"]);
        let mut participants = vec![
            Scripted::new("late", ExecutionOutcome::TimedOut),
            Scripted::new(
                "broken",
                ExecutionOutcome::Crashed {
                    agent: "broken".to_string(),
                    cause: "boom".to_string(),
                },
            ),
            Scripted::new("idle", ExecutionOutcome::Returned(RawOutput::Nothing)),
        ];
        let result = referee.run_round(&mut state, &mut participants);

        for agent in ["late", "broken", "idle"] {
            assert_eq!(result.allocations.get(agent), Some(&Allocation::zeros(2)));
            assert_eq!(state.balance(agent), Some(4));
        }
        assert_eq!(result.fields, vec![FieldOutcome::Tie; 2]);
        assert_eq!(state.current_round(), 1);
    }

    #[test]
    fn history_matches_what_was_applied() {
        let (referee, mut state) = setup(vec![2, 6, 1], 20, &["a", "b", "c"]);
        let mut participants = vec![
            Scripted::playing("a", vec![1, 4, 0]),
            Scripted::playing("b", vec![2, 4, 9]),
            Scripted::playing("c", vec![2, 7, 30]),
        ];
        for _ in 0..2 {
            let before = state.clone();
            let result = referee.run_round(&mut state, &mut participants);
            let recorded = state.history().last().unwrap();
            assert_eq!(recorded, &result.allocations);

            for (agent, allocation) in recorded.iter() {
                assert_eq!(
                    state.balance(agent).unwrap(),
                    before.balance(agent).unwrap() - allocation.total()
                );
            }
            let gained = state.scores().values().sum::<u64>() - before.scores().values().sum::<u64>();
            let awarded = result
                .fields
                .iter()
                .zip(referee.rules().field_values())
                .filter_map(|(f, v)| f.winner().map(|_| *v))
                .sum::<u64>();
            assert_eq!(gained, awarded);
        }
        // "c" cannot afford 39 in the second round either
        assert_eq!(state.history()[1].get("c"), Some(&Allocation::zeros(3)));
        let order = state.history()[0].iter().map(|(a, _)| a).collect::<Vec<_>>();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn views_exclude_moves_of_the_current_round() {
        let (referee, mut state) = setup(vec![1, 1], 10, &["a", "b"]);
        let mut participants = vec![
            Scripted::playing("a", vec![5, 0]),
            Scripted::playing("b", vec![0, 1]),
        ];
        referee.run_round(&mut state, &mut participants);
        referee.run_round(&mut state, &mut participants);

        let seen = participants[1].seen.lock().unwrap();
        assert_eq!(seen[0].current_round, 1);
        assert!(seen[0].history.is_empty());
        assert_eq!(seen[0].balances.get("a"), Some(&10));
        assert_eq!(seen[1].current_round, 2);
        assert_eq!(seen[1].history.len(), 1);
        assert_eq!(seen[1].balances.get("a"), Some(&5));
        assert_eq!(seen[1].balance, 9);
    }

    #[test]
    fn dispatch_mode_does_not_change_results() {
        let play = |concurrent: bool| {
            let (referee, mut state) = setup(vec![4, 3, 7], 12, &["x", "y"]);
            let referee = referee.with_concurrent_dispatch(concurrent);
            let mut participants = vec![
                Scripted::playing("x", vec![4, 0, 2]),
                Scripted::playing("y", vec![1, 1, 3]),
            ];
            let result = referee.run_round(&mut state, &mut participants);
            (result, state)
        };
        assert_eq!(play(true), play(false));
    }

    struct Sleeper;

    impl Strategy for Sleeper {
        fn allocate(&mut self, view: &GameView) -> anyhow::Result<RawOutput> {
            std::thread::sleep(Duration::from_secs(5));
            Ok(vec![1u64; view.num_fields].into())
        }
    }

    struct Steady;

    impl Strategy for Steady {
        fn allocate(&mut self, view: &GameView) -> anyhow::Result<RawOutput> {
            Ok(vec![1u64; view.num_fields].into())
        }
    }

    #[test]
    fn stragglers_do_not_hold_the_round_past_the_timeout() {
        let (referee, mut state) = setup(vec![2, 2], 10, &["sleeper", "steady"]);
        let referee = RoundReferee::new(referee.rules().clone(), Duration::from_millis(100));
        let mut participants = vec![
            ThreadSandbox::from_factory("sleeper", || Sleeper),
            ThreadSandbox::from_factory("steady", || Steady),
        ];
        let start = std::time::Instant::now();
        let result = referee.run_round(&mut state, &mut participants);

        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(result.allocations.get("sleeper"), Some(&Allocation::zeros(2)));
        assert_eq!(state.score("steady"), Some(4));
        assert_eq!(state.balance("sleeper"), Some(10));
    }
}
