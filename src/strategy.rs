//! Traits an agent has to implement to take part in a tournament.

use crate::allocation::RawOutput;
use crate::game_state::GameView;

/// The decision logic of an agent.
///
/// A strategy receives its own copy of the visible state every round and returns one value per
/// field. The reply does not have to be valid: it is sanitized by the engine, and an invalid
/// reply only costs the agent the current round.
///
/// Returning an error, panicking, or taking longer than the action timeout are all treated the
/// same way as an all-zero reply.
pub trait Strategy: Send {
    /// Resources to commit to each field this round.
    fn allocate(&mut self, view: &GameView) -> anyhow::Result<RawOutput>;
}

impl Strategy for Box<dyn Strategy> {
    fn allocate(&mut self, view: &GameView) -> anyhow::Result<RawOutput> {
        (**self).allocate(view)
    }
}

/// Builds fresh instances of a strategy.
///
/// The engine keeps a factory rather than a single instance so that an agent stuck in an
/// endless computation can be replaced for the next round.
pub trait StrategyFactory: Send + Sync {
    /// Returns a new, initialized strategy.
    fn create(&self) -> Box<dyn Strategy>;
}

impl<F, S> StrategyFactory for F
where
    F: Fn() -> S + Send + Sync,
    S: Strategy + 'static,
{
    fn create(&self) -> Box<dyn Strategy> {
        Box::new(self())
    }
}

#[cfg(test)]
mod interface_tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::allocation::validate;

    struct AllIn;

    impl Strategy for AllIn {
        fn allocate(&mut self, view: &GameView) -> anyhow::Result<RawOutput> {
            let mut values = vec![0; view.num_fields];
            values[0] = view.balance;
            Ok(values.into())
        }
    }

    fn view() -> GameView {
        GameView {
            balance: 12,
            field_values: vec![1, 2, 3],
            num_fields: 3,
            history: vec![],
            balances: BTreeMap::new(),
            total_rounds: 3,
            current_round: 1,
        }
    }

    #[test]
    fn test_dyn_strategy() {
        let mut strategy: Box<dyn Strategy> = Box::new(AllIn);
        let raw = strategy.allocate(&view()).unwrap();
        assert_eq!(validate(&raw, 3, 12).as_slice(), &[12, 0, 0]);
    }

    fn make_strategy<F: StrategyFactory>(factory: &F) -> Box<dyn Strategy> {
        factory.create()
    }

    #[test]
    fn test_closure_factory() {
        let mut strategy = make_strategy(&|| AllIn);
        assert!(strategy.allocate(&view()).is_ok());
    }
}
