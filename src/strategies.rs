//! Built-in sample strategies.
//!
//! These are reference opponents and templates for agent authors. They are also what the
//! `blotto-agent` binary hosts when an agent is run out of process.

use rand::{seq::SliceRandom, Rng};

use crate::allocation::RawOutput;
use crate::game_state::GameView;
use crate::strategy::Strategy;

/// Spreads the balance evenly over the remaining rounds and fields. Spends everything left on
/// the last round.
#[derive(Debug, Default, Clone, Copy)]
pub struct Uniform;

impl Strategy for Uniform {
    fn allocate(&mut self, view: &GameView) -> anyhow::Result<RawOutput> {
        let spend = if view.current_round >= view.total_rounds {
            view.balance
        } else {
            view.balance / u64::from(view.rounds_remaining())
        };
        let per_field = spend / view.num_fields.max(1) as u64;
        Ok(vec![per_field; view.num_fields].into())
    }
}

/// Spends a random amount around its fair share, split at random cut points and dealt to the
/// fields in random order.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSpread;

impl Strategy for RandomSpread {
    fn allocate(&mut self, view: &GameView) -> anyhow::Result<RawOutput> {
        let mut rng = rand::thread_rng();
        let fair_share = view.balance / u64::from(view.rounds_remaining());
        let spend = rng
            .gen_range(fair_share / 2..=fair_share.saturating_mul(2))
            .min(view.balance);

        if spend == 0 || view.num_fields == 0 {
            return Ok(vec![0u64; view.num_fields].into());
        }

        let mut cuts = (1..view.num_fields)
            .map(|_| rng.gen_range(0..=spend))
            .collect::<Vec<_>>();
        cuts.sort_unstable();

        let mut previous = 0;
        let mut allocation = Vec::with_capacity(view.num_fields);
        for cut in cuts.into_iter().chain(std::iter::once(spend)) {
            allocation.push(cut - previous);
            previous = cut;
        }
        allocation.shuffle(&mut rng);
        Ok(allocation.into())
    }
}

/// Never commits anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct Reserve;

impl Strategy for Reserve {
    fn allocate(&mut self, view: &GameView) -> anyhow::Result<RawOutput> {
        Ok(vec![0u64; view.num_fields].into())
    }
}

/// Looks up a built-in strategy by name (`uniform`, `random` or `reserve`).
pub fn by_name(name: &str) -> Option<Box<dyn Strategy>> {
    match name {
        "uniform" => Some(Box::new(Uniform)),
        "random" => Some(Box::new(RandomSpread)),
        "reserve" => Some(Box::new(Reserve)),
        _ => None,
    }
}
