//! Pre-admission check of candidate agents.
//!
//! [`audit`] puts an agent through a small battery of canned game states, using the same
//! [`Sandbox`] and validation as a real tournament, and reports the first case where the agent
//! timed out, crashed or produced an allocation that would have been sanitized to zeros. An
//! agent passing the audit is not guaranteed to behave, only to understand the contract.

use std::{collections::BTreeMap, time::Duration};

use tracing::{info, instrument, warn};

use crate::allocation::{self, Allocation, Rejection};
use crate::game_state::{GameView, RoundRecord};
use crate::sandbox::{ExecutionOutcome, Sandbox};

const FIELD_VALUES: [u64; 5] = [5, 2, 8, 4, 3];
const TOTAL_ROUNDS: u32 = 10;
const STARTING_BALANCE: u64 = 100;
const OPPONENT: &str = "opponent";

/// Why a candidate was refused.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AuditFailure {
    /// No answer in time.
    #[error("timed out on the {case} case")]
    TimedOut {
        /// Name of the canned state.
        case: &'static str,
    },
    /// The agent failed.
    #[error("crashed on the {case} case: {cause}")]
    Crashed {
        /// Name of the canned state.
        case: &'static str,
        /// What went wrong.
        cause: String,
    },
    /// The agent answered with an allocation the validator rejects.
    #[error("malformed allocation on the {case} case: {rejection}")]
    Malformed {
        /// Name of the canned state.
        case: &'static str,
        /// First rule the allocation broke.
        rejection: Rejection,
    },
}

/// Runs every canned case against `sandbox`, giving the agent `timeout` per case.
///
/// # Errors
///
/// The first [`AuditFailure`] met.
#[instrument(skip_all, fields(agent = sandbox.agent()))]
pub fn audit<S: Sandbox>(sandbox: &mut S, timeout: Duration) -> Result<(), AuditFailure> {
    for (case, view) in cases(sandbox.agent()) {
        match sandbox.execute(&view, timeout) {
            ExecutionOutcome::Returned(raw) => {
                allocation::check(&raw, view.num_fields, view.balance)
                    .map_err(|rejection| AuditFailure::Malformed { case, rejection })?;
            }
            ExecutionOutcome::TimedOut => return Err(AuditFailure::TimedOut { case }),
            ExecutionOutcome::Crashed { cause, .. } => {
                return Err(AuditFailure::Crashed { case, cause })
            }
        }
    }
    info!("audit passed");
    Ok(())
}

/// Same as [`audit`], logging the failure and returning whether the agent passed.
pub fn admits<S: Sandbox>(sandbox: &mut S, timeout: Duration) -> bool {
    match audit(sandbox, timeout) {
        Ok(()) => true,
        Err(failure) => {
            warn!(agent = sandbox.agent(), %failure, "agent refused");
            false
        }
    }
}

fn cases(agent: &str) -> Vec<(&'static str, GameView)> {
    vec![
        ("first round", first_round(agent)),
        ("mid tournament", mid_tournament(agent)),
        ("final round", final_round(agent)),
    ]
}

fn view(agent: &str, balance: u64, opponent_balance: u64, history: Vec<RoundRecord>) -> GameView {
    let balances = BTreeMap::from([
        (agent.to_string(), balance),
        (OPPONENT.to_string(), opponent_balance),
    ]);
    GameView {
        balance,
        field_values: FIELD_VALUES.to_vec(),
        num_fields: FIELD_VALUES.len(),
        current_round: history.len() as u32 + 1,
        history,
        balances,
        total_rounds: TOTAL_ROUNDS,
    }
}

fn first_round(agent: &str) -> GameView {
    view(agent, STARTING_BALANCE, STARTING_BALANCE, vec![])
}

fn mid_tournament(agent: &str) -> GameView {
    let rounds: [([u64; 5], [u64; 5]); 4] = [
        ([2, 1, 4, 2, 1], [0, 0, 10, 0, 0]),
        ([3, 0, 3, 3, 1], [5, 5, 0, 0, 0]),
        ([2, 2, 2, 2, 2], [1, 1, 9, 1, 1]),
        ([0, 5, 5, 0, 0], [4, 0, 0, 4, 0]),
    ];
    let mut history = Vec::with_capacity(rounds.len());
    let (mut mine_spent, mut theirs_spent) = (0, 0);
    for (mine, theirs) in rounds {
        mine_spent += mine.iter().sum::<u64>();
        theirs_spent += theirs.iter().sum::<u64>();
        let mut record = RoundRecord::new();
        record.insert(agent, Allocation::from(mine.to_vec()));
        record.insert(OPPONENT, Allocation::from(theirs.to_vec()));
        history.push(record);
    }
    view(
        agent,
        STARTING_BALANCE - mine_spent,
        STARTING_BALANCE - theirs_spent,
        history,
    )
}

fn final_round(agent: &str) -> GameView {
    let mine = Allocation::from(vec![5, 1, 3, 1, 1]);
    let played = TOTAL_ROUNDS as usize - 1;
    let mut record = RoundRecord::new();
    record.insert(agent, mine.clone());
    record.insert(OPPONENT, Allocation::zeros(FIELD_VALUES.len()));
    let balance = STARTING_BALANCE - mine.total() * played as u64;
    view(agent, balance, STARTING_BALANCE, vec![record; played])
}
