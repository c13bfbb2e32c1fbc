//! Isolated, time-bounded execution of agent decision calls.
//!
//! Every call to an agent goes through a [`Sandbox`], which turns whatever happens on the other
//! side of the isolation boundary into an explicit [`ExecutionOutcome`]: the raw reply, a
//! timeout, or a crash. Nothing an agent does (looping forever, panicking, exiting, replying
//! garbage) can propagate to the caller.
//!
//! Two execution units are provided:
//!
//! - [`ThreadSandbox`] runs a trusted Rust [`Strategy`](crate::strategy::Strategy) on a dedicated
//!   worker thread and talks to it over channels. Panics are caught at the boundary. A worker
//!   that misses its deadline is abandoned and replaced by a fresh instance for the next call;
//!   since a thread cannot be killed, it keeps running detached until it returns, and only a
//!   bounded number of such workers may be left behind per agent. The worker shares the host's
//!   address space, so a stack overflow or memory exhaustion in it aborts the host.
//! - [`ProcessSandbox`] runs an executable as a child process, contained in a cgroup with memory
//!   and CPU ceilings on Linux, and talks to it over a loopback TCP connection. A process that
//!   misses its deadline is killed and relaunched for the next call. This is the only unit that
//!   contains untrusted code.
//!
//! Both communicate strictly by message passing: each call carries its own copy of the
//! [`GameView`] and no memory is shared with the agent.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::agent::{Agent, Backend};
use crate::allocation::RawOutput;
use crate::configuration::Configuration;
use crate::constraints::Constraints;
use crate::game_state::GameView;

mod process_sandbox;
mod thread_sandbox;

pub use crate::cgroup_manager::ProcessLimits;
pub use process_sandbox::ProcessSandbox;
pub use thread_sandbox::ThreadSandbox;

/// What came back from an agent call.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The agent replied in time. The reply still has to be validated.
    Returned(RawOutput),
    /// No reply before the deadline. Any late reply is discarded.
    TimedOut,
    /// The agent failed.
    Crashed {
        /// Identity of the agent.
        agent: String,
        /// What went wrong.
        cause: String,
    },
}

impl ExecutionOutcome {
    /// The reply as seen by the validator: timeouts and crashes count as no reply at all.
    pub fn into_raw(self) -> RawOutput {
        match self {
            ExecutionOutcome::Returned(raw) => raw,
            ExecutionOutcome::TimedOut | ExecutionOutcome::Crashed { .. } => RawOutput::Nothing,
        }
    }
}

/// An isolation boundary around one agent.
pub trait Sandbox: Send {
    /// Identity of the agent behind the boundary.
    fn agent(&self) -> &str;

    /// Asks the agent for an allocation, waiting at most `timeout`.
    ///
    /// Never panics and never blocks (much) longer than `timeout`.
    fn execute(&mut self, view: &GameView, timeout: Duration) -> ExecutionOutcome;
}

impl Sandbox for Box<dyn Sandbox> {
    fn agent(&self) -> &str {
        (**self).agent()
    }

    fn execute(&mut self, view: &GameView, timeout: Duration) -> ExecutionOutcome {
        (**self).execute(view, timeout)
    }
}

/// Builds the execution unit matching an agent's backend.
pub(crate) fn launch(
    agent: &Agent,
    slot: usize,
    constraints: &Constraints,
    config: Configuration,
) -> Box<dyn Sandbox> {
    debug!(agent = %agent.name, id = agent.id, external = agent.is_external(), slot, "sandbox");
    match &agent.backend {
        Backend::Trusted(factory) => {
            Box::new(ThreadSandbox::new(agent.name.clone(), factory.clone()))
        }
        Backend::Executable { path, args } => Box::new(ProcessSandbox::new(
            agent.name.clone(),
            path.clone(),
            args.clone(),
            constraints.process_limits(slot),
            config,
        )),
    }
}

/// `now + timeout`, or `None` when the deadline is too far to be represented.
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Time left before `deadline`; `Duration::MAX` without deadline.
pub(crate) fn remaining(deadline: Option<Instant>) -> Duration {
    match deadline {
        Some(deadline) => deadline.saturating_duration_since(Instant::now()),
        None => Duration::MAX,
    }
}

/// A sandbox that charges every call against a cumulative thinking-time budget.
///
/// The effective deadline of a call is the smaller of the action timeout and what is left of
/// the budget. Once the budget is spent, calls time out without reaching the agent.
pub struct Budgeted<S> {
    inner: S,
    remaining: Duration,
}

impl<S: Sandbox> Budgeted<S> {
    /// Wraps `inner` with `budget` of thinking time for the whole tournament.
    pub fn new(inner: S, budget: Duration) -> Self {
        Budgeted {
            inner,
            remaining: budget,
        }
    }

    /// Thinking time left.
    pub fn remaining(&self) -> Duration {
        self.remaining
    }
}

impl<S: Sandbox> Sandbox for Budgeted<S> {
    fn agent(&self) -> &str {
        self.inner.agent()
    }

    fn execute(&mut self, view: &GameView, timeout: Duration) -> ExecutionOutcome {
        if self.remaining.is_zero() {
            warn!(agent = self.inner.agent(), "time budget exhausted");
            return ExecutionOutcome::TimedOut;
        }
        let start = Instant::now();
        let outcome = self.inner.execute(view, timeout.min(self.remaining));
        self.remaining = self.remaining.saturating_sub(start.elapsed());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    struct Slow {
        delay: Duration,
    }

    impl Sandbox for Slow {
        fn agent(&self) -> &str {
            "slow"
        }

        fn execute(&mut self, view: &GameView, timeout: Duration) -> ExecutionOutcome {
            if self.delay > timeout {
                std::thread::sleep(timeout);
                ExecutionOutcome::TimedOut
            } else {
                std::thread::sleep(self.delay);
                ExecutionOutcome::Returned(vec![0u64; view.num_fields].into())
            }
        }
    }

    fn view() -> GameView {
        GameView {
            balance: 10,
            field_values: vec![1],
            num_fields: 1,
            history: vec![],
            balances: BTreeMap::new(),
            total_rounds: 3,
            current_round: 1,
        }
    }

    #[test]
    fn budget_is_consumed_then_exhausted() {
        let mut sandbox = Budgeted::new(
            Slow {
                delay: Duration::from_millis(30),
            },
            Duration::from_millis(50),
        );
        let timeout = Duration::from_secs(1);
        assert!(matches!(
            sandbox.execute(&view(), timeout),
            ExecutionOutcome::Returned(_)
        ));
        assert!(sandbox.remaining() <= Duration::from_millis(20));
        // what is left of the budget is shorter than the delay
        assert_eq!(sandbox.execute(&view(), timeout), ExecutionOutcome::TimedOut);
        assert!(sandbox.remaining().is_zero());
        assert_eq!(sandbox.execute(&view(), timeout), ExecutionOutcome::TimedOut);
    }

    #[test]
    fn failures_count_as_no_reply() {
        assert_eq!(ExecutionOutcome::TimedOut.into_raw(), RawOutput::Nothing);
        let crash = ExecutionOutcome::Crashed {
            agent: "a".to_string(),
            cause: "boom".to_string(),
        };
        assert_eq!(crash.into_raw(), RawOutput::Nothing);
    }

    #[test]
    fn far_deadlines_do_not_overflow() {
        assert_eq!(deadline_after(Duration::MAX), None);
        assert_eq!(remaining(None), Duration::MAX);
        assert!(remaining(deadline_after(Duration::from_secs(5))) <= Duration::from_secs(5));
    }
}
