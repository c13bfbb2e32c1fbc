//! Resource limits applied to every agent call.
//!
//! Constraints cover timing (a hard per-call deadline and an optional cumulative thinking time
//! per agent) and, for agents run out of process, memory and CPU ceilings enforced with Linux
//! cgroups v2.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use blotto_tournament::constraints::ConstraintsBuilder;
//!
//! let constraints = ConstraintsBuilder::new()
//!     .with_ram_per_agent(512)
//!     .with_cpu_list("0-3")
//!     .with_action_timeout(Duration::from_millis(200))
//!     .with_time_budget(Duration::from_secs(5))
//!     .build()
//!     .unwrap();
//! ```
//!
//! Constraints can also be read from the environment with [`ConstraintsBuilder::from_env()`].

use std::{collections::BTreeSet, env, time::Duration};

use tracing::warn;

use crate::cgroup_manager::ProcessLimits;
use crate::error::ConfigError;

/// Per-call deadline used when none is configured.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(1);

const MAX_PIDS_PER_AGENT: i64 = 100;

#[derive(Debug, Default)]
enum AutoCpus {
    #[default]
    Auto,
    Count(usize),
    List(String),
}

/// Builder for [`Constraints`].
///
/// By default the action timeout is one second, there is no cumulative time budget, the CPUs
/// are the physical CPUs of the host (one per agent) and the available memory is shared evenly.
#[derive(Debug, Default)]
pub struct ConstraintsBuilder {
    total_ram: Option<usize>,
    agent_ram: Option<usize>,
    cpus: AutoCpus,
    cpus_per_agent: Option<usize>,
    time_budget: Option<Duration>,
    action_time: Option<Duration>,
}

impl ConstraintsBuilder {
    /// A builder where every limit is left to its default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the builder from environment variables. Unset or unparsable variables keep their
    /// default.
    ///
    /// - `MAX_TOTAL_RAM` (MB)
    /// - `RAM_PER_AGENT` (MB)
    /// - `CPU_LIST` (e.g. "0-3,6")
    /// - `TOTAL_CPU_COUNT`, overridden by `CPU_LIST`
    /// - `CPUS_PER_AGENT`
    /// - `TIME_BUDGET_MS`: cumulative thinking time per agent
    /// - `ACTION_TIMEOUT_MS`: deadline of a single call
    #[must_use]
    pub fn from_env() -> Self {
        fn parse_usize(var: &str) -> Option<usize> {
            env::var(var).ok()?.parse().ok()
        }

        fn parse_duration_millis(var: &str) -> Option<Duration> {
            env::var(var)
                .ok()?
                .parse::<u64>()
                .ok()
                .map(Duration::from_millis)
        }

        let cpus = if let Ok(list) = env::var("CPU_LIST") {
            AutoCpus::List(list)
        } else if let Some(count) = parse_usize("TOTAL_CPU_COUNT") {
            AutoCpus::Count(count)
        } else {
            AutoCpus::Auto
        };

        ConstraintsBuilder {
            total_ram: parse_usize("MAX_TOTAL_RAM"),
            agent_ram: parse_usize("RAM_PER_AGENT"),
            cpus,
            cpus_per_agent: parse_usize("CPUS_PER_AGENT"),
            time_budget: parse_duration_millis("TIME_BUDGET_MS"),
            action_time: parse_duration_millis("ACTION_TIMEOUT_MS"),
        }
    }

    /// Maximum RAM shared by all agents (in MB).
    #[must_use]
    pub fn with_max_total_ram(self, max: usize) -> Self {
        Self {
            total_ram: Some(max),
            ..self
        }
    }

    /// Maximum RAM of a single agent process (in MB).
    #[must_use]
    pub fn with_ram_per_agent(self, max: usize) -> Self {
        Self {
            agent_ram: Some(max),
            ..self
        }
    }

    /// CPUs agents may run on, as `"0-3,6,8"`.
    #[must_use]
    pub fn with_cpu_list(self, cpus: &str) -> Self {
        Self {
            cpus: AutoCpus::List(cpus.to_string()),
            ..self
        }
    }

    /// Number of CPUs agents may run on. Ignored if `with_cpu_list` is used.
    #[must_use]
    pub fn with_total_cpu_count(self, max: usize) -> Self {
        if let AutoCpus::List(_) = self.cpus {
            warn!("`with_total_cpu_count` is ignored if `with_cpu_list` is used!");
            self
        } else {
            Self {
                cpus: AutoCpus::Count(max),
                ..self
            }
        }
    }

    /// CPUs reserved for each agent process (at least one).
    #[must_use]
    pub fn with_cpus_per_agent(self, max: usize) -> Self {
        Self {
            cpus_per_agent: Some(max),
            ..self
        }
    }

    /// Total thinking time allowed to an agent over the whole tournament.
    ///
    /// Once spent, the agent's calls time out immediately.
    #[must_use]
    pub fn with_time_budget(self, duration: Duration) -> Self {
        Self {
            time_budget: Some(duration),
            ..self
        }
    }

    /// Hard deadline of a single decision call.
    #[must_use]
    pub fn with_action_timeout(self, duration: Duration) -> Self {
        Self {
            action_time: Some(duration),
            ..self
        }
    }

    /// # Errors
    ///
    /// Fails when the constraints are impossible: a zero action timeout, a per-agent RAM
    /// greater than the total, or an unparsable CPU list.
    pub fn build(self) -> Result<Constraints, ConfigError> {
        let action_time = self.action_time.unwrap_or(DEFAULT_ACTION_TIMEOUT);
        if action_time.is_zero() {
            return Err(ConfigError::ZeroActionTimeout);
        }

        let total_ram = self
            .total_ram
            .map(|mb| mb.saturating_mul(1_000_000))
            .unwrap_or_else(|| {
                let mut sys = sysinfo::System::new();
                sys.refresh_memory();
                sys.available_memory() as usize
            });

        let agent_mb = self.agent_ram.unwrap_or(0);
        let impossible = ConfigError::ImpossibleMemoryLimit {
            agent_mb,
            total_mb: total_ram / 1_000_000,
        };
        match agent_mb.checked_mul(1_000_000) {
            Some(bytes) if bytes <= total_ram => {}
            _ => return Err(impossible),
        }

        // physical CPUs: using every logical CPU halves agent performance
        let cpus = match self.cpus {
            AutoCpus::Auto => (0..num_cpus::get_physical().min(u8::MAX as usize) as u8).collect(),
            AutoCpus::Count(count) => (0..count.min(u8::MAX as usize) as u8).collect(),
            AutoCpus::List(s) => cpu_list_to_set(&s)?,
        };
        let cpus_per_agent = self.cpus_per_agent.unwrap_or(1).max(1);
        // checked above: fits in total_ram
        let agent_ram = self
            .agent_ram
            .map(|mb| mb.saturating_mul(1_000_000))
            .unwrap_or_else(|| total_ram / (cpus.len() / cpus_per_agent).max(1));

        Ok(Constraints {
            total_ram,
            agent_ram,
            cpus,
            cpus_per_agent,
            time_budget: self.time_budget,
            action_time,
        })
    }
}

fn cpu_list_to_set(s: &str) -> Result<BTreeSet<u8>, ConfigError> {
    fn parse_cpu(value: &str) -> Result<u8, ConfigError> {
        value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidCpuList(format!("could not parse '{value}'")))
    }

    if s.trim().is_empty() {
        return Err(ConfigError::InvalidCpuList("empty list".to_string()));
    }
    let mut set = BTreeSet::new();
    for item in s.split(',') {
        let bounds = item.split('-').collect::<Vec<_>>();
        match bounds.as_slice() {
            [single] => {
                set.insert(parse_cpu(single)?);
            }
            [start, end] => {
                let (start, end) = (parse_cpu(start)?, parse_cpu(end)?);
                set.extend(start.min(end)..=start.max(end));
            }
            _ => {
                return Err(ConfigError::InvalidCpuList(format!(
                    "each comma-separated item must be a number or a range (e.g. '0-3'), got '{item}'"
                )))
            }
        }
    }
    Ok(set)
}

/// Obtained using [`ConstraintsBuilder`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Constraints {
    pub(crate) total_ram: usize,
    pub(crate) agent_ram: usize,
    pub(crate) cpus: BTreeSet<u8>,
    pub(crate) cpus_per_agent: usize,
    pub(crate) time_budget: Option<Duration>,
    pub(crate) action_time: Duration,
}

impl Constraints {
    /// Shorthand for [`ConstraintsBuilder::new`].
    pub fn builder() -> ConstraintsBuilder {
        ConstraintsBuilder::new()
    }

    /// Deadline of a single decision call.
    pub fn action_timeout(&self) -> Duration {
        self.action_time
    }

    /// Cumulative thinking time per agent, if limited.
    pub fn time_budget(&self) -> Option<Duration> {
        self.time_budget
    }

    /// Memory ceiling of an agent process, in bytes.
    pub fn agent_ram(&self) -> usize {
        self.agent_ram
    }

    /// Ceilings of the process hosting the agent in `slot`.
    pub(crate) fn process_limits(&self, slot: usize) -> ProcessLimits {
        ProcessLimits {
            max_memory: i64::try_from(self.agent_ram).unwrap_or(i64::MAX),
            max_pids: MAX_PIDS_PER_AGENT,
            cpus: self
                .cpus_for(slot)
                .iter()
                .map(u8::to_string)
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// CPUs assigned to the agent in `slot`.
    ///
    /// Slots get disjoint CPU sets while there are enough CPUs, then wrap around and share.
    pub(crate) fn cpus_for(&self, slot: usize) -> Vec<u8> {
        let cpus = self.cpus.iter().copied().collect::<Vec<_>>();
        if cpus.is_empty() {
            return vec![];
        }
        (0..self.cpus_per_agent.min(cpus.len()))
            .map(|i| cpus[(slot * self.cpus_per_agent + i) % cpus.len()])
            .collect()
    }
}

impl Default for Constraints {
    fn default() -> Self {
        Constraints {
            total_ram: 0,
            agent_ram: 0,
            cpus: BTreeSet::new(),
            cpus_per_agent: 1,
            time_budget: None,
            action_time: DEFAULT_ACTION_TIMEOUT,
        }
    }
}
