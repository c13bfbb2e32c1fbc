//! Plugin registry of the agents taking part in a tournament.
//!
//! The registry maps each agent identity to its decision logic. It is filled once, before the
//! tournament starts; the engine itself never discovers agents.
//!
//! Untrusted agents are registered with [`AgentRegistry::register_executable`]: they run as a
//! child process, contained in a cgroup on Linux, and nothing they do (stack overflow, memory
//! exhaustion, endless loop, abort) can reach the host. Rust strategies written by the host
//! itself, such as the [built-in ones](crate::strategies), may be registered with
//! [`AgentRegistry::register_trusted_strategy`] and run on a worker thread instead; they are
//! bounded in time and panics are caught, but a stack overflow or an allocation bomb in a
//! trusted strategy takes the host down with it. A built-in strategy can still be isolated by
//! registering the `blotto-agent` binary as an executable.

use std::{path::PathBuf, sync::Arc};

use tracing::debug;

use crate::agent::{Agent, Backend};
use crate::error::ConfigError;
use crate::strategy::StrategyFactory;

/// Ordered set of uniquely named agents.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: Vec<Agent>,
}

impl AgentRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a trusted strategy, run on a dedicated worker thread of the host.
    ///
    /// Timeouts, errors and panics are contained, but the strategy shares the host's address
    /// space: only register code you trust not to overflow its stack or exhaust memory.
    ///
    /// # Errors
    ///
    /// [`ConfigError::DuplicateAgent`] if `name` is already registered.
    pub fn register_trusted_strategy(
        &mut self,
        name: impl Into<String>,
        factory: impl StrategyFactory + 'static,
    ) -> Result<(), ConfigError> {
        self.push(name.into(), Backend::Trusted(Arc::new(factory)))
    }

    /// Registers an untrusted agent, run as a contained child process.
    ///
    /// The executable is launched as `path <port> args...` and must connect to the host on
    /// `127.0.0.1:<port>`. See [`client::serve`](crate::client::serve).
    ///
    /// # Errors
    ///
    /// [`ConfigError::DuplicateAgent`] if `name` is already registered.
    pub fn register_executable(
        &mut self,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        args: Vec<String>,
    ) -> Result<(), ConfigError> {
        self.push(
            name.into(),
            Backend::Executable {
                path: path.into(),
                args,
            },
        )
    }

    /// Agent names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.agents.iter().map(|a| a.name.as_str())
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// True when no agent is registered.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub(crate) fn into_agents(self) -> Vec<Agent> {
        self.agents
    }

    fn push(&mut self, name: String, backend: Backend) -> Result<(), ConfigError> {
        if self.agents.iter().any(|a| a.name == name) {
            return Err(ConfigError::DuplicateAgent(name));
        }
        let id = self.agents.len() as u32 + 1;
        debug!(agent = %name, id, ?backend, "registered");
        self.agents.push(Agent::new(name, id, backend));
        Ok(())
    }
}
