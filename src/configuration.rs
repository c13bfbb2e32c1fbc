//! Runtime behaviour of the engine.
//!
//! Created programmatically with [`Configuration::new()`] or read from environment variables
//! with [`Configuration::from_env()`].
//!
//! # Environment Variables
//!
//! All values are optional and case-insensitive. Set the value to `"true"` to enable a flag.
//!
//! - `BLOTTO_LOG`: Log to a timestamped file in the working directory (default: `false`)
//! - `BLOTTO_ALLOW_UNCONTAINED`: Run external agents without cgroup isolation when cgroups v2
//!   is unavailable (default: `false`)
//! - `BLOTTO_DEBUG_AGENT_STDERR`: Let external agents write to stderr (default: `false`)
//! - `BLOTTO_CONCURRENT_DISPATCH`: Ask all agents of a round at the same time (default: `true`)

/// Configuration for engine behaviors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Configuration {
    pub(crate) log: bool,
    pub(crate) allow_uncontained: bool,
    pub(crate) debug_agent_stderr: bool,
    pub(crate) concurrent_dispatch: bool,
}

impl Configuration {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - Logging to file is disabled.
    /// - External agents must be contained in a cgroup.
    /// - Agent stderr output is discarded.
    /// - Agents of a round are dispatched concurrently.
    pub fn new() -> Self {
        Self {
            log: false,
            allow_uncontained: false,
            debug_agent_stderr: false,
            concurrent_dispatch: true,
        }
    }

    /// Create configuration from environment variables. Unset variables keep their default.
    pub fn from_env() -> Self {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match std::env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        Self {
            log: get_env_flag("BLOTTO_LOG", false),
            allow_uncontained: get_env_flag("BLOTTO_ALLOW_UNCONTAINED", false),
            debug_agent_stderr: get_env_flag("BLOTTO_DEBUG_AGENT_STDERR", false),
            concurrent_dispatch: get_env_flag("BLOTTO_CONCURRENT_DISPATCH", true),
        }
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// Enable or disable running external agents outside a cgroup.
    ///
    /// When enabled and cgroups are unavailable, only time limits are enforced.
    pub fn with_allow_uncontained(mut self, value: bool) -> Self {
        self.allow_uncontained = value;
        self
    }

    /// Enable or disable agent stderr output (debug purposes only).
    pub fn with_debug_agent_stderr(mut self, value: bool) -> Self {
        self.debug_agent_stderr = value;
        self
    }

    /// Dispatch the agents of a round concurrently, or one after the other.
    ///
    /// Both modes produce identical results: agents never see moves of the current round.
    pub fn with_concurrent_dispatch(mut self, value: bool) -> Self {
        self.concurrent_dispatch = value;
        self
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}
