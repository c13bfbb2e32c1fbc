//! Child processes with resource ceilings.
//!
//! On Linux, each [`LimitedProcess`] lives in its own cgroup v2 with a memory hard limit, a pid
//! ceiling and a cpuset. Elsewhere only uncontained processes can be launched.

#[cfg(target_os = "linux")]
mod cgroup_manager_linux;

#[cfg(target_os = "linux")]
pub use cgroup_manager_linux::*;

#[cfg(not(target_os = "linux"))]
mod cgroup_manager_stub;

use std::{
    path::Path,
    process::{Child, Stdio},
};

use anyhow::Context;
#[cfg(not(target_os = "linux"))]
pub use cgroup_manager_stub::*;

/// Ceilings applied to a contained process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessLimits {
    /// Memory hard limit in bytes. Non-positive means no restriction.
    pub max_memory: i64,
    /// Maximum number of processes. Non-positive means no restriction.
    pub max_pids: i64,
    /// Comma separated cpu ranges ("1-5,7"). Empty means no restriction.
    pub cpus: String,
}

fn create_process(command: &Path, args: &[String], allow_stderr: bool) -> anyhow::Result<Child> {
    let mut cmd = std::process::Command::new(command);
    cmd.args(args).stdin(Stdio::null()).stdout(Stdio::null());
    if !allow_stderr {
        cmd.stderr(Stdio::null());
    }
    cmd.spawn()
        .with_context(|| format!("could not launch '{}'", command.display()))
}

/// Kills an uncontained child and reaps it.
fn kill_and_reap(child: &mut Child) -> anyhow::Result<()> {
    if child.try_wait().context("could not query process")?.is_none() {
        child.kill().context("could not kill process")?;
    }
    child.wait().context("could not reap process")?;
    Ok(())
}
