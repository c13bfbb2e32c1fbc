use std::{
    path::Path,
    process::Child,
    sync::atomic::{AtomicU32, Ordering},
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use cgroups_rs::{cgroup_builder::CgroupBuilder, Cgroup, CgroupPid, MaxValue};
use tracing::{trace, warn};

use super::{create_process, kill_and_reap, ProcessLimits};

fn current_user_id() -> anyhow::Result<String> {
    let output = std::process::Command::new("id")
        .arg("-u")
        .output()
        .context("could not launch 'id -u'")?;
    let id = std::str::from_utf8(&output.stdout).context("id is not a valid string")?;
    Ok(id.trim().to_string())
}

fn cgroup_path(user_id: &str, group_name: &str) -> String {
    format!("user.slice/user-{user_id}.slice/user@{user_id}.service/{group_name}")
}

fn create_cgroup(path: &str, limits: &ProcessLimits) -> anyhow::Result<Cgroup> {
    let mut builder = CgroupBuilder::new(path);
    if limits.max_memory > 0 {
        builder = builder.memory().memory_hard_limit(limits.max_memory).done();
    }
    if limits.max_pids > 0 {
        builder = builder
            .pid()
            .maximum_number_of_processes(MaxValue::Value(limits.max_pids))
            .done();
    }
    if !limits.cpus.is_empty() {
        builder = builder.cpu().cpus(limits.cpus.clone()).done();
    }
    builder
        .build(cgroups_rs::hierarchies::auto())
        .context("could not create cgroup")
}

fn wait_for_cleanup(cgroup: &Cgroup, pid: u64, max_duration: Duration) -> anyhow::Result<()> {
    let deadline = Instant::now() + max_duration;
    while cgroup.tasks().iter().any(|task| task.pid == pid) {
        if Instant::now() > deadline {
            return Err(anyhow!("process {pid} still alive after {max_duration:?}"));
        }
        std::thread::sleep(Duration::from_millis(10).min(max_duration / 10));
    }
    Ok(())
}

/// A child process, contained in its own cgroup unless launched without container.
///
/// The process (and its cgroup) is killed on drop.
#[derive(Debug)]
pub struct LimitedProcess {
    child: Child,
    cgroup: Option<Cgroup>,
    cleaned_up: bool,
}

impl LimitedProcess {
    pub fn launch(
        command: &Path,
        args: &[String],
        limits: &ProcessLimits,
        allow_stderr: bool,
    ) -> anyhow::Result<LimitedProcess> {
        static COUNTER: AtomicU32 = AtomicU32::new(1);
        let user_id = current_user_id().context("could not get user id")?;
        // one cgroup per process, unique across concurrent engines
        let group_name = format!(
            "BLOTTO_{}_{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let path = cgroup_path(&user_id, &group_name);
        let group = create_cgroup(&path, limits)?;
        let mut child = match create_process(command, args, allow_stderr) {
            Ok(child) => child,
            Err(e) => {
                let _ = group.delete();
                return Err(e);
            }
        };

        let pid = child.id() as u64;
        if let Err(e) = group.add_task_by_tgid(CgroupPid { pid }) {
            let _ = kill_and_reap(&mut child);
            let _ = group.delete();
            return Err(e).context("could not add process to cgroup");
        }
        trace!(pid, cgroup = %path, "contained process launched");

        Ok(LimitedProcess {
            child,
            cgroup: Some(group),
            cleaned_up: false,
        })
    }

    pub fn launch_without_container(
        command: &Path,
        args: &[String],
        allow_stderr: bool,
    ) -> anyhow::Result<LimitedProcess> {
        let child = create_process(command, args, allow_stderr)?;
        Ok(LimitedProcess {
            child,
            cgroup: None,
            cleaned_up: false,
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn is_contained(&self) -> bool {
        self.cgroup.is_some()
    }

    /// True once the process has exited on its own.
    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    pub fn try_kill(&mut self, max_duration: Duration) -> anyhow::Result<()> {
        if self.cleaned_up {
            return Ok(());
        }
        match &self.cgroup {
            Some(cgroup) => {
                cgroup.kill().context("could not kill cgroup")?;
                wait_for_cleanup(cgroup, self.child.id() as u64, max_duration)
                    .context("process cleanup timed out")?;
                let _ = self.child.wait();
                // the process is dead, a leftover cgroup only costs a directory
                self.cleaned_up = true;
                if let Err(e) = cgroup.delete() {
                    warn!("Failed to remove cgroup. If this happens a lot, it may slow down the computer. {e}");
                }
                Ok(())
            }
            None => {
                kill_and_reap(&mut self.child)?;
                self.cleaned_up = true;
                Ok(())
            }
        }
    }
}

impl Drop for LimitedProcess {
    fn drop(&mut self) {
        static CLEANUP_DURATION: Duration = Duration::from_millis(100);
        if let Err(e) = self.try_kill(CLEANUP_DURATION) {
            warn!(pid = self.child.id(), "could not clean up process on drop: {e:#}");
        }
    }
}
