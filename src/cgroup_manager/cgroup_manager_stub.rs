use std::{path::Path, process::Child, time::Duration};

use anyhow::bail;
use tracing::warn;

use super::{create_process, kill_and_reap, ProcessLimits};

/// An uncontained child process. cgroups are only available on Linux.
#[derive(Debug)]
pub struct LimitedProcess {
    child: Child,
    cleaned_up: bool,
}

impl LimitedProcess {
    pub fn launch(
        _command: &Path,
        _args: &[String],
        _limits: &ProcessLimits,
        _allow_stderr: bool,
    ) -> anyhow::Result<LimitedProcess> {
        bail!("cgroups only available on linux")
    }

    pub fn launch_without_container(
        command: &Path,
        args: &[String],
        allow_stderr: bool,
    ) -> anyhow::Result<LimitedProcess> {
        let child = create_process(command, args, allow_stderr)?;
        Ok(LimitedProcess {
            child,
            cleaned_up: false,
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn is_contained(&self) -> bool {
        false
    }

    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    pub fn try_kill(&mut self, _max_duration: Duration) -> anyhow::Result<()> {
        if !self.cleaned_up {
            kill_and_reap(&mut self.child)?;
            self.cleaned_up = true;
        }
        Ok(())
    }
}

impl Drop for LimitedProcess {
    fn drop(&mut self) {
        if let Err(e) = self.try_kill(Duration::from_millis(100)) {
            warn!(pid = self.child.id(), "could not clean up process on drop: {e:#}");
        }
    }
}
