use std::{fmt, hash::Hash, path::PathBuf, sync::Arc};

use crate::strategy::StrategyFactory;

/// Where the decision logic of an agent lives.
#[derive(Clone)]
pub(crate) enum Backend {
    /// Trusted Rust strategy run on a worker thread of the host.
    Trusted(Arc<dyn StrategyFactory>),
    /// Executable run as a child process, speaking the line protocol over TCP.
    Executable { path: PathBuf, args: Vec<String> },
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Trusted(_) => write!(f, "Trusted"),
            Backend::Executable { path, args } => f
                .debug_struct("Executable")
                .field("path", path)
                .field("args", args)
                .finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Agent {
    pub name: String,
    /// Registration order, starting at 1.
    pub id: u32,
    pub backend: Backend,
}

impl PartialEq for Agent {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Agent {}

impl Hash for Agent {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl Agent {
    pub fn new(name: String, id: u32, backend: Backend) -> Agent {
        Agent { name, id, backend }
    }

    pub fn is_external(&self) -> bool {
        matches!(self.backend, Backend::Executable { .. })
    }
}
