use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{debug, instrument, warn};

use super::{ExecutionOutcome, Sandbox};
use crate::allocation::RawOutput;
use crate::game_state::GameView;
use crate::strategy::StrategyFactory;

type Reply = Result<RawOutput, String>;

/// Abandoned workers an agent may leave running before its calls stop getting a new one.
const MAX_STRANDED: usize = 2;

/// A worker thread owning one strategy instance.
#[derive(Debug)]
struct Worker {
    requests: Sender<GameView>,
    replies: Receiver<Reply>,
    handle: JoinHandle<()>,
}

/// Runs a trusted strategy on a dedicated worker thread.
///
/// The worker is kept across calls, so a strategy keeps its internal state from one round to
/// the next. After a timeout the worker is abandoned and the next call starts from a fresh
/// instance built by the factory. While [`MAX_STRANDED`] abandoned workers of the same agent
/// are still running, calls time out immediately instead of spawning another one.
///
/// The worker shares the host's address space: stack overflows and memory exhaustion are not
/// contained. Untrusted code belongs in a [`ProcessSandbox`](super::ProcessSandbox).
pub struct ThreadSandbox {
    agent: String,
    factory: Arc<dyn StrategyFactory>,
    worker: Option<Worker>,
    stranded: Vec<JoinHandle<()>>,
    generation: u32,
}

impl ThreadSandbox {
    /// A sandbox building its strategy instances with `factory`. No thread is spawned until the
    /// first call.
    pub fn new(agent: impl Into<String>, factory: Arc<dyn StrategyFactory>) -> Self {
        ThreadSandbox {
            agent: agent.into(),
            factory,
            worker: None,
            stranded: Vec::new(),
            generation: 0,
        }
    }

    /// Shorthand for `ThreadSandbox::new(agent, Arc::new(factory))`.
    pub fn from_factory(agent: impl Into<String>, factory: impl StrategyFactory + 'static) -> Self {
        Self::new(agent, Arc::new(factory))
    }

    fn spawn_worker(&mut self) -> std::io::Result<Worker> {
        self.generation += 1;
        let (requests, request_rx) = mpsc::channel::<GameView>();
        let (reply_tx, replies) = mpsc::channel::<Reply>();
        let factory = self.factory.clone();

        let handle = thread::Builder::new()
            .name(format!("{}#{}", self.agent, self.generation))
            .spawn(move || {
                // a panicking constructor ends the worker, the host sees a disconnection
                let Ok(mut strategy) = panic::catch_unwind(AssertUnwindSafe(|| factory.create()))
                else {
                    return;
                };
                for view in request_rx {
                    let reply =
                        match panic::catch_unwind(AssertUnwindSafe(|| strategy.allocate(&view))) {
                            Ok(Ok(raw)) => Ok(raw),
                            Ok(Err(e)) => Err(format!("{e:#}")),
                            Err(payload) => Err(panic_message(payload)),
                        };
                    if reply_tx.send(reply).is_err() {
                        // host gave up on this worker
                        break;
                    }
                }
            })?;

        debug!(agent = %self.agent, generation = self.generation, "worker spawned");
        Ok(Worker {
            requests,
            replies,
            handle,
        })
    }

    /// Abandoned workers still running. Finished ones are forgotten.
    pub(crate) fn stranded_workers(&mut self) -> usize {
        self.stranded.retain(|handle| !handle.is_finished());
        self.stranded.len()
    }

    fn crashed(&self, cause: impl Into<String>) -> ExecutionOutcome {
        let cause = cause.into();
        warn!(agent = %self.agent, %cause, "agent crashed");
        ExecutionOutcome::Crashed {
            agent: self.agent.clone(),
            cause,
        }
    }
}

impl Sandbox for ThreadSandbox {
    fn agent(&self) -> &str {
        &self.agent
    }

    #[instrument(skip_all, fields(agent = %self.agent, round = view.current_round))]
    fn execute(&mut self, view: &GameView, timeout: Duration) -> ExecutionOutcome {
        let worker = match self.worker.take() {
            Some(worker) => worker,
            None => {
                let stranded = self.stranded_workers();
                if stranded >= MAX_STRANDED {
                    warn!(
                        agent = %self.agent,
                        stranded,
                        "abandoned workers still running, call skipped"
                    );
                    return ExecutionOutcome::TimedOut;
                }
                match self.spawn_worker() {
                    Ok(worker) => worker,
                    Err(e) => return self.crashed(format!("could not spawn worker: {e}")),
                }
            }
        };

        if worker.requests.send(view.clone()).is_err() {
            return self.crashed("worker exited");
        }

        match worker.replies.recv_timeout(timeout) {
            Ok(Ok(raw)) => {
                self.worker = Some(worker);
                ExecutionOutcome::Returned(raw)
            }
            Ok(Err(cause)) => {
                self.worker = Some(worker);
                self.crashed(cause)
            }
            Err(RecvTimeoutError::Timeout) => {
                // threads cannot be killed: the worker exits once its current call returns
                // and its reply will never be read
                warn!(agent = %self.agent, ?timeout, "agent timed out, abandoning worker");
                let Worker { handle, .. } = worker;
                self.stranded.push(handle);
                ExecutionOutcome::TimedOut
            }
            Err(RecvTimeoutError::Disconnected) => self.crashed("worker exited"),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
