use std::{
    io::{self, ErrorKind, Read, Write},
    net::{TcpListener, TcpStream},
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use tracing::{debug, instrument, warn};

use super::{deadline_after, remaining, ExecutionOutcome, Sandbox};
use crate::cgroup_manager::{LimitedProcess, ProcessLimits};
use crate::configuration::Configuration;
use crate::game_state::GameView;
use crate::protocol::{decode_reply, encode_view, Reply};

/// A running agent process and its connection.
#[derive(Debug)]
struct Client {
    stream: TcpStream,
    process: LimitedProcess,
    pending: Vec<u8>,
}

/// How a single exchange with the agent process ended.
enum Exchange {
    Line(String),
    TimedOut,
    Broken(anyhow::Error),
}

/// Runs an external agent as a child process.
///
/// The executable is launched as `path <port> args...` and must connect to `127.0.0.1:<port>`.
/// On Linux the process gets its own cgroup with the memory and CPU ceilings of its slot. A
/// process that times out or breaks the protocol is killed; the next call launches a new one.
pub struct ProcessSandbox {
    agent: String,
    path: PathBuf,
    args: Vec<String>,
    limits: ProcessLimits,
    config: Configuration,
    client: Option<Client>,
}

impl ProcessSandbox {
    /// Time allowed to a freshly launched process to connect back.
    const CONNECTION_TIMEOUT: Duration = Duration::from_secs(1);
    const KILL_TIMEOUT: Duration = Duration::from_secs(1);
    /// Longest reply accepted, newline included.
    const MAX_REPLY_BYTES: usize = 64 * 1024;
    /// Most unsolicited bytes tolerated between two calls.
    const MAX_UNREAD_BYTES: usize = 16 * Self::MAX_REPLY_BYTES;

    /// A sandbox for the executable at `path`. The process is launched on the first call.
    pub fn new(
        agent: impl Into<String>,
        path: impl Into<PathBuf>,
        args: Vec<String>,
        limits: ProcessLimits,
        config: Configuration,
    ) -> Self {
        ProcessSandbox {
            agent: agent.into(),
            path: path.into(),
            args,
            limits,
            config,
            client: None,
        }
    }

    #[instrument(skip_all, fields(agent = %self.agent))]
    fn launch(&self) -> anyhow::Result<Client> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .context("server error: could not create TcpListener")?;
        let mut args = vec![listener.local_addr()?.port().to_string()];
        args.extend(self.args.iter().cloned());

        let stderr = self.config.debug_agent_stderr;
        let mut process = match LimitedProcess::launch(&self.path, &args, &self.limits, stderr) {
            Ok(process) => process,
            Err(e) if self.config.allow_uncontained => {
                warn!("could not contain agent, running it uncontained: {e:#}");
                LimitedProcess::launch_without_container(&self.path, &args, stderr)?
            }
            Err(e) => return Err(e.context("child + cgroup creation failed")),
        };

        listener
            .set_nonblocking(true)
            .context("server error: setting non-blocking to true")?;

        let deadline = Instant::now() + Self::CONNECTION_TIMEOUT;
        while Instant::now() < deadline {
            if let Ok((stream, _addr)) = listener.accept() {
                stream
                    .set_nonblocking(false)
                    .context("server error: setting blocking stream")?;
                let _ = stream.set_nodelay(true);
                debug!(pid = process.id(), contained = process.is_contained(), "agent connected");
                return Ok(Client {
                    stream,
                    process,
                    pending: vec![],
                });
            }
            if process.has_exited() {
                return Err(anyhow!("agent exited before connecting"));
            }
            // at least 10 tries
            thread::sleep(Duration::from_millis(10).min(Self::CONNECTION_TIMEOUT / 10));
        }

        let _ = process.try_kill(Self::KILL_TIMEOUT);
        Err(anyhow!("no connection made to server"))
    }

    /// Sends `view` and reads one reply line, all within `timeout`.
    ///
    /// Lines the agent sent since its previous reply are dropped first, so that every reply
    /// answers the view just sent.
    fn exchange(
        stream: &mut TcpStream,
        pending: &mut Vec<u8>,
        view: &GameView,
        timeout: Duration,
    ) -> Exchange {
        let deadline = deadline_after(timeout);
        pending.clear();
        match Self::discard_unread(stream) {
            Ok(0) => {}
            Ok(discarded) => debug!(discarded, "dropped unsolicited bytes"),
            Err(e) => return Exchange::Broken(anyhow!(e).context("error while draining stream")),
        }

        let line = match encode_view(view) {
            Ok(line) => line,
            Err(e) => return Exchange::Broken(e),
        };
        if let Err(e) = stream.set_write_timeout(Some(timeout)) {
            return Exchange::Broken(anyhow!(e).context("server error: setting write timeout"));
        }
        match stream.write_all(line.as_bytes()) {
            Ok(()) => {}
            Err(e) if is_timeout(&e) => return Exchange::TimedOut,
            Err(e) => return Exchange::Broken(anyhow!(e).context("I/O error while sending view")),
        }

        let mut buf = [0; 4096];
        loop {
            if let Some(end) = pending.iter().position(|&b| b == b'\n') {
                let line = String::from_utf8_lossy(&pending[..end]).into_owned();
                return Exchange::Line(line);
            }
            if pending.len() > Self::MAX_REPLY_BYTES {
                return Exchange::Broken(anyhow!("reply exceeds {} bytes", Self::MAX_REPLY_BYTES));
            }

            let left = remaining(deadline);
            if left.is_zero() {
                return Exchange::TimedOut;
            }
            if let Err(e) = stream.set_read_timeout(Some(left)) {
                return Exchange::Broken(anyhow!(e).context("server error: setting read timeout"));
            }
            match stream.read(&mut buf) {
                Ok(0) => return Exchange::Broken(anyhow!("connection closed by agent")),
                Ok(n) => pending.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if is_timeout(&e) => return Exchange::TimedOut,
                Err(e) => {
                    return Exchange::Broken(anyhow!(e).context("error while reading stream"))
                }
            }
        }
    }

    /// Reads and drops whatever is already waiting on `stream`, without blocking.
    fn discard_unread(stream: &mut TcpStream) -> io::Result<usize> {
        stream.set_nonblocking(true)?;
        let mut buf = [0; 4096];
        let mut discarded = 0;
        let drained = loop {
            match stream.read(&mut buf) {
                Ok(0) => {
                    break Err(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "connection closed by agent",
                    ))
                }
                Ok(n) => {
                    discarded += n;
                    if discarded > Self::MAX_UNREAD_BYTES {
                        break Err(io::Error::new(
                            ErrorKind::InvalidData,
                            "agent keeps sending unsolicited data",
                        ));
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break Ok(discarded),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => break Err(e),
            }
        };
        stream.set_nonblocking(false)?;
        drained
    }

    fn discard_client(&mut self, mut client: Client) {
        if let Err(e) = client.process.try_kill(Self::KILL_TIMEOUT) {
            warn!(agent = %self.agent, "could not kill agent process: {e:#}");
        }
    }

    fn crashed(&self, cause: String) -> ExecutionOutcome {
        warn!(agent = %self.agent, %cause, "agent crashed");
        ExecutionOutcome::Crashed {
            agent: self.agent.clone(),
            cause,
        }
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

impl Sandbox for ProcessSandbox {
    fn agent(&self) -> &str {
        &self.agent
    }

    #[instrument(skip_all, fields(agent = %self.agent, round = view.current_round))]
    fn execute(&mut self, view: &GameView, timeout: Duration) -> ExecutionOutcome {
        let mut client = match self.client.take() {
            Some(client) => client,
            None => match self.launch() {
                Ok(client) => client,
                Err(e) => return self.crashed(format!("could not launch agent: {e:#}")),
            },
        };

        match Self::exchange(&mut client.stream, &mut client.pending, view, timeout) {
            Exchange::Line(line) => {
                self.client = Some(client);
                match decode_reply(&line) {
                    Reply::Output(raw) => ExecutionOutcome::Returned(raw),
                    Reply::Fault(cause) => self.crashed(cause),
                }
            }
            Exchange::TimedOut => {
                warn!(agent = %self.agent, ?timeout, "agent timed out, killing process");
                self.discard_client(client);
                ExecutionOutcome::TimedOut
            }
            Exchange::Broken(e) => {
                self.discard_client(client);
                self.crashed(format!("{e:#}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::io::{BufRead, BufReader};

    use super::*;

    fn view() -> GameView {
        GameView {
            balance: 10,
            field_values: vec![1, 2],
            num_fields: 2,
            history: vec![],
            balances: BTreeMap::new(),
            total_rounds: 5,
            current_round: 1,
        }
    }

    fn uncontained() -> Configuration {
        Configuration::new().with_allow_uncontained(true)
    }

    #[test]
    fn missing_executable_is_a_crash() {
        let mut sandbox = ProcessSandbox::new(
            "ghost",
            "/this/agent/does/not/exist",
            vec![],
            ProcessLimits::default(),
            uncontained(),
        );
        match sandbox.execute(&view(), Duration::from_millis(100)) {
            ExecutionOutcome::Crashed { agent, cause } => {
                assert_eq!(agent, "ghost");
                assert!(cause.contains("could not launch"), "{cause}");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn process_exiting_before_connecting_is_a_crash() {
        let mut sandbox = ProcessSandbox::new(
            "quitter",
            "true",
            vec![],
            ProcessLimits::default(),
            uncontained(),
        );
        let start = Instant::now();
        assert!(matches!(
            sandbox.execute(&view(), Duration::from_millis(100)),
            ExecutionOutcome::Crashed { .. }
        ));
        assert!(start.elapsed() < ProcessSandbox::CONNECTION_TIMEOUT * 2);
    }

    #[test]
    fn late_extra_lines_are_not_taken_for_the_next_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        // answers every view, then sends a second unsolicited line
        let agent = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            for (call, line) in BufReader::new(stream).lines().enumerate() {
                if line.is_err() {
                    break;
                }
                let _ = writer.write_all(format!("[{}, 0]\n", call + 1).as_bytes());
                thread::sleep(Duration::from_millis(20));
                let _ = writer.write_all(b"[9, 9]\n");
            }
        });

        let mut stream = TcpStream::connect(addr).unwrap();
        let mut pending = vec![];
        let timeout = Duration::from_secs(1);
        let mut reply = || {
            match ProcessSandbox::exchange(&mut stream, &mut pending, &view(), timeout) {
                Exchange::Line(line) => line,
                Exchange::TimedOut => panic!("timed out"),
                Exchange::Broken(e) => panic!("broken: {e:#}"),
            }
        };

        assert_eq!(reply(), "[1, 0]");
        thread::sleep(Duration::from_millis(150));
        assert_eq!(reply(), "[2, 0]");

        drop(stream);
        agent.join().unwrap();
    }
}
