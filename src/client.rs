//! Agent side of the process isolation boundary.
//!
//! An external agent is an executable launched by the engine as `agent <port> args...`. It
//! connects to `127.0.0.1:<port>`, then answers one line per round. [`serve`] implements that
//! loop for any [`Strategy`]:
//!
//! ```no_run
//! use blotto_tournament::{client, strategies::Uniform};
//!
//! fn main() -> anyhow::Result<()> {
//!     let port = std::env::args()
//!         .nth(1)
//!         .ok_or_else(|| anyhow::anyhow!("missing port"))?
//!         .parse()?;
//!     client::serve(Uniform, port)
//! }
//! ```
//!
//! The engine kills the process when it misses a deadline, so agents do not need to watch the
//! clock themselves.

use std::{
    io::{BufRead, BufReader, Write},
    net::{Ipv4Addr, SocketAddrV4, TcpStream},
    panic::{self, AssertUnwindSafe},
};

use anyhow::Context;
use tracing::{debug, warn};

use crate::protocol::{decode_view, encode_fault, encode_output};
use crate::strategy::Strategy;

/// Connects to the engine on `port` and answers every request with `strategy` until the
/// engine closes the connection.
///
/// Strategy errors and panics are reported to the engine as faults; the loop keeps serving.
///
/// # Errors
///
/// Fails if the connection cannot be established or breaks.
pub fn serve<S: Strategy>(mut strategy: S, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, port);
    let stream = TcpStream::connect(addr).with_context(|| format!("could not connect to {addr}"))?;
    let _ = stream.set_nodelay(true);
    let mut writer = stream.try_clone().context("could not clone stream")?;
    let reader = BufReader::new(stream);

    for line in reader.lines() {
        let line = line.context("error while reading stream")?;
        if line.trim().is_empty() {
            continue;
        }
        let reply = match decode_view(&line) {
            Ok(view) => {
                debug!(round = view.current_round, balance = view.balance, "request");
                match panic::catch_unwind(AssertUnwindSafe(|| strategy.allocate(&view))) {
                    Ok(Ok(raw)) => encode_output(&raw),
                    Ok(Err(e)) => encode_fault(&format!("{e:#}")),
                    Err(_) => encode_fault("strategy panicked"),
                }
            }
            Err(e) => {
                warn!("unreadable request: {e:#}");
                encode_fault(&format!("{e:#}"))
            }
        };
        writer
            .write_all(reply.as_bytes())
            .context("I/O error while sending reply")?;
    }
    Ok(())
}
