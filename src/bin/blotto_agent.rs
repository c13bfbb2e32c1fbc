//! Hosts a built-in strategy as an external agent process.
//!
//! Usage: `blotto-agent <port> <strategy>`
//!
//! Besides the strategies of [`blotto_tournament::strategies`], a few misbehaving agents are
//! available to exercise the sandbox:
//! - `stall`: never answers
//! - `slow-start`: never answers in the first round, then plays uniformly
//! - `exit`: exits without answering in the first round, then plays uniformly
//! - `recurse`: overflows its stack on every call

use std::{env, process, thread, time::Duration};

use anyhow::{anyhow, bail, Context};

use blotto_tournament::{
    allocation::RawOutput,
    client,
    game_state::GameView,
    strategies::{self, Uniform},
    strategy::Strategy,
};

enum Misbehaving {
    Stall,
    SlowStart,
    Exit,
    Recurse,
}

fn dive(depth: u64) -> u64 {
    if depth == u64::MAX {
        return 0;
    }
    let frame = std::hint::black_box([depth; 64]);
    dive(depth + 1).wrapping_add(frame[63])
}

impl Strategy for Misbehaving {
    fn allocate(&mut self, view: &GameView) -> anyhow::Result<RawOutput> {
        let first_round = view.current_round == 1;
        match self {
            Misbehaving::Stall => loop {
                thread::sleep(Duration::from_secs(3600));
            },
            Misbehaving::SlowStart if first_round => loop {
                thread::sleep(Duration::from_secs(3600));
            },
            Misbehaving::Exit if first_round => process::exit(1),
            Misbehaving::Recurse => Ok(vec![dive(0)].into()),
            _ => Uniform.allocate(view),
        }
    }
}

fn strategy_by_name(name: &str) -> anyhow::Result<Box<dyn Strategy>> {
    if let Some(strategy) = strategies::by_name(name) {
        return Ok(strategy);
    }
    Ok(match name {
        "stall" => Box::new(Misbehaving::Stall),
        "slow-start" => Box::new(Misbehaving::SlowStart),
        "exit" => Box::new(Misbehaving::Exit),
        "recurse" => Box::new(Misbehaving::Recurse),
        _ => bail!("unknown strategy '{name}'"),
    })
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let mut args = env::args().skip(1);
    let port = args
        .next()
        .ok_or_else(|| anyhow!("missing port"))?
        .parse::<u16>()
        .context("invalid port")?;
    let name = args.next().unwrap_or_else(|| "uniform".to_string());

    client::serve(strategy_by_name(&name)?, port)
}
