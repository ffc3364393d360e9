//! Точка входа `quik-emulator`.
//!
//! Поток генератора раз в интервал сдвигает цены и рассылает их через хаб,
//! основной поток принимает соединения. `Ctrl+C` останавливает оба.

mod cli;
mod config;
mod generator;
mod hub;
mod market;
mod session;
mod tcp;
mod terminal;

use std::sync::{Arc, atomic::AtomicBool, atomic::AtomicU64, atomic::Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use clap::Parser;
use log::{debug, info, warn};

use crate::generator::{GeneratorConfig, MarketGenerator};
use crate::hub::{BroadcastStats, Hub};
use crate::market::Market;
use crate::tcp::Shared;

fn main() -> anyhow::Result<()> {
    // Логи через RUST_LOG=info/debug/trace
    env_logger::init();

    let args = cli::Args::parse();

    let instruments =
        config::load_instruments(args.instruments_file.as_deref(), args.instruments.as_deref())
            .context("load instruments")?;
    if instruments.is_empty() {
        bail!("instrument list is empty");
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::Relaxed);
            info!("shutting down...");
        })?;
    }

    let listener = tcp::bind(args.bind)?;
    info!(
        "quik-emulator listening on {}, {} instruments, interval {:?}",
        listener.local_addr()?,
        instruments.len(),
        args.interval()
    );

    let market = Arc::new(Market::new(instruments.iter().cloned()));
    let hub = Arc::new(Hub::new());

    let generator = {
        let cfg = GeneratorConfig {
            depth: args.depth,
            ..GeneratorConfig::default()
        };
        let generator = MarketGenerator::new(instruments, cfg);
        let (market, hub, shutdown) = (market.clone(), hub.clone(), shutdown.clone());
        let interval = args.interval();
        thread::Builder::new()
            .name("generator".into())
            .spawn(move || run_generator(generator, market, hub, interval, shutdown))?
    };

    let shared = Shared {
        hub,
        market,
        next_id: Arc::new(AtomicU64::new(1)),
        shutdown: shutdown.clone(),
    };
    let res = tcp::run_tcp_listener(listener, shared);

    // листенер мог упасть сам: останавливаем генератор в любом случае
    shutdown.store(true, Ordering::Relaxed);
    if generator.join().is_err() {
        warn!("generator thread panicked");
    }
    res
}

fn run_generator(
    mut generator: MarketGenerator,
    market: Arc<Market>,
    hub: Arc<Hub>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
) {
    let tick = Duration::from_millis(50).min(interval);
    let mut next = Instant::now();

    while !shutdown.load(Ordering::Relaxed) {
        if Instant::now() < next {
            thread::sleep(tick);
            continue;
        }
        next = Instant::now() + interval;

        let mut stats = BroadcastStats::default();
        for u in generator.next_batch() {
            let u = Arc::new(u);
            market.update(u.clone());
            stats.merge(hub.broadcast(u));
        }
        if stats.has_losses() {
            warn!("broadcast: {stats}");
        } else {
            debug!("broadcast to {} connections: {stats}", hub.len());
        }
    }
}
