//! Process entry point: reads configuration, wires the controllers onto a
//! shared bus, and runs the composed runtime until shutdown.

use clap::Parser;
use locker_endpoint::bus::{Bus, LocalBus};
use locker_endpoint::config::Config;
use locker_endpoint::controllers::{AccessController, BeaconController, LockController, WotController};
use locker_endpoint::correlation::CorrelationFabric;
use locker_endpoint::nfc::bridge::{spawn_completion_forwarder, LockQuerySlot, TokioBusBridge};
use locker_endpoint::nfc::transport::NullInterface;
use locker_endpoint::nfc::worker;
use locker_endpoint::runtime::{install_signal_handler, run, Controller, MultiControllerComposer};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Locker endpoint control-plane daemon.
#[derive(Parser, Debug)]
#[command(version = env!("GIT_SHORT_SHA"))]
struct Args {
    /// Path to a JSON configuration file.
    #[arg(long, env = "LOCKER_CONFIG")]
    config: Option<PathBuf>,

    /// Bus topic prefix every controller subscribes and publishes under.
    #[arg(long, env = "LOCKER_PREFIX", default_value = "/locker")]
    prefix: String,

    /// Handle exactly one inbound message then exit (used by integration tests).
    #[arg(long)]
    one_shot: bool,

    #[arg(long, short = 'q')]
    quiet: bool,

    #[arg(long, short = 'd')]
    debug: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.quiet {
        log::LevelFilter::Warn
    } else if args.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new().filter_level(level).init();
    log::info!("locker-endpointd {} starting", env!("GIT_SHORT_SHA"));

    let config = Config::read(args.config.as_deref());

    let tokio_runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    tokio_runtime.block_on(async_main(args, config))
}

async fn async_main(args: Args, config: Config) -> anyhow::Result<()> {
    let bus: Arc<dyn Bus> = Arc::new(LocalBus::default());
    let fabric = Arc::new(CorrelationFabric::new());

    let access = Arc::new(AccessController::new(&config.access));
    let lock = Arc::new(LockController::new(&config.lock));
    let wot = Arc::new(WotController::new(&config.wot, fabric.clone(), args.prefix.clone()));
    let beacon = Arc::new(BeaconController::new(&config.beacon)?);

    let members: Vec<Arc<dyn Controller>> = vec![access, lock, wot, beacon];
    let composer = Arc::new(MultiControllerComposer::new(members));

    let lock_query = LockQuerySlot::default();
    let forwarder = spawn_completion_forwarder(bus.clone(), fabric.clone(), args.prefix.clone(), lock_query.clone());

    let running = Arc::new(AtomicBool::new(true));
    let nfc_handle = {
        let bridge =
            TokioBusBridge::new(tokio::runtime::Handle::current(), bus.clone(), fabric.clone(), args.prefix.clone(), lock_query.clone());
        let nfc_config = config.nfc.clone();
        let running = running.clone();
        tokio::task::spawn_blocking(move || {
            worker::run_loop(NullInterface, &nfc_config, bridge, running);
        })
    };

    let shutdown = install_signal_handler();
    let result = run(composer, bus, &args.prefix, args.one_shot, shutdown).await;

    running.store(false, Ordering::SeqCst);
    forwarder.abort();
    let _ = nfc_handle.await;

    result.map_err(anyhow::Error::from)
}
