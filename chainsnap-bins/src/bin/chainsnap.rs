//! Chained reference-data snapshot republisher
//!
//! Runs the feed and service contexts over the in-process loopback transport:
//! - subscribes one root link per configured instrument
//! - optionally replays a recorded feed, then marks the feed synchronised
//! - answers `--request` items and prints the parts received
//! - with `--once`, shuts down after the requests; otherwise runs until Ctrl-C

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chainsnap_bins::common::{init_logging, CommonArgs};
use chainsnap_bins::replay::{load_replay, replay};
use chainsnap_core::config::load_symbols;
use chainsnap_core::core::ChannelId;
use chainsnap_core::monitoring::MetricsRegistry;
use chainsnap_core::resilience::install_panic_handler;
use chainsnap_core::testing::decode_replies;
use chainsnap_core::transport::LoopbackTransport;
use chainsnap_core::{Collaborators, LifecycleCoordinator, MemoryCache};
use clap::Parser;
use tracing::{error, info, warn};

const REQUEST_CHANNEL: ChannelId = ChannelId(1);
const WAIT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// JSON-lines feed recording to inject before sync
    #[arg(short, long)]
    replay: Option<PathBuf>,

    /// Instrument to request once the feed is synchronised (repeatable)
    #[arg(long = "request")]
    requests: Vec<String>,

    /// Shut down after the requests instead of waiting for Ctrl-C
    #[arg(long)]
    once: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let settings = args.common.settings()?;
    init_logging(&settings)?;
    install_panic_handler();

    info!("=== chainsnap ===");
    let symbols = load_symbols(settings.symbols.path.as_deref())?;
    info!(symbols = symbols.len(), "symbol set loaded");

    let metrics = MetricsRegistry::new().context("failed to create metrics registry")?;
    let (collaborators, feed, requests) = Collaborators::loopback(
        LoopbackTransport::new(settings.service.service_id),
        MemoryCache::with_capacity(settings.feed.cache_capacity),
    );
    let mut coordinator = LifecycleCoordinator::new(settings, collaborators, metrics.clone());

    coordinator.initialize(&symbols)?;
    coordinator.start()?;
    coordinator
        .stop_token()
        .install_ctrlc()
        .context("failed to install Ctrl-C handler")?;

    if let Some(path) = &args.replay {
        let records = load_replay(path)?;
        replay(&feed, &records, WAIT)?;
    }
    feed.synced().context("feed sync failed")?;
    if !coordinator.wait_until_accepting(WAIT) {
        warn!("feed did not synchronise");
    }

    for item in &args.requests {
        let request = requests.request(REQUEST_CHANNEL, item);
        let token = request.token;
        requests.submit(request).context("request submit failed")?;
        match requests.wait_for_final(REQUEST_CHANNEL, token, WAIT) {
            Some(replies) => {
                for message in decode_replies(&replies) {
                    println!(
                        "{} part={} state={:?} code={:?} complete={} entries={:?}",
                        item,
                        message.part_number,
                        message.state,
                        message.code,
                        message.complete,
                        message.entries
                    );
                }
            }
            None => error!(item = %item, "no final reply"),
        }
    }

    let result = if args.once {
        coordinator.shutdown()
    } else {
        info!("serving, press Ctrl-C to stop");
        coordinator.run()
    };

    if args.common.metrics {
        match metrics.render() {
            Ok(text) => print!("{}", text),
            Err(e) => warn!(error = %e, "failed to render metrics"),
        }
    }

    result?;
    info!("shutdown complete");
    Ok(())
}
