// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

//! CLI bootstrap: parse args, wire a `Controller` against a real node, and
//! run its tick loop until interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ed25519_dalek::SigningKey;
use slog::{o, Drain};

use tezos_baker_core::clock::SystemClock;
use tezos_baker_core::config::NetworkPreset;
use tezos_baker_core::node_client::ReqwestNodeClient;
use tezos_baker_core::signer::SoftKeyProvider;
use tezos_baker_core::Controller;

#[derive(Parser, Debug)]
#[command(name = "tezos-baker", about = "Head-tracking baking/endorsing/nonce-reveal agent")]
struct Args {
    /// Base URL of the node's RPC endpoint, e.g. http://127.0.0.1:8732
    #[arg(long)]
    node: reqwest::Url,

    /// Chain id to bake/endorse on.
    #[arg(long)]
    chain_id: String,

    /// Hex-encoded 32-byte Ed25519 seed for the baking key.
    #[arg(long, env = "BAKER_SEED_HEX")]
    seed_hex: String,

    /// One of mainnet, testnet, zeronet.
    #[arg(long, default_value = "mainnet")]
    network: String,

    /// Directory the nonce store is persisted under.
    #[arg(long, default_value = "./baker-data")]
    base_dir: PathBuf,

    /// Tick interval in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    tick_interval_ms: u64,
}

fn build_logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(drain, o!("version" => env!("CARGO_PKG_VERSION")))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log = build_logger();

    let network = NetworkPreset::by_name(&args.network)
        .with_context(|| format!("unknown network preset '{}'", args.network))?;

    let seed_bytes = hex::decode(&args.seed_hex).context("seed_hex must be valid hex")?;
    let seed: [u8; 32] = seed_bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("seed_hex must decode to exactly 32 bytes"))?;
    let signing_key = SigningKey::from_bytes(&seed);

    std::fs::create_dir_all(&args.base_dir)
        .with_context(|| format!("creating base dir {}", args.base_dir.display()))?;

    let node: Arc<dyn tezos_baker_core::node_client::NodeClient> =
        Arc::new(ReqwestNodeClient::new(args.node));
    let signer: Arc<dyn tezos_baker_core::signer::KeyProvider> =
        Arc::new(SoftKeyProvider::new(signing_key));
    let clock: Arc<dyn tezos_baker_core::clock::ClockAdapter> = Arc::new(SystemClock);

    let mut controller = Controller::new(
        node,
        signer,
        clock,
        args.base_dir,
        args.chain_id,
        network,
        log.clone(),
    );

    slog::info!(log, "baker starting"; "network" => args.network);

    let mut ticker = tokio::time::interval(Duration::from_millis(args.tick_interval_ms));
    loop {
        ticker.tick().await;
        controller.tick().await;
    }
}
