//! The daemon: load the keeper identity, connect to the ledger gateway and
//! hand both to the keeper automaton.

use crate::config::ServerConfig;
use anyhow::{Context, Result};
use lastwill_keeper::{load_identity, Keeper, KeeperContext};
use lastwill_ledger::RpcLedger;
use std::sync::Arc;

/// Run the keeper. Blocks forever (until shutdown signal).
pub async fn run(config: ServerConfig) -> Result<()> {
    log::info!("lastwill keeper starting…");
    log_settings(&config);

    let ctx = prepare(&config)?;
    Keeper::new(ctx)
        .context("Failed to create keeper")?
        .run()
        .await
        .context("Keeper stopped")
}

/// Backfill, act on every discovered contract once and exit.
pub async fn run_check_cycle(config: &ServerConfig) -> Result<()> {
    log_settings(config);
    let ctx = prepare(config)?;
    let submitted = Keeper::new(ctx)
        .context("Failed to create keeper")?
        .run_once()
        .await
        .context("Check cycle failed")?;
    log::info!("Check cycle submitted {} transaction(s)", submitted);
    Ok(())
}

fn log_settings(config: &ServerConfig) {
    log::info!("  Gateway:    {}", config.ledger.rpc_url);
    log::info!("  Data dir:   {}", config.server.data_dir.display());
    log::info!(
        "  Poll:       {} seconds per contract",
        config.keeper.poll_interval_secs
    );
    log::info!(
        "  Eligible:   check-in intervals up to {:.1} days",
        config.keeper.max_check_in_interval_secs as f64 / 86_400.0
    );
}

fn prepare(config: &ServerConfig) -> Result<Arc<KeeperContext>> {
    std::fs::create_dir_all(&config.server.data_dir).with_context(|| {
        format!(
            "Failed to create data dir: {}",
            config.server.data_dir.display()
        )
    })?;

    let keystore_path = config.keystore_path();
    let identity = load_identity(
        &keystore_path,
        config.keeper.keystore_passphrase.as_deref(),
    )
    .with_context(|| format!("Failed to load keystore {}", keystore_path.display()))?;

    let ledger = RpcLedger::new(&config.ledger.rpc_url).with_registry_poll(config.registry_poll());
    Ok(KeeperContext::new(
        Arc::new(ledger),
        identity,
        config.keeper_config(),
    ))
}
