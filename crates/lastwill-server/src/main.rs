//! lastwill-server: headless keeper daemon
//!
//! Watches the contract registry on a ledger gateway and acts as a keeper for
//! every eligible contract. Designed for Docker / server deployment.
//!
//! # Usage
//!
//! ```bash
//! lastwill-server --config /path/to/lastwill-server.toml
//! lastwill-server --check   # Run one pass and exit
//! lastwill-server --validate # Validate config and exit
//! ```

mod config;
mod daemon;

use anyhow::{Context, Result};
use std::path::PathBuf;

fn main() -> Result<()> {
    // The keeper key lives in this process; keep it out of core files
    lastwill_core::memory::disable_core_dumps();

    // Parse CLI args (minimal, no clap dependency needed)
    let args: Vec<String> = std::env::args().collect();

    let mut config_path = PathBuf::from("/config/lastwill-server.toml");
    let mut one_shot = false;
    let mut validate_only = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    config_path = PathBuf::from(&args[i]);
                } else {
                    anyhow::bail!("--config requires a path argument");
                }
            }
            "--check" | "--once" => {
                one_shot = true;
            }
            "--validate" => {
                validate_only = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--version" | "-V" => {
                println!("lastwill-server {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            other => {
                anyhow::bail!("Unknown argument: {}", other);
            }
        }
        i += 1;
    }

    let mut server_config = config::ServerConfig::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    server_config.apply_env_overrides();

    server_config
        .validate()
        .context("Configuration validation failed")?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(server_config.server.log_level.as_str()),
    )
    .init();

    if validate_only {
        println!("Configuration is valid.");
        println!("  Gateway:        {}", server_config.ledger.rpc_url);
        println!(
            "  Registry poll:  {} secs",
            server_config.ledger.registry_poll_secs
        );
        println!("  Data dir:       {}", server_config.server.data_dir.display());
        println!("  Fee:            {}", server_config.keeper.fee);
        println!(
            "  Max interval:   {} secs",
            server_config.keeper.max_check_in_interval_secs
        );
        println!(
            "  Poll interval:  {} secs",
            server_config.keeper.poll_interval_secs
        );
        println!(
            "  Backfill:       {} entries, {} at a time",
            server_config.keeper.backfill_depth, server_config.keeper.backfill_concurrency
        );
        println!(
            "  Keystore:       {}",
            if server_config.keeper.keystore_passphrase.is_some() {
                "encrypted"
            } else {
                "plain"
            }
        );
        return Ok(());
    }

    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;

    if one_shot {
        log::info!("Running single check cycle…");
        rt.block_on(daemon::run_check_cycle(&server_config))?;
        log::info!("Done.");
    } else {
        let shutdown = rt.block_on(async {
            tokio::select! {
                result = daemon::run(server_config) => result,
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Received shutdown signal. Exiting…");
                    Ok(())
                }
            }
        });

        if let Err(e) = shutdown {
            log::error!("Server error: {:#}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn print_help() {
    println!(
        r#"lastwill-server: headless keeper daemon

USAGE:
    lastwill-server [OPTIONS]

OPTIONS:
    -c, --config <PATH>   Config file path (default: /config/lastwill-server.toml)
    --check, --once       Run a single pass over the registry and exit
    --validate            Validate config file and exit
    -h, --help            Show this help message
    -V, --version         Show version

ENVIRONMENT VARIABLES (override config file):
    LASTWILL_DATA_DIR               Data directory path
    LASTWILL_LOG_LEVEL              Log level (error/warn/info/debug/trace)
    LASTWILL_RPC_URL                Ledger gateway URL
    LASTWILL_REGISTRY_POLL          Seconds between registry polls
    LASTWILL_FEE                    Fee asked per check-in
    LASTWILL_MAX_CHECK_IN_INTERVAL  Longest owner interval to accept, in seconds
    LASTWILL_POLL_INTERVAL          Seconds between polls of one contract
    LASTWILL_BACKFILL_DEPTH         Registry entries re-scanned at startup
    LASTWILL_BACKFILL_CONCURRENCY   Concurrent registry lookups
    LASTWILL_KEYSTORE_PASSPHRASE    Encrypts the keeper key at rest

EXAMPLES:
    # Run as daemon with config file
    lastwill-server --config /path/to/config.toml

    # Single pass (useful for cron jobs)
    lastwill-server --config config.toml --check

    # Validate configuration
    lastwill-server --config config.toml --validate
"#
    );
}
