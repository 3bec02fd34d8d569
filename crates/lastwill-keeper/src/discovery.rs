//! Discovery and polling tasks
//!
//! These tasks only read from the ledger. Whatever they find is sent to the
//! event loop as an [`Observation`].

use std::sync::Arc;

use futures::future::join_all;
use lastwill_ledger::{Address, ContractFeed, LedgerError, Phase};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::decision::Snapshot;
use crate::events::Observation;
use crate::KeeperContext;

/// Scan registry entries `start..count` in batches of concurrent lookups.
pub async fn backfill(
    ctx: Arc<KeeperContext>,
    start: u64,
    count: u64,
    events: UnboundedSender<Observation>,
) {
    let batch = ctx.config.backfill_concurrency.max(1) as u64;
    log::info!("Backfilling registry entries {}..{}", start, count);

    let mut index = start;
    while index < count {
        let end = (index + batch).min(count);
        let lookups = (index..end).map(|i| {
            let ledger = ctx.ledger.clone();
            async move { (i, ledger.contract_at(i).await) }
        });

        for (i, result) in join_all(lookups).await {
            match result {
                Ok(address) => {
                    if events.send(Observation::Discovered { index: i, address }).is_err() {
                        return;
                    }
                }
                Err(e) => log::warn!("Registry lookup #{} failed: {}", i, e),
            }
        }
        index = end;
    }

    let _ = events.send(Observation::BackfillComplete {
        scanned: count.saturating_sub(start),
    });
}

/// Forward live registry notifications until either side goes away.
pub fn forward_subscription(
    mut feed: ContractFeed,
    events: UnboundedSender<Observation>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some((index, address)) = feed.recv().await {
            log::debug!("[{}] New registry entry #{}", address, index);
            if events.send(Observation::Discovered { index, address }).is_err() {
                break;
            }
        }
    })
}

/// Poll one contract at a fixed delay until aborted.
pub fn spawn_poller(
    ctx: Arc<KeeperContext>,
    address: Address,
    events: UnboundedSender<Observation>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let snapshot = fetch_snapshot(&ctx, &address).await;
            let observation = Observation::Observed {
                address,
                snapshot: Box::new(snapshot),
            };
            if events.send(observation).is_err() {
                break;
            }
            tokio::time::sleep(ctx.config.poll_interval).await;
        }
    })
}

/// Poll one contract once.
pub fn spawn_single_poll(
    ctx: Arc<KeeperContext>,
    address: Address,
    events: UnboundedSender<Observation>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let snapshot = fetch_snapshot(&ctx, &address).await;
        let _ = events.send(Observation::Observed {
            address,
            snapshot: Box::new(snapshot),
        });
    })
}

/// Read what [`crate::decision::decide`] needs. The legacy and our key part
/// ciphertexts are only fetched while a key part is owed.
pub async fn fetch_snapshot(
    ctx: &KeeperContext,
    contract: &Address,
) -> Result<Snapshot, LedgerError> {
    let ledger = &ctx.ledger;
    let now = ledger.now().await?;
    let state = ledger.contract_state(contract).await?;
    let keeper = ledger.keeper(contract, &ctx.address).await?;

    let mut proposed = false;
    if state.phase == Phase::CallForKeepers && keeper.is_none() {
        for index in 0..state.num_proposals {
            if ledger.proposal_at(contract, index).await?.keeper == ctx.address {
                proposed = true;
                break;
            }
        }
    }

    let owed = state.phase == Phase::CallForKeys
        && keeper.as_ref().is_some_and(|k| !k.key_part_supplied());
    let (legacy, key_part_chunks) = if owed {
        let legacy = ledger.legacy(contract).await?;
        let count = ledger.key_part_chunk_count(contract).await?;
        let mut chunks = Vec::with_capacity(count);
        for index in 0..count {
            chunks.push(ledger.key_part_chunk(contract, index).await?);
        }
        (legacy, chunks)
    } else {
        (None, Vec::new())
    };

    Ok(Snapshot {
        now,
        state,
        keeper,
        proposed,
        legacy,
        key_part_chunks,
    })
}
