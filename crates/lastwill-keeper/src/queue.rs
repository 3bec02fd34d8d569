//! Transaction queue
//!
//! Every state-changing call made under one keeper identity goes through a
//! single worker task: one submission in flight, in the order enqueued.

use std::sync::Arc;

use lastwill_ledger::{Address, Ledger, LedgerError, Transaction};
use tokio::sync::{mpsc, oneshot};

use crate::KeeperError;

/// Reply for one queued transaction.
pub type Receipt = oneshot::Receiver<Result<(), LedgerError>>;

struct Queued {
    contract: Address,
    tx: Transaction,
    reply: oneshot::Sender<Result<(), LedgerError>>,
}

/// Handle to the submission worker. Cloning shares the same worker.
#[derive(Clone)]
pub struct TxQueue {
    sender: mpsc::UnboundedSender<Queued>,
}

impl TxQueue {
    /// Start the worker on the current tokio runtime. It stops once every
    /// handle is dropped.
    pub fn spawn(ledger: Arc<dyn Ledger>, from: Address) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Queued>();

        tokio::spawn(async move {
            while let Some(item) = receiver.recv().await {
                let kind = item.tx.kind();
                log::debug!("[{}] Submitting {}", item.contract, kind);
                let result = ledger.submit(&from, &item.contract, item.tx).await;
                if let Err(e) = &result {
                    log::debug!("[{}] {} rejected: {}", item.contract, kind, e);
                }
                // The waiter may be gone; the submission stands either way
                let _ = item.reply.send(result);
            }
            log::debug!("Transaction queue for {} stopped", from);
        });

        Self { sender }
    }

    /// Queue a transaction without waiting for it.
    pub fn enqueue(&self, contract: Address, tx: Transaction) -> Result<Receipt, KeeperError> {
        let (reply, receipt) = oneshot::channel();
        self.sender
            .send(Queued {
                contract,
                tx,
                reply,
            })
            .map_err(|_| KeeperError::QueueClosed)?;
        Ok(receipt)
    }

    /// Queue a transaction and wait for the ledger's answer.
    pub async fn submit(&self, contract: Address, tx: Transaction) -> Result<(), KeeperError> {
        let receipt = self.enqueue(contract, tx)?;
        receipt.await.map_err(|_| KeeperError::QueueClosed)??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lastwill_ledger::MemoryLedger;
    use std::time::Duration;

    const OWNER: Address = Address([0xAA; 20]);

    #[tokio::test]
    async fn test_one_at_a_time_in_order() {
        let ledger = Arc::new(MemoryLedger::new(1_000));
        let first = ledger.create_contract(OWNER, 60).await;
        let second = ledger.create_contract(OWNER, 60).await;
        ledger.set_submit_delay(Duration::from_millis(30));

        let queue = TxQueue::spawn(ledger.clone(), OWNER);
        let a = queue.enqueue(first, Transaction::Cancel).unwrap();
        let b = queue.enqueue(second, Transaction::Cancel).unwrap();
        let c = queue.enqueue(first, Transaction::OwnerCheckIn).unwrap();

        assert_eq!(a.await.unwrap(), Ok(()));
        assert_eq!(b.await.unwrap(), Ok(()));
        // Cancelled by the first item
        assert!(matches!(
            c.await.unwrap(),
            Err(LedgerError::TransactionFailed(_))
        ));

        let log = ledger.submissions().await;
        let order: Vec<_> = log.iter().map(|s| (s.contract, s.kind)).collect();
        assert_eq!(
            order,
            vec![
                (first, "cancel"),
                (second, "cancel"),
                (first, "owner_check_in")
            ]
        );
        assert_eq!(ledger.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_submit_surfaces_ledger_error() {
        let ledger = Arc::new(MemoryLedger::new(1_000));
        let queue = TxQueue::spawn(ledger.clone(), OWNER);
        let missing = Address([5; 20]);

        let err = queue
            .submit(missing, Transaction::KeeperCheckIn)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            KeeperError::Ledger(LedgerError::ContractNotFound(a)) if a == missing
        ));
    }
}
