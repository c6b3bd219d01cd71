use async_trait::async_trait;
use px_types::{AccountId, ColorPair, Pixel, TxHandle};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

mod memory;

pub use memory::{CallCounts, MemoryLedger, ScriptedSubmit};

/// Gas ceiling used for every `pixelise` write.
pub const DEFAULT_GAS_LIMIT: u64 = 300_000;

/// Connected account the ledger signs with; `None` when disconnected.
pub type AccountWatch = watch::Receiver<Option<AccountId>>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("no wallet provider or connected account")]
    NoProvider,
    #[error("user declined to sign the submission")]
    SubmissionRejected,
    #[error("broadcast failed: {0}")]
    Broadcast(String),
    #[error("confirmation not observed within {0:?}")]
    ConfirmationTimeout(Duration),
    #[error("ledger query failed: {0}")]
    Query(String),
    #[error("could not decode ledger response: {0}")]
    Decode(String),
}

/// Terminal result of a mined write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Confirmed,
    Reverted,
}

/// Live feed of `NewPixel` events in ledger emission order.
///
/// The transport may redeliver an event; consumers deduplicate. Dropping the
/// subscription unsubscribes and stops any background feeder.
pub struct PixelSubscription {
    events: mpsc::UnboundedReceiver<Pixel>,
    feeder: Option<JoinHandle<()>>,
}

impl PixelSubscription {
    pub fn new(events: mpsc::UnboundedReceiver<Pixel>) -> Self {
        Self {
            events,
            feeder: None,
        }
    }

    /// Subscription fed by a background task that is aborted on unsubscribe.
    pub fn with_feeder(events: mpsc::UnboundedReceiver<Pixel>, feeder: JoinHandle<()>) -> Self {
        Self {
            events,
            feeder: Some(feeder),
        }
    }

    /// Next event; `None` once the ledger side has gone away.
    pub async fn recv(&mut self) -> Option<Pixel> {
        self.events.recv().await
    }

    /// Next already-delivered event, without waiting.
    pub fn try_recv(&mut self) -> Option<Pixel> {
        self.events.try_recv().ok()
    }

    pub fn unsubscribe(self) {}
}

impl Drop for PixelSubscription {
    fn drop(&mut self) {
        self.events.close();
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
    }
}

/// The remote pixel ledger (the PixelPortal contract).
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Current number of submitted pixels.
    async fn get_total_count(&self) -> Result<u64, LedgerError>;

    /// Every pixel, oldest first. Unpaginated: one call returns the whole list.
    async fn get_all_pixels(&self) -> Result<Vec<Pixel>, LedgerError>;

    async fn subscribe_new_pixel(&self) -> Result<PixelSubscription, LedgerError>;

    /// Signs and broadcasts a `pixelise` write. Returns once broadcast, not mined.
    async fn submit_pixel(&self, colors: &ColorPair) -> Result<TxHandle, LedgerError>;

    /// Waits until the write is mined.
    async fn await_confirmation(&self, handle: &TxHandle) -> Result<TxOutcome, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(at: u64) -> Pixel {
        Pixel::new(AccountId("0xa".to_owned()), at, "112233", "445566")
    }

    #[tokio::test]
    async fn subscription_yields_in_send_order() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscription = PixelSubscription::new(rx);
        tx.send(pixel(1)).expect("receiver open");
        tx.send(pixel(2)).expect("receiver open");

        assert_eq!(subscription.recv().await, Some(pixel(1)));
        assert_eq!(subscription.try_recv(), Some(pixel(2)));
        assert_eq!(subscription.try_recv(), None);
    }

    #[tokio::test]
    async fn unsubscribe_closes_channel_and_stops_feeder() {
        let (tx, rx) = mpsc::unbounded_channel();
        let feeder = tokio::spawn(std::future::pending::<()>());
        let subscription = PixelSubscription::with_feeder(rx, feeder);

        subscription.unsubscribe();
        assert!(tx.is_closed());
        assert!(tx.send(pixel(1)).is_err());
    }
}
