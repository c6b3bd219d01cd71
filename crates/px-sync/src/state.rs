use px_ledger::LedgerError;
use px_types::{ColorPair, Pixel, TxHandle};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Why a submission ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum FailureReason {
    NoProvider,
    UserRejected,
    Broadcast(String),
    Reverted,
    ConfirmationTimeout,
    Ledger(String),
}

impl From<LedgerError> for FailureReason {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NoProvider => Self::NoProvider,
            LedgerError::SubmissionRejected => Self::UserRejected,
            LedgerError::Broadcast(message) => Self::Broadcast(message),
            LedgerError::ConfirmationTimeout(_) => Self::ConfirmationTimeout,
            LedgerError::Query(message) | LedgerError::Decode(message) => Self::Ledger(message),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoProvider => f.write_str("no wallet connected; install or connect a wallet"),
            Self::UserRejected => f.write_str("signature request was rejected"),
            Self::Broadcast(message) => write!(f, "could not send the transaction: {message}"),
            Self::Reverted => f.write_str("the ledger reverted the transaction"),
            Self::ConfirmationTimeout => f.write_str("gave up waiting for the transaction to be mined"),
            Self::Ledger(message) => write!(f, "ledger error: {message}"),
        }
    }
}

/// Lifecycle of the single outstanding submission.
///
/// `Idle -> AwaitingSignature -> Pending -> Confirmed | Failed`, with
/// `AwaitingSignature -> Failed` on rejection. Terminal states stay until
/// acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum SubmissionState {
    #[default]
    Idle,
    AwaitingSignature,
    Pending(TxHandle),
    Confirmed(TxHandle),
    Failed(FailureReason),
}

impl SubmissionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::AwaitingSignature | Self::Pending(_))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed(_) | Self::Failed(_))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("a submission is already in progress or not yet acknowledged ({0:?})")]
    Busy(SubmissionState),
}

/// Change notifications for observers of the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    PixelAppended(Pixel),
    CountRefreshed(u64),
    SubmissionChanged(SubmissionState),
    DraftChanged(ColorPair),
}

/// Snapshot of everything a UI renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncView {
    pub pixels: Vec<Pixel>,
    pub total_count: Option<u64>,
    pub submission: SubmissionState,
    pub draft: ColorPair,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HydrationReport {
    pub subscribed: bool,
    /// Pixels returned by the bulk read.
    pub fetched: usize,
    /// Pixels that were new to the canonical list, from either path.
    pub appended: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn ledger_errors_map_to_reasons() {
        assert_eq!(
            FailureReason::from(LedgerError::SubmissionRejected),
            FailureReason::UserRejected
        );
        assert_eq!(
            FailureReason::from(LedgerError::ConfirmationTimeout(Duration::from_secs(1))),
            FailureReason::ConfirmationTimeout
        );
        assert_eq!(
            FailureReason::from(LedgerError::Decode("bad".to_owned())),
            FailureReason::Ledger("bad".to_owned())
        );
    }

    #[test]
    fn state_classification() {
        let tx = TxHandle("0x1".to_owned());
        assert!(SubmissionState::Idle.is_idle());
        assert!(SubmissionState::AwaitingSignature.is_in_flight());
        assert!(SubmissionState::Pending(tx.clone()).is_in_flight());
        assert!(SubmissionState::Confirmed(tx).is_terminal());
        assert!(SubmissionState::Failed(FailureReason::Reverted).is_terminal());
        assert!(!SubmissionState::Idle.is_terminal());
    }

    #[test]
    fn state_serializes_with_tag() -> Result<(), serde_json::Error> {
        let pending = serde_json::to_value(SubmissionState::Pending(TxHandle("0xab".to_owned())))?;
        assert_eq!(pending, serde_json::json!({ "state": "pending", "detail": "0xab" }));

        let failed = serde_json::to_value(SubmissionState::Failed(FailureReason::UserRejected))?;
        assert_eq!(
            failed,
            serde_json::json!({ "state": "failed", "detail": { "kind": "user_rejected" } })
        );
        Ok(())
    }
}
