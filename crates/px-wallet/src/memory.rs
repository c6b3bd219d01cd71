use async_trait::async_trait;
use px_types::AccountId;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{RwLock, broadcast};

use crate::{WalletError, WalletProvider};

/// Scripted wallet for tests and offline runs.
///
/// `available` accounts are handed out on a connection request; they count as
/// authorized afterwards.
pub struct MemoryWalletProvider {
    available: Vec<AccountId>,
    authorized: RwLock<Vec<AccountId>>,
    reject: AtomicBool,
    changes: broadcast::Sender<Vec<AccountId>>,
}

impl MemoryWalletProvider {
    pub fn new(available: Vec<AccountId>) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            available,
            authorized: RwLock::new(Vec::new()),
            reject: AtomicBool::new(false),
            changes,
        }
    }

    /// Marks every available account as already authorized.
    pub async fn authorize_all(&self) {
        let mut guard = self.authorized.write().await;
        *guard = self.available.clone();
    }

    pub fn reject_requests(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub async fn notify_accounts_changed(&self, accounts: Vec<AccountId>) {
        {
            let mut guard = self.authorized.write().await;
            *guard = accounts.clone();
        }
        // No receivers just means nobody follows this provider yet.
        let _ = self.changes.send(accounts);
    }
}

#[async_trait]
impl WalletProvider for MemoryWalletProvider {
    async fn authorized_accounts(&self) -> Result<Vec<AccountId>, WalletError> {
        Ok(self.authorized.read().await.clone())
    }

    async fn request_accounts(&self) -> Result<Vec<AccountId>, WalletError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(WalletError::UserRejected);
        }
        let mut guard = self.authorized.write().await;
        *guard = self.available.clone();
        Ok(guard.clone())
    }

    fn account_changes(&self) -> Option<broadcast::Receiver<Vec<AccountId>>> {
        Some(self.changes.subscribe())
    }
}
