use async_trait::async_trait;
use px_types::AccountId;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

mod memory;

pub use memory::MemoryWalletProvider;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WalletError {
    #[error("no wallet provider available; install a wallet to continue")]
    NoProvider,
    #[error("user rejected the connection request")]
    UserRejected,
    #[error("wallet provider error: {0}")]
    Provider(String),
}

/// The environment's wallet, as seen by the client.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Accounts the user already authorized for this client. Never prompts.
    async fn authorized_accounts(&self) -> Result<Vec<AccountId>, WalletError>;

    /// Prompts the user to authorize an account.
    async fn request_accounts(&self) -> Result<Vec<AccountId>, WalletError>;

    /// Account-changed notifications, if the provider emits them.
    fn account_changes(&self) -> Option<broadcast::Receiver<Vec<AccountId>>> {
        None
    }
}

/// Tracks the connected account for one client session.
pub struct WalletSession {
    provider: Option<Arc<dyn WalletProvider>>,
    account: watch::Sender<Option<AccountId>>,
}

impl WalletSession {
    pub fn new(provider: Option<Arc<dyn WalletProvider>>) -> Self {
        let (account, _) = watch::channel(None);
        Self { provider, account }
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    pub fn account(&self) -> Option<AccountId> {
        self.account.borrow().clone()
    }

    /// Changed-address notifications; `None` means disconnected.
    pub fn watch(&self) -> watch::Receiver<Option<AccountId>> {
        self.account.subscribe()
    }

    /// Silent re-detection at start-up. A missing provider or a provider
    /// failure is logged and reported as no account.
    pub async fn detect_existing_account(&self) -> Option<AccountId> {
        let Some(provider) = &self.provider else {
            warn!("no wallet provider present; skipping account detection");
            return None;
        };

        match provider.authorized_accounts().await {
            Ok(accounts) => match accounts.into_iter().next() {
                Some(account) => {
                    info!("found an authorized account: {}", account);
                    self.set_account(Some(account.clone()));
                    Some(account)
                }
                None => {
                    debug!("no authorized account found");
                    None
                }
            },
            Err(err) => {
                warn!("account detection failed: {}", err);
                None
            }
        }
    }

    /// Prompts the user through the provider and stores the first account.
    pub async fn request_connection(&self) -> Result<AccountId, WalletError> {
        let provider = self.provider.as_ref().ok_or(WalletError::NoProvider)?;
        let account = provider
            .request_accounts()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| WalletError::Provider("provider returned no accounts".to_owned()))?;

        info!("connected account {}", account);
        self.set_account(Some(account.clone()));
        Ok(account)
    }

    /// Applies an account-changed notification. An empty list is a disconnect.
    pub fn accounts_changed(&self, accounts: &[AccountId]) {
        let next = accounts.first().cloned();
        match &next {
            Some(account) => info!("active account changed to {}", account),
            None => info!("wallet disconnected"),
        }
        self.set_account(next);
    }

    /// Forwards the provider's account-changed notifications into this
    /// session until the provider stops emitting them.
    pub fn follow_provider(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut changes = self.provider.as_ref()?.account_changes()?;
        let session = Arc::clone(self);
        Some(tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(accounts) => session.accounts_changed(&accounts),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("missed {} account notifications", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }))
    }

    fn set_account(&self, account: Option<AccountId>) {
        self.account.send_if_modified(|current| {
            if *current == account {
                false
            } else {
                *current = account;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(raw: &str) -> AccountId {
        AccountId(raw.to_owned())
    }

    #[tokio::test]
    async fn detect_without_provider_is_silent() {
        let session = WalletSession::new(None);
        assert_eq!(session.detect_existing_account().await, None);
        assert_eq!(session.account(), None);
    }

    #[tokio::test]
    async fn connect_without_provider_fails() {
        let session = WalletSession::new(None);
        assert_eq!(
            session.request_connection().await,
            Err(WalletError::NoProvider)
        );
    }

    #[tokio::test]
    async fn detect_picks_first_authorized_account() {
        let provider = MemoryWalletProvider::new(vec![account("0xa"), account("0xb")]);
        provider.authorize_all().await;
        let session = WalletSession::new(Some(Arc::new(provider)));

        assert_eq!(session.detect_existing_account().await, Some(account("0xa")));
        assert_eq!(session.account(), Some(account("0xa")));
    }

    #[tokio::test]
    async fn detect_with_nothing_authorized_leaves_session_unset() {
        let provider = MemoryWalletProvider::new(vec![account("0xa")]);
        let session = WalletSession::new(Some(Arc::new(provider)));

        assert_eq!(session.detect_existing_account().await, None);
        assert_eq!(session.account(), None);
    }

    #[tokio::test]
    async fn rejected_connection_keeps_session_unset() {
        let provider = MemoryWalletProvider::new(vec![account("0xa")]);
        provider.reject_requests(true);
        let session = WalletSession::new(Some(Arc::new(provider)));

        assert_eq!(
            session.request_connection().await,
            Err(WalletError::UserRejected)
        );
        assert_eq!(session.account(), None);
    }

    #[tokio::test]
    async fn connection_notifies_watchers() -> anyhow::Result<()> {
        let provider = MemoryWalletProvider::new(vec![account("0xa")]);
        let session = WalletSession::new(Some(Arc::new(provider)));
        let mut watcher = session.watch();

        session.request_connection().await?;
        watcher.changed().await?;
        assert_eq!(*watcher.borrow(), Some(account("0xa")));
        Ok(())
    }

    #[tokio::test]
    async fn provider_notifications_update_and_clear_session() -> anyhow::Result<()> {
        let provider = Arc::new(MemoryWalletProvider::new(vec![account("0xa"), account("0xb")]));
        let session = Arc::new(WalletSession::new(Some(provider.clone())));
        let mut watcher = session.watch();
        let follower = session.follow_provider().expect("memory provider emits changes");

        provider.notify_accounts_changed(vec![account("0xb")]).await;
        watcher.changed().await?;
        assert_eq!(session.account(), Some(account("0xb")));

        provider.notify_accounts_changed(Vec::new()).await;
        watcher.changed().await?;
        assert_eq!(session.account(), None);

        follower.abort();
        Ok(())
    }
}
