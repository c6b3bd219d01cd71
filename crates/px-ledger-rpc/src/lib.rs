use async_trait::async_trait;
use px_ledger::{
    AccountWatch, DEFAULT_GAS_LIMIT, LedgerClient, LedgerError, PixelSubscription, TxOutcome,
};
use px_types::{AccountId, ColorPair, Pixel, TxHandle};
use px_wallet::{WalletError, WalletProvider};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub mod abi;
mod rpc;

pub use rpc::{RpcError, RpcTransport};

/// PixelPortal deployment the client talks to unless configured otherwise.
pub const DEFAULT_CONTRACT: &str = "0x6811D0FAc431884b7E56742A41d8E6C90054e77a";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a non-negative integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },
    #[error("{name} must be a 0x-prefixed 20-byte address, got {value:?}")]
    InvalidAddress { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcConfig {
    pub endpoint: String,
    pub contract: String,
    pub gas_limit: u64,
    pub poll_interval: Duration,
    /// `None` waits for a receipt indefinitely.
    pub confirmation_timeout: Option<Duration>,
}

impl RpcConfig {
    pub const DEFAULT_ENDPOINT: &'static str = "http://localhost:8545";
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            contract: DEFAULT_CONTRACT.to_owned(),
            gas_limit: DEFAULT_GAS_LIMIT,
            poll_interval: Duration::from_millis(Self::DEFAULT_POLL_INTERVAL_MS),
            confirmation_timeout: None,
        }
    }

    /// Reads `PIXEL_RPC_URL`, `PIXEL_CONTRACT_ADDRESS`, `PIXEL_GAS_LIMIT`,
    /// `PIXEL_POLL_INTERVAL_MS` and `PIXEL_CONFIRMATION_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |name: &str| var(name).filter(|value| !value.trim().is_empty());
        let number = |name: &'static str| -> Result<Option<u64>, ConfigError> {
            non_empty(name)
                .map(|value| {
                    value
                        .trim()
                        .parse::<u64>()
                        .map_err(|_| ConfigError::InvalidNumber { name, value })
                })
                .transpose()
        };

        let contract = non_empty("PIXEL_CONTRACT_ADDRESS").unwrap_or_else(|| DEFAULT_CONTRACT.to_owned());
        if !is_address(&contract) {
            return Err(ConfigError::InvalidAddress {
                name: "PIXEL_CONTRACT_ADDRESS",
                value: contract,
            });
        }

        Ok(Self {
            endpoint: non_empty("PIXEL_RPC_URL").unwrap_or_else(|| Self::DEFAULT_ENDPOINT.to_owned()),
            contract,
            gas_limit: number("PIXEL_GAS_LIMIT")?.unwrap_or(DEFAULT_GAS_LIMIT),
            poll_interval: Duration::from_millis(
                number("PIXEL_POLL_INTERVAL_MS")?.unwrap_or(Self::DEFAULT_POLL_INTERVAL_MS),
            ),
            confirmation_timeout: number("PIXEL_CONFIRMATION_TIMEOUT_MS")?.map(Duration::from_millis),
        })
    }
}

fn is_address(raw: &str) -> bool {
    raw.strip_prefix("0x")
        .is_some_and(|digits| digits.len() == 40 && digits.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Lower-cased so addresses from calls, logs and the wallet compare equal.
fn normalize_address(raw: &str) -> AccountId {
    AccountId(raw.trim().to_ascii_lowercase())
}

#[derive(Debug, Deserialize)]
struct RpcLog {
    topics: Vec<String>,
    data: String,
    #[serde(default)]
    removed: bool,
}

#[derive(Debug, Deserialize)]
struct Receipt {
    status: Option<String>,
}

/// `LedgerClient` over Ethereum JSON-RPC against the PixelPortal contract.
pub struct RpcLedger {
    rpc: Arc<RpcTransport>,
    config: RpcConfig,
    signer: AccountWatch,
    new_pixel_topic: String,
}

impl RpcLedger {
    pub fn new(config: RpcConfig, signer: AccountWatch) -> Self {
        Self {
            rpc: Arc::new(RpcTransport::new(&config.endpoint)),
            config,
            signer,
            new_pixel_topic: abi::event_topic(abi::NEW_PIXEL_EVENT),
        }
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    async fn eth_call(&self, signature: &str) -> Result<Vec<u8>, LedgerError> {
        let call = json!({
            "to": self.config.contract,
            "data": format!("0x{}", abi::to_hex(&abi::encode_call(signature))),
        });
        let raw: String = self
            .rpc
            .call("eth_call", json!([call, "latest"]))
            .await
            .map_err(|err| LedgerError::Query(err.to_string()))?;
        abi::from_hex(&raw).map_err(|err| LedgerError::Decode(err.to_string()))
    }

    /// Polls until a receipt shows up. Transport failures are retried; an
    /// error answered by the node ends the wait.
    async fn poll_receipt(&self, handle: &TxHandle) -> Result<TxOutcome, LedgerError> {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        loop {
            ticker.tick().await;
            match self
                .rpc
                .call::<Option<Receipt>>("eth_getTransactionReceipt", json!([handle.0]))
                .await
            {
                Ok(Some(receipt)) => {
                    return Ok(if receipt.status.as_deref() == Some("0x1") {
                        TxOutcome::Confirmed
                    } else {
                        TxOutcome::Reverted
                    });
                }
                Ok(None) => debug!("{} not mined yet", handle),
                Err(RpcError::Transport(err)) => {
                    warn!("receipt lookup for {} failed, retrying: {}", handle, err);
                }
                Err(err @ RpcError::Rpc { .. }) => return Err(LedgerError::Query(err.to_string())),
                Err(err @ RpcError::Decode(_)) => return Err(LedgerError::Decode(err.to_string())),
            }
        }
    }
}

async fn block_number(rpc: &RpcTransport) -> Result<u64, RpcError> {
    let raw: String = rpc.call("eth_blockNumber", json!([])).await?;
    rpc::parse_quantity(&raw)
}

fn decode_log(log: &RpcLog) -> Result<Pixel, abi::AbiError> {
    let topics = log
        .topics
        .iter()
        .map(|topic| abi::from_hex(topic))
        .collect::<Result<Vec<_>, _>>()?;
    abi::decode_new_pixel(&topics, &abi::from_hex(&log.data)?)
}

/// Polls `eth_getLogs` from `next_block` onwards until the subscriber goes away.
async fn poll_new_pixels(
    rpc: Arc<RpcTransport>,
    contract: String,
    topic: String,
    mut next_block: u64,
    interval: Duration,
    events: mpsc::UnboundedSender<Pixel>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if events.is_closed() {
            break;
        }

        let head = match block_number(&rpc).await {
            Ok(head) => head,
            Err(err) => {
                warn!("NewPixel poller: block number failed: {}", err);
                continue;
            }
        };
        if head < next_block {
            continue;
        }

        let filter = json!({
            "address": contract,
            "topics": [topic],
            "fromBlock": rpc::quantity(next_block),
            "toBlock": rpc::quantity(head),
        });
        let logs: Vec<RpcLog> = match rpc.call("eth_getLogs", json!([filter])).await {
            Ok(logs) => logs,
            Err(err) => {
                warn!("NewPixel poller: eth_getLogs failed: {}", err);
                continue;
            }
        };

        for log in logs.iter().filter(|log| !log.removed) {
            match decode_log(log) {
                Ok(pixel) => {
                    if events.send(pixel).is_err() {
                        return;
                    }
                }
                Err(err) => warn!("NewPixel poller: skipping undecodable log: {}", err),
            }
        }
        next_block = head + 1;
    }
}

#[async_trait]
impl LedgerClient for RpcLedger {
    async fn get_total_count(&self) -> Result<u64, LedgerError> {
        let data = self.eth_call(abi::GET_TOTAL_PIXELS).await?;
        abi::decode_u64(&data).map_err(|err| LedgerError::Decode(err.to_string()))
    }

    async fn get_all_pixels(&self) -> Result<Vec<Pixel>, LedgerError> {
        let data = self.eth_call(abi::GET_ALL_PIXELS).await?;
        abi::decode_pixels(&data).map_err(|err| LedgerError::Decode(err.to_string()))
    }

    /// Starts at the current head block, inclusive, so a write mined while
    /// the caller hydrates is seen by both paths rather than neither.
    async fn subscribe_new_pixel(&self) -> Result<PixelSubscription, LedgerError> {
        let start = block_number(&self.rpc)
            .await
            .map_err(|err| LedgerError::Query(err.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        let feeder = tokio::spawn(poll_new_pixels(
            Arc::clone(&self.rpc),
            self.config.contract.clone(),
            self.new_pixel_topic.clone(),
            start,
            self.config.poll_interval,
            tx,
        ));
        info!("subscribed to NewPixel from block {}", start);
        Ok(PixelSubscription::with_feeder(rx, feeder))
    }

    async fn submit_pixel(&self, colors: &ColorPair) -> Result<TxHandle, LedgerError> {
        let from = self.signer.borrow().clone().ok_or(LedgerError::NoProvider)?;
        let data = abi::encode_pixelise(colors.color_a.as_str(), colors.color_b.as_str());
        let tx = json!({
            "from": from.0,
            "to": self.config.contract,
            "gas": rpc::quantity(self.config.gas_limit),
            "data": format!("0x{}", abi::to_hex(&data)),
        });

        match self.rpc.call::<String>("eth_sendTransaction", json!([tx])).await {
            Ok(hash) => Ok(TxHandle(hash)),
            Err(err) if err.code() == Some(rpc::USER_REJECTED) => Err(LedgerError::SubmissionRejected),
            Err(err) => Err(LedgerError::Broadcast(err.to_string())),
        }
    }

    async fn await_confirmation(&self, handle: &TxHandle) -> Result<TxOutcome, LedgerError> {
        match self.config.confirmation_timeout {
            Some(limit) => tokio::time::timeout(limit, self.poll_receipt(handle))
                .await
                .map_err(|_| LedgerError::ConfirmationTimeout(limit))?,
            None => self.poll_receipt(handle).await,
        }
    }
}

/// `WalletProvider` backed by the accounts of a JSON-RPC node.
///
/// An unreachable node is treated as an absent provider.
pub struct RpcWallet {
    rpc: RpcTransport,
}

impl RpcWallet {
    pub fn new(endpoint: &str) -> Self {
        Self {
            rpc: RpcTransport::new(endpoint),
        }
    }

    async fn accounts(&self, method: &str) -> Result<Vec<AccountId>, RpcError> {
        let raw: Vec<String> = self.rpc.call(method, json!([])).await?;
        Ok(raw.iter().map(|address| normalize_address(address)).collect())
    }
}

fn wallet_error(err: RpcError) -> WalletError {
    match err {
        RpcError::Transport(_) => WalletError::NoProvider,
        RpcError::Rpc { code, .. } if code == rpc::USER_REJECTED => WalletError::UserRejected,
        other => WalletError::Provider(other.to_string()),
    }
}

#[async_trait]
impl WalletProvider for RpcWallet {
    async fn authorized_accounts(&self) -> Result<Vec<AccountId>, WalletError> {
        self.accounts("eth_accounts").await.map_err(wallet_error)
    }

    async fn request_accounts(&self) -> Result<Vec<AccountId>, WalletError> {
        match self.accounts("eth_requestAccounts").await {
            // Plain nodes expose their unlocked accounts without a prompt.
            Err(err) if err.code() == Some(rpc::METHOD_NOT_FOUND) => {
                self.accounts("eth_accounts").await.map_err(wallet_error)
            }
            result => result.map_err(wallet_error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn config_defaults() {
        let config = RpcConfig::from_vars(vars(&[])).expect("defaults are valid");
        assert_eq!(config, RpcConfig::new(RpcConfig::DEFAULT_ENDPOINT));
        assert_eq!(config.gas_limit, 300_000);
        assert_eq!(config.confirmation_timeout, None);
    }

    #[test]
    fn config_overrides() {
        let config = RpcConfig::from_vars(vars(&[
            ("PIXEL_RPC_URL", "http://node:8545"),
            ("PIXEL_CONTRACT_ADDRESS", "0x00000000000000000000000000000000000000aa"),
            ("PIXEL_GAS_LIMIT", "500000"),
            ("PIXEL_POLL_INTERVAL_MS", "250"),
            ("PIXEL_CONFIRMATION_TIMEOUT_MS", "60000"),
        ]))
        .expect("valid overrides");

        assert_eq!(config.endpoint, "http://node:8545");
        assert_eq!(config.gas_limit, 500_000);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.confirmation_timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn config_rejects_bad_values() {
        assert_eq!(
            RpcConfig::from_vars(vars(&[("PIXEL_GAS_LIMIT", "lots")])),
            Err(ConfigError::InvalidNumber {
                name: "PIXEL_GAS_LIMIT",
                value: "lots".to_owned()
            })
        );
        assert!(matches!(
            RpcConfig::from_vars(vars(&[("PIXEL_CONTRACT_ADDRESS", "0x1234")])),
            Err(ConfigError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn wallet_errors_map_to_session_taxonomy() {
        assert_eq!(
            wallet_error(RpcError::Transport("refused".to_owned())),
            WalletError::NoProvider
        );
        assert_eq!(
            wallet_error(RpcError::Rpc {
                code: rpc::USER_REJECTED,
                message: "denied".to_owned()
            }),
            WalletError::UserRejected
        );
    }

    #[test]
    fn addresses_are_lower_cased() {
        assert_eq!(normalize_address(DEFAULT_CONTRACT).as_str(), DEFAULT_CONTRACT.to_ascii_lowercase());
    }
}
