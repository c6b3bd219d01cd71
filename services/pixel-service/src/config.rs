use anyhow::{Context, bail};
use px_ledger_rpc::RpcConfig;
use std::net::SocketAddr;

pub(crate) const DEFAULT_SERVICE_ADDR: &str = "0.0.0.0:8080";

/// Which ledger the service syncs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LedgerMode {
    Rpc,
    /// Offline demo ledger with a pre-authorized wallet.
    Memory,
}

#[derive(Debug, Clone)]
pub(crate) struct ServiceConfig {
    pub(crate) addr: SocketAddr,
    pub(crate) ledger: LedgerMode,
    pub(crate) rpc: RpcConfig,
}

impl ServiceConfig {
    pub(crate) fn from_env() -> anyhow::Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_vars(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let addr = var("PIXEL_SERVICE_ADDR").unwrap_or_else(|| DEFAULT_SERVICE_ADDR.to_owned());
        let addr = addr
            .trim()
            .parse::<SocketAddr>()
            .with_context(|| format!("PIXEL_SERVICE_ADDR is not a socket address: {addr:?}"))?;

        let ledger = match var("PIXEL_LEDGER").as_deref().map(str::trim) {
            None | Some("") | Some("rpc") => LedgerMode::Rpc,
            Some("memory") => LedgerMode::Memory,
            Some(other) => bail!("PIXEL_LEDGER must be `rpc` or `memory`, got {other:?}"),
        };

        let rpc = RpcConfig::from_vars(&var).context("invalid ledger configuration")?;

        Ok(Self { addr, ledger, rpc })
    }
}
