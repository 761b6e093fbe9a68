pub mod evm;
pub mod jetton;
pub mod spl;

pub use evm::EvmVerifier;
pub use jetton::JettonVerifier;
pub use spl::SplVerifier;

use crate::config::{ChainConfig, ChainKind, Config};
use crate::error::VerifyError;
use crate::models::VerifiedTransfer;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

#[async_trait]
pub trait TransferVerifier: Send + Sync {
    /// `Ok(None)` means the chain answered and holds no qualifying transfer.
    async fn verify(
        &self,
        tx_ref: &str,
        chain: &ChainConfig,
    ) -> Result<Option<VerifiedTransfer>, VerifyError>;

    /// The form a reference is stored and deduplicated under. `None` when the
    /// reference cannot name a transaction on this chain family.
    fn canonical_ref(&self, tx_ref: &str) -> Option<String> {
        let tx_ref = tx_ref.trim();
        (!tx_ref.is_empty()).then(|| tx_ref.to_string())
    }
}

pub struct Dispatcher {
    evm: EvmVerifier,
    jetton: JettonVerifier,
    spl: SplVerifier,
}

impl Dispatcher {
    pub fn new(call_timeout: Duration) -> Self {
        let client = reqwest::Client::new();
        Self {
            evm: EvmVerifier::new(call_timeout),
            jetton: JettonVerifier::new(client.clone(), call_timeout),
            spl: SplVerifier::new(client, call_timeout),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.chain_call_timeout)
    }

    fn verifier_for(&self, kind: ChainKind) -> &dyn TransferVerifier {
        match kind {
            ChainKind::Evm => &self.evm,
            ChainKind::Ton => &self.jetton,
            ChainKind::Solana => &self.spl,
        }
    }

    pub fn canonical_ref(&self, chain: &ChainConfig, tx_ref: &str) -> Option<String> {
        self.verifier_for(chain.kind).canonical_ref(tx_ref)
    }

    pub async fn verify(
        &self,
        tx_ref: &str,
        chain_id: &str,
        config: &Config,
    ) -> Result<Option<VerifiedTransfer>, VerifyError> {
        let chain = config
            .chain(chain_id)
            .ok_or_else(|| VerifyError::UnsupportedChain(chain_id.to_string()))?;

        tracing::debug!(chain = %chain.id, kind = ?chain.kind, tx_ref, "Dispatching verification");

        self.verifier_for(chain.kind).verify(tx_ref, chain).await
    }
}

pub async fn verify(
    tx_ref: &str,
    chain_id: &str,
    config: &Config,
) -> Result<Option<VerifiedTransfer>, VerifyError> {
    Dispatcher::from_config(config)
        .verify(tx_ref, chain_id, config)
        .await
}

pub(crate) async fn with_timeout<T, E, F>(
    chain: &str,
    limit: Duration,
    call: F,
) -> Result<T, VerifyError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<VerifyError>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(VerifyError::Timeout {
            chain: chain.to_string(),
            secs: limit.as_secs(),
        }),
    }
}
