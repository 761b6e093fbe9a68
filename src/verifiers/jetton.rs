use super::{with_timeout, TransferVerifier};
use crate::config::ChainConfig;
use crate::error::VerifyError;
use crate::models::{Token, VerifiedTransfer};
use crate::services::amount;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const API_KEY_HEADER: &str = "X-API-Key";

pub struct JettonVerifier {
    client: reqwest::Client,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct TransactionsResponse {
    #[serde(default)]
    transactions: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct JettonTransfersResponse {
    #[serde(default)]
    jetton_transfers: Vec<JettonTransfer>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JettonTransfer {
    #[serde(default)]
    pub source: Option<String>,
    pub destination: String,
    pub amount: String,
    pub jetton_master: String,
    pub transaction_lt: String,
}

impl JettonVerifier {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn get(&self, chain: &ChainConfig, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", chain.rpc_url.trim_end_matches('/'), path);
        let request = self.client.get(url);
        match &chain.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }

    async fn transaction_exists(&self, tx_hash: &str, chain: &ChainConfig) -> Result<bool, VerifyError> {
        let response = with_timeout(
            &chain.id,
            self.timeout,
            self.get(chain, "transactions")
                .query(&[("hash", tx_hash), ("limit", "1")])
                .send(),
        )
        .await?;

        if !response.status().is_success() {
            return Err(VerifyError::Indexer {
                status: response.status().as_u16(),
                endpoint: "transactions".to_string(),
            });
        }

        let body: TransactionsResponse = with_timeout(&chain.id, self.timeout, response.json()).await?;
        Ok(!body.transactions.is_empty())
    }

    async fn jetton_transfers(
        &self,
        tx_hash: &str,
        chain: &ChainConfig,
    ) -> Result<Vec<JettonTransfer>, VerifyError> {
        let response = with_timeout(
            &chain.id,
            self.timeout,
            self.get(chain, "jetton/transfers")
                .query(&[("transaction_hash", tx_hash)])
                .send(),
        )
        .await?;

        // A failed transfer lookup reads as "no transfer", unlike a failed existence check.
        if !response.status().is_success() {
            tracing::warn!(
                chain = %chain.id,
                tx_hash,
                status = response.status().as_u16(),
                "Jetton transfer lookup failed, treating as not found"
            );
            return Ok(Vec::new());
        }

        let body: JettonTransfersResponse =
            with_timeout(&chain.id, self.timeout, response.json()).await?;
        Ok(body.jetton_transfers)
    }
}

#[async_trait]
impl TransferVerifier for JettonVerifier {
    async fn verify(
        &self,
        tx_ref: &str,
        chain: &ChainConfig,
    ) -> Result<Option<VerifiedTransfer>, VerifyError> {
        if !self.transaction_exists(tx_ref, chain).await? {
            tracing::debug!(chain = %chain.id, tx_ref, "Transaction not indexed");
            return Ok(None);
        }

        let transfers = self.jetton_transfers(tx_ref, chain).await?;
        match_transfer(&transfers, chain, tx_ref)
    }

    // Hex hashes are case-insensitive; base64 hashes are kept as given.
    fn canonical_ref(&self, tx_ref: &str) -> Option<String> {
        let tx_ref = tx_ref.trim();
        if tx_ref.is_empty() {
            return None;
        }
        if tx_ref.len() == 64 && tx_ref.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Some(tx_ref.to_ascii_lowercase());
        }
        Some(tx_ref.to_string())
    }
}

pub fn match_transfer(
    transfers: &[JettonTransfer],
    chain: &ChainConfig,
    tx_ref: &str,
) -> Result<Option<VerifiedTransfer>, VerifyError> {
    for transfer in transfers {
        let Some(token) = chain.tokens.token_for_ignore_case(&transfer.jetton_master) else {
            continue;
        };
        if !transfer.destination.eq_ignore_ascii_case(&chain.recipient) {
            tracing::debug!(tx_ref, %token, destination = %transfer.destination, "Jetton sent elsewhere");
            continue;
        }

        let amount_usd = amount::to_usd(&transfer.amount, Token::DECIMALS)?;
        let logical_time = transfer.transaction_lt.parse::<u64>().map_err(|_| {
            VerifyError::Malformed(format!("transaction_lt: {}", transfer.transaction_lt))
        })?;

        tracing::info!(
            "Jetton payment verified: {} {} to {} (tx: {})",
            amount_usd,
            token,
            transfer.destination,
            tx_ref
        );

        return Ok(Some(VerifiedTransfer {
            from: transfer.source.clone().unwrap_or_default(),
            to: transfer.destination.clone(),
            amount_raw: transfer.amount.clone(),
            amount_usd,
            token,
            block_number: logical_time,
            tx_ref: tx_ref.to_string(),
        }));
    }

    Ok(None)
}
