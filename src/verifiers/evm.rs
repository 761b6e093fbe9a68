use super::{with_timeout, TransferVerifier};
use crate::config::ChainConfig;
use crate::error::VerifyError;
use crate::models::{Token, VerifiedTransfer};
use crate::services::amount;
use async_trait::async_trait;
use ethers::{
    providers::{Http, Middleware, Provider},
    types::{Address, TransactionReceipt, H256, U256, U64},
    utils::{keccak256, to_checksum},
};
use std::str::FromStr;
use std::time::Duration;

pub struct EvmVerifier {
    timeout: Duration,
}

impl EvmVerifier {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

fn parse_tx_hash(tx_ref: &str) -> Option<H256> {
    let tx_ref = tx_ref.trim();
    let hex = tx_ref
        .strip_prefix("0x")
        .or_else(|| tx_ref.strip_prefix("0X"))
        .unwrap_or(tx_ref);
    if hex.len() != 64 {
        return None;
    }
    H256::from_str(hex).ok()
}

#[async_trait]
impl TransferVerifier for EvmVerifier {
    async fn verify(
        &self,
        tx_ref: &str,
        chain: &ChainConfig,
    ) -> Result<Option<VerifiedTransfer>, VerifyError> {
        // A reference that is not a 32-byte hash cannot name a transaction.
        let Some(tx_hash) = parse_tx_hash(tx_ref) else {
            tracing::debug!(tx_ref, "Not an EVM transaction hash");
            return Ok(None);
        };

        let expected = ExpectedTransfer::from_chain(chain)?;
        let provider = Provider::<Http>::try_from(chain.rpc_url.as_str())
            .map_err(|e| VerifyError::InvalidConfig(format!("{}: {}", chain.id, e)))?;

        let receipt = with_timeout(
            &chain.id,
            self.timeout,
            provider.get_transaction_receipt(tx_hash),
        )
        .await?;

        let Some(receipt) = receipt else {
            tracing::debug!(chain = %chain.id, tx_ref, "Receipt not found");
            return Ok(None);
        };

        match_transfer(&receipt, &expected, tx_ref)
    }

    fn canonical_ref(&self, tx_ref: &str) -> Option<String> {
        parse_tx_hash(tx_ref).map(|hash| format!("{:?}", hash))
    }
}

#[derive(Debug, Clone)]
pub struct ExpectedTransfer {
    pub recipient: Address,
    pub tokens: [(Token, Address); 2],
}

impl ExpectedTransfer {
    pub fn from_chain(chain: &ChainConfig) -> Result<Self, VerifyError> {
        let parse = |label: &str, value: &str| {
            Address::from_str(value).map_err(|_| {
                VerifyError::InvalidConfig(format!("{} {} address: {}", chain.id, label, value))
            })
        };

        Ok(Self {
            recipient: parse("recipient", &chain.recipient)?,
            tokens: [
                (Token::Usdt, parse("USDT", &chain.tokens.usdt)?),
                (Token::Usdc, parse("USDC", &chain.tokens.usdc)?),
            ],
        })
    }

    fn token_at(&self, contract: Address) -> Option<Token> {
        self.tokens
            .iter()
            .find(|(_, address)| *address == contract)
            .map(|(token, _)| *token)
    }
}

pub fn transfer_topic() -> H256 {
    H256::from(keccak256(b"Transfer(address,address,uint256)"))
}

pub fn match_transfer(
    receipt: &TransactionReceipt,
    expected: &ExpectedTransfer,
    tx_ref: &str,
) -> Result<Option<VerifiedTransfer>, VerifyError> {
    if receipt.status != Some(U64::from(1)) {
        tracing::debug!(tx_ref, status = ?receipt.status, "Transaction reverted");
        return Ok(None);
    }

    let topic = transfer_topic();

    for log in &receipt.logs {
        let Some(token) = expected.token_at(log.address) else {
            continue;
        };

        // topic0 plus exactly two indexed addresses; ERC-721 carries a third.
        if log.topics.len() != 3 || log.topics[0] != topic {
            continue;
        }

        let to = Address::from(log.topics[2]);
        if to != expected.recipient {
            tracing::debug!(tx_ref, %token, to = ?to, "Transfer to another address");
            continue;
        }

        if log.data.is_empty() || log.data.len() > 32 {
            tracing::warn!(tx_ref, len = log.data.len(), "Transfer log with unexpected data length");
            continue;
        }

        let from = Address::from(log.topics[1]);
        let value = U256::from_big_endian(&log.data);
        let amount_raw = value.to_string();
        let amount_usd = amount::to_usd(&amount_raw, Token::DECIMALS)?;

        let block_number = receipt
            .block_number
            .ok_or_else(|| VerifyError::Malformed("receipt without block number".to_string()))?
            .as_u64();

        tracing::info!(
            "EVM payment verified: {} {} from {:?} (tx: {})",
            amount_usd,
            token,
            from,
            tx_ref
        );

        return Ok(Some(VerifiedTransfer {
            from: to_checksum(&from, None),
            to: to_checksum(&to, None),
            amount_raw,
            amount_usd,
            token,
            block_number,
            tx_ref: tx_ref.to_string(),
        }));
    }

    Ok(None)
}
