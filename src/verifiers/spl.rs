use super::{with_timeout, TransferVerifier};
use crate::config::ChainConfig;
use crate::error::VerifyError;
use crate::models::{Token, VerifiedTransfer};
use crate::services::amount;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;

pub const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
pub const TOKEN_2022_PROGRAM_ID: &str = "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb";

pub struct SplVerifier {
    client: reqwest::Client,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
pub struct ParsedTransaction {
    pub slot: u64,
    #[serde(default)]
    pub meta: Option<TransactionMeta>,
    pub transaction: TransactionEnvelope,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMeta {
    #[serde(default)]
    pub err: Option<Value>,
    #[serde(default)]
    pub inner_instructions: Option<Vec<InnerInstructions>>,
    #[serde(default)]
    pub pre_token_balances: Option<Vec<TokenBalance>>,
    #[serde(default)]
    pub post_token_balances: Option<Vec<TokenBalance>>,
}

#[derive(Debug, Deserialize)]
pub struct InnerInstructions {
    pub index: u32,
    pub instructions: Vec<ParsedInstruction>,
}

#[derive(Debug, Deserialize)]
pub struct TransactionEnvelope {
    pub message: Message,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub account_keys: Vec<AccountKey>,
    pub instructions: Vec<ParsedInstruction>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum AccountKey {
    Parsed { pubkey: String },
    Plain(String),
}

impl AccountKey {
    fn pubkey(&self) -> &str {
        match self {
            AccountKey::Parsed { pubkey } => pubkey,
            AccountKey::Plain(pubkey) => pubkey,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedInstruction {
    #[serde(default)]
    pub program_id: Option<String>,
    #[serde(default)]
    pub parsed: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    pub account_index: usize,
    pub mint: String,
    #[serde(default)]
    pub owner: Option<String>,
}

impl SplVerifier {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn get_transaction(
        &self,
        signature: &str,
        chain: &ChainConfig,
    ) -> Result<Option<ParsedTransaction>, VerifyError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getTransaction",
            "params": [
                signature,
                {
                    "encoding": "jsonParsed",
                    "commitment": "confirmed",
                    "maxSupportedTransactionVersion": 0
                }
            ]
        });

        let response = with_timeout(
            &chain.id,
            self.timeout,
            self.client.post(&chain.rpc_url).json(&request).send(),
        )
        .await?
        .error_for_status()?;

        let body: RpcResponse<ParsedTransaction> =
            with_timeout(&chain.id, self.timeout, response.json()).await?;

        if let Some(error) = body.error {
            return Err(VerifyError::JsonRpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(body.result)
    }
}

#[async_trait]
impl TransferVerifier for SplVerifier {
    async fn verify(
        &self,
        tx_ref: &str,
        chain: &ChainConfig,
    ) -> Result<Option<VerifiedTransfer>, VerifyError> {
        let Some(transaction) = self.get_transaction(tx_ref, chain).await? else {
            tracing::debug!(chain = %chain.id, tx_ref, "Transaction not found");
            return Ok(None);
        };

        match_transfer(&transaction, chain, tx_ref)
    }
}

fn balance_index<'a>(
    keys: &[&'a str],
    balances: Option<&'a Vec<TokenBalance>>,
) -> HashMap<&'a str, &'a TokenBalance> {
    balances
        .into_iter()
        .flatten()
        .filter_map(|balance| keys.get(balance.account_index).map(|key| (*key, balance)))
        .collect()
}

fn str_field<'a>(info: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    info.get(key).and_then(Value::as_str)
}

pub fn match_transfer(
    transaction: &ParsedTransaction,
    chain: &ChainConfig,
    tx_ref: &str,
) -> Result<Option<VerifiedTransfer>, VerifyError> {
    let Some(meta) = &transaction.meta else {
        return Ok(None);
    };
    if meta.err.is_some() {
        tracing::debug!(tx_ref, err = ?meta.err, "Transaction failed on chain");
        return Ok(None);
    }

    let message = &transaction.transaction.message;
    let keys: Vec<&str> = message.account_keys.iter().map(AccountKey::pubkey).collect();
    let post = balance_index(&keys, meta.post_token_balances.as_ref());
    let pre = balance_index(&keys, meta.pre_token_balances.as_ref());

    let inner = meta
        .inner_instructions
        .iter()
        .flatten()
        .flat_map(|group| group.instructions.iter());

    for instruction in message.instructions.iter().chain(inner) {
        let program_id = instruction.program_id.as_deref().unwrap_or_default();
        if program_id != TOKEN_PROGRAM_ID && program_id != TOKEN_2022_PROGRAM_ID {
            continue;
        }

        let Some(parsed) = instruction.parsed.as_ref().and_then(Value::as_object) else {
            continue;
        };
        if !matches!(str_field(parsed, "type"), Some("transfer" | "transferChecked")) {
            continue;
        }
        let Some(info) = parsed.get("info").and_then(Value::as_object) else {
            continue;
        };
        let Some(destination) = str_field(info, "destination") else {
            continue;
        };

        let Some(destination_balance) = post.get(destination) else {
            tracing::debug!(tx_ref, destination, "Destination account missing from balance snapshot");
            continue;
        };

        let mint = str_field(info, "mint").unwrap_or(destination_balance.mint.as_str());
        let Some(token) = chain.tokens.token_for(mint) else {
            continue;
        };

        let Some(owner) = destination_balance.owner.as_deref() else {
            continue;
        };
        if owner != chain.recipient {
            tracing::debug!(tx_ref, %token, owner, "Token sent to another owner");
            continue;
        }

        let (amount_raw, amount_usd) = read_amount(info)?;

        let source = str_field(info, "source");
        let from = str_field(info, "authority")
            .or_else(|| str_field(info, "multisigAuthority"))
            .or_else(|| {
                source
                    .and_then(|s| pre.get(s).or_else(|| post.get(s)))
                    .and_then(|b| b.owner.as_deref())
            })
            .or(source)
            .unwrap_or_default();

        tracing::info!(
            "SPL payment verified: {} {} from {} (tx: {})",
            amount_usd,
            token,
            from,
            tx_ref
        );

        return Ok(Some(VerifiedTransfer {
            from: from.to_string(),
            to: owner.to_string(),
            amount_raw,
            amount_usd,
            token,
            block_number: transaction.slot,
            tx_ref: tx_ref.to_string(),
        }));
    }

    Ok(None)
}

fn read_amount(info: &Map<String, Value>) -> Result<(String, rust_decimal::Decimal), VerifyError> {
    if let Some(token_amount) = info.get("tokenAmount").and_then(Value::as_object) {
        let raw = str_field(token_amount, "amount");
        if let Some(ui) = str_field(token_amount, "uiAmountString") {
            let usd = amount::parse_decimal(ui)?;
            let raw = match raw {
                Some(raw) => raw.to_string(),
                None => amount::to_raw(usd, Token::DECIMALS)?,
            };
            return Ok((raw, usd));
        }
        if let Some(raw) = raw {
            return Ok((raw.to_string(), amount::to_usd(raw, Token::DECIMALS)?));
        }
    }

    let raw = str_field(info, "amount")
        .ok_or_else(|| VerifyError::Malformed("transfer instruction without amount".to_string()))?;
    Ok((raw.to_string(), amount::to_usd(raw, Token::DECIMALS)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifiers::testing::*;
    use rust_decimal::Decimal;

    const SIG: &str = "5VERv8NMvzbJMEkV8xnrLkEaWRtSz9CosKDYjCJjBRnbJLgp8uirBgmQpjKhoR4tjF3ZpRzrFmBV6UjKdiSZkQUW";
    const PAYER: &str = "PayerWa11et11111111111111111111111111111111";
    const PAYER_ATA: &str = "PayerAta111111111111111111111111111111111111";
    const MERCHANT_ATA: &str = "MerchantAta11111111111111111111111111111111";
    const OTHER_ATA: &str = "OtherAta1111111111111111111111111111111111111";

    fn transfer_checked(destination: &str, mint: &str, raw: &str, ui: &str) -> Value {
        json!({
            "program": "spl-token",
            "programId": TOKEN_PROGRAM_ID,
            "parsed": {
                "type": "transferChecked",
                "info": {
                    "source": PAYER_ATA,
                    "destination": destination,
                    "authority": PAYER,
                    "mint": mint,
                    "tokenAmount": {
                        "amount": raw,
                        "decimals": 6,
                        "uiAmount": null,
                        "uiAmountString": ui
                    }
                }
            },
            "stackHeight": null
        })
    }

    fn plain_transfer(destination: &str, raw: &str) -> Value {
        json!({
            "program": "spl-token",
            "programId": TOKEN_PROGRAM_ID,
            "parsed": {
                "type": "transfer",
                "info": {
                    "source": PAYER_ATA,
                    "destination": destination,
                    "authority": PAYER,
                    "amount": raw
                }
            },
            "stackHeight": 2
        })
    }

    fn balance(index: usize, mint: &str, owner: &str) -> Value {
        json!({
            "accountIndex": index,
            "mint": mint,
            "owner": owner,
            "programId": TOKEN_PROGRAM_ID,
            "uiTokenAmount": {"amount": "0", "decimals": 6, "uiAmount": 0.0, "uiAmountString": "0"}
        })
    }

    fn transaction(instructions: Vec<Value>, inner: Vec<Value>, post: Vec<Value>, err: Value) -> Value {
        json!({
            "slot": 287_654_321u64,
            "blockTime": 1718000000,
            "meta": {
                "err": err,
                "fee": 5000,
                "innerInstructions": [{"index": 0, "instructions": inner}],
                "preTokenBalances": [balance(1, SOL_USDC, PAYER)],
                "postTokenBalances": post,
                "logMessages": []
            },
            "transaction": {
                "signatures": [SIG],
                "message": {
                    "accountKeys": [
                        {"pubkey": PAYER, "signer": true, "writable": true, "source": "transaction"},
                        {"pubkey": PAYER_ATA, "signer": false, "writable": true, "source": "transaction"},
                        {"pubkey": MERCHANT_ATA, "signer": false, "writable": true, "source": "transaction"},
                        {"pubkey": OTHER_ATA, "signer": false, "writable": true, "source": "transaction"},
                        {"pubkey": TOKEN_PROGRAM_ID, "signer": false, "writable": false, "source": "transaction"}
                    ],
                    "instructions": instructions,
                    "recentBlockhash": "11111111111111111111111111111111"
                }
            },
            "version": 0
        })
    }

    fn parse(value: Value) -> ParsedTransaction {
        serde_json::from_value(value).unwrap()
    }

    fn chain() -> ChainConfig {
        solana_chain("http://localhost")
    }

    fn merchant_snapshot(mint: &str) -> Vec<Value> {
        vec![balance(1, mint, PAYER), balance(2, mint, SOL_RECIPIENT)]
    }

    #[test]
    fn transfer_checked_to_recipient_is_verified() {
        let tx = parse(transaction(
            vec![transfer_checked(MERCHANT_ATA, SOL_USDC, "10000000", "10")],
            vec![],
            merchant_snapshot(SOL_USDC),
            Value::Null,
        ));

        let transfer = match_transfer(&tx, &chain(), SIG).unwrap().unwrap();

        assert_eq!(transfer.token, Token::Usdc);
        assert_eq!(transfer.amount_usd, Decimal::from(10));
        assert_eq!(transfer.amount_raw, "10000000");
        assert_eq!(transfer.to, SOL_RECIPIENT);
        assert_eq!(transfer.from, PAYER);
        assert_eq!(transfer.block_number, 287_654_321);
    }

    #[test]
    fn nested_plain_transfer_resolves_mint_from_snapshot() {
        let router_call = json!({
            "programId": "JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4",
            "accounts": [],
            "data": "3Bxs4h24hBtQy9rw"
        });
        let tx = parse(transaction(
            vec![router_call],
            vec![plain_transfer(MERCHANT_ATA, "25000000")],
            merchant_snapshot(SOL_USDT),
            Value::Null,
        ));

        let transfer = match_transfer(&tx, &chain(), SIG).unwrap().unwrap();

        assert_eq!(transfer.token, Token::Usdt);
        assert_eq!(transfer.amount_usd, Decimal::from(25));
    }

    #[test]
    fn failed_transaction_is_not_found() {
        let tx = parse(transaction(
            vec![transfer_checked(MERCHANT_ATA, SOL_USDC, "10000000", "10")],
            vec![],
            merchant_snapshot(SOL_USDC),
            json!({"InstructionError": [0, {"Custom": 1}]}),
        ));

        assert!(match_transfer(&tx, &chain(), SIG).unwrap().is_none());
    }

    #[test]
    fn wrong_mint_is_not_found() {
        let other_mint = "So11111111111111111111111111111111111111112";
        let tx = parse(transaction(
            vec![transfer_checked(MERCHANT_ATA, other_mint, "10000000", "10")],
            vec![],
            merchant_snapshot(other_mint),
            Value::Null,
        ));

        assert!(match_transfer(&tx, &chain(), SIG).unwrap().is_none());
    }

    #[test]
    fn account_owned_by_someone_else_is_not_found() {
        let tx = parse(transaction(
            vec![transfer_checked(OTHER_ATA, SOL_USDC, "10000000", "10")],
            vec![],
            vec![balance(2, SOL_USDC, SOL_RECIPIENT), balance(3, SOL_USDC, PAYER)],
            Value::Null,
        ));

        assert!(match_transfer(&tx, &chain(), SIG).unwrap().is_none());
    }

    #[test]
    fn destination_without_snapshot_entry_is_skipped() {
        let tx = parse(transaction(
            vec![transfer_checked(OTHER_ATA, SOL_USDC, "10000000", "10")],
            vec![],
            vec![balance(1, SOL_USDC, PAYER)],
            Value::Null,
        ));

        assert!(match_transfer(&tx, &chain(), SIG).unwrap().is_none());
    }

    #[test]
    fn token_2022_program_is_accepted() {
        let mut ix = transfer_checked(MERCHANT_ATA, SOL_USDC, "1500000", "1.5");
        ix["programId"] = json!(TOKEN_2022_PROGRAM_ID);
        let tx = parse(transaction(vec![ix], vec![], merchant_snapshot(SOL_USDC), Value::Null));

        let transfer = match_transfer(&tx, &chain(), SIG).unwrap().unwrap();

        assert_eq!(transfer.amount_usd.to_string(), "1.5");
    }

    #[test]
    fn memo_instructions_with_string_payloads_are_ignored() {
        let memo = json!({
            "program": "spl-memo",
            "programId": "MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr",
            "parsed": "order-42"
        });
        let tx = parse(transaction(
            vec![memo, transfer_checked(MERCHANT_ATA, SOL_USDC, "10000000", "10")],
            vec![],
            merchant_snapshot(SOL_USDC),
            Value::Null,
        ));

        assert!(match_transfer(&tx, &chain(), SIG).unwrap().is_some());
    }

    #[tokio::test]
    async fn rpc_round_trip_finds_transfer() {
        let mut server = mockito::Server::new_async().await;
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": transaction(
                vec![transfer_checked(MERCHANT_ATA, SOL_USDC, "100000000", "100")],
                vec![],
                merchant_snapshot(SOL_USDC),
                Value::Null,
            )
        });
        let mock = server
            .mock("POST", "/")
            .match_body(mockito::Matcher::PartialJson(json!({"method": "getTransaction"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let verifier = SplVerifier::new(reqwest::Client::new(), Duration::from_secs(5));
        let transfer = verifier
            .verify(SIG, &solana_chain(&server.url()))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(transfer.amount_usd, Decimal::from(100));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn null_result_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":null}"#)
            .create_async()
            .await;

        let verifier = SplVerifier::new(reqwest::Client::new(), Duration::from_secs(5));
        let result = verifier.verify(SIG, &solana_chain(&server.url())).await.unwrap();

        assert!(result.is_none());
    }

    #[tokio::test]
    async fn rpc_error_object_is_raised() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32005,"message":"Node is behind"}}"#)
            .create_async()
            .await;

        let verifier = SplVerifier::new(reqwest::Client::new(), Duration::from_secs(5));
        let err = verifier
            .verify(SIG, &solana_chain(&server.url()))
            .await
            .unwrap_err();

        assert!(matches!(err, VerifyError::JsonRpc { code: -32005, .. }));
    }

    #[tokio::test]
    async fn http_failure_is_raised() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(429)
            .create_async()
            .await;

        let verifier = SplVerifier::new(reqwest::Client::new(), Duration::from_secs(5));
        let err = verifier
            .verify(SIG, &solana_chain(&server.url()))
            .await
            .unwrap_err();

        assert!(matches!(err, VerifyError::Http(_)));
    }
}
