use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Token {
    Usdt,
    Usdc,
}

impl Token {
    pub const DECIMALS: u32 = 6;

    pub fn as_str(&self) -> &'static str {
        match self {
            Token::Usdt => "usdt",
            Token::Usdc => "usdc",
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedTransfer {
    pub from: String,
    pub to: String,
    pub amount_raw: String,
    pub amount_usd: Decimal,
    pub token: Token,
    pub block_number: u64,
    pub tx_ref: String,
}
