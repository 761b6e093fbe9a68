use super::{Token, VerifiedTransfer};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Verified,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payer {
    pub identity_type: String,
    pub user_id: String,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub tx_ref: String,
    pub chain: String,
    pub payer: Payer,
    pub claimed_token: Token,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub tx_ref: String,
    pub chain: String,
    pub payer: Payer,
    pub claimed_token: Token,
    pub status: PaymentStatus,
    pub plan: Option<String>,

    // Authoritative values, set only on the verified transition.
    pub token: Option<Token>,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    pub amount_raw: Option<String>,
    pub amount_usd: Option<Decimal>,
    pub block_number: Option<u64>,

    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn pending(new: NewPayment) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx_ref: new.tx_ref,
            chain: new.chain,
            payer: new.payer,
            claimed_token: new.claimed_token,
            status: PaymentStatus::Pending,
            plan: None,
            token: None,
            from_address: None,
            to_address: None,
            amount_raw: None,
            amount_usd: None,
            block_number: None,
            created_at: Utc::now(),
            verified_at: None,
        }
    }

    pub fn apply_verified(&mut self, transfer: &VerifiedTransfer, plan: Option<String>) {
        self.status = PaymentStatus::Verified;
        self.plan = plan;
        self.token = Some(transfer.token);
        self.from_address = Some(transfer.from.clone());
        self.to_address = Some(transfer.to.clone());
        self.amount_raw = Some(transfer.amount_raw.clone());
        self.amount_usd = Some(transfer.amount_usd);
        self.block_number = Some(transfer.block_number);
        self.verified_at = Some(Utc::now());
    }

    pub fn apply_failed(&mut self) {
        self.status = PaymentStatus::Failed;
    }
}
