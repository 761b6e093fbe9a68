use crate::models::{Payment, PaymentStatus, Token};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";
pub const EVENT_PAYMENT_VERIFIED: &str = "payment.verified";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookPayload {
    pub event: String,
    pub payment_id: Uuid,
    pub identity_type: String,
    pub user_id: String,
    pub chain: String,
    pub token: Token,
    pub amount_usd: Decimal,
    pub amount_raw: String,
    pub tx_ref: String,
    pub from: String,
    pub to: String,
    pub block_number: u64,
    pub plan: Option<String>,
    pub timestamp: i64,
}

impl WebhookPayload {
    pub fn for_payment(payment: &Payment, timestamp: i64) -> Option<Self> {
        if payment.status != PaymentStatus::Verified {
            return None;
        }

        Some(Self {
            event: EVENT_PAYMENT_VERIFIED.to_string(),
            payment_id: payment.id,
            identity_type: payment.payer.identity_type.clone(),
            user_id: payment.payer.user_id.clone(),
            chain: payment.chain.clone(),
            token: payment.token?,
            amount_usd: payment.amount_usd?,
            amount_raw: payment.amount_raw.clone()?,
            tx_ref: payment.tx_ref.clone(),
            from: payment.from_address.clone()?,
            to: payment.to_address.clone()?,
            block_number: payment.block_number?,
            plan: payment.plan.clone(),
            timestamp,
        })
    }
}

pub fn sign(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .context("failed to initialize webhook hmac signer")?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[derive(Debug, Clone)]
pub struct SignedWebhook {
    pub body: Vec<u8>,
    pub signature: String,
    pub timestamp: i64,
}

impl SignedWebhook {
    pub fn new(payload: &WebhookPayload, secret: &str) -> Result<Self> {
        let body = serde_json::to_vec(payload)?;
        let signature = sign(secret, &body)?;
        Ok(Self {
            body,
            signature,
            timestamp: payload.timestamp,
        })
    }
}

#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    secret: Option<String>,
}

impl WebhookNotifier {
    pub fn new(secret: Option<String>, timeout: Duration) -> Self {
        let client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("Webhook client built without {:?} timeout: {}", timeout, e);
                reqwest::Client::new()
            }
        };
        Self { client, secret }
    }

    pub async fn deliver(&self, url: &str, payment: &Payment) -> Result<()> {
        let Some(secret) = self.secret.as_deref() else {
            bail!("WEBHOOK_SECRET not configured");
        };
        let payload = WebhookPayload::for_payment(payment, Utc::now().timestamp())
            .context("payment is not verified")?;
        let signed = SignedWebhook::new(&payload, secret)?;

        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, &signed.signature)
            .header(TIMESTAMP_HEADER, signed.timestamp.to_string())
            .body(signed.body)
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("webhook endpoint returned {}", response.status());
        }

        tracing::debug!(payment_id = %payment.id, url, "Webhook delivered");
        Ok(())
    }

    /// Spawns delivery on a detached task. Failures are logged, never returned.
    pub fn dispatch(&self, url: String, payment: Payment) -> JoinHandle<()> {
        let notifier = self.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.deliver(&url, &payment).await {
                tracing::error!(payment_id = %payment.id, url = %url, "Webhook delivery failed: {:#}", e);
            }
        })
    }
}
