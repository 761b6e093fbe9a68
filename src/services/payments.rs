use crate::config::Config;
use crate::error::PaymentError;
use crate::models::{NewPayment, Payer, Payment, Token, VerifiedTransfer};
use crate::services::plan::resolve_plan;
use crate::services::store::PaymentStore;
use crate::services::webhook::WebhookNotifier;
use crate::verifiers::Dispatcher;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitPayment {
    pub tx_ref: String,
    pub chain: String,
    pub token: Token,
    pub identity_type: String,
    pub user_id: String,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub callback_url: Option<String>,
}

pub struct PaymentService {
    config: Arc<Config>,
    dispatcher: Dispatcher,
    store: Arc<dyn PaymentStore>,
    notifier: WebhookNotifier,
}

impl PaymentService {
    pub fn new(config: Arc<Config>, store: Arc<dyn PaymentStore>) -> Self {
        let dispatcher = Dispatcher::from_config(&config);
        let notifier = WebhookNotifier::new(config.webhook_secret.clone(), config.chain_call_timeout);
        Self {
            config,
            dispatcher,
            store,
            notifier,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &dyn PaymentStore {
        self.store.as_ref()
    }

    pub async fn submit(&self, request: SubmitPayment) -> Result<Payment, PaymentError> {
        if request.tx_ref.trim().is_empty() {
            return Err(PaymentError::InvalidRequest("tx_ref is required".to_string()));
        }
        let Some(chain) = self.config.chain(&request.chain) else {
            return Err(PaymentError::UnsupportedChain(request.chain));
        };

        // Spellings of one transaction must share a single claim.
        let tx_ref = self
            .dispatcher
            .canonical_ref(chain, &request.tx_ref)
            .ok_or_else(|| {
                PaymentError::InvalidRequest(format!(
                    "tx_ref is not a valid {} transaction reference",
                    chain.id
                ))
            })?;

        // Claimed before any chain call, so in-flight duplicates are rejected too.
        let pending = self
            .store
            .create_pending(NewPayment {
                tx_ref: tx_ref.clone(),
                chain: request.chain.clone(),
                payer: Payer {
                    identity_type: request.identity_type.clone(),
                    user_id: request.user_id.clone(),
                },
                claimed_token: request.token,
            })
            .await?;

        tracing::debug!(payment_id = %pending.id, chain = %pending.chain, tx_ref = %pending.tx_ref, "Payment pending");

        let outcome = self
            .dispatcher
            .verify(&tx_ref, &request.chain, &self.config)
            .await;

        match outcome {
            Ok(Some(transfer)) => self.complete(pending, transfer, request).await,
            Ok(None) => {
                let payment = self.store.mark_failed(pending.id).await?;
                tracing::info!(payment_id = %payment.id, tx_ref = %payment.tx_ref, "No qualifying transfer found");
                Err(PaymentError::TransferNotFound(Box::new(payment)))
            }
            Err(source) => {
                let payment = self.store.mark_failed(pending.id).await?;
                tracing::warn!(payment_id = %payment.id, error = %source, "Verification failed");
                Err(PaymentError::Upstream {
                    payment: Box::new(payment),
                    source,
                })
            }
        }
    }

    async fn complete(
        &self,
        pending: Payment,
        transfer: VerifiedTransfer,
        request: SubmitPayment,
    ) -> Result<Payment, PaymentError> {
        let plan = self.plan_for(&transfer, request.plan.as_deref());
        let payment = match self.store.mark_verified(pending.id, &transfer, plan).await {
            Ok(payment) => payment,
            Err(e) => {
                tracing::error!(payment_id = %pending.id, "Failed to record verified payment: {}", e);
                // A claim must not stay pending.
                if let Err(fail_err) = self.store.mark_failed(pending.id).await {
                    tracing::error!(payment_id = %pending.id, "Payment left pending: {}", fail_err);
                }
                return Err(e.into());
            }
        };

        if transfer.token != request.token {
            tracing::info!(
                payment_id = %payment.id,
                claimed = %request.token,
                actual = %transfer.token,
                "Claimed token differs from transferred token"
            );
        }

        tracing::info!(
            "Payment verified: {} {} on {} (tx: {}, plan: {:?})",
            transfer.amount_usd,
            transfer.token,
            payment.chain,
            payment.tx_ref,
            payment.plan
        );

        if let Some(url) = request.callback_url {
            if self.config.webhook_secret.is_some() {
                // Detached: the response does not wait on delivery.
                drop(self.notifier.dispatch(url, payment.clone()));
            } else {
                tracing::warn!(payment_id = %payment.id, "Callback requested but WEBHOOK_SECRET is not set");
            }
        }

        Ok(payment)
    }

    fn plan_for(&self, transfer: &VerifiedTransfer, claimed: Option<&str>) -> Option<String> {
        resolve_plan(transfer.amount_usd, &self.config.plans)
            .map(|tier| tier.name.clone())
            .or_else(|| {
                claimed
                    .filter(|name| self.config.plans.iter().any(|tier| tier.name == *name))
                    .map(str::to_string)
            })
    }

    pub async fn find(&self, chain: &str, tx_ref: &str) -> Result<Payment, PaymentError> {
        let key = self
            .config
            .chain(chain)
            .and_then(|config| self.dispatcher.canonical_ref(config, tx_ref))
            .unwrap_or_else(|| tx_ref.to_string());

        self.store
            .find_by(&key, chain)
            .await?
            .ok_or_else(|| PaymentError::UnknownPayment {
                chain: chain.to_string(),
                tx_ref: tx_ref.to_string(),
            })
    }
}
