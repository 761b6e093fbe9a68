use crate::error::StoreError;
use crate::models::{NewPayment, Payment, VerifiedTransfer};
use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Atomically claims (chain, tx_ref). A second claim fails with
    /// [`StoreError::Conflict`] carrying the existing record.
    async fn create_pending(&self, new: NewPayment) -> Result<Payment, StoreError>;

    async fn mark_verified(
        &self,
        id: Uuid,
        transfer: &VerifiedTransfer,
        plan: Option<String>,
    ) -> Result<Payment, StoreError>;

    async fn mark_failed(&self, id: Uuid) -> Result<Payment, StoreError>;

    async fn find_by(&self, tx_ref: &str, chain: &str) -> Result<Option<Payment>, StoreError>;

    async fn ping(&self) -> bool;

    fn backend(&self) -> &'static str;
}

fn ensure_pending(payment: &Payment) -> Result<(), StoreError> {
    if payment.status.is_terminal() {
        return Err(StoreError::InvalidTransition {
            id: payment.id,
            status: format!("{:?}", payment.status).to_lowercase(),
        });
    }
    Ok(())
}

#[derive(Default)]
struct MemoryState {
    records: HashMap<Uuid, Payment>,
    claims: HashMap<(String, String), Uuid>,
}

#[derive(Default)]
pub struct MemoryPaymentStore {
    state: RwLock<MemoryState>,
}

impl MemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn transition<F>(&self, id: Uuid, apply: F) -> Result<Payment, StoreError>
    where
        F: FnOnce(&mut Payment) + Send,
    {
        let mut state = self.state.write().await;
        let payment = state.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        ensure_pending(payment)?;
        apply(payment);
        Ok(payment.clone())
    }
}

#[async_trait]
impl PaymentStore for MemoryPaymentStore {
    async fn create_pending(&self, new: NewPayment) -> Result<Payment, StoreError> {
        let key = (new.chain.clone(), new.tx_ref.clone());
        let mut state = self.state.write().await;

        if let Some(existing) = state.claims.get(&key).and_then(|id| state.records.get(id)) {
            return Err(StoreError::Conflict(Box::new(existing.clone())));
        }

        let payment = Payment::pending(new);
        state.claims.insert(key, payment.id);
        state.records.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn mark_verified(
        &self,
        id: Uuid,
        transfer: &VerifiedTransfer,
        plan: Option<String>,
    ) -> Result<Payment, StoreError> {
        self.transition(id, |p| p.apply_verified(transfer, plan)).await
    }

    async fn mark_failed(&self, id: Uuid) -> Result<Payment, StoreError> {
        self.transition(id, Payment::apply_failed).await
    }

    async fn find_by(&self, tx_ref: &str, chain: &str) -> Result<Option<Payment>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .claims
            .get(&(chain.to_string(), tx_ref.to_string()))
            .and_then(|id| state.records.get(id))
            .cloned())
    }

    async fn ping(&self) -> bool {
        true
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

pub struct RedisPaymentStore {
    redis: redis::aio::ConnectionManager,
}

impl RedisPaymentStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let redis = client.get_connection_manager().await?;
        tracing::info!("Redis connected successfully");
        Ok(Self { redis })
    }

    fn claim_key(chain: &str, tx_ref: &str) -> String {
        format!("payment:claim:{}:{}", chain, tx_ref)
    }

    fn record_key(id: Uuid) -> String {
        format!("payment:record:{}", id)
    }

    async fn load(&self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        let mut redis = self.redis.clone();
        let raw: Option<String> = redis.get(Self::record_key(id)).await?;
        raw.map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(Into::into)
    }

    async fn save(&self, payment: &Payment) -> Result<(), StoreError> {
        let mut redis = self.redis.clone();
        let json = serde_json::to_string(payment)?;
        redis.set::<_, _, ()>(Self::record_key(payment.id), json).await?;
        Ok(())
    }

    async fn claimed_id(&self, chain: &str, tx_ref: &str) -> Result<Option<Uuid>, StoreError> {
        let mut redis = self.redis.clone();
        let raw: Option<String> = redis.get(Self::claim_key(chain, tx_ref)).await?;
        Ok(raw.and_then(|id| Uuid::parse_str(&id).ok()))
    }

    async fn transition<F>(&self, id: Uuid, apply: F) -> Result<Payment, StoreError>
    where
        F: FnOnce(&mut Payment) + Send,
    {
        let mut payment = self.load(id).await?.ok_or(StoreError::NotFound(id))?;
        ensure_pending(&payment)?;
        apply(&mut payment);
        self.save(&payment).await?;
        Ok(payment)
    }
}

#[async_trait]
impl PaymentStore for RedisPaymentStore {
    async fn create_pending(&self, new: NewPayment) -> Result<Payment, StoreError> {
        let claim = Self::claim_key(&new.chain, &new.tx_ref);
        let payment = Payment::pending(new);

        // Record first, so a losing racer always finds the winner's record.
        self.save(&payment).await?;

        let mut redis = self.redis.clone();
        let claimed: bool = redis.set_nx(&claim, payment.id.to_string()).await?;
        if claimed {
            return Ok(payment);
        }

        redis.del::<_, ()>(Self::record_key(payment.id)).await?;
        let existing_id = self
            .claimed_id(&payment.chain, &payment.tx_ref)
            .await?
            .ok_or(StoreError::NotFound(payment.id))?;
        let existing = self
            .load(existing_id)
            .await?
            .ok_or(StoreError::NotFound(existing_id))?;
        Err(StoreError::Conflict(Box::new(existing)))
    }

    async fn mark_verified(
        &self,
        id: Uuid,
        transfer: &VerifiedTransfer,
        plan: Option<String>,
    ) -> Result<Payment, StoreError> {
        self.transition(id, |p| p.apply_verified(transfer, plan)).await
    }

    async fn mark_failed(&self, id: Uuid) -> Result<Payment, StoreError> {
        self.transition(id, Payment::apply_failed).await
    }

    async fn find_by(&self, tx_ref: &str, chain: &str) -> Result<Option<Payment>, StoreError> {
        match self.claimed_id(chain, tx_ref).await? {
            Some(id) => self.load(id).await,
            None => Ok(None),
        }
    }

    async fn ping(&self) -> bool {
        let mut redis = self.redis.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut redis)
            .await
            .is_ok()
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
