use crate::models::Payment;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const TRANSFER_NOT_FOUND_MESSAGE: &str = "transfer not found or not to configured wallet";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("Invalid integer amount: {0}")]
    InvalidInteger(String),

    #[error("Invalid decimal amount: {0}")]
    InvalidDecimal(String),

    #[error("Amount out of range: {0}")]
    Overflow(String),
}

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("Unsupported chain: {0}")]
    UnsupportedChain(String),

    #[error("RPC error: {0}")]
    Rpc(#[from] ethers::providers::ProviderError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON-RPC error {code}: {message}")]
    JsonRpc { code: i64, message: String },

    #[error("Indexer returned {status} for {endpoint}")]
    Indexer { status: u16, endpoint: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Chain call to {chain} timed out after {secs}s")]
    Timeout { chain: String, secs: u64 },

    #[error("Invalid chain configuration: {0}")]
    InvalidConfig(String),

    #[error("Amount error: {0}")]
    Amount(#[from] AmountError),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Payment already submitted for {} on {}", .0.tx_ref, .0.chain)]
    Conflict(Box<Payment>),

    #[error("Payment not found: {0}")]
    NotFound(Uuid),

    #[error("Payment {id} is already {status}")]
    InvalidTransition { id: Uuid, status: String },

    #[error("Store backend error: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unsupported chain: {0}")]
    UnsupportedChain(String),

    #[error("Payment already submitted for {} on {}", .0.tx_ref, .0.chain)]
    Conflict(Box<Payment>),

    #[error("{}", TRANSFER_NOT_FOUND_MESSAGE)]
    TransferNotFound(Box<Payment>),

    #[error("Verification unavailable: {source}")]
    Upstream {
        payment: Box<Payment>,
        #[source]
        source: VerifyError,
    },

    #[error("No payment for {tx_ref} on {chain}")]
    UnknownPayment { chain: String, tx_ref: String },

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for PaymentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(existing) => PaymentError::Conflict(existing),
            other => PaymentError::Store(other),
        }
    }
}

impl PaymentError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PaymentError::InvalidRequest(_) | PaymentError::UnsupportedChain(_) => {
                StatusCode::BAD_REQUEST
            }
            PaymentError::Conflict(_) => StatusCode::CONFLICT,
            PaymentError::UnknownPayment { .. } => StatusCode::NOT_FOUND,
            PaymentError::TransferNotFound(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PaymentError::Upstream { source, .. } => match source {
                VerifyError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::BAD_GATEWAY,
            },
            PaymentError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            PaymentError::InvalidRequest(_) => "INVALID_REQUEST",
            PaymentError::UnsupportedChain(_) => "UNSUPPORTED_CHAIN",
            PaymentError::Conflict(_) => "DUPLICATE_TRANSACTION",
            PaymentError::UnknownPayment { .. } => "PAYMENT_NOT_FOUND",
            PaymentError::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            PaymentError::Upstream { .. } => "VERIFICATION_UNAVAILABLE",
            PaymentError::Store(_) => "INTERNAL_ERROR",
        }
    }

    pub fn payment(&self) -> Option<&Payment> {
        match self {
            PaymentError::Conflict(p) | PaymentError::TransferNotFound(p) => Some(p),
            PaymentError::Upstream { payment, .. } => Some(payment),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub error_code: String,
    pub timestamp: chrono::DateTime<Utc>,
    pub request_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<Payment>,
}

impl IntoResponse for PaymentError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();

        if status.is_server_error() {
            tracing::error!(error = ?self, error_code = error_code, "Payment request failed");
        } else {
            tracing::info!(error = %self, error_code = error_code, "Payment request rejected");
        }

        let body = ErrorResponse {
            success: false,
            error: self.to_string(),
            error_code: error_code.to_string(),
            timestamp: Utc::now(),
            request_id: Uuid::new_v4().to_string(),
            payment: self.payment().cloned(),
        };

        (status, Json(body)).into_response()
    }
}
