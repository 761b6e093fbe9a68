use crate::{
    error::PaymentError,
    models::{ApiResponse, Payment},
    services::{PaymentService, SubmitPayment},
};
use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub payments: Arc<PaymentService>,
}

pub async fn submit_payment(
    State(state): State<AppState>,
    Json(request): Json<SubmitPayment>,
) -> Result<Json<ApiResponse<Payment>>, PaymentError> {
    let payment = state.payments.submit(request).await?;
    Ok(Json(ApiResponse::ok(payment)))
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path((chain, tx_ref)): Path<(String, String)>,
) -> Result<Json<ApiResponse<Payment>>, PaymentError> {
    let payment = state.payments.find(&chain, &tx_ref).await?;
    Ok(Json(ApiResponse::ok(payment)))
}
