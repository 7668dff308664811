//! Payment ledger endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::{
    dtos::{CreatePaymentRequest, ListPaymentsQuery, Paginated, VoidPaymentRequest},
    middleware::TenantContext,
    models::{Payment, PaymentStatus},
    AppState,
};

/// Record a payment. Settled payments answer 201; collections still waiting
/// on the gateway answer 202.
pub async fn create_payment(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(payload): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<Payment>), AppError> {
    payload.validate()?;
    tracing::info!(
        tenant_id = %ctx.tenant_id,
        student_id = %payload.student_id,
        method = payload.method.as_str(),
        amount = %payload.amount,
        "Recording payment"
    );

    let payment = state
        .ledger
        .create_payment(&ctx.tenant_id, &ctx.actor, payload.into())
        .await?;
    let status = match payment.status {
        PaymentStatus::Completed => StatusCode::CREATED,
        _ => StatusCode::ACCEPTED,
    };
    Ok((status, Json(payment)))
}

pub async fn list_payments(
    State(state): State<AppState>,
    ctx: TenantContext,
    Query(query): Query<ListPaymentsQuery>,
) -> Result<Json<Paginated<Payment>>, AppError> {
    query.validate()?;
    let paging = query.paging();
    let (items, total) = state
        .ledger
        .list_payments(&ctx.tenant_id, &ctx.actor, &query.filter())
        .await?;
    Ok(Json(Paginated {
        items,
        total,
        page: paging.page(),
        page_size: paging.page_size(),
    }))
}

pub async fn get_payment(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
) -> Result<Json<Payment>, AppError> {
    Ok(Json(
        state.ledger.get_payment(&ctx.tenant_id, &ctx.actor, &id).await?,
    ))
}

pub async fn void_payment(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
    Json(payload): Json<VoidPaymentRequest>,
) -> Result<Json<Payment>, AppError> {
    payload.validate()?;
    let payment = state
        .ledger
        .void_payment(&ctx.tenant_id, &ctx.actor, &id, &payload.reason)
        .await?;
    Ok(Json(payment))
}
