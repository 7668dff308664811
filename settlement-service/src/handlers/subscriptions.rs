//! Tenant subscription billing endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::{
    dtos::{MobileMoneySubscriptionRequest, PageQuery, Paginated, UpgradeSubscriptionRequest},
    middleware::TenantContext,
    models::{SubscriptionPayment, SubscriptionPlan, TenantSubscription},
    AppState,
};

pub async fn get_subscription(
    State(state): State<AppState>,
    ctx: TenantContext,
) -> Result<Json<TenantSubscription>, AppError> {
    Ok(Json(
        state.subscriptions.get_subscription(&ctx.tenant_id).await?,
    ))
}

pub async fn list_plans(
    State(state): State<AppState>,
    _ctx: TenantContext,
) -> Result<Json<Vec<SubscriptionPlan>>, AppError> {
    Ok(Json(state.subscriptions.list_plans().await?))
}

/// Start an upgrade paid outside the gateway. An administrator confirms it
/// once funds are received.
pub async fn initiate_upgrade(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(payload): Json<UpgradeSubscriptionRequest>,
) -> Result<(StatusCode, Json<SubscriptionPayment>), AppError> {
    payload.validate()?;
    let payment = state
        .subscriptions
        .initiate_upgrade(
            &ctx.tenant_id,
            &ctx.actor,
            &payload.plan_id,
            payload.billing_cycle,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

pub async fn pay_with_mobile_money(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(payload): Json<MobileMoneySubscriptionRequest>,
) -> Result<(StatusCode, Json<SubscriptionPayment>), AppError> {
    payload.validate()?;
    tracing::info!(
        tenant_id = %ctx.tenant_id,
        plan_id = %payload.plan_id,
        operator = ?payload.operator,
        "Initiating subscription collection"
    );
    let payment = state
        .subscriptions
        .pay_with_mobile_money(
            &ctx.tenant_id,
            &ctx.actor,
            &payload.plan_id,
            payload.billing_cycle,
            &payload.phone_number,
            payload.operator,
        )
        .await?;
    Ok((StatusCode::ACCEPTED, Json(payment)))
}

pub async fn confirm_payment(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
) -> Result<Json<SubscriptionPayment>, AppError> {
    Ok(Json(
        state
            .subscriptions
            .confirm_payment(&ctx.tenant_id, &ctx.actor, &id)
            .await?,
    ))
}

pub async fn list_subscription_payments(
    State(state): State<AppState>,
    ctx: TenantContext,
    Query(paging): Query<PageQuery>,
) -> Result<Json<Paginated<SubscriptionPayment>>, AppError> {
    paging.validate()?;
    let (items, total) = state
        .subscriptions
        .list_subscription_payments(
            &ctx.tenant_id,
            &ctx.actor,
            paging.page_size(),
            paging.offset(),
        )
        .await?;
    Ok(Json(Paginated {
        items,
        total,
        page: paging.page(),
        page_size: paging.page_size(),
    }))
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    ctx: TenantContext,
) -> Result<Json<TenantSubscription>, AppError> {
    Ok(Json(
        state
            .subscriptions
            .cancel_subscription(&ctx.tenant_id, &ctx.actor)
            .await?,
    ))
}
