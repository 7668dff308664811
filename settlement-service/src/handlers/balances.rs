use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;

use crate::{
    middleware::TenantContext,
    services::balance::{FinanceSummary, StudentBalance},
    AppState,
};

pub async fn student_balance(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(student_id): Path<String>,
) -> Result<Json<StudentBalance>, AppError> {
    Ok(Json(
        state
            .balances
            .student_balance(&ctx.tenant_id, &ctx.actor, &student_id)
            .await?,
    ))
}

pub async fn finance_summary(
    State(state): State<AppState>,
    ctx: TenantContext,
) -> Result<Json<FinanceSummary>, AppError> {
    Ok(Json(
        state
            .balances
            .tenant_summary(&ctx.tenant_id, &ctx.actor)
            .await?,
    ))
}
