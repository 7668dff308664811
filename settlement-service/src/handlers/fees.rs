//! Fee catalog and cohort assignment endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::{
    dtos::{
        AssignFeeRequest, CreateFeeTemplateRequest, CreateScholarshipRequest,
        UpdateFeeTemplateRequest,
    },
    middleware::TenantContext,
    models::{FeeTemplate, Scholarship},
    services::AssignmentReport,
    AppState,
};

pub async fn create_fee_template(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(payload): Json<CreateFeeTemplateRequest>,
) -> Result<(StatusCode, Json<FeeTemplate>), AppError> {
    payload.validate()?;
    let template = state
        .fees
        .create_fee_template(&ctx.tenant_id, &ctx.actor, payload.into())
        .await?;
    Ok((StatusCode::CREATED, Json(template)))
}

pub async fn list_fee_templates(
    State(state): State<AppState>,
    ctx: TenantContext,
) -> Result<Json<Vec<FeeTemplate>>, AppError> {
    Ok(Json(state.fees.list_fee_templates(&ctx.tenant_id).await?))
}

pub async fn get_fee_template(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
) -> Result<Json<FeeTemplate>, AppError> {
    Ok(Json(state.fees.get_fee_template(&ctx.tenant_id, &id).await?))
}

pub async fn update_fee_template(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
    Json(payload): Json<UpdateFeeTemplateRequest>,
) -> Result<Json<FeeTemplate>, AppError> {
    payload.validate()?;
    let template = state
        .fees
        .update_fee_template(&ctx.tenant_id, &ctx.actor, &id, payload.into())
        .await?;
    Ok(Json(template))
}

pub async fn delete_fee_template(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state
        .fees
        .delete_fee_template(&ctx.tenant_id, &ctx.actor, &id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_scholarship(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(payload): Json<CreateScholarshipRequest>,
) -> Result<(StatusCode, Json<Scholarship>), AppError> {
    payload.validate()?;
    let scholarship = state
        .fees
        .create_scholarship(
            &ctx.tenant_id,
            &ctx.actor,
            payload.name,
            payload.discount_percentage,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(scholarship)))
}

/// Assign a fee template to every active student in a class. Per-student
/// failures are reported in the body, not as an error status.
pub async fn assign_fee_to_class(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(payload): Json<AssignFeeRequest>,
) -> Result<Json<AssignmentReport>, AppError> {
    payload.validate()?;
    tracing::info!(
        tenant_id = %ctx.tenant_id,
        fee_template_id = %payload.fee_template_id,
        class_id = %payload.class_id,
        "Assigning fee to class"
    );
    let report = state
        .assignments
        .assign_fee_to_class(
            &ctx.tenant_id,
            &ctx.actor,
            &payload.fee_template_id,
            &payload.class_id,
            payload.due_date,
        )
        .await?;
    Ok(Json(report))
}
