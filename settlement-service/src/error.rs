//! Domain errors for the settlement engine.

use service_core::error::AppError;
use thiserror::Error;

use crate::services::gateway::GatewayError;
use crate::services::store::StoreError;

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("{0}")]
    Conflict(String),

    /// The gateway and the ledger disagree about what exists.
    #[error("integrity fault: {0}")]
    IntegrityFault(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type SettlementResult<T> = Result<T, SettlementError>;

impl SettlementError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        SettlementError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

impl From<SettlementError> for AppError {
    fn from(err: SettlementError) -> Self {
        match err {
            SettlementError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            SettlementError::Unauthorized(msg) => AppError::Forbidden(anyhow::anyhow!(msg)),
            err @ SettlementError::NotFound { .. } => AppError::NotFound(anyhow::anyhow!(err)),
            SettlementError::Gateway(e) => AppError::UpstreamRejected(e.to_string()),
            SettlementError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            err @ SettlementError::IntegrityFault(_) => AppError::NotFound(anyhow::anyhow!(err)),
            SettlementError::Store(e) => AppError::DatabaseError(anyhow::anyhow!(e)),
        }
    }
}
