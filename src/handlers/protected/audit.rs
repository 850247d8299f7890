use axum::extract::{Path, State};

use crate::audit::AuditEntry;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::state::AppState;

/// GET /api/audit/:table/:id - audit trail of one record, oldest first
pub async fn history(
    State(state): State<AppState>,
    Path((table, id)): Path<(String, i64)>,
) -> ApiResult<Vec<AuditEntry>> {
    if !state.identity.is_entity(&table) {
        return Err(ApiError::bad_request(format!("'{}' has no audit trail", table)));
    }

    let mut uow = state.db.begin().await?;
    let entries = state.audit.history(&mut *uow, &table, id).await?;
    uow.rollback().await?;
    Ok(ApiResponse::success(entries))
}
