use axum::extract::{Multipart, State};
use axum::Extension;
use serde::de::DeserializeOwned;

use crate::audit::Actor;
use crate::error::ApiError;
use crate::inventory::{AltaInput, BajaInput, BatchResult};
use crate::middleware::{ApiResponse, ApiResult};
use crate::state::AppState;
use crate::storage::FileUpload;

/// POST /api/inventory/alta - multipart `payload` (JSON) + `file`
pub async fn alta(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    multipart: Multipart,
) -> ApiResult<BatchResult> {
    let (mut input, file) = read_submission::<AltaInput>(multipart).await?;
    input.file = file;
    let result = state.orchestrator.create_alta_batch(input, &actor).await?;
    Ok(ApiResponse::created(result))
}

/// POST /api/inventory/baja - multipart `payload` (JSON) + `file`
pub async fn baja(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    multipart: Multipart,
) -> ApiResult<BatchResult> {
    let (mut input, file) = read_submission::<BajaInput>(multipart).await?;
    input.file = file;
    let result = state.orchestrator.create_baja_batch(input, &actor).await?;
    Ok(ApiResponse::created(result))
}

async fn read_submission<T: DeserializeOwned>(mut multipart: Multipart) -> Result<(T, Option<FileUpload>), ApiError> {
    let mut payload = None;
    let mut file = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {}", e)))?
    {
        match field.name() {
            Some("payload") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Unreadable payload part: {}", e)))?;
                let parsed = serde_json::from_str::<T>(&text)
                    .map_err(|e| ApiError::invalid_json(format!("Invalid payload: {}", e)))?;
                payload = Some(parsed);
            }
            Some("file") => {
                let original_name = field.file_name().unwrap_or("attachment").to_string();
                let mime_type = field.content_type().unwrap_or("application/octet-stream").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Unreadable file part: {}", e)))?;
                file = Some(FileUpload::new(bytes.to_vec(), original_name, mime_type));
            }
            other => tracing::debug!("Ignoring multipart field {:?}", other),
        }
    }

    let payload = payload.ok_or_else(|| ApiError::bad_request("Missing 'payload' part"))?;
    Ok((payload, file))
}
