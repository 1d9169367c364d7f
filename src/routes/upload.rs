//! File upload endpoint
//!
//! Accepts one file and a chat id as multipart form data, spools the file to
//! disk, forwards it to the backend and removes it again whatever happens.

use std::sync::Arc;

use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    Extension, Json,
};
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument};

use crate::{
    error::{AppError, AppResult},
    middleware::Credential,
    routes::metrics::record_upload,
    upload::{spool, TempUpload},
    AppState,
};

/// POST /api/upload
#[instrument(skip_all)]
pub async fn upload(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<Json<Value>> {
    let mut multipart =
        multipart.map_err(|e| AppError::Validation(format!("Expected a multipart body: {}", e.body_text())))?;

    let mut file: Option<TempUpload> = None;
    let mut chat_id: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                if file.is_some() {
                    record_upload("rejected");
                    return Err(AppError::Validation(
                        "Exactly one file must be uploaded".to_string(),
                    ));
                }
                let original_name = field.file_name().map(str::to_string);
                file = Some(
                    spool(
                        &state.config.upload_dir,
                        original_name.as_deref(),
                        field,
                        state.config.max_upload_bytes,
                    )
                    .await?,
                );
            }
            Some("chat_id") => chat_id = Some(field.text().await?.trim().to_string()),
            other => debug!(field = ?other, "Ignoring unexpected multipart field"),
        }
    }

    let Some(upload) = file else {
        record_upload("rejected");
        return Err(AppError::Validation("file is required".to_string()));
    };
    let chat_id = match chat_id {
        Some(id) if !id.is_empty() => id,
        _ => {
            record_upload("rejected");
            return Err(AppError::Validation("chat_id is required".to_string()));
        }
    };

    info!(
        chat_id = %chat_id,
        bytes = upload.size(),
        token_fp = %credential.fingerprint(),
        "Forwarding upload"
    );

    let result = state
        .backend
        .process_upload(&credential, &chat_id, upload.path(), upload.file_name())
        .await;

    let path = upload.path().to_path_buf();
    if let Err(e) = upload.remove().await {
        error!(path = %path.display(), error = %e, "Failed to remove spooled upload");
    }

    match result {
        Ok(processed) => {
            record_upload("success");
            info!(chat_id = %chat_id, "Upload processed");
            Ok(Json(json!({ "success": true, "result": processed })))
        }
        Err(e) => {
            record_upload("failed");
            Err(e)
        }
    }
}
