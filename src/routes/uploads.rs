use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;

use crate::{
    error::{Error, Result},
    models::user::{Caller, Role},
    AppState,
};

/// Accepts one image in the multipart `file` field and returns its public URL.
#[axum::debug_handler]
pub async fn upload_image(
    State(state): State<AppState>,
    caller: Caller,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    caller.require(Role::Teacher)?;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("image").to_string();
        let data = field.bytes().await?;
        let url = state.object_storage.store(&file_name, data).await?;
        tracing::info!(url = %url, uploaded_by = caller.id, "image stored");
        return Ok((StatusCode::CREATED, Json(json!({ "url": url }))));
    }

    Err(Error::InvalidInput("multipart field 'file' is required".into()))
}
