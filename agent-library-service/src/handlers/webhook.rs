use axum::{extract::State, response::IntoResponse, Json};
use chrono::Utc;
use service_core::error::AppError;

use crate::{
    dtos::webhook::{
        DeletedUserData, WebhookAck, WebhookEvent, WebhookUserData, USER_CREATED, USER_DELETED,
        USER_UPDATED,
    },
    models::UserProfile,
    AppState,
};

/// Mirror identity provider user lifecycle events into the local store.
/// Signature verification happens in middleware before this runs.
pub async fn handle_webhook(
    State(state): State<AppState>,
    Json(event): Json<WebhookEvent>,
) -> Result<impl IntoResponse, AppError> {
    metrics::counter!("webhook_events_total", "type" => event.event_type.clone()).increment(1);

    match event.event_type.as_str() {
        USER_CREATED | USER_UPDATED => {
            let data: WebhookUserData = serde_json::from_value(event.data).map_err(|e| {
                AppError::BadRequest(anyhow::anyhow!("Invalid user payload: {}", e))
            })?;
            let profile = UserProfile::from(data);
            let user = state.users.upsert_profile(profile, Utc::now()).await?;
            tracing::info!(event = %event.event_type, user_id = %user.clerk_id, "User synced from webhook");
            Ok(Json(WebhookAck {
                success: true,
                deleted: None,
            }))
        }
        USER_DELETED => {
            let data: DeletedUserData = serde_json::from_value(event.data).map_err(|e| {
                AppError::BadRequest(anyhow::anyhow!("Invalid deletion payload: {}", e))
            })?;
            let Some(clerk_id) = data.id else {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Deletion event without user id"
                )));
            };
            let deleted = state.users.delete_by_clerk_id(&clerk_id).await?;
            tracing::info!(user_id = %clerk_id, deleted, "User deletion processed");
            Ok(Json(WebhookAck {
                success: true,
                deleted: Some(deleted),
            }))
        }
        other => {
            tracing::debug!(event = %other, "Ignoring webhook event");
            Ok(Json(WebhookAck {
                success: true,
                deleted: None,
            }))
        }
    }
}
