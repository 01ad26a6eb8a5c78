use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::{
    dtos::usage::{
        AllUsageResponse, RecordUsageRequest, RecordUsageResponse, UsageQuery, UserUsageResponse,
    },
    middleware::AuthUser,
    AppState,
};

pub async fn get_usage(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Query(query): Query<UsageQuery>,
) -> Result<Response, AppError> {
    if query.wants_all() {
        if !state.usage.is_admin(&identity.user_id).await? {
            tracing::warn!(user_id = %identity.user_id, "Non-admin requested aggregate usage");
            return Err(AppError::Forbidden(anyhow::anyhow!("Forbidden")));
        }

        let usage = state.usage.all_usage().await?;
        return Ok(Json(AllUsageResponse { usage }).into_response());
    }

    let usage = state.usage.user_usage(&identity.user_id).await?;
    Ok(Json(UserUsageResponse { usage }).into_response())
}

#[axum::debug_handler]
pub async fn record_usage(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Json(req): Json<RecordUsageRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let (Some(agent_id), Some(operation)) = (req.agent_id, req.operation) else {
        return Err(AppError::BadRequest(anyhow::anyhow!("Missing required fields")));
    };

    let usage = state
        .usage
        .record(&identity.user_id, &agent_id, &operation)
        .await?;

    Ok(Json(RecordUsageResponse {
        success: true,
        usage,
    }))
}
