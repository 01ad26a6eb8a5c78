use axum::{extract::State, response::IntoResponse, Json};
use chrono::Utc;
use service_core::error::AppError;

use crate::{
    dtos::user::{UpdateUserRequest, UserEnvelope},
    middleware::AuthUser,
    models::{User, UserPreferences, UserProfile},
    AppState,
};

pub async fn get_user(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let user = state
        .users
        .find_by_clerk_id(&identity.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User not found")))?;

    Ok(Json(UserEnvelope { user: user.into() }))
}

/// Update favorites and metadata, creating the record from the session's
/// identity claims on first use.
#[axum::debug_handler]
pub async fn update_user(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Json(req): Json<UpdateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    let preferences = UserPreferences {
        favorite_agents: req.favorite_agents,
        metadata: req.metadata,
    };

    if let Some(user) = state
        .users
        .update_preferences(&identity.user_id, &preferences, now)
        .await?
    {
        return Ok(Json(UserEnvelope { user: user.into() }));
    }

    let mut candidate = User::from_profile(
        UserProfile {
            clerk_id: identity.user_id.clone(),
            email: identity.email.unwrap_or_default(),
            first_name: identity.first_name.unwrap_or_default(),
            last_name: identity.last_name.unwrap_or_default(),
            ..Default::default()
        },
        now,
    );
    candidate.apply_preferences(preferences.clone(), now);

    let (user, inserted) = state.users.insert_if_absent(&candidate).await?;
    if inserted {
        tracing::info!(user_id = %user.clerk_id, "User created from session");
        return Ok(Json(UserEnvelope { user: user.into() }));
    }

    // A provider event created the record after the first lookup.
    let user = state
        .users
        .update_preferences(&identity.user_id, &preferences, now)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User not found")))?;

    Ok(Json(UserEnvelope { user: user.into() }))
}
