use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::{
    dtos::agents::{AgentListResponse, AgentResponse, CreateAgentRequest},
    middleware::AuthUser,
    services::NewAgent,
    AppState,
};

pub async fn list_agents(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let agents = state.catalog.list().await?;
    Ok(Json(AgentListResponse { agents }))
}

pub async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let agent = state
        .catalog
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Agent not found")))?;
    Ok(Json(AgentResponse { agent }))
}

#[axum::debug_handler]
pub async fn create_agent(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Json(req): Json<CreateAgentRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let (Some(name), Some(description)) = (req.name, req.description) else {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Name and description are required"
        )));
    };

    let agent = state
        .catalog
        .create(NewAgent {
            name,
            description,
            code: req.code.unwrap_or_default(),
            explanation: req.explanation.unwrap_or_default(),
        })
        .await?;

    tracing::info!(user_id = %identity.user_id, agent_id = %agent.id, "Agent submitted");

    Ok((StatusCode::CREATED, Json(AgentResponse { agent })))
}
