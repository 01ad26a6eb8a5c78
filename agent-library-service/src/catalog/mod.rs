//! Built-in agent catalog compiled into the binary.

use crate::models::Agent;
use once_cell::sync::OnceCell;
use service_core::error::AppError;

const BUILTIN_AGENTS_JSON: &str = include_str!("agents.json");

static BUILTIN_AGENTS: OnceCell<Vec<Agent>> = OnceCell::new();

pub fn builtin_agents() -> Result<&'static [Agent], AppError> {
    BUILTIN_AGENTS
        .get_or_try_init(|| serde_json::from_str(BUILTIN_AGENTS_JSON))
        .map(Vec::as_slice)
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Invalid built-in catalog: {}", e)))
}

pub fn builtin_agent(id: &str) -> Result<Option<&'static Agent>, AppError> {
    Ok(builtin_agents()?.iter().find(|agent| agent.id == id))
}
