//! Key-value store key layout.

pub const AGENTS_ALL: &str = "agents:all";
pub const USAGE_ALL: &str = "usage:all";
pub const USER_USAGE: &str = "user_usage";
pub const TOTAL_API_CALLS: &str = "total_api_calls";
pub const ADMIN_USERS: &str = "admin_users";

pub const API_CALLS_FIELD: &str = "apiCalls";
pub const LAST_USED_FIELD: &str = "lastUsed";
pub const AGENT_FIELD_PREFIX: &str = "agent:";

/// Cached read view of one user's usage.
pub fn usage_view(user_id: &str) -> String {
    format!("usage:{}", user_id)
}

/// Live counter hash of one user.
pub fn user_usage_counters(user_id: &str) -> String {
    format!("user:{}:usage", user_id)
}

pub fn agent_field(agent_id: &str) -> String {
    format!("{}{}", AGENT_FIELD_PREFIX, agent_id)
}
