use crate::models::{ExternalAccount, User};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub favorite_agents: Option<Vec<String>>,
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub clerk_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub profile_image_url: String,
    pub email_verified: bool,
    pub phone_number: String,
    pub phone_verified: bool,
    pub two_factor_enabled: bool,
    pub last_sign_in_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub external_accounts: Vec<ExternalAccount>,
    pub favorite_agents: Vec<String>,
    pub metadata: Map<String, Value>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            clerk_id: user.clerk_id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            username: user.username,
            profile_image_url: user.profile_image_url,
            email_verified: user.email_verified,
            phone_number: user.phone_number,
            phone_verified: user.phone_verified,
            two_factor_enabled: user.two_factor_enabled,
            last_sign_in_at: user.last_sign_in_at.map(|d| d.to_chrono().to_rfc3339()),
            created_at: user.created_at.to_rfc3339(),
            updated_at: user.updated_at.to_rfc3339(),
            external_accounts: user.external_accounts,
            favorite_agents: user.favorite_agents,
            metadata: user.metadata,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserEnvelope {
    pub user: UserResponse,
}
