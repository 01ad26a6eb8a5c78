use crate::models::{RecordedUsage, UserUsage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

#[derive(Debug, Default, Deserialize)]
pub struct UsageQuery {
    pub all: Option<String>,
}

impl UsageQuery {
    pub fn wants_all(&self) -> bool {
        self.all.as_deref() == Some("true")
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RecordUsageRequest {
    #[validate(required, length(min = 1))]
    pub agent_id: Option<String>,
    #[validate(required, length(min = 1))]
    pub operation: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserUsageResponse {
    pub usage: UserUsage,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AllUsageResponse {
    pub usage: BTreeMap<String, UserUsage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordUsageResponse {
    pub success: bool,
    pub usage: RecordedUsage,
}
