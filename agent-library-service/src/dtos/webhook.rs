//! Identity provider webhook payloads.
//!
//! Only the subset of the provider's user object that the local profile
//! keeps is modelled; every field is optional on the wire.

use crate::models::{ExternalAccount, UserProfile};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const USER_CREATED: &str = "user.created";
pub const USER_UPDATED: &str = "user.updated";
pub const USER_DELETED: &str = "user.deleted";

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Verification {
    pub status: Option<String>,
}

impl Verification {
    fn is_verified(&self) -> bool {
        self.status.as_deref() == Some("verified")
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EmailAddress {
    pub email_address: String,
    pub verification: Option<Verification>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PhoneNumber {
    pub phone_number: String,
    pub verification: Option<Verification>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProviderAccount {
    pub provider: Option<String>,
    pub provider_user_id: Option<String>,
    pub email_address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookUserData {
    pub id: String,
    #[serde(default)]
    pub email_addresses: Vec<EmailAddress>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, alias = "profile_image_url")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub phone_numbers: Vec<PhoneNumber>,
    #[serde(default)]
    pub two_factor_enabled: Option<bool>,
    /// Unix milliseconds.
    #[serde(default)]
    pub last_sign_in_at: Option<i64>,
    #[serde(default)]
    pub external_accounts: Vec<ProviderAccount>,
    #[serde(default)]
    pub public_metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
pub struct DeletedUserData {
    pub id: Option<String>,
}

impl From<WebhookUserData> for UserProfile {
    fn from(data: WebhookUserData) -> Self {
        let email = data.email_addresses.into_iter().next();
        let phone = data.phone_numbers.into_iter().next();

        UserProfile {
            clerk_id: data.id,
            email_verified: email
                .as_ref()
                .and_then(|e| e.verification.as_ref())
                .is_some_and(Verification::is_verified),
            email: email.map(|e| e.email_address).unwrap_or_default(),
            first_name: data.first_name.unwrap_or_default(),
            last_name: data.last_name.unwrap_or_default(),
            username: data.username.unwrap_or_default(),
            profile_image_url: data.image_url.unwrap_or_default(),
            phone_verified: phone
                .as_ref()
                .and_then(|p| p.verification.as_ref())
                .is_some_and(Verification::is_verified),
            phone_number: phone.map(|p| p.phone_number).unwrap_or_default(),
            two_factor_enabled: data.two_factor_enabled.unwrap_or(false),
            last_sign_in_at: data.last_sign_in_at.and_then(millis_to_datetime),
            external_accounts: data
                .external_accounts
                .into_iter()
                .map(|a| ExternalAccount {
                    provider: a.provider.unwrap_or_default(),
                    provider_user_id: a.provider_user_id.unwrap_or_default(),
                    email_address: a.email_address.unwrap_or_default(),
                })
                .collect(),
            public_metadata: data.public_metadata.unwrap_or_default(),
        }
    }
}

fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookAck {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
}
