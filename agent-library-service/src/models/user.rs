use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ExternalAccount {
    pub provider: String,
    pub provider_user_id: String,
    pub email_address: String,
}

/// Local profile of an identity-provider user, keyed by `clerk_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub clerk_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub profile_image_url: String,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub phone_verified: bool,
    #[serde(default)]
    pub two_factor_enabled: bool,
    #[serde(default)]
    pub last_sign_in_at: Option<mongodb::bson::DateTime>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub external_accounts: Vec<ExternalAccount>,
    #[serde(default)]
    pub favorite_agents: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Provider-owned part of a user record: everything a sign-up or profile
/// change event can carry. Missing values are already defaulted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserProfile {
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
    pub last_sign_in_at: Option<DateTime<Utc>>,
    pub external_accounts: Vec<ExternalAccount>,
    pub public_metadata: Map<String, Value>,
}

impl User {
    pub fn from_profile(profile: UserProfile, now: DateTime<Utc>) -> Self {
        Self {
            clerk_id: profile.clerk_id,
            email: profile.email,
            first_name: profile.first_name,
            last_name: profile.last_name,
            username: profile.username,
            profile_image_url: profile.profile_image_url,
            email_verified: profile.email_verified,
            phone_number: profile.phone_number,
            phone_verified: profile.phone_verified,
            two_factor_enabled: profile.two_factor_enabled,
            last_sign_in_at: profile
                .last_sign_in_at
                .map(mongodb::bson::DateTime::from_chrono),
            created_at: now,
            updated_at: now,
            external_accounts: profile.external_accounts,
            favorite_agents: Vec::new(),
            metadata: profile.public_metadata,
        }
    }

    /// Overwrite the provider-owned fields, keeping favorites, metadata and
    /// the creation time.
    pub fn apply_profile(&mut self, profile: UserProfile, now: DateTime<Utc>) {
        self.email = profile.email;
        self.first_name = profile.first_name;
        self.last_name = profile.last_name;
        self.username = profile.username;
        self.profile_image_url = profile.profile_image_url;
        self.email_verified = profile.email_verified;
        self.phone_number = profile.phone_number;
        self.phone_verified = profile.phone_verified;
        self.two_factor_enabled = profile.two_factor_enabled;
        self.last_sign_in_at = profile
            .last_sign_in_at
            .map(mongodb::bson::DateTime::from_chrono);
        self.external_accounts = profile.external_accounts;
        self.updated_at = now;
    }

    /// Replace favorites, dropping repeats but keeping first-seen order.
    pub fn set_favorite_agents(&mut self, favorites: Vec<String>) {
        self.favorite_agents = dedupe_favorites(favorites);
    }

    pub fn merge_metadata(&mut self, metadata: Map<String, Value>) {
        self.metadata.extend(metadata);
    }

    pub fn apply_preferences(&mut self, preferences: UserPreferences, now: DateTime<Utc>) {
        if let Some(favorites) = preferences.favorite_agents {
            self.set_favorite_agents(favorites);
        }
        if let Some(metadata) = preferences.metadata {
            self.merge_metadata(metadata);
        }
        self.updated_at = now;
    }
}

/// User-owned fields of a profile write. `None` leaves a field untouched;
/// metadata keys are merged into the stored object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPreferences {
    pub favorite_agents: Option<Vec<String>>,
    pub metadata: Option<Map<String, Value>>,
}

pub fn dedupe_favorites(favorites: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    favorites
        .into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect()
}
