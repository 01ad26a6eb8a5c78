use super::database::{map_write_error, MongoDb};
use crate::models::{dedupe_favorites, User, UserPreferences, UserProfile};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::{
    bson::{doc, to_bson, to_document, Document},
    options::{FindOneAndUpdateOptions, ReturnDocument},
};
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_clerk_id(&self, clerk_id: &str) -> Result<Option<User>, AppError>;

    /// Insert `user` unless a record with its `clerk_id` exists. Returns the
    /// stored record and whether it was inserted. Another record holding the
    /// same non-empty email is a `Conflict`.
    async fn insert_if_absent(&self, user: &User) -> Result<(User, bool), AppError>;

    /// Apply favorites and metadata in place, leaving every provider-owned
    /// field as stored. `None` when no record exists.
    async fn update_preferences(
        &self,
        clerk_id: &str,
        preferences: &UserPreferences,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, AppError>;

    /// Create or refresh a record from provider data. Favorites, metadata and
    /// the creation time of an existing record survive.
    async fn upsert_profile(
        &self,
        profile: UserProfile,
        now: DateTime<Utc>,
    ) -> Result<User, AppError>;

    /// Returns whether a record was removed.
    async fn delete_by_clerk_id(&self, clerk_id: &str) -> Result<bool, AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}

#[async_trait]
impl UserStore for MongoDb {
    async fn find_by_clerk_id(&self, clerk_id: &str) -> Result<Option<User>, AppError> {
        self.users()
            .find_one(doc! { "clerkId": clerk_id }, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to look up user {}: {}", clerk_id, e);
                AppError::from(e)
            })
    }

    async fn insert_if_absent(&self, user: &User) -> Result<(User, bool), AppError> {
        let document =
            to_document(user).map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;

        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::Before)
            .build();

        let existing = self
            .users()
            .find_one_and_update(
                doc! { "clerkId": &user.clerk_id },
                doc! { "$setOnInsert": document },
                options,
            )
            .await
            .map_err(|e| map_write_error(e, "User"))?;

        Ok(match existing {
            Some(existing) => (existing, false),
            None => (user.clone(), true),
        })
    }

    async fn update_preferences(
        &self,
        clerk_id: &str,
        preferences: &UserPreferences,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, AppError> {
        let mut set = doc! { "updatedAt": mongodb::bson::DateTime::from_chrono(now) };
        if let Some(favorites) = &preferences.favorite_agents {
            set.insert(
                "favoriteAgents",
                doc! { "$literal": dedupe_favorites(favorites.clone()) },
            );
        }
        if let Some(metadata) = &preferences.metadata {
            let metadata =
                to_bson(metadata).map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;
            set.insert(
                "metadata",
                doc! {
                    "$mergeObjects": [
                        { "$ifNull": ["$metadata", {}] },
                        { "$literal": metadata },
                    ]
                },
            );
        }

        // Pipeline form so metadata keys are merged as data, never read as
        // field paths or operators.
        let pipeline: Vec<Document> = vec![doc! { "$set": set }];
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        self.users()
            .find_one_and_update(doc! { "clerkId": clerk_id }, pipeline, options)
            .await
            .map_err(|e| map_write_error(e, "User"))
    }

    async fn upsert_profile(
        &self,
        profile: UserProfile,
        now: DateTime<Utc>,
    ) -> Result<User, AppError> {
        let clerk_id = profile.clerk_id.clone();
        let external_accounts = to_bson(&profile.external_accounts)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;
        let metadata = to_bson(&profile.public_metadata)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;
        let now = mongodb::bson::DateTime::from_chrono(now);

        let update = doc! {
            "$set": {
                "email": profile.email,
                "firstName": profile.first_name,
                "lastName": profile.last_name,
                "username": profile.username,
                "profileImageUrl": profile.profile_image_url,
                "emailVerified": profile.email_verified,
                "phoneNumber": profile.phone_number,
                "phoneVerified": profile.phone_verified,
                "twoFactorEnabled": profile.two_factor_enabled,
                "lastSignInAt": profile.last_sign_in_at.map(mongodb::bson::DateTime::from_chrono),
                "externalAccounts": external_accounts,
                "updatedAt": now,
            },
            "$setOnInsert": {
                "createdAt": now,
                "favoriteAgents": [],
                "metadata": metadata,
            },
        };

        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();

        self.users()
            .find_one_and_update(doc! { "clerkId": &clerk_id }, update, options)
            .await
            .map_err(|e| map_write_error(e, "User"))?
            .ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!(
                    "Upsert of user {} returned no document",
                    clerk_id
                ))
            })
    }

    async fn delete_by_clerk_id(&self, clerk_id: &str) -> Result<bool, AppError> {
        let result = self
            .users()
            .delete_one(doc! { "clerkId": clerk_id }, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to delete user {}: {}", clerk_id, e);
                AppError::from(e)
            })?;
        Ok(result.deleted_count > 0)
    }

    async fn health_check(&self) -> Result<(), AppError> {
        MongoDb::health_check(self).await
    }
}

/// Process-local user store enforcing the same uniqueness rules as the
/// MongoDB indexes.
#[derive(Default)]
pub struct InMemoryUserStore {
    users: Mutex<HashMap<String, User>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.lock().map(|u| u.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, User>>, AppError> {
        self.users
            .lock()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("User store mutex poisoned: {}", e)))
    }
}

fn email_taken(users: &HashMap<String, User>, email: &str, clerk_id: &str) -> bool {
    !email.is_empty()
        && users
            .values()
            .any(|u| u.email == email && u.clerk_id != clerk_id)
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_clerk_id(&self, clerk_id: &str) -> Result<Option<User>, AppError> {
        Ok(self.lock()?.get(clerk_id).cloned())
    }

    async fn insert_if_absent(&self, user: &User) -> Result<(User, bool), AppError> {
        let mut users = self.lock()?;
        if let Some(existing) = users.get(&user.clerk_id) {
            return Ok((existing.clone(), false));
        }
        if email_taken(&users, &user.email, &user.clerk_id) {
            return Err(AppError::Conflict(anyhow::anyhow!("User already exists")));
        }
        users.insert(user.clerk_id.clone(), user.clone());
        Ok((user.clone(), true))
    }

    async fn update_preferences(
        &self,
        clerk_id: &str,
        preferences: &UserPreferences,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, AppError> {
        let mut users = self.lock()?;
        Ok(users.get_mut(clerk_id).map(|user| {
            user.apply_preferences(preferences.clone(), now);
            user.clone()
        }))
    }

    async fn upsert_profile(
        &self,
        profile: UserProfile,
        now: DateTime<Utc>,
    ) -> Result<User, AppError> {
        let mut users = self.lock()?;
        if email_taken(&users, &profile.email, &profile.clerk_id) {
            return Err(AppError::Conflict(anyhow::anyhow!("User already exists")));
        }

        let user = match users.remove(&profile.clerk_id) {
            Some(mut existing) => {
                existing.apply_profile(profile, now);
                existing
            }
            None => User::from_profile(profile, now),
        };
        users.insert(user.clerk_id.clone(), user.clone());
        Ok(user)
    }

    async fn delete_by_clerk_id(&self, clerk_id: &str) -> Result<bool, AppError> {
        Ok(self.lock()?.remove(clerk_id).is_some())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        self.lock().map(|_| ())
    }
}
