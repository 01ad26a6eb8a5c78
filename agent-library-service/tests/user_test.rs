mod common;

use agent_library_service::{
    build_router,
    models::{User, UserPreferences, UserProfile},
    services::{InMemoryAgentStore, InMemoryUserStore, UserStore},
    AppState,
};
use async_trait::async_trait;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{
    body_json, get, post_json, test_authenticator, test_config, TestApp, ALICE_ID, ALICE_TOKEN,
    NO_EMAIL_ID, NO_EMAIL_TOKEN,
};
use serde_json::json;
use service_core::error::AppError;
use service_core::store::InMemoryStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower::util::ServiceExt;

#[tokio::test]
async fn unknown_user_is_404() {
    let app = TestApp::spawn();

    let response = app
        .router
        .clone()
        .oneshot(get("/api/user", Some(ALICE_TOKEN)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "User not found");
}

#[tokio::test]
async fn first_write_creates_user_from_session_claims() {
    let app = TestApp::spawn();

    let response = app
        .router
        .clone()
        .oneshot(post_json(
            "/api/user",
            Some(ALICE_TOKEN),
            json!({"favoriteAgents": ["retrieval-qa", "summarization", "retrieval-qa"]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let user = body_json(response).await["user"].clone();
    assert_eq!(user["clerkId"], ALICE_ID);
    assert_eq!(user["email"], "alice@example.com");
    assert_eq!(user["firstName"], "Alice");
    assert_eq!(user["favoriteAgents"], json!(["retrieval-qa", "summarization"]));
    assert_eq!(user["metadata"], json!({}));

    let response = app
        .router
        .clone()
        .oneshot(get("/api/user", Some(ALICE_TOKEN)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["user"]["clerkId"], ALICE_ID);
}

#[tokio::test]
async fn later_writes_update_favorites_and_merge_metadata() {
    let app = TestApp::spawn();

    app.router
        .clone()
        .oneshot(post_json(
            "/api/user",
            Some(ALICE_TOKEN),
            json!({"favoriteAgents": ["retrieval-qa"], "metadata": {"theme": "dark"}}),
        ))
        .await
        .unwrap();

    let response = app
        .router
        .clone()
        .oneshot(post_json(
            "/api/user",
            Some(ALICE_TOKEN),
            json!({"metadata": {"plan": "pro"}}),
        ))
        .await
        .unwrap();
    let user = body_json(response).await["user"].clone();
    assert_eq!(user["favoriteAgents"], json!(["retrieval-qa"]));
    assert_eq!(user["metadata"], json!({"theme": "dark", "plan": "pro"}));

    let response = app
        .router
        .clone()
        .oneshot(post_json(
            "/api/user",
            Some(ALICE_TOKEN),
            json!({"favoriteAgents": []}),
        ))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["user"]["favoriteAgents"], json!([]));

    let stored = app.users.find_by_clerk_id(ALICE_ID).await.unwrap().unwrap();
    assert!(stored.updated_at >= stored.created_at);
    assert_eq!(app.users.len(), 1);
}

#[tokio::test]
async fn session_without_email_still_creates_a_user() {
    let app = TestApp::spawn();

    let response = app
        .router
        .clone()
        .oneshot(post_json("/api/user", Some(NO_EMAIL_TOKEN), json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let user = body_json(response).await["user"].clone();
    assert_eq!(user["clerkId"], NO_EMAIL_ID);
    assert_eq!(user["email"], "");
}

#[tokio::test]
async fn profile_endpoints_require_auth() {
    let app = TestApp::spawn();

    let response = app.router.clone().oneshot(get("/api/user", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .router
        .clone()
        .oneshot(post_json("/api/user", None, json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(app.users.is_empty());
}

/// Lets a `user.created` delivery land between the first preference update
/// finding nothing and the insert.
#[derive(Default)]
struct WebhookFirstStore {
    inner: InMemoryUserStore,
    raced: AtomicBool,
}

#[async_trait]
impl UserStore for WebhookFirstStore {
    async fn find_by_clerk_id(&self, clerk_id: &str) -> Result<Option<User>, AppError> {
        self.inner.find_by_clerk_id(clerk_id).await
    }

    async fn insert_if_absent(&self, user: &User) -> Result<(User, bool), AppError> {
        self.inner.insert_if_absent(user).await
    }

    async fn update_preferences(
        &self,
        clerk_id: &str,
        preferences: &UserPreferences,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, AppError> {
        if !self.raced.swap(true, Ordering::SeqCst) {
            let found = self.inner.update_preferences(clerk_id, preferences, now).await?;
            self.inner
                .upsert_profile(
                    UserProfile {
                        clerk_id: clerk_id.to_string(),
                        email: "alice@example.com".to_string(),
                        username: "alice".to_string(),
                        email_verified: true,
                        ..Default::default()
                    },
                    now,
                )
                .await?;
            return Ok(found);
        }
        self.inner.update_preferences(clerk_id, preferences, now).await
    }

    async fn upsert_profile(
        &self,
        profile: UserProfile,
        now: DateTime<Utc>,
    ) -> Result<User, AppError> {
        self.inner.upsert_profile(profile, now).await
    }

    async fn delete_by_clerk_id(&self, clerk_id: &str) -> Result<bool, AppError> {
        self.inner.delete_by_clerk_id(clerk_id).await
    }

    async fn health_check(&self) -> Result<(), AppError> {
        self.inner.health_check().await
    }
}

#[tokio::test]
async fn first_write_racing_the_created_webhook_keeps_both() {
    let users = Arc::new(WebhookFirstStore::default());
    let state = AppState::new(
        test_config(),
        users.clone(),
        Arc::new(InMemoryAgentStore::new()),
        Arc::new(InMemoryStore::new()),
        Arc::new(test_authenticator()),
    );
    let router = build_router(state);

    let response = router
        .oneshot(post_json(
            "/api/user",
            Some(ALICE_TOKEN),
            json!({"favoriteAgents": ["retrieval-qa"]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let user = body_json(response).await["user"].clone();
    assert_eq!(user["favoriteAgents"], json!(["retrieval-qa"]));
    assert_eq!(user["username"], "alice");
    assert_eq!(user["emailVerified"], true);

    let stored = users.inner.find_by_clerk_id(ALICE_ID).await.unwrap().unwrap();
    assert_eq!(stored.username, "alice");
    assert_eq!(stored.favorite_agents, vec!["retrieval-qa"]);
}
