use super::cache::Cache;
use super::database::{map_write_error, MongoDb};
use crate::catalog;
use crate::keys::AGENTS_ALL;
use crate::models::Agent;
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{bson::doc, options::FindOptions};
use service_core::error::AppError;
use std::sync::{Arc, Mutex};

/// Storage for user-submitted agents.
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// All stored agents in insertion order.
    async fn list(&self) -> Result<Vec<Agent>, AppError>;

    async fn find(&self, id: &str) -> Result<Option<Agent>, AppError>;

    async fn insert(&self, agent: &Agent) -> Result<(), AppError>;
}

#[async_trait]
impl AgentStore for MongoDb {
    async fn list(&self) -> Result<Vec<Agent>, AppError> {
        let options = FindOptions::builder().sort(doc! { "_id": 1 }).build();
        let cursor = self.agents().find(None, options).await.map_err(|e| {
            tracing::error!("Failed to list agents: {}", e);
            AppError::from(e)
        })?;
        let agents: Vec<Agent> = cursor.try_collect().await?;
        Ok(agents)
    }

    async fn find(&self, id: &str) -> Result<Option<Agent>, AppError> {
        self.agents()
            .find_one(doc! { "id": id }, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to look up agent {}: {}", id, e);
                AppError::from(e)
            })
    }

    async fn insert(&self, agent: &Agent) -> Result<(), AppError> {
        self.agents()
            .insert_one(agent, None)
            .await
            .map_err(|e| map_write_error(e, "Agent"))?;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryAgentStore {
    agents: Mutex<Vec<Agent>>,
}

impl InMemoryAgentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<Agent>>, AppError> {
        self.agents
            .lock()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Agent store mutex poisoned: {}", e)))
    }
}

#[async_trait]
impl AgentStore for InMemoryAgentStore {
    async fn list(&self) -> Result<Vec<Agent>, AppError> {
        Ok(self.lock()?.clone())
    }

    async fn find(&self, id: &str) -> Result<Option<Agent>, AppError> {
        Ok(self.lock()?.iter().find(|a| a.id == id).cloned())
    }

    async fn insert(&self, agent: &Agent) -> Result<(), AppError> {
        let mut agents = self.lock()?;
        if agents.iter().any(|a| a.id == agent.id) {
            return Err(AppError::Conflict(anyhow::anyhow!("Agent already exists")));
        }
        agents.push(agent.clone());
        Ok(())
    }
}

/// New agent as submitted by a user.
#[derive(Debug, Clone)]
pub struct NewAgent {
    pub name: String,
    pub description: String,
    pub code: String,
    pub explanation: String,
}

/// Built-in entries followed by stored ones, with the full listing cached
/// under `agents:all`.
#[derive(Clone)]
pub struct AgentCatalog {
    store: Arc<dyn AgentStore>,
    cache: Cache,
    ttl_seconds: u64,
}

impl AgentCatalog {
    pub fn new(store: Arc<dyn AgentStore>, cache: Cache, ttl_seconds: u64) -> Self {
        Self {
            store,
            cache,
            ttl_seconds,
        }
    }

    pub async fn list(&self) -> Result<Vec<Agent>, AppError> {
        self.cache
            .get_or_load(AGENTS_ALL, self.ttl_seconds, || async {
                tracing::info!("Agent listing cache miss, loading from source");
                let mut agents = catalog::builtin_agents()?.to_vec();
                agents.extend(self.store.list().await?);
                Ok(agents)
            })
            .await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Agent>, AppError> {
        if let Some(agent) = catalog::builtin_agent(id)? {
            return Ok(Some(agent.clone()));
        }
        self.store.find(id).await
    }

    pub async fn create(&self, new_agent: NewAgent) -> Result<Agent, AppError> {
        let agent = Agent {
            id: format!("agent-{}", chrono::Utc::now().timestamp_millis()),
            name: new_agent.name,
            description: new_agent.description,
            code: new_agent.code,
            explanation: new_agent.explanation,
        };

        self.store.insert(&agent).await?;
        self.cache.invalidate(&[AGENTS_ALL]).await?;

        tracing::info!(agent_id = %agent.id, "Agent created");
        Ok(agent)
    }
}
