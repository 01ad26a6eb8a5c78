pub mod agents;
pub mod cache;
pub mod database;
pub mod identity;
pub mod metrics;
pub mod usage;
pub mod users;

pub use agents::{AgentCatalog, AgentStore, InMemoryAgentStore, NewAgent};
pub use cache::Cache;
pub use database::MongoDb;
pub use identity::{Authenticator, Identity, JwtAuthenticator, StaticAuthenticator};
pub use usage::UsageTracker;
pub use users::{InMemoryUserStore, UserStore};
