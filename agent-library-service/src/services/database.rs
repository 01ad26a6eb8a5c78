use crate::models::{Agent, User};
use mongodb::{
    bson::doc, options::IndexOptions, Client as MongoClient, Collection, Database, IndexModel,
};
use service_core::error::AppError;

pub const DUPLICATE_KEY_CODE: i32 = 11000;

#[derive(Clone)]
pub struct MongoDb {
    client: MongoClient,
    db: Database,
}

impl MongoDb {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, AppError> {
        tracing::info!("Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            AppError::from(e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        tracing::info!("Creating MongoDB indexes for agent-library-service");

        let clerk_id_index = IndexModel::builder()
            .keys(doc! { "clerkId": 1 })
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .name("clerk_id_unique".to_string())
                    .build(),
            )
            .build();

        self.users()
            .create_index(clerk_id_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create clerkId index on users collection: {}", e);
                AppError::from(e)
            })?;
        tracing::info!("Created unique index on users.clerkId");

        // Users signed up without an address carry "", which must not collide.
        let email_index = IndexModel::builder()
            .keys(doc! { "email": 1 })
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .partial_filter_expression(doc! { "email": { "$gt": "" } })
                    .name("email_unique".to_string())
                    .build(),
            )
            .build();

        self.users()
            .create_index(email_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create email index on users collection: {}", e);
                AppError::from(e)
            })?;
        tracing::info!("Created partial unique index on users.email");

        let agent_id_index = IndexModel::builder()
            .keys(doc! { "id": 1 })
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .name("agent_id_unique".to_string())
                    .build(),
            )
            .build();

        self.agents()
            .create_index(agent_id_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create id index on agents collection: {}", e);
                AppError::from(e)
            })?;
        tracing::info!("Created unique index on agents.id");

        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                AppError::from(e)
            })?;
        Ok(())
    }

    pub fn users(&self) -> Collection<User> {
        self.db.collection("users")
    }

    pub fn agents(&self) -> Collection<Agent> {
        self.db.collection("agents")
    }
}

/// Map a write failure to `Conflict` when it is a unique index violation.
pub fn map_write_error(err: mongodb::error::Error, what: &str) -> AppError {
    use mongodb::error::{ErrorKind, WriteFailure};

    let duplicate = match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == DUPLICATE_KEY_CODE,
        ErrorKind::Command(e) => e.code == DUPLICATE_KEY_CODE,
        _ => false,
    };

    if duplicate {
        AppError::Conflict(anyhow::anyhow!("{} already exists", what))
    } else {
        tracing::error!("MongoDB write failed for {}: {}", what, err);
        AppError::from(err)
    }
}
