//! MongoDB database wrapper.

use mongodb::{Client, Collection, IndexModel, options::ClientOptions, options::IndexOptions};
use mongodb::bson::doc;
use tracing::info;

use super::models::OverwriteDocument;

/// Database wrapper for MongoDB operations.
#[derive(Debug, Clone)]
pub struct Database {
    client: Client,
    db: mongodb::Database,
}

impl Database {
    /// Connect to MongoDB with the given URI and database name.
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect(uri: &str, db_name: &str) -> anyhow::Result<Self> {
        let options = ClientOptions::parse(uri).await?;
        let client = Client::with_options(options)?;

        // Ping the database to verify connection
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await?;

        info!("Successfully connected to MongoDB");

        let db = client.database(db_name);

        Ok(Self { client, db })
    }

    /// Create the indexes permission lookups rely on. Idempotent.
    ///
    /// The overwrite index is unique, enforcing one overwrite per channel
    /// and target.
    pub async fn ensure_indexes(&self) -> anyhow::Result<()> {
        self.collection::<OverwriteDocument>("permission_overwrites")
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "channel_id": 1, "target_id": 1, "target_type": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await?;

        let indexes = [
            ("guilds", doc! { "guild_id": 1 }),
            ("channels", doc! { "channel_id": 1, "guild_id": 1 }),
            ("roles", doc! { "guild_id": 1, "role_id": 1 }),
            ("members", doc! { "guild_id": 1, "user_id": 1 }),
        ];
        for (collection, keys) in indexes {
            self.db
                .collection::<mongodb::bson::Document>(collection)
                .create_index(IndexModel::builder().keys(keys).build())
                .await?;
        }

        info!("MongoDB indexes ensured");
        Ok(())
    }

    /// Get a reference to the underlying MongoDB client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Get a typed collection from the database.
    pub fn collection<T: Send + Sync>(&self, name: &str) -> Collection<T> {
        self.db.collection(name)
    }
}
