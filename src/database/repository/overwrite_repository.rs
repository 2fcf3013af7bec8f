//! Channel permission overwrites.

use futures::TryStreamExt;
use mongodb::Collection;
use mongodb::bson::doc;
use tracing::debug;

use crate::database::Database;
use crate::database::models::{OverwriteDocument, encode_target};
use crate::permissions::{OverwriteTarget, PermissionOverwrite, Snowflake, StoreError};

pub struct OverwriteRepository {
    collection: Collection<OverwriteDocument>,
}

impl OverwriteRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection("permission_overwrites"),
        }
    }

    pub async fn for_channel(
        &self,
        channel_id: Snowflake,
    ) -> Result<Vec<PermissionOverwrite>, StoreError> {
        let filter = doc! { "channel_id": channel_id as i64 };
        let documents: Vec<OverwriteDocument> =
            self.collection.find(filter).await?.try_collect().await?;

        documents.iter().map(OverwriteDocument::to_overwrite).collect()
    }

    /// Save an overwrite (upsert on channel and target).
    pub async fn upsert(
        &self,
        guild_id: Snowflake,
        channel_id: Snowflake,
        overwrite: &PermissionOverwrite,
    ) -> Result<(), StoreError> {
        let document = OverwriteDocument::new(guild_id, channel_id, overwrite);
        let filter = doc! {
            "channel_id": document.channel_id,
            "target_id": document.target_id,
            "target_type": document.target_type,
        };
        let options = mongodb::options::ReplaceOptions::builder()
            .upsert(true)
            .build();

        self.collection
            .replace_one(filter, &document)
            .with_options(options)
            .await?;

        debug!("Saved overwrite {:?} for channel {}", overwrite.target, channel_id);
        Ok(())
    }

    pub async fn delete(
        &self,
        channel_id: Snowflake,
        target: OverwriteTarget,
    ) -> Result<bool, StoreError> {
        let (target_id, target_type) = encode_target(target);
        let filter = doc! {
            "channel_id": channel_id as i64,
            "target_id": target_id,
            "target_type": target_type,
        };
        let result = self.collection.delete_one(filter).await?;

        let deleted = result.deleted_count > 0;
        debug!("Deleted overwrite {:?} for channel {}: {}", target, channel_id, deleted);
        Ok(deleted)
    }
}
