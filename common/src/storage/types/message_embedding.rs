use sha2::{Digest, Sha256};

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(MessageEmbedding, "message_embedding", {
    /// Id of the owning message; also this record's key (one vector per message)
    message_id: String,
    /// Embedding vector
    embedding: Vec<f32>,
    /// Hash of the exact text the vector was computed from
    content_hash: String,
    /// Embedding model label, when the backend reports one
    model: Option<String>
});

/// One nearest-neighbour hit: the owning message id plus its distance.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarMessage {
    pub message_id: String,
    pub distance: f32,
}

impl MessageEmbedding {
    pub fn new(
        message_id: String,
        embedding: Vec<f32>,
        embedded_text: &str,
        model: Option<String>,
    ) -> Self {
        let now = Utc::now();

        Self {
            // Keyed by the message id so re-indexing lands on the same row
            id: message_id.clone(),
            created_at: now,
            updated_at: now,
            message_id,
            embedding,
            content_hash: content_hash(embedded_text),
            model,
        }
    }

    /// Recreate the HNSW index with a new embedding dimension. Surreal
    /// requires the index definition to be recreated when the vector length
    /// changes.
    pub async fn redefine_hnsw_index(
        db: &SurrealDbClient,
        dimension: usize,
    ) -> Result<(), AppError> {
        let query = format!(
            "BEGIN TRANSACTION;
             REMOVE INDEX IF EXISTS idx_embedding_message ON TABLE {table};
             DEFINE INDEX idx_embedding_message ON TABLE {table} FIELDS embedding HNSW DIMENSION {dimension};
             COMMIT TRANSACTION;",
            table = Self::table_name(),
        );

        let res = db.client.query(query).await.map_err(AppError::Database)?;
        res.check().map_err(AppError::Database)?;

        Ok(())
    }

    /// Write the vector for a message, replacing any prior row for that id.
    pub async fn upsert(self, db: &SurrealDbClient) -> Result<(), AppError> {
        let _: Option<Self> = db.upsert_item(self).await.map_err(AppError::Database)?;
        Ok(())
    }

    pub async fn get_by_message_id(
        message_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        db.get_item(message_id).await.map_err(AppError::Database)
    }

    pub async fn delete_by_message_id(
        message_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _: Option<Self> = db.delete_item(message_id).await.map_err(AppError::Database)?;
        Ok(())
    }

    /// Number of vectors currently indexed.
    pub async fn count(db: &SurrealDbClient) -> Result<usize, AppError> {
        #[derive(Deserialize)]
        struct CountRow {
            count: i64,
        }

        let mut result = db
            .client
            .query(format!(
                "SELECT count() AS count FROM {} GROUP ALL",
                Self::table_name()
            ))
            .await?;
        let row: Option<CountRow> = result.take(0)?;

        Ok(row.map_or(0, |row| row.count.max(0) as usize))
    }

    /// Nearest-neighbour lookup over the HNSW index, closest first. Returns
    /// at most `take` hits; fewer when the corpus is small.
    pub async fn find_similar(
        db: &SurrealDbClient,
        query_embedding: &[f32],
        take: usize,
    ) -> Result<Vec<SimilarMessage>, AppError> {
        #[derive(Deserialize)]
        struct SimilarRow {
            message_id: String,
            distance: f32,
        }

        if take == 0 {
            return Ok(Vec::new());
        }

        let query = format!(
            "SELECT message_id, vector::distance::knn() AS distance FROM {} \
             WHERE embedding <|{},40|> $query_embedding ORDER BY distance",
            Self::table_name(),
            take,
        );

        let mut result = db
            .client
            .query(query)
            .bind(("query_embedding", query_embedding.to_vec()))
            .await?;
        let rows: Vec<SimilarRow> = result.take(0)?;

        Ok(rows
            .into_iter()
            .map(|row| SimilarMessage {
                message_id: row.message_id,
                distance: row.distance,
            })
            .collect())
    }

    /// Whether the stored vector still matches the given source text.
    pub fn matches_text(&self, text: &str) -> bool {
        self.content_hash == content_hash(text)
    }
}

fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
