#![allow(clippy::module_name_repetitions)]
use sha2::{Digest, Sha256};
use surrealdb::sql::Datetime as SurrealDatetime;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Kind of content carried by a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    Video,
    Audio,
    Document,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::Video => "video",
            MessageType::Audio => "audio",
            MessageType::Document => "document",
        };
        write!(f, "{label}")
    }
}

/// Where a message entered the system.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    BotForwarded,
    ChatExport,
    Other,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::BotForwarded => "bot_forwarded",
            SourceType::ChatExport => "chat_export",
            SourceType::Other => "other",
        }
    }
}

/// Reference to a stored attachment for media messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttachmentRef {
    pub path: String,
    pub media_type: String,
    pub size_bytes: Option<u64>,
}

stored_object!(Message, "message", {
    content: String,
    message_type: MessageType,
    sender_name: String,
    sender_id: Option<String>,
    source: SourceType,
    source_chat_id: Option<String>,
    source_message_id: Option<String>,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    timestamp: DateTime<Utc>,
    attachment: Option<AttachmentRef>,
    categories: Vec<String>,
    tags: Vec<String>,
    sentiment: f32,
    summary: String,
    processed: bool,
    has_embedding: bool,
    processing_error: Option<String>
});

/// Ingestion contract input: one message as handed over by the bot transport
/// or produced by the export parser.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewMessage {
    pub content: String,
    pub message_type: MessageType,
    pub sender_name: String,
    pub sender_id: Option<String>,
    pub source: SourceType,
    pub source_chat_id: Option<String>,
    pub source_message_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub attachment: Option<AttachmentRef>,
}

impl NewMessage {
    /// Stable identity of the message. Messages with native source ids hash
    /// the (source, chat, message) triple; imported text without ids falls
    /// back to a content+timestamp hash.
    pub fn identity(&self) -> String {
        let mut hasher = Sha256::new();
        match (&self.source_chat_id, &self.source_message_id) {
            (Some(chat_id), Some(message_id)) => {
                hasher.update(self.source.as_str());
                hasher.update(b"\0");
                hasher.update(chat_id.as_bytes());
                hasher.update(b"\0");
                hasher.update(message_id.as_bytes());
            }
            _ => {
                hasher.update(self.content.as_bytes());
                hasher.update(b"\0");
                hasher.update(self.timestamp.timestamp_millis().to_be_bytes());
            }
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Sort direction for listings; chronology is always the authored timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Descending,
    Ascending,
}

/// Structured listing filters consumed by the dashboard.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub categories: Option<Vec<String>>,
    pub message_types: Option<Vec<MessageType>>,
    pub sender_id: Option<String>,
    pub sentiment_min: Option<f32>,
    pub sentiment_max: Option<f32>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub text: Option<String>,
    pub order: SortOrder,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Aggregate activity numbers for one sender.
#[derive(Debug, Clone, PartialEq)]
pub struct SenderStats {
    pub total_messages: usize,
    pub recent_messages: usize,
    pub top_categories: Vec<String>,
    pub last_activity: Option<DateTime<Utc>>,
}

impl Message {
    /// Create an unprocessed record from ingestion input. The record id is
    /// the message identity, which makes re-ingestion collide by design.
    pub fn from_new(new: NewMessage) -> Self {
        let now = Utc::now();
        Self {
            id: new.identity(),
            created_at: now,
            updated_at: now,
            content: new.content,
            message_type: new.message_type,
            sender_name: new.sender_name,
            sender_id: new.sender_id,
            source: new.source,
            source_chat_id: new.source_chat_id,
            source_message_id: new.source_message_id,
            timestamp: new.timestamp,
            attachment: new.attachment,
            categories: Vec::new(),
            tags: Vec::new(),
            sentiment: 0.0,
            summary: String::new(),
            processed: false,
            has_embedding: false,
            processing_error: None,
        }
    }

    /// Text to feed the embedding model: content, or the summary for
    /// attachment-only messages without a caption.
    pub fn embeddable_text(&self) -> &str {
        if self.content.is_empty() {
            &self.summary
        } else {
            &self.content
        }
    }

    /// Attach enrichment output and flip the record to processed.
    pub async fn mark_processed(
        db: &SurrealDbClient,
        id: &str,
        categories: Vec<String>,
        tags: Vec<String>,
        sentiment: f32,
        summary: String,
        processing_error: Option<String>,
    ) -> Result<Message, AppError> {
        const QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET categories = $categories,
                tags = $tags,
                sentiment = $sentiment,
                summary = $summary,
                processed = true,
                processing_error = $error,
                updated_at = $now
            RETURN AFTER;
        "#;

        let mut result = db
            .client
            .query(QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_owned()))
            .bind(("categories", categories))
            .bind(("tags", tags))
            .bind(("sentiment", sentiment))
            .bind(("summary", summary))
            .bind(("error", processing_error))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?;

        let updated: Option<Message> = result.take(0)?;
        updated.ok_or_else(|| AppError::NotFound(format!("message {id}")))
    }

    /// Record whether a vector currently exists for this message.
    pub async fn set_has_embedding(
        db: &SurrealDbClient,
        id: &str,
        has_embedding: bool,
    ) -> Result<Message, AppError> {
        const QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET has_embedding = $flag, updated_at = $now
            RETURN AFTER;
        "#;

        let mut result = db
            .client
            .query(QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_owned()))
            .bind(("flag", has_embedding))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?;

        let updated: Option<Message> = result.take(0)?;
        updated.ok_or_else(|| AppError::NotFound(format!("message {id}")))
    }

    /// Structured listing with the dashboard's filters, ordered by authored
    /// timestamp.
    pub async fn list(db: &SurrealDbClient, filter: &MessageFilter) -> Result<Vec<Message>, AppError> {
        let mut clauses: Vec<&str> = Vec::new();
        if filter.categories.is_some() {
            clauses.push("categories CONTAINSANY $categories");
        }
        if filter.message_types.is_some() {
            clauses.push("message_type IN $message_types");
        }
        if filter.sender_id.is_some() {
            clauses.push("sender_id = $sender_id");
        }
        if filter.sentiment_min.is_some() {
            clauses.push("sentiment >= $sentiment_min");
        }
        if filter.sentiment_max.is_some() {
            clauses.push("sentiment <= $sentiment_max");
        }
        if filter.date_from.is_some() {
            clauses.push("timestamp >= $date_from");
        }
        if filter.date_to.is_some() {
            clauses.push("timestamp <= $date_to");
        }
        if filter.text.is_some() {
            clauses.push("string::contains(string::lowercase(content), string::lowercase($text))");
        }

        let mut query = format!("SELECT * FROM {}", Self::table_name());
        if !clauses.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&clauses.join(" AND "));
        }
        query.push_str(match filter.order {
            SortOrder::Descending => " ORDER BY timestamp DESC",
            SortOrder::Ascending => " ORDER BY timestamp ASC",
        });
        if let Some(limit) = filter.limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = filter.offset {
            query.push_str(&format!(" START {offset}"));
        }

        let mut prepared = db.client.query(query);
        if let Some(categories) = filter.categories.clone() {
            prepared = prepared.bind(("categories", categories));
        }
        if let Some(message_types) = filter.message_types.clone() {
            prepared = prepared.bind(("message_types", message_types));
        }
        if let Some(sender_id) = filter.sender_id.clone() {
            prepared = prepared.bind(("sender_id", sender_id));
        }
        if let Some(sentiment_min) = filter.sentiment_min {
            prepared = prepared.bind(("sentiment_min", sentiment_min));
        }
        if let Some(sentiment_max) = filter.sentiment_max {
            prepared = prepared.bind(("sentiment_max", sentiment_max));
        }
        if let Some(date_from) = filter.date_from {
            prepared = prepared.bind(("date_from", SurrealDatetime::from(date_from)));
        }
        if let Some(date_to) = filter.date_to {
            prepared = prepared.bind(("date_to", SurrealDatetime::from(date_to)));
        }
        if let Some(text) = filter.text.clone() {
            prepared = prepared.bind(("text", text));
        }

        let messages: Vec<Message> = prepared.await?.take(0)?;
        Ok(messages)
    }

    /// Activity summary for one sender: totals, a 7-day window over authored
    /// time, and the five most frequent categories.
    pub async fn sender_stats(
        db: &SurrealDbClient,
        sender_id: &str,
    ) -> Result<SenderStats, AppError> {
        let filter = MessageFilter {
            sender_id: Some(sender_id.to_owned()),
            ..MessageFilter::default()
        };
        let messages = Self::list(db, &filter).await?;

        let week_ago = Utc::now() - chrono::Duration::days(7);
        let recent_messages = messages
            .iter()
            .filter(|message| message.timestamp >= week_ago)
            .count();

        let mut category_counts: std::collections::HashMap<&str, usize> =
            std::collections::HashMap::new();
        for message in &messages {
            for category in &message.categories {
                *category_counts.entry(category.as_str()).or_insert(0) += 1;
            }
        }
        let mut ranked: Vec<(&str, usize)> = category_counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        let top_categories = ranked
            .into_iter()
            .take(5)
            .map(|(category, _)| category.to_owned())
            .collect();

        // List is timestamp-descending, so the first entry is the latest
        let last_activity = messages.first().map(|message| message.timestamp);

        Ok(SenderStats {
            total_messages: messages.len(),
            recent_messages,
            top_categories,
            last_activity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_new(content: &str, chat: Option<&str>, msg: Option<&str>) -> NewMessage {
        NewMessage {
            content: content.to_string(),
            message_type: MessageType::Text,
            sender_name: "Alice".to_string(),
            sender_id: Some("alice".to_string()),
            source: SourceType::BotForwarded,
            source_chat_id: chat.map(str::to_string),
            source_message_id: msg.map(str::to_string),
            timestamp: Utc::now(),
            attachment: None,
        }
    }

    async fn memory_db() -> SurrealDbClient {
        SurrealDbClient::memory("test_ns", &uuid::Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    #[test]
    fn identity_is_stable_for_source_triple() {
        let a = sample_new("hello", Some("chat-1"), Some("42"));
        let mut b = sample_new("different content", Some("chat-1"), Some("42"));
        b.timestamp = a.timestamp + chrono::Duration::hours(3);

        // Same triple wins over differing content/timestamps
        assert_eq!(a.identity(), b.identity());

        let other_chat = sample_new("hello", Some("chat-2"), Some("42"));
        assert_ne!(a.identity(), other_chat.identity());
    }

    #[test]
    fn identity_falls_back_to_content_and_timestamp() {
        let a = sample_new("hello", None, None);
        let same = NewMessage { ..a.clone() };
        assert_eq!(a.identity(), same.identity());

        let different = NewMessage {
            content: "other".to_string(),
            ..a.clone()
        };
        assert_ne!(a.identity(), different.identity());
    }

    #[test]
    fn from_new_starts_unprocessed() {
        let message = Message::from_new(sample_new("hello", Some("c"), Some("1")));
        assert!(!message.processed);
        assert!(!message.has_embedding);
        assert!(message.categories.is_empty());
        assert_eq!(message.sentiment, 0.0);
        assert_eq!(message.id, sample_new("hello", Some("c"), Some("1")).identity());
    }

    #[test]
    fn embeddable_text_prefers_content() {
        let mut message = Message::from_new(sample_new("caption", Some("c"), Some("1")));
        assert_eq!(message.embeddable_text(), "caption");

        message.content = String::new();
        message.summary = "photo of a receipt".to_string();
        assert_eq!(message.embeddable_text(), "photo of a receipt");
    }

    #[tokio::test]
    async fn mark_processed_persists_enrichment() {
        let db = memory_db().await;
        let message = Message::from_new(sample_new("market news today", Some("c"), Some("1")));
        db.store_item(message.clone()).await.expect("store");

        let updated = Message::mark_processed(
            &db,
            &message.id,
            vec!["news".to_string()],
            vec!["markets".to_string()],
            0.4,
            "market news".to_string(),
            None,
        )
        .await
        .expect("mark processed");

        assert!(updated.processed);
        assert_eq!(updated.categories, vec!["news".to_string()]);
        assert_eq!(updated.sentiment, 0.4);
        assert_eq!(updated.summary, "market news");
        assert!(updated.processing_error.is_none());
    }

    #[tokio::test]
    async fn listing_filters_and_orders_by_timestamp() {
        let db = memory_db().await;
        let base = Utc::now();

        for (idx, (content, category, sentiment)) in [
            ("bitcoin is pumping", "crypto", 0.8_f32),
            ("quarterly report due", "work", -0.2),
            ("new llm release", "ai-tools", 0.5),
        ]
        .iter()
        .enumerate()
        {
            let mut message = Message::from_new(sample_new(
                content,
                Some("chat"),
                Some(&format!("{idx}")),
            ));
            message.timestamp = base - chrono::Duration::hours(idx as i64);
            message.categories = vec![(*category).to_string()];
            message.sentiment = *sentiment;
            db.store_item(message).await.expect("store");
        }

        // Default: newest authored first
        let all = Message::list(&db, &MessageFilter::default())
            .await
            .expect("list");
        assert_eq!(all.len(), 3);
        assert!(all[0].timestamp >= all[1].timestamp);
        assert!(all[1].timestamp >= all[2].timestamp);

        let crypto = Message::list(
            &db,
            &MessageFilter {
                categories: Some(vec!["crypto".to_string()]),
                ..MessageFilter::default()
            },
        )
        .await
        .expect("category filter");
        assert_eq!(crypto.len(), 1);
        assert_eq!(crypto[0].content, "bitcoin is pumping");

        let positive = Message::list(
            &db,
            &MessageFilter {
                sentiment_min: Some(0.0),
                ..MessageFilter::default()
            },
        )
        .await
        .expect("sentiment filter");
        assert_eq!(positive.len(), 2);

        let substring = Message::list(
            &db,
            &MessageFilter {
                text: Some("LLM".to_string()),
                ..MessageFilter::default()
            },
        )
        .await
        .expect("substring filter");
        assert_eq!(substring.len(), 1);
        assert_eq!(substring[0].content, "new llm release");
    }

    #[tokio::test]
    async fn sender_stats_counts_and_ranks_categories() {
        let db = memory_db().await;
        let base = Utc::now();

        for idx in 0..4 {
            let mut message = Message::from_new(sample_new(
                &format!("message {idx}"),
                Some("chat"),
                Some(&format!("{idx}")),
            ));
            // Two recent, two older than the 7-day window
            message.timestamp = if idx < 2 {
                base - chrono::Duration::hours(idx as i64)
            } else {
                base - chrono::Duration::days(30)
            };
            message.categories = if idx == 3 {
                vec!["work".to_string()]
            } else {
                vec!["crypto".to_string()]
            };
            db.store_item(message).await.expect("store");
        }

        let stats = Message::sender_stats(&db, "alice").await.expect("stats");
        assert_eq!(stats.total_messages, 4);
        assert_eq!(stats.recent_messages, 2);
        assert_eq!(stats.top_categories[0], "crypto");
        assert!(stats.last_activity.is_some());

        let empty = Message::sender_stats(&db, "nobody").await.expect("stats");
        assert_eq!(empty.total_messages, 0);
        assert!(empty.last_activity.is_none());
    }
}
