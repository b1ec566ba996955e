#![allow(clippy::missing_docs_in_private_items)]

pub mod context;
pub mod generation;

use std::sync::Arc;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{message::Message, message_embedding::MessageEmbedding},
    },
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
use tracing::{instrument, warn};

use crate::{
    context::assemble_context,
    generation::{create_chat_request, create_user_message, process_llm_response},
};

/// Canned reply when nothing is indexed; no generation call is spent on it.
pub static NO_DATA_ANSWER: &str =
    "There are no indexed messages to search yet. Forward or import some messages first.";

/// Degraded reply when retrieval worked but generation did not. The sources
/// still go back to the caller.
pub static GENERATION_FAILED_ANSWER: &str =
    "Matching messages were found, but generating an answer failed. The sources are attached; please try again.";

/// A grounded answer plus the ids of the messages its context was built
/// from, in retrieval rank order.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryAnswer {
    pub answer: String,
    pub source_message_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub top_k: usize,
    pub context_max_chars: usize,
    pub model: String,
}

impl QueryConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            top_k: config.query_top_k,
            context_max_chars: config.context_max_chars,
            model: config.query_model.clone(),
        }
    }
}

/// Retrieval-augmented query engine over the message stores. Must share its
/// [`EmbeddingProvider`] with the indexing side; mixing embedding spaces
/// invalidates the similarity scores.
pub struct QueryEngine {
    db: Arc<SurrealDbClient>,
    openai_client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
    embedding_provider: Arc<EmbeddingProvider>,
    config: QueryConfig,
}

impl QueryEngine {
    pub fn new(
        db: Arc<SurrealDbClient>,
        openai_client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
        embedding_provider: Arc<EmbeddingProvider>,
        config: QueryConfig,
    ) -> Self {
        Self {
            db,
            openai_client,
            embedding_provider,
            config,
        }
    }

    /// Semantic search: top-k most similar messages, best first. A small
    /// corpus simply returns fewer; no padding.
    #[instrument(skip_all, fields(top_k))]
    pub async fn search(&self, question: &str, top_k: usize) -> Result<Vec<Message>, AppError> {
        let query_embedding = self
            .embedding_provider
            .embed(question)
            .await
            .map_err(|err| AppError::TransientAI(err.to_string()))?;

        let hits = MessageEmbedding::find_similar(&self.db, &query_embedding, top_k).await?;

        let mut messages = Vec::with_capacity(hits.len());
        for hit in hits {
            match self.db.get_item::<Message>(&hit.message_id).await? {
                Some(message) => messages.push(message),
                None => {
                    // Vector without its record; skip rather than fabricate
                    warn!(message_id = %hit.message_id, "embedding hit has no message record");
                }
            }
        }

        Ok(messages)
    }

    /// Answer a natural-language question from the stored corpus, citing the
    /// messages whose text was actually sent to the generator.
    #[instrument(skip_all)]
    pub async fn answer(
        &self,
        question: &str,
        top_k: Option<usize>,
    ) -> Result<QueryAnswer, AppError> {
        let top_k = top_k.unwrap_or(self.config.top_k);

        if MessageEmbedding::count(&self.db).await? == 0 {
            return Ok(QueryAnswer {
                answer: NO_DATA_ANSWER.to_string(),
                source_message_ids: Vec::new(),
            });
        }

        let messages = self.search(question, top_k).await?;
        let assembled = assemble_context(&messages, self.config.context_max_chars);

        if assembled.included_ids.is_empty() {
            return Ok(QueryAnswer {
                answer: NO_DATA_ANSWER.to_string(),
                source_message_ids: Vec::new(),
            });
        }

        let request = create_chat_request(
            create_user_message(&assembled.text, question),
            &self.config.model,
        )
        .map_err(AppError::OpenAI)?;

        let generated = match self.openai_client.chat().create(request).await {
            Ok(response) => process_llm_response(response),
            Err(err) => Err(AppError::OpenAI(err)),
        };

        match generated {
            Ok(parsed) => Ok(QueryAnswer {
                answer: parsed.answer,
                source_message_ids: assembled.included_ids,
            }),
            Err(err) => {
                // Internal provider errors never surface verbatim
                warn!(error = %err, "answer generation failed; returning degraded answer");
                Ok(QueryAnswer {
                    answer: GENERATION_FAILED_ANSWER.to_string(),
                    source_message_ids: assembled.included_ids,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::storage::types::message::{MessageType, NewMessage, SourceType};
    use uuid::Uuid;

    const TEST_DIMENSION: usize = 64;

    fn unreachable_client() -> Arc<async_openai::Client<async_openai::config::OpenAIConfig>> {
        // Points at a closed port so any generation attempt fails fast
        Arc::new(async_openai::Client::with_config(
            async_openai::config::OpenAIConfig::new()
                .with_api_key("test-key")
                .with_api_base("http://127.0.0.1:9"),
        ))
    }

    fn engine(db: Arc<SurrealDbClient>, provider: Arc<EmbeddingProvider>) -> QueryEngine {
        QueryEngine::new(
            db,
            unreachable_client(),
            provider,
            QueryConfig {
                top_k: 5,
                context_max_chars: 4_000,
                model: "gpt-4o-mini".to_string(),
            },
        )
    }

    async fn setup_db() -> Arc<SurrealDbClient> {
        let db = SurrealDbClient::memory("query_test", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb");
        MessageEmbedding::redefine_hnsw_index(&db, TEST_DIMENSION)
            .await
            .expect("index");
        Arc::new(db)
    }

    async fn store_indexed_message(
        db: &SurrealDbClient,
        provider: &EmbeddingProvider,
        content: &str,
        idx: usize,
    ) -> Message {
        let mut message = Message::from_new(NewMessage {
            content: content.to_string(),
            message_type: MessageType::Text,
            sender_name: "Alice".to_string(),
            sender_id: Some("alice".to_string()),
            source: SourceType::BotForwarded,
            source_chat_id: Some("chat".to_string()),
            source_message_id: Some(format!("{idx}")),
            timestamp: Utc::now(),
            attachment: None,
        });
        message.processed = true;
        message.has_embedding = true;
        message.summary = content.to_string();
        db.store_item(message.clone()).await.expect("store message");

        let vector = provider.embed(content).await.expect("embed");
        MessageEmbedding::new(message.id.clone(), vector, content, None)
            .upsert(db)
            .await
            .expect("store embedding");

        message
    }

    #[tokio::test]
    async fn empty_corpus_returns_canned_answer_without_generation() {
        let db = setup_db().await;
        let provider = Arc::new(EmbeddingProvider::new_hashed(TEST_DIMENSION).expect("provider"));
        let engine = engine(Arc::clone(&db), provider);

        // The client is unreachable, so reaching generation would error; a
        // clean canned answer proves no call was made.
        let answer = engine
            .answer("anything in there?", None)
            .await
            .expect("answer");
        assert_eq!(answer.answer, NO_DATA_ANSWER);
        assert!(answer.source_message_ids.is_empty());
    }

    #[tokio::test]
    async fn search_ranks_by_similarity_and_hydrates_in_order() {
        let db = setup_db().await;
        let provider = Arc::new(EmbeddingProvider::new_hashed(TEST_DIMENSION).expect("provider"));

        store_indexed_message(
            &db,
            &provider,
            "bitcoin price is climbing again this week",
            1,
        )
        .await;
        store_indexed_message(&db, &provider, "dinner with grandma on sunday evening", 2).await;

        let engine = engine(Arc::clone(&db), provider);
        let results = engine
            .search("what is happening with the bitcoin price", 2)
            .await
            .expect("search");

        assert!(!results.is_empty());
        assert!(
            results[0].content.contains("bitcoin"),
            "closest message should rank first"
        );
    }

    #[tokio::test]
    async fn small_corpus_returns_fewer_than_top_k() {
        let db = setup_db().await;
        let provider = Arc::new(EmbeddingProvider::new_hashed(TEST_DIMENSION).expect("provider"));
        store_indexed_message(&db, &provider, "only one message here", 1).await;

        let engine = engine(Arc::clone(&db), provider);
        let results = engine.search("message", 10).await.expect("search");
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn generation_failure_returns_degraded_answer_with_sources() {
        let db = setup_db().await;
        let provider = Arc::new(EmbeddingProvider::new_hashed(TEST_DIMENSION).expect("provider"));
        let stored =
            store_indexed_message(&db, &provider, "the deploy finished friday night", 1).await;

        let engine = engine(Arc::clone(&db), provider);
        let answer = engine
            .answer("when did the deploy finish?", None)
            .await
            .expect("degraded answer is still an answer");

        assert_eq!(answer.answer, GENERATION_FAILED_ANSWER);
        assert_eq!(answer.source_message_ids, vec![stored.id]);
    }
}
