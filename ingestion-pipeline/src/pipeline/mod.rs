mod config;
mod enrichment;
mod instructions;
mod services;

pub use config::{IngestionConfig, IngestionTuning};
pub use enrichment::{EnrichmentResult, LLMAnalysis};
#[allow(clippy::module_name_repetitions)]
pub use services::{DefaultPipelineServices, PipelineServices};

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            message::Message,
            message_embedding::MessageEmbedding,
            pipeline_task::{PipelineTask, TaskErrorInfo, TaskStage},
        },
    },
    utils::{config::AppConfig, embedding::EmbeddingProvider, retry::RetryPolicy},
};
use tracing::{debug, info, warn};

/// Drives the two background stages for a message: enrichment, then
/// embedding. Stage ordering per message comes from the enrichment stage
/// being the only place the embedding task is enqueued.
#[allow(clippy::module_name_repetitions)]
pub struct MessagePipeline {
    db: Arc<SurrealDbClient>,
    pipeline_config: IngestionConfig,
    services: Arc<dyn PipelineServices>,
}

impl MessagePipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        openai_client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
        config: AppConfig,
        embedding_provider: Arc<EmbeddingProvider>,
    ) -> Result<Self, AppError> {
        let pipeline_config = IngestionConfig::from_app_config(&config);
        let services = DefaultPipelineServices::new(
            openai_client,
            config,
            embedding_provider,
            RetryPolicy::default(),
            pipeline_config.tuning.embedding_input_max_chars,
        );

        Self::with_services(db, pipeline_config, Arc::new(services))
    }

    pub fn with_services(
        db: Arc<SurrealDbClient>,
        pipeline_config: IngestionConfig,
        services: Arc<dyn PipelineServices>,
    ) -> Result<Self, AppError> {
        Ok(Self {
            db,
            pipeline_config,
            services,
        })
    }

    #[tracing::instrument(
        skip_all,
        fields(
            task_id = %task.id,
            stage = task.stage.as_str(),
            attempt = task.attempts,
            worker_id = task.worker_id.as_deref().unwrap_or("unknown-worker"),
            message_id = %task.message_id
        )
    )]
    pub async fn process_task(&self, task: PipelineTask) -> Result<(), AppError> {
        let processing_task = task.mark_processing(&self.db).await?;

        let started = Instant::now();
        match self.drive_stage(&processing_task).await {
            Ok(()) => {
                processing_task.mark_succeeded(&self.db).await?;
                info!(
                    task_id = %processing_task.id,
                    attempt = processing_task.attempts,
                    total_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "pipeline task succeeded"
                );
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                let retryable = err.is_transient();
                let error_info = TaskErrorInfo {
                    code: None,
                    message: reason.clone(),
                };

                if retryable && processing_task.can_retry() {
                    let delay = self.retry_delay(processing_task.attempts);
                    processing_task
                        .mark_failed(error_info, delay, &self.db)
                        .await?;
                    warn!(
                        task_id = %processing_task.id,
                        attempt = processing_task.attempts,
                        retry_in_secs = delay.as_secs(),
                        "pipeline task failed; scheduled retry"
                    );
                } else {
                    let failed_task = processing_task
                        .mark_failed(error_info.clone(), Duration::from_secs(0), &self.db)
                        .await?;
                    failed_task.mark_dead_letter(error_info, &self.db).await?;
                    warn!(
                        task_id = %failed_task.id,
                        attempt = failed_task.attempts,
                        "pipeline task failed; moved to dead letter queue"
                    );
                }

                Err(AppError::Processing(reason))
            }
        }
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let tuning = &self.pipeline_config.tuning;
        let capped_attempt = attempt
            .saturating_sub(1)
            .min(tuning.retry_backoff_cap_exponent);
        let multiplier = 2_u64.pow(capped_attempt);
        let delay = tuning.retry_base_delay_secs.saturating_mul(multiplier);

        Duration::from_secs(delay.min(tuning.retry_max_delay_secs))
    }

    async fn drive_stage(&self, task: &PipelineTask) -> Result<(), AppError> {
        let message: Message = self
            .db
            .get_item(&task.message_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("message {}", task.message_id)))?;

        match task.stage {
            TaskStage::Enrich => self.enrich_message(message).await,
            TaskStage::Embed => self.index_message(message).await,
        }
    }

    /// Enrichment stage. Idempotent: a message that is already processed is
    /// not analyzed again, but a missing embedding task is re-queued so an
    /// interrupted run heals itself.
    async fn enrich_message(&self, message: Message) -> Result<(), AppError> {
        if message.processed {
            debug!(message_id = %message.id, "message already processed, skipping enrichment");
            if !message.has_embedding {
                PipelineTask::enqueue(&self.db, &message.id, TaskStage::Embed).await?;
            }
            return Ok(());
        }

        let tuning = &self.pipeline_config.tuning;

        let (result, processing_error) = match self.services.analyze_message(&message).await {
            Ok(analysis) => (
                EnrichmentResult::from_analysis(
                    analysis,
                    &self.pipeline_config.taxonomy,
                    &message.content,
                    tuning.summary_max_chars,
                ),
                None,
            ),
            Err(AppError::PermanentAI(reason)) => {
                warn!(
                    message_id = %message.id,
                    reason = %reason,
                    "content rejected by provider; storing neutral enrichment"
                );
                (
                    EnrichmentResult::neutral(&message.content, tuning.summary_max_chars),
                    Some(reason),
                )
            }
            Err(other) => return Err(other),
        };

        Message::mark_processed(
            &self.db,
            &message.id,
            result.categories,
            result.tags,
            result.sentiment,
            result.summary,
            processing_error,
        )
        .await?;

        PipelineTask::enqueue(&self.db, &message.id, TaskStage::Embed).await?;

        Ok(())
    }

    /// Embedding stage. Upserts the vector under the message id, so
    /// re-indexing overwrites rather than duplicates.
    async fn index_message(&self, message: Message) -> Result<(), AppError> {
        if !message.processed {
            return Err(AppError::Processing(format!(
                "embedding requested before enrichment for message {}",
                message.id
            )));
        }

        let text = message.embeddable_text();
        if text.is_empty() {
            debug!(message_id = %message.id, "nothing to embed, leaving message structured-only");
            return Ok(());
        }

        let embedding = self.services.embed_text(text).await?;

        MessageEmbedding::new(
            message.id.clone(),
            embedding,
            text,
            self.services.embedding_model(),
        )
        .upsert(&self.db)
        .await?;

        Message::set_has_embedding(&self.db, &message.id, true).await?;

        Ok(())
    }
}
