use std::sync::Arc;

use async_openai::types::{
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ResponseFormat,
    ResponseFormatJsonSchema,
};
use async_trait::async_trait;
use common::{
    error::{classify_ai_error, AppError},
    storage::types::message::Message,
    utils::{config::AppConfig, embedding::EmbeddingProvider, retry::RetryPolicy},
};

use super::{
    enrichment::{truncate_chars, LLMAnalysis},
    instructions::{enrichment_response_schema, ENRICHMENT_SYSTEM_MESSAGE},
};

/// Seam between the pipeline and the AI capabilities. The pipeline's control
/// flow is tested against mocks of this trait; the default implementation
/// talks to the provider with retry/backoff applied.
#[async_trait]
pub trait PipelineServices: Send + Sync {
    async fn analyze_message(&self, message: &Message) -> Result<LLMAnalysis, AppError>;

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, AppError>;

    fn embedding_model(&self) -> Option<String>;
}

pub struct DefaultPipelineServices {
    openai_client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
    config: AppConfig,
    embedding_provider: Arc<EmbeddingProvider>,
    retry_policy: RetryPolicy,
    embedding_input_max_chars: usize,
}

impl DefaultPipelineServices {
    pub fn new(
        openai_client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
        config: AppConfig,
        embedding_provider: Arc<EmbeddingProvider>,
        retry_policy: RetryPolicy,
        embedding_input_max_chars: usize,
    ) -> Self {
        Self {
            openai_client,
            config,
            embedding_provider,
            retry_policy,
            embedding_input_max_chars,
        }
    }

    fn prepare_analysis_request(
        &self,
        message: &Message,
    ) -> Result<CreateChatCompletionRequest, AppError> {
        let user_message = format!(
            "Allowed categories: {}\nMessage type: {}\nMessage:\n{}",
            self.config.categories.join(", "),
            message.message_type,
            message.content,
        );

        let response_format = ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: Some("Structured analysis of one chat message".into()),
                name: "message_analysis".into(),
                schema: Some(enrichment_response_schema(&self.config.categories)),
                strict: Some(true),
            },
        };

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.config.enrichment_model)
            .messages([
                ChatCompletionRequestSystemMessage::from(ENRICHMENT_SYSTEM_MESSAGE).into(),
                ChatCompletionRequestUserMessage::from(user_message).into(),
            ])
            .response_format(response_format)
            .build()
            .map_err(classify_ai_error)?;

        Ok(request)
    }

    async fn perform_analysis(
        &self,
        request: CreateChatCompletionRequest,
    ) -> Result<LLMAnalysis, AppError> {
        let response = self
            .openai_client
            .chat()
            .create(request)
            .await
            .map_err(classify_ai_error)?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_ref())
            .ok_or(AppError::LLMParsing(
                "No content found in LLM response".into(),
            ))?;

        serde_json::from_str::<LLMAnalysis>(content).map_err(|e| {
            AppError::LLMParsing(format!("Failed to parse LLM response into analysis: {e}"))
        })
    }
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    async fn analyze_message(&self, message: &Message) -> Result<LLMAnalysis, AppError> {
        let request = self.prepare_analysis_request(message)?;

        self.retry_policy
            .run(|| {
                let request = request.clone();
                async move { self.perform_analysis(request).await }
            })
            .await
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let input = truncate_chars(text, self.embedding_input_max_chars);

        self.retry_policy
            .run(|| {
                let input = input.clone();
                async move {
                    self.embedding_provider
                        .embed(&input)
                        .await
                        .map_err(|err| AppError::TransientAI(err.to_string()))
                }
            })
            .await
    }

    fn embedding_model(&self) -> Option<String> {
        self.embedding_provider.model_code()
    }
}
