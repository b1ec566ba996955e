use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Duplicate identity: {0}")]
    DuplicateIdentity(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Transient AI failure: {0}")]
    TransientAI(String),
    #[error("Permanent AI failure: {0}")]
    PermanentAI(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Processing error: {0}")]
    Processing(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Whether the failure is worth another attempt. Validation-class and
    /// permanent provider failures are not; everything else is assumed to be
    /// a transient condition (network, rate limit, malformed response).
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            AppError::Validation(_)
                | AppError::DuplicateIdentity(_)
                | AppError::PermanentAI(_)
                | AppError::NotFound(_)
        )
    }
}

/// Provider error codes that mean the content itself was rejected and no
/// retry will ever succeed.
const PERMANENT_ERROR_MARKERS: [&str; 3] = [
    "content_policy_violation",
    "content_filter",
    "invalid_prompt",
];

/// Classify a raw provider error into the pipeline taxonomy. Content-policy
/// rejections become `PermanentAI`; everything else (timeouts, rate limits,
/// 5xx, stream hiccups, malformed payloads) is `TransientAI`.
pub fn classify_ai_error(err: OpenAIError) -> AppError {
    match &err {
        OpenAIError::ApiError(api) => {
            let rendered = format!("{api:?}").to_lowercase();
            if PERMANENT_ERROR_MARKERS
                .iter()
                .any(|marker| rendered.contains(marker))
            {
                AppError::PermanentAI(api.message.clone())
            } else {
                AppError::TransientAI(api.message.clone())
            }
        }
        other => AppError::TransientAI(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_openai::error::ApiError;

    fn api_error(code: &str, kind: &str) -> OpenAIError {
        let api: ApiError = serde_json::from_value(serde_json::json!({
            "message": "provider says no",
            "type": kind,
            "code": code,
        }))
        .expect("api error shape");
        OpenAIError::ApiError(api)
    }

    #[test]
    fn content_policy_rejection_is_permanent() {
        let classified = classify_ai_error(api_error(
            "content_policy_violation",
            "invalid_request_error",
        ));
        assert!(matches!(classified, AppError::PermanentAI(_)));
        assert!(!classified.is_transient());
    }

    #[test]
    fn rate_limit_is_transient() {
        let classified = classify_ai_error(api_error("rate_limit_exceeded", "rate_limit_error"));
        assert!(matches!(classified, AppError::TransientAI(_)));
        assert!(classified.is_transient());
    }

    #[test]
    fn validation_errors_are_not_retryable() {
        assert!(!AppError::Validation("bad input".into()).is_transient());
        assert!(!AppError::DuplicateIdentity("msg-1".into()).is_transient());
        assert!(AppError::LLMParsing("garbled".into()).is_transient());
    }
}
