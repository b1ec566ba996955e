use async_openai::{
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
        ResponseFormat, ResponseFormatJsonSchema,
    },
};
use common::error::AppError;
use serde::Deserialize;
use serde_json::json;

pub static QUERY_SYSTEM_MESSAGE: &str = "\
You answer questions about a personal chat archive. Answer strictly from the \
context messages provided in the request; do not use outside knowledge. If \
the context is insufficient to answer, say so plainly instead of guessing. \
Respond with JSON matching the provided schema.";

#[derive(Debug, Deserialize)]
pub struct LLMQueryResponse {
    pub answer: String,
}

pub fn query_response_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "answer": { "type": "string" }
        },
        "required": ["answer"],
        "additionalProperties": false
    })
}

pub fn create_user_message(context: &str, question: &str) -> String {
    format!(
        r"
        Context Messages:
        ==================
        {context}

        User Question:
        ==================
        {question}
        "
    )
}

pub fn create_chat_request(
    user_message: String,
    model: &str,
) -> Result<CreateChatCompletionRequest, OpenAIError> {
    let response_format = ResponseFormat::JsonSchema {
        json_schema: ResponseFormatJsonSchema {
            description: Some("Grounded answer over retrieved chat messages".into()),
            name: "grounded_answer".into(),
            schema: Some(query_response_schema()),
            strict: Some(true),
        },
    };

    CreateChatCompletionRequestArgs::default()
        .model(model)
        .messages([
            ChatCompletionRequestSystemMessage::from(QUERY_SYSTEM_MESSAGE).into(),
            ChatCompletionRequestUserMessage::from(user_message).into(),
        ])
        .response_format(response_format)
        .build()
}

pub fn process_llm_response(
    response: CreateChatCompletionResponse,
) -> Result<LLMQueryResponse, AppError> {
    response
        .choices
        .first()
        .and_then(|choice| choice.message.content.as_ref())
        .ok_or(AppError::LLMParsing(
            "No content found in LLM response".into(),
        ))
        .and_then(|content| {
            serde_json::from_str::<LLMQueryResponse>(content).map_err(|e| {
                AppError::LLMParsing(format!("Failed to parse LLM response into answer: {e}"))
            })
        })
}
