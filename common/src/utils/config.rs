use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    OpenAI,
    Hashed,
}

fn default_embedding_backend() -> EmbeddingBackend {
    EmbeddingBackend::OpenAI
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_enrichment_model")]
    pub enrichment_model: String,
    #[serde(default = "default_query_model")]
    pub query_model: String,
    #[serde(default = "default_embedding_backend")]
    pub embedding_backend: EmbeddingBackend,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    /// The controlled category taxonomy enrichment may assign from.
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    #[serde(default = "default_query_top_k")]
    pub query_top_k: usize,
    #[serde(default = "default_context_max_chars")]
    pub context_max_chars: usize,
    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_enrichment_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_query_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_categories() -> Vec<String> {
    [
        "crypto",
        "ai-tools",
        "news",
        "personal",
        "work",
        "entertainment",
        "finance",
        "tech",
        "health",
        "travel",
    ]
    .iter()
    .map(|category| (*category).to_string())
    .collect()
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_query_top_k() -> usize {
    10
}

fn default_context_max_chars() -> usize {
    6_000
}

fn default_summary_max_chars() -> usize {
    240
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
