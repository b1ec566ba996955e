use common::utils::config::AppConfig;

/// Pipeline-level knobs, split out so tests can shrink delays and budgets.
/// The taxonomy is an explicit value here rather than a shared global so
/// deployments (and tests) can swap it freely.
#[derive(Debug, Clone, Default)]
pub struct IngestionConfig {
    pub taxonomy: Vec<String>,
    pub tuning: IngestionTuning,
}

impl IngestionConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            taxonomy: config.categories.clone(),
            tuning: IngestionTuning {
                summary_max_chars: config.summary_max_chars,
                ..IngestionTuning::default()
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionTuning {
    /// Base delay for task-queue retries, doubled per attempt.
    pub retry_base_delay_secs: u64,
    /// Ceiling for the task-queue retry delay.
    pub retry_max_delay_secs: u64,
    /// Exponent cap so the doubling cannot overflow.
    pub retry_backoff_cap_exponent: u32,
    /// Longest summary the enrichment stage stores.
    pub summary_max_chars: usize,
    /// Longest text handed to the embedding model.
    pub embedding_input_max_chars: usize,
}

impl Default for IngestionTuning {
    fn default() -> Self {
        Self {
            retry_base_delay_secs: 30,
            retry_max_delay_secs: 900,
            retry_backoff_cap_exponent: 5,
            summary_max_chars: 240,
            embedding_input_max_chars: 12_000,
        }
    }
}
