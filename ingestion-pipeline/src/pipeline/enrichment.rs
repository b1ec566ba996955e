use serde::Deserialize;
use tracing::warn;

/// Raw provider payload, exactly as deserialized. Unknown or missing fields
/// default instead of failing; nothing from here reaches storage without
/// passing through [`EnrichmentResult::from_analysis`].
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct LLMAnalysis {
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub sentiment: f32,
    #[serde(default)]
    pub summary: String,
}

/// Validated enrichment output merged into the message record.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentResult {
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub sentiment: f32,
    pub summary: String,
}

impl EnrichmentResult {
    /// Coerce a raw analysis into the stored shape: categories outside the
    /// taxonomy are dropped, sentiment is clamped to [-1, 1], and the summary
    /// falls back to truncated content. Short content skips summarization
    /// entirely and keeps the content verbatim.
    pub fn from_analysis(
        analysis: LLMAnalysis,
        taxonomy: &[String],
        content: &str,
        summary_max_chars: usize,
    ) -> Self {
        let mut categories = Vec::with_capacity(analysis.categories.len());
        for category in analysis.categories {
            if taxonomy.contains(&category) {
                if !categories.contains(&category) {
                    categories.push(category);
                }
            } else {
                warn!(category, "dropping category outside the taxonomy");
            }
        }

        let sentiment = analysis.sentiment.clamp(-1.0, 1.0);

        let summary = if content.chars().count() <= summary_max_chars {
            content.to_string()
        } else if analysis.summary.is_empty() {
            truncate_chars(content, summary_max_chars)
        } else {
            truncate_chars(&analysis.summary, summary_max_chars)
        };

        Self {
            categories,
            tags: analysis.tags,
            sentiment,
            summary,
        }
    }

    /// Neutral enrichment for content the provider permanently rejects. The
    /// message is still fully populated so it never blocks the pipeline.
    pub fn neutral(content: &str, summary_max_chars: usize) -> Self {
        Self {
            categories: Vec::new(),
            tags: Vec::new(),
            sentiment: 0.0,
            summary: truncate_chars(content, summary_max_chars),
        }
    }
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}
