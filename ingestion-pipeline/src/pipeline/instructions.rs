use serde_json::json;

pub static ENRICHMENT_SYSTEM_MESSAGE: &str = "\
You are a message analyst for a personal chat archive. Analyze the submitted \
message and return: categories (at most 3, chosen ONLY from the allowed list \
given in the request), tags (at most 5 short keywords or topics found in the \
message), a sentiment score between -1 (negative) and 1 (positive), and a \
brief summary of at most 50 words. Respond with JSON matching the provided \
schema and nothing else.";

/// Strict response schema for the enrichment call. The category enum is the
/// deployment's taxonomy, so out-of-taxonomy answers are rejected at the
/// provider when it honors the schema, and dropped by validation when it
/// does not.
pub fn enrichment_response_schema(taxonomy: &[String]) -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "categories": {
                "type": "array",
                "items": { "type": "string", "enum": taxonomy }
            },
            "tags": {
                "type": "array",
                "items": { "type": "string" }
            },
            "sentiment": { "type": "number" },
            "summary": { "type": "string" }
        },
        "required": ["categories", "tags", "sentiment", "summary"],
        "additionalProperties": false
    })
}
