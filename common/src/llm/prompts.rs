use chrono::{DateTime, Utc};
use serde_json::json;

pub const ENRICHMENT_SYSTEM_MESSAGE: &str = "You annotate text fragments for a personal knowledge base. \
Given one fragment, produce: a one or two sentence summary, up to three question/answer pairs a user \
might later ask that this fragment answers, and the named entities it mentions. Stay strictly within \
the fragment; do not invent details.";

pub const FACT_EXTRACTION_SYSTEM_MESSAGE: &str = "You extract atomic facts from personal notes as \
subject/predicate/object triples. Use short snake_case predicates (lives_in, employer, visited, likes). \
Resolve relative time expressions (yesterday, last week) against the reference date given in the user \
message and emit the resolved date in valid_from as YYYY-MM-DD. Preserve spatial context in the object \
or location field. Emit a confidence between 0 and 1 per fact. Only extract what the text states.";

pub const FACT_JUDGE_SYSTEM_MESSAGE: &str = "Fact Gatekeeper: you compare a newly extracted fact against \
existing similar facts and decide one of: \
DUPLICATE - the new fact adds no new information and refers to the same time period. \
SUPERSEDE - the new fact is a more detailed, more current, or corrected version of one existing fact; \
output that fact's id as target_id. \
NEW - a different fact entirely, or the same relation at a clearly different time.";

pub const TAG_SUGGESTION_SYSTEM_MESSAGE: &str = "Suggest up to five short lowercase topic tags for the \
given note. Prefer reusing the existing tags when they fit. Output only the tags.";

pub const CHAT_SYSTEM_MESSAGE: &str = "You are a personal knowledge assistant. Use ONLY the provided \
context to answer the user's question. If the answer is not explicitly supported by the context, say \
that you do not have enough information. Do not use outside knowledge beyond general definitions that \
help explain the context.";

pub fn enrichment_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "summary": { "type": "string" },
            "generated_qas": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "question": { "type": "string" },
                        "answer": { "type": "string" }
                    },
                    "required": ["question", "answer"],
                    "additionalProperties": false
                }
            },
            "entities": {
                "type": "array",
                "items": { "type": "string" }
            }
        },
        "required": ["summary", "generated_qas", "entities"],
        "additionalProperties": false
    })
}

pub fn fact_extraction_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "facts": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "subject": { "type": "string" },
                        "predicate": { "type": "string" },
                        "object": { "type": "string" },
                        "confidence": { "type": "number" },
                        "valid_from": { "type": ["string", "null"] },
                        "location": { "type": ["string", "null"] }
                    },
                    "required": ["subject", "predicate", "object", "confidence", "valid_from", "location"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["facts"],
        "additionalProperties": false
    })
}

pub fn fact_judge_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "decision": { "type": "string", "enum": ["NEW", "DUPLICATE", "SUPERSEDE"] },
            "target_id": { "type": ["string", "null"] }
        },
        "required": ["decision", "target_id"],
        "additionalProperties": false
    })
}

pub fn tag_suggestion_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "tags": {
                "type": "array",
                "items": { "type": "string" }
            }
        },
        "required": ["tags"],
        "additionalProperties": false
    })
}

pub fn fact_extraction_user_message(
    chunk_text: &str,
    reference_date: Option<DateTime<Utc>>,
) -> String {
    match reference_date {
        Some(date) => format!(
            "Reference date: {}\n\nText:\n{chunk_text}",
            date.format("%Y-%m-%d")
        ),
        None => format!("Reference date: unknown\n\nText:\n{chunk_text}"),
    }
}

pub fn fact_judge_user_message(
    fact_text: &str,
    valid_from: Option<DateTime<Utc>>,
    candidate_lines: &[String],
) -> String {
    let date = valid_from.map_or_else(
        || "Unknown".to_string(),
        |d| d.format("%Y-%m-%d").to_string(),
    );
    format!(
        "New Fact: \"{fact_text}\" (Date: {date})\n\nExisting Similar Facts:\n{}",
        candidate_lines.join("\n")
    )
}

pub fn chat_user_message(query: &str, context: &[String]) -> String {
    format!("Context:\n{}\n\nQuestion: {query}", context.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fact_extraction_message_carries_reference_date() {
        let reference: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().unwrap();
        let message = fact_extraction_user_message("I moved yesterday.", Some(reference));
        assert!(message.contains("Reference date: 2024-01-01"));
        assert!(message.contains("I moved yesterday."));

        let without = fact_extraction_user_message("text", None);
        assert!(without.contains("Reference date: unknown"));
    }

    #[test]
    fn test_schemas_are_objects() {
        for schema in [
            enrichment_schema(),
            fact_extraction_schema(),
            fact_judge_schema(),
            tag_suggestion_schema(),
        ] {
            assert_eq!(schema["type"], "object");
            assert!(schema["required"].is_array());
        }
    }
}
