use common::storage::types::message::Message;

/// Context handed to the generator plus the ids of the messages that
/// actually made it in. Source attribution is built from this, never from
/// the wider retrieval set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledContext {
    pub text: String,
    pub included_ids: Vec<String>,
}

/// Render retrieved messages into a bounded context block. `messages` must
/// arrive best-first; once the budget runs out the remaining (lower-ranked)
/// entries are dropped.
pub fn assemble_context(messages: &[Message], max_chars: usize) -> AssembledContext {
    let mut assembled = AssembledContext::default();
    let mut used_chars = 0usize;

    for message in messages {
        let body = if message.content.is_empty() {
            &message.summary
        } else {
            &message.content
        };
        if body.is_empty() {
            continue;
        }

        let entry = format!(
            "[{}] {}: {}",
            message.timestamp.format("%Y-%m-%d %H:%M"),
            message.sender_name,
            body
        );
        let entry_chars = entry.chars().count() + 1;
        if used_chars + entry_chars > max_chars {
            break;
        }

        if !assembled.text.is_empty() {
            assembled.text.push('\n');
        }
        assembled.text.push_str(&entry);
        used_chars += entry_chars;
        assembled.included_ids.push(message.id.clone());
    }

    assembled
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::storage::types::message::{MessageType, NewMessage, SourceType};

    fn message(content: &str, idx: usize) -> Message {
        let mut message = Message::from_new(NewMessage {
            content: content.to_string(),
            message_type: MessageType::Text,
            sender_name: "Alice".to_string(),
            sender_id: None,
            source: SourceType::BotForwarded,
            source_chat_id: Some("chat".to_string()),
            source_message_id: Some(format!("{idx}")),
            timestamp: Utc::now(),
            attachment: None,
        });
        message.id = format!("msg-{idx}");
        message
    }

    #[test]
    fn includes_everything_under_budget() {
        let messages = vec![message("first", 1), message("second", 2)];
        let assembled = assemble_context(&messages, 10_000);

        assert_eq!(
            assembled.included_ids,
            vec!["msg-1".to_string(), "msg-2".to_string()]
        );
        assert!(assembled.text.contains("first"));
        assert!(assembled.text.contains("second"));
    }

    #[test]
    fn over_budget_drops_lowest_ranked_first() {
        let messages = vec![
            message(&"a".repeat(50), 1),
            message(&"b".repeat(50), 2),
            message(&"c".repeat(50), 3),
        ];
        // Budget fits roughly two rendered entries
        let assembled = assemble_context(&messages, 160);

        assert_eq!(
            assembled.included_ids,
            vec!["msg-1".to_string(), "msg-2".to_string()]
        );
        assert!(
            !assembled.text.contains("ccc"),
            "dropped entry must not leak"
        );
    }

    #[test]
    fn ids_always_match_rendered_entries() {
        let messages = vec![message("kept", 1), message(&"x".repeat(500), 2)];
        let assembled = assemble_context(&messages, 120);

        for id in &assembled.included_ids {
            assert!(id.starts_with("msg-"));
        }
        assert_eq!(assembled.included_ids, vec!["msg-1".to_string()]);
    }

    #[test]
    fn summary_substitutes_for_empty_content() {
        let mut media = message("", 1);
        media.summary = "a photo of the receipt".to_string();
        let assembled = assemble_context(&[media], 1_000);

        assert!(assembled.text.contains("a photo of the receipt"));
        assert_eq!(assembled.included_ids.len(), 1);
    }

    #[test]
    fn skips_entries_with_no_text_at_all() {
        let empty = message("", 1);
        let assembled = assemble_context(&[empty], 1_000);
        assert!(assembled.included_ids.is_empty());
        assert!(assembled.text.is_empty());
    }
}
