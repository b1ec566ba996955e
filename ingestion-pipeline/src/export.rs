use chrono::{DateTime, NaiveDateTime, Utc};
use common::storage::types::message::{MessageType, NewMessage, SourceType};
use regex::Regex;
use tracing::debug;

/// Export timestamp grammars seen in the wild: dotted European, slashed
/// 12/24-hour, and the bracketed variant. Sender and body follow after the
/// dash (or bracket) separator.
const LINE_PATTERNS: [&str; 3] = [
    // 6.4.2025, 11:18 - Name: Message
    r"^(\d{1,2}\.\d{1,2}\.\d{2,4}),?\s+(\d{1,2}:\d{2}(?::\d{2})?)\s*-\s*([^:]+):\s*(.+)$",
    // 12/25/22, 3:30 PM - Name: Message  (also covers 24-hour day/month order)
    r"^(\d{1,2}/\d{1,2}/\d{2,4}),?\s+(\d{1,2}:\d{2}(?::\d{2})?\s*(?:[APap][Mm])?)\s*-\s*([^:]+):\s*(.+)$",
    // [12/25/22, 3:30:45 PM] Name: Message
    r"^\[(\d{1,2}/\d{1,2}/\d{2,4}),?\s+(\d{1,2}:\d{2}(?::\d{2})?\s*[APap][Mm])\]\s*([^:]+):\s*(.+)$",
];

/// Formats tried against the captured date + time. Day/month order is
/// ambiguous in slashed dates; the order here resolves ties the way the
/// source exports do.
const DATETIME_FORMATS: [&str; 8] = [
    "%d.%m.%Y %H:%M",
    "%d.%m.%y %H:%M",
    "%m/%d/%y %I:%M %p",
    "%m/%d/%Y %I:%M %p",
    "%d/%m/%Y %H:%M",
    "%d/%m/%y %H:%M",
    "%m/%d/%y %I:%M:%S %p",
    "%d/%m/%Y %I:%M %p",
];

/// Platform chatter that is not a user message.
const SYSTEM_PATTERNS: [&str; 9] = [
    "messages and calls are end-to-end encrypted",
    "created group",
    "added",
    "removed",
    "left",
    "changed",
    "security code changed",
    "blocked this contact",
    "unblocked this contact",
];

/// Result of parsing one export blob. `parse` is pure, so the sequence is
/// finite and can be re-produced from the same input at will.
#[derive(Debug, Clone, Default)]
pub struct ExportOutcome {
    pub messages: Vec<NewMessage>,
    pub warnings: Vec<String>,
    pub skipped_system: usize,
}

pub struct ExportParser {
    line_patterns: Vec<Regex>,
}

impl Default for ExportParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportParser {
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let line_patterns = LINE_PATTERNS
            .iter()
            .map(|pattern| Regex::new(pattern).expect("static line pattern compiles"))
            .collect();
        Self { line_patterns }
    }

    /// Parse an export blob into normalizer input. Never fails: malformed
    /// lines become continuations of the previous message, or warnings when
    /// nothing precedes them.
    pub fn parse(&self, raw_text: &str, chat_name: &str) -> ExportOutcome {
        let mut outcome = ExportOutcome::default();
        let mut current: Option<NewMessage> = None;

        for (index, raw_line) in raw_text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }

            let Some((date_str, time_str, sender, body)) = self.match_line(line) else {
                // Continuation of the previous message body
                if let Some(message) = current.as_mut() {
                    message.content.push('\n');
                    message.content.push_str(line);
                } else {
                    outcome
                        .warnings
                        .push(format!("line {}: unrecognized format, skipped", index + 1));
                }
                continue;
            };

            if let Some(message) = current.take() {
                outcome.messages.push(message);
            }

            if is_system_message(&body) {
                debug!(line = index + 1, "skipping platform system message");
                outcome.skipped_system += 1;
                continue;
            }

            let timestamp = match parse_datetime(&date_str, &time_str) {
                Some(parsed) => parsed,
                None => {
                    outcome.warnings.push(format!(
                        "line {}: unparseable timestamp '{date_str} {time_str}', using ingestion time",
                        index + 1
                    ));
                    Utc::now()
                }
            };

            let message_type = detect_message_type(&body);
            let content = if message_type == MessageType::Text {
                body
            } else {
                // Placeholder only; the media itself was not exported
                String::new()
            };

            let sender_name = sender.trim().to_string();
            let sender_id = sender_name.to_lowercase().replace(' ', "_");

            current = Some(NewMessage {
                content,
                message_type,
                sender_name,
                sender_id: Some(sender_id),
                source: SourceType::ChatExport,
                source_chat_id: Some(chat_name.to_string()),
                source_message_id: None,
                timestamp,
                attachment: None,
            });
        }

        if let Some(message) = current.take() {
            outcome.messages.push(message);
        }

        outcome
    }

    fn match_line(&self, line: &str) -> Option<(String, String, String, String)> {
        for pattern in &self.line_patterns {
            if let Some(captures) = pattern.captures(line) {
                let date = captures.get(1)?.as_str().to_string();
                let time = captures.get(2)?.as_str().to_string();
                let sender = captures.get(3)?.as_str().to_string();
                let body = captures.get(4)?.as_str().to_string();
                return Some((date, time, sender, body));
            }
        }
        None
    }
}

fn parse_datetime(date_str: &str, time_str: &str) -> Option<DateTime<Utc>> {
    let candidate = format!("{} {}", date_str.trim(), time_str.trim());
    for format in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(&candidate, format) {
            return Some(parsed.and_utc());
        }
    }
    None
}

fn is_system_message(body: &str) -> bool {
    let lowered = body.to_lowercase();
    SYSTEM_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
}

fn detect_message_type(body: &str) -> MessageType {
    let lowered = body.to_lowercase();

    if lowered.contains("<media omitted>") || lowered.contains("image omitted") {
        MessageType::Image
    } else if lowered.contains("video omitted") {
        MessageType::Video
    } else if lowered.contains("audio omitted") {
        MessageType::Audio
    } else if lowered.contains("document omitted")
        || lowered.contains(".pdf")
        || lowered.contains(".doc")
    {
        MessageType::Document
    } else {
        MessageType::Text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    fn parse(raw: &str) -> ExportOutcome {
        ExportParser::new().parse(raw, "Test Chat")
    }

    #[test]
    fn well_formed_two_line_message_round_trips() {
        let outcome = parse("1/1/24, 10:00 AM - Alice: Hello\nWorld");

        assert_eq!(outcome.messages.len(), 1);
        assert!(outcome.warnings.is_empty());

        let message = &outcome.messages[0];
        assert_eq!(message.content, "Hello\nWorld");
        assert_eq!(message.sender_name, "Alice");
        assert_eq!(message.sender_id.as_deref(), Some("alice"));
        assert_eq!(message.source, SourceType::ChatExport);
        assert_eq!(message.source_chat_id.as_deref(), Some("Test Chat"));
        assert!(message.source_message_id.is_none());
        assert_eq!(message.timestamp.hour(), 10);
        assert_eq!(message.timestamp.year(), 2024);
    }

    #[test]
    fn malformed_first_line_warns_and_later_lines_parse() {
        let outcome = parse("this line has no timestamp\n1/1/24, 10:00 AM - Alice: Hi");

        assert_eq!(outcome.messages.len(), 1);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].starts_with("line 1"));
        assert_eq!(outcome.messages[0].content, "Hi");
    }

    #[test]
    fn empty_input_is_not_an_error() {
        let outcome = parse("");
        assert!(outcome.messages.is_empty());
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn only_unparseable_lines_warn_per_line() {
        let outcome = parse("garbage one\ngarbage two\ngarbage three");
        assert!(outcome.messages.is_empty());
        assert_eq!(outcome.warnings.len(), 3);
    }

    #[test]
    fn locale_formats_all_parse() {
        let outcome = parse(
            "6.4.2025, 11:18 - Dana: dotted format\n\
             25/12/2022, 15:30 - Eli: euro format\n\
             [12/25/22, 3:30:45 PM] Fay: bracketed format",
        );

        assert_eq!(outcome.messages.len(), 3);
        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.messages[0].timestamp.day(), 6);
        assert_eq!(outcome.messages[0].timestamp.month(), 4);
        assert_eq!(outcome.messages[1].timestamp.hour(), 15);
        assert_eq!(outcome.messages[2].timestamp.hour(), 15);
        assert_eq!(outcome.messages[2].timestamp.minute(), 30);
    }

    #[test]
    fn media_placeholders_set_type_and_clear_content() {
        let outcome = parse(
            "1/1/24, 10:00 AM - Alice: <Media omitted>\n\
             1/1/24, 10:01 AM - Alice: video omitted\n\
             1/1/24, 10:02 AM - Alice: audio omitted\n\
             1/1/24, 10:03 AM - Alice: document omitted",
        );

        let types: Vec<MessageType> = outcome
            .messages
            .iter()
            .map(|message| message.message_type)
            .collect();
        assert_eq!(
            types,
            vec![
                MessageType::Image,
                MessageType::Video,
                MessageType::Audio,
                MessageType::Document
            ]
        );
        assert!(outcome.messages.iter().all(|m| m.content.is_empty()));
    }

    #[test]
    fn system_messages_are_skipped_not_imported() {
        let outcome = parse(
            "1/1/24, 10:00 AM - Chat: Messages and calls are end-to-end encrypted\n\
             1/1/24, 10:01 AM - Alice: actual message",
        );

        assert_eq!(outcome.messages.len(), 1);
        assert_eq!(outcome.skipped_system, 1);
        assert_eq!(outcome.messages[0].content, "actual message");
    }

    #[test]
    fn parse_is_restartable() {
        let parser = ExportParser::new();
        let raw = "1/1/24, 10:00 AM - Alice: Hello";
        let first = parser.parse(raw, "chat");
        let second = parser.parse(raw, "chat");
        assert_eq!(first.messages, second.messages);
        assert_eq!(first.warnings, second.warnings);
    }
}
