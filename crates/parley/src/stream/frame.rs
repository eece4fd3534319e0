use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;

const TEXT_PREFIX: &str = "0:";
const EVENT_PREFIX: &str = "data: ";
const ERROR_PREFIX: &str = "3:";
const FINISH_PREFIX: &str = "d:";

/// Trailer written by the relay once a response completed normally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishFrame {
    pub finish_reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
}

/// Payload of a `data: ` line
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    Json(Value),
    /// Not parseable as JSON, kept as the literal remainder after the prefix
    Literal(String),
}

/// One decoded line of a streamed response
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    /// `0:"..."`, a text delta with its surrounding quotes removed
    TextDelta(String),
    /// `data: ...`, a server-sent event payload
    Event(SseEvent),
    /// `d:{...}`, normal end of the response
    Finish(FinishFrame),
    /// `3:"..."`, the response failed after output had started
    Error(String),
    /// Anything else
    Plain(String),
}

impl StreamFrame {
    /// Classify one line. Blank lines carry nothing and yield `None`.
    pub fn parse(line: &str) -> Option<StreamFrame> {
        if line.trim().is_empty() {
            return None;
        }

        if let Some(rest) = line.strip_prefix(TEXT_PREFIX) {
            return Some(StreamFrame::TextDelta(strip_quotes(rest).to_string()));
        }

        if let Some(rest) = line.strip_prefix(EVENT_PREFIX) {
            let event = match serde_json::from_str(rest) {
                Ok(value) => SseEvent::Json(value),
                Err(_) => SseEvent::Literal(rest.to_string()),
            };
            return Some(StreamFrame::Event(event));
        }

        // Trailers only count when their payload is well formed, otherwise the line is text
        if let Some(rest) = line.strip_prefix(FINISH_PREFIX) {
            if let Ok(finish) = serde_json::from_str::<FinishFrame>(rest) {
                return Some(StreamFrame::Finish(finish));
            }
        }

        if let Some(rest) = line.strip_prefix(ERROR_PREFIX) {
            if let Ok(message) = serde_json::from_str::<String>(rest) {
                return Some(StreamFrame::Error(message));
            }
        }

        Some(StreamFrame::Plain(line.to_string()))
    }

    /// The text this frame contributes to the assistant message, if any
    pub fn text(&self) -> Option<Cow<'_, str>> {
        match self {
            StreamFrame::TextDelta(text) | StreamFrame::Plain(text) => Some(Cow::Borrowed(text)),
            StreamFrame::Event(SseEvent::Json(value)) => value
                .pointer("/choices/0/delta/content")
                .and_then(Value::as_str)
                .filter(|content| !content.is_empty())
                .map(Cow::Borrowed),
            StreamFrame::Event(SseEvent::Literal(text)) => Some(Cow::Borrowed(text)),
            StreamFrame::Finish(_) | StreamFrame::Error(_) => None,
        }
    }
}

/// Remove one leading and one trailing double quote, leaving escapes untouched
fn strip_quotes(text: &str) -> &str {
    let text = text.strip_prefix('"').unwrap_or(text);
    text.strip_suffix('"').unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_of(line: &str) -> Option<String> {
        StreamFrame::parse(line).and_then(|frame| frame.text().map(|t| t.into_owned()))
    }

    #[test]
    fn test_text_delta_strips_quotes_only() {
        assert_eq!(text_of(r#"0:"Hi""#), Some("Hi".to_string()));
        assert_eq!(text_of(r#"0:" there""#), Some(" there".to_string()));
        assert_eq!(text_of(r#"0:"a\nb""#), Some(r"a\nb".to_string()));
        assert_eq!(text_of(r#"0:"say "hi"""#), Some(r#"say "hi""#.to_string()));
        assert_eq!(text_of("0:unquoted"), Some("unquoted".to_string()));
    }

    #[test]
    fn test_event_with_delta_content() {
        let line = r#"data: {"choices":[{"delta":{"content":"X"}}]}"#;
        assert_eq!(text_of(line), Some("X".to_string()));
    }

    #[test]
    fn test_event_without_content_contributes_nothing() {
        let line = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert!(matches!(
            StreamFrame::parse(line),
            Some(StreamFrame::Event(SseEvent::Json(_)))
        ));
        assert_eq!(text_of(line), None);
    }

    #[test]
    fn test_event_that_is_not_json_is_literal() {
        assert_eq!(
            StreamFrame::parse("data: not-json"),
            Some(StreamFrame::Event(SseEvent::Literal("not-json".to_string())))
        );
        assert_eq!(text_of("data: not-json"), Some("not-json".to_string()));
    }

    #[test]
    fn test_plain_and_blank_lines() {
        assert_eq!(
            StreamFrame::parse("just words"),
            Some(StreamFrame::Plain("just words".to_string()))
        );
        assert_eq!(StreamFrame::parse(""), None);
        assert_eq!(StreamFrame::parse("   "), None);
        // no space after the colon means this is not an event line
        assert_eq!(text_of("data:x"), Some("data:x".to_string()));
    }

    #[test]
    fn test_trailers() {
        assert_eq!(
            StreamFrame::parse(r#"d:{"finishReason":"stop"}"#),
            Some(StreamFrame::Finish(FinishFrame {
                finish_reason: "stop".to_string(),
                usage: None,
            }))
        );
        assert_eq!(
            StreamFrame::parse(r#"3:"Too many requests. Please try again later.""#),
            Some(StreamFrame::Error(
                "Too many requests. Please try again later.".to_string()
            ))
        );
    }

    #[test]
    fn test_malformed_trailers_are_plain_text() {
        assert_eq!(text_of("d:day one"), Some("d:day one".to_string()));
        assert_eq!(text_of("3:00 pm"), Some("3:00 pm".to_string()));
        assert_eq!(
            StreamFrame::parse(r#"d:{"usage":{}}"#),
            Some(StreamFrame::Plain(r#"d:{"usage":{}}"#.to_string()))
        );
    }
}
