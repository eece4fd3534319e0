use serde_json::json;

use super::frame::FinishFrame;
use crate::providers::base::Usage;

/// Formats relay output as newline delimited frames, compatible with the ai sdk data stream
pub struct ProtocolFormatter;

impl ProtocolFormatter {
    /// Text deltas start with "0:" followed by a JSON string
    pub fn format_text(text: &str) -> String {
        let encoded_text = serde_json::to_string(text).unwrap_or_else(|_| String::from("\"\""));
        format!("0:{}\n", encoded_text)
    }

    /// Errors after output has started use "3:" followed by a JSON string
    pub fn format_error(message: &str) -> String {
        let encoded = serde_json::to_string(message).unwrap_or_else(|_| String::from("\"\""));
        format!("3:{}\n", encoded)
    }

    /// Finish messages start with "d:"
    pub fn format_finish(reason: &str, usage: &Usage) -> String {
        let finish = FinishFrame {
            finish_reason: reason.to_string(),
            usage: Some(json!({
                "promptTokens": usage.input_tokens.unwrap_or(0),
                "completionTokens": usage.output_tokens.unwrap_or(0),
            })),
        };
        let encoded = serde_json::to_string(&finish).unwrap_or_else(|_| String::from("{}"));
        format!("d:{}\n", encoded)
    }
}
