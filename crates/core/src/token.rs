//! Token counting utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token. This is within
//! ~10% of BPE tokenizers (cl100k and friends) on English text and keeps the
//! counter a pure function with no model files to load.

use crate::capability::CapabilitySchema;
use crate::message::Message;

/// Context window assumed for models missing from [`MODEL_CONTEXT_WINDOWS`].
pub const DEFAULT_CONTEXT_WINDOW: usize = 4096;

/// Per-message overhead for role name, delimiters and formatting markers.
pub const MESSAGE_OVERHEAD: usize = 4;

/// Known context window sizes, in tokens.
pub const MODEL_CONTEXT_WINDOWS: &[(&str, usize)] = &[
    ("gpt-3.5-turbo", 4096),
    ("gpt-3.5-turbo-1106", 16385),
    ("gpt-3.5-turbo-0125", 16385),
    ("gpt-3.5-turbo-16k", 16384),
    ("gpt-3.5-turbo-instruct", 8192),
    ("gpt-4", 8192),
    ("gpt-4-32k", 32768),
    ("gpt-4-turbo", 128000),
    ("gpt-4-turbo-preview", 128000),
    ("gpt-4-1106-preview", 128000),
    ("gpt-4-0125-preview", 128000),
    ("gpt-4-turbo-2024-04-09", 128000),
    ("gpt-4o", 128000),
    ("gpt-4o-2024-05-13", 128000),
    ("gpt-4o-mini", 128000),
    ("gpt-4o-mini-2024-07-18", 128000),
];

/// Context window of `model`, falling back to [`DEFAULT_CONTEXT_WINDOW`].
pub fn context_window(model: &str) -> usize {
    MODEL_CONTEXT_WINDOWS
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, size)| *size)
        .unwrap_or(DEFAULT_CONTEXT_WINDOW)
}

/// Count the tokens in `text` for `model`.
///
/// Heuristic: 1 token ≈ 4 characters, rounded up. The model argument is
/// accepted so a real tokenizer can be dropped in per model family.
pub fn count_tokens(_model: &str, text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.chars().count().div_ceil(4)
}

/// Tokens for a single message including per-message overhead.
pub fn count_message_tokens(model: &str, message: &Message) -> usize {
    let calls: usize = message
        .tool_calls
        .iter()
        .map(|c| count_tokens(model, &c.name) + count_tokens(model, &c.arguments))
        .sum();
    MESSAGE_OVERHEAD + count_tokens(model, &message.content) + calls
}

/// Tokens for a slice of messages.
pub fn count_messages_tokens(model: &str, messages: &[Message]) -> usize {
    messages
        .iter()
        .map(|m| count_message_tokens(model, m))
        .sum()
}

/// Tokens for a capability schema (serialized as JSON).
pub fn count_schema_tokens(model: &str, schema: &CapabilitySchema) -> usize {
    let json = serde_json::to_string(schema).unwrap_or_default();
    count_tokens(model, &json)
}

/// Tokens for a slice of capability schemas.
pub fn count_schemas_tokens(model: &str, schemas: &[CapabilitySchema]) -> usize {
    schemas.iter().map(|s| count_schema_tokens(model, s)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageToolCall;

    const MODEL: &str = "gpt-4o-mini";

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(count_tokens(MODEL, ""), 0);
    }

    #[test]
    fn four_chars_is_one_token() {
        assert_eq!(count_tokens(MODEL, "test"), 1);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(count_tokens(MODEL, "hello"), 2);
    }

    #[test]
    fn counts_characters_not_bytes() {
        // 4 multi-byte characters
        assert_eq!(count_tokens(MODEL, "日本語だ"), 1);
    }

    #[test]
    fn message_includes_overhead() {
        let msg = Message::user("test"); // 1 token + 4 overhead
        assert_eq!(count_message_tokens(MODEL, &msg), 5);
    }

    #[test]
    fn message_counts_tool_calls() {
        let mut msg = Message::assistant("");
        msg.tool_calls.push(MessageToolCall {
            id: "call_1".into(),
            name: "echo".into(),
            arguments: "{}".into(),
        });
        // overhead 4 + name 1 + args 1
        assert_eq!(count_message_tokens(MODEL, &msg), 6);
    }

    #[test]
    fn multiple_messages() {
        let msgs = vec![Message::user("hello"), Message::assistant("world")];
        assert_eq!(count_messages_tokens(MODEL, &msgs), 12);
    }

    #[test]
    fn known_and_unknown_context_windows() {
        assert_eq!(context_window("gpt-4"), 8192);
        assert_eq!(context_window("gpt-4o-mini"), 128000);
        assert_eq!(context_window("my-local-llama"), DEFAULT_CONTEXT_WINDOW);
    }

    #[test]
    fn schema_tokens_positive() {
        let schema = CapabilitySchema {
            name: "test_capability".into(),
            description: "A test capability".into(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        };
        assert!(count_schema_tokens(MODEL, &schema) > 0);
        assert_eq!(count_schemas_tokens(MODEL, &[]), 0);
    }
}
