//! Prompt composition for a single model call.
//!
//! Layers, in the order they reach the model:
//!
//! 1. **System**: the scope's system prompt and initial instructions, never trimmed
//! 2. **Retrieved memories**: one system message listing the hits
//! 3. **Conversation history**: newest kept, oldest dropped to fit the window
//!
//! Capability schemas travel beside the messages and are charged against the
//! same window. Composition is deterministic: identical inputs give identical
//! prompts.

use convoke_capabilities::validate_schema;
use convoke_core::capability::CapabilitySchema;
use convoke_core::message::{Message, Role};
use convoke_core::token;
use convoke_memory::MemoryHit;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Everything needed to compose one request.
pub struct CompositionInput<'a> {
    pub model: &'a str,
    pub system_prompt: &'a str,
    /// Initial instructions sent after the system prompt.
    pub instructions: &'a str,
    pub memories: &'a [MemoryHit],
    /// History plus the turn in progress, oldest first. The last entry is
    /// always kept.
    pub history: &'a [Message],
    pub capabilities: Vec<CapabilitySchema>,
    /// Tokens held back for the model's reply.
    pub completion_reserve: usize,
}

#[derive(Debug, Clone)]
pub struct ComposedPrompt {
    pub messages: Vec<Message>,
    pub capabilities: Vec<CapabilitySchema>,
    pub metadata: CompositionMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompositionMetadata {
    /// Prompt tokens available after the completion reserve.
    pub budget: usize,
    /// System layers plus capability schemas.
    pub fixed_tokens: usize,
    pub history_tokens: usize,
    pub history_included: usize,
    pub history_total: usize,
    pub capabilities_dropped: usize,
}

impl CompositionMetadata {
    pub fn total_tokens(&self) -> usize {
        self.fixed_tokens + self.history_tokens
    }
}

/// Render retrieved memories as a single context block.
pub fn memory_block(memories: &[MemoryHit]) -> Option<String> {
    if memories.is_empty() {
        return None;
    }
    let entries = memories
        .iter()
        .map(|m| format!("[{}] {}", m.name, m.text))
        .collect::<Vec<_>>()
        .join("\n\n");
    Some(format!(
        "Here is some stored knowledge that may help with the reply:\n\n{entries}"
    ))
}

/// Combine registered schemas with caller-supplied ones.
///
/// Ad hoc schemas are validated; invalid or oversized ones are dropped.
/// An ad hoc schema shadows a registered one with the same name. With
/// `extend` unset only the ad hoc schemas are offered.
pub fn merge_capabilities(
    registered: Vec<CapabilitySchema>,
    ad_hoc: &[Value],
    extend: bool,
) -> Vec<CapabilitySchema> {
    let extra: Vec<CapabilitySchema> = ad_hoc
        .iter()
        .filter_map(|raw| match validate_schema(raw) {
            Ok(schema) => Some(schema),
            Err(e) => {
                warn!(error = %e, "Dropping invalid ad hoc capability schema");
                None
            }
        })
        .collect();

    let mut merged: Vec<CapabilitySchema> = if extend {
        registered
            .into_iter()
            .filter(|s| !extra.iter().any(|e| e.name == s.name))
            .collect()
    } else {
        Vec::new()
    };
    merged.extend(extra);
    merged
}

pub fn compose(input: CompositionInput<'_>) -> ComposedPrompt {
    let model = input.model;
    let budget = token::context_window(model).saturating_sub(input.completion_reserve);

    let mut system = Vec::new();
    if !input.system_prompt.is_empty() {
        system.push(Message::system(input.system_prompt));
    }
    if !input.instructions.is_empty() {
        system.push(Message::system(input.instructions));
    }
    if let Some(block) = memory_block(input.memories) {
        system.push(Message::system(block));
    }
    let system_tokens = token::count_messages_tokens(model, &system);

    // Drop schemas from the tail until they fit beside the system layers.
    let mut capabilities = input.capabilities;
    let mut schema_tokens = token::count_schemas_tokens(model, &capabilities);
    let mut capabilities_dropped = 0;
    while system_tokens + schema_tokens > budget {
        let Some(dropped) = capabilities.pop() else {
            break;
        };
        schema_tokens -= token::count_schema_tokens(model, &dropped);
        capabilities_dropped += 1;
    }
    if capabilities_dropped > 0 {
        warn!(
            model,
            dropped = capabilities_dropped,
            "Capability schemas do not fit the context window"
        );
    }

    let fixed_tokens = system_tokens + schema_tokens;
    let remaining = budget.saturating_sub(fixed_tokens);

    let history = input.history;
    let mut start = history.len();
    let mut history_tokens = 0;
    for (i, message) in history.iter().enumerate().rev() {
        let cost = token::count_message_tokens(model, message);
        let pending = i + 1 == history.len();
        if !pending && history_tokens + cost > remaining {
            break;
        }
        history_tokens += cost;
        start = i;
    }
    // Results whose originating call fell outside the window.
    while start + 1 < history.len() && history[start].role == Role::Capability {
        history_tokens -= token::count_message_tokens(model, &history[start]);
        start += 1;
    }

    let window = &history[start..];
    let metadata = CompositionMetadata {
        budget,
        fixed_tokens,
        history_tokens,
        history_included: window.len(),
        history_total: history.len(),
        capabilities_dropped,
    };
    debug!(
        model,
        budget,
        total = metadata.total_tokens(),
        history = window.len(),
        dropped = history.len() - window.len(),
        "Prompt composed"
    );

    let mut messages = system;
    messages.extend_from_slice(window);
    ComposedPrompt {
        messages,
        capabilities,
        metadata,
    }
}
