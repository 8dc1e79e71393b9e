//! Message and Conversation domain types.
//!
//! These are the core value objects that flow through the entire system:
//! Host receives a message → Orchestrator processes it → Provider generates response
//! → Conversation records it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::host::{ActorId, ChannelId};

/// Identifies one ordered message history inside a scope.
///
/// Serialized as `"<actor>-<channel>"` so it can key a JSON object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ConversationKey {
    pub actor: ActorId,
    pub channel: ChannelId,
}

impl ConversationKey {
    pub fn new(actor: ActorId, channel: ChannelId) -> Self {
        Self { actor, channel }
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.actor, self.channel)
    }
}

impl From<ConversationKey> for String {
    fn from(key: ConversationKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for ConversationKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let (actor, channel) = value
            .split_once('-')
            .ok_or_else(|| format!("invalid conversation key '{value}'"))?;
        let actor = actor
            .parse()
            .map_err(|e| format!("invalid actor in conversation key '{value}': {e}"))?;
        let channel = channel
            .parse()
            .map_err(|e| format!("invalid channel in conversation key '{value}': {e}"))?;
        Ok(Self { actor, channel })
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions
    System,
    /// Result of a capability invocation
    Capability,
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Token count, filled in by the conversation store on append
    #[serde(default)]
    pub tokens: usize,

    /// Capability calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// If this is a capability result, which call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn with_role(role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            tokens: 0,
            tool_calls: Vec::new(),
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content.into())
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content.into())
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content.into())
    }

    /// Create a capability result message.
    pub fn capability_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::with_role(Role::Capability, content.into());
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }
}

/// A capability call embedded in an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageToolCall {
    /// Unique ID for this call (echoed back by the result message)
    pub id: String,

    /// Name of the capability to invoke
    pub name: String,

    /// Arguments as JSON string
    pub arguments: String,
}

/// An ordered sequence of messages for one conversation key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Ordered messages, oldest first
    pub messages: Vec<Message>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When the last message was added
    pub last_updated: DateTime<Utc>,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            messages: Vec::new(),
            created_at: now,
            last_updated: now,
        }
    }

    /// Add a message to the conversation.
    pub fn push(&mut self, message: Message) {
        self.last_updated = Utc::now();
        self.messages.push(message);
    }

    /// Cumulative token count of all retained messages.
    pub fn total_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.tokens).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
