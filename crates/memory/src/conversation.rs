//! Per-(actor, channel) conversation history with retention and token budgets.

use chrono::{DateTime, Duration, Utc};
use convoke_core::host::ScopeId;
use convoke_core::message::{Conversation, ConversationKey, Message, Role};
use convoke_core::token;
use std::sync::Arc;
use tracing::debug;

use crate::db::Db;
use crate::limits::ResolvedLimits;

/// Oldest timestamp kept by a retention window of `seconds`.
///
/// `None` means nothing is old enough to drop: the window is disabled (0) or
/// reaches back further than a timestamp can represent.
pub fn retention_cutoff(now: DateTime<Utc>, seconds: u64) -> Option<DateTime<Utc>> {
    if seconds == 0 {
        return None;
    }
    i64::try_from(seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|window| now.checked_sub_signed(window))
}

/// Apply retention and budget limits to a conversation, oldest first.
///
/// Order: retention window, message-count cap, token budget, then any
/// capability results left at the head without the call that produced them.
/// Returns the number of messages dropped.
pub fn enforce_limits(conv: &mut Conversation, limits: &ResolvedLimits, now: DateTime<Utc>) -> usize {
    let before = conv.messages.len();

    if let Some(cutoff) = retention_cutoff(now, limits.max_retention_time) {
        conv.messages.retain(|m| m.timestamp >= cutoff);
    }

    if limits.max_retention > 0 && conv.messages.len() > limits.max_retention {
        let excess = conv.messages.len() - limits.max_retention;
        conv.messages.drain(..excess);
    }

    let mut total = conv.total_tokens();
    let mut cut = 0;
    while total > limits.max_tokens && cut < conv.messages.len() {
        total -= conv.messages[cut].tokens;
        cut += 1;
    }
    conv.messages.drain(..cut);

    let orphans = conv
        .messages
        .iter()
        .take_while(|m| m.role == Role::Capability)
        .count();
    conv.messages.drain(..orphans);

    before - conv.messages.len()
}

pub struct ConversationStore {
    db: Arc<Db>,
}

impl ConversationStore {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    /// Append a message and trim the conversation back within its limits.
    ///
    /// Returns the resulting (message count, token count).
    pub async fn append(
        &self,
        scope: ScopeId,
        key: ConversationKey,
        mut message: Message,
        limits: &ResolvedLimits,
    ) -> (usize, usize) {
        message.tokens = token::count_message_tokens(&limits.model, &message);

        let handle = self.db.scope(scope).await;
        let mut conf = handle.write().await;
        let conv = conf.conversations.entry(key).or_default();
        conv.push(message);
        let dropped = enforce_limits(conv, limits, Utc::now());
        if dropped > 0 {
            debug!(scope, conversation = %key, dropped, "Trimmed conversation");
        }
        (conv.messages.len(), conv.total_tokens())
    }

    /// The conversation's messages, oldest first. Empty if none exist.
    pub async fn get(&self, scope: ScopeId, key: ConversationKey) -> Vec<Message> {
        let Some(handle) = self.db.get(scope).await else {
            return Vec::new();
        };
        let conf = handle.read().await;
        conf.conversations
            .get(&key)
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }

    pub async fn reset(&self, scope: ScopeId, key: ConversationKey) -> bool {
        let Some(handle) = self.db.get(scope).await else {
            return false;
        };
        handle.write().await.conversations.remove(&key).is_some()
    }

    /// Drop every conversation in the scope. Returns how many were removed.
    pub async fn reset_all(&self, scope: ScopeId) -> usize {
        let Some(handle) = self.db.get(scope).await else {
            return 0;
        };
        let mut conf = handle.write().await;
        let count = conf.conversations.len();
        conf.conversations.clear();
        count
    }

    /// (message count, token count) of one conversation.
    pub async fn stats(&self, scope: ScopeId, key: ConversationKey) -> (usize, usize) {
        let Some(handle) = self.db.get(scope).await else {
            return (0, 0);
        };
        let conf = handle.read().await;
        conf.conversations
            .get(&key)
            .map(|c| (c.messages.len(), c.total_tokens()))
            .unwrap_or((0, 0))
    }

    /// Drop whole conversations idle for longer than the scope's retention window.
    pub async fn expire_stale(&self, scope: ScopeId, now: DateTime<Utc>) -> usize {
        let Some(handle) = self.db.get(scope).await else {
            return 0;
        };
        let mut conf = handle.write().await;
        let Some(cutoff) = retention_cutoff(now, conf.max_retention_time) else {
            return 0;
        };
        let before = conf.conversations.len();
        conf.conversations
            .retain(|_, c| c.last_updated >= cutoff && !c.is_empty());
        before - conf.conversations.len()
    }
}
