//! Built-in capabilities that let the model manage its own memories.
//!
//! Registered under the [`MEMORY_OWNER`] owner like any other collaborator.
//! Creating and editing memories is limited to tutors of the scope.

use async_trait::async_trait;
use convoke_core::capability::{CapabilityOwner, InvocationContext};
use convoke_core::error::{CapabilityError, MemoryError};
use convoke_memory::SemanticMemory;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

/// Owner name of the built-in memory capabilities.
pub const MEMORY_OWNER: &str = "Assistant";

const CREATE_MEMORY: &str = "create_memory";
const SEARCH_MEMORIES: &str = "search_memories";
const EDIT_MEMORY: &str = "edit_memory";
const LIST_MEMORIES: &str = "list_memories";

pub struct MemoryCapabilities {
    memory: Arc<SemanticMemory>,
    tutors_only_edit: bool,
}

impl MemoryCapabilities {
    pub fn new(memory: Arc<SemanticMemory>) -> Self {
        Self {
            memory,
            tutors_only_edit: true,
        }
    }

    /// Allow anyone, not only tutors, to edit existing memories.
    pub fn with_open_editing(mut self) -> Self {
        self.tutors_only_edit = false;
        self
    }

    /// Function-calling schemas for every built-in capability.
    pub fn schemas() -> Vec<Value> {
        vec![
            json!({
                "name": CREATE_MEMORY,
                "description": "Use this to remember information that you normally wouldnt have access to. Useful when someone corrects you, tells you something new, or tells you to remember something. Use the search_memories function first to ensure no duplicates are created.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "memory_name": {
                            "type": "string",
                            "description": "A short name to describe the memory, 45 characters or less"
                        },
                        "memory_text": {
                            "type": "string",
                            "description": "The information to remember, written as if informing yourself. Include the context of the conversation as well as the important information to be retained"
                        }
                    },
                    "required": ["memory_name", "memory_text"]
                }
            }),
            json!({
                "name": SEARCH_MEMORIES,
                "description": "Use this to find information about something, always use this if you are unsure about the answer to a question.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "search_query": {
                            "type": "string",
                            "description": "A sentence or phrase describing what you are looking for, as specific as possible"
                        },
                        "amount": {
                            "type": "integer",
                            "description": "Max amount of memories to fetch. Defaults to 2"
                        }
                    },
                    "required": ["search_query"]
                }
            }),
            json!({
                "name": EDIT_MEMORY,
                "description": "Use this to edit existing memories, useful for correcting inaccurate memories after making them. Use search_memories first if the memory you need to edit is not in the conversation.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "memory_name": {
                            "type": "string",
                            "description": "The name of the memory entry, case sensitive"
                        },
                        "memory_text": {
                            "type": "string",
                            "description": "The new text that will replace the current content of the memory"
                        }
                    },
                    "required": ["memory_name", "memory_text"]
                }
            }),
            json!({
                "name": LIST_MEMORIES,
                "description": "Get a list of all your available memories",
                "parameters": {
                    "type": "object",
                    "properties": {}
                }
            }),
        ]
    }

    async fn search(&self, ctx: &InvocationContext, args: &Value) -> Result<String, CapabilityError> {
        let query = required_str(args, "search_query")?;
        let amount = args["amount"].as_u64().map(|a| a as usize);

        let hits = self
            .memory
            .search(ctx.scope, query, amount)
            .await
            .map_err(|e| execution_failed(SEARCH_MEMORIES, e))?;

        if hits.is_empty() {
            return Ok("No memories found".to_string());
        }
        Ok(hits
            .iter()
            .map(|h| format!("{} (relatedness {:.2}): {}", h.name, h.score, h.text))
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    async fn edit(&self, ctx: &InvocationContext, args: &Value) -> Result<String, CapabilityError> {
        let name = required_str(args, "memory_name")?;
        let text = required_str(args, "memory_text")?;

        if self.tutors_only_edit && !self.is_tutor(ctx).await {
            return Ok(format!("User {} is not recognized as a tutor!", ctx.actor));
        }

        match self.memory.edit(ctx.scope, name, text).await {
            Ok(_) => Ok(format!("The {name} memory has been updated")),
            Err(MemoryError::NotFound(_)) => Ok(format!("No memory named {name} exists!")),
            Err(e) => Err(execution_failed(EDIT_MEMORY, e)),
        }
    }

    async fn list(&self, ctx: &InvocationContext) -> String {
        let memories = self.memory.list(ctx.scope).await;
        if memories.is_empty() {
            return "There are no memories stored".to_string();
        }
        memories
            .into_iter()
            .map(|(name, _)| name)
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn is_tutor(&self, ctx: &InvocationContext) -> bool {
        self.memory
            .is_tutor(ctx.scope, ctx.actor, &ctx.actor_roles)
            .await
    }
}

fn required_str<'a>(args: &'a Value, field: &str) -> Result<&'a str, CapabilityError> {
    args[field]
        .as_str()
        .ok_or_else(|| CapabilityError::InvalidArguments(format!("Missing '{field}' parameter")))
}

fn execution_failed(name: &str, e: MemoryError) -> CapabilityError {
    CapabilityError::ExecutionFailed {
        name: name.to_string(),
        reason: e.to_string(),
    }
}

#[async_trait]
impl CapabilityOwner for MemoryCapabilities {
    fn name(&self) -> &str {
        MEMORY_OWNER
    }

    fn implements(&self, capability: &str) -> bool {
        matches!(
            capability,
            CREATE_MEMORY | SEARCH_MEMORIES | EDIT_MEMORY | LIST_MEMORIES
        )
    }

    async fn invoke(
        &self,
        capability: &str,
        ctx: &InvocationContext,
        arguments: Value,
    ) -> Result<String, CapabilityError> {
        debug!(capability, scope = ctx.scope, "Memory capability invoked");
        match capability {
            CREATE_MEMORY => {
                let name = required_str(&arguments, "memory_name")?;
                let text = required_str(&arguments, "memory_text")?;
                Ok(self
                    .memory
                    .knowledge_store(ctx.scope, ctx.actor, &ctx.actor_roles, name, text)
                    .await)
            }
            SEARCH_MEMORIES => self.search(ctx, &arguments).await,
            EDIT_MEMORY => self.edit(ctx, &arguments).await,
            LIST_MEMORIES => Ok(self.list(ctx).await),
            other => Err(CapabilityError::NotFound(other.to_string())),
        }
    }
}
