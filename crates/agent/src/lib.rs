//! The orchestration core of Convoke.
//!
//! Each inbound message runs one turn:
//!
//! 1. **Retrieve** the scope's settings and the memories related to the message
//! 2. **Compose** system instructions, memories, history and capability schemas
//! 3. **Call the model** through a retrying, time-bounded provider
//! 4. **If capability calls**: dispatch them, append the results, go back to 3
//! 5. **Otherwise**: store the reply and schedule a save
//!
//! The loop ends when the model answers with text only, or when the scope's
//! function-call ceiling is reached.

pub mod assistant;
pub mod composer;
pub mod maintenance;
pub mod orchestrator;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use assistant::Assistant;
pub use composer::{ComposedPrompt, CompositionInput, CompositionMetadata, compose};
pub use maintenance::{GcReport, collect_garbage};
pub use orchestrator::{ChatRequest, Orchestrator, TurnReport, TurnState};
