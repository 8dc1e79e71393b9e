//! Capabilities the model may invoke.
//!
//! The registry tracks which owner exposes which capability and validates
//! schemas on registration. `memory_tools` is the built-in owner that lets
//! the model create, search, edit and list memories.

pub mod memory_tools;
pub mod registry;
pub mod schema;

pub use memory_tools::{MEMORY_OWNER, MemoryCapabilities};
pub use registry::CapabilityRegistry;
pub use schema::{MAX_SCHEMA_TOKENS, validate_schema};
