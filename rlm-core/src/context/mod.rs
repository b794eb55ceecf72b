//! Session context and context externalization for RLM orchestration.
//!
//! [`types`] holds the conversation-level data model (`SessionContext`,
//! `Message`, `ToolOutput`) used to assemble a task. [`externalize`] pushes
//! bulky auxiliary context into the interpreter as named variables instead
//! of inlining it in the prompt, preventing "context rot" from lengthy
//! prompts and tracking what was loaded in a JSON-serializable manifest.

mod externalize;
mod types;

pub use externalize::{
    sanitize_name, ContextExternalizer, ContextSource, Manifest, SourceType, VariableInfo,
    REQUIRE_CHUNKING_BYTES, WARN_SIZE_BYTES,
};
pub use types::{Message, Role, SessionContext, ToolOutput};
