//! The memory graph's consumed contract.
//!
//! The content-addressed memory graph is an external collaborator; the core
//! only needs `CreateNode` / `GetNode` / `ListNodes` / `IncrementAccess` on
//! three typed node kinds (`Fact`, `Experience`, `Decision`). This module is
//! a real SQLite-backed implementation of that narrow contract — useful on
//! its own, but never a requirement the rest of the core depends on beyond
//! the trait-shaped operations `MemoryQuery` actions call.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rlm_core::memory::{SqliteMemoryStore, Node, NodeType};
//!
//! let store = SqliteMemoryStore::in_memory()?;
//!
//! let fact = Node::new(NodeType::Fact, "The API uses JWT for auth")
//!     .with_confidence(0.95);
//! store.create_node(&fact)?;
//! store.increment_access(&fact.id)?;
//! ```

mod schema;
mod store;
mod types;

pub use schema::{get_schema_version, initialize_schema, is_initialized, SCHEMA_VERSION};
pub use store::{EvolutionEntry, MemoryStats, SqliteMemoryStore};
pub use types::{Node, NodeId, NodeQuery, NodeType};
