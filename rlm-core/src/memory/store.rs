//! SQLite-backed memory node store.
//!
//! Implements the consumed memory contract — `CreateNode`, `GetNode`,
//! `ListNodes`, `IncrementAccess` — against the three typed node kinds the
//! core cares about. Anything beyond that (hyperedges, tier evolution) is
//! the memory graph's own internal business, not this core's.

use crate::error::{Error, Result};
use crate::memory::schema::{initialize_schema, is_initialized};
use crate::memory::types::{Node, NodeId, NodeQuery, NodeType};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// SQLite-backed memory store.
pub struct SqliteMemoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMemoryStore {
    /// Open or create a memory store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::MemoryStorage(e.to_string()))?;

        if !is_initialized(&conn) {
            initialize_schema(&conn).map_err(|e| Error::MemoryStorage(e.to_string()))?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::MemoryStorage(e.to_string()))?;
        initialize_schema(&conn).map_err(|e| Error::MemoryStorage(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("failed to lock connection: {}", e)))?;
        f(&conn).map_err(|e| Error::MemoryStorage(e.to_string()))
    }

    /// Create a node.
    pub fn create_node(&self, node: &Node) -> Result<()> {
        self.with_conn(|conn| {
            let metadata = node
                .metadata
                .as_ref()
                .map(|m| serde_json::to_string(m).unwrap_or_default());

            conn.execute(
                "INSERT INTO nodes (
                    id, node_type, content, confidence,
                    created_at, last_accessed, access_count, metadata
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    node.id.to_string(),
                    node.node_type.to_string(),
                    node.content,
                    node.confidence,
                    node.created_at.to_rfc3339(),
                    node.last_accessed.to_rfc3339(),
                    node.access_count as i64,
                    metadata,
                ],
            )?;
            Ok(())
        })
    }

    /// Get a node by ID.
    pub fn get_node(&self, id: &NodeId) -> Result<Option<Node>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, node_type, content, confidence,
                        created_at, last_accessed, access_count, metadata
                 FROM nodes WHERE id = ?1",
                params![id.to_string()],
                Self::row_to_node,
            )
            .optional()
        })
    }

    /// List nodes matching a filter.
    pub fn list_nodes(&self, query: &NodeQuery) -> Result<Vec<Node>> {
        self.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT id, node_type, content, confidence,
                        created_at, last_accessed, access_count, metadata
                 FROM nodes WHERE 1=1",
            );
            let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(ref types) = query.node_types {
                let placeholders: Vec<String> = types.iter().map(|_| "?".to_string()).collect();
                sql.push_str(&format!(" AND node_type IN ({})", placeholders.join(",")));
                for t in types {
                    params_vec.push(Box::new(t.to_string()));
                }
            }

            if let Some(min_conf) = query.min_confidence {
                sql.push_str(" AND confidence >= ?");
                params_vec.push(Box::new(min_conf));
            }

            if let Some(ref substring) = query.content_contains {
                sql.push_str(" AND content LIKE ?");
                params_vec.push(Box::new(format!("%{}%", substring)));
            }

            sql.push_str(" ORDER BY last_accessed DESC");

            if let Some(limit) = query.limit {
                sql.push_str(&format!(" LIMIT {}", limit));
            }
            if let Some(offset) = query.offset {
                sql.push_str(&format!(" OFFSET {}", offset));
            }

            let params_refs: Vec<&dyn rusqlite::ToSql> =
                params_vec.iter().map(|b| b.as_ref()).collect();

            let mut stmt = conn.prepare(&sql)?;
            let nodes = stmt
                .query_map(params_refs.as_slice(), Self::row_to_node)?
                .filter_map(|r| r.ok())
                .collect();

            Ok(nodes)
        })
    }

    /// Bump a node's access count and last-accessed timestamp.
    pub fn increment_access(&self, id: &NodeId) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE nodes SET access_count = access_count + 1, last_accessed = ?2 WHERE id = ?1",
                params![id.to_string(), Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    fn row_to_node(row: &rusqlite::Row) -> rusqlite::Result<Node> {
        let id_str: String = row.get(0)?;
        let node_type_str: String = row.get(1)?;

        let metadata: Option<HashMap<String, Value>> = row
            .get::<_, Option<String>>(7)?
            .and_then(|s| serde_json::from_str(&s).ok());

        let node_type = match node_type_str.as_str() {
            "experience" => NodeType::Experience,
            "decision" => NodeType::Decision,
            _ => NodeType::Fact,
        };

        Ok(Node {
            id: NodeId::parse(&id_str).unwrap_or_else(|_| NodeId::new()),
            node_type,
            content: row.get(2)?,
            confidence: row.get(3)?,
            created_at: parse_datetime(row.get::<_, String>(4)?),
            last_accessed: parse_datetime(row.get::<_, String>(5)?),
            access_count: row.get::<_, i64>(6)? as u64,
            metadata,
        })
    }

    /// Summary statistics about the store.
    pub fn stats(&self) -> Result<MemoryStats> {
        self.with_conn(|conn| {
            let total_nodes: i64 =
                conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;

            let mut stmt = conn.prepare("SELECT node_type, COUNT(*) FROM nodes GROUP BY node_type")?;
            let nodes_by_type: HashMap<String, i64> = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .filter_map(|r| r.ok())
                .collect();

            Ok(MemoryStats {
                total_nodes: total_nodes as u64,
                nodes_by_type,
            })
        })
    }
}

/// Statistics about the memory store.
#[derive(Debug, Clone)]
pub struct MemoryStats {
    pub total_nodes: u64,
    pub nodes_by_type: HashMap<String, i64>,
}

/// An entry retained for API compatibility with callers tracking node
/// lifecycle events; the core itself never evolves tiers.
#[derive(Debug, Clone)]
pub struct EvolutionEntry {
    pub operation: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_get_node() {
        let store = SqliteMemoryStore::in_memory().unwrap();
        let node = Node::new(NodeType::Fact, "the API uses JWT for auth");

        store.create_node(&node).unwrap();
        let retrieved = store.get_node(&node.id).unwrap().unwrap();

        assert_eq!(retrieved.content, "the API uses JWT for auth");
        assert_eq!(retrieved.node_type, NodeType::Fact);
        assert_eq!(retrieved.access_count, 0);
    }

    #[test]
    fn test_list_nodes_by_type() {
        let store = SqliteMemoryStore::in_memory().unwrap();

        store.create_node(&Node::new(NodeType::Fact, "fact 1")).unwrap();
        store.create_node(&Node::new(NodeType::Fact, "fact 2")).unwrap();
        store
            .create_node(&Node::new(NodeType::Experience, "experience 1"))
            .unwrap();

        let facts = store
            .list_nodes(&NodeQuery::new().node_types(vec![NodeType::Fact]))
            .unwrap();

        assert_eq!(facts.len(), 2);
    }

    #[test]
    fn test_list_nodes_content_filter() {
        let store = SqliteMemoryStore::in_memory().unwrap();
        store
            .create_node(&Node::new(NodeType::Fact, "the secret access code is CODE-1234"))
            .unwrap();
        store.create_node(&Node::new(NodeType::Fact, "unrelated fact")).unwrap();

        let matches = store
            .list_nodes(&NodeQuery::new().content_contains("secret"))
            .unwrap();

        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn test_increment_access() {
        let store = SqliteMemoryStore::in_memory().unwrap();
        let node = Node::new(NodeType::Fact, "test");
        store.create_node(&node).unwrap();

        store.increment_access(&node.id).unwrap();
        store.increment_access(&node.id).unwrap();

        let updated = store.get_node(&node.id).unwrap().unwrap();
        assert_eq!(updated.access_count, 2);
    }

    #[test]
    fn test_stats() {
        let store = SqliteMemoryStore::in_memory().unwrap();
        store.create_node(&Node::new(NodeType::Fact, "f1")).unwrap();
        store.create_node(&Node::new(NodeType::Decision, "d1")).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_nodes, 2);
    }
}
