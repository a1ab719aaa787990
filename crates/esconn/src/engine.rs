//! 🔌 Engine -- the remote search engine, seen through exactly the verbs we need and no more.
//!
//! 🎭 This module is the casting agency for "the thing on the other end of the wire".
//! In production that's an Elasticsearch cluster spoken to over HTTP. In tests it's an
//! [`InMemoryEngine`] that remembers everything and judges nothing. The orchestration code
//! upstream can't tell them apart, which is the whole point.
//!
//! 🧠 Knowledge graph:
//! - [`Engine`]: one async method per remote verb. Mutating verbs hand back the raw JSON
//!   response so the caller can show it to the response handler.
//! - [`EngineBackend`]: enum dispatch over the concrete engines. Cheap to clone, both
//!   variants share their innards (connection pool / cluster state).
//! - [`ConnectionFactory`]: how the connector lazily births its handle, exactly once.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};

pub(crate) mod bulk;
pub mod elasticsearch;
pub mod in_mem;

pub use elasticsearch::{ElasticsearchEngine, EngineConfig};
pub use in_mem::InMemoryEngine;

/// 📦 One write inside a bulk request. Order matters; the engine applies them as listed.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOperation {
    Index {
        index: String,
        id: String,
        source: Value,
    },
    Delete {
        index: String,
        id: String,
    },
}

impl BulkOperation {
    /// 🎯 The index this operation lands in.
    pub fn index(&self) -> &str {
        match self {
            BulkOperation::Index { index, .. } | BulkOperation::Delete { index, .. } => index,
        }
    }

    /// 🏷️ The document id this operation touches.
    pub fn id(&self) -> &str {
        match self {
            BulkOperation::Index { id, .. } | BulkOperation::Delete { id, .. } => id,
        }
    }
}

/// 📦 A whole bulk request: the operations, one optional pipeline for every index op in it,
/// and the refresh flag. `refresh: None` leaves the engine default alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkRequest {
    pub operations: Vec<BulkOperation>,
    pub pipeline: Option<String>,
    pub refresh: Option<bool>,
}

/// ✍️ A single immediate document write.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDocumentRequest {
    pub index: String,
    pub id: String,
    pub source: Value,
    pub pipeline: Option<String>,
    pub refresh: bool,
}

/// 🔀 One action of an atomic alias update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasAction {
    Add { index: String, alias: String },
    Remove { index: String, alias: String },
}

impl AliasAction {
    /// 📡 The `{"add": {...}}` / `{"remove": {...}}` shape `_aliases` wants.
    pub fn to_json(&self) -> Value {
        match self {
            AliasAction::Add { index, alias } => json!({"add": {"index": index, "alias": alias}}),
            AliasAction::Remove { index, alias } => {
                json!({"remove": {"index": index, "alias": alias}})
            }
        }
    }
}

/// 🔌 The remote verbs this crate consumes.
///
/// `indices` parameters take a comma-joined list of names, or `_all`.
#[async_trait]
pub trait Engine: Send + Sync {
    /// 🔍 True for a physical index *or* an alias of that name, same as the REST API.
    async fn index_exists(&self, index: &str) -> Result<bool>;
    async fn create_index(&self, index: &str, definition: &Value) -> Result<Value>;
    async fn delete_index(&self, index: &str) -> Result<Value>;
    async fn refresh_index(&self, index: &str) -> Result<Value>;
    async fn alias_exists(&self, alias: &str) -> Result<bool>;
    /// 🔀 `{"<physical index>": {"aliases": {"<alias>": {}}}, ...}`
    async fn get_alias(&self, alias: &str) -> Result<Value>;
    /// 🔀 Every action applies together or none do.
    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<Value>;
    async fn index_document(&self, request: &IndexDocumentRequest) -> Result<Value>;
    /// 🔍 `None` when the document or its index is missing. That's an answer, not a failure.
    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Value>>;
    /// 🗑️ Deleting a missing document reports `"result": "not_found"` instead of failing.
    async fn delete_document(&self, index: &str, id: &str, refresh: bool) -> Result<Value>;
    async fn bulk(&self, request: &BulkRequest) -> Result<Value>;
    /// 🔎 `scroll: Some(keep_alive)` opens a scroll cursor and returns its `_scroll_id`.
    async fn search(&self, indices: &str, body: &Value, scroll: Option<&str>) -> Result<Value>;
    async fn scroll(&self, scroll_id: &str, keep_alive: &str) -> Result<Value>;
    async fn clear_scroll(&self, scroll_id: &str) -> Result<Value>;
    async fn put_pipeline(&self, id: &str, definition: &Value) -> Result<Value>;
    async fn delete_pipeline(&self, id: &str) -> Result<Value>;
    /// 🔢 `{"count": n, ...}`
    async fn count(&self, indices: &str, body: &Value) -> Result<Value>;
}

/// 🎭 The many faces of an engine. Clone it freely; clones share the same connection/state.
#[derive(Debug, Clone)]
pub enum EngineBackend {
    Elasticsearch(ElasticsearchEngine),
    InMemory(InMemoryEngine),
}

#[async_trait]
impl Engine for EngineBackend {
    async fn index_exists(&self, index: &str) -> Result<bool> {
        match self {
            EngineBackend::Elasticsearch(es) => es.index_exists(index).await,
            EngineBackend::InMemory(mem) => mem.index_exists(index).await,
        }
    }

    async fn create_index(&self, index: &str, definition: &Value) -> Result<Value> {
        match self {
            EngineBackend::Elasticsearch(es) => es.create_index(index, definition).await,
            EngineBackend::InMemory(mem) => mem.create_index(index, definition).await,
        }
    }

    async fn delete_index(&self, index: &str) -> Result<Value> {
        match self {
            EngineBackend::Elasticsearch(es) => es.delete_index(index).await,
            EngineBackend::InMemory(mem) => mem.delete_index(index).await,
        }
    }

    async fn refresh_index(&self, index: &str) -> Result<Value> {
        match self {
            EngineBackend::Elasticsearch(es) => es.refresh_index(index).await,
            EngineBackend::InMemory(mem) => mem.refresh_index(index).await,
        }
    }

    async fn alias_exists(&self, alias: &str) -> Result<bool> {
        match self {
            EngineBackend::Elasticsearch(es) => es.alias_exists(alias).await,
            EngineBackend::InMemory(mem) => mem.alias_exists(alias).await,
        }
    }

    async fn get_alias(&self, alias: &str) -> Result<Value> {
        match self {
            EngineBackend::Elasticsearch(es) => es.get_alias(alias).await,
            EngineBackend::InMemory(mem) => mem.get_alias(alias).await,
        }
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<Value> {
        match self {
            EngineBackend::Elasticsearch(es) => es.update_aliases(actions).await,
            EngineBackend::InMemory(mem) => mem.update_aliases(actions).await,
        }
    }

    async fn index_document(&self, request: &IndexDocumentRequest) -> Result<Value> {
        match self {
            EngineBackend::Elasticsearch(es) => es.index_document(request).await,
            EngineBackend::InMemory(mem) => mem.index_document(request).await,
        }
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Value>> {
        match self {
            EngineBackend::Elasticsearch(es) => es.get_document(index, id).await,
            EngineBackend::InMemory(mem) => mem.get_document(index, id).await,
        }
    }

    async fn delete_document(&self, index: &str, id: &str, refresh: bool) -> Result<Value> {
        match self {
            EngineBackend::Elasticsearch(es) => es.delete_document(index, id, refresh).await,
            EngineBackend::InMemory(mem) => mem.delete_document(index, id, refresh).await,
        }
    }

    async fn bulk(&self, request: &BulkRequest) -> Result<Value> {
        match self {
            EngineBackend::Elasticsearch(es) => es.bulk(request).await,
            EngineBackend::InMemory(mem) => mem.bulk(request).await,
        }
    }

    async fn search(&self, indices: &str, body: &Value, scroll: Option<&str>) -> Result<Value> {
        match self {
            EngineBackend::Elasticsearch(es) => es.search(indices, body, scroll).await,
            EngineBackend::InMemory(mem) => mem.search(indices, body, scroll).await,
        }
    }

    async fn scroll(&self, scroll_id: &str, keep_alive: &str) -> Result<Value> {
        match self {
            EngineBackend::Elasticsearch(es) => es.scroll(scroll_id, keep_alive).await,
            EngineBackend::InMemory(mem) => mem.scroll(scroll_id, keep_alive).await,
        }
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<Value> {
        match self {
            EngineBackend::Elasticsearch(es) => es.clear_scroll(scroll_id).await,
            EngineBackend::InMemory(mem) => mem.clear_scroll(scroll_id).await,
        }
    }

    async fn put_pipeline(&self, id: &str, definition: &Value) -> Result<Value> {
        match self {
            EngineBackend::Elasticsearch(es) => es.put_pipeline(id, definition).await,
            EngineBackend::InMemory(mem) => mem.put_pipeline(id, definition).await,
        }
    }

    async fn delete_pipeline(&self, id: &str) -> Result<Value> {
        match self {
            EngineBackend::Elasticsearch(es) => es.delete_pipeline(id).await,
            EngineBackend::InMemory(mem) => mem.delete_pipeline(id).await,
        }
    }

    async fn count(&self, indices: &str, body: &Value) -> Result<Value> {
        match self {
            EngineBackend::Elasticsearch(es) => es.count(indices, body).await,
            EngineBackend::InMemory(mem) => mem.count(indices, body).await,
        }
    }
}

/// 🏭 Builds the engine handle. Called at most once per connector, on first use.
pub trait ConnectionFactory: Send + Sync {
    fn create_connection(&self) -> Result<EngineBackend>;
}

/// 📡 Builds an HTTP engine from an [`EngineConfig`] (url + auth + timeouts).
#[derive(Debug, Clone)]
pub struct DsnConnectionFactory {
    config: EngineConfig,
}

impl DsnConnectionFactory {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

impl ConnectionFactory for DsnConnectionFactory {
    fn create_connection(&self) -> Result<EngineBackend> {
        Ok(EngineBackend::Elasticsearch(ElasticsearchEngine::new(
            self.config.clone(),
        )?))
    }
}

/// 🧪 Hands out clones of one shared [`InMemoryEngine`], so tests can keep a handle and peek.
#[derive(Debug, Clone, Default)]
pub struct InMemoryConnectionFactory {
    engine: InMemoryEngine,
}

impl InMemoryConnectionFactory {
    pub fn new(engine: InMemoryEngine) -> Self {
        Self { engine }
    }
}

impl ConnectionFactory for InMemoryConnectionFactory {
    fn create_connection(&self) -> Result<EngineBackend> {
        Ok(EngineBackend::InMemory(self.engine.clone()))
    }
}

/// 🔢 Pull the number out of a `_count` response.
pub(crate) fn count_from_response(response: &Value) -> Result<u64> {
    response["count"].as_u64().ok_or_else(|| {
        crate::error::ConnectorError::unexpected("count", format!("no numeric `count` in {response}"))
            .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_alias_actions_speak_fluent_aliases_api() {
        let add = AliasAction::Add {
            index: "courses__b".into(),
            alias: "courses".into(),
        };
        let remove = AliasAction::Remove {
            index: "courses__a".into(),
            alias: "courses".into(),
        };
        assert_eq!(
            add.to_json(),
            json!({"add": {"index": "courses__b", "alias": "courses"}})
        );
        assert_eq!(
            remove.to_json(),
            json!({"remove": {"index": "courses__a", "alias": "courses"}})
        );
    }

    #[test]
    fn the_one_where_count_responses_give_up_their_number() -> Result<()> {
        assert_eq!(count_from_response(&json!({"count": 7}))?, 7);
        assert!(count_from_response(&json!({"nope": true})).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_factory_shares_one_cluster() -> Result<()> {
        let cluster = InMemoryEngine::new();
        let factory = InMemoryConnectionFactory::new(cluster.clone());
        let handle = factory.create_connection()?;
        handle.create_index("courses", &json!({})).await?;
        assert!(cluster.index_exists("courses").await?);
        Ok(())
    }
}
