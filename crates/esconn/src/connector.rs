//! # 🔌 THE CONNECTOR
//!
//! 🎬 COLD OPEN -- INT. APPLICATION CODE -- IT JUST WANTS TO SAVE A DOCUMENT
//!
//! The application speaks internal names and wants three things: put documents in, get
//! documents out, and change the schema without anyone noticing. The [`Connector`] is the
//! front desk for all of it. It translates names, owns the one engine handle (created on
//! first use), batches writes in the [`BulkQueue`](crate::queue), and hands lifecycle work
//! to the registered managers and the rebuild orchestrator.
//!
//! 🧠 Knowledge graph:
//! - built once through [`ConnectorBuilder`]; the registrations are frozen at `build()`.
//! - every method takes `&mut self`: one logical thread of control per connector.
//!   Need concurrency? One connector per task.
//! - `bulk_size <= 0` turns batching off; every write goes out immediately.
//! - queued writes are NOT flushed on drop (there is no async drop). Call [`Connector::flush`].
//!
//! 🦆 The duck has a connector too. It connects to bread.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::documents::DocumentMigrator;
use crate::engine::{
    BulkOperation, ConnectionFactory, Engine, EngineBackend, IndexDocumentRequest,
    count_from_response,
};
use crate::error::ConnectorError;
use crate::managers::{EngineContext, IndexManager, PipelineManager};
use crate::naming::{NameProvider, RawNameProvider};
use crate::queue::BulkQueue;
use crate::rebuild::{self, RebuildReport, alias_targets};
use crate::response::{ResponseHandler, notify};
use crate::scroll::ScrollSettings;

/// 🔧 Connector knobs. Fixed for the lifetime of a connector.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ConnectorConfig {
    /// 📬 Operations per bulk request. `<= 0` disables batching.
    #[serde(default = "default_bulk_size")]
    pub bulk_size: i64,
    /// 👀 Make writes visible to search right away.
    #[serde(default = "default_force_refresh")]
    pub force_refresh: bool,
    /// ⏳ Keep-alive for scroll cursors during copies, e.g. `"1m"`.
    #[serde(default = "default_scroll_keep_alive")]
    pub scroll_keep_alive: String,
    /// 📄 Documents per scroll page during copies.
    #[serde(default = "default_scroll_page_size")]
    pub scroll_page_size: usize,
}

fn default_bulk_size() -> i64 {
    50
}

fn default_force_refresh() -> bool {
    true
}

fn default_scroll_keep_alive() -> String {
    "1m".to_string()
}

fn default_scroll_page_size() -> usize {
    500
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            bulk_size: default_bulk_size(),
            force_refresh: default_force_refresh(),
            scroll_keep_alive: default_scroll_keep_alive(),
            scroll_page_size: default_scroll_page_size(),
        }
    }
}

impl ConnectorConfig {
    pub fn scroll_settings(&self) -> ScrollSettings {
        ScrollSettings {
            keep_alive: self.scroll_keep_alive.clone(),
            page_size: self.scroll_page_size,
        }
    }

    fn batching(&self) -> bool {
        self.bulk_size > 0
    }
}

/// 🩺 How a logical index currently looks on the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexLayout {
    Missing,
    Plain,
    Alias { targets: Vec<String> },
}

/// 🩺 One row of `describe_index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStatus {
    pub internal_name: String,
    pub external_name: String,
    pub layout: IndexLayout,
    /// `None` when the index is missing.
    pub documents: Option<u64>,
}

/// 🏗️ Collects registrations, then freezes them into a [`Connector`].
pub struct ConnectorBuilder {
    connection_factory: Box<dyn ConnectionFactory>,
    index_names: Box<dyn NameProvider>,
    pipeline_names: Box<dyn NameProvider>,
    index_managers: BTreeMap<String, Box<dyn IndexManager>>,
    pipeline_managers: BTreeMap<String, Box<dyn PipelineManager>>,
    document_migrators: BTreeMap<String, Box<dyn DocumentMigrator>>,
    response_handler: Option<Box<dyn ResponseHandler>>,
    config: ConnectorConfig,
}

impl ConnectorBuilder {
    pub fn index_name_provider(mut self, provider: Box<dyn NameProvider>) -> Self {
        self.index_names = provider;
        self
    }

    pub fn pipeline_name_provider(mut self, provider: Box<dyn NameProvider>) -> Self {
        self.pipeline_names = provider;
        self
    }

    /// 🏗️ Register the manager for one internal index name. Last registration wins.
    pub fn index_manager(
        mut self,
        internal_name: impl Into<String>,
        manager: impl IndexManager + 'static,
    ) -> Self {
        self.index_managers
            .insert(internal_name.into(), Box::new(manager));
        self
    }

    pub fn pipeline_manager(
        mut self,
        internal_name: impl Into<String>,
        manager: impl PipelineManager + 'static,
    ) -> Self {
        self.pipeline_managers
            .insert(internal_name.into(), Box::new(manager));
        self
    }

    pub fn document_migrator(
        mut self,
        internal_name: impl Into<String>,
        migrator: impl DocumentMigrator + 'static,
    ) -> Self {
        self.document_migrators
            .insert(internal_name.into(), Box::new(migrator));
        self
    }

    pub fn response_handler(mut self, handler: impl ResponseHandler + 'static) -> Self {
        self.response_handler = Some(Box::new(handler));
        self
    }

    pub fn config(mut self, config: ConnectorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Connector {
        Connector {
            connection_factory: self.connection_factory,
            connection: None,
            index_names: self.index_names,
            pipeline_names: self.pipeline_names,
            index_managers: self.index_managers,
            pipeline_managers: self.pipeline_managers,
            document_migrators: self.document_migrators,
            response_handler: self.response_handler,
            scroll: self.config.scroll_settings(),
            config: self.config,
            queue: BulkQueue::default(),
        }
    }
}

/// 🔌 The front desk. See the module docs.
pub struct Connector {
    connection_factory: Box<dyn ConnectionFactory>,
    connection: Option<EngineBackend>,
    index_names: Box<dyn NameProvider>,
    pipeline_names: Box<dyn NameProvider>,
    index_managers: BTreeMap<String, Box<dyn IndexManager>>,
    pipeline_managers: BTreeMap<String, Box<dyn PipelineManager>>,
    document_migrators: BTreeMap<String, Box<dyn DocumentMigrator>>,
    response_handler: Option<Box<dyn ResponseHandler>>,
    config: ConnectorConfig,
    scroll: ScrollSettings,
    queue: BulkQueue,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("connected", &self.connection.is_some())
            .field("index_managers", &self.index_managers.keys().collect::<Vec<_>>())
            .field("pipeline_managers", &self.pipeline_managers.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .field("queued", &self.queue.len())
            .finish()
    }
}

impl Connector {
    /// 🏗️ Start building. Names default to raw, config to [`ConnectorConfig::default`].
    pub fn builder(connection_factory: impl ConnectionFactory + 'static) -> ConnectorBuilder {
        ConnectorBuilder {
            connection_factory: Box::new(connection_factory),
            index_names: Box::new(RawNameProvider),
            pipeline_names: Box::new(RawNameProvider),
            index_managers: BTreeMap::new(),
            pipeline_managers: BTreeMap::new(),
            document_migrators: BTreeMap::new(),
            response_handler: None,
            config: ConnectorConfig::default(),
        }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    // ===== 🏷️ naming =====

    pub fn get_external_index_name(&self, internal_name: &str) -> String {
        self.index_names.provide_external_name(internal_name)
    }

    pub fn get_internal_index_name(&self, external_name: &str) -> String {
        self.index_names.provide_internal_name(external_name)
    }

    pub fn get_external_pipeline_name(&self, internal_name: &str) -> String {
        self.pipeline_names.provide_external_name(internal_name)
    }

    pub fn get_internal_pipeline_name(&self, external_name: &str) -> String {
        self.pipeline_names.provide_internal_name(external_name)
    }

    // ===== 📒 registry =====

    /// 🔍 The manager registered for `internal_name`, or [`ConnectorError::MissingIndexManager`].
    pub fn index_manager(&self, internal_name: &str) -> Result<&dyn IndexManager> {
        self.index_managers
            .get(internal_name)
            .map(|manager| manager.as_ref())
            .ok_or_else(|| ConnectorError::MissingIndexManager(internal_name.to_string()).into())
    }

    /// 🔄 The migrator registered for `internal_name`. None means identity.
    pub fn document_migrator(&self, internal_name: &str) -> Option<&dyn DocumentMigrator> {
        self.document_migrators
            .get(internal_name)
            .map(|migrator| migrator.as_ref())
    }

    /// 📋 Registered internal index names, sorted.
    pub fn index_names(&self) -> Vec<String> {
        self.index_managers.keys().cloned().collect()
    }

    /// 📋 Registered internal pipeline names, sorted.
    pub fn pipeline_names(&self) -> Vec<String> {
        self.pipeline_managers.keys().cloned().collect()
    }

    // ===== 🔌 connection =====

    /// 🔌 The engine handle, created by the factory on first call and reused after.
    /// The returned clone shares the same underlying pool/state.
    pub fn connection(&mut self) -> Result<EngineBackend> {
        if let Some(ref connection) = self.connection {
            return Ok(connection.clone());
        }
        let connection = self
            .connection_factory
            .create_connection()
            .context("💀 The connection factory could not produce an engine handle.")?;
        debug!("🔌 engine handle created");
        self.connection = Some(connection.clone());
        Ok(connection)
    }

    fn context<'a>(&'a self, engine: &'a EngineBackend) -> EngineContext<'a> {
        EngineContext {
            engine,
            response_handler: self.response_handler.as_deref(),
            scroll: &self.scroll,
        }
    }

    fn handler(&self) -> Option<&dyn ResponseHandler> {
        self.response_handler.as_deref()
    }

    // ===== 🏗️ index lifecycle =====

    /// 🚀 Create every pipeline, then every registered index that does not exist yet.
    pub async fn execute_setup_process(&mut self) -> Result<()> {
        self.create_pipelines(None).await?;
        for internal_name in self.index_names() {
            self.create_index_if_not_exist(&internal_name).await?;
        }
        info!("🚀 setup finished");
        Ok(())
    }

    pub async fn create_index_if_not_exist(&mut self, internal_name: &str) -> Result<()> {
        let external = self.get_external_index_name(internal_name);
        if self.connection()?.index_exists(&external).await? {
            debug!(index = %external, "✅ index already there");
            return Ok(());
        }
        self.create_index(internal_name).await
    }

    /// 🆕 Fails with [`ConnectorError::IndexAlreadyExists`] if the physical name is taken.
    pub async fn create_index(&mut self, internal_name: &str) -> Result<()> {
        let engine = self.connection()?;
        let external = self.get_external_index_name(internal_name);
        let manager = self.index_manager(internal_name)?;
        manager.create_index(&external, &self.context(&engine)).await
    }

    /// ♻️ Delete if present, then create. There is a gap in between; use
    /// [`Connector::rebuild_index`] when readers must never notice.
    pub async fn recreate_index(&mut self, internal_name: &str) -> Result<()> {
        let external = self.get_external_index_name(internal_name);
        if self.connection()?.index_exists(&external).await? {
            self.delete_index(internal_name).await?;
        }
        self.create_index(internal_name).await
    }

    /// 🔄 In-place migration under the same physical name. See
    /// [`IndexManager::update_index`].
    pub async fn update_index(&mut self, internal_name: &str) -> Result<()> {
        let engine = self.connection()?;
        let external = self.get_external_index_name(internal_name);
        let manager = self.index_manager(internal_name)?;
        manager
            .update_index(
                &external,
                &self.context(&engine),
                self.document_migrator(internal_name),
            )
            .await
    }

    pub async fn delete_index(&mut self, internal_name: &str) -> Result<()> {
        let engine = self.connection()?;
        let external = self.get_external_index_name(internal_name);
        let manager = self.index_manager(internal_name)?;
        manager.delete_index(&external, &self.context(&engine)).await
    }

    /// 🔀 Zero-downtime rebuild behind the alias named by the external name.
    pub async fn rebuild_index(&mut self, internal_name: &str) -> Result<RebuildReport> {
        let engine = self.connection()?;
        let alias = self.get_external_index_name(internal_name);
        let manager = self.index_manager(internal_name)?;
        rebuild::rebuild_index(
            &alias,
            manager,
            self.document_migrator(internal_name),
            &self.context(&engine),
        )
        .await
    }

    /// 🩺 Layout and document count of one logical index.
    pub async fn describe_index(&mut self, internal_name: &str) -> Result<IndexStatus> {
        let engine = self.connection()?;
        let external = self.get_external_index_name(internal_name);
        let layout = if engine.alias_exists(&external).await? {
            IndexLayout::Alias {
                targets: alias_targets(&engine.get_alias(&external).await?),
            }
        } else if engine.index_exists(&external).await? {
            IndexLayout::Plain
        } else {
            IndexLayout::Missing
        };
        let documents = match layout {
            IndexLayout::Missing => None,
            _ => Some(count_from_response(
                &engine
                    .count(&external, &json!({"query": {"match_all": {}}}))
                    .await?,
            )?),
        };
        Ok(IndexStatus {
            internal_name: internal_name.to_string(),
            external_name: external,
            layout,
            documents,
        })
    }

    // ===== 🚰 pipelines =====

    /// 🚰 Put every registered pipeline, or only the named subset.
    pub async fn create_pipelines(&mut self, internal_names: Option<&[&str]>) -> Result<()> {
        let engine = self.connection()?;
        let ctx = self.context(&engine);
        for (internal_name, manager) in self.selected_pipelines(internal_names) {
            let external = self.get_external_pipeline_name(internal_name);
            manager.create_pipeline(&external, &ctx).await?;
        }
        Ok(())
    }

    /// 🗑️ Delete every registered pipeline, or only the named subset.
    pub async fn delete_pipelines(&mut self, internal_names: Option<&[&str]>) -> Result<()> {
        let engine = self.connection()?;
        let ctx = self.context(&engine);
        for (internal_name, manager) in self.selected_pipelines(internal_names) {
            let external = self.get_external_pipeline_name(internal_name);
            manager.delete_pipeline(&external, &ctx).await?;
        }
        Ok(())
    }

    fn selected_pipelines<'a>(
        &'a self,
        internal_names: Option<&'a [&'a str]>,
    ) -> impl Iterator<Item = (&'a str, &'a dyn PipelineManager)> + 'a {
        self.pipeline_managers
            .iter()
            .filter(move |(name, _)| {
                internal_names.is_none_or(|wanted| wanted.contains(&name.as_str()))
            })
            .map(|(name, manager)| (name.as_str(), manager.as_ref()))
    }

    // ===== 📦 documents =====

    /// 📬 Queue an index operation (or send it right away when batching is off).
    ///
    /// A pipeline different from the one the queue is bound to flushes the queue first.
    pub async fn index_document(
        &mut self,
        internal_index: &str,
        id: &str,
        source: Value,
        internal_pipeline: Option<&str>,
    ) -> Result<()> {
        if !self.config.batching() {
            return self
                .index_document_immediately(internal_index, id, source, internal_pipeline)
                .await;
        }

        if self.queue.pipeline() != internal_pipeline {
            self.flush().await?;
            self.queue.bind_pipeline(internal_pipeline.map(str::to_string));
        }
        self.queue.push(BulkOperation::Index {
            index: self.get_external_index_name(internal_index),
            id: id.to_string(),
            source,
        });
        self.flush_if_full().await
    }

    /// ✍️ One immediate index call, refresh per config.
    pub async fn index_document_immediately(
        &mut self,
        internal_index: &str,
        id: &str,
        source: Value,
        internal_pipeline: Option<&str>,
    ) -> Result<()> {
        let engine = self.connection()?;
        let request = IndexDocumentRequest {
            index: self.get_external_index_name(internal_index),
            id: id.to_string(),
            source,
            pipeline: internal_pipeline.map(|name| self.get_external_pipeline_name(name)),
            refresh: self.config.force_refresh,
        };
        let response = engine.index_document(&request).await.with_context(|| {
            format!("💀 Could not index document '{id}' into '{}'.", request.index)
        })?;
        notify(self.handler(), "index_document_immediately", &response);
        Ok(())
    }

    /// 📬 Queue a delete (or send it right away when batching is off).
    /// Deletes never change the queue's pipeline binding.
    pub async fn delete_document(&mut self, internal_index: &str, id: &str) -> Result<()> {
        if !self.config.batching() {
            return self.delete_document_immediately(internal_index, id).await;
        }
        self.queue.push(BulkOperation::Delete {
            index: self.get_external_index_name(internal_index),
            id: id.to_string(),
        });
        self.flush_if_full().await
    }

    /// 🗑️ One immediate delete call. A missing document is not an error.
    pub async fn delete_document_immediately(
        &mut self,
        internal_index: &str,
        id: &str,
    ) -> Result<()> {
        let engine = self.connection()?;
        let external = self.get_external_index_name(internal_index);
        let response = engine
            .delete_document(&external, id, self.config.force_refresh)
            .await
            .with_context(|| format!("💀 Could not delete document '{id}' from '{external}'."))?;
        notify(self.handler(), "delete_document_immediately", &response);
        Ok(())
    }

    /// 🔍 The full get response, or `None` when the document (or index) is not there.
    pub async fn retrieve_document(
        &mut self,
        internal_index: &str,
        id: &str,
    ) -> Result<Option<Value>> {
        let engine = self.connection()?;
        let external = self.get_external_index_name(internal_index);
        let document = engine
            .get_document(&external, id)
            .await
            .with_context(|| format!("💀 Could not fetch document '{id}' from '{external}'."))?;
        Ok(document.filter(|doc| doc["found"].as_bool() != Some(false)))
    }

    /// 🔍 Just the `_source` object, or `None`.
    pub async fn retrieve_document_source(
        &mut self,
        internal_index: &str,
        id: &str,
    ) -> Result<Option<Value>> {
        Ok(self
            .retrieve_document(internal_index, id)
            .await?
            .and_then(|mut document| match document.get_mut("_source").map(Value::take) {
                Some(source @ Value::Object(_)) => Some(source),
                _ => None,
            }))
    }

    /// 🚚 Send everything queued now. No-op on an empty queue.
    pub async fn flush(&mut self) -> Result<()> {
        if self.queue.is_empty() {
            return Ok(());
        }
        let engine = self.connection()?;
        let refresh = self.config.force_refresh;
        let handler = self.response_handler.as_deref();
        let shipped = self
            .queue
            .flush(&engine, refresh, self.pipeline_names.as_ref(), handler)
            .await?;
        debug!(shipped, "🚚 queue flushed");
        Ok(())
    }

    /// 📬 What is waiting in the queue, in order.
    pub fn queued_operations(&self) -> &[BulkOperation] {
        self.queue.operations()
    }

    async fn flush_if_full(&mut self) -> Result<()> {
        // -- batching() already guarantees bulk_size > 0
        if self.queue.len() as i64 >= self.config.bulk_size {
            self.flush().await?;
        }
        Ok(())
    }

    // ===== 🔎 reads =====

    /// 🔎 Run a search over the given internal indices, or `_all` when none are given.
    pub async fn execute_search(&mut self, body: &Value, internal_indices: &[&str]) -> Result<Value> {
        let engine = self.connection()?;
        let target = self.index_target(internal_indices);
        engine
            .search(&target, body, None)
            .await
            .with_context(|| format!("💀 Search over '{target}' failed."))
    }

    /// 🔢 Count over the given internal indices, or `_all` when none are given.
    pub async fn execute_count(&mut self, body: &Value, internal_indices: &[&str]) -> Result<u64> {
        let engine = self.connection()?;
        let target = self.index_target(internal_indices);
        let response = engine
            .count(&target, body)
            .await
            .with_context(|| format!("💀 Count over '{target}' failed."))?;
        count_from_response(&response)
    }

    fn index_target(&self, internal_indices: &[&str]) -> String {
        if internal_indices.is_empty() {
            return "_all".to_string();
        }
        internal_indices
            .iter()
            .map(|name| self.get_external_index_name(name))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        if !self.queue.is_empty() {
            warn!(
                queued = self.queue.len(),
                "⚠️ Connector dropped with queued operations that were never flushed. They are gone."
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{InMemoryConnectionFactory, InMemoryEngine};
    use crate::managers::{StaticIndexManager, StaticPipelineManager};
    use crate::naming::PrefixedNameProvider;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl Recorder {
        fn labels(&self) -> Vec<String> {
            self.0.lock().map(|seen| seen.clone()).unwrap_or_default()
        }
    }

    impl ResponseHandler for Recorder {
        fn handle_response(&self, label: &str, _response: &Value) {
            if let Ok(mut seen) = self.0.lock() {
                seen.push(label.to_string());
            }
        }
    }

    fn with_bulk_size(cluster: &InMemoryEngine, bulk_size: i64) -> ConnectorBuilder {
        Connector::builder(InMemoryConnectionFactory::new(cluster.clone())).config(
            ConnectorConfig {
                bulk_size,
                ..ConnectorConfig::default()
            },
        )
    }

    fn doc(n: u32) -> Value {
        json!({"n": n})
    }

    #[tokio::test]
    async fn the_one_where_the_queue_flushes_at_the_threshold() -> Result<()> {
        let cluster = InMemoryEngine::new();
        let recorder = Recorder::default();
        let mut connector = with_bulk_size(&cluster, 2)
            .response_handler(recorder.clone())
            .build();

        connector.index_document("courses", "1", doc(1), None).await?;
        assert_eq!(connector.queued_operations().len(), 1);
        assert!(cluster.bulk_requests().is_empty());

        connector.index_document("courses", "2", doc(2), None).await?;
        assert!(connector.queued_operations().is_empty());
        assert_eq!(cluster.bulk_requests().len(), 1);
        assert_eq!(cluster.bulk_requests()[0].operations.len(), 2);

        connector.index_document("courses", "3", doc(3), None).await?;
        connector.flush().await?;
        assert_eq!(cluster.bulk_requests().len(), 2);
        assert_eq!(recorder.labels(), ["flush", "flush"]);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_switching_pipelines_drains_the_queue_first() -> Result<()> {
        let cluster = InMemoryEngine::new();
        cluster.seed_pipeline("p_enrich", json!({"processors": []}));
        let mut connector = with_bulk_size(&cluster, 10)
            .pipeline_name_provider(Box::new(PrefixedNameProvider::new("p_")))
            .build();

        connector.index_document("courses", "1", doc(1), None).await?;
        connector.index_document("courses", "2", doc(2), None).await?;
        connector
            .index_document("courses", "3", doc(3), Some("enrich"))
            .await?;

        let sent = cluster.bulk_requests();
        assert_eq!(sent.len(), 1, "the pipeline switch forced exactly one flush");
        assert_eq!(sent[0].pipeline, None);
        assert_eq!(sent[0].operations.len(), 2);
        assert_eq!(connector.queued_operations().len(), 1);

        connector.flush().await?;
        let sent = cluster.bulk_requests();
        assert_eq!(sent[1].pipeline.as_deref(), Some("p_enrich"));
        assert_eq!(sent[1].operations.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_deletes_count_toward_the_threshold() -> Result<()> {
        let cluster = InMemoryEngine::new();
        cluster.seed_index("courses", json!({}), vec![("1".to_string(), doc(1))]);
        let mut connector = with_bulk_size(&cluster, 2).build();

        connector.index_document("courses", "2", doc(2), None).await?;
        connector.delete_document("courses", "1").await?;

        let sent = cluster.bulk_requests();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0].operations[1], BulkOperation::Delete { .. }));
        let stored = cluster.documents("courses").unwrap_or_default();
        assert!(stored.contains_key("2"));
        assert!(!stored.contains_key("1"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_delete_does_not_rebind_the_pipeline() -> Result<()> {
        let cluster = InMemoryEngine::new();
        cluster.seed_pipeline("enrich", json!({"processors": []}));
        let mut connector = with_bulk_size(&cluster, 10).build();

        connector
            .index_document("courses", "1", doc(1), Some("enrich"))
            .await?;
        connector.delete_document("courses", "9").await?;
        connector
            .index_document("courses", "2", doc(2), Some("enrich"))
            .await?;
        assert!(cluster.bulk_requests().is_empty(), "same pipeline, no flush");
        assert_eq!(connector.queued_operations().len(), 3);
        connector.flush().await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_batching_is_off_and_every_write_goes_straight_out() -> Result<()> {
        let cluster = InMemoryEngine::new();
        let recorder = Recorder::default();
        let mut connector = with_bulk_size(&cluster, 0)
            .response_handler(recorder.clone())
            .build();

        connector.index_document("courses", "1", doc(1), None).await?;
        connector.delete_document("courses", "1").await?;

        assert!(cluster.bulk_requests().is_empty());
        assert!(connector.queued_operations().is_empty());
        assert_eq!(
            recorder.labels(),
            ["index_document_immediately", "delete_document_immediately"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_item_failure_clears_the_queue_and_complains() -> Result<()> {
        let cluster = InMemoryEngine::new();
        cluster.seed_index("courses__a", json!({}), Vec::new());
        cluster.seed_index("courses__b", json!({}), Vec::new());
        cluster.seed_alias("courses", "courses__a");
        cluster.seed_alias("courses", "courses__b");
        let mut connector = with_bulk_size(&cluster, 5).build();

        // -- writing through a two-headed alias fails per item
        connector.index_document("courses", "1", doc(1), None).await?;
        let err = connector.flush().await.expect_err("item failure surfaces");
        assert!(matches!(
            err.downcast_ref::<ConnectorError>(),
            Some(ConnectorError::BulkItemsFailed { failed: 1, .. })
        ));
        assert!(connector.queued_operations().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_missing_document_is_just_none() -> Result<()> {
        let cluster = InMemoryEngine::new();
        cluster.seed_index("courses", json!({}), vec![("1".to_string(), doc(1))]);
        let mut connector = with_bulk_size(&cluster, 0).build();

        assert_eq!(connector.retrieve_document("courses", "404").await?, None);
        assert_eq!(connector.retrieve_document("ghosts", "1").await?, None);
        assert_eq!(
            connector.retrieve_document_source("courses", "1").await?,
            Some(doc(1))
        );
        let full = connector.retrieve_document("courses", "1").await?;
        assert_eq!(full.map(|d| d["_id"].clone()), Some(json!("1")));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_unregistered_index_has_no_manager() -> Result<()> {
        let cluster = InMemoryEngine::new();
        let mut connector = with_bulk_size(&cluster, 0).build();
        for result in [
            connector.create_index("courses").await,
            connector.update_index("courses").await,
            connector.rebuild_index("courses").await.map(|_| ()),
        ] {
            let err = result.expect_err("no manager registered");
            assert!(matches!(
                err.downcast_ref::<ConnectorError>(),
                Some(ConnectorError::MissingIndexManager(name)) if name == "courses"
            ));
        }
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_names_are_translated_both_ways() -> Result<()> {
        let cluster = InMemoryEngine::new();
        let mut connector = with_bulk_size(&cluster, 0)
            .index_name_provider(Box::new(PrefixedNameProvider::new("prod_")))
            .index_manager("courses", StaticIndexManager::new(json!({})))
            .build();

        assert_eq!(connector.get_external_index_name("courses"), "prod_courses");
        assert_eq!(connector.get_internal_index_name("prod_courses"), "courses");
        assert_eq!(connector.get_external_pipeline_name("enrich"), "enrich");

        connector.create_index("courses").await?;
        assert_eq!(cluster.index_names(), ["prod_courses"]);
        let err = connector.create_index("courses").await.expect_err("already exists");
        assert!(matches!(
            err.downcast_ref::<ConnectorError>(),
            Some(ConnectorError::IndexAlreadyExists(name)) if name == "prod_courses"
        ));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_setup_builds_pipelines_then_missing_indices() -> Result<()> {
        let cluster = InMemoryEngine::new();
        cluster.seed_index("students", json!({"keep": "me"}), Vec::new());
        let mut connector = with_bulk_size(&cluster, 0)
            .index_manager("courses", StaticIndexManager::new(json!({"v": 1})))
            .index_manager("students", StaticIndexManager::new(json!({"v": 1})))
            .pipeline_manager("enrich", StaticPipelineManager::new(json!({"processors": []})))
            .build();

        connector.execute_setup_process().await?;

        assert!(cluster.pipeline("enrich").is_some());
        assert_eq!(cluster.definition("courses"), Some(json!({"v": 1})));
        assert_eq!(cluster.definition("students"), Some(json!({"keep": "me"})), "existing index left alone");
        let first_index_call = cluster.calls().iter().position(|c| c.starts_with("create_index"));
        let pipeline_call = cluster.calls().iter().position(|c| c.starts_with("put_pipeline"));
        assert!(pipeline_call < first_index_call);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_pipelines_can_be_picked_by_name() -> Result<()> {
        let cluster = InMemoryEngine::new();
        let mut connector = with_bulk_size(&cluster, 0)
            .pipeline_name_provider(Box::new(PrefixedNameProvider::new("p_")))
            .pipeline_manager("enrich", StaticPipelineManager::new(json!({"processors": []})))
            .pipeline_manager("normalize", StaticPipelineManager::new(json!({"processors": []})))
            .build();

        connector.create_pipelines(Some(&["normalize"])).await?;
        assert!(cluster.pipeline("p_normalize").is_some());
        assert!(cluster.pipeline("p_enrich").is_none());

        connector.create_pipelines(None).await?;
        connector.delete_pipelines(Some(&["enrich"])).await?;
        assert!(cluster.pipeline("p_enrich").is_none());
        assert!(cluster.pipeline("p_normalize").is_some());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_recreate_wipes_and_update_keeps() -> Result<()> {
        let cluster = InMemoryEngine::new();
        cluster.seed_index("courses", json!({"v": 0}), vec![("1".to_string(), doc(1))]);
        let mut connector = with_bulk_size(&cluster, 0)
            .index_manager("courses", StaticIndexManager::new(json!({"v": 1})))
            .build();

        connector.update_index("courses").await?;
        assert_eq!(cluster.definition("courses"), Some(json!({"v": 1})));
        assert_eq!(cluster.documents("courses").map(|d| d.len()), Some(1));

        connector.recreate_index("courses").await?;
        assert_eq!(cluster.documents("courses").map(|d| d.len()), Some(0));

        connector.delete_index("courses").await?;
        connector.delete_index("courses").await?;
        assert!(cluster.index_names().is_empty());

        connector.create_index_if_not_exist("courses").await?;
        connector.create_index_if_not_exist("courses").await?;
        assert_eq!(cluster.index_names(), ["courses"]);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_rebuild_runs_through_the_connector() -> Result<()> {
        let cluster = InMemoryEngine::new();
        cluster.seed_index("prod_courses", json!({}), vec![("1".to_string(), doc(1))]);
        let mut connector = with_bulk_size(&cluster, 0)
            .index_name_provider(Box::new(PrefixedNameProvider::new("prod_")))
            .index_manager("courses", StaticIndexManager::new(json!({"v": 2})))
            .document_migrator("courses", |mut source: Value| -> Result<Value> {
                source["migrated"] = json!(true);
                Ok(source)
            })
            .build();

        let report = connector.rebuild_index("courses").await?;
        assert_eq!(report.current, "prod_courses__a");
        assert_eq!(cluster.alias_targets("prod_courses"), ["prod_courses__a"]);

        // -- reads keep working through the alias
        let source = connector.retrieve_document_source("courses", "1").await?;
        assert_eq!(source, Some(json!({"n": 1, "migrated": true})));

        let status = connector.describe_index("courses").await?;
        assert_eq!(
            status.layout,
            IndexLayout::Alias {
                targets: vec!["prod_courses__a".to_string()]
            }
        );
        assert_eq!(status.documents, Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_search_and_count_pick_their_targets() -> Result<()> {
        let cluster = InMemoryEngine::new();
        cluster.seed_index("prod_courses", json!({}), vec![("1".to_string(), doc(1))]);
        cluster.seed_index("prod_students", json!({}), vec![("2".to_string(), doc(2)), ("3".to_string(), doc(3))]);
        let mut connector = with_bulk_size(&cluster, 0)
            .index_name_provider(Box::new(PrefixedNameProvider::new("prod_")))
            .build();

        let match_all = json!({"query": {"match_all": {}}});
        assert_eq!(connector.execute_count(&match_all, &[]).await?, 3);
        assert_eq!(connector.execute_count(&match_all, &["students"]).await?, 2);
        let hits = connector
            .execute_search(&match_all, &["courses", "students"])
            .await?;
        assert_eq!(hits["hits"]["total"]["value"], 3);

        let calls = cluster.calls();
        assert!(calls.contains(&"count _all".to_string()));
        assert!(calls.contains(&"search prod_courses,prod_students".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_connection_is_made_once() -> Result<()> {
        struct Counting(Arc<Mutex<usize>>, InMemoryEngine);
        impl ConnectionFactory for Counting {
            fn create_connection(&self) -> Result<EngineBackend> {
                if let Ok(mut made) = self.0.lock() {
                    *made += 1;
                }
                Ok(EngineBackend::InMemory(self.1.clone()))
            }
        }

        let made = Arc::new(Mutex::new(0));
        let mut connector =
            Connector::builder(Counting(made.clone(), InMemoryEngine::new())).build();
        connector.connection()?;
        connector.connection()?;
        connector.execute_count(&json!({}), &[]).await?;
        assert_eq!(made.lock().map(|m| *m).unwrap_or_default(), 1);
        Ok(())
    }
}
