//! 🏗️ Managers -- the per-index and per-pipeline strategies that know what a definition looks like.
//!
//! 🎬 COLD OPEN -- INT. ARCHITECT'S OFFICE -- BLUEPRINTS EVERYWHERE
//!
//! Every registered index has an [`IndexManager`]. The only thing an implementor has to
//! write is `index_definition()`: mappings, settings, the works. The lifecycle verbs come
//! for free as default methods, and any of them can be overridden when an index needs
//! special treatment.
//!
//! Pipelines get the same deal through [`PipelineManager`], minus the drama: one remote
//! call per verb.
//!
//! 🧠 Knowledge graph:
//! - [`EngineContext`]: engine handle + optional response handler + scroll settings,
//!   bundled so the trait signatures stay readable.
//! - `update_index`: in-place migration through a `<name>__migrating` scratch index.
//!   The live name is unavailable between its delete and its recreate. For zero downtime,
//!   use the connector's rebuild instead.
//! - [`StaticIndexManager`] / [`StaticPipelineManager`]: fixed definitions, from a value or
//!   a JSON file.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::documents::DocumentMigrator;
use crate::engine::{Engine, EngineBackend};
use crate::error::ConnectorError;
use crate::response::{ResponseHandler, notify};
use crate::scroll::{ScrollSettings, copy_documents};

mod static_definition;

pub use static_definition::{StaticIndexManager, StaticPipelineManager};

/// 🧩 Suffix of the scratch index used by in-place updates.
pub const MIGRATING_SUFFIX: &str = "__migrating";

/// 🎒 Everything a manager needs to talk to the cluster.
#[derive(Clone, Copy)]
pub struct EngineContext<'a> {
    pub engine: &'a EngineBackend,
    pub response_handler: Option<&'a dyn ResponseHandler>,
    pub scroll: &'a ScrollSettings,
}

impl std::fmt::Debug for EngineContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("engine", &self.engine)
            .field("response_handler", &self.response_handler.is_some())
            .field("scroll", &self.scroll)
            .finish()
    }
}

/// 🏗️ Strategy for one index: a definition plus the lifecycle verbs built on top of it.
#[async_trait]
pub trait IndexManager: Send + Sync {
    /// 📐 The full create-index body (`settings`, `mappings`, `aliases`...).
    fn index_definition(&self) -> Value;

    /// 🆕 Create `external_name` from the definition.
    ///
    /// Fails with [`ConnectorError::IndexAlreadyExists`] when the name is already taken.
    async fn create_index(&self, external_name: &str, ctx: &EngineContext<'_>) -> Result<()> {
        if ctx.engine.index_exists(external_name).await? {
            return Err(ConnectorError::IndexAlreadyExists(external_name.to_string()).into());
        }
        let response = ctx
            .engine
            .create_index(external_name, &self.index_definition())
            .await
            .with_context(|| format!("💀 Could not create index '{external_name}'."))?;
        notify(ctx.response_handler, "create_index", &response);
        info!(index = external_name, "🆕 index created");
        Ok(())
    }

    /// 🔄 Migrate `external_name` in place to the current definition.
    ///
    /// A missing index is simply created. Otherwise: fresh scratch index, copy live ->
    /// scratch through the migrator, drop and recreate live, copy scratch -> live as-is,
    /// drop scratch. A stale scratch index from an aborted run is removed first.
    async fn update_index(
        &self,
        external_name: &str,
        ctx: &EngineContext<'_>,
        migrator: Option<&dyn DocumentMigrator>,
    ) -> Result<()> {
        if !ctx.engine.index_exists(external_name).await? {
            debug!(index = external_name, "🆕 nothing to update, creating instead");
            return self.create_index(external_name, ctx).await;
        }

        let scratch = format!("{external_name}{MIGRATING_SUFFIX}");
        info!(index = external_name, scratch = %scratch, "🔄 in-place update starting");

        self.delete_index(&scratch, ctx).await?;
        self.create_index(&scratch, ctx).await?;
        copy_documents(
            ctx.engine,
            external_name,
            &scratch,
            migrator,
            ctx.scroll,
            ctx.response_handler,
        )
        .await
        .with_context(|| format!("💀 Copying '{external_name}' into '{scratch}' failed. The live index is untouched."))?;

        self.delete_index(external_name, ctx).await?;
        self.create_index(external_name, ctx).await?;
        copy_documents(
            ctx.engine,
            &scratch,
            external_name,
            None,
            ctx.scroll,
            ctx.response_handler,
        )
        .await
        .with_context(|| format!("💀 Copying '{scratch}' back into '{external_name}' failed. The migrated documents are still safe in the scratch index."))?;

        self.delete_index(&scratch, ctx).await?;
        info!(index = external_name, "✅ in-place update finished");
        Ok(())
    }

    /// 🗑️ Delete `external_name` if it exists. Absent is fine.
    async fn delete_index(&self, external_name: &str, ctx: &EngineContext<'_>) -> Result<()> {
        if !ctx.engine.index_exists(external_name).await? {
            return Ok(());
        }
        let response = ctx
            .engine
            .delete_index(external_name)
            .await
            .with_context(|| format!("💀 Could not delete index '{external_name}'."))?;
        notify(ctx.response_handler, "delete_index", &response);
        info!(index = external_name, "🗑️ index deleted");
        Ok(())
    }
}

/// 🚰 Strategy for one ingest pipeline.
#[async_trait]
pub trait PipelineManager: Send + Sync {
    /// 📐 The full pipeline body (`description`, `processors`...).
    fn pipeline_definition(&self) -> Value;

    /// 📤 Put the pipeline. Re-putting an existing one overwrites it.
    async fn create_pipeline(&self, external_name: &str, ctx: &EngineContext<'_>) -> Result<()> {
        let response = ctx
            .engine
            .put_pipeline(external_name, &self.pipeline_definition())
            .await
            .with_context(|| format!("💀 Could not put pipeline '{external_name}'."))?;
        notify(ctx.response_handler, "create_pipeline", &response);
        info!(pipeline = external_name, "🚰 pipeline stored");
        Ok(())
    }

    async fn delete_pipeline(&self, external_name: &str, ctx: &EngineContext<'_>) -> Result<()> {
        let response = ctx
            .engine
            .delete_pipeline(external_name)
            .await
            .with_context(|| format!("💀 Could not delete pipeline '{external_name}'."))?;
        notify(ctx.response_handler, "delete_pipeline", &response);
        info!(pipeline = external_name, "🗑️ pipeline deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InMemoryEngine;
    use serde_json::json;

    fn definition() -> Value {
        json!({"mappings": {"properties": {"title": {"type": "text"}}}})
    }

    fn cluster() -> (InMemoryEngine, EngineBackend) {
        let cluster = InMemoryEngine::new();
        let backend = EngineBackend::InMemory(cluster.clone());
        (cluster, backend)
    }

    #[tokio::test]
    async fn the_one_where_create_refuses_to_clobber() -> Result<()> {
        let (cluster, engine) = cluster();
        let scroll = ScrollSettings::default();
        let ctx = EngineContext {
            engine: &engine,
            response_handler: None,
            scroll: &scroll,
        };
        let manager = StaticIndexManager::new(definition());
        manager.create_index("courses", &ctx).await?;
        assert_eq!(cluster.definition("courses"), Some(definition()));

        let err = manager
            .create_index("courses", &ctx)
            .await
            .expect_err("second create must fail");
        assert!(matches!(
            err.downcast_ref::<ConnectorError>(),
            Some(ConnectorError::IndexAlreadyExists(name)) if name == "courses"
        ));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_deleting_nothing_is_fine() -> Result<()> {
        let (cluster, engine) = cluster();
        let scroll = ScrollSettings::default();
        let ctx = EngineContext {
            engine: &engine,
            response_handler: None,
            scroll: &scroll,
        };
        StaticIndexManager::new(definition())
            .delete_index("ghosts", &ctx)
            .await?;
        assert!(!cluster.calls().iter().any(|call| call.starts_with("delete_index")));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_update_on_a_missing_index_just_creates_it() -> Result<()> {
        let (cluster, engine) = cluster();
        let scroll = ScrollSettings::default();
        let ctx = EngineContext {
            engine: &engine,
            response_handler: None,
            scroll: &scroll,
        };
        StaticIndexManager::new(definition())
            .update_index("courses", &ctx, None)
            .await?;
        assert_eq!(cluster.index_names(), ["courses"]);
        assert!(!cluster.calls().iter().any(|call| call.contains(MIGRATING_SUFFIX)));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_update_migrates_in_place_and_cleans_up() -> Result<()> {
        let (cluster, engine) = cluster();
        cluster.seed_index(
            "courses",
            json!({"old": true}),
            vec![
                ("1".to_string(), json!({"title": "Rust"})),
                ("2".to_string(), json!({"title": "Go"})),
            ],
        );
        // -- 🧟 residue from an update that died halfway
        cluster.seed_index("courses__migrating", json!({}), vec![("zombie".to_string(), json!({}))]);

        let shout = |mut source: Value| -> Result<Value> {
            let title = source["title"].as_str().unwrap_or_default().to_uppercase();
            source["title"] = json!(title);
            Ok(source)
        };
        let scroll = ScrollSettings {
            keep_alive: "1m".into(),
            page_size: 1,
        };
        let ctx = EngineContext {
            engine: &engine,
            response_handler: None,
            scroll: &scroll,
        };
        StaticIndexManager::new(definition())
            .update_index("courses", &ctx, Some(&shout))
            .await?;

        assert_eq!(cluster.index_names(), ["courses"], "scratch index is gone");
        assert_eq!(cluster.definition("courses"), Some(definition()));
        let documents = cluster.documents("courses").unwrap_or_default();
        assert_eq!(documents.len(), 2, "the zombie did not sneak back in");
        assert_eq!(documents["1"], json!({"title": "RUST"}));
        assert_eq!(documents["2"], json!({"title": "GO"}));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_pipelines_go_in_and_come_out() -> Result<()> {
        let (cluster, engine) = cluster();
        let scroll = ScrollSettings::default();
        let ctx = EngineContext {
            engine: &engine,
            response_handler: None,
            scroll: &scroll,
        };
        let manager = StaticPipelineManager::new(json!({"processors": [{"lowercase": {"field": "title"}}]}));
        manager.create_pipeline("normalize", &ctx).await?;
        assert!(cluster.pipeline("normalize").is_some());
        manager.delete_pipeline("normalize", &ctx).await?;
        assert!(cluster.pipeline("normalize").is_none());
        Ok(())
    }
}
