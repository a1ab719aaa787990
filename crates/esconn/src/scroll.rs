//! 📜 Scroll -- paging through every document of an index, one bulk at a time.
//!
//! 🎬 COLD OPEN -- INT. SOURCE INDEX -- THE DOCUMENTS FORM AN ORDERLY QUEUE
//!
//! A [`ScrollCursor`] is a finite, lazy sequence of pages. The first `next_page` opens a
//! scroll-enabled search, every later call continues with the latest cursor id and the same
//! keep-alive, and the first empty page ends it. The set of documents is the snapshot taken
//! when the search opened: anything written to the source afterwards may or may not show up.
//!
//! [`copy_documents`] drives a cursor into bulk writes: one bulk request per non-empty page,
//! written before the next page is requested, migrator applied per document. Then it
//! refreshes the destination so the next phase of a rebuild can read what it just wrote.
//!
//! 🦆 The duck scrolls too. Mostly through memes.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::documents::{DocumentMigrator, Hit, migrate_or_keep};
use crate::engine::bulk::inspect_bulk_response;
use crate::engine::{BulkOperation, BulkRequest, Engine, EngineBackend, count_from_response};
use crate::error::ConnectorError;
use crate::progress::CopyProgress;
use crate::response::{ResponseHandler, notify};

/// ⏳ How scroll cursors are opened: keep-alive window and page size.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScrollSettings {
    pub keep_alive: String,
    pub page_size: usize,
}

impl Default for ScrollSettings {
    fn default() -> Self {
        Self {
            keep_alive: "1m".to_string(),
            page_size: 500,
        }
    }
}

/// 📜 A lazy page sequence over one index (or alias).
pub struct ScrollCursor<'a> {
    engine: &'a EngineBackend,
    index: String,
    settings: &'a ScrollSettings,
    response_handler: Option<&'a dyn ResponseHandler>,
    scroll_id: Option<String>,
    started: bool,
    exhausted: bool,
}

impl<'a> ScrollCursor<'a> {
    pub fn new(
        engine: &'a EngineBackend,
        index: impl Into<String>,
        settings: &'a ScrollSettings,
        response_handler: Option<&'a dyn ResponseHandler>,
    ) -> Self {
        Self {
            engine,
            index: index.into(),
            settings,
            response_handler,
            scroll_id: None,
            started: false,
            exhausted: false,
        }
    }

    /// 📄 The next page of hits, or `None` once a page came back empty.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Hit>>> {
        if self.exhausted {
            return Ok(None);
        }

        let response = if self.started {
            let Some(scroll_id) = self.scroll_id.as_deref() else {
                return Err(ConnectorError::unexpected(
                    "scroll",
                    format!("the scroll over '{}' never handed out a `_scroll_id`", self.index),
                )
                .into());
            };
            let response = self
                .engine
                .scroll(scroll_id, &self.settings.keep_alive)
                .await
                .with_context(|| format!("💀 Lost the scroll through '{}' mid-page.", self.index))?;
            notify(self.response_handler, "scroll", &response);
            response
        } else {
            let body = json!({"size": self.settings.page_size, "sort": ["_doc"]});
            let response = self
                .engine
                .search(&self.index, &body, Some(&self.settings.keep_alive))
                .await
                .with_context(|| format!("💀 Could not open a scroll over '{}'.", self.index))?;
            notify(self.response_handler, "search", &response);
            self.started = true;
            response
        };

        if let Some(scroll_id) = response["_scroll_id"].as_str() {
            self.scroll_id = Some(scroll_id.to_string());
        }

        let hits = response["hits"]["hits"]
            .as_array()
            .map(|raw_hits| raw_hits.iter().map(Hit::from_search_hit).collect::<Result<Vec<_>>>())
            .transpose()?
            .unwrap_or_default();

        if hits.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }
        debug!(index = %self.index, hits = hits.len(), "📄 scroll page");
        Ok(Some(hits))
    }

    /// 🧹 Release the server-side cursor. Best effort: an expired cursor is already gone.
    pub async fn close(&mut self) {
        let Some(scroll_id) = self.scroll_id.take() else {
            return;
        };
        match self.engine.clear_scroll(&scroll_id).await {
            Ok(response) => notify(self.response_handler, "clear_scroll", &response),
            Err(err) => warn!(index = %self.index, error = %err, "⚠️ could not clear scroll cursor, it will expire on its own"),
        }
    }
}

/// 🚚 Copy every document of `source` into `target`, one bulk request per page.
///
/// Returns how many documents were written. The target is refreshed at the end.
pub async fn copy_documents(
    engine: &EngineBackend,
    source: &str,
    target: &str,
    migrator: Option<&dyn DocumentMigrator>,
    settings: &ScrollSettings,
    response_handler: Option<&dyn ResponseHandler>,
) -> Result<u64> {
    let expected = match engine.count(source, &json!({"query": {"match_all": {}}})).await {
        Ok(response) => {
            notify(response_handler, "count", &response);
            count_from_response(&response).unwrap_or(0)
        }
        Err(err) => {
            warn!(source, error = %err, "⚠️ could not count the source, copying without a total");
            0
        }
    };
    info!(source, target, expected, "🚚 copying documents");

    let mut progress = CopyProgress::new(format!("{source} -> {target}"), expected);
    let mut cursor = ScrollCursor::new(engine, source, settings, response_handler);
    let copied = copy_pages(engine, &mut cursor, target, migrator, response_handler, &mut progress).await;
    cursor.close().await;
    progress.finish();
    let copied = copied?;

    let refreshed = engine
        .refresh_index(target)
        .await
        .with_context(|| format!("💀 Copied into '{target}' but could not refresh it."))?;
    notify(response_handler, "refresh_index", &refreshed);

    info!(source, target, copied, "✅ copy finished");
    Ok(copied)
}

async fn copy_pages(
    engine: &EngineBackend,
    cursor: &mut ScrollCursor<'_>,
    target: &str,
    migrator: Option<&dyn DocumentMigrator>,
    response_handler: Option<&dyn ResponseHandler>,
    progress: &mut CopyProgress,
) -> Result<u64> {
    while let Some(page) = cursor.next_page().await? {
        let page_len = page.len() as u64;
        let operations = page
            .into_iter()
            .map(|hit| {
                let id = hit.id.clone();
                migrate_or_keep(migrator, hit).map(|source| BulkOperation::Index {
                    index: target.to_string(),
                    id,
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let response = engine
            .bulk(&BulkRequest {
                operations,
                pipeline: None,
                refresh: None,
            })
            .await
            .with_context(|| format!("💀 A copy page of {page_len} document(s) bounced off '{target}'."))?;
        notify(response_handler, "bulk", &response);
        inspect_bulk_response(&response)?;
        progress.update(page_len);
    }
    Ok(progress.copied())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InMemoryEngine;

    fn collect_ids(hits: &[Hit]) -> Vec<String> {
        hits.iter().map(|hit| hit.id.clone()).collect()
    }

    fn seeded(count: usize) -> (InMemoryEngine, EngineBackend) {
        let cluster = InMemoryEngine::new();
        cluster.seed_index(
            "source",
            json!({}),
            (0..count).map(|i| (format!("{i:03}"), json!({"n": i}))),
        );
        cluster.seed_index("target", json!({}), Vec::new());
        let backend = EngineBackend::InMemory(cluster.clone());
        (cluster, backend)
    }

    #[tokio::test]
    async fn the_one_where_the_cursor_ends_on_an_empty_page() -> Result<()> {
        let (cluster, engine) = seeded(5);
        let settings = ScrollSettings {
            keep_alive: "1m".into(),
            page_size: 2,
        };
        let mut cursor = ScrollCursor::new(&engine, "source", &settings, None);
        let mut pages = Vec::new();
        while let Some(page) = cursor.next_page().await? {
            pages.push(collect_ids(&page));
        }
        assert_eq!(pages, vec![vec!["000", "001"], vec!["002", "003"], vec!["004"]]);
        assert!(cursor.next_page().await?.is_none(), "exhausted stays exhausted");
        cursor.close().await;
        assert_eq!(cluster.open_scrolls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_each_page_is_one_bulk() -> Result<()> {
        let (cluster, engine) = seeded(5);
        let settings = ScrollSettings {
            keep_alive: "1m".into(),
            page_size: 2,
        };
        let copied = copy_documents(&engine, "source", "target", None, &settings, None).await?;
        assert_eq!(copied, 5);
        let sizes: Vec<usize> = cluster
            .bulk_requests()
            .iter()
            .map(|request| request.operations.len())
            .collect();
        assert_eq!(sizes, [2, 2, 1]);
        assert_eq!(cluster.documents("target"), cluster.documents("source"));
        assert!(cluster.calls().iter().any(|call| call == "refresh_index target"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_migrator_touches_every_document() -> Result<()> {
        let (cluster, engine) = seeded(3);
        let double = |mut source: Value| -> Result<Value> {
            source["n"] = json!(source["n"].as_i64().unwrap_or_default() * 2);
            Ok(source)
        };
        copy_documents(
            &engine,
            "source",
            "target",
            Some(&double),
            &ScrollSettings::default(),
            None,
        )
        .await?;
        let target = cluster.documents("target").unwrap_or_default();
        assert_eq!(target["002"], json!({"n": 4}));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_empty_source_copies_nothing() -> Result<()> {
        let (cluster, engine) = seeded(0);
        let copied =
            copy_documents(&engine, "source", "target", None, &ScrollSettings::default(), None)
                .await?;
        assert_eq!(copied, 0);
        assert!(cluster.bulk_requests().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_failed_bulk_still_releases_the_cursor() -> Result<()> {
        let (cluster, engine) = seeded(3);
        cluster.fail_next("bulk");
        let result =
            copy_documents(&engine, "source", "target", None, &ScrollSettings::default(), None)
                .await;
        assert!(result.is_err());
        assert_eq!(cluster.open_scrolls(), 0);
        Ok(())
    }
}
