//! 🧠 In-memory engine -- a pocket-sized cluster that lives inside a `Mutex`.
//!
//! 🎬 COLD OPEN -- INT. TEST RUNNER -- NO NETWORK, NO DOCKER, NO PROBLEM
//!
//! It keeps indices, aliases, pipelines and scroll cursors in ordered maps, and it writes
//! down every call it receives so tests can ask "what exactly did you do?" afterwards.
//! Clones share the same state, so a test keeps one handle while the connector drives
//! another.
//!
//! Behaves like the real thing where the orchestration cares:
//! - `index_exists` says yes to aliases too.
//! - Document reads, search and count resolve aliases; writes through an alias land in its
//!   single target.
//! - Creating a name that already exists as an index or an alias is a 400.
//! - Deleting an alias through `delete_index` is a 400. Deleting a ghost is a 404.
//! - `_aliases` updates are atomic. Adding an alias whose name is a live index is a 400.
//! - A request naming a pipeline that was never stored is a 400.
//! - Bulk items carry per-item statuses; deleting a missing doc is a 404 item.
//!
//! What it does not do: query evaluation, pipeline processors, mappings. Search returns
//! every document in `(index, id)` order and honours `size` only.
//!
//! 🦆 The duck is also in memory. It will be gone when the test ends. Such is life.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::trace;

use super::{AliasAction, BulkOperation, BulkRequest, Engine, IndexDocumentRequest};
use crate::error::ConnectorError;

const DEFAULT_SEARCH_SIZE: usize = 10;

#[derive(Debug, Default)]
struct StoredIndex {
    definition: Value,
    documents: BTreeMap<String, Value>,
}

#[derive(Debug)]
struct OpenScroll {
    remaining: VecDeque<Value>,
    page_size: usize,
}

#[derive(Debug, Default)]
struct ClusterState {
    indices: BTreeMap<String, StoredIndex>,
    aliases: BTreeMap<String, BTreeSet<String>>,
    pipelines: BTreeMap<String, Value>,
    scrolls: BTreeMap<String, OpenScroll>,
    scroll_sequence: u64,
    calls: Vec<String>,
    bulk_requests: Vec<BulkRequest>,
    planned_failures: Vec<String>,
}

impl ClusterState {
    /// 📝 Write the call down, then blow up if a test planted a failure for this verb.
    fn record(&mut self, verb: &str, target: &str) -> Result<()> {
        self.calls.push(format!("{verb} {target}"));
        trace!(verb, target, "🧠 in-memory engine call");
        if let Some(position) = self.planned_failures.iter().position(|v| v == verb) {
            self.planned_failures.remove(position);
            return Err(ConnectorError::remote(verb, 503, "planned failure").into());
        }
        Ok(())
    }

    fn missing_index(operation: &str, name: &str) -> anyhow::Error {
        ConnectorError::remote(
            operation,
            404,
            json!({"error": {"type": "index_not_found_exception", "index": name}}).to_string(),
        )
        .into()
    }

    fn bad_request(operation: &str, kind: &str, reason: String) -> anyhow::Error {
        ConnectorError::remote(
            operation,
            400,
            json!({"error": {"type": kind, "reason": reason}}).to_string(),
        )
        .into()
    }

    fn ensure_pipeline(&self, operation: &str, pipeline: Option<&String>) -> Result<()> {
        match pipeline {
            Some(id) if !self.pipelines.contains_key(id) => Err(Self::bad_request(
                operation,
                "illegal_argument_exception",
                format!("pipeline with id [{id}] does not exist"),
            )),
            _ => Ok(()),
        }
    }

    /// 🔍 Read targets: comma list, `_all`, indices and aliases. Unknown names are a 404.
    fn resolve_read(&self, operation: &str, names: &str) -> Result<Vec<String>> {
        if names == "_all" {
            return Ok(self.indices.keys().cloned().collect());
        }
        let mut resolved = BTreeSet::new();
        for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if self.indices.contains_key(name) {
                resolved.insert(name.to_string());
            } else if let Some(targets) = self.aliases.get(name) {
                resolved.extend(targets.iter().cloned());
            } else {
                return Err(Self::missing_index(operation, name));
            }
        }
        Ok(resolved.into_iter().collect())
    }

    /// ✍️ Write target: a concrete index, or the single target of an alias. A name that is
    /// neither gets auto-created, like a cluster with default settings would.
    fn resolve_write(&mut self, operation: &str, name: &str) -> Result<String> {
        if self.indices.contains_key(name) {
            return Ok(name.to_string());
        }
        if let Some(targets) = self.aliases.get(name) {
            return match targets.iter().collect::<Vec<_>>().as_slice() {
                [only] => Ok((*only).clone()),
                _ => Err(Self::bad_request(
                    operation,
                    "illegal_argument_exception",
                    format!("no write index is defined for alias [{name}]"),
                )),
            };
        }
        self.indices.insert(
            name.to_string(),
            StoredIndex {
                definition: json!({}),
                documents: BTreeMap::new(),
            },
        );
        Ok(name.to_string())
    }

    fn hits_for(&self, indices: &[String]) -> Vec<Value> {
        indices
            .iter()
            .filter_map(|index| self.indices.get(index).map(|stored| (index, stored)))
            .flat_map(|(index, stored)| {
                stored.documents.iter().map(move |(id, source)| {
                    json!({"_index": index, "_id": id, "_source": source})
                })
            })
            .collect()
    }

    fn apply_bulk_operation(&mut self, operation: &BulkOperation) -> Value {
        match operation {
            BulkOperation::Index { index, id, source } => {
                match self.resolve_write("bulk", index) {
                    Ok(concrete) => {
                        let documents = &mut self
                            .indices
                            .entry(concrete.clone())
                            .or_default()
                            .documents;
                        let created = documents.insert(id.clone(), source.clone()).is_none();
                        json!({"index": {
                            "_index": concrete,
                            "_id": id,
                            "status": if created { 201 } else { 200 },
                            "result": if created { "created" } else { "updated" }
                        }})
                    }
                    Err(err) => json!({"index": {
                        "_index": index,
                        "_id": id,
                        "status": 400,
                        "error": {"type": "illegal_argument_exception", "reason": err.to_string()}
                    }}),
                }
            }
            BulkOperation::Delete { index, id } => {
                let concrete = self.resolve_read("bulk", index).ok().and_then(|targets| {
                    match targets.as_slice() {
                        [only] => Some(only.clone()),
                        _ => None,
                    }
                });
                let removed = concrete
                    .as_ref()
                    .and_then(|name| self.indices.get_mut(name))
                    .and_then(|stored| stored.documents.remove(id))
                    .is_some();
                json!({"delete": {
                    "_index": concrete.unwrap_or_else(|| index.clone()),
                    "_id": id,
                    "status": if removed { 200 } else { 404 },
                    "result": if removed { "deleted" } else { "not_found" }
                }})
            }
        }
    }
}

/// 🧠 The in-memory [`Engine`]. See the module docs for what it imitates.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEngine {
    state: Arc<Mutex<ClusterState>>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    // -- a panicking test thread must not take every later assertion down with it
    fn state(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 🌱 Put an index with documents in place, no call recorded.
    pub fn seed_index<I>(&self, name: &str, definition: Value, documents: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.state().indices.insert(
            name.to_string(),
            StoredIndex {
                definition,
                documents: documents.into_iter().collect(),
            },
        );
    }

    /// 🌱 Point an alias at an index, no call recorded.
    pub fn seed_alias(&self, alias: &str, index: &str) {
        self.state()
            .aliases
            .entry(alias.to_string())
            .or_default()
            .insert(index.to_string());
    }

    /// 🌱 Store a pipeline, no call recorded.
    pub fn seed_pipeline(&self, id: &str, definition: Value) {
        self.state().pipelines.insert(id.to_string(), definition);
    }

    /// 💥 Make the next call of `verb` (e.g. `"bulk"`, `"update_aliases"`) fail with a 503.
    pub fn fail_next(&self, verb: &str) {
        self.state().planned_failures.push(verb.to_string());
    }

    /// 📋 Physical index names, sorted.
    pub fn index_names(&self) -> Vec<String> {
        self.state().indices.keys().cloned().collect()
    }

    pub fn definition(&self, index: &str) -> Option<Value> {
        self.state()
            .indices
            .get(index)
            .map(|stored| stored.definition.clone())
    }

    /// 📦 Documents of a physical index, by id.
    pub fn documents(&self, index: &str) -> Option<BTreeMap<String, Value>> {
        self.state()
            .indices
            .get(index)
            .map(|stored| stored.documents.clone())
    }

    /// 🔀 Physical indices an alias points at, sorted. Empty when there is no such alias.
    pub fn alias_targets(&self, alias: &str) -> Vec<String> {
        self.state()
            .aliases
            .get(alias)
            .map(|targets| targets.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn pipeline(&self, id: &str) -> Option<Value> {
        self.state().pipelines.get(id).cloned()
    }

    /// 📝 Every call so far as `"<verb> <target>"`, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn bulk_requests(&self) -> Vec<BulkRequest> {
        self.state().bulk_requests.clone()
    }

    pub fn open_scrolls(&self) -> usize {
        self.state().scrolls.len()
    }
}

#[async_trait]
impl Engine for InMemoryEngine {
    async fn index_exists(&self, index: &str) -> Result<bool> {
        let mut state = self.state();
        state.record("index_exists", index)?;
        Ok(state.indices.contains_key(index) || state.aliases.contains_key(index))
    }

    async fn create_index(&self, index: &str, definition: &Value) -> Result<Value> {
        let mut state = self.state();
        state.record("create_index", index)?;
        if state.indices.contains_key(index) || state.aliases.contains_key(index) {
            return Err(ClusterState::bad_request(
                "create_index",
                "resource_already_exists_exception",
                format!("index [{index}] already exists"),
            ));
        }
        state.indices.insert(
            index.to_string(),
            StoredIndex {
                definition: definition.clone(),
                documents: BTreeMap::new(),
            },
        );
        Ok(json!({"acknowledged": true, "shards_acknowledged": true, "index": index}))
    }

    async fn delete_index(&self, index: &str) -> Result<Value> {
        let mut state = self.state();
        state.record("delete_index", index)?;
        if state.aliases.contains_key(index) && !state.indices.contains_key(index) {
            return Err(ClusterState::bad_request(
                "delete_index",
                "illegal_argument_exception",
                format!(
                    "The provided expression [{index}] matches an alias, specify the corresponding concrete indices instead."
                ),
            ));
        }
        if state.indices.remove(index).is_none() {
            return Err(ClusterState::missing_index("delete_index", index));
        }
        // -- 🔀 an index takes its alias memberships to the grave
        for targets in state.aliases.values_mut() {
            targets.remove(index);
        }
        state.aliases.retain(|_, targets| !targets.is_empty());
        Ok(json!({"acknowledged": true}))
    }

    async fn refresh_index(&self, index: &str) -> Result<Value> {
        let mut state = self.state();
        state.record("refresh_index", index)?;
        let targets = state.resolve_read("refresh_index", index)?;
        Ok(json!({"_shards": {"total": targets.len(), "successful": targets.len(), "failed": 0}}))
    }

    async fn alias_exists(&self, alias: &str) -> Result<bool> {
        let mut state = self.state();
        state.record("alias_exists", alias)?;
        Ok(state.aliases.contains_key(alias))
    }

    async fn get_alias(&self, alias: &str) -> Result<Value> {
        let mut state = self.state();
        state.record("get_alias", alias)?;
        let Some(targets) = state.aliases.get(alias) else {
            return Err(ConnectorError::remote(
                "get_alias",
                404,
                json!({"error": format!("alias [{alias}] missing"), "status": 404}).to_string(),
            )
            .into());
        };
        let mut response = Map::new();
        for target in targets {
            response.insert(target.clone(), json!({"aliases": {alias: {}}}));
        }
        Ok(Value::Object(response))
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<Value> {
        let mut state = self.state();
        let described: Vec<String> = actions.iter().map(|a| a.to_json().to_string()).collect();
        state.record("update_aliases", &described.join(","))?;

        // -- validate everything first, then apply everything: all or nothing
        for action in actions {
            match action {
                AliasAction::Add { index, alias } => {
                    if !state.indices.contains_key(index) {
                        return Err(ClusterState::missing_index("update_aliases", index));
                    }
                    if state.indices.contains_key(alias) {
                        return Err(ClusterState::bad_request(
                            "update_aliases",
                            "invalid_alias_name_exception",
                            format!("an index exists with the same name as the alias [{alias}]"),
                        ));
                    }
                }
                AliasAction::Remove { index, alias } => {
                    let present = state
                        .aliases
                        .get(alias)
                        .is_some_and(|targets| targets.contains(index));
                    if !present {
                        return Err(ConnectorError::remote(
                            "update_aliases",
                            404,
                            json!({"error": {"type": "aliases_not_found_exception", "reason": format!("aliases [{alias}] missing")}}).to_string(),
                        )
                        .into());
                    }
                }
            }
        }
        for action in actions {
            match action {
                AliasAction::Add { index, alias } => {
                    state
                        .aliases
                        .entry(alias.clone())
                        .or_default()
                        .insert(index.clone());
                }
                AliasAction::Remove { index, alias } => {
                    if let Some(targets) = state.aliases.get_mut(alias) {
                        targets.remove(index);
                    }
                }
            }
        }
        state.aliases.retain(|_, targets| !targets.is_empty());
        Ok(json!({"acknowledged": true}))
    }

    async fn index_document(&self, request: &IndexDocumentRequest) -> Result<Value> {
        let mut state = self.state();
        state.record("index_document", &format!("{}/{}", request.index, request.id))?;
        state.ensure_pipeline("index_document", request.pipeline.as_ref())?;
        let concrete = state.resolve_write("index_document", &request.index)?;
        let created = state
            .indices
            .entry(concrete.clone())
            .or_default()
            .documents
            .insert(request.id.clone(), request.source.clone())
            .is_none();
        Ok(json!({
            "_index": concrete,
            "_id": request.id,
            "result": if created { "created" } else { "updated" },
            "forced_refresh": request.refresh
        }))
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Value>> {
        let mut state = self.state();
        state.record("get_document", &format!("{index}/{id}"))?;
        let Ok(targets) = state.resolve_read("get_document", index) else {
            return Ok(None);
        };
        Ok(targets.iter().find_map(|target| {
            state
                .indices
                .get(target)
                .and_then(|stored| stored.documents.get(id))
                .map(|source| json!({"_index": target, "_id": id, "found": true, "_source": source}))
        }))
    }

    async fn delete_document(&self, index: &str, id: &str, _refresh: bool) -> Result<Value> {
        let mut state = self.state();
        state.record("delete_document", &format!("{index}/{id}"))?;
        let outcome = state.apply_bulk_operation(&BulkOperation::Delete {
            index: index.to_string(),
            id: id.to_string(),
        });
        Ok(outcome["delete"].clone())
    }

    async fn bulk(&self, request: &BulkRequest) -> Result<Value> {
        let mut state = self.state();
        state.record("bulk", &request.operations.len().to_string())?;
        state.ensure_pipeline("bulk", request.pipeline.as_ref())?;
        state.bulk_requests.push(request.clone());
        let items: Vec<Value> = request
            .operations
            .iter()
            .map(|operation| state.apply_bulk_operation(operation))
            .collect();
        let errors = items.iter().any(|item| {
            item.as_object()
                .and_then(|action| action.values().next())
                .and_then(|outcome| outcome["status"].as_u64())
                .is_some_and(|status| status >= 300)
        });
        Ok(json!({"took": 0, "errors": errors, "items": items}))
    }

    async fn search(&self, indices: &str, body: &Value, scroll: Option<&str>) -> Result<Value> {
        let mut state = self.state();
        state.record("search", indices)?;
        let targets = state.resolve_read("search", indices)?;
        let page_size = body["size"]
            .as_u64()
            .map(|size| size as usize)
            .unwrap_or(DEFAULT_SEARCH_SIZE);
        let mut all_hits: VecDeque<Value> = state.hits_for(&targets).into();
        let total = all_hits.len();
        let first_page: Vec<Value> = all_hits
            .drain(..page_size.min(total))
            .collect();

        let mut response = json!({
            "took": 0,
            "timed_out": false,
            "hits": {"total": {"value": total, "relation": "eq"}, "hits": first_page}
        });
        if scroll.is_some() {
            state.scroll_sequence += 1;
            let scroll_id = format!("in-mem-scroll-{}", state.scroll_sequence);
            state.scrolls.insert(
                scroll_id.clone(),
                OpenScroll {
                    remaining: all_hits,
                    page_size,
                },
            );
            response["_scroll_id"] = json!(scroll_id);
        }
        Ok(response)
    }

    async fn scroll(&self, scroll_id: &str, _keep_alive: &str) -> Result<Value> {
        let mut state = self.state();
        state.record("scroll", scroll_id)?;
        let Some(open) = state.scrolls.get_mut(scroll_id) else {
            return Err(ConnectorError::remote(
                "scroll",
                404,
                json!({"error": {"type": "search_context_missing_exception", "reason": format!("No search context found for id [{scroll_id}]")}}).to_string(),
            )
            .into());
        };
        let take = open.page_size.min(open.remaining.len());
        let page: Vec<Value> = open.remaining.drain(..take).collect();
        Ok(json!({"_scroll_id": scroll_id, "hits": {"hits": page}}))
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<Value> {
        let mut state = self.state();
        state.record("clear_scroll", scroll_id)?;
        let freed = usize::from(state.scrolls.remove(scroll_id).is_some());
        Ok(json!({"succeeded": true, "num_freed": freed}))
    }

    async fn put_pipeline(&self, id: &str, definition: &Value) -> Result<Value> {
        let mut state = self.state();
        state.record("put_pipeline", id)?;
        state.pipelines.insert(id.to_string(), definition.clone());
        Ok(json!({"acknowledged": true}))
    }

    async fn delete_pipeline(&self, id: &str) -> Result<Value> {
        let mut state = self.state();
        state.record("delete_pipeline", id)?;
        if state.pipelines.remove(id).is_none() {
            return Err(ConnectorError::remote(
                "delete_pipeline",
                404,
                json!({"error": {"type": "resource_not_found_exception", "reason": format!("pipeline [{id}] is missing")}}).to_string(),
            )
            .into());
        }
        Ok(json!({"acknowledged": true}))
    }

    async fn count(&self, indices: &str, _body: &Value) -> Result<Value> {
        let mut state = self.state();
        state.record("count", indices)?;
        let targets = state.resolve_read("count", indices)?;
        let count = state.hits_for(&targets).len();
        Ok(json!({"count": count}))
    }
}
