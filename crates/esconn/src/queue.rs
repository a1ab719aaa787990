//! 📬 The bulk queue -- where writes wait in line until there are enough of them to be worth a trip.
//!
//! 🎬 COLD OPEN -- INT. LOADING DOCK -- A FORKLIFT IDLES
//!
//! Writes pile up here in insertion order. A flush ships all of them in one bulk request,
//! tagged with the single pipeline the queue is currently bound to. One request, one
//! pipeline: that is the whole reason the connector flushes before switching pipelines.
//!
//! Flush outcomes:
//! - empty queue: nothing happens, not even a network call.
//! - the request never landed (transport error, non-2xx): the operations go back in the
//!   queue untouched, pipeline binding included, and the error surfaces.
//! - the request landed: the queue is cleared and the binding reset, then any item-level
//!   failures surface as [`ConnectorError::BulkItemsFailed`](crate::error::ConnectorError).
//!
//! 🦆 The duck is first in line. The duck is always first in line.

use anyhow::Result;
use tracing::debug;

use crate::engine::bulk::inspect_bulk_response;
use crate::engine::{BulkOperation, BulkRequest, Engine, EngineBackend};
use crate::naming::NameProvider;
use crate::response::{ResponseHandler, notify};

/// 📬 Pending bulk operations plus the (internal) pipeline they will be sent with.
#[derive(Debug, Default)]
pub(crate) struct BulkQueue {
    operations: Vec<BulkOperation>,
    pipeline: Option<String>,
}

impl BulkQueue {
    pub(crate) fn len(&self) -> usize {
        self.operations.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub(crate) fn operations(&self) -> &[BulkOperation] {
        &self.operations
    }

    /// 🚰 Internal name of the bound pipeline, if any.
    pub(crate) fn pipeline(&self) -> Option<&str> {
        self.pipeline.as_deref()
    }

    pub(crate) fn bind_pipeline(&mut self, pipeline: Option<String>) {
        self.pipeline = pipeline;
    }

    pub(crate) fn push(&mut self, operation: BulkOperation) {
        self.operations.push(operation);
    }

    /// 🚚 Ship everything queued as one bulk request. Returns how many operations went out.
    pub(crate) async fn flush(
        &mut self,
        engine: &EngineBackend,
        refresh: bool,
        pipeline_names: &dyn NameProvider,
        response_handler: Option<&dyn ResponseHandler>,
    ) -> Result<usize> {
        if self.operations.is_empty() {
            return Ok(0);
        }

        let pipeline = self.pipeline.take();
        let request = BulkRequest {
            operations: std::mem::take(&mut self.operations),
            pipeline: pipeline
                .as_deref()
                .map(|internal| pipeline_names.provide_external_name(internal)),
            refresh: Some(refresh),
        };
        let shipped = request.operations.len();
        debug!(operations = shipped, pipeline = ?request.pipeline, "📬 flushing bulk queue");

        let response = match engine.bulk(&request).await {
            Ok(response) => response,
            Err(err) => {
                // -- nothing was applied, so nothing is lost
                self.operations = request.operations;
                self.pipeline = pipeline;
                return Err(err.context(format!(
                    "💀 Flushing {shipped} queued operation(s) failed. They are still queued."
                )));
            }
        };
        notify(response_handler, "flush", &response);
        inspect_bulk_response(&response)?;
        Ok(shipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InMemoryEngine;
    use crate::naming::PrefixedNameProvider;
    use serde_json::json;

    fn index_op(id: &str) -> BulkOperation {
        BulkOperation::Index {
            index: "courses".into(),
            id: id.into(),
            source: json!({"id": id}),
        }
    }

    #[tokio::test]
    async fn the_one_where_an_empty_flush_stays_home() -> Result<()> {
        let cluster = InMemoryEngine::new();
        let engine = EngineBackend::InMemory(cluster.clone());
        let mut queue = BulkQueue::default();
        let shipped = queue
            .flush(&engine, true, &PrefixedNameProvider::new("p_"), None)
            .await?;
        assert_eq!(shipped, 0);
        assert!(cluster.calls().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_pipeline_gets_its_external_name_and_then_resets() -> Result<()> {
        let cluster = InMemoryEngine::new();
        cluster.seed_pipeline("p_enrich", json!({"processors": []}));
        let engine = EngineBackend::InMemory(cluster.clone());

        let mut queue = BulkQueue::default();
        queue.bind_pipeline(Some("enrich".into()));
        queue.push(index_op("1"));
        queue.push(index_op("2"));
        let shipped = queue
            .flush(&engine, false, &PrefixedNameProvider::new("p_"), None)
            .await?;

        assert_eq!(shipped, 2);
        assert!(queue.is_empty());
        assert_eq!(queue.pipeline(), None);
        let sent = cluster.bulk_requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].pipeline.as_deref(), Some("p_enrich"));
        assert_eq!(sent[0].refresh, Some(false));
        assert_eq!(sent[0].operations, [index_op("1"), index_op("2")]);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_transport_failure_keeps_everything_queued() -> Result<()> {
        let cluster = InMemoryEngine::new();
        cluster.fail_next("bulk");
        let engine = EngineBackend::InMemory(cluster.clone());

        let mut queue = BulkQueue::default();
        queue.bind_pipeline(Some("enrich".into()));
        queue.push(index_op("1"));
        let result = queue
            .flush(&engine, true, &PrefixedNameProvider::new(""), None)
            .await;

        assert!(result.is_err());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pipeline(), Some("enrich"));
        assert_eq!(queue.operations(), [index_op("1")]);
        Ok(())
    }
}
