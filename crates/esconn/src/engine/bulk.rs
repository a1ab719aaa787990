//! 📦 Bulk wire format -- two lines per document, one line per delete, a trailing newline always.
//!
//! 🎬 COLD OPEN -- INT. `_bulk` ENDPOINT -- THE LINE STRETCHES AROUND THE BLOCK
//!
//! The bulk API wants NDJSON. Index operations are an action line followed by the source
//! line. Delete operations are just the action line, because there is nothing left to say.
//! The whole body ends with `\n`, and forgetting it earns a 400 that reads like a
//! disappointed parent's text message.
//!
//! The second half of this module reads the answer: a bulk response can be a 200 with a
//! pile of individual failures hiding inside `items`. A delete that found nothing is a 404
//! item, and that one is fine. Anything else at or above 300 is a real failure.

use anyhow::{Context, Result};
use serde_json::{Value, json};

use super::BulkOperation;
use crate::error::ConnectorError;

/// 🔄 Render operations into a `_bulk` body, trailing newline included.
pub(crate) fn render_ndjson(operations: &[BulkOperation]) -> Result<String> {
    let mut body = String::new();
    for operation in operations {
        match operation {
            BulkOperation::Index { index, id, source } => {
                let action = json!({"index": {"_index": index, "_id": id}});
                body.push_str(
                    &serde_json::to_string(&action)
                        .context("💀 Failed to serialize a bulk index action line.")?,
                );
                body.push('\n');
                body.push_str(&serde_json::to_string(source).with_context(|| {
                    format!("💀 Failed to serialize the source of document '{id}' for bulk.")
                })?);
                body.push('\n');
            }
            BulkOperation::Delete { index, id } => {
                let action = json!({"delete": {"_index": index, "_id": id}});
                body.push_str(
                    &serde_json::to_string(&action)
                        .context("💀 Failed to serialize a bulk delete action line.")?,
                );
                body.push('\n');
            }
        }
    }
    Ok(body)
}

/// 🔍 Look inside a bulk response for item failures.
///
/// Returns [`ConnectorError::BulkItemsFailed`] with the failure count and the first reason
/// when any item reports a status >= 300 other than 404.
pub(crate) fn inspect_bulk_response(response: &Value) -> Result<()> {
    if !response["errors"].as_bool().unwrap_or(false) {
        return Ok(());
    }

    let mut failed = 0usize;
    let mut first_reason: Option<String> = None;
    for item in response["items"].as_array().into_iter().flatten() {
        // -- every item is `{"<action>": {...}}`, exactly one key
        let Some(outcome) = item.as_object().and_then(|action| action.values().next()) else {
            continue;
        };
        let status = outcome["status"].as_u64().unwrap_or(0);
        if status < 300 || status == 404 {
            continue;
        }
        failed += 1;
        if first_reason.is_none() {
            let reason = outcome["error"]["reason"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| outcome["error"].to_string());
            let id = outcome["_id"].as_str().unwrap_or("?");
            first_reason = Some(format!("[{id}] status {status}: {reason}"));
        }
    }

    if failed == 0 {
        return Ok(());
    }
    Err(ConnectorError::BulkItemsFailed {
        failed,
        first_reason: first_reason.unwrap_or_default(),
    }
    .into())
}
