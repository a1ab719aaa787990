//! 💀 Errors -- the short list of things that go wrong often enough to deserve a name.
//!
//! Everything else rides inside `anyhow::Error` with a context chain that reads like
//! a post-mortem. These variants are the ones a caller might actually want to `match`
//! on, so they get a real type. Callers reach them through
//! `err.downcast_ref::<ConnectorError>()`.
//!
//! 🦆 The duck asked for a variant. The duck did not get a variant.

use thiserror::Error;

/// 💀 Typed failures surfaced by the connector, the managers and the engines.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// 🔧 Nobody registered an index manager under this internal name. Configuration fault,
    /// never retried. Go check the builder.
    #[error("💀 No index manager found for index '{0}'. It was never registered, so we cannot create, update or rebuild it.")]
    MissingIndexManager(String),

    /// 🚫 `create_index` was asked to create something that already physically exists.
    #[error("💀 The index '{0}' does already exist. Refusing to create it twice.")]
    IndexAlreadyExists(String),

    /// 🔀 An alias resolved to anything other than exactly one physical index.
    #[error("💀 Alias '{alias}' points at {} indices ({}), expected exactly one. Refusing to guess which one is current.", .targets.len(), .targets.join(", "))]
    AmbiguousAlias { alias: String, targets: Vec<String> },

    /// 📡 The engine answered, and the answer was a non-2xx status.
    #[error("💀 The engine rejected '{operation}' with status {status}: {body}")]
    Remote {
        operation: String,
        status: u16,
        body: String,
    },

    /// 📦 A bulk request went through, but some of its items did not.
    #[error("💀 {failed} bulk item(s) failed. First reason: {first_reason}")]
    BulkItemsFailed { failed: usize, first_reason: String },

    /// 🤷 The engine said something we could not make sense of.
    #[error("💀 Unexpected response for '{operation}': {detail}")]
    UnexpectedResponse { operation: String, detail: String },
}

impl ConnectorError {
    /// 📡 Shorthand for a remote rejection.
    pub fn remote(operation: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::Remote {
            operation: operation.into(),
            status,
            body: body.into(),
        }
    }

    /// 🤷 Shorthand for an unparseable response.
    pub fn unexpected(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            operation: operation.into(),
            detail: detail.into(),
        }
    }

    /// 🔍 True when this is a remote 404. Not-found is an outcome, not a fault.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Remote { status: 404, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_ambiguous_aliases_list_every_suspect() {
        let err = ConnectorError::AmbiguousAlias {
            alias: "courses".to_string(),
            targets: vec!["courses__a".to_string(), "courses__b".to_string()],
        };
        let rendered = err.to_string();
        assert!(rendered.contains("2 indices"));
        assert!(rendered.contains("courses__a, courses__b"));
    }

    #[test]
    fn the_one_where_only_a_404_counts_as_not_found() {
        assert!(ConnectorError::remote("get", 404, "{}").is_not_found());
        assert!(!ConnectorError::remote("get", 500, "{}").is_not_found());
        assert!(!ConnectorError::IndexAlreadyExists("x".into()).is_not_found());
    }

    #[test]
    fn the_one_where_anyhow_gives_the_typed_error_back() {
        let err: anyhow::Error = ConnectorError::MissingIndexManager("courses".into()).into();
        assert!(matches!(
            err.downcast_ref::<ConnectorError>(),
            Some(ConnectorError::MissingIndexManager(name)) if name == "courses"
        ));
    }
}
