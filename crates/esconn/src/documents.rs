//! 📦 Documents -- the humble cargo this whole crate exists to shuffle around.
//!
//! A [`Hit`] is one document as it comes out of a search page: where it lives, what it's
//! called, and its `_source`. A [`DocumentMigrator`] is the optional makeover step a hit goes
//! through on its way into a freshly built index. No migrator means identity. Not an error,
//! not a warning, just "you're perfect the way you are".

use anyhow::{Context, Result};
use serde_json::Value;

/// 🎯 A single search hit: `_index`, `_id`, `_source`. The atomic unit of copying.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub index: String,
    pub id: String,
    pub source: Value,
}

impl Hit {
    /// 🔍 Pull a `Hit` out of one entry of `hits.hits`.
    ///
    /// `_source` may be absent when the mapping disabled it; we carry an empty object in that
    /// case rather than refusing the whole page.
    pub fn from_search_hit(raw: &Value) -> Result<Self> {
        let id = raw["_id"]
            .as_str()
            .context("💀 Search hit arrived without an `_id`. A document with no name cannot be copied by name.")?
            .to_string();
        let index = raw["_index"].as_str().unwrap_or_default().to_string();
        let source = raw
            .get("_source")
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));
        Ok(Self { index, id, source })
    }
}

/// 🔄 Reshapes one document body into the next schema's expectations.
///
/// Must be pure: same input, same output, no side quests. It is called once per document
/// during rebuild and in-place update copies.
pub trait DocumentMigrator: Send + Sync {
    fn migrate(&self, previous_source: Value) -> Result<Value>;
}

impl<F> DocumentMigrator for F
where
    F: Fn(Value) -> Result<Value> + Send + Sync,
{
    fn migrate(&self, previous_source: Value) -> Result<Value> {
        self(previous_source)
    }
}

/// 🪞 Apply an optional migrator. `None` means identity.
pub(crate) fn migrate_or_keep(
    migrator: Option<&dyn DocumentMigrator>,
    hit: Hit,
) -> Result<Value> {
    match migrator {
        Some(migrator) => migrator.migrate(hit.source).with_context(|| {
            format!(
                "💀 The document migrator choked on document '{}' from index '{}'.",
                hit.id, hit.index
            )
        }),
        None => Ok(hit.source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn the_one_where_a_search_hit_becomes_a_hit() -> Result<()> {
        let hit = Hit::from_search_hit(&json!({
            "_index": "courses__a",
            "_id": "42",
            "_source": {"title": "Rust for the impatient"}
        }))?;
        assert_eq!(hit.index, "courses__a");
        assert_eq!(hit.id, "42");
        assert_eq!(hit.source["title"], "Rust for the impatient");
        Ok(())
    }

    #[test]
    fn the_one_where_a_nameless_hit_is_turned_away() {
        assert!(Hit::from_search_hit(&json!({"_source": {}})).is_err());
    }

    #[test]
    fn the_one_where_no_migrator_means_identity() -> Result<()> {
        let hit = Hit {
            index: "a".into(),
            id: "1".into(),
            source: json!({"v": 1}),
        };
        assert_eq!(migrate_or_keep(None, hit)?, json!({"v": 1}));
        Ok(())
    }

    #[test]
    fn the_one_where_closures_are_migrators_too() -> Result<()> {
        let bump = |mut source: Value| -> Result<Value> {
            source["v"] = json!(source["v"].as_i64().unwrap_or_default() + 1);
            Ok(source)
        };
        let hit = Hit {
            index: "a".into(),
            id: "1".into(),
            source: json!({"v": 1}),
        };
        assert_eq!(migrate_or_keep(Some(&bump), hit)?, json!({"v": 2}));
        Ok(())
    }
}
