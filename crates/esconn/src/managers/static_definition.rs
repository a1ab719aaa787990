//! 📜 Static definitions -- managers whose whole personality is one JSON document.
//!
//! Most indices don't need custom lifecycle logic, just a mapping. These two managers hold a
//! fixed definition, either handed over as a value or read from a `.json` file at startup.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

use super::{IndexManager, PipelineManager};

fn read_definition(kind: &str, path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path).with_context(|| {
        format!("💀 Could not read the {kind} definition at '{}'.", path.display())
    })?;
    serde_json::from_str(&raw).with_context(|| {
        format!("💀 The {kind} definition at '{}' is not valid JSON.", path.display())
    })
}

/// 🏗️ An [`IndexManager`] with a fixed definition.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticIndexManager {
    definition: Value,
}

impl StaticIndexManager {
    pub fn new(definition: Value) -> Self {
        Self { definition }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        read_definition("index", path.as_ref()).map(Self::new)
    }
}

impl IndexManager for StaticIndexManager {
    fn index_definition(&self) -> Value {
        self.definition.clone()
    }
}

/// 🚰 A [`PipelineManager`] with a fixed definition.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticPipelineManager {
    definition: Value,
}

impl StaticPipelineManager {
    pub fn new(definition: Value) -> Self {
        Self { definition }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        read_definition("pipeline", path.as_ref()).map(Self::new)
    }
}

impl PipelineManager for StaticPipelineManager {
    fn pipeline_definition(&self) -> Value {
        self.definition.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn the_one_where_a_definition_file_is_loaded() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(file, r#"{{"settings": {{"number_of_shards": 1}}}}"#)?;
        let manager = StaticIndexManager::from_file(file.path())?;
        assert_eq!(
            manager.index_definition(),
            json!({"settings": {"number_of_shards": 1}})
        );
        Ok(())
    }

    #[test]
    fn the_one_where_broken_json_is_reported_with_its_path() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(file, "{{ nope")?;
        let err = StaticPipelineManager::from_file(file.path()).expect_err("not json");
        assert!(format!("{err:#}").contains("not valid JSON"));
        Ok(())
    }
}
