//! 🔧 App Configuration -- TOML and env vars in, a ready-to-go [`Connector`] out.
//!
//! 📡 "It works on my machine." "Which config did your machine load?" "...yes." 🦆
//!
//! 🧠 Knowledge graph:
//! - env vars prefixed `ESCONN_`, nested keys split on `__`
//!   (`ESCONN_ENGINE__URL=http://es:9200` -> `engine.url`).
//! - an optional TOML file merged on top. TOML wins on conflicts.
//! - every section has defaults, so an empty config is a valid config
//!   (localhost, raw names, nothing registered).
//! - `indices` / `pipelines` map internal names to JSON definition files, which become
//!   [`StaticIndexManager`] / [`StaticPipelineManager`] registrations.
//!
//! ```toml
//! [engine]
//! url = "https://es.internal:9200"
//! api_key = "base64-goes-here"
//!
//! [connector]
//! bulk_size = 200
//!
//! [naming.index.Prefixed]
//! prefix = "prod_"
//!
//! [indices.courses]
//! definition_file = "mappings/courses.json"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::connector::{Connector, ConnectorConfig};
use crate::engine::{DsnConnectionFactory, EngineConfig};
use crate::managers::{StaticIndexManager, StaticPipelineManager};
use crate::naming::NameProviderConfig;
use crate::response::TracingResponseHandler;

/// 📦 Everything the CLI (or any embedding app) needs to stand a connector up.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub connector: ConnectorConfig,
    #[serde(default)]
    pub naming: NamingConfig,
    /// 📐 internal index name -> where its definition lives
    #[serde(default)]
    pub indices: BTreeMap<String, DefinitionSource>,
    /// 🚰 internal pipeline name -> where its definition lives
    #[serde(default)]
    pub pipelines: BTreeMap<String, DefinitionSource>,
}

/// 🏷️ One naming strategy for indices, one for pipelines.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct NamingConfig {
    #[serde(default)]
    pub index: NameProviderConfig,
    #[serde(default)]
    pub pipeline: NameProviderConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DefinitionSource {
    /// 📁 A JSON file holding the full create-index (or put-pipeline) body.
    pub definition_file: PathBuf,
}

/// 🚀 Load the config from `ESCONN_*` env vars, plus the TOML file when one is given.
///
/// 💀 Errors carry which sources were consulted, so "what did it actually read?" has an answer.
pub fn load_config(config_file_name: Option<&Path>) -> Result<AppConfig> {
    info!("🔧 Loading configuration: {:?}", config_file_name);

    let config = Figment::new().merge(Env::prefixed("ESCONN_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (ESCONN_*).",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (ESCONN_*). \
                 No file was provided, so this one is all on the environment."
            .to_string(),
    };

    config.extract().context(context_msg)
}

/// 🏗️ Turn an [`AppConfig`] into a connector: HTTP engine, configured naming, static
/// managers read from their definition files, responses logged through tracing.
pub fn build_connector(config: &AppConfig) -> Result<Connector> {
    let mut builder = Connector::builder(DsnConnectionFactory::new(config.engine.clone()))
        .index_name_provider(config.naming.index.build())
        .pipeline_name_provider(config.naming.pipeline.build())
        .response_handler(TracingResponseHandler)
        .config(config.connector.clone());

    for (internal_name, source) in &config.indices {
        let manager = StaticIndexManager::from_file(&source.definition_file)
            .with_context(|| format!("💀 Index '{internal_name}' has an unusable definition."))?;
        builder = builder.index_manager(internal_name.clone(), manager);
    }
    for (internal_name, source) in &config.pipelines {
        let manager = StaticPipelineManager::from_file(&source.definition_file)
            .with_context(|| format!("💀 Pipeline '{internal_name}' has an unusable definition."))?;
        builder = builder.pipeline_manager(internal_name.clone(), manager);
    }

    info!(
        indices = config.indices.len(),
        pipelines = config.pipelines.len(),
        "🔌 connector configured"
    );
    Ok(builder.build())
}
