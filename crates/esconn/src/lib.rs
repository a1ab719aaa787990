//! 🔀 esconn -- an Elasticsearch connector with opinions about downtime (against).
//!
//! 🎬 *[narrator voice]* "The mapping had to change. The readers could not know."
//!
//! What lives here:
//! - [`Connector`]: names, batched writes, reads, and every index/pipeline lifecycle verb.
//! - [`rebuild`]: the alias swap that rebuilds an index while searches keep working.
//! - [`engine`]: the cluster behind a trait, over HTTP or fully in memory.
//! - [`app_config`]: figment-powered config and the one-call connector builder.
//!
//! 🦆 The duck approved this crate. The duck approves everything. The duck has no standards.

pub mod app_config;
pub mod connector;
pub mod documents;
pub mod engine;
pub mod error;
pub mod managers;
pub mod naming;
pub(crate) mod progress;
pub(crate) mod queue;
pub mod rebuild;
pub mod response;
pub mod scroll;

pub use app_config::{AppConfig, build_connector, load_config};
pub use connector::{Connector, ConnectorBuilder, ConnectorConfig, IndexLayout, IndexStatus};
pub use documents::{DocumentMigrator, Hit};
pub use engine::{
    ConnectionFactory, DsnConnectionFactory, Engine, EngineBackend, InMemoryConnectionFactory,
    InMemoryEngine,
};
pub use error::ConnectorError;
pub use managers::{
    EngineContext, IndexManager, PipelineManager, StaticIndexManager, StaticPipelineManager,
};
pub use naming::{NameProvider, NameProviderConfig};
pub use rebuild::RebuildReport;
pub use response::{ResponseHandler, TracingResponseHandler};
