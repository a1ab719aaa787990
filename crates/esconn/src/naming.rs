//! 🏷️ Naming -- the passport office between "what the app calls it" and "what the cluster calls it".
//!
//! Application code talks in internal names (`courses`). The cluster stores external names
//! (`prod_courses_v2`, or whatever the ops team decided at 4pm on a Friday). A
//! [`NameProvider`] turns one into the other and back. No state, no I/O, just string surgery.
//!
//! 🧠 Knowledge graph:
//! - `RawNameProvider`: identity. The "we don't do that here" strategy.
//! - `PrefixedNameProvider` / `SuffixedNameProvider`: glue on / peel off a fixed string.
//! - `ChainedNameProvider`: compose several. External applies links in order, internal
//!   undoes them in reverse, so the pair stays a consistent inverse.
//! - `NameProviderConfig`: the serde face of all of the above, for TOML.
//!
//! Stripping is tolerant: a name that does not carry the expected prefix/suffix comes back
//! unchanged instead of being mangled.

use serde::Deserialize;

/// 🏷️ Bidirectional internal <-> external name mapping.
pub trait NameProvider: Send + Sync + std::fmt::Debug {
    /// 📤 internal -> external
    fn provide_external_name(&self, internal_name: &str) -> String;
    /// 📥 external -> internal
    fn provide_internal_name(&self, external_name: &str) -> String;
}

/// 🪞 Identity mapping. What goes in comes out.
#[derive(Debug, Default, Clone)]
pub struct RawNameProvider;

impl NameProvider for RawNameProvider {
    fn provide_external_name(&self, internal_name: &str) -> String {
        internal_name.to_string()
    }

    fn provide_internal_name(&self, external_name: &str) -> String {
        external_name.to_string()
    }
}

/// 🔤 `courses` <-> `<prefix>courses`
#[derive(Debug, Clone)]
pub struct PrefixedNameProvider {
    prefix: String,
}

impl PrefixedNameProvider {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl NameProvider for PrefixedNameProvider {
    fn provide_external_name(&self, internal_name: &str) -> String {
        format!("{}{}", self.prefix, internal_name)
    }

    fn provide_internal_name(&self, external_name: &str) -> String {
        external_name
            .strip_prefix(self.prefix.as_str())
            .unwrap_or(external_name)
            .to_string()
    }
}

/// 🔡 `courses` <-> `courses<suffix>`
#[derive(Debug, Clone)]
pub struct SuffixedNameProvider {
    suffix: String,
}

impl SuffixedNameProvider {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }
}

impl NameProvider for SuffixedNameProvider {
    fn provide_external_name(&self, internal_name: &str) -> String {
        format!("{}{}", internal_name, self.suffix)
    }

    fn provide_internal_name(&self, external_name: &str) -> String {
        external_name
            .strip_suffix(self.suffix.as_str())
            .unwrap_or(external_name)
            .to_string()
    }
}

/// ⛓️ A conga line of providers.
///
/// `provide_external_name` runs the chain front to back. `provide_internal_name` runs it
/// back to front and asks each link for its *inverse*, because unwrapping a present in
/// the same order you wrapped it is how you end up with tape in your hair.
#[derive(Debug, Default)]
pub struct ChainedNameProvider {
    chain: Vec<Box<dyn NameProvider>>,
}

impl ChainedNameProvider {
    pub fn new(chain: Vec<Box<dyn NameProvider>>) -> Self {
        Self { chain }
    }
}

impl NameProvider for ChainedNameProvider {
    fn provide_external_name(&self, internal_name: &str) -> String {
        self.chain
            .iter()
            .fold(internal_name.to_string(), |name, link| {
                link.provide_external_name(&name)
            })
    }

    fn provide_internal_name(&self, external_name: &str) -> String {
        self.chain
            .iter()
            .rev()
            .fold(external_name.to_string(), |name, link| {
                link.provide_internal_name(&name)
            })
    }
}

/// 📋 Naming strategy as it appears in config.
///
/// ```toml
/// [naming]
/// index = { Chained = [{ Prefixed = { prefix = "prod_" } }, { Suffixed = { suffix = "_v2" } }] }
/// ```
/// or, less dramatically:
/// ```toml
/// [naming.index.Prefixed]
/// prefix = "prod_"
/// ```
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub enum NameProviderConfig {
    #[default]
    Raw,
    Prefixed {
        prefix: String,
    },
    Suffixed {
        suffix: String,
    },
    Chained(Vec<NameProviderConfig>),
}

impl NameProviderConfig {
    /// 🏗️ Turn the config into a living, breathing provider.
    pub fn build(&self) -> Box<dyn NameProvider> {
        match self {
            NameProviderConfig::Raw => Box::new(RawNameProvider),
            NameProviderConfig::Prefixed { prefix } => {
                Box::new(PrefixedNameProvider::new(prefix.clone()))
            }
            NameProviderConfig::Suffixed { suffix } => {
                Box::new(SuffixedNameProvider::new(suffix.clone()))
            }
            NameProviderConfig::Chained(links) => Box::new(ChainedNameProvider::new(
                links.iter().map(NameProviderConfig::build).collect(),
            )),
        }
    }
}
