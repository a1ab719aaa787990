//! 🔀 Rebuild -- zero-downtime index rebuilds by alternating two physical indices behind an alias.
//!
//! 🎬 COLD OPEN -- INT. PRODUCTION CLUSTER -- TRAFFIC NEVER STOPS
//!
//! The application reads and writes `courses`. The cluster knows `courses` as an alias that
//! points at exactly one of `courses__a` / `courses__b`. A rebuild builds the *other* one,
//! copies everything across, then swaps the alias in one atomic `_aliases` call. Readers
//! never see a missing index.
//!
//! Starting states ([`AliasState`]):
//! - `AliasBound { current }`: the normal case. Next is `__b` when current ends in `__a`,
//!   `__a` otherwise. Always toggles, never reuses current.
//! - `PlainIndex`: the name is still a real index from before the alias scheme. Next is
//!   `__a`; at the end the plain index is deleted (a brief gap, once) and the alias added.
//! - `Fresh`: nothing by that name exists. Next is `__a`, nothing to copy, alias added.
//!
//! Resumable: if the next index already exists it is residue from an aborted run, and it is
//! deleted before anything else. A crash mid-copy leaves the alias on current and a partial
//! next; running the rebuild again cleans up and starts over.
//!
//! ⚠️ Documents written to current while the copy runs may not make it into next.
//! Pause writers or replay them after the swap.

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{info, warn};

use crate::documents::DocumentMigrator;
use crate::engine::{AliasAction, Engine, EngineBackend};
use crate::error::ConnectorError;
use crate::managers::{EngineContext, IndexManager};
use crate::response::{ResponseHandler, notify};
use crate::scroll::copy_documents;

pub const SLOT_A: &str = "__a";
pub const SLOT_B: &str = "__b";

/// 🧭 What the alias name currently is on the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasState {
    /// Nothing by that name exists yet.
    Fresh,
    /// A real index squats on the name.
    PlainIndex,
    /// The name is an alias with exactly one target.
    AliasBound { current: String },
}

/// 🗺️ Where a rebuild starts and where it is headed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildPlan {
    pub alias: String,
    pub state: AliasState,
    pub next: String,
}

impl RebuildPlan {
    /// 📍 The physical index documents are copied from, if there is one.
    pub fn source(&self) -> Option<&str> {
        match &self.state {
            AliasState::Fresh => None,
            AliasState::PlainIndex => Some(&self.alias),
            AliasState::AliasBound { current } => Some(current),
        }
    }
}

/// 📋 What a finished rebuild did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    pub alias: String,
    /// The physical index that served the alias before, now deleted.
    pub previous: Option<String>,
    /// The physical index the alias points at now.
    pub current: String,
    pub copied: u64,
}

/// 🔁 `__a` -> `__b`, anything else -> `__a`.
pub fn next_slot_name(alias: &str, current: &str) -> String {
    if current.ends_with(SLOT_A) {
        format!("{alias}{SLOT_B}")
    } else {
        format!("{alias}{SLOT_A}")
    }
}

/// 🔀 Physical index names out of a get-alias response, sorted.
pub(crate) fn alias_targets(response: &Value) -> Vec<String> {
    let mut targets: Vec<String> = response
        .as_object()
        .map(|indices| indices.keys().cloned().collect())
        .unwrap_or_default();
    targets.sort();
    targets
}

/// 🧭 Look at the cluster and work out the starting state for `alias`.
///
/// An alias with zero or several targets is refused with
/// [`ConnectorError::AmbiguousAlias`].
pub async fn detect_alias_state(
    engine: &EngineBackend,
    alias: &str,
    response_handler: Option<&dyn ResponseHandler>,
) -> Result<AliasState> {
    if engine.alias_exists(alias).await? {
        let response = engine
            .get_alias(alias)
            .await
            .with_context(|| format!("💀 Could not resolve what alias '{alias}' points at."))?;
        notify(response_handler, "get_alias", &response);
        let targets = alias_targets(&response);
        return match targets.as_slice() {
            [current] => Ok(AliasState::AliasBound {
                current: current.clone(),
            }),
            _ => Err(ConnectorError::AmbiguousAlias {
                alias: alias.to_string(),
                targets,
            }
            .into()),
        };
    }
    if engine.index_exists(alias).await? {
        Ok(AliasState::PlainIndex)
    } else {
        Ok(AliasState::Fresh)
    }
}

/// 🗺️ Detect the state and pick the next physical name.
pub async fn plan_rebuild(
    engine: &EngineBackend,
    alias: &str,
    response_handler: Option<&dyn ResponseHandler>,
) -> Result<RebuildPlan> {
    let state = detect_alias_state(engine, alias, response_handler).await?;
    let next = match &state {
        AliasState::AliasBound { current } => next_slot_name(alias, current),
        AliasState::PlainIndex | AliasState::Fresh => format!("{alias}{SLOT_A}"),
    };
    Ok(RebuildPlan {
        alias: alias.to_string(),
        state,
        next,
    })
}

/// 🔀 Rebuild `alias` into its other slot and swap the alias over.
pub async fn rebuild_index(
    alias: &str,
    manager: &dyn IndexManager,
    migrator: Option<&dyn DocumentMigrator>,
    ctx: &EngineContext<'_>,
) -> Result<RebuildReport> {
    let engine = ctx.engine;
    let plan = plan_rebuild(engine, alias, ctx.response_handler).await?;
    info!(alias, state = ?plan.state, next = %plan.next, "🔀 rebuild starting");

    // -- 🧹 residue from an aborted run
    if engine.index_exists(&plan.next).await? {
        warn!(alias, stale = %plan.next, "🧹 removing leftover index from an earlier rebuild");
        let response = engine
            .delete_index(&plan.next)
            .await
            .with_context(|| format!("💀 Could not remove the stale rebuild target '{}'.", plan.next))?;
        notify(ctx.response_handler, "delete_index", &response);
    }

    manager.create_index(&plan.next, ctx).await?;

    let copied = match plan.source() {
        Some(source) => copy_documents(
            engine,
            source,
            &plan.next,
            migrator,
            ctx.scroll,
            ctx.response_handler,
        )
        .await
        .with_context(|| {
            format!(
                "💀 Rebuild of '{alias}' died while copying '{source}' into '{}'. The alias was not touched; run the rebuild again to start over.",
                plan.next
            )
        })?,
        None => 0,
    };

    match &plan.state {
        AliasState::AliasBound { current } => {
            let response = engine
                .update_aliases(&[
                    AliasAction::Remove {
                        index: current.clone(),
                        alias: alias.to_string(),
                    },
                    AliasAction::Add {
                        index: plan.next.clone(),
                        alias: alias.to_string(),
                    },
                ])
                .await
                .with_context(|| format!("💀 The alias swap '{alias}': '{current}' -> '{}' was refused.", plan.next))?;
            notify(ctx.response_handler, "update_aliases", &response);
            info!(alias, from = %current, to = %plan.next, "🔀 alias swapped");

            let response = engine.delete_index(current).await.with_context(|| {
                format!("💀 The alias moved, but the old index '{current}' could not be deleted.")
            })?;
            notify(ctx.response_handler, "delete_index", &response);
        }
        AliasState::PlainIndex => {
            // -- the one moment the name serves nothing
            let response = engine.delete_index(alias).await.with_context(|| {
                format!("💀 Could not delete the plain index '{alias}' to make room for the alias.")
            })?;
            notify(ctx.response_handler, "delete_index", &response);
            add_alias(engine, alias, &plan.next, ctx.response_handler).await?;
        }
        AliasState::Fresh => {
            add_alias(engine, alias, &plan.next, ctx.response_handler).await?;
        }
    }

    info!(alias, current = %plan.next, copied, "✅ rebuild finished");
    Ok(RebuildReport {
        alias: alias.to_string(),
        previous: plan.source().map(str::to_string),
        current: plan.next.clone(),
        copied,
    })
}

async fn add_alias(
    engine: &EngineBackend,
    alias: &str,
    index: &str,
    response_handler: Option<&dyn ResponseHandler>,
) -> Result<()> {
    let response = engine
        .update_aliases(&[AliasAction::Add {
            index: index.to_string(),
            alias: alias.to_string(),
        }])
        .await
        .with_context(|| format!("💀 Could not point alias '{alias}' at '{index}'."))?;
    notify(response_handler, "update_aliases", &response);
    info!(alias, index, "🔀 alias added");
    Ok(())
}
