//! Tool profile registry.
//!
//! The teacher's `model_catalog` is a process-wide `OnceCell` singleton
//! (`init_global_catalog`/`get_global_catalog`) that every call site reaches
//! for ambiently. Spec §9 flags that shape as wrong here: "wire it into
//! every Proposer/Verifier explicitly rather than relying on ambient
//! lookup." `Registry` keeps the teacher's read-mostly, serialize-writes
//! access pattern but as an owned, `Clone`-able value callers construct once
//! and pass around, instead of a `static`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::Result;
use crate::store::ProposalStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum Criticality {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolProfile {
    pub tool_name: String,
    pub criticality: Criticality,
    pub irreversible: bool,
    pub regulatory: bool,
    pub risk_tier: String,
    /// Per-tool override of the policy engine's token-required flag for the
    /// MEDIUM/ALLOW path. Spec §9 leaves this as an implementer's choice
    /// ("should make `token_required` a per-tool override rather than a
    /// global switch"); the fixed policy table never sets it for anything
    /// but HIGH/ALLOW, so this stays `false` unless a caller opts a specific
    /// tool in.
    pub require_token_on_medium_allow: bool,
}

impl ToolProfile {
    pub fn new(tool_name: impl Into<String>, criticality: Criticality) -> Self {
        ToolProfile {
            tool_name: tool_name.into(),
            criticality,
            irreversible: false,
            regulatory: false,
            risk_tier: "default".to_string(),
            require_token_on_medium_allow: false,
        }
    }

    /// The profile assumed for a tool name the registry has never seen.
    /// Spec §4.6 step 1: "unknown tools default to MEDIUM criticality."
    pub fn unknown(tool_name: impl Into<String>) -> Self {
        ToolProfile::new(tool_name, Criticality::Medium)
    }
}

/// Process-wide tool profile state, explicitly constructed and passed into
/// `Proposer`/`Verifier` rather than looked up through a global.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    profiles: Arc<RwLock<HashMap<String, ToolProfile>>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            profiles: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Idempotent replace: registering a tool twice simply overwrites the
    /// stored profile with the newest one.
    pub fn register(&self, profile: ToolProfile) {
        let mut profiles = self.profiles.write().expect("registry lock poisoned");
        profiles.insert(profile.tool_name.clone(), profile);
    }

    pub fn get(&self, tool_name: &str) -> Option<ToolProfile> {
        let profiles = self.profiles.read().expect("registry lock poisoned");
        profiles.get(tool_name).cloned()
    }

    /// Resolves a profile for `tool_name`, falling back to
    /// `ToolProfile::unknown` per spec §4.6 step 1.
    pub fn resolve(&self, tool_name: &str) -> ToolProfile {
        self.get(tool_name)
            .unwrap_or_else(|| ToolProfile::unknown(tool_name))
    }
}

/// Administrative wrapper around `ProposalStore::put_baseline`/
/// `get_baseline` (spec §3 `PromptBaseline`, §9 Open Question). The scorer's
/// own read path calls `ProposalStore::get_baseline` directly; this type
/// exists so call sites that are clearly administrative — migration
/// scripts, ops tooling resetting a tool's baseline after an intentional
/// prompt change — go through a named, explicitly-constructed surface
/// rather than reaching for the store trait's write method ambiently.
/// Mirrors `Registry`'s own posture: constructed once, passed to whatever
/// administrative call site needs it, never looked up through a global.
#[derive(Clone)]
pub struct BaselineAdmin {
    store: Arc<dyn ProposalStore>,
}

impl BaselineAdmin {
    pub fn new(store: Arc<dyn ProposalStore>) -> Self {
        BaselineAdmin { store }
    }

    /// Administrative write: (re)sets the baseline normalized-prompt hash
    /// for `tool_name`. Never called by `Proposer` or `Verifier`.
    pub fn set_baseline(&self, tool_name: &str, normalized_prompt_hash: &str) -> Result<()> {
        self.store.put_baseline(tool_name, normalized_prompt_hash)
    }

    /// Reads back the currently stored baseline, if any, for diagnostics or
    /// pre-flight checks before an administrative update.
    pub fn get_baseline(&self, tool_name: &str) -> Result<Option<String>> {
        self.store.get_baseline(tool_name)
    }
}
