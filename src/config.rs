use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use crate::error::ClosurePlanError;

/// Static configuration describing how a SeaORM closure-table entity is laid out.
#[derive(Clone, Debug)]
pub struct ClosurePathConfig {
    entity_name: String,
    table_name: String,
    advisory_lock_strategy: AdvisoryLockStrategy,
}

impl ClosurePathConfig {
    /// Create a new configuration using the logical entity name and its backing table.
    pub fn new(entity_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        let entity_name = entity_name.into();
        let table_name = table_name.into();

        let default_lock = AdvisoryLockStrategy::Namespaced(AdvisoryLockKey::derived_from(
            &entity_name,
            &table_name,
        ));

        Self {
            entity_name,
            table_name,
            advisory_lock_strategy: default_lock,
        }
    }

    /// Merge options produced by [`ClosurePathOptions`].
    pub(crate) fn apply_options(mut self, options: ClosurePathOptions) -> Self {
        if let Some(strategy) = options.advisory_lock_strategy {
            self.advisory_lock_strategy = strategy;
        }
        self
    }

    /// Human-readable Rust struct name for the closure entity.
    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    /// Table backing the closure entity.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Advisory lock strategy (PostgreSQL only).
    pub fn advisory_lock_strategy(&self) -> &AdvisoryLockStrategy {
        &self.advisory_lock_strategy
    }
}

/// Builder-style overrides applied on top of a derived [`ClosurePathConfig`].
#[derive(Clone, Debug, Default)]
pub struct ClosurePathOptions {
    advisory_lock_strategy: Option<AdvisoryLockStrategy>,
}

impl ClosurePathOptions {
    pub fn advisory_lock_strategy(mut self, strategy: AdvisoryLockStrategy) -> Self {
        self.advisory_lock_strategy = Some(strategy);
        self
    }

    pub fn apply(self, base: ClosurePathConfig) -> ClosurePathConfig {
        base.apply_options(self)
    }
}

/// What the reuse planner does with rows made obsolete by an edit.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowReuse {
    /// Rewrite obsolete rows in place before allocating new ones.
    #[default]
    Recycle,
    /// Delete every obsolete row and create every new one.
    Disabled,
}

const DEFAULT_MAX_RESOLUTION_PASSES: usize = 64;

/// Explicit configuration handed to a [`ClosurePlanner`](crate::planner::ClosurePlanner).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlannerConfig {
    max_resolution_passes: usize,
    row_reuse: RowReuse,
    skip_unchanged_rows: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_resolution_passes: DEFAULT_MAX_RESOLUTION_PASSES,
            row_reuse: RowReuse::default(),
            skip_unchanged_rows: true,
        }
    }
}

impl PlannerConfig {
    /// Pass cap for the ancestor fixed-point loop, never below one.
    ///
    /// Trees visited in resolver order converge in a single pass.
    pub fn resolution_pass_cap(&self) -> usize {
        self.max_resolution_passes.max(1)
    }

    pub fn max_resolution_passes(&self) -> usize {
        self.max_resolution_passes
    }

    pub fn row_reuse(&self) -> RowReuse {
        self.row_reuse
    }

    /// Whether reused rows whose triple does not change are left out of the update batch.
    pub fn skip_unchanged_rows(&self) -> bool {
        self.skip_unchanged_rows
    }
}

/// Builder for [`PlannerConfig`]; also the shape accepted from JSON.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlannerOptions {
    max_resolution_passes: Option<usize>,
    row_reuse: Option<RowReuse>,
    skip_unchanged_rows: Option<bool>,
}

impl PlannerOptions {
    pub fn max_resolution_passes(mut self, passes: usize) -> Self {
        self.max_resolution_passes = Some(passes);
        self
    }

    pub fn row_reuse(mut self, reuse: RowReuse) -> Self {
        self.row_reuse = Some(reuse);
        self
    }

    pub fn skip_unchanged_rows(mut self, skip: bool) -> Self {
        self.skip_unchanged_rows = Some(skip);
        self
    }

    /// Parse options from a JSON document such as `{"row_reuse": "disabled"}`.
    pub fn from_json(raw: &str) -> Result<Self, ClosurePlanError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn apply(self, mut base: PlannerConfig) -> PlannerConfig {
        if let Some(passes) = self.max_resolution_passes {
            base.max_resolution_passes = passes;
        }
        if let Some(reuse) = self.row_reuse {
            base.row_reuse = reuse;
        }
        if let Some(skip) = self.skip_unchanged_rows {
            base.skip_unchanged_rows = skip;
        }
        base
    }

    pub fn build(self) -> PlannerConfig {
        self.apply(PlannerConfig::default())
    }
}

/// Key used for PostgreSQL advisory locks.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct AdvisoryLockKey(String);

impl AdvisoryLockKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    fn derived_from(entity: &str, table: &str) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(entity.as_bytes());
        hasher.update(b"/");
        hasher.update(table.as_bytes());
        let crc = hasher.finalize();
        Self(format!("closure-planner::{entity}::{table}::{crc:x}"))
    }
}

/// Configuration describing how to acquire advisory locks.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AdvisoryLockStrategy {
    Disabled,
    Namespaced(AdvisoryLockKey),
}

impl AdvisoryLockStrategy {
    pub fn key(&self) -> Option<&AdvisoryLockKey> {
        match self {
            AdvisoryLockStrategy::Disabled => None,
            AdvisoryLockStrategy::Namespaced(key) => Some(key),
        }
    }
}
