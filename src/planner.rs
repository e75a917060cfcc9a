//! Entry points tying the planning stages together.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::config::PlannerConfig;
use crate::cycle::check_cross_tree;
use crate::edit_tree::build_edit_arena;
use crate::error::ClosurePlanError;
use crate::insertion::{order_insertions, InsertionPlan};
use crate::recompute::recompute;
use crate::resolver::resolve_order;
use crate::reuse::{plan_rows, TreeRowStats};
use crate::store::{PathStore, StoreChangeSet};
use crate::types::{ChangeSet, EditRequest, ParentLookup};

/// Row batches and persist order for an EDIT batch.
#[derive(Clone, Debug, Serialize)]
pub struct UpdatePlan<N, R> {
    /// Rows to write: delete, then update, then create.
    pub changes: ChangeSet<N, R>,
    /// Nodes in the order their own records should be saved.
    pub order: Vec<N>,
    pub trees: Vec<TreeRowStats<N>>,
}

impl<N, R> UpdatePlan<N, R> {
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Plans closure-table writes against a [`PathStore`].
#[derive(Debug)]
pub struct ClosurePlanner<S> {
    store: S,
    config: PlannerConfig,
}

impl<S: PathStore> ClosurePlanner<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, PlannerConfig::default())
    }

    pub fn with_config(store: S, config: PlannerConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Order a CREATE batch so positional parents are persisted before their children.
    #[instrument(level = "debug", skip_all, fields(requests = requests.len()))]
    pub fn plan_insertion(
        &self,
        requests: &[EditRequest<S::NodeId>],
    ) -> Result<InsertionPlan<S::NodeId>, ClosurePlanError> {
        let plan = order_insertions(requests)?;
        debug!(steps = plan.len(), "insertion order planned");
        Ok(plan)
    }

    /// Plan the closure rows for re-parenting existing nodes.
    ///
    /// Nothing is written; run [`PathStore::apply`] on the returned change set inside the
    /// same transaction the plan was read in.
    #[instrument(level = "debug", skip_all, fields(requests = requests.len()))]
    pub async fn plan_update(
        &self,
        requests: &[EditRequest<S::NodeId>],
    ) -> Result<UpdatePlan<S::NodeId, S::RowId>, ClosurePlanError> {
        let mut arena = build_edit_arena(&self.store, requests).await?;
        let mut order: Vec<S::NodeId> = arena.unchanged().to_vec();

        if arena.is_empty() {
            debug!(unchanged = order.len(), "no parent changes in batch");
            return Ok(UpdatePlan {
                changes: StoreChangeSet::<S>::default(),
                order,
                trees: Vec::new(),
            });
        }

        check_cross_tree(&arena)?;
        let resolved = resolve_order(&self.store, &mut arena).await?;
        recompute(&self.store, &mut arena, &resolved, &self.config).await?;
        let (changes, trees) = plan_rows(&self.store, &arena, &resolved, &self.config).await?;

        order.extend(resolved.iter().map(|idx| arena.tree_at(*idx).node.clone()));
        info!(
            edit_trees = arena.len(),
            unchanged = arena.unchanged().len(),
            create = changes.create.len(),
            update = changes.update.len(),
            delete = changes.delete.len(),
            "closure update planned"
        );
        Ok(UpdatePlan {
            changes,
            order,
            trees,
        })
    }

    /// Current parent of each node; `None` for roots.
    pub async fn current_parents(
        &self,
        nodes: &[S::NodeId],
    ) -> Result<HashMap<S::NodeId, Option<S::NodeId>>, ClosurePlanError> {
        let lookups = self.store.scan_parents(nodes).await?;
        let mut parents = HashMap::with_capacity(lookups.len());
        for (node, lookup) in lookups {
            match lookup {
                ParentLookup::Unknown => return Err(ClosurePlanError::unknown_node(&node)),
                ParentLookup::Root => {
                    parents.insert(node, None);
                }
                ParentLookup::Parent(parent) => {
                    parents.insert(node, Some(parent));
                }
            }
        }
        Ok(parents)
    }
}
