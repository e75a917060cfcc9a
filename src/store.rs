//! Relational interface the planner reads the closure table through.
//!
//! The planner only issues point lookups and range scans over the ancestor,
//! descendant and depth columns; writes are three bulk calls that the caller runs
//! inside one transaction.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::ClosurePlanError;
use crate::types::{ChangeSet, Depth, NodeKey, ParentLookup, PathRow};

/// Row type of a given store.
pub type StoreRow<S> = PathRow<<S as PathStore>::NodeId, <S as PathStore>::RowId>;

/// Change set type of a given store.
pub type StoreChangeSet<S> = ChangeSet<<S as PathStore>::NodeId, <S as PathStore>::RowId>;

#[async_trait]
pub trait PathStore: Send + Sync {
    type NodeId: NodeKey;
    type RowId: NodeKey;

    /// Ancestors of `node` with `depth_min <= depth <= depth_max`, root-most first.
    async fn scan_ancestors(
        &self,
        node: &Self::NodeId,
        depth_min: Depth,
        depth_max: Depth,
    ) -> Result<Vec<(Self::NodeId, Depth)>, ClosurePlanError>;

    /// Rows whose descendant is one of `nodes` with `depth <= depth_max`, self rows included.
    async fn scan_ancestor_rows(
        &self,
        nodes: &[Self::NodeId],
        depth_max: Depth,
    ) -> Result<Vec<StoreRow<Self>>, ClosurePlanError>;

    /// Every row whose ancestor is one of `nodes`, self rows included.
    async fn scan_descendants(
        &self,
        nodes: &[Self::NodeId],
    ) -> Result<Vec<StoreRow<Self>>, ClosurePlanError>;

    /// Rows with `ancestor in ancestors and descendant in descendants`, ordered by row id.
    async fn scan_rows_between(
        &self,
        ancestors: &[Self::NodeId],
        descendants: &[Self::NodeId],
    ) -> Result<Vec<StoreRow<Self>>, ClosurePlanError>;

    async fn bulk_create(&self, rows: &[StoreRow<Self>]) -> Result<(), ClosurePlanError>;

    async fn bulk_update(&self, rows: &[StoreRow<Self>]) -> Result<(), ClosurePlanError>;

    async fn bulk_delete(&self, rows: &[StoreRow<Self>]) -> Result<(), ClosurePlanError>;

    /// Current parent of every node in `nodes`.
    async fn scan_parents(
        &self,
        nodes: &[Self::NodeId],
    ) -> Result<HashMap<Self::NodeId, ParentLookup<Self::NodeId>>, ClosurePlanError> {
        let mut parents: HashMap<Self::NodeId, ParentLookup<Self::NodeId>> = nodes
            .iter()
            .map(|node| (node.clone(), ParentLookup::Unknown))
            .collect();
        if nodes.is_empty() {
            return Ok(parents);
        }
        let mut rows = self.scan_ancestor_rows(nodes, 1).await?;
        // self rows first so a parent row always lands on a known node
        rows.sort_by_key(|row| row.depth);
        for row in rows {
            let Some(lookup) = parents.get_mut(&row.descendant) else {
                continue;
            };
            if row.depth == 0 && matches!(lookup, ParentLookup::Unknown) {
                *lookup = ParentLookup::Root;
            } else if row.depth == 1 && matches!(lookup, ParentLookup::Root) {
                *lookup = ParentLookup::Parent(row.ancestor);
            }
        }
        Ok(parents)
    }

    /// Write a change set. Deletes go first so freed `(ancestor, descendant)` pairs never
    /// collide with rows written afterwards.
    async fn apply(&self, changes: &StoreChangeSet<Self>) -> Result<(), ClosurePlanError> {
        if !changes.delete.is_empty() {
            self.bulk_delete(&changes.delete).await?;
        }
        if !changes.update.is_empty() {
            self.bulk_update(&changes.update).await?;
        }
        if !changes.create.is_empty() {
            self.bulk_create(&changes.create).await?;
        }
        Ok(())
    }
}
