//! Maps obsolete closure rows onto the rows an edit batch needs.
//!
//! Every edit tree owns the rows `old_ancestors x new_descendants` before the edit and
//! `new_ancestors x new_descendants` after it. Rows whose pair survives stay where they
//! are. The others are rewritten positionally, then taken from a delete pool shared by
//! the whole batch, and only then created. The pool left at the end is the delete batch.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;
use tracing::{debug, instrument, trace};

use crate::config::{PlannerConfig, RowReuse};
use crate::edit_tree::{EditArena, EditTree};
use crate::error::ClosurePlanError;
use crate::store::{PathStore, StoreChangeSet};
use crate::types::{ChangeSet, NodeKey, PathRow};

/// Row bookkeeping of a single edit tree.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TreeRowStats<N> {
    pub node: N,
    /// `new_ancestors.len() * new_descendants.len()`.
    pub required: usize,
    /// Old rows whose `(ancestor, descendant)` pair survives.
    pub kept: usize,
    /// Old rows of this tree rewritten to a new pair.
    pub reused: usize,
    /// Rows taken from the delete pool.
    pub recycled: usize,
    /// Pairs left for the end of the batch.
    pub deferred: usize,
    /// Old rows handed to the delete pool.
    pub released: usize,
}

#[derive(Debug)]
pub struct RowReusePlanner<N: NodeKey, R: NodeKey> {
    reuse: RowReuse,
    skip_unchanged: bool,
    delete_pool: VecDeque<PathRow<N, R>>,
    unfilled: Vec<PathRow<N, R>>,
    create: Vec<PathRow<N, R>>,
    update: Vec<PathRow<N, R>>,
    seen_rows: HashSet<R>,
}

impl<N: NodeKey, R: NodeKey> RowReusePlanner<N, R> {
    pub fn new(config: &PlannerConfig) -> Self {
        Self {
            reuse: config.row_reuse(),
            skip_unchanged: config.skip_unchanged_rows(),
            delete_pool: VecDeque::new(),
            unfilled: Vec::new(),
            create: Vec::new(),
            update: Vec::new(),
            seen_rows: HashSet::new(),
        }
    }

    /// Rows currently waiting in the delete pool.
    pub fn pool_len(&self) -> usize {
        self.delete_pool.len()
    }

    /// Plan one edit tree given its old rows (`old_ancestors x new_descendants`).
    pub fn plan_tree(
        &mut self,
        tree: &EditTree<N>,
        old_rows: Vec<PathRow<N, R>>,
    ) -> Result<TreeRowStats<N>, ClosurePlanError> {
        let q = tree.new_descendants.len();
        let ancestor_pos: HashMap<&N, usize> = tree
            .old_ancestors
            .iter()
            .enumerate()
            .map(|(pos, link)| (&link.node, pos))
            .collect();
        let descendant_pos: HashMap<&N, usize> = tree
            .new_descendants
            .iter()
            .enumerate()
            .map(|(pos, link)| (&link.node, pos))
            .collect();

        let mut stats = TreeRowStats {
            node: tree.node.clone(),
            required: tree.required_rows(),
            kept: 0,
            reused: 0,
            recycled: 0,
            deferred: 0,
            released: 0,
        };

        let mut by_pair: HashMap<(N, N), PathRow<N, R>> = HashMap::with_capacity(old_rows.len());
        for row in old_rows {
            let id = row.id.clone().ok_or_else(|| {
                ClosurePlanError::inconsistent("closure store returned a row without id")
            })?;
            if !ancestor_pos.contains_key(&row.ancestor) || !descendant_pos.contains_key(&row.descendant)
            {
                return Err(ClosurePlanError::inconsistent(format!(
                    "row {id:?} ({:?} -> {:?}) is outside edit tree {:?}",
                    row.ancestor, row.descendant, tree.node
                )));
            }
            if !self.seen_rows.insert(id.clone()) {
                return Err(ClosurePlanError::inconsistent(format!(
                    "row {id:?} claimed by more than one edit tree"
                )));
            }
            by_pair.insert((row.ancestor.clone(), row.descendant.clone()), row);
        }

        let wanted = tree.new_ancestors.iter().flat_map(|ancestor| {
            tree.new_descendants.iter().map(move |descendant| {
                PathRow::new(
                    ancestor.node.clone(),
                    descendant.node.clone(),
                    ancestor.depth + 1 + descendant.depth,
                )
            })
        });

        if self.reuse == RowReuse::Disabled {
            stats.released = by_pair.len();
            self.delete_pool.extend(by_pair.into_values());
            for row in wanted {
                self.create.push(row);
            }
            return Ok(stats);
        }

        let mut uncovered = Vec::new();
        for row in wanted {
            match by_pair.remove(&(row.ancestor.clone(), row.descendant.clone())) {
                Some(mut existing) => {
                    stats.kept += 1;
                    if !existing.same_triple(&row) {
                        existing.depth = row.depth;
                        self.update.push(existing);
                    } else if !self.skip_unchanged {
                        self.update.push(existing);
                    }
                }
                None => uncovered.push(row),
            }
        }

        let mut reusable: Vec<PathRow<N, R>> = by_pair.into_values().collect();
        reusable.sort_by_key(|row| {
            let anc = ancestor_pos.get(&row.ancestor).copied().unwrap_or(usize::MAX);
            let desc = descendant_pos.get(&row.descendant).copied().unwrap_or(usize::MAX);
            anc.saturating_mul(q).saturating_add(desc)
        });
        let mut reusable: VecDeque<PathRow<N, R>> = reusable.into();

        for row in uncovered {
            if let Some(slot) = reusable.pop_front() {
                stats.reused += 1;
                self.update.push(rewrite(slot, row));
            } else if let Some(slot) = self.delete_pool.pop_front() {
                stats.recycled += 1;
                self.update.push(rewrite(slot, row));
            } else {
                stats.deferred += 1;
                self.unfilled.push(row);
            }
        }

        stats.released = reusable.len();
        self.delete_pool.extend(reusable);
        Ok(stats)
    }

    /// Settle deferred pairs against the pool and emit the three batches.
    pub fn finish(mut self) -> Result<ChangeSet<N, R>, ClosurePlanError> {
        for row in std::mem::take(&mut self.unfilled) {
            match self.delete_pool.pop_front() {
                Some(slot) => self.update.push(rewrite(slot, row)),
                None => self.create.push(row),
            }
        }

        let changes = ChangeSet {
            create: self.create,
            update: self.update,
            delete: self.delete_pool.into_iter().collect(),
        };

        let mut written = HashSet::with_capacity(changes.update.len() + changes.delete.len());
        for row in changes.update.iter().chain(&changes.delete) {
            let id = row
                .id
                .as_ref()
                .ok_or_else(|| ClosurePlanError::inconsistent("reused row lost its id"))?;
            if !written.insert(id) {
                return Err(ClosurePlanError::inconsistent(format!(
                    "row {id:?} written twice in one batch"
                )));
            }
        }
        Ok(changes)
    }
}

fn rewrite<N, R>(mut slot: PathRow<N, R>, target: PathRow<N, R>) -> PathRow<N, R> {
    slot.ancestor = target.ancestor;
    slot.descendant = target.descendant;
    slot.depth = target.depth;
    slot
}

/// Run the reuse planner over every edit tree in resolved order.
#[instrument(level = "debug", skip_all, fields(trees = order.len()))]
pub async fn plan_rows<S: PathStore>(
    store: &S,
    arena: &EditArena<S::NodeId>,
    order: &[usize],
    config: &PlannerConfig,
) -> Result<(StoreChangeSet<S>, Vec<TreeRowStats<S::NodeId>>), ClosurePlanError> {
    let mut planner = RowReusePlanner::new(config);
    let mut stats = Vec::with_capacity(order.len());

    for &idx in order {
        let tree = arena.tree_at(idx);
        let ancestors: Vec<S::NodeId> = tree.old_ancestors.iter().map(|l| l.node.clone()).collect();
        let descendants: Vec<S::NodeId> =
            tree.new_descendants.iter().map(|l| l.node.clone()).collect();
        let old_rows = if ancestors.is_empty() || descendants.is_empty() {
            Vec::new()
        } else {
            store.scan_rows_between(&ancestors, &descendants).await?
        };

        let tree_stats = planner.plan_tree(tree, old_rows)?;
        trace!(
            node = ?tree.node,
            required = tree_stats.required,
            kept = tree_stats.kept,
            reused = tree_stats.reused,
            recycled = tree_stats.recycled,
            deferred = tree_stats.deferred,
            released = tree_stats.released,
            pool = planner.pool_len(),
            "planned edit tree rows"
        );
        stats.push(tree_stats);
    }

    let changes = planner.finish()?;
    debug!(
        create = changes.create.len(),
        update = changes.update.len(),
        delete = changes.delete.len(),
        "closure change set planned"
    );
    Ok((changes, stats))
}
