//! Processing order of edit trees.
//!
//! A tree whose new parent sits on or below another pending tree has to wait until
//! that tree's new ancestors are known.

use std::collections::{HashMap, HashSet};

use tracing::{debug, instrument};

use crate::edit_tree::EditArena;
use crate::error::{ClosurePlanError, CyclePath};
use crate::store::PathStore;

/// Fill in every tree's `dependency` and return arena indices in a valid processing order.
#[instrument(level = "debug", skip_all, fields(trees = arena.len()))]
pub async fn resolve_order<S: PathStore>(
    store: &S,
    arena: &mut EditArena<S::NodeId>,
) -> Result<Vec<usize>, ClosurePlanError> {
    let ids = arena.nodes();
    let mut new_parents: Vec<S::NodeId> = Vec::new();
    let mut distinct = HashSet::new();
    for tree in arena.trees() {
        if let Some(parent) = &tree.new_parent {
            if distinct.insert(parent.clone()) {
                new_parents.push(parent.clone());
            }
        }
    }

    let rows = if new_parents.is_empty() {
        Vec::new()
    } else {
        store.scan_rows_between(&ids, &new_parents).await?
    };

    // pending trees each tree has to wait for
    let mut updates_after: HashMap<usize, HashSet<S::NodeId>> = HashMap::new();
    for idx in 0..arena.len() {
        let tree = arena.tree_at(idx);
        let Some(parent) = &tree.new_parent else {
            continue;
        };
        let nearest = rows
            .iter()
            .filter(|row| &row.descendant == parent && row.ancestor != tree.node)
            .min_by_key(|row| row.depth);
        if let Some(row) = nearest {
            let dependency = row.ancestor.clone();
            updates_after
                .entry(idx)
                .or_default()
                .insert(dependency.clone());
            arena.tree_mut(idx).dependency = Some(dependency);
        }
    }

    let mut sorted: Vec<usize> = Vec::with_capacity(arena.len());
    let mut sorted_nodes: HashSet<S::NodeId> = HashSet::with_capacity(arena.len());
    let mut unsorted: Vec<usize> = Vec::new();
    for idx in 0..arena.len() {
        if updates_after.get(&idx).map_or(true, HashSet::is_empty) {
            sorted.push(idx);
            sorted_nodes.insert(arena.tree_at(idx).node.clone());
        } else {
            unsorted.push(idx);
        }
    }

    while !unsorted.is_empty() {
        let mut progressed = false;
        let mut remaining = Vec::with_capacity(unsorted.len());
        for idx in unsorted {
            let pending = updates_after.entry(idx).or_default();
            pending.retain(|node| !sorted_nodes.contains(node));
            if pending.is_empty() {
                sorted.push(idx);
                sorted_nodes.insert(arena.tree_at(idx).node.clone());
                progressed = true;
            } else {
                remaining.push(idx);
            }
        }
        if !progressed {
            let stuck: Vec<S::NodeId> = remaining
                .iter()
                .map(|idx| arena.tree_at(*idx).node.clone())
                .collect();
            return Err(ClosurePlanError::DependencyCycle(CyclePath::from_nodes(&stuck)));
        }
        unsorted = remaining;
    }

    debug!(
        order = ?sorted.iter().map(|idx| &arena.tree_at(*idx).node).collect::<Vec<_>>(),
        dependencies = ?arena
            .trees()
            .iter()
            .map(|tree| (&tree.node, &tree.dependency))
            .collect::<Vec<_>>(),
        "resolved edit order"
    );
    Ok(sorted)
}
