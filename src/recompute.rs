//! Old/new ancestor chains and descendant sets of every edit tree.

use std::collections::{HashMap, HashSet};

use tracing::{debug, instrument};

use crate::config::PlannerConfig;
use crate::edit_tree::{ChainLink, EditArena};
use crate::error::{ClosurePlanError, CyclePath};
use crate::store::PathStore;
use crate::types::{Depth, NodeKey};

/// Populate ancestor and descendant fields of every tree in `arena`.
///
/// `order` must come from [`resolve_order`](crate::resolver::resolve_order).
#[instrument(level = "debug", skip_all, fields(trees = arena.len()))]
pub async fn recompute<S: PathStore>(
    store: &S,
    arena: &mut EditArena<S::NodeId>,
    order: &[usize],
    config: &PlannerConfig,
) -> Result<(), ClosurePlanError> {
    load_old_ancestors(store, arena).await?;
    resolve_new_ancestors(arena, order, config)?;
    renumber_new_ancestors(arena)?;
    load_descendants(store, arena).await?;

    for tree in arena.trees() {
        debug!(
            node = ?tree.node,
            dependency = ?tree.dependency,
            old_ancestors = ?tree.old_ancestors.iter().map(|link| &link.node).collect::<Vec<_>>(),
            new_ancestors = ?tree.new_ancestors.iter().map(|link| &link.node).collect::<Vec<_>>(),
            new_descendants = ?tree.new_descendants.iter().map(|link| &link.node).collect::<Vec<_>>(),
            moving = ?tree.moving_subtree_roots,
            moving_in = ?tree.moving_in_roots,
            moving_out = ?tree.moving_out_roots,
            "edit tree recomputed"
        );
    }
    Ok(())
}

async fn load_old_ancestors<S: PathStore>(
    store: &S,
    arena: &mut EditArena<S::NodeId>,
) -> Result<(), ClosurePlanError> {
    let mut chains: HashMap<S::NodeId, Vec<ChainLink<S::NodeId>>> = HashMap::new();
    for idx in 0..arena.len() {
        let Some(parent) = arena.tree_at(idx).old_parent.clone() else {
            continue;
        };
        if !chains.contains_key(&parent) {
            let chain = store
                .scan_ancestors(&parent, 0, Depth::MAX)
                .await?
                .into_iter()
                .map(|(node, depth)| ChainLink::new(node, depth))
                .collect();
            chains.insert(parent.clone(), chain);
        }
        arena.tree_mut(idx).old_ancestors = chains[&parent].clone();
    }
    Ok(())
}

/// Fixed-point propagation of new ancestor chains along dependencies.
fn resolve_new_ancestors<N: NodeKey>(
    arena: &mut EditArena<N>,
    order: &[usize],
    config: &PlannerConfig,
) -> Result<(), ClosurePlanError> {
    let mut unresolved = 0usize;
    for idx in 0..arena.len() {
        let tree = arena.tree_at(idx);
        if tree.dependency.is_some() {
            unresolved += 1;
            continue;
        }
        let chain = match &tree.new_parent {
            Some(parent) => arena
                .parent_chain(parent)
                .ok_or_else(|| ClosurePlanError::unknown_node(parent))?
                .to_vec(),
            None => Vec::new(),
        };
        let tree = arena.tree_mut(idx);
        tree.new_ancestors = chain;
        tree.ancestors_resolved = true;
    }

    let cap = config.resolution_pass_cap();
    let mut passes = 0usize;
    while unresolved > 0 {
        passes += 1;
        if passes > cap {
            return Err(ClosurePlanError::inconsistent(format!(
                "ancestor chains did not converge within {cap} passes"
            )));
        }

        let mut num_ancestors_added = 0usize;
        for &idx in order {
            let tree = arena.tree_at(idx);
            if tree.ancestors_resolved {
                continue;
            }
            let Some(dependency) = tree.dependency.as_ref() else {
                continue;
            };
            let dep_idx = arena.index_of(dependency).ok_or_else(|| {
                ClosurePlanError::inconsistent(format!(
                    "dependency {dependency:?} of {:?} is not an edit tree",
                    tree.node
                ))
            })?;
            let dep = arena.tree_at(dep_idx);
            if !dep.ancestors_resolved {
                continue;
            }
            let parent = tree.new_parent.as_ref().ok_or_else(|| {
                ClosurePlanError::inconsistent(format!("{:?} has a dependency but no parent", tree.node))
            })?;
            let existing = arena
                .parent_chain(parent)
                .ok_or_else(|| ClosurePlanError::unknown_node(parent))?;
            let from = existing
                .iter()
                .position(|link| &link.node == dependency)
                .ok_or_else(|| {
                    ClosurePlanError::inconsistent(format!(
                        "dependency {dependency:?} is not an ancestor of new parent {parent:?}"
                    ))
                })?;

            // the dependency's new chain, the dependency, then the existing rows below it
            let mut chain = dep.new_ancestors.clone();
            chain.extend(existing[from..].iter().cloned());

            num_ancestors_added += chain.len();
            let tree = arena.tree_mut(idx);
            tree.new_ancestors = chain;
            tree.ancestors_resolved = true;
            unresolved -= 1;
        }

        if num_ancestors_added == 0 && unresolved > 0 {
            return Err(ClosurePlanError::inconsistent(
                "ancestor chains stopped converging with edit trees left unresolved",
            ));
        }
    }
    Ok(())
}

fn renumber_new_ancestors<N: NodeKey>(arena: &mut EditArena<N>) -> Result<(), ClosurePlanError> {
    for idx in 0..arena.len() {
        let tree = arena.tree_mut(idx);
        let len = tree.new_ancestors.len();
        for (position, link) in tree.new_ancestors.iter_mut().enumerate() {
            link.depth = Depth::try_from(len - position - 1).map_err(|_| {
                ClosurePlanError::inconsistent(format!(
                    "ancestor chain of {:?} is too deep ({len} links)",
                    tree.node
                ))
            })?;
        }
        if tree.new_ancestors.iter().any(|link| link.node == tree.node) {
            let mut path: Vec<N> = tree.new_ancestors.iter().map(|link| link.node.clone()).collect();
            path.push(tree.node.clone());
            return Err(ClosurePlanError::CycleDetected(CyclePath::from_nodes(&path)));
        }
    }
    Ok(())
}

async fn load_descendants<S: PathStore>(
    store: &S,
    arena: &mut EditArena<S::NodeId>,
) -> Result<(), ClosurePlanError> {
    let ids = arena.nodes();
    let rows = store.scan_descendants(&ids).await?;

    let mut subtrees: HashMap<S::NodeId, Vec<ChainLink<S::NodeId>>> = HashMap::new();
    for row in rows {
        subtrees
            .entry(row.ancestor)
            .or_default()
            .push(ChainLink::new(row.descendant, row.depth));
    }
    for links in subtrees.values_mut() {
        links.sort_by_key(|link| link.depth);
    }

    for idx in 0..arena.len() {
        let node = arena.tree_at(idx).node.clone();
        let old_descendants = subtrees.get(&node).cloned().unwrap_or_default();
        if !old_descendants
            .first()
            .is_some_and(|link| link.depth == 0 && link.node == node)
        {
            return Err(ClosurePlanError::inconsistent(format!(
                "edit tree {node:?} has no self row among its descendants"
            )));
        }
        let moving: Vec<S::NodeId> = old_descendants
            .iter()
            .filter(|link| link.depth > 0 && arena.contains(&link.node))
            .map(|link| link.node.clone())
            .collect();
        let tree = arena.tree_mut(idx);
        tree.old_descendants = old_descendants;
        tree.moving_subtree_roots = moving;
    }

    for idx in 0..arena.len() {
        let tree = arena.tree_at(idx);
        let node = tree.node.clone();
        let dep_idx = tree.dependency.as_ref().and_then(|dep| arena.index_of(dep));
        if let Some(dep_idx) = dep_idx {
            arena.tree_mut(dep_idx).moving_in_roots.push(node);
        }
    }

    for idx in 0..arena.len() {
        let tree = arena.tree_at(idx);
        let moving_out: Vec<S::NodeId> = tree
            .moving_subtree_roots
            .iter()
            .filter(|root| {
                arena.get(root).is_some_and(|other| {
                    !other.new_ancestors.iter().any(|link| link.node == tree.node)
                })
            })
            .cloned()
            .collect();

        // segment owned by this tree: old subtree minus nested edit trees
        let mut excluded: HashSet<&S::NodeId> = HashSet::new();
        for root in &tree.moving_subtree_roots {
            if let Some(links) = subtrees.get(root) {
                excluded.extend(links.iter().map(|link| &link.node));
            }
        }
        let new_descendants: Vec<ChainLink<S::NodeId>> = tree
            .old_descendants
            .iter()
            .filter(|link| !excluded.contains(&link.node))
            .cloned()
            .collect();

        let tree = arena.tree_mut(idx);
        tree.moving_out_roots = moving_out;
        tree.new_descendants = new_descendants;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlannerOptions;
    use crate::edit_tree::EditTree;

    type Arena = EditArena<&'static str>;

    fn moved(
        node: &'static str,
        parent: &'static str,
        dependency: Option<&'static str>,
    ) -> EditTree<&'static str> {
        let mut tree = EditTree::new(node, None, Some(parent));
        tree.dependency = dependency;
        tree
    }

    fn root_chain(node: &'static str) -> Vec<ChainLink<&'static str>> {
        vec![ChainLink::new(node, 0)]
    }

    fn capped(passes: usize) -> PlannerConfig {
        PlannerOptions::default().max_resolution_passes(passes).build()
    }

    fn assert_inconsistent(result: Result<(), ClosurePlanError>, needle: &str) {
        match result {
            Err(ClosurePlanError::InconsistentState(detail)) => {
                assert!(detail.contains(needle), "{detail}")
            }
            other => panic!("expected InconsistentState, got {other:?}"),
        }
    }

    /// `a` and `b` wait on each other; no pass can make progress.
    fn mutually_dependent() -> Arena {
        let mut arena = Arena::default();
        arena.push(moved("a", "b1", Some("b")));
        arena.push(moved("b", "a1", Some("a")));
        arena
    }

    /// r <- a <- b <- c, every link a pending edit.
    fn chain_of_edits() -> Arena {
        let mut arena = Arena::default();
        arena.push(moved("a", "r", None));
        arena.push(moved("b", "a", Some("a")));
        arena.push(moved("c", "b", Some("b")));
        for node in ["r", "a", "b"] {
            arena.set_parent_chain(node, root_chain(node));
        }
        arena
    }

    fn chain_nodes(arena: &Arena, idx: usize) -> Vec<&'static str> {
        arena.tree_at(idx).new_ancestors.iter().map(|link| link.node).collect()
    }

    #[test]
    fn circular_dependencies_stop_converging() {
        let mut arena = mutually_dependent();
        assert_inconsistent(
            resolve_new_ancestors(&mut arena, &[0, 1], &PlannerConfig::default()),
            "stopped converging",
        );

        let mut arena = mutually_dependent();
        assert_inconsistent(
            resolve_new_ancestors(&mut arena, &[1, 0], &capped(1)),
            "stopped converging",
        );
        assert!(arena.trees().iter().all(|tree| !tree.ancestors_resolved));
    }

    #[test]
    fn pass_cap_bounds_the_fixed_point() {
        // reverse order resolves one link per pass
        let mut arena = chain_of_edits();
        assert_inconsistent(
            resolve_new_ancestors(&mut arena, &[2, 1, 0], &capped(1)),
            "within 1 passes",
        );
        assert!(arena.tree_at(1).ancestors_resolved);
        assert!(!arena.tree_at(2).ancestors_resolved);

        let mut arena = chain_of_edits();
        resolve_new_ancestors(&mut arena, &[2, 1, 0], &capped(2)).unwrap();
        assert_eq!(chain_nodes(&arena, 2), vec!["r", "a", "b"]);
    }

    #[test]
    fn resolver_order_converges_in_one_pass() {
        let mut arena = chain_of_edits();
        resolve_new_ancestors(&mut arena, &[0, 1, 2], &capped(1)).unwrap();
        renumber_new_ancestors(&mut arena).unwrap();

        assert_eq!(chain_nodes(&arena, 0), vec!["r"]);
        assert_eq!(chain_nodes(&arena, 1), vec!["r", "a"]);
        let depths: Vec<Depth> = arena
            .tree_at(2)
            .new_ancestors
            .iter()
            .map(|link| link.depth)
            .collect();
        assert_eq!(depths, vec![2, 1, 0]);
    }

    #[test]
    fn node_inside_its_own_new_chain_is_a_cycle() {
        let mut arena = Arena::default();
        arena.push(moved("a", "x", None));
        arena.set_parent_chain("x", vec![ChainLink::new("a", 1), ChainLink::new("x", 0)]);

        resolve_new_ancestors(&mut arena, &[0], &PlannerConfig::default()).unwrap();
        let err = renumber_new_ancestors(&mut arena).unwrap_err();
        assert!(matches!(err, ClosurePlanError::CycleDetected(_)), "{err:?}");
    }
}
