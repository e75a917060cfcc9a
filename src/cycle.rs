//! Cycle detection for proposed parent assignments.

use std::collections::HashSet;

use tracing::{instrument, trace};

use crate::edit_tree::EditArena;
use crate::error::{ClosurePlanError, CyclePath};
use crate::types::{NodeKey, ParentRef};

/// Validate the parent references of a CREATE batch.
///
/// `parents[i]` is the parent of the `i`-th new node. Existing parents cannot close a
/// loop over nodes that do not exist yet, so only positional references are followed.
pub fn check_insertion_edges<N>(parents: &[ParentRef<N>]) -> Result<(), ClosurePlanError> {
    for (index, parent) in parents.iter().enumerate() {
        if let ParentRef::Pending(target) = parent {
            if *target >= parents.len() {
                return Err(ClosurePlanError::invalid_request(
                    index,
                    format!("parent refers to request #{target}, batch has {}", parents.len()),
                ));
            }
            if *target == index {
                return Err(ClosurePlanError::CycleDetected(CyclePath::from_nodes(&[
                    index, index,
                ])));
            }
        }
    }

    // 0 = unvisited, 1 = on the current walk, 2 = known to reach a root
    let mut state = vec![0u8; parents.len()];
    for start in 0..parents.len() {
        let mut walk = Vec::new();
        let mut current = start;
        loop {
            match state[current] {
                2 => break,
                1 => {
                    let from = walk.iter().position(|idx| *idx == current).unwrap_or(0);
                    let mut path = walk[from..].to_vec();
                    path.push(current);
                    return Err(ClosurePlanError::CycleDetected(CyclePath::from_nodes(&path)));
                }
                _ => {}
            }
            state[current] = 1;
            walk.push(current);
            match parents[current] {
                ParentRef::Pending(next) => current = next,
                _ => break,
            }
        }
        for idx in walk {
            state[idx] = 2;
        }
    }
    Ok(())
}

/// Reject EDIT batches that would place a node underneath itself.
///
/// For every edit tree the walk starts at the new parent and climbs its existing
/// ancestors. Hitting another pending edit tree means the rest of the climb follows that
/// tree's own new parent instead. Reaching the edited node again closes a cycle: through
/// its own old subtree alone it is [`ClosurePlanError::CycleDetected`], through other
/// edit trees it is [`ClosurePlanError::DependencyCycle`].
#[instrument(level = "debug", skip_all, fields(trees = arena.len()))]
pub fn check_cross_tree<N: NodeKey>(arena: &EditArena<N>) -> Result<(), ClosurePlanError> {
    for tree in arena.trees() {
        let Some(first_parent) = tree.new_parent.clone() else {
            continue;
        };
        if first_parent == tree.node {
            return Err(ClosurePlanError::CycleDetected(CyclePath::from_nodes(&[
                tree.node.clone(),
                tree.node.clone(),
            ])));
        }

        let mut path = vec![tree.node.clone()];
        let mut jumped = HashSet::new();
        let mut parent = Some(first_parent);

        while let Some(current) = parent.take() {
            path.push(current.clone());
            let chain = arena
                .parent_chain(&current)
                .ok_or_else(|| ClosurePlanError::unknown_node(&current))?;
            // nearest pending edit on or above `current`
            let Some(pending) = chain
                .iter()
                .rev()
                .map(|link| &link.node)
                .find(|node| arena.contains(node))
            else {
                break;
            };

            if *pending == tree.node {
                if pending != &current {
                    path.push(pending.clone());
                }
                let path = CyclePath::from_nodes(&path);
                return Err(if jumped.is_empty() {
                    ClosurePlanError::CycleDetected(path)
                } else {
                    ClosurePlanError::DependencyCycle(path)
                });
            }
            if !jumped.insert(pending.clone()) {
                // loop among other trees; reported when their own walk runs
                break;
            }
            if pending != &current {
                path.push(pending.clone());
            }
            trace!(node = ?tree.node, via = ?pending, "climbing through pending edit");
            parent = arena.get(pending).and_then(|other| other.new_parent.clone());
        }
    }
    Ok(())
}
