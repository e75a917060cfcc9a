//! Edit trees: one record per node whose parent actually changes.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, instrument};

use crate::error::ClosurePlanError;
use crate::store::PathStore;
use crate::types::{ActionMode, Depth, EditRequest, NodeKey, ParentLookup, ParentRef};

/// A node together with its depth relative to the chain it belongs to.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ChainLink<N> {
    pub node: N,
    pub depth: Depth,
}

impl<N> ChainLink<N> {
    pub fn new(node: N, depth: Depth) -> Self {
        Self { node, depth }
    }
}

/// Re-parenting of one node and the ripple it causes through the closure table.
#[derive(Clone, Debug, Serialize)]
pub struct EditTree<N> {
    pub node: N,
    pub old_parent: Option<N>,
    pub new_parent: Option<N>,
    /// Pending edit tree whose new ancestors this one extends; `None` is `ROOT_OF_TREE`.
    pub dependency: Option<N>,
    /// Ancestors of the old parent, self included, root first.
    pub old_ancestors: Vec<ChainLink<N>>,
    /// Ancestors of the new parent in the edited forest, root first.
    pub new_ancestors: Vec<ChainLink<N>>,
    /// Every old descendant of `node`, itself included at depth 0.
    pub old_descendants: Vec<ChainLink<N>>,
    /// Old descendants minus the subtrees relocated by other edit trees.
    pub new_descendants: Vec<ChainLink<N>>,
    /// Other edit-tree roots found inside this tree's old subtree.
    pub moving_subtree_roots: Vec<N>,
    /// Edit trees that land inside this tree's new subtree.
    pub moving_in_roots: Vec<N>,
    /// Moving subtree roots that leave this tree.
    pub moving_out_roots: Vec<N>,
    #[serde(skip)]
    pub(crate) ancestors_resolved: bool,
}

impl<N: NodeKey> EditTree<N> {
    pub(crate) fn new(node: N, old_parent: Option<N>, new_parent: Option<N>) -> Self {
        Self {
            node,
            old_parent,
            new_parent,
            dependency: None,
            old_ancestors: Vec::new(),
            new_ancestors: Vec::new(),
            old_descendants: Vec::new(),
            new_descendants: Vec::new(),
            moving_subtree_roots: Vec::new(),
            moving_in_roots: Vec::new(),
            moving_out_roots: Vec::new(),
            ancestors_resolved: false,
        }
    }

    /// Number of closure rows this tree owns after the edit.
    pub fn required_rows(&self) -> usize {
        self.new_ancestors.len() * self.new_descendants.len()
    }
}

/// Edit trees stored by value, addressed by index or by node id.
#[derive(Clone, Debug)]
pub struct EditArena<N: NodeKey> {
    trees: Vec<EditTree<N>>,
    index: HashMap<N, usize>,
    parent_chains: HashMap<N, Vec<ChainLink<N>>>,
    unchanged: Vec<N>,
}

impl<N: NodeKey> Default for EditArena<N> {
    fn default() -> Self {
        Self {
            trees: Vec::new(),
            index: HashMap::new(),
            parent_chains: HashMap::new(),
            unchanged: Vec::new(),
        }
    }
}

impl<N: NodeKey> EditArena<N> {
    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    pub fn trees(&self) -> &[EditTree<N>] {
        &self.trees
    }

    pub fn tree(&self, idx: usize) -> Option<&EditTree<N>> {
        self.trees.get(idx)
    }

    /// Indices handed out by the resolver are always in range.
    pub(crate) fn tree_at(&self, idx: usize) -> &EditTree<N> {
        &self.trees[idx]
    }

    pub(crate) fn tree_mut(&mut self, idx: usize) -> &mut EditTree<N> {
        &mut self.trees[idx]
    }

    pub fn index_of(&self, node: &N) -> Option<usize> {
        self.index.get(node).copied()
    }

    pub fn get(&self, node: &N) -> Option<&EditTree<N>> {
        self.index_of(node).map(|idx| &self.trees[idx])
    }

    pub fn contains(&self, node: &N) -> bool {
        self.index.contains_key(node)
    }

    /// Node ids of every edit tree, in request order.
    pub fn nodes(&self) -> Vec<N> {
        self.trees.iter().map(|tree| tree.node.clone()).collect()
    }

    /// Nodes from the request batch whose parent does not change.
    pub fn unchanged(&self) -> &[N] {
        &self.unchanged
    }

    /// Existing ancestors of a new parent, itself included, root first.
    pub fn parent_chain(&self, parent: &N) -> Option<&[ChainLink<N>]> {
        self.parent_chains.get(parent).map(Vec::as_slice)
    }

    pub(crate) fn push(&mut self, tree: EditTree<N>) {
        self.index.insert(tree.node.clone(), self.trees.len());
        self.trees.push(tree);
    }

    pub(crate) fn set_parent_chain(&mut self, parent: N, chain: Vec<ChainLink<N>>) {
        self.parent_chains.insert(parent, chain);
    }
}

/// Turn EDIT-mode requests into an [`EditArena`].
///
/// Only nodes whose parent changes get an edit tree; the others are listed in
/// [`EditArena::unchanged`].
#[instrument(level = "debug", skip_all, fields(requests = requests.len()))]
pub async fn build_edit_arena<S: PathStore>(
    store: &S,
    requests: &[EditRequest<S::NodeId>],
) -> Result<EditArena<S::NodeId>, ClosurePlanError> {
    let mut targets: Vec<(S::NodeId, Option<S::NodeId>)> = Vec::with_capacity(requests.len());
    let mut seen = HashSet::with_capacity(requests.len());

    for (index, request) in requests.iter().enumerate() {
        let node = match (&request.node, request.mode()) {
            (Some(node), ActionMode::Edit) => node.clone(),
            _ => {
                return Err(ClosurePlanError::invalid_request(
                    index,
                    "edit request needs a node id",
                ))
            }
        };
        let parent = match &request.parent {
            ParentRef::Root => None,
            ParentRef::Existing(parent) => Some(parent.clone()),
            ParentRef::Pending(_) => {
                return Err(ClosurePlanError::invalid_request(
                    index,
                    "positional parent references are only valid when creating nodes",
                ))
            }
        };
        if !seen.insert(node.clone()) {
            return Err(ClosurePlanError::DuplicateIdentifier(format!("{node:?}")));
        }
        targets.push((node, parent));
    }

    let ids: Vec<S::NodeId> = targets.iter().map(|(node, _)| node.clone()).collect();
    let current = store.scan_parents(&ids).await?;

    let mut arena = EditArena::default();
    for (node, new_parent) in targets {
        let old_parent = match current.get(&node) {
            None | Some(ParentLookup::Unknown) => return Err(ClosurePlanError::unknown_node(&node)),
            Some(lookup) => lookup.parent(),
        };
        if old_parent == new_parent {
            arena.unchanged.push(node);
            continue;
        }
        debug!(node = ?node, old_parent = ?old_parent, new_parent = ?new_parent, "parent changes");
        arena.push(EditTree::new(node, old_parent, new_parent));
    }

    let new_parents: Vec<S::NodeId> = arena
        .trees
        .iter()
        .filter_map(|tree| tree.new_parent.clone())
        .collect();
    for parent in new_parents {
        if arena.parent_chains.contains_key(&parent) {
            continue;
        }
        let chain = store.scan_ancestors(&parent, 0, Depth::MAX).await?;
        if !chain.iter().any(|(_, depth)| *depth == 0) {
            return Err(ClosurePlanError::unknown_node(&parent));
        }
        let links = chain
            .into_iter()
            .map(|(node, depth)| ChainLink::new(node, depth))
            .collect();
        arena.set_parent_chain(parent, links);
    }

    Ok(arena)
}
