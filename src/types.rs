use std::fmt::Debug;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// Distance between an ancestor and a descendant; `0` is the self row.
pub type Depth = i32;

/// Bounds shared by node identifiers and closure row identifiers.
pub trait NodeKey: Clone + Eq + Hash + Ord + Debug + Send + Sync + 'static {}

impl<T> NodeKey for T where T: Clone + Eq + Hash + Ord + Debug + Send + Sync + 'static {}

/// One `(ancestor, descendant, depth)` triple of the closure table.
///
/// `id` is `None` for rows the store has not persisted yet.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PathRow<N, R> {
    pub id: Option<R>,
    pub ancestor: N,
    pub descendant: N,
    pub depth: Depth,
}

impl<N, R> PathRow<N, R> {
    pub fn new(ancestor: N, descendant: N, depth: Depth) -> Self {
        Self {
            id: None,
            ancestor,
            descendant,
            depth,
        }
    }

    pub fn with_id(mut self, id: R) -> Self {
        self.id = Some(id);
        self
    }

    pub fn is_self_row(&self) -> bool {
        self.depth == 0
    }
}

impl<N: PartialEq, R> PathRow<N, R> {
    pub fn same_triple(&self, other: &Self) -> bool {
        self.ancestor == other.ancestor
            && self.descendant == other.descendant
            && self.depth == other.depth
    }
}

/// Parent reference carried by an [`EditRequest`].
///
/// `Root` is the single "no parent" sentinel (`ROOT_OF_TREE`).
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum ParentRef<N> {
    Root,
    /// A node that already exists in the closure table.
    Existing(N),
    /// Positional index of another request in the same CREATE batch.
    Pending(usize),
}

impl<N> From<Option<N>> for ParentRef<N> {
    fn from(parent: Option<N>) -> Self {
        match parent {
            Some(parent) => ParentRef::Existing(parent),
            None => ParentRef::Root,
        }
    }
}

/// Whether a batch inserts new nodes or re-parents existing ones.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionMode {
    Create,
    Edit,
}

/// Raw per-node request collected by the caller.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct EditRequest<N> {
    /// Existing node being edited; `None` for nodes that are about to be created.
    #[serde(default)]
    pub node: Option<N>,
    pub parent: ParentRef<N>,
}

impl<N> EditRequest<N> {
    pub fn create(parent: ParentRef<N>) -> Self {
        Self { node: None, parent }
    }

    pub fn edit(node: N, parent: Option<N>) -> Self {
        Self {
            node: Some(node),
            parent: parent.into(),
        }
    }

    pub fn mode(&self) -> ActionMode {
        if self.node.is_some() {
            ActionMode::Edit
        } else {
            ActionMode::Create
        }
    }
}

/// Current position of a node as read from the closure table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParentLookup<N> {
    /// The node has no self row.
    Unknown,
    Root,
    Parent(N),
}

impl<N: Clone> ParentLookup<N> {
    pub fn parent(&self) -> Option<N> {
        match self {
            ParentLookup::Parent(parent) => Some(parent.clone()),
            _ => None,
        }
    }
}

/// The three row batches produced for one EDIT batch.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet<N, R> {
    pub create: Vec<PathRow<N, R>>,
    pub update: Vec<PathRow<N, R>>,
    pub delete: Vec<PathRow<N, R>>,
}

impl<N, R> Default for ChangeSet<N, R> {
    fn default() -> Self {
        Self {
            create: Vec::new(),
            update: Vec::new(),
            delete: Vec::new(),
        }
    }
}

impl<N, R> ChangeSet<N, R> {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }

    /// Total number of row writes the batch will issue.
    pub fn len(&self) -> usize {
        self.create.len() + self.update.len() + self.delete.len()
    }
}
