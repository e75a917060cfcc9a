//! CREATE batches: nodes that do not exist yet, possibly parented by each other.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::cycle::check_insertion_edges;
use crate::error::ClosurePlanError;
use crate::store::{PathStore, StoreRow};
use crate::types::{ActionMode, Depth, EditRequest, NodeKey, ParentRef, PathRow};

/// One node to persist, in dependency order.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct InsertionStep<N> {
    /// Index of the originating request in the batch.
    pub request: usize,
    /// Parent of the node; `Pending` now points at an earlier position in the plan.
    pub parent: ParentRef<N>,
}

/// Requests of a CREATE batch reordered so every parent is persisted before its children.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct InsertionPlan<N> {
    steps: Vec<InsertionStep<N>>,
}

impl<N: NodeKey> InsertionPlan<N> {
    pub fn steps(&self) -> &[InsertionStep<N>] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Parent id of the step at `position`, given the ids created for earlier steps.
    pub fn parent_id(&self, position: usize, created: &[N]) -> Result<Option<N>, ClosurePlanError> {
        let step = self.steps.get(position).ok_or_else(|| {
            ClosurePlanError::inconsistent(format!("insertion plan has no step {position}"))
        })?;
        match &step.parent {
            ParentRef::Root => Ok(None),
            ParentRef::Existing(parent) => Ok(Some(parent.clone())),
            ParentRef::Pending(earlier) => created.get(*earlier).cloned().map(Some).ok_or_else(|| {
                ClosurePlanError::invalid_request(
                    step.request,
                    format!("parent at position {earlier} has not been created"),
                )
            }),
        }
    }

    /// Closure rows for the inserted nodes; `created[i]` is the id persisted for step `i`.
    ///
    /// Each node gets its self row plus one row per ancestor of its parent at depth + 1.
    #[instrument(level = "debug", skip_all, fields(steps = self.steps.len()))]
    pub async fn path_rows<S>(
        &self,
        store: &S,
        created: &[N],
    ) -> Result<Vec<StoreRow<S>>, ClosurePlanError>
    where
        S: PathStore<NodeId = N>,
    {
        if created.len() != self.steps.len() {
            return Err(ClosurePlanError::inconsistent(format!(
                "{} ids supplied for {} insertion steps",
                created.len(),
                self.steps.len()
            )));
        }

        let mut existing: HashMap<N, Vec<(N, Depth)>> = HashMap::new();
        // ancestors-or-self of each created node, root first, depth relative to that node
        let mut chains: Vec<Vec<(N, Depth)>> = Vec::with_capacity(created.len());
        let mut rows = Vec::new();

        for (position, step) in self.steps.iter().enumerate() {
            let node = created[position].clone();
            let parent_chain: Vec<(N, Depth)> = match &step.parent {
                ParentRef::Root => Vec::new(),
                ParentRef::Existing(parent) => {
                    if !existing.contains_key(parent) {
                        let chain = store.scan_ancestors(parent, 0, Depth::MAX).await?;
                        if chain.is_empty() {
                            return Err(ClosurePlanError::unknown_node(parent));
                        }
                        existing.insert(parent.clone(), chain);
                    }
                    existing[parent].clone()
                }
                ParentRef::Pending(earlier) => chains
                    .get(*earlier)
                    .filter(|_| *earlier < position)
                    .cloned()
                    .ok_or_else(|| {
                        ClosurePlanError::inconsistent(format!(
                            "step {position} depends on later step {earlier}"
                        ))
                    })?,
            };

            let mut chain: Vec<(N, Depth)> = parent_chain
                .into_iter()
                .map(|(ancestor, depth)| (ancestor, depth + 1))
                .collect();
            chain.push((node.clone(), 0));
            rows.extend(
                chain
                    .iter()
                    .map(|(ancestor, depth)| PathRow::new(ancestor.clone(), node.clone(), *depth)),
            );
            chains.push(chain);
        }

        debug!(rows = rows.len(), "insertion rows planned");
        Ok(rows)
    }
}

/// Validate a CREATE batch and order it parents-first.
pub fn order_insertions<N: NodeKey>(
    requests: &[EditRequest<N>],
) -> Result<InsertionPlan<N>, ClosurePlanError> {
    for (index, request) in requests.iter().enumerate() {
        if request.mode() != ActionMode::Create {
            return Err(ClosurePlanError::invalid_request(
                index,
                "create requests cannot name an existing node",
            ));
        }
    }
    let parents: Vec<ParentRef<N>> = requests.iter().map(|r| r.parent.clone()).collect();
    check_insertion_edges(&parents)?;

    let mut sorted: Vec<usize> = Vec::with_capacity(requests.len());
    let mut position: HashMap<usize, usize> = HashMap::with_capacity(requests.len());
    let mut unsorted: Vec<usize> = Vec::new();
    for (index, parent) in parents.iter().enumerate() {
        if let ParentRef::Pending(_) = parent {
            unsorted.push(index);
        } else {
            position.insert(index, sorted.len());
            sorted.push(index);
        }
    }

    while !unsorted.is_empty() {
        let before = unsorted.len();
        unsorted.retain(|&index| match parents[index] {
            ParentRef::Pending(target) if position.contains_key(&target) => {
                position.insert(index, sorted.len());
                sorted.push(index);
                false
            }
            _ => true,
        });
        if unsorted.len() == before {
            return Err(ClosurePlanError::inconsistent(
                "insertion order stalled after cycle validation",
            ));
        }
    }

    let steps = sorted
        .into_iter()
        .map(|index| {
            let parent = match &parents[index] {
                ParentRef::Pending(target) => ParentRef::Pending(position[target]),
                other => other.clone(),
            };
            InsertionStep {
                request: index,
                parent,
            }
        })
        .collect();
    Ok(InsertionPlan { steps })
}
