//! In-process closure table.
//!
//! Behaves like a relational table with a unique `(ancestor, descendant)` index that is
//! checked row by row, so a write order that would trip a database constraint trips
//! here as well. Each bulk call is all-or-nothing.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::{instrument, trace};

use crate::error::{ClosurePlanError, CyclePath};
use crate::store::PathStore;
use crate::types::{Depth, NodeKey, PathRow};

type Row<N> = PathRow<N, u64>;

#[derive(Clone, Debug)]
struct Table<N: NodeKey> {
    rows: BTreeMap<u64, Row<N>>,
    pairs: HashMap<(N, N), u64>,
    next_id: u64,
}

impl<N: NodeKey> Table<N> {
    fn new() -> Self {
        Self {
            rows: BTreeMap::new(),
            pairs: HashMap::new(),
            next_id: 1,
        }
    }

    fn claim_pair(&mut self, row: &Row<N>, id: u64) -> Result<(), ClosurePlanError> {
        let key = (row.ancestor.clone(), row.descendant.clone());
        if let Some(holder) = self.pairs.get(&key) {
            if *holder != id {
                return Err(ClosurePlanError::inconsistent(format!(
                    "pair ({:?}, {:?}) already held by row {holder}",
                    row.ancestor, row.descendant
                )));
            }
        }
        self.pairs.insert(key, id);
        Ok(())
    }

    fn insert(&mut self, mut row: Row<N>) -> Result<u64, ClosurePlanError> {
        if row.id.is_some() {
            return Err(ClosurePlanError::inconsistent(format!(
                "row {:?} to create already carries an id",
                row.id
            )));
        }
        let id = self.next_id;
        self.claim_pair(&row, id)?;
        self.next_id += 1;
        row.id = Some(id);
        self.rows.insert(id, row);
        Ok(id)
    }

    fn update(&mut self, row: &Row<N>) -> Result<(), ClosurePlanError> {
        let id = existing_id(row)?;
        let current = self
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| ClosurePlanError::inconsistent(format!("row {id} does not exist")))?;
        self.pairs
            .remove(&(current.ancestor.clone(), current.descendant.clone()));
        self.claim_pair(row, id)?;
        self.rows.insert(id, row.clone());
        Ok(())
    }

    fn delete(&mut self, row: &Row<N>) -> Result<(), ClosurePlanError> {
        let id = existing_id(row)?;
        let current = self
            .rows
            .remove(&id)
            .ok_or_else(|| ClosurePlanError::inconsistent(format!("row {id} does not exist")))?;
        self.pairs.remove(&(current.ancestor, current.descendant));
        Ok(())
    }
}

fn existing_id<N>(row: &Row<N>) -> Result<u64, ClosurePlanError> {
    row.id
        .ok_or_else(|| ClosurePlanError::inconsistent("row without id cannot be written in place"))
}

/// Closure table held in memory, keyed by row id.
#[derive(Debug)]
pub struct MemoryPathStore<N: NodeKey> {
    table: RwLock<Table<N>>,
}

impl<N: NodeKey> Default for MemoryPathStore<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: NodeKey> MemoryPathStore<N> {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(Table::new()),
        }
    }

    /// Build a consistent closure table from `(node, parent)` pairs.
    ///
    /// Rows are allocated node by node in input order: the self row, then one row per
    /// ancestor from the root down.
    pub fn from_parents<I>(edges: I) -> Result<Self, ClosurePlanError>
    where
        I: IntoIterator<Item = (N, Option<N>)>,
    {
        let edges: Vec<(N, Option<N>)> = edges.into_iter().collect();
        let mut parents: HashMap<N, Option<N>> = HashMap::with_capacity(edges.len());
        for (node, parent) in &edges {
            if parents.insert(node.clone(), parent.clone()).is_some() {
                return Err(ClosurePlanError::DuplicateIdentifier(format!("{node:?}")));
            }
        }

        let mut table = Table::new();
        for (node, _) in &edges {
            table.insert(PathRow::new(node.clone(), node.clone(), 0))?;
            let chain = ancestor_chain(&parents, node)?;
            let len = chain.len() as Depth;
            for (position, ancestor) in chain.into_iter().enumerate() {
                table.insert(PathRow::new(ancestor, node.clone(), len - position as Depth))?;
            }
        }

        Ok(Self {
            table: RwLock::new(table),
        })
    }

    /// Snapshot of every row, ordered by id.
    pub fn rows(&self) -> Result<Vec<Row<N>>, ClosurePlanError> {
        Ok(self.read()?.rows.values().cloned().collect())
    }

    pub fn len(&self) -> Result<usize, ClosurePlanError> {
        Ok(self.read()?.rows.len())
    }

    pub fn is_empty(&self) -> Result<bool, ClosurePlanError> {
        Ok(self.read()?.rows.is_empty())
    }

    /// Parent of every node that has a self row, read from the depth-1 rows.
    pub fn parent_map(&self) -> Result<BTreeMap<N, Option<N>>, ClosurePlanError> {
        let table = self.read()?;
        let mut parents = BTreeMap::new();
        for row in table.rows.values().filter(|row| row.is_self_row()) {
            parents.insert(row.descendant.clone(), None);
        }
        for row in table.rows.values().filter(|row| row.depth == 1) {
            let slot = parents.get_mut(&row.descendant).ok_or_else(|| {
                ClosurePlanError::inconsistent(format!(
                    "node {:?} has a parent row but no self row",
                    row.descendant
                ))
            })?;
            if slot.replace(row.ancestor.clone()).is_some() {
                return Err(ClosurePlanError::inconsistent(format!(
                    "node {:?} has more than one parent",
                    row.descendant
                )));
            }
        }
        Ok(parents)
    }

    /// Verify the table is exactly the closure of its own depth-1 forest.
    pub fn check_consistency(&self) -> Result<(), ClosurePlanError> {
        let parents = self.parent_map()?;
        let lookup: HashMap<N, Option<N>> = parents.clone().into_iter().collect();

        let mut expected: HashMap<(N, N), Depth> = HashMap::new();
        for node in parents.keys() {
            expected.insert((node.clone(), node.clone()), 0);
            let chain = ancestor_chain(&lookup, node)?;
            let len = chain.len() as Depth;
            for (position, ancestor) in chain.into_iter().enumerate() {
                expected.insert((ancestor, node.clone()), len - position as Depth);
            }
        }

        let table = self.read()?;
        if table.rows.len() != expected.len() {
            return Err(ClosurePlanError::inconsistent(format!(
                "closure table holds {} rows, forest requires {}",
                table.rows.len(),
                expected.len()
            )));
        }
        for row in table.rows.values() {
            let key = (row.ancestor.clone(), row.descendant.clone());
            match expected.get(&key) {
                Some(depth) if *depth == row.depth => {}
                _ => {
                    return Err(ClosurePlanError::inconsistent(format!(
                        "unexpected row {:?} -> {:?} at depth {}",
                        row.ancestor, row.descendant, row.depth
                    )))
                }
            }
        }
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Table<N>>, ClosurePlanError> {
        self.table
            .read()
            .map_err(|_| ClosurePlanError::StoreUnavailable("memory store lock poisoned".into()))
    }

    fn write_staged<F>(&self, op: F) -> Result<(), ClosurePlanError>
    where
        F: FnOnce(&mut Table<N>) -> Result<(), ClosurePlanError>,
    {
        let mut guard = self
            .table
            .write()
            .map_err(|_| ClosurePlanError::StoreUnavailable("memory store lock poisoned".into()))?;
        let mut staged = guard.clone();
        op(&mut staged)?;
        *guard = staged;
        Ok(())
    }
}

/// Ancestors of `node`, root first, following the parent map.
fn ancestor_chain<N: NodeKey>(
    parents: &HashMap<N, Option<N>>,
    node: &N,
) -> Result<Vec<N>, ClosurePlanError> {
    let mut chain = Vec::new();
    let mut seen = HashSet::from([node.clone()]);
    let mut current = parents
        .get(node)
        .ok_or_else(|| ClosurePlanError::unknown_node(node))?
        .clone();
    while let Some(parent) = current {
        if !seen.insert(parent.clone()) {
            chain.push(parent);
            chain.reverse();
            chain.push(node.clone());
            return Err(ClosurePlanError::CycleDetected(CyclePath::from_nodes(&chain)));
        }
        current = parents
            .get(&parent)
            .ok_or_else(|| ClosurePlanError::unknown_node(&parent))?
            .clone();
        chain.push(parent);
    }
    chain.reverse();
    Ok(chain)
}

#[async_trait]
impl<N: NodeKey> PathStore for MemoryPathStore<N> {
    type NodeId = N;
    type RowId = u64;

    async fn scan_ancestors(
        &self,
        node: &N,
        depth_min: Depth,
        depth_max: Depth,
    ) -> Result<Vec<(N, Depth)>, ClosurePlanError> {
        let table = self.read()?;
        let mut found: Vec<(N, Depth)> = table
            .rows
            .values()
            .filter(|row| &row.descendant == node && row.depth >= depth_min && row.depth <= depth_max)
            .map(|row| (row.ancestor.clone(), row.depth))
            .collect();
        found.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(found)
    }

    async fn scan_ancestor_rows(
        &self,
        nodes: &[N],
        depth_max: Depth,
    ) -> Result<Vec<Row<N>>, ClosurePlanError> {
        let wanted: HashSet<&N> = nodes.iter().collect();
        let table = self.read()?;
        Ok(table
            .rows
            .values()
            .filter(|row| wanted.contains(&row.descendant) && row.depth <= depth_max)
            .cloned()
            .collect())
    }

    async fn scan_descendants(&self, nodes: &[N]) -> Result<Vec<Row<N>>, ClosurePlanError> {
        let wanted: HashSet<&N> = nodes.iter().collect();
        let table = self.read()?;
        Ok(table
            .rows
            .values()
            .filter(|row| wanted.contains(&row.ancestor))
            .cloned()
            .collect())
    }

    async fn scan_rows_between(
        &self,
        ancestors: &[N],
        descendants: &[N],
    ) -> Result<Vec<Row<N>>, ClosurePlanError> {
        let ancestors: HashSet<&N> = ancestors.iter().collect();
        let descendants: HashSet<&N> = descendants.iter().collect();
        let table = self.read()?;
        Ok(table
            .rows
            .values()
            .filter(|row| ancestors.contains(&row.ancestor) && descendants.contains(&row.descendant))
            .cloned()
            .collect())
    }

    #[instrument(level = "debug", skip_all, fields(rows = rows.len()))]
    async fn bulk_create(&self, rows: &[Row<N>]) -> Result<(), ClosurePlanError> {
        self.write_staged(|table| {
            for row in rows {
                let id = table.insert(row.clone())?;
                trace!(id, ancestor = ?row.ancestor, descendant = ?row.descendant, "created row");
            }
            Ok(())
        })
    }

    #[instrument(level = "debug", skip_all, fields(rows = rows.len()))]
    async fn bulk_update(&self, rows: &[Row<N>]) -> Result<(), ClosurePlanError> {
        self.write_staged(|table| rows.iter().try_for_each(|row| table.update(row)))
    }

    #[instrument(level = "debug", skip_all, fields(rows = rows.len()))]
    async fn bulk_delete(&self, rows: &[Row<N>]) -> Result<(), ClosurePlanError> {
        self.write_staged(|table| rows.iter().try_for_each(|row| table.delete(row)))
    }
}
