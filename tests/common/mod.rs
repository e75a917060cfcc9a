#![allow(dead_code)]

use std::sync::Once;

use closure_planner::{ClosurePlanError, MemoryPathStore, PathStore, UpdatePlan};
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Route planner logs through the test harness; `RUST_LOG=closure_planner=trace` for detail.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

pub type Store = MemoryPathStore<&'static str>;

pub fn forest(edges: &[(&'static str, Option<&'static str>)]) -> Store {
    init_tracing();
    MemoryPathStore::from_parents(edges.iter().copied()).expect("valid forest")
}

/// Apply a plan to the store and verify the table is still a closure of its forest.
pub async fn apply_checked<N>(
    store: &MemoryPathStore<N>,
    plan: &UpdatePlan<N, u64>,
) -> Result<(), ClosurePlanError>
where
    N: closure_planner::NodeKey,
{
    store.apply(&plan.changes).await?;
    store.check_consistency()
}

pub fn triples<N: Clone, R>(rows: &[closure_planner::PathRow<N, R>]) -> Vec<(N, N, i32)> {
    rows.iter()
        .map(|row| (row.ancestor.clone(), row.descendant.clone(), row.depth))
        .collect()
}
