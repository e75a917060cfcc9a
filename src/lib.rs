//! Closure-table path planning for batched re-parenting.
//!
//! A closure table stores one `(ancestor, descendant, depth)` row for every pair of
//! nodes on the same root path, self pairs included. Moving several nodes at once
//! interacts in awkward ways: a new parent may itself be moving, a subtree may carry
//! other moving subtrees, and rows freed by one edit are the natural storage for rows
//! needed by another. [`ClosurePlanner`] resolves all of that up front and produces a
//! single [`ChangeSet`] of create, update and delete batches.
//!
//! Planning runs against any [`PathStore`]. [`MemoryPathStore`] keeps the table in
//! process; [`SeaOrmPathStore`] reads and writes a SeaORM entity, and
//! [`ClosurePathRepository`] wraps plan and write in one advisory-locked PostgreSQL
//! transaction.

pub mod config;
pub mod cycle;
pub mod edit_tree;
pub mod error;
pub mod insertion;
pub mod lock;
pub mod memory;
pub mod planner;
pub mod recompute;
pub mod repository;
pub mod resolver;
pub mod reuse;
pub mod store;
pub mod traits;
pub mod types;

pub mod prelude {
    //! Convenient re-exports for consumers.
    pub use crate::config::{AdvisoryLockStrategy, PlannerConfig, PlannerOptions, RowReuse};
    pub use crate::planner::{ClosurePlanner, UpdatePlan};
    pub use crate::store::PathStore;
    pub use crate::traits::ClosurePathModel;
    pub use crate::types::{ChangeSet, EditRequest, ParentRef, PathRow};
}

pub use closure_planner_macros::ClosurePathModel as ClosurePathModelDerive;
#[doc(hidden)]
pub use closure_planner_macros::ClosurePathModel;
pub use config::{
    AdvisoryLockKey, AdvisoryLockStrategy, ClosurePathConfig, ClosurePathOptions, PlannerConfig,
    PlannerOptions, RowReuse,
};
pub use edit_tree::{ChainLink, EditArena, EditTree};
pub use error::{ClosurePlanError, CyclePath};
pub use insertion::{InsertionPlan, InsertionStep};
pub use memory::MemoryPathStore;
pub use planner::{ClosurePlanner, UpdatePlan};
pub use repository::{ClosurePathRepository, SeaOrmPathStore};
pub use reuse::{RowReusePlanner, TreeRowStats};
pub use store::{PathStore, StoreChangeSet, StoreRow};
pub use traits::ClosurePathModel;
pub use types::{
    ActionMode, ChangeSet, Depth, EditRequest, NodeKey, ParentLookup, ParentRef, PathRow,
};
