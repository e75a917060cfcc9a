use std::fmt;

use sea_orm::{DbErr, RuntimeErr};
use thiserror::Error;

/// Chain of node identifiers reported by cycle errors, rendered as `a -> b -> c`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CyclePath(Vec<String>);

impl CyclePath {
    pub fn from_nodes<'a, N, I>(nodes: I) -> Self
    where
        N: fmt::Debug + 'a,
        I: IntoIterator<Item = &'a N>,
    {
        Self(nodes.into_iter().map(|node| format!("{node:?}")).collect())
    }

    pub fn nodes(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for CyclePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" -> "))
    }
}

/// Errors returned while planning or applying closure-table changes.
#[derive(Debug, Error)]
pub enum ClosurePlanError {
    #[error("cycle detected in ancestry: {0}")]
    CycleDetected(CyclePath),

    #[error("edit trees depend on each other circularly: {0}")]
    DependencyCycle(CyclePath),

    #[error("node {0} appears more than once in the edit batch")]
    DuplicateIdentifier(String),

    #[error("node {0} has no self row in the closure table")]
    UnknownNode(String),

    #[error("edit request #{index} is invalid: {reason}")]
    InvalidRequest { index: usize, reason: String },

    #[error("closure store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("closure-planner inconsistent state: {0}")]
    InconsistentState(String),

    #[error("invalid planner options: {0}")]
    Config(#[from] serde_json::Error),

    #[error("advisory locks require a PostgreSQL connection")]
    UnsupportedBackend,

    #[error("database error: {0}")]
    Database(#[from] DbErr),

    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl ClosurePlanError {
    pub fn inconsistent(detail: impl Into<String>) -> Self {
        Self::InconsistentState(detail.into())
    }

    pub fn unknown_node(node: &impl fmt::Debug) -> Self {
        Self::UnknownNode(format!("{node:?}"))
    }

    pub fn invalid_request(index: usize, reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            index,
            reason: reason.into(),
        }
    }

    /// Wrap a SeaORM error, reporting lost connections as [`Self::StoreUnavailable`].
    pub fn from_db(err: DbErr) -> Self {
        match err {
            DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => Self::StoreUnavailable(err.to_string()),
            other => Self::Database(other),
        }
    }

    /// Whether the failure came from the store transport rather than the batch itself.
    ///
    /// The planner never retries; callers decide whether to run the batch again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::StoreUnavailable(_) => true,
            Self::Database(err) => db_err_is_transient(err),
            Self::Sqlx(err) => sqlx_err_is_transient(err),
            _ => false,
        }
    }
}

fn db_err_is_transient(err: &DbErr) -> bool {
    match err {
        DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => true,
        DbErr::Exec(RuntimeErr::SqlxError(inner)) | DbErr::Query(RuntimeErr::SqlxError(inner)) => {
            sqlx_err_is_transient(inner)
        }
        _ => false,
    }
}

fn sqlx_err_is_transient(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
    )
}
