use std::marker::PhantomData;

use async_trait::async_trait;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
    QueryFilter, QueryOrder,
};
use tracing::{instrument, warn};

use crate::config::{ClosurePathConfig, PlannerConfig};
use crate::error::ClosurePlanError;
use crate::insertion::InsertionPlan;
use crate::lock::LockedTransaction;
use crate::planner::{ClosurePlanner, UpdatePlan};
use crate::store::{PathStore, StoreRow};
use crate::traits::ClosurePathModel;
use crate::types::{Depth, EditRequest, PathRow};

/// [`PathStore`] over a SeaORM closure-table entity.
///
/// Bind it to a `DatabaseTransaction` so reads and writes of one batch see the same
/// snapshot.
pub struct SeaOrmPathStore<'c, M, C> {
    conn: &'c C,
    _marker: PhantomData<M>,
}

impl<'c, M, C> SeaOrmPathStore<'c, M, C>
where
    M: ClosurePathModel,
    C: ConnectionTrait,
{
    pub fn new(conn: &'c C) -> Self {
        Self {
            conn,
            _marker: PhantomData,
        }
    }

    fn node_values(nodes: &[M::NodeId]) -> Vec<sea_orm::Value> {
        nodes.iter().map(M::node_to_value).collect()
    }
}

#[async_trait]
impl<'c, M, C> PathStore for SeaOrmPathStore<'c, M, C>
where
    M: ClosurePathModel,
    C: ConnectionTrait + Send + Sync,
{
    type NodeId = M::NodeId;
    type RowId = M::RowId;

    async fn scan_ancestors(
        &self,
        node: &M::NodeId,
        depth_min: Depth,
        depth_max: Depth,
    ) -> Result<Vec<(M::NodeId, Depth)>, ClosurePlanError> {
        let rows = M::Entity::find()
            .filter(M::descendant_column().eq(M::node_to_value(node)))
            .filter(M::depth_column().gte(depth_min))
            .filter(M::depth_column().lte(depth_max))
            .order_by_desc(M::depth_column())
            .all(self.conn)
            .await
            .map_err(ClosurePlanError::from_db)?;
        Ok(rows
            .iter()
            .map(|row| (row.ancestor(), row.depth()))
            .collect())
    }

    async fn scan_ancestor_rows(
        &self,
        nodes: &[M::NodeId],
        depth_max: Depth,
    ) -> Result<Vec<StoreRow<Self>>, ClosurePlanError> {
        if nodes.is_empty() {
            return Ok(Vec::new());
        }
        let rows = M::Entity::find()
            .filter(M::descendant_column().is_in(Self::node_values(nodes)))
            .filter(M::depth_column().lte(depth_max))
            .order_by_asc(M::id_column())
            .all(self.conn)
            .await
            .map_err(ClosurePlanError::from_db)?;
        Ok(rows.iter().map(ClosurePathModel::to_path_row).collect())
    }

    async fn scan_descendants(
        &self,
        nodes: &[M::NodeId],
    ) -> Result<Vec<StoreRow<Self>>, ClosurePlanError> {
        if nodes.is_empty() {
            return Ok(Vec::new());
        }
        let rows = M::Entity::find()
            .filter(M::ancestor_column().is_in(Self::node_values(nodes)))
            .order_by_asc(M::id_column())
            .all(self.conn)
            .await
            .map_err(ClosurePlanError::from_db)?;
        Ok(rows.iter().map(ClosurePathModel::to_path_row).collect())
    }

    async fn scan_rows_between(
        &self,
        ancestors: &[M::NodeId],
        descendants: &[M::NodeId],
    ) -> Result<Vec<StoreRow<Self>>, ClosurePlanError> {
        if ancestors.is_empty() || descendants.is_empty() {
            return Ok(Vec::new());
        }
        let rows = M::Entity::find()
            .filter(M::ancestor_column().is_in(Self::node_values(ancestors)))
            .filter(M::descendant_column().is_in(Self::node_values(descendants)))
            .order_by_asc(M::id_column())
            .all(self.conn)
            .await
            .map_err(ClosurePlanError::from_db)?;
        Ok(rows.iter().map(ClosurePathModel::to_path_row).collect())
    }

    #[instrument(level = "debug", skip_all, fields(table = M::closure_path_config().table_name(), rows = rows.len()))]
    async fn bulk_create(&self, rows: &[StoreRow<Self>]) -> Result<(), ClosurePlanError> {
        if rows.is_empty() {
            return Ok(());
        }
        let models = rows
            .iter()
            .map(|row| M::build_row(row.ancestor.clone(), row.descendant.clone(), row.depth));
        M::Entity::insert_many(models)
            .exec_without_returning(self.conn)
            .await
            .map_err(ClosurePlanError::from_db)?;
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(table = M::closure_path_config().table_name(), rows = rows.len()))]
    async fn bulk_update(&self, rows: &[StoreRow<Self>]) -> Result<(), ClosurePlanError> {
        for row in rows {
            let id = stored_id(row)?;
            let result = M::Entity::update_many()
                .col_expr(M::ancestor_column(), Expr::value(M::node_to_value(&row.ancestor)))
                .col_expr(
                    M::descendant_column(),
                    Expr::value(M::node_to_value(&row.descendant)),
                )
                .col_expr(M::depth_column(), Expr::value(row.depth))
                .filter(M::id_column().eq(M::row_id_to_value(id)))
                .exec(self.conn)
                .await
                .map_err(ClosurePlanError::from_db)?;
            if result.rows_affected != 1 {
                return Err(ClosurePlanError::inconsistent(format!(
                    "update of closure row {id:?} touched {} rows",
                    result.rows_affected
                )));
            }
        }
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(table = M::closure_path_config().table_name(), rows = rows.len()))]
    async fn bulk_delete(&self, rows: &[StoreRow<Self>]) -> Result<(), ClosurePlanError> {
        if rows.is_empty() {
            return Ok(());
        }
        let ids = rows
            .iter()
            .map(|row| stored_id(row).map(M::row_id_to_value))
            .collect::<Result<Vec<_>, _>>()?;
        let result = M::Entity::delete_many()
            .filter(M::id_column().is_in(ids))
            .exec(self.conn)
            .await
            .map_err(ClosurePlanError::from_db)?;
        if result.rows_affected != rows.len() as u64 {
            return Err(ClosurePlanError::inconsistent(format!(
                "deleted {} closure rows, expected {}",
                result.rows_affected,
                rows.len()
            )));
        }
        Ok(())
    }
}

fn stored_id<N, R>(row: &PathRow<N, R>) -> Result<&R, ClosurePlanError> {
    row.id
        .as_ref()
        .ok_or_else(|| ClosurePlanError::inconsistent("closure row has no id"))
}

/// Plans and writes closure-table batches for a given model inside a locked transaction.
#[derive(Debug)]
pub struct ClosurePathRepository<M>
where
    M: ClosurePathModel,
{
    planner: PlannerConfig,
    _marker: PhantomData<M>,
}

impl<M> Default for ClosurePathRepository<M>
where
    M: ClosurePathModel,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<M> ClosurePathRepository<M>
where
    M: ClosurePathModel,
{
    pub fn new() -> Self {
        Self::with_planner_config(PlannerConfig::default())
    }

    pub fn with_planner_config(planner: PlannerConfig) -> Self {
        Self {
            planner,
            _marker: PhantomData,
        }
    }

    fn config(&self) -> &'static ClosurePathConfig {
        M::closure_path_config()
    }

    fn ensure_postgres(conn: &impl ConnectionTrait) -> Result<(), ClosurePlanError> {
        if conn.get_database_backend() == DbBackend::Postgres {
            Ok(())
        } else {
            Err(ClosurePlanError::UnsupportedBackend)
        }
    }

    async fn begin(&self, db: &DatabaseConnection) -> Result<LockedTransaction, ClosurePlanError> {
        let strategy = self.config().advisory_lock_strategy().clone();
        if strategy.key().is_some() {
            Self::ensure_postgres(db)?;
        }
        LockedTransaction::acquire(&strategy, db).await
    }

    async fn finish<T>(
        guard: LockedTransaction,
        result: Result<T, ClosurePlanError>,
    ) -> Result<T, ClosurePlanError> {
        match result {
            Ok(value) => {
                guard.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = guard.rollback().await {
                    warn!(error = %rollback, "rollback of closure batch failed");
                }
                Err(err)
            }
        }
    }

    /// Re-parent existing nodes and rewrite their closure rows in one transaction.
    #[instrument(level = "info", skip_all, fields(entity = self.config().entity_name(), requests = requests.len()))]
    pub async fn apply_update(
        &self,
        db: &DatabaseConnection,
        requests: &[EditRequest<M::NodeId>],
    ) -> Result<UpdatePlan<M::NodeId, M::RowId>, ClosurePlanError> {
        let guard = self.begin(db).await?;
        let result = match guard.connection() {
            Ok(txn) => self.apply_update_on(txn, requests).await,
            Err(err) => Err(err),
        };
        Self::finish(guard, result).await
    }

    async fn apply_update_on<C>(
        &self,
        conn: &C,
        requests: &[EditRequest<M::NodeId>],
    ) -> Result<UpdatePlan<M::NodeId, M::RowId>, ClosurePlanError>
    where
        C: ConnectionTrait + Send + Sync,
    {
        let planner =
            ClosurePlanner::with_config(SeaOrmPathStore::<M, C>::new(conn), self.planner.clone());
        let plan = planner.plan_update(requests).await?;
        planner.store().apply(&plan.changes).await?;
        Ok(plan)
    }

    /// Write the closure rows of freshly inserted nodes.
    ///
    /// `created[i]` is the id persisted for `plan.steps()[i]`. Returns the rows written.
    #[instrument(level = "info", skip_all, fields(entity = self.config().entity_name(), steps = plan.len()))]
    pub async fn apply_insertion(
        &self,
        db: &DatabaseConnection,
        plan: &InsertionPlan<M::NodeId>,
        created: &[M::NodeId],
    ) -> Result<Vec<PathRow<M::NodeId, M::RowId>>, ClosurePlanError> {
        let guard = self.begin(db).await?;
        let result = match guard.connection() {
            Ok(txn) => Self::apply_insertion_on(txn, plan, created).await,
            Err(err) => Err(err),
        };
        Self::finish(guard, result).await
    }

    async fn apply_insertion_on<C>(
        conn: &C,
        plan: &InsertionPlan<M::NodeId>,
        created: &[M::NodeId],
    ) -> Result<Vec<PathRow<M::NodeId, M::RowId>>, ClosurePlanError>
    where
        C: ConnectionTrait + Send + Sync,
    {
        let store = SeaOrmPathStore::<M, C>::new(conn);
        let rows = plan.path_rows(&store, created).await?;
        store.bulk_create(&rows).await?;
        Ok(rows)
    }
}
