mod common;

use closure_planner::{
    AdvisoryLockStrategy, ClosurePathModel, ClosurePathOptions, ClosurePathRepository,
    ClosurePlanError, ClosurePlanner, Depth, EditRequest, ParentLookup, ParentRef, PathRow,
    PathStore, SeaOrmPathStore,
};
use sea_orm::{DatabaseBackend, DbErr, MockDatabase, MockExecResult, RuntimeErr};

mod entity {
    pub mod node_path {
        use closure_planner::ClosurePathModelDerive as ClosurePathModel;
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, DeriveEntityModel, ClosurePathModel)]
        #[sea_orm(table_name = "node_paths")]
        #[closure_path(entity_name = "NodePath")]
        pub struct Model {
            #[sea_orm(primary_key)]
            pub id: i64,
            pub ancestor_id: i32,
            pub descendant_id: i32,
            pub depth: i32,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }
}

use entity::node_path;

fn row(id: i64, ancestor_id: i32, descendant_id: i32, depth: i32) -> node_path::Model {
    node_path::Model {
        id,
        ancestor_id,
        descendant_id,
        depth,
    }
}

fn exec(rows_affected: u64) -> MockExecResult {
    MockExecResult {
        last_insert_id: 0,
        rows_affected,
    }
}

#[test]
fn derive_builds_entity_config() {
    let config = node_path::Model::closure_path_config();
    assert_eq!(config.entity_name(), "NodePath");
    assert_eq!(config.table_name(), "node_paths");
    assert!(config.advisory_lock_strategy().key().is_some());

    let unlocked = ClosurePathOptions::default()
        .advisory_lock_strategy(AdvisoryLockStrategy::Disabled)
        .apply(config.clone());
    assert_eq!(unlocked.table_name(), "node_paths");
    assert!(unlocked.advisory_lock_strategy().key().is_none());

    let model = row(4, 1, 3, 1);
    assert_eq!(model.to_path_row(), PathRow::new(1, 3, 1).with_id(4));
}

#[tokio::test]
async fn ancestors_come_back_root_first() -> Result<(), ClosurePlanError> {
    common::init_tracing();
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![row(7, 1, 3, 2), row(8, 2, 3, 1), row(9, 3, 3, 0)]])
        .into_connection();
    let store = SeaOrmPathStore::<node_path::Model, _>::new(&db);

    let chain = store.scan_ancestors(&3, 0, Depth::MAX).await?;
    assert_eq!(chain, vec![(1, 2), (2, 1), (3, 0)]);
    Ok(())
}

#[tokio::test]
async fn parents_of_a_batch_come_from_one_query() -> Result<(), ClosurePlanError> {
    common::init_tracing();
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![row(4, 1, 3, 1), row(2, 2, 2, 0), row(3, 3, 3, 0)]])
        .into_connection();
    let store = SeaOrmPathStore::<node_path::Model, _>::new(&db);

    let parents = store.scan_parents(&[3, 2, 9]).await?;
    assert_eq!(parents[&3], ParentLookup::Parent(1));
    assert_eq!(parents[&2], ParentLookup::Root);
    assert_eq!(parents[&9], ParentLookup::Unknown);

    let log = db.into_transaction_log();
    assert_eq!(log.len(), 1);
    let query = format!("{:?}", log[0]);
    assert!(query.contains("IN"), "{query}");
    Ok(())
}

#[tokio::test]
async fn edit_batch_is_planned_and_written_through_sea_orm() -> Result<(), ClosurePlanError> {
    common::init_tracing();
    // A=1, B=2, C=3 with C under A; move C under B
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([
            // current parent of C
            vec![row(4, 1, 3, 1), row(3, 3, 3, 0)],
            // ancestors of the new parent B
            vec![row(2, 2, 2, 0)],
            // pending edits above B
            vec![],
            // ancestors of the old parent A
            vec![row(1, 1, 1, 0)],
            // subtree of C
            vec![row(3, 3, 3, 0)],
            // rows owned by the edit
            vec![row(4, 1, 3, 1)],
        ])
        .append_exec_results([exec(1)])
        .into_connection();

    let planner = ClosurePlanner::new(SeaOrmPathStore::<node_path::Model, _>::new(&db));
    let plan = planner.plan_update(&[EditRequest::edit(3, Some(2))]).await?;
    assert_eq!(plan.changes.update, vec![PathRow::new(2, 3, 1).with_id(4)]);
    assert!(plan.changes.create.is_empty() && plan.changes.delete.is_empty());

    planner.store().apply(&plan.changes).await?;

    let log = db.into_transaction_log();
    assert_eq!(log.len(), 7);
    let last = format!("{:?}", log[6]);
    assert!(last.contains("UPDATE"), "{last}");
    assert!(last.contains("node_paths"), "{last}");
    Ok(())
}

#[tokio::test]
async fn short_writes_are_reported() {
    common::init_tracing();
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_exec_results([exec(1), exec(0)])
        .into_connection();
    let store = SeaOrmPathStore::<node_path::Model, _>::new(&db);

    let rows = [
        PathRow::new(1, 3, 1).with_id(4),
        PathRow::new(1, 4, 2).with_id(5),
    ];
    let err = store.bulk_delete(&rows).await.unwrap_err();
    assert!(matches!(err, ClosurePlanError::InconsistentState(_)), "{err:?}");

    let err = store.bulk_update(&rows[..1]).await.unwrap_err();
    assert!(matches!(err, ClosurePlanError::InconsistentState(_)), "{err:?}");

    let err = store.bulk_update(&[PathRow::new(1, 3, 1)]).await.unwrap_err();
    assert!(matches!(err, ClosurePlanError::InconsistentState(_)), "{err:?}");
}

#[tokio::test]
async fn lost_connections_are_transient() {
    common::init_tracing();
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_errors([DbErr::Conn(RuntimeErr::Internal("connection reset".into()))])
        .into_connection();
    let store = SeaOrmPathStore::<node_path::Model, _>::new(&db);

    let err = store.scan_descendants(&[1]).await.unwrap_err();
    assert!(matches!(err, ClosurePlanError::StoreUnavailable(_)), "{err:?}");
    assert!(err.is_transient());
}

#[tokio::test]
async fn insertion_rows_are_written_under_the_advisory_lock() -> Result<(), ClosurePlanError> {
    common::init_tracing();
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        // lock, insert, unlock
        .append_exec_results([exec(1), exec(2), exec(1)])
        .into_connection();

    let repo = ClosurePathRepository::<node_path::Model>::new();
    let planner = ClosurePlanner::new(SeaOrmPathStore::<node_path::Model, _>::new(&db));
    let plan = planner.plan_insertion(&[
        EditRequest::create(ParentRef::Pending(1)),
        EditRequest::create(ParentRef::Root),
    ])?;

    let rows = repo.apply_insertion(&db, &plan, &[10, 11]).await?;
    let triples: Vec<(i32, i32, i32)> = rows
        .iter()
        .map(|row| (row.ancestor, row.descendant, row.depth))
        .collect();
    assert_eq!(triples, vec![(10, 10, 0), (10, 11, 1), (11, 11, 0)]);
    Ok(())
}
