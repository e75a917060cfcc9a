mod common;

use closure_planner::{
    ClosurePlanError, ClosurePlanner, EditRequest, InsertionStep, ParentRef, PathStore,
};
use common::{forest, triples};

#[tokio::test]
async fn batch_is_ordered_parents_first() -> Result<(), ClosurePlanError> {
    let planner = ClosurePlanner::new(forest(&[("R", None), ("S", Some("R"))]));

    let plan = planner.plan_insertion(&[
        EditRequest::create(ParentRef::Pending(1)),
        EditRequest::create(ParentRef::Existing("S")),
        EditRequest::create(ParentRef::Root),
        EditRequest::create(ParentRef::Pending(0)),
    ])?;

    assert_eq!(
        plan.steps(),
        [
            InsertionStep { request: 1, parent: ParentRef::Existing("S") },
            InsertionStep { request: 2, parent: ParentRef::Root },
            InsertionStep { request: 0, parent: ParentRef::Pending(0) },
            InsertionStep { request: 3, parent: ParentRef::Pending(2) },
        ]
    );

    let created = ["n1", "n2", "n0", "n3"];
    assert_eq!(plan.parent_id(0, &created)?, Some("S"));
    assert_eq!(plan.parent_id(1, &created)?, None);
    assert_eq!(plan.parent_id(3, &created)?, Some("n0"));

    let rows = plan.path_rows(planner.store(), &created).await?;
    assert_eq!(
        triples(&rows),
        vec![
            ("R", "n1", 2),
            ("S", "n1", 1),
            ("n1", "n1", 0),
            ("n2", "n2", 0),
            ("R", "n0", 3),
            ("S", "n0", 2),
            ("n1", "n0", 1),
            ("n0", "n0", 0),
            ("R", "n3", 4),
            ("S", "n3", 3),
            ("n1", "n3", 2),
            ("n0", "n3", 1),
            ("n3", "n3", 0),
        ]
    );

    planner.store().bulk_create(&rows).await?;
    planner.store().check_consistency()?;
    let parents = planner.store().parent_map()?;
    assert_eq!(parents["n3"], Some("n0"));
    assert_eq!(parents["n2"], None);
    Ok(())
}

#[test]
fn positional_cycles_are_rejected() {
    let planner = ClosurePlanner::new(forest(&[]));

    let err = planner
        .plan_insertion(&[
            EditRequest::create(ParentRef::Pending(1)),
            EditRequest::create(ParentRef::Pending(0)),
        ])
        .unwrap_err();
    match err {
        ClosurePlanError::CycleDetected(path) => assert_eq!(path.to_string(), "0 -> 1 -> 0"),
        other => panic!("expected cycle, got {other:?}"),
    }

    let err = planner
        .plan_insertion(&[EditRequest::create(ParentRef::Pending(0))])
        .unwrap_err();
    assert!(matches!(err, ClosurePlanError::CycleDetected(_)));
}

#[test]
fn malformed_create_requests_are_rejected() {
    let planner = ClosurePlanner::new(forest(&[("R", None)]));

    let err = planner
        .plan_insertion(&[
            EditRequest::create(ParentRef::Root),
            EditRequest::create(ParentRef::Pending(5)),
        ])
        .unwrap_err();
    assert!(matches!(err, ClosurePlanError::InvalidRequest { index: 1, .. }));

    let err = planner
        .plan_insertion(&[EditRequest::edit("R", None)])
        .unwrap_err();
    assert!(matches!(err, ClosurePlanError::InvalidRequest { index: 0, .. }));
}

#[tokio::test]
async fn path_rows_need_known_parents_and_every_id() -> Result<(), ClosurePlanError> {
    let planner = ClosurePlanner::new(forest(&[("R", None)]));

    let plan = planner.plan_insertion(&[
        EditRequest::create(ParentRef::Existing("missing")),
        EditRequest::create(ParentRef::Pending(0)),
    ])?;

    let err = plan.path_rows(planner.store(), &["a"]).await.unwrap_err();
    assert!(matches!(err, ClosurePlanError::InconsistentState(_)));

    let err = plan.path_rows(planner.store(), &["a", "b"]).await.unwrap_err();
    assert!(matches!(err, ClosurePlanError::UnknownNode(ref id) if id == "\"missing\""));

    let err = plan.parent_id(1, &[]).unwrap_err();
    assert!(matches!(err, ClosurePlanError::InvalidRequest { index: 1, .. }));
    Ok(())
}

#[test]
fn plans_round_trip_through_json() -> Result<(), Box<dyn std::error::Error>> {
    let planner = ClosurePlanner::new(forest(&[]));
    let requests: Vec<EditRequest<&str>> = serde_json::from_str(
        r#"[{"parent": {"kind": "pending", "value": 1}}, {"parent": {"kind": "root"}}]"#,
    )?;

    let plan = planner.plan_insertion(&requests)?;
    let rendered = serde_json::to_value(&plan)?;
    assert_eq!(rendered["steps"][0]["request"], 1);
    assert_eq!(rendered["steps"][1]["parent"]["kind"], "pending");
    assert_eq!(rendered["steps"][1]["parent"]["value"], 0);
    Ok(())
}
