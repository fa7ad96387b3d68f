use std::{fs, path::Path};

use rusqlite::Connection;
use scenario_workbench::{
    aggregate::{aggregate, diff, save_comparison, Delta, Target},
    scenario::{ModificationRequest, SnapshotStore},
    value::Cell,
    WorkbenchError,
};

async fn project(dir: &Path) -> SnapshotStore {
    let seed = dir.join("seed.db");
    let conn = Connection::open(&seed).expect("open seed");
    conn.execute_batch(
        "CREATE TABLE hubs (Location TEXT, Demand INTEGER);
         INSERT INTO hubs VALUES ('London', 5000), ('Leeds', 3000);",
    )
    .expect("seed");
    drop(conn);

    let store = SnapshotStore::open(&dir.join("project")).expect("open");
    store.create("R", None, Some(&seed)).await.expect("root");
    store
}

async fn branch_with_london(store: &SnapshotStore, name: &str, demand: i64) {
    let root = store.resolve("R").expect("root");
    let branch = store.create(name, Some(&root.id), None).await.expect("branch");
    let edit = ModificationRequest::set("hubs", "Demand", Cell::Integer(demand))
        .filtered("Location", Cell::Text("London".into()));
    store.apply_modification(&branch.id, &edit).await.expect("modify");
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn branches_are_tagged_and_kept_in_caller_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = project(dir.path()).await;
    branch_with_london(&store, "T", 7000).await;

    let set = aggregate(
        &store,
        &names(&["R", "T"]),
        &Target::parse("hubs"),
        &names(&["Location", "Demand"]),
        &[],
    )
    .expect("aggregate");

    assert_eq!(set.columns, names(&["Location", "Demand"]));
    let tagged: Vec<(String, Cell, Cell)> = set
        .rows
        .iter()
        .map(|r| (r.scenario_name.clone(), r.cells[0].clone(), r.cells[1].clone()))
        .collect();
    assert_eq!(
        tagged,
        vec![
            ("R".into(), Cell::Text("London".into()), Cell::Integer(5000)),
            ("R".into(), Cell::Text("Leeds".into()), Cell::Integer(3000)),
            ("T".into(), Cell::Text("London".into()), Cell::Integer(7000)),
            ("T".into(), Cell::Text("Leeds".into()), Cell::Integer(3000)),
        ]
    );

    let reversed = aggregate(&store, &names(&["T", "R"]), &Target::parse("hubs"), &[], &[]).expect("aggregate");
    assert_eq!(reversed.rows[0].scenario_name, "T");
    assert_eq!(reversed.baseline(), Some("T"));
}

#[tokio::test]
async fn schema_drift_is_reconciled_with_nulls() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = project(dir.path()).await;
    branch_with_london(&store, "T", 7000).await;
    let t = store.resolve("T").expect("t");
    Connection::open(&t.snapshot_path)
        .expect("open")
        .execute_batch("ALTER TABLE hubs ADD COLUMN Cost REAL; ALTER TABLE hubs ADD COLUMN Area TEXT; UPDATE hubs SET Cost = 1.5;")
        .expect("alter");

    let refs = names(&["R", "T"]);
    let first = aggregate(&store, &refs, &Target::parse("hubs"), &names(&["Location"]), &names(&["Demand"]))
        .expect("aggregate");
    assert_eq!(first.columns, names(&["Location", "Demand", "Area", "Cost"]));
    let cost = first.column_index("Cost").expect("cost column");
    assert!(first.rows_for("R").all(|r| r.cells[cost].is_null()));
    assert!(first.rows_for("T").all(|r| r.cells[cost] == Cell::Real(1.5)));

    let second = aggregate(&store, &refs, &Target::parse("hubs"), &names(&["Location"]), &names(&["Demand"]))
        .expect("aggregate");
    assert_eq!(first, second);
}

#[tokio::test]
async fn missing_required_column_fails_naming_the_scenario() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = project(dir.path()).await;
    branch_with_london(&store, "T", 7000).await;
    let t = store.resolve("T").expect("t");
    Connection::open(&t.snapshot_path)
        .expect("open")
        .execute_batch("ALTER TABLE hubs ADD COLUMN Cost REAL;")
        .expect("alter");

    let err = aggregate(&store, &names(&["T", "R"]), &Target::parse("hubs"), &names(&["Cost"]), &[])
        .expect_err("R lacks Cost");
    match err.downcast_ref::<WorkbenchError>() {
        Some(WorkbenchError::MissingColumn { scenario, column, available, .. }) => {
            assert_eq!(scenario, "R");
            assert_eq!(column, "Cost");
            assert_eq!(available, &names(&["Location", "Demand"]));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn unopenable_snapshot_fails_the_whole_aggregation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = project(dir.path()).await;
    branch_with_london(&store, "T", 7000).await;
    let t = store.resolve("T").expect("t");
    fs::remove_file(&t.snapshot_path).expect("remove");

    let err = aggregate(&store, &names(&["R", "T"]), &Target::parse("hubs"), &[], &[]).expect_err("must fail");
    assert!(matches!(
        err.downcast_ref::<WorkbenchError>(),
        Some(WorkbenchError::SnapshotUnavailable { scenario, .. }) if scenario == "T"
    ));
}

#[tokio::test]
async fn missing_table_and_unknown_scenario_are_structural() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = project(dir.path()).await;
    branch_with_london(&store, "T", 7000).await;

    let err = aggregate(&store, &names(&["R", "T"]), &Target::parse("depots"), &[], &[]).expect_err("no table");
    assert!(err.to_string().contains("available tables: hubs"));

    let err = aggregate(&store, &names(&["R", "Ghost"]), &Target::parse("hubs"), &[], &[]).expect_err("unknown");
    assert!(matches!(
        err.downcast_ref::<WorkbenchError>(),
        Some(WorkbenchError::UnknownScenario { .. })
    ));
}

#[tokio::test]
async fn queries_run_against_every_snapshot() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = project(dir.path()).await;
    branch_with_london(&store, "T", 7000).await;

    let target = Target::parse("SELECT SUM(Demand) AS Total FROM hubs");
    let set = aggregate(&store, &names(&["R", "T"]), &target, &names(&["Total"]), &[]).expect("aggregate");
    let totals: Vec<Cell> = set.rows.iter().map(|r| r.cells[0].clone()).collect();
    assert_eq!(totals, vec![Cell::Integer(8000), Cell::Integer(10000)]);

    let write = Target::Query("DELETE FROM hubs".into());
    assert!(aggregate(&store, &names(&["R", "T"]), &write, &[], &[]).is_err());
    let r = store.resolve("R").expect("r");
    assert_eq!(store.schema(&r).expect("schema")[0].row_count, 2);
}

#[tokio::test]
async fn diff_and_saved_comparison() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = project(dir.path()).await;
    branch_with_london(&store, "T", 7000).await;

    let set = aggregate(
        &store,
        &names(&["R", "T"]),
        &Target::parse("hubs"),
        &names(&["Location", "Demand"]),
        &[],
    )
    .expect("aggregate");
    let deltas = diff(&set, "Location", &names(&["Demand"])).expect("diff");
    assert_eq!(deltas.len(), 2);
    assert_eq!(deltas[0].scenario_name, "T");
    assert!(matches!(deltas[0].delta, Delta::Change { absolute, .. } if absolute == 2000.0));
    assert!(matches!(deltas[1].delta, Delta::Change { absolute, .. } if absolute == 0.0));

    let r = store.resolve("R").expect("r");
    let record = save_comparison(&store, &r, "London demand", &set, Some(&deltas), Some("7000 vs 5000"))
        .expect("save");
    let path = record.output_path.clone().expect("path");
    assert!(path.starts_with(r.directory()));
    let saved: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
    assert_eq!(saved["comparison_kind"], "diff");
    assert_eq!(saved["result"]["rows"].as_array().map(Vec::len), Some(4));

    let history = store.db().list_comparisons(10).expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].scenario_names, names(&["R", "T"]));
    assert_eq!(history[0].description.as_deref(), Some("7000 vs 5000"));
}
