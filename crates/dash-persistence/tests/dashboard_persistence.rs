use dash_domain::{RawEvent, WorkflowHostMap, WorkflowRecord, WorkflowState, WorkflowStateRecord};
use loader::{DashboardLoader, DashboardRepository, LoadError, LoaderConfig, Resolution};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

// Use a temporary file-backed SQLite DB for tests to avoid URI parsing
// options problems with different sqlite builds.
fn temp_repo() -> (dash_persistence::DieselDashboardRepository, std::path::PathBuf) {
  let tmp_path = std::env::temp_dir().join(format!("dash_test_{}.db", Uuid::new_v4()));
  let db_url = tmp_path.to_str().expect("temp path").to_string();
  let repo = dash_persistence::new_sqlite_for_test(&db_url).expect("failed to create repo");
  (repo, tmp_path)
}

fn skip_on_pg() -> bool {
  // If the crate was built with the `pg` feature, skip the sqlite-only
  // tests at runtime.
  if cfg!(feature = "pg") {
    eprintln!("skipping sqlite-only persistence test because 'pg' feature is enabled");
    return true;
  }
  false
}

fn workflow(uuid: &str) -> WorkflowRecord {
  WorkflowRecord { wf_uuid: uuid.to_string(),
                   root_xwf_id: Some(uuid.to_string()),
                   timestamp: Some(100.0),
                   dax_label: Some("diamond".to_string()),
                   user: Some("vahi".to_string()),
                   ..WorkflowRecord::default() }
}

fn state(wf_id: i64, st: WorkflowState, ts: f64) -> WorkflowStateRecord {
  WorkflowStateRecord { wf_uuid: String::new(),
                        wf_id: Some(wf_id),
                        state: Some(st),
                        timestamp: Some(ts),
                        restart_count: Some(0),
                        status: if st == WorkflowState::Terminated { Some(0) } else { None },
                        ..WorkflowStateRecord::default() }
}

#[test]
fn workflow_insert_resolve_and_root_backfill() {
  if skip_on_pg() {
    return;
  }
  let (repo, tmp) = temp_repo();

  let wf = workflow("6b3305ac-4d2b-44b0-9a54-1b8e51c45fe4");
  let wf_id = repo.insert_workflow(&wf).expect("insert workflow");

  // resolution finds exactly the inserted row
  match repo.workflow_id_by_uuid(&wf.wf_uuid).expect("resolve") {
    Resolution::One(id) => assert_eq!(id, wf_id),
    other => panic!("expected one result, got {:?}", other),
  }
  assert_eq!(repo.workflow_id_by_uuid("unknown").expect("resolve"), Resolution::NotFound);

  // before the backfill the root id is indistinguishable from no result
  assert_eq!(repo.root_id_by_uuid(&wf.wf_uuid).expect("resolve"), Resolution::NotFound);
  repo.set_root_workflow(wf_id, wf_id).expect("backfill");
  assert_eq!(repo.root_id_by_uuid(&wf.wf_uuid).expect("resolve"), Resolution::One(wf_id));

  // a second row with the same UUID violates the unique constraint
  match repo.insert_workflow(&wf) {
    Err(LoadError::Integrity(_)) => {}
    other => panic!("expected integrity error, got {:?}", other),
  }

  let _ = std::fs::remove_file(tmp);
}

#[test]
fn state_rows_enforce_composite_uniqueness_and_not_null() {
  if skip_on_pg() {
    return;
  }
  let (repo, tmp) = temp_repo();

  let wf_id = repo.insert_workflow(&workflow("u-1")).expect("insert workflow");
  repo.insert_state(&state(wf_id, WorkflowState::Started, 101.0)).expect("insert state");

  match repo.insert_state(&state(wf_id, WorkflowState::Started, 101.0)) {
    Err(LoadError::Integrity(_)) => {}
    other => panic!("expected integrity error, got {:?}", other),
  }

  // an unresolved FK never reaches the database
  let mut orphan = state(wf_id, WorkflowState::Terminated, 200.0);
  orphan.wf_id = None;
  match repo.insert_state(&orphan) {
    Err(LoadError::Integrity(_)) => {}
    other => panic!("expected integrity error, got {:?}", other),
  }

  let _ = std::fs::remove_file(tmp);
}

#[test]
fn batch_commit_is_all_or_nothing() {
  if skip_on_pg() {
    return;
  }
  let (repo, tmp) = temp_repo();

  let wf_id = repo.insert_workflow(&workflow("u-1")).expect("insert workflow");
  let batch = vec![state(wf_id, WorkflowState::Started, 101.0),
                   state(wf_id, WorkflowState::Started, 102.0),
                   state(wf_id, WorkflowState::Started, 101.0)];

  match repo.commit_batch(&batch, &[]) {
    Err(LoadError::Integrity(_)) => {}
    other => panic!("expected integrity error, got {:?}", other),
  }
  let (_, states) = repo.dump_tables_for_debug().expect("dump");
  assert!(states.is_empty(), "the failed bulk commit must not leave rows behind");

  repo.commit_batch(&batch[..2], &[]).expect("clean batch");
  let (_, states) = repo.dump_tables_for_debug().expect("dump");
  assert_eq!(states.len(), 2);

  let _ = std::fs::remove_file(tmp);
}

#[test]
fn merge_updates_the_existing_row_by_uuid() {
  if skip_on_pg() {
    return;
  }
  let (repo, tmp) = temp_repo();

  let wf_id = repo.insert_workflow(&workflow("u-1")).expect("insert workflow");
  repo.set_root_workflow(wf_id, wf_id).expect("backfill");

  let mut merged = workflow("u-1");
  merged.dax_label = Some("relabeled".to_string());
  merged.root_wf_id = Some(wf_id);
  repo.merge_workflow(&merged).expect("merge");

  let (wfs, _) = repo.dump_tables_for_debug().expect("dump");
  assert_eq!(wfs.len(), 1, "merge must not create a second row");
  assert_eq!(wfs[0].wf_id, wf_id);
  assert_eq!(wfs[0].dax_label.as_deref(), Some("relabeled"));
  assert_eq!(wfs[0].root_wf_id, Some(wf_id));

  let _ = std::fs::remove_file(tmp);
}

#[test]
fn host_maps_are_unique_per_workflow_and_host() {
  if skip_on_pg() {
    return;
  }
  let (repo, tmp) = temp_repo();

  let wf_id = repo.insert_workflow(&workflow("u-1")).expect("insert workflow");
  let map = WorkflowHostMap { wf_id, host: "node-1".to_string() };
  repo.insert_host_map(&map).expect("insert host map");
  match repo.insert_host_map(&map) {
    Err(LoadError::Integrity(_)) => {}
    other => panic!("expected integrity error, got {:?}", other),
  }

  let _ = std::fs::remove_file(tmp);
}

#[test]
fn probe_succeeds_on_a_healthy_connection() {
  if skip_on_pg() {
    return;
  }
  let (repo, tmp) = temp_repo();
  repo.probe().expect("probe");
  let _ = std::fs::remove_file(tmp);
}

#[test]
fn loader_lifecycle_runs_end_to_end_over_sqlite() {
  if skip_on_pg() {
    return;
  }
  let (repo, tmp) = temp_repo();
  let repo = Arc::new(repo);
  let mut loader = DashboardLoader::new(Arc::clone(&repo), LoaderConfig::default());

  let events = [json!({
                  "event": "dashboard.wf.plan",
                  "xwf.id": "A",
                  "root.xwf.id": "A",
                  "ts": 100.0,
                  "user": "vahi",
                  "dax.label": "diamond"
                }),
                json!({"event": "dashboard.xwf.start", "xwf.id": "A", "ts": 101.0}),
                json!({"event": "dashboard.xwf.end", "xwf.id": "A", "ts": 200.0, "status": 0})];
  for ev in &events {
    let raw = RawEvent::from_json(ev).expect("raw event");
    loader.process(&raw);
  }

  let (wfs, states) = repo.dump_tables_for_debug().expect("dump");
  assert_eq!(wfs.len(), 1);
  assert_eq!(wfs[0].wf_uuid, "A");
  assert_eq!(wfs[0].root_wf_id, Some(wfs[0].wf_id));
  assert_eq!(states.len(), 2);
  assert_eq!(states[0].state, "WORKFLOW_STARTED");
  assert_eq!(states[0].timestamp, 101.0);
  assert_eq!(states[1].state, "WORKFLOW_TERMINATED");
  assert_eq!(states[1].timestamp, 200.0);
  assert!(loader.wf_id_cache().is_empty());

  loader.finish().expect("finish");

  let _ = std::fs::remove_file(tmp);
}
