use dash_domain::{RawEvent, WorkflowHostMap, WorkflowState};
use loader::{DashboardLoader, InMemoryDashboardRepository, LoaderConfig};
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn raw(value: serde_json::Value) -> RawEvent {
    RawEvent::from_json(&value).expect("raw event")
}

fn plan_event(uuid: &str, ts: f64) -> RawEvent {
    raw(json!({
        "event": "dashboard.wf.plan",
        "xwf.id": uuid,
        "root.xwf.id": uuid,
        "ts": ts
    }))
}

fn start_event(uuid: &str, ts: f64) -> RawEvent {
    raw(json!({
        "event": "dashboard.xwf.start",
        "xwf.id": uuid,
        "ts": ts
    }))
}

fn end_event(uuid: &str, ts: f64) -> RawEvent {
    raw(json!({
        "event": "dashboard.xwf.end",
        "xwf.id": uuid,
        "ts": ts,
        "status": 0
    }))
}

fn batch_config(flush_every: usize) -> LoaderConfig {
    LoaderConfig { batch: true,
                   flush_every,
                   reconnect_pause: Duration::from_millis(1),
                   ..LoaderConfig::default() }
}

fn new_loader(config: LoaderConfig) -> (Arc<InMemoryDashboardRepository>, DashboardLoader<InMemoryDashboardRepository>) {
    let repo = Arc::new(InMemoryDashboardRepository::new());
    let loader = DashboardLoader::new(Arc::clone(&repo), config);
    (repo, loader)
}

#[test]
fn workflow_rows_commit_immediately_even_when_batching() {
    let (repo, mut loader) = new_loader(batch_config(100));

    loader.process(&plan_event("A", 100.0));
    // the workflow row and its root backfill bypass the batch buffer
    let workflows = repo.workflows();
    assert_eq!(workflows.len(), 1);
    assert_eq!(workflows[0].record.root_wf_id, Some(workflows[0].wf_id));
    assert_eq!(loader.queued_inserts(), 0);
}

#[test]
fn flushes_when_the_queue_reaches_the_threshold() {
    let (repo, mut loader) = new_loader(batch_config(3));

    loader.process(&plan_event("A", 100.0));
    loader.process(&start_event("A", 101.0));
    loader.process(&start_event("A", 102.0));
    assert_eq!(loader.queued_inserts(), 2);
    assert!(repo.states().is_empty());

    loader.process(&start_event("A", 103.0));
    assert_eq!(loader.queued_inserts(), 0);
    assert_eq!(repo.states().len(), 3);
}

#[test]
fn default_threshold_flushes_every_queued_event() {
    let (repo, mut loader) = new_loader(batch_config(1));

    loader.process(&plan_event("A", 100.0));
    loader.process(&start_event("A", 101.0));
    assert_eq!(loader.queued_inserts(), 0);
    assert_eq!(repo.states().len(), 1);
}

#[test]
fn flushes_on_elapsed_time_under_low_event_rates() {
    let mut config = batch_config(100);
    config.flush_interval = Duration::from_millis(5);
    let (repo, mut loader) = new_loader(config);

    loader.process(&plan_event("A", 100.0));
    loader.process(&start_event("A", 101.0));
    assert_eq!(loader.queued_inserts(), 1);

    thread::sleep(Duration::from_millis(10));
    loader.process(&start_event("A", 102.0));
    // below the count threshold, but past the staleness bound
    assert_eq!(loader.queued_inserts(), 0);
    assert_eq!(repo.states().len(), 2);
}

#[test]
fn degraded_commit_preserves_the_valid_records_of_a_contaminated_batch() {
    let (repo, mut loader) = new_loader(batch_config(10));

    loader.process(&plan_event("A", 100.0));
    for i in 0..9 {
        loader.process(&start_event("A", 101.0 + i as f64));
    }
    // a duplicate of the first state row contaminates the batch
    loader.process(&start_event("A", 101.0));
    assert_eq!(loader.queued_inserts(), 0);

    // nine rows persisted, exactly one reported failure - not zero
    assert_eq!(repo.states().len(), 9);
}

#[test]
fn batched_termination_invalidates_caches_after_the_flush() {
    let (repo, mut loader) = new_loader(batch_config(2));

    loader.process(&plan_event("A", 100.0));
    loader.process(&start_event("A", 101.0));
    assert!(loader.wf_id_cache().contains("A"));

    loader.process(&end_event("A", 200.0));
    assert_eq!(repo.states().len(), 2);
    assert!(!loader.wf_id_cache().contains("A"));
    assert!(!loader.root_id_cache().contains("A"));
}

#[test]
fn connection_loss_during_flush_retries_the_whole_flush() {
    let (repo, mut loader) = new_loader(batch_config(2));

    loader.process(&plan_event("A", 100.0));
    loader.process(&start_event("A", 101.0));

    repo.inject_connection_faults(1);
    loader.process(&end_event("A", 200.0));

    // the bulk commit failed once, the flush was re-attempted from the top
    assert_eq!(repo.reconnect_count(), 1);
    let states = repo.states();
    assert_eq!(states.len(), 2);
    assert_eq!(states[0].state, Some(WorkflowState::Started));
    assert_eq!(states[1].state, Some(WorkflowState::Terminated));
    assert_eq!(loader.queued_inserts(), 0);
}

#[test]
fn finish_forces_a_final_flush_and_releases_the_connection() {
    let (repo, mut loader) = new_loader(batch_config(100));

    loader.process(&plan_event("A", 100.0));
    loader.process(&start_event("A", 101.0));
    loader.process(&end_event("A", 200.0));
    assert_eq!(loader.queued_inserts(), 2);
    assert!(repo.states().is_empty());

    loader.finish().expect("finish");
    assert_eq!(repo.states().len(), 2);
    assert_eq!(loader.queued_inserts(), 0);
    assert!(repo.is_closed());
}

#[test]
fn update_and_host_map_queues_flush_with_the_batch() {
    let (repo, mut loader) = new_loader(batch_config(100));

    loader.process(&plan_event("A", 100.0));
    let workflows = repo.workflows();
    let stored = &workflows[0];
    let wf_id = stored.wf_id;
    let mut updated = stored.record.clone();
    updated.dax_label = Some("relabeled".to_string());

    loader.enqueue_update(updated).expect("enqueue update");
    loader.enqueue_host_map(WorkflowHostMap { wf_id, host: "node-1".to_string() }).expect("enqueue host map");
    assert_eq!(loader.queued_updates(), 1);
    assert_eq!(loader.queued_host_maps(), 1);

    loader.hard_flush().expect("flush");
    assert_eq!(loader.queued_updates(), 0);
    assert_eq!(loader.queued_host_maps(), 0);

    let workflows = repo.workflows();
    assert_eq!(workflows[0].record.dax_label.as_deref(), Some("relabeled"));
    assert_eq!(workflows[0].record.root_wf_id, Some(wf_id), "merge keeps the backfilled root id");
    let maps = repo.host_maps();
    assert_eq!(maps.len(), 1);
    assert_eq!(maps[0].host, "node-1");
}

#[test]
fn without_batching_updates_and_host_maps_commit_inline() {
    let (repo, mut loader) = new_loader(LoaderConfig { reconnect_pause: Duration::from_millis(1),
                                                       ..LoaderConfig::default() });

    loader.process(&plan_event("A", 100.0));
    let workflows = repo.workflows();
    let stored = &workflows[0];
    let wf_id = stored.wf_id;
    let mut updated = stored.record.clone();
    updated.planner_version = Some("5.0.1".to_string());

    loader.enqueue_update(updated).expect("merge");
    loader.enqueue_host_map(WorkflowHostMap { wf_id, host: "node-2".to_string() }).expect("host map");

    assert_eq!(repo.workflows()[0].record.planner_version.as_deref(), Some("5.0.1"));
    assert_eq!(repo.host_maps().len(), 1);
}
