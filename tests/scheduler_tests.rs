//! End-to-end scheduler behavior against the in-memory store.
//!
//! Each test seeds a hash inventory the way the upload, dispatch and
//! ingestion roles would leave it, runs one or more cycles, and checks the
//! resulting statuses and export files.

mod common;

use hashlist_consolidator::db::HashlistStatus;
use hashlist_consolidator::store::memory::MemoryStore;
use hashlist_consolidator::store::HashStore;
use hashlist_consolidator::{CycleOutcome, Scheduler, SchedulerConfig, DELIMITER};
use std::sync::Arc;
use std::time::Duration;

fn scheduler(store: &Arc<MemoryStore>, tmp: &std::path::Path) -> Scheduler {
    Scheduler::new(
        Arc::clone(store) as Arc<dyn HashStore>,
        SchedulerConfig::new(Duration::from_millis(10), tmp),
    )
}

fn built(outcome: CycleOutcome) -> hashlist_consolidator::builder::BuildReport {
    match outcome {
        CycleOutcome::Built(report) => report,
        other => panic!("expected a build, got {:?}", other),
    }
}

#[tokio::test]
async fn two_uploads_consolidate_into_one_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.add_alg(1, "MD5");
    let first = store.add_hashlist("leak-1", 1, false);
    let second = store.add_hashlist("leak-2", 1, false);
    store.add_hash(first, "h1", None, false);
    store.add_hash(first, "h2", None, false);
    store.add_hash(second, "h3", None, false);
    let common = store.add_common_hashlist(1, false);
    let before = store.hashlist(common).unwrap();

    let report = built(scheduler(&store, dir.path()).run_cycle().await.unwrap());

    assert_eq!(report.hashlist_id, common);
    assert_eq!(report.alg_id, 1);
    assert_eq!(std::fs::read_to_string(&report.path).unwrap(), "h1\nh2\nh3\n");

    let after = store.hashlist(common).unwrap();
    assert_eq!(after.status().unwrap(), HashlistStatus::Wait);
    assert_eq!(after.tmp_path, report.path.to_str().unwrap());
    assert_ne!(after.tmp_path, before.tmp_path);
    assert!(after.when_loaded >= before.when_loaded);
    assert_eq!(
        store.status_history(common),
        vec![HashlistStatus::Parsing, HashlistStatus::Wait]
    );
}

#[tokio::test]
async fn common_list_is_created_on_first_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.add_alg(100, "SHA1");
    let up = store.add_hashlist("up", 100, false);
    store.add_hash(up, "h1", None, false);

    let s = scheduler(&store, dir.path());
    let report = built(s.run_cycle().await.unwrap());

    assert_eq!(store.common_hashlists(100), vec![report.hashlist_id]);
    assert_eq!(store.hashlist(report.hashlist_id).unwrap().name, "All-SHA1");
}

#[tokio::test]
async fn unchanged_coverage_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.add_alg(1, "MD5");
    let up = store.add_hashlist("up", 1, false);
    store.add_hash(up, "h1", None, false);
    store.add_hash(up, "h2", None, false);
    let s = scheduler(&store, dir.path());

    let report = built(s.run_cycle().await.unwrap());
    common::load_export_into(&store, report.hashlist_id, &report.path);
    let history_len = store.status_history(report.hashlist_id).len();
    let files = common::files_in(dir.path());

    assert_eq!(s.run_cycle().await.unwrap(), CycleOutcome::Idle);
    assert_eq!(store.status_history(report.hashlist_id).len(), history_len);
    assert_eq!(common::files_in(dir.path()), files);
}

#[tokio::test]
async fn new_upload_triggers_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.add_alg(1, "MD5");
    let up = store.add_hashlist("up", 1, false);
    store.add_hash(up, "h1", None, false);
    let s = scheduler(&store, dir.path());

    let first = built(s.run_cycle().await.unwrap());
    common::load_export_into(&store, first.hashlist_id, &first.path);

    let later = store.add_hashlist("later", 1, false);
    store.add_hash(later, "h2", None, false);
    let second = built(s.run_cycle().await.unwrap());

    assert_eq!(second.hashlist_id, first.hashlist_id);
    assert_ne!(second.path, first.path);
    assert_eq!(std::fs::read_to_string(&second.path).unwrap(), "h1\nh2\n");
}

#[tokio::test]
async fn common_list_in_work_is_never_selected() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.add_alg(1, "MD5");
    let up = store.add_hashlist("up", 1, false);
    store.add_hash(up, "h1", None, false);
    let common = store.add_common_hashlist(1, false);
    // Status still reads ready; only the task row says it is being cracked.
    store.add_task_work(common, "work");

    let s = scheduler(&store, dir.path());
    assert_eq!(s.run_cycle().await.unwrap(), CycleOutcome::Idle);
    assert!(store.status_history(common).is_empty());
    assert!(common::files_in(dir.path()).is_empty());
}

#[tokio::test]
async fn results_being_ingested_defer_the_algorithm() {
    for task_status in ["waitoutparse", "outparsing"] {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.add_alg(1, "MD5");
        let up = store.add_hashlist("up", 1, false);
        let other = store.add_hashlist("other", 1, false);
        store.add_hash(up, "h1", None, false);
        store.add_task_work(other, task_status);

        let s = scheduler(&store, dir.path());
        assert_eq!(
            s.run_cycle().await.unwrap(),
            CycleOutcome::Idle,
            "alg with a task in {} must be deferred",
            task_status
        );
        assert!(common::files_in(dir.path()).is_empty());
    }
}

#[tokio::test]
async fn non_ready_common_list_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.add_alg(1, "MD5");
    let up = store.add_hashlist("up", 1, false);
    store.add_hash(up, "h1", None, false);
    let common = store.add_common_hashlist(1, false);
    store.set_hashlist_status(common, HashlistStatus::Wait);

    let s = scheduler(&store, dir.path());
    assert_eq!(s.run_cycle().await.unwrap(), CycleOutcome::Idle);
    assert_eq!(
        store.hashlist_status(common).await.unwrap(),
        Some(HashlistStatus::Wait)
    );
}

#[tokio::test]
async fn salted_algorithm_exports_delimited_lines() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.add_alg(10, "md5($s.$p)");
    let salted = store.add_hashlist("salted", 10, true);
    store.add_hash(salted, "aa", Some("x1"), false);
    store.add_hash(salted, "bb", Some("x2"), false);
    store.add_hash(salted, "", Some(""), false);

    let report = built(scheduler(&store, dir.path()).run_cycle().await.unwrap());
    let content = std::fs::read_to_string(&report.path).unwrap();

    assert_eq!(
        content,
        format!("aa{d}x1\nbb{d}x2\n", d = DELIMITER)
    );
    assert!(content.lines().all(|l| !l.is_empty() && l != DELIMITER));
}

#[tokio::test]
async fn one_build_per_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.add_alg(1, "MD5");
    store.add_alg(2, "SHA1");
    let a = store.add_hashlist("a", 1, false);
    let b = store.add_hashlist("b", 2, false);
    store.add_hash(a, "h1", None, false);
    store.add_hash(b, "h2", None, false);
    let s = scheduler(&store, dir.path());

    let first = built(s.run_cycle().await.unwrap());
    assert_eq!(first.alg_id, 1);
    assert_eq!(common::files_in(dir.path()).len(), 1);

    // Alg 1's list now sits in `wait`, so the next cycle moves on to alg 2.
    let second = built(s.run_cycle().await.unwrap());
    assert_eq!(second.alg_id, 2);
    assert_eq!(common::files_in(dir.path()).len(), 2);
}

#[tokio::test]
async fn run_loop_builds_then_stops_on_request() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.add_alg(1, "MD5");
    let up = store.add_hashlist("up", 1, false);
    store.add_hash(up, "h1", None, false);

    let s = scheduler(&store, dir.path());
    let handle = s.handle();
    let task = tokio::spawn(async move { s.run().await });

    let mut waited = Duration::ZERO;
    while common::files_in(dir.path()).is_empty() && waited < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
    }
    handle.stop();
    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("loop should stop")
        .unwrap();

    assert!(result.is_ok());
    assert_eq!(common::files_in(dir.path()).len(), 1);
}

#[tokio::test]
async fn unwritable_scratch_dir_terminates_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "file in the way").unwrap();

    let store = Arc::new(MemoryStore::new());
    store.add_alg(1, "MD5");
    let up = store.add_hashlist("up", 1, false);
    store.add_hash(up, "h1", None, false);

    let s = scheduler(&store, &blocker.join("tmp"));
    let result = tokio::time::timeout(Duration::from_secs(5), s.run())
        .await
        .expect("failure should end the loop");
    let err = result.unwrap_err();
    assert!(format!("{:#}", err).contains("consolidation of alg 1"));

    let common = store.common_hashlists(1)[0];
    assert_eq!(
        store.hashlist_status(common).await.unwrap(),
        Some(HashlistStatus::Parsing)
    );
}

#[tokio::test]
async fn wake_triggers_a_prompt_recheck() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.add_alg(1, "MD5");

    let s = Scheduler::new(
        Arc::clone(&store) as Arc<dyn HashStore>,
        SchedulerConfig::new(Duration::from_secs(3600), dir.path()),
    );
    let handle = s.handle();
    let task = tokio::spawn(async move { s.run().await });

    // First cycle finds nothing and the loop settles into its hour-long sleep.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(common::files_in(dir.path()).is_empty());

    let up = store.add_hashlist("late-upload", 1, false);
    store.add_hash(up, "h1", None, false);
    handle.wake();

    let mut waited = Duration::ZERO;
    while common::files_in(dir.path()).is_empty() && waited < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
    }
    assert_eq!(common::files_in(dir.path()).len(), 1);
    assert!(handle.is_running());
    assert!(!task.is_finished());

    handle.stop();
    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("loop should stop")
        .unwrap();
    assert!(result.is_ok());
}
