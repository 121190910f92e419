use aide_llm::Message;
use aide_store::{
    ConversationStore, FsStore, LockRecord, LockStore, RunStatus, RunStore, SessionRecord,
    SessionStore, SettingsStore, StoreError, SubagentRunRecord,
};

#[tokio::test(flavor = "current_thread")]
async fn fs_store_restores_state_after_reopen() {
    let temp = tempfile::tempdir().expect("temp dir should create");
    {
        let store = FsStore::new(temp.path()).expect("fs store should initialize");
        store
            .create_session(SessionRecord::root("s1", "assistant", 1))
            .await
            .expect("create session");
        store
            .replace_history("s1", vec![Message::user("hello", 2)], 0)
            .await
            .expect("write history");
        store
            .set_provider_preference("model-a", Some("groq".to_string()))
            .await
            .expect("set preference");
        store
            .compare_and_swap_lock(
                "s1",
                None,
                Some(LockRecord {
                    owner_request_id: "req-1".to_string(),
                    expires_at: 500,
                }),
            )
            .await
            .expect("take lock");
    }

    let reopened = FsStore::new(temp.path()).expect("fs store should reopen");
    let session = reopened
        .get_session("s1")
        .await
        .expect("get session")
        .expect("session should survive reopen");
    assert_eq!(session.active_mode, "assistant");

    let history = reopened.get_history("s1").await.expect("history");
    assert_eq!(history.version, 1);
    assert_eq!(history.messages[0].text(), "hello");

    let settings = reopened.model_settings().await.expect("settings");
    assert_eq!(settings.provider_preference("model-a"), Some("groq"));

    let lock = reopened.load_lock("s1").await.expect("lock");
    assert_eq!(lock.map(|l| l.owner_request_id), Some("req-1".to_string()));
}

#[tokio::test(flavor = "current_thread")]
async fn run_records_round_trip_through_every_status() {
    let temp = tempfile::tempdir().expect("temp dir should create");
    let store = FsStore::new(temp.path()).expect("fs store should initialize");

    let started = SubagentRunRecord::started("run-1", "researcher", "child-1", "s1", "look up", 10);
    store.put_run(started.clone()).await.expect("put running");
    let loaded = store
        .get_run("run-1")
        .await
        .expect("get run")
        .expect("run exists");
    assert_eq!(loaded.status, RunStatus::Running);

    store
        .put_run(started.complete("answer", 20))
        .await
        .expect("put completed");
    store
        .put_run(SubagentRunRecord::started("run-2", "researcher", "child-2", "s1", "again", 30).fail("boom", 31))
        .await
        .expect("put failed");

    let runs = store.list_runs("s1").await.expect("list runs");
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].status, RunStatus::Completed);
    assert_eq!(runs[0].result.as_deref(), Some("answer"));
    assert_eq!(runs[1].status, RunStatus::Failed);
    assert_eq!(runs[1].error.as_deref(), Some("boom"));
    assert!(store.list_runs("other").await.expect("list").is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn stale_history_write_is_rejected_and_not_persisted() {
    let temp = tempfile::tempdir().expect("temp dir should create");
    let store = FsStore::new(temp.path()).expect("fs store should initialize");
    store
        .replace_history("s1", vec![Message::user("first", 1)], 0)
        .await
        .expect("first write");
    let err = store
        .replace_history("s1", vec![Message::user("second", 2)], 0)
        .await
        .expect_err("stale write");
    assert!(matches!(err, StoreError::VersionConflict { .. }));

    let reopened = FsStore::new(temp.path()).expect("reopen");
    let history = reopened.get_history("s1").await.expect("history");
    assert_eq!(history.messages.len(), 1);
    assert_eq!(history.messages[0].text(), "first");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_lock_swaps_all_commit_and_persist() {
    let temp = tempfile::tempdir().expect("temp dir should create");
    let store = std::sync::Arc::new(FsStore::new(temp.path()).expect("fs store should initialize"));

    let mut handles = Vec::new();
    for n in 0..64 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .compare_and_swap_lock(
                    &format!("s{n}"),
                    None,
                    Some(LockRecord {
                        owner_request_id: format!("req-{n}"),
                        expires_at: 500,
                    }),
                )
                .await
        }));
    }
    for handle in handles {
        let swapped = handle.await.expect("task should join").expect("swap should not fail");
        assert!(swapped);
    }

    let reopened = FsStore::new(temp.path()).expect("fs store should reopen");
    for n in 0..64 {
        let lock = reopened
            .load_lock(&format!("s{n}"))
            .await
            .expect("load lock")
            .expect("lock should be persisted");
        assert_eq!(lock.owner_request_id, format!("req-{n}"));
    }
}

#[tokio::test(flavor = "current_thread")]
async fn failed_state_write_rolls_back_the_mutation() {
    let temp = tempfile::tempdir().expect("temp dir should create");
    let root = temp.path().join("store");
    let store = FsStore::new(&root).expect("fs store should initialize");
    std::fs::remove_dir_all(&root).expect("remove store root");

    let err = store
        .compare_and_swap_lock(
            "s1",
            None,
            Some(LockRecord {
                owner_request_id: "req-1".to_string(),
                expires_at: 500,
            }),
        )
        .await
        .expect_err("write into a missing directory should fail");
    assert!(matches!(err, StoreError::Backend(_)));
    assert_eq!(store.load_lock("s1").await.expect("load lock"), None);

    let err = store
        .replace_history("s1", vec![Message::user("hello", 1)], 0)
        .await
        .expect_err("history write should fail too");
    assert!(matches!(err, StoreError::Backend(_)));
    assert_eq!(store.get_history("s1").await.expect("history").version, 0);
}
