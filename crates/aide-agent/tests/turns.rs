mod support;

use aide_agent::{
    AbortSignal, AgentError, DELEGATION_TOOL, EventKind, PermissionMap, SessionMutex, TurnOutcome,
    TurnRequest, filter_registry,
};
use aide_llm::testing::{text_step, tool_step, usage};
use aide_llm::{ProviderError, Role, ToolCallStatus};
use aide_store::{
    ConversationStore, LockStore, RunStore, SessionStore, SettingsStore, StoreError,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use support::{GatedProvider, Harness, MODEL};

fn request(session: &str, request: &str, text: &str) -> TurnRequest {
    TurnRequest::new(session, request, "user-1", text, 1_700_000_000_000)
}

#[tokio::test(flavor = "current_thread")]
async fn turn_persists_exchange_and_releases_lock() {
    let harness = Harness::new();
    harness
        .provider
        .push_step(Ok(text_step("Your list has one task.", usage(12, 6))));
    let runner = harness.runner();

    let outcome = runner
        .run_turn(request("s1", "r1", "what is on my list?"))
        .await
        .expect("turn should run");
    let TurnOutcome::Completed(result) = outcome else {
        panic!("expected completed turn");
    };
    assert!(result.completed);
    assert_eq!(result.text, "Your list has one task.");
    assert_eq!(result.usage.input_tokens, 12);

    let history = harness.store.get_history("s1").await.expect("history");
    assert_eq!(history.version, 1);
    let roles: Vec<Role> = history.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);
    assert_eq!(history.messages[0].text(), "what is on my list?");

    let session = harness
        .store
        .get_session("s1")
        .await
        .expect("session lookup")
        .expect("session created");
    assert_eq!(session.active_mode, "assistant");
    assert!(!session.is_child());
    assert_eq!(harness.store.load_lock("s1").await.expect("lock"), None);
    assert!(harness.emitter.kinds().contains(&EventKind::TurnEnd));
}

#[tokio::test(flavor = "current_thread")]
async fn turn_is_busy_while_another_request_holds_the_session() {
    let harness = Harness::new();
    let mutex = SessionMutex::new(harness.store.clone(), Arc::new(harness.clock.clone()));
    mutex
        .acquire("s1", "other", Duration::from_secs(60))
        .await
        .expect("pre-acquire");

    let outcome = harness
        .runner()
        .run_turn(request("s1", "r1", "hello"))
        .await
        .expect("busy is not an error");
    assert_eq!(
        outcome,
        TurnOutcome::Busy {
            owner_request_id: "other".to_string(),
            expires_at: 1_700_000_060_000,
        }
    );
    assert!(harness.provider.requests().is_empty());
    assert!(harness.emitter.kinds().contains(&EventKind::TurnBusy));
}

#[tokio::test(flavor = "current_thread")]
async fn concurrent_turns_on_one_session_do_not_interleave() {
    let harness = Harness::new();
    harness.provider.push_step(Ok(text_step("first", usage(1, 1))));
    let gated = GatedProvider::new(harness.provider.clone());
    let runner = harness.runner_with(Arc::new(gated.clone()));

    let (first, second) = tokio::join!(runner.run_turn(request("s1", "a", "one")), async {
        let second = runner.run_turn(request("s1", "b", "two")).await;
        gated.open();
        second
    });

    assert!(matches!(
        first.expect("first turn"),
        TurnOutcome::Completed(ref result) if result.text == "first"
    ));
    assert!(matches!(
        second.expect("second turn"),
        TurnOutcome::Busy { ref owner_request_id, .. } if owner_request_id == "a"
    ));
    let history = harness.store.get_history("s1").await.expect("history");
    assert_eq!(history.messages.len(), 2);
}

#[tokio::test(flavor = "current_thread")]
async fn stale_persist_after_lock_theft_is_rejected() {
    let mut harness = Harness::new();
    harness.config.lock_ttl_ms = 1_000;
    harness.provider.push_step(Ok(text_step("from b", usage(1, 1))));
    harness.provider.push_step(Ok(text_step("from a", usage(1, 1))));
    let gated = GatedProvider::new(harness.provider.clone());
    let runner = harness.runner_with(Arc::new(gated.clone()));

    let (first, second) = tokio::join!(runner.run_turn(request("s1", "a", "one")), async {
        harness.clock.advance(Duration::from_millis(1_001));
        let second = runner.run_turn(request("s1", "b", "two")).await;
        gated.open();
        second
    });

    assert!(matches!(
        second.expect("thief turn"),
        TurnOutcome::Completed(ref result) if result.text == "from b"
    ));
    let err = first.expect_err("dispossessed writer must not overwrite history");
    assert!(matches!(
        err,
        AgentError::Store(StoreError::VersionConflict {
            expected: 0,
            actual: 1,
            ..
        })
    ));
    let history = harness.store.get_history("s1").await.expect("history");
    assert_eq!(history.messages[0].text(), "two");
    assert_eq!(history.messages[1].text(), "from b");
}

#[tokio::test(flavor = "current_thread")]
async fn delegated_task_runs_in_child_session_only() {
    let harness = Harness::new();
    harness.provider.push_step(Ok(tool_step(
        vec![(
            "call-1",
            DELEGATION_TOOL,
            json!({"subagent": "researcher", "task": "count open tasks"}),
        )],
        usage(20, 4),
    )));
    harness
        .provider
        .push_step(Ok(text_step("There is 1 open task.", usage(5, 3))));
    harness
        .provider
        .push_step(Ok(text_step("You have one open task.", usage(30, 6))));
    let runner = harness.runner();

    let outcome = runner
        .run_turn(request("s1", "r1", "how many tasks are open?"))
        .await
        .expect("turn should run");
    let TurnOutcome::Completed(result) = outcome else {
        panic!("expected completed turn");
    };
    assert!(result.completed);
    assert_eq!(result.text, "You have one open task.");
    let delegated = &result.tool_results[0].result;
    assert_eq!(delegated["success"], true);
    assert_eq!(delegated["subagentName"], "researcher");
    assert_eq!(delegated["resultText"], "There is 1 open task.");
    let child_id = delegated["childSessionId"]
        .as_str()
        .expect("child id")
        .to_string();

    let requests = harness.provider.requests();
    assert_eq!(requests.len(), 3);
    let primary_tools: Vec<&str> = requests[0].tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(primary_tools, vec!["create_task", DELEGATION_TOOL, "list_tasks"]);
    let child_tools: Vec<&str> = requests[1].tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(child_tools, vec!["list_tasks"]);
    assert_eq!(requests[1].messages.len(), 1);
    assert_eq!(requests[1].messages[0].text(), "count open tasks");

    let parent = harness.store.get_history("s1").await.expect("parent history");
    assert_eq!(parent.messages.len(), 4);
    assert!(
        parent
            .messages
            .iter()
            .all(|m| m.text() != "count open tasks")
    );
    assert_eq!(parent.messages[1].tool_calls[0].status, ToolCallStatus::Completed);

    let child = harness.store.get_history(&child_id).await.expect("child history");
    assert_eq!(child.messages.len(), 2);
    assert_eq!(child.messages[0].text(), "count open tasks");
    assert_eq!(child.messages[1].text(), "There is 1 open task.");
    let child_session = harness
        .store
        .get_session(&child_id)
        .await
        .expect("session lookup")
        .expect("child session");
    assert_eq!(child_session.parent_session_id.as_deref(), Some("s1"));

    let runs = harness.store.list_runs("s1").await.expect("runs");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].child_session_id, child_id);
}

#[test]
fn delegation_is_never_exposed_to_subagents() {
    let harness = Harness::new();
    let runner = harness.runner();
    let permissions: PermissionMap = [(DELEGATION_TOOL.to_string(), true), ("list_tasks".to_string(), true)]
        .into_iter()
        .collect();
    assert!(runner.registry().contains(DELEGATION_TOOL));
    let filtered = filter_registry(runner.registry(), &permissions, true);
    assert_eq!(filtered.names(), vec!["list_tasks"]);
}

#[tokio::test(flavor = "current_thread")]
async fn aborted_turn_returns_partial_result_and_keeps_user_message() {
    let harness = Harness::new();
    harness.provider.push_step(Ok(text_step("unused", usage(1, 1))));
    let abort = AbortSignal::new();
    abort.abort();

    let outcome = harness
        .runner()
        .run_turn(request("s1", "r1", "hello").with_abort(abort))
        .await
        .expect("turn should run");
    let TurnOutcome::Completed(result) = outcome else {
        panic!("expected completed turn");
    };
    assert!(!result.completed);
    assert_eq!(result.error.as_deref(), Some("cancelled"));
    assert_eq!(harness.provider.remaining_steps(), 1);

    let history = harness.store.get_history("s1").await.expect("history");
    assert_eq!(history.messages.len(), 1);
    assert_eq!(harness.store.load_lock("s1").await.expect("lock"), None);
}

#[tokio::test(flavor = "current_thread")]
async fn empty_turn_text_is_rejected_before_locking() {
    let harness = Harness::new();
    let err = harness
        .runner()
        .run_turn(request("s1", "r1", "   "))
        .await
        .expect_err("empty text");
    assert!(matches!(err, AgentError::InvalidInput(_)));
    assert_eq!(harness.store.load_lock("s1").await.expect("lock"), None);
}

#[tokio::test(flavor = "current_thread")]
async fn missing_model_is_a_configuration_error_and_lock_is_released() {
    let mut harness = Harness::new();
    harness.config.default_model = None;
    let err = harness
        .runner()
        .run_turn(request("s1", "r1", "hello"))
        .await
        .expect_err("no model");
    assert!(matches!(err, AgentError::Configuration(_)));
    assert_eq!(harness.store.load_lock("s1").await.expect("lock"), None);
}

#[tokio::test(flavor = "current_thread")]
async fn routing_fallback_keeps_tool_work_from_the_pinned_attempt() {
    let harness = Harness::new();
    harness
        .store
        .set_provider_preference(MODEL, Some("groq".to_string()))
        .await
        .expect("set preference");
    harness.provider.push_step(Ok(tool_step(
        vec![("c1", "create_task", json!({"title": "buy milk"}))],
        usage(5, 2),
    )));
    harness
        .provider
        .push_step(Err(ProviderError::routing_unavailable("No endpoints found for groq")));
    harness
        .provider
        .push_step(Ok(text_step("Added buy milk.", usage(7, 3))));

    let outcome = harness
        .runner()
        .run_turn(request("s1", "r1", "add buy milk"))
        .await
        .expect("turn should run");
    let TurnOutcome::Completed(result) = outcome else {
        panic!("expected completed turn");
    };

    assert!(result.completed);
    assert_eq!(result.text, "Added buy milk.");
    assert_eq!(harness.mutation_count(), 1);
    assert_eq!(result.tool_results.len(), 1);
    assert_eq!(result.completed_tool_calls.len(), 1);
    assert_eq!(result.usage.input_tokens, 12);

    let history = harness.store.get_history("s1").await.expect("history");
    let roles: Vec<Role> = history.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );
    let recorded: usize = history.messages.iter().map(|m| m.tool_calls.len()).sum();
    assert_eq!(recorded, 1);
    assert_eq!(history.messages[2].tool_results[0].id, "c1");
}
