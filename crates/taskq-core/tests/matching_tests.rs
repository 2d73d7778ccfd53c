//! Matching engine tests: ordering, skip-over, operator decisions and the
//! pull path.

use std::collections::HashSet;
use std::sync::Arc;

use taskq_core::{
    ErrorCode, InMemoryBackend, OperatorStatus, QueueConfig, QueueError, QueueManager, TaskHandoff,
};

fn queue() -> (QueueManager, Arc<InMemoryBackend>) {
    let backend = Arc::new(InMemoryBackend::new());
    let manager = QueueManager::new(backend.clone(), QueueConfig::default());
    (manager, backend)
}

fn offer(task_id: &str) -> Option<TaskHandoff> {
    Some(TaskHandoff::new(task_id, false))
}

// ─── Ordering ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_tasks_go_to_operators_in_arrival_order() {
    let (manager, _backend) = queue();
    let mut a = manager.add_to_queue("A");
    let mut b = manager.add_to_queue("B");

    manager.submit_unassigned("t1").await;
    manager.submit_unassigned("t2").await;

    assert_eq!(a.recv().await, offer("t1"));
    assert_eq!(b.recv().await, offer("t2"));
    assert_eq!(manager.registry().status("A"), Some(OperatorStatus::Thinking));
    assert_eq!(manager.registry().status("B"), Some(OperatorStatus::Thinking));
}

#[tokio::test]
async fn test_ineligible_operator_is_skipped_and_stays_free() {
    let (manager, backend) = queue();
    let _a = manager.add_to_queue("A");
    let mut b = manager.add_to_queue("B");
    backend.deny("T1", "A").await;

    manager.submit_unassigned("T1").await;

    assert_eq!(b.recv().await, offer("T1"));
    assert!(manager.registry().contains("A"), "skipped operator stays queued");
    assert_eq!(manager.registry().status("A"), Some(OperatorStatus::Free));
}

#[tokio::test]
async fn test_skip_over_preserves_order_for_next_task() {
    let (manager, backend) = queue();
    let mut a = manager.add_to_queue("A");
    let _b = manager.add_to_queue("B");
    let _c = manager.add_to_queue("C");
    backend.deny("t1", "A").await;

    manager.submit_unassigned("t1").await;
    assert_eq!(manager.stalled().get("t1").unwrap().operator_id, "B");

    manager.submit_unassigned("t2").await;
    assert_eq!(a.recv().await, offer("t2"), "A keeps its place for the next task");
}

#[tokio::test]
async fn test_operator_without_open_waits_is_dropped_during_matching() {
    let (manager, _backend) = queue();
    drop(manager.add_to_queue("A"));
    let mut b = manager.add_to_queue("B");

    manager.submit_unassigned("t1").await;

    assert_eq!(b.recv().await, offer("t1"));
    assert!(!manager.registry().contains("A"));
}

#[tokio::test]
async fn test_no_eligible_operator_parks_task() {
    let (manager, backend) = queue();
    let _a = manager.add_to_queue("A");
    backend.deny("t1", "A").await;

    manager.submit_unassigned("t1").await;

    assert!(manager.pending().contains("t1"));
    assert!(!manager.stalled().contains("t1"));
    assert_eq!(manager.registry().status("A"), Some(OperatorStatus::Free));
}

#[tokio::test]
async fn test_offered_task_is_not_offered_twice() {
    let (manager, _backend) = queue();
    let _a = manager.add_to_queue("A");
    let _b = manager.add_to_queue("B");

    manager.submit_unassigned("t1").await;
    manager.submit_unassigned("t1").await;

    assert_eq!(manager.stalled().get("t1").unwrap().operator_id, "A");
    assert_eq!(manager.registry().status("B"), Some(OperatorStatus::Free));
    assert!(!manager.pending().contains("t1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_claim_distinct_operators() {
    let (manager, _backend) = queue();
    let operators: Vec<String> = (0..16).map(|i| format!("op-{i}")).collect();
    let _receivers: Vec<_> = operators.iter().map(|op| manager.add_to_queue(op)).collect();

    let mut handles = Vec::new();
    for i in 0..16 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager.submit_unassigned(&format!("task-{i}")).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let holders: HashSet<String> = (0..16)
        .map(|i| {
            manager
                .stalled()
                .get(&format!("task-{i}"))
                .expect("every task is offered")
                .operator_id
        })
        .collect();
    assert_eq!(holders.len(), 16, "no operator holds two offers");
}

// ─── Pre-assigned delivery ───────────────────────────────────────────────────

#[tokio::test]
async fn test_pre_assigned_task_skips_eligibility_and_thinking() {
    let (manager, backend) = queue();
    let mut ticket = manager.wait("A").await.unwrap();
    backend.deny("t1", "A").await;

    manager.submit_pre_assigned("t1", "A");
    assert!(
        manager.registry().contains("A"),
        "operator stays until its connection reads the handoff"
    );

    assert_eq!(ticket.recv().await, Some(TaskHandoff::new("t1", true)));
    assert!(!manager.stalled().contains("t1"));

    drop(ticket);
    assert!(!manager.registry().contains("A"));
}

#[tokio::test]
async fn test_pre_assigned_operator_is_not_offered_more_work() {
    let (manager, _backend) = queue();
    let mut a = manager.wait("A").await.unwrap();
    let mut b = manager.wait("B").await.unwrap();

    manager.submit_pre_assigned("t0", "A");
    assert_eq!(manager.registry().status("A"), Some(OperatorStatus::Thinking));

    manager.submit_unassigned("t1").await;
    assert_eq!(
        manager.stalled().get("t1").unwrap().operator_id,
        "B",
        "next task skips the operator holding an unread pre-assignment"
    );
    assert_eq!(b.recv().await, offer("t1"));

    assert_eq!(a.recv().await, Some(TaskHandoff::new("t0", true)));
    drop(a);
    assert!(!manager.registry().contains("A"));
}

#[tokio::test]
async fn test_pre_assigned_to_idle_operator_is_noop() {
    let (manager, _backend) = queue();
    manager.submit_pre_assigned("t1", "nobody");
    assert!(manager.is_empty());
}

// ─── Waiting ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_wait_refused_by_gate() {
    let (manager, backend) = queue();
    backend.block_operator("Z").await;

    let err = manager.wait("Z").await.err().unwrap();
    assert!(matches!(err, QueueError::QueueEntryDenied { .. }));
    assert!(!manager.registry().contains("Z"));
}

#[tokio::test]
async fn test_abandoned_wait_leaves_queue() {
    let (manager, _backend) = queue();
    let ticket = manager.wait("A").await.unwrap();
    assert!(manager.registry().contains("A"));

    drop(ticket);
    assert!(manager.is_empty());
}

#[tokio::test]
async fn test_offered_operator_stays_queued_after_wait_ends() {
    let (manager, _backend) = queue();
    let mut ticket = manager.wait("A").await.unwrap();
    manager.submit_unassigned("t1").await;

    assert_eq!(ticket.recv().await, offer("t1"));
    drop(ticket);

    assert_eq!(manager.registry().status("A"), Some(OperatorStatus::Thinking));
}

#[tokio::test]
async fn test_failed_wait_leaves_queue_despite_offer() {
    let (manager, _backend) = queue();
    let mut ticket = manager.wait("A").await.unwrap();
    manager.submit_unassigned("t1").await;
    assert_eq!(ticket.recv().await, offer("t1"));

    ticket.abandon(QueueError::Internal("connection broke".into()));

    assert!(!manager.registry().contains("A"));
    assert!(manager.stalled().contains("t1"), "offer is left for the stalled sweep");
}

#[tokio::test]
async fn test_second_tab_keeps_operator_queued() {
    let (manager, _backend) = queue();
    let first = manager.wait("A").await.unwrap();
    let second = manager.wait("A").await.unwrap();
    assert_ne!(first.channel_id(), second.channel_id());

    drop(first);
    assert!(manager.registry().contains("A"));
    drop(second);
    assert!(!manager.registry().contains("A"));
}

#[tokio::test]
async fn test_reconnect_resets_thinking_status() {
    let (manager, _backend) = queue();
    let mut a = manager.add_to_queue("A");
    manager.submit_unassigned("t1").await;
    assert_eq!(a.recv().await, offer("t1"));
    let priority = manager.registry().priority("A");

    let _again = manager.add_to_queue("A");

    assert_eq!(manager.registry().status("A"), Some(OperatorStatus::Free));
    assert_eq!(manager.registry().priority("A"), priority);
}

// ─── Removal ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_remove_waits_for_all_channels_to_complete() {
    let (manager, _backend) = queue();
    let mut first = manager.add_to_queue("A");
    let second = manager.add_to_queue("A");

    manager.remove("A");
    assert!(manager.registry().contains("A"), "open channels block removal");

    first.close();
    manager.remove("A");
    assert!(manager.registry().contains("A"));

    drop(second);
    manager.remove("A");
    assert!(!manager.registry().contains("A"));
    assert!(manager.channels().get_channels("A").is_none());
}

#[tokio::test]
async fn test_exit_wakes_waiting_connection_without_task() {
    let (manager, _backend) = queue();
    let mut ticket = manager.wait("A").await.unwrap();

    let waiter = tokio::spawn(async move { ticket.recv().await });
    tokio::task::yield_now().await;
    manager.exit("A");

    assert_eq!(waiter.await.unwrap(), None);
    assert!(manager.is_empty());
}

#[tokio::test]
async fn test_remove_unknown_operator_is_benign() {
    let (manager, _backend) = queue();
    manager.remove("ghost");
    manager.remove_all("ghost");
    assert!(manager.is_empty());
}

// ─── Decisions ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_assign_finalizes_and_removes_operator() {
    let (manager, backend) = queue();
    let mut a = manager.add_to_queue("A");
    manager.submit_unassigned("t1").await;
    assert_eq!(a.recv().await, offer("t1"));

    manager.assign("t1", "A").await.unwrap();

    assert_eq!(backend.assignee("t1").await.as_deref(), Some("A"));
    assert!(!manager.stalled().contains("t1"));
    assert!(!manager.registry().contains("A"));
}

#[tokio::test]
async fn test_assign_by_other_operator_is_forbidden() {
    let (manager, backend) = queue();
    let _a = manager.add_to_queue("A");
    manager.submit_unassigned("t1").await;

    let err = manager.assign("t1", "B").await.unwrap_err();

    assert!(matches!(err, QueueError::Forbidden { .. }));
    assert_eq!(err.code(), 0);
    assert!(manager.stalled().contains("t1"), "forbidden attempt keeps the offer");
    assert_eq!(backend.assignee("t1").await, None);
}

#[tokio::test]
async fn test_assign_conflict_reports_error_code() {
    let (manager, backend) = queue();
    let _a = manager.add_to_queue("A");
    manager.submit_unassigned("t1").await;
    backend.assign_directly("t1", "X").await;

    let err = manager.assign("t1", "A").await.unwrap_err();

    assert!(matches!(err, QueueError::AssignmentConflict { .. }));
    assert_eq!(err.code(), ErrorCode::TaskAlreadyAssigned.as_u16());
    assert!(!manager.stalled().contains("t1"));
}

#[tokio::test]
async fn test_second_confirm_fails() {
    let (manager, _backend) = queue();
    let _a = manager.add_to_queue("A");
    manager.submit_unassigned("t1").await;

    assert!(manager.confirm_for_operator("t1", "A"));
    assert!(!manager.confirm_for_operator("t1", "A"));
    assert!(manager.registry().contains("A"), "confirm alone does not remove");
}

#[tokio::test]
async fn test_reject_reroutes_task_to_next_operator() {
    let (manager, _backend) = queue();
    let mut a = manager.add_to_queue("A");
    let mut b = manager.add_to_queue("B");
    manager.submit_unassigned("t1").await;
    assert_eq!(a.recv().await, offer("t1"));

    manager.reject("t1", "A").await.unwrap();

    assert!(!manager.registry().contains("A"));
    assert_eq!(b.recv().await, offer("t1"));
    assert_eq!(manager.stalled().get("t1").unwrap().operator_id, "B");
}

#[tokio::test]
async fn test_reject_of_unoffered_task_is_forbidden() {
    let (manager, _backend) = queue();
    let err = manager.reject("t1", "A").await.unwrap_err();
    assert!(matches!(err, QueueError::Forbidden { .. }));
}

// ─── Pull path ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_take_free_task_skips_ineligible_tasks() {
    let (manager, backend) = queue();
    backend.add_free_task("t1").await;
    backend.add_free_task("t2").await;
    backend.deny("t1", "A").await;

    assert_eq!(manager.take_free_task("A").await.as_deref(), Some("t2"));
    assert_eq!(backend.assignee("t2").await.as_deref(), Some("A"));
    assert_eq!(backend.free_tasks().await, vec!["t1".to_string()]);
}

#[tokio::test]
async fn test_take_free_task_skips_offered_tasks() {
    let (manager, backend) = queue();
    backend.add_free_task("t1").await;
    backend.add_free_task("t2").await;
    let _b = manager.add_to_queue("B");
    manager.submit_unassigned("t1").await;

    assert_eq!(manager.take_free_task("A").await.as_deref(), Some("t2"));
    assert_eq!(backend.assignee("t1").await, None);
}

#[tokio::test]
async fn test_take_free_task_refused_while_waiting() {
    let (manager, backend) = queue();
    backend.add_free_task("t1").await;
    let _a = manager.add_to_queue("A");

    assert_eq!(manager.take_free_task("A").await, None);
    assert_eq!(backend.assignee("t1").await, None);
}

#[tokio::test]
async fn test_take_free_task_with_nothing_free() {
    let (manager, _backend) = queue();
    assert_eq!(manager.take_free_task("A").await, None);
}
