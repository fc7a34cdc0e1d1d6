//! Integration tests for operation history tracking.

mod common;

use std::time::Duration;

use chrono::Utc;
use common::{new_operation, restart, target};
use fleet_configuration::Configuration;
use fleet_domain::{JobId, OperationStatus};
use fleet_id::GroupId;
use fleet_server::operation::{NewOperation, OperationTracker, TrackerError, TIMEOUT_PARAMETER};

fn tracker() -> OperationTracker {
    OperationTracker::new(Duration::from_secs(3600))
}

#[tokio::test]
async fn test_duration_grows_then_freezes_after_success() {
    let tracker = tracker();
    let entry = tracker
        .create_resource_history(new_operation("restart-1"), target(1, "db"), None)
        .await
        .unwrap();

    let first = entry.duration();
    tokio::time::sleep(Duration::from_millis(500)).await;
    let second = entry.duration();
    assert!(second >= first + Duration::from_millis(450), "{first:?} -> {second:?}");

    tracker
        .complete(entry.id(), Some(Configuration::new().with_simple("uptime", "0")))
        .await
        .unwrap();
    let frozen = entry.duration();
    assert!(frozen >= second);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(entry.duration(), frozen);
    assert_eq!(entry.status(), OperationStatus::Success);
    assert_eq!(entry.results().unwrap().simple_value("uptime"), Some("0"));
}

#[tokio::test]
async fn test_error_after_success_is_rejected() {
    let tracker = tracker();
    let entry = tracker
        .create_resource_history(new_operation("restart-2"), target(1, "db"), None)
        .await
        .unwrap();
    tracker.complete(entry.id(), None).await.unwrap();

    let err = tracker.fail(entry.id(), "late").await.unwrap_err();
    assert_eq!(
        err,
        TrackerError::NotInProgress {
            id: entry.id(),
            status: OperationStatus::Success
        }
    );
    assert!(entry.error_message().is_none());
}

#[tokio::test]
async fn test_failure_drops_results() {
    let tracker = tracker();
    let entry = tracker
        .create_resource_history(new_operation("restart-3"), target(1, "db"), None)
        .await
        .unwrap();
    tracker.fail(entry.id(), "refused").await.unwrap();

    let state = entry.state();
    assert_eq!(state.status, OperationStatus::Failure);
    assert_eq!(state.error_message.as_deref(), Some("refused"));
    assert!(state.results.is_none());
}

#[tokio::test]
async fn test_job_id_lookup_and_collision() {
    let tracker = tracker();
    let job_id = JobId::now("nightly", "maintenance");
    let op = NewOperation {
        job_id: job_id.clone(),
        operation: restart(),
        parameters: Configuration::new(),
    };
    let entry = tracker
        .create_resource_history(op.clone(), target(1, "db"), None)
        .await
        .unwrap();

    let found = tracker.get_by_job_id(&job_id).await.unwrap();
    assert_eq!(found.id(), entry.id());

    let err = tracker
        .create_resource_history(op, target(2, "other"), None)
        .await
        .unwrap_err();
    assert_eq!(err, TrackerError::DuplicateJobId(job_id));
    assert_eq!(tracker.len().await, 1);
}

#[tokio::test]
async fn test_member_requires_group_entry() {
    let tracker = tracker();
    let individual = tracker
        .create_resource_history(new_operation("solo"), target(1, "db"), None)
        .await
        .unwrap();

    let err = tracker
        .create_resource_history(new_operation("member"), target(2, "db2"), Some(individual.id()))
        .await
        .unwrap_err();
    assert_eq!(err, TrackerError::NotAGroup(individual.id()));
}

#[tokio::test]
async fn test_cascade_delete_group_leaves_unrelated_entry() {
    let tracker = tracker();
    let group = tracker
        .create_group_history(new_operation("group"), GroupId::new(), "databases")
        .await
        .unwrap();
    let a = tracker
        .create_resource_history(new_operation("a"), target(1, "a"), Some(group.id()))
        .await
        .unwrap();
    let b = tracker
        .create_resource_history(new_operation("b"), target(2, "b"), Some(group.id()))
        .await
        .unwrap();
    let unrelated = tracker
        .create_resource_history(new_operation("unrelated"), target(3, "c"), None)
        .await
        .unwrap();

    tracker.complete(a.id(), None).await.unwrap();
    tracker.fail(b.id(), "boom").await.unwrap();

    let removed = tracker.delete(group.id(), false).await.unwrap();

    assert_eq!(removed, vec![a.id(), b.id(), group.id()]);
    assert_eq!(tracker.len().await, 1);
    assert!(tracker.get(unrelated.id()).await.is_some());
    assert!(tracker.get(a.id()).await.is_none());
    assert!(tracker.get_by_job_id(b.job_id()).await.is_none());
}

#[tokio::test]
async fn test_delete_refuses_in_progress_unless_purged() {
    let tracker = tracker();
    let group = tracker
        .create_group_history(new_operation("group"), GroupId::new(), "databases")
        .await
        .unwrap();
    let member = tracker
        .create_resource_history(new_operation("a"), target(1, "a"), Some(group.id()))
        .await
        .unwrap();

    let err = tracker.delete(group.id(), false).await.unwrap_err();
    assert_eq!(err, TrackerError::InProgress(group.id()));
    let err = tracker.delete(member.id(), false).await.unwrap_err();
    assert_eq!(err, TrackerError::InProgress(member.id()));
    assert_eq!(tracker.len().await, 2);

    let removed = tracker.delete(group.id(), true).await.unwrap();
    assert_eq!(removed.len(), 2);
    assert!(tracker.is_empty().await);
}

#[tokio::test]
async fn test_delete_finished_group_takes_running_members() {
    let tracker = tracker();
    let group = tracker
        .create_group_history(new_operation("group"), GroupId::new(), "databases")
        .await
        .unwrap();
    let member = tracker
        .create_resource_history(new_operation("a"), target(1, "a"), Some(group.id()))
        .await
        .unwrap();

    tracker
        .set_group_status(group.id(), OperationStatus::Success, None)
        .await
        .unwrap();
    assert!(member.is_in_progress());

    let removed = tracker.delete(group.id(), false).await.unwrap();
    assert_eq!(removed, vec![member.id(), group.id()]);
    assert!(tracker.is_empty().await);
}

#[tokio::test]
async fn test_member_rejected_once_group_finished() {
    let tracker = tracker();
    let group = tracker
        .create_group_history(new_operation("group"), GroupId::new(), "empty")
        .await
        .unwrap();

    let sweep = tracker.check_for_timed_out().await;
    assert_eq!(sweep.completed_groups, vec![group.id()]);
    assert_eq!(group.status(), OperationStatus::Success);

    let err = tracker
        .create_resource_history(new_operation("late"), target(1, "a"), Some(group.id()))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        TrackerError::NotInProgress {
            id: group.id(),
            status: OperationStatus::Success,
        }
    );
    assert_eq!(tracker.len().await, 1);
}

#[tokio::test]
async fn test_group_created_with_members_waits_for_them() {
    let tracker = tracker();
    let (group, members) = tracker
        .create_group_with_members(
            new_operation("group"),
            GroupId::new(),
            "web",
            vec![
                (new_operation("a"), target(1, "web-1")),
                (new_operation("b"), target(2, "web-2")),
            ],
        )
        .await
        .unwrap();
    assert_eq!(members.len(), 2);
    assert_eq!(tracker.group_members(group.id()).await.unwrap().len(), 2);

    let sweep = tracker.check_for_timed_out().await;
    assert!(sweep.completed_groups.is_empty());
    assert!(group.is_in_progress());

    tracker.fail(members[0].id(), "refused").await.unwrap();
    tracker.fail(members[1].id(), "refused").await.unwrap();
    assert_eq!(group.status(), OperationStatus::Failure);
    assert_eq!(
        group.error_message().as_deref(),
        Some("The following resources failed to invoke the operation: web-1,web-2")
    );
}

#[tokio::test]
async fn test_group_with_members_rejects_repeated_job_id() {
    let tracker = tracker();
    let op = new_operation("same");
    let err = tracker
        .create_group_with_members(
            new_operation("group"),
            GroupId::new(),
            "web",
            vec![(op.clone(), target(1, "web-1")), (op.clone(), target(2, "web-2"))],
        )
        .await
        .unwrap_err();
    assert_eq!(err, TrackerError::DuplicateJobId(op.job_id));
    assert!(tracker.is_empty().await);
}

#[tokio::test]
async fn test_group_completes_once_last_member_finishes() {
    let tracker = tracker();
    let group = tracker
        .create_group_history(new_operation("group"), GroupId::new(), "web")
        .await
        .unwrap();
    let a = tracker
        .create_resource_history(new_operation("a"), target(1, "web-1"), Some(group.id()))
        .await
        .unwrap();
    let b = tracker
        .create_resource_history(new_operation("b"), target(2, "web-2"), Some(group.id()))
        .await
        .unwrap();
    let c = tracker
        .create_resource_history(new_operation("c"), target(3, "web-3"), Some(group.id()))
        .await
        .unwrap();

    tracker.fail(a.id(), "refused").await.unwrap();
    tracker.complete(b.id(), None).await.unwrap();
    assert_eq!(group.status(), OperationStatus::InProgress);

    tracker.time_out(c.id(), "agent went quiet").await.unwrap();
    assert_eq!(group.status(), OperationStatus::Failure);
    assert_eq!(
        group.error_message().as_deref(),
        Some("The following resources failed to invoke the operation: web-1,web-3")
    );
}

#[tokio::test]
async fn test_group_succeeds_when_every_member_succeeds() {
    let tracker = tracker();
    let group = tracker
        .create_group_history(new_operation("group"), GroupId::new(), "web")
        .await
        .unwrap();
    for (i, name) in ["web-1", "web-2"].iter().enumerate() {
        let member = tracker
            .create_resource_history(new_operation(name), target(i as u64 + 1, name), Some(group.id()))
            .await
            .unwrap();
        tracker.complete(member.id(), None).await.unwrap();
    }

    assert_eq!(group.status(), OperationStatus::Success);
    assert!(group.error_message().is_none());
    assert_eq!(tracker.group_members(group.id()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_cancel_group_cancels_running_members() {
    let tracker = tracker();
    let group = tracker
        .create_group_history(new_operation("group"), GroupId::new(), "web")
        .await
        .unwrap();
    let done = tracker
        .create_resource_history(new_operation("a"), target(1, "web-1"), Some(group.id()))
        .await
        .unwrap();
    let running = tracker
        .create_resource_history(new_operation("b"), target(2, "web-2"), Some(group.id()))
        .await
        .unwrap();
    tracker.complete(done.id(), None).await.unwrap();

    let canceled = tracker.cancel(group.id()).await.unwrap();

    assert_eq!(canceled.len(), 1);
    assert_eq!(canceled[0].id(), running.id());
    assert_eq!(group.status(), OperationStatus::Canceled);
    assert_eq!(running.status(), OperationStatus::Canceled);
    assert_eq!(done.status(), OperationStatus::Success);

    let again = tracker.cancel(group.id()).await.unwrap_err();
    assert!(matches!(again, TrackerError::NotInProgress { .. }));
}

#[tokio::test]
async fn test_operator_sets_group_status() {
    let tracker = tracker();
    let group = tracker
        .create_group_history(new_operation("group"), GroupId::new(), "web")
        .await
        .unwrap();
    let member = tracker
        .create_resource_history(new_operation("a"), target(1, "web-1"), Some(group.id()))
        .await
        .unwrap();

    assert_eq!(
        tracker
            .set_group_status(group.id(), OperationStatus::InProgress, None)
            .await
            .unwrap_err(),
        TrackerError::NotTerminal(OperationStatus::InProgress)
    );
    assert_eq!(
        tracker
            .set_group_status(member.id(), OperationStatus::Success, None)
            .await
            .unwrap_err(),
        TrackerError::NotAGroup(member.id())
    );

    // An error message wins over the requested status.
    tracker
        .set_group_status(group.id(), OperationStatus::Success, Some("aborted by operator".into()))
        .await
        .unwrap();
    assert_eq!(group.status(), OperationStatus::Failure);
    assert_eq!(member.status(), OperationStatus::InProgress);

    // Finishing the member later leaves the operator's verdict alone.
    tracker.complete(member.id(), None).await.unwrap();
    assert_eq!(group.error_message().as_deref(), Some("aborted by operator"));
}

#[tokio::test]
async fn test_sweep_times_out_orphaned_entry() {
    let tracker = tracker();
    let op = NewOperation {
        job_id: JobId::now("slow", "test"),
        operation: restart().with_timeout(Duration::from_secs(60)),
        parameters: Configuration::new(),
    };
    let entry = tracker.create_resource_history(op, target(1, "db"), None).await.unwrap();

    let early = tracker
        .check_for_timed_out_at(entry.created_at() + chrono::Duration::seconds(30))
        .await;
    assert!(early.is_empty());

    let sweep = tracker
        .check_for_timed_out_at(entry.created_at() + chrono::Duration::seconds(61))
        .await;
    assert_eq!(sweep.timed_out, vec![entry.id()]);
    assert_eq!(entry.status(), OperationStatus::TimedOut);
    let message = entry.error_message().unwrap();
    assert!(message.contains("did not complete after 61000 ms"), "{message}");
    assert!(message.contains("the timeout period was 60000 ms"), "{message}");
}

#[tokio::test]
async fn test_timeout_parameter_overrides_definition() {
    let tracker = tracker();
    let op = NewOperation {
        job_id: JobId::now("quick", "test"),
        operation: restart().with_timeout(Duration::from_secs(600)),
        parameters: Configuration::new().with_simple(TIMEOUT_PARAMETER, "5"),
    };
    let entry = tracker.create_resource_history(op, target(1, "db"), None).await.unwrap();

    let sweep = tracker
        .check_for_timed_out_at(entry.created_at() + chrono::Duration::seconds(10))
        .await;
    assert_eq!(sweep.timed_out, vec![entry.id()]);
}

#[tokio::test]
async fn test_group_timeout_cancels_members_and_fails_group() {
    let tracker = tracker();
    let op = NewOperation {
        job_id: JobId::now("group", "test"),
        operation: restart().with_timeout(Duration::from_secs(120)),
        parameters: Configuration::new(),
    };
    let group = tracker
        .create_group_history(op, GroupId::new(), "web")
        .await
        .unwrap();
    // Members carry a longer timeout so only the group expires.
    let member_op = |name: &str| NewOperation {
        job_id: JobId::now(name, "test"),
        operation: restart().with_timeout(Duration::from_secs(7200)),
        parameters: Configuration::new(),
    };
    let done = tracker
        .create_resource_history(member_op("a"), target(1, "web-1"), Some(group.id()))
        .await
        .unwrap();
    let stuck = tracker
        .create_resource_history(member_op("b"), target(2, "web-2"), Some(group.id()))
        .await
        .unwrap();
    tracker.complete(done.id(), None).await.unwrap();

    let sweep = tracker
        .check_for_timed_out_at(Utc::now() + chrono::Duration::seconds(300))
        .await;

    assert!(sweep.timed_out.is_empty());
    assert_eq!(sweep.timed_out_groups, vec![group.id()]);
    assert_eq!(sweep.canceled.len(), 1);
    assert_eq!(sweep.canceled[0].id(), stuck.id());
    assert_eq!(stuck.status(), OperationStatus::Canceled);
    assert_eq!(group.status(), OperationStatus::Failure);
    assert!(group.error_message().unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_sweep_completes_empty_group() {
    let tracker = tracker();
    let group = tracker
        .create_group_history(new_operation("group"), GroupId::new(), "empty")
        .await
        .unwrap();

    let sweep = tracker.check_for_timed_out().await;

    assert_eq!(sweep.completed_groups, vec![group.id()]);
    assert_eq!(group.status(), OperationStatus::Success);
}

#[tokio::test]
async fn test_in_progress_listing() {
    let tracker = tracker();
    let a = tracker
        .create_resource_history(new_operation("a"), target(1, "a"), None)
        .await
        .unwrap();
    let b = tracker
        .create_resource_history(new_operation("b"), target(2, "b"), None)
        .await
        .unwrap();
    tracker.cancel(a.id()).await.unwrap();

    let running: Vec<_> = tracker.in_progress().await.iter().map(|e| e.id()).collect();
    assert_eq!(running, vec![b.id()]);
    let all: Vec<_> = tracker.list().await.iter().map(|e| e.id()).collect();
    assert_eq!(all, vec![a.id(), b.id()]);
}
