mod common;

use common::{FakeServer, session};
use taskbatch_core::error::SyncError;
use taskbatch_core::filter::TaskFilter;
use taskbatch_core::model::{EntityId, Status, Subtask, Task, TaskPatch};
use taskbatch_core::sync::Synchronizer;
use taskbatch_core::tracker::SyncOp;
use taskbatch_core::workspace::Workspace;

fn workspace(server: FakeServer) -> Workspace<FakeServer> {
    Workspace::new(Synchronizer::new(server, session()), chrono_tz::UTC)
}

fn server(ws: &Workspace<FakeServer>) -> &FakeServer {
    ws.synchronizer().remote()
}

fn titles(ws: &Workspace<FakeServer>) -> Vec<(Option<EntityId>, String)> {
    ws.view()
        .tasks()
        .iter()
        .map(|task| (task.id, task.title.clone()))
        .collect()
}

#[test]
fn successful_flush_empties_queues_and_mirrors_server() {
    let fake = FakeServer::new();
    fake.seed_task(1, "Existing");
    let mut ws = workspace(fake);
    assert_eq!(ws.load().expect("load"), 1);

    let local = ws.create_task(Task::new("A")).expect("create");
    assert_eq!(local, EntityId::Local(1));
    ws.edit_task(
        EntityId::Remote(1),
        TaskPatch {
            status: Some(Status::Done),
            ..TaskPatch::default()
        },
    )
    .expect("edit");
    ws.add_subtask(local, Subtask::new(local, "child"))
        .expect("add subtask");
    server(&ws).reset_calls();

    let report = ws.flush().expect("flush succeeds");

    assert_eq!(
        server(&ws).calls(),
        vec![
            "POST /tasks",
            "PUT /tasks/1",
            "POST /tasks/2/subtasks",
            "GET /tasks",
        ]
    );
    assert!(report.is_complete());
    assert!(report.refreshed);
    assert_eq!(report.total, 3);
    assert_eq!(report.resolved.get(&1), Some(&2));
    assert!(ws.pending().is_empty());
    assert_eq!(
        ws.view().tasks(),
        server(&ws).tasks().as_slice()
    );
    assert_eq!(server(&ws).subtasks_of(2).len(), 1);
}

#[test]
fn create_then_edit_sends_one_create_with_final_fields() {
    let mut ws = workspace(FakeServer::new());
    ws.load().expect("load");

    let id = ws.create_task(Task::new("A")).expect("create");
    ws.edit_task(
        id,
        TaskPatch {
            title: Some("A2".to_string()),
            ..TaskPatch::default()
        },
    )
    .expect("edit");

    ws.flush().expect("flush");

    assert_eq!(server(&ws).count("POST /tasks"), 1);
    assert!(!server(&ws).calls().iter().any(|call| call.starts_with("PUT")));
    assert_eq!(titles(&ws), vec![(Some(EntityId::Remote(1)), "A2".to_string())]);
}

#[test]
fn deleting_persisted_task_issues_single_delete() {
    let fake = FakeServer::new();
    fake.seed_task(5, "Doomed");
    fake.seed_task(6, "Kept");
    let mut ws = workspace(fake);
    ws.load().expect("load");

    ws.delete_task(EntityId::Remote(5)).expect("delete");
    assert_eq!(ws.pending().tasks().deleted, vec![5]);
    assert_eq!(titles(&ws), vec![(Some(EntityId::Remote(6)), "Kept".to_string())]);
    server(&ws).reset_calls();

    ws.flush().expect("flush");

    assert_eq!(server(&ws).calls(), vec!["DELETE /tasks/5", "GET /tasks"]);
    assert_eq!(titles(&ws), vec![(Some(EntityId::Remote(6)), "Kept".to_string())]);
}

#[test]
fn failure_stops_batch_and_restores_remainder_with_resolved_parent() {
    let mut ws = workspace(FakeServer::new());
    ws.load().expect("load");

    let parent = ws.create_task(Task::new("Parent")).expect("create");
    ws.add_subtask(parent, Subtask::new(parent, "first"))
        .expect("first subtask");
    ws.add_subtask(parent, Subtask::new(parent, "second"))
        .expect("second subtask");
    server(&ws).fail_nth("POST /tasks/1/subtasks", 1);

    let err = ws.flush().expect_err("second operation fails");

    assert!(matches!(
        err.source,
        SyncError::RemoteRequest {
            status: Some(500),
            ..
        }
    ));
    assert_eq!(server(&ws).count("POST /tasks/1/subtasks"), 1);
    assert_eq!(err.report.total, 3);
    assert_eq!(err.report.delivered.len(), 1);
    assert!(matches!(err.report.delivered[0], SyncOp::CreateTask(_)));
    assert_eq!(err.report.restored, 2);

    let queued = &ws.pending().subtasks().created;
    assert_eq!(queued.len(), 2);
    assert!(queued.iter().all(|s| s.task_id == EntityId::Remote(1)));
    assert!(ws.pending().tasks().is_empty());

    // refreshed view: the server's task plus the still-queued subtasks
    assert_eq!(titles(&ws), vec![(Some(EntityId::Remote(1)), "Parent".to_string())]);
    assert_eq!(ws.view().subtasks_of(EntityId::Remote(1)).len(), 2);

    server(&ws).clear_failures();
    let report = ws.flush().expect("retry succeeds");
    assert_eq!(report.delivered.len(), 2);
    assert!(ws.pending().is_empty());
    assert_eq!(server(&ws).subtasks_of(1).len(), 2);
}

#[test]
fn flush_without_session_touches_nothing() {
    let mut ws = Workspace::new(Synchronizer::new(FakeServer::new(), None), chrono_tz::UTC);
    assert_eq!(ws.load().expect_err("no session"), SyncError::Unauthenticated);

    ws.create_task(Task::new("Offline")).expect("local create");
    let err = ws.flush().expect_err("no session");

    assert_eq!(err.source, SyncError::Unauthenticated);
    assert_eq!(ws.pending().len(), 1);
    assert!(server(&ws).calls().is_empty());
    assert_eq!(ws.view().tasks().len(), 1);
}

#[test]
fn expand_fetches_once_and_failed_fetch_retries_later() {
    let fake = FakeServer::new();
    fake.seed_task(5, "With subtasks");
    fake.seed_subtask(10, 5, "a");
    fake.seed_subtask(11, 5, "b");
    fake.seed_task(6, "Flaky");
    fake.fail_nth("GET /tasks/6/subtasks", 1);
    let mut ws = workspace(fake);
    ws.load().expect("load");

    assert_eq!(ws.expand(EntityId::Remote(5)).expect("expand").len(), 2);
    assert_eq!(ws.expand(EntityId::Remote(5)).expect("expand").len(), 2);
    assert_eq!(server(&ws).count("GET /tasks/5/subtasks"), 1);

    assert!(ws.expand(EntityId::Remote(6)).expect("expand").is_empty());
    assert!(ws.expand(EntityId::Remote(6)).expect("expand").is_empty());
    assert_eq!(server(&ws).count("GET /tasks/6/subtasks"), 2);
    assert!(ws.view().is_loaded(EntityId::Remote(6)));
}

#[test]
fn missing_create_ids_are_recovered_from_task_list() {
    let fake = FakeServer::silent_ids();
    fake.seed_task(3, "Before");
    let mut ws = workspace(fake);
    ws.load().expect("load");

    let parent = ws.create_task(Task::new("Parent")).expect("create");
    ws.add_subtask(parent, Subtask::new(parent, "child"))
        .expect("subtask");
    server(&ws).reset_calls();

    let report = ws.flush().expect("flush");

    assert_eq!(
        server(&ws).calls(),
        vec![
            "POST /tasks",
            "GET /tasks",
            "POST /tasks/4/subtasks",
            "GET /tasks",
        ]
    );
    assert_eq!(report.resolved.get(&1), Some(&4));
    assert_eq!(server(&ws).subtasks_of(4).len(), 1);
}

#[test]
fn failed_flush_recovers_unreported_parent_before_restoring_subtasks() {
    let fake = FakeServer::silent_ids();
    fake.seed_task(5, "Existing");
    let mut ws = workspace(fake);
    ws.load().expect("load");

    let parent = ws.create_task(Task::new("A")).expect("create");
    ws.edit_task(
        EntityId::Remote(5),
        TaskPatch {
            status: Some(Status::Done),
            ..TaskPatch::default()
        },
    )
    .expect("edit");
    ws.add_subtask(parent, Subtask::new(parent, "child"))
        .expect("subtask");
    server(&ws).fail_nth("PUT /tasks/5", 1);

    let err = ws.flush().expect_err("task update fails");

    assert_eq!(err.report.resolved.get(&1), Some(&6));
    assert_eq!(err.report.restored, 2);
    assert!(err.report.discarded.is_empty());
    let queued: Vec<_> = ws
        .pending()
        .subtasks()
        .created
        .iter()
        .map(|subtask| subtask.task_id)
        .collect();
    assert_eq!(queued, vec![EntityId::Remote(6)]);
    assert_eq!(ws.view().subtasks_of(EntityId::Remote(6)).len(), 1);

    server(&ws).clear_failures();
    let report = ws.flush().expect("retry succeeds");
    assert!(report.is_complete());
    assert!(ws.pending().is_empty());
    assert_eq!(server(&ws).subtasks_of(6).len(), 1);
    assert_eq!(server(&ws).tasks()[0].status, Status::Done);
}

#[test]
fn unrecoverable_parent_drops_subtask_instead_of_requeueing_it() {
    let fake = FakeServer::silent_ids();
    fake.seed_task(5, "Existing");
    let mut ws = workspace(fake);
    ws.load().expect("load");

    let parent = ws.create_task(Task::new("A")).expect("create");
    ws.edit_task(
        EntityId::Remote(5),
        TaskPatch {
            title: Some("Renamed".to_string()),
            ..TaskPatch::default()
        },
    )
    .expect("edit");
    ws.add_subtask(parent, Subtask::new(parent, "child"))
        .expect("subtask");
    server(&ws).reset_calls();
    server(&ws).fail_nth("PUT /tasks/5", 1);
    server(&ws).fail_nth("GET /tasks", 1);

    let err = ws.flush().expect_err("task update fails");

    assert_eq!(
        server(&ws).calls(),
        vec!["POST /tasks", "PUT /tasks/5", "GET /tasks", "GET /tasks"]
    );
    assert_eq!(err.report.restored, 1);
    assert_eq!(err.report.discarded.len(), 1);
    let (dropped, reason) = &err.report.discarded[0];
    assert!(matches!(dropped, SyncOp::CreateSubtask(subtask) if subtask.title == "child"));
    assert!(matches!(reason, SyncError::Reconciliation { .. }));
    assert!(ws.pending().subtasks().is_empty());

    server(&ws).clear_failures();
    let report = ws.flush().expect("remaining update goes through");
    assert!(report.is_complete());
    assert!(ws.pending().is_empty());
}

#[test]
fn deleting_task_drops_its_queued_subtask_changes() {
    let fake = FakeServer::new();
    fake.seed_task(5, "Parent");
    fake.seed_subtask(10, 5, "existing");
    let mut ws = workspace(fake);
    ws.load().expect("load");
    ws.expand(EntityId::Remote(5)).expect("expand");

    ws.add_subtask(EntityId::Remote(5), Subtask::new(EntityId::Remote(5), "new"))
        .expect("add");
    ws.delete_subtask(EntityId::Remote(10)).expect("delete subtask");
    ws.delete_task(EntityId::Remote(5)).expect("delete task");

    assert!(ws.pending().subtasks().created.is_empty());
    assert_eq!(ws.pending().subtasks().deleted, vec![10]);
    server(&ws).reset_calls();

    // the server cascades the task delete, so the subtask delete gets a 404
    let report = ws.flush().expect("flush");
    assert!(report.is_complete());
    assert_eq!(
        server(&ws).calls(),
        vec!["DELETE /tasks/5", "DELETE /subtasks/10", "GET /tasks"]
    );
    assert!(ws.view().tasks().is_empty());
}

#[test]
fn filter_narrows_visible_tasks_only() {
    let fake = FakeServer::new();
    fake.seed_task(1, "Write report");
    fake.seed_task(2, "Buy milk");
    let mut ws = workspace(fake);
    ws.load().expect("load");

    ws.set_filter(TaskFilter::parse("all", "", "REPORT").expect("filter"));
    let visible: Vec<_> = ws.visible_tasks().iter().map(|task| task.id).collect();
    assert_eq!(visible, vec![Some(EntityId::Remote(1))]);
    assert_eq!(ws.view().tasks().len(), 2);
}
