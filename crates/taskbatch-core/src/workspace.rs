use chrono::Utc;
use chrono_tz::Tz;
use tracing::{info, instrument, warn};

use crate::datetime::DueDate;
use crate::error::{FlushError, SyncError};
use crate::filter::TaskFilter;
use crate::model::{
    EntityId, Subtask, SubtaskPatch, Task, TaskPatch, validate_subtask, validate_task,
};
use crate::remote::RemoteClient;
use crate::sync::{FlushReport, Synchronizer};
use crate::tracker::ChangeTracker;
use crate::view::ViewState;

/// The user-facing surface: every edit lands in the view immediately and
/// is queued for the next flush.
#[derive(Debug)]
pub struct Workspace<R> {
    view: ViewState,
    tracker: ChangeTracker,
    sync: Synchronizer<R>,
    tz: Tz,
}

impl<R: RemoteClient> Workspace<R> {
    pub fn new(sync: Synchronizer<R>, tz: Tz) -> Self {
        Self {
            view: ViewState::new(),
            tracker: ChangeTracker::new(),
            sync,
            tz,
        }
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn pending(&self) -> &ChangeTracker {
        &self.tracker
    }

    pub fn synchronizer(&self) -> &Synchronizer<R> {
        &self.sync
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Parses a due date the way the user typed it, in the configured zone.
    pub fn parse_due(&self, raw: &str) -> Result<DueDate, SyncError> {
        DueDate::parse_input(raw, &self.tz, Utc::now())
    }

    /// Initial load, also used by `reload`.
    #[instrument(skip(self))]
    pub fn load(&mut self) -> Result<usize, SyncError> {
        self.sync.refresh(&self.tracker, &mut self.view)
    }

    #[instrument(skip_all, fields(title = %task.title))]
    pub fn create_task(&mut self, mut task: Task) -> Result<EntityId, SyncError> {
        task.id = None;
        task.subtasks.clear();
        validate_task(&task)?;

        let id = self.view.upsert_task(task);
        // The server cannot know subtasks of a task it has never seen.
        self.view.mark_loaded(id);
        if let Some(stored) = self.view.task(id) {
            self.tracker.record_task_create(stored.clone());
        }
        info!(id = %id, "task created locally");
        Ok(id)
    }

    #[instrument(skip(self, patch))]
    pub fn edit_task(&mut self, id: EntityId, patch: TaskPatch) -> Result<(), SyncError> {
        let mut task = self
            .view
            .task(id)
            .cloned()
            .ok_or_else(|| unknown("task", id))?;
        task.apply_patch(patch);
        validate_task(&task)?;

        let mut queued = task.clone();
        queued.subtasks.clear();
        self.view.upsert_task(task);
        self.tracker.record_task_update(queued);
        info!("task edited locally");
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn delete_task(&mut self, id: EntityId) -> Result<Task, SyncError> {
        let removed = self.view.remove_task(id).ok_or_else(|| unknown("task", id))?;
        self.tracker.record_task_delete(id);
        info!(title = %removed.title, "task deleted locally");
        Ok(removed)
    }

    #[instrument(skip(self, subtask), fields(title = %subtask.title))]
    pub fn add_subtask(&mut self, parent: EntityId, mut subtask: Subtask) -> Result<EntityId, SyncError> {
        subtask.id = None;
        subtask.task_id = parent;
        validate_subtask(&subtask)?;

        let id = self.view.upsert_subtask(subtask)?;
        if let Some(stored) = self.view.find_subtask(id) {
            self.tracker.record_subtask_create(stored.clone());
        }
        info!(id = %id, "subtask created locally");
        Ok(id)
    }

    #[instrument(skip(self, patch))]
    pub fn edit_subtask(&mut self, id: EntityId, patch: SubtaskPatch) -> Result<(), SyncError> {
        let mut subtask = self
            .view
            .find_subtask(id)
            .cloned()
            .ok_or_else(|| unknown("subtask", id))?;
        subtask.apply_patch(patch);
        validate_subtask(&subtask)?;

        self.view.upsert_subtask(subtask.clone())?;
        self.tracker.record_subtask_update(subtask);
        info!("subtask edited locally");
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn delete_subtask(&mut self, id: EntityId) -> Result<Subtask, SyncError> {
        let parent = self
            .view
            .find_subtask(id)
            .map(|subtask| subtask.task_id)
            .ok_or_else(|| unknown("subtask", id))?;
        let removed = self
            .view
            .remove_subtask(id, parent)
            .ok_or_else(|| unknown("subtask", id))?;
        self.tracker.record_subtask_delete(id);
        info!(task = %parent, "subtask deleted locally");
        Ok(removed)
    }

    /// Subtasks of a task, fetched from the server the first time a
    /// persisted task is expanded. A failed fetch is logged and the cached
    /// entries (usually none) are shown; the next expand tries again.
    #[instrument(skip(self))]
    pub fn expand(&mut self, task_id: EntityId) -> Result<&[Subtask], SyncError> {
        if !self.view.contains_task(task_id) {
            return Err(unknown("task", task_id));
        }

        if !self.view.is_loaded(task_id) {
            match task_id {
                EntityId::Local(_) => self.view.mark_loaded(task_id),
                EntityId::Remote(remote) => match self.sync.fetch_subtasks(remote) {
                    Ok(fetched) => {
                        let hidden = self.tracker.subtasks().deleted.clone();
                        self.view.merge_loaded_subtasks(task_id, fetched, &hidden);
                    }
                    Err(err) => warn!(error = %err, "could not load subtasks"),
                },
            }
        }
        Ok(self.view.subtasks_of(task_id))
    }

    pub fn set_filter(&mut self, filter: TaskFilter) {
        self.view.set_filter(filter);
    }

    pub fn visible_tasks(&self) -> Vec<&Task> {
        self.view.visible_tasks()
    }

    pub fn flush(&mut self) -> Result<FlushReport, FlushError> {
        self.sync.flush(&mut self.tracker, &mut self.view)
    }
}

fn unknown(entity: &'static str, id: EntityId) -> SyncError {
    SyncError::validation("id", format!("no {entity} with id {id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteClient;
    use crate::session::Session;

    /// Refuses every call; these tests never reach the network.
    struct Offline;

    impl RemoteClient for Offline {
        fn list_tasks(&self, _: &Session) -> Result<Vec<Task>, SyncError> {
            Err(SyncError::remote("list tasks", None, "offline"))
        }
        fn create_task(&self, _: &Session, _: &Task) -> Result<Option<u64>, SyncError> {
            Err(SyncError::remote("create task", None, "offline"))
        }
        fn update_task(&self, _: &Session, _: u64, _: &Task) -> Result<(), SyncError> {
            Err(SyncError::remote("update task", None, "offline"))
        }
        fn delete_task(&self, _: &Session, _: u64) -> Result<(), SyncError> {
            Err(SyncError::remote("delete task", None, "offline"))
        }
        fn list_subtasks(&self, _: &Session, _: u64) -> Result<Vec<Subtask>, SyncError> {
            Err(SyncError::remote("list subtasks", None, "offline"))
        }
        fn create_subtask(&self, _: &Session, _: u64, _: &Subtask) -> Result<Option<u64>, SyncError> {
            Err(SyncError::remote("create subtask", None, "offline"))
        }
        fn update_subtask(&self, _: &Session, _: u64, _: &Subtask) -> Result<(), SyncError> {
            Err(SyncError::remote("update subtask", None, "offline"))
        }
        fn delete_subtask(&self, _: &Session, _: u64) -> Result<(), SyncError> {
            Err(SyncError::remote("delete subtask", None, "offline"))
        }
    }

    fn workspace() -> Workspace<Offline> {
        Workspace::new(Synchronizer::new(Offline, Session::new("t")), chrono_tz::UTC)
    }

    #[test]
    fn blank_title_is_rejected_without_side_effects() {
        let mut ws = workspace();
        let err = ws.create_task(Task::new("  ")).expect_err("blank title");
        assert!(matches!(err, SyncError::Validation { field: "title", .. }));
        assert!(ws.view().tasks().is_empty());
        assert!(ws.pending().is_empty());
    }

    #[test]
    fn create_then_edit_is_one_queued_create() {
        let mut ws = workspace();
        let id = ws.create_task(Task::new("A")).expect("create");
        ws.edit_task(
            id,
            TaskPatch {
                title: Some("A2".to_string()),
                ..TaskPatch::default()
            },
        )
        .expect("edit");

        assert_eq!(ws.pending().tasks().created.len(), 1);
        assert_eq!(ws.pending().tasks().created[0].title, "A2");
        assert!(ws.pending().tasks().updated.is_empty());
        assert_eq!(ws.view().task(id).map(|t| t.title.as_str()), Some("A2"));
    }

    #[test]
    fn expanding_local_task_never_fetches() {
        let mut ws = workspace();
        let id = ws.create_task(Task::new("A")).expect("create");
        ws.add_subtask(id, Subtask::new(id, "child")).expect("add subtask");

        let subtasks = ws.expand(id).expect("expand");
        assert_eq!(subtasks.len(), 1);
        assert_eq!(subtasks[0].title, "child");
    }

    #[test]
    fn failed_subtask_fetch_shows_cached_entries_and_retries() {
        let mut ws = workspace();
        let mut task = Task::new("persisted");
        task.id = Some(EntityId::Remote(5));
        ws.view.upsert_task(task);

        assert!(ws.expand(EntityId::Remote(5)).expect("expand").is_empty());
        assert!(!ws.view().is_loaded(EntityId::Remote(5)));
    }

    #[test]
    fn deleting_unknown_entities_is_a_validation_error() {
        let mut ws = workspace();
        assert!(ws.delete_task(EntityId::Remote(1)).is_err());
        assert!(ws.delete_subtask(EntityId::Remote(1)).is_err());
        assert!(ws.pending().is_empty());
    }

    #[test]
    fn subtask_round_trip_through_queues() {
        let mut ws = workspace();
        let mut task = Task::new("persisted");
        task.id = Some(EntityId::Remote(5));
        ws.view.upsert_task(task);

        let sub = ws
            .add_subtask(EntityId::Remote(5), Subtask::new(EntityId::Remote(5), "s"))
            .expect("add");
        ws.edit_subtask(
            sub,
            SubtaskPatch {
                title: Some("s2".to_string()),
                ..SubtaskPatch::default()
            },
        )
        .expect("edit");
        assert_eq!(ws.pending().subtasks().created.len(), 1);
        assert_eq!(ws.pending().subtasks().created[0].title, "s2");

        ws.delete_subtask(sub).expect("delete");
        assert!(ws.pending().is_empty());
    }
}
