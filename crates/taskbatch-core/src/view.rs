use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, instrument, warn};

use crate::error::SyncError;
use crate::filter::TaskFilter;
use crate::model::{EntityId, Subtask, Task};
use crate::tracker::ChangeTracker;

/// The optimistic, user-visible projection: the task list, subtasks
/// loaded per task, and the active filter.
#[derive(Debug, Clone, Default)]
pub struct ViewState {
    tasks: Vec<Task>,
    subtasks: BTreeMap<EntityId, Vec<Subtask>>,
    loaded: BTreeSet<EntityId>,
    filter: TaskFilter,
    last_local: u64,
}

impl ViewState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, id: EntityId) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == Some(id))
    }

    pub fn contains_task(&self, id: EntityId) -> bool {
        self.task(id).is_some()
    }

    pub fn filter(&self) -> &TaskFilter {
        &self.filter
    }

    pub fn set_filter(&mut self, filter: TaskFilter) {
        debug!(filter = %filter, "filter changed");
        self.filter = filter;
    }

    pub fn visible_tasks(&self) -> Vec<&Task> {
        self.filter.apply(&self.tasks)
    }

    /// Subtasks currently known for a task; empty when nothing is cached.
    pub fn subtasks_of(&self, task_id: EntityId) -> &[Subtask] {
        self.subtasks.get(&task_id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_loaded(&self, task_id: EntityId) -> bool {
        self.loaded.contains(&task_id)
    }

    pub fn find_subtask(&self, id: EntityId) -> Option<&Subtask> {
        self.subtasks
            .values()
            .flatten()
            .chain(self.tasks.iter().flat_map(|task| task.subtasks.iter()))
            .find(|subtask| subtask.id == Some(id))
    }

    pub fn remote_task_ids(&self) -> BTreeSet<u64> {
        self.tasks
            .iter()
            .filter_map(|task| task.id.and_then(EntityId::remote))
            .collect()
    }

    fn next_local_id(&mut self) -> EntityId {
        self.last_local += 1;
        EntityId::Local(self.last_local)
    }

    /// Inserts or replaces by id. Tasks without an id get a fresh local
    /// placeholder, which is returned.
    #[instrument(skip_all, fields(id = ?task.id))]
    pub fn upsert_task(&mut self, mut task: Task) -> EntityId {
        let id = match task.id {
            Some(id) => id,
            None => {
                let id = self.next_local_id();
                task.id = Some(id);
                id
            }
        };

        match self.tasks.iter_mut().find(|existing| existing.id == Some(id)) {
            Some(existing) => *existing = task,
            None => self.tasks.push(task),
        }
        id
    }

    /// Inserts or replaces a subtask under its parent, in both the
    /// parent's embedded list and the subtask map.
    #[instrument(skip_all, fields(id = ?subtask.id, task = %subtask.task_id))]
    pub fn upsert_subtask(&mut self, mut subtask: Subtask) -> Result<EntityId, SyncError> {
        let parent = subtask.task_id;
        if !self.contains_task(parent) {
            return Err(SyncError::validation(
                "task",
                format!("parent task {parent} is not in the task list"),
            ));
        }

        let id = match subtask.id {
            Some(id) => id,
            None => {
                let id = self.next_local_id();
                subtask.id = Some(id);
                id
            }
        };

        if let Some(task) = self.tasks.iter_mut().find(|task| task.id == Some(parent)) {
            replace_or_push(&mut task.subtasks, subtask.clone());
        }
        replace_or_push(self.subtasks.entry(parent).or_default(), subtask);
        Ok(id)
    }

    /// Removes a task and evicts its cached subtasks.
    #[instrument(skip(self))]
    pub fn remove_task(&mut self, id: EntityId) -> Option<Task> {
        let idx = self.tasks.iter().position(|task| task.id == Some(id))?;
        self.subtasks.remove(&id);
        self.loaded.remove(&id);
        Some(self.tasks.remove(idx))
    }

    #[instrument(skip(self))]
    pub fn remove_subtask(&mut self, id: EntityId, parent: EntityId) -> Option<Subtask> {
        let mut removed = None;
        if let Some(task) = self.tasks.iter_mut().find(|task| task.id == Some(parent))
            && let Some(idx) = task.subtasks.iter().position(|s| s.id == Some(id))
        {
            removed = Some(task.subtasks.remove(idx));
        }
        if let Some(cached) = self.subtasks.get_mut(&parent)
            && let Some(idx) = cached.iter().position(|s| s.id == Some(id))
        {
            removed = Some(cached.remove(idx));
        }
        removed
    }

    /// Stores a fetched subtask list for a task and marks it loaded.
    /// Entries already cached locally (unsubmitted creates and edits) win
    /// over fetched ones with the same id; ids in `hidden` are dropped.
    #[instrument(skip(self, fetched, hidden), fields(fetched = fetched.len()))]
    pub fn merge_loaded_subtasks(&mut self, task_id: EntityId, fetched: Vec<Subtask>, hidden: &[u64]) {
        let local = self.subtasks.remove(&task_id).unwrap_or_default();
        let mut merged: Vec<Subtask> = fetched
            .into_iter()
            .filter(|subtask| {
                !subtask
                    .id
                    .and_then(EntityId::remote)
                    .is_some_and(|remote| hidden.contains(&remote))
            })
            .collect();
        for subtask in local {
            replace_or_push(&mut merged, subtask);
        }

        if let Some(task) = self.tasks.iter_mut().find(|task| task.id == Some(task_id)) {
            task.subtasks = merged.clone();
        }
        self.subtasks.insert(task_id, merged);
        self.loaded.insert(task_id);
    }

    /// Marks a task as loaded without fetching; used for local-only tasks
    /// the server cannot know about.
    pub fn mark_loaded(&mut self, task_id: EntityId) {
        self.subtasks.entry(task_id).or_default();
        self.loaded.insert(task_id);
    }

    /// Replaces the whole view with a canonical server list. Cached
    /// subtasks are discarded along with every local placeholder.
    #[instrument(skip_all, fields(count = tasks.len()))]
    pub fn replace_tasks(&mut self, tasks: Vec<Task>) {
        self.tasks = tasks;
        self.subtasks.clear();
        self.loaded.clear();
    }

    /// Re-applies edits that are still queued so the view shows the
    /// server state plus everything not yet submitted.
    #[instrument(skip_all, fields(pending = tracker.len()))]
    pub fn overlay(&mut self, tracker: &ChangeTracker) {
        for task in tracker.tasks().created.iter().chain(tracker.tasks().updated.iter()) {
            let mut task = task.clone();
            if let Some(current) = task.id.and_then(|id| self.task(id)) {
                task.subtasks = current.subtasks.clone();
            }
            self.upsert_task(task);
        }
        for id in &tracker.tasks().deleted {
            self.remove_task(EntityId::Remote(*id));
        }

        for subtask in tracker.subtasks().created.iter().chain(tracker.subtasks().updated.iter()) {
            if let Err(err) = self.upsert_subtask(subtask.clone()) {
                warn!(subtask = ?subtask.id, error = %err, "queued subtask has no visible parent");
            }
        }
        for id in &tracker.subtasks().deleted {
            let id = EntityId::Remote(*id);
            if let Some(parent) = self.find_subtask(id).map(|subtask| subtask.task_id) {
                self.remove_subtask(id, parent);
            }
        }
    }

    /// Swaps local placeholders for server ids learned during a flush.
    #[instrument(skip_all, fields(resolved = resolved.len()))]
    pub fn adopt_remote_ids(&mut self, resolved: &BTreeMap<u64, u64>) {
        let swap = |id: &mut EntityId| {
            if let EntityId::Local(local) = *id
                && let Some(remote) = resolved.get(&local)
            {
                *id = EntityId::Remote(*remote);
            }
        };

        for task in &mut self.tasks {
            if let Some(id) = task.id.as_mut() {
                swap(id);
            }
            for subtask in &mut task.subtasks {
                swap(&mut subtask.task_id);
            }
        }

        let cached = std::mem::take(&mut self.subtasks);
        for (mut key, mut list) in cached {
            swap(&mut key);
            for subtask in &mut list {
                swap(&mut subtask.task_id);
            }
            self.subtasks.insert(key, list);
        }

        let loaded = std::mem::take(&mut self.loaded);
        self.loaded = loaded
            .into_iter()
            .map(|mut id| {
                swap(&mut id);
                id
            })
            .collect();
    }
}

fn replace_or_push(list: &mut Vec<Subtask>, subtask: Subtask) {
    match list.iter_mut().find(|existing| existing.id == subtask.id) {
        Some(existing) => *existing = subtask,
        None => list.push(subtask),
    }
}
