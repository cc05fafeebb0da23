use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, instrument, trace, warn};

use crate::model::{EntityId, Subtask, Task};

/// Anything the tracker can key by identity.
pub trait Tracked {
    fn entity_id(&self) -> Option<EntityId>;
}

impl Tracked for Task {
    fn entity_id(&self) -> Option<EntityId> {
        self.id
    }
}

impl Tracked for Subtask {
    fn entity_id(&self) -> Option<EntityId> {
        self.id
    }
}

/// Created / updated / deleted queues for one entity kind.
///
/// `created` holds local-only entities, `updated` holds persisted ones and
/// `deleted` holds server ids. Each queue contains a given identity at most
/// once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Queues<T> {
    pub created: Vec<T>,
    pub updated: Vec<T>,
    pub deleted: Vec<u64>,
}

impl<T> Default for Queues<T> {
    fn default() -> Self {
        Self {
            created: vec![],
            updated: vec![],
            deleted: vec![],
        }
    }
}

impl<T: Tracked> Queues<T> {
    fn record_create(&mut self, entity: T) {
        upsert(&mut self.created, entity);
    }

    fn record_update(&mut self, entity: T) {
        match entity.entity_id() {
            Some(EntityId::Remote(_)) => upsert(&mut self.updated, entity),
            _ => self.record_create(entity),
        }
    }

    fn record_delete(&mut self, id: EntityId) {
        self.created.retain(|entity| entity.entity_id() != Some(id));
        self.updated.retain(|entity| entity.entity_id() != Some(id));
        if let EntityId::Remote(remote) = id
            && !self.deleted.contains(&remote)
        {
            self.deleted.push(remote);
        }
    }

    pub fn len(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mentions(&self, id: EntityId) -> bool {
        self.created
            .iter()
            .chain(self.updated.iter())
            .any(|entity| entity.entity_id() == Some(id))
            || id.remote().is_some_and(|remote| self.deleted.contains(&remote))
    }
}

fn upsert<T: Tracked>(queue: &mut Vec<T>, entity: T) {
    let id = entity.entity_id();
    if id.is_some()
        && let Some(slot) = queue.iter_mut().find(|queued| queued.entity_id() == id)
    {
        *slot = entity;
        return;
    }
    queue.push(entity);
}

/// One queued remote call, in the shape the synchronizer executes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOp {
    CreateTask(Task),
    UpdateTask(Task),
    DeleteTask(u64),
    CreateSubtask(Subtask),
    UpdateSubtask(Subtask),
    DeleteSubtask(u64),
}

impl SyncOp {
    /// Rewrites a subtask's `Local` parent to the server id it was given
    /// during a flush.
    pub fn with_resolved_parent(self, resolved: &BTreeMap<u64, u64>) -> Self {
        let remap = |mut subtask: Subtask| {
            if let EntityId::Local(local) = subtask.task_id
                && let Some(remote) = resolved.get(&local)
            {
                subtask.task_id = EntityId::Remote(*remote);
            }
            subtask
        };

        match self {
            SyncOp::CreateSubtask(subtask) => SyncOp::CreateSubtask(remap(subtask)),
            SyncOp::UpdateSubtask(subtask) => SyncOp::UpdateSubtask(remap(subtask)),
            other => other,
        }
    }
}

impl fmt::Display for SyncOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = |id: Option<EntityId>| id.map(|id| id.to_string()).unwrap_or_else(|| "-".into());
        match self {
            SyncOp::CreateTask(task) => write!(f, "create task {} \"{}\"", id(task.id), task.title),
            SyncOp::UpdateTask(task) => write!(f, "update task {} \"{}\"", id(task.id), task.title),
            SyncOp::DeleteTask(remote) => write!(f, "delete task {remote}"),
            SyncOp::CreateSubtask(subtask) => write!(
                f,
                "create subtask {} \"{}\" under task {}",
                id(subtask.id),
                subtask.title,
                subtask.task_id
            ),
            SyncOp::UpdateSubtask(subtask) => {
                write!(f, "update subtask {} \"{}\"", id(subtask.id), subtask.title)
            }
            SyncOp::DeleteSubtask(remote) => write!(f, "delete subtask {remote}"),
        }
    }
}

/// Snapshot of every queue taken by [`ChangeTracker::drain`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingBatch {
    pub tasks: Queues<Task>,
    pub subtasks: Queues<Subtask>,
}

impl PendingBatch {
    pub fn len(&self) -> usize {
        self.tasks.len() + self.subtasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flattens the batch in submission order: task creates, updates,
    /// deletes, then the same for subtasks.
    pub fn into_ops(self) -> Vec<SyncOp> {
        let mut ops = Vec::with_capacity(self.len());
        ops.extend(self.tasks.created.into_iter().map(SyncOp::CreateTask));
        ops.extend(self.tasks.updated.into_iter().map(SyncOp::UpdateTask));
        ops.extend(self.tasks.deleted.into_iter().map(SyncOp::DeleteTask));
        ops.extend(self.subtasks.created.into_iter().map(SyncOp::CreateSubtask));
        ops.extend(self.subtasks.updated.into_iter().map(SyncOp::UpdateSubtask));
        ops.extend(self.subtasks.deleted.into_iter().map(SyncOp::DeleteSubtask));
        ops
    }

    pub fn from_ops<I>(ops: I) -> Self
    where
        I: IntoIterator<Item = SyncOp>,
    {
        let mut batch = Self::default();
        for op in ops {
            match op {
                SyncOp::CreateTask(task) => batch.tasks.created.push(task),
                SyncOp::UpdateTask(task) => batch.tasks.updated.push(task),
                SyncOp::DeleteTask(id) => batch.tasks.deleted.push(id),
                SyncOp::CreateSubtask(subtask) => batch.subtasks.created.push(subtask),
                SyncOp::UpdateSubtask(subtask) => batch.subtasks.updated.push(subtask),
                SyncOp::DeleteSubtask(id) => batch.subtasks.deleted.push(id),
            }
        }
        batch
    }
}

/// Pending local mutations that have not been sent to the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeTracker {
    tasks: Queues<Task>,
    subtasks: Queues<Subtask>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks(&self) -> &Queues<Task> {
        &self.tasks
    }

    pub fn subtasks(&self) -> &Queues<Subtask> {
        &self.subtasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len() + self.subtasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queued operations in submission order, without draining.
    pub fn ops(&self) -> Vec<SyncOp> {
        PendingBatch {
            tasks: self.tasks.clone(),
            subtasks: self.subtasks.clone(),
        }
        .into_ops()
    }

    #[instrument(skip_all, fields(id = ?task.id))]
    pub fn record_task_create(&mut self, task: Task) {
        trace!("queue task create");
        self.tasks.record_create(task);
    }

    /// An edit of a task the server has never seen stays a create.
    #[instrument(skip_all, fields(id = ?task.id))]
    pub fn record_task_update(&mut self, task: Task) {
        trace!("queue task update");
        self.tasks.record_update(task);
    }

    /// Cancels any queued create/update for the task and, for persisted
    /// tasks, queues the delete. Queued subtask creates and updates under
    /// the task are dropped with it.
    #[instrument(skip(self))]
    pub fn record_task_delete(&mut self, id: EntityId) {
        self.tasks.record_delete(id);

        let before = self.subtasks.created.len() + self.subtasks.updated.len();
        self.subtasks.created.retain(|subtask| subtask.task_id != id);
        self.subtasks.updated.retain(|subtask| subtask.task_id != id);
        let dropped = before - (self.subtasks.created.len() + self.subtasks.updated.len());
        if dropped > 0 {
            warn!(task = %id, dropped, "dropped queued subtask edits of deleted task");
        }
    }

    #[instrument(skip_all, fields(id = ?subtask.id, task = %subtask.task_id))]
    pub fn record_subtask_create(&mut self, subtask: Subtask) {
        trace!("queue subtask create");
        self.subtasks.record_create(subtask);
    }

    #[instrument(skip_all, fields(id = ?subtask.id, task = %subtask.task_id))]
    pub fn record_subtask_update(&mut self, subtask: Subtask) {
        trace!("queue subtask update");
        self.subtasks.record_update(subtask);
    }

    #[instrument(skip(self))]
    pub fn record_subtask_delete(&mut self, id: EntityId) {
        self.subtasks.record_delete(id);
    }

    /// Takes every queue and leaves the tracker empty in one step.
    #[instrument(skip(self))]
    pub fn drain(&mut self) -> PendingBatch {
        let drained = std::mem::take(self);
        debug!(operations = drained.len(), "drained change tracker");
        PendingBatch {
            tasks: drained.tasks,
            subtasks: drained.subtasks,
        }
    }

    /// Puts undelivered operations back. Edits recorded since the drain
    /// are replayed on top, so they win over the restored entries.
    #[instrument(skip_all, fields(restored = remainder.len()))]
    pub fn restore(&mut self, remainder: PendingBatch) {
        let mut newer = std::mem::replace(
            self,
            Self {
                tasks: remainder.tasks,
                subtasks: remainder.subtasks,
            },
        );

        for op in newer.drain().into_ops() {
            self.replay(op);
        }
        debug!(operations = self.len(), "restored change tracker");
    }

    fn replay(&mut self, op: SyncOp) {
        match op {
            SyncOp::CreateTask(task) => self.record_task_create(task),
            SyncOp::UpdateTask(task) => self.record_task_update(task),
            SyncOp::DeleteTask(id) => self.record_task_delete(EntityId::Remote(id)),
            SyncOp::CreateSubtask(subtask) => self.record_subtask_create(subtask),
            SyncOp::UpdateSubtask(subtask) => self.record_subtask_update(subtask),
            SyncOp::DeleteSubtask(id) => self.record_subtask_delete(EntityId::Remote(id)),
        }
    }
}
