use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, info_span, instrument, warn};
use uuid::Uuid;

use crate::error::{FlushError, SyncError};
use crate::model::{EntityId, Subtask, Task};
use crate::remote::RemoteClient;
use crate::session::Session;
use crate::tracker::{ChangeTracker, PendingBatch, SyncOp};
use crate::view::ViewState;

/// Outcome of one flush attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub batch_id: Uuid,
    /// Operations drained from the tracker.
    pub total: usize,
    /// Operations the server acknowledged, in submission order.
    pub delivered: Vec<SyncOp>,
    /// The operation that aborted the flush, if any.
    pub failed: Option<SyncOp>,
    /// Operations put back into the tracker after an abort.
    pub restored: usize,
    /// Subtask operations dropped after an abort because their parent
    /// task was delivered but its server id could not be recovered.
    pub discarded: Vec<(SyncOp, SyncError)>,
    /// Local task placeholders mapped to the ids the server assigned.
    pub resolved: BTreeMap<u64, u64>,
    /// Whether the view was reloaded from the server afterwards.
    pub refreshed: bool,
}

impl FlushReport {
    fn new(batch_id: Uuid, total: usize) -> Self {
        Self {
            batch_id,
            total,
            delivered: vec![],
            failed: None,
            restored: 0,
            discarded: vec![],
            resolved: BTreeMap::new(),
            refreshed: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_none() && self.delivered.len() == self.total
    }
}

/// Per-flush bookkeeping for server ids.
struct IdLedger {
    /// Task ids the view already knew before the flush started.
    known: BTreeSet<u64>,
    resolved: BTreeMap<u64, u64>,
    /// Created tasks whose response carried no id.
    unmatched: Vec<Task>,
}

/// Drives queued changes to the server and reconciles the view with the
/// canonical task list.
#[derive(Debug)]
pub struct Synchronizer<R> {
    remote: R,
    session: Option<Session>,
}

impl<R: RemoteClient> Synchronizer<R> {
    pub fn new(remote: R, session: Option<Session>) -> Self {
        Self { remote, session }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    fn require_session(&self) -> Result<&Session, SyncError> {
        self.session.as_ref().ok_or(SyncError::Unauthenticated)
    }

    /// Replaces the view with `GET /tasks` and re-applies whatever is
    /// still queued. Returns the number of tasks the server reported.
    #[instrument(skip_all)]
    pub fn refresh(&self, tracker: &ChangeTracker, view: &mut ViewState) -> Result<usize, SyncError> {
        let session = self.require_session()?;
        let tasks = self.remote.list_tasks(session)?;
        let count = tasks.len();
        view.replace_tasks(tasks);
        view.overlay(tracker);
        info!(tasks = count, pending = tracker.len(), "refreshed task list");
        Ok(count)
    }

    #[instrument(skip(self))]
    pub fn fetch_subtasks(&self, task_id: u64) -> Result<Vec<Subtask>, SyncError> {
        let session = self.require_session()?;
        let subtasks = self.remote.list_subtasks(session, task_id)?;
        debug!(count = subtasks.len(), "fetched subtasks");
        Ok(subtasks)
    }

    /// Submits every queued change, one call at a time, in the fixed
    /// order task creates, updates, deletes, then the same for subtasks.
    ///
    /// The first failure stops the run. The failed operation and all later
    /// ones go back into the tracker, while already delivered ones stay
    /// delivered. A missing session fails before anything is drained.
    pub fn flush(
        &self,
        tracker: &mut ChangeTracker,
        view: &mut ViewState,
    ) -> Result<FlushReport, FlushError> {
        let batch_id = Uuid::new_v4();
        let span = info_span!("flush", %batch_id);
        let _guard = span.enter();

        let session = match self.require_session() {
            Ok(session) => session,
            Err(source) => {
                warn!("flush refused without a session; queues left intact");
                return Err(FlushError {
                    report: FlushReport::new(batch_id, tracker.len()),
                    source,
                });
            }
        };

        let ops = tracker.drain().into_ops();
        let mut report = FlushReport::new(batch_id, ops.len());
        info!(operations = report.total, "flush started");

        let mut ledger = IdLedger {
            known: view.remote_task_ids(),
            resolved: BTreeMap::new(),
            unmatched: vec![],
        };

        let mut ops = ops.into_iter();
        let mut failure = None;
        for op in ops.by_ref() {
            let op = op.with_resolved_parent(&ledger.resolved);
            match self.apply(session, &mut ledger, &op) {
                Ok(()) => {
                    debug!(op = %op, "delivered");
                    report.delivered.push(op);
                }
                Err(err) => {
                    warn!(op = %op, error = %err, "operation failed; aborting flush");
                    failure = Some((op, err));
                    break;
                }
            }
        }

        let failure = match failure {
            None => None,
            Some((failed, source)) => {
                let remainder: Vec<SyncOp> = std::iter::once(failed.clone()).chain(ops).collect();
                let queued = queued_creates(&remainder);
                if !ledger.unmatched.is_empty()
                    && remainder
                        .iter()
                        .any(|op| stranded_parent(op, &ledger.resolved, &queued).is_some())
                {
                    if let Err(err) = self.match_unreported(session, &mut ledger) {
                        warn!(error = %err, "could not recover ids of created tasks");
                    }
                }

                let mut kept = Vec::with_capacity(remainder.len());
                for op in remainder {
                    let op = op.with_resolved_parent(&ledger.resolved);
                    match stranded_parent(&op, &ledger.resolved, &queued) {
                        Some(local) => {
                            warn!(op = %op, "dropping operation whose parent has no server id");
                            let err = SyncError::reconciliation(
                                format!("task {}", EntityId::Local(local)),
                                "the server never reported an id for it",
                            );
                            report.discarded.push((op, err));
                        }
                        None => kept.push(op),
                    }
                }
                report.restored = kept.len();
                report.failed = Some(failed);
                tracker.restore(PendingBatch::from_ops(kept));
                Some(source)
            }
        };

        if !ledger.unmatched.is_empty() {
            debug!(
                unmatched = ledger.unmatched.len(),
                "created tasks left without a reported id"
            );
        }
        view.adopt_remote_ids(&ledger.resolved);
        report.resolved = ledger.resolved;

        report.refreshed = match self.refresh(tracker, view) {
            Ok(_) => true,
            Err(err) => {
                warn!(error = %err, "could not reload tasks after flush; keeping local view");
                false
            }
        };

        match failure {
            None => {
                info!(delivered = report.delivered.len(), "flush complete");
                Ok(report)
            }
            Some(source) => {
                info!(
                    delivered = report.delivered.len(),
                    restored = report.restored,
                    "flush aborted"
                );
                Err(FlushError { report, source })
            }
        }
    }

    fn apply(&self, session: &Session, ledger: &mut IdLedger, op: &SyncOp) -> Result<(), SyncError> {
        match op {
            SyncOp::CreateTask(task) => {
                let created = self.remote.create_task(session, task)?;
                match (task.id, created) {
                    (Some(EntityId::Local(local)), Some(remote)) => {
                        ledger.resolved.insert(local, remote);
                    }
                    (Some(EntityId::Local(_)), None) => ledger.unmatched.push(task.clone()),
                    _ => {}
                }
                Ok(())
            }
            SyncOp::UpdateTask(task) => {
                let id = persisted_id(task.id, "task")?;
                self.remote.update_task(session, id, task)
            }
            SyncOp::DeleteTask(id) => already_gone(self.remote.delete_task(session, *id)),
            SyncOp::CreateSubtask(subtask) => {
                let parent = self.parent_id(session, ledger, subtask.task_id)?;
                self.remote.create_subtask(session, parent, subtask).map(|_| ())
            }
            SyncOp::UpdateSubtask(subtask) => {
                let id = persisted_id(subtask.id, "subtask")?;
                self.remote.update_subtask(session, id, subtask)
            }
            SyncOp::DeleteSubtask(id) => already_gone(self.remote.delete_subtask(session, *id)),
        }
    }

    fn parent_id(
        &self,
        session: &Session,
        ledger: &mut IdLedger,
        parent: EntityId,
    ) -> Result<u64, SyncError> {
        let local = match parent {
            EntityId::Remote(id) => return Ok(id),
            EntityId::Local(local) => local,
        };
        if let Some(id) = ledger.resolved.get(&local) {
            return Ok(*id);
        }

        self.match_unreported(session, ledger)?;
        ledger.resolved.get(&local).copied().ok_or_else(|| {
            SyncError::reconciliation(
                format!("task {parent}"),
                "the server never reported an id for it",
            )
        })
    }

    /// Pairs created tasks that came back without an id with unseen
    /// entries of `GET /tasks`: lowest id first, equal fields required.
    #[instrument(skip_all, fields(unmatched = ledger.unmatched.len()))]
    fn match_unreported(&self, session: &Session, ledger: &mut IdLedger) -> Result<(), SyncError> {
        if ledger.unmatched.is_empty() {
            return Ok(());
        }

        let taken: BTreeSet<u64> = ledger
            .known
            .iter()
            .chain(ledger.resolved.values())
            .copied()
            .collect();
        let mut candidates: Vec<(u64, Task)> = self
            .remote
            .list_tasks(session)?
            .into_iter()
            .filter_map(|task| {
                let id = task.id.and_then(EntityId::remote)?;
                (!taken.contains(&id)).then_some((id, task))
            })
            .collect();
        candidates.sort_by_key(|(id, _)| *id);

        for task in std::mem::take(&mut ledger.unmatched) {
            let Some(EntityId::Local(local)) = task.id else {
                continue;
            };
            match candidates.iter().position(|(_, candidate)| same_fields(candidate, &task)) {
                Some(idx) => {
                    let (remote, _) = candidates.remove(idx);
                    debug!(local, remote, "matched created task by content");
                    ledger.resolved.insert(local, remote);
                }
                None => warn!(local, title = %task.title, "no server task matches created task"),
            }
        }
        Ok(())
    }
}

/// A delete answered with 404 has nothing left to do; the server may have
/// cascaded it from a parent delete earlier in the batch.
fn already_gone(result: Result<(), SyncError>) -> Result<(), SyncError> {
    match result {
        Err(SyncError::RemoteRequest {
            status: Some(404),
            op,
            ..
        }) => {
            debug!(op = %op, "entity already absent on server");
            Ok(())
        }
        other => other,
    }
}

/// Local task ids whose create is still among `ops`.
fn queued_creates(ops: &[SyncOp]) -> BTreeSet<u64> {
    ops.iter()
        .filter_map(|op| match op {
            SyncOp::CreateTask(Task {
                id: Some(EntityId::Local(local)),
                ..
            }) => Some(*local),
            _ => None,
        })
        .collect()
}

/// The `Local` parent of a subtask operation when that parent is neither
/// resolved nor still queued for creation.
fn stranded_parent(op: &SyncOp, resolved: &BTreeMap<u64, u64>, queued: &BTreeSet<u64>) -> Option<u64> {
    let (SyncOp::CreateSubtask(subtask) | SyncOp::UpdateSubtask(subtask)) = op else {
        return None;
    };
    match subtask.task_id {
        EntityId::Local(local) if !resolved.contains_key(&local) && !queued.contains(&local) => Some(local),
        _ => None,
    }
}

fn persisted_id(id: Option<EntityId>, entity: &str) -> Result<u64, SyncError> {
    id.and_then(EntityId::remote).ok_or_else(|| {
        let shown = id.map(|id| id.to_string()).unwrap_or_else(|| "-".into());
        SyncError::reconciliation(
            format!("{entity} {shown}"),
            "update queued for an entity without a server id",
        )
    })
}

fn same_fields(server: &Task, local: &Task) -> bool {
    server.title == local.title
        && server.description.as_deref().unwrap_or_default()
            == local.description.as_deref().unwrap_or_default()
        && server.status == local.status
        && server.due == local.due
}
