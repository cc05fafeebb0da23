#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeMap;

use taskbatch_core::error::SyncError;
use taskbatch_core::model::{EntityId, Subtask, Task};
use taskbatch_core::remote::RemoteClient;
use taskbatch_core::session::Session;

#[derive(Debug, Default)]
struct State {
    tasks: BTreeMap<u64, Task>,
    subtasks: BTreeMap<u64, Subtask>,
    next_id: u64,
}

/// In-memory stand-in for the task API. Every call is logged as
/// `METHOD /path`; scripted failures answer with HTTP 500.
#[derive(Debug)]
pub struct FakeServer {
    state: RefCell<State>,
    calls: RefCell<Vec<String>>,
    failures: RefCell<Vec<(String, usize)>>,
    echo_ids: bool,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::with_id_echo(true)
    }

    /// A server whose create responses carry only a message, never the
    /// new id.
    pub fn silent_ids() -> Self {
        Self::with_id_echo(false)
    }

    fn with_id_echo(echo_ids: bool) -> Self {
        Self {
            state: RefCell::new(State::default()),
            calls: RefCell::new(vec![]),
            failures: RefCell::new(vec![]),
            echo_ids,
        }
    }

    pub fn seed_task(&self, id: u64, title: &str) {
        let mut task = Task::new(title);
        task.id = Some(EntityId::Remote(id));
        let mut state = self.state.borrow_mut();
        state.next_id = state.next_id.max(id);
        state.tasks.insert(id, task);
    }

    pub fn seed_subtask(&self, id: u64, task_id: u64, title: &str) {
        let mut subtask = Subtask::new(EntityId::Remote(task_id), title);
        subtask.id = Some(EntityId::Remote(id));
        let mut state = self.state.borrow_mut();
        state.next_id = state.next_id.max(id);
        state.subtasks.insert(id, subtask);
    }

    /// Makes the `nth` (1-based) call with this label fail.
    pub fn fail_nth(&self, label: &str, nth: usize) {
        self.failures.borrow_mut().push((label.to_string(), nth));
    }

    pub fn clear_failures(&self) {
        self.failures.borrow_mut().clear();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn count(&self, label: &str) -> usize {
        self.calls.borrow().iter().filter(|call| *call == label).count()
    }

    pub fn reset_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.state.borrow().tasks.values().cloned().collect()
    }

    pub fn subtasks_of(&self, task_id: u64) -> Vec<Subtask> {
        self.state
            .borrow()
            .subtasks
            .values()
            .filter(|subtask| subtask.task_id == EntityId::Remote(task_id))
            .cloned()
            .collect()
    }

    fn call(&self, label: String) -> Result<(), SyncError> {
        self.calls.borrow_mut().push(label.clone());
        let seen = self.count(&label);
        if self
            .failures
            .borrow()
            .iter()
            .any(|(failing, nth)| *failing == label && *nth == seen)
        {
            return Err(SyncError::remote(label, Some(500), "scripted failure"));
        }
        Ok(())
    }

    fn next_id(&self) -> u64 {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        state.next_id
    }

    fn not_found(label: String) -> SyncError {
        SyncError::remote(label, Some(404), "not found")
    }
}

impl RemoteClient for FakeServer {
    fn list_tasks(&self, _: &Session) -> Result<Vec<Task>, SyncError> {
        self.call("GET /tasks".to_string())?;
        Ok(self.tasks())
    }

    fn create_task(&self, _: &Session, task: &Task) -> Result<Option<u64>, SyncError> {
        self.call("POST /tasks".to_string())?;
        let id = self.next_id();
        let mut stored = task.clone();
        stored.id = Some(EntityId::Remote(id));
        stored.subtasks.clear();
        self.state.borrow_mut().tasks.insert(id, stored);
        Ok(self.echo_ids.then_some(id))
    }

    fn update_task(&self, _: &Session, id: u64, task: &Task) -> Result<(), SyncError> {
        let label = format!("PUT /tasks/{id}");
        self.call(label.clone())?;
        let mut state = self.state.borrow_mut();
        let stored = state.tasks.get_mut(&id).ok_or_else(|| Self::not_found(label))?;
        stored.title = task.title.clone();
        stored.description = task.description.clone();
        stored.status = task.status;
        stored.due = task.due;
        Ok(())
    }

    fn delete_task(&self, _: &Session, id: u64) -> Result<(), SyncError> {
        let label = format!("DELETE /tasks/{id}");
        self.call(label.clone())?;
        let mut state = self.state.borrow_mut();
        state.tasks.remove(&id).ok_or_else(|| Self::not_found(label))?;
        state
            .subtasks
            .retain(|_, subtask| subtask.task_id != EntityId::Remote(id));
        Ok(())
    }

    fn list_subtasks(&self, _: &Session, task_id: u64) -> Result<Vec<Subtask>, SyncError> {
        self.call(format!("GET /tasks/{task_id}/subtasks"))?;
        Ok(self.subtasks_of(task_id))
    }

    fn create_subtask(
        &self,
        _: &Session,
        task_id: u64,
        subtask: &Subtask,
    ) -> Result<Option<u64>, SyncError> {
        let label = format!("POST /tasks/{task_id}/subtasks");
        self.call(label.clone())?;
        if !self.state.borrow().tasks.contains_key(&task_id) {
            return Err(Self::not_found(label));
        }
        let id = self.next_id();
        let mut stored = subtask.clone();
        stored.id = Some(EntityId::Remote(id));
        stored.task_id = EntityId::Remote(task_id);
        self.state.borrow_mut().subtasks.insert(id, stored);
        Ok(self.echo_ids.then_some(id))
    }

    fn update_subtask(&self, _: &Session, id: u64, subtask: &Subtask) -> Result<(), SyncError> {
        let label = format!("PUT /subtasks/{id}");
        self.call(label.clone())?;
        let mut state = self.state.borrow_mut();
        let stored = state.subtasks.get_mut(&id).ok_or_else(|| Self::not_found(label))?;
        stored.title = subtask.title.clone();
        stored.status = subtask.status;
        stored.due = subtask.due;
        Ok(())
    }

    fn delete_subtask(&self, _: &Session, id: u64) -> Result<(), SyncError> {
        let label = format!("DELETE /subtasks/{id}");
        self.call(label.clone())?;
        self.state
            .borrow_mut()
            .subtasks
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(label))
    }
}

pub fn session() -> Option<Session> {
    Session::new("test-token")
}
