use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::model::{TaskId, TaskState};

/// Process-wide mapping task_id -> per-task state. No persistence: a task
/// that isn't in this map never happened, as far as retry/regenerate calls
/// are concerned.
///
/// The outer `RwLock` only ever guards the map's shape (insert/remove); a
/// lookup clones the inner `Arc<Mutex<TaskState>>` and releases the outer
/// lock immediately, so two workers mutating *different* tasks never
/// contend with each other, and two workers mutating the *same* task
/// serialize on that task's own mutex exactly as the shared-resource policy
/// requires.
#[derive(Default)]
pub struct TaskStateRegistry {
    tasks: RwLock<HashMap<TaskId, Arc<Mutex<TaskState>>>>,
}

impl TaskStateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, task_id: TaskId, initial: TaskState) -> Arc<Mutex<TaskState>> {
        let handle = Arc::new(Mutex::new(initial));
        self.tasks
            .write()
            .expect("task registry lock poisoned")
            .insert(task_id, handle.clone());
        handle
    }

    fn handle(&self, task_id: &TaskId) -> Option<Arc<Mutex<TaskState>>> {
        self.tasks
            .read()
            .expect("task registry lock poisoned")
            .get(task_id)
            .cloned()
    }

    /// Returns a snapshot clone of the task's state, if it exists.
    pub fn get(&self, task_id: &TaskId) -> Option<TaskState> {
        self.handle(task_id)
            .map(|handle| handle.lock().expect("task state lock poisoned").clone())
    }

    /// Applies `mutator` under the task's own lock. No-op (returns `false`)
    /// if the task no longer exists.
    pub fn update(&self, task_id: &TaskId, mutator: impl FnOnce(&mut TaskState)) -> bool {
        match self.handle(task_id) {
            Some(handle) => {
                mutator(&mut handle.lock().expect("task state lock poisoned"));
                true
            }
            None => false,
        }
    }

    pub fn delete(&self, task_id: &TaskId) {
        self.tasks
            .write()
            .expect("task registry lock poisoned")
            .remove(task_id);
    }
}
