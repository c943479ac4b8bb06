//! In-flight task tracking

use std::collections::HashMap;
use std::sync::RwLock;

use uuid::Uuid;

/// Live registry of in-flight requests, feeding the `tasks` count of
/// `/health`. One-off tasks register for their whole container run; session
/// requests register while their dispatch is executing. State is
/// process-local and lost on restart.
#[derive(Default)]
pub struct ActiveTasks {
    tasks: RwLock<HashMap<Uuid, String>>,
}

impl ActiveTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, task_id: Uuid, task_name: &str) {
        self.tasks
            .write()
            .expect("task tracker lock poisoned")
            .insert(task_id, task_name.to_string());
    }

    pub fn unregister(&self, task_id: Uuid) {
        self.tasks
            .write()
            .expect("task tracker lock poisoned")
            .remove(&task_id);
    }

    pub fn count(&self) -> usize {
        self.tasks.read().expect("task tracker lock poisoned").len()
    }
}
