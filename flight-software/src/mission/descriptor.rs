use std::sync::Arc;

/// Outcome of an update hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateResult {
    Ok,
    /// The part of the snapshot this hook owns could not be refreshed and
    /// keeps its default.
    Warning,
}

/// Reads the world into the snapshot.
pub trait Update<S>: Send + Sync {
    fn update(&self, state: &mut S) -> UpdateResult;
}

/// One step of a subsystem state machine, gated by a predicate over the
/// snapshot.
pub trait Action<S>: Send + Sync {
    /// Pure predicate over the snapshot and the task's own state.
    fn condition(&self, state: &S) -> bool;

    /// The snapshot is read-only here; subsystem state lives in the task.
    fn execute(&self, state: &S);
}

/// Named registration of an update hook together with its owning task.
pub struct UpdateDescriptor<S> {
    name: &'static str,
    task: Arc<dyn Update<S>>,
}

impl<S> UpdateDescriptor<S> {
    pub fn new(name: &'static str, task: Arc<dyn Update<S>>) -> Self {
        Self { name, task }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn update(&self, state: &mut S) -> UpdateResult {
        self.task.update(state)
    }
}

impl<S> Clone for UpdateDescriptor<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            task: self.task.clone(),
        }
    }
}

/// Named registration of an action hook together with its owning task.
pub struct ActionDescriptor<S> {
    name: &'static str,
    task: Arc<dyn Action<S>>,
}

impl<S> ActionDescriptor<S> {
    pub fn new(name: &'static str, task: Arc<dyn Action<S>>) -> Self {
        Self { name, task }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn condition(&self, state: &S) -> bool {
        self.task.condition(state)
    }

    pub fn execute(&self, state: &S) {
        self.task.execute(state)
    }
}

impl<S> Clone for ActionDescriptor<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            task: self.task.clone(),
        }
    }
}
