//! Single-assignment result cells and the dependency trait tasks wait on.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::error::TaskError;
use crate::runtime::Runtime;

type Callback = Box<dyn FnOnce()>;

enum Slot<T> {
    Pending(SmallVec<[Callback; 2]>),
    Resolved(Result<T, TaskError>),
}

/// A value that becomes available later, exactly once.
///
/// Clones share the same cell. Resolving a future runs every callback that
/// was waiting on it, which is how dependent tasks move to the ready set.
pub struct Future<T> {
    cell: Rc<RefCell<Slot<T>>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Rc::clone(&self.cell),
        }
    }
}

impl<T: Clone + 'static> Default for Future<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.cell.borrow() {
            Slot::Pending(_) => "pending",
            Slot::Resolved(Ok(_)) => "ready",
            Slot::Resolved(Err(_)) => "failed",
        };
        f.debug_struct("Future").field("state", &state).finish()
    }
}

impl<T: Clone + 'static> Future<T> {
    /// Creates an unresolved future.
    pub fn new() -> Self {
        Self {
            cell: Rc::new(RefCell::new(Slot::Pending(SmallVec::new()))),
        }
    }

    /// Creates a future that is already fulfilled.
    pub fn ready(value: T) -> Self {
        Self {
            cell: Rc::new(RefCell::new(Slot::Resolved(Ok(value)))),
        }
    }

    /// Creates a future that has already failed.
    pub fn failed(err: TaskError) -> Self {
        Self {
            cell: Rc::new(RefCell::new(Slot::Resolved(Err(err)))),
        }
    }

    /// Fulfills the future. Panics if it was already resolved.
    pub fn set(&self, value: T) {
        self.resolve(Ok(value));
    }

    /// Fails the future. Panics if it was already resolved.
    pub fn fail(&self, err: TaskError) {
        self.resolve(Err(err));
    }

    pub fn resolve(&self, outcome: Result<T, TaskError>) {
        let waiting = {
            let mut slot = self.cell.borrow_mut();
            match std::mem::replace(&mut *slot, Slot::Resolved(outcome)) {
                Slot::Pending(callbacks) => callbacks,
                Slot::Resolved(_) => panic!("future assigned twice"),
            }
        };
        for callback in waiting {
            callback();
        }
    }

    /// True once the future holds a value or a failure.
    pub fn probe(&self) -> bool {
        matches!(&*self.cell.borrow(), Slot::Resolved(_))
    }

    /// Copy of the outcome, if resolved.
    pub fn try_get(&self) -> Option<Result<T, TaskError>> {
        match &*self.cell.borrow() {
            Slot::Pending(_) => None,
            Slot::Resolved(outcome) => Some(outcome.clone()),
        }
    }

    /// Waits for the outcome while driving progress in every world.
    pub fn get(&self, runtime: &Runtime) -> Result<T, TaskError> {
        loop {
            if let Some(outcome) = self.try_get() {
                return outcome;
            }
            runtime.await_until(|| self.probe());
        }
    }

    /// Runs `callback` once the future resolves (immediately if it already has).
    pub fn on_ready(&self, callback: impl FnOnce() + 'static) {
        {
            let mut slot = self.cell.borrow_mut();
            if let Slot::Pending(callbacks) = &mut *slot {
                callbacks.push(Box::new(callback));
                return;
            }
        }
        callback();
    }
}

/// Something a task can wait on.
pub trait Dependency {
    /// True once resolved, successfully or not.
    fn probe(&self) -> bool;
    /// The failure, if resolved unsuccessfully.
    fn failure(&self) -> Option<TaskError>;
    /// Registers a callback for resolution.
    fn notify(&self, callback: Box<dyn FnOnce()>);
    /// Owned handle to the same dependency.
    fn boxed(&self) -> Box<dyn Dependency>;
}

impl<T: Clone + 'static> Dependency for Future<T> {
    fn probe(&self) -> bool {
        Future::probe(self)
    }

    fn failure(&self) -> Option<TaskError> {
        match &*self.cell.borrow() {
            Slot::Resolved(Err(err)) => Some(err.clone()),
            _ => None,
        }
    }

    fn notify(&self, callback: Box<dyn FnOnce()>) {
        self.on_ready(callback);
    }

    fn boxed(&self) -> Box<dyn Dependency> {
        Box::new(self.clone())
    }
}
