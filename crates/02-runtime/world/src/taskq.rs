//! Dependency-driven task queue.
//!
//! A submitted task starts with one guard dependency plus one per unresolved
//! input. Each resolution decrements the count; the task that reaches zero
//! moves to the ready queue. Dropping the guard after registration means a
//! task whose inputs are all resolved becomes ready during `submit` itself.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use tracing::trace;

use crate::error::TaskError;
use crate::future::{Dependency, Future};
use crate::world::World;

/// Identifier of a task within its world.
pub type TaskId = u64;

/// Lifecycle of a task; every transition happens exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Ready,
    Executed,
}

type TaskBody = Box<dyn FnOnce(&World)>;
type ReadyQueue = Rc<RefCell<VecDeque<Rc<TaskCell>>>>;

struct TaskCell {
    id: TaskId,
    ndepend: Cell<usize>,
    state: Cell<TaskState>,
    body: RefCell<Option<TaskBody>>,
}

fn release(cell: &Rc<TaskCell>, ready: &ReadyQueue) {
    let left = cell.ndepend.get() - 1;
    cell.ndepend.set(left);
    if left == 0 {
        debug_assert_eq!(cell.state.get(), TaskState::Pending);
        cell.state.set(TaskState::Ready);
        ready.borrow_mut().push_back(Rc::clone(cell));
    }
}

#[derive(Default)]
pub(crate) struct TaskQueueState {
    ready: ReadyQueue,
    next_id: Cell<TaskId>,
    submitted: Cell<u64>,
    executed: Cell<u64>,
}

impl TaskQueueState {
    fn enqueue(&self, deps: &[&dyn Dependency], body: TaskBody) -> TaskId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.submitted.set(self.submitted.get() + 1);

        let cell = Rc::new(TaskCell {
            id,
            ndepend: Cell::new(1),
            state: Cell::new(TaskState::Pending),
            body: RefCell::new(Some(body)),
        });
        for dep in deps {
            if !dep.probe() {
                cell.ndepend.set(cell.ndepend.get() + 1);
                let waiting = Rc::clone(&cell);
                let ready = Rc::clone(&self.ready);
                dep.notify(Box::new(move || release(&waiting, &ready)));
            }
        }
        release(&cell, &self.ready);
        id
    }

    pub(crate) fn submitted(&self) -> u64 {
        self.submitted.get()
    }

    pub(crate) fn executed(&self) -> u64 {
        self.executed.get()
    }

    pub(crate) fn outstanding(&self) -> u64 {
        self.submitted.get() - self.executed.get()
    }
}

/// Task-queue view of a [`World`].
pub struct TaskQueue<'w> {
    world: &'w World,
}

impl<'w> TaskQueue<'w> {
    pub(crate) fn new(world: &'w World) -> Self {
        Self { world }
    }

    fn state(&self) -> &'w TaskQueueState {
        &self.world.tasks
    }

    /// Submits a task with no inputs; it is ready immediately.
    pub fn submit<R, F>(&self, body: F) -> Future<R>
    where
        R: Clone + 'static,
        F: FnOnce(&World) -> Result<R, TaskError> + 'static,
    {
        self.submit_after(&[], body)
    }

    /// Submits a task that becomes ready once every entry of `deps` resolves.
    ///
    /// If any dependency failed the body is skipped and the returned future
    /// fails with the propagated error.
    pub fn submit_after<R, F>(&self, deps: &[&dyn Dependency], body: F) -> Future<R>
    where
        R: Clone + 'static,
        F: FnOnce(&World) -> Result<R, TaskError> + 'static,
    {
        let result = Future::new();
        let out = result.clone();
        let inputs: Vec<Box<dyn Dependency>> = deps.iter().map(|dep| dep.boxed()).collect();
        let id = self.state().enqueue(
            deps,
            Box::new(move |world: &World| {
                if let Some(err) = inputs.iter().find_map(|dep| dep.failure()) {
                    out.fail(TaskError::Dependency(Box::new(err)));
                    return;
                }
                out.resolve(body(world));
            }),
        );
        trace!(world = self.world.id(), task = id, deps = deps.len(), "task submitted");
        result
    }

    /// Submits a task consuming the value of `a`.
    pub fn submit1<A, R, F>(&self, a: &Future<A>, body: F) -> Future<R>
    where
        A: Clone + 'static,
        R: Clone + 'static,
        F: FnOnce(&World, A) -> Result<R, TaskError> + 'static,
    {
        let input = a.clone();
        self.submit_after(&[a as &dyn Dependency], move |world| {
            body(world, take(&input)?)
        })
    }

    /// Submits a task consuming the values of `a` and `b`.
    pub fn submit2<A, B, R, F>(&self, a: &Future<A>, b: &Future<B>, body: F) -> Future<R>
    where
        A: Clone + 'static,
        B: Clone + 'static,
        R: Clone + 'static,
        F: FnOnce(&World, A, B) -> Result<R, TaskError> + 'static,
    {
        let (first, second) = (a.clone(), b.clone());
        self.submit_after(&[a as &dyn Dependency, b], move |world| {
            body(world, take(&first)?, take(&second)?)
        })
    }

    /// Runs one ready task if there is one. Never blocks.
    pub fn run_next_ready_task(&self) -> bool {
        let state = self.state();
        let Some(cell) = state.ready.borrow_mut().pop_front() else {
            return false;
        };
        let body = cell.body.borrow_mut().take();
        if let Some(body) = body {
            body(self.world);
        }
        cell.state.set(TaskState::Executed);
        state.executed.set(state.executed.get() + 1);
        trace!(world = self.world.id(), task = cell.id, "task executed");
        true
    }

    /// Tasks submitted but not yet executed (pending or ready).
    pub fn outstanding(&self) -> u64 {
        self.state().outstanding()
    }

    /// Tasks whose inputs are all resolved but that have not run yet.
    pub fn ready_len(&self) -> usize {
        self.state().ready.borrow().len()
    }

    /// True when every submitted task has executed.
    pub fn is_idle(&self) -> bool {
        self.outstanding() == 0
    }
}

fn take<T: Clone + 'static>(input: &Future<T>) -> Result<T, TaskError> {
    match input.try_get() {
        Some(Ok(value)) => Ok(value),
        Some(Err(err)) => Err(TaskError::Dependency(Box::new(err))),
        None => Err(TaskError::failed("input consumed before it resolved")),
    }
}
