//! Pending-destruction list.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Shared handles whose release waits for the next fence.
#[derive(Default)]
pub(crate) struct DeferredCleanup {
    pending: RefCell<Vec<Rc<dyn Any>>>,
    flushed: Cell<u64>,
}

impl DeferredCleanup {
    pub(crate) fn defer(&self, handle: Rc<dyn Any>) {
        self.pending.borrow_mut().push(handle);
    }

    /// Drops every held handle and returns how many there were.
    ///
    /// The list is detached first, so destructors may defer again.
    pub(crate) fn flush(&self) -> usize {
        let released = std::mem::take(&mut *self.pending.borrow_mut());
        let count = released.len();
        drop(released);
        self.flushed.set(self.flushed.get() + count as u64);
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    pub(crate) fn flushed(&self) -> u64 {
        self.flushed.get()
    }
}
