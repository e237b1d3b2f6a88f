//! Local object ↔ id table.
//!
//! Entries live in a generational arena. Objects are held through
//! `Weak<dyn Any>`, so registration never extends an object's life; the weak
//! handle does keep the allocation itself reserved, which makes the
//! allocation address a stable identity key for as long as the entry exists.

use std::any::Any;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use slotmap::{new_key_type, SlotMap};

use crate::id::UniqueId;

new_key_type! {
    /// Arena slot of a registry entry.
    pub struct ObjectKey;
}

struct Entry {
    id: UniqueId,
    addr: usize,
    object: Weak<dyn Any>,
}

#[derive(Default)]
pub(crate) struct Registry {
    entries: SlotMap<ObjectKey, Entry>,
    by_id: HashMap<UniqueId, ObjectKey>,
    by_addr: HashMap<usize, ObjectKey>,
}

fn address_of<T>(object: &Rc<T>) -> usize {
    Rc::as_ptr(object) as *const () as usize
}

impl Registry {
    /// Stores both directions. Returns the existing id if `object` is
    /// already present.
    pub(crate) fn insert<T: Any>(&mut self, id: UniqueId, object: &Rc<T>) -> Result<(), UniqueId> {
        let addr = address_of(object);
        if let Some(key) = self.by_addr.get(&addr) {
            return Err(self.entries[*key].id);
        }
        let erased: Rc<dyn Any> = Rc::clone(object) as Rc<dyn Any>;
        let key = self.entries.insert(Entry {
            id,
            addr,
            object: Rc::downgrade(&erased),
        });
        self.by_id.insert(id, key);
        self.by_addr.insert(addr, key);
        Ok(())
    }

    pub(crate) fn remove_object<T>(&mut self, object: &Rc<T>) -> Option<UniqueId> {
        let key = self.by_addr.remove(&address_of(object))?;
        let entry = self.entries.remove(key)?;
        self.by_id.remove(&entry.id);
        Some(entry.id)
    }

    pub(crate) fn remove_id(&mut self, id: UniqueId) -> Option<UniqueId> {
        let key = self.by_id.remove(&id)?;
        let entry = self.entries.remove(key)?;
        self.by_addr.remove(&entry.addr);
        Some(entry.id)
    }

    /// Live object for `id`, if registered, still alive and of type `T`.
    pub(crate) fn get<T: Any>(&self, id: UniqueId) -> Option<Rc<T>> {
        let key = self.by_id.get(&id)?;
        let object = self.entries.get(*key)?.object.upgrade()?;
        object.downcast::<T>().ok()
    }

    pub(crate) fn id_of<T>(&self, object: &Rc<T>) -> Option<UniqueId> {
        let key = self.by_addr.get(&address_of(object))?;
        self.entries.get(*key).map(|entry| entry.id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
