// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The object tables.
//!
//! Every object class (task, queue, semaphore, ...) is backed by one
//! fixed-capacity `Table`, guarded by its own mutex in the [`crate::Osal`]
//! struct. A slot is addressed by an [`ObjectId`] carrying both its index
//! and its generation; releasing a slot bumps the generation, so a stale ID
//! fails validation instead of silently addressing the slot's next
//! occupant. This is what lets the tables be sized exactly to their
//! advertised maxima.
//!
//! Allocation is two-phase: `allocate` claims the slot and publishes the
//! name under the table lock, the caller then drops the lock to create the
//! underlying kernel object, and finally either commits the handle into the
//! record or `release`s the slot if the kernel call failed. No slot leaks
//! on the failure path, and no kernel call happens under a table lock.

use abi::{Generation, ObjectClass, ObjectId, OsError, OsResult, KERNEL_NAME_LEN, MAX_API_NAME};

/// One live object: its names, its creator, and the class-specific payload
/// (which is where the kernel handle lives).
pub(crate) struct Record<T> {
    /// Name as the user supplied it. Uniqueness is enforced on this.
    pub name: String,
    /// Name registered with the underlying kernel, shortened and suffixed
    /// to respect the kernel's identifier limit.
    pub decorated: String,
    /// Task that created the object, when the creator was a registered
    /// task.
    pub creator: Option<ObjectId>,
    pub data: T,
}

struct Slot<T> {
    generation: Generation,
    record: Option<Record<T>>,
}

pub(crate) struct Table<T> {
    class: ObjectClass,
    slots: Vec<Slot<T>>,
    live: usize,
    name_counter: u8,
}

impl<T> Table<T> {
    pub fn new(class: ObjectClass, capacity: usize) -> Table<T> {
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(Slot {
                generation: Generation::ZERO,
                record: None,
            });
        }
        Table {
            class,
            slots,
            live: 0,
            name_counter: 0,
        }
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Claims a slot for a named object. The name must be unique among live
    /// objects of this class.
    pub fn allocate(&mut self, name: &str, creator: Option<ObjectId>, data: T) -> OsResult<ObjectId> {
        self.allocate_inner(name, creator, data, true)
    }

    /// Claims a slot for an object whose label is not subject to the
    /// uniqueness rule. Streams use this: the label is the path or peer
    /// description, and the same file may legitimately be open twice.
    pub fn allocate_shared_name(
        &mut self,
        label: &str,
        creator: Option<ObjectId>,
        data: T,
    ) -> OsResult<ObjectId> {
        self.allocate_inner(label, creator, data, false)
    }

    fn allocate_inner(
        &mut self,
        name: &str,
        creator: Option<ObjectId>,
        data: T,
        unique: bool,
    ) -> OsResult<ObjectId> {
        if name.len() >= MAX_API_NAME && unique {
            return Err(OsError::NameTooLong);
        }
        if unique && self.iter_live().any(|(_, r)| r.name == name) {
            return Err(OsError::NameTaken);
        }
        if self.live >= self.slots.len() {
            log::debug!("{:?} table full ({} live)", self.class, self.live);
            return Err(OsError::NoFreeIds);
        }
        let index = self
            .slots
            .iter()
            .position(|s| s.record.is_none())
            .ok_or(OsError::NoFreeIds)?;
        let decorated = self.decorate(name);
        let slot = &mut self.slots[index];
        slot.record = Some(Record {
            name: name.to_string(),
            decorated,
            creator,
            data,
        });
        self.live += 1;
        Ok(ObjectId::for_index_and_gen(index, slot.generation))
    }

    /// Validates an ID: in range, generation current, slot occupied.
    pub fn check(&self, id: ObjectId) -> OsResult<usize> {
        let index = id.index();
        let slot = self.slots.get(index).ok_or(OsError::InvalidId)?;
        if slot.generation != id.generation() || slot.record.is_none() {
            return Err(OsError::InvalidId);
        }
        Ok(index)
    }

    pub fn get(&self, id: ObjectId) -> OsResult<&Record<T>> {
        let index = self.check(id)?;
        Ok(self.slots[index].record.as_ref().unwrap())
    }

    pub fn get_mut(&mut self, id: ObjectId) -> OsResult<&mut Record<T>> {
        let index = self.check(id)?;
        Ok(self.slots[index].record.as_mut().unwrap())
    }

    /// Releases a slot, returning its record. The generation advances so
    /// the released ID goes stale immediately; kernel handles inside the
    /// returned record drop (and thus close) with it unless the caller
    /// keeps them.
    pub fn release(&mut self, id: ObjectId) -> OsResult<Record<T>> {
        let index = self.check(id)?;
        let slot = &mut self.slots[index];
        let record = slot.record.take().unwrap();
        slot.generation = slot.generation.next();
        self.live -= 1;
        Ok(record)
    }

    pub fn find_by_name(&self, name: &str) -> OsResult<ObjectId> {
        if name.len() >= MAX_API_NAME {
            return Err(OsError::NameTooLong);
        }
        self.iter_live()
            .find(|(_, r)| r.name == name)
            .map(|(id, _)| id)
            .ok_or(OsError::NameNotFound)
    }

    /// Live record at a raw table index, if any. The select machinery
    /// works in index space (its bit sets have no room for generations),
    /// so it resolves indices through this.
    pub fn get_at_index(&self, index: usize) -> Option<(ObjectId, &Record<T>)> {
        let slot = self.slots.get(index)?;
        slot.record
            .as_ref()
            .map(|r| (ObjectId::for_index_and_gen(index, slot.generation), r))
    }

    pub fn get_at_index_mut(&mut self, index: usize) -> Option<(ObjectId, &mut Record<T>)> {
        let slot = self.slots.get_mut(index)?;
        let generation = slot.generation;
        slot.record
            .as_mut()
            .map(|r| (ObjectId::for_index_and_gen(index, generation), r))
    }

    pub fn iter_live(&self) -> impl Iterator<Item = (ObjectId, &Record<T>)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.record
                .as_ref()
                .map(|r| (ObjectId::for_index_and_gen(i, s.generation), r))
        })
    }

    pub fn iter_live_mut(&mut self) -> impl Iterator<Item = (ObjectId, &mut Record<T>)> {
        self.slots.iter_mut().enumerate().filter_map(|(i, s)| {
            let generation = s.generation;
            s.record
                .as_mut()
                .map(move |r| (ObjectId::for_index_and_gen(i, generation), r))
        })
    }

    /// Forms the kernel-side name: the user name truncated to the kernel
    /// identifier limit less the suffix, plus a two-hex-digit counter. Two
    /// objects given the same user name therefore still get distinct
    /// kernel names. The counter wraps freely; within tables of this size
    /// a collision among live names is not a practical concern.
    fn decorate(&mut self, name: &str) -> String {
        let keep = KERNEL_NAME_LEN - 3;
        let mut decorated: String = name.chars().take(keep).collect();
        decorated.push_str(&format!("{:02x}", self.name_counter));
        self.name_counter = self.name_counter.wrapping_add(1);
        decorated
    }
}
