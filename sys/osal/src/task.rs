// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Task management.
//!
//! Tasks wrap kernel threads. The entry point is run through a stub that
//! performs exit bookkeeping when the entry returns or calls
//! [`Osal::task_exit`], so a task slot cannot outlive its thread. External
//! priorities run 0 (most important) to 255 and are remapped onto the
//! kernel's smaller priority range at create time.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::ThreadId;

use abi::{ObjectId, OsError, OsResult, Priority};

use crate::clock::{millis_to_ticks, ticks_to_duration};
use crate::port;
use crate::util::lock;
use crate::Osal;

pub(crate) struct TaskData {
    pub priority: Priority,
    pub stack_size: usize,
    pub thread: Option<port::Thread>,
    pub thread_id: Option<ThreadId>,
    pub delete_hook: Option<Box<dyn Fn() + Send + Sync>>,
}

/// Information reported by [`Osal::task_get_info`].
#[derive(Debug, Clone)]
pub struct TaskProp {
    pub name: String,
    pub creator: Option<ObjectId>,
    pub stack_size: usize,
    pub priority: Priority,
}

/// Panic payload used by `task_exit` to unwind back to the entry stub.
struct TaskExit;

/// Installs a panic hook that keeps `task_exit`'s controlled unwind out of
/// the panic log, forwarding every real panic to the previous hook.
pub(crate) fn install_exit_hook() {
    let prev = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        if info.payload().is::<TaskExit>() {
            return;
        }
        prev(info);
    }));
}

/// Maps an external priority (0 most important .. 255 least) onto the
/// kernel's `0..MAX_PRIORITIES` range, where larger is more urgent.
pub(crate) fn remap_priority(p: Priority) -> OsResult<u32> {
    let internal = (255 - u32::from(p.0)) / (256 / port::MAX_PRIORITIES);
    if internal >= port::MAX_PRIORITIES {
        return Err(OsError::InvalidPriority);
    }
    Ok(internal)
}

impl Osal {
    /// Creates and starts a task.
    ///
    /// `entry` runs on the new thread; when it returns, the task's slot is
    /// released as if it had called [`Osal::task_exit`]. The flags word is
    /// accepted for interface compatibility and has no effect on the host
    /// port.
    pub fn task_create(
        self: &Arc<Self>,
        name: &str,
        stack_size: usize,
        priority: Priority,
        _flags: u32,
        entry: impl FnOnce() + Send + 'static,
    ) -> OsResult<ObjectId> {
        let kernel_priority = remap_priority(priority)?;
        let creator = self.task_get_id().ok();

        let (id, decorated) = {
            let mut tasks = lock(&self.tasks);
            let id = tasks.allocate(
                name,
                creator,
                TaskData {
                    priority,
                    stack_size,
                    thread: None,
                    thread_id: None,
                    delete_hook: None,
                },
            )?;
            (id, tasks.get(id).unwrap().decorated.clone())
        };

        // The stub holds the new thread at the gate until the slot below
        // is fully committed; otherwise an eager task could look itself up
        // before its handle is in the table.
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let osal = Arc::clone(self);
        let stub = move || {
            let _ = gate_rx.recv();
            let outcome = panic::catch_unwind(AssertUnwindSafe(entry));
            match outcome {
                Ok(()) => {}
                Err(payload) if payload.is::<TaskExit>() => {}
                Err(payload) => {
                    log::warn!("task panicked; releasing its slot");
                    drop(payload);
                }
            }
            osal.task_finalize(id);
        };

        let spawned = port::Thread::spawn(&decorated, stack_size, kernel_priority, stub);
        let mut tasks = lock(&self.tasks);
        match spawned {
            Ok(thread) => {
                let rec = tasks.get_mut(id)?;
                rec.data.thread_id = Some(thread.thread_id());
                rec.data.thread = Some(thread);
                drop(tasks);
                let _ = gate_tx.send(());
                Ok(id)
            }
            Err(e) => {
                log::warn!("thread spawn failed: {e}");
                let _ = tasks.release(id);
                Err(OsError::Error)
            }
        }
    }

    /// Deletes a task by ID, running its delete hook first.
    ///
    /// On the host port the underlying thread cannot be terminated from
    /// outside; the slot and name are reclaimed immediately and the thread
    /// is detached. A task that wants to stop itself should call
    /// [`Osal::task_exit`] instead.
    pub fn task_delete(&self, id: ObjectId) -> OsResult<()> {
        let record = lock(&self.tasks).release(id)?;
        if let Some(hook) = &record.data.delete_hook {
            hook();
        }
        drop(record);
        Ok(())
    }

    /// Ends the calling task. The entry stub reclaims the slot.
    pub fn task_exit(&self) -> ! {
        panic::panic_any(TaskExit)
    }

    /// Releases `id` when the entry stub winds down, unless an external
    /// delete already did.
    fn task_finalize(&self, id: ObjectId) {
        let _ = lock(&self.tasks).release(id);
    }

    /// Installs a function the core will run when *this* task is deleted.
    pub fn task_install_delete_handler(
        &self,
        hook: impl Fn() + Send + Sync + 'static,
    ) -> OsResult<()> {
        let id = self.task_get_id()?;
        let mut tasks = lock(&self.tasks);
        tasks.get_mut(id)?.data.delete_hook = Some(Box::new(hook));
        Ok(())
    }

    /// Suspends the calling task for at least `ms` milliseconds, rounded
    /// up to whole ticks.
    pub fn task_delay(&self, ms: u32) -> OsResult<()> {
        port::delay(ticks_to_duration(millis_to_ticks(ms)));
        Ok(())
    }

    /// Changes a task's priority.
    pub fn task_set_priority(&self, id: ObjectId, priority: Priority) -> OsResult<()> {
        let kernel_priority = remap_priority(priority)?;
        let mut tasks = lock(&self.tasks);
        let rec = tasks.get_mut(id)?;
        rec.data.priority = priority;
        // The host port cannot re-class a running thread; the new value
        // takes effect for bookkeeping and reporting.
        log::debug!("task {:?} priority -> {kernel_priority}", rec.name);
        Ok(())
    }

    /// Stores the calling task's ID in per-thread storage so later
    /// [`Osal::task_get_id`] calls are O(1).
    pub fn task_register(&self) -> OsResult<()> {
        let id = self.task_id_by_thread()?;
        port::set_self_id(id);
        Ok(())
    }

    /// The calling task's ID: per-thread storage if the task registered,
    /// otherwise a table scan against the current kernel handle.
    pub fn task_get_id(&self) -> OsResult<ObjectId> {
        if let Some(id) = port::self_id() {
            return Ok(id);
        }
        self.task_id_by_thread()
    }

    fn task_id_by_thread(&self) -> OsResult<ObjectId> {
        let me = port::current_thread_id();
        let tasks = lock(&self.tasks);
        let id = tasks
            .iter_live()
            .find(|(_, r)| r.data.thread_id == Some(me))
            .map(|(id, _)| id)
            .ok_or(OsError::InvalidId);
        id
    }

    pub fn task_get_id_by_name(&self, name: &str) -> OsResult<ObjectId> {
        lock(&self.tasks).find_by_name(name)
    }

    pub fn task_get_info(&self, id: ObjectId) -> OsResult<TaskProp> {
        let tasks = lock(&self.tasks);
        let rec = tasks.get(id)?;
        Ok(TaskProp {
            name: rec.name.clone(),
            creator: rec.creator,
            stack_size: rec.data.stack_size,
            priority: rec.data.priority,
        })
    }
}
