// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Semaphores and mutexes.
//!
//! Binary semaphores hold at most one token, counting semaphores up to
//! [`abi::MAX_SEM_VALUE`], and mutexes are always recursive with owner
//! tracking. Timed waits convert milliseconds to ticks the same way task
//! delays do.

use std::sync::Arc;

use abi::{ObjectId, OsError, OsResult, Timeout, MAX_SEM_VALUE};

use crate::clock::{wait_of, Wait};
use crate::port;
use crate::util::lock;
use crate::Osal;

pub(crate) struct BinSemData {
    pub sem: Arc<port::BinSem>,
}

pub(crate) struct CountSemData {
    pub sem: Arc<port::CountSem>,
}

pub(crate) struct MutSemData {
    pub mutex: Arc<port::RecursiveMutex>,
}

/// Information reported by [`Osal::bin_sem_get_info`].
#[derive(Debug, Clone)]
pub struct BinSemProp {
    pub name: String,
    pub creator: Option<ObjectId>,
    pub value: u32,
}

/// Information reported by [`Osal::count_sem_get_info`].
#[derive(Debug, Clone)]
pub struct CountSemProp {
    pub name: String,
    pub creator: Option<ObjectId>,
    pub value: u32,
}

/// Information reported by [`Osal::mut_sem_get_info`].
#[derive(Debug, Clone)]
pub struct MutSemProp {
    pub name: String,
    pub creator: Option<ObjectId>,
}

fn take_with(sem_take: impl Fn(Option<std::time::Duration>) -> bool, try_take: impl Fn() -> bool, timeout: Timeout) -> OsResult<()> {
    let ok = match wait_of(timeout) {
        Wait::Poll => try_take(),
        Wait::Forever => sem_take(None),
        Wait::For(d) => sem_take(Some(d)),
    };
    if ok {
        Ok(())
    } else {
        Err(OsError::SemTimeout)
    }
}

impl Osal {
    /// Creates a binary semaphore. Any nonzero initial value means "token
    /// present".
    pub fn bin_sem_create(&self, name: &str, initial: u32, _options: u32) -> OsResult<ObjectId> {
        let creator = self.task_get_id().ok();
        lock(&self.bin_sems).allocate(
            name,
            creator,
            BinSemData {
                sem: Arc::new(port::BinSem::new(initial != 0)),
            },
        )
    }

    pub fn bin_sem_delete(&self, id: ObjectId) -> OsResult<()> {
        lock(&self.bin_sems).release(id).map(drop)
    }

    /// Posts the token. Posting a semaphore whose token is already present
    /// is reported as a failure, matching the underlying kernel.
    pub fn bin_sem_give(&self, id: ObjectId) -> OsResult<()> {
        let sem = Arc::clone(&lock(&self.bin_sems).get(id)?.data.sem);
        if sem.give() {
            Ok(())
        } else {
            Err(OsError::SemFailure)
        }
    }

    /// Takes the token, pending until it arrives.
    pub fn bin_sem_take(&self, id: ObjectId) -> OsResult<()> {
        let sem = Arc::clone(&lock(&self.bin_sems).get(id)?.data.sem);
        take_with(|t| sem.take(t), || sem.try_take(), Timeout::Pend)
    }

    /// Takes the token with a millisecond timeout.
    pub fn bin_sem_timed_wait(&self, id: ObjectId, timeout: Timeout) -> OsResult<()> {
        let sem = Arc::clone(&lock(&self.bin_sems).get(id)?.data.sem);
        take_with(|t| sem.take(t), || sem.try_take(), timeout)
    }

    /// Waking every pending taker at once is not offered by the underlying
    /// kernel's binary semaphores.
    pub fn bin_sem_flush(&self, id: ObjectId) -> OsResult<()> {
        lock(&self.bin_sems).check(id)?;
        Err(OsError::NotImplemented)
    }

    pub fn bin_sem_get_id_by_name(&self, name: &str) -> OsResult<ObjectId> {
        lock(&self.bin_sems).find_by_name(name)
    }

    pub fn bin_sem_get_info(&self, id: ObjectId) -> OsResult<BinSemProp> {
        let sems = lock(&self.bin_sems);
        let rec = sems.get(id)?;
        Ok(BinSemProp {
            name: rec.name.clone(),
            creator: rec.creator,
            value: rec.data.sem.value() as u32,
        })
    }

    /// Creates a counting semaphore with the given initial count.
    pub fn count_sem_create(&self, name: &str, initial: u32, _options: u32) -> OsResult<ObjectId> {
        if initial > MAX_SEM_VALUE {
            return Err(OsError::InvalidSemValue);
        }
        let creator = self.task_get_id().ok();
        lock(&self.count_sems).allocate(
            name,
            creator,
            CountSemData {
                sem: Arc::new(port::CountSem::new(initial, MAX_SEM_VALUE)),
            },
        )
    }

    pub fn count_sem_delete(&self, id: ObjectId) -> OsResult<()> {
        lock(&self.count_sems).release(id).map(drop)
    }

    pub fn count_sem_give(&self, id: ObjectId) -> OsResult<()> {
        let sem = Arc::clone(&lock(&self.count_sems).get(id)?.data.sem);
        if sem.give() {
            Ok(())
        } else {
            Err(OsError::SemFailure)
        }
    }

    pub fn count_sem_take(&self, id: ObjectId) -> OsResult<()> {
        let sem = Arc::clone(&lock(&self.count_sems).get(id)?.data.sem);
        take_with(|t| sem.take(t), || sem.try_take(), Timeout::Pend)
    }

    pub fn count_sem_timed_wait(&self, id: ObjectId, timeout: Timeout) -> OsResult<()> {
        let sem = Arc::clone(&lock(&self.count_sems).get(id)?.data.sem);
        take_with(|t| sem.take(t), || sem.try_take(), timeout)
    }

    pub fn count_sem_get_id_by_name(&self, name: &str) -> OsResult<ObjectId> {
        lock(&self.count_sems).find_by_name(name)
    }

    pub fn count_sem_get_info(&self, id: ObjectId) -> OsResult<CountSemProp> {
        let sems = lock(&self.count_sems);
        let rec = sems.get(id)?;
        Ok(CountSemProp {
            name: rec.name.clone(),
            creator: rec.creator,
            value: rec.data.sem.count(),
        })
    }

    /// Creates a recursive mutex, initially unowned.
    pub fn mut_sem_create(&self, name: &str, _options: u32) -> OsResult<ObjectId> {
        let creator = self.task_get_id().ok();
        lock(&self.mut_sems).allocate(
            name,
            creator,
            MutSemData {
                mutex: Arc::new(port::RecursiveMutex::new()),
            },
        )
    }

    pub fn mut_sem_delete(&self, id: ObjectId) -> OsResult<()> {
        lock(&self.mut_sems).release(id).map(drop)
    }

    /// Acquires the mutex, re-entering if the caller already owns it.
    /// Take/give pairs must balance per task.
    pub fn mut_sem_take(&self, id: ObjectId) -> OsResult<()> {
        let mutex = Arc::clone(&lock(&self.mut_sems).get(id)?.data.mutex);
        if mutex.take(None) {
            Ok(())
        } else {
            Err(OsError::SemFailure)
        }
    }

    /// Releases one level of ownership. Releasing a mutex owned by another
    /// task is an error, not a transfer.
    pub fn mut_sem_give(&self, id: ObjectId) -> OsResult<()> {
        let mutex = Arc::clone(&lock(&self.mut_sems).get(id)?.data.mutex);
        if mutex.give() {
            Ok(())
        } else {
            Err(OsError::SemFailure)
        }
    }

    pub fn mut_sem_get_id_by_name(&self, name: &str) -> OsResult<ObjectId> {
        lock(&self.mut_sems).find_by_name(name)
    }

    pub fn mut_sem_get_info(&self, id: ObjectId) -> OsResult<MutSemProp> {
        let sems = lock(&self.mut_sems);
        let rec = sems.get(id)?;
        Ok(MutSemProp {
            name: rec.name.clone(),
            creator: rec.creator,
        })
    }
}
