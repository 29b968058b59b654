// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Message queues: fixed-depth, fixed-element-size FIFOs.
//!
//! `put` never blocks; a full queue reports [`OsError::QueueFull`]
//! immediately. `get` supports the three standard wait modes. Elements are
//! stored at the queue's configured size, zero-padded if the producer
//! supplied fewer bytes, and `get` always reports the full element size.

use std::sync::Arc;

use abi::{ObjectId, OsError, OsResult, Timeout, QUEUE_MAX_DEPTH};

use crate::clock::{wait_of, Wait};
use crate::port;
use crate::util::lock;
use crate::Osal;

pub(crate) struct QueueData {
    pub depth: usize,
    pub msg_size: usize,
    pub queue: Arc<port::MsgQueue>,
}

/// Information reported by [`Osal::queue_get_info`].
#[derive(Debug, Clone)]
pub struct QueueProp {
    pub name: String,
    pub creator: Option<ObjectId>,
    pub depth: usize,
    pub msg_size: usize,
}

impl Osal {
    /// Creates a queue holding up to `depth` messages of `msg_size` bytes.
    pub fn queue_create(&self, name: &str, depth: usize, msg_size: usize) -> OsResult<ObjectId> {
        if depth == 0 || depth > QUEUE_MAX_DEPTH || msg_size == 0 {
            return Err(OsError::QueueInvalidSize);
        }
        let creator = self.task_get_id().ok();
        lock(&self.queues).allocate(
            name,
            creator,
            QueueData {
                depth,
                msg_size,
                queue: Arc::new(port::MsgQueue::new(depth)),
            },
        )
    }

    /// Deletes a queue. Messages still in flight are lost.
    pub fn queue_delete(&self, id: ObjectId) -> OsResult<()> {
        lock(&self.queues).release(id).map(drop)
    }

    /// Receives the oldest message into `buf`, which must be at least the
    /// queue's element size. Returns the element size on success.
    pub fn queue_get(&self, id: ObjectId, buf: &mut [u8], timeout: Timeout) -> OsResult<usize> {
        let (queue, msg_size) = {
            let queues = lock(&self.queues);
            let rec = queues.get(id)?;
            if buf.len() < rec.data.msg_size {
                return Err(OsError::QueueInvalidSize);
            }
            (Arc::clone(&rec.data.queue), rec.data.msg_size)
        };
        let msg = match wait_of(timeout) {
            Wait::Poll => queue.try_get().ok_or(OsError::QueueEmpty)?,
            Wait::Forever => queue.get(None).ok_or(OsError::Error)?,
            Wait::For(d) => queue.get(Some(d)).ok_or(OsError::QueueTimeout)?,
        };
        buf[..msg_size].copy_from_slice(&msg);
        Ok(msg_size)
    }

    /// Sends a message. `data` longer than the element size is rejected;
    /// shorter data is zero-padded to it.
    pub fn queue_put(&self, id: ObjectId, data: &[u8]) -> OsResult<()> {
        let (queue, msg_size) = {
            let queues = lock(&self.queues);
            let rec = queues.get(id)?;
            if data.len() > rec.data.msg_size {
                return Err(OsError::QueueInvalidSize);
            }
            (Arc::clone(&rec.data.queue), rec.data.msg_size)
        };
        let mut cell = vec![0u8; msg_size];
        cell[..data.len()].copy_from_slice(data);
        queue.try_put(&cell).map_err(|_| OsError::QueueFull)
    }

    pub fn queue_get_id_by_name(&self, name: &str) -> OsResult<ObjectId> {
        lock(&self.queues).find_by_name(name)
    }

    pub fn queue_get_info(&self, id: ObjectId) -> OsResult<QueueProp> {
        let queues = lock(&self.queues);
        let rec = queues.get(id)?;
        Ok(QueueProp {
            name: rec.name.clone(),
            creator: rec.creator,
            depth: rec.data.depth,
            msg_size: rec.data.msg_size,
        })
    }
}
