// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Buffered console output.
//!
//! `printf`-style output lands in a byte ring and a helper task drains the
//! ring to the real sink, so callers never block on console I/O. Producers
//! post a counting semaphore per enqueue; the helper pends on it. If the
//! helper task cannot be spawned the facility degrades to synchronous
//! writes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use abi::{CONSOLE_BUFFER_SIZE, CONSOLE_MSG_DEPTH, MAX_SEM_VALUE};

use crate::port;
use crate::util::lock;
use crate::Osal;

struct Ring {
    buf: Mutex<VecDeque<u8>>,
    capacity: usize,
}

pub(crate) struct Console {
    ring: Arc<Ring>,
    sem: Arc<port::CountSem>,
    is_async: bool,
}

impl Console {
    pub fn start() -> Console {
        let ring = Arc::new(Ring {
            buf: Mutex::new(VecDeque::new()),
            capacity: CONSOLE_BUFFER_SIZE * CONSOLE_MSG_DEPTH,
        });
        let sem = Arc::new(port::CountSem::new(0, MAX_SEM_VALUE));

        let helper_ring = Arc::clone(&ring);
        let helper_sem = Arc::clone(&sem);
        let spawned = port::Thread::spawn("CONSLE", 0, 0, move || loop {
            helper_sem.take(None);
            let chunk: Vec<u8> = {
                let mut buf = lock(&helper_ring.buf);
                buf.drain(..).collect()
            };
            if !chunk.is_empty() {
                port::console_write(&chunk);
            }
        });

        let is_async = match spawned {
            Ok(_thread) => true,
            Err(e) => {
                log::warn!("console helper unavailable, falling back to sync writes: {e}");
                false
            }
        };

        Console {
            ring,
            sem,
            is_async,
        }
    }
}

impl Osal {
    /// Queues `text` for the console. When the ring is full the message is
    /// dropped rather than blocking the caller.
    pub fn console_write(&self, text: &str) {
        let con = &self.console;
        if !con.is_async {
            port::console_write(text.as_bytes());
            return;
        }
        {
            let mut buf = lock(&con.ring.buf);
            if buf.len() + text.len() > con.ring.capacity {
                log::debug!("console ring full, dropping {} bytes", text.len());
                return;
            }
            buf.extend(text.as_bytes());
        }
        con.sem.give();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bsp;

    #[test]
    fn write_does_not_block_or_lose_small_messages() {
        let os = Osal::init(bsp::default_config());
        for i in 0..10 {
            os.console_write(&format!("line {i}\n"));
        }
        // Oversized bursts are dropped, not deadlocked on.
        let big = "x".repeat(CONSOLE_BUFFER_SIZE * CONSOLE_MSG_DEPTH + 1);
        os.console_write(&big);
    }
}
