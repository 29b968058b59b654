// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host port: kernel, socket, and filesystem primitives implemented on the
//! facilities of an ordinary host process.

pub mod hostfs;
mod kernel;
mod ramfs;
mod sock;

pub use hostfs::{HostDirIter, HostFile};
pub use kernel::{
    clock_elapsed, clock_init, console_write, current_thread_id, delay, hostname, self_id,
    set_self_id, BinSem, CountSem, MsgQueue, RecursiveMutex, SwTimer, Thread, MAX_PRIORITIES,
    TICK_RATE_HZ,
};
pub use ramfs::{RamDirIter, RamDisk, RamFile};
pub use sock::{ConnectStart, Socket, SocketSet};
