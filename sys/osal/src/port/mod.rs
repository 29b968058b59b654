// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The port layer: everything the core needs from the underlying kernel,
//! network stack, and filesystem backends.
//!
//! The core addresses the port through the items re-exported here:
//!
//! - kernel primitives: [`Thread`], [`BinSem`], [`CountSem`],
//!   [`RecursiveMutex`], [`MsgQueue`], [`SwTimer`], `delay`, per-thread
//!   self-ID storage, and the monotonic clock;
//! - socket primitives: [`Socket`] and [`SocketSet`] with non-blocking
//!   connect, timed select, and peer-state queries;
//! - filesystem backends: the in-memory [`RamDisk`] family and the host
//!   passthrough family.
//!
//! Exactly one port is compiled in, selected the same way a kernel would
//! select an architecture. The host port runs the OSAL as an ordinary
//! process and stands in for a real-time kernel's simulator build.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod host;
        pub use host::*;
    } else {
        compile_error!("no port exists for this platform (the host port requires unix)");
    }
}
