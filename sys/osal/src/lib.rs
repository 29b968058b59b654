// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A portable operating system abstraction layer.
//!
//! Application code targets this API instead of the underlying kernel: a
//! fixed set of primitives (tasks, message queues, semaphores, mutexes,
//! timers, a virtual filesystem, sockets, select), all addressed by small
//! integer IDs drawn from statically-sized tables. The [`Osal`] struct owns
//! every table; create it once at startup with [`Osal::init`] and hand out
//! references (it is `Send + Sync`, an `Arc<Osal>` shares cleanly across
//! tasks).
//!
//! The translation to real kernel objects happens in the `port` module;
//! this build carries the host port, which runs the whole layer as an
//! ordinary process, the same way a simulator build of the target kernel
//! would.

mod clock;
mod console;
mod dir;
mod file;
mod module;
mod net;
mod objtab;
mod port;
mod queue;
mod select;
mod sem;
mod task;
mod timer;
mod util;
mod volume;

pub mod bsp;

pub use abi::{
    AccessMode, ObjectId, OsError, OsResult, OsTime, Priority, SeekWhence, SocketDomain,
    SocketType, StreamState, Timeout, VolumeType,
};

pub use file::{FileStat, StreamProp};
pub use module::{ModuleProp, SymbolRecord};
pub use net::{SockAddr, SocketProp};
pub use queue::QueueProp;
pub use select::FdSet;
pub use sem::{BinSemProp, CountSemProp, MutSemProp};
pub use task::TaskProp;
pub use timer::{SyncFn, TimeBaseProp, TimerProp};
pub use volume::{VolumeSeed, VolumeStats};

use std::sync::{Arc, Condvar, Mutex, Once};

use abi::ObjectClass;
use objtab::Table;

/// Runtime configuration handed to [`Osal::init`]: everything the board
/// support layer decides. See [`bsp::default_config`] for the stock host
/// arrangement.
pub struct Config {
    /// Volume table seed: the devices `mkfs`/`mount` may claim.
    pub volumes: Vec<VolumeSeed>,
    /// Static symbol table backing the module loader.
    pub symbols: Vec<SymbolRecord>,
}

struct ShutdownGate {
    requested: Mutex<bool>,
    cv: Condvar,
}

/// The abstraction layer itself: one table per object class, each behind
/// its own lock, plus the clock and console services.
pub struct Osal {
    tasks: Mutex<Table<task::TaskData>>,
    queues: Mutex<Table<queue::QueueData>>,
    bin_sems: Mutex<Table<sem::BinSemData>>,
    count_sems: Mutex<Table<sem::CountSemData>>,
    mut_sems: Mutex<Table<sem::MutSemData>>,
    timebases: Mutex<Table<timer::TimeBaseData>>,
    timers: Mutex<Table<timer::TimerData>>,
    modules: Mutex<Table<module::ModuleData>>,
    streams: Mutex<Table<file::StreamData>>,
    dirs: Mutex<Table<dir::DirData>>,
    volumes: Mutex<volume::VolumeTable>,
    clock: clock::Clock,
    console: console::Console,
    symbols: Vec<SymbolRecord>,
    shutdown: ShutdownGate,
}

impl Osal {
    /// Constructs the layer: builds every table, pins the clock epoch, and
    /// starts the console helper. Call once at startup; the returned `Arc`
    /// is the handle everything else uses.
    pub fn init(config: Config) -> Arc<Osal> {
        static HOOK: Once = Once::new();
        HOOK.call_once(task::install_exit_hook);

        port::clock_init();

        Arc::new(Osal {
            tasks: Mutex::new(Table::new(ObjectClass::Task, abi::MAX_TASKS)),
            queues: Mutex::new(Table::new(ObjectClass::Queue, abi::MAX_QUEUES)),
            bin_sems: Mutex::new(Table::new(ObjectClass::BinSem, abi::MAX_BIN_SEMAPHORES)),
            count_sems: Mutex::new(Table::new(ObjectClass::CountSem, abi::MAX_COUNT_SEMAPHORES)),
            mut_sems: Mutex::new(Table::new(ObjectClass::Mutex, abi::MAX_MUTEXES)),
            timebases: Mutex::new(Table::new(ObjectClass::TimeBase, abi::MAX_TIMEBASES)),
            timers: Mutex::new(Table::new(ObjectClass::Timer, abi::MAX_TIMERS)),
            modules: Mutex::new(Table::new(ObjectClass::Module, abi::MAX_MODULES)),
            streams: Mutex::new(Table::new(ObjectClass::Stream, abi::MAX_OPEN_FILES)),
            dirs: Mutex::new(Table::new(ObjectClass::Dir, abi::MAX_OPEN_DIRS)),
            volumes: Mutex::new(volume::VolumeTable::new(config.volumes)),
            clock: clock::Clock::new(),
            console: console::Console::start(),
            symbols: config.symbols,
            shutdown: ShutdownGate {
                requested: Mutex::new(false),
                cv: Condvar::new(),
            },
        })
    }

    /// Parks the calling thread until [`Osal::application_shutdown`] is
    /// called. The startup thread typically ends up here after creating
    /// the application's tasks.
    pub fn idle_loop(&self) {
        let mut requested = util::lock(&self.shutdown.requested);
        while !*requested {
            requested = self
                .shutdown
                .cv
                .wait(requested)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Releases [`Osal::idle_loop`].
    pub fn application_shutdown(&self) {
        *util::lock(&self.shutdown.requested) = true;
        self.shutdown.cv.notify_all();
    }
}

/// `printf`-style console output: formats into the buffered console sink.
///
/// ```ignore
/// os_printf!(osal, "mounted {} at {}\n", dev, mnt);
/// ```
#[macro_export]
macro_rules! os_printf {
    ($osal:expr, $($arg:tt)*) => {
        $osal.console_write(&format!($($arg)*))
    };
}
