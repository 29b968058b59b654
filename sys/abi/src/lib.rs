// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! OSAL ABI definitions, shared between the core and applications.
//!
//! Everything in this crate is plain data: object identifiers, the error
//! taxonomy, timeout and priority types, and the compile-time table limits.
//! The core (`osal`) and application code both depend on it; nothing here
//! depends on the core.

#![cfg_attr(not(test), no_std)]

use num_derive::FromPrimitive;

/// Maximum number of tasks.
pub const MAX_TASKS: usize = 64;
/// Maximum number of message queues.
pub const MAX_QUEUES: usize = 64;
/// Maximum number of counting semaphores.
pub const MAX_COUNT_SEMAPHORES: usize = 20;
/// Maximum number of binary semaphores.
pub const MAX_BIN_SEMAPHORES: usize = 20;
/// Maximum number of mutexes.
pub const MAX_MUTEXES: usize = 20;
/// Maximum number of time base objects. These wrap a kernel software timer
/// and a helper task each, so only a handful can be created.
pub const MAX_TIMEBASES: usize = 5;
/// Maximum number of user timers.
pub const MAX_TIMERS: usize = 5;
/// Maximum number of loaded modules.
pub const MAX_MODULES: usize = 20;
/// Maximum number of open streams (files and sockets share this table).
pub const MAX_OPEN_FILES: usize = 50;
/// Maximum number of open directories.
pub const MAX_OPEN_DIRS: usize = 4;
/// Number of console devices.
pub const MAX_CONSOLES: usize = 1;
/// Maximum number of filesystem volume table entries.
pub const MAX_FILE_SYSTEMS: usize = 16;

/// Maximum length of a user-supplied object name, including the
/// terminator the C-heritage API reserves. Names longer than
/// `MAX_API_NAME - 1` bytes are rejected with [`OsError::NameTooLong`].
pub const MAX_API_NAME: usize = 20;

/// Maximum identifier length of the underlying kernel. Decorated names are
/// formatted to this limit; see the name registry in the core.
pub const KERNEL_NAME_LEN: usize = 16;

/// Maximum length of a virtual path name.
pub const MAX_PATH_LEN: usize = 186;
/// Maximum length of a physical volume name or prefix.
pub const FS_PHYS_NAME_LEN: usize = 64;
/// Maximum length of a translated (local) path: virtual path plus the
/// physical volume prefix.
pub const MAX_LOCAL_PATH_LEN: usize = MAX_PATH_LEN + FS_PHYS_NAME_LEN;
/// Maximum length of the final component of a file path.
pub const MAX_FILE_NAME: usize = MAX_PATH_LEN;

/// Size of the opaque socket address buffer. Large enough for any address
/// family the core supports.
pub const SOCKADDR_MAX_LEN: usize = 28;

/// Maximum symbol name length for the static loader.
pub const MAX_SYM_LEN: usize = 64;

/// Size of one formatted console message.
pub const CONSOLE_BUFFER_SIZE: usize = 172;
/// Number of messages the console ring can hold.
pub const CONSOLE_MSG_DEPTH: usize = 100;

/// Maximum depth of a message queue.
pub const QUEUE_MAX_DEPTH: usize = 50;

/// Highest initial value accepted for a counting semaphore.
pub const MAX_SEM_VALUE: u32 = 0x7FFF_FFFF;

// Every table must be addressable within an ObjectId's index bits.
static_assertions::const_assert!(MAX_TASKS < (1usize << ObjectId::INDEX_BITS));
static_assertions::const_assert!(MAX_OPEN_FILES < (1usize << ObjectId::INDEX_BITS));

/// Names a particular incarnation of an object table slot.
///
/// An `ObjectId` combines two fields, a slot index and a generation number.
/// The generation begins at zero and wraps on overflow; it is incremented
/// every time the slot is released. An ID presented with an outdated
/// generation fails validation with [`OsError::InvalidId`], so a deleted
/// object's ID can never accidentally address that slot's next occupant.
///
/// IDs are per-class: the task table and the queue table each have their own
/// index space.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct ObjectId(pub u32);

impl ObjectId {
    /// Number of bits used for the slot index; the generation occupies the
    /// remaining high bits.
    pub const INDEX_BITS: u32 = 16;

    /// Derived mask of the index bits portion.
    pub const INDEX_MASK: u32 = (1 << Self::INDEX_BITS) - 1;

    /// Fabricates an `ObjectId` for a known index and generation number.
    pub const fn for_index_and_gen(index: usize, gen: Generation) -> Self {
        ObjectId((index as u32 & Self::INDEX_MASK) | (gen.0 as u32) << Self::INDEX_BITS)
    }

    /// Extracts the index part of this ID.
    pub const fn index(&self) -> usize {
        (self.0 & Self::INDEX_MASK) as usize
    }

    /// Extracts the generation part of this ID.
    pub const fn generation(&self) -> Generation {
        Generation((self.0 >> Self::INDEX_BITS) as u16)
    }
}

/// Type used to track slot generation numbers.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[repr(transparent)]
pub struct Generation(pub u16);

impl Generation {
    pub const ZERO: Self = Self(0);

    pub fn next(self) -> Self {
        Generation(self.0.wrapping_add(1))
    }
}

/// The classes of objects the core manages. Each class has its own table,
/// its own table lock, and its own ID space.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ObjectClass {
    Task,
    Queue,
    BinSem,
    CountSem,
    Mutex,
    TimeBase,
    Timer,
    Module,
    Stream,
    Dir,
    FileSys,
    Console,
}

/// Indicates priority of a task.
///
/// Priorities are numbers from 0 to 255. Numerically lower priorities are
/// more important, so priority 0 is the most likely to be scheduled,
/// followed by 1, and so forth.
///
/// Note that this type *deliberately* does not implement `PartialOrd`/`Ord`,
/// to keep us from confusing ourselves on whether `>` means numerically
/// greater / less important, or more important / numerically smaller.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[repr(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Checks if `self` is strictly more important than `other`.
    ///
    /// This is easier to read than comparing the numeric values of the
    /// priorities, since lower numbers are more important.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 < other.0
    }
}

/// How long a blocking operation is willing to wait.
///
/// Every blocking call in the API takes one of these three modes; the core
/// converts `Millis` to kernel ticks with ceiling rounding, so a positive
/// number of milliseconds always yields at least one tick.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Timeout {
    /// Wait forever.
    Pend,
    /// Do not wait; report the would-block condition immediately.
    Check,
    /// Wait up to this many milliseconds.
    Millis(u32),
}

impl Timeout {
    /// Interprets a signed millisecond count using the C-heritage
    /// convention: negative pends forever, zero polls, positive waits.
    pub fn from_millis(ms: i32) -> Self {
        if ms < 0 {
            Timeout::Pend
        } else if ms == 0 {
            Timeout::Check
        } else {
            Timeout::Millis(ms as u32)
        }
    }
}

/// A local time value: whole seconds plus microseconds within the second.
///
/// Reported values are normalized so `microsecs` is in `[0, 1_000_000)`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct OsTime {
    pub seconds: i64,
    pub microsecs: u32,
}

bitflags::bitflags! {
    /// State bits of a stream (file or socket) handle.
    ///
    /// `READABLE`/`WRITABLE` are also the request/response language of the
    /// select facility: callers pass the states they want to wait for, and
    /// on return only the states that actually became ready remain set.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
    pub struct StreamState: u32 {
        const READABLE  = 1 << 0;
        const WRITABLE  = 1 << 1;
        const BOUND     = 1 << 2;
        const CONNECTED = 1 << 3;
    }
}

/// Access mode requested when opening or creating a file.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// Reference point for a seek operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SeekWhence {
    /// From the beginning of the file.
    Set,
    /// From the current position.
    Current,
    /// From the end of the file.
    End,
}

/// Address family of a socket. Only IPv4 is implemented; IPv6 is reserved
/// and currently rejected with [`OsError::NotImplemented`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SocketDomain {
    Inet,
    Inet6,
}

/// Transport type of a socket.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SocketType {
    Datagram,
    Stream,
}

/// Kind of filesystem behind a volume table entry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VolumeType {
    /// In-memory disk, formatted at `mkfs` time.
    RamDisk,
    /// Passthrough to a filesystem of the host.
    FsBased,
}

/// The fixed error taxonomy.
///
/// Each variant has a stable negative code, preserved across releases so
/// they can cross a wire or a log file and still mean the same thing.
/// `Ok(())` stands in for the C-heritage `OS_SUCCESS` (0).
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(i32)]
pub enum OsError {
    Error = -1,
    InvalidPointer = -2,
    AddressMisaligned = -3,
    Timeout = -4,
    InvalidIntNum = -5,
    SemFailure = -6,
    SemTimeout = -7,
    QueueEmpty = -8,
    QueueFull = -9,
    QueueTimeout = -10,
    QueueInvalidSize = -11,
    QueueIdError = -12,
    NameTooLong = -13,
    NoFreeIds = -14,
    NameTaken = -15,
    InvalidId = -16,
    NameNotFound = -17,
    InvalidPriority = -18,
    InvalidSemValue = -19,
    NotImplemented = -20,
    BadAddress = -21,
    OperationNotSupported = -22,
    StreamDisconnected = -23,

    TimerErrInvalidArgs = -30,
    TimerErrInternal = -31,
    TimerErrUnavailable = -32,

    FsError = -100,
    FsInvalidPointer = -101,
    FsPathTooLong = -102,
    FsNameTooLong = -103,
    FsUnimplemented = -104,
    FsDriveNotCreated = -105,
    FsDeviceNotFree = -106,
    FsPathInvalid = -107,
    FsNoFreeFds = -108,
    FsInvalidFd = -109,
}

impl OsError {
    /// The stable numeric code for this error.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Recovers an error from its numeric code, if the code is known.
    pub fn from_code(code: i32) -> Option<Self> {
        num_traits::FromPrimitive::from_i32(code)
    }

    /// The textual symbol for this error, in the traditional all-caps
    /// spelling. This is the name-lookup facility of the taxonomy.
    pub fn name(self) -> &'static str {
        match self {
            OsError::Error => "OS_ERROR",
            OsError::InvalidPointer => "OS_INVALID_POINTER",
            OsError::AddressMisaligned => "OS_ERROR_ADDRESS_MISALIGNED",
            OsError::Timeout => "OS_ERROR_TIMEOUT",
            OsError::InvalidIntNum => "OS_INVALID_INT_NUM",
            OsError::SemFailure => "OS_SEM_FAILURE",
            OsError::SemTimeout => "OS_SEM_TIMEOUT",
            OsError::QueueEmpty => "OS_QUEUE_EMPTY",
            OsError::QueueFull => "OS_QUEUE_FULL",
            OsError::QueueTimeout => "OS_QUEUE_TIMEOUT",
            OsError::QueueInvalidSize => "OS_QUEUE_INVALID_SIZE",
            OsError::QueueIdError => "OS_QUEUE_ID_ERROR",
            OsError::NameTooLong => "OS_ERR_NAME_TOO_LONG",
            OsError::NoFreeIds => "OS_ERR_NO_FREE_IDS",
            OsError::NameTaken => "OS_ERR_NAME_TAKEN",
            OsError::InvalidId => "OS_ERR_INVALID_ID",
            OsError::NameNotFound => "OS_ERR_NAME_NOT_FOUND",
            OsError::InvalidPriority => "OS_ERR_INVALID_PRIORITY",
            OsError::InvalidSemValue => "OS_INVALID_SEM_VALUE",
            OsError::NotImplemented => "OS_ERR_NOT_IMPLEMENTED",
            OsError::BadAddress => "OS_ERR_BAD_ADDRESS",
            OsError::OperationNotSupported => "OS_ERR_OPERATION_NOT_SUPPORTED",
            OsError::StreamDisconnected => "OS_ERR_STREAM_DISCONNECTED",
            OsError::TimerErrInvalidArgs => "OS_TIMER_ERR_INVALID_ARGS",
            OsError::TimerErrInternal => "OS_TIMER_ERR_INTERNAL",
            OsError::TimerErrUnavailable => "OS_TIMER_ERR_UNAVAILABLE",
            OsError::FsError => "OS_FS_ERROR",
            OsError::FsInvalidPointer => "OS_FS_ERR_INVALID_POINTER",
            OsError::FsPathTooLong => "OS_FS_ERR_PATH_TOO_LONG",
            OsError::FsNameTooLong => "OS_FS_ERR_NAME_TOO_LONG",
            OsError::FsUnimplemented => "OS_FS_UNIMPLEMENTED",
            OsError::FsDriveNotCreated => "OS_FS_ERR_DRIVE_NOT_CREATED",
            OsError::FsDeviceNotFree => "OS_FS_ERR_DEVICE_NOT_FREE",
            OsError::FsPathInvalid => "OS_FS_ERR_PATH_INVALID",
            OsError::FsNoFreeFds => "OS_FS_ERR_NO_FREE_FDS",
            OsError::FsInvalidFd => "OS_FS_ERR_INVALID_FD",
        }
    }
}

impl core::fmt::Display for OsError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// Shorthand for the result type every fallible API returns.
pub type OsResult<T> = core::result::Result<T, OsError>;
