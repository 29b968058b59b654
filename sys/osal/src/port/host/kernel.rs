// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel primitives of the host port.
//!
//! Threads, semaphores, queues, and software timers built from `std::sync`
//! and `std::thread`. These play the role the real-time kernel's objects
//! play on an embedded port; handles to them are what the core stores in
//! its object tables.

use std::cell::Cell;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Condvar, Mutex, OnceLock};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use abi::ObjectId;

/// Number of distinct scheduling priorities the host kernel offers. The
/// core's 0..255 priority range is remapped into `0..MAX_PRIORITIES`.
pub const MAX_PRIORITIES: u32 = 64;

/// Host tick rate. Millisecond and microsecond arguments are converted to
/// ticks of this rate before they reach a kernel object.
pub const TICK_RATE_HZ: u32 = 1000;

fn lock<'a, T>(m: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    // A poisoned primitive means some thread died while holding it; the
    // state itself is still coherent for our uses, so keep going.
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// A kernel thread handle. Dropping the handle detaches the thread, which
/// matches the underlying kernel's fire-and-forget task model; `join` is
/// available for the few places (timebase teardown) that need to wait.
pub struct Thread {
    handle: thread::JoinHandle<()>,
}

impl Thread {
    /// Spawns a thread. `priority` is advisory on the host: an ordinary
    /// process cannot demand a real-time class, so it is recorded for
    /// diagnostics only.
    pub fn spawn<F>(name: &str, stack_size: usize, priority: u32, f: F) -> io::Result<Thread>
    where
        F: FnOnce() + Send + 'static,
    {
        log::trace!("spawn {:?} stack={} prio={}", name, stack_size, priority);
        let mut b = thread::Builder::new().name(name.to_string());
        if stack_size > 0 {
            b = b.stack_size(stack_size);
        }
        Ok(Thread { handle: b.spawn(f)? })
    }

    /// The kernel-level identity of this thread, used for handle scans.
    pub fn thread_id(&self) -> ThreadId {
        self.handle.thread().id()
    }

    /// Blocks until the thread has finished.
    pub fn join(self) {
        let _ = self.handle.join();
    }
}

/// Identity of the calling thread.
pub fn current_thread_id() -> ThreadId {
    thread::current().id()
}

/// Suspends the calling thread.
pub fn delay(d: Duration) {
    thread::sleep(d);
}

thread_local! {
    static SELF_ID: Cell<Option<ObjectId>> = const { Cell::new(None) };
}

/// Stores the calling task's OSAL ID in per-thread storage (slot 0 of
/// the kernel's thread-local array, on kernels that expose one).
pub fn set_self_id(id: ObjectId) {
    SELF_ID.with(|c| c.set(Some(id)));
}

/// Reads back what `set_self_id` stored, if anything.
pub fn self_id() -> Option<ObjectId> {
    SELF_ID.with(|c| c.get())
}

static CLOCK_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Pins the monotonic epoch. Called once at OSAL initialization; elapsed
/// time is reported relative to this instant.
pub fn clock_init() {
    let _ = CLOCK_EPOCH.set(Instant::now());
}

/// Monotonic time since `clock_init` as (whole seconds, microseconds
/// within the second).
pub fn clock_elapsed() -> (u64, u32) {
    let epoch = CLOCK_EPOCH.get_or_init(Instant::now);
    let d = epoch.elapsed();
    (d.as_secs(), d.subsec_micros())
}

/// Writes console output to the process's stdout.
pub fn console_write(bytes: &[u8]) {
    let mut out = io::stdout().lock();
    let _ = out.write_all(bytes);
    let _ = out.flush();
}

/// Host name of the machine, for the network identity queries.
pub fn hostname() -> Option<String> {
    let mut buf = [0u8; 256];
    // Safety: buf is a valid writable buffer of the stated length.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return None;
    }
    let len = buf.iter().position(|&b| b == 0)?;
    String::from_utf8(buf[..len].to_vec()).ok()
}

/// Binary semaphore: holds at most one token.
pub struct BinSem {
    value: Mutex<bool>,
    cv: Condvar,
}

impl BinSem {
    pub fn new(initial: bool) -> BinSem {
        BinSem {
            value: Mutex::new(initial),
            cv: Condvar::new(),
        }
    }

    /// Posts the token. Returns `false` if the token was already present,
    /// which the core reports as a semaphore failure.
    pub fn give(&self) -> bool {
        let mut v = lock(&self.value);
        if *v {
            return false;
        }
        *v = true;
        self.cv.notify_one();
        true
    }

    /// Takes the token, waiting up to `timeout` (`None` pends forever).
    /// Returns `false` on timeout.
    pub fn take(&self, timeout: Option<Duration>) -> bool {
        wait_for(&self.value, &self.cv, timeout, |v| {
            if *v {
                *v = false;
                true
            } else {
                false
            }
        })
    }

    /// Polls the token without blocking.
    pub fn try_take(&self) -> bool {
        let mut v = lock(&self.value);
        if *v {
            *v = false;
            true
        } else {
            false
        }
    }

    /// Whether the token is currently present.
    pub fn value(&self) -> bool {
        *lock(&self.value)
    }
}

/// Counting semaphore with an upper bound on the count.
pub struct CountSem {
    count: Mutex<u32>,
    max: u32,
    cv: Condvar,
}

impl CountSem {
    pub fn new(initial: u32, max: u32) -> CountSem {
        CountSem {
            count: Mutex::new(initial),
            max,
            cv: Condvar::new(),
        }
    }

    /// Increments the count. Returns `false` if the count is already at
    /// its configured maximum.
    pub fn give(&self) -> bool {
        let mut c = lock(&self.count);
        if *c >= self.max {
            return false;
        }
        *c += 1;
        self.cv.notify_one();
        true
    }

    /// Decrements the count, waiting up to `timeout` for it to become
    /// nonzero. Returns `false` on timeout.
    pub fn take(&self, timeout: Option<Duration>) -> bool {
        wait_for(&self.count, &self.cv, timeout, |c| {
            if *c > 0 {
                *c -= 1;
                true
            } else {
                false
            }
        })
    }

    /// Polls the count without blocking.
    pub fn try_take(&self) -> bool {
        let mut c = lock(&self.count);
        if *c > 0 {
            *c -= 1;
            true
        } else {
            false
        }
    }

    /// The current count.
    pub fn count(&self) -> u32 {
        *lock(&self.count)
    }
}

struct MutexState {
    owner: Option<ThreadId>,
    depth: u32,
}

/// Recursive mutex with owner tracking, layered over a plain mutex and a
/// condvar the way the design notes prescribe for kernels without a native
/// recursive primitive.
pub struct RecursiveMutex {
    state: Mutex<MutexState>,
    cv: Condvar,
}

impl RecursiveMutex {
    pub fn new() -> RecursiveMutex {
        RecursiveMutex {
            state: Mutex::new(MutexState {
                owner: None,
                depth: 0,
            }),
            cv: Condvar::new(),
        }
    }

    /// Acquires the mutex, re-entering if the caller already owns it.
    /// Returns `false` on timeout.
    pub fn take(&self, timeout: Option<Duration>) -> bool {
        let me = current_thread_id();
        wait_for(&self.state, &self.cv, timeout, |s| match s.owner {
            Some(owner) if owner == me => {
                s.depth += 1;
                true
            }
            Some(_) => false,
            None => {
                s.owner = Some(me);
                s.depth = 1;
                true
            }
        })
    }

    /// Releases one level of ownership. Fails if the caller is not the
    /// owner; releasing another task's mutex is a usage error the core
    /// reports rather than honors.
    pub fn give(&self) -> bool {
        let me = current_thread_id();
        let mut s = lock(&self.state);
        if s.owner != Some(me) {
            return false;
        }
        s.depth -= 1;
        if s.depth == 0 {
            s.owner = None;
            self.cv.notify_one();
        }
        true
    }
}

impl Default for RecursiveMutex {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded FIFO message queue carrying fixed-maximum-size byte messages.
pub struct MsgQueue {
    depth: usize,
    inner: Mutex<VecDeque<Vec<u8>>>,
    not_empty: Condvar,
}

impl MsgQueue {
    pub fn new(depth: usize) -> MsgQueue {
        MsgQueue {
            depth,
            inner: Mutex::new(VecDeque::with_capacity(depth)),
            not_empty: Condvar::new(),
        }
    }

    /// Enqueues a message; fails immediately when the queue is full.
    pub fn try_put(&self, msg: &[u8]) -> Result<(), ()> {
        let mut q = lock(&self.inner);
        if q.len() >= self.depth {
            return Err(());
        }
        q.push_back(msg.to_vec());
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeues the oldest message, waiting up to `timeout` (`None` pends
    /// forever). Returns `None` on timeout.
    pub fn get(&self, timeout: Option<Duration>) -> Option<Vec<u8>> {
        let mut out = None;
        let got = wait_for(&self.inner, &self.not_empty, timeout, |q| {
            if let Some(m) = q.pop_front() {
                out = Some(m);
                true
            } else {
                false
            }
        });
        if got {
            out
        } else {
            None
        }
    }

    /// Dequeues without blocking.
    pub fn try_get(&self) -> Option<Vec<u8>> {
        lock(&self.inner).pop_front()
    }
}

/// Condvar wait with an optional overall deadline. `attempt` runs under the
/// lock and returns `true` once it has claimed what it was waiting for.
fn wait_for<T>(
    m: &Mutex<T>,
    cv: &Condvar,
    timeout: Option<Duration>,
    mut attempt: impl FnMut(&mut T) -> bool,
) -> bool {
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut guard = lock(m);
    loop {
        if attempt(&mut guard) {
            return true;
        }
        match deadline {
            None => {
                guard = cv.wait(guard).unwrap_or_else(|e| e.into_inner());
            }
            Some(d) => {
                let now = Instant::now();
                if now >= d {
                    return false;
                }
                let (g, _res) = cv
                    .wait_timeout(guard, d - now)
                    .unwrap_or_else(|e| e.into_inner());
                guard = g;
            }
        }
    }
}

enum TimerCmd {
    Arm {
        initial: Duration,
        reload: Option<Duration>,
    },
    Stop,
}

/// A software timer. Expiry posts a unit onto the tick channel supplied at
/// creation; the channel is bounded at one entry so back-to-back expiries
/// collapse, matching a binary semaphore posted from a timer callback.
///
/// Dropping the timer shuts down its service thread, which in turn drops
/// the tick sender; the consumer observes a closed channel and can wind
/// itself down. That closure is the cancellation path for a timebase.
pub struct SwTimer {
    ctl: mpsc::Sender<TimerCmd>,
}

impl SwTimer {
    pub fn new(tick_tx: SyncSender<()>) -> io::Result<SwTimer> {
        let (ctl, ctl_rx) = mpsc::channel::<TimerCmd>();
        thread::Builder::new()
            .name("sw-timer".to_string())
            .spawn(move || {
                let mut armed: Option<(Instant, Option<Duration>)> = None;
                loop {
                    let cmd = match armed {
                        None => match ctl_rx.recv() {
                            Ok(c) => Some(c),
                            Err(_) => break,
                        },
                        Some((deadline, reload)) => {
                            let now = Instant::now();
                            if now >= deadline {
                                let _ = tick_tx.try_send(());
                                armed = reload.map(|r| (deadline + r, Some(r)));
                                continue;
                            }
                            match ctl_rx.recv_timeout(deadline - now) {
                                Ok(c) => Some(c),
                                Err(RecvTimeoutError::Timeout) => None,
                                Err(RecvTimeoutError::Disconnected) => break,
                            }
                        }
                    };
                    match cmd {
                        Some(TimerCmd::Arm { initial, reload }) => {
                            armed = Some((Instant::now() + initial, reload));
                        }
                        Some(TimerCmd::Stop) => {
                            armed = None;
                        }
                        // Deadline passed while we were waiting for a
                        // command; loop around and fire.
                        None => {}
                    }
                }
            })?;
        Ok(SwTimer { ctl })
    }

    /// Arms the timer: first expiry after `initial`, then every `reload`
    /// if one is given (one-shot otherwise).
    pub fn arm(&self, initial: Duration, reload: Option<Duration>) {
        let _ = self.ctl.send(TimerCmd::Arm { initial, reload });
    }

    /// Disarms the timer without destroying it.
    pub fn stop(&self) {
        let _ = self.ctl.send(TimerCmd::Stop);
    }
}
