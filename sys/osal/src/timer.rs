// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Timers and time bases.
//!
//! A *time base* is a source of periodic ticks: a kernel software timer (or
//! an external sync function) plus a dedicated helper task that consumes
//! the ticks and runs user callbacks. Callbacks therefore execute in an
//! ordinary task context, never in the timer service's.
//!
//! The tick path from the software timer to the helper is a bounded
//! channel; deleting the time base drops the timer, which closes the
//! channel, which winds the helper down. That is the whole cancellation
//! protocol.
//!
//! *Timers* are callbacks attached to a time base, each with its own
//! start/interval schedule measured against the time base's tick span. The
//! legacy one-callback-per-timer API (`timer_create`/`timer_set`) is kept;
//! it allocates a dedicated time base under the hood.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::sync_channel;
use std::sync::{Arc, Mutex};

use abi::{ObjectId, OsError, OsResult};

use crate::clock::{microsec_per_tick, ticks_to_duration, usecs_to_ticks};
use crate::port;
use crate::util::lock;
use crate::Osal;

/// External tick source: blocks until the next tick and returns the
/// microseconds that elapsed.
pub type SyncFn = Box<dyn FnMut() -> u32 + Send>;

/// One registered callback and its schedule, in time-base tick units.
struct TimerHandler {
    timer_id: ObjectId,
    /// Microseconds until the next expiry; counts down by the tick span.
    wait_us: i64,
    interval_us: u32,
    active: bool,
    callback: Box<dyn FnMut() + Send>,
}

pub(crate) struct TimeBaseShared {
    start_us: AtomicU32,
    interval_us: AtomicU32,
    /// Set by `timebase_set`; makes the next tick span the start time
    /// rather than the interval.
    reset: AtomicBool,
    shutdown: AtomicBool,
    handlers: Mutex<Vec<TimerHandler>>,
}

pub(crate) struct TimeBaseData {
    pub shared: Arc<TimeBaseShared>,
    pub sw_timer: Option<port::SwTimer>,
    pub helper: Option<port::Thread>,
    pub accuracy_us: u32,
}

pub(crate) struct TimerData {
    pub timebase: ObjectId,
    /// The time base was created by `timer_create` and dies with the
    /// timer.
    pub dedicated: bool,
    pub start_us: u32,
    pub interval_us: u32,
}

/// Information reported by [`Osal::timebase_get_info`].
#[derive(Debug, Clone)]
pub struct TimeBaseProp {
    pub name: String,
    pub creator: Option<ObjectId>,
    pub nominal_start_us: u32,
    pub nominal_interval_us: u32,
    pub accuracy_us: u32,
}

/// Information reported by [`Osal::timer_get_info`].
#[derive(Debug, Clone)]
pub struct TimerProp {
    pub name: String,
    pub creator: Option<ObjectId>,
    pub start_us: u32,
    pub interval_us: u32,
    pub accuracy_us: u32,
}

/// Runs the due callbacks after a tick spanning `elapsed_us`.
fn service_handlers(shared: &TimeBaseShared, elapsed_us: u32) {
    let mut handlers = lock(&shared.handlers);
    for h in handlers.iter_mut() {
        if !h.active {
            continue;
        }
        h.wait_us -= i64::from(elapsed_us);
        if h.wait_us <= 0 {
            (h.callback)();
            if h.interval_us > 0 {
                h.wait_us += i64::from(h.interval_us);
            } else {
                h.active = false;
            }
        }
    }
}

impl Osal {
    /// Creates a time base.
    ///
    /// With no `external_sync`, a kernel software timer simulates the tick
    /// and `timebase_set` controls its period. With one, the helper simply
    /// calls it; it should block until the next tick of whatever source it
    /// represents and report the elapsed microseconds.
    pub fn timebase_create(
        self: &Arc<Self>,
        name: &str,
        external_sync: Option<SyncFn>,
    ) -> OsResult<ObjectId> {
        let creator = self.task_get_id().ok();
        let shared = Arc::new(TimeBaseShared {
            start_us: AtomicU32::new(0),
            interval_us: AtomicU32::new(0),
            reset: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            handlers: Mutex::new(Vec::new()),
        });

        let (id, decorated) = {
            let mut timebases = lock(&self.timebases);
            let id = timebases.allocate(
                name,
                creator,
                TimeBaseData {
                    shared: Arc::clone(&shared),
                    sw_timer: None,
                    helper: None,
                    accuracy_us: microsec_per_tick(),
                },
            )?;
            (id, timebases.get(id).unwrap().decorated.clone())
        };

        // Kernel objects are created outside the table lock; on any
        // failure the slot is restored below.
        let mut sync = external_sync;
        let mut sw_timer = None;
        let mut tick_rx = None;
        if sync.is_none() {
            let (tx, rx) = sync_channel::<()>(1);
            match port::SwTimer::new(tx) {
                Ok(t) => {
                    sw_timer = Some(t);
                    tick_rx = Some(rx);
                }
                Err(e) => {
                    log::warn!("software timer unavailable: {e}");
                    let _ = lock(&self.timebases).release(id);
                    return Err(OsError::TimerErrUnavailable);
                }
            }
        }

        let helper_shared = Arc::clone(&shared);
        let helper = port::Thread::spawn(&decorated, 0, port::MAX_PRIORITIES - 1, move || {
            loop {
                if helper_shared.shutdown.load(Ordering::Acquire) {
                    break;
                }
                // Wait for the tick, then work out how long it spanned:
                // the start time for the first tick after a set, the
                // nominal interval for every one after.
                let elapsed = match &mut sync {
                    Some(f) => f(),
                    None => match tick_rx.as_ref().unwrap().recv() {
                        Ok(()) => {
                            if helper_shared.reset.swap(false, Ordering::AcqRel) {
                                helper_shared.start_us.load(Ordering::Acquire)
                            } else {
                                helper_shared.interval_us.load(Ordering::Acquire)
                            }
                        }
                        // Tick channel closed: the time base is gone.
                        Err(_) => break,
                    },
                };
                if helper_shared.shutdown.load(Ordering::Acquire) {
                    break;
                }
                service_handlers(&helper_shared, elapsed);
            }
        });

        let mut timebases = lock(&self.timebases);
        match helper {
            Ok(thread) => {
                let rec = timebases.get_mut(id)?;
                rec.data.sw_timer = sw_timer;
                rec.data.helper = Some(thread);
                Ok(id)
            }
            Err(e) => {
                log::warn!("time base helper spawn failed: {e}");
                let _ = timebases.release(id);
                Err(OsError::TimerErrInternal)
            }
        }
    }

    /// Arms the time base: first tick after `start_us`, then every
    /// `interval_us`. A zero start disarms; a zero interval makes it
    /// one-shot. Periods shorter than one kernel tick are rounded up by
    /// the tick conversion.
    pub fn timebase_set(&self, id: ObjectId, start_us: u32, interval_us: u32) -> OsResult<()> {
        let mut timebases = lock(&self.timebases);
        let rec = timebases.get_mut(id)?;

        // Cannot have an interval without a start.
        let interval_us = if start_us == 0 { 0 } else { interval_us };

        rec.data.shared.start_us.store(start_us, Ordering::Release);
        rec.data
            .shared
            .interval_us
            .store(interval_us, Ordering::Release);

        if let Some(sw) = &rec.data.sw_timer {
            if start_us == 0 {
                sw.stop();
            } else {
                let start_ticks = usecs_to_ticks(start_us);
                let interval_ticks = usecs_to_ticks(interval_us);
                let reload = if interval_ticks > 0 {
                    Some(ticks_to_duration(interval_ticks))
                } else {
                    None
                };
                sw.arm(ticks_to_duration(start_ticks), reload);

                let effective = if interval_ticks > 0 {
                    interval_ticks
                } else {
                    start_ticks
                };
                let usec = u64::from(effective) * 1_000_000 / u64::from(port::TICK_RATE_HZ);
                // Reported accuracy rounds to the nearest 10 usec.
                rec.data.accuracy_us = (((usec + 5) / 10) * 10) as u32;
            }
        }

        rec.data.shared.reset.store(true, Ordering::Release);
        Ok(())
    }

    /// Deletes a time base, closing its tick channel and winding down its
    /// helper task. Timers still attached stop firing.
    pub fn timebase_delete(&self, id: ObjectId) -> OsResult<()> {
        let mut record = lock(&self.timebases).release(id)?;
        record.data.shared.shutdown.store(true, Ordering::Release);
        // Dropping the software timer closes the tick channel, which is
        // what releases the helper from its pend.
        let simulated = record.data.sw_timer.take().is_some();
        if let Some(helper) = record.data.helper.take() {
            if simulated {
                helper.join();
            }
            // An external-sync helper exits on its own after the next
            // sync return; it cannot be interrupted from here.
        }
        Ok(())
    }

    pub fn timebase_get_id_by_name(&self, name: &str) -> OsResult<ObjectId> {
        lock(&self.timebases).find_by_name(name)
    }

    pub fn timebase_get_info(&self, id: ObjectId) -> OsResult<TimeBaseProp> {
        let timebases = lock(&self.timebases);
        let rec = timebases.get(id)?;
        Ok(TimeBaseProp {
            name: rec.name.clone(),
            creator: rec.creator,
            nominal_start_us: rec.data.shared.start_us.load(Ordering::Acquire),
            nominal_interval_us: rec.data.shared.interval_us.load(Ordering::Acquire),
            accuracy_us: rec.data.accuracy_us,
        })
    }

    /// Attaches a callback to an existing time base. The callback's own
    /// schedule is set with [`Osal::timer_set`].
    pub fn timer_add(
        &self,
        name: &str,
        timebase: ObjectId,
        callback: impl FnMut() + Send + 'static,
    ) -> OsResult<ObjectId> {
        self.timer_add_inner(name, timebase, false, Box::new(callback))
    }

    fn timer_add_inner(
        &self,
        name: &str,
        timebase: ObjectId,
        dedicated: bool,
        callback: Box<dyn FnMut() + Send>,
    ) -> OsResult<ObjectId> {
        let shared = Arc::clone(&lock(&self.timebases).get(timebase)?.data.shared);
        let creator = self.task_get_id().ok();
        let id = lock(&self.timers).allocate(
            name,
            creator,
            TimerData {
                timebase,
                dedicated,
                start_us: 0,
                interval_us: 0,
            },
        )?;
        lock(&shared.handlers).push(TimerHandler {
            timer_id: id,
            wait_us: 0,
            interval_us: 0,
            active: false,
            callback,
        });
        Ok(id)
    }

    /// Creates a one-callback timer in the legacy style, with a dedicated
    /// time base behind it. Returns the timer ID and the clock accuracy in
    /// microseconds per tick.
    pub fn timer_create(
        self: &Arc<Self>,
        name: &str,
        callback: impl FnMut() + Send + 'static,
    ) -> OsResult<(ObjectId, u32)> {
        let timebase = self.timebase_create(name, None)?;
        match self.timer_add_inner(name, timebase, true, Box::new(callback)) {
            Ok(id) => Ok((id, microsec_per_tick())),
            Err(e) => {
                let _ = self.timebase_delete(timebase);
                Err(e)
            }
        }
    }

    /// Schedules a timer: first expiry `start_us` from now, then every
    /// `interval_us`. Zero start disarms the timer; zero interval makes it
    /// one-shot. Both zero is rejected.
    pub fn timer_set(&self, id: ObjectId, start_us: u32, interval_us: u32) -> OsResult<()> {
        if start_us == 0 && interval_us == 0 {
            return Err(OsError::TimerErrInvalidArgs);
        }
        let (timebase, dedicated) = {
            let mut timers = lock(&self.timers);
            let rec = timers.get_mut(id)?;
            rec.data.start_us = start_us;
            rec.data.interval_us = interval_us;
            (rec.data.timebase, rec.data.dedicated)
        };
        let tb_shared = Arc::clone(&lock(&self.timebases).get(timebase)?.data.shared);
        {
            let mut handlers = lock(&tb_shared.handlers);
            if let Some(h) = handlers.iter_mut().find(|h| h.timer_id == id) {
                h.wait_us = i64::from(start_us);
                h.interval_us = interval_us;
                h.active = start_us > 0;
            }
        }
        if dedicated {
            self.timebase_set(timebase, start_us, interval_us)?;
        }
        Ok(())
    }

    /// Deletes a timer; a dedicated time base goes with it.
    pub fn timer_delete(&self, id: ObjectId) -> OsResult<()> {
        let record = lock(&self.timers).release(id)?;
        let timebase = record.data.timebase;
        if let Ok(rec) = lock(&self.timebases).get(timebase) {
            lock(&rec.data.shared.handlers).retain(|h| h.timer_id != id);
        }
        if record.data.dedicated {
            let _ = self.timebase_delete(timebase);
        }
        Ok(())
    }

    pub fn timer_get_id_by_name(&self, name: &str) -> OsResult<ObjectId> {
        lock(&self.timers).find_by_name(name)
    }

    pub fn timer_get_info(&self, id: ObjectId) -> OsResult<TimerProp> {
        let timers = lock(&self.timers);
        let rec = timers.get(id)?;
        let accuracy_us = lock(&self.timebases)
            .get(rec.data.timebase)
            .map(|tb| tb.data.accuracy_us)
            .unwrap_or_else(|_| microsec_per_tick());
        Ok(TimerProp {
            name: rec.name.clone(),
            creator: rec.creator,
            start_us: rec.data.start_us,
            interval_us: rec.data.interval_us,
            accuracy_us,
        })
    }
}
