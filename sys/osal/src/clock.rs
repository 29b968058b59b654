// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Time conversions and the wall-clock service.
//!
//! All caller-facing timeouts are expressed in milliseconds or
//! microseconds; the kernel thinks in ticks. Conversions round up, so a
//! nonzero request can never collapse to a zero-tick (busy) wait.
//!
//! The wall clock is the port's monotonic elapsed time plus a
//! user-adjustable offset, so `set_local_time` never disturbs the
//! monotonic source that timeouts are computed from.

use std::sync::Mutex;
use std::time::Duration;

use abi::{OsResult, OsTime, Timeout};

use crate::port;
use crate::util::lock;
use crate::Osal;

/// Nanoseconds per kernel tick, rounded to the nearest nanosecond.
pub(crate) const fn clock_accuracy_nsec() -> u32 {
    (1_000_000_000 + port::TICK_RATE_HZ / 2) / port::TICK_RATE_HZ
}

/// Microseconds per kernel tick, rounded again to the nearest microsecond.
pub(crate) const fn microsec_per_tick() -> u32 {
    (clock_accuracy_nsec() + 500) / 1000
}

/// Converts microseconds to ticks.
///
/// Computed in two parts to stay inside 32 bits: the fractional second
/// first, then any whole seconds. The fraction rounds up, so a nonzero
/// number of microseconds is guaranteed to produce a nonzero number of
/// ticks.
pub(crate) fn usecs_to_ticks(usecs: u32) -> u32 {
    let acc = clock_accuracy_nsec();
    let mut result = (1000 * (usecs % 1_000_000) + acc - 1) / acc;
    if usecs >= 1_000_000 {
        result += (usecs / 1_000_000) * port::TICK_RATE_HZ;
    }
    result
}

/// Converts milliseconds to ticks, rounding up.
pub(crate) fn millis_to_ticks(ms: u32) -> u32 {
    usecs_to_ticks(ms.saturating_mul(1000))
}

pub(crate) fn ticks_to_duration(ticks: u32) -> Duration {
    Duration::from_nanos(u64::from(ticks) * u64::from(clock_accuracy_nsec()))
}

/// A caller timeout lowered to what the kernel wait primitives take.
#[derive(Copy, Clone, Debug)]
pub(crate) enum Wait {
    Forever,
    Poll,
    For(Duration),
}

pub(crate) fn wait_of(timeout: Timeout) -> Wait {
    match timeout {
        Timeout::Pend => Wait::Forever,
        Timeout::Check => Wait::Poll,
        Timeout::Millis(ms) => Wait::For(ticks_to_duration(millis_to_ticks(ms))),
    }
}

pub(crate) struct Clock {
    /// (seconds, microseconds) added to the monotonic elapsed time. Either
    /// component may be negative; the reader normalizes.
    adjust: Mutex<(i64, i64)>,
}

impl Clock {
    pub fn new() -> Clock {
        Clock {
            adjust: Mutex::new((0, 0)),
        }
    }
}

impl Osal {
    /// Reports the local time: elapsed monotonic time plus the offset from
    /// the last `set_local_time`, normalized so microseconds land in
    /// `[0, 1_000_000)`.
    pub fn get_local_time(&self) -> OsResult<OsTime> {
        let (es, eus) = port::clock_elapsed();
        let (adj_s, adj_us) = *lock(&self.clock.adjust);
        let mut seconds = es as i64 + adj_s;
        let mut micros = i64::from(eus) + adj_us;
        while micros < 0 {
            micros += 1_000_000;
            seconds -= 1;
        }
        while micros >= 1_000_000 {
            micros -= 1_000_000;
            seconds += 1;
        }
        Ok(OsTime {
            seconds,
            microsecs: micros as u32,
        })
    }

    /// Makes the reported local time equal `time` at the current instant
    /// by recomputing the offset.
    pub fn set_local_time(&self, time: &OsTime) -> OsResult<()> {
        let (es, eus) = port::clock_elapsed();
        let mut adj = lock(&self.clock.adjust);
        *adj = (
            time.seconds - es as i64,
            i64::from(time.microsecs) - i64::from(eus),
        );
        Ok(())
    }

    /// Current tick count since startup, for callers that want raw ticks.
    pub fn get_tics(&self) -> u64 {
        let (es, eus) = port::clock_elapsed();
        es * u64::from(port::TICK_RATE_HZ)
            + u64::from(eus) / u64::from(microsec_per_tick().max(1))
    }

    /// Milliseconds-to-ticks conversion at the configured tick rate,
    /// exposed because applications sizing their own timeouts need it.
    pub fn milli_2_tics(&self, ms: u32) -> u32 {
        millis_to_ticks(ms)
    }

    /// Microseconds per tick, i.e. the clock accuracy in the units the
    /// timer API reports.
    pub fn tick_2_micros(&self) -> u32 {
        microsec_per_tick()
    }
}
