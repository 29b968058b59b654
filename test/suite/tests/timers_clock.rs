// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Timer expiry behavior and the wall-clock service.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use abi::OsTime;
use test_suite::init_osal;

#[test]
fn periodic_timer_fires_expected_count() {
    let os = init_osal();
    let count = Arc::new(AtomicU32::new(0));
    let c = Arc::clone(&count);
    let (id, _accuracy) = os
        .timer_create("cadence", move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    // 50 ms to the first expiry, 100 ms period: five expiries in 500 ms.
    os.timer_set(id, 50_000, 100_000).unwrap();
    std::thread::sleep(Duration::from_millis(500));
    os.timer_delete(id).unwrap();

    let fired = count.load(Ordering::SeqCst);
    assert!(
        (4..=6).contains(&fired),
        "expected 4..=6 expiries in the window, saw {fired}"
    );
}

#[test]
fn disarmed_timer_stops_firing() {
    let os = init_osal();
    let count = Arc::new(AtomicU32::new(0));
    let c = Arc::clone(&count);
    let (id, _) = os
        .timer_create("stopper", move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    os.timer_set(id, 20_000, 20_000).unwrap();
    std::thread::sleep(Duration::from_millis(150));
    // Zero start disarms.
    os.timer_set(id, 0, 20_000).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    let settled = count.load(Ordering::SeqCst);
    assert!(settled > 0);
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(
        count.load(Ordering::SeqCst),
        settled,
        "timer kept firing after being disarmed"
    );
    os.timer_delete(id).unwrap();
}

#[test]
fn wall_clock_is_monotonic_without_adjustment() {
    let os = init_osal();
    osal::os_printf!(os, "clock check starting\n");
    let mut last = os.get_local_time().unwrap();
    for _ in 0..50 {
        let now = os.get_local_time().unwrap();
        let went_backward = now.seconds < last.seconds
            || (now.seconds == last.seconds && now.microsecs < last.microsecs);
        assert!(
            !went_backward,
            "clock went backward: {last:?} -> {now:?}"
        );
        last = now;
    }
}

#[test]
fn set_local_time_round_trips() {
    let os = init_osal();
    let target = OsTime {
        seconds: 1_000_000_000,
        microsecs: 250_000,
    };
    os.set_local_time(&target).unwrap();
    let read = os.get_local_time().unwrap();
    assert!(
        read.seconds >= target.seconds,
        "reported time predates what was just set"
    );
    let delta_us = (read.seconds - target.seconds) * 1_000_000
        + i64::from(read.microsecs) - i64::from(target.microsecs);
    assert!(
        (0..1_000_000).contains(&delta_us),
        "set/get drifted by {delta_us} us"
    );
    assert!(read.microsecs < 1_000_000, "microseconds not normalized");
}

#[test]
fn timebase_names_resolve() {
    let os = init_osal();
    let tb = os.timebase_create("tb-named", None).unwrap();
    assert_eq!(os.timebase_get_id_by_name("tb-named").unwrap(), tb);
    let info = os.timebase_get_info(tb).unwrap();
    assert_eq!(info.name, "tb-named");
    os.timebase_delete(tb).unwrap();
}
