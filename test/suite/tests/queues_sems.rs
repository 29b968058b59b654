// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Queue ordering/boundary behavior and semaphore token accounting,
//! including the cross-task paths.

use std::sync::Arc;
use std::time::{Duration, Instant};

use abi::{OsError, Priority, Timeout};
use test_suite::init_osal;

#[test]
fn bounded_queue_scenario() {
    let os = init_osal();
    let q = os.queue_create("bounded", 4, 8).unwrap();
    for i in 1..=4u8 {
        os.queue_put(q, &[i; 8]).unwrap();
    }
    assert_eq!(os.queue_put(q, &[5; 8]), Err(OsError::QueueFull));

    let mut buf = [0u8; 8];
    os.queue_get(q, &mut buf, Timeout::Check).unwrap();
    assert_eq!(buf, [1; 8], "oldest element must come out first");
    os.queue_put(q, &[5; 8]).unwrap();
}

#[test]
fn blocking_get_wakes_on_cross_task_put() {
    let os = init_osal();
    let q = os.queue_create("xfer", 4, 8).unwrap();
    let os2 = Arc::clone(&os);
    os.task_create("producer", 0, Priority(80), 0, move || {
        os2.task_delay(50).unwrap();
        os2.queue_put(q, b"deadbeef").unwrap();
    })
    .unwrap();

    let mut buf = [0u8; 8];
    let t0 = Instant::now();
    let n = os.queue_get(q, &mut buf, Timeout::Millis(2000)).unwrap();
    assert_eq!(n, 8);
    assert_eq!(&buf, b"deadbeef");
    assert!(
        t0.elapsed() < Duration::from_millis(2000),
        "get should return as soon as the producer posts"
    );
}

#[test]
fn queue_timeout_is_bounded() {
    let os = init_osal();
    let q = os.queue_create("empty", 4, 8).unwrap();
    let mut buf = [0u8; 8];
    let t0 = Instant::now();
    assert_eq!(
        os.queue_get(q, &mut buf, Timeout::Millis(100)),
        Err(OsError::QueueTimeout)
    );
    let waited = t0.elapsed();
    assert!(waited >= Duration::from_millis(100));
    assert!(
        waited < Duration::from_millis(1000),
        "timeout overshot grossly: {waited:?}"
    );
}

#[test]
fn counting_semaphore_accounting() {
    let os = init_osal();
    let n = 5;
    let s = os.count_sem_create("tokens", n, 0).unwrap();
    for k in 0..n {
        os.count_sem_timed_wait(s, Timeout::Check)
            .unwrap_or_else(|e| panic!("take {k} of {n} failed: {e}"));
    }
    assert_eq!(
        os.count_sem_timed_wait(s, Timeout::Check),
        Err(OsError::SemTimeout)
    );
}

#[test]
fn binary_semaphore_crosses_tasks() {
    let os = init_osal();
    let s = os.bin_sem_create("signal", 0, 0).unwrap();
    let os2 = Arc::clone(&os);
    os.task_create("giver", 0, Priority(80), 0, move || {
        os2.task_delay(30).unwrap();
        os2.bin_sem_give(s).unwrap();
    })
    .unwrap();
    os.bin_sem_timed_wait(s, Timeout::Millis(2000))
        .expect("token never arrived");
}

#[test]
fn mutex_excludes_across_tasks() {
    let os = init_osal();
    let m = os.mut_sem_create("guard", 0).unwrap();
    os.mut_sem_take(m).unwrap();

    let os2 = Arc::clone(&os);
    let (tx, rx) = std::sync::mpsc::channel();
    os.task_create("contender", 0, Priority(80), 0, move || {
        // Blocks until the main thread gives.
        os2.mut_sem_take(m).unwrap();
        tx.send(()).unwrap();
        os2.mut_sem_give(m).unwrap();
    })
    .unwrap();

    // The contender cannot get through while we hold the mutex.
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    os.mut_sem_give(m).unwrap();
    rx.recv_timeout(Duration::from_secs(5))
        .expect("contender never acquired the mutex");
}
