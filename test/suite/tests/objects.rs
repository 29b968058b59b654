// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lifecycle rules common to every object class: name uniqueness,
//! fresh IDs after delete, capacity limits, and stale-ID rejection.

use abi::{OsError, MAX_BIN_SEMAPHORES, MAX_QUEUES};
use test_suite::init_osal;

#[test]
fn name_uniqueness_per_class() {
    let os = init_osal();
    let q = os.queue_create("shared-name", 4, 8).unwrap();
    assert_eq!(
        os.queue_create("shared-name", 4, 8),
        Err(OsError::NameTaken)
    );
    // Other classes have their own namespaces.
    let s = os.bin_sem_create("shared-name", 0, 0).unwrap();
    os.bin_sem_delete(s).unwrap();

    // Deleting and recreating an unrelated object does not free the name.
    let other = os.queue_create("other", 4, 8).unwrap();
    os.queue_delete(other).unwrap();
    assert_eq!(
        os.queue_create("shared-name", 4, 8),
        Err(OsError::NameTaken)
    );

    os.queue_delete(q).unwrap();
    os.queue_create("shared-name", 4, 8).unwrap();
}

#[test]
fn fresh_id_after_delete() {
    let os = init_osal();
    let first = os.count_sem_create("cycle", 1, 0).unwrap();
    os.count_sem_delete(first).unwrap();
    let second = os.count_sem_create("cycle", 1, 0).unwrap();
    assert_ne!(first, second, "a deleted ID must not come back verbatim");
    os.count_sem_take(second).unwrap();
    assert_eq!(os.count_sem_take(first).unwrap_err(), OsError::InvalidId);
}

#[test]
fn capacity_reached_exactly_at_maximum() {
    let os = init_osal();
    let mut ids = Vec::new();
    for i in 0..MAX_BIN_SEMAPHORES {
        ids.push(os.bin_sem_create(&format!("bs{i}"), 0, 0).unwrap());
    }
    assert_eq!(
        os.bin_sem_create("one-too-many", 0, 0),
        Err(OsError::NoFreeIds)
    );
    // Freeing any one slot restores exactly one creation.
    os.bin_sem_delete(ids.pop().unwrap()).unwrap();
    os.bin_sem_create("fits-now", 0, 0).unwrap();
    assert_eq!(os.bin_sem_create("nope", 0, 0), Err(OsError::NoFreeIds));
}

#[test]
fn queue_capacity_matches_configured_maximum() {
    let os = init_osal();
    for i in 0..MAX_QUEUES {
        os.queue_create(&format!("q{i}"), 2, 4).unwrap();
    }
    assert_eq!(os.queue_create("overflow", 2, 4), Err(OsError::NoFreeIds));
}

#[test]
fn operations_on_stale_ids_fail() {
    let os = init_osal();
    let q = os.queue_create("stale", 4, 8).unwrap();
    os.queue_delete(q).unwrap();
    let mut buf = [0u8; 8];
    assert_eq!(os.queue_put(q, &buf), Err(OsError::InvalidId));
    assert_eq!(
        os.queue_get(q, &mut buf, abi::Timeout::Check),
        Err(OsError::InvalidId)
    );
    assert_eq!(os.queue_get_info(q).map(drop), Err(OsError::InvalidId));
    assert_eq!(os.queue_delete(q), Err(OsError::InvalidId));
}

#[test]
fn get_by_name_tracks_lifecycle() {
    let os = init_osal();
    let m = os.mut_sem_create("lookup", 0).unwrap();
    assert_eq!(os.mut_sem_get_id_by_name("lookup").unwrap(), m);
    os.mut_sem_delete(m).unwrap();
    assert_eq!(
        os.mut_sem_get_id_by_name("lookup"),
        Err(OsError::NameNotFound)
    );
}

#[test]
fn overlong_names_rejected() {
    let os = init_osal();
    let long = "n".repeat(abi::MAX_API_NAME);
    assert_eq!(
        os.bin_sem_create(&long, 0, 0),
        Err(OsError::NameTooLong)
    );
    assert_eq!(
        os.task_get_id_by_name(&long),
        Err(OsError::NameTooLong)
    );
}
