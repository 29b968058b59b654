// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Readiness semantics: single-handle waits, multi-handle bitmap
//! translation, and disconnected-socket reporting.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use abi::{OsError, Priority, SocketDomain, SocketType, StreamState, Timeout};
use osal::{FdSet, SockAddr};
use test_suite::init_osal;

fn loopback(port: u16) -> SockAddr {
    let mut addr: SockAddr = "127.0.0.1".parse().unwrap();
    addr.set_port(port).unwrap();
    addr
}

#[test]
fn single_readable_after_pending_write() {
    const PORT: u16 = 47_201;
    let os = init_osal();
    let server = os
        .socket_open(SocketDomain::Inet, SocketType::Datagram)
        .unwrap();
    os.socket_bind(server, &loopback(PORT)).unwrap();

    let sender = os
        .socket_open(SocketDomain::Inet, SocketType::Datagram)
        .unwrap();
    os.socket_send_to(sender, &[7u8; 32], &loopback(PORT))
        .unwrap();

    let mut flags = StreamState::READABLE;
    os.select_single(server, &mut flags, Timeout::Millis(100))
        .expect("pending datagram should make the socket ready");
    assert!(flags.contains(StreamState::READABLE));

    os.close(sender).unwrap();
    os.close(server).unwrap();
}

#[test]
fn single_timeout_clears_flags() {
    const PORT: u16 = 47_202;
    let os = init_osal();
    let idle = os
        .socket_open(SocketDomain::Inet, SocketType::Datagram)
        .unwrap();
    os.socket_bind(idle, &loopback(PORT)).unwrap();

    let mut flags = StreamState::READABLE;
    let t0 = Instant::now();
    assert_eq!(
        os.select_single(idle, &mut flags, Timeout::Millis(100)),
        Err(OsError::Timeout)
    );
    assert!(flags.is_empty(), "no-readiness timeout must clear the bits");
    assert!(t0.elapsed() >= Duration::from_millis(100));
    os.close(idle).unwrap();
}

#[test]
fn multiple_reports_exactly_the_ready_member() {
    const PORT_A: u16 = 47_203;
    const PORT_B: u16 = 47_204;
    let os = init_osal();
    let a = os
        .socket_open(SocketDomain::Inet, SocketType::Datagram)
        .unwrap();
    os.socket_bind(a, &loopback(PORT_A)).unwrap();
    let b = os
        .socket_open(SocketDomain::Inet, SocketType::Datagram)
        .unwrap();
    os.socket_bind(b, &loopback(PORT_B)).unwrap();

    let sender = os
        .socket_open(SocketDomain::Inet, SocketType::Datagram)
        .unwrap();
    os.socket_send_to(sender, &[1u8; 8], &loopback(PORT_B))
        .unwrap();

    let mut read_set = FdSet::new();
    read_set.add(a);
    read_set.add(b);
    os.select_multiple(Some(&mut read_set), None, Timeout::Millis(500))
        .expect("one member is ready");
    assert!(!read_set.is_set(a), "idle member's bit must clear");
    assert!(read_set.is_set(b), "ready member's bit must survive");

    os.close(sender).unwrap();
    os.close(a).unwrap();
    os.close(b).unwrap();
}

#[test]
fn multiple_times_out_with_all_idle() {
    const PORT_A: u16 = 47_205;
    let os = init_osal();
    let a = os
        .socket_open(SocketDomain::Inet, SocketType::Datagram)
        .unwrap();
    os.socket_bind(a, &loopback(PORT_A)).unwrap();

    let mut read_set = FdSet::new();
    read_set.add(a);
    assert_eq!(
        os.select_multiple(Some(&mut read_set), None, Timeout::Millis(100)),
        Err(OsError::Timeout)
    );
    assert!(!read_set.is_set(a));
    os.close(a).unwrap();
}

#[test]
fn disconnected_stream_counts_as_ready() {
    const PORT: u16 = 47_206;
    let os = init_osal();
    let listener = os
        .socket_open(SocketDomain::Inet, SocketType::Stream)
        .unwrap();
    os.socket_bind(listener, &loopback(PORT)).unwrap();

    let (tx, rx) = mpsc::channel();
    let os_server = Arc::clone(&os);
    os.task_create("SEL_SRV", 0, Priority(90), 0, move || {
        let (peer, _) = os_server.socket_accept(listener, Timeout::Pend).unwrap();
        tx.send(peer).unwrap();
    })
    .unwrap();

    let client = os
        .socket_open(SocketDomain::Inet, SocketType::Stream)
        .unwrap();
    os.socket_connect(client, &loopback(PORT), Timeout::Pend)
        .unwrap();
    let peer = rx.recv_timeout(Duration::from_secs(10)).unwrap();

    // Tear the client down; the peer must become "ready" so a reader
    // observes EOF instead of waiting out its timeout.
    os.close(client).unwrap();
    let mut flags = StreamState::READABLE;
    os.select_single(peer, &mut flags, Timeout::Millis(2000))
        .expect("peer of a closed socket should select ready");
    let mut buf = [0u8; 8];
    assert_eq!(os.read(peer, &mut buf).unwrap(), 0, "expected EOF");

    os.close(peer).unwrap();
    os.close(listener).unwrap();
}

#[test]
fn closed_handles_drop_out_of_sets() {
    const PORT: u16 = 47_207;
    let os = init_osal();
    let a = os
        .socket_open(SocketDomain::Inet, SocketType::Datagram)
        .unwrap();
    os.socket_bind(a, &loopback(PORT)).unwrap();
    let mut read_set = FdSet::new();
    read_set.add(a);
    os.close(a).unwrap();
    assert_eq!(
        os.select_multiple(Some(&mut read_set), None, Timeout::Millis(50)),
        Err(OsError::Timeout)
    );
    assert!(
        !read_set.is_set(a),
        "stale member must be cleared during conversion"
    );
}
