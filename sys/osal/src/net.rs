// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sockets and socket addresses.
//!
//! Socket handles live in the stream table next to files; the
//! `selectable` flag is what routes them through the select machinery.
//! All sockets are non-blocking at the kernel level, and every blocking
//! operation up here is select-gated so caller timeouts are honored
//! exactly.
//!
//! [`SockAddr`] is the opaque, fixed-size address buffer of the API: a
//! family tag, a network-order port, and the address bytes, with the
//! actual encoded length alongside.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::Arc;

use byteorder::{ByteOrder, NetworkEndian};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use abi::{
    ObjectId, OsError, OsResult, SocketDomain, SocketType, StreamState, Timeout, SOCKADDR_MAX_LEN,
};

use crate::clock::{ticks_to_duration, usecs_to_ticks, wait_of, Wait};
use crate::file::{SocketState, StreamData, StreamKind};
use crate::port;
use crate::util::lock;
use crate::Osal;

/// Address family tags stored in the buffer. The values match the host
/// convention so the buffer can be handed to the stack unmodified.
const AF_INET: u16 = 2;
/// Reserved for the day IPv6 support lands.
#[allow(dead_code)]
const AF_INET6: u16 = 10;

/// Encoded length of an IPv4 address record: family, port, four octets.
const INET_ADDR_LEN: u16 = 8;

/// An opaque socket address: family-tagged bytes plus their actual length,
/// in a buffer large enough for any supported family.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct SockAddr {
    actual_length: u16,
    data: [u8; SOCKADDR_MAX_LEN],
}

impl SockAddr {
    /// Initializes an empty address of the given family.
    pub fn init(domain: SocketDomain) -> OsResult<SockAddr> {
        let family = match domain {
            SocketDomain::Inet => AF_INET,
            SocketDomain::Inet6 => return Err(OsError::NotImplemented),
        };
        let mut addr = SockAddr {
            actual_length: INET_ADDR_LEN,
            data: [0; SOCKADDR_MAX_LEN],
        };
        NetworkEndian::write_u16(&mut addr.data[0..2], family);
        Ok(addr)
    }

    fn family(&self) -> u16 {
        NetworkEndian::read_u16(&self.data[0..2])
    }

    /// Checks the family tag and encoded length together; every operation
    /// that hands the address to the stack goes through this.
    pub(crate) fn validate_inet(&self) -> OsResult<()> {
        if self.family() != AF_INET || self.actual_length != INET_ADDR_LEN {
            return Err(OsError::BadAddress);
        }
        Ok(())
    }

    /// Port number, host order.
    pub fn port(&self) -> OsResult<u16> {
        self.validate_inet()?;
        Ok(NetworkEndian::read_u16(&self.data[2..4]))
    }

    /// Sets the port number. Stored in network order.
    pub fn set_port(&mut self, port: u16) -> OsResult<()> {
        self.validate_inet()?;
        NetworkEndian::write_u16(&mut self.data[2..4], port);
        Ok(())
    }

    pub(crate) fn octets(&self) -> OsResult<[u8; 4]> {
        self.validate_inet()?;
        let mut o = [0u8; 4];
        o.copy_from_slice(&self.data[4..8]);
        Ok(o)
    }

    pub(crate) fn from_parts(octets: [u8; 4], port: u16) -> SockAddr {
        let mut addr = SockAddr::init(SocketDomain::Inet).unwrap();
        addr.data[4..8].copy_from_slice(&octets);
        NetworkEndian::write_u16(&mut addr.data[2..4], port);
        addr
    }
}

/// Parses a dotted-quad address string. The port is left at zero.
impl FromStr for SockAddr {
    type Err = OsError;

    fn from_str(s: &str) -> OsResult<SockAddr> {
        let ip = Ipv4Addr::from_str(s).map_err(|_| OsError::BadAddress)?;
        Ok(SockAddr::from_parts(ip.octets(), 0))
    }
}

/// Formats the address part as a dotted quad.
impl fmt::Display for SockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.octets() {
            Ok(o) => write!(f, "{}.{}.{}.{}", o[0], o[1], o[2], o[3]),
            Err(_) => write!(f, "<bad address>"),
        }
    }
}

/// Information reported by [`Osal::socket_get_info`].
#[derive(Debug, Clone, Copy)]
pub struct SocketProp {
    pub domain: SocketDomain,
    pub socktype: SocketType,
    pub bound: bool,
    pub connected: bool,
}

/// Refreshes a socket entry's connection tracking from the stack's view.
/// A socket that was connected and no longer is latches `disconnected`
/// until the next successful connection.
pub(crate) fn update_connection_status(state: &mut SocketState) {
    let is_connected = state.sock.is_connected();
    if is_connected {
        state.disconnected = false;
    } else if state.connected {
        state.disconnected = true;
    }
    state.connected = is_connected;
}

impl Osal {
    /// Creates a socket for the given (domain, type) pair. STREAM gets
    /// TCP, DATAGRAM gets UDP; only IPv4 is implemented.
    pub fn socket_open(&self, domain: SocketDomain, socktype: SocketType) -> OsResult<ObjectId> {
        if domain != SocketDomain::Inet {
            return Err(OsError::NotImplemented);
        }
        let sock = port::Socket::new(domain, socktype).map_err(|e| {
            log::debug!("socket create failed: {e}");
            OsError::Error
        })?;
        sock.set_reuse();
        let creator = self.task_get_id().ok();
        lock(&self.streams).allocate_shared_name(
            "",
            creator,
            StreamData {
                kind: StreamKind::Socket(SocketState {
                    sock: Arc::new(sock),
                    domain,
                    socktype,
                    selectable: true,
                    bound: false,
                    connected: false,
                    disconnected: false,
                }),
            },
        )
    }

    fn with_socket<R>(
        &self,
        id: ObjectId,
        f: impl FnOnce(&mut SocketState) -> OsResult<R>,
    ) -> OsResult<R> {
        let mut streams = lock(&self.streams);
        let rec = streams.get_mut(id)?;
        match &mut rec.data.kind {
            StreamKind::Socket(state) => f(state),
            StreamKind::File { .. } => Err(OsError::OperationNotSupported),
        }
    }

    /// Binds a socket to a local address. Stream sockets are additionally
    /// placed into the listening state.
    pub fn socket_bind(&self, id: ObjectId, addr: &SockAddr) -> OsResult<()> {
        addr.validate_inet()?;
        let octets = addr.octets()?;
        let port_num = addr.port()?;
        self.with_socket(id, |state| {
            if state.bound {
                return Err(OsError::Error);
            }
            state.sock.bind(octets, port_num).map_err(|e| {
                log::debug!("bind failed: {e}");
                OsError::Error
            })?;
            if state.socktype == SocketType::Stream {
                state.sock.listen(10).map_err(|_| OsError::Error)?;
            }
            state.bound = true;
            Ok(())
        })
    }

    /// Connects a stream socket, polling the in-flight handshake at 1 ms
    /// steps until it completes or the timeout expires.
    pub fn socket_connect(&self, id: ObjectId, addr: &SockAddr, timeout: Timeout) -> OsResult<()> {
        addr.validate_inet()?;
        let octets = addr.octets()?;
        let port_num = addr.port()?;
        let sock = self.with_socket(id, |state| {
            if state.socktype != SocketType::Stream {
                return Err(OsError::OperationNotSupported);
            }
            Ok(Arc::clone(&state.sock))
        })?;

        let started = sock.connect_start(octets, port_num).map_err(|e| {
            log::debug!("connect failed: {e}");
            OsError::Error
        })?;
        if started == port::ConnectStart::InProgress {
            let step = ticks_to_duration(usecs_to_ticks(1000));
            let mut remaining = match wait_of(timeout) {
                Wait::Forever => None,
                Wait::Poll => Some(std::time::Duration::ZERO),
                Wait::For(d) => Some(d),
            };
            loop {
                if sock.is_connected() {
                    break;
                }
                match &mut remaining {
                    None => {}
                    Some(r) => {
                        if r.is_zero() {
                            return Err(OsError::Timeout);
                        }
                        *r = r.saturating_sub(step);
                    }
                }
                port::delay(step);
            }
        }
        self.with_socket(id, |state| {
            state.connected = true;
            state.disconnected = false;
            Ok(())
        })
    }

    /// Waits for and accepts a connection on a listening socket,
    /// returning the peer handle and address.
    pub fn socket_accept(&self, id: ObjectId, timeout: Timeout) -> OsResult<(ObjectId, SockAddr)> {
        let sock = self.with_socket(id, |state| {
            if state.socktype != SocketType::Stream || !state.bound {
                return Err(OsError::OperationNotSupported);
            }
            Ok(Arc::clone(&state.sock))
        })?;

        let mut flags = StreamState::READABLE;
        self.select_single(id, &mut flags, timeout)?;
        if !flags.contains(StreamState::READABLE) {
            return Err(OsError::Timeout);
        }

        let (peer, (octets, peer_port)) = sock.accept().map_err(|e| {
            log::debug!("accept failed: {e}");
            OsError::Error
        })?;
        let creator = self.task_get_id().ok();
        let peer_id = lock(&self.streams).allocate_shared_name(
            "",
            creator,
            StreamData {
                kind: StreamKind::Socket(SocketState {
                    sock: Arc::new(peer),
                    domain: SocketDomain::Inet,
                    socktype: SocketType::Stream,
                    selectable: true,
                    bound: true,
                    connected: true,
                    disconnected: false,
                }),
            },
        )?;
        Ok((peer_id, SockAddr::from_parts(octets, peer_port)))
    }

    /// Receives a datagram (or stream data), waiting via select up to the
    /// caller's timeout. Returns the byte count and the sender's address.
    pub fn socket_recv_from(
        &self,
        id: ObjectId,
        buf: &mut [u8],
        timeout: Timeout,
    ) -> OsResult<(usize, SockAddr)> {
        // Validate up front so a plain file handle fails cleanly.
        self.with_socket(id, |_| Ok(()))?;

        let mut flags = StreamState::READABLE;
        self.select_single(id, &mut flags, timeout)?;
        if !flags.contains(StreamState::READABLE) {
            return Err(OsError::Timeout);
        }
        let sock = self.with_socket(id, |state| Ok(Arc::clone(&state.sock)))?;
        let (n, (octets, port_num)) = sock.recv_from(buf).map_err(|e| {
            log::debug!("recvfrom failed: {e}");
            OsError::Error
        })?;
        Ok((n, SockAddr::from_parts(octets, port_num)))
    }

    /// Sends a datagram to the given address.
    pub fn socket_send_to(&self, id: ObjectId, buf: &[u8], addr: &SockAddr) -> OsResult<usize> {
        addr.validate_inet()?;
        let octets = addr.octets()?;
        let port_num = addr.port()?;
        let sock = self.with_socket(id, |state| Ok(Arc::clone(&state.sock)))?;
        sock.send_to(buf, octets, port_num).map_err(|e| {
            log::debug!("sendto failed: {e}");
            OsError::Error
        })
    }

    /// Reports a socket's identity and connection state.
    pub fn socket_get_info(&self, id: ObjectId) -> OsResult<SocketProp> {
        self.with_socket(id, |state| {
            Ok(SocketProp {
                domain: state.domain,
                socktype: state.socktype,
                bound: state.bound,
                connected: state.connected,
            })
        })
    }

    /// Host name of the machine this layer is running on.
    pub fn network_get_hostname(&self) -> OsResult<String> {
        port::hostname().ok_or(OsError::Error)
    }

    /// Numeric host identity; the host port does not provide one.
    pub fn network_get_id(&self) -> OsResult<u32> {
        Err(OsError::NotImplemented)
    }
}
