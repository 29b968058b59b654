// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Socket primitives of the host port.
//!
//! Thin wrappers over the host's BSD socket calls. All sockets are created
//! non-blocking; blocking behavior is provided above this layer by the
//! select machinery, which is the only way to honor caller timeouts
//! faithfully.

use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::ptr;
use std::time::{Duration, Instant};

use abi::{SocketDomain, SocketType};

/// Outcome of starting a non-blocking connect.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConnectStart {
    /// The handshake completed immediately (loopback does this).
    Connected,
    /// The handshake is in flight; poll `is_connected`.
    InProgress,
}

/// An open kernel socket. Closed on drop.
#[derive(Debug)]
pub struct Socket {
    fd: RawFd,
}

fn last_error() -> io::Error {
    io::Error::last_os_error()
}

fn cvt(rc: libc::c_int) -> io::Result<libc::c_int> {
    if rc < 0 {
        Err(last_error())
    } else {
        Ok(rc)
    }
}

fn cvt_size(rc: libc::ssize_t) -> io::Result<usize> {
    if rc < 0 {
        Err(last_error())
    } else {
        Ok(rc as usize)
    }
}

fn sockaddr_in(ip: [u8; 4], port: u16) -> libc::sockaddr_in {
    let mut sa: libc::sockaddr_in = unsafe { mem::zeroed() };
    sa.sin_family = libc::AF_INET as libc::sa_family_t;
    sa.sin_port = port.to_be();
    sa.sin_addr = libc::in_addr {
        s_addr: u32::from_ne_bytes(ip),
    };
    sa
}

fn addr_parts(sa: &libc::sockaddr_in) -> ([u8; 4], u16) {
    (sa.sin_addr.s_addr.to_ne_bytes(), u16::from_be(sa.sin_port))
}

impl Socket {
    /// Creates a kernel socket for the given abstract (domain, type) pair.
    /// STREAM maps to TCP and DATAGRAM to UDP.
    pub fn new(domain: SocketDomain, socktype: SocketType) -> io::Result<Socket> {
        let os_domain = match domain {
            SocketDomain::Inet => libc::AF_INET,
            SocketDomain::Inet6 => libc::AF_INET6,
        };
        let (os_type, os_proto) = match socktype {
            SocketType::Stream => (libc::SOCK_STREAM, libc::IPPROTO_TCP),
            SocketType::Datagram => (libc::SOCK_DGRAM, libc::IPPROTO_UDP),
        };
        let fd = cvt(unsafe { libc::socket(os_domain, os_type, os_proto) })?;
        let sock = Socket { fd };
        sock.set_nonblocking(true)?;
        Ok(sock)
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd
    }

    /// Sets the address-reuse option. Failure is tolerable; frequent
    /// restarts just get slower without it.
    pub fn set_reuse(&self) {
        let on: libc::c_int = 1;
        let _ = unsafe {
            libc::setsockopt(
                self.fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &on as *const _ as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
    }

    pub fn set_nonblocking(&self, on: bool) -> io::Result<()> {
        let flags = cvt(unsafe { libc::fcntl(self.fd, libc::F_GETFL) })?;
        let flags = if on {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        cvt(unsafe { libc::fcntl(self.fd, libc::F_SETFL, flags) })?;
        Ok(())
    }

    pub fn bind(&self, ip: [u8; 4], port: u16) -> io::Result<()> {
        let sa = sockaddr_in(ip, port);
        cvt(unsafe {
            libc::bind(
                self.fd,
                &sa as *const _ as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        })?;
        Ok(())
    }

    pub fn listen(&self, backlog: i32) -> io::Result<()> {
        cvt(unsafe { libc::listen(self.fd, backlog) })?;
        Ok(())
    }

    /// Accepts a pending connection, returning the peer socket and address.
    pub fn accept(&self) -> io::Result<(Socket, ([u8; 4], u16))> {
        let mut sa: libc::sockaddr_in = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        let fd = cvt(unsafe {
            libc::accept(self.fd, &mut sa as *mut _ as *mut libc::sockaddr, &mut len)
        })?;
        let peer = Socket { fd };
        peer.set_nonblocking(true)?;
        Ok((peer, addr_parts(&sa)))
    }

    /// Initiates a non-blocking connect.
    pub fn connect_start(&self, ip: [u8; 4], port: u16) -> io::Result<ConnectStart> {
        let sa = sockaddr_in(ip, port);
        let rc = unsafe {
            libc::connect(
                self.fd,
                &sa as *const _ as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if rc == 0 {
            return Ok(ConnectStart::Connected);
        }
        let err = last_error();
        match err.raw_os_error() {
            Some(libc::EINPROGRESS) | Some(libc::EWOULDBLOCK) | Some(libc::EALREADY) => {
                Ok(ConnectStart::InProgress)
            }
            Some(libc::EISCONN) => Ok(ConnectStart::Connected),
            _ => Err(err),
        }
    }

    /// Reports whether the socket currently has a live peer.
    pub fn is_connected(&self) -> bool {
        let mut sa: libc::sockaddr_in = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        let rc = unsafe {
            libc::getpeername(self.fd, &mut sa as *mut _ as *mut libc::sockaddr, &mut len)
        };
        rc == 0
    }

    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        cvt_size(unsafe {
            libc::recv(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0)
        })
    }

    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, ([u8; 4], u16))> {
        let mut sa: libc::sockaddr_in = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        let n = cvt_size(unsafe {
            libc::recvfrom(
                self.fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
                &mut sa as *mut _ as *mut libc::sockaddr,
                &mut len,
            )
        })?;
        Ok((n, addr_parts(&sa)))
    }

    pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
        cvt_size(unsafe {
            libc::send(self.fd, buf.as_ptr() as *const libc::c_void, buf.len(), 0)
        })
    }

    pub fn send_to(&self, buf: &[u8], ip: [u8; 4], port: u16) -> io::Result<usize> {
        let sa = sockaddr_in(ip, port);
        cvt_size(unsafe {
            libc::sendto(
                self.fd,
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
                0,
                &sa as *const _ as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        })
    }

    /// Half-close: we are done sending, the peer may still talk.
    pub fn shutdown_write(&self) {
        let _ = unsafe { libc::shutdown(self.fd, libc::SHUT_WR) };
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        let _ = unsafe { libc::close(self.fd) };
    }
}

/// A set of sockets to wait on, and the readiness reported for them by the
/// most recent `select` call.
pub struct SocketSet {
    read_fds: Vec<RawFd>,
    write_fds: Vec<RawFd>,
    ready_read: libc::fd_set,
    ready_write: libc::fd_set,
}

impl SocketSet {
    pub fn new() -> SocketSet {
        SocketSet {
            read_fds: Vec::new(),
            write_fds: Vec::new(),
            ready_read: unsafe { mem::zeroed() },
            ready_write: unsafe { mem::zeroed() },
        }
    }

    pub fn add_read(&mut self, fd: RawFd) {
        self.read_fds.push(fd);
    }

    pub fn add_write(&mut self, fd: RawFd) {
        self.write_fds.push(fd);
    }

    /// Waits for readiness on the member sockets. `None` blocks forever.
    /// Returns the number of ready descriptors; zero means the timeout
    /// elapsed. Interruption by a signal is retried with the remaining
    /// time, so callers never observe it.
    pub fn select(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let mut rset: libc::fd_set = unsafe { mem::zeroed() };
            let mut wset: libc::fd_set = unsafe { mem::zeroed() };
            let mut max_fd: RawFd = -1;
            for &fd in &self.read_fds {
                if fd >= libc::FD_SETSIZE as RawFd {
                    return Err(io::Error::from_raw_os_error(libc::EINVAL));
                }
                unsafe { libc::FD_SET(fd, &mut rset) };
                max_fd = max_fd.max(fd);
            }
            for &fd in &self.write_fds {
                if fd >= libc::FD_SETSIZE as RawFd {
                    return Err(io::Error::from_raw_os_error(libc::EINVAL));
                }
                unsafe { libc::FD_SET(fd, &mut wset) };
                max_fd = max_fd.max(fd);
            }

            let mut tv_storage;
            let tv_ptr = match deadline {
                None => ptr::null_mut(),
                Some(d) => {
                    let remaining = d.saturating_duration_since(Instant::now());
                    tv_storage = libc::timeval {
                        tv_sec: remaining.as_secs() as libc::time_t,
                        tv_usec: remaining.subsec_micros() as libc::suseconds_t,
                    };
                    &mut tv_storage as *mut libc::timeval
                }
            };

            let rc = unsafe {
                libc::select(
                    max_fd + 1,
                    &mut rset,
                    &mut wset,
                    ptr::null_mut(),
                    tv_ptr,
                )
            };
            if rc < 0 {
                let err = last_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                return Err(err);
            }
            self.ready_read = rset;
            self.ready_write = wset;
            return Ok(rc as usize);
        }
    }

    /// Whether `fd` was reported readable by the last `select`.
    pub fn read_ready(&self, fd: RawFd) -> bool {
        unsafe { libc::FD_ISSET(fd, &self.ready_read) }
    }

    /// Whether `fd` was reported writable by the last `select`.
    pub fn write_ready(&self, fd: RawFd) -> bool {
        unsafe { libc::FD_ISSET(fd, &self.ready_write) }
    }
}

impl Default for SocketSet {
    fn default() -> Self {
        Self::new()
    }
}
