// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Readiness waiting over stream handles.
//!
//! [`FdSet`] is a bit set over stream table indices with a proper iterator
//! over its members, and the select calls translate between it and the
//! kernel's socket sets. Two quirks of the semantics deserve note:
//!
//! - a socket observed to have dropped its connection is always treated as
//!   ready, so callers go on to the I/O call and see EOF instead of
//!   spinning against a timeout that will never produce data;
//! - signal interruption of the kernel select is retried internally (in
//!   the port) and never surfaces here.

use std::os::unix::io::RawFd;
use std::sync::Arc;

use abi::{ObjectId, OsError, OsResult, StreamState, Timeout, MAX_OPEN_FILES};

use crate::clock::{wait_of, Wait};
use crate::file::StreamKind;
use crate::net::update_connection_status;
use crate::port;
use crate::util::lock;
use crate::Osal;

const WORDS: usize = MAX_OPEN_FILES.div_ceil(64);
static_assertions::const_assert!(WORDS * 64 >= MAX_OPEN_FILES);

/// A set of stream handles, stored as bits over table indices.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FdSet {
    words: [u64; WORDS],
}

impl FdSet {
    pub fn new() -> FdSet {
        FdSet::default()
    }

    pub fn add(&mut self, id: ObjectId) {
        let i = id.index();
        if i < MAX_OPEN_FILES {
            self.words[i / 64] |= 1 << (i % 64);
        }
    }

    pub fn clear(&mut self, id: ObjectId) {
        let i = id.index();
        if i < MAX_OPEN_FILES {
            self.words[i / 64] &= !(1 << (i % 64));
        }
    }

    pub fn is_set(&self, id: ObjectId) -> bool {
        self.contains_index(id.index())
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    fn contains_index(&self, i: usize) -> bool {
        i < MAX_OPEN_FILES && self.words[i / 64] & (1 << (i % 64)) != 0
    }

    fn clear_index(&mut self, i: usize) {
        if i < MAX_OPEN_FILES {
            self.words[i / 64] &= !(1 << (i % 64));
        }
    }

    /// Iterates the set members as table indices, lowest first.
    pub fn iter_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(w, &word)| {
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let b = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(w * 64 + b)
            })
        })
    }
}

fn wait_to_timeout(w: Wait) -> Option<std::time::Duration> {
    match w {
        Wait::Forever => None,
        Wait::Poll => Some(std::time::Duration::ZERO),
        Wait::For(d) => Some(d),
    }
}

impl Osal {
    /// Waits for the requested states on one stream. On return `flags`
    /// holds the subset that actually became ready; on timeout it is
    /// cleared and `Timeout` is returned, except that a disconnected
    /// socket reports success with the requested states intact.
    pub fn select_single(
        &self,
        id: ObjectId,
        flags: &mut StreamState,
        timeout: Timeout,
    ) -> OsResult<()> {
        let requested = *flags & (StreamState::READABLE | StreamState::WRITABLE);
        if requested.is_empty() {
            return Ok(());
        }
        let sock = {
            let streams = lock(&self.streams);
            let rec = streams.get(id)?;
            match &rec.data.kind {
                StreamKind::Socket(s) if s.selectable => Arc::clone(&s.sock),
                _ => return Err(OsError::OperationNotSupported),
            }
        };

        let mut set = port::SocketSet::new();
        let fd = sock.raw_fd();
        if requested.contains(StreamState::READABLE) {
            set.add_read(fd);
        }
        if requested.contains(StreamState::WRITABLE) {
            set.add_write(fd);
        }
        let result = set.select(wait_to_timeout(wait_of(timeout)));

        let disconnected = {
            let mut streams = lock(&self.streams);
            match streams.get_mut(id) {
                Ok(rec) => match &mut rec.data.kind {
                    StreamKind::Socket(s) => {
                        update_connection_status(s);
                        s.disconnected
                    }
                    StreamKind::File { .. } => false,
                },
                Err(_) => false,
            }
        };

        match result {
            Ok(n) if n > 0 => {
                if !set.read_ready(fd) {
                    flags.remove(StreamState::READABLE);
                }
                if !set.write_ready(fd) {
                    flags.remove(StreamState::WRITABLE);
                }
                Ok(())
            }
            Ok(_) if disconnected => {
                // Report the requested states as ready so the caller's
                // next I/O call observes the end of the stream.
                Ok(())
            }
            Ok(_) => {
                *flags = StreamState::empty();
                Err(OsError::Timeout)
            }
            Err(e) => {
                log::debug!("select failed: {e}");
                *flags = StreamState::empty();
                Err(OsError::Error)
            }
        }
    }

    /// Waits for readiness across two handle sets. On return each set
    /// holds only the members that became ready (disconnected members
    /// count as ready). With nothing ready in time, `Timeout`.
    pub fn select_multiple(
        &self,
        read_set: Option<&mut FdSet>,
        write_set: Option<&mut FdSet>,
        timeout: Timeout,
    ) -> OsResult<()> {
        let mut read_set = read_set;
        let mut write_set = write_set;
        let mut set = port::SocketSet::new();

        // Map table indices to kernel descriptors, under the lock.
        let (read_fds, write_fds) = {
            let streams = lock(&self.streams);
            let lookup = |ids: &FdSet| -> Vec<(usize, Option<RawFd>)> {
                ids.iter_indices()
                    .map(|i| {
                        let fd = streams.get_at_index(i).and_then(|(_, rec)| {
                            match &rec.data.kind {
                                StreamKind::Socket(s) if s.selectable => Some(s.sock.raw_fd()),
                                _ => None,
                            }
                        });
                        (i, fd)
                    })
                    .collect()
            };
            (
                read_set.as_deref().map(|s| lookup(s)).unwrap_or_default(),
                write_set.as_deref().map(|s| lookup(s)).unwrap_or_default(),
            )
        };
        for (_, fd) in &read_fds {
            if let Some(fd) = fd {
                set.add_read(*fd);
            }
        }
        for (_, fd) in &write_fds {
            if let Some(fd) = fd {
                set.add_write(*fd);
            }
        }

        let result = set.select(wait_to_timeout(wait_of(timeout)));
        let ready_count = match result {
            Ok(n) => n,
            Err(e) => {
                log::debug!("select failed: {e}");
                return Err(OsError::Error);
            }
        };

        // Translate readiness back: clear every member that is neither
        // ready nor disconnected, and drop members whose handle vanished.
        let mut any_disconnected = false;
        {
            let mut streams = lock(&self.streams);
            let mut convert_out =
                |ids: &mut FdSet, fds: &[(usize, Option<RawFd>)], ready: &dyn Fn(RawFd) -> bool| {
                    for (i, fd) in fds {
                        match fd {
                            None => ids.clear_index(*i),
                            Some(fd) => {
                                let disconnected = match streams.get_at_index_mut(*i) {
                                    Some((_, rec)) => match &mut rec.data.kind {
                                        StreamKind::Socket(s) => {
                                            update_connection_status(s);
                                            s.disconnected
                                        }
                                        StreamKind::File { .. } => false,
                                    },
                                    None => false,
                                };
                                if disconnected {
                                    any_disconnected = true;
                                } else if !ready(*fd) {
                                    ids.clear_index(*i);
                                }
                            }
                        }
                    }
                };
            if let Some(rs) = read_set.as_deref_mut() {
                convert_out(rs, &read_fds, &|fd| set.read_ready(fd));
            }
            if let Some(ws) = write_set.as_deref_mut() {
                convert_out(ws, &write_fds, &|fd| set.write_ready(fd));
            }
        }

        if ready_count == 0 && !any_disconnected {
            return Err(OsError::Timeout);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bsp;
    use abi::{Generation, SocketDomain, SocketType};

    #[test]
    fn fdset_algebra_and_iteration() {
        let mut s = FdSet::new();
        assert!(s.is_empty());
        let a = ObjectId::for_index_and_gen(3, Generation::ZERO);
        let b = ObjectId::for_index_and_gen(40, Generation::ZERO);
        s.add(a);
        s.add(b);
        assert!(s.is_set(a) && s.is_set(b));
        assert_eq!(s.iter_indices().collect::<Vec<_>>(), vec![3, 40]);
        s.clear(a);
        assert!(!s.is_set(a));
        assert_eq!(s.iter_indices().collect::<Vec<_>>(), vec![40]);
    }

    #[test]
    fn fdset_ignores_out_of_range_indices() {
        let mut s = FdSet::new();
        let big = ObjectId::for_index_and_gen(MAX_OPEN_FILES + 5, Generation::ZERO);
        s.add(big);
        assert!(s.is_empty());
        assert!(!s.is_set(big));
    }

    #[test]
    fn select_single_rejects_plain_files() {
        let os = Osal::init(bsp::default_config());
        os.mkfs("/ramdev0", "RAM", 512, 64).unwrap();
        os.mount("/ramdev0", "/ram").unwrap();
        let fd = os.creat("/ram/f", abi::AccessMode::WriteOnly).unwrap();
        let mut flags = StreamState::READABLE;
        assert_eq!(
            os.select_single(fd, &mut flags, Timeout::Millis(10)),
            Err(OsError::OperationNotSupported)
        );
        os.close(fd).unwrap();
    }

    #[test]
    fn select_single_times_out_and_clears_flags() {
        let os = Osal::init(bsp::default_config());
        let s = os
            .socket_open(SocketDomain::Inet, SocketType::Datagram)
            .unwrap();
        let mut addr: crate::SockAddr = "127.0.0.1".parse().unwrap();
        addr.set_port(0).unwrap();
        os.socket_bind(s, &addr).unwrap();
        let mut flags = StreamState::READABLE;
        assert_eq!(
            os.select_single(s, &mut flags, Timeout::Millis(30)),
            Err(OsError::Timeout)
        );
        assert!(flags.is_empty());
        os.close(s).unwrap();
    }

    #[test]
    fn empty_request_returns_immediately() {
        let os = Osal::init(bsp::default_config());
        let s = os
            .socket_open(SocketDomain::Inet, SocketType::Datagram)
            .unwrap();
        let mut flags = StreamState::empty();
        os.select_single(s, &mut flags, Timeout::Pend).unwrap();
        os.close(s).unwrap();
    }
}
