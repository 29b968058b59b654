// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! File handles.
//!
//! Files and sockets live in one stream table; the entry's kind routes
//! every operation to the right implementation. For files the kind also
//! pins the backend chosen at open time (RAM disk or host passthrough), so
//! reads, writes, and seeks all dispatch to the filesystem that actually
//! owns the handle.
//!
//! The table lock covers allocation and lookup only. Backend I/O runs
//! outside it, against a per-handle lock, so a slow write cannot stall
//! unrelated opens.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use abi::{
    AccessMode, ObjectId, OsError, OsResult, SeekWhence, SocketDomain, SocketType, StreamState,
    Timeout, MAX_FILE_NAME, MAX_PATH_LEN,
};

use crate::clock::{millis_to_ticks, ticks_to_duration};
use crate::port;
use crate::util::lock;
use crate::volume::Route;
use crate::Osal;

pub(crate) enum FileBackend {
    Ram(port::RamFile),
    Host(port::HostFile),
}

pub(crate) struct SocketState {
    pub sock: Arc<port::Socket>,
    pub domain: SocketDomain,
    pub socktype: SocketType,
    pub selectable: bool,
    pub bound: bool,
    pub connected: bool,
    pub disconnected: bool,
}

pub(crate) enum StreamKind {
    File {
        backend: Arc<Mutex<FileBackend>>,
        access: AccessMode,
    },
    Socket(SocketState),
}

pub(crate) struct StreamData {
    pub kind: StreamKind,
}

/// Information reported by [`Osal::fd_get_info`].
#[derive(Debug, Clone)]
pub struct StreamProp {
    /// Path the handle was opened with (empty for sockets).
    pub path: String,
    pub creator: Option<ObjectId>,
}

/// Result of [`Osal::stat`].
#[derive(Debug, Clone, Copy)]
pub struct FileStat {
    pub size: u64,
    /// Modification time in seconds, zero where the backend keeps none.
    pub mtime_secs: u64,
    pub is_dir: bool,
}

fn fs_err(_e: io::Error) -> OsError {
    OsError::FsError
}

/// Validates the shape of a file path: within length limits, containing at
/// least one separator, with a final component of legal length.
pub(crate) fn check_name_length(path: &str) -> OsResult<()> {
    if path.len() > MAX_PATH_LEN {
        return Err(OsError::FsPathTooLong);
    }
    let last = match path.rfind('/') {
        Some(i) => &path[i + 1..],
        None => return Err(OsError::FsPathInvalid),
    };
    if last.len() > MAX_FILE_NAME {
        return Err(OsError::FsNameTooLong);
    }
    Ok(())
}

impl Osal {
    fn open_stream(
        &self,
        path: &str,
        access: AccessMode,
        create: bool,
        truncate: bool,
    ) -> OsResult<ObjectId> {
        check_name_length(path)?;
        let (route, _phys) = self.route(path)?;
        let backend = match route {
            Route::Ram(disk, rel) => {
                FileBackend::Ram(disk.open(&rel, create, truncate).map_err(fs_err)?)
            }
            Route::Host(p) => {
                FileBackend::Host(port::HostFile::open(&p, access, create, truncate).map_err(fs_err)?)
            }
        };
        let creator = self.task_get_id().ok();
        lock(&self.streams)
            .allocate_shared_name(
                path,
                creator,
                StreamData {
                    kind: StreamKind::File {
                        backend: Arc::new(Mutex::new(backend)),
                        access,
                    },
                },
            )
            .map_err(|e| match e {
                OsError::NoFreeIds => OsError::FsNoFreeFds,
                other => other,
            })
    }

    /// Creates (or truncates) a file and opens it. Read-only access makes
    /// no sense here and is rejected.
    pub fn creat(&self, path: &str, access: AccessMode) -> OsResult<ObjectId> {
        if access == AccessMode::ReadOnly {
            return Err(OsError::FsError);
        }
        self.open_stream(path, access, true, true)
    }

    /// Opens an existing file.
    pub fn open(&self, path: &str, access: AccessMode, _mode: u32) -> OsResult<ObjectId> {
        self.open_stream(path, access, false, false)
    }

    /// Closes a stream and releases its table slot. TCP sockets get a
    /// graceful shutdown: half-close, then a bounded drain until the peer
    /// finishes.
    pub fn close(&self, id: ObjectId) -> OsResult<()> {
        let record = lock(&self.streams)
            .release(id)
            .map_err(|_| OsError::FsInvalidFd)?;
        if let StreamKind::Socket(state) = &record.data.kind {
            if state.socktype == SocketType::Stream && state.connected {
                drain_until_fin(&state.sock);
            }
        }
        Ok(())
    }

    /// Reads from a stream. File handles must not be write-only; socket
    /// handles wait for readability first.
    pub fn read(&self, id: ObjectId, buf: &mut [u8]) -> OsResult<usize> {
        enum Target {
            File(Arc<Mutex<FileBackend>>),
            Socket(Arc<port::Socket>),
        }
        let target = {
            let streams = lock(&self.streams);
            let rec = streams.get(id).map_err(|_| OsError::FsInvalidFd)?;
            match &rec.data.kind {
                StreamKind::File { backend, access } => {
                    if *access == AccessMode::WriteOnly {
                        return Err(OsError::FsError);
                    }
                    Target::File(Arc::clone(backend))
                }
                StreamKind::Socket(s) => Target::Socket(Arc::clone(&s.sock)),
            }
        };
        match target {
            Target::File(backend) => match &mut *lock(&backend) {
                FileBackend::Ram(f) => Ok(f.read(buf)),
                FileBackend::Host(f) => f.read(buf).map_err(fs_err),
            },
            Target::Socket(sock) => {
                let mut flags = StreamState::READABLE;
                self.select_single(id, &mut flags, Timeout::Pend)?;
                sock.recv(buf).map_err(|_| OsError::Error)
            }
        }
    }

    /// Writes to a stream. File handles must not be read-only; socket
    /// handles wait for writability first.
    pub fn write(&self, id: ObjectId, buf: &[u8]) -> OsResult<usize> {
        enum Target {
            File(Arc<Mutex<FileBackend>>),
            Socket(Arc<port::Socket>),
        }
        let target = {
            let streams = lock(&self.streams);
            let rec = streams.get(id).map_err(|_| OsError::FsInvalidFd)?;
            match &rec.data.kind {
                StreamKind::File { backend, access } => {
                    if *access == AccessMode::ReadOnly {
                        return Err(OsError::FsError);
                    }
                    Target::File(Arc::clone(backend))
                }
                StreamKind::Socket(s) => Target::Socket(Arc::clone(&s.sock)),
            }
        };
        match target {
            Target::File(backend) => match &mut *lock(&backend) {
                FileBackend::Ram(f) => f.write(buf).map_err(fs_err),
                FileBackend::Host(f) => f.write(buf).map_err(fs_err),
            },
            Target::Socket(sock) => {
                let mut flags = StreamState::WRITABLE;
                self.select_single(id, &mut flags, Timeout::Pend)?;
                sock.send(buf).map_err(|_| OsError::Error)
            }
        }
    }

    /// Reads with a readiness timeout; only selectable streams support
    /// this.
    pub fn timed_read(&self, id: ObjectId, buf: &mut [u8], timeout: Timeout) -> OsResult<usize> {
        let mut flags = StreamState::READABLE;
        self.select_single(id, &mut flags, timeout)?;
        if !flags.contains(StreamState::READABLE) {
            return Err(OsError::Timeout);
        }
        self.read(id, buf)
    }

    /// Writes with a readiness timeout; only selectable streams support
    /// this.
    pub fn timed_write(&self, id: ObjectId, buf: &[u8], timeout: Timeout) -> OsResult<usize> {
        let mut flags = StreamState::WRITABLE;
        self.select_single(id, &mut flags, timeout)?;
        if !flags.contains(StreamState::WRITABLE) {
            return Err(OsError::Timeout);
        }
        self.write(id, buf)
    }

    /// Repositions a file handle; returns the new absolute offset. The
    /// position query goes to the same backend the seek did.
    pub fn lseek(&self, id: ObjectId, offset: i64, whence: SeekWhence) -> OsResult<u64> {
        let backend = {
            let streams = lock(&self.streams);
            let rec = streams.get(id).map_err(|_| OsError::FsInvalidFd)?;
            match &rec.data.kind {
                StreamKind::File { backend, .. } => Arc::clone(backend),
                StreamKind::Socket(_) => return Err(OsError::FsError),
            }
        };
        let (from_end, from_current) = match whence {
            SeekWhence::Set => (false, false),
            SeekWhence::Current => (false, true),
            SeekWhence::End => (true, false),
        };
        let result = match &mut *lock(&backend) {
            FileBackend::Ram(f) => f.seek(offset, from_end, from_current).map_err(fs_err),
            FileBackend::Host(f) => f.seek(offset, from_end, from_current).map_err(fs_err),
        };
        result
    }

    /// Reports size, type, and modification time of a path.
    pub fn stat(&self, path: &str) -> OsResult<FileStat> {
        match self.route(path)?.0 {
            Route::Ram(disk, rel) => {
                let st = disk.stat(&rel).map_err(fs_err)?;
                Ok(FileStat {
                    size: st.size,
                    mtime_secs: 0,
                    is_dir: st.is_dir,
                })
            }
            Route::Host(p) => {
                let st = port::hostfs::stat(&p).map_err(fs_err)?;
                Ok(FileStat {
                    size: st.size,
                    mtime_secs: st.mtime_secs,
                    is_dir: st.is_dir,
                })
            }
        }
    }

    /// Removes a file. A path that is still open in the stream table is
    /// protected and cannot be removed.
    pub fn remove(&self, path: &str) -> OsResult<()> {
        check_name_length(path)?;
        {
            let streams = lock(&self.streams);
            if streams.iter_live().any(|(_, r)| r.name == path) {
                return Err(OsError::FsError);
            }
        }
        match self.route(path)?.0 {
            Route::Ram(disk, rel) => disk.remove(&rel).map_err(fs_err),
            Route::Host(p) => port::hostfs::remove(&p).map_err(fs_err),
        }
    }

    /// Renames a file. Open handles follow: any stream entry whose stored
    /// path matches the old name is updated to the new one.
    pub fn rename(&self, old: &str, new: &str) -> OsResult<()> {
        check_name_length(old)?;
        check_name_length(new)?;
        match (self.route(old)?.0, self.route(new)?.0) {
            (Route::Ram(disk, old_rel), Route::Ram(disk2, new_rel))
                if Arc::ptr_eq(&disk, &disk2) =>
            {
                disk.rename(&old_rel, &new_rel).map_err(fs_err)?;
            }
            (Route::Host(old_p), Route::Host(new_p)) => {
                port::hostfs::rename(&old_p, &new_p).map_err(fs_err)?;
            }
            // Renames do not cross volumes; that is what mv is for.
            _ => return Err(OsError::FsError),
        }
        let mut streams = lock(&self.streams);
        for (_, rec) in streams.iter_live_mut() {
            if rec.name == old {
                rec.name = new.to_string();
            }
        }
        Ok(())
    }

    /// Copies a file's content, streaming through a block-sized buffer.
    pub fn cp(&self, src: &str, dest: &str) -> OsResult<()> {
        check_name_length(src)?;
        check_name_length(dest)?;
        let src_fd = self.open(src, AccessMode::ReadOnly, 0)?;
        let dest_fd = match self.creat(dest, AccessMode::WriteOnly) {
            Ok(fd) => fd,
            Err(e) => {
                let _ = self.close(src_fd);
                return Err(e);
            }
        };
        let mut buf = [0u8; 512];
        let result = loop {
            match self.read(src_fd, &mut buf) {
                Ok(0) => break Ok(()),
                Ok(n) => {
                    if let Err(e) = self.write(dest_fd, &buf[..n]) {
                        break Err(e);
                    }
                }
                Err(e) => break Err(e),
            }
        };
        let _ = self.close(src_fd);
        let _ = self.close(dest_fd);
        result
    }

    /// Moves a file: copy, then remove the source.
    pub fn mv(&self, src: &str, dest: &str) -> OsResult<()> {
        self.cp(src, dest)?;
        self.remove(src)
    }

    /// Closes the first open handle whose path matches.
    pub fn close_file_by_name(&self, path: &str) -> OsResult<()> {
        let id = {
            let streams = lock(&self.streams);
            let id = streams
                .iter_live()
                .find(|(_, r)| r.name == path)
                .map(|(id, _)| id)
                .ok_or(OsError::FsPathInvalid)?;
            id
        };
        self.close(id)
    }

    /// Closes every open stream.
    pub fn close_all_files(&self) -> OsResult<()> {
        let ids: Vec<ObjectId> = lock(&self.streams)
            .iter_live()
            .map(|(id, _)| id)
            .collect();
        for id in ids {
            let _ = self.close(id);
        }
        Ok(())
    }

    /// Reports a stream handle's bookkeeping.
    pub fn fd_get_info(&self, id: ObjectId) -> OsResult<StreamProp> {
        let streams = lock(&self.streams);
        let rec = streams.get(id).map_err(|_| OsError::FsInvalidFd)?;
        Ok(StreamProp {
            path: rec.name.clone(),
            creator: rec.creator,
        })
    }

    /// Live handles whose stored path equals `path`.
    #[cfg(test)]
    pub(crate) fn open_count(&self, path: &str) -> usize {
        lock(&self.streams)
            .iter_live()
            .filter(|(_, r)| r.name == path)
            .count()
    }
}

/// Graceful TCP teardown: stop sending, then poll-receive in 200 ms steps
/// until the peer's FIN arrives or an overall deadline expires. The
/// deadline keeps a stuck peer from wedging `close` forever.
fn drain_until_fin(sock: &port::Socket) {
    sock.shutdown_write();
    let step = ticks_to_duration(millis_to_ticks(200));
    let deadline = Instant::now() + std::time::Duration::from_secs(2);
    let mut scratch = [0u8; 64];
    while Instant::now() < deadline {
        let mut set = port::SocketSet::new();
        set.add_read(sock.raw_fd());
        match set.select(Some(step)) {
            Ok(0) => continue,
            Ok(_) => match sock.recv(&mut scratch) {
                // Zero-length read is the FIN.
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(_) => break,
            },
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bsp;

    fn osal_with_ram() -> Arc<Osal> {
        let os = Osal::init(bsp::default_config());
        os.mkfs("/ramdev0", "RAM", 512, 2048).unwrap();
        os.mount("/ramdev0", "/ram").unwrap();
        os
    }

    #[test]
    fn create_write_read_remove_round_trip() {
        let os = osal_with_ram();
        let payload = b"nineteen bytes here";
        let fd = os.creat("/ram/a", AccessMode::WriteOnly).unwrap();
        assert_eq!(os.write(fd, payload).unwrap(), payload.len());
        os.close(fd).unwrap();

        let fd = os.open("/ram/a", AccessMode::ReadOnly, 0).unwrap();
        let mut buf = [0u8; 64];
        let n = os.read(fd, &mut buf).unwrap();
        assert_eq!(&buf[..n], payload);
        os.close(fd).unwrap();

        os.remove("/ram/a").unwrap();
        assert_eq!(
            os.open("/ram/a", AccessMode::ReadOnly, 0),
            Err(OsError::FsError)
        );
    }

    #[test]
    fn creat_rejects_read_only() {
        let os = osal_with_ram();
        assert_eq!(
            os.creat("/ram/x", AccessMode::ReadOnly),
            Err(OsError::FsError)
        );
    }

    #[test]
    fn open_close_bookkeeping_nets_to_zero() {
        let os = osal_with_ram();
        let fd = os.creat("/ram/book", AccessMode::ReadWrite).unwrap();
        assert_eq!(os.open_count("/ram/book"), 1);
        os.close(fd).unwrap();
        assert_eq!(os.open_count("/ram/book"), 0);
        let fd = os.open("/ram/book", AccessMode::ReadOnly, 0).unwrap();
        assert_eq!(os.open_count("/ram/book"), 1);
        os.close(fd).unwrap();
        assert_eq!(os.read(fd, &mut [0u8; 4]), Err(OsError::FsInvalidFd));
    }

    #[test]
    fn access_modes_enforced() {
        let os = osal_with_ram();
        let fd = os.creat("/ram/w", AccessMode::WriteOnly).unwrap();
        assert_eq!(os.read(fd, &mut [0u8; 4]), Err(OsError::FsError));
        os.close(fd).unwrap();
        let fd = os.open("/ram/w", AccessMode::ReadOnly, 0).unwrap();
        assert_eq!(os.write(fd, b"nope"), Err(OsError::FsError));
        os.close(fd).unwrap();
    }

    #[test]
    fn lseek_reports_absolute_position() {
        let os = osal_with_ram();
        let fd = os.creat("/ram/seek", AccessMode::ReadWrite).unwrap();
        os.write(fd, b"0123456789").unwrap();
        assert_eq!(os.lseek(fd, 4, SeekWhence::Set).unwrap(), 4);
        assert_eq!(os.lseek(fd, 2, SeekWhence::Current).unwrap(), 6);
        assert_eq!(os.lseek(fd, -3, SeekWhence::End).unwrap(), 7);
        let mut buf = [0u8; 8];
        let n = os.read(fd, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"789");
        os.close(fd).unwrap();
    }

    #[test]
    fn remove_refuses_open_paths() {
        let os = osal_with_ram();
        let fd = os.creat("/ram/held", AccessMode::WriteOnly).unwrap();
        assert_eq!(os.remove("/ram/held"), Err(OsError::FsError));
        os.close(fd).unwrap();
        os.remove("/ram/held").unwrap();
    }

    #[test]
    fn rename_follows_open_handles() {
        let os = osal_with_ram();
        let fd = os.creat("/ram/before", AccessMode::ReadWrite).unwrap();
        os.write(fd, b"x").unwrap();
        os.rename("/ram/before", "/ram/after").unwrap();
        assert_eq!(os.fd_get_info(fd).unwrap().path, "/ram/after");
        assert_eq!(os.stat("/ram/after").unwrap().size, 1);
        os.close(fd).unwrap();
    }

    #[test]
    fn cp_and_mv() {
        let os = osal_with_ram();
        let fd = os.creat("/ram/src", AccessMode::WriteOnly).unwrap();
        let content = vec![7u8; 1300]; // spans multiple copy blocks
        os.write(fd, &content).unwrap();
        os.close(fd).unwrap();

        os.cp("/ram/src", "/ram/copy").unwrap();
        assert_eq!(os.stat("/ram/copy").unwrap().size, 1300);
        assert_eq!(os.stat("/ram/src").unwrap().size, 1300);

        os.mv("/ram/src", "/ram/moved").unwrap();
        assert_eq!(os.stat("/ram/moved").unwrap().size, 1300);
        assert!(os.stat("/ram/src").is_err());
    }

    #[test]
    fn name_length_rules() {
        assert_eq!(check_name_length("noslash"), Err(OsError::FsPathInvalid));
        assert!(check_name_length("/ok/name").is_ok());
        let long = format!("/{}", "p/".repeat(MAX_PATH_LEN));
        assert_eq!(check_name_length(&long), Err(OsError::FsPathTooLong));
    }

    #[test]
    fn close_file_by_name_and_close_all() {
        let os = osal_with_ram();
        os.creat("/ram/one", AccessMode::WriteOnly).unwrap();
        os.creat("/ram/two", AccessMode::WriteOnly).unwrap();
        os.close_file_by_name("/ram/one").unwrap();
        assert_eq!(os.open_count("/ram/one"), 0);
        assert_eq!(
            os.close_file_by_name("/ram/one"),
            Err(OsError::FsPathInvalid)
        );
        os.close_all_files().unwrap();
        assert_eq!(os.open_count("/ram/two"), 0);
    }
}
