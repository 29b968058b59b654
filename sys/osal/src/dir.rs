// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Directory handles.
//!
//! A small parallel table to the stream table. Each entry keeps the
//! virtual path it was opened with alongside the backend iteration state;
//! `rewinddir` is implemented as close-then-reopen against that saved
//! path, because the volatile backend has no native rewind.

use abi::{ObjectId, OsError, OsResult};

use crate::file::check_name_length;
use crate::port;
use crate::util::lock;
use crate::volume::Route;
use crate::Osal;

pub(crate) enum DirBackend {
    Ram(port::RamDirIter),
    Host(port::HostDirIter),
}

pub(crate) struct DirData {
    pub virtual_path: String,
    pub backend: DirBackend,
}

fn fs_err(_e: std::io::Error) -> OsError {
    OsError::FsError
}

impl Osal {
    fn open_iter(&self, virtual_path: &str) -> OsResult<DirBackend> {
        match self.route(virtual_path)?.0 {
            Route::Ram(disk, rel) => Ok(DirBackend::Ram(
                port::RamDirIter::open(&disk, &rel).map_err(fs_err)?,
            )),
            Route::Host(p) => Ok(DirBackend::Host(
                port::HostDirIter::open(&p).map_err(fs_err)?,
            )),
        }
    }

    /// Creates a directory.
    pub fn mkdir(&self, path: &str) -> OsResult<()> {
        check_name_length(path)?;
        match self.route(path)?.0 {
            Route::Ram(disk, rel) => disk.mkdir(&rel).map_err(fs_err),
            Route::Host(p) => port::hostfs::mkdir(&p).map_err(fs_err),
        }
    }

    /// Removes an empty directory.
    pub fn rmdir(&self, path: &str) -> OsResult<()> {
        check_name_length(path)?;
        match self.route(path)?.0 {
            Route::Ram(disk, rel) => disk.rmdir(&rel).map_err(fs_err),
            Route::Host(p) => port::hostfs::rmdir(&p).map_err(fs_err),
        }
    }

    /// Opens a directory for iteration.
    pub fn opendir(&self, path: &str) -> OsResult<ObjectId> {
        let backend = self.open_iter(path)?;
        let creator = self.task_get_id().ok();
        lock(&self.dirs)
            .allocate_shared_name(
                path,
                creator,
                DirData {
                    virtual_path: path.to_string(),
                    backend,
                },
            )
            .map_err(|e| match e {
                OsError::NoFreeIds => OsError::FsNoFreeFds,
                other => other,
            })
    }

    /// Releases a directory handle.
    pub fn closedir(&self, id: ObjectId) -> OsResult<()> {
        lock(&self.dirs)
            .release(id)
            .map(drop)
            .map_err(|_| OsError::FsInvalidFd)
    }

    /// Next entry name, or `None` when the listing is exhausted.
    pub fn readdir(&self, id: ObjectId) -> OsResult<Option<String>> {
        let mut dirs = lock(&self.dirs);
        let rec = dirs.get_mut(id).map_err(|_| OsError::FsInvalidFd)?;
        Ok(match &mut rec.data.backend {
            DirBackend::Ram(it) => it.next_name(),
            DirBackend::Host(it) => it.next_name(),
        })
    }

    /// Restarts iteration from the first entry.
    pub fn rewinddir(&self, id: ObjectId) -> OsResult<()> {
        let path = {
            let dirs = lock(&self.dirs);
            dirs.get(id)
                .map_err(|_| OsError::FsInvalidFd)?
                .data
                .virtual_path
                .clone()
        };
        // Fresh open of the saved path, then swap it in.
        let backend = self.open_iter(&path)?;
        let mut dirs = lock(&self.dirs);
        dirs.get_mut(id).map_err(|_| OsError::FsInvalidFd)?.data.backend = backend;
        Ok(())
    }
}
