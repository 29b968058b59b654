// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The passthrough filesystem backend: translated paths handed straight to
//! the host filesystem.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::UNIX_EPOCH;

use abi::AccessMode;

/// Metadata reported for a host path.
#[derive(Copy, Clone, Debug)]
pub struct HostStat {
    pub is_dir: bool,
    pub size: u64,
    pub mtime_secs: u64,
}

/// An open handle onto a host file.
pub struct HostFile {
    f: File,
}

impl HostFile {
    pub fn open(path: &Path, access: AccessMode, create: bool, truncate: bool) -> io::Result<HostFile> {
        let mut opts = OpenOptions::new();
        match access {
            AccessMode::ReadOnly => {
                opts.read(true);
            }
            AccessMode::WriteOnly => {
                opts.write(true);
            }
            AccessMode::ReadWrite => {
                opts.read(true).write(true);
            }
        }
        opts.create(create).truncate(truncate);
        Ok(HostFile { f: opts.open(path)? })
    }

    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.f.read(buf)
    }

    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.f.write(buf)
    }

    pub fn seek(&mut self, offset: i64, from_end: bool, from_current: bool) -> io::Result<u64> {
        let target = if from_end {
            SeekFrom::End(offset)
        } else if from_current {
            SeekFrom::Current(offset)
        } else {
            if offset < 0 {
                return Err(io::ErrorKind::InvalidInput.into());
            }
            SeekFrom::Start(offset as u64)
        };
        self.f.seek(target)
    }
}

pub fn remove(path: &Path) -> io::Result<()> {
    fs::remove_file(path)
}

pub fn rename(old: &Path, new: &Path) -> io::Result<()> {
    fs::rename(old, new)
}

pub fn mkdir(path: &Path) -> io::Result<()> {
    fs::create_dir(path)
}

pub fn rmdir(path: &Path) -> io::Result<()> {
    fs::remove_dir(path)
}

pub fn stat(path: &Path) -> io::Result<HostStat> {
    let md = fs::metadata(path)?;
    let mtime_secs = md
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Ok(HostStat {
        is_dir: md.is_dir(),
        size: md.len(),
        mtime_secs,
    })
}

/// First/next iteration over one host directory's snapshot.
pub struct HostDirIter {
    names: Vec<String>,
    pos: usize,
}

impl HostDirIter {
    pub fn open(path: &Path) -> io::Result<HostDirIter> {
        let mut names = Vec::new();
        for entry in fs::read_dir(path)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(HostDirIter { names, pos: 0 })
    }

    pub fn next_name(&mut self) -> Option<String> {
        let n = self.names.get(self.pos).cloned();
        if n.is_some() {
            self.pos += 1;
        }
        n
    }
}
