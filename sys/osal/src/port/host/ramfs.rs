// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The volatile filesystem backend: an in-memory disk.
//!
//! One `RamDisk` is created per formatted RAM volume. It holds a directory
//! tree of byte-vector files and enforces the capacity implied by the
//! block geometry given at format time. Open files keep the file content
//! alive even if the path is unlinked underneath them.

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

type FileData = Arc<Mutex<Vec<u8>>>;

enum Node {
    File(FileData),
    Dir(BTreeMap<String, Node>),
}

/// Metadata reported for a path.
#[derive(Copy, Clone, Debug)]
pub struct RamStat {
    pub is_dir: bool,
    pub size: u64,
}

pub struct RamDisk {
    block_size: u32,
    num_blocks: u64,
    used_bytes: AtomicU64,
    root: Mutex<BTreeMap<String, Node>>,
}

fn err(kind: io::ErrorKind) -> io::Error {
    kind.into()
}

fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

impl RamDisk {
    /// Formats a fresh disk with the given geometry.
    pub fn format(block_size: u32, num_blocks: u64) -> RamDisk {
        RamDisk {
            block_size,
            num_blocks,
            used_bytes: AtomicU64::new(0),
            root: Mutex::new(BTreeMap::new()),
        }
    }

    /// Whole blocks not yet consumed by file content.
    pub fn blocks_free(&self) -> u64 {
        let used = self.used_bytes.load(Ordering::Relaxed);
        let used_blocks = used.div_ceil(u64::from(self.block_size));
        self.num_blocks.saturating_sub(used_blocks)
    }

    fn capacity_bytes(&self) -> u64 {
        u64::from(self.block_size) * self.num_blocks
    }

    /// Charges `grow` bytes against the disk capacity; fails with ENOSPC
    /// when the disk is full.
    fn charge(&self, grow: u64) -> io::Result<()> {
        let prev = self.used_bytes.fetch_add(grow, Ordering::Relaxed);
        if prev + grow > self.capacity_bytes() {
            self.used_bytes.fetch_sub(grow, Ordering::Relaxed);
            return Err(err(io::ErrorKind::StorageFull));
        }
        Ok(())
    }

    fn release(&self, shrink: u64) {
        self.used_bytes.fetch_sub(shrink, Ordering::Relaxed);
    }

    fn with_dir<R>(
        &self,
        dir_path: &[&str],
        f: impl FnOnce(&mut BTreeMap<String, Node>) -> io::Result<R>,
    ) -> io::Result<R> {
        let mut root = self.root.lock().unwrap_or_else(|e| e.into_inner());
        let mut cur: &mut BTreeMap<String, Node> = &mut root;
        for comp in dir_path {
            match cur.get_mut(*comp) {
                Some(Node::Dir(d)) => cur = d,
                Some(Node::File(_)) => return Err(err(io::ErrorKind::NotADirectory)),
                None => return Err(err(io::ErrorKind::NotFound)),
            }
        }
        f(cur)
    }

    /// Opens a file, optionally creating or truncating it. Returns a handle
    /// sharing the underlying content.
    pub fn open(
        self: &Arc<Self>,
        path: &str,
        create: bool,
        truncate: bool,
    ) -> io::Result<RamFile> {
        let comps = components(path);
        let (name, dir) = match comps.split_last() {
            Some((n, d)) => (*n, d),
            None => return Err(err(io::ErrorKind::InvalidInput)),
        };
        let disk = Arc::clone(self);
        self.with_dir(dir, |entries| match entries.get(name) {
            Some(Node::File(data)) => {
                let data = Arc::clone(data);
                if truncate {
                    let mut d = data.lock().unwrap_or_else(|e| e.into_inner());
                    disk.release(d.len() as u64);
                    d.clear();
                }
                Ok(RamFile {
                    disk,
                    data,
                    pos: 0,
                })
            }
            Some(Node::Dir(_)) => Err(err(io::ErrorKind::IsADirectory)),
            None if create => {
                let data: FileData = Arc::new(Mutex::new(Vec::new()));
                entries.insert(name.to_string(), Node::File(Arc::clone(&data)));
                Ok(RamFile {
                    disk,
                    data,
                    pos: 0,
                })
            }
            None => Err(err(io::ErrorKind::NotFound)),
        })
    }

    /// Unlinks a file. The content stays alive for handles already open.
    pub fn remove(&self, path: &str) -> io::Result<()> {
        let comps = components(path);
        let (name, dir) = match comps.split_last() {
            Some((n, d)) => (*n, d),
            None => return Err(err(io::ErrorKind::InvalidInput)),
        };
        let released = self.with_dir(dir, |entries| match entries.get(name) {
            Some(Node::File(data)) => {
                let size = data.lock().unwrap_or_else(|e| e.into_inner()).len() as u64;
                entries.remove(name);
                Ok(size)
            }
            Some(Node::Dir(_)) => Err(err(io::ErrorKind::IsADirectory)),
            None => Err(err(io::ErrorKind::NotFound)),
        })?;
        self.release(released);
        Ok(())
    }

    /// Moves a node to a new path within the disk.
    pub fn rename(&self, old: &str, new: &str) -> io::Result<()> {
        let old_comps = components(old);
        let (old_name, old_dir) = match old_comps.split_last() {
            Some((n, d)) => (*n, d),
            None => return Err(err(io::ErrorKind::InvalidInput)),
        };
        let node = self.with_dir(old_dir, |entries| {
            entries.remove(old_name).ok_or_else(|| err(io::ErrorKind::NotFound))
        })?;
        let new_comps = components(new);
        let (new_name, new_dir) = match new_comps.split_last() {
            Some((n, d)) => (*n, d),
            None => return Err(err(io::ErrorKind::InvalidInput)),
        };
        self.with_dir(new_dir, |entries| {
            entries.insert(new_name.to_string(), node);
            Ok(())
        })
    }

    pub fn mkdir(&self, path: &str) -> io::Result<()> {
        let comps = components(path);
        let (name, dir) = match comps.split_last() {
            Some((n, d)) => (*n, d),
            None => return Err(err(io::ErrorKind::InvalidInput)),
        };
        self.with_dir(dir, |entries| {
            if entries.contains_key(name) {
                return Err(err(io::ErrorKind::AlreadyExists));
            }
            entries.insert(name.to_string(), Node::Dir(BTreeMap::new()));
            Ok(())
        })
    }

    pub fn rmdir(&self, path: &str) -> io::Result<()> {
        let comps = components(path);
        let (name, dir) = match comps.split_last() {
            Some((n, d)) => (*n, d),
            None => return Err(err(io::ErrorKind::InvalidInput)),
        };
        self.with_dir(dir, |entries| match entries.get(name) {
            Some(Node::Dir(d)) if d.is_empty() => {
                entries.remove(name);
                Ok(())
            }
            Some(Node::Dir(_)) => Err(err(io::ErrorKind::DirectoryNotEmpty)),
            Some(Node::File(_)) => Err(err(io::ErrorKind::NotADirectory)),
            None => Err(err(io::ErrorKind::NotFound)),
        })
    }

    pub fn stat(&self, path: &str) -> io::Result<RamStat> {
        let comps = components(path);
        if comps.is_empty() {
            return Ok(RamStat {
                is_dir: true,
                size: 0,
            });
        }
        let (name, dir) = comps.split_last().map(|(n, d)| (*n, d)).unwrap();
        self.with_dir(dir, |entries| match entries.get(name) {
            Some(Node::File(data)) => Ok(RamStat {
                is_dir: false,
                size: data.lock().unwrap_or_else(|e| e.into_inner()).len() as u64,
            }),
            Some(Node::Dir(_)) => Ok(RamStat {
                is_dir: true,
                size: 0,
            }),
            None => Err(err(io::ErrorKind::NotFound)),
        })
    }

    /// Snapshot listing of a directory, in name order.
    pub fn list_dir(&self, path: &str) -> io::Result<Vec<String>> {
        let comps = components(path);
        self.with_dir(&comps, |entries| Ok(entries.keys().cloned().collect()))
    }
}

/// An open handle onto a file of a [`RamDisk`].
pub struct RamFile {
    disk: Arc<RamDisk>,
    data: FileData,
    pos: u64,
}

impl RamFile {
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        let pos = self.pos.min(data.len() as u64) as usize;
        let n = buf.len().min(data.len() - pos);
        buf[..n].copy_from_slice(&data[pos..pos + n]);
        self.pos += n as u64;
        n
    }

    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        let end = self.pos as usize + buf.len();
        if end > data.len() {
            self.disk.charge((end - data.len()) as u64)?;
            data.resize(end, 0);
        }
        let pos = self.pos as usize;
        data[pos..end].copy_from_slice(buf);
        self.pos = end as u64;
        Ok(buf.len())
    }

    /// Repositions the handle. Seeking beyond the end is allowed; the gap
    /// zero-fills on the next write.
    pub fn seek(&mut self, offset: i64, from_end: bool, from_current: bool) -> io::Result<u64> {
        let base = if from_end {
            self.data.lock().unwrap_or_else(|e| e.into_inner()).len() as i64
        } else if from_current {
            self.pos as i64
        } else {
            0
        };
        let target = base + offset;
        if target < 0 {
            return Err(err(io::ErrorKind::InvalidInput));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }

}

/// First/next iteration state over one directory's snapshot.
pub struct RamDirIter {
    names: Vec<String>,
    pos: usize,
}

impl RamDirIter {
    pub fn open(disk: &RamDisk, path: &str) -> io::Result<RamDirIter> {
        Ok(RamDirIter {
            names: disk.list_dir(path)?,
            pos: 0,
        })
    }

    pub fn next_name(&mut self) -> Option<String> {
        let n = self.names.get(self.pos).cloned();
        if n.is_some() {
            self.pos += 1;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk() -> Arc<RamDisk> {
        Arc::new(RamDisk::format(512, 64))
    }

    #[test]
    fn write_read_round_trip() {
        let d = disk();
        let mut f = d.open("/a", true, false).unwrap();
        f.write(b"we few, we happy few").unwrap();
        let mut f = d.open("/a", false, false).unwrap();
        let mut buf = [0u8; 32];
        let n = f.read(&mut buf);
        assert_eq!(&buf[..n], b"we few, we happy few");
    }

    #[test]
    fn capacity_is_enforced() {
        let d = Arc::new(RamDisk::format(512, 2));
        let mut f = d.open("/big", true, false).unwrap();
        assert!(f.write(&[0u8; 1024]).is_ok());
        assert!(
            f.write(&[0u8; 1]).is_err(),
            "write past the last block should report a full disk"
        );
        // Removing the file gives the space back.
        drop(f);
        d.remove("/big").unwrap();
        let mut f = d.open("/again", true, false).unwrap();
        assert!(f.write(&[0u8; 512]).is_ok());
    }

    #[test]
    fn unlinked_open_file_still_readable() {
        let d = disk();
        let mut f = d.open("/gone", true, false).unwrap();
        f.write(b"data").unwrap();
        f.seek(0, false, false).unwrap();
        d.remove("/gone").unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(f.read(&mut buf), 4);
        assert!(d.open("/gone", false, false).is_err());
    }

    #[test]
    fn directories_nest_and_list_in_order() {
        let d = disk();
        d.mkdir("/d").unwrap();
        d.open("/d/f2", true, false).unwrap();
        d.open("/d/f1", true, false).unwrap();
        assert_eq!(d.list_dir("/d").unwrap(), vec!["f1", "f2"]);
        assert!(d.rmdir("/d").is_err(), "rmdir of non-empty dir must fail");
        d.remove("/d/f1").unwrap();
        d.remove("/d/f2").unwrap();
        d.rmdir("/d").unwrap();
        assert!(d.stat("/d").is_err());
    }

    #[test]
    fn rename_moves_content() {
        let d = disk();
        let mut f = d.open("/old", true, false).unwrap();
        f.write(b"x").unwrap();
        d.rename("/old", "/new").unwrap();
        assert!(d.open("/old", false, false).is_err());
        assert_eq!(d.stat("/new").unwrap().size, 1);
    }

    #[test]
    fn seek_semantics() {
        let d = disk();
        let mut f = d.open("/s", true, false).unwrap();
        f.write(b"0123456789").unwrap();
        assert_eq!(f.seek(-3, true, false).unwrap(), 7);
        let mut buf = [0u8; 8];
        assert_eq!(f.read(&mut buf), 3);
        assert_eq!(&buf[..3], b"789");
        assert!(f.seek(-1, false, false).is_err());
    }
}
