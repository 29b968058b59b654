// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The filesystem volume table and virtual-to-physical path translation.
//!
//! The board support layer seeds the table with the devices that exist;
//! `mkfs` claims and formats one, `mount` gives it a mount point, and from
//! then on any virtual path starting with that mount point translates to
//! the volume's physical namespace. Which backend serves the volume is a
//! property of the entry, carried into every file handle opened through
//! it.

use std::path::PathBuf;
use std::sync::Arc;

use abi::{OsError, OsResult, VolumeType, MAX_FILE_SYSTEMS, MAX_LOCAL_PATH_LEN, MAX_PATH_LEN};

use crate::port;
use crate::util::lock;
use crate::Osal;

/// A device the volume table is seeded with, before `mkfs` claims it.
#[derive(Debug, Clone)]
pub struct VolumeSeed {
    /// Device name, e.g. `/ramdev0`.
    pub dev_name: String,
    /// Physical name: the prefix translated paths are rooted at. For a
    /// host passthrough volume this is a host directory.
    pub phys_name: String,
    pub vol_type: VolumeType,
    /// Contents do not survive a restart.
    pub volatile_fs: bool,
}

/// Capacity report for a volume.
#[derive(Debug, Clone, Copy)]
pub struct VolumeStats {
    pub block_size: u32,
    pub blocks_total: u64,
    pub blocks_free: u64,
}

pub(crate) struct Volume {
    pub dev_name: String,
    pub phys_name: String,
    pub vol_type: VolumeType,
    #[allow(dead_code)]
    pub volatile_fs: bool,
    pub free: bool,
    pub mounted: bool,
    pub vol_name: String,
    pub mount_point: String,
    pub block_size: u32,
    pub num_blocks: u64,
    pub ram: Option<Arc<port::RamDisk>>,
}

pub(crate) struct VolumeTable {
    entries: Vec<Volume>,
}

/// Where a translated path leads: into a RAM disk (with the path relative
/// to the disk) or out to the host filesystem.
pub(crate) enum Route {
    Ram(Arc<port::RamDisk>, String),
    Host(PathBuf),
}

impl VolumeTable {
    pub fn new(seeds: Vec<VolumeSeed>) -> VolumeTable {
        let entries = seeds
            .into_iter()
            .take(MAX_FILE_SYSTEMS)
            .map(|s| Volume {
                dev_name: s.dev_name,
                phys_name: s.phys_name,
                vol_type: s.vol_type,
                volatile_fs: s.volatile_fs,
                free: true,
                mounted: false,
                vol_name: String::new(),
                mount_point: String::new(),
                block_size: 0,
                num_blocks: 0,
                ram: None,
            })
            .collect();
        VolumeTable { entries }
    }
}

/// Splits a virtual path into its first component and the remainder
/// (leading slash included on both sides' behalf).
fn split_virtual(path: &str) -> OsResult<(&str, &str)> {
    let rest = path.strip_prefix('/').ok_or(OsError::FsPathInvalid)?;
    match rest.find('/') {
        Some(i) => Ok((&rest[..i], &rest[i..])),
        None => Ok((rest, "")),
    }
}

impl Osal {
    /// Formats a volume on a seeded device. For a RAM disk the block size
    /// must be 512 and the disk is allocated here; passthrough volumes
    /// just record the geometry.
    pub fn mkfs(
        &self,
        dev_name: &str,
        vol_name: &str,
        block_size: u32,
        num_blocks: u64,
    ) -> OsResult<()> {
        let mut table = lock(&self.volumes);
        let vol = table
            .entries
            .iter_mut()
            .find(|v| v.free && v.dev_name == dev_name)
            .ok_or(OsError::FsDeviceNotFree)?;
        if vol.vol_type == VolumeType::RamDisk {
            if block_size != 512 {
                return Err(OsError::FsError);
            }
            vol.ram = Some(Arc::new(port::RamDisk::format(block_size, num_blocks)));
        }
        vol.vol_name = vol_name.to_string();
        vol.block_size = block_size;
        vol.num_blocks = num_blocks;
        vol.free = false;
        Ok(())
    }

    /// Re-initializes an existing volume; equivalent to [`Osal::mkfs`].
    pub fn initfs(
        &self,
        dev_name: &str,
        vol_name: &str,
        block_size: u32,
        num_blocks: u64,
    ) -> OsResult<()> {
        self.mkfs(dev_name, vol_name, block_size, num_blocks)
    }

    /// Releases a volume table entry, discarding a RAM disk's contents.
    pub fn rmfs(&self, dev_name: &str) -> OsResult<()> {
        let mut table = lock(&self.volumes);
        let vol = table
            .entries
            .iter_mut()
            .find(|v| !v.free && v.dev_name == dev_name)
            .ok_or(OsError::FsError)?;
        log::debug!("releasing volume {:?} on {dev_name}", vol.vol_name);
        vol.free = true;
        vol.mounted = false;
        vol.vol_name.clear();
        vol.mount_point.clear();
        vol.ram = None;
        Ok(())
    }

    /// Associates a mount point with a formatted device.
    pub fn mount(&self, dev_name: &str, mount_point: &str) -> OsResult<()> {
        if !mount_point.starts_with('/') {
            return Err(OsError::FsPathInvalid);
        }
        let mut table = lock(&self.volumes);
        let vol = table
            .entries
            .iter_mut()
            .find(|v| !v.free && v.dev_name == dev_name)
            .ok_or(OsError::FsDriveNotCreated)?;
        vol.mount_point = mount_point.to_string();
        vol.mounted = true;
        Ok(())
    }

    /// Removes a mount point. The volume stays formatted.
    pub fn unmount(&self, mount_point: &str) -> OsResult<()> {
        let mut table = lock(&self.volumes);
        let vol = table
            .entries
            .iter_mut()
            .find(|v| v.mounted && v.mount_point == mount_point)
            .ok_or(OsError::FsError)?;
        vol.mounted = false;
        vol.mount_point.clear();
        Ok(())
    }

    /// Physical device prefix behind a mount point.
    pub fn fs_get_phys_drive_name(&self, mount_point: &str) -> OsResult<String> {
        let table = lock(&self.volumes);
        table
            .entries
            .iter()
            .find(|v| v.mounted && v.mount_point == mount_point)
            .map(|v| v.phys_name.clone())
            .ok_or(OsError::FsError)
    }

    /// Translates a virtual path to its physical form: the mount's
    /// physical prefix plus the remainder of the path.
    pub fn translate_path(&self, virtual_path: &str) -> OsResult<String> {
        self.route(virtual_path).map(|(_, phys)| phys)
    }

    /// Capacity of the volume serving `path`. The host backend does not
    /// report capacity.
    pub fn fs_stat_volume(&self, path: &str) -> OsResult<VolumeStats> {
        let (first, _) = split_virtual(path)?;
        let table = lock(&self.volumes);
        let vol = table
            .entries
            .iter()
            .find(|v| v.mounted && v.mount_point.strip_prefix('/') == Some(first))
            .ok_or(OsError::FsPathInvalid)?;
        match &vol.ram {
            Some(disk) => Ok(VolumeStats {
                block_size: vol.block_size,
                blocks_total: vol.num_blocks,
                blocks_free: disk.blocks_free(),
            }),
            None => Err(OsError::FsUnimplemented),
        }
    }

    /// Resolves a virtual path to its backend route plus the translated
    /// physical string.
    pub(crate) fn route(&self, virtual_path: &str) -> OsResult<(Route, String)> {
        if virtual_path.len() > MAX_PATH_LEN {
            return Err(OsError::FsPathTooLong);
        }
        let (first, remainder) = split_virtual(virtual_path)?;
        let table = lock(&self.volumes);
        let vol = table
            .entries
            .iter()
            .find(|v| {
                v.mounted && v.mount_point.strip_prefix('/') == Some(first)
            })
            .ok_or(OsError::FsPathInvalid)?;
        let phys = format!("{}{}", vol.phys_name, remainder);
        if phys.len() > MAX_LOCAL_PATH_LEN {
            return Err(OsError::FsPathTooLong);
        }
        let route = match vol.vol_type {
            VolumeType::RamDisk => {
                let disk = vol.ram.as_ref().ok_or(OsError::FsDriveNotCreated)?;
                Route::Ram(Arc::clone(disk), remainder.to_string())
            }
            VolumeType::FsBased => Route::Host(PathBuf::from(&phys)),
        };
        Ok((route, phys))
    }
}
