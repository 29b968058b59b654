// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Board support for the host environment.
//!
//! The pieces an application would otherwise have to invent: a stock
//! volume table, the startup hook that launches the application's main
//! task, and the exit-status encoding the test programs use.

use std::sync::Arc;

use abi::{ObjectId, OsResult, Priority, VolumeType};

use crate::volume::VolumeSeed;
use crate::{Config, Osal};

/// Stack size handed to the application main task.
const APP_STACK_SIZE: usize = 8 * 1024;
/// Priority of the application main task: middling, so the application
/// can create both more and less important tasks.
const APP_PRIORITY: Priority = Priority(100);

/// The stock host configuration: one RAM-disk device and one passthrough
/// device rooted in a per-process scratch directory, no static symbols.
pub fn default_config() -> Config {
    let scratch = std::env::temp_dir().join(format!("osal-cf-{}", std::process::id()));
    let _ = std::fs::create_dir_all(&scratch);
    Config {
        volumes: vec![
            VolumeSeed {
                dev_name: "/ramdev0".to_string(),
                phys_name: "/ramdev0".to_string(),
                vol_type: VolumeType::RamDisk,
                volatile_fs: true,
            },
            VolumeSeed {
                dev_name: "/eedev0".to_string(),
                phys_name: scratch.to_string_lossy().into_owned(),
                vol_type: VolumeType::FsBased,
                volatile_fs: false,
            },
        ],
        symbols: Vec::new(),
    }
}

/// Launches the application's main task. On the host the network is up by
/// the time this can run, so it fires immediately; on an embedded board
/// the equivalent hook runs from the network-up event.
pub fn start_application(
    osal: &Arc<Osal>,
    name: &str,
    entry: impl FnOnce() + Send + 'static,
) -> OsResult<ObjectId> {
    osal.task_create(name, APP_STACK_SIZE, APP_PRIORITY, 0, entry)
}

/// Encodes a test run's failure count as a process exit status: zero for
/// a clean run, otherwise bit 0 set with the capped failure count in the
/// bits above it.
pub fn test_exit_code(failed_cases: u32) -> i32 {
    if failed_cases == 0 {
        0
    } else {
        ((failed_cases.min(127) as i32) << 1) | 1
    }
}
