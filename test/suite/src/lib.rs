// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration scenarios for the OSAL, run against the host port. The
//! actual tests live under `tests/`; this library only hosts the shared
//! setup they use.

use std::sync::Arc;

use osal::{bsp, Osal};

/// Builds a fresh OSAL instance with the stock host configuration, with
/// logging wired up once per process.
pub fn init_osal() -> Arc<Osal> {
    let _ = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init();
    Osal::init(bsp::default_config())
}

/// Builds an OSAL with a formatted, mounted RAM volume at `/ram`.
pub fn init_osal_with_ram() -> Arc<Osal> {
    let os = init_osal();
    os.mkfs("/ramdev0", "RAM", 512, 2048).unwrap();
    os.mount("/ramdev0", "/ram").unwrap();
    os
}
