// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Small shared helpers.

use std::sync::{Mutex, MutexGuard};

/// Locks a table mutex, shrugging off poisoning. A poisoned lock means a
/// task died while holding it; the tables are kept consistent by the
/// two-phase allocation discipline, so the state behind the lock is still
/// usable and halting every subsequent caller would only compound the
/// damage.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
