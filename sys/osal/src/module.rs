// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Module bookkeeping over a static symbol table.
//!
//! There is no dynamic loading here: the symbol table is compiled into the
//! application and handed over at init. `module_load` checks that the
//! requested module exists in that table and claims a module-table slot
//! for it; `symbol_lookup` searches the table directly.

use abi::{ObjectId, OsError, OsResult, MAX_SYM_LEN};

use crate::util::lock;
use crate::Osal;

/// One entry of the static symbol table the BSP supplies.
#[derive(Debug, Clone)]
pub struct SymbolRecord {
    /// Module the symbol belongs to.
    pub module: String,
    pub symbol: String,
    pub address: u64,
}

pub(crate) struct ModuleData {
    pub path: String,
    pub entry_point: u64,
}

/// Information reported by [`Osal::module_info`].
#[derive(Debug, Clone)]
pub struct ModuleProp {
    pub name: String,
    pub creator: Option<ObjectId>,
    pub path: String,
    pub entry_point: u64,
}

impl Osal {
    /// Registers a module. `path` must translate through the volume table;
    /// the module itself must appear in the static symbol table.
    pub fn module_load(&self, name: &str, path: &str) -> OsResult<ObjectId> {
        self.translate_path(path)?;
        let entry_point = self
            .symbols
            .iter()
            .find(|s| s.module == name)
            .map(|s| s.address)
            .ok_or(OsError::Error)?;
        let creator = self.task_get_id().ok();
        lock(&self.modules).allocate(
            name,
            creator,
            ModuleData {
                path: path.to_string(),
                entry_point,
            },
        )
    }

    pub fn module_unload(&self, id: ObjectId) -> OsResult<()> {
        lock(&self.modules).release(id).map(drop)
    }

    pub fn module_info(&self, id: ObjectId) -> OsResult<ModuleProp> {
        let modules = lock(&self.modules);
        let rec = modules.get(id)?;
        Ok(ModuleProp {
            name: rec.name.clone(),
            creator: rec.creator,
            path: rec.data.path.clone(),
            entry_point: rec.data.entry_point,
        })
    }

    /// Address of a symbol, from the static table.
    pub fn symbol_lookup(&self, symbol: &str) -> OsResult<u64> {
        if symbol.len() > MAX_SYM_LEN {
            return Err(OsError::Error);
        }
        self.symbols
            .iter()
            .find(|s| s.symbol == symbol)
            .map(|s| s.address)
            .ok_or(OsError::Error)
    }

    /// Writing the symbol table out is a dynamic-loader feature this
    /// static form does not have.
    pub fn symbol_table_dump(&self, _path: &str, _size_limit: u64) -> OsResult<()> {
        Err(OsError::NotImplemented)
    }
}
