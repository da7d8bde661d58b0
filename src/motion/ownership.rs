// Joint ownership: which motion module may command each actuator
//
// Every actuator has at most one owner. Enabling an actuator that another
// module owns is rejected; the old owner has to let go first.

use std::collections::BTreeSet;

use super::ModuleId;
use super::joint::{NUM_JOINTS, is_valid_joint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Actuator {id} is owned by {owner:?}, cannot enable it for {requested:?}")]
pub struct OwnershipConflict {
    pub id: u8,
    pub owner: ModuleId,
    pub requested: ModuleId,
}

/// Per-actuator enable flags, indexed by actuator id
#[derive(Debug, Clone, Default)]
pub struct OwnershipTable {
    owners: [Option<ModuleId>; NUM_JOINTS as usize + 1],
}

impl OwnershipTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable one actuator for a module.
    ///
    /// Disabling an actuator the module does not own is a no-op. Ids outside
    /// the robot are ignored.
    pub fn set_enabled(
        &mut self,
        id: u8,
        module: ModuleId,
        enabled: bool,
    ) -> Result<(), OwnershipConflict> {
        if !is_valid_joint(id) {
            return Ok(());
        }
        let slot = &mut self.owners[id as usize];
        match (*slot, enabled) {
            (Some(owner), true) if owner != module => Err(OwnershipConflict {
                id,
                owner,
                requested: module,
            }),
            (_, true) => {
                *slot = Some(module);
                Ok(())
            }
            (Some(owner), false) if owner == module => {
                *slot = None;
                Ok(())
            }
            (_, false) => Ok(()),
        }
    }

    pub fn owner_of(&self, id: u8) -> Option<ModuleId> {
        self.owners.get(id as usize).copied().flatten()
    }

    pub fn is_owned_by(&self, id: u8, module: ModuleId) -> bool {
        self.owner_of(id) == Some(module)
    }

    pub fn enabled_for(&self, module: ModuleId) -> BTreeSet<u8> {
        self.owners
            .iter()
            .enumerate()
            .filter(|(_, owner)| **owner == Some(module))
            .map(|(id, _)| id as u8)
            .collect()
    }

    /// Enable a whole actuator set for a module.
    ///
    /// All-or-nothing: if any actuator is owned by someone else, nothing changes.
    pub fn enable_all(
        &mut self,
        module: ModuleId,
        ids: impl IntoIterator<Item = u8>,
    ) -> Result<(), OwnershipConflict> {
        let ids: Vec<u8> = ids.into_iter().collect();
        if let Some(conflict) = ids.iter().find_map(|&id| match self.owner_of(id) {
            Some(owner) if owner != module => Some(OwnershipConflict {
                id,
                owner,
                requested: module,
            }),
            _ => None,
        }) {
            return Err(conflict);
        }
        for id in ids {
            self.set_enabled(id, module, true)?;
        }
        Ok(())
    }

    /// Drop every actuator a module owns
    pub fn release_all(&mut self, module: ModuleId) {
        for owner in self.owners.iter_mut() {
            if *owner == Some(module) {
                *owner = None;
            }
        }
    }

    /// Move actuators from one module to another: the outgoing module is
    /// disabled first, then the incoming one enabled.
    ///
    /// Actuators owned by a third module make the whole transfer fail
    /// without side effects.
    pub fn hand_over(
        &mut self,
        from: ModuleId,
        to: ModuleId,
        ids: impl IntoIterator<Item = u8>,
    ) -> Result<(), OwnershipConflict> {
        let ids: Vec<u8> = ids.into_iter().collect();
        if let Some(conflict) = ids.iter().find_map(|&id| match self.owner_of(id) {
            Some(owner) if owner != from && owner != to => Some(OwnershipConflict {
                id,
                owner,
                requested: to,
            }),
            _ => None,
        }) {
            return Err(conflict);
        }

        for &id in &ids {
            self.set_enabled(id, from, false)?;
        }
        self.enable_all(to, ids)
    }
}
