use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::address::Address;
use crate::ledger::ProfileId;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("caller {caller} is not the relayer")]
    NotRelayer { caller: Address },
    #[error("caller {caller} is not the owner")]
    NotOwner { caller: Address },
    #[error("caller {caller} does not control profile {profile_id}")]
    NotController {
        caller: Address,
        profile_id: ProfileId,
    },
    #[error("unknown profile {profile_id}")]
    UnknownProfile { profile_id: ProfileId },
}

/// Resolves a profile to the address allowed to act for it.
pub trait ProfileRegistry {
    fn controller_of(&self, profile_id: ProfileId) -> Option<Address>;
}

/// In-memory profile registry. Ids are handed out sequentially from 1.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileDirectory {
    controllers: BTreeMap<ProfileId, Address>,
}

impl ProfileDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, controller: Address) -> ProfileId {
        let profile_id = self.controllers.keys().next_back().map_or(1, |last| last + 1);
        self.controllers.insert(profile_id, controller);
        profile_id
    }

    pub fn transfer(
        &mut self,
        profile_id: ProfileId,
        new_controller: Address,
    ) -> Result<(), AccessError> {
        let controller = self
            .controllers
            .get_mut(&profile_id)
            .ok_or(AccessError::UnknownProfile { profile_id })?;
        *controller = new_controller;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}

impl ProfileRegistry for ProfileDirectory {
    fn controller_of(&self, profile_id: ProfileId) -> Option<Address> {
        self.controllers.get(&profile_id).copied()
    }
}

/// Role state shared by the ledger and the gateway.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessControl {
    owner: Address,
    relayer: Address,
}

impl AccessControl {
    pub fn new(owner: Address, relayer: Address) -> Self {
        Self { owner, relayer }
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn relayer(&self) -> Address {
        self.relayer
    }

    pub fn set_relayer(&mut self, caller: &Address, relayer: Address) -> Result<(), AccessError> {
        if *caller != self.owner {
            warn!(%caller, "rejected relayer change from non-owner");
            return Err(AccessError::NotOwner { caller: *caller });
        }
        info!(old = %self.relayer, new = %relayer, "relayer updated");
        self.relayer = relayer;
        Ok(())
    }

    pub fn require_relayer(&self, caller: &Address) -> Result<(), AccessError> {
        if *caller != self.relayer {
            warn!(%caller, "rejected relayer-only call");
            return Err(AccessError::NotRelayer { caller: *caller });
        }
        Ok(())
    }

    /// Only the exact registered controller may act for a profile.
    pub fn require_controller<R: ProfileRegistry + ?Sized>(
        &self,
        caller: &Address,
        profile_id: ProfileId,
        registry: &R,
    ) -> Result<Address, AccessError> {
        let controller = registry
            .controller_of(profile_id)
            .ok_or(AccessError::UnknownProfile { profile_id })?;
        if controller != *caller {
            warn!(%caller, profile_id, "rejected call from non-controller");
            return Err(AccessError::NotController {
                caller: *caller,
                profile_id,
            });
        }
        Ok(controller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u64) -> Address {
        Address::from_low_u64(n)
    }

    #[test]
    fn directory_assigns_sequential_ids() {
        let mut dir = ProfileDirectory::new();
        assert_eq!(dir.register(addr(10)), 1);
        assert_eq!(dir.register(addr(11)), 2);
        assert_eq!(dir.controller_of(2), Some(addr(11)));
        assert_eq!(dir.controller_of(3), None);
        dir.transfer(1, addr(12)).unwrap();
        assert_eq!(dir.controller_of(1), Some(addr(12)));
        assert_eq!(
            dir.transfer(9, addr(1)),
            Err(AccessError::UnknownProfile { profile_id: 9 })
        );
    }

    #[test]
    fn only_owner_moves_relayer() {
        let mut access = AccessControl::new(addr(1), addr(2));
        assert_eq!(access.owner(), addr(1));
        assert_eq!(
            access.set_relayer(&addr(2), addr(3)),
            Err(AccessError::NotOwner { caller: addr(2) })
        );
        assert_eq!(access.relayer(), addr(2));
        access.set_relayer(&addr(1), addr(3)).unwrap();
        assert!(access.require_relayer(&addr(3)).is_ok());
        assert!(access.require_relayer(&addr(2)).is_err());
    }

    #[test]
    fn controller_check_uses_registry() {
        let access = AccessControl::new(addr(1), addr(2));
        let mut dir = ProfileDirectory::new();
        let profile = dir.register(addr(5));
        assert_eq!(access.require_controller(&addr(5), profile, &dir), Ok(addr(5)));
        assert_eq!(
            access.require_controller(&addr(6), profile, &dir),
            Err(AccessError::NotController {
                caller: addr(6),
                profile_id: profile
            })
        );
        assert_eq!(
            access.require_controller(&addr(5), 42, &dir),
            Err(AccessError::UnknownProfile { profile_id: 42 })
        );
    }
}
