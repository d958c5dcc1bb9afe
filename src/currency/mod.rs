//! Value-transfer capability consumed by the ledger and the gateway.
//!
//! The core only relies on the narrow [`Currency`] trait. [`MemoryCurrency`]
//! is an in-memory ERC-20 style token (balances plus allowances) used by the
//! CLI and the tests.

use std::collections::BTreeMap;

use tracing::debug;

use crate::address::Address;
use crate::ledger::Amount;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("{holder} holds {available}, needs {required}")]
    InsufficientBalance {
        holder: Address,
        available: Amount,
        required: Amount,
    },
    #[error("{spender} may spend {allowed} of {owner}, needs {required}")]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        allowed: Amount,
        required: Amount,
    },
    #[error("balance overflow for {holder}")]
    Overflow { holder: Address },
}

pub trait Currency {
    fn balance_of(&self, holder: &Address) -> Amount;

    /// Moves `amount` out of `sender`'s own balance.
    fn transfer(
        &mut self,
        sender: &Address,
        recipient: &Address,
        amount: Amount,
    ) -> Result<(), TransferError>;

    /// Moves `amount` from `payer` to `recipient` against the allowance
    /// `payer` granted to `spender`.
    fn transfer_from(
        &mut self,
        spender: &Address,
        payer: &Address,
        recipient: &Address,
        amount: Amount,
    ) -> Result<(), TransferError>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryCurrency {
    balances: BTreeMap<Address, Amount>,
    allowances: BTreeMap<(Address, Address), Amount>,
}

impl MemoryCurrency {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mint(&mut self, to: &Address, amount: Amount) -> Result<(), TransferError> {
        let balance = self.balances.entry(*to).or_default();
        *balance = balance
            .checked_add(amount)
            .ok_or(TransferError::Overflow { holder: *to })?;
        debug!(%to, amount, "minted");
        Ok(())
    }

    pub fn approve(&mut self, owner: &Address, spender: &Address, amount: Amount) {
        self.allowances.insert((*owner, *spender), amount);
    }

    pub fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.allowances
            .get(&(*owner, *spender))
            .copied()
            .unwrap_or_default()
    }

    fn check_move(
        &self,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), TransferError> {
        let available = self.balance_of(from);
        if available < amount {
            return Err(TransferError::InsufficientBalance {
                holder: *from,
                available,
                required: amount,
            });
        }
        if from != to && self.balance_of(to).checked_add(amount).is_none() {
            return Err(TransferError::Overflow { holder: *to });
        }
        Ok(())
    }

    fn apply_move(&mut self, from: &Address, to: &Address, amount: Amount) {
        if from == to {
            return;
        }
        if let Some(balance) = self.balances.get_mut(from) {
            *balance -= amount;
        }
        *self.balances.entry(*to).or_default() += amount;
    }
}

impl Currency for MemoryCurrency {
    fn balance_of(&self, holder: &Address) -> Amount {
        self.balances.get(holder).copied().unwrap_or_default()
    }

    fn transfer(
        &mut self,
        sender: &Address,
        recipient: &Address,
        amount: Amount,
    ) -> Result<(), TransferError> {
        self.check_move(sender, recipient, amount)?;
        self.apply_move(sender, recipient, amount);
        debug!(from = %sender, to = %recipient, amount, "transfer");
        Ok(())
    }

    fn transfer_from(
        &mut self,
        spender: &Address,
        payer: &Address,
        recipient: &Address,
        amount: Amount,
    ) -> Result<(), TransferError> {
        let allowed = self.allowance(payer, spender);
        if allowed < amount {
            return Err(TransferError::InsufficientAllowance {
                owner: *payer,
                spender: *spender,
                allowed,
                required: amount,
            });
        }
        self.check_move(payer, recipient, amount)?;
        self.apply_move(payer, recipient, amount);
        self.allowances.insert((*payer, *spender), allowed - amount);
        debug!(%spender, from = %payer, to = %recipient, amount, "transfer_from");
        Ok(())
    }
}
