//! Pull payment charged when a comment is made on a publication that routes
//! its references through the seed module.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::address::{Address, AddressError};
use crate::currency::{Currency, TransferError};
use crate::ledger::Amount;
use crate::tree::PubKey;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("malformed reference data: {0}")]
    MalformedReferenceData(#[from] AddressError),
    #[error("reference data names the zero address as payer")]
    ZeroPayer,
    #[error("payment from {payer} failed: {source}")]
    TransferFailed {
        payer: Address,
        #[source]
        source: TransferError,
    },
}

/// Receipt of a successful charge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Payment {
    pub payer: Address,
    pub amount: Amount,
}

#[derive(Clone, Debug)]
pub struct PaymentGateway {
    holder: Address,
    payment_amount: Amount,
    active: BTreeSet<PubKey>,
}

impl PaymentGateway {
    /// Payments land in `holder`'s balance.
    pub fn new(holder: Address, payment_amount: Amount) -> Self {
        Self {
            holder,
            payment_amount,
            active: BTreeSet::new(),
        }
    }

    pub fn holder(&self) -> Address {
        self.holder
    }

    pub fn payment_amount(&self) -> Amount {
        self.payment_amount
    }

    /// Routes comments on `publication` through this gateway.
    pub fn initialize(&mut self, publication: PubKey) {
        self.active.insert(publication);
    }

    pub fn is_active(&self, publication: PubKey) -> bool {
        self.active.contains(&publication)
    }

    /// Reads the optional payer override carried in a comment's reference
    /// data. Empty data means the commenter pays.
    pub fn decode_payer(reference_data: &[u8]) -> Result<Option<Address>, GatewayError> {
        if reference_data.is_empty() {
            return Ok(None);
        }
        let payer = Address::from_abi_word(reference_data)?;
        if payer.is_zero() {
            return Err(GatewayError::ZeroPayer);
        }
        Ok(Some(payer))
    }

    /// Charges the fixed payment for a comment. `commenter` is the controller
    /// of the commenting profile.
    pub fn process_comment<C>(
        &self,
        commenter: &Address,
        reference_data: &[u8],
        currency: &mut C,
    ) -> Result<Payment, GatewayError>
    where
        C: Currency + ?Sized,
    {
        let payer = Self::decode_payer(reference_data)?.unwrap_or(*commenter);
        currency
            .transfer_from(&self.holder, &payer, &self.holder, self.payment_amount)
            .map_err(|source| {
                warn!(
                    %payer,
                    amount = self.payment_amount,
                    error = %source,
                    "comment payment failed"
                );
                GatewayError::TransferFailed { payer, source }
            })?;
        info!(%payer, amount = self.payment_amount, "comment payment collected");
        Ok(Payment {
            payer,
            amount: self.payment_amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::currency::MemoryCurrency;

    const PAYMENT: Amount = 10;

    fn addr(n: u64) -> Address {
        Address::from_low_u64(n)
    }

    fn gateway() -> PaymentGateway {
        PaymentGateway::new(addr(50), PAYMENT)
    }

    #[test]
    fn commenter_pays_without_reference_data() {
        let gateway = gateway();
        let mut token = MemoryCurrency::new();
        token.mint(&addr(2), PAYMENT * 2).unwrap();
        token.approve(&addr(2), &addr(50), PAYMENT);

        let payment = gateway.process_comment(&addr(2), &[], &mut token).unwrap();
        assert_eq!(payment, Payment { payer: addr(2), amount: PAYMENT });
        assert_eq!(token.balance_of(&addr(2)), PAYMENT);
        assert_eq!(token.balance_of(&addr(50)), PAYMENT);
    }

    #[test]
    fn designated_payer_is_charged_instead() {
        let gateway = gateway();
        let mut token = MemoryCurrency::new();
        token.mint(&addr(2), PAYMENT).unwrap();
        token.approve(&addr(2), &addr(50), PAYMENT);
        token.mint(&addr(3), PAYMENT).unwrap();
        token.approve(&addr(3), &addr(50), PAYMENT);

        let data = addr(3).to_abi_word();
        let payment = gateway.process_comment(&addr(2), &data, &mut token).unwrap();
        assert_eq!(payment.payer, addr(3));
        assert_eq!(token.balance_of(&addr(3)), 0);
        assert_eq!(token.balance_of(&addr(2)), PAYMENT);
    }

    #[test]
    fn short_balance_or_allowance_fails() {
        let gateway = gateway();
        let mut token = MemoryCurrency::new();
        assert!(matches!(
            gateway.process_comment(&addr(2), &[], &mut token),
            Err(GatewayError::TransferFailed {
                source: TransferError::InsufficientAllowance { .. },
                ..
            })
        ));

        token.mint(&addr(2), PAYMENT - 1).unwrap();
        token.approve(&addr(2), &addr(50), PAYMENT);
        assert!(matches!(
            gateway.process_comment(&addr(2), &[], &mut token),
            Err(GatewayError::TransferFailed {
                source: TransferError::InsufficientBalance { .. },
                ..
            })
        ));
        assert_eq!(token.balance_of(&addr(50)), 0);
    }

    #[test]
    fn reference_data_must_be_one_clean_word() {
        assert_eq!(PaymentGateway::decode_payer(&[]), Ok(None));
        assert_eq!(
            PaymentGateway::decode_payer(&[1, 2, 3]),
            Err(GatewayError::MalformedReferenceData(
                AddressError::InvalidWordLength(3)
            ))
        );
        assert_eq!(
            PaymentGateway::decode_payer(&Address::ZERO.to_abi_word()),
            Err(GatewayError::ZeroPayer)
        );
    }

    #[test]
    fn activation_is_per_publication() {
        let mut gateway = gateway();
        gateway.initialize((1, 1));
        assert!(gateway.is_active((1, 1)));
        assert!(!gateway.is_active((1, 2)));
    }
}
