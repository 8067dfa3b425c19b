use std::fmt;

use serde::Serialize;

use crate::Amount;
use crate::model::{UserId, WalletId};

use super::error::{HoldKind, LedgerError};

/// Administrative state of a wallet. Only active wallets accept new money movements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletStatus {
    #[default]
    Active,
    Frozen,
    Suspended,
}

impl fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WalletStatus::Active => "active",
            WalletStatus::Frozen => "frozen",
            WalletStatus::Suspended => "suspended",
        })
    }
}

/// Running total bumped by a credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditKind {
    Deposit,
    Profit,
    /// Returns a previously debited investment; reverses `total_investments`.
    Refund,
}

/// Running total bumped by a debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitKind {
    Withdrawal,
    Investment,
    Reinvestment,
    RegistrationFee,
}

/// Point-in-time balance around one wallet mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceSnapshot {
    pub before: Amount,
    pub after: Amount,
}

/// A user's wallet: one balance plus the frozen and pending holds carved out of it.
///
/// Fields are private; every mutation goes through the methods below, which
/// keep `balance >= frozen_amount + pending_amount >= 0`.
#[derive(Debug, Clone, Serialize)]
pub struct Wallet {
    id: WalletId,
    user: UserId,
    balance: Amount,
    frozen_amount: Amount,
    pending_amount: Amount,
    total_deposits: Amount,
    total_withdrawals: Amount,
    total_investments: Amount,
    total_profits: Amount,
    status: WalletStatus,
}

impl Wallet {
    pub(crate) fn new(id: WalletId, user: UserId) -> Self {
        Self {
            id,
            user,
            balance: Amount::ZERO,
            frozen_amount: Amount::ZERO,
            pending_amount: Amount::ZERO,
            total_deposits: Amount::ZERO,
            total_withdrawals: Amount::ZERO,
            total_investments: Amount::ZERO,
            total_profits: Amount::ZERO,
            status: WalletStatus::Active,
        }
    }

    pub fn id(&self) -> WalletId {
        self.id
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn balance(&self) -> Amount {
        self.balance
    }

    pub fn frozen_amount(&self) -> Amount {
        self.frozen_amount
    }

    pub fn pending_amount(&self) -> Amount {
        self.pending_amount
    }

    /// `balance − frozen_amount − pending_amount`
    pub fn available(&self) -> Amount {
        self.balance - self.frozen_amount - self.pending_amount
    }

    pub fn total_deposits(&self) -> Amount {
        self.total_deposits
    }

    pub fn total_withdrawals(&self) -> Amount {
        self.total_withdrawals
    }

    pub fn total_investments(&self) -> Amount {
        self.total_investments
    }

    pub fn total_profits(&self) -> Amount {
        self.total_profits
    }

    pub fn status(&self) -> WalletStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == WalletStatus::Active
    }

    pub(crate) fn set_status(&mut self, status: WalletStatus) {
        self.status = status;
    }

    fn ensure_active(&self) -> Result<(), LedgerError> {
        if !self.is_active() {
            return Err(LedgerError::WalletInactive {
                wallet: self.id,
                status: self.status,
            });
        }
        Ok(())
    }

    fn ensure_available(&self, amount: Amount) -> Result<(), LedgerError> {
        if self.available() < amount {
            return Err(LedgerError::InsufficientFunds {
                wallet: self.id,
                available: self.available(),
                requested: amount,
            });
        }
        Ok(())
    }

    fn snapshot_after(&self, before: Amount) -> BalanceSnapshot {
        BalanceSnapshot {
            before,
            after: self.balance,
        }
    }

    /// Increase the balance and the running total matching `kind`.
    pub(crate) fn credit(
        &mut self,
        amount: Amount,
        kind: CreditKind,
    ) -> Result<BalanceSnapshot, LedgerError> {
        ensure_positive(amount)?;
        self.ensure_active()?;

        let before = self.balance;
        self.balance += amount;
        self.bump_credit_total(amount, kind);
        Ok(self.snapshot_after(before))
    }

    fn bump_credit_total(&mut self, amount: Amount, kind: CreditKind) {
        match kind {
            CreditKind::Deposit => self.total_deposits += amount,
            CreditKind::Profit => self.total_profits += amount,
            CreditKind::Refund => self.total_investments -= amount,
        }
    }

    /// Decrease the balance, checked against the available funds.
    pub(crate) fn debit(
        &mut self,
        amount: Amount,
        kind: DebitKind,
    ) -> Result<BalanceSnapshot, LedgerError> {
        ensure_positive(amount)?;
        self.ensure_active()?;
        self.ensure_available(amount)?;

        let before = self.balance;
        self.balance -= amount;
        self.bump_debit_total(amount, kind);
        Ok(self.snapshot_after(before))
    }

    /// Spend funds already reserved by [`freeze`](Self::freeze): the balance
    /// and the frozen hold drop together, so only the hold is checked.
    pub(crate) fn debit_frozen(
        &mut self,
        amount: Amount,
        kind: DebitKind,
    ) -> Result<BalanceSnapshot, LedgerError> {
        ensure_positive(amount)?;
        self.ensure_active()?;
        if self.frozen_amount < amount || self.balance < amount {
            return Err(LedgerError::InvalidHoldState {
                wallet: self.id,
                hold: HoldKind::Frozen,
                held: self.frozen_amount,
                requested: amount,
            });
        }

        let before = self.balance;
        self.balance -= amount;
        self.frozen_amount -= amount;
        self.bump_debit_total(amount, kind);
        Ok(self.snapshot_after(before))
    }

    fn bump_debit_total(&mut self, amount: Amount, kind: DebitKind) {
        match kind {
            DebitKind::Withdrawal => self.total_withdrawals += amount,
            DebitKind::Investment | DebitKind::Reinvestment => self.total_investments += amount,
            DebitKind::RegistrationFee => {}
        }
    }

    /// Earmark available funds. The balance does not change.
    pub(crate) fn freeze(&mut self, amount: Amount) -> Result<BalanceSnapshot, LedgerError> {
        ensure_positive(amount)?;
        self.ensure_active()?;
        self.ensure_available(amount)?;

        self.frozen_amount += amount;
        Ok(self.snapshot_after(self.balance))
    }

    /// Return earmarked funds to the available balance.
    ///
    /// Releasing a hold is allowed on inactive wallets.
    pub(crate) fn unfreeze(&mut self, amount: Amount) -> Result<BalanceSnapshot, LedgerError> {
        ensure_positive(amount)?;
        if self.frozen_amount < amount {
            return Err(LedgerError::InvalidHoldState {
                wallet: self.id,
                hold: HoldKind::Frozen,
                held: self.frozen_amount,
                requested: amount,
            });
        }

        self.frozen_amount -= amount;
        Ok(self.snapshot_after(self.balance))
    }

    /// Book incoming funds that await confirmation: they count towards the
    /// balance but stay out of the available amount.
    pub(crate) fn add_pending(&mut self, amount: Amount) -> Result<BalanceSnapshot, LedgerError> {
        ensure_positive(amount)?;
        self.ensure_active()?;

        let before = self.balance;
        self.balance += amount;
        self.pending_amount += amount;
        Ok(self.snapshot_after(before))
    }

    /// Release a pending hold. A confirmed deposit becomes available, a
    /// rejected one leaves the balance.
    pub(crate) fn remove_pending(
        &mut self,
        amount: Amount,
        confirmed: bool,
    ) -> Result<BalanceSnapshot, LedgerError> {
        ensure_positive(amount)?;
        if self.pending_amount < amount {
            return Err(LedgerError::InvalidHoldState {
                wallet: self.id,
                hold: HoldKind::Pending,
                held: self.pending_amount,
                requested: amount,
            });
        }

        let before = self.balance;
        self.pending_amount -= amount;
        if confirmed {
            self.bump_credit_total(amount, CreditKind::Deposit);
        } else {
            self.balance -= amount;
        }
        Ok(self.snapshot_after(before))
    }
}

pub(crate) fn ensure_positive(amount: Amount) -> Result<(), LedgerError> {
    if !amount.is_positive() {
        return Err(LedgerError::InvalidAmount(amount));
    }
    Ok(())
}
