//! Error types for ledger operations.

use std::fmt;

use thiserror::Error;

use crate::Amount;
use crate::model::{PlotId, ProfitId, ProjectId, SaleId, UserId, WalletId};

use super::wallet::WalletStatus;

/// The kind of entity an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    User,
    Wallet,
    Transaction,
    Investment,
    Project,
    Plot,
    Sale,
    Profit,
    Reinvestment,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::User => "user",
            EntityKind::Wallet => "wallet",
            EntityKind::Transaction => "transaction",
            EntityKind::Investment => "investment",
            EntityKind::Project => "project",
            EntityKind::Plot => "plot",
            EntityKind::Sale => "sale",
            EntityKind::Profit => "profit",
            EntityKind::Reinvestment => "reinvestment",
        };
        f.write_str(name)
    }
}

/// Which wallet hold an operation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldKind {
    Frozen,
    Pending,
}

/// Error returned by every engine operation.
///
/// Validation errors (`AllocationMismatch`, `IneligibleUser`, `InvalidAmount`, ...)
/// are raised before anything is staged. Any error raised mid-operation
/// discards the whole unit of work, so none of them leaves partial state behind.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LedgerError {
    #[error("insufficient funds in wallet {wallet}: available {available}, requested {requested}")]
    InsufficientFunds {
        wallet: WalletId,
        available: Amount,
        requested: Amount,
    },

    #[error("wallet {wallet}: cannot release {requested} from {hold:?} hold of {held}")]
    InvalidHoldState {
        wallet: WalletId,
        hold: HoldKind,
        held: Amount,
        requested: Amount,
    },

    #[error("plot allocations sum to {allocated}, investment amount is {expected}")]
    AllocationMismatch { expected: Amount, allocated: Amount },

    #[error("user {user} is not eligible to invest: {}", reasons.join("; "))]
    IneligibleUser { user: UserId, reasons: Vec<String> },

    #[error("{entity} {id}: cannot {action} while {state}")]
    InvalidStateTransition {
        entity: EntityKind,
        id: u64,
        state: &'static str,
        action: &'static str,
    },

    #[error("profit {0} is already distributed")]
    AlreadyDistributed(ProfitId),

    #[error("profit for sale {0} is already calculated")]
    ProfitAlreadyCalculated(SaleId),

    #[error("profit {profit}: requested {requested} exceeds remaining reinvestment capacity {remaining}")]
    ReinvestmentCapacityExceeded {
        profit: ProfitId,
        remaining: Amount,
        requested: Amount,
    },

    #[error("project {0} has no available plot")]
    NoAvailablePlot(ProjectId),

    #[error("plot {0} is not available")]
    PlotUnavailable(PlotId),

    #[error("sale {sale} produced no profit ({total_profit})")]
    NoProfit { sale: SaleId, total_profit: Amount },

    #[error("invalid amount {0}: must be greater than zero")]
    InvalidAmount(Amount),

    #[error("{0}")]
    InvalidInput(String),

    #[error("wallet {wallet} is {status}")]
    WalletInactive {
        wallet: WalletId,
        status: WalletStatus,
    },

    #[error("{0} {1} not found")]
    NotFound(EntityKind, u64),

    #[error("duplicate transaction reference '{0}'")]
    DuplicateReference(String),
}

impl LedgerError {
    pub(crate) fn not_found(kind: EntityKind, id: impl Into<u64>) -> Self {
        LedgerError::NotFound(kind, id.into())
    }

    /// Human-readable reasons, one per line of a user-facing message.
    pub fn reasons(&self) -> Vec<String> {
        match self {
            LedgerError::IneligibleUser { reasons, .. } => reasons.clone(),
            other => vec![other.to_string()],
        }
    }

    /// True for errors raised before any mutation was attempted.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            LedgerError::AllocationMismatch { .. }
                | LedgerError::IneligibleUser { .. }
                | LedgerError::InvalidAmount(_)
                | LedgerError::InvalidInput(_)
                | LedgerError::DuplicateReference(_)
        )
    }
}

/// Convenience constructor for illegal state transitions.
pub(crate) fn invalid_transition(
    entity: EntityKind,
    id: u64,
    state: &'static str,
    action: &'static str,
) -> LedgerError {
    LedgerError::InvalidStateTransition {
        entity,
        id,
        state,
        action,
    }
}

/// Outcome of a bulk operation. Items are processed independently.
#[derive(Debug)]
pub struct BulkReport<Id> {
    pub succeeded: Vec<Id>,
    pub failed: Vec<(Id, LedgerError)>,
}

impl<Id> BulkReport<Id> {
    pub(crate) fn new() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn succeeded_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}
