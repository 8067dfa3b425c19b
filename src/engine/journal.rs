//! The transaction log: one append-only row per balance-affecting decision.
//!
//! Rows are never edited or removed. The only permitted change is the status
//! transition `pending -> completed | rejected`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::Amount;
use crate::model::{InvestmentId, ProfitId, ReinvestmentId, TransactionId, UserId, WalletId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Investment,
    Profit,
    Reinvestment,
    Refund,
    RegistrationFee,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Investment => "investment",
            TransactionType::Profit => "profit",
            TransactionType::Reinvestment => "reinvestment",
            TransactionType::Refund => "refund",
            TransactionType::RegistrationFee => "registration_fee",
        }
    }

    fn reference_prefix(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "DEP",
            TransactionType::Withdrawal => "WDR",
            TransactionType::Investment => "INV",
            TransactionType::Profit => "PRF",
            TransactionType::Reinvestment => "RIV",
            TransactionType::Refund => "RFD",
            TransactionType::RegistrationFee => "REG",
        }
    }

    /// A fresh reference code for this kind of transaction.
    pub(crate) fn new_reference(&self) -> String {
        format!(
            "{}-{}",
            self.reference_prefix(),
            Uuid::new_v4().simple().to_string().to_uppercase()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Rejected,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Rejected => "rejected",
        }
    }
}

/// One row of the transaction log.
///
/// `balance_before`/`balance_after` are captured when the row is written and
/// never recomputed. Hold movements (freeze, unfreeze) carry equal snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub user: UserId,
    pub wallet: WalletId,
    pub kind: TransactionType,
    pub amount: Amount,
    pub balance_before: Amount,
    pub balance_after: Amount,
    pub reference: String,
    pub investment_id: Option<InvestmentId>,
    pub profit_id: Option<ProfitId>,
    pub reinvestment_id: Option<ReinvestmentId>,
    pub status: TransactionStatus,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// Signed balance change recorded by this row.
    pub fn delta(&self) -> Amount {
        self.balance_after - self.balance_before
    }
}

/// Append-only transaction log with a unique reference index.
#[derive(Debug, Default)]
pub struct Journal {
    rows: Vec<TransactionRecord>,
    by_reference: HashMap<String, TransactionId>,
}

impl Journal {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Id the next appended row will receive.
    pub(crate) fn next_id(&self) -> TransactionId {
        self.rows.len() as TransactionId + 1
    }

    pub fn get(&self, id: TransactionId) -> Option<&TransactionRecord> {
        let index = usize::try_from(id).ok()?.checked_sub(1)?;
        self.rows.get(index)
    }

    pub fn by_reference(&self, reference: &str) -> Option<&TransactionRecord> {
        self.by_reference
            .get(reference)
            .and_then(|id| self.get(*id))
    }

    pub fn contains_reference(&self, reference: &str) -> bool {
        self.by_reference.contains_key(reference)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransactionRecord> + '_ {
        self.rows.iter()
    }

    pub fn for_wallet(&self, wallet: WalletId) -> impl Iterator<Item = &TransactionRecord> + '_ {
        self.rows.iter().filter(move |row| row.wallet == wallet)
    }

    /// Rows are staged with their final id, so ids must arrive in order.
    pub(crate) fn append(&mut self, row: TransactionRecord) {
        debug_assert_eq!(row.id, self.next_id());
        debug_assert!(!self.by_reference.contains_key(&row.reference));
        self.by_reference.insert(row.reference.clone(), row.id);
        self.rows.push(row);
    }

    /// Apply a status transition validated when it was staged.
    pub(crate) fn set_status(&mut self, id: TransactionId, status: TransactionStatus) {
        if let Some(row) = usize::try_from(id)
            .ok()
            .and_then(|i| i.checked_sub(1))
            .and_then(|i| self.rows.get_mut(i))
        {
            row.status = status;
        }
    }
}
