//! Committed ledger state and the unit of work that stages changes to it.
//!
//! Operations never touch [`Books`] directly. They run against a
//! [`UnitOfWork`], which copies any entity it mutates and buffers new
//! transaction rows, row status changes and domain events. The engine
//! commits the buffered changes in one infallible step when the operation
//! succeeds and drops them when it fails.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::Amount;
use crate::config::LedgerConfig;
use crate::model::{
    InvestmentId, PlotId, ProfitId, ProjectId, ReinvestmentId, SaleId, TransactionId, UserId,
    WalletId,
};

use super::catalog::{Plot, Project, Sale};
use super::eligibility::UserProfile;
use super::error::{EntityKind, LedgerError, invalid_transition};
use super::events::DomainEvent;
use super::investment::Investment;
use super::journal::{Journal, TransactionRecord, TransactionStatus, TransactionType};
use super::profit::Profit;
use super::reinvest::Reinvestment;
use super::wallet::{BalanceSnapshot, CreditKind, DebitKind, Wallet};

/// Last id handed out per entity kind.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Sequence {
    wallet: u64,
    investment: u64,
    project: u64,
    plot: u64,
    sale: u64,
    profit: u64,
    reinvestment: u64,
}

fn bump(counter: &mut u64) -> u64 {
    *counter += 1;
    *counter
}

impl Sequence {
    pub fn next_wallet(&mut self) -> WalletId {
        bump(&mut self.wallet)
    }

    pub fn next_investment(&mut self) -> InvestmentId {
        bump(&mut self.investment)
    }

    pub fn next_project(&mut self) -> ProjectId {
        bump(&mut self.project)
    }

    pub fn next_plot(&mut self) -> PlotId {
        bump(&mut self.plot)
    }

    pub fn next_sale(&mut self) -> SaleId {
        bump(&mut self.sale)
    }

    pub fn next_profit(&mut self) -> ProfitId {
        bump(&mut self.profit)
    }

    pub fn next_reinvestment(&mut self) -> ReinvestmentId {
        bump(&mut self.reinvestment)
    }
}

/// Committed state.
#[derive(Debug, Default)]
pub(crate) struct Books {
    pub profiles: BTreeMap<UserId, UserProfile>,
    pub wallets: BTreeMap<UserId, Wallet>,
    pub journal: Journal,
    pub projects: BTreeMap<ProjectId, Project>,
    pub plots: BTreeMap<PlotId, Plot>,
    pub investments: BTreeMap<InvestmentId, Investment>,
    pub sales: BTreeMap<SaleId, Sale>,
    pub profits: BTreeMap<ProfitId, Profit>,
    pub reinvestments: BTreeMap<ReinvestmentId, Reinvestment>,
    pub sequence: Sequence,
}

impl Books {
    /// Apply staged changes and hand back the events to publish.
    pub fn commit(&mut self, changes: Changes) -> Vec<DomainEvent> {
        self.profiles.extend(changes.profiles);
        self.wallets.extend(changes.wallets);
        self.projects.extend(changes.projects);
        self.plots.extend(changes.plots);
        self.investments.extend(changes.investments);
        self.sales.extend(changes.sales);
        self.profits.extend(changes.profits);
        self.reinvestments.extend(changes.reinvestments);
        for row in changes.rows {
            self.journal.append(row);
        }
        for (id, status) in changes.status_changes {
            self.journal.set_status(id, status);
        }
        self.sequence = changes.sequence;
        changes.events
    }
}

/// Copy-on-write view over one committed map.
pub(crate) struct Staged<'a, K, V> {
    base: &'a BTreeMap<K, V>,
    changes: BTreeMap<K, V>,
}

impl<'a, K: Ord + Copy, V: Clone> Staged<'a, K, V> {
    fn new(base: &'a BTreeMap<K, V>) -> Self {
        Self {
            base,
            changes: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: K) -> Option<&V> {
        self.changes.get(&key).or_else(|| self.base.get(&key))
    }

    pub fn contains(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut V> {
        if !self.changes.contains_key(&key) {
            let value = self.base.get(&key)?.clone();
            self.changes.insert(key, value);
        }
        self.changes.get_mut(&key)
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.changes.insert(key, value);
    }

    /// First value in key order matching `pred`, staged values taking precedence.
    pub fn find(&self, pred: impl Fn(&V) -> bool) -> Option<&V> {
        let keys: BTreeSet<K> = self
            .base
            .keys()
            .chain(self.changes.keys())
            .copied()
            .collect();
        keys.into_iter()
            .filter_map(|key| self.get(key))
            .find(|value| pred(value))
    }

    fn into_changes(self) -> BTreeMap<K, V> {
        self.changes
    }
}

/// A wallet mutation. Each one applied through [`UnitOfWork::post`] writes
/// exactly one transaction row.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Movement {
    Credit(Amount, CreditKind),
    Debit(Amount, DebitKind),
    DebitFrozen(Amount, DebitKind),
    Freeze(Amount),
    Unfreeze(Amount),
    AddPending(Amount),
    ConfirmPending(Amount),
    RejectPending(Amount),
}

impl Movement {
    fn amount(&self) -> Amount {
        match *self {
            Movement::Credit(amount, _)
            | Movement::Debit(amount, _)
            | Movement::DebitFrozen(amount, _)
            | Movement::Freeze(amount)
            | Movement::Unfreeze(amount)
            | Movement::AddPending(amount)
            | Movement::ConfirmPending(amount)
            | Movement::RejectPending(amount) => amount,
        }
    }

    fn apply(&self, wallet: &mut Wallet) -> Result<BalanceSnapshot, LedgerError> {
        match *self {
            Movement::Credit(amount, kind) => wallet.credit(amount, kind),
            Movement::Debit(amount, kind) => wallet.debit(amount, kind),
            Movement::DebitFrozen(amount, kind) => wallet.debit_frozen(amount, kind),
            Movement::Freeze(amount) => wallet.freeze(amount),
            Movement::Unfreeze(amount) => wallet.unfreeze(amount),
            Movement::AddPending(amount) => wallet.add_pending(amount),
            Movement::ConfirmPending(amount) => wallet.remove_pending(amount, true),
            Movement::RejectPending(amount) => wallet.remove_pending(amount, false),
        }
    }
}

/// Metadata of the transaction row written for a movement.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    kind: TransactionType,
    status: TransactionStatus,
    reference: Option<String>,
    investment: Option<InvestmentId>,
    profit: Option<ProfitId>,
    reinvestment: Option<ReinvestmentId>,
    description: Option<String>,
}

impl Entry {
    pub fn new(kind: TransactionType) -> Self {
        Self {
            kind,
            status: TransactionStatus::Completed,
            reference: None,
            investment: None,
            profit: None,
            reinvestment: None,
            description: None,
        }
    }

    pub fn pending(mut self) -> Self {
        self.status = TransactionStatus::Pending;
        self
    }

    pub fn reference(mut self, reference: Option<String>) -> Self {
        self.reference = reference;
        self
    }

    pub fn investment(mut self, id: InvestmentId) -> Self {
        self.investment = Some(id);
        self
    }

    pub fn profit(mut self, id: ProfitId) -> Self {
        self.profit = Some(id);
        self
    }

    pub fn reinvestment(mut self, id: ReinvestmentId) -> Self {
        self.reinvestment = Some(id);
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

pub(crate) struct Changes {
    profiles: BTreeMap<UserId, UserProfile>,
    wallets: BTreeMap<UserId, Wallet>,
    projects: BTreeMap<ProjectId, Project>,
    plots: BTreeMap<PlotId, Plot>,
    investments: BTreeMap<InvestmentId, Investment>,
    sales: BTreeMap<SaleId, Sale>,
    profits: BTreeMap<ProfitId, Profit>,
    reinvestments: BTreeMap<ReinvestmentId, Reinvestment>,
    rows: Vec<TransactionRecord>,
    status_changes: BTreeMap<TransactionId, TransactionStatus>,
    sequence: Sequence,
    events: Vec<DomainEvent>,
}

/// Staged changes of one business operation.
pub(crate) struct UnitOfWork<'a> {
    journal: &'a Journal,
    pub config: LedgerConfig,
    pub now: DateTime<Utc>,
    pub profiles: Staged<'a, UserId, UserProfile>,
    pub wallets: Staged<'a, UserId, Wallet>,
    pub projects: Staged<'a, ProjectId, Project>,
    pub plots: Staged<'a, PlotId, Plot>,
    pub investments: Staged<'a, InvestmentId, Investment>,
    pub sales: Staged<'a, SaleId, Sale>,
    pub profits: Staged<'a, ProfitId, Profit>,
    pub reinvestments: Staged<'a, ReinvestmentId, Reinvestment>,
    pub sequence: Sequence,
    rows: Vec<TransactionRecord>,
    status_changes: BTreeMap<TransactionId, TransactionStatus>,
    events: Vec<DomainEvent>,
}

impl<'a> UnitOfWork<'a> {
    pub fn new(books: &'a Books, config: LedgerConfig) -> Self {
        Self {
            journal: &books.journal,
            config,
            now: Utc::now(),
            profiles: Staged::new(&books.profiles),
            wallets: Staged::new(&books.wallets),
            projects: Staged::new(&books.projects),
            plots: Staged::new(&books.plots),
            investments: Staged::new(&books.investments),
            sales: Staged::new(&books.sales),
            profits: Staged::new(&books.profits),
            reinvestments: Staged::new(&books.reinvestments),
            sequence: books.sequence,
            rows: Vec::new(),
            status_changes: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    pub fn into_changes(self) -> Changes {
        Changes {
            profiles: self.profiles.into_changes(),
            wallets: self.wallets.into_changes(),
            projects: self.projects.into_changes(),
            plots: self.plots.into_changes(),
            investments: self.investments.into_changes(),
            sales: self.sales.into_changes(),
            profits: self.profits.into_changes(),
            reinvestments: self.reinvestments.into_changes(),
            rows: self.rows,
            status_changes: self.status_changes,
            sequence: self.sequence,
            events: self.events,
        }
    }

    pub fn emit(&mut self, event: DomainEvent) {
        self.events.push(event);
    }

    pub fn profile(&self, user: UserId) -> Result<&UserProfile, LedgerError> {
        self.profiles
            .get(user)
            .ok_or_else(|| LedgerError::not_found(EntityKind::User, user))
    }

    pub fn wallet(&self, user: UserId) -> Result<&Wallet, LedgerError> {
        self.wallets
            .get(user)
            .ok_or_else(|| LedgerError::not_found(EntityKind::Wallet, user))
    }

    pub fn investment(&self, id: InvestmentId) -> Result<&Investment, LedgerError> {
        self.investments
            .get(id)
            .ok_or_else(|| LedgerError::not_found(EntityKind::Investment, id))
    }

    pub fn project(&self, id: ProjectId) -> Result<&Project, LedgerError> {
        self.projects
            .get(id)
            .ok_or_else(|| LedgerError::not_found(EntityKind::Project, id))
    }

    pub fn plot(&self, id: PlotId) -> Result<&Plot, LedgerError> {
        self.plots
            .get(id)
            .ok_or_else(|| LedgerError::not_found(EntityKind::Plot, id))
    }

    pub fn sale(&self, id: SaleId) -> Result<&Sale, LedgerError> {
        self.sales
            .get(id)
            .ok_or_else(|| LedgerError::not_found(EntityKind::Sale, id))
    }

    pub fn sale_mut(&mut self, id: SaleId) -> Result<&mut Sale, LedgerError> {
        self.sales
            .get_mut(id)
            .ok_or_else(|| LedgerError::not_found(EntityKind::Sale, id))
    }

    pub fn profit(&self, id: ProfitId) -> Result<&Profit, LedgerError> {
        self.profits
            .get(id)
            .ok_or_else(|| LedgerError::not_found(EntityKind::Profit, id))
    }

    pub fn profit_mut(&mut self, id: ProfitId) -> Result<&mut Profit, LedgerError> {
        self.profits
            .get_mut(id)
            .ok_or_else(|| LedgerError::not_found(EntityKind::Profit, id))
    }

    pub fn reinvestment_mut(
        &mut self,
        id: ReinvestmentId,
    ) -> Result<&mut Reinvestment, LedgerError> {
        self.reinvestments
            .get_mut(id)
            .ok_or_else(|| LedgerError::not_found(EntityKind::Reinvestment, id))
    }

    fn ensure_unique_reference(&self, reference: &str) -> Result<(), LedgerError> {
        if self.journal.contains_reference(reference)
            || self.rows.iter().any(|row| row.reference == reference)
        {
            return Err(LedgerError::DuplicateReference(reference.to_string()));
        }
        Ok(())
    }

    /// Apply `movement` to the user's wallet and record it in the transaction log.
    pub fn post(
        &mut self,
        user: UserId,
        movement: Movement,
        entry: Entry,
    ) -> Result<TransactionId, LedgerError> {
        let reference = match entry.reference {
            Some(reference) => {
                self.ensure_unique_reference(&reference)?;
                reference
            }
            None => entry.kind.new_reference(),
        };

        let wallet = self
            .wallets
            .get_mut(user)
            .ok_or_else(|| LedgerError::not_found(EntityKind::Wallet, user))?;
        let snapshot = movement.apply(wallet)?;
        let wallet_id = wallet.id();

        let id = self.journal.next_id() + self.rows.len() as TransactionId;
        self.rows.push(TransactionRecord {
            id,
            user,
            wallet: wallet_id,
            kind: entry.kind,
            amount: movement.amount(),
            balance_before: snapshot.before,
            balance_after: snapshot.after,
            reference,
            investment_id: entry.investment,
            profit_id: entry.profit,
            reinvestment_id: entry.reinvestment,
            status: entry.status,
            description: entry.description,
            created_at: self.now,
        });
        Ok(id)
    }

    pub fn row(&self, id: TransactionId) -> Option<&TransactionRecord> {
        self.rows
            .iter()
            .find(|row| row.id == id)
            .or_else(|| self.journal.get(id))
    }

    /// Reference code of a row, staged or committed.
    pub fn reference_of(&self, id: TransactionId) -> Result<String, LedgerError> {
        self.row(id)
            .map(|row| row.reference.clone())
            .ok_or_else(|| LedgerError::not_found(EntityKind::Transaction, id))
    }

    pub fn row_status(&self, id: TransactionId) -> Option<TransactionStatus> {
        if let Some(status) = self.status_changes.get(&id) {
            return Some(*status);
        }
        self.row(id).map(|row| row.status)
    }

    /// Settle a pending row as completed or rejected.
    pub fn settle_row(
        &mut self,
        id: TransactionId,
        status: TransactionStatus,
    ) -> Result<(), LedgerError> {
        let current = self
            .row_status(id)
            .ok_or_else(|| LedgerError::not_found(EntityKind::Transaction, id))?;
        if current != TransactionStatus::Pending || status == TransactionStatus::Pending {
            return Err(invalid_transition(
                EntityKind::Transaction,
                id,
                current.as_str(),
                "settle",
            ));
        }

        match self.rows.iter_mut().find(|row| row.id == id) {
            Some(row) => row.status = status,
            None => {
                self.status_changes.insert(id, status);
            }
        }
        Ok(())
    }
}
