//! Investment ledger engine.
//!
//! The engine keeps wallets, the transaction log, investments, profits and
//! reinvestments consistent with each other. Every public operation runs as
//! one unit of work: it either commits all of its changes or none of them.
//! Also supports replaying an async stream of [`Command`]s.

use std::sync::Arc;

use tokio_stream::{Stream, StreamExt};
use tracing::info;

use crate::Amount;
use crate::config::{LedgerConfig, SettingsSource};
use crate::model::{Command, SYSTEM_USER, TransactionId, UserId, WalletId};

mod books;
use books::{Books, Entry, Movement, UnitOfWork};

mod catalog;
pub use catalog::{Plot, PlotStatus, Project, ProjectStatus, Sale, SaleRequest, SaleStatus};

mod eligibility;
pub use eligibility::{UserProfile, check_eligibility};

mod error;
pub use error::{BulkReport, EntityKind, HoldKind, LedgerError};

mod events;
pub use events::{DomainEvent, EventSink, LogSink, MemorySink};

mod investment;
pub use investment::{
    Allocation, Funding, Investment, InvestmentAction, InvestmentRequest, InvestmentStatus,
    InvestmentType, PlotHolding,
};

mod journal;
pub use journal::{Journal, TransactionRecord, TransactionStatus, TransactionType};

mod profit;
pub use profit::{
    CalculationMode, DistributionStatus, Profit, ProfitBreakdown, ProfitReinvestmentStatus,
    calculate_profit,
};

mod reinvest;
pub use reinvest::{ReinvestRequest, Reinvestment, ReinvestmentStatus, auto_reinvest_percentage};

mod wallet;
pub use wallet::{Wallet, WalletStatus};

use error::invalid_transition;
use wallet::DebitKind;

/// Engine handle shared between tasks. The mutex serializes operations, so
/// no two of them can observe the same available balance.
pub type SharedEngine = Arc<tokio::sync::Mutex<Engine>>;

/// The ledger engine.
pub struct Engine {
    books: Books,
    settings: Box<dyn SettingsSource>,
    sink: Box<dyn EventSink>,
}

/// Result of comparing a wallet with its transaction rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub user: UserId,
    pub balance: Amount,
    /// Sum of the balance changes recorded in the wallet's rows.
    pub journal_total: Amount,
    pub frozen_amount: Amount,
    pub pending_amount: Amount,
    pub rows: usize,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.balance == self.journal_total
            && self.frozen_amount >= Amount::ZERO
            && self.pending_amount >= Amount::ZERO
            && self.frozen_amount + self.pending_amount <= self.balance
    }
}

/// Public API
impl Engine {
    /// Engine with the default settings, logging its events.
    pub fn new() -> Self {
        Self::with_settings(LedgerConfig::default())
    }

    /// Engine reading its settings from `settings` at the start of every operation.
    pub fn with_settings(settings: impl SettingsSource + 'static) -> Self {
        Self {
            books: Books::default(),
            settings: Box::new(settings),
            sink: Box::new(LogSink),
        }
    }

    /// Replace the event sink.
    pub fn with_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn into_shared(self) -> SharedEngine {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    /// Current settings snapshot.
    pub fn config(&self) -> LedgerConfig {
        self.settings.snapshot()
    }

    /// Run the engine over the given command stream
    pub async fn run(&mut self, mut stream: impl Stream<Item = Command> + Unpin) {
        while let Some(command) = stream.next().await {
            // a failed command is logged by its operation and must not stop the engine
            let _ = self.apply(command);
        }
    }

    /// Apply a single command on top of the current state
    pub fn apply(&mut self, command: Command) -> Result<(), LedgerError> {
        match command {
            Command::Register { user } => {
                self.register_user(user, UserProfile::verified())?;
            }
            Command::PayFee { user, amount } => {
                self.pay_registration_fee(user, amount)?;
            }
            Command::Deposit { user, amount } => {
                let tx = self.request_deposit(user, amount)?;
                self.confirm_deposit(tx)?;
            }
            Command::Withdraw { user, amount } => {
                self.withdraw(user, amount)?;
            }
            Command::AddProject { name } => {
                self.add_project(name)?;
            }
            Command::AddPlot { project, price } => {
                self.add_plot(project, price)?;
            }
            Command::Invest {
                user,
                project,
                amount,
            } => {
                self.create_investment(InvestmentRequest::project(user, project, amount), user)?;
            }
            Command::Approve { investment } => {
                self.approve_investment(investment, SYSTEM_USER)?;
            }
            Command::Cancel { investment } => {
                self.cancel_investment(investment, SYSTEM_USER)?;
            }
            Command::Sale {
                investment,
                sale_price,
            } => {
                let sale = self.record_sale(SaleRequest::new(investment, sale_price), SYSTEM_USER)?;
                self.complete_sale(sale)?;
                self.calculate_sale_profit(sale, CalculationMode::Standard, SYSTEM_USER)?;
            }
            Command::Distribute { profit } => {
                self.distribute_profit(profit)?;
            }
            Command::Reinvest {
                profit,
                project,
                amount,
            } => {
                self.reinvest(
                    ReinvestRequest::into_project(profit, project, amount),
                    SYSTEM_USER,
                )?;
            }
            Command::AutoReinvest { profit, project } => {
                self.auto_reinvest(profit, project, SYSTEM_USER)?;
            }
        }
        Ok(())
    }

    /// Register a user and open their wallet.
    pub fn register_user(
        &mut self,
        user: UserId,
        profile: UserProfile,
    ) -> Result<WalletId, LedgerError> {
        let result = self.atomically(|uow| {
            if uow.profiles.contains(user) {
                return Err(LedgerError::InvalidInput(format!(
                    "user {user} is already registered"
                )));
            }
            let wallet = uow.sequence.next_wallet();
            uow.profiles.insert(user, profile);
            uow.wallets.insert(user, Wallet::new(wallet, user));
            Ok(wallet)
        });
        Self::log_result("registration", u64::from(user), None, &result);
        result
    }

    /// Replace what the collaborators report about a user. The registration
    /// fee paid so far is tracked by the ledger and kept.
    pub fn update_profile(&mut self, user: UserId, profile: UserProfile) -> Result<(), LedgerError> {
        let result = self.atomically(|uow| {
            let current = uow
                .profiles
                .get_mut(user)
                .ok_or_else(|| LedgerError::not_found(EntityKind::User, user))?;
            *current = UserProfile {
                registration_fee_paid: current.registration_fee_paid,
                ..profile
            };
            Ok(())
        });
        Self::log_result("profile update", u64::from(user), None, &result);
        result
    }

    pub fn set_wallet_status(
        &mut self,
        user: UserId,
        status: WalletStatus,
    ) -> Result<(), LedgerError> {
        let result = self.atomically(|uow| {
            uow.wallets
                .get_mut(user)
                .ok_or_else(|| LedgerError::not_found(EntityKind::Wallet, user))?
                .set_status(status);
            Ok(())
        });
        Self::log_result("wallet status change", u64::from(user), None, &result);
        result
    }

    /// Book an incoming deposit as pending: it counts towards the balance
    /// but is not available until confirmed.
    pub fn request_deposit(
        &mut self,
        user: UserId,
        amount: Amount,
    ) -> Result<TransactionId, LedgerError> {
        let result = self.atomically(|uow| {
            let transaction = uow.post(
                user,
                Movement::AddPending(amount),
                Entry::new(TransactionType::Deposit).pending(),
            )?;
            uow.emit(DomainEvent::DepositRequested {
                user,
                transaction,
                amount,
            });
            Ok(transaction)
        });
        Self::log_result("deposit request", u64::from(user), Some(amount), &result);
        result
    }

    /// Confirm a pending deposit, making its funds available.
    pub fn confirm_deposit(&mut self, transaction: TransactionId) -> Result<Wallet, LedgerError> {
        let result = self.settle_deposit(transaction, true);
        Self::log_result("deposit confirmation", transaction, None, &result);
        result
    }

    /// Reject a pending deposit. The funds leave the balance through a
    /// compensating row and the original row is marked rejected.
    pub fn reject_deposit(&mut self, transaction: TransactionId) -> Result<Wallet, LedgerError> {
        let result = self.settle_deposit(transaction, false);
        Self::log_result("deposit rejection", transaction, None, &result);
        result
    }

    pub fn withdraw(&mut self, user: UserId, amount: Amount) -> Result<TransactionId, LedgerError> {
        let result = self.atomically(|uow| {
            let transaction = uow.post(
                user,
                Movement::Debit(amount, DebitKind::Withdrawal),
                Entry::new(TransactionType::Withdrawal),
            )?;
            uow.emit(DomainEvent::WithdrawalProcessed {
                user,
                transaction,
                amount,
            });
            Ok(transaction)
        });
        Self::log_result("withdrawal", u64::from(user), Some(amount), &result);
        result
    }

    /// Pay (part of) the registration fee from the wallet. Returns the total
    /// fee paid so far.
    pub fn pay_registration_fee(
        &mut self,
        user: UserId,
        amount: Amount,
    ) -> Result<Amount, LedgerError> {
        let result = self.atomically(|uow| {
            uow.post(
                user,
                Movement::Debit(amount, DebitKind::RegistrationFee),
                Entry::new(TransactionType::RegistrationFee),
            )?;
            let profile = uow
                .profiles
                .get_mut(user)
                .ok_or_else(|| LedgerError::not_found(EntityKind::User, user))?;
            profile.registration_fee_paid += amount;
            let paid = profile.registration_fee_paid;
            uow.emit(DomainEvent::RegistrationFeePaid { user, amount });
            Ok(paid)
        });
        Self::log_result("registration fee", u64::from(user), Some(amount), &result);
        result
    }

    /// Return the state of all wallets, in user order.
    pub fn wallets(&self) -> impl Iterator<Item = &Wallet> + '_ {
        self.books.wallets.values()
    }

    pub fn wallet(&self, user: UserId) -> Option<&Wallet> {
        self.books.wallets.get(&user)
    }

    pub fn profile(&self, user: UserId) -> Option<&UserProfile> {
        self.books.profiles.get(&user)
    }

    pub fn journal(&self) -> &Journal {
        &self.books.journal
    }

    pub fn transaction(&self, id: TransactionId) -> Option<&TransactionRecord> {
        self.books.journal.get(id)
    }

    /// Look up a row by its reference, e.g. to detect a retried request.
    pub fn transaction_by_reference(&self, reference: &str) -> Option<&TransactionRecord> {
        self.books.journal.by_reference(reference)
    }

    /// Rows of a user's wallet in the order they were written.
    pub fn transactions_for(&self, user: UserId) -> impl Iterator<Item = &TransactionRecord> + '_ {
        self.books.journal.iter().filter(move |row| row.user == user)
    }

    /// Replay a wallet's rows and compare them with its balance and holds.
    pub fn reconcile(&self, user: UserId) -> Result<Reconciliation, LedgerError> {
        let wallet = self
            .wallet(user)
            .ok_or_else(|| LedgerError::not_found(EntityKind::Wallet, user))?;
        let rows: Vec<&TransactionRecord> = self.books.journal.for_wallet(wallet.id()).collect();
        Ok(Reconciliation {
            user,
            balance: wallet.balance(),
            journal_total: rows.iter().map(|row| row.delta()).sum(),
            frozen_amount: wallet.frozen_amount(),
            pending_amount: wallet.pending_amount(),
            rows: rows.len(),
        })
    }
}

/// Private API
impl Engine {
    /// Run `op` as one unit of work against a fresh settings snapshot.
    /// Staged changes are committed and their events published only on success.
    fn atomically<T>(
        &mut self,
        op: impl FnOnce(&mut UnitOfWork<'_>) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let config = self.settings.snapshot();
        let mut uow = UnitOfWork::new(&self.books, config);
        let value = op(&mut uow)?;
        let changes = uow.into_changes();

        let events = self.books.commit(changes);
        for event in &events {
            self.sink.publish(event);
        }
        Ok(value)
    }

    /// Small helper to log operation results
    fn log_result<T, E: std::fmt::Display>(
        operation: &str,
        subject: u64,
        amount: Option<Amount>,
        result: &Result<T, E>,
    ) {
        match (result, amount) {
            (Ok(_), Some(amt)) => {
                info!(subject = %subject, amount = %amt, "{operation} applied");
            }
            (Ok(_), None) => {
                info!(subject = %subject, "{operation} applied");
            }
            (Err(e), Some(amt)) => {
                info!(
                    subject = %subject,
                    amount = %amt,
                    reason = %e,
                    "{operation} skipped"
                );
            }
            (Err(e), None) => {
                info!(subject = %subject, reason = %e, "{operation} skipped");
            }
        }
    }

    fn settle_deposit(
        &mut self,
        transaction: TransactionId,
        confirmed: bool,
    ) -> Result<Wallet, LedgerError> {
        self.atomically(|uow| {
            let row = uow
                .row(transaction)
                .cloned()
                .ok_or_else(|| LedgerError::not_found(EntityKind::Transaction, transaction))?;
            if row.kind != TransactionType::Deposit {
                return Err(invalid_transition(
                    EntityKind::Transaction,
                    transaction,
                    row.kind.as_str(),
                    "settle deposit",
                ));
            }

            let (movement, status, description) = if confirmed {
                (
                    Movement::ConfirmPending(row.amount),
                    TransactionStatus::Completed,
                    format!("confirms {}", row.reference),
                )
            } else {
                (
                    Movement::RejectPending(row.amount),
                    TransactionStatus::Rejected,
                    format!("reverses {}", row.reference),
                )
            };
            uow.settle_row(transaction, status)?;
            uow.post(
                row.user,
                movement,
                Entry::new(TransactionType::Deposit).describe(description),
            )?;

            let event = if confirmed {
                DomainEvent::DepositConfirmed {
                    user: row.user,
                    transaction,
                    amount: row.amount,
                }
            } else {
                DomainEvent::DepositRejected {
                    user: row.user,
                    transaction,
                    amount: row.amount,
                }
            };
            uow.emit(event);
            Ok(uow.wallet(row.user)?.clone())
        })
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
