//! Domain events handed to the audit/notification collaborator.
//!
//! Events are published only after the unit of work that produced them has
//! been committed. Formatting and delivery belong to the sink.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::info;

use crate::Amount;
use crate::model::{
    InvestmentId, PlotId, ProfitId, ReinvestmentId, SaleId, TransactionId, UserId,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    DepositRequested {
        user: UserId,
        transaction: TransactionId,
        amount: Amount,
    },
    DepositConfirmed {
        user: UserId,
        transaction: TransactionId,
        amount: Amount,
    },
    DepositRejected {
        user: UserId,
        transaction: TransactionId,
        amount: Amount,
    },
    WithdrawalProcessed {
        user: UserId,
        transaction: TransactionId,
        amount: Amount,
    },
    RegistrationFeePaid {
        user: UserId,
        amount: Amount,
    },
    InvestmentCreated {
        investment: InvestmentId,
        user: UserId,
        amount: Amount,
    },
    InvestmentModified {
        investment: InvestmentId,
        previous_amount: Amount,
        amount: Amount,
    },
    InvestmentApproved {
        investment: InvestmentId,
        approved_by: UserId,
    },
    InvestmentCancelled {
        investment: InvestmentId,
        refunded: Amount,
    },
    InvestmentCompleted {
        investment: InvestmentId,
        actual_return: Amount,
    },
    SaleCompleted {
        sale: SaleId,
        plot: Option<PlotId>,
    },
    ProfitCalculated {
        profit: ProfitId,
        sale: SaleId,
        total_profit: Amount,
        total_investor_share: Amount,
    },
    ProfitDistributed {
        profit: ProfitId,
        user: UserId,
        amount: Amount,
    },
    ProfitDistributionFailed {
        profit: ProfitId,
        reason: String,
    },
    ReinvestmentCreated {
        reinvestment: ReinvestmentId,
        profit: ProfitId,
        amount: Amount,
        investment: Option<InvestmentId>,
        automatic: bool,
    },
    ReinvestmentCancelled {
        reinvestment: ReinvestmentId,
        reason: String,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::DepositRequested { .. } => "deposit_requested",
            DomainEvent::DepositConfirmed { .. } => "deposit_confirmed",
            DomainEvent::DepositRejected { .. } => "deposit_rejected",
            DomainEvent::WithdrawalProcessed { .. } => "withdrawal_processed",
            DomainEvent::RegistrationFeePaid { .. } => "registration_fee_paid",
            DomainEvent::InvestmentCreated { .. } => "investment_created",
            DomainEvent::InvestmentModified { .. } => "investment_modified",
            DomainEvent::InvestmentApproved { .. } => "investment_approved",
            DomainEvent::InvestmentCancelled { .. } => "investment_cancelled",
            DomainEvent::InvestmentCompleted { .. } => "investment_completed",
            DomainEvent::SaleCompleted { .. } => "sale_completed",
            DomainEvent::ProfitCalculated { .. } => "profit_calculated",
            DomainEvent::ProfitDistributed { .. } => "profit_distributed",
            DomainEvent::ProfitDistributionFailed { .. } => "profit_distribution_failed",
            DomainEvent::ReinvestmentCreated { .. } => "reinvestment_created",
            DomainEvent::ReinvestmentCancelled { .. } => "reinvestment_cancelled",
        }
    }
}

/// Receives committed domain events.
pub trait EventSink: Send {
    fn publish(&self, event: &DomainEvent);
}

/// Default sink: one structured log line per event.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, event: &DomainEvent) {
        info!(event = event.name(), details = ?event, "domain event");
    }
}

/// Keeps every published event in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<DomainEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(DomainEvent::name).collect()
    }
}

impl EventSink for MemorySink {
    fn publish(&self, event: &DomainEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
