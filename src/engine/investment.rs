//! Investment lifecycle.
//!
//! ```text
//! pending ──approve──> active ──complete──> completed
//!    │  └──modify──> pending_approval ──approve──> active
//!    └──cancel──> cancelled <──cancel──┘
//! ```
//!
//! A directly created investment is funded by a freeze on the wallet, which
//! approval turns into a debit. An investment spawned by a reinvestment is
//! funded by a debit that already happened, so approval moves no money and
//! cancellation refunds it.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::warn;

use crate::model::{
    InvestmentId, PlotId, ProjectId, ReinvestmentId, TransactionId, UserId,
};
use crate::{Amount, Percent};

use super::Engine;
use super::books::{Entry, Movement, UnitOfWork};
use super::eligibility::check_eligibility;
use super::error::{BulkReport, EntityKind, LedgerError, invalid_transition};
use super::events::DomainEvent;
use super::journal::{TransactionStatus, TransactionType};
use super::reinvest::ReinvestmentStatus;
use super::wallet::{CreditKind, DebitKind, ensure_positive};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestmentType {
    Project,
    Plot,
    Mixed,
    Reinvestment,
    AutoReinvestment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestmentStatus {
    Pending,
    PendingApproval,
    Active,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvestmentAction {
    Approve,
    Modify,
    Cancel,
    Complete,
}

impl InvestmentAction {
    fn as_str(&self) -> &'static str {
        match self {
            InvestmentAction::Approve => "approve",
            InvestmentAction::Modify => "modify",
            InvestmentAction::Cancel => "cancel",
            InvestmentAction::Complete => "complete",
        }
    }
}

impl InvestmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvestmentStatus::Pending => "pending",
            InvestmentStatus::PendingApproval => "pending_approval",
            InvestmentStatus::Active => "active",
            InvestmentStatus::Completed => "completed",
            InvestmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InvestmentStatus::Completed | InvestmentStatus::Cancelled
        )
    }

    /// The only table of legal investment transitions.
    pub fn next(self, action: InvestmentAction) -> Option<InvestmentStatus> {
        use InvestmentAction as A;
        use InvestmentStatus as S;

        match (self, action) {
            (S::Pending | S::PendingApproval, A::Approve) => Some(S::Active),
            (S::Pending, A::Modify) => Some(S::PendingApproval),
            (S::Pending | S::PendingApproval, A::Cancel) => Some(S::Cancelled),
            (S::Active, A::Complete) => Some(S::Completed),
            _ => None,
        }
    }
}

/// How the investment's amount is held in the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Funding {
    /// Frozen in the wallet until approval debits it.
    Frozen,
    /// Already debited from the wallet.
    Debited,
}

/// Part of an investment allocated to one plot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotHolding {
    pub plot: PlotId,
    pub amount_invested: Amount,
    pub percentage_owned: Percent,
}

#[derive(Debug, Clone, Serialize)]
pub struct Investment {
    pub id: InvestmentId,
    pub user: UserId,
    pub project: Option<ProjectId>,
    pub amount: Amount,
    pub investment_type: InvestmentType,
    pub status: InvestmentStatus,
    pub funding: Funding,
    pub holdings: Vec<PlotHolding>,
    pub expected_return: Amount,
    pub return_rate: Percent,
    pub actual_return: Option<Amount>,
    pub maturity_date: DateTime<Utc>,
    pub auto_reinvest: bool,
    pub reinvest_percentage: Percent,
    /// Investment whose profit funded this one.
    pub source_investment_id: Option<InvestmentId>,
    /// Reinvestments made from this investment's profits.
    pub reinvestment_count: u32,
    pub reinvestment_id: Option<ReinvestmentId>,
    /// Row written when the investment was funded.
    pub transaction_id: TransactionId,
    pub reference: String,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub approved_by: Option<UserId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Investment {
    /// Move to the state `action` leads to, returning the previous state.
    pub(crate) fn transition(
        &mut self,
        action: InvestmentAction,
    ) -> Result<InvestmentStatus, LedgerError> {
        let next = self.status.next(action).ok_or_else(|| {
            invalid_transition(
                EntityKind::Investment,
                self.id,
                self.status.as_str(),
                action.as_str(),
            )
        })?;
        Ok(std::mem::replace(&mut self.status, next))
    }

    pub fn allocated(&self) -> Amount {
        self.holdings.iter().map(|h| h.amount_invested).sum()
    }
}

/// Requested allocation of part of an investment to one plot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Allocation {
    pub plot: PlotId,
    pub amount: Amount,
}

impl Allocation {
    pub fn new(plot: PlotId, amount: Amount) -> Self {
        Self { plot, amount }
    }
}

/// Input of [`Engine::create_investment`].
#[derive(Debug, Clone)]
pub struct InvestmentRequest {
    pub user: UserId,
    pub amount: Amount,
    pub project: Option<ProjectId>,
    pub allocations: Vec<Allocation>,
    pub auto_reinvest: bool,
    pub reinvest_percentage: Percent,
    /// Caller-chosen reference, used to detect retried requests.
    pub reference: Option<String>,
}

impl InvestmentRequest {
    pub fn project(user: UserId, project: ProjectId, amount: Amount) -> Self {
        Self {
            user,
            amount,
            project: Some(project),
            allocations: Vec::new(),
            auto_reinvest: false,
            reinvest_percentage: Percent::ZERO,
            reference: None,
        }
    }

    pub fn plots(user: UserId, amount: Amount, allocations: Vec<Allocation>) -> Self {
        Self {
            project: None,
            allocations,
            ..Self::project(user, 0, amount)
        }
    }

    pub fn with_project(mut self, project: ProjectId) -> Self {
        self.project = Some(project);
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_auto_reinvest(mut self, percentage: Percent) -> Self {
        self.auto_reinvest = true;
        self.reinvest_percentage = percentage;
        self
    }
}

/// Turn allocations into holdings whose amounts sum to `amount` exactly and
/// whose ownership percentages sum to 100.
pub(crate) fn build_holdings(
    amount: Amount,
    allocations: &[Allocation],
) -> Result<Vec<PlotHolding>, LedgerError> {
    if allocations.is_empty() {
        return Ok(Vec::new());
    }

    let mut seen = BTreeSet::new();
    for allocation in allocations {
        ensure_positive(allocation.amount)?;
        if !seen.insert(allocation.plot) {
            return Err(LedgerError::InvalidInput(format!(
                "plot {} is allocated more than once",
                allocation.plot
            )));
        }
    }

    let allocated: Amount = allocations.iter().map(|a| a.amount).sum();
    if allocated != amount {
        return Err(LedgerError::AllocationMismatch {
            expected: amount,
            allocated,
        });
    }

    let mut holdings: Vec<PlotHolding> = allocations
        .iter()
        .map(|a| PlotHolding {
            plot: a.plot,
            amount_invested: a.amount,
            percentage_owned: a.amount.share_of(amount),
        })
        .collect();

    // rounding residue goes to the last holding
    let assigned: Percent = holdings[..holdings.len() - 1]
        .iter()
        .map(|h| h.percentage_owned)
        .sum();
    if let Some(last) = holdings.last_mut() {
        last.percentage_owned = Percent::HUNDRED - assigned;
    }

    Ok(holdings)
}

fn investment_type(
    project: Option<ProjectId>,
    holdings: &[PlotHolding],
) -> Result<InvestmentType, LedgerError> {
    match (project, holdings.is_empty()) {
        (Some(_), true) => Ok(InvestmentType::Project),
        (None, false) => Ok(InvestmentType::Plot),
        (Some(_), false) => Ok(InvestmentType::Mixed),
        (None, true) => Err(LedgerError::InvalidInput(
            "an investment needs a project or plot allocations".to_string(),
        )),
    }
}

/// Check the project is open and every plot is available (and inside the
/// project when one is given). Returns the project the investment belongs to.
pub(crate) fn validate_targets(
    uow: &UnitOfWork<'_>,
    project: Option<ProjectId>,
    holdings: &[PlotHolding],
) -> Result<Option<ProjectId>, LedgerError> {
    if let Some(project_id) = project {
        if !uow.project(project_id)?.is_open() {
            return Err(invalid_transition(
                EntityKind::Project,
                project_id,
                "closed",
                "invest",
            ));
        }
    }

    let mut plot_projects = BTreeSet::new();
    for holding in holdings {
        let plot = uow.plot(holding.plot)?;
        if !plot.is_available() {
            return Err(LedgerError::PlotUnavailable(plot.id));
        }
        if let Some(project_id) = project {
            if plot.project != project_id {
                return Err(LedgerError::InvalidInput(format!(
                    "plot {} does not belong to project {project_id}",
                    plot.id
                )));
            }
        }
        plot_projects.insert(plot.project);
    }

    match project {
        Some(_) => Ok(project),
        None if plot_projects.len() == 1 => Ok(plot_projects.first().copied()),
        None => Ok(None),
    }
}

pub(crate) fn maturity_date(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now + Duration::days(i64::from(days))
}

fn ensure_minimum(amount: Amount, uow: &UnitOfWork<'_>) -> Result<(), LedgerError> {
    ensure_positive(amount)?;
    if amount < uow.config.min_investment {
        return Err(LedgerError::InvalidInput(format!(
            "amount {amount} is below the minimum investment {}",
            uow.config.min_investment
        )));
    }
    Ok(())
}

impl Engine {
    /// Create a pending investment, freezing its amount in the user's wallet.
    ///
    /// Validation (amount, allocations, targets, eligibility) runs before
    /// anything is staged.
    pub fn create_investment(
        &mut self,
        request: InvestmentRequest,
        actor: UserId,
    ) -> Result<Investment, LedgerError> {
        let user = request.user;
        let amount = request.amount;
        let result = self.atomically(|uow| {
            ensure_minimum(amount, uow)?;
            if !request.reinvest_percentage.is_valid_share() {
                return Err(LedgerError::InvalidInput(format!(
                    "reinvest percentage {} is outside 0..=100",
                    request.reinvest_percentage
                )));
            }
            let holdings = build_holdings(amount, &request.allocations)?;
            let investment_type = investment_type(request.project, &holdings)?;
            let project = validate_targets(uow, request.project, &holdings)?;

            let reasons = check_eligibility(
                uow.profile(user)?,
                uow.wallet(user)?.available(),
                &uow.config,
            );
            if !reasons.is_empty() {
                return Err(LedgerError::IneligibleUser { user, reasons });
            }

            let id = uow.sequence.next_investment();
            let transaction_id = uow.post(
                user,
                Movement::Freeze(amount),
                Entry::new(TransactionType::Investment)
                    .pending()
                    .reference(request.reference.clone())
                    .investment(id),
            )?;
            let reference = uow.reference_of(transaction_id)?;

            let return_rate = uow.config.default_return_rate;
            let investment = Investment {
                id,
                user,
                project,
                amount,
                investment_type,
                status: InvestmentStatus::Pending,
                funding: Funding::Frozen,
                holdings,
                expected_return: amount.percent(return_rate),
                return_rate,
                actual_return: None,
                maturity_date: maturity_date(uow.now, uow.config.maturity_days),
                auto_reinvest: request.auto_reinvest,
                reinvest_percentage: request.reinvest_percentage,
                source_investment_id: None,
                reinvestment_count: 0,
                reinvestment_id: None,
                transaction_id,
                reference,
                created_by: actor,
                created_at: uow.now,
                approved_by: None,
                approved_at: None,
                cancelled_at: None,
                completed_at: None,
            };
            uow.investments.insert(id, investment.clone());
            uow.emit(DomainEvent::InvestmentCreated {
                investment: id,
                user,
                amount,
            });
            Ok(investment)
        });
        Self::log_result("investment creation", u64::from(user), Some(amount), &result);
        result
    }

    /// Change the amount (and allocations) of a pending investment. The hold
    /// is adjusted by the difference and the investment waits for a second
    /// approval. Without new allocations the existing ones are kept and must
    /// still add up to the new amount.
    pub fn modify_investment(
        &mut self,
        id: InvestmentId,
        amount: Amount,
        allocations: Option<Vec<Allocation>>,
    ) -> Result<Investment, LedgerError> {
        let result = self.atomically(|uow| {
            let mut investment = uow.investment(id)?.clone();
            investment.transition(InvestmentAction::Modify)?;
            if investment.funding != Funding::Frozen {
                return Err(invalid_transition(
                    EntityKind::Investment,
                    id,
                    "funded by a reinvestment",
                    "modify",
                ));
            }
            ensure_minimum(amount, uow)?;

            let allocations = allocations.unwrap_or_else(|| {
                investment
                    .holdings
                    .iter()
                    .map(|h| Allocation::new(h.plot, h.amount_invested))
                    .collect()
            });
            let holdings = build_holdings(amount, &allocations)?;
            investment_type(investment.project, &holdings)?;
            validate_targets(uow, investment.project, &holdings)?;

            let previous_amount = investment.amount;
            let entry = Entry::new(TransactionType::Investment)
                .investment(id)
                .describe("hold adjusted by modification");
            if amount > previous_amount {
                uow.post(
                    investment.user,
                    Movement::Freeze(amount - previous_amount),
                    entry,
                )?;
            } else if amount < previous_amount {
                uow.post(
                    investment.user,
                    Movement::Unfreeze(previous_amount - amount),
                    entry,
                )?;
            }

            if !holdings.is_empty() && investment.investment_type == InvestmentType::Project {
                investment.investment_type = InvestmentType::Mixed;
            }
            investment.amount = amount;
            investment.holdings = holdings;
            investment.expected_return = amount.percent(investment.return_rate);
            uow.investments.insert(id, investment.clone());
            uow.emit(DomainEvent::InvestmentModified {
                investment: id,
                previous_amount,
                amount,
            });
            Ok(investment)
        });
        Self::log_result("investment modification", id, Some(amount), &result);
        result
    }

    /// Activate a pending investment. Frozen funds are debited and the
    /// creation row is completed.
    pub fn approve_investment(
        &mut self,
        id: InvestmentId,
        approver: UserId,
    ) -> Result<Investment, LedgerError> {
        let result = self.atomically(|uow| {
            let mut investment = uow.investment(id)?.clone();
            investment.transition(InvestmentAction::Approve)?;

            if investment.funding == Funding::Frozen {
                uow.post(
                    investment.user,
                    Movement::DebitFrozen(investment.amount, DebitKind::Investment),
                    Entry::new(TransactionType::Investment)
                        .investment(id)
                        .describe("approved"),
                )?;
                uow.settle_row(investment.transaction_id, TransactionStatus::Completed)?;
                investment.funding = Funding::Debited;
            }

            investment.approved_by = Some(approver);
            investment.approved_at = Some(uow.now);
            uow.investments.insert(id, investment.clone());
            uow.emit(DomainEvent::InvestmentApproved {
                investment: id,
                approved_by: approver,
            });
            Ok(investment)
        });
        Self::log_result("investment approval", id, None, &result);
        result
    }

    /// Approve each investment in its own unit of work.
    pub fn bulk_approve(
        &mut self,
        ids: &[InvestmentId],
        approver: UserId,
    ) -> BulkReport<InvestmentId> {
        let mut report = BulkReport::new();
        for &id in ids {
            match self.approve_investment(id, approver) {
                Ok(_) => report.succeeded.push(id),
                Err(e) => {
                    warn!(investment = id, reason = %e, "bulk approval item failed");
                    report.failed.push((id, e));
                }
            }
        }
        report
    }

    /// Cancel an investment that is not yet active.
    ///
    /// A frozen hold is released; a debited amount is refunded. Cancelling an
    /// investment spawned by a reinvestment also cancels that reinvestment and
    /// returns the capacity to its profit.
    pub fn cancel_investment(
        &mut self,
        id: InvestmentId,
        actor: UserId,
    ) -> Result<Investment, LedgerError> {
        let result = self.atomically(|uow| {
            let mut investment = uow.investment(id)?.clone();
            investment.transition(InvestmentAction::Cancel)?;

            let entry = Entry::new(TransactionType::Refund)
                .investment(id)
                .describe(format!("cancelled by user {actor}"));
            match investment.funding {
                Funding::Frozen => {
                    uow.post(investment.user, Movement::Unfreeze(investment.amount), entry)?;
                    uow.settle_row(investment.transaction_id, TransactionStatus::Rejected)?;
                }
                Funding::Debited => {
                    let entry = match investment.reinvestment_id {
                        Some(reinvestment) => entry.reinvestment(reinvestment),
                        None => entry,
                    };
                    uow.post(
                        investment.user,
                        Movement::Credit(investment.amount, CreditKind::Refund),
                        entry,
                    )?;
                }
            }

            if let Some(reinvestment_id) = investment.reinvestment_id {
                unwind_reinvestment(uow, reinvestment_id, investment.amount)?;
            }

            investment.cancelled_at = Some(uow.now);
            uow.investments.insert(id, investment.clone());
            uow.emit(DomainEvent::InvestmentCancelled {
                investment: id,
                refunded: investment.amount,
            });
            Ok(investment)
        });
        Self::log_result("investment cancellation", id, None, &result);
        result
    }

    /// Close an active investment, crediting its actual return.
    pub fn complete_investment(
        &mut self,
        id: InvestmentId,
        actual_return: Amount,
    ) -> Result<Investment, LedgerError> {
        let result = self.atomically(|uow| {
            if actual_return < Amount::ZERO {
                return Err(LedgerError::InvalidAmount(actual_return));
            }
            let mut investment = uow.investment(id)?.clone();
            investment.transition(InvestmentAction::Complete)?;

            if actual_return.is_positive() {
                uow.post(
                    investment.user,
                    Movement::Credit(actual_return, CreditKind::Profit),
                    Entry::new(TransactionType::Profit)
                        .investment(id)
                        .describe("investment return"),
                )?;
            }

            if let Some(reinvestment_id) = investment.reinvestment_id {
                let reinvestment = uow.reinvestment_mut(reinvestment_id)?;
                if reinvestment.status == ReinvestmentStatus::Active {
                    reinvestment.status = ReinvestmentStatus::Completed;
                }
            }

            investment.actual_return = Some(actual_return);
            investment.completed_at = Some(uow.now);
            uow.investments.insert(id, investment.clone());
            uow.emit(DomainEvent::InvestmentCompleted {
                investment: id,
                actual_return,
            });
            Ok(investment)
        });
        Self::log_result("investment completion", id, Some(actual_return), &result);
        result
    }

    pub fn investment(&self, id: InvestmentId) -> Option<&Investment> {
        self.books.investments.get(&id)
    }

    pub fn investments_for(&self, user: UserId) -> impl Iterator<Item = &Investment> + '_ {
        self.books
            .investments
            .values()
            .filter(move |investment| investment.user == user)
    }
}

/// Cancel the reinvestment behind a refunded investment and give the
/// amount back to the profit's reinvestment capacity.
fn unwind_reinvestment(
    uow: &mut UnitOfWork<'_>,
    reinvestment_id: ReinvestmentId,
    amount: Amount,
) -> Result<(), LedgerError> {
    let reinvestment = uow.reinvestment_mut(reinvestment_id)?;
    if reinvestment.status == ReinvestmentStatus::Completed {
        return Err(invalid_transition(
            EntityKind::Reinvestment,
            reinvestment_id,
            ReinvestmentStatus::Completed.as_str(),
            "unwind",
        ));
    }
    reinvestment.status = ReinvestmentStatus::Cancelled;
    if reinvestment.cancellation_reason.is_none() {
        reinvestment.cancellation_reason = Some("funded investment cancelled".to_string());
    }
    let profit_id = reinvestment.profit;
    uow.profit_mut(profit_id)?.release_reinvestment(amount);
    Ok(())
}
