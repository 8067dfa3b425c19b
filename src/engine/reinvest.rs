//! Reinvestment of distributed profits, chosen by the investor or by the engine.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::config::LedgerConfig;
use crate::model::{InvestmentId, PlotId, ProfitId, ProjectId, ReinvestmentId, UserId};
use crate::{Amount, Percent};

use super::Engine;
use super::books::{Entry, Movement, UnitOfWork};
use super::error::{BulkReport, EntityKind, LedgerError, invalid_transition};
use super::events::DomainEvent;
use super::investment::{
    Allocation, Funding, Investment, InvestmentStatus, InvestmentType, PlotHolding,
    build_holdings, maturity_date, validate_targets,
};
use super::journal::TransactionType;
use super::wallet::{DebitKind, ensure_positive};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReinvestmentStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
}

impl ReinvestmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReinvestmentStatus::Pending => "pending",
            ReinvestmentStatus::Active => "active",
            ReinvestmentStatus::Completed => "completed",
            ReinvestmentStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Reinvestment {
    pub id: ReinvestmentId,
    pub profit: ProfitId,
    pub user: UserId,
    pub amount: Amount,
    pub status: ReinvestmentStatus,
    pub target_project: Option<ProjectId>,
    pub target_plot: Option<PlotId>,
    /// Investment produced by this reinvestment, if any.
    pub investment: Option<InvestmentId>,
    pub automatic: bool,
    pub cancellation_reason: Option<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

/// Input of [`Engine::reinvest`].
#[derive(Debug, Clone)]
pub struct ReinvestRequest {
    pub profit: ProfitId,
    pub amount: Amount,
    pub project: Option<ProjectId>,
    pub allocations: Vec<Allocation>,
    /// Whether to open a new investment with the reinvested funds.
    pub create_investment: bool,
}

impl ReinvestRequest {
    /// Reinvest into a project, opening a new investment.
    pub fn into_project(profit: ProfitId, project: ProjectId, amount: Amount) -> Self {
        Self {
            profit,
            amount,
            project: Some(project),
            allocations: Vec::new(),
            create_investment: true,
        }
    }

    /// Reinvest into specific plots, opening a new investment.
    pub fn into_plots(profit: ProfitId, amount: Amount, allocations: Vec<Allocation>) -> Self {
        Self {
            profit,
            amount,
            project: None,
            allocations,
            create_investment: true,
        }
    }

    /// Record the reinvestment without opening an investment.
    pub fn without_investment(mut self) -> Self {
        self.create_investment = false;
        self
    }
}

/// Where reinvested funds go.
struct Target {
    project: Option<ProjectId>,
    holdings: Vec<PlotHolding>,
    investment_type: Option<InvestmentType>,
}

/// Share of the investor's profit reinvested automatically: the source
/// investment's own percentage when it opted in, the configured one otherwise.
pub fn auto_reinvest_percentage(source: Option<&Investment>, config: &LedgerConfig) -> Percent {
    match source {
        Some(investment) if investment.auto_reinvest => investment.reinvest_percentage,
        _ => config.auto_reinvest_percentage,
    }
}

fn ensure_distributed(uow: &UnitOfWork<'_>, id: ProfitId) -> Result<(), LedgerError> {
    let profit = uow.profit(id)?;
    if !profit.is_distributed() {
        return Err(invalid_transition(
            EntityKind::Profit,
            id,
            profit.distribution_status.as_str(),
            "reinvest",
        ));
    }
    Ok(())
}

/// Debit the wallet, consume profit capacity and optionally open the
/// investment, all inside `uow`.
fn apply_reinvestment(
    uow: &mut UnitOfWork<'_>,
    profit_id: ProfitId,
    amount: Amount,
    target: Target,
    automatic: bool,
    actor: UserId,
) -> Result<Reinvestment, LedgerError> {
    ensure_positive(amount)?;
    uow.profit_mut(profit_id)?.consume_reinvestment(amount)?;
    let (user, source) = {
        let profit = uow.profit(profit_id)?;
        (profit.user, profit.investment)
    };

    let id = uow.sequence.next_reinvestment();
    let investment_id = target
        .investment_type
        .map(|_| uow.sequence.next_investment());

    let entry = Entry::new(TransactionType::Reinvestment)
        .profit(profit_id)
        .reinvestment(id);
    let entry = match investment_id {
        Some(investment) => entry.investment(investment),
        None => entry,
    };
    let transaction_id = uow.post(
        user,
        Movement::Debit(amount, DebitKind::Reinvestment),
        entry,
    )?;

    let target_plot = target.holdings.first().map(|h| h.plot);
    if let (Some(investment_id), Some(investment_type)) = (investment_id, target.investment_type) {
        let reference = uow.reference_of(transaction_id)?;
        let return_rate = uow.config.default_return_rate;
        uow.investments.insert(
            investment_id,
            Investment {
                id: investment_id,
                user,
                project: target.project,
                amount,
                investment_type,
                status: InvestmentStatus::Pending,
                funding: Funding::Debited,
                holdings: target.holdings,
                expected_return: amount.percent(return_rate),
                return_rate,
                actual_return: None,
                maturity_date: maturity_date(uow.now, uow.config.maturity_days),
                auto_reinvest: false,
                reinvest_percentage: Percent::ZERO,
                source_investment_id: Some(source),
                reinvestment_count: 0,
                reinvestment_id: Some(id),
                transaction_id,
                reference,
                created_by: actor,
                created_at: uow.now,
                approved_by: None,
                approved_at: None,
                cancelled_at: None,
                completed_at: None,
            },
        );
        uow.emit(DomainEvent::InvestmentCreated {
            investment: investment_id,
            user,
            amount,
        });
    }

    if let Some(source) = uow.investments.get_mut(source) {
        source.reinvestment_count += 1;
    }

    let reinvestment = Reinvestment {
        id,
        profit: profit_id,
        user,
        amount,
        status: ReinvestmentStatus::Active,
        target_project: target.project,
        target_plot,
        investment: investment_id,
        automatic,
        cancellation_reason: None,
        created_by: actor,
        created_at: uow.now,
    };
    uow.reinvestments.insert(id, reinvestment.clone());
    uow.emit(DomainEvent::ReinvestmentCreated {
        reinvestment: id,
        profit: profit_id,
        amount,
        investment: investment_id,
        automatic,
    });
    Ok(reinvestment)
}

impl Engine {
    /// Redirect part of a distributed profit into the targets the caller picked.
    pub fn reinvest(
        &mut self,
        request: ReinvestRequest,
        actor: UserId,
    ) -> Result<Reinvestment, LedgerError> {
        let profit_id = request.profit;
        let amount = request.amount;
        let result = self.atomically(|uow| {
            ensure_distributed(uow, profit_id)?;
            let holdings = build_holdings(amount, &request.allocations)?;
            if request.project.is_none() && holdings.is_empty() {
                return Err(LedgerError::InvalidInput(
                    "a reinvestment needs a project or plot allocations".to_string(),
                ));
            }
            let project = validate_targets(uow, request.project, &holdings)?;
            let target = Target {
                project,
                holdings,
                investment_type: request
                    .create_investment
                    .then_some(InvestmentType::Reinvestment),
            };
            apply_reinvestment(uow, profit_id, amount, target, false, actor)
        });
        Self::log_result("reinvestment", profit_id, Some(amount), &result);
        result
    }

    /// Reinvest a share of a distributed profit into the first available plot
    /// of the target project, which defaults to the source investment's.
    pub fn auto_reinvest(
        &mut self,
        profit_id: ProfitId,
        target_project: Option<ProjectId>,
        actor: UserId,
    ) -> Result<Reinvestment, LedgerError> {
        let result = self.atomically(|uow| {
            ensure_distributed(uow, profit_id)?;
            let (share, source) = {
                let profit = uow.profit(profit_id)?;
                (profit.total_investor_share, profit.investment)
            };
            let source = uow.investments.get(source);
            let percentage = auto_reinvest_percentage(source, &uow.config);
            let project = target_project
                .or_else(|| source.and_then(|investment| investment.project))
                .ok_or_else(|| {
                    LedgerError::InvalidInput(format!(
                        "profit {profit_id} has no target project for automatic reinvestment"
                    ))
                })?;
            if !uow.project(project)?.is_open() {
                return Err(LedgerError::NoAvailablePlot(project));
            }

            let plot = uow
                .plots
                .find(|plot| plot.project == project && plot.is_available())
                .map(|plot| plot.id)
                .ok_or(LedgerError::NoAvailablePlot(project))?;

            let amount = share.percent(percentage);
            let target = Target {
                project: Some(project),
                holdings: vec![PlotHolding {
                    plot,
                    amount_invested: amount,
                    percentage_owned: Percent::HUNDRED,
                }],
                investment_type: Some(InvestmentType::AutoReinvestment),
            };
            apply_reinvestment(uow, profit_id, amount, target, true, actor)
        });
        let amount = result.as_ref().ok().map(|r| r.amount);
        Self::log_result("automatic reinvestment", profit_id, amount, &result);
        result
    }

    /// Auto-reinvest each profit in its own unit of work.
    pub fn bulk_auto_reinvest(
        &mut self,
        profits: &[ProfitId],
        target_project: Option<ProjectId>,
        actor: UserId,
    ) -> BulkReport<ProfitId> {
        let mut report = BulkReport::new();
        for &id in profits {
            match self.auto_reinvest(id, target_project, actor) {
                Ok(_) => report.succeeded.push(id),
                Err(e) => {
                    warn!(profit = id, reason = %e, "bulk auto-reinvestment item failed");
                    report.failed.push((id, e));
                }
            }
        }
        report
    }

    /// Mark a reinvestment cancelled. Nothing is reversed here: the wallet
    /// debit and any spawned investment are unwound by cancelling that
    /// investment.
    pub fn cancel_reinvestment(
        &mut self,
        id: ReinvestmentId,
        reason: impl Into<String>,
    ) -> Result<Reinvestment, LedgerError> {
        let reason = reason.into();
        let result = self.atomically(|uow| {
            let reinvestment = uow.reinvestment_mut(id)?;
            if matches!(
                reinvestment.status,
                ReinvestmentStatus::Completed | ReinvestmentStatus::Cancelled
            ) {
                return Err(invalid_transition(
                    EntityKind::Reinvestment,
                    id,
                    reinvestment.status.as_str(),
                    "cancel",
                ));
            }
            reinvestment.status = ReinvestmentStatus::Cancelled;
            reinvestment.cancellation_reason = Some(reason.clone());
            let reinvestment = reinvestment.clone();
            uow.emit(DomainEvent::ReinvestmentCancelled {
                reinvestment: id,
                reason: reason.clone(),
            });
            Ok(reinvestment)
        });
        Self::log_result("reinvestment cancellation", id, None, &result);
        result
    }

    pub fn reinvestment(&self, id: ReinvestmentId) -> Option<&Reinvestment> {
        self.books.reinvestments.get(&id)
    }

    pub fn reinvestments_of(&self, profit: ProfitId) -> impl Iterator<Item = &Reinvestment> + '_ {
        self.books
            .reinvestments
            .values()
            .filter(move |reinvestment| reinvestment.profit == profit)
    }
}
