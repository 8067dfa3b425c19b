//! Profit calculation and distribution.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::config::LedgerConfig;
use crate::model::{InvestmentId, ProfitId, SaleId, UserId};
use crate::{Amount, Percent};

use super::Engine;
use super::books::{Entry, Movement};
use super::catalog::SaleStatus;
use super::error::{BulkReport, EntityKind, LedgerError, invalid_transition};
use super::events::DomainEvent;
use super::journal::TransactionType;
use super::wallet::CreditKind;

/// How the figures of a profit are obtained.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalculationMode {
    /// Derived from the sale and the configured percentages.
    Standard,
    /// Operator-supplied figures; no team bonus.
    Manual {
        total_profit: Amount,
        company_percentage: Percent,
    },
}

/// The split of one sale's profit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProfitBreakdown {
    pub total_profit: Amount,
    pub company_percentage: Percent,
    pub company_share: Amount,
    pub team_share: Amount,
    pub investor_share: Amount,
    /// `investor_share + team_share`, the amount credited to the investor.
    pub total_investor_share: Amount,
}

/// Split a sale's profit between the company, the team bonus and the investor.
///
/// `investor_share` absorbs rounding so that
/// `company_share + team_share + investor_share == total_profit`.
pub fn calculate_profit(
    sale_price: Amount,
    cost_basis: Amount,
    in_team: bool,
    config: &LedgerConfig,
    mode: CalculationMode,
) -> ProfitBreakdown {
    let (total_profit, company_percentage, team_bonus) = match mode {
        CalculationMode::Standard => (
            sale_price - cost_basis,
            config.company_profit_percentage,
            if in_team {
                config.team_bonus_percentage
            } else {
                Percent::ZERO
            },
        ),
        CalculationMode::Manual {
            total_profit,
            company_percentage,
        } => (total_profit, company_percentage, Percent::ZERO),
    };

    let company_share = total_profit.percent(company_percentage);
    let team_share = (total_profit - company_share).percent(team_bonus);
    let investor_share = total_profit - company_share - team_share;

    ProfitBreakdown {
        total_profit,
        company_percentage,
        company_share,
        team_share,
        investor_share,
        total_investor_share: investor_share + team_share,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionStatus {
    Pending,
    Distributed,
    Failed,
}

impl DistributionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistributionStatus::Pending => "pending",
            DistributionStatus::Distributed => "distributed",
            DistributionStatus::Failed => "failed",
        }
    }
}

/// How much of a profit has been redirected into new investments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfitReinvestmentStatus {
    Available,
    Partial,
    Reinvested,
}

#[derive(Debug, Clone, Serialize)]
pub struct Profit {
    pub id: ProfitId,
    pub sale: SaleId,
    pub investment: InvestmentId,
    pub user: UserId,
    pub total_profit: Amount,
    pub company_percentage: Percent,
    pub company_share: Amount,
    pub investor_share: Amount,
    pub team_share: Amount,
    pub total_investor_share: Amount,
    pub manual: bool,
    pub distribution_status: DistributionStatus,
    pub distributed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub reinvestment_status: ProfitReinvestmentStatus,
    /// Cumulative amount reinvested so far.
    pub reinvestment_amount: Amount,
    pub calculated_by: UserId,
    pub calculated_at: DateTime<Utc>,
}

impl Profit {
    pub fn is_distributed(&self) -> bool {
        self.distribution_status == DistributionStatus::Distributed
    }

    /// Share still available for reinvestment.
    pub fn remaining_reinvestable(&self) -> Amount {
        self.total_investor_share - self.reinvestment_amount
    }

    pub(crate) fn consume_reinvestment(&mut self, amount: Amount) -> Result<(), LedgerError> {
        let remaining = self.remaining_reinvestable();
        if amount > remaining {
            return Err(LedgerError::ReinvestmentCapacityExceeded {
                profit: self.id,
                remaining,
                requested: amount,
            });
        }
        self.reinvestment_amount += amount;
        self.refresh_reinvestment_status();
        Ok(())
    }

    pub(crate) fn release_reinvestment(&mut self, amount: Amount) {
        self.reinvestment_amount -= amount.min(self.reinvestment_amount);
        self.refresh_reinvestment_status();
    }

    fn refresh_reinvestment_status(&mut self) {
        self.reinvestment_status = if self.reinvestment_amount.is_zero() {
            ProfitReinvestmentStatus::Available
        } else if self.reinvestment_amount >= self.total_investor_share {
            ProfitReinvestmentStatus::Reinvested
        } else {
            ProfitReinvestmentStatus::Partial
        };
    }
}

impl Engine {
    /// Calculate and record the profit of a completed sale. A sale gets at most one.
    pub fn calculate_sale_profit(
        &mut self,
        sale_id: SaleId,
        mode: CalculationMode,
        actor: UserId,
    ) -> Result<Profit, LedgerError> {
        let result = self.atomically(|uow| {
            let sale = uow.sale(sale_id)?.clone();
            if sale.profit.is_some() {
                return Err(LedgerError::ProfitAlreadyCalculated(sale_id));
            }
            if sale.status != SaleStatus::Completed {
                return Err(invalid_transition(
                    EntityKind::Sale,
                    sale_id,
                    sale.status.as_str(),
                    "calculate profit",
                ));
            }
            if let CalculationMode::Manual {
                company_percentage, ..
            } = mode
            {
                if !company_percentage.is_valid_share() {
                    return Err(LedgerError::InvalidInput(format!(
                        "company percentage {company_percentage} is outside 0..=100"
                    )));
                }
            }

            let in_team = uow.profile(sale.user)?.in_team();
            let breakdown =
                calculate_profit(sale.sale_price, sale.cost_basis, in_team, &uow.config, mode);
            if !breakdown.total_profit.is_positive() {
                return Err(LedgerError::NoProfit {
                    sale: sale_id,
                    total_profit: breakdown.total_profit,
                });
            }

            let id = uow.sequence.next_profit();
            let profit = Profit {
                id,
                sale: sale_id,
                investment: sale.investment,
                user: sale.user,
                total_profit: breakdown.total_profit,
                company_percentage: breakdown.company_percentage,
                company_share: breakdown.company_share,
                investor_share: breakdown.investor_share,
                team_share: breakdown.team_share,
                total_investor_share: breakdown.total_investor_share,
                manual: matches!(mode, CalculationMode::Manual { .. }),
                distribution_status: DistributionStatus::Pending,
                distributed_at: None,
                failure_reason: None,
                reinvestment_status: ProfitReinvestmentStatus::Available,
                reinvestment_amount: Amount::ZERO,
                calculated_by: actor,
                calculated_at: uow.now,
            };
            uow.profits.insert(id, profit.clone());
            uow.sale_mut(sale_id)?.profit = Some(id);
            uow.emit(DomainEvent::ProfitCalculated {
                profit: id,
                sale: sale_id,
                total_profit: profit.total_profit,
                total_investor_share: profit.total_investor_share,
            });
            Ok(profit)
        });
        Self::log_result("profit calculation", sale_id, None, &result);
        result
    }

    /// Credit the investor's share to their wallet, exactly once.
    ///
    /// If crediting fails the profit is marked `failed` (in a separate unit
    /// of work) and may be distributed again later.
    pub fn distribute_profit(&mut self, id: ProfitId) -> Result<Profit, LedgerError> {
        let result = self.atomically(|uow| {
            let mut profit = uow.profit(id)?.clone();
            if profit.is_distributed() {
                return Err(LedgerError::AlreadyDistributed(id));
            }

            uow.post(
                profit.user,
                Movement::Credit(profit.total_investor_share, CreditKind::Profit),
                Entry::new(TransactionType::Profit)
                    .profit(id)
                    .investment(profit.investment),
            )?;

            profit.distribution_status = DistributionStatus::Distributed;
            profit.distributed_at = Some(uow.now);
            profit.failure_reason = None;
            uow.profits.insert(id, profit.clone());
            uow.emit(DomainEvent::ProfitDistributed {
                profit: id,
                user: profit.user,
                amount: profit.total_investor_share,
            });
            Ok(profit)
        });

        if let Err(e) = &result {
            if !matches!(
                e,
                LedgerError::AlreadyDistributed(_)
                    | LedgerError::NotFound(EntityKind::Profit, _)
            ) {
                self.mark_distribution_failed(id, e);
            }
        }

        let amount = result.as_ref().ok().map(|p| p.total_investor_share);
        Self::log_result("profit distribution", id, amount, &result);
        result
    }

    fn mark_distribution_failed(&mut self, id: ProfitId, error: &LedgerError) {
        let reason = error.to_string();
        warn!(profit = id, reason = %reason, "profit distribution failed");
        let marked = self.atomically(|uow| {
            let profit = uow.profit_mut(id)?;
            profit.distribution_status = DistributionStatus::Failed;
            profit.failure_reason = Some(reason.clone());
            uow.emit(DomainEvent::ProfitDistributionFailed {
                profit: id,
                reason: reason.clone(),
            });
            Ok(())
        });
        if let Err(e) = marked {
            warn!(profit = id, reason = %e, "could not mark profit as failed");
        }
    }

    /// Distribute each profit in its own unit of work.
    pub fn bulk_distribute(&mut self, ids: &[ProfitId]) -> BulkReport<ProfitId> {
        let mut report = BulkReport::new();
        for &id in ids {
            match self.distribute_profit(id) {
                Ok(_) => report.succeeded.push(id),
                Err(e) => {
                    warn!(profit = id, reason = %e, "bulk distribution item failed");
                    report.failed.push((id, e));
                }
            }
        }
        report
    }

    pub fn profit(&self, id: ProfitId) -> Option<&Profit> {
        self.books.profits.get(&id)
    }

    pub fn profits_for(&self, user: UserId) -> impl Iterator<Item = &Profit> + '_ {
        self.books
            .profits
            .values()
            .filter(move |profit| profit.user == user)
    }
}
