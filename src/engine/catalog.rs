//! Projects, plots and the sales that realise them.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::Amount;
use crate::model::{InvestmentId, PlotId, ProfitId, ProjectId, SaleId, UserId};

use super::Engine;
use super::error::{EntityKind, LedgerError, invalid_transition};
use super::events::DomainEvent;
use super::investment::InvestmentStatus;
use super::wallet::ensure_positive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn is_open(&self) -> bool {
        self.status == ProjectStatus::Open
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlotStatus {
    Available,
    Sold,
}

#[derive(Debug, Clone, Serialize)]
pub struct Plot {
    pub id: PlotId,
    pub project: ProjectId,
    pub price: Amount,
    pub status: PlotStatus,
}

impl Plot {
    pub fn is_available(&self) -> bool {
        self.status == PlotStatus::Available
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    Pending,
    Completed,
}

impl SaleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleStatus::Pending => "pending",
            SaleStatus::Completed => "completed",
        }
    }
}

/// Sale of the asset behind one investment.
#[derive(Debug, Clone, Serialize)]
pub struct Sale {
    pub id: SaleId,
    pub investment: InvestmentId,
    /// The investor the profit belongs to.
    pub user: UserId,
    pub plot: Option<PlotId>,
    pub sale_price: Amount,
    pub cost_basis: Amount,
    pub status: SaleStatus,
    /// Set once a profit has been calculated; a sale has at most one.
    pub profit: Option<ProfitId>,
    pub recorded_by: UserId,
    pub recorded_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Input of [`Engine::record_sale`].
#[derive(Debug, Clone)]
pub struct SaleRequest {
    pub investment: InvestmentId,
    pub plot: Option<PlotId>,
    pub sale_price: Amount,
    /// Defaults to the investment amount.
    pub cost_basis: Option<Amount>,
}

impl SaleRequest {
    pub fn new(investment: InvestmentId, sale_price: Amount) -> Self {
        Self {
            investment,
            plot: None,
            sale_price,
            cost_basis: None,
        }
    }

    pub fn with_plot(mut self, plot: PlotId) -> Self {
        self.plot = Some(plot);
        self
    }

    pub fn with_cost_basis(mut self, cost_basis: Amount) -> Self {
        self.cost_basis = Some(cost_basis);
        self
    }
}

impl Engine {
    pub fn add_project(&mut self, name: impl Into<String>) -> Result<ProjectId, LedgerError> {
        let name = name.into();
        let result = self.atomically(|uow| {
            let id = uow.sequence.next_project();
            uow.projects.insert(
                id,
                Project {
                    id,
                    name,
                    status: ProjectStatus::Open,
                    created_at: uow.now,
                },
            );
            Ok(id)
        });
        Self::log_result("project creation", 0, None, &result);
        result
    }

    /// Closed projects accept no new plots or investments.
    pub fn close_project(&mut self, id: ProjectId) -> Result<(), LedgerError> {
        let result = self.atomically(|uow| {
            let project = uow
                .projects
                .get_mut(id)
                .ok_or_else(|| LedgerError::not_found(EntityKind::Project, id))?;
            project.status = ProjectStatus::Closed;
            Ok(())
        });
        Self::log_result("project closing", id, None, &result);
        result
    }

    pub fn add_plot(&mut self, project: ProjectId, price: Amount) -> Result<PlotId, LedgerError> {
        let result = self.atomically(|uow| {
            ensure_positive(price)?;
            if !uow.project(project)?.is_open() {
                return Err(invalid_transition(
                    EntityKind::Project,
                    project,
                    "closed",
                    "add plot",
                ));
            }
            let id = uow.sequence.next_plot();
            uow.plots.insert(
                id,
                Plot {
                    id,
                    project,
                    price,
                    status: PlotStatus::Available,
                },
            );
            Ok(id)
        });
        Self::log_result("plot creation", project, Some(price), &result);
        result
    }

    /// Record a pending sale of an approved investment's asset.
    pub fn record_sale(
        &mut self,
        request: SaleRequest,
        actor: UserId,
    ) -> Result<SaleId, LedgerError> {
        let investment_id = request.investment;
        let result = self.atomically(|uow| {
            ensure_positive(request.sale_price)?;
            if let Some(cost_basis) = request.cost_basis {
                ensure_positive(cost_basis)?;
            }

            let investment = uow.investment(investment_id)?;
            if !matches!(
                investment.status,
                InvestmentStatus::Active | InvestmentStatus::Completed
            ) {
                return Err(invalid_transition(
                    EntityKind::Investment,
                    investment_id,
                    investment.status.as_str(),
                    "sell",
                ));
            }
            if uow.sales.find(|s| s.investment == investment_id).is_some() {
                return Err(invalid_transition(
                    EntityKind::Investment,
                    investment_id,
                    "sold",
                    "sell",
                ));
            }
            let user = investment.user;
            let cost_basis = request.cost_basis.unwrap_or(investment.amount);
            let held = investment.holdings.iter().map(|h| h.plot).collect::<Vec<_>>();
            let project = investment.project;

            if let Some(plot_id) = request.plot {
                let plot = uow.plot(plot_id)?;
                let owned = if held.is_empty() {
                    project == Some(plot.project)
                } else {
                    held.contains(&plot_id)
                };
                if !owned {
                    return Err(LedgerError::InvalidInput(format!(
                        "plot {plot_id} is not held by investment {investment_id}"
                    )));
                }
                if !plot.is_available() {
                    return Err(LedgerError::PlotUnavailable(plot_id));
                }
            }

            let id = uow.sequence.next_sale();
            uow.sales.insert(
                id,
                Sale {
                    id,
                    investment: investment_id,
                    user,
                    plot: request.plot,
                    sale_price: request.sale_price,
                    cost_basis,
                    status: SaleStatus::Pending,
                    profit: None,
                    recorded_by: actor,
                    recorded_at: uow.now,
                    completed_at: None,
                },
            );
            Ok(id)
        });
        Self::log_result(
            "sale recording",
            investment_id,
            Some(request.sale_price),
            &result,
        );
        result
    }

    /// Complete a pending sale; its plot, if any, is marked sold.
    pub fn complete_sale(&mut self, id: SaleId) -> Result<Sale, LedgerError> {
        let result = self.atomically(|uow| {
            let now = uow.now;
            let sale = uow.sale_mut(id)?;
            if sale.status != SaleStatus::Pending {
                return Err(invalid_transition(
                    EntityKind::Sale,
                    id,
                    sale.status.as_str(),
                    "complete",
                ));
            }
            sale.status = SaleStatus::Completed;
            sale.completed_at = Some(now);
            let sale = sale.clone();

            if let Some(plot_id) = sale.plot {
                let plot = uow
                    .plots
                    .get_mut(plot_id)
                    .ok_or_else(|| LedgerError::not_found(EntityKind::Plot, plot_id))?;
                if !plot.is_available() {
                    return Err(LedgerError::PlotUnavailable(plot_id));
                }
                plot.status = PlotStatus::Sold;
            }

            uow.emit(DomainEvent::SaleCompleted {
                sale: id,
                plot: sale.plot,
            });
            Ok(sale)
        });
        Self::log_result("sale completion", id, None, &result);
        result
    }

    pub fn project(&self, id: ProjectId) -> Option<&Project> {
        self.books.projects.get(&id)
    }

    pub fn plot(&self, id: PlotId) -> Option<&Plot> {
        self.books.plots.get(&id)
    }

    pub fn sale(&self, id: SaleId) -> Option<&Sale> {
        self.books.sales.get(&id)
    }

    /// Plots of a project in id order.
    pub fn plots_in(&self, project: ProjectId) -> impl Iterator<Item = &Plot> + '_ {
        self.books
            .plots
            .values()
            .filter(move |plot| plot.project == project)
    }
}
