//! Identifiers and the command inputs of the ledger engine.

use crate::Amount;

/// User identifier, supplied by the identity collaborator.
pub type UserId = u32;

/// Wallet identifier (one wallet per user).
pub type WalletId = u64;

/// Identifier of a row in the transaction log.
pub type TransactionId = u64;

pub type InvestmentId = u64;
pub type ProjectId = u64;
pub type PlotId = u64;
pub type SaleId = u64;
pub type ProfitId = u64;
pub type ReinvestmentId = u64;

/// Actor stamped on changes driven by the engine itself (command replay, bulk jobs).
pub const SYSTEM_USER: UserId = 0;

/// A command accepted by [`Engine::apply`](crate::Engine::apply).
///
/// Commands are the replayable surface of the engine: every one of them maps
/// to a single business operation (or a fixed sequence for `Deposit` and `Sale`).
/// Entity ids are the sequential ids assigned by the engine.
#[derive(Debug, Clone)]
pub enum Command {
    /// Register a verified, active user and open their wallet.
    Register { user: UserId },
    /// Pay (part of) the registration fee from the wallet.
    PayFee { user: UserId, amount: Amount },
    /// Request a deposit and confirm it on the simulated rail.
    Deposit { user: UserId, amount: Amount },
    /// Withdraw from the available balance.
    Withdraw { user: UserId, amount: Amount },
    /// Add a project to the catalog.
    AddProject { name: String },
    /// Add a plot to a project.
    AddPlot { project: ProjectId, price: Amount },
    /// Commit funds to a project.
    Invest {
        user: UserId,
        project: ProjectId,
        amount: Amount,
    },
    /// Approve a pending investment.
    Approve { investment: InvestmentId },
    /// Cancel a pending investment.
    Cancel { investment: InvestmentId },
    /// Sell the asset behind an investment, then calculate its profit.
    Sale {
        investment: InvestmentId,
        sale_price: Amount,
    },
    /// Credit a calculated profit to the investor.
    Distribute { profit: ProfitId },
    /// Manually reinvest part of a distributed profit into a project.
    Reinvest {
        profit: ProfitId,
        project: ProjectId,
        amount: Amount,
    },
    /// Reinvest the configured share of a profit into the first free plot.
    AutoReinvest {
        profit: ProfitId,
        project: Option<ProjectId>,
    },
}

impl Command {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Register { .. } => "register",
            Command::PayFee { .. } => "fee",
            Command::Deposit { .. } => "deposit",
            Command::Withdraw { .. } => "withdraw",
            Command::AddProject { .. } => "project",
            Command::AddPlot { .. } => "plot",
            Command::Invest { .. } => "invest",
            Command::Approve { .. } => "approve",
            Command::Cancel { .. } => "cancel",
            Command::Sale { .. } => "sale",
            Command::Distribute { .. } => "distribute",
            Command::Reinvest { .. } => "reinvest",
            Command::AutoReinvest { .. } => "auto_reinvest",
        }
    }
}
