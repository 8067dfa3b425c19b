use invest_ledger::engine::{
    Allocation, CalculationMode, DistributionStatus, EntityKind, Funding, InvestmentRequest,
    InvestmentStatus, InvestmentType, MemorySink, PlotStatus, ProfitReinvestmentStatus,
    ReinvestRequest, ReinvestmentStatus, SaleRequest, TransactionStatus, TransactionType,
    UserProfile, WalletStatus,
};
use invest_ledger::{Amount, Engine, LedgerError, Percent, UserId};

const ADMIN: UserId = 99;

fn units(n: i64) -> Amount {
    Amount::from_units(n)
}

/// Registered user with the fee paid and `available` left in the wallet.
fn funded(engine: &mut Engine, user: UserId, available: i64) {
    engine.register_user(user, UserProfile::verified()).unwrap();
    let tx = engine.request_deposit(user, units(available + 100)).unwrap();
    engine.confirm_deposit(tx).unwrap();
    engine.pay_registration_fee(user, units(100)).unwrap();
}

fn assert_conserved(engine: &Engine, user: UserId) {
    let reconciliation = engine.reconcile(user).unwrap();
    assert!(
        reconciliation.is_consistent(),
        "wallet of user {user} does not reconcile: {reconciliation:?}"
    );
}

/// Engine with one approved 100,000 investment sold for 150,000 and its
/// profit distributed. Returns (engine, project, investment, profit).
fn distributed_profit() -> (Engine, u64, u64, u64) {
    let mut engine = Engine::new();
    funded(&mut engine, 1, 110_000);
    let project = engine.add_project("Lakeside").unwrap();
    let investment = engine
        .create_investment(InvestmentRequest::project(1, project, units(100_000)), 1)
        .unwrap();
    engine.approve_investment(investment.id, ADMIN).unwrap();

    let sale = engine
        .record_sale(SaleRequest::new(investment.id, units(150_000)), ADMIN)
        .unwrap();
    engine.complete_sale(sale).unwrap();
    let profit = engine
        .calculate_sale_profit(sale, CalculationMode::Standard, ADMIN)
        .unwrap();
    engine.distribute_profit(profit.id).unwrap();
    (engine, project, investment.id, profit.id)
}

#[test]
fn investment_freezes_then_debits_on_approval() {
    let mut engine = Engine::new();
    funded(&mut engine, 1, 10_000);
    let project = engine.add_project("Riverside").unwrap();

    let investment = engine
        .create_investment(InvestmentRequest::project(1, project, units(2_000)), 1)
        .unwrap();
    let wallet = engine.wallet(1).unwrap();
    assert_eq!(wallet.available(), units(8_000));
    assert_eq!(wallet.frozen_amount(), units(2_000));
    assert_eq!(wallet.balance(), units(10_000));
    assert_eq!(investment.status, InvestmentStatus::Pending);
    assert_eq!(
        engine.transaction(investment.transaction_id).unwrap().status,
        TransactionStatus::Pending
    );

    let approved = engine.approve_investment(investment.id, ADMIN).unwrap();
    let wallet = engine.wallet(1).unwrap();
    assert_eq!(wallet.balance(), units(8_000));
    assert_eq!(wallet.frozen_amount(), Amount::ZERO);
    assert_eq!(wallet.total_investments(), units(2_000));
    assert_eq!(approved.status, InvestmentStatus::Active);
    assert_eq!(approved.approved_by, Some(ADMIN));
    assert_eq!(
        engine.transaction(investment.transaction_id).unwrap().status,
        TransactionStatus::Completed
    );
    assert_conserved(&engine, 1);
}

#[test]
fn investment_records_expected_return() {
    let mut engine = Engine::new();
    funded(&mut engine, 1, 10_000);
    let project = engine.add_project("Riverside").unwrap();
    let investment = engine
        .create_investment(InvestmentRequest::project(1, project, units(2_000)), 1)
        .unwrap();

    assert_eq!(investment.return_rate, Percent::from_float(12.0));
    assert_eq!(investment.expected_return, units(240));
    assert_eq!(investment.investment_type, InvestmentType::Project);
    assert!(investment.maturity_date > investment.created_at);
}

#[test]
fn profit_split_and_distribution() {
    let (engine, _, investment, profit_id) = distributed_profit();
    let profit = engine.profit(profit_id).unwrap();

    assert_eq!(profit.total_profit, units(50_000));
    assert_eq!(profit.company_share, units(10_000));
    assert_eq!(profit.investor_share, units(40_000));
    assert_eq!(profit.team_share, Amount::ZERO);
    assert_eq!(profit.total_investor_share, units(40_000));
    assert_eq!(profit.distribution_status, DistributionStatus::Distributed);
    assert!(profit.distributed_at.is_some());
    assert_eq!(profit.investment, investment);

    let wallet = engine.wallet(1).unwrap();
    assert_eq!(wallet.balance(), units(50_000));
    assert_eq!(wallet.total_profits(), units(40_000));
    assert_conserved(&engine, 1);
}

#[test]
fn manual_profit_overrides_figures() {
    let mut engine = Engine::new();
    funded(&mut engine, 1, 5_000);
    let project = engine.add_project("Hillside").unwrap();
    let investment = engine
        .create_investment(InvestmentRequest::project(1, project, units(2_000)), 1)
        .unwrap();
    engine.approve_investment(investment.id, ADMIN).unwrap();
    let sale = engine
        .record_sale(SaleRequest::new(investment.id, units(2_500)), ADMIN)
        .unwrap();
    engine.complete_sale(sale).unwrap();

    let profit = engine
        .calculate_sale_profit(
            sale,
            CalculationMode::Manual {
                total_profit: units(1_000),
                company_percentage: Percent::from_float(30.0),
            },
            ADMIN,
        )
        .unwrap();
    assert!(profit.manual);
    assert_eq!(profit.company_share, units(300));
    assert_eq!(profit.total_investor_share, units(700));
}

#[test]
fn distribution_happens_exactly_once() {
    let (mut engine, _, _, profit) = distributed_profit();
    let rows_before = engine.journal().len();

    assert_eq!(
        engine.distribute_profit(profit).map(|p| p.id),
        Err(LedgerError::AlreadyDistributed(profit))
    );
    assert_eq!(engine.wallet(1).unwrap().balance(), units(50_000));
    assert_eq!(engine.journal().len(), rows_before);

    let credits = engine
        .transactions_for(1)
        .filter(|row| row.kind == TransactionType::Profit && row.profit_id == Some(profit))
        .count();
    assert_eq!(credits, 1);
}

#[test]
fn profit_is_calculated_once_per_sale() {
    let (mut engine, _, _, profit) = distributed_profit();
    let sale = engine.profit(profit).unwrap().sale;
    assert_eq!(
        engine
            .calculate_sale_profit(sale, CalculationMode::Standard, ADMIN)
            .map(|p| p.id),
        Err(LedgerError::ProfitAlreadyCalculated(sale))
    );
}

#[test]
fn failed_distribution_can_be_retried() {
    let mut engine = Engine::new();
    funded(&mut engine, 1, 5_000);
    let project = engine.add_project("Hillside").unwrap();
    let investment = engine
        .create_investment(InvestmentRequest::project(1, project, units(2_000)), 1)
        .unwrap();
    engine.approve_investment(investment.id, ADMIN).unwrap();
    let sale = engine
        .record_sale(SaleRequest::new(investment.id, units(3_000)), ADMIN)
        .unwrap();
    engine.complete_sale(sale).unwrap();
    let profit = engine
        .calculate_sale_profit(sale, CalculationMode::Standard, ADMIN)
        .unwrap();

    engine.set_wallet_status(1, WalletStatus::Frozen).unwrap();
    assert!(matches!(
        engine.distribute_profit(profit.id),
        Err(LedgerError::WalletInactive { .. })
    ));
    let failed = engine.profit(profit.id).unwrap();
    assert_eq!(failed.distribution_status, DistributionStatus::Failed);
    assert!(failed.failure_reason.is_some());

    engine.set_wallet_status(1, WalletStatus::Active).unwrap();
    let distributed = engine.distribute_profit(profit.id).unwrap();
    assert_eq!(distributed.distribution_status, DistributionStatus::Distributed);
    assert_eq!(engine.wallet(1).unwrap().total_profits(), units(800));
}

#[test]
fn reinvestment_capacity_is_enforced() {
    let (mut engine, project, source, profit) = distributed_profit();

    let first = engine
        .reinvest(
            ReinvestRequest::into_project(profit, project, units(15_000)),
            1,
        )
        .unwrap();
    assert_eq!(first.status, ReinvestmentStatus::Active);
    let state = engine.profit(profit).unwrap();
    assert_eq!(state.reinvestment_amount, units(15_000));
    assert_eq!(state.reinvestment_status, ProfitReinvestmentStatus::Partial);
    assert_eq!(state.remaining_reinvestable(), units(25_000));

    engine
        .reinvest(
            ReinvestRequest::into_project(profit, project, units(25_000)),
            1,
        )
        .unwrap();
    assert_eq!(
        engine.profit(profit).unwrap().reinvestment_status,
        ProfitReinvestmentStatus::Reinvested
    );

    let balance = engine.wallet(1).unwrap().balance();
    let rows = engine.journal().len();
    assert_eq!(
        engine
            .reinvest(
                ReinvestRequest::into_project(profit, project, Amount::from_scaled(1)),
                1
            )
            .map(|r| r.id),
        Err(LedgerError::ReinvestmentCapacityExceeded {
            profit,
            remaining: Amount::ZERO,
            requested: Amount::from_scaled(1),
        })
    );
    assert_eq!(engine.wallet(1).unwrap().balance(), balance);
    assert_eq!(engine.journal().len(), rows);
    assert_eq!(engine.profit(profit).unwrap().reinvestment_amount, units(40_000));

    // 110,000 - 100,000 invested + 40,000 profit - 40,000 reinvested
    assert_eq!(balance, units(10_000));
    assert_eq!(engine.investment(source).unwrap().reinvestment_count, 2);
    assert_eq!(engine.reinvestments_of(profit).count(), 2);
    assert_conserved(&engine, 1);
}

#[test]
fn reinvestment_spawns_a_debited_investment() {
    let (mut engine, project, source, profit) = distributed_profit();
    let reinvestment = engine
        .reinvest(
            ReinvestRequest::into_project(profit, project, units(10_000)),
            1,
        )
        .unwrap();
    let spawned = engine
        .investment(reinvestment.investment.unwrap())
        .unwrap()
        .clone();

    assert_eq!(spawned.investment_type, InvestmentType::Reinvestment);
    assert_eq!(spawned.status, InvestmentStatus::Pending);
    assert_eq!(spawned.funding, Funding::Debited);
    assert_eq!(spawned.source_investment_id, Some(source));
    assert_eq!(spawned.reinvestment_id, Some(reinvestment.id));

    // funds already left the wallet, so approval moves nothing
    let balance = engine.wallet(1).unwrap().balance();
    engine.approve_investment(spawned.id, ADMIN).unwrap();
    assert_eq!(engine.wallet(1).unwrap().balance(), balance);

    engine.complete_investment(spawned.id, units(500)).unwrap();
    assert_eq!(
        engine.reinvestment(reinvestment.id).unwrap().status,
        ReinvestmentStatus::Completed
    );
    assert_eq!(engine.wallet(1).unwrap().balance(), balance + units(500));
    assert_conserved(&engine, 1);
}

#[test]
fn reinvestment_without_investment_only_debits() {
    let (mut engine, project, _, profit) = distributed_profit();
    let investments = engine.investments_for(1).count();
    let reinvestment = engine
        .reinvest(
            ReinvestRequest::into_project(profit, project, units(5_000)).without_investment(),
            1,
        )
        .unwrap();
    assert!(reinvestment.investment.is_none());
    assert_eq!(engine.investments_for(1).count(), investments);
    assert_eq!(engine.wallet(1).unwrap().balance(), units(45_000));
}

#[test]
fn cancelling_a_spawned_investment_unwinds_the_reinvestment() {
    let (mut engine, project, _, profit) = distributed_profit();
    let reinvestment = engine
        .reinvest(
            ReinvestRequest::into_project(profit, project, units(15_000)),
            1,
        )
        .unwrap();

    // recording intent changes no money
    let cancelled = engine
        .cancel_reinvestment(reinvestment.id, "investor changed plans")
        .unwrap();
    assert_eq!(cancelled.status, ReinvestmentStatus::Cancelled);
    assert_eq!(engine.wallet(1).unwrap().balance(), units(35_000));
    assert_eq!(engine.profit(profit).unwrap().reinvestment_amount, units(15_000));

    engine
        .cancel_investment(reinvestment.investment.unwrap(), 1)
        .unwrap();
    assert_eq!(engine.wallet(1).unwrap().balance(), units(50_000));
    let state = engine.profit(profit).unwrap();
    assert_eq!(state.reinvestment_amount, Amount::ZERO);
    assert_eq!(state.reinvestment_status, ProfitReinvestmentStatus::Available);
    assert_eq!(
        engine
            .reinvestment(reinvestment.id)
            .unwrap()
            .cancellation_reason
            .as_deref(),
        Some("investor changed plans")
    );
    assert_conserved(&engine, 1);
}

#[test]
fn cancel_reinvestment_twice_fails() {
    let (mut engine, project, _, profit) = distributed_profit();
    let reinvestment = engine
        .reinvest(
            ReinvestRequest::into_project(profit, project, units(1_000)),
            1,
        )
        .unwrap();
    engine.cancel_reinvestment(reinvestment.id, "first").unwrap();
    assert!(matches!(
        engine.cancel_reinvestment(reinvestment.id, "second"),
        Err(LedgerError::InvalidStateTransition { .. })
    ));
}

#[test]
fn auto_reinvestment_picks_the_first_available_plot() {
    let (mut engine, project, _, profit) = distributed_profit();
    let first = engine.add_plot(project, units(30_000)).unwrap();
    engine.add_plot(project, units(30_000)).unwrap();

    let reinvestment = engine.auto_reinvest(profit, None, ADMIN).unwrap();
    assert!(reinvestment.automatic);
    assert_eq!(reinvestment.amount, units(20_000));
    assert_eq!(reinvestment.target_plot, Some(first));

    let spawned = engine.investment(reinvestment.investment.unwrap()).unwrap();
    assert_eq!(spawned.investment_type, InvestmentType::AutoReinvestment);
    assert_eq!(spawned.holdings.len(), 1);
    assert_eq!(spawned.holdings[0].plot, first);
    assert_eq!(spawned.holdings[0].percentage_owned, Percent::HUNDRED);
}

#[test]
fn auto_reinvestment_uses_the_investors_percentage() {
    let mut engine = Engine::new();
    funded(&mut engine, 1, 5_000);
    let project = engine.add_project("Orchard").unwrap();
    engine.add_plot(project, units(1_000)).unwrap();
    let investment = engine
        .create_investment(
            InvestmentRequest::project(1, project, units(2_000))
                .with_auto_reinvest(Percent::from_float(25.0)),
            1,
        )
        .unwrap();
    engine.approve_investment(investment.id, ADMIN).unwrap();
    let sale = engine
        .record_sale(SaleRequest::new(investment.id, units(3_000)), ADMIN)
        .unwrap();
    engine.complete_sale(sale).unwrap();
    let profit = engine
        .calculate_sale_profit(sale, CalculationMode::Standard, ADMIN)
        .unwrap();
    engine.distribute_profit(profit.id).unwrap();

    let reinvestment = engine.auto_reinvest(profit.id, None, ADMIN).unwrap();
    // 25% of the 800 investor share
    assert_eq!(reinvestment.amount, units(200));
}

#[test]
fn auto_reinvestment_without_plot_changes_nothing() {
    let (mut engine, project, _, profit) = distributed_profit();
    let balance = engine.wallet(1).unwrap().balance();
    let rows = engine.journal().len();

    assert_eq!(
        engine.auto_reinvest(profit, Some(project), ADMIN).map(|r| r.id),
        Err(LedgerError::NoAvailablePlot(project))
    );
    assert_eq!(engine.wallet(1).unwrap().balance(), balance);
    assert_eq!(engine.journal().len(), rows);
    assert_eq!(engine.profit(profit).unwrap().reinvestment_amount, Amount::ZERO);
}

#[test]
fn bulk_auto_reinvest_tallies_each_profit() {
    let (mut engine, project, _, profit) = distributed_profit();
    engine.add_plot(project, units(30_000)).unwrap();

    let report = engine.bulk_auto_reinvest(&[profit, 42, profit], None, ADMIN);
    assert_eq!(report.succeeded, vec![profit, profit]);
    assert_eq!(report.failed_count(), 1);
    assert_eq!(report.failed[0].0, 42);
    assert_eq!(
        engine.profit(profit).unwrap().reinvestment_status,
        ProfitReinvestmentStatus::Reinvested
    );
}

#[test]
fn misallocated_investment_has_no_side_effects() {
    let mut engine = Engine::new();
    funded(&mut engine, 1, 10_000);
    let project = engine.add_project("Meadow").unwrap();
    let a = engine.add_plot(project, units(5_000)).unwrap();
    let b = engine.add_plot(project, units(5_000)).unwrap();
    let rows = engine.journal().len();

    let request = InvestmentRequest::plots(
        1,
        units(3_000),
        vec![Allocation::new(a, units(2_000)), Allocation::new(b, units(500))],
    );
    assert_eq!(
        engine.create_investment(request, 1).map(|i| i.id),
        Err(LedgerError::AllocationMismatch {
            expected: units(3_000),
            allocated: units(2_500),
        })
    );
    assert_eq!(engine.wallet(1).unwrap().available(), units(10_000));
    assert_eq!(engine.journal().len(), rows);
    assert_eq!(engine.investments_for(1).count(), 0);

    let request = InvestmentRequest::plots(
        1,
        units(3_000),
        vec![Allocation::new(a, units(2_000)), Allocation::new(b, units(1_000))],
    );
    let investment = engine.create_investment(request, 1).unwrap();
    assert_eq!(investment.investment_type, InvestmentType::Plot);
    assert_eq!(investment.project, Some(project));
    assert_eq!(investment.allocated(), investment.amount);
}

#[test]
fn ineligible_user_gets_every_reason() {
    let mut engine = Engine::new();
    engine
        .register_user(
            1,
            UserProfile {
                team_leader: true,
                team_member_count: 2,
                ..UserProfile::default()
            },
        )
        .unwrap();
    let project = engine.add_project("Meadow").unwrap();

    let err = engine
        .create_investment(InvestmentRequest::project(1, project, units(1_000)), 1)
        .map(|i| i.id)
        .unwrap_err();
    assert_eq!(err.reasons().len(), 5);
    assert!(engine.journal().is_empty());
}

#[test]
fn cancellation_is_not_repeatable() {
    let mut engine = Engine::new();
    funded(&mut engine, 1, 10_000);
    let project = engine.add_project("Meadow").unwrap();
    let investment = engine
        .create_investment(InvestmentRequest::project(1, project, units(2_000)), 1)
        .unwrap();

    let cancelled = engine.cancel_investment(investment.id, 1).unwrap();
    assert_eq!(cancelled.status, InvestmentStatus::Cancelled);
    assert_eq!(engine.wallet(1).unwrap().available(), units(10_000));
    assert_eq!(
        engine.transaction(investment.transaction_id).unwrap().status,
        TransactionStatus::Rejected
    );

    let rows = engine.journal().len();
    assert!(matches!(
        engine.cancel_investment(investment.id, 1),
        Err(LedgerError::InvalidStateTransition { .. })
    ));
    assert_eq!(engine.journal().len(), rows);

    let other = engine
        .create_investment(InvestmentRequest::project(1, project, units(2_000)), 1)
        .unwrap();
    engine.approve_investment(other.id, ADMIN).unwrap();
    engine.complete_investment(other.id, Amount::ZERO).unwrap();
    let balance = engine.wallet(1).unwrap().balance();
    assert!(matches!(
        engine.cancel_investment(other.id, 1),
        Err(LedgerError::InvalidStateTransition { .. })
    ));
    assert_eq!(engine.wallet(1).unwrap().balance(), balance);
    assert_conserved(&engine, 1);
}

#[test]
fn modification_adjusts_the_hold_and_needs_approval() {
    let mut engine = Engine::new();
    funded(&mut engine, 1, 10_000);
    let project = engine.add_project("Meadow").unwrap();
    let investment = engine
        .create_investment(InvestmentRequest::project(1, project, units(2_000)), 1)
        .unwrap();

    let modified = engine
        .modify_investment(investment.id, units(3_000), None)
        .unwrap();
    assert_eq!(modified.status, InvestmentStatus::PendingApproval);
    assert_eq!(engine.wallet(1).unwrap().frozen_amount(), units(3_000));

    assert!(matches!(
        engine.modify_investment(investment.id, units(1_500), None),
        Err(LedgerError::InvalidStateTransition { .. })
    ));

    engine.approve_investment(investment.id, ADMIN).unwrap();
    let wallet = engine.wallet(1).unwrap();
    assert_eq!(wallet.balance(), units(7_000));
    assert_eq!(wallet.frozen_amount(), Amount::ZERO);
    assert_conserved(&engine, 1);
}

#[test]
fn approval_requires_a_pending_investment() {
    let mut engine = Engine::new();
    funded(&mut engine, 1, 10_000);
    let project = engine.add_project("Meadow").unwrap();
    let investment = engine
        .create_investment(InvestmentRequest::project(1, project, units(2_000)), 1)
        .unwrap();
    engine.approve_investment(investment.id, ADMIN).unwrap();
    assert_eq!(
        engine.approve_investment(investment.id, ADMIN).map(|i| i.id),
        Err(LedgerError::InvalidStateTransition {
            entity: EntityKind::Investment,
            id: investment.id,
            state: "active",
            action: "approve",
        })
    );
}

#[test]
fn bulk_approve_isolates_failures() {
    let mut engine = Engine::new();
    funded(&mut engine, 1, 10_000);
    let project = engine.add_project("Meadow").unwrap();
    let a = engine
        .create_investment(InvestmentRequest::project(1, project, units(2_000)), 1)
        .unwrap();
    let b = engine
        .create_investment(InvestmentRequest::project(1, project, units(3_000)), 1)
        .unwrap();
    engine.cancel_investment(b.id, 1).unwrap();

    let report = engine.bulk_approve(&[a.id, b.id, 77], ADMIN);
    assert_eq!(report.succeeded, vec![a.id]);
    assert_eq!(report.succeeded_count(), 1);
    assert_eq!(report.failed_count(), 2);
    assert_eq!(engine.wallet(1).unwrap().balance(), units(8_000));
}

#[test]
fn bulk_distribute_isolates_failures() {
    let mut engine = Engine::new();
    funded(&mut engine, 1, 10_000);
    let project = engine.add_project("Meadow").unwrap();
    let mut profits = Vec::new();
    for _ in 0..2 {
        let investment = engine
            .create_investment(InvestmentRequest::project(1, project, units(2_000)), 1)
            .unwrap();
        engine.approve_investment(investment.id, ADMIN).unwrap();
        let sale = engine
            .record_sale(SaleRequest::new(investment.id, units(2_500)), ADMIN)
            .unwrap();
        engine.complete_sale(sale).unwrap();
        profits.push(
            engine
                .calculate_sale_profit(sale, CalculationMode::Standard, ADMIN)
                .unwrap()
                .id,
        );
    }
    engine.distribute_profit(profits[0]).unwrap();

    let report = engine.bulk_distribute(&profits);
    assert_eq!(report.succeeded, vec![profits[1]]);
    assert!(matches!(
        report.failed.as_slice(),
        [(_, LedgerError::AlreadyDistributed(_))]
    ));
    assert_eq!(engine.wallet(1).unwrap().total_profits(), units(800));
}

#[test]
fn caller_reference_makes_creation_idempotent() {
    let mut engine = Engine::new();
    funded(&mut engine, 1, 10_000);
    let project = engine.add_project("Meadow").unwrap();
    let request = InvestmentRequest::project(1, project, units(2_000)).with_reference("ORDER-1");

    let investment = engine.create_investment(request.clone(), 1).unwrap();
    assert_eq!(investment.reference, "ORDER-1");
    assert_eq!(
        engine.create_investment(request, 1).map(|i| i.id),
        Err(LedgerError::DuplicateReference("ORDER-1".into()))
    );
    assert_eq!(
        engine
            .transaction_by_reference("ORDER-1")
            .and_then(|row| row.investment_id),
        Some(investment.id)
    );
    assert_eq!(engine.wallet(1).unwrap().frozen_amount(), units(2_000));
}

#[test]
fn sold_plot_rejects_new_allocations() {
    let mut engine = Engine::new();
    funded(&mut engine, 1, 10_000);
    let project = engine.add_project("Meadow").unwrap();
    let plot = engine.add_plot(project, units(2_000)).unwrap();
    let investment = engine
        .create_investment(
            InvestmentRequest::plots(1, units(2_000), vec![Allocation::new(plot, units(2_000))]),
            1,
        )
        .unwrap();
    engine.approve_investment(investment.id, ADMIN).unwrap();
    let sale = engine
        .record_sale(
            SaleRequest::new(investment.id, units(2_600)).with_plot(plot),
            ADMIN,
        )
        .unwrap();
    engine.complete_sale(sale).unwrap();

    let request =
        InvestmentRequest::plots(1, units(1_000), vec![Allocation::new(plot, units(1_000))]);
    assert_eq!(
        engine.create_investment(request, 1).map(|i| i.id),
        Err(LedgerError::PlotUnavailable(plot))
    );
}

#[test]
fn events_are_published_in_commit_order() {
    let sink = MemorySink::new();
    let mut engine = Engine::new().with_sink(sink.clone());
    funded(&mut engine, 1, 5_000);
    let project = engine.add_project("Meadow").unwrap();
    let investment = engine
        .create_investment(InvestmentRequest::project(1, project, units(2_000)), 1)
        .unwrap();
    engine.approve_investment(investment.id, ADMIN).unwrap();
    let _ = engine.approve_investment(investment.id, ADMIN);

    assert_eq!(
        sink.names(),
        vec![
            "deposit_requested",
            "deposit_confirmed",
            "registration_fee_paid",
            "investment_created",
            "investment_approved",
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_investments_cannot_overdraw() {
    let mut engine = Engine::new();
    funded(&mut engine, 1, 5_000);
    let project = engine.add_project("Meadow").unwrap();
    let shared = engine.into_shared();

    let mut handles = Vec::new();
    for _ in 0..6 {
        let shared = shared.clone();
        handles.push(tokio::spawn(async move {
            let mut engine = shared.lock().await;
            engine
                .create_investment(InvestmentRequest::project(1, project, units(2_000)), 1)
                .is_ok()
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        if handle.await.unwrap() {
            succeeded += 1;
        }
    }

    let engine = shared.lock().await;
    let wallet = engine.wallet(1).unwrap();
    assert_eq!(succeeded, 2);
    assert_eq!(wallet.frozen_amount(), units(4_000));
    assert_eq!(wallet.available(), units(1_000));
    assert!(engine.reconcile(1).unwrap().is_consistent());
}

#[test]
fn sale_of_a_plot_uses_the_given_cost_basis() {
    let mut engine = Engine::new();
    funded(&mut engine, 1, 10_000);
    let project = engine.add_project("Hillcrest").unwrap();
    let plot = engine.add_plot(project, units(3_000)).unwrap();

    let request =
        InvestmentRequest::plots(1, units(2_000), vec![Allocation::new(plot, units(2_000))])
            .with_project(project);
    let investment = engine.create_investment(request, 1).unwrap();
    assert_eq!(investment.investment_type, InvestmentType::Mixed);
    assert_eq!(investment.project, Some(project));
    engine.approve_investment(investment.id, ADMIN).unwrap();

    let sale = engine
        .record_sale(
            SaleRequest::new(investment.id, units(2_500))
                .with_plot(plot)
                .with_cost_basis(units(1_500)),
            ADMIN,
        )
        .unwrap();
    engine.complete_sale(sale).unwrap();
    assert_eq!(engine.plot(plot).unwrap().status, PlotStatus::Sold);

    let profit = engine
        .calculate_sale_profit(sale, CalculationMode::Standard, ADMIN)
        .unwrap();
    assert_eq!(profit.total_profit, units(1_000));
    assert_eq!(profit.company_share, units(200));
    assert_eq!(profit.total_investor_share, units(800));

    let profits: Vec<_> = engine.profits_for(1).map(|p| p.id).collect();
    assert_eq!(profits, vec![profit.id]);
    assert_eq!(engine.profits_for(2).count(), 0);
}

#[test]
fn reinvesting_into_plots_spawns_a_debited_investment() {
    let (mut engine, project, source, profit) = distributed_profit();
    let plot = engine.add_plot(project, units(20_000)).unwrap();
    assert_eq!(engine.wallet(1).unwrap().balance(), units(50_000));

    let reinvestment = engine
        .reinvest(
            ReinvestRequest::into_plots(
                profit,
                units(5_000),
                vec![Allocation::new(plot, units(5_000))],
            ),
            1,
        )
        .unwrap();
    assert_eq!(reinvestment.target_plot, Some(plot));
    assert_eq!(reinvestment.target_project, Some(project));

    let spawned = engine.investment(reinvestment.investment.unwrap()).unwrap();
    assert_eq!(spawned.investment_type, InvestmentType::Reinvestment);
    assert_eq!(spawned.funding, Funding::Debited);
    assert_eq!(spawned.status, InvestmentStatus::Pending);
    assert_eq!(spawned.source_investment_id, Some(source));
    assert_eq!(spawned.holdings.len(), 1);
    assert_eq!(spawned.holdings[0].percentage_owned, Percent::HUNDRED);

    assert_eq!(engine.wallet(1).unwrap().balance(), units(45_000));
    assert_eq!(
        engine.profit(profit).unwrap().reinvestment_status,
        ProfitReinvestmentStatus::Partial
    );
    assert_conserved(&engine, 1);
}

#[test]
fn an_investment_is_sold_only_once() {
    let (mut engine, _, investment, profit) = distributed_profit();
    let balance = engine.wallet(1).unwrap().balance();
    let rows = engine.journal().len();

    assert!(matches!(
        engine.record_sale(SaleRequest::new(investment, units(150_000)), ADMIN),
        Err(LedgerError::InvalidStateTransition { .. })
    ));
    assert_eq!(engine.wallet(1).unwrap().balance(), balance);
    assert_eq!(engine.journal().len(), rows);
    let profits: Vec<_> = engine.profits_for(1).map(|p| p.id).collect();
    assert_eq!(profits, vec![profit]);
}

#[test]
fn sale_plot_must_belong_to_the_investment() {
    let mut engine = Engine::new();
    funded(&mut engine, 1, 10_000);
    let lakeside = engine.add_project("Lakeside").unwrap();
    let hillside = engine.add_project("Hillside").unwrap();
    let foreign = engine.add_plot(hillside, units(2_000)).unwrap();
    let held = engine.add_plot(lakeside, units(2_000)).unwrap();
    let neighbour = engine.add_plot(lakeside, units(2_000)).unwrap();

    let by_project = engine
        .create_investment(InvestmentRequest::project(1, lakeside, units(2_000)), 1)
        .unwrap();
    engine.approve_investment(by_project.id, ADMIN).unwrap();
    assert!(matches!(
        engine.record_sale(
            SaleRequest::new(by_project.id, units(2_500)).with_plot(foreign),
            ADMIN
        ),
        Err(LedgerError::InvalidInput(_))
    ));

    let by_plot = engine
        .create_investment(
            InvestmentRequest::plots(1, units(2_000), vec![Allocation::new(held, units(2_000))]),
            1,
        )
        .unwrap();
    engine.approve_investment(by_plot.id, ADMIN).unwrap();
    assert!(matches!(
        engine.record_sale(
            SaleRequest::new(by_plot.id, units(2_500)).with_plot(neighbour),
            ADMIN
        ),
        Err(LedgerError::InvalidInput(_))
    ));
    assert_eq!(engine.plot(foreign).unwrap().status, PlotStatus::Available);
    assert_eq!(engine.plot(neighbour).unwrap().status, PlotStatus::Available);

    let sale = engine
        .record_sale(
            SaleRequest::new(by_project.id, units(2_500)).with_plot(neighbour),
            ADMIN,
        )
        .unwrap();
    engine.complete_sale(sale).unwrap();
    assert_eq!(engine.plot(neighbour).unwrap().status, PlotStatus::Sold);
}
