//! Typed ledger settings.
//!
//! The engine never reads settings from a global store. It asks its
//! [`SettingsSource`] for a fresh [`LedgerConfig`] snapshot at the start of
//! every operation and passes that snapshot to the calculators and checks.

use std::env;

use thiserror::Error;

use crate::{Amount, Percent};

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key}: cannot parse '{value}'")]
    Parse { key: &'static str, value: String },

    #[error("{key}: {value} is outside 0..=100")]
    PercentOutOfRange { key: &'static str, value: Percent },

    #[error("{key}: must be greater than zero")]
    NotPositive { key: &'static str },
}

/// A snapshot of every setting the ledger consults.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerConfig {
    /// Smallest amount a single investment may commit.
    pub min_investment: Amount,
    /// Registration fee a user must have paid before investing.
    pub min_registration_fee: Amount,
    /// Members a team leader's team needs before the leader may invest.
    pub min_team_members: u32,
    /// Company cut of every sale profit.
    pub company_profit_percentage: Percent,
    /// Team bonus taken from the post-company remainder for team members.
    pub team_bonus_percentage: Percent,
    /// Share of a profit reinvested by automatic reinvestment.
    pub auto_reinvest_percentage: Percent,
    /// Return rate stamped on new investments.
    pub default_return_rate: Percent,
    /// Days from creation to the maturity date of new investments.
    pub maturity_days: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            min_investment: Amount::from_units(1_000),
            min_registration_fee: Amount::from_units(100),
            min_team_members: 5,
            company_profit_percentage: Percent::from_float(20.0),
            team_bonus_percentage: Percent::from_float(5.0),
            auto_reinvest_percentage: Percent::from_float(50.0),
            default_return_rate: Percent::from_float(12.0),
            maturity_days: 365,
        }
    }
}

impl LedgerConfig {
    /// Load settings from `LEDGER_*` environment variables, falling back to
    /// the defaults for unset keys.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load settings through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            min_investment: amount(&lookup, "LEDGER_MIN_INVESTMENT", defaults.min_investment)?,
            min_registration_fee: amount(
                &lookup,
                "LEDGER_MIN_REGISTRATION_FEE",
                defaults.min_registration_fee,
            )?,
            min_team_members: parsed(&lookup, "LEDGER_MIN_TEAM_MEMBERS", defaults.min_team_members)?,
            company_profit_percentage: percent(
                &lookup,
                "LEDGER_COMPANY_PROFIT_PERCENTAGE",
                defaults.company_profit_percentage,
            )?,
            team_bonus_percentage: percent(
                &lookup,
                "LEDGER_TEAM_BONUS_PERCENTAGE",
                defaults.team_bonus_percentage,
            )?,
            auto_reinvest_percentage: percent(
                &lookup,
                "LEDGER_AUTO_REINVEST_PERCENTAGE",
                defaults.auto_reinvest_percentage,
            )?,
            default_return_rate: percent(
                &lookup,
                "LEDGER_DEFAULT_RETURN_RATE",
                defaults.default_return_rate,
            )?,
            maturity_days: parsed(&lookup, "LEDGER_MATURITY_DAYS", defaults.maturity_days)?,
        };

        if !config.min_investment.is_positive() {
            return Err(ConfigError::NotPositive {
                key: "LEDGER_MIN_INVESTMENT",
            });
        }

        Ok(config)
    }
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Parse { key, value }),
        None => Ok(default),
    }
}

fn amount(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Amount,
) -> Result<Amount, ConfigError> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .map(Amount::from_float)
            .map_err(|_| ConfigError::Parse { key, value: raw }),
        None => Ok(default),
    }
}

fn percent(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Percent,
) -> Result<Percent, ConfigError> {
    let value = match lookup(key) {
        Some(raw) => {
            let parsed: f64 = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::Parse { key, value: raw })?;
            Percent::from_float(parsed)
        }
        None => default,
    };
    if !value.is_valid_share() {
        return Err(ConfigError::PercentOutOfRange { key, value });
    }
    Ok(value)
}

/// Where the engine gets its settings from.
pub trait SettingsSource: Send {
    /// A fresh snapshot, taken once per operation.
    fn snapshot(&self) -> LedgerConfig;
}

impl SettingsSource for LedgerConfig {
    fn snapshot(&self) -> LedgerConfig {
        self.clone()
    }
}
