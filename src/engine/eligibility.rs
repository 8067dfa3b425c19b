//! Investor profiles and the pre-investment eligibility gate.

use serde::Serialize;

use crate::Amount;
use crate::config::LedgerConfig;

/// What the ledger knows about a user, as reported by the account, KYC and
/// team collaborators.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserProfile {
    pub account_active: bool,
    pub kyc_verified: bool,
    /// Registration fee paid so far, accumulated by `pay_registration_fee`.
    pub registration_fee_paid: Amount,
    pub team_leader: bool,
    /// Members in the team this user leads.
    pub team_member_count: u32,
    /// Belongs to someone else's team.
    pub team_member: bool,
}

impl UserProfile {
    /// An active, KYC-verified user with no fee paid and no team.
    pub fn verified() -> Self {
        Self {
            account_active: true,
            kyc_verified: true,
            ..Self::default()
        }
    }

    /// Team bonus applies to leaders and members alike.
    pub fn in_team(&self) -> bool {
        self.team_leader || self.team_member
    }
}

/// Evaluate every eligibility condition and return the reasons that fail.
/// An empty list means the user may invest.
pub fn check_eligibility(
    profile: &UserProfile,
    available: Amount,
    config: &LedgerConfig,
) -> Vec<String> {
    let mut reasons = Vec::new();

    if !profile.account_active {
        reasons.push("account is not active".to_string());
    }
    if !profile.kyc_verified {
        reasons.push("KYC verification is not complete".to_string());
    }
    if profile.registration_fee_paid < config.min_registration_fee {
        reasons.push(format!(
            "registration fee paid {} is below the required {}",
            profile.registration_fee_paid, config.min_registration_fee
        ));
    }
    if available < config.min_investment {
        reasons.push(format!(
            "available balance {available} is below the minimum investment {}",
            config.min_investment
        ));
    }
    if profile.team_leader && profile.team_member_count < config.min_team_members {
        reasons.push(format!(
            "team has {} members, at least {} required",
            profile.team_member_count, config.min_team_members
        ));
    }

    reasons
}
