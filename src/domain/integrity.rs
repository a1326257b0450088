use serde::{Deserialize, Serialize};

use super::adjuster::derived_balance;
use super::{CashAccountId, Cents};

/// Stored and derived figures for one cash account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTotals {
    pub cash_id: CashAccountId,
    pub name: String,
    pub opening_balance: Cents,
    pub stored_balance: Cents,
    pub income_total: Cents,
    pub outcome_total: Cents,
}

impl AccountTotals {
    /// `None` when the entries imply a balance outside the `Cents` range.
    pub fn expected_balance(&self) -> Option<Cents> {
        derived_balance(self.opening_balance, self.income_total, self.outcome_total)
    }

    pub fn is_consistent(&self) -> bool {
        self.expected_balance() == Some(self.stored_balance)
    }
}

/// A cash account whose stored balance disagrees with its entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceMismatch {
    pub cash_id: CashAccountId,
    pub name: String,
    pub stored: Cents,
    /// `None` when the implied balance is out of range
    pub expected: Option<Cents>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub account_count: i64,
    pub income_count: i64,
    pub outcome_count: i64,
    pub mismatches: Vec<BalanceMismatch>,
    pub invalid_amounts: i64,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        self.mismatches.is_empty() && self.invalid_amounts == 0
    }
}

/// Compare every account's stored balance with the one its entries imply.
pub fn build_integrity_report(
    totals: &[AccountTotals],
    income_count: i64,
    outcome_count: i64,
    invalid_amounts: i64,
) -> IntegrityReport {
    let mismatches = totals
        .iter()
        .filter(|t| !t.is_consistent())
        .map(|t| BalanceMismatch {
            cash_id: t.cash_id,
            name: t.name.clone(),
            stored: t.stored_balance,
            expected: t.expected_balance(),
        })
        .collect();

    IntegrityReport {
        account_count: totals.len() as i64,
        income_count,
        outcome_count,
        mismatches,
        invalid_amounts,
    }
}
