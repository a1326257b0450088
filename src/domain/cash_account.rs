use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Cents;

pub type CashAccountId = Uuid;

/// A named cash box. The balance is derived from the ledger entries that
/// reference it and is only ever written by the ledger service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashAccount {
    pub id: CashAccountId,
    pub name: String,
    /// Balance the account started with, before any entry
    pub opening_balance: Cents,
    /// Stored running balance
    pub balance: Cents,
    /// Informational threshold, never enforced
    pub soft_limit: Option<Cents>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CashAccount {
    pub fn new(name: impl Into<String>, opening_balance: Cents) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            opening_balance,
            balance: opening_balance,
            soft_limit: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_soft_limit(mut self, soft_limit: Cents) -> Self {
        self.soft_limit = Some(soft_limit);
        self
    }

    /// Net effect of all entries on this account, `None` if it does not fit
    /// in `Cents`.
    pub fn net_movement(&self) -> Option<Cents> {
        self.balance.checked_sub(self.opening_balance)
    }

    /// True when the balance has dropped below the soft limit.
    pub fn is_below_soft_limit(&self) -> bool {
        self.soft_limit.is_some_and(|limit| self.balance < limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_account_starts_at_opening_balance() {
        let account = CashAccount::new("Main", 10000);
        assert_eq!(account.balance, 10000);
        assert_eq!(account.net_movement(), Some(0));
        assert!(account.soft_limit.is_none());
    }

    #[test]
    fn test_soft_limit_is_informational() {
        let mut account = CashAccount::new("Petty cash", 500).with_soft_limit(1000);
        assert!(account.is_below_soft_limit());

        account.balance = 1500;
        assert!(!account.is_below_soft_limit());
        assert_eq!(account.net_movement(), Some(1000));
    }

    #[test]
    fn test_net_movement_out_of_range() {
        let mut account = CashAccount::new("Vault", Cents::MAX);
        account.balance = -1;
        assert_eq!(account.net_movement(), None);
    }
}
