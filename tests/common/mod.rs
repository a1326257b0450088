// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::time::Duration;

use anyhow::Result;
use cashbox::application::{LedgerService, NewEntry};
use cashbox::domain::{CashAccount, Cents, Entry, IncomeSource, OutcomeCategory, Week};
use cashbox::storage::StoreConfig;
use chrono::NaiveDate;
use tempfile::TempDir;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService, TempDir)> {
    test_service_with_timeout(Duration::from_secs(5)).await
}

/// Same as `test_service` with a custom lock timeout
pub async fn test_service_with_timeout(lock_timeout: Duration) -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let config = StoreConfig::new(temp_dir.path().join("test.db"))
        .with_max_connections(4)
        .with_lock_timeout(lock_timeout);
    let service = LedgerService::init(&config).await?;
    Ok((service, temp_dir))
}

/// Helper to parse a date string into NaiveDate
pub fn parse_date(date_str: &str) -> NaiveDate {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d").unwrap()
}

/// Test fixture: two cash accounts and one week
pub struct Books {
    pub main: CashAccount,
    pub reserve: CashAccount,
    pub week: Week,
}

impl Books {
    /// `Main` opens at 100.00, `Reserve` at 0.00
    pub async fn create(service: &LedgerService) -> Result<Self> {
        let main = service
            .create_cash_account("Main".into(), 10000, None)
            .await?;
        let reserve = service
            .create_cash_account("Reserve".into(), 0, None)
            .await?;
        let week = service
            .create_week(parse_date("2024-05-06"), parse_date("2024-05-12"), None)
            .await?;
        Ok(Self {
            main,
            reserve,
            week,
        })
    }

    pub async fn income(&self, service: &LedgerService, amount: Cents) -> Result<Entry> {
        Ok(service
            .create_entry(NewEntry::income(
                self.main.id,
                self.week.id,
                parse_date("2024-05-07"),
                amount,
                IncomeSource::Contribution,
            ))
            .await?)
    }

    pub async fn outcome(&self, service: &LedgerService, amount: Cents) -> Result<Entry> {
        Ok(service
            .create_entry(NewEntry::outcome(
                self.main.id,
                self.week.id,
                parse_date("2024-05-08"),
                amount,
                "Cleaning supplies",
                OutcomeCategory::Supplies,
            ))
            .await?)
    }
}

/// Balance as stored right now.
pub async fn balance_of(service: &LedgerService, account: &CashAccount) -> Result<Cents> {
    Ok(service.get_cash_account_balance(account.id).await?)
}
