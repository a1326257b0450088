use anyhow::Context;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::adjuster::{self, BalanceDelta, Placement};
use crate::domain::{
    CashAccount, CashAccountId, Cents, Entry, EntryDetails, EntryId, IncomeSource,
    IntegrityReport, OutcomeCategory, Person, PersonId, Week, WeekId, build_integrity_report,
    format_cents,
};
use crate::storage::{EntryFilter, Repository, StoreConfig};

use super::{AppError, ErrorKind};

/// Application service providing the ledger operations.
/// Every mutation of an entry and the balance change it implies run in one
/// unit of work: both are committed or neither is.
pub struct LedgerService {
    repo: Repository,
}

/// Input for recording a new income or outcome.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub cash_id: CashAccountId,
    pub week_id: WeekId,
    pub date: NaiveDate,
    pub amount: Cents,
    pub details: EntryDetails,
}

impl NewEntry {
    pub fn income(
        cash_id: CashAccountId,
        week_id: WeekId,
        date: NaiveDate,
        amount: Cents,
        source: IncomeSource,
    ) -> Self {
        Self {
            cash_id,
            week_id,
            date,
            amount,
            details: EntryDetails::Income {
                person_id: None,
                source,
            },
        }
    }

    pub fn outcome(
        cash_id: CashAccountId,
        week_id: WeekId,
        date: NaiveDate,
        amount: Cents,
        description: impl Into<String>,
        category: OutcomeCategory,
    ) -> Self {
        Self {
            cash_id,
            week_id,
            date,
            amount,
            details: EntryDetails::Outcome {
                description: description.into(),
                category,
            },
        }
    }

    /// Attribute an income to a person. Has no effect on outcomes.
    pub fn with_person(mut self, id: PersonId) -> Self {
        if let EntryDetails::Income { person_id, .. } = &mut self.details {
            *person_id = Some(id);
        }
        self
    }
}

/// Partial update of an entry. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct EntryUpdate {
    pub amount: Option<Cents>,
    pub cash_id: Option<CashAccountId>,
    pub week_id: Option<WeekId>,
    pub date: Option<NaiveDate>,
    /// `Some(None)` detaches the income from its person
    pub person_id: Option<Option<PersonId>>,
    pub source: Option<IncomeSource>,
    pub description: Option<String>,
    pub category: Option<OutcomeCategory>,
}

impl EntryUpdate {
    fn validate(&self) -> Result<(), AppError> {
        if let Some(amount) = self.amount {
            validate_amount(amount)?;
        }
        if let Some(description) = &self.description {
            validate_description(description)?;
        }
        Ok(())
    }

    /// Produce the entry as it will look after the update.
    fn apply_to(&self, existing: &Entry) -> Result<Entry, AppError> {
        let mut entry = existing.clone();

        if let Some(amount) = self.amount {
            entry.amount = amount;
        }
        if let Some(cash_id) = self.cash_id {
            entry.cash_id = cash_id;
        }
        if let Some(week_id) = self.week_id {
            entry.week_id = week_id;
        }
        if let Some(date) = self.date {
            entry.date = date;
        }

        match &mut entry.details {
            EntryDetails::Income { person_id, source } => {
                if self.description.is_some() {
                    return Err(income_field_error("description"));
                }
                if self.category.is_some() {
                    return Err(income_field_error("category"));
                }
                if let Some(new_person) = self.person_id {
                    *person_id = new_person;
                }
                if let Some(new_source) = self.source {
                    *source = new_source;
                }
            }
            EntryDetails::Outcome {
                description,
                category,
            } => {
                if self.person_id.is_some() {
                    return Err(outcome_field_error("person"));
                }
                if self.source.is_some() {
                    return Err(outcome_field_error("source"));
                }
                if let Some(new_description) = &self.description {
                    *description = new_description.trim().to_string();
                }
                if let Some(new_category) = self.category {
                    *category = new_category;
                }
            }
        }

        entry.updated_at = Utc::now();
        Ok(entry)
    }
}

fn income_field_error(field: &'static str) -> AppError {
    AppError::InvalidField {
        field,
        reason: "incomes do not have this field".to_string(),
    }
}

fn outcome_field_error(field: &'static str) -> AppError {
    AppError::InvalidField {
        field,
        reason: "outcomes do not have this field".to_string(),
    }
}

/// An entry together with the name of the cash account it belongs to.
#[derive(Debug, Clone, Serialize)]
pub struct EntryInfo {
    pub entry: Entry,
    pub cash_account_name: String,
}

impl LedgerService {
    /// Create a new ledger service with the given repository.
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Create the database if needed and bring its schema up to date.
    pub async fn init(config: &StoreConfig) -> Result<Self, AppError> {
        let config = config.clone().with_create_if_missing(true);
        let repo = Repository::init(&config).await?;
        Ok(Self::new(repo))
    }

    /// Connect to an existing database.
    pub async fn connect(config: &StoreConfig) -> Result<Self, AppError> {
        let repo = Repository::connect(config).await?;
        Ok(Self::new(repo))
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    // ========================
    // Cash account operations
    // ========================

    /// Create a new cash account starting at `opening_balance`.
    #[instrument(skip(self))]
    pub async fn create_cash_account(
        &self,
        name: String,
        opening_balance: Cents,
        soft_limit: Option<Cents>,
    ) -> Result<CashAccount, AppError> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::MissingField("name"));
        }
        if self.repo.get_cash_account_by_name(&name).await?.is_some() {
            return Err(AppError::CashAccountAlreadyExists(name));
        }

        let mut account = CashAccount::new(name, opening_balance);
        if let Some(limit) = soft_limit {
            account = account.with_soft_limit(limit);
        }

        self.repo
            .save_cash_account(&account)
            .await
            .map_err(|e| match AppError::from(e) {
                AppError::AlreadyExists(_) => {
                    AppError::CashAccountAlreadyExists(account.name.clone())
                }
                other => other,
            })?;

        info!(cash_id = %account.id, opening = %format_cents(opening_balance), "Cash account created");
        Ok(account)
    }

    /// Get a cash account by ID.
    pub async fn get_cash_account(&self, id: CashAccountId) -> Result<CashAccount, AppError> {
        self.repo
            .get_cash_account(id)
            .await?
            .ok_or_else(|| AppError::CashAccountNotFound(id.to_string()))
    }

    /// Get a cash account by name.
    pub async fn get_cash_account_by_name(&self, name: &str) -> Result<CashAccount, AppError> {
        self.repo
            .get_cash_account_by_name(name)
            .await?
            .ok_or_else(|| AppError::CashAccountNotFound(name.to_string()))
    }

    /// List all cash accounts with their current balances.
    pub async fn list_cash_accounts(&self) -> Result<Vec<CashAccount>, AppError> {
        Ok(self.repo.list_cash_accounts().await?)
    }

    /// Current stored balance. Always read from the store.
    pub async fn get_cash_account_balance(&self, id: CashAccountId) -> Result<Cents, AppError> {
        self.repo
            .fetch_balance(id)
            .await?
            .ok_or_else(|| AppError::CashAccountNotFound(id.to_string()))
    }

    // ========================
    // Week and person operations
    // ========================

    /// Register a week spanning `start_date..=end_date`.
    pub async fn create_week(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        label: Option<String>,
    ) -> Result<Week, AppError> {
        let mut week = Week::new(start_date, end_date);
        if !week.is_valid() {
            return Err(AppError::InvalidWeek(format!(
                "start {} is after end {}",
                start_date, end_date
            )));
        }
        if let Some(label) = label {
            week = week.with_label(label);
        }

        self.repo.save_week(&week).await?;
        Ok(week)
    }

    pub async fn get_week(&self, id: WeekId) -> Result<Week, AppError> {
        self.repo
            .get_week(id)
            .await?
            .ok_or_else(|| AppError::WeekNotFound(id.to_string()))
    }

    pub async fn list_weeks(&self) -> Result<Vec<Week>, AppError> {
        Ok(self.repo.list_weeks().await?)
    }

    /// Register a person incomes can be attributed to.
    pub async fn create_person(&self, name: String) -> Result<Person, AppError> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::MissingField("name"));
        }
        if self.repo.get_person_by_name(&name).await?.is_some() {
            return Err(AppError::PersonAlreadyExists(name));
        }

        let person = Person::new(name);
        self.repo
            .save_person(&person)
            .await
            .map_err(|e| match AppError::from(e) {
                AppError::AlreadyExists(_) => AppError::PersonAlreadyExists(person.name.clone()),
                other => other,
            })?;
        Ok(person)
    }

    pub async fn get_person_by_name(&self, name: &str) -> Result<Person, AppError> {
        self.repo
            .get_person_by_name(name)
            .await?
            .ok_or_else(|| AppError::PersonNotFound(name.to_string()))
    }

    pub async fn list_people(&self) -> Result<Vec<Person>, AppError> {
        Ok(self.repo.list_people().await?)
    }

    // ========================
    // Entry operations
    // ========================

    /// Record a new entry and credit or debit its cash account.
    #[instrument(skip(self, new_entry), fields(kind = %new_entry.details.kind(), cash_id = %new_entry.cash_id))]
    pub async fn create_entry(&self, new_entry: NewEntry) -> Result<Entry, AppError> {
        self.run_create(new_entry)
            .await
            .inspect_err(|e| log_rollback("create", e))
    }

    async fn run_create(&self, new_entry: NewEntry) -> Result<Entry, AppError> {
        validate_amount(new_entry.amount)?;
        if let EntryDetails::Outcome { description, .. } = &new_entry.details {
            validate_description(description)?;
        }

        let mut details = new_entry.details;
        if let EntryDetails::Outcome { description, .. } = &mut details {
            *description = description.trim().to_string();
        }
        let entry = Entry::new(
            new_entry.cash_id,
            new_entry.week_id,
            new_entry.date,
            new_entry.amount,
            details,
        );

        let mut tx = self.repo.begin().await?;

        ensure_cash_account(&mut tx, entry.cash_id).await?;
        ensure_week(&mut tx, entry.week_id).await?;
        if let Some(person_id) = entry.person_id() {
            ensure_person(&mut tx, person_id).await?;
        }

        Repository::insert_entry(&mut tx, &entry).await?;

        let delta = adjuster::creation_delta(entry.kind(), entry.cash_id, entry.amount)?;
        apply_deltas(&mut tx, &[delta]).await?;

        tx.commit().await.context("Failed to commit unit of work")?;

        info!(
            entry_id = %entry.id,
            delta = %format_cents(delta.delta),
            "Entry created"
        );
        Ok(entry)
    }

    /// Change an entry. Amount or cash account changes rebalance the affected
    /// cash account(s) in the same unit of work as the entry edit.
    #[instrument(skip(self, update), fields(entry_id = %id))]
    pub async fn update_entry(&self, id: EntryId, update: EntryUpdate) -> Result<Entry, AppError> {
        self.run_update(id, update)
            .await
            .inspect_err(|e| log_rollback("update", e))
    }

    async fn run_update(&self, id: EntryId, update: EntryUpdate) -> Result<Entry, AppError> {
        update.validate()?;

        let mut tx = self.repo.begin().await?;

        let existing = Repository::find_entry(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::EntryNotFound(id.to_string()))?;
        let updated = update.apply_to(&existing)?;

        if updated.cash_id != existing.cash_id {
            ensure_cash_account(&mut tx, updated.cash_id).await?;
        }
        if updated.week_id != existing.week_id {
            ensure_week(&mut tx, updated.week_id).await?;
        }
        if let Some(person_id) = updated.person_id() {
            if existing.person_id() != Some(person_id) {
                ensure_person(&mut tx, person_id).await?;
            }
        }

        let deltas = adjuster::update_deltas(
            existing.kind(),
            Placement::new(existing.cash_id, existing.amount),
            Placement::new(updated.cash_id, updated.amount),
        )?;
        apply_deltas(&mut tx, &deltas).await?;

        if !Repository::update_entry(&mut tx, &updated).await? {
            return Err(AppError::EntryNotFound(id.to_string()));
        }

        tx.commit().await.context("Failed to commit unit of work")?;

        info!(
            entry_id = %updated.id,
            moved = updated.cash_id != existing.cash_id,
            adjustments = deltas.len(),
            "Entry updated"
        );
        Ok(updated)
    }

    /// Delete an entry and reverse its effect on its cash account.
    /// Returns the removed entry.
    #[instrument(skip(self), fields(entry_id = %id))]
    pub async fn delete_entry(&self, id: EntryId) -> Result<Entry, AppError> {
        self.run_delete(id)
            .await
            .inspect_err(|e| log_rollback("delete", e))
    }

    async fn run_delete(&self, id: EntryId) -> Result<Entry, AppError> {
        let mut tx = self.repo.begin().await?;

        let existing = Repository::find_entry(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::EntryNotFound(id.to_string()))?;

        if !Repository::delete_entry(&mut tx, existing.kind(), id).await? {
            return Err(AppError::EntryNotFound(id.to_string()));
        }

        let delta = adjuster::deletion_delta(existing.kind(), existing.cash_id, existing.amount)?;
        apply_deltas(&mut tx, &[delta]).await?;

        tx.commit().await.context("Failed to commit unit of work")?;

        info!(
            entry_id = %existing.id,
            delta = %format_cents(delta.delta),
            "Entry deleted"
        );
        Ok(existing)
    }

    /// Get an entry by ID, `None` if it does not exist.
    pub async fn get_entry(&self, id: EntryId) -> Result<Option<Entry>, AppError> {
        Ok(self.repo.get_entry(id).await?)
    }

    /// Get an entry with its cash account name, read from one snapshot.
    pub async fn get_entry_info(&self, id: EntryId) -> Result<EntryInfo, AppError> {
        let (entry, cash_account_name) = self
            .repo
            .get_entry_with_account(id)
            .await?
            .ok_or_else(|| AppError::EntryNotFound(id.to_string()))?;

        Ok(EntryInfo {
            entry,
            cash_account_name,
        })
    }

    /// List entries matching the filter.
    pub async fn list_entries(&self, filter: &EntryFilter) -> Result<Vec<Entry>, AppError> {
        Ok(self.repo.list_entries(filter).await?)
    }

    // ========================
    // Integrity operations
    // ========================

    /// Recompute every balance from its entries and report disagreements.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, AppError> {
        let (totals, stats) = self.repo.integrity_snapshot().await?;

        let report = build_integrity_report(
            &totals,
            stats.income_count,
            stats.outcome_count,
            stats.invalid_amounts,
        );
        if !report.is_ok() {
            warn!(mismatches = report.mismatches.len(), "Ledger integrity check failed");
        }
        Ok(report)
    }
}

fn validate_amount(amount: Cents) -> Result<(), AppError> {
    if amount <= 0 {
        return Err(AppError::InvalidAmount(format!(
            "{} must be positive",
            format_cents(amount)
        )));
    }
    Ok(())
}

fn validate_description(description: &str) -> Result<(), AppError> {
    if description.trim().is_empty() {
        return Err(AppError::MissingField("description"));
    }
    Ok(())
}

async fn ensure_cash_account(
    conn: &mut SqliteConnection,
    id: CashAccountId,
) -> Result<CashAccount, AppError> {
    Repository::fetch_cash_account(conn, id)
        .await?
        .ok_or_else(|| AppError::CashAccountNotFound(id.to_string()))
}

async fn ensure_week(conn: &mut SqliteConnection, id: WeekId) -> Result<(), AppError> {
    if !Repository::week_exists(conn, id).await? {
        return Err(AppError::WeekNotFound(id.to_string()));
    }
    Ok(())
}

async fn ensure_person(conn: &mut SqliteConnection, id: PersonId) -> Result<(), AppError> {
    if !Repository::person_exists(conn, id).await? {
        return Err(AppError::PersonNotFound(id.to_string()));
    }
    Ok(())
}

/// Write each delta to its cash account inside the caller's unit of work.
///
/// Each balance is read and written back under the unit of work's write lock,
/// so the compare-and-set only misses when something outside this service
/// rewrote the row without taking that lock. The caller then sees
/// `BalanceConflict` and the whole unit of work rolls back.
async fn apply_deltas(conn: &mut SqliteConnection, deltas: &[BalanceDelta]) -> Result<(), AppError> {
    for delta in deltas {
        let account = ensure_cash_account(conn, delta.cash_id).await?;
        let balance = adjuster::apply_delta(account.balance, delta)?;

        if !Repository::write_balance(conn, account.id, account.balance, balance).await? {
            return Err(AppError::BalanceConflict(account.id));
        }

        debug!(
            cash_id = %account.id,
            from = %format_cents(account.balance),
            to = %format_cents(balance),
            "Balance adjusted"
        );
    }
    Ok(())
}

fn log_rollback(operation: &str, err: &AppError) {
    match err.kind() {
        ErrorKind::Conflict if err.is_retryable() => {
            warn!(operation, error = %err, "Unit of work rolled back, safe to retry")
        }
        ErrorKind::Store => error!(operation, error = %err, "Unit of work rolled back"),
        _ => debug!(operation, error = %err, "Operation rejected"),
    }
}
