use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::domain::{
    AccountTotals, CashAccount, CashAccountId, Cents, Entry, EntryDetails, EntryId, EntryKind,
    IncomeSource, OutcomeCategory, Person, PersonId, Week, WeekId,
};

use super::{MIGRATION_001_INITIAL, StoreConfig};

/// An open unit of work. Dropping it without `commit` rolls everything back.
pub type UnitOfWork = Transaction<'static, Sqlite>;

const DATE_FORMAT: &str = "%Y-%m-%d";

const CASH_ACCOUNT_COLUMNS: &str =
    "id, name, opening_balance_cents, balance_cents, soft_limit_cents, created_at, updated_at";
const INCOME_COLUMNS: &str =
    "i.id, i.cash_id, i.week_id, i.person_id, i.date, i.amount_cents, i.source, i.created_at, i.updated_at";
const OUTCOME_COLUMNS: &str =
    "o.id, o.cash_id, o.week_id, o.date, o.amount_cents, o.description, o.category, o.created_at, o.updated_at";

/// Statistics for ledger integrity verification.
#[derive(Debug, Clone)]
pub struct IntegrityStats {
    pub income_count: i64,
    pub outcome_count: i64,
    pub invalid_amounts: i64,
}

/// Filter for querying entries. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub kind: Option<EntryKind>,
    pub cash_id: Option<CashAccountId>,
    pub week_id: Option<WeekId>,
    pub date: Option<NaiveDate>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    /// Incomes only
    pub person_id: Option<PersonId>,
    /// Incomes only
    pub source: Option<IncomeSource>,
    /// Outcomes only
    pub category: Option<OutcomeCategory>,
    pub limit: Option<usize>,
}

impl EntryFilter {
    fn includes_incomes(&self) -> bool {
        self.kind != Some(EntryKind::Outcome) && self.category.is_none()
    }

    fn includes_outcomes(&self) -> bool {
        self.kind != Some(EntryKind::Income) && self.person_id.is_none() && self.source.is_none()
    }
}

/// Repository for persisting and querying cash accounts and ledger entries.
///
/// Methods taking `&self` run on the pool; methods taking a
/// `&mut SqliteConnection` run inside a caller's unit of work.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a connection pool for the configured database.
    #[instrument(skip(config), fields(path = %config.database_path.display()))]
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(&config.database_path)
            .create_if_missing(config.create_if_missing)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(config.lock_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.lock_timeout)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        debug!(max_connections = config.max_connections, "Connection pool ready");
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(config: &StoreConfig) -> Result<Self> {
        let repo = Self::connect(config).await?;
        repo.migrate().await?;
        info!("Database schema ready");
        Ok(repo)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start a unit of work holding the database write lock.
    ///
    /// `BEGIN IMMEDIATE` takes the lock before the first read, so balances read
    /// inside the unit of work cannot go stale before they are written back.
    /// Waiting for the lock is bounded by the configured busy timeout.
    pub async fn begin(&self) -> Result<UnitOfWork> {
        self.pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .context("Failed to begin unit of work")
    }

    // ========================
    // Cash account operations
    // ========================

    /// Save a new cash account.
    pub async fn save_cash_account(&self, account: &CashAccount) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cash_accounts (id, name, opening_balance_cents, balance_cents, soft_limit_cents, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(account.id.to_string())
        .bind(&account.name)
        .bind(account.opening_balance)
        .bind(account.balance)
        .bind(account.soft_limit)
        .bind(account.created_at.to_rfc3339())
        .bind(account.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save cash account")?;
        Ok(())
    }

    /// Get a cash account by ID.
    pub async fn get_cash_account(&self, id: CashAccountId) -> Result<Option<CashAccount>> {
        let mut conn = self.pool.acquire().await.context("Failed to acquire connection")?;
        Self::fetch_cash_account(&mut conn, id).await
    }

    /// Get a cash account by name.
    pub async fn get_cash_account_by_name(&self, name: &str) -> Result<Option<CashAccount>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM cash_accounts WHERE name = ?",
            CASH_ACCOUNT_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch cash account by name")?;

        row.as_ref().map(Self::row_to_cash_account).transpose()
    }

    /// List all cash accounts ordered by name.
    pub async fn list_cash_accounts(&self) -> Result<Vec<CashAccount>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM cash_accounts ORDER BY name",
            CASH_ACCOUNT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list cash accounts")?;

        rows.iter().map(Self::row_to_cash_account).collect()
    }

    /// Read the stored balance of a cash account.
    pub async fn fetch_balance(&self, id: CashAccountId) -> Result<Option<Cents>> {
        let row = sqlx::query("SELECT balance_cents FROM cash_accounts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch balance")?;

        Ok(row.map(|row| row.get("balance_cents")))
    }

    /// Load a cash account on the given connection.
    pub async fn fetch_cash_account(
        conn: &mut SqliteConnection,
        id: CashAccountId,
    ) -> Result<Option<CashAccount>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM cash_accounts WHERE id = ?",
            CASH_ACCOUNT_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch cash account")?;

        row.as_ref().map(Self::row_to_cash_account).transpose()
    }

    /// Replace a cash account's balance, provided it still holds `expected`.
    /// Returns false when the row is gone or its balance moved underneath us.
    pub async fn write_balance(
        conn: &mut SqliteConnection,
        id: CashAccountId,
        expected: Cents,
        balance: Cents,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE cash_accounts
            SET balance_cents = ?, updated_at = ?
            WHERE id = ? AND balance_cents = ?
            "#,
        )
        .bind(balance)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .bind(expected)
        .execute(&mut *conn)
        .await
        .context("Failed to write balance")?;

        Ok(result.rows_affected() == 1)
    }

    fn row_to_cash_account(row: &SqliteRow) -> Result<CashAccount> {
        let id_str: String = row.get("id");
        let created_at_str: String = row.get("created_at");
        let updated_at_str: String = row.get("updated_at");

        Ok(CashAccount {
            id: Uuid::parse_str(&id_str).context("Invalid cash account ID")?,
            name: row.get("name"),
            opening_balance: row.get("opening_balance_cents"),
            balance: row.get("balance_cents"),
            soft_limit: row.get("soft_limit_cents"),
            created_at: parse_timestamp(&created_at_str).context("Invalid created_at")?,
            updated_at: parse_timestamp(&updated_at_str).context("Invalid updated_at")?,
        })
    }

    // ========================
    // Week and person operations
    // ========================

    /// Save a new week.
    pub async fn save_week(&self, week: &Week) -> Result<()> {
        sqlx::query("INSERT INTO weeks (id, start_date, end_date, label) VALUES (?, ?, ?, ?)")
            .bind(week.id.to_string())
            .bind(week.start_date.format(DATE_FORMAT).to_string())
            .bind(week.end_date.format(DATE_FORMAT).to_string())
            .bind(&week.label)
            .execute(&self.pool)
            .await
            .context("Failed to save week")?;
        Ok(())
    }

    /// Get a week by ID.
    pub async fn get_week(&self, id: WeekId) -> Result<Option<Week>> {
        let row = sqlx::query("SELECT id, start_date, end_date, label FROM weeks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch week")?;

        row.as_ref().map(Self::row_to_week).transpose()
    }

    /// List all weeks, oldest first.
    pub async fn list_weeks(&self) -> Result<Vec<Week>> {
        let rows = sqlx::query("SELECT id, start_date, end_date, label FROM weeks ORDER BY start_date")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list weeks")?;

        rows.iter().map(Self::row_to_week).collect()
    }

    pub async fn week_exists(conn: &mut SqliteConnection, id: WeekId) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM weeks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to look up week")?;
        Ok(row.is_some())
    }

    /// Save a new person.
    pub async fn save_person(&self, person: &Person) -> Result<()> {
        sqlx::query("INSERT INTO people (id, name, created_at) VALUES (?, ?, ?)")
            .bind(person.id.to_string())
            .bind(&person.name)
            .bind(person.created_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .context("Failed to save person")?;
        Ok(())
    }

    /// Get a person by name.
    pub async fn get_person_by_name(&self, name: &str) -> Result<Option<Person>> {
        let row = sqlx::query("SELECT id, name, created_at FROM people WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch person by name")?;

        row.as_ref().map(Self::row_to_person).transpose()
    }

    /// List all people ordered by name.
    pub async fn list_people(&self) -> Result<Vec<Person>> {
        let rows = sqlx::query("SELECT id, name, created_at FROM people ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list people")?;

        rows.iter().map(Self::row_to_person).collect()
    }

    pub async fn person_exists(conn: &mut SqliteConnection, id: PersonId) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM people WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to look up person")?;
        Ok(row.is_some())
    }

    fn row_to_week(row: &SqliteRow) -> Result<Week> {
        let id_str: String = row.get("id");
        let start_str: String = row.get("start_date");
        let end_str: String = row.get("end_date");

        Ok(Week {
            id: Uuid::parse_str(&id_str).context("Invalid week ID")?,
            start_date: parse_date(&start_str).context("Invalid start_date")?,
            end_date: parse_date(&end_str).context("Invalid end_date")?,
            label: row.get("label"),
        })
    }

    fn row_to_person(row: &SqliteRow) -> Result<Person> {
        let id_str: String = row.get("id");
        let created_at_str: String = row.get("created_at");

        Ok(Person {
            id: Uuid::parse_str(&id_str).context("Invalid person ID")?,
            name: row.get("name"),
            created_at: parse_timestamp(&created_at_str).context("Invalid created_at")?,
        })
    }

    // ========================
    // Entry operations
    // ========================

    /// Insert a new entry into the table matching its kind.
    pub async fn insert_entry(conn: &mut SqliteConnection, entry: &Entry) -> Result<()> {
        match &entry.details {
            EntryDetails::Income { person_id, source } => {
                sqlx::query(
                    r#"
                    INSERT INTO incomes (id, cash_id, week_id, person_id, date, amount_cents, source, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(entry.id.to_string())
                .bind(entry.cash_id.to_string())
                .bind(entry.week_id.to_string())
                .bind(person_id.map(|id| id.to_string()))
                .bind(entry.date.format(DATE_FORMAT).to_string())
                .bind(entry.amount)
                .bind(source.as_str())
                .bind(entry.created_at.to_rfc3339())
                .bind(entry.updated_at.to_rfc3339())
                .execute(&mut *conn)
                .await
                .context("Failed to insert income")?;
            }
            EntryDetails::Outcome {
                description,
                category,
            } => {
                sqlx::query(
                    r#"
                    INSERT INTO outcomes (id, cash_id, week_id, date, amount_cents, description, category, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(entry.id.to_string())
                .bind(entry.cash_id.to_string())
                .bind(entry.week_id.to_string())
                .bind(entry.date.format(DATE_FORMAT).to_string())
                .bind(entry.amount)
                .bind(description)
                .bind(category.as_str())
                .bind(entry.created_at.to_rfc3339())
                .bind(entry.updated_at.to_rfc3339())
                .execute(&mut *conn)
                .await
                .context("Failed to insert outcome")?;
            }
        }
        Ok(())
    }

    /// Overwrite the stored row of an existing entry. Returns false if it is gone.
    pub async fn update_entry(conn: &mut SqliteConnection, entry: &Entry) -> Result<bool> {
        let result = match &entry.details {
            EntryDetails::Income { person_id, source } => sqlx::query(
                r#"
                UPDATE incomes
                SET cash_id = ?, week_id = ?, person_id = ?, date = ?, amount_cents = ?, source = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(entry.cash_id.to_string())
            .bind(entry.week_id.to_string())
            .bind(person_id.map(|id| id.to_string()))
            .bind(entry.date.format(DATE_FORMAT).to_string())
            .bind(entry.amount)
            .bind(source.as_str())
            .bind(entry.updated_at.to_rfc3339())
            .bind(entry.id.to_string())
            .execute(&mut *conn)
            .await
            .context("Failed to update income")?,
            EntryDetails::Outcome {
                description,
                category,
            } => sqlx::query(
                r#"
                UPDATE outcomes
                SET cash_id = ?, week_id = ?, date = ?, amount_cents = ?, description = ?, category = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(entry.cash_id.to_string())
            .bind(entry.week_id.to_string())
            .bind(entry.date.format(DATE_FORMAT).to_string())
            .bind(entry.amount)
            .bind(description)
            .bind(category.as_str())
            .bind(entry.updated_at.to_rfc3339())
            .bind(entry.id.to_string())
            .execute(&mut *conn)
            .await
            .context("Failed to update outcome")?,
        };

        Ok(result.rows_affected() == 1)
    }

    /// Delete an entry row. Returns false if there was nothing to delete.
    pub async fn delete_entry(
        conn: &mut SqliteConnection,
        kind: EntryKind,
        id: EntryId,
    ) -> Result<bool> {
        let query = match kind {
            EntryKind::Income => "DELETE FROM incomes WHERE id = ?",
            EntryKind::Outcome => "DELETE FROM outcomes WHERE id = ?",
        };

        let result = sqlx::query(query)
            .bind(id.to_string())
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to delete {}", kind))?;

        Ok(result.rows_affected() == 1)
    }

    /// Look an entry up by ID in both entry tables.
    pub async fn find_entry(conn: &mut SqliteConnection, id: EntryId) -> Result<Option<Entry>> {
        let id_str = id.to_string();

        let income = sqlx::query(&format!(
            "SELECT {} FROM incomes i WHERE i.id = ?",
            INCOME_COLUMNS
        ))
        .bind(&id_str)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch income")?;

        if let Some(row) = income {
            return Ok(Some(Self::row_to_income(&row)?));
        }

        let outcome = sqlx::query(&format!(
            "SELECT {} FROM outcomes o WHERE o.id = ?",
            OUTCOME_COLUMNS
        ))
        .bind(&id_str)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch outcome")?;

        outcome.as_ref().map(Self::row_to_outcome).transpose()
    }

    /// Get an entry by ID.
    pub async fn get_entry(&self, id: EntryId) -> Result<Option<Entry>> {
        let mut conn = self.pool.acquire().await.context("Failed to acquire connection")?;
        Self::find_entry(&mut conn, id).await
    }

    /// Get an entry together with the name of its cash account.
    /// Each lookup is a single joined statement, so both come from one snapshot.
    pub async fn get_entry_with_account(&self, id: EntryId) -> Result<Option<(Entry, String)>> {
        let id_str = id.to_string();

        let income = sqlx::query(&format!(
            "SELECT {}, c.name AS cash_name FROM incomes i JOIN cash_accounts c ON c.id = i.cash_id WHERE i.id = ?",
            INCOME_COLUMNS
        ))
        .bind(&id_str)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch income with account")?;

        if let Some(row) = income {
            return Ok(Some((Self::row_to_income(&row)?, row.get("cash_name"))));
        }

        let outcome = sqlx::query(&format!(
            "SELECT {}, c.name AS cash_name FROM outcomes o JOIN cash_accounts c ON c.id = o.cash_id WHERE o.id = ?",
            OUTCOME_COLUMNS
        ))
        .bind(&id_str)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch outcome with account")?;

        match outcome {
            Some(row) => Ok(Some((Self::row_to_outcome(&row)?, row.get("cash_name")))),
            None => Ok(None),
        }
    }

    /// List entries matching the filter, ordered by date then creation time.
    pub async fn list_entries(&self, filter: &EntryFilter) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();

        if filter.includes_incomes() {
            entries.extend(self.list_kind(EntryKind::Income, filter).await?);
        }
        if filter.includes_outcomes() {
            entries.extend(self.list_kind(EntryKind::Outcome, filter).await?);
        }

        entries.sort_by(|a, b| (a.date, a.created_at).cmp(&(b.date, b.created_at)));
        if let Some(limit) = filter.limit {
            entries.truncate(limit);
        }

        Ok(entries)
    }

    async fn list_kind(&self, kind: EntryKind, filter: &EntryFilter) -> Result<Vec<Entry>> {
        let (columns, table, alias) = match kind {
            EntryKind::Income => (INCOME_COLUMNS, "incomes", "i"),
            EntryKind::Outcome => (OUTCOME_COLUMNS, "outcomes", "o"),
        };

        // Build query dynamically based on filters
        let mut query = format!("SELECT {} FROM {} {} WHERE 1=1", columns, table, alias);
        let mut bindings: Vec<String> = Vec::new();

        if let Some(cash_id) = filter.cash_id {
            query.push_str(&format!(" AND {}.cash_id = ?", alias));
            bindings.push(cash_id.to_string());
        }
        if let Some(week_id) = filter.week_id {
            query.push_str(&format!(" AND {}.week_id = ?", alias));
            bindings.push(week_id.to_string());
        }
        if let Some(date) = filter.date {
            query.push_str(&format!(" AND {}.date = ?", alias));
            bindings.push(date.format(DATE_FORMAT).to_string());
        }
        if let Some(from_date) = filter.from_date {
            query.push_str(&format!(" AND {}.date >= ?", alias));
            bindings.push(from_date.format(DATE_FORMAT).to_string());
        }
        if let Some(to_date) = filter.to_date {
            query.push_str(&format!(" AND {}.date <= ?", alias));
            bindings.push(to_date.format(DATE_FORMAT).to_string());
        }
        match kind {
            EntryKind::Income => {
                if let Some(person_id) = filter.person_id {
                    query.push_str(" AND i.person_id = ?");
                    bindings.push(person_id.to_string());
                }
                if let Some(source) = filter.source {
                    query.push_str(" AND i.source = ?");
                    bindings.push(source.as_str().to_string());
                }
            }
            EntryKind::Outcome => {
                if let Some(category) = filter.category {
                    query.push_str(" AND o.category = ?");
                    bindings.push(category.as_str().to_string());
                }
            }
        }

        query.push_str(&format!(" ORDER BY {0}.date, {0}.created_at", alias));
        if let Some(limit) = filter.limit {
            query.push_str(&format!(" LIMIT {}", limit));
        }

        let mut sql_query = sqlx::query(&query);
        for value in &bindings {
            sql_query = sql_query.bind(value);
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to list {} entries", kind))?;

        match kind {
            EntryKind::Income => rows.iter().map(Self::row_to_income).collect(),
            EntryKind::Outcome => rows.iter().map(Self::row_to_outcome).collect(),
        }
    }

    fn row_to_income(row: &SqliteRow) -> Result<Entry> {
        let person_str: Option<String> = row.get("person_id");
        let source_str: String = row.get("source");

        let details = EntryDetails::Income {
            person_id: person_str
                .map(|s| Uuid::parse_str(&s))
                .transpose()
                .context("Invalid person ID")?,
            source: source_str
                .parse::<IncomeSource>()
                .context("Invalid income source")?,
        };
        Self::row_to_entry(row, details)
    }

    fn row_to_outcome(row: &SqliteRow) -> Result<Entry> {
        let category_str: String = row.get("category");

        let details = EntryDetails::Outcome {
            description: row.get("description"),
            category: category_str
                .parse::<OutcomeCategory>()
                .context("Invalid outcome category")?,
        };
        Self::row_to_entry(row, details)
    }

    fn row_to_entry(row: &SqliteRow, details: EntryDetails) -> Result<Entry> {
        let id_str: String = row.get("id");
        let cash_str: String = row.get("cash_id");
        let week_str: String = row.get("week_id");
        let date_str: String = row.get("date");
        let created_at_str: String = row.get("created_at");
        let updated_at_str: String = row.get("updated_at");

        Ok(Entry {
            id: Uuid::parse_str(&id_str).context("Invalid entry ID")?,
            cash_id: Uuid::parse_str(&cash_str).context("Invalid cash account ID")?,
            week_id: Uuid::parse_str(&week_str).context("Invalid week ID")?,
            date: parse_date(&date_str).context("Invalid entry date")?,
            amount: row.get("amount_cents"),
            details,
            created_at: parse_timestamp(&created_at_str).context("Invalid created_at")?,
            updated_at: parse_timestamp(&updated_at_str).context("Invalid updated_at")?,
        })
    }

    // ========================
    // Integrity operations
    // ========================

    /// Account totals and entry counts read from a single snapshot.
    ///
    /// A deferred read transaction pins the WAL snapshot at its first read, so
    /// writers committing in between cannot make the two halves disagree.
    pub async fn integrity_snapshot(&self) -> Result<(Vec<AccountTotals>, IntegrityStats)> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin integrity read")?;

        let totals = Self::account_totals(&mut tx).await?;
        let stats = Self::get_integrity_stats(&mut tx).await?;

        tx.commit().await.context("Failed to end integrity read")?;
        Ok((totals, stats))
    }

    /// Stored balance and entry totals for every cash account, read in one statement.
    pub async fn account_totals(conn: &mut SqliteConnection) -> Result<Vec<AccountTotals>> {
        let rows = sqlx::query(
            r#"
            SELECT
                c.id,
                c.name,
                c.opening_balance_cents,
                c.balance_cents,
                COALESCE((SELECT SUM(amount_cents) FROM incomes WHERE cash_id = c.id), 0) AS income_total,
                COALESCE((SELECT SUM(amount_cents) FROM outcomes WHERE cash_id = c.id), 0) AS outcome_total
            FROM cash_accounts c
            ORDER BY c.name
            "#,
        )
        .fetch_all(&mut *conn)
        .await
        .context("Failed to compute account totals")?;

        rows.iter()
            .map(|row| -> Result<AccountTotals> {
                let id_str: String = row.get("id");
                Ok(AccountTotals {
                    cash_id: Uuid::parse_str(&id_str).context("Invalid cash account ID")?,
                    name: row.get("name"),
                    opening_balance: row.get("opening_balance_cents"),
                    stored_balance: row.get("balance_cents"),
                    income_total: row.get("income_total"),
                    outcome_total: row.get("outcome_total"),
                })
            })
            .collect()
    }

    /// Get statistics for integrity checking.
    pub async fn get_integrity_stats(conn: &mut SqliteConnection) -> Result<IntegrityStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM incomes) AS income_count,
                (SELECT COUNT(*) FROM outcomes) AS outcome_count,
                (SELECT COUNT(*) FROM incomes WHERE amount_cents <= 0)
                    + (SELECT COUNT(*) FROM outcomes WHERE amount_cents <= 0) AS invalid_amounts
            "#,
        )
        .fetch_one(&mut *conn)
        .await
        .context("Failed to get integrity stats")?;

        Ok(IntegrityStats {
            income_count: row.get("income_count"),
            outcome_count: row.get("outcome_count"),
            invalid_amounts: row.get("invalid_amounts"),
        })
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    Ok(NaiveDate::parse_from_str(s, DATE_FORMAT)?)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}
