use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::application::{EntryFilter, EntryUpdate, LedgerService, NewEntry};
use crate::domain::{
    CashAccount, Cents, Entry, EntryDetails, EntryKind, IncomeSource, OutcomeCategory,
    format_cents, parse_cents, sum_cents,
};
use crate::storage::StoreConfig;

/// Cashbox - cash box bookkeeping
#[derive(Parser)]
#[command(name = "cashbox")]
#[command(about = "Keep cash box balances consistent with their incomes and outcomes")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "CASHBOX_DATABASE", default_value = "cashbox.db")]
    pub database: String,

    /// Maximum number of pooled database connections
    #[arg(long, env = "CASHBOX_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,

    /// How long to wait for the ledger write lock before giving up (milliseconds)
    #[arg(long, env = "CASHBOX_LOCK_TIMEOUT_MS", default_value_t = 5000)]
    pub lock_timeout_ms: u64,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Cash account management commands
    #[command(subcommand)]
    Account(AccountCommands),

    /// Week management commands
    #[command(subcommand)]
    Week(WeekCommands),

    /// People incomes can be attributed to
    #[command(subcommand)]
    Person(PersonCommands),

    /// Record or change incomes
    #[command(subcommand)]
    Income(IncomeCommands),

    /// Record or change outcomes
    #[command(subcommand)]
    Outcome(OutcomeCommands),

    /// Show or delete a single entry
    #[command(subcommand)]
    Entry(EntryCommands),

    /// List entries
    Entries {
        /// Filter by cash account name
        #[arg(long)]
        cash: Option<String>,

        /// Filter by week ID
        #[arg(long)]
        week: Option<Uuid>,

        /// Filter by exact date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Filter from date (YYYY-MM-DD)
        #[arg(long)]
        from_date: Option<NaiveDate>,

        /// Filter to date (YYYY-MM-DD)
        #[arg(long)]
        to_date: Option<NaiveDate>,

        /// Filter incomes by person name
        #[arg(long)]
        person: Option<String>,

        /// Filter outcomes by category
        #[arg(long)]
        category: Option<OutcomeCategory>,

        /// Filter incomes by source
        #[arg(long)]
        source: Option<IncomeSource>,

        /// Only incomes or only outcomes
        #[arg(long)]
        kind: Option<EntryKind>,

        /// Maximum number of entries to show
        #[arg(short, long)]
        limit: Option<usize>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show balance for a cash account or all of them
    Balance {
        /// Cash account name (omit for all accounts)
        account: Option<String>,
    },

    /// Verify every balance against its entries
    Check,
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Create a new cash account
    Create {
        /// Account name (must be unique)
        name: String,

        /// Opening balance (e.g., "100.00")
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        opening: String,

        /// Informational soft limit
        #[arg(long, allow_hyphen_values = true)]
        soft_limit: Option<String>,
    },

    /// List all cash accounts
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show detailed account information
    Show {
        /// Account name
        name: String,
    },
}

#[derive(Subcommand)]
pub enum WeekCommands {
    /// Register a week
    Create {
        /// First day (YYYY-MM-DD)
        start: NaiveDate,

        /// Last day (YYYY-MM-DD)
        end: NaiveDate,

        /// Optional label
        #[arg(short, long)]
        label: Option<String>,
    },

    /// List all weeks
    List,
}

#[derive(Subcommand)]
pub enum PersonCommands {
    /// Register a person
    Create {
        /// Person name (must be unique)
        name: String,
    },

    /// List all people
    List,
}

#[derive(Subcommand)]
pub enum IncomeCommands {
    /// Record a new income
    Add {
        /// Amount (e.g., "50.00" or "50")
        amount: String,

        /// Cash account name
        #[arg(long)]
        cash: String,

        /// Week ID
        #[arg(long)]
        week: Uuid,

        /// Date of the income (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Source: contribution, donation, sale, refund, other
        #[arg(short, long, default_value = "other")]
        source: IncomeSource,

        /// Person name
        #[arg(short, long)]
        person: Option<String>,
    },

    /// Change an existing income
    Update {
        /// Entry ID
        id: Uuid,

        /// New amount
        #[arg(short, long)]
        amount: Option<String>,

        /// Move to another cash account
        #[arg(long)]
        cash: Option<String>,

        /// New week ID
        #[arg(long)]
        week: Option<Uuid>,

        /// New date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// New source
        #[arg(short, long)]
        source: Option<IncomeSource>,

        /// Attribute to a person
        #[arg(short, long, conflicts_with = "no_person")]
        person: Option<String>,

        /// Remove the person attribution
        #[arg(long)]
        no_person: bool,
    },
}

#[derive(Subcommand)]
pub enum OutcomeCommands {
    /// Record a new outcome
    Add {
        /// Amount (e.g., "50.00" or "50")
        amount: String,

        /// Cash account name
        #[arg(long)]
        cash: String,

        /// Week ID
        #[arg(long)]
        week: Uuid,

        /// Date of the outcome (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// What the money was spent on
        #[arg(short, long)]
        description: String,

        /// Category: supplies, services, salaries, utilities, maintenance, other
        #[arg(short, long, default_value = "other")]
        category: OutcomeCategory,
    },

    /// Change an existing outcome
    Update {
        /// Entry ID
        id: Uuid,

        /// New amount
        #[arg(short, long)]
        amount: Option<String>,

        /// Move to another cash account
        #[arg(long)]
        cash: Option<String>,

        /// New week ID
        #[arg(long)]
        week: Option<Uuid>,

        /// New date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// New description
        #[arg(short, long)]
        description: Option<String>,

        /// New category
        #[arg(short, long)]
        category: Option<OutcomeCategory>,
    },
}

#[derive(Subcommand)]
pub enum EntryCommands {
    /// Show detailed entry information
    Show {
        /// Entry ID
        id: Uuid,
    },

    /// Delete an entry and reverse its effect on the balance
    Delete {
        /// Entry ID
        id: Uuid,
    },
}

impl Cli {
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(&self.database)
            .with_max_connections(self.max_connections)
            .with_lock_timeout(Duration::from_millis(self.lock_timeout_ms))
    }

    pub async fn run(self) -> Result<()> {
        let config = self.store_config();

        match self.command {
            Commands::Init => {
                LedgerService::init(&config).await?;
                println!("Database initialized: {}", self.database);
            }
            Commands::Account(cmd) => {
                let service = LedgerService::connect(&config).await?;
                run_account_command(&service, cmd).await?;
            }
            Commands::Week(cmd) => {
                let service = LedgerService::connect(&config).await?;
                run_week_command(&service, cmd).await?;
            }
            Commands::Person(cmd) => {
                let service = LedgerService::connect(&config).await?;
                run_person_command(&service, cmd).await?;
            }
            Commands::Income(cmd) => {
                let service = LedgerService::connect(&config).await?;
                run_income_command(&service, cmd).await?;
            }
            Commands::Outcome(cmd) => {
                let service = LedgerService::connect(&config).await?;
                run_outcome_command(&service, cmd).await?;
            }
            Commands::Entry(cmd) => {
                let service = LedgerService::connect(&config).await?;
                run_entry_command(&service, cmd).await?;
            }
            Commands::Entries {
                cash,
                week,
                date,
                from_date,
                to_date,
                person,
                category,
                source,
                kind,
                limit,
                json,
            } => {
                let service = LedgerService::connect(&config).await?;
                let cash_id = match cash {
                    Some(name) => Some(service.get_cash_account_by_name(&name).await?.id),
                    None => None,
                };
                let person_id = match person {
                    Some(name) => Some(service.get_person_by_name(&name).await?.id),
                    None => None,
                };

                let filter = EntryFilter {
                    kind,
                    cash_id,
                    week_id: week,
                    date,
                    from_date,
                    to_date,
                    person_id,
                    source,
                    category,
                    limit,
                };
                run_entries_command(&service, &filter, json).await?;
            }
            Commands::Balance { account } => {
                let service = LedgerService::connect(&config).await?;
                run_balance_command(&service, account).await?;
            }
            Commands::Check => {
                let service = LedgerService::connect(&config).await?;
                run_check_command(&service).await?;
            }
        }

        Ok(())
    }
}

async fn run_account_command(service: &LedgerService, cmd: AccountCommands) -> Result<()> {
    match cmd {
        AccountCommands::Create {
            name,
            opening,
            soft_limit,
        } => {
            let opening = parse_amount(&opening)?;
            let soft_limit = soft_limit.as_deref().map(parse_amount).transpose()?;

            let account = service
                .create_cash_account(name, opening, soft_limit)
                .await?;
            println!(
                "Created cash account: {} (opening {})",
                account.name,
                format_cents(account.opening_balance)
            );
        }

        AccountCommands::List { json } => {
            let accounts = service.list_cash_accounts().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&accounts)?);
            } else if accounts.is_empty() {
                println!("No cash accounts found.");
            } else {
                println!("{:<20} {:>12} {:>12}", "NAME", "BALANCE", "SOFT LIMIT");
                println!("{}", "-".repeat(46));
                for account in accounts {
                    println!(
                        "{:<20} {:>12} {:>12}",
                        truncate(&account.name, 20),
                        format_cents(account.balance),
                        account.soft_limit.map(format_cents).unwrap_or_default()
                    );
                }
            }
        }

        AccountCommands::Show { name } => {
            let account = service.get_cash_account_by_name(&name).await?;
            print_account(&account);

            let entries = service
                .list_entries(&EntryFilter {
                    cash_id: Some(account.id),
                    ..EntryFilter::default()
                })
                .await?;
            let incomes = entries
                .iter()
                .filter(|e| e.kind() == EntryKind::Income)
                .count();
            println!(
                "  Entries:        {} ({} incomes, {} outcomes)",
                entries.len(),
                incomes,
                entries.len() - incomes
            );
        }
    }
    Ok(())
}

/// Entries may be dated outside their week; point it out without refusing.
async fn warn_outside_week(service: &LedgerService, week: Uuid, date: NaiveDate) -> Result<()> {
    let week = service.get_week(week).await?;
    if !week.contains(date) {
        eprintln!(
            "Note: {} is outside week {} .. {}",
            date, week.start_date, week.end_date
        );
    }
    Ok(())
}

fn print_account(account: &CashAccount) {
    println!("Cash account: {}", account.name);
    println!("  ID:             {}", account.id);
    println!("  Opening:        {}", format_cents(account.opening_balance));
    println!("  Balance:        {}", format_cents(account.balance));
    println!("  Net movement:   {}", format_total(account.net_movement()));
    if let Some(limit) = account.soft_limit {
        println!(
            "  Soft limit:     {}{}",
            format_cents(limit),
            if account.is_below_soft_limit() {
                " (below)"
            } else {
                ""
            }
        );
    }
    println!(
        "  Created:        {}",
        account.created_at.format("%Y-%m-%d %H:%M:%S")
    );
}

async fn run_week_command(service: &LedgerService, cmd: WeekCommands) -> Result<()> {
    match cmd {
        WeekCommands::Create { start, end, label } => {
            let week = service.create_week(start, end, label).await?;
            println!(
                "Created week {} .. {} ({})",
                week.start_date, week.end_date, week.id
            );
        }
        WeekCommands::List => {
            let weeks = service.list_weeks().await?;
            if weeks.is_empty() {
                println!("No weeks found.");
            } else {
                println!("{:<36}  {:<10}  {:<10}  {}", "ID", "START", "END", "LABEL");
                for week in weeks {
                    println!(
                        "{:<36}  {:<10}  {:<10}  {}",
                        week.id,
                        week.start_date,
                        week.end_date,
                        week.label.unwrap_or_default()
                    );
                }
            }
        }
    }
    Ok(())
}

async fn run_person_command(service: &LedgerService, cmd: PersonCommands) -> Result<()> {
    match cmd {
        PersonCommands::Create { name } => {
            let person = service.create_person(name).await?;
            println!("Created person: {} ({})", person.name, person.id);
        }
        PersonCommands::List => {
            let people = service.list_people().await?;
            if people.is_empty() {
                println!("No people found.");
            }
            for person in people {
                println!("{:<36}  {}", person.id, person.name);
            }
        }
    }
    Ok(())
}

async fn run_income_command(service: &LedgerService, cmd: IncomeCommands) -> Result<()> {
    match cmd {
        IncomeCommands::Add {
            amount,
            cash,
            week,
            date,
            source,
            person,
        } => {
            let amount = parse_amount(&amount)?;
            let account = service.get_cash_account_by_name(&cash).await?;
            let date = date.unwrap_or_else(today);
            warn_outside_week(service, week, date).await?;

            let mut new_entry = NewEntry::income(account.id, week, date, amount, source);
            if let Some(name) = person {
                new_entry = new_entry.with_person(service.get_person_by_name(&name).await?.id);
            }

            let entry = service.create_entry(new_entry).await?;
            println!(
                "Recorded income: {} into {} ({})",
                format_cents(entry.amount),
                account.name,
                entry.id
            );
        }

        IncomeCommands::Update {
            id,
            amount,
            cash,
            week,
            date,
            source,
            person,
            no_person,
        } => {
            let person_id = if no_person {
                Some(None)
            } else {
                match person {
                    Some(name) => Some(Some(service.get_person_by_name(&name).await?.id)),
                    None => None,
                }
            };

            let update = EntryUpdate {
                amount: amount.as_deref().map(parse_amount).transpose()?,
                cash_id: resolve_cash(service, cash.as_deref()).await?,
                week_id: week,
                date,
                person_id,
                source,
                ..EntryUpdate::default()
            };

            let entry = service.update_entry(id, update).await?;
            println!("Updated income {}: {}", entry.id, format_cents(entry.amount));
        }
    }
    Ok(())
}

async fn run_outcome_command(service: &LedgerService, cmd: OutcomeCommands) -> Result<()> {
    match cmd {
        OutcomeCommands::Add {
            amount,
            cash,
            week,
            date,
            description,
            category,
        } => {
            let amount = parse_amount(&amount)?;
            let account = service.get_cash_account_by_name(&cash).await?;
            let date = date.unwrap_or_else(today);
            warn_outside_week(service, week, date).await?;

            let entry = service
                .create_entry(NewEntry::outcome(
                    account.id,
                    week,
                    date,
                    amount,
                    description,
                    category,
                ))
                .await?;
            println!(
                "Recorded outcome: {} from {} ({})",
                format_cents(entry.amount),
                account.name,
                entry.id
            );
        }

        OutcomeCommands::Update {
            id,
            amount,
            cash,
            week,
            date,
            description,
            category,
        } => {
            let update = EntryUpdate {
                amount: amount.as_deref().map(parse_amount).transpose()?,
                cash_id: resolve_cash(service, cash.as_deref()).await?,
                week_id: week,
                date,
                description,
                category,
                ..EntryUpdate::default()
            };

            let entry = service.update_entry(id, update).await?;
            println!(
                "Updated outcome {}: {}",
                entry.id,
                format_cents(entry.amount)
            );
        }
    }
    Ok(())
}

async fn run_entry_command(service: &LedgerService, cmd: EntryCommands) -> Result<()> {
    match cmd {
        EntryCommands::Show { id } => {
            let info = service.get_entry_info(id).await?;
            let entry = &info.entry;

            println!("Entry: {}", entry.id);
            println!("  Kind:           {}", entry.kind());
            println!("  Amount:         {}", format_cents(entry.amount));
            println!("  Cash account:   {}", info.cash_account_name);
            println!("  Week:           {}", entry.week_id);
            println!("  Date:           {}", entry.date);
            match &entry.details {
                EntryDetails::Income { person_id, source } => {
                    println!("  Source:         {}", source);
                    if let Some(person_id) = person_id {
                        println!("  Person:         {}", person_id);
                    }
                }
                EntryDetails::Outcome {
                    description,
                    category,
                } => {
                    println!("  Description:    {}", description);
                    println!("  Category:       {}", category);
                }
            }
            println!(
                "  Recorded:       {}",
                entry.created_at.format("%Y-%m-%d %H:%M:%S")
            );
        }

        EntryCommands::Delete { id } => {
            let entry = service.delete_entry(id).await?;
            println!(
                "Deleted {} of {} ({})",
                entry.kind(),
                format_cents(entry.amount),
                entry.id
            );
        }
    }
    Ok(())
}

async fn run_entries_command(
    service: &LedgerService,
    filter: &EntryFilter,
    json: bool,
) -> Result<()> {
    let entries = service.list_entries(filter).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No entries found.");
        return Ok(());
    }

    let names = service
        .list_cash_accounts()
        .await?
        .into_iter()
        .map(|a| (a.id, a.name))
        .collect::<std::collections::HashMap<_, _>>();

    println!(
        "{:<10}  {:<8} {:>12}  {:<16}  {}",
        "DATE", "KIND", "AMOUNT", "CASH", "DETAILS"
    );
    println!("{}", "-".repeat(72));
    for entry in &entries {
        println!(
            "{:<10}  {:<8} {:>12}  {:<16}  {}",
            entry.date,
            entry.kind(),
            format_cents(entry.signed_amount()),
            truncate(names.get(&entry.cash_id).map_or("?", String::as_str), 16),
            truncate(&entry.summary(), 40)
        );
    }
    println!("{}", "-".repeat(72));
    println!(
        "{:<20} {:>12}",
        format!("{} entries", entries.len()),
        format_total(net_total(&entries))
    );

    Ok(())
}

async fn run_balance_command(service: &LedgerService, account: Option<String>) -> Result<()> {
    match account {
        Some(name) => {
            let account = service.get_cash_account_by_name(&name).await?;
            let balance = service.get_cash_account_balance(account.id).await?;
            println!("{}: {}", account.name, format_cents(balance));
        }
        None => {
            let accounts = service.list_cash_accounts().await?;
            if accounts.is_empty() {
                println!("No cash accounts found.");
                return Ok(());
            }

            println!("{:<20} {:>12}", "ACCOUNT", "BALANCE");
            println!("{}", "-".repeat(33));
            for account in &accounts {
                println!(
                    "{:<20} {:>12}",
                    truncate(&account.name, 20),
                    format_cents(account.balance)
                );
            }
            let total = sum_cents(accounts.iter().map(|a| a.balance));
            println!("{}", "-".repeat(33));
            println!("{:<20} {:>12}", "TOTAL", format_total(total));
        }
    }
    Ok(())
}

async fn run_check_command(service: &LedgerService) -> Result<()> {
    println!("Checking ledger integrity...\n");

    let report = service.check_integrity().await?;

    println!("Cash accounts: {}", report.account_count);
    println!("Incomes:       {}", report.income_count);
    println!("Outcomes:      {}", report.outcome_count);
    println!();

    if report.is_ok() {
        println!("All balances match their entries.");
        return Ok(());
    }

    println!("Issues found:");
    for mismatch in &report.mismatches {
        println!(
            "  - {}: stored {}, entries imply {}",
            mismatch.name,
            format_cents(mismatch.stored),
            format_total(mismatch.expected)
        );
    }
    if report.invalid_amounts > 0 {
        println!("  - {} entries with non-positive amounts", report.invalid_amounts);
    }
    anyhow::bail!("Ledger integrity check failed");
}

async fn resolve_cash(service: &LedgerService, name: Option<&str>) -> Result<Option<Uuid>> {
    match name {
        Some(name) => Ok(Some(service.get_cash_account_by_name(name).await?.id)),
        None => Ok(None),
    }
}

fn net_total(entries: &[Entry]) -> Option<Cents> {
    sum_cents(entries.iter().map(Entry::signed_amount))
}

fn format_total(total: Option<Cents>) -> String {
    total.map(format_cents).unwrap_or_else(|| "out of range".to_string())
}

fn parse_amount(input: &str) -> Result<Cents> {
    parse_cents(input)
        .with_context(|| format!("Invalid amount '{}'. Use '50.00' or '50'", input))
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(db: &str, args: &[&str]) -> Cli {
        let mut argv = vec!["cashbox", "--database", db];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[tokio::test]
    async fn test_init_then_commands_use_database() {
        let temp = tempfile::TempDir::new().unwrap();
        let db = temp.path().join("cli.db");
        let db = db.to_str().unwrap();

        // Only init may create the database
        assert!(run_args(db, &["check"]).run().await.is_err());

        run_args(db, &["init"]).run().await.unwrap();
        run_args(db, &["account", "create", "Main", "--opening", "10.00"])
            .run()
            .await
            .unwrap();
        run_args(db, &["check"]).run().await.unwrap();
        run_args(db, &["balance"]).run().await.unwrap();
    }

    #[test]
    fn test_cli_parses_outcome_add() {
        let week = Uuid::new_v4();
        let cli = Cli::try_parse_from([
            "cashbox",
            "--database",
            "books.db",
            "outcome",
            "add",
            "12.50",
            "--cash",
            "Main",
            "--week",
            &week.to_string(),
            "--date",
            "2024-05-02",
            "-d",
            "Light bulbs",
            "-c",
            "maintenance",
        ])
        .unwrap();

        assert_eq!(cli.database, "books.db");
        match cli.command {
            Commands::Outcome(OutcomeCommands::Add {
                amount,
                week: parsed_week,
                date,
                category,
                ..
            }) => {
                assert_eq!(amount, "12.50");
                assert_eq!(parsed_week, week);
                assert_eq!(date, NaiveDate::from_ymd_opt(2024, 5, 2));
                assert_eq!(category, OutcomeCategory::Maintenance);
            }
            _ => panic!("expected outcome add"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_category() {
        let result = Cli::try_parse_from([
            "cashbox",
            "entries",
            "--category",
            "lottery",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_store_config_from_flags() {
        let cli = Cli::try_parse_from([
            "cashbox",
            "--lock-timeout-ms",
            "250",
            "--max-connections",
            "3",
            "check",
        ])
        .unwrap();
        let config = cli.store_config();
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.max_connections, 3);
    }

    #[test]
    fn test_parse_amount_rejects_extra_precision() {
        assert_eq!(parse_amount("10.25").unwrap(), 1025);
        assert!(parse_amount("10.255").is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a very long description", 10), "a very ...");
    }
}
