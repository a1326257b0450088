use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CashAccountId, Cents, PersonId, WeekId};

pub type EntryId = Uuid;

/// Whether an entry credits or debits its cash account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Income,
    Outcome,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Income => "income",
            EntryKind::Outcome => "outcome",
        }
    }

    /// +1 for money coming into the cash account, -1 for money leaving it.
    pub fn sign(&self) -> Cents {
        match self {
            EntryKind::Income => 1,
            EntryKind::Outcome => -1,
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "income" => Ok(EntryKind::Income),
            "outcome" => Ok(EntryKind::Outcome),
            _ => Err(ParseEnumError::new("entry kind", s)),
        }
    }
}

/// Where an income came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncomeSource {
    Contribution,
    Donation,
    Sale,
    Refund,
    Other,
}

impl IncomeSource {
    pub const ALL: [IncomeSource; 5] = [
        IncomeSource::Contribution,
        IncomeSource::Donation,
        IncomeSource::Sale,
        IncomeSource::Refund,
        IncomeSource::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IncomeSource::Contribution => "contribution",
            IncomeSource::Donation => "donation",
            IncomeSource::Sale => "sale",
            IncomeSource::Refund => "refund",
            IncomeSource::Other => "other",
        }
    }
}

impl fmt::Display for IncomeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IncomeSource {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s_lower = s.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|source| source.as_str() == s_lower)
            .ok_or_else(|| ParseEnumError::new("income source", s))
    }
}

/// What an outcome was spent on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeCategory {
    Supplies,
    Services,
    Salaries,
    Utilities,
    Maintenance,
    Other,
}

impl OutcomeCategory {
    pub const ALL: [OutcomeCategory; 6] = [
        OutcomeCategory::Supplies,
        OutcomeCategory::Services,
        OutcomeCategory::Salaries,
        OutcomeCategory::Utilities,
        OutcomeCategory::Maintenance,
        OutcomeCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeCategory::Supplies => "supplies",
            OutcomeCategory::Services => "services",
            OutcomeCategory::Salaries => "salaries",
            OutcomeCategory::Utilities => "utilities",
            OutcomeCategory::Maintenance => "maintenance",
            OutcomeCategory::Other => "other",
        }
    }
}

impl fmt::Display for OutcomeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OutcomeCategory {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s_lower = s.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == s_lower)
            .ok_or_else(|| ParseEnumError::new("outcome category", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    what: &'static str,
    value: String,
}

impl ParseEnumError {
    fn new(what: &'static str, value: &str) -> Self {
        Self {
            what,
            value: value.to_string(),
        }
    }
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: '{}'", self.what, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

/// Fields that only exist on one kind of entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntryDetails {
    Income {
        person_id: Option<PersonId>,
        source: IncomeSource,
    },
    Outcome {
        description: String,
        category: OutcomeCategory,
    },
}

impl EntryDetails {
    pub fn kind(&self) -> EntryKind {
        match self {
            EntryDetails::Income { .. } => EntryKind::Income,
            EntryDetails::Outcome { .. } => EntryKind::Outcome,
        }
    }
}

/// A single income or outcome. The amount is always positive, the kind
/// decides whether it adds to or subtracts from the cash account balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub cash_id: CashAccountId,
    pub week_id: WeekId,
    /// Calendar date the movement happened
    pub date: NaiveDate,
    /// Amount in cents (always positive)
    pub amount: Cents,
    #[serde(flatten)]
    pub details: EntryDetails,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entry {
    pub fn new(
        cash_id: CashAccountId,
        week_id: WeekId,
        date: NaiveDate,
        amount: Cents,
        details: EntryDetails,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            cash_id,
            week_id,
            date,
            amount,
            details,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn kind(&self) -> EntryKind {
        self.details.kind()
    }

    /// Signed effect of this entry on its cash account.
    pub fn signed_amount(&self) -> Cents {
        self.kind().sign() * self.amount
    }

    pub fn person_id(&self) -> Option<PersonId> {
        match &self.details {
            EntryDetails::Income { person_id, .. } => *person_id,
            EntryDetails::Outcome { .. } => None,
        }
    }

    /// One-line human summary used in listings.
    pub fn summary(&self) -> String {
        match &self.details {
            EntryDetails::Income { source, .. } => format!("income ({})", source),
            EntryDetails::Outcome {
                description,
                category,
            } => format!("{} ({})", description, category),
        }
    }
}
