//! Balance deltas implied by entry mutations.
//!
//! Every create, update and delete of an entry goes through these functions,
//! so incomes and outcomes share one definition of how a cash account's
//! balance moves.

use super::{CashAccountId, Cents, EntryKind};

/// Signed amount to add to one cash account's balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceDelta {
    pub cash_id: CashAccountId,
    pub delta: Cents,
}

/// Where an entry sits and how much it moves, before or after an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub cash_id: CashAccountId,
    pub amount: Cents,
}

impl Placement {
    pub fn new(cash_id: CashAccountId, amount: Cents) -> Self {
        Self { cash_id, amount }
    }
}

/// Delta for a freshly created entry.
pub fn creation_delta(
    kind: EntryKind,
    cash_id: CashAccountId,
    amount: Cents,
) -> Result<BalanceDelta, AdjustError> {
    check_amount(amount)?;
    Ok(BalanceDelta {
        cash_id,
        delta: kind.sign() * amount,
    })
}

/// Delta that undoes a deleted entry.
pub fn deletion_delta(
    kind: EntryKind,
    cash_id: CashAccountId,
    amount: Cents,
) -> Result<BalanceDelta, AdjustError> {
    check_amount(amount)?;
    Ok(BalanceDelta {
        cash_id,
        delta: -(kind.sign() * amount),
    })
}

/// Deltas for moving an entry from `old` to `new`.
///
/// Same account: at most one delta (none when the amount is unchanged).
/// Different accounts: exactly two deltas, which must be applied together.
pub fn update_deltas(
    kind: EntryKind,
    old: Placement,
    new: Placement,
) -> Result<Vec<BalanceDelta>, AdjustError> {
    check_amount(old.amount)?;
    check_amount(new.amount)?;

    if old.cash_id == new.cash_id {
        let difference = new
            .amount
            .checked_sub(old.amount)
            .ok_or(AdjustError::Overflow)?;
        if difference == 0 {
            return Ok(Vec::new());
        }
        return Ok(vec![BalanceDelta {
            cash_id: new.cash_id,
            delta: kind.sign() * difference,
        }]);
    }

    Ok(vec![
        deletion_delta(kind, old.cash_id, old.amount)?,
        creation_delta(kind, new.cash_id, new.amount)?,
    ])
}

/// Apply a delta to a balance, refusing to wrap around.
pub fn apply_delta(balance: Cents, delta: &BalanceDelta) -> Result<Cents, AdjustError> {
    balance.checked_add(delta.delta).ok_or(AdjustError::Overflow)
}

/// Balance derived from an opening balance and the entry totals attributed
/// to the account. `None` when the result does not fit in `Cents`.
///
/// Intermediate sums are widened, so `opening + incomes` may exceed the
/// `Cents` range as long as subtracting the outcomes brings it back.
pub fn derived_balance(opening: Cents, incomes: Cents, outcomes: Cents) -> Option<Cents> {
    let derived = i128::from(opening) + i128::from(incomes) - i128::from(outcomes);
    Cents::try_from(derived).ok()
}

fn check_amount(amount: Cents) -> Result<(), AdjustError> {
    if amount <= 0 {
        return Err(AdjustError::NonPositiveAmount(amount));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdjustError {
    /// Amounts reaching the adjuster must already be validated as positive.
    NonPositiveAmount(Cents),
    Overflow,
}

impl std::fmt::Display for AdjustError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdjustError::NonPositiveAmount(amount) => {
                write!(f, "balance adjustment with non-positive amount {} cents", amount)
            }
            AdjustError::Overflow => write!(f, "balance adjustment overflows"),
        }
    }
}

impl std::error::Error for AdjustError {}
