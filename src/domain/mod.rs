pub mod adjuster;
mod cash_account;
mod entry;
mod integrity;
mod money;
mod week;

pub use adjuster::{AdjustError, BalanceDelta, Placement};
pub use cash_account::*;
pub use entry::*;
pub use integrity::*;
pub use money::*;
pub use week::*;
