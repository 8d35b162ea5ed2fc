//! Account credit balances.

use common::UserId;
use serde::{Deserialize, Serialize};

use crate::Money;

/// A user's spendable store credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: UserId,
    pub credit_balance: Money,
}

impl Account {
    /// An account with no credit. Users without a stored row read as empty.
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            credit_balance: Money::zero(),
        }
    }
}
