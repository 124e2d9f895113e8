use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::ledger::TransactionKind;

/// Per-user coin balance. `balance` never goes below zero and both totals
/// only ever grow.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    id: Uuid,
    user_id: String,
    balance: i64,
    total_earned: i64,
    total_spent: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSummary {
    pub balance: i64,
    pub total_earned: i64,
    pub total_spent: i64,
}

impl Wallet {
    /// Brand-new wallet seeded with `starting_bonus` coins, counted as earned.
    pub fn open(user_id: &str, starting_bonus: i64, now: DateTime<Utc>) -> AppResult<Self> {
        if starting_bonus < 0 {
            return Err(AppError::InvalidArgument(
                "Starting bonus must not be negative".into(),
            ));
        }
        Self::from_parts(
            Uuid::new_v4(),
            user_id.to_string(),
            starting_bonus,
            starting_bonus,
            0,
            now,
            now,
        )
    }

    pub fn from_parts(
        id: Uuid,
        user_id: String,
        balance: i64,
        total_earned: i64,
        total_spent: i64,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> AppResult<Self> {
        if user_id.is_empty() {
            return Err(AppError::InvalidArgument("Wallet owner must not be empty".into()));
        }
        if balance < 0 || total_earned < 0 || total_spent < 0 {
            return Err(AppError::InvalidArgument(format!(
                "Wallet {id} has a negative balance or total"
            )));
        }
        Ok(Self {
            id,
            user_id,
            balance,
            total_earned,
            total_spent,
            created_at,
            updated_at,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn balance(&self) -> i64 {
        self.balance
    }

    pub fn total_earned(&self) -> i64 {
        self.total_earned
    }

    pub fn total_spent(&self) -> i64 {
        self.total_spent
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn summary(&self) -> WalletSummary {
        WalletSummary {
            balance: self.balance,
            total_earned: self.total_earned,
            total_spent: self.total_spent,
        }
    }

    pub fn add_coins(&mut self, amount: i64, now: DateTime<Utc>) -> AppResult<()> {
        check_amount(amount)?;
        let balance = self
            .balance
            .checked_add(amount)
            .ok_or_else(|| AppError::InvalidArgument("Balance overflow".into()))?;
        let earned = self
            .total_earned
            .checked_add(amount)
            .ok_or_else(|| AppError::InvalidArgument("Total earned overflow".into()))?;
        self.balance = balance;
        self.total_earned = earned;
        self.updated_at = now;
        Ok(())
    }

    pub fn spend_coins(&mut self, amount: i64, now: DateTime<Utc>) -> AppResult<()> {
        check_amount(amount)?;
        if self.balance < amount {
            return Err(AppError::InsufficientFunds {
                balance: self.balance,
                requested: amount,
            });
        }
        self.balance -= amount;
        self.total_spent += amount;
        self.updated_at = now;
        Ok(())
    }

    pub fn apply(&mut self, kind: TransactionKind, amount: i64, now: DateTime<Utc>) -> AppResult<()> {
        match kind {
            TransactionKind::Earn => self.add_coins(amount, now),
            TransactionKind::Spend => self.spend_coins(amount, now),
        }
    }
}

fn check_amount(amount: i64) -> AppResult<()> {
    if amount <= 0 {
        return Err(AppError::InvalidArgument(format!(
            "Amount must be positive, got {amount}"
        )));
    }
    Ok(())
}
