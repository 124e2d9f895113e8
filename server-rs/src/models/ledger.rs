use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Earn,
    Spend,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Earn => "EARN",
            TransactionKind::Spend => "SPEND",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EARN" => Ok(TransactionKind::Earn),
            "SPEND" => Ok(TransactionKind::Spend),
            other => Err(AppError::InvalidArgument(format!(
                "Unknown transaction type: {other}"
            ))),
        }
    }
}

/// Why a balance changed. Each reason belongs to exactly one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionReason {
    QuestReward,
    WelcomeBonus,
    AdminAdd,
    Refund,
    CreateMonster,
    ShopPurchase,
    AdminRemove,
}

impl TransactionReason {
    pub const ALL: [TransactionReason; 7] = [
        TransactionReason::QuestReward,
        TransactionReason::WelcomeBonus,
        TransactionReason::AdminAdd,
        TransactionReason::Refund,
        TransactionReason::CreateMonster,
        TransactionReason::ShopPurchase,
        TransactionReason::AdminRemove,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionReason::QuestReward => "QUEST_REWARD",
            TransactionReason::WelcomeBonus => "WELCOME_BONUS",
            TransactionReason::AdminAdd => "ADMIN_ADD",
            TransactionReason::Refund => "REFUND",
            TransactionReason::CreateMonster => "CREATE_MONSTER",
            TransactionReason::ShopPurchase => "SHOP_PURCHASE",
            TransactionReason::AdminRemove => "ADMIN_REMOVE",
        }
    }

    pub fn kind(&self) -> TransactionKind {
        match self {
            TransactionReason::QuestReward
            | TransactionReason::WelcomeBonus
            | TransactionReason::AdminAdd
            | TransactionReason::Refund => TransactionKind::Earn,
            TransactionReason::CreateMonster
            | TransactionReason::ShopPurchase
            | TransactionReason::AdminRemove => TransactionKind::Spend,
        }
    }
}

impl fmt::Display for TransactionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionReason {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionReason::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| AppError::InvalidArgument(format!("Unknown transaction reason: {s}")))
    }
}

/// One immutable ledger entry. There is deliberately no way to mutate one
/// after it has been built.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    pub wallet_id: Uuid,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub amount: i64,
    pub reason: TransactionReason,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A balance change waiting to be applied to a wallet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub kind: TransactionKind,
    pub amount: i64,
    pub reason: TransactionReason,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub idempotency_key: Option<String>,
}

impl NewTransaction {
    pub fn earn(amount: i64, reason: TransactionReason) -> Self {
        Self::new(TransactionKind::Earn, amount, reason)
    }

    pub fn spend(amount: i64, reason: TransactionReason) -> Self {
        Self::new(TransactionKind::Spend, amount, reason)
    }

    fn new(kind: TransactionKind, amount: i64, reason: TransactionReason) -> Self {
        Self {
            kind,
            amount,
            reason,
            description: None,
            metadata: None,
            idempotency_key: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.amount <= 0 {
            return Err(AppError::InvalidArgument(format!(
                "Transaction amount must be positive, got {}",
                self.amount
            )));
        }
        if self.reason.kind() != self.kind {
            return Err(AppError::InvalidArgument(format!(
                "Reason {} is not valid for {} transactions",
                self.reason, self.kind
            )));
        }
        if matches!(&self.idempotency_key, Some(k) if k.trim().is_empty()) {
            return Err(AppError::InvalidArgument(
                "Idempotency key must not be blank".into(),
            ));
        }
        Ok(())
    }

    pub fn into_record(self, wallet_id: Uuid, now: DateTime<Utc>) -> AppResult<Transaction> {
        self.validate()?;
        Ok(Transaction {
            id: Uuid::new_v4(),
            wallet_id,
            kind: self.kind,
            amount: self.amount,
            reason: self.reason,
            description: self.description,
            metadata: self.metadata,
            idempotency_key: self.idempotency_key,
            created_at: now,
        })
    }
}

/// Key namespaces written by the engine itself (quest rewards, welcome
/// bonus). Caller-supplied keys may not use them.
pub const RESERVED_KEY_PREFIXES: [&str; 2] = ["quest:", "welcome:"];

impl NewTransaction {
    /// Rejects idempotency keys in the engine's own namespaces.
    pub fn ensure_caller_key(&self) -> AppResult<()> {
        match &self.idempotency_key {
            Some(key) if RESERVED_KEY_PREFIXES.iter().any(|p| key.starts_with(p)) => {
                Err(AppError::InvalidArgument(format!(
                    "Idempotency key {key} uses a reserved prefix"
                )))
            }
            _ => Ok(()),
        }
    }

    /// Resolves a replay of an already recorded key: the stored entry is
    /// returned only when it describes the same balance change.
    pub fn replay_of(&self, existing: &Transaction) -> AppResult<Transaction> {
        if existing.kind != self.kind
            || existing.reason != self.reason
            || existing.amount != self.amount
        {
            return Err(AppError::Conflict(format!(
                "Idempotency key {} was already used for a different transaction",
                existing.idempotency_key.as_deref().unwrap_or_default()
            )));
        }
        Ok(existing.clone())
    }
}

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Newest-first page over one wallet's ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionQuery {
    pub limit: i64,
    pub offset: i64,
    pub kind: Option<TransactionKind>,
}

impl TransactionQuery {
    pub fn new(limit: Option<i64>, offset: Option<i64>, kind: Option<TransactionKind>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            offset: offset.unwrap_or(0).max(0),
            kind,
        }
    }
}

impl Default for TransactionQuery {
    fn default() -> Self {
        Self::new(None, None, None)
    }
}

/// Sums reconstructed from the ledger alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTotals {
    pub earned: i64,
    pub spent: i64,
}

impl LedgerTotals {
    pub fn add(&mut self, tx: &Transaction) {
        match tx.kind {
            TransactionKind::Earn => self.earned += tx.amount,
            TransactionKind::Spend => self.spent += tx.amount,
        }
    }

    pub fn net(&self) -> i64 {
        self.earned - self.spent
    }
}
