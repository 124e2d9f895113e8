//! Durable storage contract for quests, wallets and the ledger.
//!
//! Every method that changes more than one record does so as one atomic unit.
//! The ledger is append-only: nothing here updates or deletes a transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{
    LedgerTotals, NewTransaction, Quest, QuestKind, Transaction, TransactionKind,
    TransactionQuery, TransactionReason, Wallet,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type DynStore = Arc<dyn Store>;

#[async_trait]
pub trait Store: Send + Sync {
    /// Whether the backing storage is reachable.
    async fn ping(&self) -> bool {
        true
    }

    // --- Quests ---

    /// Deletes the user's quests with `expires_at < now`. Returns how many went.
    async fn purge_expired_quests(&self, user_id: &str, now: DateTime<Utc>) -> AppResult<u64>;

    /// The user's quests with `expires_at >= now`, oldest assignment first.
    async fn unexpired_quests(&self, user_id: &str, now: DateTime<Utc>) -> AppResult<Vec<Quest>>;

    /// Installs `fresh` as the user's daily set, serialized per user.
    ///
    /// If the user already holds at least `daily_count` unexpired quests (a
    /// concurrent caller got there first) those are returned and `fresh` is
    /// dropped. Otherwise every quest the user has is deleted and `fresh` is
    /// inserted.
    async fn replace_daily_set(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        daily_count: usize,
        fresh: Vec<Quest>,
    ) -> AppResult<Vec<Quest>>;

    async fn get_quest(&self, id: Uuid) -> AppResult<Option<Quest>>;

    /// Unexpired ACTIVE quests of one kind for a user, oldest first.
    async fn active_quests_of_kind(
        &self,
        user_id: &str,
        kind: QuestKind,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Quest>>;

    /// Writes progress fields only if the stored version still equals
    /// `expected_version`. Returns `false` on a lost race.
    async fn save_quest_progress(&self, quest: &Quest, expected_version: i64) -> AppResult<bool>;

    // --- Wallets ---

    async fn find_wallet(&self, user_id: &str) -> AppResult<Option<Wallet>>;

    /// Inserts `wallet` unless the user already has one, in which case the
    /// existing wallet is returned untouched. When inserted, `opening` (if
    /// any) is appended to the ledger in the same unit.
    async fn create_wallet(&self, wallet: Wallet, opening: Option<Transaction>) -> AppResult<Wallet>;

    /// Applies `entry` to the user's wallet and appends it to the ledger.
    ///
    /// An entry whose idempotency key is already on the ledger is not applied
    /// a second time; the recorded transaction is returned instead.
    async fn apply_to_wallet(
        &self,
        user_id: &str,
        entry: NewTransaction,
        now: DateTime<Utc>,
    ) -> AppResult<(Wallet, Transaction)>;

    /// Persists an already-claimed quest, credits its owner's wallet and
    /// appends `entry`, all or nothing. Returns `None` when the stored quest
    /// is no longer at `expected_version` (someone else claimed it).
    async fn settle_claim(
        &self,
        quest: &Quest,
        expected_version: i64,
        entry: NewTransaction,
        now: DateTime<Utc>,
    ) -> AppResult<Option<(Wallet, Transaction)>>;

    // --- Ledger (read-only) ---

    async fn get_transaction(&self, id: Uuid) -> AppResult<Option<Transaction>>;

    async fn list_transactions(
        &self,
        wallet_id: Uuid,
        query: &TransactionQuery,
    ) -> AppResult<Vec<Transaction>>;

    async fn transactions_by_reason(
        &self,
        wallet_id: Uuid,
        kind: TransactionKind,
        reason: TransactionReason,
    ) -> AppResult<Vec<Transaction>>;

    async fn count_transactions(&self, wallet_id: Uuid) -> AppResult<i64>;

    async fn ledger_totals(&self, wallet_id: Uuid) -> AppResult<LedgerTotals>;
}
