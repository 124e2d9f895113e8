use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    LedgerTotals, NewTransaction, Quest, QuestKind, QuestStatus, Transaction, TransactionKind,
    TransactionQuery, TransactionReason, Wallet,
};
use crate::store::Store;

#[derive(Default)]
struct State {
    quests: HashMap<Uuid, Quest>,
    /// Keyed by owner; one wallet per user.
    wallets: HashMap<String, Wallet>,
    /// Append order.
    transactions: Vec<Transaction>,
    /// Keys are scoped to their wallet.
    idempotency_keys: HashMap<(Uuid, String), usize>,
}

impl State {
    fn user_quests(&self, user_id: &str) -> impl Iterator<Item = &Quest> {
        let user_id = user_id.to_string();
        self.quests.values().filter(move |q| q.user_id() == user_id)
    }

    fn append(&mut self, tx: Transaction) {
        if let Some(key) = &tx.idempotency_key {
            self.idempotency_keys
                .insert((tx.wallet_id, key.clone()), self.transactions.len());
        }
        self.transactions.push(tx);
    }

    fn recorded(&self, wallet_id: Uuid, key: Option<&String>) -> Option<&Transaction> {
        key.and_then(|k| self.idempotency_keys.get(&(wallet_id, k.clone())))
            .and_then(|&idx| self.transactions.get(idx))
    }
}

fn oldest_first(mut quests: Vec<Quest>) -> Vec<Quest> {
    quests.sort_by_key(|q| (q.assigned_at(), q.id()));
    quests
}

/// Single-process store. Each operation runs under one write (or read) lock,
/// which gives it the same all-or-nothing behaviour as a database transaction.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn insert_quest(&self, quest: Quest) {
        self.state.write().await.quests.insert(quest.id(), quest);
    }

    #[cfg(test)]
    pub async fn remove_quest(&self, id: Uuid) {
        self.state.write().await.quests.remove(&id);
    }

    #[cfg(test)]
    pub async fn quest_count(&self, user_id: &str) -> usize {
        self.state.read().await.user_quests(user_id).count()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn purge_expired_quests(&self, user_id: &str, now: DateTime<Utc>) -> AppResult<u64> {
        let mut state = self.state.write().await;
        let before = state.quests.len();
        state
            .quests
            .retain(|_, q| q.user_id() != user_id || q.expires_at() >= now);
        Ok((before - state.quests.len()) as u64)
    }

    async fn unexpired_quests(&self, user_id: &str, now: DateTime<Utc>) -> AppResult<Vec<Quest>> {
        let state = self.state.read().await;
        Ok(oldest_first(
            state
                .user_quests(user_id)
                .filter(|q| q.expires_at() >= now)
                .cloned()
                .collect(),
        ))
    }

    async fn replace_daily_set(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        daily_count: usize,
        fresh: Vec<Quest>,
    ) -> AppResult<Vec<Quest>> {
        let mut state = self.state.write().await;

        let current: Vec<Quest> = state
            .user_quests(user_id)
            .filter(|q| q.expires_at() >= now)
            .cloned()
            .collect();
        if current.len() >= daily_count {
            return Ok(oldest_first(current));
        }

        state.quests.retain(|_, q| q.user_id() != user_id);
        for quest in &fresh {
            state.quests.insert(quest.id(), quest.clone());
        }
        Ok(fresh)
    }

    async fn get_quest(&self, id: Uuid) -> AppResult<Option<Quest>> {
        Ok(self.state.read().await.quests.get(&id).cloned())
    }

    async fn active_quests_of_kind(
        &self,
        user_id: &str,
        kind: QuestKind,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Quest>> {
        let state = self.state.read().await;
        Ok(oldest_first(
            state
                .user_quests(user_id)
                .filter(|q| {
                    q.kind() == kind && q.status() == QuestStatus::Active && q.expires_at() >= now
                })
                .cloned()
                .collect(),
        ))
    }

    async fn save_quest_progress(&self, quest: &Quest, expected_version: i64) -> AppResult<bool> {
        let mut state = self.state.write().await;
        match state.quests.get_mut(&quest.id()) {
            Some(stored) if stored.version() == expected_version => {
                *stored = quest.clone();
                Ok(true)
            }
            // A vanished quest fails the swap like a stale version does.
            _ => Ok(false),
        }
    }

    async fn find_wallet(&self, user_id: &str) -> AppResult<Option<Wallet>> {
        Ok(self.state.read().await.wallets.get(user_id).cloned())
    }

    async fn create_wallet(&self, wallet: Wallet, opening: Option<Transaction>) -> AppResult<Wallet> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.wallets.get(wallet.user_id()) {
            return Ok(existing.clone());
        }
        state
            .wallets
            .insert(wallet.user_id().to_string(), wallet.clone());
        if let Some(tx) = opening {
            state.append(tx);
        }
        Ok(wallet)
    }

    async fn apply_to_wallet(
        &self,
        user_id: &str,
        entry: NewTransaction,
        now: DateTime<Utc>,
    ) -> AppResult<(Wallet, Transaction)> {
        let mut state = self.state.write().await;
        let mut wallet = state
            .wallets
            .get(user_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Wallet for {user_id} not found")))?;

        if let Some(existing) = state.recorded(wallet.id(), entry.idempotency_key.as_ref()) {
            return Ok((wallet, entry.replay_of(existing)?));
        }

        let tx = entry.into_record(wallet.id(), now)?;
        wallet.apply(tx.kind, tx.amount, now)?;

        state.wallets.insert(user_id.to_string(), wallet.clone());
        state.append(tx.clone());
        Ok((wallet, tx))
    }

    async fn settle_claim(
        &self,
        quest: &Quest,
        expected_version: i64,
        entry: NewTransaction,
        now: DateTime<Utc>,
    ) -> AppResult<Option<(Wallet, Transaction)>> {
        let mut state = self.state.write().await;

        match state.quests.get(&quest.id()) {
            Some(stored) if stored.version() == expected_version => {}
            Some(_) => return Ok(None),
            None => return Err(AppError::NotFound(format!("Quest {} not found", quest.id()))),
        }
        let mut wallet = state
            .wallets
            .get(quest.user_id())
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Wallet for {} not found", quest.user_id())))?;
        if state
            .recorded(wallet.id(), entry.idempotency_key.as_ref())
            .is_some()
        {
            return Err(AppError::InvalidState("Reward already credited".into()));
        }
        let tx = entry.into_record(wallet.id(), now)?;
        wallet.apply(tx.kind, tx.amount, now)?;

        state.quests.insert(quest.id(), quest.clone());
        state
            .wallets
            .insert(quest.user_id().to_string(), wallet.clone());
        state.append(tx.clone());
        Ok(Some((wallet, tx)))
    }

    async fn get_transaction(&self, id: Uuid) -> AppResult<Option<Transaction>> {
        let state = self.state.read().await;
        Ok(state.transactions.iter().find(|t| t.id == id).cloned())
    }

    async fn list_transactions(
        &self,
        wallet_id: Uuid,
        query: &TransactionQuery,
    ) -> AppResult<Vec<Transaction>> {
        let state = self.state.read().await;
        let mut rows: Vec<Transaction> = state
            .transactions
            .iter()
            .rev()
            .filter(|t| t.wallet_id == wallet_id)
            .filter(|t| query.kind.map_or(true, |k| t.kind == k))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .collect())
    }

    async fn transactions_by_reason(
        &self,
        wallet_id: Uuid,
        kind: TransactionKind,
        reason: TransactionReason,
    ) -> AppResult<Vec<Transaction>> {
        let state = self.state.read().await;
        let mut rows: Vec<Transaction> = state
            .transactions
            .iter()
            .rev()
            .filter(|t| t.wallet_id == wallet_id && t.kind == kind && t.reason == reason)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn count_transactions(&self, wallet_id: Uuid) -> AppResult<i64> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.wallet_id == wallet_id)
            .count() as i64)
    }

    async fn ledger_totals(&self, wallet_id: Uuid) -> AppResult<LedgerTotals> {
        let state = self.state.read().await;
        let mut totals = LedgerTotals::default();
        for tx in state.transactions.iter().filter(|t| t.wallet_id == wallet_id) {
            totals.add(tx);
        }
        Ok(totals)
    }
}
