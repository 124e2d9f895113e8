use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    LedgerTotals, NewTransaction, Quest, QuestKind, QuestParts, QuestStatus, Transaction,
    TransactionKind, TransactionQuery, TransactionReason, Wallet,
};
use crate::store::Store;

const QUEST_COLUMNS: &str = "id, user_id, quest_type, description, target, progress, reward, \
     status, assigned_at, expires_at, completed_at, claimed_at, version";

const WALLET_COLUMNS: &str =
    "id, user_id, balance, total_earned, total_spent, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, wallet_id, tx_type, amount, reason, description, \
     metadata, idempotency_key, created_at";

#[derive(sqlx::FromRow)]
struct QuestRow {
    id: Uuid,
    user_id: String,
    quest_type: String,
    description: String,
    target: i32,
    progress: i32,
    reward: i64,
    status: String,
    assigned_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    claimed_at: Option<DateTime<Utc>>,
    version: i64,
}

#[derive(sqlx::FromRow)]
struct WalletRow {
    id: Uuid,
    user_id: String,
    balance: i64,
    total_earned: i64,
    total_spent: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    wallet_id: Uuid,
    tx_type: String,
    amount: i64,
    reason: String,
    description: Option<String>,
    metadata: Option<serde_json::Value>,
    idempotency_key: Option<String>,
    created_at: DateTime<Utc>,
}

fn corrupt(e: AppError) -> AppError {
    AppError::Internal(format!("Corrupt row: {e}"))
}

impl TryFrom<QuestRow> for Quest {
    type Error = AppError;

    fn try_from(r: QuestRow) -> AppResult<Self> {
        Quest::from_parts(QuestParts {
            id: r.id,
            user_id: r.user_id,
            kind: r.quest_type.parse::<QuestKind>().map_err(corrupt)?,
            description: r.description,
            target: r.target,
            progress: r.progress,
            reward: r.reward,
            status: r.status.parse::<QuestStatus>().map_err(corrupt)?,
            assigned_at: r.assigned_at,
            expires_at: r.expires_at,
            completed_at: r.completed_at,
            claimed_at: r.claimed_at,
            version: r.version,
        })
        .map_err(corrupt)
    }
}

impl TryFrom<WalletRow> for Wallet {
    type Error = AppError;

    fn try_from(r: WalletRow) -> AppResult<Self> {
        Wallet::from_parts(
            r.id,
            r.user_id,
            r.balance,
            r.total_earned,
            r.total_spent,
            r.created_at,
            r.updated_at,
        )
        .map_err(corrupt)
    }
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = AppError;

    fn try_from(r: TransactionRow) -> AppResult<Self> {
        Ok(Transaction {
            id: r.id,
            wallet_id: r.wallet_id,
            kind: r.tx_type.parse::<TransactionKind>().map_err(corrupt)?,
            amount: r.amount,
            reason: r.reason.parse::<TransactionReason>().map_err(corrupt)?,
            description: r.description,
            metadata: r.metadata,
            idempotency_key: r.idempotency_key,
            created_at: r.created_at,
        })
    }
}

fn quests_from(rows: Vec<QuestRow>) -> AppResult<Vec<Quest>> {
    rows.into_iter().map(Quest::try_from).collect()
}

fn transactions_from(rows: Vec<TransactionRow>) -> AppResult<Vec<Transaction>> {
    rows.into_iter().map(Transaction::try_from).collect()
}

async fn insert_quest<'e, E: PgExecutor<'e>>(exec: E, q: &Quest) -> AppResult<()> {
    sqlx::query(&format!(
        "INSERT INTO quests ({QUEST_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
    ))
    .bind(q.id())
    .bind(q.user_id())
    .bind(q.kind().as_str())
    .bind(q.description())
    .bind(q.target())
    .bind(q.progress())
    .bind(q.reward())
    .bind(q.status().as_str())
    .bind(q.assigned_at())
    .bind(q.expires_at())
    .bind(q.completed_at())
    .bind(q.claimed_at())
    .bind(q.version())
    .execute(exec)
    .await?;
    Ok(())
}

/// Compare-and-swap on `version`.
async fn update_quest_state<'e, E: PgExecutor<'e>>(
    exec: E,
    q: &Quest,
    expected_version: i64,
) -> AppResult<bool> {
    let updated = sqlx::query(
        r#"UPDATE quests
        SET progress = $1, status = $2, completed_at = $3, claimed_at = $4, version = $5
        WHERE id = $6 AND version = $7"#,
    )
    .bind(q.progress())
    .bind(q.status().as_str())
    .bind(q.completed_at())
    .bind(q.claimed_at())
    .bind(q.version())
    .bind(q.id())
    .bind(expected_version)
    .execute(exec)
    .await?
    .rows_affected();
    Ok(updated == 1)
}

async fn insert_transaction<'e, E: PgExecutor<'e>>(exec: E, t: &Transaction) -> AppResult<()> {
    sqlx::query(&format!(
        "INSERT INTO transactions ({TRANSACTION_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
    ))
    .bind(t.id)
    .bind(t.wallet_id)
    .bind(t.kind.as_str())
    .bind(t.amount)
    .bind(t.reason.as_str())
    .bind(&t.description)
    .bind(&t.metadata)
    .bind(&t.idempotency_key)
    .bind(t.created_at)
    .execute(exec)
    .await?;
    Ok(())
}

async fn write_wallet<'e, E: PgExecutor<'e>>(exec: E, w: &Wallet) -> AppResult<()> {
    sqlx::query(
        "UPDATE wallets SET balance = $1, total_earned = $2, total_spent = $3, updated_at = $4 WHERE id = $5",
    )
    .bind(w.balance())
    .bind(w.total_earned())
    .bind(w.total_spent())
    .bind(w.updated_at())
    .bind(w.id())
    .execute(exec)
    .await?;
    Ok(())
}

async fn lock_wallet<'e, E: PgExecutor<'e>>(exec: E, user_id: &str) -> AppResult<Wallet> {
    let row: WalletRow = sqlx::query_as(&format!(
        "SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1 FOR UPDATE"
    ))
    .bind(user_id)
    .fetch_optional(exec)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Wallet for {user_id} not found")))?;
    row.try_into()
}

async fn find_by_idempotency_key<'e, E: PgExecutor<'e>>(
    exec: E,
    wallet_id: Uuid,
    key: Option<&str>,
) -> AppResult<Option<Transaction>> {
    let Some(key) = key else {
        return Ok(None);
    };
    let row: Option<TransactionRow> = sqlx::query_as(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE wallet_id = $1 AND idempotency_key = $2"
    ))
    .bind(wallet_id)
    .bind(key)
    .fetch_optional(exec)
    .await?;
    row.map(Transaction::try_from).transpose()
}

/// Postgres-backed store. Multi-record operations run in one database
/// transaction; per-wallet work is serialized by `FOR UPDATE` row locks and
/// daily-set regeneration by a per-user advisory lock.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> bool {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }

    async fn purge_expired_quests(&self, user_id: &str, now: DateTime<Utc>) -> AppResult<u64> {
        let deleted = sqlx::query("DELETE FROM quests WHERE user_id = $1 AND expires_at < $2")
            .bind(user_id)
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted)
    }

    async fn unexpired_quests(&self, user_id: &str, now: DateTime<Utc>) -> AppResult<Vec<Quest>> {
        let rows: Vec<QuestRow> = sqlx::query_as(&format!(
            "SELECT {QUEST_COLUMNS} FROM quests WHERE user_id = $1 AND expires_at >= $2 ORDER BY assigned_at, id"
        ))
        .bind(user_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        quests_from(rows)
    }

    async fn replace_daily_set(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        daily_count: usize,
        fresh: Vec<Quest>,
    ) -> AppResult<Vec<Quest>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let rows: Vec<QuestRow> = sqlx::query_as(&format!(
            "SELECT {QUEST_COLUMNS} FROM quests WHERE user_id = $1 AND expires_at >= $2 ORDER BY assigned_at, id"
        ))
        .bind(user_id)
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;
        if rows.len() >= daily_count {
            tx.commit().await?;
            return quests_from(rows);
        }

        sqlx::query("DELETE FROM quests WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        for quest in &fresh {
            insert_quest(&mut *tx, quest).await?;
        }

        tx.commit().await?;
        Ok(fresh)
    }

    async fn get_quest(&self, id: Uuid) -> AppResult<Option<Quest>> {
        let row: Option<QuestRow> =
            sqlx::query_as(&format!("SELECT {QUEST_COLUMNS} FROM quests WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Quest::try_from).transpose()
    }

    async fn active_quests_of_kind(
        &self,
        user_id: &str,
        kind: QuestKind,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Quest>> {
        let rows: Vec<QuestRow> = sqlx::query_as(&format!(
            r#"SELECT {QUEST_COLUMNS} FROM quests
            WHERE user_id = $1 AND status = 'ACTIVE' AND expires_at >= $2 AND quest_type = $3
            ORDER BY assigned_at, id"#
        ))
        .bind(user_id)
        .bind(now)
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;
        quests_from(rows)
    }

    async fn save_quest_progress(&self, quest: &Quest, expected_version: i64) -> AppResult<bool> {
        update_quest_state(&self.pool, quest, expected_version).await
    }

    async fn find_wallet(&self, user_id: &str) -> AppResult<Option<Wallet>> {
        let row: Option<WalletRow> = sqlx::query_as(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Wallet::try_from).transpose()
    }

    async fn create_wallet(&self, wallet: Wallet, opening: Option<Transaction>) -> AppResult<Wallet> {
        let mut tx = self.pool.begin().await?;

        let inserted: Option<WalletRow> = sqlx::query_as(&format!(
            r#"INSERT INTO wallets ({WALLET_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id) DO NOTHING
            RETURNING {WALLET_COLUMNS}"#
        ))
        .bind(wallet.id())
        .bind(wallet.user_id())
        .bind(wallet.balance())
        .bind(wallet.total_earned())
        .bind(wallet.total_spent())
        .bind(wallet.created_at())
        .bind(wallet.updated_at())
        .fetch_optional(&mut *tx)
        .await?;

        let row = match inserted {
            Some(row) => {
                if let Some(opening) = &opening {
                    insert_transaction(&mut *tx, opening).await?;
                }
                row
            }
            None => {
                sqlx::query_as::<_, WalletRow>(&format!(
                    "SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1"
                ))
                .bind(wallet.user_id())
                .fetch_one(&mut *tx)
                .await?
            }
        };

        tx.commit().await?;
        row.try_into()
    }

    async fn apply_to_wallet(
        &self,
        user_id: &str,
        entry: NewTransaction,
        now: DateTime<Utc>,
    ) -> AppResult<(Wallet, Transaction)> {
        let mut tx = self.pool.begin().await?;

        // The row lock comes first so a concurrent twin with the same key
        // sees the other's committed entry below.
        let mut wallet = lock_wallet(&mut *tx, user_id).await?;
        if let Some(existing) =
            find_by_idempotency_key(&mut *tx, wallet.id(), entry.idempotency_key.as_deref())
                .await?
        {
            tx.commit().await?;
            return Ok((wallet, entry.replay_of(&existing)?));
        }

        let record = entry.into_record(wallet.id(), now)?;
        wallet.apply(record.kind, record.amount, now)?;
        write_wallet(&mut *tx, &wallet).await?;
        insert_transaction(&mut *tx, &record).await?;

        tx.commit().await?;
        Ok((wallet, record))
    }

    async fn settle_claim(
        &self,
        quest: &Quest,
        expected_version: i64,
        entry: NewTransaction,
        now: DateTime<Utc>,
    ) -> AppResult<Option<(Wallet, Transaction)>> {
        let mut tx = self.pool.begin().await?;

        if !update_quest_state(&mut *tx, quest, expected_version).await? {
            tx.rollback().await?;
            return Ok(None);
        }

        let mut wallet = lock_wallet(&mut *tx, quest.user_id()).await?;
        if find_by_idempotency_key(&mut *tx, wallet.id(), entry.idempotency_key.as_deref())
            .await?
            .is_some()
        {
            tx.rollback().await?;
            return Err(AppError::InvalidState("Reward already credited".into()));
        }

        let record = entry.into_record(wallet.id(), now)?;
        wallet.apply(record.kind, record.amount, now)?;
        write_wallet(&mut *tx, &wallet).await?;
        insert_transaction(&mut *tx, &record).await?;

        tx.commit().await?;
        Ok(Some((wallet, record)))
    }

    async fn get_transaction(&self, id: Uuid) -> AppResult<Option<Transaction>> {
        let row: Option<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Transaction::try_from).transpose()
    }

    async fn list_transactions(
        &self,
        wallet_id: Uuid,
        query: &TransactionQuery,
    ) -> AppResult<Vec<Transaction>> {
        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            r#"SELECT {TRANSACTION_COLUMNS} FROM transactions
            WHERE wallet_id = $1 AND ($2::text IS NULL OR tx_type = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4"#
        ))
        .bind(wallet_id)
        .bind(query.kind.map(|k| k.as_str()))
        .bind(query.limit)
        .bind(query.offset)
        .fetch_all(&self.pool)
        .await?;
        transactions_from(rows)
    }

    async fn transactions_by_reason(
        &self,
        wallet_id: Uuid,
        kind: TransactionKind,
        reason: TransactionReason,
    ) -> AppResult<Vec<Transaction>> {
        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            r#"SELECT {TRANSACTION_COLUMNS} FROM transactions
            WHERE wallet_id = $1 AND tx_type = $2 AND reason = $3
            ORDER BY created_at DESC, id DESC"#
        ))
        .bind(wallet_id)
        .bind(kind.as_str())
        .bind(reason.as_str())
        .fetch_all(&self.pool)
        .await?;
        transactions_from(rows)
    }

    async fn count_transactions(&self, wallet_id: Uuid) -> AppResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*)::bigint FROM transactions WHERE wallet_id = $1")
                .bind(wallet_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn ledger_totals(&self, wallet_id: Uuid) -> AppResult<LedgerTotals> {
        let (earned, spent): (i64, i64) = sqlx::query_as(
            r#"SELECT
                COALESCE(SUM(amount) FILTER (WHERE tx_type = 'EARN'), 0)::bigint,
                COALESCE(SUM(amount) FILTER (WHERE tx_type = 'SPEND'), 0)::bigint
            FROM transactions WHERE wallet_id = $1"#,
        )
        .bind(wallet_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(LedgerTotals { earned, spent })
    }
}

// Run against a scratch database: DATABASE_URL=... cargo test -- --ignored
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    async fn store() -> PgStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = PgPool::connect(&url).await.unwrap();
        crate::db::migrate(&pool).await.unwrap();
        PgStore::new(pool)
    }

    fn user() -> String {
        format!("pg-{}", Uuid::new_v4())
    }

    fn quest(user: &str, kind: QuestKind, now: DateTime<Utc>) -> Quest {
        Quest::assign(user, kind, "test quest", 2, 15, now, Duration::hours(24)).unwrap()
    }

    async fn open_wallet(store: &PgStore, user: &str, balance: i64) -> Wallet {
        store
            .create_wallet(Wallet::open(user, balance, Utc::now()).unwrap(), None)
            .await
            .unwrap()
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn stale_version_write_is_refused() {
        let store = store().await;
        let now = Utc::now();
        let u = user();
        let q = quest(&u, QuestKind::FeedMonster, now);
        store.replace_daily_set(&u, now, 1, vec![q.clone()]).await.unwrap();

        let mut first = q.clone();
        first.increment_progress(1, now).unwrap();
        assert!(store.save_quest_progress(&first, 0).await.unwrap());

        let mut second = q.clone();
        second.increment_progress(1, now).unwrap();
        assert!(!store.save_quest_progress(&second, 0).await.unwrap());

        let stored = store.get_quest(q.id()).await.unwrap().unwrap();
        assert_eq!(stored.progress(), 1);
        assert_eq!(stored.version(), 1);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn racing_regenerations_leave_one_daily_set() {
        let store = Arc::new(store().await);
        let now = Utc::now();
        let u = user();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            let u = u.clone();
            let fresh = vec![
                quest(&u, QuestKind::FeedMonster, now),
                quest(&u, QuestKind::BuyItem, now),
                quest(&u, QuestKind::CleanMonster, now),
            ];
            handles.push(tokio::spawn(async move {
                store.replace_daily_set(&u, now, 3, fresh).await.unwrap()
            }));
        }

        let mut sets = Vec::new();
        for handle in handles {
            let mut ids: Vec<Uuid> = handle.await.unwrap().iter().map(Quest::id).collect();
            ids.sort();
            sets.push(ids);
        }
        assert!(sets.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(store.unexpired_quests(&u, now).await.unwrap().len(), 3);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn idempotency_keys_are_scoped_per_wallet() {
        let store = store().await;
        let (a, b) = (user(), user());
        open_wallet(&store, &a, 50).await;
        open_wallet(&store, &b, 50).await;

        let entry = NewTransaction::spend(10, TransactionReason::ShopPurchase).with_idempotency_key("order-1");
        let (_, first) = store.apply_to_wallet(&a, entry.clone(), Utc::now()).await.unwrap();
        let (wallet, second) = store.apply_to_wallet(&b, entry, Utc::now()).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(second.wallet_id, wallet.id());
        assert_eq!(wallet.balance(), 40);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn reused_key_with_different_change_conflicts() {
        let store = store().await;
        let u = user();
        open_wallet(&store, &u, 50).await;

        let entry = NewTransaction::spend(10, TransactionReason::ShopPurchase).with_idempotency_key("order-2");
        store.apply_to_wallet(&u, entry, Utc::now()).await.unwrap();

        let other = NewTransaction::spend(30, TransactionReason::ShopPurchase).with_idempotency_key("order-2");
        assert!(matches!(
            store.apply_to_wallet(&u, other, Utc::now()).await,
            Err(AppError::Conflict(_))
        ));
        let wallet = store.find_wallet(&u).await.unwrap().unwrap();
        assert_eq!(wallet.balance(), 40);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn concurrent_twins_are_debited_once() {
        let store = Arc::new(store().await);
        let u = user();
        open_wallet(&store, &u, 100).await;

        let mut handles = Vec::new();
        for _ in 0..5 {
            let store = store.clone();
            let u = u.clone();
            handles.push(tokio::spawn(async move {
                let entry =
                    NewTransaction::spend(60, TransactionReason::CreateMonster).with_idempotency_key("egg-1");
                store.apply_to_wallet(&u, entry, Utc::now()).await.unwrap().1.id
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        assert!(ids.windows(2).all(|w| w[0] == w[1]));

        let wallet = store.find_wallet(&u).await.unwrap().unwrap();
        assert_eq!(wallet.balance(), 40);
        assert_eq!(store.count_transactions(wallet.id()).await.unwrap(), 1);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn claim_settles_once() {
        let store = store().await;
        let now = Utc::now();
        let u = user();
        open_wallet(&store, &u, 0).await;

        let mut q = quest(&u, QuestKind::BuyItem, now);
        store.replace_daily_set(&u, now, 1, vec![q.clone()]).await.unwrap();
        q.increment_progress(2, now).unwrap();
        assert!(store.save_quest_progress(&q, 0).await.unwrap());

        let expected = q.version();
        let mut claimed = q.clone();
        let reward = claimed.claim(now).unwrap();
        let entry = || {
            NewTransaction::earn(reward, TransactionReason::QuestReward)
                .with_idempotency_key(format!("quest:{}", q.id()))
        };

        let (wallet, _) = store
            .settle_claim(&claimed, expected, entry(), now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(wallet.balance(), 15);
        assert!(store
            .settle_claim(&claimed, expected, entry(), now)
            .await
            .unwrap()
            .is_none());

        let stored = store.get_quest(q.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), QuestStatus::Claimed);
        assert_eq!(store.count_transactions(wallet.id()).await.unwrap(), 1);
    }
}
