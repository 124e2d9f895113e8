pub mod assignment;
pub mod catalog;
pub mod ledger;
pub mod progress;
pub mod rewards;
pub mod wallet;

use chrono::Duration;
use std::sync::Arc;

use crate::clock::DynClock;
use crate::config::QuestConfig;
use crate::store::DynStore;

use assignment::QuestAssigner;
use catalog::QuestCatalog;
use ledger::LedgerService;
use progress::ProgressTracker;
use rewards::RewardClaims;
use wallet::WalletService;

/// The quest and reward engine, wired against one store and one clock.
#[derive(Clone)]
pub struct Engine {
    pub assignments: QuestAssigner,
    pub progress: ProgressTracker,
    pub rewards: RewardClaims,
    pub wallets: WalletService,
    pub ledger: LedgerService,
}

impl Engine {
    pub fn new(
        store: DynStore,
        catalog: Arc<QuestCatalog>,
        clock: DynClock,
        cfg: &QuestConfig,
    ) -> Self {
        let wallets = WalletService::new(store.clone(), clock.clone(), cfg.starting_bonus);
        Self {
            assignments: QuestAssigner::new(
                store.clone(),
                catalog,
                clock.clone(),
                cfg.daily_count,
                Duration::hours(cfg.window_hours),
            ),
            progress: ProgressTracker::new(store.clone(), clock.clone(), cfg.max_write_retries),
            rewards: RewardClaims::new(
                store.clone(),
                wallets.clone(),
                clock,
                cfg.max_write_retries,
            ),
            ledger: LedgerService::new(store),
            wallets,
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::models::{Quest, QuestKind};
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};

    /// Engine over a fresh in-memory store and a frozen clock.
    pub struct Harness {
        pub engine: Engine,
        pub store: MemoryStore,
        pub clock: Arc<ManualClock>,
    }

    impl Harness {
        pub fn new() -> Self {
            Self::build(QuestCatalog::standard(), QuestConfig::default())
        }

        pub fn with_catalog(catalog: QuestCatalog) -> Self {
            Self::build(catalog, QuestConfig::default())
        }

        pub fn with_retries(max_write_retries: u32) -> Self {
            Self::build(
                QuestCatalog::standard(),
                QuestConfig {
                    max_write_retries,
                    ..QuestConfig::default()
                },
            )
        }

        fn build(catalog: QuestCatalog, cfg: QuestConfig) -> Self {
            let store = MemoryStore::new();
            let start = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
            let clock = Arc::new(ManualClock::new(start));
            let engine = Engine::new(
                Arc::new(store.clone()),
                Arc::new(catalog),
                clock.clone(),
                &cfg,
            );
            Self {
                engine,
                store,
                clock,
            }
        }

        /// Puts a fresh active quest straight into the store.
        pub async fn seed_quest(&self, user_id: &str, kind: QuestKind, target: i32, reward: i64) -> Quest {
            let quest = Quest::assign(
                user_id,
                kind,
                &format!("{kind} x{target}"),
                target,
                reward,
                self.clock.now(),
                Duration::hours(24),
            )
            .unwrap();
            self.store.insert_quest(quest.clone()).await;
            quest
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::Harness;
    use crate::error::AppError;
    use crate::models::{QuestStatus, TransactionReason};
    use chrono::Duration;

    // Walks one user through a whole day: assignment, progress, claim, expiry.
    #[tokio::test]
    async fn daily_cycle_end_to_end() {
        let h = Harness::new();
        let e = &h.engine;

        let quests = e.assignments.ensure_daily_quests("u1").await.unwrap();
        assert_eq!(quests.len(), 3);
        let first = &quests[0];

        let mut earned = 0;
        for q in &quests {
            let done = e
                .progress
                .record_activity("u1", q.kind(), q.target())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(done.status(), QuestStatus::Completed);
            earned += e.rewards.claim_reward(q.id(), "u1").await.unwrap().reward;
        }

        let report = e.wallets.reconcile("u1").await.unwrap();
        assert!(report.consistent);
        assert_eq!(report.wallet.balance, 100 + earned);

        let wallet = e.wallets.get_or_create("u1").await.unwrap();
        let rewards = e
            .ledger
            .by_reason(wallet.id(), TransactionReason::QuestReward)
            .await
            .unwrap();
        assert_eq!(rewards.len(), 3);
        assert_eq!(rewards.iter().map(|t| t.amount).sum::<i64>(), earned);

        h.clock.advance(Duration::hours(24) + Duration::seconds(1));
        assert!(matches!(
            e.rewards.claim_reward(first.id(), "u1").await,
            Err(AppError::InvalidState(_)) | Err(AppError::NotFound(_))
        ));
        let next = e.assignments.ensure_daily_quests("u1").await.unwrap();
        assert!(next.iter().all(|q| q.status() == QuestStatus::Active));
        assert!(next.iter().all(|q| quests.iter().all(|old| old.id() != q.id())));
    }

    #[tokio::test]
    async fn users_do_not_share_quests_or_wallets() {
        let h = Harness::new();
        let e = &h.engine;
        let a = e.assignments.ensure_daily_quests("alice").await.unwrap();
        let b = e.assignments.ensure_daily_quests("bob").await.unwrap();
        assert!(a.iter().all(|qa| b.iter().all(|qb| qa.id() != qb.id())));

        let wa = e.wallets.get_or_create("alice").await.unwrap();
        let wb = e.wallets.get_or_create("bob").await.unwrap();
        assert_ne!(wa.id(), wb.id());
    }
}
