use tracing::{debug, info, warn};

use crate::clock::DynClock;
use crate::error::{AppError, AppResult};
use crate::models::{Quest, QuestKind, QuestStatus};
use crate::services::wallet::require_user;
use crate::store::DynStore;

/// Routes activity events (feeding, playing, purchases, ...) to the matching
/// active quest.
#[derive(Clone)]
pub struct ProgressTracker {
    store: DynStore,
    clock: DynClock,
    max_retries: u32,
}

impl ProgressTracker {
    pub fn new(store: DynStore, clock: DynClock, max_retries: u32) -> Self {
        Self {
            store,
            clock,
            max_retries,
        }
    }

    /// Advances the user's active quest of this kind. Activity that matches
    /// no active quest is ignored and yields `Ok(None)`.
    pub async fn record_activity(
        &self,
        user_id: &str,
        kind: QuestKind,
        amount: i32,
    ) -> AppResult<Option<Quest>> {
        check_input(user_id, amount)?;
        let candidates = self
            .store
            .active_quests_of_kind(user_id, kind, self.clock.now())
            .await?;

        match candidates.into_iter().next() {
            Some(quest) => self.advance(quest, amount).await,
            None => {
                debug!(user_id, %kind, "activity matched no active quest");
                Ok(None)
            }
        }
    }

    /// Like [`record_activity`](Self::record_activity) but advances every
    /// active quest of the kind.
    pub async fn record_activity_for_all(
        &self,
        user_id: &str,
        kind: QuestKind,
        amount: i32,
    ) -> AppResult<Vec<Quest>> {
        check_input(user_id, amount)?;
        let candidates = self
            .store
            .active_quests_of_kind(user_id, kind, self.clock.now())
            .await?;

        let mut advanced = Vec::with_capacity(candidates.len());
        for quest in candidates {
            if let Some(quest) = self.advance(quest, amount).await? {
                advanced.push(quest);
            }
        }
        Ok(advanced)
    }

    /// Read-modify-write with a version check; reloads and retries when a
    /// concurrent writer got in first. A quest that disappears in between
    /// (daily set regenerated) is skipped with `Ok(None)`.
    async fn advance(&self, mut quest: Quest, amount: i32) -> AppResult<Option<Quest>> {
        let id = quest.id();
        for attempt in 0..=self.max_retries {
            let expected = quest.version();
            if !quest.increment_progress(amount, self.clock.now())? {
                return Ok(Some(quest));
            }

            if self.store.save_quest_progress(&quest, expected).await? {
                if quest.status() == QuestStatus::Completed {
                    info!(quest_id = %id, user_id = quest.user_id(), kind = %quest.kind(), "quest completed");
                }
                return Ok(Some(quest));
            }

            warn!(quest_id = %id, attempt, "concurrent progress update, retrying");
            match self.store.get_quest(id).await? {
                Some(fresh) if fresh.status() == QuestStatus::Active => quest = fresh,
                Some(_) | None => {
                    debug!(quest_id = %id, "quest no longer active, activity dropped");
                    return Ok(None);
                }
            }
        }

        Err(AppError::Conflict(format!(
            "Quest {id} is being updated concurrently, try again"
        )))
    }
}

fn check_input(user_id: &str, amount: i32) -> AppResult<()> {
    require_user(user_id)?;
    if amount <= 0 {
        return Err(AppError::InvalidArgument(format!(
            "Activity amount must be positive, got {amount}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::services::testing::Harness;
    use crate::store::Store;
    use chrono::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn feeding_completes_the_feed_quest() {
        let h = Harness::new();
        let quest = h.seed_quest("u1", QuestKind::FeedMonster, 5, 20).await;
        h.engine
            .progress
            .record_activity("u1", QuestKind::FeedMonster, 4)
            .await
            .unwrap();

        let done = h
            .engine
            .progress
            .record_activity("u1", QuestKind::FeedMonster, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.id(), quest.id());
        assert_eq!(done.progress(), 5);
        assert_eq!(done.status(), QuestStatus::Completed);
        assert!(done.completed_at().is_some());
    }

    #[tokio::test]
    async fn unrelated_activity_is_a_silent_no_op() {
        let h = Harness::new();
        h.seed_quest("u1", QuestKind::FeedMonster, 5, 20).await;
        let result = h
            .engine
            .progress
            .record_activity("u1", QuestKind::BuyItem, 1)
            .await
            .unwrap();
        assert!(result.is_none());

        let nobody = h
            .engine
            .progress
            .record_activity("ghost", QuestKind::FeedMonster, 1)
            .await
            .unwrap();
        assert!(nobody.is_none());
    }

    #[tokio::test]
    async fn completed_quest_no_longer_matches() {
        let h = Harness::new();
        h.seed_quest("u1", QuestKind::PutMonsterToSleep, 1, 10).await;
        let p = &h.engine.progress;
        assert!(p
            .record_activity("u1", QuestKind::PutMonsterToSleep, 1)
            .await
            .unwrap()
            .is_some());
        assert!(p
            .record_activity("u1", QuestKind::PutMonsterToSleep, 1)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn expired_quest_is_not_advanced() {
        let h = Harness::new();
        let quest = h.seed_quest("u1", QuestKind::FeedMonster, 5, 20).await;
        h.clock.advance(Duration::hours(25));

        let result = h
            .engine
            .progress
            .record_activity("u1", QuestKind::FeedMonster, 1)
            .await
            .unwrap();
        assert!(result.is_none());
        let stored = h.store.get_quest(quest.id()).await.unwrap().unwrap();
        assert_eq!(stored.progress(), 0);
    }

    #[tokio::test]
    async fn non_positive_amount_is_rejected() {
        let h = Harness::new();
        assert!(matches!(
            h.engine
                .progress
                .record_activity("u1", QuestKind::FeedMonster, 0)
                .await,
            Err(AppError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn for_all_advances_every_match() {
        let h = Harness::new();
        h.seed_quest("u1", QuestKind::CleanMonster, 2, 15).await;
        h.seed_quest("u1", QuestKind::CleanMonster, 3, 15).await;
        h.seed_quest("u1", QuestKind::FeedMonster, 3, 15).await;

        let advanced = h
            .engine
            .progress
            .record_activity_for_all("u1", QuestKind::CleanMonster, 1)
            .await
            .unwrap();
        assert_eq!(advanced.len(), 2);
        assert!(advanced.iter().all(|q| q.progress() == 1));
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let h = Harness::with_retries(64);
        let quest = h.seed_quest("u1", QuestKind::PlayWithMonster, 10, 30).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let tracker = h.engine.progress.clone();
            handles.push(tokio::spawn(async move {
                tracker
                    .record_activity("u1", QuestKind::PlayWithMonster, 1)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = h.store.get_quest(quest.id()).await.unwrap().unwrap();
        assert_eq!(stored.progress(), 8);
        assert_eq!(stored.status(), QuestStatus::Active);
    }

    #[tokio::test]
    async fn stale_copy_is_refreshed_before_writing() {
        let h = Harness::new();
        let quest = h.seed_quest("u1", QuestKind::BuyItem, 2, 25).await;

        // Someone else advances the stored quest behind our back.
        let mut other = quest.clone();
        other.increment_progress(1, h.clock.now()).unwrap();
        assert!(h.store.save_quest_progress(&other, 0).await.unwrap());

        let advanced = h.engine.progress.advance(quest, 1).await.unwrap().unwrap();
        assert_eq!(advanced.progress(), 2);
        assert_eq!(advanced.status(), QuestStatus::Completed);
        assert_ne!(advanced.id(), Uuid::nil());
    }

    #[tokio::test]
    async fn quest_removed_mid_update_is_skipped() {
        let h = Harness::new();
        let quest = h.seed_quest("u1", QuestKind::CleanMonster, 2, 15).await;
        h.store.remove_quest(quest.id()).await;

        let result = h.engine.progress.advance(quest, 1).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn quest_finished_elsewhere_is_not_reapplied() {
        let h = Harness::new();
        let quest = h.seed_quest("u1", QuestKind::BuyItem, 1, 25).await;

        let mut other = quest.clone();
        other.increment_progress(1, h.clock.now()).unwrap();
        assert!(h.store.save_quest_progress(&other, 0).await.unwrap());

        assert!(h.engine.progress.advance(quest, 1).await.unwrap().is_none());
        let stored = h.store.get_quest(other.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), QuestStatus::Completed);
    }
}
