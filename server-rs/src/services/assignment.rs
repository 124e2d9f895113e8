use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::DynClock;
use crate::error::AppResult;
use crate::models::Quest;
use crate::services::catalog::QuestCatalog;
use crate::services::wallet::require_user;
use crate::store::DynStore;

/// Keeps every user supplied with exactly one daily set of quests.
#[derive(Clone)]
pub struct QuestAssigner {
    store: DynStore,
    catalog: Arc<QuestCatalog>,
    clock: DynClock,
    daily_count: usize,
    window: Duration,
}

impl QuestAssigner {
    pub fn new(
        store: DynStore,
        catalog: Arc<QuestCatalog>,
        clock: DynClock,
        daily_count: usize,
        window: Duration,
    ) -> Self {
        Self {
            store,
            catalog,
            clock,
            daily_count,
            window,
        }
    }

    /// Returns the user's current daily set, generating a new one when the
    /// previous set has expired or is incomplete.
    ///
    /// Claimed quests still count toward the set until they expire. A partial
    /// set is replaced wholesale, never topped up. Safe to call concurrently.
    pub async fn ensure_daily_quests(&self, user_id: &str) -> AppResult<Vec<Quest>> {
        require_user(user_id)?;
        let now = self.clock.now();

        let purged = self.store.purge_expired_quests(user_id, now).await?;
        if purged > 0 {
            debug!(user_id, purged, "expired quests purged");
        }

        let current = self.store.unexpired_quests(user_id, now).await?;
        if current.len() >= self.daily_count {
            return Ok(current);
        }

        let fresh = self.draw_set(user_id, now)?;
        let set = self
            .store
            .replace_daily_set(user_id, now, self.daily_count, fresh)
            .await?;
        info!(
            user_id,
            replaced = current.len(),
            quests = set.len(),
            "daily quest set assigned"
        );
        Ok(set)
    }

    fn draw_set(&self, user_id: &str, now: DateTime<Utc>) -> AppResult<Vec<Quest>> {
        let mut rng = rand::thread_rng();
        self.catalog
            .select_daily_set(self.daily_count, &mut rng)?
            .into_iter()
            .map(|e| {
                Quest::assign(
                    user_id,
                    e.kind,
                    &e.description,
                    e.target,
                    e.reward,
                    now,
                    self.window,
                )
            })
            .collect()
    }
}
