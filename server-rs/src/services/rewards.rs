use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::DynClock;
use crate::error::{AppError, AppResult};
use crate::models::{NewTransaction, Quest, Transaction, TransactionReason, WalletSummary};
use crate::services::wallet::{require_user, WalletService};
use crate::store::DynStore;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimOutcome {
    pub reward: i64,
    pub quest: Quest,
    pub wallet: WalletSummary,
    pub transaction: Transaction,
}

/// Turns completed quests into coins. The quest transition, the wallet credit
/// and the ledger entry are committed together or not at all.
#[derive(Clone)]
pub struct RewardClaims {
    store: DynStore,
    wallets: WalletService,
    clock: DynClock,
    max_retries: u32,
}

impl RewardClaims {
    pub fn new(store: DynStore, wallets: WalletService, clock: DynClock, max_retries: u32) -> Self {
        Self {
            store,
            wallets,
            clock,
            max_retries,
        }
    }

    pub async fn claim_reward(&self, quest_id: Uuid, user_id: &str) -> AppResult<ClaimOutcome> {
        require_user(user_id)?;

        for attempt in 0..=self.max_retries {
            let quest = self.load_owned(quest_id, user_id).await?;
            let now = self.clock.now();
            quest.ensure_claimable(now)?;
            self.wallets.get_or_create(user_id).await?;

            let expected = quest.version();
            let mut claimed = quest.clone();
            let reward = claimed.claim(now)?;
            let entry = reward_entry(&claimed);

            match self
                .store
                .settle_claim(&claimed, expected, entry, now)
                .await?
            {
                Some((wallet, transaction)) => {
                    info!(
                        quest_id = %quest_id,
                        user_id,
                        reward,
                        balance = wallet.balance(),
                        "quest reward claimed"
                    );
                    return Ok(ClaimOutcome {
                        reward,
                        quest: claimed,
                        wallet: wallet.summary(),
                        transaction,
                    });
                }
                // Quest changed underneath us; re-read so a concurrent claim
                // surfaces as "already claimed".
                None => warn!(quest_id = %quest_id, attempt, "concurrent claim, re-checking"),
            }
        }

        Err(AppError::Conflict(format!(
            "Quest {quest_id} is being claimed concurrently, try again"
        )))
    }

    async fn load_owned(&self, quest_id: Uuid, user_id: &str) -> AppResult<Quest> {
        let quest = self
            .store
            .get_quest(quest_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Quest {quest_id} not found")))?;
        if !quest.is_owned_by(user_id) {
            return Err(AppError::Unauthorized(
                "Quest belongs to another user".into(),
            ));
        }
        Ok(quest)
    }
}

fn reward_entry(quest: &Quest) -> NewTransaction {
    NewTransaction::earn(quest.reward(), TransactionReason::QuestReward)
        .with_description(format!("Quest reward: {}", quest.description()))
        .with_metadata(json!({
            "questId": quest.id(),
            "questType": quest.kind(),
        }))
        .with_idempotency_key(format!("quest:{}", quest.id()))
}
