use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{AppError, AppResult};
use crate::models::quest::{QuestKind, MAX_REWARD, MAX_TARGET, MIN_REWARD, MIN_TARGET};

/// Number of distinct quests handed out per user per day.
pub const DAILY_QUEST_COUNT: usize = 3;

/// Template a daily quest is stamped from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    #[serde(rename = "type")]
    pub kind: QuestKind,
    pub description: String,
    pub target: i32,
    pub reward: i64,
}

impl CatalogEntry {
    fn new(kind: QuestKind, description: &str, target: i32, reward: i64) -> Self {
        Self {
            kind,
            description: description.to_string(),
            target,
            reward,
        }
    }
}

/// Read-only table of quest templates, shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct QuestCatalog {
    entries: Vec<CatalogEntry>,
}

impl QuestCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> AppResult<Self> {
        for e in &entries {
            if !(MIN_TARGET..=MAX_TARGET).contains(&e.target) {
                return Err(AppError::InvalidArgument(format!(
                    "Catalog entry {} has target {} outside [{MIN_TARGET}, {MAX_TARGET}]",
                    e.kind, e.target
                )));
            }
            if !(MIN_REWARD..=MAX_REWARD).contains(&e.reward) {
                return Err(AppError::InvalidArgument(format!(
                    "Catalog entry {} has reward {} outside [{MIN_REWARD}, {MAX_REWARD}]",
                    e.kind, e.reward
                )));
            }
        }
        Ok(Self { entries })
    }

    /// The built-in pet-care catalog.
    pub fn standard() -> Self {
        Self {
            entries: vec![
                CatalogEntry::new(QuestKind::FeedMonster, "Feed your monster 5 times", 5, 20),
                CatalogEntry::new(QuestKind::PlayWithMonster, "Play with your monster 3 times", 3, 15),
                CatalogEntry::new(QuestKind::CleanMonster, "Give your monster 2 baths", 2, 15),
                CatalogEntry::new(QuestKind::PutMonsterToSleep, "Put your monster to bed", 1, 10),
                CatalogEntry::new(QuestKind::EquipAccessory, "Equip an accessory on your monster", 1, 10),
                CatalogEntry::new(QuestKind::BuyItem, "Buy 2 items from the shop", 2, 25),
                CatalogEntry::new(QuestKind::CreateMonster, "Adopt a new monster", 1, 50),
            ],
        }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn distinct_kinds(&self) -> Vec<QuestKind> {
        let mut kinds: Vec<QuestKind> = self.entries.iter().map(|e| e.kind).collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }

    /// Draws `n` entries with pairwise distinct kinds, uniformly and without
    /// replacement over kinds. When a kind has several templates one of them
    /// is picked uniformly.
    pub fn select_daily_set<R: Rng + ?Sized>(
        &self,
        n: usize,
        rng: &mut R,
    ) -> AppResult<Vec<&CatalogEntry>> {
        let mut by_kind: BTreeMap<QuestKind, Vec<&CatalogEntry>> = BTreeMap::new();
        for e in &self.entries {
            by_kind.entry(e.kind).or_default().push(e);
        }

        if by_kind.len() < n {
            return Err(AppError::InsufficientCatalog {
                available: by_kind.len(),
                requested: n,
            });
        }

        let kinds: Vec<QuestKind> = by_kind.keys().copied().collect();
        kinds
            .choose_multiple(&mut *rng, n)
            .map(|kind| {
                by_kind
                    .get(kind)
                    .and_then(|templates| templates.choose(&mut *rng).copied())
                    .ok_or_else(|| AppError::Internal(format!("No template for {kind}")))
            })
            .collect()
    }
}
