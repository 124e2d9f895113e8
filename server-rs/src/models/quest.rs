use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub const MIN_TARGET: i32 = 1;
pub const MAX_TARGET: i32 = 10;
pub const MIN_REWARD: i64 = 10;
pub const MAX_REWARD: i64 = 100;

/// Objective kinds. Activity events from the creature and shop handlers carry
/// one of these so they can be routed to a matching quest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestKind {
    FeedMonster,
    PlayWithMonster,
    CleanMonster,
    PutMonsterToSleep,
    EquipAccessory,
    BuyItem,
    CreateMonster,
}

impl QuestKind {
    pub const ALL: [QuestKind; 7] = [
        QuestKind::FeedMonster,
        QuestKind::PlayWithMonster,
        QuestKind::CleanMonster,
        QuestKind::PutMonsterToSleep,
        QuestKind::EquipAccessory,
        QuestKind::BuyItem,
        QuestKind::CreateMonster,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuestKind::FeedMonster => "FEED_MONSTER",
            QuestKind::PlayWithMonster => "PLAY_WITH_MONSTER",
            QuestKind::CleanMonster => "CLEAN_MONSTER",
            QuestKind::PutMonsterToSleep => "PUT_MONSTER_TO_SLEEP",
            QuestKind::EquipAccessory => "EQUIP_ACCESSORY",
            QuestKind::BuyItem => "BUY_ITEM",
            QuestKind::CreateMonster => "CREATE_MONSTER",
        }
    }
}

impl fmt::Display for QuestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QuestKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| AppError::InvalidArgument(format!("Unknown quest type: {s}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestStatus {
    Active,
    Completed,
    Claimed,
}

impl QuestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestStatus::Active => "ACTIVE",
            QuestStatus::Completed => "COMPLETED",
            QuestStatus::Claimed => "CLAIMED",
        }
    }
}

impl fmt::Display for QuestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(QuestStatus::Active),
            "COMPLETED" => Ok(QuestStatus::Completed),
            "CLAIMED" => Ok(QuestStatus::Claimed),
            other => Err(AppError::InvalidArgument(format!(
                "Unknown quest status: {other}"
            ))),
        }
    }
}

/// Raw field set used to rebuild a [`Quest`] from storage. Goes through the
/// same validation as a freshly assigned quest.
#[derive(Debug, Clone)]
pub struct QuestParts {
    pub id: Uuid,
    pub user_id: String,
    pub kind: QuestKind,
    pub description: String,
    pub target: i32,
    pub progress: i32,
    pub reward: i64,
    pub status: QuestStatus,
    pub assigned_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub version: i64,
}

/// A single daily objective owned by one user.
///
/// Fields are private so every instance satisfies the invariants checked in
/// [`Quest::from_parts`]; the only mutators are [`Quest::increment_progress`]
/// and [`Quest::claim`]. Each successful mutation bumps `version`, which the
/// store uses for compare-and-swap writes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quest {
    id: Uuid,
    user_id: String,
    #[serde(rename = "type")]
    kind: QuestKind,
    description: String,
    target: i32,
    progress: i32,
    reward: i64,
    status: QuestStatus,
    assigned_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    claimed_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    version: i64,
}

impl Quest {
    /// Fresh ACTIVE quest with zero progress, expiring `window` after `now`.
    pub fn assign(
        user_id: &str,
        kind: QuestKind,
        description: &str,
        target: i32,
        reward: i64,
        now: DateTime<Utc>,
        window: Duration,
    ) -> AppResult<Self> {
        Self::from_parts(QuestParts {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            kind,
            description: description.to_string(),
            target,
            progress: 0,
            reward,
            status: QuestStatus::Active,
            assigned_at: now,
            expires_at: now + window,
            completed_at: None,
            claimed_at: None,
            version: 0,
        })
    }

    pub fn from_parts(p: QuestParts) -> AppResult<Self> {
        let invalid = |msg: String| Err(AppError::InvalidArgument(msg));

        if p.user_id.is_empty() {
            return invalid("Quest owner must not be empty".into());
        }
        if !(MIN_TARGET..=MAX_TARGET).contains(&p.target) {
            return invalid(format!(
                "Target {} outside [{MIN_TARGET}, {MAX_TARGET}]",
                p.target
            ));
        }
        if !(MIN_REWARD..=MAX_REWARD).contains(&p.reward) {
            return invalid(format!(
                "Reward {} outside [{MIN_REWARD}, {MAX_REWARD}]",
                p.reward
            ));
        }
        if p.progress < 0 || p.progress > p.target {
            return invalid(format!(
                "Progress {} outside [0, {}]",
                p.progress, p.target
            ));
        }
        if p.expires_at <= p.assigned_at {
            return invalid("Quest must expire after it is assigned".into());
        }
        if p.version < 0 {
            return invalid("Quest version must not be negative".into());
        }

        match p.status {
            QuestStatus::Active => {
                if p.progress == p.target {
                    return invalid("Active quest cannot be at full progress".into());
                }
                if p.completed_at.is_some() || p.claimed_at.is_some() {
                    return invalid("Active quest cannot carry completion stamps".into());
                }
            }
            QuestStatus::Completed => {
                if p.progress != p.target {
                    return invalid("Completed quest must be at full progress".into());
                }
                if p.completed_at.is_none() {
                    return invalid("Completed quest is missing completedAt".into());
                }
                if p.claimed_at.is_some() {
                    return invalid("Completed quest cannot carry claimedAt".into());
                }
            }
            QuestStatus::Claimed => {
                if p.progress != p.target {
                    return invalid("Claimed quest must be at full progress".into());
                }
                match (p.completed_at, p.claimed_at) {
                    (Some(completed), Some(claimed)) if completed <= claimed => {}
                    (Some(_), Some(_)) => {
                        return invalid("Quest claimed before it was completed".into())
                    }
                    _ => return invalid("Claimed quest is missing its stamps".into()),
                }
            }
        }

        Ok(Self {
            id: p.id,
            user_id: p.user_id,
            kind: p.kind,
            description: p.description,
            target: p.target,
            progress: p.progress,
            reward: p.reward,
            status: p.status,
            assigned_at: p.assigned_at,
            expires_at: p.expires_at,
            completed_at: p.completed_at,
            claimed_at: p.claimed_at,
            version: p.version,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn kind(&self) -> QuestKind {
        self.kind
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn target(&self) -> i32 {
        self.target
    }

    pub fn progress(&self) -> i32 {
        self.progress
    }

    pub fn reward(&self) -> i64 {
        self.reward
    }

    pub fn status(&self) -> QuestStatus {
        self.status
    }

    pub fn assigned_at(&self) -> DateTime<Utc> {
        self.assigned_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn claimed_at(&self) -> Option<DateTime<Utc>> {
        self.claimed_at
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Advances progress by `amount`, clamped at `target`. Reaching the target
    /// while ACTIVE completes the quest in the same call.
    ///
    /// Returns whether anything changed; a quest already at its target is
    /// left untouched.
    pub fn increment_progress(&mut self, amount: i32, now: DateTime<Utc>) -> AppResult<bool> {
        if amount <= 0 {
            return Err(AppError::InvalidArgument(format!(
                "Progress increment must be positive, got {amount}"
            )));
        }
        if self.status == QuestStatus::Claimed {
            return Err(AppError::InvalidState("Quest already claimed".into()));
        }
        if self.is_expired(now) {
            return Err(AppError::Expired("Quest has expired".into()));
        }

        let next = self.progress.saturating_add(amount).min(self.target);
        if next == self.progress {
            return Ok(false);
        }

        self.progress = next;
        if self.progress == self.target && self.status == QuestStatus::Active {
            self.status = QuestStatus::Completed;
            self.completed_at = Some(now);
        }
        self.version += 1;
        Ok(true)
    }

    /// Fails without side effects unless the quest is COMPLETED and unexpired.
    pub fn ensure_claimable(&self, now: DateTime<Utc>) -> AppResult<()> {
        match self.status {
            QuestStatus::Claimed => Err(AppError::InvalidState("Reward already claimed".into())),
            QuestStatus::Active => Err(AppError::InvalidState("Quest not completed yet".into())),
            QuestStatus::Completed if self.is_expired(now) => {
                Err(AppError::Expired("Quest has expired".into()))
            }
            QuestStatus::Completed => Ok(()),
        }
    }

    /// COMPLETED -> CLAIMED. Returns the reward to credit; the wallet itself
    /// is credited by the caller.
    pub fn claim(&mut self, now: DateTime<Utc>) -> AppResult<i64> {
        self.ensure_claimable(now)?;
        self.status = QuestStatus::Claimed;
        self.claimed_at = Some(now);
        self.version += 1;
        Ok(self.reward)
    }
}
