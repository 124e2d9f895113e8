use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::models::QuestKind;
use crate::services::rewards::ClaimOutcome;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRequest {
    pub activity_type: QuestKind,
    #[serde(default = "one")]
    pub amount: i32,
    #[serde(default)]
    pub all_matching: bool,
}

fn one() -> i32 {
    1
}

pub async fn list_quests(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
) -> AppResult<Json<Value>> {
    let quests = state.engine.assignments.ensure_daily_quests(&user.id).await?;
    Ok(Json(json!({ "quests": quests })))
}

pub async fn record_activity(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Json(body): Json<ActivityRequest>,
) -> AppResult<Json<Value>> {
    let progress = &state.engine.progress;
    let updated = if body.all_matching {
        progress
            .record_activity_for_all(&user.id, body.activity_type, body.amount)
            .await?
    } else {
        progress
            .record_activity(&user.id, body.activity_type, body.amount)
            .await?
            .into_iter()
            .collect()
    };
    Ok(Json(json!({ "updated": updated })))
}

pub async fn claim(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ClaimOutcome>> {
    let outcome = state.engine.rewards.claim_reward(id, &user.id).await?;
    Ok(Json(outcome))
}

pub async fn catalog(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "catalog": state.catalog.entries() }))
}
