use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::models::economy::GrantRequest;
use crate::AppState;

pub async fn grant_coins(
    State(state): State<AppState>,
    admin: axum::Extension<AuthUser>,
    Path(user_id): Path<String>,
    Json(body): Json<GrantRequest>,
) -> AppResult<Json<Value>> {
    let (wallet, tx) = state
        .engine
        .wallets
        .grant(&user_id, body.amount, body.description, body.idempotency_key)
        .await?;
    tracing::info!(admin = %admin.id, user_id = %user_id, amount = tx.amount, "admin grant");
    Ok(Json(json!({ "wallet": wallet.summary(), "transaction": tx })))
}
