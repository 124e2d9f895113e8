use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::models::economy::*;
use crate::models::{Transaction, TransactionQuery};
use crate::services::wallet::Reconciliation;
use crate::AppState;

pub async fn get_wallet(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
) -> AppResult<Json<Value>> {
    let wallet = state.engine.wallets.get_wallet(&user.id).await?;
    Ok(Json(json!({ "wallet": wallet })))
}

pub async fn get_transactions(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Query(q): Query<TransactionsQuery>,
) -> AppResult<Json<Value>> {
    let wallet = state.engine.wallets.get_or_create(&user.id).await?;
    let query = TransactionQuery::from(q);
    let txns = state.engine.ledger.list(wallet.id(), &query).await?;
    let total = state.engine.ledger.count(wallet.id()).await?;

    Ok(Json(json!({
        "transactions": txns,
        "limit": query.limit,
        "offset": query.offset,
        "total": total,
    })))
}

/// Loads a transaction only if it is on the caller's own wallet.
async fn own_transaction(state: &AppState, user_id: &str, id: Uuid) -> AppResult<Transaction> {
    let wallet = state.engine.wallets.get_or_create(user_id).await?;
    let tx = state.engine.ledger.get(id).await?;
    if tx.wallet_id != wallet.id() {
        return Err(AppError::NotFound(format!("Transaction {id} not found")));
    }
    Ok(tx)
}

pub async fn get_transaction(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Transaction>> {
    Ok(Json(own_transaction(&state, &user.id, id).await?))
}

pub async fn amend_transaction(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Transaction>> {
    own_transaction(&state, &user.id, id).await?;
    Ok(Json(state.engine.ledger.amend(id).await?))
}

pub async fn delete_transaction(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    own_transaction(&state, &user.id, id).await?;
    state.engine.ledger.remove(id).await?;
    Ok(Json(json!({ "deleted": true })))
}

pub async fn spend(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Json(body): Json<SpendRequest>,
) -> AppResult<Json<Value>> {
    let (wallet, tx) = state
        .engine
        .wallets
        .spend(&user.id, body.into_entry())
        .await?;
    Ok(Json(json!({ "wallet": wallet.summary(), "transaction": tx })))
}

pub async fn reconcile(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
) -> AppResult<Json<Reconciliation>> {
    Ok(Json(state.engine.wallets.reconcile(&user.id).await?))
}
