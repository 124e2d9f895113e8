use serde::Deserialize;
use serde_json::Value;

use crate::models::ledger::{NewTransaction, TransactionKind, TransactionQuery, TransactionReason};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendRequest {
    pub amount: i64,
    pub reason: TransactionReason,
    pub description: Option<String>,
    pub metadata: Option<Value>,
    pub idempotency_key: Option<String>,
}

impl SpendRequest {
    pub fn into_entry(self) -> NewTransaction {
        let mut entry = NewTransaction::spend(self.amount, self.reason);
        entry.description = self.description;
        entry.metadata = self.metadata;
        entry.idempotency_key = self.idempotency_key;
        entry
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRequest {
    pub amount: i64,
    pub description: Option<String>,
    pub idempotency_key: Option<String>,
}

/// `?limit=&offset=&type=` on the transaction history.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    #[serde(rename = "type")]
    pub kind: Option<TransactionKind>,
}

impl From<TransactionsQuery> for TransactionQuery {
    fn from(q: TransactionsQuery) -> Self {
        TransactionQuery::new(q.limit, q.offset, q.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spend_request_keeps_caller_fields() {
        let req: SpendRequest = serde_json::from_value(serde_json::json!({
            "amount": 30,
            "reason": "SHOP_PURCHASE",
            "idempotencyKey": "order-9",
            "metadata": {"itemId": "hat"}
        }))
        .unwrap();
        let entry = req.into_entry();
        assert_eq!(entry.kind, TransactionKind::Spend);
        assert_eq!(entry.amount, 30);
        assert_eq!(entry.idempotency_key.as_deref(), Some("order-9"));
        assert!(entry.validate().is_ok());
    }

    #[test]
    fn history_query_is_clamped() {
        let q: TransactionQuery = TransactionsQuery {
            limit: Some(10_000),
            offset: Some(-4),
            kind: Some(TransactionKind::Earn),
        }
        .into();
        assert_eq!(q.limit, crate::models::ledger::MAX_PAGE_SIZE);
        assert_eq!(q.offset, 0);
    }
}
