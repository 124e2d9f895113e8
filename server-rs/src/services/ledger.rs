use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Transaction, TransactionQuery, TransactionReason};
use crate::store::DynStore;

/// Read side of the coin ledger. Entries are written only by the wallet and
/// reward services, and never changed afterwards.
#[derive(Clone)]
pub struct LedgerService {
    store: DynStore,
}

impl LedgerService {
    pub fn new(store: DynStore) -> Self {
        Self { store }
    }

    pub async fn list(&self, wallet_id: Uuid, query: &TransactionQuery) -> AppResult<Vec<Transaction>> {
        self.store.list_transactions(wallet_id, query).await
    }

    pub async fn by_reason(
        &self,
        wallet_id: Uuid,
        reason: TransactionReason,
    ) -> AppResult<Vec<Transaction>> {
        self.store
            .transactions_by_reason(wallet_id, reason.kind(), reason)
            .await
    }

    pub async fn recent(&self, wallet_id: Uuid, n: i64) -> AppResult<Vec<Transaction>> {
        self.list(wallet_id, &TransactionQuery::new(Some(n), None, None))
            .await
    }

    pub async fn count(&self, wallet_id: Uuid) -> AppResult<i64> {
        self.store.count_transactions(wallet_id).await
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Transaction> {
        self.store
            .get_transaction(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Transaction {id} not found")))
    }

    /// Always refused: ledger entries cannot be edited.
    pub async fn amend(&self, id: Uuid) -> AppResult<Transaction> {
        self.get(id).await?;
        Err(AppError::ImmutableRecord(format!(
            "Transaction {id} cannot be modified"
        )))
    }

    /// Always refused: ledger entries cannot be removed.
    pub async fn remove(&self, id: Uuid) -> AppResult<()> {
        self.get(id).await?;
        Err(AppError::ImmutableRecord(format!(
            "Transaction {id} cannot be deleted"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewTransaction, TransactionKind};
    use crate::services::testing::Harness;
    use chrono::Duration;

    #[tokio::test]
    async fn lists_newest_first_with_paging_and_filter() {
        let h = Harness::new();
        let wallet = h.engine.wallets.get_or_create("u1").await.unwrap();
        for amount in [5, 6, 7] {
            h.clock.advance(Duration::seconds(1));
            h.engine
                .wallets
                .spend("u1", NewTransaction::spend(amount, TransactionReason::ShopPurchase))
                .await
                .unwrap();
        }

        let all = h
            .engine
            .ledger
            .list(wallet.id(), &TransactionQuery::default())
            .await
            .unwrap();
        let amounts: Vec<i64> = all.iter().map(|t| t.amount).collect();
        assert_eq!(amounts, vec![7, 6, 5, 100]);

        let page = h
            .engine
            .ledger
            .list(wallet.id(), &TransactionQuery::new(Some(2), Some(1), None))
            .await
            .unwrap();
        assert_eq!(page.iter().map(|t| t.amount).collect::<Vec<_>>(), vec![6, 5]);

        let earned = h
            .engine
            .ledger
            .list(
                wallet.id(),
                &TransactionQuery::new(None, None, Some(TransactionKind::Earn)),
            )
            .await
            .unwrap();
        assert_eq!(earned.len(), 1);
        assert_eq!(earned[0].reason, TransactionReason::WelcomeBonus);

        let recent = h.engine.ledger.recent(wallet.id(), 1).await.unwrap();
        assert_eq!(recent[0].amount, 7);
        assert_eq!(h.engine.ledger.count(wallet.id()).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn entries_cannot_be_amended_or_removed() {
        let h = Harness::new();
        let wallet = h.engine.wallets.get_or_create("u1").await.unwrap();
        let tx = h.engine.ledger.recent(wallet.id(), 1).await.unwrap().remove(0);

        assert!(matches!(
            h.engine.ledger.amend(tx.id).await,
            Err(AppError::ImmutableRecord(_))
        ));
        assert!(matches!(
            h.engine.ledger.remove(tx.id).await,
            Err(AppError::ImmutableRecord(_))
        ));
        assert_eq!(h.engine.ledger.get(tx.id).await.unwrap(), tx);
        assert!(matches!(
            h.engine.ledger.remove(Uuid::new_v4()).await,
            Err(AppError::NotFound(_))
        ));
    }
}
