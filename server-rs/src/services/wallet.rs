use serde::Serialize;
use tracing::info;

use crate::clock::DynClock;
use crate::error::{AppError, AppResult};
use crate::models::{
    LedgerTotals, NewTransaction, Transaction, TransactionKind, TransactionReason, Wallet,
    WalletSummary,
};
use crate::store::DynStore;

/// Result of re-deriving a wallet's totals from its ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub wallet: WalletSummary,
    pub ledger: LedgerTotals,
    pub consistent: bool,
}

#[derive(Clone)]
pub struct WalletService {
    store: DynStore,
    clock: DynClock,
    starting_bonus: i64,
}

impl WalletService {
    pub fn new(store: DynStore, clock: DynClock, starting_bonus: i64) -> Self {
        Self {
            store,
            clock,
            starting_bonus,
        }
    }

    /// Loads the user's wallet, opening it with the starting bonus on first
    /// access. The bonus is written to the ledger together with the wallet.
    pub async fn get_or_create(&self, user_id: &str) -> AppResult<Wallet> {
        require_user(user_id)?;
        if let Some(wallet) = self.store.find_wallet(user_id).await? {
            return Ok(wallet);
        }

        let now = self.clock.now();
        let wallet = Wallet::open(user_id, self.starting_bonus, now)?;
        let opening = if self.starting_bonus > 0 {
            Some(
                NewTransaction::earn(self.starting_bonus, TransactionReason::WelcomeBonus)
                    .with_description("Welcome bonus")
                    .with_idempotency_key(format!("welcome:{user_id}"))
                    .into_record(wallet.id(), now)?,
            )
        } else {
            None
        };

        let wallet = self.store.create_wallet(wallet, opening).await?;
        info!(user_id, wallet_id = %wallet.id(), balance = wallet.balance(), "wallet opened");
        Ok(wallet)
    }

    pub async fn get_wallet(&self, user_id: &str) -> AppResult<WalletSummary> {
        Ok(self.get_or_create(user_id).await?.summary())
    }

    /// Debits the wallet for another subsystem (shop, monster creation).
    pub async fn spend(&self, user_id: &str, entry: NewTransaction) -> AppResult<(Wallet, Transaction)> {
        if entry.kind != TransactionKind::Spend {
            return Err(AppError::InvalidArgument(
                "Spending requires a SPEND transaction".into(),
            ));
        }
        entry.validate()?;
        entry.ensure_caller_key()?;
        self.get_or_create(user_id).await?;

        let (wallet, tx) = self
            .store
            .apply_to_wallet(user_id, entry, self.clock.now())
            .await?;
        info!(user_id, amount = tx.amount, reason = %tx.reason, balance = wallet.balance(), "coins spent");
        Ok((wallet, tx))
    }

    /// Operator credit, recorded as ADMIN_ADD.
    pub async fn grant(
        &self,
        user_id: &str,
        amount: i64,
        description: Option<String>,
        idempotency_key: Option<String>,
    ) -> AppResult<(Wallet, Transaction)> {
        let mut entry = NewTransaction::earn(amount, TransactionReason::AdminAdd);
        entry.description = description;
        entry.idempotency_key = idempotency_key;
        entry.validate()?;
        entry.ensure_caller_key()?;
        self.get_or_create(user_id).await?;

        let (wallet, tx) = self
            .store
            .apply_to_wallet(user_id, entry, self.clock.now())
            .await?;
        info!(user_id, amount = tx.amount, balance = wallet.balance(), "coins granted");
        Ok((wallet, tx))
    }

    pub async fn reconcile(&self, user_id: &str) -> AppResult<Reconciliation> {
        let wallet = self.get_or_create(user_id).await?;
        let ledger = self.store.ledger_totals(wallet.id()).await?;
        let consistent = ledger.earned == wallet.total_earned()
            && ledger.spent == wallet.total_spent()
            && ledger.net() == wallet.balance();
        if !consistent {
            tracing::warn!(user_id, wallet_id = %wallet.id(), "wallet totals disagree with ledger");
        }
        Ok(Reconciliation {
            wallet: wallet.summary(),
            ledger,
            consistent,
        })
    }
}

pub(crate) fn require_user(user_id: &str) -> AppResult<()> {
    if user_id.trim().is_empty() {
        return Err(AppError::InvalidArgument("User id must not be empty".into()));
    }
    Ok(())
}
