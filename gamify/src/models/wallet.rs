//! Wallet data models: balances, ledger transactions, transfers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ledger entry kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WalletTransactionType {
    Credit,
    Debit,
    TransferOut,
    TransferIn,
}

/// Transfer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransferStatus {
    Pending,
    Completed,
    Failed,
}

/// Immutable ledger entry. Sequence order is stable within a wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletTransaction {
    pub id: Uuid,
    pub user_id: String,
    pub point_category_id: String,
    /// Signed: positive for credit/transferIn, negative for debit/transferOut.
    pub amount: i64,
    #[serde(rename = "type")]
    pub transaction_type: WalletTransactionType,
    pub timestamp: DateTime<Utc>,
    /// Transfer id for transferOut/transferIn entries, trigger event id for
    /// rule-driven credits and debits.
    #[serde(default)]
    pub reference_id: Option<String>,
}

impl WalletTransaction {
    pub fn new(
        user_id: impl Into<String>,
        point_category_id: impl Into<String>,
        amount: i64,
        transaction_type: WalletTransactionType,
        reference_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            point_category_id: point_category_id.into(),
            amount,
            transaction_type,
            timestamp: Utc::now(),
            reference_id,
        }
    }
}

/// A two-sided move of points between users. Created `pending`; resolved to
/// `completed` together with its two ledger entries, or `failed` with a
/// reason and no entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletTransfer {
    pub id: Uuid,
    pub from_user_id: String,
    pub to_user_id: String,
    pub point_category_id: String,
    pub amount: i64,
    pub status: TransferStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

/// Per-`(user, category)` balance plus ledger, as returned by reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub user_id: String,
    pub point_category_id: String,
    pub balance: i64,
    pub transactions: Vec<WalletTransaction>,
}

impl Wallet {
    /// The invariant every store must maintain: balance equals the sum of
    /// the ledger.
    pub fn is_consistent(&self) -> bool {
        self.balance == self.transactions.iter().map(|t| t.amount).sum::<i64>()
    }
}
